// main.rs
//
// Demo run: launch a city, let traffic settle, fire a road disruption part
// way through, reopen the roads, and print what the fleet made of it.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::time::Duration;
use tokio::time;
use traffic_agents::config::SimulationConfig;
use traffic_agents::engine::Simulation;
use traffic_agents::metrics::MetricsRecorder;

#[derive(Parser)]
#[command(name = "traffic_agents")]
#[command(about = "Agent-based city traffic simulation")]
struct Cli {
    /// Grid side length in nodes
    #[arg(long, default_value = "6")]
    grid_size: i16,

    /// Number of roaming cars
    #[arg(long, default_value = "10")]
    cars: usize,

    /// Number of ambulances
    #[arg(long, default_value = "4")]
    ambulances: usize,

    /// Road pairs closed per disruption
    #[arg(long, default_value = "3")]
    closures: usize,

    /// Scales every vehicle's base speed
    #[arg(long, default_value = "2.0")]
    speed_multiplier: f64,

    /// Fixed RNG seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Total run time in seconds
    #[arg(long, default_value = "30")]
    duration_secs: u64,

    /// Seconds into the run the disruption fires
    #[arg(long, default_value = "8")]
    disrupt_after_secs: u64,

    /// Seconds after firing until the roads reopen
    #[arg(long, default_value = "10")]
    restore_after_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = SimulationConfig::for_grid(cli.grid_size);
    config.cars = cli.cars;
    config.ambulances = cli.ambulances;
    config.closure_pairs = cli.closures;
    config.speed_multiplier = cli.speed_multiplier;
    config.seed = cli.seed;

    let (sim, mut metrics_rx) = Simulation::launch_with_metrics(&config);
    let disruptor = sim.disruptor();
    let coordinator = sim.coordinator_snapshots();

    let toggle = tokio::spawn(async move {
        time::sleep(Duration::from_secs(cli.disrupt_after_secs)).await;
        if disruptor.activate().await {
            info!("disruption fired");
        }
        time::sleep(Duration::from_secs(cli.restore_after_secs)).await;
        if disruptor.deactivate().await {
            info!("roads reopened");
        }
    });

    let mut elapsed = 0;
    while elapsed < cli.duration_secs {
        let chunk = 5.min(cli.duration_secs - elapsed);
        time::sleep(Duration::from_secs(chunk)).await;
        elapsed += chunk;
        let snapshot = coordinator.borrow().clone();
        info!(
            "t+{elapsed}s: {} vehicles, {} closed edges, {} arrivals (avg travel {:.1} ticks)",
            snapshot.registered.len(),
            snapshot.blocked_edges.len(),
            snapshot.stats.total,
            snapshot.stats.avg_travel_ticks
        );
    }

    toggle.abort();
    let _ = toggle.await;
    sim.shutdown().await;

    let mut recorder = MetricsRecorder::new();
    while let Ok(event) = metrics_rx.try_recv() {
        recorder.record(event);
    }
    let stats = coordinator.borrow().stats;
    println!(
        "run complete: {} arrivals, avg travel {:.1} ticks, avg waiting {:.1} ticks",
        stats.total, stats.avg_travel_ticks, stats.avg_waiting_ticks
    );
    println!("{}", recorder.summary());
    Ok(())
}
