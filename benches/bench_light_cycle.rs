// benches/bench_light_cycle.rs
use criterion::{
    black_box, AxisScale, Criterion, PlotConfiguration, criterion_group, criterion_main,
};
use std::time::Duration;
use traffic_agents::agents::TrafficLightAgent;
use traffic_agents::communication::{light_address, Message};
use traffic_agents::network::{NodeId, Orientation};

fn placed_light(orientation: Orientation) -> TrafficLightAgent {
    let mut agent = TrafficLightAgent::new(NodeId(2, 2), orientation, 8, 7, 2);
    agent.handle_message(Message::PositionData {
        node_id: NodeId(2, 2),
        x: 450.0,
        y: 450.0,
    });
    agent
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("light_cycle");

    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    group.bench_function("single_head", |b| {
        let mut agent = placed_light(Orientation::Horizontal);
        b.iter(|| {
            let outbound = agent.cycle_tick();
            black_box(outbound)
        });
    });

    // Both heads of one intersection, cross-feeding their paired updates the
    // way the bus would.
    group.bench_function("paired_heads", |b| {
        let mut horizontal = placed_light(Orientation::Horizontal);
        let mut vertical = placed_light(Orientation::Vertical);
        let horizontal_address = light_address(NodeId(2, 2), Orientation::Horizontal);
        let vertical_address = light_address(NodeId(2, 2), Orientation::Vertical);
        b.iter(|| {
            for (to, message) in horizontal.cycle_tick() {
                if to == vertical_address {
                    vertical.handle_message(message);
                }
            }
            for (to, message) in vertical.cycle_tick() {
                if to == horizontal_address {
                    horizontal.handle_message(message);
                }
            }
            black_box((&horizontal, &vertical));
        });
    });
    group.finish();
}

criterion_group!(benches, bench_cycle);
criterion_main!(benches);
