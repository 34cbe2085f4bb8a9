// metrics.rs
//
// Route planning measurements. Vehicles push events into an unbounded
// channel as they replan; whoever holds the receiving end can fold them
// into a MetricsRecorder and print the summary when the run ends.

use std::fmt;
use tokio::sync::mpsc;

pub type MetricsSender = mpsc::UnboundedSender<MetricsEvent>;
pub type MetricsReceiver = mpsc::UnboundedReceiver<MetricsEvent>;

pub fn channel() -> (MetricsSender, MetricsReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricsEvent {
    /// Wall-clock time one route computation took.
    RecalcLatency { vehicle_id: String, latency_ms: f64 },
    /// Cost of an abandoned route against its replacement, recorded when a
    /// closure forces a detour.
    RouteCosts {
        vehicle_id: String,
        original_cost: f64,
        new_cost: f64,
    },
    /// Composition of a freshly planned route's cost.
    PenaltyBreakdown {
        vehicle_id: String,
        base_cost: f64,
        signal_penalty: f64,
        traffic_penalty: f64,
    },
    /// Planned cost against the base weight actually driven, reported once
    /// per completed leg.
    LegCompleted {
        vehicle_id: String,
        planned_cost: f64,
        traveled_cost: f64,
    },
}

/// Running aggregates over every event seen so far.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    latencies_ms: Vec<f64>,
    original_costs: Vec<f64>,
    new_costs: Vec<f64>,
    base_cost: f64,
    signal_penalty: f64,
    traffic_penalty: f64,
    legs: u64,
    planned_leg_cost: f64,
    traveled_leg_cost: f64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        MetricsRecorder::default()
    }

    pub fn record(&mut self, event: MetricsEvent) {
        match event {
            MetricsEvent::RecalcLatency { latency_ms, .. } => {
                self.latencies_ms.push(latency_ms);
            }
            MetricsEvent::RouteCosts {
                original_cost,
                new_cost,
                ..
            } => {
                self.original_costs.push(original_cost);
                self.new_costs.push(new_cost);
            }
            MetricsEvent::PenaltyBreakdown {
                base_cost,
                signal_penalty,
                traffic_penalty,
                ..
            } => {
                self.base_cost += base_cost;
                self.signal_penalty += signal_penalty;
                self.traffic_penalty += traffic_penalty;
            }
            MetricsEvent::LegCompleted {
                planned_cost,
                traveled_cost,
                ..
            } => {
                self.legs += 1;
                self.planned_leg_cost += planned_cost;
                self.traveled_leg_cost += traveled_cost;
            }
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let mut summary = MetricsSummary {
            recalc_count: self.latencies_ms.len(),
            ..MetricsSummary::default()
        };
        if !self.latencies_ms.is_empty() {
            let total: f64 = self.latencies_ms.iter().sum();
            summary.avg_latency_ms = total / self.latencies_ms.len() as f64;
            summary.min_latency_ms = self.latencies_ms.iter().copied().fold(f64::MAX, f64::min);
            summary.max_latency_ms = self.latencies_ms.iter().copied().fold(0.0, f64::max);
        }
        if !self.original_costs.is_empty() {
            let originals: f64 = self.original_costs.iter().sum();
            let news: f64 = self.new_costs.iter().sum();
            summary.avg_original_cost = originals / self.original_costs.len() as f64;
            summary.avg_new_cost = news / self.new_costs.len() as f64;
            if summary.avg_original_cost > 0.0 {
                summary.detour_factor = summary.avg_new_cost / summary.avg_original_cost;
            }
        }
        let total_cost = self.base_cost + self.signal_penalty + self.traffic_penalty;
        if total_cost > 0.0 {
            summary.base_share = self.base_cost / total_cost;
            summary.signal_share = self.signal_penalty / total_cost;
            summary.traffic_share = self.traffic_penalty / total_cost;
        }
        if self.legs > 0 {
            summary.legs = self.legs;
            summary.avg_planned_leg_cost = self.planned_leg_cost / self.legs as f64;
            summary.avg_traveled_leg_cost = self.traveled_leg_cost / self.legs as f64;
        }
        summary
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub recalc_count: usize,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub avg_original_cost: f64,
    pub avg_new_cost: f64,
    /// avg_new_cost / avg_original_cost; 1.0 means detours cost nothing.
    pub detour_factor: f64,
    pub base_share: f64,
    pub signal_share: f64,
    pub traffic_share: f64,
    pub legs: u64,
    pub avg_planned_leg_cost: f64,
    pub avg_traveled_leg_cost: f64,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "route recalculations: {} (latency avg {:.3} ms, min {:.3} ms, max {:.3} ms)",
            self.recalc_count, self.avg_latency_ms, self.min_latency_ms, self.max_latency_ms
        )?;
        writeln!(
            f,
            "detours: original cost avg {:.1}, new cost avg {:.1}, detour factor {:.2}",
            self.avg_original_cost, self.avg_new_cost, self.detour_factor
        )?;
        writeln!(
            f,
            "legs completed: {} (planned cost avg {:.1}, traveled base avg {:.1})",
            self.legs, self.avg_planned_leg_cost, self.avg_traveled_leg_cost
        )?;
        write!(
            f,
            "cost composition: base {:.1}%, signals {:.1}%, traffic {:.1}%",
            self.base_share * 100.0,
            self.signal_share * 100.0,
            self.traffic_share * 100.0
        )
    }
}
