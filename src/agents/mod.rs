// agents/mod.rs

pub mod coordinator;
pub mod disruptor;
pub mod traffic_light;
pub mod vehicle;

pub use coordinator::CoordinatorAgent;
pub use disruptor::{DisruptorAgent, DisruptorCommand};
pub use traffic_light::TrafficLightAgent;
pub use vehicle::{VehicleAgent, VehicleKind};
