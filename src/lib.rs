//! Agent-based city traffic simulation.
//!
//! A grid of roads, a fleet of vehicles, paired traffic lights and a road
//! disruptor, each running as an independent task that communicates only
//! through addressed JSON messages on an in-process bus. The engine wires a
//! scenario together; snapshots and metrics channels expose what happens.

pub mod agents;
pub mod communication;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod network;
pub mod routing;
pub mod snapshot;
