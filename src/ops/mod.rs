//! Operational surface: heartbeat tracking, Prometheus metrics and the
//! HTTP endpoints a supervisor probes.

mod health;
pub mod metrics;
mod server;

pub use health::HealthState;
pub use server::{run_ops_server, OpsState};
