//! In-process deployment: one coordinator, simulated peers, loopback links.

mod orchestrator;
mod stats;

pub use orchestrator::{Simulation, SimulationConfig};
pub use stats::{PeerReport, SimulationStats};
