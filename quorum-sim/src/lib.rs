// Epoch-based quorum election over a simulated unreliable network.

pub mod config;
pub mod data_structures;
pub mod election;
pub mod error;
pub mod history;
pub mod network;
pub mod simulation;

pub mod test_utils;

pub use config::{RouterMode, SimulationConfig};
pub use error::{SimResult, SimulationError};
pub use simulation::{Simulation, SimulationSnapshot};
