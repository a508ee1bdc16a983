//! Simulation error types.

use adaptest_core::error::CatError;
use thiserror::Error;

/// Errors that can occur while running a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The simulation settings cannot produce a run.
    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    /// A simulated test-taker was asked about an item it cannot see.
    #[error("examinee '{examinee}' has no parameters for item '{item_id}'")]
    UnknownItem { examinee: String, item_id: String },

    /// The engine refused an operation.
    #[error(transparent)]
    Engine(#[from] CatError),
}
