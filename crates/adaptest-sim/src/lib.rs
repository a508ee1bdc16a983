//! adaptest-sim — Simulated test-takers.
//!
//! Implements the `Examinee` trait with 3PL-driven responders and runs
//! batches of concurrent sessions against a `CatEngine`, reporting how well
//! true abilities were recovered and how often each item was shown.

pub mod error;
pub mod examinee;
pub mod simulator;

pub use error::SimulationError;
pub use examinee::{ScriptedExaminee, SimulatedExaminee};
pub use simulator::{NoopProgress, SimulationProgress, Simulator, SimulatorConfig};
