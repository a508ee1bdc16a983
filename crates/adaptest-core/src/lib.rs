//! adaptest-core — Computerized adaptive testing engine.
//!
//! This crate holds the 3PL response model, ability estimation, item
//! selection with Sympson-Hetter exposure control, the versioned item bank,
//! and the session state machine that ties them together.

pub mod bank;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod exposure;
pub mod irt;
pub mod model;
pub mod parser;
pub mod report;
pub mod selector;
pub mod session;
pub mod statistics;
pub mod traits;
