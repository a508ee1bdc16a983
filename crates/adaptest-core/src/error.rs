//! Engine error types.
//!
//! Structural failures (bad parameters, an empty pool, unknown sessions)
//! surface to the caller as [`CatError`]. Numerical trouble inside the
//! estimator is an [`EstimationError`] and never leaves that module.

use thiserror::Error;
use uuid::Uuid;

use crate::model::VersionId;

/// Errors that can occur while running adaptive test sessions.
#[derive(Debug, Error)]
pub enum CatError {
    /// An item in a calibration run has out-of-range IRT parameters.
    #[error("invalid item parameters for '{item_id}': {reason}")]
    InvalidParameters { item_id: String, reason: String },

    /// Too few active items to publish a usable bank.
    #[error("bank has {active} active items, at least {required} required")]
    EmptyBank { active: usize, required: usize },

    /// No eligible item remains for the session.
    #[error("item bank exhausted for session {0}")]
    ItemBankExhausted(Uuid),

    /// The calibration pipeline produced a run that cannot be published.
    #[error("calibration run {run_id} rejected: {reason}")]
    CalibrationRejected { run_id: Uuid, reason: String },

    /// The session exceeded its per-item or total time limit.
    #[error("session {0} timed out")]
    SessionTimeout(Uuid),

    /// The session was aborted before completion.
    #[error("session {0} was aborted")]
    SessionAborted(Uuid),

    /// No session with this id is known to the engine.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// The session is in a terminal state and cannot change.
    #[error("session {0} is closed")]
    SessionClosed(Uuid),

    /// A response was submitted for an item the session is not waiting on.
    #[error("session {session_id} is not awaiting a response to item '{item_id}'")]
    UnexpectedItem { session_id: Uuid, item_id: String },

    /// The requested bank version was never published or has been released.
    #[error("item bank version {0} not found")]
    VersionNotFound(VersionId),

    /// A response references an item missing from the parameter set.
    #[error("item '{item_id}' ({version}) not found")]
    UnknownItem { item_id: String, version: VersionId },
}

impl CatError {
    /// Returns `true` if the error reflects a terminal session state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CatError::SessionTimeout(_) | CatError::SessionAborted(_) | CatError::SessionClosed(_)
        )
    }
}

/// Internal failures of an ability-estimation method.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    /// Newton-Raphson did not settle on an interior maximum.
    #[error("MLE did not converge after {iterations} iterations (theta={theta:.4})")]
    NonConvergence { iterations: u32, theta: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        let id = Uuid::nil();
        assert!(CatError::SessionTimeout(id).is_terminal());
        assert!(CatError::SessionAborted(id).is_terminal());
        assert!(!CatError::ItemBankExhausted(id).is_terminal());
        assert!(!CatError::SessionNotFound(id).is_terminal());
    }

    #[test]
    fn messages_name_the_offender() {
        let err = CatError::InvalidParameters {
            item_id: "alg-01".into(),
            reason: "a must be positive".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid item parameters for 'alg-01': a must be positive"
        );

        let err = CatError::EmptyBank {
            active: 2,
            required: 5,
        };
        assert!(err.to_string().contains("at least 5"));
    }
}
