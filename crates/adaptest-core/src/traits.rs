//! Seams to the outside world: the test-taker a session waits on, and the
//! clock sessions are timed against.
//!
//! `Examinee` is implemented by the `adaptest-sim` crate; a delivery layer
//! would implement it over its own transport.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::PresentedItem;

// ---------------------------------------------------------------------------
// Examinee trait
// ---------------------------------------------------------------------------

/// A test-taker answering presented items.
#[async_trait]
pub trait Examinee: Send + Sync {
    /// Reference used for the session's test-taker field.
    fn id(&self) -> &str;

    /// Wait for an answer to `item`. May take arbitrarily long.
    async fn respond(&self, item: &PresentedItem) -> anyhow::Result<ExamineeAnswer>;
}

/// An answer as delivered by the test-taker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamineeAnswer {
    pub answer: String,
    pub latency: Duration,
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of wall-clock time for session timing.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *self.now.lock().unwrap_or_else(|e| e.into_inner()) += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
