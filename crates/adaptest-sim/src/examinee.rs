//! Simulated test-takers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use adaptest_core::bank::BankVersion;
use adaptest_core::irt;
use adaptest_core::model::Item;
use adaptest_core::session::PresentedItem;
use adaptest_core::traits::{Examinee, ExamineeAnswer};

use crate::error::SimulationError;

fn lookup<'a>(bank: &'a BankVersion, examinee: &str, item_id: &str) -> anyhow::Result<&'a Item> {
    bank.position(item_id)
        .and_then(|i| bank.item(i))
        .ok_or_else(|| {
            SimulationError::UnknownItem {
                examinee: examinee.to_string(),
                item_id: item_id.to_string(),
            }
            .into()
        })
}

fn wrong_answer(key: &str) -> String {
    format!("not-{key}")
}

/// A test-taker with a fixed true ability who answers according to the
/// 3PL model of the bank it was given.
pub struct SimulatedExaminee {
    id: String,
    true_theta: f64,
    bank: Arc<BankVersion>,
    rng: Mutex<StdRng>,
    latency: Duration,
    call_count: AtomicU32,
}

impl SimulatedExaminee {
    pub fn new(id: impl Into<String>, true_theta: f64, bank: Arc<BankVersion>, seed: u64) -> Self {
        Self {
            id: id.into(),
            true_theta,
            bank,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            latency: Duration::from_secs(20),
            call_count: AtomicU32::new(0),
        }
    }

    /// Reported time taken per answer.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn true_theta(&self) -> f64 {
        self.true_theta
    }

    /// Number of items answered so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Examinee for SimulatedExaminee {
    fn id(&self) -> &str {
        &self.id
    }

    async fn respond(&self, item: &PresentedItem) -> anyhow::Result<ExamineeAnswer> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let bank_item = lookup(&self.bank, &self.id, &item.item_id)?;

        let p = irt::probability(&bank_item.params, self.true_theta);
        let draw: f64 = self.rng.lock().unwrap_or_else(|e| e.into_inner()).gen();
        let answer = if draw < p {
            bank_item.key.clone()
        } else {
            wrong_answer(&bank_item.key)
        };

        Ok(ExamineeAnswer {
            answer,
            latency: self.latency,
        })
    }
}

/// A test-taker that follows a fixed correct/incorrect pattern, cycling
/// when it runs out.
pub struct ScriptedExaminee {
    id: String,
    pattern: Vec<bool>,
    bank: Arc<BankVersion>,
    call_count: AtomicU32,
    last_item: Mutex<Option<PresentedItem>>,
}

impl ScriptedExaminee {
    pub fn new(id: impl Into<String>, pattern: Vec<bool>, bank: Arc<BankVersion>) -> Self {
        Self {
            id: id.into(),
            pattern,
            bank,
            call_count: AtomicU32::new(0),
            last_item: Mutex::new(None),
        }
    }

    /// Get the number of items answered.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// The most recent item presented.
    pub fn last_item(&self) -> Option<PresentedItem> {
        self.last_item
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Examinee for ScriptedExaminee {
    fn id(&self) -> &str {
        &self.id
    }

    async fn respond(&self, item: &PresentedItem) -> anyhow::Result<ExamineeAnswer> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed) as usize;
        *self.last_item.lock().unwrap_or_else(|e| e.into_inner()) = Some(item.clone());

        let bank_item = lookup(&self.bank, &self.id, &item.item_id)?;
        let correct = if self.pattern.is_empty() {
            true
        } else {
            self.pattern[n % self.pattern.len()]
        };

        Ok(ExamineeAnswer {
            answer: if correct {
                bank_item.key.clone()
            } else {
                wrong_answer(&bank_item.key)
            },
            latency: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptest_core::bank::ItemBank;
    use adaptest_core::exposure::ExposureControl;
    use adaptest_core::model::{CalibratedItem, CalibrationRun, ItemParams};
    use chrono::Utc;

    fn bank() -> Arc<BankVersion> {
        let bank = ItemBank::new(Arc::new(ExposureControl::default()), 1);
        bank.publish_version(&CalibrationRun::completed(
            500,
            vec![
                CalibratedItem {
                    id: "easy".into(),
                    content_ref: String::new(),
                    params: ItemParams::new(1.5, -2.0, 0.0),
                    key: "C".into(),
                    is_active: true,
                    target_exposure: 1.0,
                    tags: vec![],
                },
                CalibratedItem {
                    id: "hard".into(),
                    content_ref: String::new(),
                    params: ItemParams::new(1.5, 2.0, 0.0),
                    key: "B".into(),
                    is_active: true,
                    target_exposure: 1.0,
                    tags: vec![],
                },
            ],
        ))
        .unwrap();
        bank.current().unwrap()
    }

    fn presented(id: &str) -> PresentedItem {
        PresentedItem {
            item_id: id.into(),
            content_ref: String::new(),
            position: 1,
            presented_at: Utc::now(),
            forced: false,
        }
    }

    #[tokio::test]
    async fn able_examinee_mostly_solves_easy_items() {
        let bank = bank();
        let key = bank.item(0).unwrap().clone();
        let examinee = SimulatedExaminee::new("strong", 1.0, bank, 3);
        let mut correct = 0;
        for _ in 0..200 {
            let answer = examinee.respond(&presented("easy")).await.unwrap();
            if key.is_correct(&answer.answer) {
                correct += 1;
            }
        }
        assert!(correct > 180, "P(correct) ~ 0.99, got {correct}/200");
        assert_eq!(examinee.call_count(), 200);
    }

    #[tokio::test]
    async fn weak_examinee_mostly_misses_hard_items() {
        let bank = bank();
        let key = bank.item(1).unwrap().clone();
        let examinee = SimulatedExaminee::new("weak", -1.0, bank, 4);
        let mut correct = 0;
        for _ in 0..200 {
            let answer = examinee.respond(&presented("hard")).await.unwrap();
            if key.is_correct(&answer.answer) {
                correct += 1;
            }
        }
        assert!(correct < 20, "P(correct) ~ 0.01, got {correct}/200");
    }

    #[tokio::test]
    async fn same_seed_same_answers() {
        let bank = bank();
        let a = SimulatedExaminee::new("a", 0.0, Arc::clone(&bank), 11);
        let b = SimulatedExaminee::new("b", 0.0, bank, 11);
        for _ in 0..20 {
            let x = a.respond(&presented("easy")).await.unwrap();
            let y = b.respond(&presented("easy")).await.unwrap();
            assert_eq!(x.answer, y.answer);
        }
    }

    #[tokio::test]
    async fn scripted_pattern_cycles() {
        let bank = bank();
        let key = bank.item(0).unwrap().clone();
        let examinee = ScriptedExaminee::new("s", vec![true, false], bank);
        let first = examinee.respond(&presented("easy")).await.unwrap();
        let second = examinee.respond(&presented("easy")).await.unwrap();
        let third = examinee.respond(&presented("easy")).await.unwrap();
        assert!(key.is_correct(&first.answer));
        assert!(!key.is_correct(&second.answer));
        assert!(key.is_correct(&third.answer));
        assert_eq!(examinee.call_count(), 3);
        assert_eq!(examinee.last_item().unwrap().item_id, "easy");
    }

    #[tokio::test]
    async fn unknown_item_is_an_error() {
        let examinee = SimulatedExaminee::new("x", 0.0, bank(), 1);
        let err = examinee.respond(&presented("missing")).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
