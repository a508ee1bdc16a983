//! Per-test-taker session state machine.
//!
//! ```text
//! Initializing ──► InProgress ──► Completed(reason)
//!                      │
//!                      └────────► Terminated(reason)
//! ```
//!
//! A session pins one bank version for its whole life, never offers an
//! item twice, and cannot change once it reaches a terminal state.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bank::BankVersion;
use crate::error::CatError;
use crate::estimator::{AbilityEstimator, ScoredItem};
use crate::model::{
    AbilityEstimate, DegradationPolicy, Item, Response, SessionConfig, VersionId,
};
use crate::selector::{self, Candidate, Selection, SelectionContext};

pub type SessionId = Uuid;

/// Why a session finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    MaxItems,
    PrecisionReached,
    TimeLimit,
    BankExhausted,
}

/// Why a session ended abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Aborted,
    Timeout,
    /// Exposure control rejected every item and no degradation was allowed.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    InProgress,
    Completed(CompletionReason),
    Terminated(TerminationReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed(_) | SessionState::Terminated(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::InProgress => write!(f, "in progress"),
            SessionState::Completed(reason) => write!(f, "completed ({reason:?})"),
            SessionState::Terminated(reason) => write!(f, "terminated ({reason:?})"),
        }
    }
}

/// An item handed to the delivery layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentedItem {
    pub item_id: String,
    pub content_ref: String,
    /// 1-based position in the session.
    pub position: usize,
    pub presented_at: DateTime<Utc>,
    /// Administered despite exposure control rejecting it.
    pub forced: bool,
}

/// Final outcome of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub test_taker: String,
    pub state: SessionState,
    pub estimate: AbilityEstimate,
    pub items_administered: usize,
    pub bank_version: VersionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// What the caller should do next.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    NextItem(PresentedItem),
    Finished(SessionResult),
}

impl Step {
    pub fn next_item(&self) -> Option<&PresentedItem> {
        match self {
            Step::NextItem(item) => Some(item),
            Step::Finished(_) => None,
        }
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub test_taker: String,
    pub state: SessionState,
    pub estimate: AbilityEstimate,
    pub administered: Vec<String>,
    pub pending_item: Option<String>,
    pub bank_version: VersionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    index: usize,
    presented_at: DateTime<Utc>,
    information: f64,
}

/// One test-taker's adaptive test.
#[derive(Debug)]
pub struct TestSession {
    id: SessionId,
    test_taker: String,
    bank: Arc<BankVersion>,
    config: SessionConfig,
    state: SessionState,
    estimate: AbilityEstimate,
    administered: Vec<usize>,
    administered_set: HashSet<usize>,
    responses: Vec<Response>,
    pending: Option<Pending>,
    tag_counts: BTreeMap<String, usize>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    rng: StdRng,
}

impl TestSession {
    /// Create a session pinned to `bank`, with θ̂ at the prior.
    pub fn new(
        id: SessionId,
        test_taker: impl Into<String>,
        bank: Arc<BankVersion>,
        config: SessionConfig,
        rng: StdRng,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            test_taker: test_taker.into(),
            bank,
            config,
            state: SessionState::Initializing,
            estimate: AbilityEstimate::prior(),
            administered: Vec::new(),
            administered_set: HashSet::new(),
            responses: Vec::new(),
            pending: None,
            tag_counts: BTreeMap::new(),
            started_at: now,
            ended_at: None,
            rng,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn estimate(&self) -> AbilityEstimate {
        self.estimate
    }

    pub fn bank(&self) -> &Arc<BankVersion> {
        &self.bank
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// Ids of administered items in order.
    pub fn administered_ids(&self) -> Vec<String> {
        self.administered
            .iter()
            .filter_map(|&i| self.bank.item(i).map(|item| item.id.clone()))
            .collect()
    }

    /// Leave `Initializing` and present the first item.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<Step, CatError> {
        if self.state != SessionState::Initializing {
            return Err(CatError::SessionClosed(self.id));
        }
        self.state = SessionState::InProgress;
        Ok(self.advance(now))
    }

    /// Score a response to the pending item and move on.
    pub fn submit(
        &mut self,
        item_id: &str,
        answer: &str,
        latency: Duration,
        now: DateTime<Utc>,
        estimator: &AbilityEstimator,
    ) -> Result<Step, CatError> {
        if self.state.is_terminal() {
            return Err(self.closed_error());
        }
        let pending = match self.pending {
            Some(p) if self.bank.item(p.index).is_some_and(|i| i.id == item_id) => p,
            _ => {
                return Err(CatError::UnexpectedItem {
                    session_id: self.id,
                    item_id: item_id.to_string(),
                })
            }
        };

        if self.item_timed_out(&pending, now) {
            tracing::info!(session = %self.id, item = item_id, "late response discarded");
            return Ok(Step::Finished(self.finish(
                SessionState::Terminated(TerminationReason::Timeout),
                now,
            )));
        }

        let item = self
            .bank
            .item(pending.index)
            .ok_or_else(|| CatError::UnknownItem {
                item_id: item_id.to_string(),
                version: self.bank.id(),
            })?
            .clone();
        let correct = item.is_correct(answer);
        let theta_before = self.estimate.theta;

        let mut history = self.history();
        history.push(ScoredItem::new(item.params, correct));
        let estimate = estimator.estimate(&history);

        self.responses.push(Response {
            session_id: self.id,
            item_id: item.id.clone(),
            item_version: item.version,
            answer: answer.to_string(),
            correct,
            latency_ms: latency.as_millis() as u64,
            theta_before,
            theta_after: estimate.theta,
            se_after: estimate.se,
            information: pending.information,
            answered_at: now,
        });
        for tag in &item.tags {
            *self.tag_counts.entry(tag.clone()).or_default() += 1;
        }
        self.estimate = estimate;
        self.pending = None;

        tracing::debug!(
            session = %self.id,
            item = %item.id,
            correct,
            theta = estimate.theta,
            se = estimate.se,
            "response scored"
        );

        Ok(self.advance(now))
    }

    /// Abort the session. Responses collected so far are kept.
    pub fn abort(&mut self, now: DateTime<Utc>) -> Result<SessionResult, CatError> {
        if self.state.is_terminal() {
            return Err(self.closed_error());
        }
        Ok(self.finish(SessionState::Terminated(TerminationReason::Aborted), now))
    }

    /// Terminate the session as timed out, whatever the clock says.
    /// Used by drivers that enforce the response deadline themselves.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<SessionResult, CatError> {
        if self.state.is_terminal() {
            return Err(self.closed_error());
        }
        Ok(self.finish(SessionState::Terminated(TerminationReason::Timeout), now))
    }

    /// Terminate the session if the pending item or the session itself has
    /// run out of time. Returns whether the session was terminated.
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != SessionState::InProgress {
            return false;
        }
        let Some(pending) = self.pending else {
            return false;
        };
        if self.item_timed_out(&pending, now) || self.session_time_exceeded(now) {
            self.finish(SessionState::Terminated(TerminationReason::Timeout), now);
            return true;
        }
        false
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            test_taker: self.test_taker.clone(),
            state: self.state,
            estimate: self.estimate,
            administered: self.administered_ids(),
            pending_item: self
                .pending
                .and_then(|p| self.bank.item(p.index).map(|i| i.id.clone())),
            bank_version: self.bank.id(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }

    pub fn result(&self) -> SessionResult {
        SessionResult {
            session_id: self.id,
            test_taker: self.test_taker.clone(),
            state: self.state,
            estimate: self.estimate,
            items_administered: self.responses.len(),
            bank_version: self.bank.id(),
            started_at: self.started_at,
            ended_at: self.ended_at.unwrap_or(self.started_at),
        }
    }

    /// Items the session has shown, with their parameters.
    pub fn administered_items(&self) -> Vec<Item> {
        self.administered
            .iter()
            .filter_map(|&i| self.bank.item(i).cloned())
            .collect()
    }

    fn history(&self) -> Vec<ScoredItem> {
        self.responses
            .iter()
            .filter_map(|r| {
                let index = self.bank.position(&r.item_id)?;
                self.bank
                    .item(index)
                    .map(|item| ScoredItem::new(item.params, r.correct))
            })
            .collect()
    }

    fn stop_reason(&self, now: DateTime<Utc>) -> Option<CompletionReason> {
        let rule = &self.config.stopping;
        let given = self.responses.len();
        if given >= rule.max_items {
            return Some(CompletionReason::MaxItems);
        }
        if given >= rule.min_items && self.estimate.se <= rule.se_threshold {
            return Some(CompletionReason::PrecisionReached);
        }
        if self.session_time_exceeded(now) {
            return Some(CompletionReason::TimeLimit);
        }
        None
    }

    fn unmet_tags(&self) -> BTreeSet<String> {
        self.config
            .content_quotas
            .iter()
            .filter(|(tag, min)| self.tag_counts.get(tag.as_str()).copied().unwrap_or(0) < **min)
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Apply the stopping rule, then select and present the next item.
    fn advance(&mut self, now: DateTime<Utc>) -> Step {
        if let Some(reason) = self.stop_reason(now) {
            return Step::Finished(self.finish(SessionState::Completed(reason), now));
        }

        let unmet = self.unmet_tags();
        let ctx = SelectionContext {
            theta: self.estimate.theta,
            bank: &self.bank,
            administered: &self.administered_set,
            unmet_tags: &unmet,
        };
        match selector::select_item(&ctx, &mut self.rng) {
            Selection::Administer(candidate) => Step::NextItem(self.present(candidate, false, now)),
            Selection::Exhausted { fallback: None } => Step::Finished(self.finish(
                SessionState::Completed(CompletionReason::BankExhausted),
                now,
            )),
            Selection::Exhausted {
                fallback: Some(candidate),
            } => match self.config.degradation {
                DegradationPolicy::AdministerBest => {
                    tracing::warn!(
                        session = %self.id,
                        "exposure control rejected every candidate, administering best item"
                    );
                    selector::force_administration(&self.bank, &candidate);
                    Step::NextItem(self.present(candidate, true, now))
                }
                DegradationPolicy::Terminate => {
                    let error = CatError::ItemBankExhausted(self.id);
                    tracing::warn!(%error, "terminating session");
                    Step::Finished(self.finish(
                        SessionState::Terminated(TerminationReason::Exhausted),
                        now,
                    ))
                }
            },
        }
    }

    fn present(&mut self, candidate: Candidate, forced: bool, now: DateTime<Utc>) -> PresentedItem {
        self.administered.push(candidate.index);
        self.administered_set.insert(candidate.index);
        self.pending = Some(Pending {
            index: candidate.index,
            presented_at: now,
            information: candidate.information,
        });
        let (item_id, content_ref) = self
            .bank
            .item(candidate.index)
            .map(|i| (i.id.clone(), i.content_ref.clone()))
            .unwrap_or_default();
        PresentedItem {
            item_id,
            content_ref,
            position: self.administered.len(),
            presented_at: now,
            forced,
        }
    }

    fn finish(&mut self, state: SessionState, now: DateTime<Utc>) -> SessionResult {
        self.state = state;
        self.pending = None;
        self.ended_at = Some(now);
        tracing::info!(
            session = %self.id,
            state = %state,
            items = self.responses.len(),
            theta = self.estimate.theta,
            se = self.estimate.se,
            "session finished"
        );
        self.result()
    }

    /// Error returned for any mutation attempted after the session ended.
    fn closed_error(&self) -> CatError {
        match self.state {
            SessionState::Terminated(TerminationReason::Timeout) => CatError::SessionTimeout(self.id),
            SessionState::Terminated(TerminationReason::Aborted) => CatError::SessionAborted(self.id),
            _ => CatError::SessionClosed(self.id),
        }
    }

    fn item_timed_out(&self, pending: &Pending, now: DateTime<Utc>) -> bool {
        self.config
            .stopping
            .item_timeout_secs
            .is_some_and(|limit| now - pending.presented_at > chrono::Duration::seconds(limit as i64))
    }

    fn session_time_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.config
            .stopping
            .time_limit_secs
            .is_some_and(|limit| now - self.started_at >= chrono::Duration::seconds(limit as i64))
    }
}

/// Rebuild an ability estimate from a response log.
///
/// Each response is matched to its item by id and version, so a log can be
/// re-scored against exactly the parameters it was collected under.
pub fn replay(
    responses: &[Response],
    items: &[Item],
    estimator: &AbilityEstimator,
) -> Result<AbilityEstimate, CatError> {
    let history = responses
        .iter()
        .map(|r| {
            items
                .iter()
                .find(|i| i.id == r.item_id && i.version == r.item_version)
                .map(|i| ScoredItem::new(i.params, r.correct))
                .ok_or_else(|| CatError::UnknownItem {
                    item_id: r.item_id.clone(),
                    version: r.item_version,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(estimator.estimate(&history))
}
