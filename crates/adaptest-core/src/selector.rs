//! Maximum-information item selection under exposure control.
//!
//! 1. Score every eligible item by Fisher information at θ̂.
//! 2. Rank descending; items carrying a tag with an unmet content quota
//!    go ahead of the rest.
//! 3. Walk the ranking, letting each item's Sympson-Hetter cell accept or
//!    skip it.
//! 4. If nothing is accepted, report exhaustion together with the best
//!    candidate so the session can apply its degradation policy.

use std::collections::{BTreeSet, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bank::BankVersion;
use crate::irt;

/// Inputs to one selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub theta: f64,
    pub bank: &'a BankVersion,
    /// Bank indices already given in this session.
    pub administered: &'a HashSet<usize>,
    /// Tags whose minimum count has not been reached yet.
    pub unmet_tags: &'a BTreeSet<String>,
}

/// An item considered for administration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub index: usize,
    pub information: f64,
}

/// Result of a selection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// The item was accepted by exposure control.
    Administer(Candidate),
    /// No item was accepted. `fallback` is the top-ranked candidate, or
    /// `None` when the eligible pool is empty.
    Exhausted { fallback: Option<Candidate> },
}

/// Eligible items in the order they should be offered.
pub fn rank_candidates(ctx: &SelectionContext<'_>) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = ctx
        .bank
        .active_indices()
        .filter(|i| !ctx.administered.contains(i))
        .filter_map(|index| {
            ctx.bank.item(index).map(|item| Candidate {
                index,
                information: irt::information(&item.params, ctx.theta),
            })
        })
        .collect();
    ranked.sort_by(|x, y| {
        y.information
            .total_cmp(&x.information)
            .then(x.index.cmp(&y.index))
    });

    if ctx.unmet_tags.is_empty() {
        return ranked;
    }

    let (mut preferred, rest): (Vec<Candidate>, Vec<Candidate>) =
        ranked.into_iter().partition(|c| {
            ctx.bank
                .item(c.index)
                .is_some_and(|item| item.tags.iter().any(|t| ctx.unmet_tags.contains(t)))
        });
    preferred.extend(rest);
    preferred
}

/// Choose the next item, updating exposure counters as candidates are evaluated.
pub fn select_item<R: Rng + ?Sized>(ctx: &SelectionContext<'_>, rng: &mut R) -> Selection {
    let ranked = rank_candidates(ctx);
    for candidate in &ranked {
        let Some(cell) = ctx.bank.exposure(candidate.index) else {
            continue;
        };
        if cell.evaluate(rng) {
            return Selection::Administer(*candidate);
        }
    }
    Selection::Exhausted {
        fallback: ranked.first().copied(),
    }
}

/// Administer a candidate regardless of its control parameter.
pub fn force_administration(bank: &BankVersion, candidate: &Candidate) {
    if let Some(cell) = bank.exposure(candidate.index) {
        cell.record_forced_administration();
    }
}
