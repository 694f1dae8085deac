//! Time-bucketed keep/prune selection.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// A single retention rule: how many time buckets of a given width to keep.
///
/// Rule order within a rule list is irrelevant; the keep set is a union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionRule {
    /// Width of the buckets on the time axis.
    pub interval: Duration,

    /// Number of most recent buckets to keep a representative of.
    pub amount: usize,

    /// Whether instants kept by this rule are also eligible for archiving.
    pub backup_eligible: bool,
}

/// Outcome of a retention decision over a set of available instants.
///
/// Invariants: `keep ∪ prune` equals the available set and the two sets are
/// disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionDecision {
    pub keep: BTreeSet<NaiveDateTime>,
    pub prune: BTreeSet<NaiveDateTime>,
}

/// Select the relevant instants for a single rule.
///
/// The time axis is divided into buckets of width `interval` anchored at
/// `origin`. Every available instant is mapped into a bucket; within a bucket
/// only the oldest instant survives. The representatives of the `amount` most
/// recent buckets are returned, ascending. Fewer buckets than `amount` means
/// all representatives are returned.
///
/// `interval` must be non-zero; configuration validation guarantees this
/// before any policy evaluation.
pub fn select_relevant(
    available: &[NaiveDateTime],
    origin: NaiveDateTime,
    interval: Duration,
    amount: usize,
) -> Vec<NaiveDateTime> {
    let interval_ms = interval.as_millis() as i64;
    debug_assert!(interval_ms > 0, "retention interval must be non-zero");

    let mut buckets: BTreeMap<i64, NaiveDateTime> = BTreeMap::new();
    for &instant in available {
        // Euclidean division floors toward negative infinity, so instants
        // before the origin bucket consistently instead of truncating
        // toward zero.
        let offset_ms = (instant - origin).num_milliseconds();
        let bucket = offset_ms.div_euclid(interval_ms);
        buckets
            .entry(bucket)
            .and_modify(|oldest| {
                if instant < *oldest {
                    *oldest = instant;
                }
            })
            .or_insert(instant);
    }

    let representatives: Vec<NaiveDateTime> = buckets.into_values().collect();
    let start = representatives.len().saturating_sub(amount);
    representatives[start..].to_vec()
}

/// Apply the GFS algorithm under every rule and partition the available
/// instants into keep and prune sets.
///
/// The keep set is the union of [`select_relevant`] over all rules; everything
/// else is pruned. Zero rules keep nothing.
pub fn grandfatherson(
    available: &[NaiveDateTime],
    origin: NaiveDateTime,
    rules: &[RetentionRule],
) -> RetentionDecision {
    let mut keep = BTreeSet::new();
    for rule in rules {
        keep.extend(select_relevant(available, origin, rule.interval, rule.amount));
    }
    let prune = available
        .iter()
        .copied()
        .filter(|instant| !keep.contains(instant))
        .collect();
    RetentionDecision { keep, prune }
}
