// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enqueue-time predicates re-checked on every scheduling attempt.
//!
//! Predicate failures are non-fatal: the session stays PENDING and the
//! failure list lands in `status_data.scheduler.failed_predicates`.

use crate::config::SchedulerConfig;
use berth_core::ResourceSlot;
use berth_storage::{SessionRow, StoreData};
use serde::{Deserialize, Serialize};

/// One predicate's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateFailure {
    pub name: String,
    pub msg: String,
}

/// A single scheduling precondition.
pub trait SchedulingPredicate: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means pass; `Some(msg)` the failure message.
    fn check(&self, data: &StoreData, session: &SessionRow) -> Option<String>;
}

/// Run all predicates, collecting failures.
pub fn check_predicates(
    predicates: &[Box<dyn SchedulingPredicate>],
    data: &StoreData,
    session: &SessionRow,
) -> Vec<PredicateFailure> {
    predicates
        .iter()
        .filter_map(|predicate| {
            predicate.check(data, session).map(|msg| PredicateFailure {
                name: predicate.name().to_string(),
                msg,
            })
        })
        .collect()
}

/// Caps concurrently active sessions per access key.
pub struct ConcurrencyPredicate {
    limits: indexmap::IndexMap<String, u32>,
    default_limit: Option<u32>,
}

impl ConcurrencyPredicate {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            limits: config.concurrency_limits.clone(),
            default_limit: config.default_concurrency,
        }
    }

    fn limit_for(&self, access_key: &str) -> Option<u32> {
        self.limits.get(access_key).copied().or(self.default_limit)
    }
}

impl SchedulingPredicate for ConcurrencyPredicate {
    fn name(&self) -> &'static str {
        "concurrency"
    }

    fn check(&self, data: &StoreData, session: &SessionRow) -> Option<String> {
        let limit = self.limit_for(&session.access_key)?;
        let active = data
            .sessions
            .values()
            .filter(|other| {
                other.access_key == session.access_key
                    && other.id != session.id
                    && !other.status.is_terminal()
                    && other.status != berth_core::SessionStatus::Pending
            })
            .count() as u32;
        if active >= limit {
            return Some(format!(
                "You cannot run more than {limit} concurrent sessions ({active} active)"
            ));
        }
        None
    }
}

/// Caps the total slots one access key may occupy.
pub struct KeypairResourceQuotaPredicate {
    quotas: indexmap::IndexMap<String, ResourceSlot>,
}

impl KeypairResourceQuotaPredicate {
    pub fn new(quotas: indexmap::IndexMap<String, ResourceSlot>) -> Self {
        Self { quotas }
    }
}

impl SchedulingPredicate for KeypairResourceQuotaPredicate {
    fn name(&self) -> &'static str {
        "keypair-resource-policy"
    }

    fn check(&self, data: &StoreData, session: &SessionRow) -> Option<String> {
        let quota = self.quotas.get(&session.access_key)?;
        let occupied = data
            .sessions
            .values()
            .filter(|other| other.access_key == session.access_key && other.id != session.id)
            .fold(ResourceSlot::new(), |acc, other| {
                acc.add(&other.occupying_slots)
            });
        let wanted = occupied.add(&session.requested_slots);
        if !wanted.fits_in(quota) {
            return Some(format!(
                "Your keypair resource quota is exceeded (quota: {quota}, wanted: {wanted})"
            ));
        }
        None
    }
}

#[cfg(test)]
#[path = "predicates_tests.rs"]
mod tests;
