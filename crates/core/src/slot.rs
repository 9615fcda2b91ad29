// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource slot maps: named decimal resource quantities.
//!
//! A `ResourceSlot` maps slot names (`cpu`, `mem`, `cuda.shares`, ...) to
//! decimal quantities. Arithmetic treats missing keys as zero, so slots from
//! agents advertising different device kinds compose without normalisation.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

crate::define_id! {
    /// Name of a resource slot kind (e.g. `cpu`, `mem`, `cuda.shares`).
    pub struct SlotName;
}

/// Ordered mapping from slot name to decimal quantity.
///
/// Keys are kept sorted so serialized forms and iteration order are stable
/// regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSlot(IndexMap<SlotName, Decimal>);

impl ResourceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, quantity)` pairs. Later duplicates overwrite.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Decimal)>,
        K: Into<SlotName>,
    {
        let mut map: IndexMap<SlotName, Decimal> =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        map.sort_keys();
        Self(map)
    }

    /// Quantity for a slot; missing keys read as zero.
    pub fn get(&self, name: &str) -> Decimal {
        self.0.get(name).copied().unwrap_or_default()
    }

    pub fn insert(&mut self, name: impl Into<SlotName>, quantity: Decimal) {
        self.0.insert(name.into(), quantity);
        self.0.sort_keys();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SlotName> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotName, &Decimal)> {
        self.0.iter()
    }

    /// Union of slot names across both operands, sorted.
    fn union_keys<'a>(&'a self, other: &'a ResourceSlot) -> BTreeSet<&'a SlotName> {
        self.0.keys().chain(other.0.keys()).collect()
    }

    /// Component-wise sum. Missing keys are treated as zero.
    pub fn add(&self, other: &ResourceSlot) -> ResourceSlot {
        ResourceSlot::from_pairs(
            self.union_keys(other)
                .into_iter()
                .map(|k| (k.clone(), self.get(k.as_str()) + other.get(k.as_str()))),
        )
    }

    /// Component-wise difference. Missing keys are treated as zero;
    /// components may go negative (see [`ResourceSlot::has_negative`]).
    pub fn sub(&self, other: &ResourceSlot) -> ResourceSlot {
        ResourceSlot::from_pairs(
            self.union_keys(other)
                .into_iter()
                .map(|k| (k.clone(), self.get(k.as_str()) - other.get(k.as_str()))),
        )
    }

    /// True when every requested component fits within `capacity`.
    pub fn fits_in(&self, capacity: &ResourceSlot) -> bool {
        self.union_keys(capacity)
            .into_iter()
            .all(|k| self.get(k.as_str()) <= capacity.get(k.as_str()))
    }

    /// True when any component is below zero.
    pub fn has_negative(&self) -> bool {
        self.0.values().any(|v| v.is_sign_negative() && !v.is_zero())
    }

    /// True when every component is zero (or the map is empty).
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| v.is_zero())
    }
}

impl fmt::Display for ResourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

impl<K: Into<SlotName>> FromIterator<(K, Decimal)> for ResourceSlot {
    fn from_iter<I: IntoIterator<Item = (K, Decimal)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
#[path = "slot_tests.rs"]
mod tests;
