// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Traits describing the shapes of telemetry items
//!
//! Reservoirs only care about three structural families of items:
//!
//! ## Plain items
//!
//! Custom events, error events and traces need no trait at all. They are sampled uniformly
//! once a reservoir fills up.
//!
//! ## Prioritized items: [`Prioritized`]
//!
//! Log events and transaction events carry a priority assigned by the producer. When a
//! reservoir is full the lowest priority resident is the one displaced.
//!
//! ## Keyed-aggregable items: [`Keyed`], [`Merge`] and [`Ranked`]
//!
//! SQL traces and metrics carry a key. A second item with the same key is merged into the
//! existing entry rather than stored alongside it, and bounded collections keep the
//! highest-ranked entries.

use std::hash::Hash;

/// An item with a producer-assigned priority. Higher values are more important to retain.
pub trait Prioritized {
    /// The priority of this item
    fn priority(&self) -> f32;
}

/// Extracts the deduplication key of an item.
///
/// Two items with equal keys collected in the same harvest period are merged into one entry.
///
/// # Example
///
/// ```rust
/// use harvest_core::Keyed;
///
/// struct Query {
///     statement_id: u64,
/// }
///
/// impl Keyed for Query {
///     type Key = u64;
///
///     fn key(&self) -> u64 {
///         self.statement_id
///     }
/// }
/// ```
pub trait Keyed {
    /// The key type
    type Key: Hash + Eq + Clone;

    /// Returns the key of this item
    fn key(&self) -> Self::Key;
}

/// Merges a second observation of the same key into an existing entry.
///
/// Implementations merge numeric statistics and keep the first-seen non-numeric fields of
/// `self`, discarding those of `other`.
pub trait Merge {
    /// Merge `other` into `self`
    fn merge(&mut self, other: Self);
}

/// Orders entries of a bounded keyed collection. The entry with the smallest rank is
/// evicted first.
pub trait Ranked {
    /// The ranking type
    type Rank: Ord;

    /// Returns the current rank of this entry
    fn rank(&self) -> Self::Rank;
}
