// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    cmp::Ordering,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Bounded buffer of telemetry items waiting for the next harvest.
///
/// Inserts never block on I/O and never fail: when the reservoir is full the implementation
/// decides which item is turned away, but the attempt is always counted. [`Reservoir::take`]
/// is atomic with respect to concurrent inserts, so every inserted item ends up either in the
/// returned [`Harvest`] or in the live reservoir, never both.
pub trait Reservoir: Send + Sync {
    /// The buffered item type
    type Item: Send;

    /// Offers an item to the reservoir
    fn insert(&self, item: Self::Item);

    /// Offers many items, taking the lock once
    fn insert_all(&self, items: impl IntoIterator<Item = Self::Item>);

    /// Returns every buffered item and the period's accounting, then resets to empty
    fn take(&self) -> Harvest<Self::Item>;

    /// Number of items physically buffered
    fn len(&self) -> usize;

    /// Returns true if no items are buffered
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items buffered at once
    fn capacity(&self) -> usize;

    /// Number of inserts since the last [`take`](Reservoir::take)
    fn attempts_seen(&self) -> u64;

    /// Orders items by ascending importance when a payload has to be shrunk.
    fn retention_order(a: &Self::Item, b: &Self::Item) -> Ordering;
}

/// The contents of a reservoir at the moment it was harvested
#[derive(Debug, Clone, PartialEq)]
pub struct Harvest<T> {
    /// Buffered items
    pub items: Vec<T>,
    /// Number of inserts during the period, including the ones that were turned away
    pub attempts_seen: u64,
    /// Number of items turned away or evicted because the reservoir was full
    pub dropped: u64,
}

impl<T> Harvest<T> {
    pub(crate) fn empty() -> Self {
        Self {
            items: Vec::new(),
            attempts_seen: 0,
            dropped: 0,
        }
    }

    /// Returns true if there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// Every critical section leaves the state consistent, so a panic elsewhere never invalidates it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
