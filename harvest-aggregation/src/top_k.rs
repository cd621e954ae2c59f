// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Keyed reservoir keeping the top-K entries by rank

use std::{cmp::Ordering, sync::Mutex};

use harvest_core::{Keyed, Merge, Ranked};
use hashbrown::{HashMap, hash_map::Entry};

use crate::reservoir::{Harvest, Reservoir, lock};

/// Reservoir that merges items by key and keeps the `capacity` highest ranked entries.
///
/// An item whose key is already present is merged into the resident entry. After each insert,
/// if more than `capacity` entries are present, the entry with the smallest
/// [`rank`](Ranked::rank) is evicted, whichever entry that is. A merge that raises an entry's
/// rank can therefore cause a different entry to be evicted later. Ties go to the entry that
/// was touched least recently.
///
/// [`take`](Reservoir::take) returns entries from highest to lowest rank.
pub struct TopKReservoir<T: Keyed> {
    capacity: usize,
    state: Mutex<TopKState<T>>,
}

struct TopKState<T: Keyed> {
    entries: HashMap<T::Key, Touched<T>>,
    attempts: u64,
    evicted: u64,
    clock: u64,
}

struct Touched<T> {
    item: T,
    touched: u64,
}

impl<T: Ranked> Touched<T> {
    fn eviction_order(&self, other: &Self) -> Ordering {
        self.item
            .rank()
            .cmp(&other.item.rank())
            .then(self.touched.cmp(&other.touched))
    }
}

impl<T: Keyed> TopKReservoir<T> {
    /// Creates a reservoir holding at most `capacity` distinct keys
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(TopKState {
                entries: HashMap::new(),
                attempts: 0,
                evicted: 0,
                clock: 0,
            }),
        }
    }
}

impl<T: Keyed + Merge + Ranked> TopKState<T> {
    fn insert(&mut self, capacity: usize, item: T) {
        self.attempts += 1;
        self.clock += 1;
        let touched = self.clock;
        match self.entries.entry(item.key()) {
            Entry::Occupied(mut resident) => {
                let resident = resident.get_mut();
                resident.item.merge(item);
                resident.touched = touched;
            }
            Entry::Vacant(slot) => {
                slot.insert(Touched { item, touched });
            }
        }

        while self.entries.len() > capacity {
            let victim = self
                .entries
                .iter()
                .min_by(|(_, a), (_, b)| a.eviction_order(b))
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else { break };
            self.entries.remove(&victim);
            self.evicted += 1;
        }
    }
}

impl<T> Reservoir for TopKReservoir<T>
where
    T: Keyed + Merge + Ranked + Send,
    T::Key: Send,
{
    type Item = T;

    fn insert(&self, item: T) {
        lock(&self.state).insert(self.capacity, item);
    }

    fn insert_all(&self, items: impl IntoIterator<Item = T>) {
        let mut state = lock(&self.state);
        for item in items {
            state.insert(self.capacity, item);
        }
    }

    fn take(&self) -> Harvest<T> {
        let mut state = lock(&self.state);
        let mut entries: Vec<Touched<T>> = state.entries.drain().map(|(_, e)| e).collect();
        let attempts_seen = std::mem::take(&mut state.attempts);
        let dropped = std::mem::take(&mut state.evicted);
        state.clock = 0;
        drop(state);

        entries.sort_by(|a, b| b.eviction_order(a));
        Harvest {
            items: entries.into_iter().map(|e| e.item).collect(),
            attempts_seen,
            dropped,
        }
    }

    fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn attempts_seen(&self) -> u64 {
        lock(&self.state).attempts
    }

    fn retention_order(a: &T, b: &T) -> Ordering {
        a.rank().cmp(&b.rank())
    }
}
