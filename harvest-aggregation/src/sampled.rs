// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Capped reservoir with uniform sampling once full

use std::{cmp::Ordering, marker::PhantomData, sync::Mutex};

use rand::{Rng, RngCore, rngs::ThreadRng};

use crate::reservoir::{Harvest, Reservoir, lock};

/// Utility wrapper to impl [`RngCore`] from a stateless random number generator that impls
/// [`Default`], like [`ThreadRng`].
#[derive(Default)]
// PhantomData of fn() -> R keeps this Send + Sync even though ThreadRng is neither; a fresh R is
// created for every call.
pub struct DefaultRng<R>(PhantomData<fn() -> R>);

impl<R: RngCore + Default> RngCore for DefaultRng<R> {
    fn next_u32(&mut self) -> u32 {
        R::default().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        R::default().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        R::default().fill_bytes(dest)
    }
}

/// Reservoir that keeps a uniform random sample of everything inserted during a period.
///
/// Until `capacity` items are buffered every insert is kept. After that the `n`-th insert
/// replaces a uniformly chosen slot with probability `capacity / n`, so each item seen has the
/// same chance of being in the final sample. Used for plain items such as custom events,
/// error events and traces.
pub struct SampledReservoir<T, R = DefaultRng<ThreadRng>> {
    capacity: usize,
    state: Mutex<SampledState<T, R>>,
}

struct SampledState<T, R> {
    items: Vec<T>,
    attempts: u64,
    rng: R,
}

impl<T> SampledReservoir<T> {
    /// Creates a reservoir holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, DefaultRng::default())
    }
}

impl<T, R: RngCore> SampledReservoir<T, R> {
    /// Creates a reservoir drawing its sampling decisions from `rng`.
    ///
    /// Useful for deterministic tests.
    pub fn with_rng(capacity: usize, rng: R) -> Self {
        Self {
            capacity,
            state: Mutex::new(SampledState {
                items: Vec::new(),
                attempts: 0,
                rng,
            }),
        }
    }
}

impl<T, R: RngCore> SampledState<T, R> {
    fn insert(&mut self, capacity: usize, item: T) {
        self.attempts += 1;
        if self.items.len() < capacity {
            self.items.push(item);
            return;
        }
        let slot = self.rng.random_range(0..self.attempts);
        if let Ok(slot) = usize::try_from(slot)
            && slot < capacity
        {
            self.items[slot] = item;
        }
    }
}

impl<T: Send, R: RngCore + Send> Reservoir for SampledReservoir<T, R> {
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
        let items = std::mem::take(&mut state.items);
        let attempts_seen = std::mem::take(&mut state.attempts);
        if items.is_empty() && attempts_seen == 0 {
            return Harvest::empty();
        }
        Harvest {
            dropped: attempts_seen.saturating_sub(items.len() as u64),
            items,
            attempts_seen,
        }
    }

    fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn attempts_seen(&self) -> u64 {
        lock(&self.state).attempts
    }

    fn retention_order(_: &T, _: &T) -> Ordering {
        Ordering::Equal
    }
}
