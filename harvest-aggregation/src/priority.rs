// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bounded min-heap keeping the highest priority items

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::Mutex,
};

use harvest_core::Prioritized;
use ordered_float::OrderedFloat;

use crate::reservoir::{Harvest, Reservoir, lock};

/// Reservoir keeping the `capacity` highest priority items inserted during a period.
///
/// Once full, a new item displaces the lowest priority resident only if its priority is
/// strictly greater. On equal priorities the earlier item wins, so the new one is dropped.
/// [`take`](Reservoir::take) returns items from highest to lowest priority.
pub struct PriorityReservoir<T> {
    capacity: usize,
    state: Mutex<PriorityState<T>>,
}

struct PriorityState<T> {
    // min-heap: the top is the resident evicted next
    heap: BinaryHeap<Reverse<Slot<T>>>,
    attempts: u64,
    next_sequence: u64,
}

struct Slot<T> {
    priority: OrderedFloat<f32>,
    sequence: u64,
    item: T,
}

impl<T> Slot<T> {
    fn key(&self) -> (OrderedFloat<f32>, Reverse<u64>) {
        (self.priority, Reverse(self.sequence))
    }
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Lower priority sorts first; among equal priorities the later insert sorts first.
impl<T> Ord for Slot<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl<T> PriorityReservoir<T> {
    /// Creates a reservoir holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(PriorityState {
                heap: BinaryHeap::new(),
                attempts: 0,
                next_sequence: 0,
            }),
        }
    }
}

impl<T: Prioritized> PriorityState<T> {
    fn insert(&mut self, capacity: usize, item: T) {
        self.attempts += 1;
        let slot = Slot {
            priority: OrderedFloat(item.priority()),
            sequence: self.next_sequence,
            item,
        };
        self.next_sequence += 1;

        if self.heap.len() < capacity {
            self.heap.push(Reverse(slot));
            return;
        }
        match self.heap.peek_mut() {
            Some(mut lowest) if slot.priority > lowest.0.priority => {
                *lowest = Reverse(slot);
            }
            _ => {}
        }
    }
}

impl<T: Prioritized + Send> Reservoir for PriorityReservoir<T> {
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
        let heap = std::mem::take(&mut state.heap);
        let attempts_seen = std::mem::take(&mut state.attempts);
        // ascending Reverse<Slot> is descending priority
        let items: Vec<T> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(slot)| slot.item)
            .collect();
        Harvest {
            dropped: attempts_seen.saturating_sub(items.len() as u64),
            items,
            attempts_seen,
        }
    }

    fn len(&self) -> usize {
        lock(&self.state).heap.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn attempts_seen(&self) -> u64 {
        lock(&self.state).attempts
    }

    fn retention_order(a: &T, b: &T) -> Ordering {
        OrderedFloat(a.priority()).cmp(&OrderedFloat(b.priority()))
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use harvest_core::Prioritized;

    use super::PriorityReservoir;
    use crate::Reservoir;

    #[derive(Debug, Clone, PartialEq)]
    struct Event {
        name: &'static str,
        priority: f32,
    }

    impl Prioritized for Event {
        fn priority(&self) -> f32 {
            self.priority
        }
    }

    fn event(name: &'static str, priority: f32) -> Event {
        Event { name, priority }
    }

    fn names(items: &[Event]) -> Vec<&'static str> {
        items.iter().map(|e| e.name).collect()
    }

    #[test]
    fn keeps_highest_priorities() {
        let reservoir = PriorityReservoir::new(2);
        reservoir.insert_all([event("a", 0.1), event("b", 0.2), event("c", 0.3)]);
        check!(reservoir.len() == 2);

        reservoir.insert(event("d", 0.05));
        check!(reservoir.attempts_seen() == 4);

        let harvest = reservoir.take();
        check!(names(&harvest.items) == vec!["c", "b"]);
        check!(harvest.attempts_seen == 4);
        check!(harvest.dropped == 2);
    }

    #[test]
    fn equal_priority_keeps_earlier_item() {
        let reservoir = PriorityReservoir::new(2);
        reservoir.insert_all([event("a", 0.5), event("b", 0.5), event("c", 0.5)]);
        let harvest = reservoir.take();
        check!(names(&harvest.items) == vec!["a", "b"]);
    }

    #[test]
    fn evicts_the_later_of_tied_lowest_residents() {
        let reservoir = PriorityReservoir::new(3);
        reservoir.insert_all([
            event("a", 0.2),
            event("b", 0.9),
            event("c", 0.2),
            event("d", 0.4),
        ]);
        let harvest = reservoir.take();
        check!(names(&harvest.items) == vec!["b", "d", "a"]);
    }

    #[test]
    fn counts_attempts_exactly() {
        let reservoir = PriorityReservoir::new(100);
        reservoir.insert_all((0..105).map(|i| event("e", i as f32)));
        let harvest = reservoir.take();
        check!(harvest.items.len() == 100);
        check!(harvest.attempts_seen == 105);
        check!(harvest.dropped == 5);
        check!(harvest.items.last().map(|e| e.priority) == Some(5.0));
    }

    #[test]
    fn take_resets_to_empty() {
        let reservoir = PriorityReservoir::new(4);
        reservoir.insert(event("a", 1.0));
        let _ = reservoir.take();
        check!(reservoir.is_empty());
        check!(reservoir.attempts_seen() == 0);
        check!(reservoir.take().is_empty());
    }

    #[test]
    fn retention_order_ranks_by_priority() {
        let low = event("low", 0.1);
        let high = event("high", 0.9);
        check!(PriorityReservoir::<Event>::retention_order(&low, &high).is_lt());
    }
}
