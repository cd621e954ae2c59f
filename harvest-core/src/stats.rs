// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::traits::Merge;

/// Statistics accumulated for a single metric key or SQL statement.
///
/// Times are stored as seconds. Merging two values is associative and commutative:
/// counts, totals and sums of squares add, while `min` and `max` keep the extremes.
///
/// ```
/// use harvest_core::MetricStats;
/// use std::time::Duration;
///
/// let mut stats = MetricStats::timing(Duration::from_secs(3), Duration::from_secs(1));
/// stats.merge_from(&MetricStats::timing(Duration::from_secs(5), Duration::from_secs(2)));
/// assert_eq!(stats.count, 2);
/// assert_eq!(stats.total, 8.0);
/// assert_eq!(stats.min, 3.0);
/// assert_eq!(stats.max, 5.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    /// Number of observations (call count)
    pub count: u64,
    /// Sum of all observed totals, in seconds
    pub total: f64,
    /// Sum of all observed exclusive times, in seconds
    pub exclusive: f64,
    /// Smallest observed total, in seconds
    pub min: f64,
    /// Largest observed total, in seconds
    pub max: f64,
    /// Sum of the squares of the observed totals
    pub sum_of_squares: f64,
}

impl MetricStats {
    /// A single timed observation.
    pub fn timing(total: Duration, exclusive: Duration) -> Self {
        let total = total.as_secs_f64();
        Self {
            count: 1,
            total,
            exclusive: exclusive.as_secs_f64(),
            min: total,
            max: total,
            sum_of_squares: total * total,
        }
    }

    /// A pure counter with `count` occurrences and no timing data.
    pub fn count(count: u64) -> Self {
        Self {
            count,
            total: 0.0,
            exclusive: 0.0,
            min: 0.0,
            max: 0.0,
            sum_of_squares: 0.0,
        }
    }

    /// Merge `other` into `self`.
    pub fn merge_from(&mut self, other: &Self) {
        self.count += other.count;
        self.total += other.total;
        self.exclusive += other.exclusive;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum_of_squares += other.sum_of_squares;
    }

    /// Returns `self` merged with `other`.
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        self.merge_from(other);
        self
    }
}

impl Merge for MetricStats {
    fn merge(&mut self, other: Self) {
        self.merge_from(&other);
    }
}

impl std::iter::Sum for MetricStats {
    /// Sums an iterator of stats. An empty iterator yields a zero counter.
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.reduce(|acc, s| acc.merged(&s))
            .unwrap_or_else(|| Self::count(0))
    }
}
