// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metric statistics keyed by name and scope
//!
//! Unscoped and scoped metrics live in separate maps and are merged independently. Names are
//! only rewritten by a [`MetricNameService`] when producing the outbound payload, after all
//! merging is done. Two metrics whose names map to the same output name are therefore still
//! reported as two entries.

use std::{borrow::Cow, cmp::Ordering, sync::Mutex};

use harvest_core::{Keyed, Merge, MetricName, MetricStats};
use hashbrown::{HashMap, hash_map::Entry};

use crate::reservoir::{Harvest, Reservoir, lock};

/// A metric observation: the key and its statistics
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Name and scope
    pub name: MetricName,
    /// Accumulated statistics
    pub stats: MetricStats,
}

impl Metric {
    /// Creates a metric observation
    pub fn new(name: MetricName, stats: MetricStats) -> Self {
        Self { name, stats }
    }
}

impl Keyed for Metric {
    type Key = MetricName;

    fn key(&self) -> MetricName {
        self.name.clone()
    }
}

impl Merge for Metric {
    fn merge(&mut self, other: Self) {
        self.stats.merge_from(&other.stats);
    }
}

type Names = HashMap<Cow<'static, str>, MetricStats>;

/// Unbounded collection of metric statistics.
///
/// ```
/// use harvest_aggregation::MetricStatsCollection;
/// use harvest_core::{MetricName, MetricStats};
///
/// let mut metrics = MetricStatsCollection::default();
/// metrics.merge_metric(MetricName::unscoped("Errors/all"), MetricStats::count(1));
/// metrics.merge_metric(MetricName::unscoped("Errors/all"), MetricStats::count(2));
/// metrics.merge_metric(
///     MetricName::scoped("WebTransaction/home", "Errors/all"),
///     MetricStats::count(1),
/// );
/// assert_eq!(metrics.len(), 2);
/// assert_eq!(metrics.get(&MetricName::unscoped("Errors/all")).map(|s| s.count), Some(3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricStatsCollection {
    unscoped: Names,
    scoped: HashMap<Cow<'static, str>, Names>,
}

fn merge_into(names: &mut Names, name: Cow<'static, str>, stats: MetricStats) {
    match names.entry(name) {
        Entry::Occupied(mut existing) => existing.get_mut().merge_from(&stats),
        Entry::Vacant(slot) => {
            slot.insert(stats);
        }
    }
}

impl MetricStatsCollection {
    /// Merges `stats` into the entry for `name`
    pub fn merge_metric(&mut self, name: MetricName, stats: MetricStats) {
        match name.into_parts() {
            (name, None) => merge_into(&mut self.unscoped, name, stats),
            (name, Some(scope)) => {
                merge_into(self.scoped.entry(scope).or_default(), name, stats);
            }
        }
    }

    /// Merges every entry of `other` into this collection
    pub fn merge(&mut self, other: MetricStatsCollection) {
        for (name, stats) in other.unscoped {
            merge_into(&mut self.unscoped, name, stats);
        }
        for (scope, names) in other.scoped {
            let target = self.scoped.entry(scope).or_default();
            for (name, stats) in names {
                merge_into(target, name, stats);
            }
        }
    }

    /// Looks up the statistics for `name`
    pub fn get(&self, name: &MetricName) -> Option<&MetricStats> {
        match name.scope() {
            None => self.unscoped.get(name.name()),
            Some(scope) => self.scoped.get(scope)?.get(name.name()),
        }
    }

    /// Number of distinct (name, scope) entries
    pub fn len(&self) -> usize {
        self.unscoped.len() + self.scoped.values().map(HashMap::len).sum::<usize>()
    }

    /// Returns true if nothing has been merged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the collection into metrics, unscoped entries first
    pub fn into_metrics(self) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(self.len());
        metrics.extend(
            self.unscoped
                .into_iter()
                .map(|(name, stats)| Metric::new(MetricName::unscoped(name), stats)),
        );
        for (scope, names) in self.scoped {
            metrics.extend(names.into_iter().map(|(name, stats)| {
                Metric::new(MetricName::scoped(scope.clone(), name), stats)
            }));
        }
        metrics
    }

    /// Drains the collection into metrics with names rewritten by `names`.
    ///
    /// Renaming happens after merging, so entries are never combined here.
    pub fn into_metrics_for_sending(self, names: &dyn MetricNameService) -> Vec<Metric> {
        rename_for_sending(self.into_metrics(), names)
    }
}

impl FromIterator<Metric> for MetricStatsCollection {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        let mut collection = Self::default();
        for metric in iter {
            collection.merge_metric(metric.name, metric.stats);
        }
        collection
    }
}

/// Rewrites metric names on their way out.
pub trait MetricNameService: Send + Sync {
    /// Returns the output name for `name`
    fn rename<'a>(&self, name: &'a str) -> Cow<'a, str>;
}

/// Leaves every name unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNames;

impl MetricNameService for IdentityNames {
    fn rename<'a>(&self, name: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(name)
    }
}

/// Exact-match rename table
#[derive(Debug, Clone, Default)]
pub struct RenameTable {
    renames: HashMap<String, String>,
}

impl RenameTable {
    /// Adds a rule rewriting `from` to `to`
    pub fn with_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }
}

impl MetricNameService for RenameTable {
    fn rename<'a>(&self, name: &'a str) -> Cow<'a, str> {
        match self.renames.get(name) {
            Some(renamed) => Cow::Owned(renamed.clone()),
            None => Cow::Borrowed(name),
        }
    }
}

/// Rewrites the names of `metrics` with `names`, keeping scopes and statistics
pub fn rename_for_sending(metrics: Vec<Metric>, names: &dyn MetricNameService) -> Vec<Metric> {
    metrics
        .into_iter()
        .map(|metric| {
            let (name, scope) = metric.name.into_parts();
            let renamed = match names.rename(&name) {
                Cow::Borrowed(_) => None,
                Cow::Owned(renamed) => Some(renamed),
            };
            let renamed: Cow<'static, str> = renamed.map_or(name, Cow::Owned);
            let name = match scope {
                Some(scope) => MetricName::scoped(scope, renamed),
                None => MetricName::unscoped(renamed),
            };
            Metric::new(name, metric.stats)
        })
        .collect()
}

/// Reservoir merging every metric inserted during a period. It is never full.
#[derive(Default)]
pub struct MetricReservoir {
    state: Mutex<MetricState>,
}

#[derive(Default)]
struct MetricState {
    metrics: MetricStatsCollection,
    attempts: u64,
}

impl MetricReservoir {
    /// Creates an empty reservoir
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a whole collection, counting one attempt per entry
    pub fn merge_collection(&self, collection: MetricStatsCollection) {
        let mut state = lock(&self.state);
        state.attempts += collection.len() as u64;
        state.metrics.merge(collection);
    }
}

impl Reservoir for MetricReservoir {
    type Item = Metric;

    fn insert(&self, item: Metric) {
        let mut state = lock(&self.state);
        state.attempts += 1;
        state.metrics.merge_metric(item.name, item.stats);
    }

    fn insert_all(&self, items: impl IntoIterator<Item = Metric>) {
        let mut state = lock(&self.state);
        for item in items {
            state.attempts += 1;
            state.metrics.merge_metric(item.name, item.stats);
        }
    }

    fn take(&self) -> Harvest<Metric> {
        let mut state = lock(&self.state);
        let metrics = std::mem::take(&mut state.metrics);
        let attempts_seen = std::mem::take(&mut state.attempts);
        drop(state);
        Harvest {
            items: metrics.into_metrics(),
            attempts_seen,
            dropped: 0,
        }
    }

    fn len(&self) -> usize {
        lock(&self.state).metrics.len()
    }

    fn capacity(&self) -> usize {
        usize::MAX
    }

    fn attempts_seen(&self) -> u64 {
        lock(&self.state).attempts
    }

    fn retention_order(_: &Metric, _: &Metric) -> Ordering {
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::{check, let_assert};
    use harvest_core::{MetricName, MetricStats};

    use super::{IdentityNames, Metric, MetricReservoir, MetricStatsCollection, RenameTable};
    use crate::Reservoir;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn same_key_merges() {
        let mut metrics = MetricStatsCollection::default();
        metrics.merge_metric(
            MetricName::unscoped("Datastore/all"),
            MetricStats::timing(secs(3), secs(3)),
        );
        metrics.merge_metric(
            MetricName::unscoped("Datastore/all"),
            MetricStats::timing(secs(5), secs(1)),
        );

        let_assert!(Some(stats) = metrics.get(&MetricName::unscoped("Datastore/all")));
        check!(stats.count == 2);
        check!(stats.total == 8.0);
        check!(stats.exclusive == 4.0);
        check!(stats.min == 3.0);
        check!(stats.max == 5.0);
        check!(stats.sum_of_squares == 34.0);
    }

    #[test]
    fn scoped_and_unscoped_are_separate() {
        let mut metrics = MetricStatsCollection::default();
        metrics.merge_metric(MetricName::unscoped("Errors/all"), MetricStats::count(1));
        metrics.merge_metric(
            MetricName::scoped("WebTransaction/a", "Errors/all"),
            MetricStats::count(2),
        );
        metrics.merge_metric(
            MetricName::scoped("WebTransaction/b", "Errors/all"),
            MetricStats::count(4),
        );
        metrics.merge_metric(MetricName::scoped("", "Errors/all"), MetricStats::count(8));

        check!(metrics.len() == 3);
        check!(metrics.get(&MetricName::unscoped("Errors/all")).map(|s| s.count) == Some(9));
        check!(
            metrics
                .get(&MetricName::scoped("WebTransaction/a", "Errors/all"))
                .map(|s| s.count)
                == Some(2)
        );
    }

    #[test]
    fn merging_collections_combines_matching_entries() {
        let mut a: MetricStatsCollection = [
            Metric::new(MetricName::unscoped("x"), MetricStats::count(1)),
            Metric::new(MetricName::scoped("s", "y"), MetricStats::count(1)),
        ]
        .into_iter()
        .collect();
        let b: MetricStatsCollection = [
            Metric::new(MetricName::unscoped("x"), MetricStats::count(2)),
            Metric::new(MetricName::scoped("s", "z"), MetricStats::count(1)),
        ]
        .into_iter()
        .collect();
        a.merge(b);

        check!(a.len() == 3);
        check!(a.get(&MetricName::unscoped("x")).map(|s| s.count) == Some(3));
    }

    #[test]
    fn unscoped_entries_come_first() {
        let metrics: MetricStatsCollection = [
            Metric::new(MetricName::scoped("s", "a"), MetricStats::count(1)),
            Metric::new(MetricName::unscoped("b"), MetricStats::count(1)),
        ]
        .into_iter()
        .collect();
        let out = metrics.into_metrics();
        check!(out[0].name == MetricName::unscoped("b"));
        check!(out[1].name == MetricName::scoped("s", "a"));
    }

    #[test]
    fn aliased_names_are_not_merged_on_output() {
        let metrics: MetricStatsCollection = [
            Metric::new(MetricName::unscoped("Old/name"), MetricStats::count(1)),
            Metric::new(MetricName::unscoped("New/name"), MetricStats::count(2)),
        ]
        .into_iter()
        .collect();
        let names = RenameTable::default().with_rename("Old/name", "New/name");

        let mut out = metrics.into_metrics_for_sending(&names);
        out.sort_by_key(|m| m.stats.count);
        check!(out.len() == 2);
        check!(out.iter().all(|m| m.name.name() == "New/name"));
        check!(out[0].stats.count == 1);
        check!(out[1].stats.count == 2);
    }

    #[test]
    fn renaming_keeps_scope() {
        let metrics: MetricStatsCollection =
            [Metric::new(MetricName::scoped("Tx/a", "Old"), MetricStats::count(1))]
                .into_iter()
                .collect();
        let names = RenameTable::default().with_rename("Old", "New");
        let out = metrics.into_metrics_for_sending(&names);
        check!(out[0].name == MetricName::scoped("Tx/a", "New"));

        let metrics: MetricStatsCollection =
            [Metric::new(MetricName::unscoped("Same"), MetricStats::count(1))]
                .into_iter()
                .collect();
        let out = metrics.into_metrics_for_sending(&IdentityNames);
        check!(out[0].name == MetricName::unscoped("Same"));
    }

    #[test]
    fn reservoir_merges_and_counts_attempts() {
        let reservoir = MetricReservoir::new();
        reservoir.insert(Metric::new(MetricName::unscoped("a"), MetricStats::count(1)));
        reservoir.insert_all([
            Metric::new(MetricName::unscoped("a"), MetricStats::count(1)),
            Metric::new(MetricName::unscoped("b"), MetricStats::count(1)),
        ]);
        check!(reservoir.len() == 2);
        check!(reservoir.attempts_seen() == 3);

        let harvest = reservoir.take();
        check!(harvest.items.len() == 2);
        check!(harvest.attempts_seen == 3);
        check!(harvest.dropped == 0);
        check!(reservoir.is_empty());
    }
}
