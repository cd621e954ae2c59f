// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration snapshots and the process-wide handle that publishes them
//!
//! A [`Configuration`] is immutable once built. Updates build a whole new snapshot with a
//! higher version and swap it into the [`ConfigHandle`], so readers never observe a partial
//! update and never block.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use enum_map::EnumMap;

use crate::TelemetryKind;

/// Settings for one telemetry kind as provided by the configuration source.
///
/// Missing values fall back to the kind's defaults when resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSettings {
    /// Whether the kind is collected and harvested at all
    pub enabled: bool,
    /// Reservoir capacity
    pub capacity: Option<usize>,
    /// Time between harvests
    pub harvest_interval: Option<Duration>,
}

impl Default for KindSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: None,
            harvest_interval: None,
        }
    }
}

/// Settings for one telemetry kind with all defaults applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSettings {
    /// Whether the kind is collected and harvested at all
    pub enabled: bool,
    /// Reservoir capacity
    pub capacity: usize,
    /// Time between harvests
    pub harvest_interval: Duration,
}

/// An immutable configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    version: u64,
    kinds: EnumMap<TelemetryKind, KindSettings>,
    flush_on_exit: bool,
    flush_on_exit_threshold: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        ConfigurationBuilder::default().build()
    }
}

impl Configuration {
    /// Starts building a configuration
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Starts building a configuration from a copy of this one
    pub fn to_builder(&self) -> ConfigurationBuilder {
        ConfigurationBuilder {
            version: self.version,
            kinds: self.kinds.clone(),
            flush_on_exit: self.flush_on_exit,
            flush_on_exit_threshold: self.flush_on_exit_threshold,
        }
    }

    /// Version of this snapshot. A snapshot with a higher version replaces a lower one.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether aggregators should harvest one last time during a clean shutdown
    pub fn flush_on_exit(&self) -> bool {
        self.flush_on_exit
    }

    /// Aggregators holding this many items or fewer skip the shutdown flush
    pub fn flush_on_exit_threshold(&self) -> usize {
        self.flush_on_exit_threshold
    }

    /// The settings for `kind` as configured, without defaults applied
    pub fn raw_settings(&self, kind: TelemetryKind) -> &KindSettings {
        &self.kinds[kind]
    }

    /// The settings for `kind` with defaults applied to missing or invalid values
    pub fn settings(&self, kind: TelemetryKind) -> ResolvedSettings {
        let raw = &self.kinds[kind];
        let harvest_interval = match raw.harvest_interval {
            Some(interval) if interval.is_zero() => {
                let default = kind.default_harvest_interval();
                tracing::warn!(
                    %kind,
                    version = self.version,
                    default = ?default,
                    "ignoring zero harvest interval, using default"
                );
                default
            }
            Some(interval) if Instant::now().checked_add(interval).is_none() => {
                let default = kind.default_harvest_interval();
                tracing::warn!(
                    %kind,
                    version = self.version,
                    ?interval,
                    default = ?default,
                    "ignoring out of range harvest interval, using default"
                );
                default
            }
            Some(interval) => interval,
            None => kind.default_harvest_interval(),
        };
        ResolvedSettings {
            enabled: raw.enabled,
            capacity: raw.capacity.unwrap_or_else(|| kind.default_capacity()),
            harvest_interval,
        }
    }
}

/// Builder for [`Configuration`]
///
/// ```
/// use harvest::{Configuration, TelemetryKind};
/// use std::time::Duration;
///
/// let config = Configuration::builder()
///     .version(2)
///     .capacity(TelemetryKind::CustomEvents, 500)
///     .harvest_interval(TelemetryKind::CustomEvents, Duration::from_secs(5))
///     .enabled(TelemetryKind::ErrorTraces, false)
///     .build();
/// let custom = config.settings(TelemetryKind::CustomEvents);
/// assert_eq!(custom.capacity, 500);
/// assert!(!config.settings(TelemetryKind::ErrorTraces).enabled);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    version: u64,
    kinds: EnumMap<TelemetryKind, KindSettings>,
    flush_on_exit: bool,
    flush_on_exit_threshold: usize,
}

impl ConfigurationBuilder {
    /// Sets the snapshot version
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Enables or disables a kind
    pub fn enabled(mut self, kind: TelemetryKind, enabled: bool) -> Self {
        self.kinds[kind].enabled = enabled;
        self
    }

    /// Sets the reservoir capacity of a kind
    pub fn capacity(mut self, kind: TelemetryKind, capacity: usize) -> Self {
        self.kinds[kind].capacity = Some(capacity);
        self
    }

    /// Sets the harvest interval of a kind. A zero interval is replaced by the default when
    /// resolved.
    pub fn harvest_interval(mut self, kind: TelemetryKind, interval: Duration) -> Self {
        self.kinds[kind].harvest_interval = Some(interval);
        self
    }

    /// Replaces all settings of a kind
    pub fn kind_settings(mut self, kind: TelemetryKind, settings: KindSettings) -> Self {
        self.kinds[kind] = settings;
        self
    }

    /// Sets whether to harvest once more during a clean shutdown
    pub fn flush_on_exit(mut self, flush_on_exit: bool) -> Self {
        self.flush_on_exit = flush_on_exit;
        self
    }

    /// Sets the item count an aggregator must exceed for the shutdown flush to happen
    pub fn flush_on_exit_threshold(mut self, threshold: usize) -> Self {
        self.flush_on_exit_threshold = threshold;
        self
    }

    /// Builds the snapshot
    pub fn build(self) -> Configuration {
        Configuration {
            version: self.version,
            kinds: self.kinds,
            flush_on_exit: self.flush_on_exit,
            flush_on_exit_threshold: self.flush_on_exit_threshold,
        }
    }
}

/// Process-wide reference to the current [`Configuration`].
///
/// Cloning the handle shares the same cell. Reads are lock-free.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<Configuration>>,
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("version", &self.current.load().version)
            .finish_non_exhaustive()
    }
}

impl ConfigHandle {
    /// Creates a handle starting at `initial`
    pub fn new(initial: Configuration) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// The current snapshot
    pub fn current(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    /// Publishes `update` if its version is higher than the current one.
    ///
    /// Returns true if the update was published.
    pub fn replace(&self, update: Arc<Configuration>) -> bool {
        let mut published = false;
        self.current.rcu(|current| {
            if update.version > current.version {
                published = true;
                Arc::clone(&update)
            } else {
                published = false;
                Arc::clone(current)
            }
        });
        published
    }
}
