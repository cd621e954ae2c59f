// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-kind collect, harvest and retention

use std::{
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use harvest_aggregation::{MetricReservoir, MetricStatsCollection, Reservoir};
use harvest_core::{SendOutcome, retention};

use crate::{
    ConfigHandle, Configuration, TelemetryKind,
    config::ResolvedSettings,
    health::{DropReason, HealthReporter},
    lifecycle::LifecycleListener,
    rate_limit::RateLimiter,
    scheduler::Scheduler,
    transport::{SendMetadata, Transport},
};

/// Collaborators shared by every aggregator
#[derive(Clone)]
pub struct AggregatorContext {
    /// Fires harvest ticks
    pub scheduler: Arc<dyn Scheduler>,
    /// Receives health signals
    pub health: Arc<dyn HealthReporter>,
    /// Source of the initial configuration
    pub config: ConfigHandle,
}

/// Result of one harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestSummary {
    /// The kind is disabled, nothing was harvested
    Disabled,
    /// The reservoir was empty, nothing was sent
    Empty,
    /// A payload was sent
    Sent {
        /// Number of items in the payload
        items: usize,
        /// How the send went
        outcome: SendOutcome,
        /// Number of items put back for the next harvest
        retained: usize,
    },
}

type MakeReservoir<R> = dyn Fn(&ResolvedSettings) -> R + Send + Sync;

/// Buffers one kind of telemetry and sends it on every harvest tick.
///
/// Producers call [`collect`](Aggregator::collect) from any thread; it never blocks on the
/// network. Each [`harvest`](Aggregator::harvest) takes everything out of the reservoir, sends
/// it, and puts back whatever the retention policy keeps. A configuration update with a higher
/// version replaces the reservoir outright, discarding its contents. Items kept by a harvest
/// that was in flight during the replacement go back into the replaced reservoir and are lost.
pub struct Aggregator<R: Reservoir, T> {
    kind: TelemetryKind,
    reservoir: ArcSwap<R>,
    config: ArcSwap<Configuration>,
    make_reservoir: Box<MakeReservoir<R>>,
    transport: T,
    scheduler: Arc<dyn Scheduler>,
    health: Arc<dyn HealthReporter>,
    connected: AtomicBool,
    harvesting: Mutex<()>,
    send_failures: RateLimiter,
    this: Weak<Self>,
}

impl<R, T> Aggregator<R, T>
where
    R: Reservoir + 'static,
    T: Transport<R::Item> + 'static,
{
    /// Creates an aggregator for `kind` using the current configuration of `context`.
    ///
    /// `make_reservoir` builds a fresh reservoir from the resolved settings, now and on every
    /// configuration update.
    pub fn new(
        kind: TelemetryKind,
        context: &AggregatorContext,
        transport: T,
        make_reservoir: impl Fn(&ResolvedSettings) -> R + Send + Sync + 'static,
    ) -> Arc<Self> {
        let config = context.config.current();
        let reservoir = make_reservoir(&config.settings(kind));
        Arc::new_cyclic(|this| Self {
            kind,
            reservoir: ArcSwap::from_pointee(reservoir),
            config: ArcSwap::new(config),
            make_reservoir: Box::new(make_reservoir),
            transport,
            scheduler: context.scheduler.clone(),
            health: context.health.clone(),
            connected: AtomicBool::new(false),
            harvesting: Mutex::new(()),
            send_failures: RateLimiter::new(Duration::from_secs(60)),
            this: this.clone(),
        })
    }

    /// The kind this aggregator handles
    pub fn kind(&self) -> TelemetryKind {
        self.kind
    }

    /// Settings from the configuration this aggregator last accepted
    pub fn settings(&self) -> ResolvedSettings {
        self.config.load().settings(self.kind)
    }

    fn enabled(&self) -> bool {
        self.config.load().raw_settings(self.kind).enabled
    }

    /// Version of the configuration this aggregator last accepted
    pub fn config_version(&self) -> u64 {
        self.config.load().version()
    }

    /// Number of items buffered in the current reservoir
    pub fn len(&self) -> usize {
        self.reservoir.load().len()
    }

    /// Returns true if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts since the last harvest or reconfiguration
    pub fn attempts_seen(&self) -> u64 {
        self.reservoir.load().attempts_seen()
    }

    /// Offers one item. Dropped when the kind is disabled.
    pub fn collect(&self, item: R::Item) {
        if !self.enabled() {
            return;
        }
        self.health.items_collected(self.kind, 1);
        self.reservoir.load().insert(item);
    }

    /// Offers many items at once. Dropped when the kind is disabled.
    pub fn collect_all(&self, items: impl IntoIterator<Item = R::Item>) {
        if !self.enabled() {
            return;
        }
        let items: Vec<R::Item> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }
        self.health.items_collected(self.kind, items.len() as u64);
        self.reservoir.load().insert_all(items);
    }

    /// Runs one harvest: take, send, reconcile, put back survivors.
    ///
    /// Harvests of the same aggregator never overlap.
    pub fn harvest(&self) -> HarvestSummary {
        let _harvesting = self
            .harvesting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.enabled() {
            return HarvestSummary::Disabled;
        }

        // survivors go back to this instance even if a reconfiguration replaces it meanwhile
        let reservoir = self.reservoir.load_full();
        let harvest = reservoir.take();
        if harvest.dropped > 0 {
            self.health
                .items_dropped(self.kind, harvest.dropped, DropReason::OverCapacity);
        }
        if harvest.is_empty() {
            tracing::trace!(kind = %self.kind, "nothing to send");
            return HarvestSummary::Empty;
        }

        let metadata = SendMetadata {
            kind: self.kind,
            capacity: reservoir.capacity(),
            attempts_seen: harvest.attempts_seen,
        };
        let items = harvest.items;
        let sent = items.len();
        let outcome = match self.transport.send(&items, &metadata) {
            Ok(outcome) => outcome,
            Err(error) => {
                let outcome = error.outcome();
                if let Some(suppressed) = self.send_failures.allow() {
                    tracing::warn!(
                        kind = %self.kind,
                        %error,
                        %outcome,
                        suppressed,
                        "failed to send harvest"
                    );
                }
                outcome
            }
        };

        let survivors = retention::reconcile(items, outcome, R::retention_order);
        let retained = survivors.len();
        self.report(outcome, sent, retained);
        if !survivors.is_empty() {
            reservoir.insert_all(survivors);
        }
        tracing::debug!(kind = %self.kind, sent, %outcome, retained, "harvest complete");
        HarvestSummary::Sent {
            items: sent,
            outcome,
            retained,
        }
    }

    fn report(&self, outcome: SendOutcome, sent: usize, retained: usize) {
        let kind = self.kind;
        match outcome {
            SendOutcome::Success => self.health.items_sent(kind, sent as u64),
            SendOutcome::Retriable => self.health.items_recollected(kind, retained as u64),
            SendOutcome::SizeExceeded => {
                self.health
                    .items_dropped(kind, (sent - retained) as u64, DropReason::PayloadReduced);
                self.health.reservoir_resized(kind, retained);
            }
            SendOutcome::ExplicitDiscard | SendOutcome::Unknown => {
                self.health
                    .items_dropped(kind, sent as u64, DropReason::Discarded);
            }
        }
    }

    /// Starts or stops the harvest schedule according to the current settings
    pub fn start(&self) {
        self.connected.store(true, Ordering::Release);
        self.schedule(&self.settings());
    }

    fn schedule(&self, settings: &ResolvedSettings) {
        if !settings.enabled {
            self.scheduler.stop_executing(self.kind);
            return;
        }
        let this = self.this.clone();
        self.scheduler.execute_every(
            self.kind,
            Arc::new(move || {
                if let Some(aggregator) = this.upgrade() {
                    aggregator.harvest();
                }
            }),
            settings.harvest_interval,
            Some(settings.harvest_interval),
        );
    }

    /// Accepts `config` if its version is higher than the current one.
    ///
    /// The reservoir is replaced by a fresh one sized from the new settings, discarding every
    /// buffered item and resetting the attempt count. Once started, the schedule is
    /// re-registered or stopped to match. Returns true if the configuration was accepted.
    pub fn reconfigure(&self, config: Arc<Configuration>) -> bool {
        let current = self.config.load();
        if config.version() <= current.version() {
            tracing::debug!(
                kind = %self.kind,
                current = current.version(),
                update = config.version(),
                "ignoring configuration that is not newer"
            );
            return false;
        }
        let settings = config.settings(self.kind);
        let replaced = self
            .reservoir
            .swap(Arc::new((self.make_reservoir)(&settings)));
        self.config.store(config);
        tracing::info!(
            kind = %self.kind,
            version = self.config_version(),
            capacity = settings.capacity,
            discarded = replaced.len(),
            "reservoir replaced"
        );
        if self.connected.load(Ordering::Acquire) {
            self.schedule(&settings);
        }
        true
    }

    /// Stops the schedule and, if configured, harvests one last time.
    ///
    /// The final harvest only happens when flush-on-exit is enabled and more items than the
    /// threshold are buffered. Returns its summary if it ran.
    pub fn shutdown(&self) -> Option<HarvestSummary> {
        self.connected.store(false, Ordering::Release);
        self.scheduler.stop_executing(self.kind);
        let config = self.config.load_full();
        let buffered = self.len();
        if config.flush_on_exit() && buffered > config.flush_on_exit_threshold() {
            tracing::info!(kind = %self.kind, buffered, "flushing on exit");
            Some(self.harvest())
        } else {
            tracing::debug!(kind = %self.kind, buffered, "not flushing on exit");
            None
        }
    }
}

impl<T> Aggregator<MetricReservoir, T>
where
    T: Transport<harvest_aggregation::Metric> + 'static,
{
    /// Merges a whole collection of metrics
    pub fn collect_collection(&self, metrics: MetricStatsCollection) {
        if !self.enabled() || metrics.is_empty() {
            return;
        }
        self.health.items_collected(self.kind, metrics.len() as u64);
        self.reservoir.load().merge_collection(metrics);
    }
}

impl<R, T> LifecycleListener for Aggregator<R, T>
where
    R: Reservoir + 'static,
    T: Transport<R::Item> + 'static,
{
    fn kind(&self) -> TelemetryKind {
        self.kind
    }

    fn on_agent_connected(&self) {
        self.start();
    }

    fn on_configuration_updated(&self, config: &Arc<Configuration>) {
        self.reconfigure(config.clone());
    }

    fn on_pre_clean_shutdown(&self) {
        self.shutdown();
    }
}
