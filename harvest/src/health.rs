// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! One-way health signals emitted by aggregators

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use enum_map::{Enum, EnumMap};

use crate::TelemetryKind;

/// Why items were dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum DropReason {
    /// Turned away or evicted because the reservoir was full
    OverCapacity,
    /// Removed to shrink a payload the collector found too large
    PayloadReduced,
    /// Rejected by the collector or lost to an unclassified error
    Discarded,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::OverCapacity => "over_capacity",
            DropReason::PayloadReduced => "payload_reduced",
            DropReason::Discarded => "discarded",
        })
    }
}

/// Receives health signals. The engine never reads anything back.
pub trait HealthReporter: Send + Sync {
    /// Items were offered to a reservoir
    fn items_collected(&self, kind: TelemetryKind, count: u64);
    /// Items were delivered to the collector
    fn items_sent(&self, kind: TelemetryKind, count: u64);
    /// Items failed to send and were put back for the next harvest
    fn items_recollected(&self, kind: TelemetryKind, count: u64);
    /// Items were lost
    fn items_dropped(&self, kind: TelemetryKind, count: u64, reason: DropReason);
    /// A payload was shrunk to `new_size` items after the collector rejected its size
    fn reservoir_resized(&self, kind: TelemetryKind, new_size: usize);
}

/// Logs every signal at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHealthReporter;

impl HealthReporter for TracingHealthReporter {
    fn items_collected(&self, kind: TelemetryKind, count: u64) {
        tracing::trace!(%kind, count, "items collected");
    }

    fn items_sent(&self, kind: TelemetryKind, count: u64) {
        tracing::debug!(%kind, count, "items sent");
    }

    fn items_recollected(&self, kind: TelemetryKind, count: u64) {
        tracing::debug!(%kind, count, "items recollected");
    }

    fn items_dropped(&self, kind: TelemetryKind, count: u64, reason: DropReason) {
        tracing::debug!(%kind, count, %reason, "items dropped");
    }

    fn reservoir_resized(&self, kind: TelemetryKind, new_size: usize) {
        tracing::debug!(%kind, new_size, "payload resized");
    }
}

/// Per-kind totals kept by [`CountingHealthReporter`]
#[derive(Debug, Default)]
pub struct KindCounters {
    collected: AtomicU64,
    sent: AtomicU64,
    recollected: AtomicU64,
    dropped: EnumMap<DropReason, AtomicU64>,
    resizes: AtomicU64,
}

impl KindCounters {
    /// Items offered to the reservoir
    pub fn collected(&self) -> u64 {
        self.collected.load(Ordering::Relaxed)
    }

    /// Items delivered
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Items put back after a retriable failure
    pub fn recollected(&self) -> u64 {
        self.recollected.load(Ordering::Relaxed)
    }

    /// Items dropped for `reason`
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped[reason].load(Ordering::Relaxed)
    }

    /// Number of payload resizes
    pub fn resizes(&self) -> u64 {
        self.resizes.load(Ordering::Relaxed)
    }
}

/// Accumulates signals into atomic counters that can be read at any time
#[derive(Debug, Default)]
pub struct CountingHealthReporter {
    kinds: EnumMap<TelemetryKind, KindCounters>,
}

impl CountingHealthReporter {
    /// Creates a reporter with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `kind`
    pub fn counters(&self, kind: TelemetryKind) -> &KindCounters {
        &self.kinds[kind]
    }
}

impl HealthReporter for CountingHealthReporter {
    fn items_collected(&self, kind: TelemetryKind, count: u64) {
        self.kinds[kind].collected.fetch_add(count, Ordering::Relaxed);
    }

    fn items_sent(&self, kind: TelemetryKind, count: u64) {
        self.kinds[kind].sent.fetch_add(count, Ordering::Relaxed);
    }

    fn items_recollected(&self, kind: TelemetryKind, count: u64) {
        self.kinds[kind].recollected.fetch_add(count, Ordering::Relaxed);
    }

    fn items_dropped(&self, kind: TelemetryKind, count: u64, reason: DropReason) {
        self.kinds[kind].dropped[reason].fetch_add(count, Ordering::Relaxed);
    }

    fn reservoir_resized(&self, kind: TelemetryKind, _new_size: usize) {
        self.kinds[kind].resizes.fetch_add(1, Ordering::Relaxed);
    }
}
