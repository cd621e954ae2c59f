// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, time::Duration};

use enum_map::Enum;

/// The kinds of telemetry buffered and harvested by the engine. Each kind has its own
/// aggregator, reservoir and schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum TelemetryKind {
    /// Custom events recorded by the application
    CustomEvents,
    /// One event per reported error
    ErrorEvents,
    /// Detailed traces of reported errors
    ErrorTraces,
    /// Application log records
    LogEvents,
    /// One event per completed transaction
    TransactionEvents,
    /// Detailed traces of slow transactions
    TransactionTraces,
    /// Timeslice metrics
    Metrics,
    /// Slow SQL statements, aggregated by statement
    SqlTraces,
}

/// How a kind's reservoir decides what to keep once it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Uniform reservoir sampling with exact attempt counts
    Sampled,
    /// Highest priority items win
    Priority,
    /// Items merge by key and the highest ranked keys win
    TopK,
    /// Items merge by key without bound
    Merged,
}

const DEFAULT_HARVEST_INTERVAL: Duration = Duration::from_secs(60);

impl TelemetryKind {
    /// Every kind, in declaration order
    pub const ALL: [TelemetryKind; 8] = [
        TelemetryKind::CustomEvents,
        TelemetryKind::ErrorEvents,
        TelemetryKind::ErrorTraces,
        TelemetryKind::LogEvents,
        TelemetryKind::TransactionEvents,
        TelemetryKind::TransactionTraces,
        TelemetryKind::Metrics,
        TelemetryKind::SqlTraces,
    ];

    /// The retention strategy used for this kind
    pub fn strategy(self) -> Strategy {
        match self {
            TelemetryKind::CustomEvents
            | TelemetryKind::ErrorEvents
            | TelemetryKind::ErrorTraces
            | TelemetryKind::TransactionTraces => Strategy::Sampled,
            TelemetryKind::LogEvents | TelemetryKind::TransactionEvents => Strategy::Priority,
            TelemetryKind::SqlTraces => Strategy::TopK,
            TelemetryKind::Metrics => Strategy::Merged,
        }
    }

    /// Reservoir capacity used when the configuration does not provide one
    pub fn default_capacity(self) -> usize {
        match self {
            TelemetryKind::CustomEvents => 10_000,
            TelemetryKind::ErrorEvents => 100,
            TelemetryKind::ErrorTraces => 20,
            TelemetryKind::LogEvents => 10_000,
            TelemetryKind::TransactionEvents => 10_000,
            TelemetryKind::TransactionTraces => 1,
            TelemetryKind::Metrics => usize::MAX,
            TelemetryKind::SqlTraces => 10,
        }
    }

    /// Harvest interval used when the configuration does not provide a valid one
    pub fn default_harvest_interval(self) -> Duration {
        DEFAULT_HARVEST_INTERVAL
    }

    /// Short name used in logs and thread names
    pub fn name(self) -> &'static str {
        match self {
            TelemetryKind::CustomEvents => "custom_events",
            TelemetryKind::ErrorEvents => "error_events",
            TelemetryKind::ErrorTraces => "error_traces",
            TelemetryKind::LogEvents => "log_events",
            TelemetryKind::TransactionEvents => "transaction_events",
            TelemetryKind::TransactionTraces => "transaction_traces",
            TelemetryKind::Metrics => "metrics",
            TelemetryKind::SqlTraces => "sql_traces",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
