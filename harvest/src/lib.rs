// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod aggregator;
pub mod aggregators;
pub mod config;
pub mod health;
pub mod items;
mod kind;
pub mod lifecycle;
pub(crate) mod rate_limit;
pub mod scheduler;
#[cfg(feature = "test-util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
pub mod transport;

pub use aggregator::{Aggregator, AggregatorContext, HarvestSummary};
pub use aggregators::{AnyTransport, Aggregators};
pub use config::{
    ConfigHandle, Configuration, ConfigurationBuilder, KindSettings, ResolvedSettings,
};
pub use health::{CountingHealthReporter, DropReason, HealthReporter, TracingHealthReporter};
pub use kind::{Strategy, TelemetryKind};
pub use lifecycle::{
    AggregatorHost, HostJoinHandle, LifecycleBus, LifecycleEvent, LifecycleListener,
};
pub use scheduler::{HarvestTask, Scheduler, ThreadScheduler};
pub use transport::{RenamingTransport, SendMetadata, Transport, TransportError};

pub use harvest_aggregation::{
    Harvest, Metric, MetricReservoir, MetricStatsCollection, PriorityReservoir, Reservoir,
    SampledReservoir, TopKReservoir, metric,
};
pub use harvest_core::{MetricName, MetricStats, SendOutcome};

#[doc(hidden)]
pub use harvest_core as core;
