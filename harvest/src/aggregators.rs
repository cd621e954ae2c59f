// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! One aggregator per [`TelemetryKind`], wired with the reservoir strategy of its kind

use std::sync::Arc;

use harvest_aggregation::{
    Metric, MetricReservoir, PriorityReservoir, SampledReservoir, TopKReservoir,
    metric::MetricNameService,
};

use crate::{
    TelemetryKind,
    aggregator::{Aggregator, AggregatorContext},
    items::{
        CustomEvent, ErrorEvent, ErrorTrace, LogEvent, SqlTrace, TransactionEvent,
        TransactionTrace,
    },
    lifecycle::LifecycleListener,
    transport::{RenamingTransport, Transport},
};

/// Uniformly sampled custom events
pub type CustomEventAggregator<T> = Aggregator<SampledReservoir<CustomEvent>, T>;
/// Uniformly sampled error events
pub type ErrorEventAggregator<T> = Aggregator<SampledReservoir<ErrorEvent>, T>;
/// Uniformly sampled error traces
pub type ErrorTraceAggregator<T> = Aggregator<SampledReservoir<ErrorTrace>, T>;
/// Highest priority log events
pub type LogEventAggregator<T> = Aggregator<PriorityReservoir<LogEvent>, T>;
/// Highest priority transaction events
pub type TransactionEventAggregator<T> = Aggregator<PriorityReservoir<TransactionEvent>, T>;
/// Uniformly sampled transaction traces
pub type TransactionTraceAggregator<T> = Aggregator<SampledReservoir<TransactionTrace>, T>;
/// Slowest SQL statements, merged by statement
pub type SqlTraceAggregator<T> = Aggregator<TopKReservoir<SqlTrace>, T>;
/// Merged metrics, renamed right before sending
pub type MetricAggregator<T> = Aggregator<MetricReservoir, RenamingTransport<T>>;

/// Transport able to send every kind of item
pub trait AnyTransport:
    Transport<CustomEvent>
    + Transport<ErrorEvent>
    + Transport<ErrorTrace>
    + Transport<LogEvent>
    + Transport<TransactionEvent>
    + Transport<TransactionTrace>
    + Transport<SqlTrace>
    + Transport<Metric>
    + Clone
    + 'static
{
}

impl<T> AnyTransport for T where
    T: Transport<CustomEvent>
        + Transport<ErrorEvent>
        + Transport<ErrorTrace>
        + Transport<LogEvent>
        + Transport<TransactionEvent>
        + Transport<TransactionTrace>
        + Transport<SqlTrace>
        + Transport<Metric>
        + Clone
        + 'static
{
}

/// The full set of aggregators sharing one transport, scheduler, health reporter and
/// configuration.
///
/// ```
/// use std::sync::Arc;
///
/// use harvest::{
///     AggregatorContext, Aggregators, ConfigHandle, SendMetadata, SendOutcome, ThreadScheduler,
///     TracingHealthReporter, Transport, TransportError, metric::IdentityNames,
/// };
///
/// #[derive(Clone)]
/// struct Discard;
///
/// impl<I> Transport<I> for Discard {
///     fn send(&self, _: &[I], _: &SendMetadata) -> Result<SendOutcome, TransportError> {
///         Ok(SendOutcome::Success)
///     }
/// }
///
/// let context = AggregatorContext {
///     scheduler: Arc::new(ThreadScheduler::new()),
///     health: Arc::new(TracingHealthReporter),
///     config: ConfigHandle::default(),
/// };
/// let aggregators = Aggregators::new(Discard, &context, Arc::new(IdentityNames));
/// assert_eq!(aggregators.listeners().len(), 8);
/// ```
pub struct Aggregators<T: AnyTransport> {
    /// Custom events
    pub custom_events: Arc<CustomEventAggregator<T>>,
    /// Error events
    pub error_events: Arc<ErrorEventAggregator<T>>,
    /// Error traces
    pub error_traces: Arc<ErrorTraceAggregator<T>>,
    /// Log events
    pub log_events: Arc<LogEventAggregator<T>>,
    /// Transaction events
    pub transaction_events: Arc<TransactionEventAggregator<T>>,
    /// Transaction traces
    pub transaction_traces: Arc<TransactionTraceAggregator<T>>,
    /// Metrics
    pub metrics: Arc<MetricAggregator<T>>,
    /// SQL traces
    pub sql_traces: Arc<SqlTraceAggregator<T>>,
}

impl<T: AnyTransport> Aggregators<T> {
    /// Creates every aggregator. Metric names are rewritten with `names` when sent.
    pub fn new(
        transport: T,
        context: &AggregatorContext,
        names: Arc<dyn MetricNameService>,
    ) -> Self {
        Self {
            custom_events: Aggregator::new(
                TelemetryKind::CustomEvents,
                context,
                transport.clone(),
                |settings| SampledReservoir::new(settings.capacity),
            ),
            error_events: Aggregator::new(
                TelemetryKind::ErrorEvents,
                context,
                transport.clone(),
                |settings| SampledReservoir::new(settings.capacity),
            ),
            error_traces: Aggregator::new(
                TelemetryKind::ErrorTraces,
                context,
                transport.clone(),
                |settings| SampledReservoir::new(settings.capacity),
            ),
            log_events: Aggregator::new(
                TelemetryKind::LogEvents,
                context,
                transport.clone(),
                |settings| PriorityReservoir::new(settings.capacity),
            ),
            transaction_events: Aggregator::new(
                TelemetryKind::TransactionEvents,
                context,
                transport.clone(),
                |settings| PriorityReservoir::new(settings.capacity),
            ),
            transaction_traces: Aggregator::new(
                TelemetryKind::TransactionTraces,
                context,
                transport.clone(),
                |settings| SampledReservoir::new(settings.capacity),
            ),
            sql_traces: Aggregator::new(
                TelemetryKind::SqlTraces,
                context,
                transport.clone(),
                |settings| TopKReservoir::new(settings.capacity),
            ),
            metrics: Aggregator::new(
                TelemetryKind::Metrics,
                context,
                RenamingTransport::new(transport, names),
                |_| MetricReservoir::new(),
            ),
        }
    }

    /// Every aggregator as a lifecycle listener, in [`TelemetryKind::ALL`] order
    pub fn listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        let listeners: [Arc<dyn LifecycleListener>; 8] = [
            self.custom_events.clone(),
            self.error_events.clone(),
            self.error_traces.clone(),
            self.log_events.clone(),
            self.transaction_events.clone(),
            self.transaction_traces.clone(),
            self.metrics.clone(),
            self.sql_traces.clone(),
        ];
        listeners.into()
    }
}
