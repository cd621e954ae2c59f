// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic collaborators for testing code built on the harvest engine
//!
//! [`ManualScheduler`] captures harvest tasks so tests decide when a tick happens,
//! [`RecordingTransport`] records payloads and answers with scripted outcomes, and
//! [`RecordingHealthReporter`] keeps every health signal in order.
//!
//! This requires that the `test-util` feature be enabled.
//!
//! ```
//! use std::sync::Arc;
//!
//! use harvest::{
//!     Aggregator, AggregatorContext, ConfigHandle, SampledReservoir, SendOutcome, TelemetryKind,
//!     items::CustomEvent,
//!     test_util::{ManualScheduler, RecordingHealthReporter, RecordingTransport},
//! };
//!
//! let scheduler = Arc::new(ManualScheduler::new());
//! let transport = RecordingTransport::new();
//! let context = AggregatorContext {
//!     scheduler: scheduler.clone(),
//!     health: Arc::new(RecordingHealthReporter::new()),
//!     config: ConfigHandle::default(),
//! };
//! let aggregator = Aggregator::new(
//!     TelemetryKind::CustomEvents,
//!     &context,
//!     transport.clone(),
//!     |settings| SampledReservoir::<CustomEvent>::new(settings.capacity),
//! );
//! aggregator.start();
//! aggregator.collect(CustomEvent::new("Purchase"));
//!
//! transport.respond_with(TelemetryKind::CustomEvents, SendOutcome::Retriable);
//! assert!(scheduler.tick(TelemetryKind::CustomEvents));
//! assert_eq!(aggregator.len(), 1);
//!
//! assert!(scheduler.tick(TelemetryKind::CustomEvents));
//! assert!(aggregator.is_empty());
//! assert_eq!(transport.calls(TelemetryKind::CustomEvents), 2);
//! ```

use std::{
    any::Any,
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use enum_map::EnumMap;
use harvest_core::SendOutcome;

use crate::{
    DropReason, HealthReporter, TelemetryKind,
    scheduler::{HarvestTask, Scheduler},
    transport::{SendMetadata, Transport, TransportError},
};

#[derive(Clone)]
struct Registration {
    task: HarvestTask,
    interval: Duration,
    initial_delay: Option<Duration>,
}

#[derive(Default)]
struct ManualState {
    registered: EnumMap<TelemetryKind, Option<Registration>>,
    registrations: EnumMap<TelemetryKind, usize>,
    stops: EnumMap<TelemetryKind, usize>,
}

/// [`Scheduler`] that never fires on its own. Call [`tick`](ManualScheduler::tick) to run the
/// task registered for a kind.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Creates a scheduler with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the task registered for `kind` on the calling thread. Returns false if there is
    /// none.
    pub fn tick(&self, kind: TelemetryKind) -> bool {
        // run outside the lock, the task may reschedule itself
        let task = self.state().registered[kind].as_ref().map(|r| r.task.clone());
        match task {
            Some(task) => {
                (*task)();
                true
            }
            None => false,
        }
    }

    /// Returns true if a task is registered for `kind`
    pub fn is_scheduled(&self, kind: TelemetryKind) -> bool {
        self.state().registered[kind].is_some()
    }

    /// Interval of the task registered for `kind`
    pub fn interval(&self, kind: TelemetryKind) -> Option<Duration> {
        self.state().registered[kind].as_ref().map(|r| r.interval)
    }

    /// Initial delay requested for the task registered for `kind`
    pub fn initial_delay(&self, kind: TelemetryKind) -> Option<Duration> {
        self.state().registered[kind]
            .as_ref()
            .and_then(|r| r.initial_delay)
    }

    /// Number of `execute_every` calls for `kind`
    pub fn registrations(&self, kind: TelemetryKind) -> usize {
        self.state().registrations[kind]
    }

    /// Number of `stop_executing` calls for `kind`
    pub fn stops(&self, kind: TelemetryKind) -> usize {
        self.state().stops[kind]
    }
}

impl Scheduler for ManualScheduler {
    fn execute_every(
        &self,
        kind: TelemetryKind,
        task: HarvestTask,
        interval: Duration,
        initial_delay: Option<Duration>,
    ) {
        let mut state = self.state();
        state.registered[kind] = Some(Registration {
            task,
            interval,
            initial_delay,
        });
        state.registrations[kind] += 1;
    }

    fn stop_executing(&self, kind: TelemetryKind) {
        let mut state = self.state();
        state.registered[kind] = None;
        state.stops[kind] += 1;
    }
}

/// A payload captured by [`RecordingTransport`]
pub struct SentPayload {
    /// Metadata passed with the payload
    pub metadata: SendMetadata,
    items: Box<dyn Any + Send>,
}

impl SentPayload {
    /// The items of this payload, or `None` if they are not of type `I`
    pub fn items<I: 'static>(&self) -> Option<&[I]> {
        self.items.downcast_ref::<Vec<I>>().map(Vec::as_slice)
    }
}

impl std::fmt::Debug for SentPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentPayload")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Recorded {
    script: EnumMap<TelemetryKind, VecDeque<Result<SendOutcome, TransportError>>>,
    sent: Vec<SentPayload>,
}

/// [`Transport`] for every item type that records payloads and answers with scripted
/// responses.
///
/// Responses are consumed in order per kind; once a kind's script is exhausted every send
/// succeeds. Clones share the same recording.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    /// Creates a transport that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answers the next unscripted send of `kind` with `outcome`
    pub fn respond_with(&self, kind: TelemetryKind, outcome: SendOutcome) {
        self.recorded().script[kind].push_back(Ok(outcome));
    }

    /// Fails the next unscripted send of `kind` with `error`
    pub fn fail_with(&self, kind: TelemetryKind, error: TransportError) {
        self.recorded().script[kind].push_back(Err(error));
    }

    /// Number of sends for `kind`
    pub fn calls(&self, kind: TelemetryKind) -> usize {
        self.recorded()
            .sent
            .iter()
            .filter(|payload| payload.metadata.kind == kind)
            .count()
    }

    /// Items of every payload of `kind`, in send order
    pub fn payloads<I: Clone + 'static>(&self, kind: TelemetryKind) -> Vec<Vec<I>> {
        self.recorded()
            .sent
            .iter()
            .filter(|payload| payload.metadata.kind == kind)
            .filter_map(|payload| payload.items::<I>().map(<[I]>::to_vec))
            .collect()
    }

    /// Metadata of every payload of `kind`, in send order
    pub fn metadata(&self, kind: TelemetryKind) -> Vec<SendMetadata> {
        self.recorded()
            .sent
            .iter()
            .filter(|payload| payload.metadata.kind == kind)
            .map(|payload| payload.metadata)
            .collect()
    }
}

impl<I: Clone + Send + 'static> Transport<I> for RecordingTransport {
    fn send(&self, items: &[I], metadata: &SendMetadata) -> Result<SendOutcome, TransportError> {
        let mut recorded = self.recorded();
        recorded.sent.push(SentPayload {
            metadata: *metadata,
            items: Box::new(items.to_vec()),
        });
        recorded.script[metadata.kind]
            .pop_front()
            .unwrap_or(Ok(SendOutcome::Success))
    }
}

/// A health signal captured by [`RecordingHealthReporter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// See [`HealthReporter::items_collected`]
    Collected(TelemetryKind, u64),
    /// See [`HealthReporter::items_sent`]
    Sent(TelemetryKind, u64),
    /// See [`HealthReporter::items_recollected`]
    Recollected(TelemetryKind, u64),
    /// See [`HealthReporter::items_dropped`]
    Dropped(TelemetryKind, u64, DropReason),
    /// See [`HealthReporter::reservoir_resized`]
    Resized(TelemetryKind, usize),
}

impl HealthEvent {
    /// The kind the signal is about
    pub fn kind(&self) -> TelemetryKind {
        match *self {
            HealthEvent::Collected(kind, _)
            | HealthEvent::Sent(kind, _)
            | HealthEvent::Recollected(kind, _)
            | HealthEvent::Dropped(kind, _, _)
            | HealthEvent::Resized(kind, _) => kind,
        }
    }
}

/// [`HealthReporter`] keeping every signal in order
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Creates an empty reporter
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: HealthEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Every signal so far
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Signals about `kind`, excluding collected counts
    pub fn outcomes(&self, kind: TelemetryKind) -> Vec<HealthEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind() == kind && !matches!(event, HealthEvent::Collected(..)))
            .collect()
    }

    /// Removes and returns every signal so far
    pub fn take(&self) -> Vec<HealthEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn items_collected(&self, kind: TelemetryKind, count: u64) {
        self.push(HealthEvent::Collected(kind, count));
    }

    fn items_sent(&self, kind: TelemetryKind, count: u64) {
        self.push(HealthEvent::Sent(kind, count));
    }

    fn items_recollected(&self, kind: TelemetryKind, count: u64) {
        self.push(HealthEvent::Recollected(kind, count));
    }

    fn items_dropped(&self, kind: TelemetryKind, count: u64, reason: DropReason) {
        self.push(HealthEvent::Dropped(kind, count, reason));
    }

    fn reservoir_resized(&self, kind: TelemetryKind, new_size: usize) {
        self.push(HealthEvent::Resized(kind, new_size));
    }
}
