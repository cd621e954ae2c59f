// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use assert2::{check, let_assert};
use harvest::{
    Aggregator, AggregatorContext, ConfigHandle, Configuration, DropReason, HarvestSummary,
    Metric, MetricName, MetricReservoir, MetricStats, MetricStatsCollection, PriorityReservoir,
    RenamingTransport, SampledReservoir, SendMetadata, SendOutcome, TelemetryKind, TopKReservoir,
    Transport, TransportError,
    items::{CustomEvent, LogEvent, SqlTrace},
    metric::RenameTable,
    test_util::{HealthEvent, ManualScheduler, RecordingHealthReporter, RecordingTransport},
};
use rstest::rstest;

const CUSTOM: TelemetryKind = TelemetryKind::CustomEvents;
const LOGS: TelemetryKind = TelemetryKind::LogEvents;

struct Fixture {
    scheduler: Arc<ManualScheduler>,
    health: Arc<RecordingHealthReporter>,
    transport: RecordingTransport,
    context: AggregatorContext,
}

fn fixture(config: Configuration) -> Fixture {
    let scheduler = Arc::new(ManualScheduler::new());
    let health = Arc::new(RecordingHealthReporter::new());
    let context = AggregatorContext {
        scheduler: scheduler.clone(),
        health: health.clone(),
        config: ConfigHandle::new(config),
    };
    Fixture {
        scheduler,
        health,
        transport: RecordingTransport::new(),
        context,
    }
}

impl Fixture {
    fn custom_events(&self) -> Arc<Aggregator<SampledReservoir<CustomEvent>, RecordingTransport>> {
        Aggregator::new(CUSTOM, &self.context, self.transport.clone(), |settings| {
            SampledReservoir::new(settings.capacity)
        })
    }

    fn log_events(&self) -> Arc<Aggregator<PriorityReservoir<LogEvent>, RecordingTransport>> {
        Aggregator::new(LOGS, &self.context, self.transport.clone(), |settings| {
            PriorityReservoir::new(settings.capacity)
        })
    }

    fn sql_traces(&self) -> Arc<Aggregator<TopKReservoir<SqlTrace>, RecordingTransport>> {
        Aggregator::new(
            TelemetryKind::SqlTraces,
            &self.context,
            self.transport.clone(),
            |settings| TopKReservoir::new(settings.capacity),
        )
    }

    fn metrics(
        &self,
        names: RenameTable,
    ) -> Arc<Aggregator<MetricReservoir, RenamingTransport<RecordingTransport>>> {
        Aggregator::new(
            TelemetryKind::Metrics,
            &self.context,
            RenamingTransport::new(self.transport.clone(), Arc::new(names)),
            |_| MetricReservoir::new(),
        )
    }
}

fn event(n: usize) -> CustomEvent {
    CustomEvent::new("Purchase").with_attribute("n", n as i64)
}

fn timing(name: &'static str, millis: u64) -> Metric {
    let millis = Duration::from_millis(millis);
    Metric::new(MetricName::unscoped(name), MetricStats::timing(millis, millis))
}

#[test]
fn collected_items_are_sent_once() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.custom_events();
    for n in 0..3 {
        aggregator.collect(event(n));
    }

    check!(
        aggregator.harvest()
            == HarvestSummary::Sent {
                items: 3,
                outcome: SendOutcome::Success,
                retained: 0
            }
    );
    check!(aggregator.harvest() == HarvestSummary::Empty);
    check!(fixture.transport.calls(CUSTOM) == 1);

    let payloads = fixture.transport.payloads::<CustomEvent>(CUSTOM);
    let_assert!([payload] = payloads.as_slice());
    check!(payload.len() == 3);
    check!(
        fixture.health.events()
            == vec![
                HealthEvent::Collected(CUSTOM, 1),
                HealthEvent::Collected(CUSTOM, 1),
                HealthEvent::Collected(CUSTOM, 1),
                HealthEvent::Sent(CUSTOM, 3),
            ]
    );
}

#[test]
fn empty_reservoir_never_sends() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.custom_events();
    check!(aggregator.harvest() == HarvestSummary::Empty);
    check!(fixture.transport.calls(CUSTOM) == 0);
    check!(fixture.health.events().is_empty());
}

#[test]
fn retriable_keeps_the_payload_for_the_next_harvest() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.custom_events();
    aggregator.collect_all([event(1), event(2)]);
    fixture.transport.respond_with(CUSTOM, SendOutcome::Retriable);

    check!(
        aggregator.harvest()
            == HarvestSummary::Sent {
                items: 2,
                outcome: SendOutcome::Retriable,
                retained: 2
            }
    );
    check!(aggregator.len() == 2);

    aggregator.collect(event(3));
    check!(
        aggregator.harvest()
            == HarvestSummary::Sent {
                items: 3,
                outcome: SendOutcome::Success,
                retained: 0
            }
    );
    check!(
        fixture.health.outcomes(CUSTOM)
            == vec![HealthEvent::Recollected(CUSTOM, 2), HealthEvent::Sent(CUSTOM, 3)]
    );
}

#[rstest]
#[case(SendOutcome::Success)]
#[case(SendOutcome::ExplicitDiscard)]
#[case(SendOutcome::Unknown)]
fn terminal_outcomes_keep_nothing(#[case] outcome: SendOutcome) {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.custom_events();
    aggregator.collect_all((0..4).map(event));
    fixture.transport.respond_with(CUSTOM, outcome);

    let_assert!(HarvestSummary::Sent { retained: 0, .. } = aggregator.harvest());
    check!(aggregator.is_empty());
    check!(aggregator.harvest() == HarvestSummary::Empty);
}

#[rstest]
#[case(1, 0)]
#[case(2, 1)]
#[case(5, 2)]
#[case(10, 5)]
fn size_exceeded_halves_the_payload(#[case] sent: usize, #[case] kept: usize) {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.custom_events();
    aggregator.collect_all((0..sent).map(event));
    fixture.transport.respond_with(CUSTOM, SendOutcome::SizeExceeded);

    check!(
        aggregator.harvest()
            == HarvestSummary::Sent {
                items: sent,
                outcome: SendOutcome::SizeExceeded,
                retained: kept
            }
    );
    check!(aggregator.len() == kept);
    check!(
        fixture.health.outcomes(CUSTOM)
            == vec![
                HealthEvent::Dropped(CUSTOM, (sent - kept) as u64, DropReason::PayloadReduced),
                HealthEvent::Resized(CUSTOM, kept),
            ]
    );
}

#[test]
fn transport_errors_are_classified() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.custom_events();
    aggregator.collect(event(1));

    fixture.transport.fail_with(
        CUSTOM,
        TransportError::Connection(io::Error::from(io::ErrorKind::ConnectionRefused)),
    );
    let_assert!(
        HarvestSummary::Sent {
            outcome: SendOutcome::Retriable,
            retained: 1,
            ..
        } = aggregator.harvest()
    );

    fixture.transport.fail_with(CUSTOM, TransportError::Status(401));
    let_assert!(
        HarvestSummary::Sent {
            outcome: SendOutcome::ExplicitDiscard,
            retained: 0,
            ..
        } = aggregator.harvest()
    );
    check!(
        fixture.health.outcomes(CUSTOM)
            == vec![
                HealthEvent::Recollected(CUSTOM, 1),
                HealthEvent::Dropped(CUSTOM, 1, DropReason::Discarded),
            ]
    );
}

#[test]
fn capacity_bounds_the_payload_but_not_the_accounting() {
    let fixture = fixture(Configuration::builder().capacity(CUSTOM, 10).build());
    let aggregator = fixture.custom_events();
    aggregator.collect_all((0..25).map(event));
    check!(aggregator.len() == 10);
    check!(aggregator.attempts_seen() == 25);

    aggregator.harvest();
    check!(
        fixture.transport.metadata(CUSTOM)
            == vec![SendMetadata {
                kind: CUSTOM,
                capacity: 10,
                attempts_seen: 25
            }]
    );
    check!(
        fixture.health.outcomes(CUSTOM)
            == vec![
                HealthEvent::Dropped(CUSTOM, 15, DropReason::OverCapacity),
                HealthEvent::Sent(CUSTOM, 10),
            ]
    );
    check!(aggregator.attempts_seen() == 0);
}

#[test]
fn disabled_kind_collects_and_schedules_nothing() {
    let fixture = fixture(Configuration::builder().enabled(CUSTOM, false).build());
    let aggregator = fixture.custom_events();
    aggregator.collect(event(1));
    check!(aggregator.is_empty());

    aggregator.start();
    check!(!fixture.scheduler.is_scheduled(CUSTOM));
    check!(fixture.scheduler.stops(CUSTOM) == 1);
    check!(aggregator.harvest() == HarvestSummary::Disabled);
    check!(fixture.health.events().is_empty());
}

#[test]
fn start_schedules_with_the_configured_interval() {
    let fixture = fixture(
        Configuration::builder()
            .harvest_interval(CUSTOM, Duration::from_secs(5))
            .harvest_interval(LOGS, Duration::ZERO)
            .build(),
    );
    let custom = fixture.custom_events();
    let logs = fixture.log_events();
    custom.start();
    logs.start();

    check!(fixture.scheduler.interval(CUSTOM) == Some(Duration::from_secs(5)));
    check!(fixture.scheduler.initial_delay(CUSTOM) == Some(Duration::from_secs(5)));
    // a zero interval falls back to the default
    check!(fixture.scheduler.interval(LOGS) == Some(Duration::from_secs(60)));

    custom.collect(event(1));
    check!(fixture.scheduler.tick(CUSTOM));
    check!(fixture.transport.calls(CUSTOM) == 1);
}

#[test]
fn reconfiguration_discards_buffered_items() {
    let fixture = fixture(Configuration::builder().version(1).build());
    let aggregator = fixture.custom_events();
    aggregator.start();
    aggregator.collect_all((0..4).map(event));

    let update = Configuration::builder().version(2).capacity(CUSTOM, 2).build();
    check!(aggregator.reconfigure(Arc::new(update.clone())));
    check!(aggregator.is_empty());
    check!(aggregator.attempts_seen() == 0);
    check!(aggregator.config_version() == 2);
    check!(fixture.scheduler.registrations(CUSTOM) == 2);

    aggregator.collect_all((0..3).map(event));
    check!(aggregator.len() == 2);

    // not newer, keeps the reservoir
    check!(!aggregator.reconfigure(Arc::new(update)));
    check!(aggregator.len() == 2);
    check!(fixture.scheduler.registrations(CUSTOM) == 2);
}

#[test]
fn reconfiguration_can_disable_a_running_kind() {
    let fixture = fixture(Configuration::builder().version(1).build());
    let aggregator = fixture.custom_events();
    aggregator.start();
    check!(fixture.scheduler.is_scheduled(CUSTOM));

    let update = Configuration::builder().version(2).enabled(CUSTOM, false).build();
    check!(aggregator.reconfigure(Arc::new(update)));
    check!(!fixture.scheduler.is_scheduled(CUSTOM));

    let update = Configuration::builder().version(3).build();
    check!(aggregator.reconfigure(Arc::new(update)));
    check!(fixture.scheduler.is_scheduled(CUSTOM));
}

#[test]
fn reconfiguration_before_start_does_not_schedule() {
    let fixture = fixture(Configuration::builder().version(1).build());
    let aggregator = fixture.custom_events();
    check!(aggregator.reconfigure(Arc::new(Configuration::builder().version(2).build())));
    check!(fixture.scheduler.registrations(CUSTOM) == 0);
}

/// Runs a hook in the middle of the first send, then answers `Retriable`
#[derive(Default)]
struct HookTransport {
    hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Transport<CustomEvent> for HookTransport {
    fn send(&self, _: &[CustomEvent], _: &SendMetadata) -> Result<SendOutcome, TransportError> {
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(SendOutcome::Retriable)
    }
}

#[test]
fn reconfiguration_during_a_send_loses_the_retried_items() {
    let fixture = fixture(Configuration::builder().version(1).build());
    let transport = Arc::new(HookTransport::default());
    let aggregator = Aggregator::new(CUSTOM, &fixture.context, transport.clone(), |settings| {
        SampledReservoir::<CustomEvent>::new(settings.capacity)
    });
    aggregator.collect_all([event(1), event(2)]);

    let reconfigured = aggregator.clone();
    *transport.hook.lock().unwrap() = Some(Box::new(move || {
        let update = Configuration::builder().version(2).build();
        assert!(reconfigured.reconfigure(Arc::new(update)));
    }));

    check!(
        aggregator.harvest()
            == HarvestSummary::Sent {
                items: 2,
                outcome: SendOutcome::Retriable,
                retained: 2
            }
    );
    // the survivors went back into the replaced reservoir
    check!(aggregator.is_empty());
    check!(aggregator.harvest() == HarvestSummary::Empty);
}

#[test]
fn shutdown_flushes_above_the_threshold() {
    let config = Configuration::builder()
        .flush_on_exit(true)
        .flush_on_exit_threshold(2)
        .build();
    let fixture = fixture(config);
    let aggregator = fixture.custom_events();
    aggregator.start();

    aggregator.collect_all([event(1), event(2)]);
    check!(aggregator.shutdown().is_none());
    check!(!fixture.scheduler.is_scheduled(CUSTOM));
    check!(fixture.transport.calls(CUSTOM) == 0);

    aggregator.collect(event(3));
    let_assert!(Some(HarvestSummary::Sent { items: 3, .. }) = aggregator.shutdown());
    check!(fixture.transport.calls(CUSTOM) == 1);
}

#[test]
fn shutdown_without_flush_on_exit_drops_silently() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.custom_events();
    aggregator.collect_all((0..100).map(event));
    check!(aggregator.shutdown().is_none());
    check!(fixture.transport.calls(CUSTOM) == 0);
}

#[test]
fn log_events_keep_the_highest_priorities() {
    let fixture = fixture(Configuration::builder().capacity(LOGS, 100).build());
    let aggregator = fixture.log_events();
    for i in 0..105 {
        aggregator.collect(LogEvent::new("INFO", format!("line {i}"), i as f32));
    }
    check!(aggregator.len() == 100);

    aggregator.harvest();
    let payloads = fixture.transport.payloads::<LogEvent>(LOGS);
    let_assert!([payload] = payloads.as_slice());
    check!(payload.len() == 100);
    check!(payload.first().map(|e| e.priority) == Some(104.0));
    check!(payload.last().map(|e| e.priority) == Some(5.0));

    let metadata = fixture.transport.metadata(LOGS);
    let_assert!([metadata] = metadata.as_slice());
    check!(metadata.attempts_seen == 105);
    check!(
        fixture.health.outcomes(LOGS)
            == vec![
                HealthEvent::Dropped(LOGS, 5, DropReason::OverCapacity),
                HealthEvent::Sent(LOGS, 100),
            ]
    );
}

#[test]
fn size_exceeded_keeps_the_higher_priority_half() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.log_events();
    for priority in [0.3, 0.1, 0.4, 0.2] {
        aggregator.collect(LogEvent::new("WARN", "disk almost full", priority));
    }
    fixture.transport.respond_with(LOGS, SendOutcome::SizeExceeded);
    aggregator.harvest();
    aggregator.harvest();

    let priorities: Vec<Vec<f32>> = fixture
        .transport
        .payloads::<LogEvent>(LOGS)
        .into_iter()
        .map(|payload| payload.into_iter().map(|e| e.priority).collect())
        .collect();
    check!(priorities == vec![vec![0.4, 0.3, 0.2, 0.1], vec![0.4, 0.3]]);
}

#[test]
fn sql_traces_merge_by_statement_and_keep_the_slowest() {
    let fixture = fixture(
        Configuration::builder()
            .capacity(TelemetryKind::SqlTraces, 2)
            .build(),
    );
    let aggregator = fixture.sql_traces();
    let ms = Duration::from_millis;
    aggregator.collect(SqlTrace::new(1, "SELECT * FROM users", ms(10)));
    aggregator.collect(SqlTrace::new(2, "SELECT * FROM orders", ms(20)));
    aggregator.collect(SqlTrace::new(3, "SELECT 1", ms(5)));
    aggregator.collect(SqlTrace::new(1, "SELECT * FROM users", ms(30)));
    check!(aggregator.len() == 2);

    aggregator.harvest();
    let payloads = fixture.transport.payloads::<SqlTrace>(TelemetryKind::SqlTraces);
    let_assert!([payload] = payloads.as_slice());
    let_assert!([slowest, other] = payload.as_slice());
    check!(slowest.sql_id == 1);
    check!(slowest.stats.count == 2);
    check!(slowest.stats.max == ms(30).as_secs_f64());
    check!(slowest.stats.min == ms(10).as_secs_f64());
    check!(other.sql_id == 2);
    check!(
        fixture.health.outcomes(TelemetryKind::SqlTraces)
            == vec![
                HealthEvent::Dropped(TelemetryKind::SqlTraces, 1, DropReason::OverCapacity),
                HealthEvent::Sent(TelemetryKind::SqlTraces, 2),
            ]
    );
}

#[test]
fn metrics_merge_by_name() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.metrics(RenameTable::default());
    aggregator.collect(timing("Datastore/all", 3));
    aggregator.collect(timing("Datastore/all", 5));

    let mut collection = MetricStatsCollection::default();
    collection.merge_metric(
        MetricName::scoped("WebTransaction/index", "Datastore/all"),
        MetricStats::count(1),
    );
    aggregator.collect_collection(collection);
    check!(aggregator.len() == 2);

    aggregator.harvest();
    let payloads = fixture.transport.payloads::<Metric>(TelemetryKind::Metrics);
    let_assert!([payload] = payloads.as_slice());
    let_assert!([unscoped, scoped] = payload.as_slice());
    check!(unscoped.name == MetricName::unscoped("Datastore/all"));
    check!(unscoped.stats.count == 2);
    check!(unscoped.stats.min == 0.003);
    check!(unscoped.stats.max == 0.005);
    check!(scoped.name.scope() == Some("WebTransaction/index"));
}

#[test]
fn metrics_renamed_to_the_same_name_are_sent_separately() {
    let fixture = fixture(Configuration::default());
    let names = RenameTable::default()
        .with_rename("Custom/a", "Custom/merged")
        .with_rename("Custom/b", "Custom/merged");
    let aggregator = fixture.metrics(names);
    aggregator.collect(timing("Custom/a", 1));
    aggregator.collect(timing("Custom/b", 2));

    aggregator.harvest();
    let payloads = fixture.transport.payloads::<Metric>(TelemetryKind::Metrics);
    let_assert!([payload] = payloads.as_slice());
    check!(payload.len() == 2);
    check!(payload.iter().all(|m| m.name.name() == "Custom/merged"));
}

#[test]
fn retried_metrics_merge_with_new_data() {
    let fixture = fixture(Configuration::default());
    let aggregator = fixture.metrics(RenameTable::default());
    aggregator.collect(timing("Custom/a", 1));
    fixture
        .transport
        .respond_with(TelemetryKind::Metrics, SendOutcome::Retriable);
    aggregator.harvest();

    aggregator.collect(timing("Custom/a", 2));
    aggregator.harvest();
    let payloads = fixture.transport.payloads::<Metric>(TelemetryKind::Metrics);
    let_assert!([_, retried] = payloads.as_slice());
    let_assert!([merged] = retried.as_slice());
    check!(merged.stats.count == 2);
}
