// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Recurring harvest ticks

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_utils::sync::{Parker, Unparker};
use enum_map::EnumMap;

use crate::TelemetryKind;

/// Callback run on every tick
pub type HarvestTask = Arc<dyn Fn() + Send + Sync>;

/// Fires harvest ticks.
///
/// Implementations must not run a kind's task again before the previous run returned. Tasks
/// of different kinds may run in parallel.
pub trait Scheduler: Send + Sync {
    /// Runs `task` every `interval`, first after `initial_delay` (or `interval` if `None`).
    ///
    /// Replaces any task previously registered for `kind`.
    fn execute_every(
        &self,
        kind: TelemetryKind,
        task: HarvestTask,
        interval: Duration,
        initial_delay: Option<Duration>,
    );

    /// Stops running the task registered for `kind`, if any
    fn stop_executing(&self, kind: TelemetryKind);
}

/// [`Scheduler`] running each registered task on its own thread.
///
/// A task that panics is logged and runs again on its next tick. Registering a kind again
/// signals the previous thread to stop without waiting for it; the new thread holds off its
/// first run until the previous one returned. Dropping the scheduler stops and joins every
/// thread.
#[derive(Default)]
pub struct ThreadScheduler {
    tasks: Mutex<Tasks>,
}

#[derive(Default)]
struct Tasks {
    running: EnumMap<TelemetryKind, Option<ScheduledThread>>,
    // replaced threads, signalled to stop but possibly still finishing a tick
    retired: Vec<thread::JoinHandle<()>>,
    tick_locks: EnumMap<TelemetryKind, Arc<Mutex<()>>>,
}

struct ScheduledThread {
    stop: Arc<AtomicBool>,
    unparker: Unparker,
    handle: thread::JoinHandle<()>,
}

impl ScheduledThread {
    fn spawn(
        kind: TelemetryKind,
        task: HarvestTask,
        schedule: Schedule,
        tick_lock: Arc<Mutex<()>>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("harvest-{kind}"))
                .spawn(move || run_every(kind, &*task, schedule, &tick_lock, &parker, &stop))?
        };
        Ok(Self {
            stop,
            unparker,
            handle,
        })
    }

    fn retire(self) -> thread::JoinHandle<()> {
        self.stop.store(true, Ordering::Release);
        self.unparker.unpark();
        self.handle
    }

    fn stop(self) {
        join(self.retire());
    }
}

fn join(handle: thread::JoinHandle<()>) {
    // a task that stops its own schedule cannot wait for itself
    if handle.thread().id() != thread::current().id() && handle.join().is_err() {
        tracing::error!("harvest scheduler thread panicked");
    }
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    interval: Duration,
    initial_delay: Duration,
}

fn run_every(
    kind: TelemetryKind,
    task: &(dyn Fn() + Send + Sync),
    schedule: Schedule,
    tick_lock: &Mutex<()>,
    parker: &Parker,
    stop: &AtomicBool,
) {
    let span = tracing::info_span!("harvest_scheduler", %kind);
    let _enter = span.enter();
    let Schedule {
        interval,
        initial_delay,
    } = schedule;
    tracing::debug!(?interval, ?initial_delay, "harvest schedule started");

    // `None` is a deadline too far away to represent, parked until stopped
    let mut next = deadline_after(Instant::now(), initial_delay);
    loop {
        match next {
            Some(deadline) => parker.park_deadline(deadline),
            None => parker.park(),
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Some(deadline) = next else {
            continue;
        };
        if Instant::now() < deadline {
            continue;
        }
        {
            let _running = tick_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if stop.load(Ordering::Acquire) {
                break;
            }
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("harvest task panicked, will run again on the next tick");
            }
        }
        let now = Instant::now();
        next = match deadline_after(deadline, interval) {
            // skip ticks missed while the task was running
            Some(next) if next <= now => deadline_after(now, interval),
            next => next,
        };
    }
    tracing::debug!("harvest schedule stopped");
}

fn deadline_after(start: Instant, delay: Duration) -> Option<Instant> {
    let deadline = start.checked_add(delay);
    if deadline.is_none() {
        tracing::warn!(?delay, "harvest delay out of range, no further ticks will run");
    }
    deadline
}

impl ThreadScheduler {
    /// Creates a scheduler with no tasks
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if a task is registered for `kind`
    pub fn is_scheduled(&self, kind: TelemetryKind) -> bool {
        self.tasks().running[kind].is_some()
    }
}

impl Scheduler for ThreadScheduler {
    fn execute_every(
        &self,
        kind: TelemetryKind,
        task: HarvestTask,
        interval: Duration,
        initial_delay: Option<Duration>,
    ) {
        let schedule = Schedule {
            interval,
            initial_delay: initial_delay.unwrap_or(interval),
        };
        let mut tasks = self.tasks();
        tasks.retired.retain(|handle| !handle.is_finished());
        if let Some(previous) = tasks.running[kind].take() {
            let handle = previous.retire();
            tasks.retired.push(handle);
        }
        let tick_lock = tasks.tick_locks[kind].clone();
        match ScheduledThread::spawn(kind, task, schedule, tick_lock) {
            Ok(scheduled) => {
                tracing::info!(%kind, ?interval, "scheduled harvest");
                tasks.running[kind] = Some(scheduled);
            }
            Err(error) => {
                tracing::error!(%kind, %error, "failed to spawn harvest thread");
            }
        }
    }

    fn stop_executing(&self, kind: TelemetryKind) {
        tracing::info!(%kind, "stopped harvest");
        let previous = self.tasks().running[kind].take();
        if let Some(previous) = previous {
            previous.stop();
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        let tasks = std::mem::take(&mut *self.tasks());
        for (_, scheduled) in tasks.running {
            if let Some(scheduled) = scheduled {
                scheduled.stop();
            }
        }
        for handle in tasks.retired {
            join(handle);
        }
    }
}
