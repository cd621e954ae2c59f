// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle notifications and the host that fans them out to aggregators
//!
//! Events are published on a [`LifecycleBus`], a channel drained by the [`AggregatorHost`]
//! thread. Publishing never blocks on aggregators unless the publisher explicitly waits for
//! the event to be processed.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread,
};

use tokio::sync::oneshot;

use crate::{ConfigHandle, Configuration, TelemetryKind};

/// Lifecycle notifications
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A new configuration snapshot is available
    ConfigurationUpdated(Arc<Configuration>),
    /// The agent connected to the collector; harvests can be scheduled
    AgentConnected,
    /// The process is shutting down cleanly
    PreCleanShutdown,
}

/// Receives lifecycle notifications. Implemented by every
/// [`Aggregator`](crate::Aggregator).
pub trait LifecycleListener: Send + Sync {
    /// The kind handled by this listener
    fn kind(&self) -> TelemetryKind;
    /// Schedule harvests
    fn on_agent_connected(&self);
    /// Accept a newer configuration
    fn on_configuration_updated(&self, config: &Arc<Configuration>);
    /// Stop harvesting and flush if configured to
    fn on_pre_clean_shutdown(&self);
}

enum HostMessage {
    Event(LifecycleEvent),
    Barrier(oneshot::Sender<()>),
    Stop,
}

/// Owns the process-wide configuration and drives every registered aggregator through
/// lifecycle events.
pub struct AggregatorHost {
    config: ConfigHandle,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl AggregatorHost {
    /// Creates a host publishing configuration updates to `config`
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            listeners: Vec::new(),
        }
    }

    /// Adds a listener
    pub fn register(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    /// Adds many listeners
    pub fn register_all(
        &mut self,
        listeners: impl IntoIterator<Item = Arc<dyn LifecycleListener>>,
    ) {
        self.listeners.extend(listeners);
    }

    /// The process-wide configuration handle
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Handles one event on the calling thread.
    ///
    /// A configuration update that is not newer than the current one is ignored. A listener
    /// that panics is logged and does not stop the others.
    pub fn dispatch(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::ConfigurationUpdated(config) => {
                if !self.config.replace(config.clone()) {
                    tracing::debug!(
                        version = config.version(),
                        "ignoring configuration that is not newer"
                    );
                    return;
                }
                tracing::info!(version = config.version(), "configuration updated");
                self.for_each(|listener| listener.on_configuration_updated(config));
            }
            LifecycleEvent::AgentConnected => {
                tracing::info!("agent connected, scheduling harvests");
                self.for_each(|listener| listener.on_agent_connected());
            }
            LifecycleEvent::PreCleanShutdown => {
                tracing::info!("clean shutdown, stopping harvests");
                self.for_each(|listener| listener.on_pre_clean_shutdown());
            }
        }
    }

    fn for_each(&self, f: impl Fn(&dyn LifecycleListener)) {
        for listener in &self.listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| f(&**listener))).is_err() {
                tracing::error!(kind = %listener.kind(), "lifecycle listener panicked");
            }
        }
    }

    /// Moves the host to a background thread draining a new [`LifecycleBus`].
    ///
    /// The thread stops when the returned [`HostJoinHandle`] is dropped, after handling every
    /// event published before that.
    pub fn spawn(self) -> std::io::Result<(LifecycleBus, HostJoinHandle)> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("harvest-lifecycle".into())
            .spawn(move || self.run(receiver))?;
        Ok((
            LifecycleBus {
                sender: sender.clone(),
            },
            HostJoinHandle {
                sender,
                handle: Some(handle),
            },
        ))
    }

    fn run(self, receiver: Receiver<HostMessage>) {
        let span = tracing::info_span!("aggregator_host", aggregators = self.listeners.len());
        let _enter = span.enter();
        while let Ok(message) = receiver.recv() {
            match message {
                HostMessage::Event(event) => self.dispatch(&event),
                HostMessage::Barrier(done) => {
                    let _ = done.send(());
                }
                HostMessage::Stop => break,
            }
        }
        tracing::debug!("aggregator host stopped");
    }
}

/// Publishes lifecycle events to a running [`AggregatorHost`]. Cheap to clone.
#[derive(Clone)]
pub struct LifecycleBus {
    sender: Sender<HostMessage>,
}

impl LifecycleBus {
    /// Publishes `event` without waiting. Returns false if the host has stopped.
    pub fn publish(&self, event: LifecycleEvent) -> bool {
        self.sender.send(HostMessage::Event(event)).is_ok()
    }

    /// Publishes `event` and blocks until the host has handled it.
    ///
    /// Returns false if the host stopped first. Must not be called from an async context.
    pub fn publish_and_wait(&self, event: LifecycleEvent) -> bool {
        match self.barrier(event) {
            Some(done) => done.blocking_recv().is_ok(),
            None => false,
        }
    }

    /// Publishes `event` and waits until the host has handled it
    pub async fn publish_and_wait_async(&self, event: LifecycleEvent) -> bool {
        match self.barrier(event) {
            Some(done) => done.await.is_ok(),
            None => false,
        }
    }

    /// Runs the clean shutdown sequence and waits for every final flush
    pub fn shutdown(&self) -> bool {
        self.publish_and_wait(LifecycleEvent::PreCleanShutdown)
    }

    fn barrier(&self, event: LifecycleEvent) -> Option<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(HostMessage::Event(event)).ok()?;
        self.sender.send(HostMessage::Barrier(tx)).ok()?;
        Some(rx)
    }
}

/// Stops the host thread when dropped
#[must_use = "dropping the handle stops the aggregator host"]
pub struct HostJoinHandle {
    sender: Sender<HostMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

impl HostJoinHandle {
    /// Drop the handle but let the host thread keep running until every [`LifecycleBus`] is
    /// gone.
    pub fn forget(mut self) {
        self.handle = None;
    }

    /// Alias for `drop(handle)`. Handles every event already published, then stops the host.
    pub fn shut_down(self) {}
}

impl Drop for HostJoinHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(HostMessage::Stop);
            if handle.join().is_err() {
                tracing::error!("aggregator host thread panicked");
            }
        }
    }
}
