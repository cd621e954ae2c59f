// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Sending harvested items to the collector

use std::{error::Error, fmt, io, sync::Arc};

use harvest_aggregation::{
    Metric,
    metric::{MetricNameService, rename_for_sending},
};
use harvest_core::SendOutcome;

use crate::TelemetryKind;

/// Context passed along with each payload.
///
/// Opaque to the retention logic. Event payloads usually report `capacity` and
/// `attempts_seen` to the collector so it can extrapolate sampled counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendMetadata {
    /// Kind of the items being sent
    pub kind: TelemetryKind,
    /// Capacity of the reservoir the items came from
    pub capacity: usize,
    /// Number of items seen during the harvest period, including the ones sampled away
    pub attempts_seen: u64,
}

/// Sends one kind of item to the collector.
///
/// Sending is synchronous from the aggregator's point of view: it blocks the harvest of its
/// own kind, never producers. Timeouts and cancellation are the transport's responsibility.
pub trait Transport<I>: Send + Sync {
    /// Sends `items` and classifies the response
    fn send(&self, items: &[I], metadata: &SendMetadata) -> Result<SendOutcome, TransportError>;
}

impl<I, T: Transport<I> + ?Sized> Transport<I> for Arc<T> {
    fn send(&self, items: &[I], metadata: &SendMetadata) -> Result<SendOutcome, TransportError> {
        (**self).send(items, metadata)
    }
}

/// Failure to obtain a response from the collector
#[derive(Debug)]
pub enum TransportError {
    /// Local or network I/O failure
    Connection(io::Error),
    /// The request timed out
    Timeout,
    /// The collector answered with an HTTP status that was not handled by the transport
    Status(u16),
    /// Any other failure
    Other(Box<dyn Error + Send + Sync>),
}

impl TransportError {
    /// Classifies this error for the retention policy.
    ///
    /// Local and network faults can be retried. Anything unclassified is discarded so a
    /// permanent error is never retried forever.
    pub fn outcome(&self) -> SendOutcome {
        match self {
            TransportError::Connection(_) | TransportError::Timeout => SendOutcome::Retriable,
            TransportError::Status(status) => SendOutcome::from_http_status(*status),
            TransportError::Other(_) => SendOutcome::Unknown,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connection(_) => f.write_str("connection to collector failed"),
            TransportError::Timeout => f.write_str("request to collector timed out"),
            TransportError::Status(status) => write!(f, "collector responded with status {status}"),
            TransportError::Other(err) => write!(f, "failed to send to collector: {err}"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Connection(err) => Some(err),
            TransportError::Other(err) => Some(&**err),
            TransportError::Timeout | TransportError::Status(_) => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            TransportError::Timeout
        } else {
            TransportError::Connection(err)
        }
    }
}

/// Wraps a metric transport and rewrites metric names right before sending.
///
/// Names are rewritten after all merging is done, so two metrics that map to the same output
/// name are sent as two entries.
pub struct RenamingTransport<T> {
    inner: T,
    names: Arc<dyn MetricNameService>,
}

impl<T> RenamingTransport<T> {
    /// Wraps `inner`, renaming with `names`
    pub fn new(inner: T, names: Arc<dyn MetricNameService>) -> Self {
        Self { inner, names }
    }
}

impl<T: Transport<Metric>> Transport<Metric> for RenamingTransport<T> {
    fn send(
        &self,
        items: &[Metric],
        metadata: &SendMetadata,
    ) -> Result<SendOutcome, TransportError> {
        let renamed = rename_for_sending(items.to_vec(), &*self.names);
        self.inner.send(&renamed, metadata)
    }
}
