// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Item shapes for every [`TelemetryKind`](crate::TelemetryKind)
//!
//! Payload fields are plain data; only the priority, the key and the statistics matter to the
//! reservoirs. Metrics use [`Metric`](harvest_aggregation::Metric).

use std::time::{Duration, SystemTime};

use harvest_core::{Keyed, Merge, MetricStats, Prioritized, Ranked};
use ordered_float::OrderedFloat;

/// A user or agent supplied attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String value
    String(String),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Attributes attached to an item
pub type Attributes = ahash::HashMap<String, AttributeValue>;

macro_rules! with_attribute {
    ($ty:ty) => {
        impl $ty {
            /// Adds an attribute, replacing any previous value with the same key
            pub fn with_attribute(
                mut self,
                key: impl Into<String>,
                value: impl Into<AttributeValue>,
            ) -> Self {
                self.attributes.insert(key.into(), value.into());
                self
            }
        }
    };
}

/// An application-defined event
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    /// Event type name
    pub event_type: String,
    /// When the event was recorded
    pub timestamp: SystemTime,
    /// Event attributes
    pub attributes: Attributes,
}

impl CustomEvent {
    /// Creates an event of `event_type` stamped with the current time
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: SystemTime::now(),
            attributes: Attributes::default(),
        }
    }
}

with_attribute!(CustomEvent);

/// Summary of one reported error
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    /// Error type
    pub error_class: String,
    /// Error message
    pub message: String,
    /// Transaction the error happened in, if any
    pub transaction_name: Option<String>,
    /// When the error was recorded
    pub timestamp: SystemTime,
    /// Event attributes
    pub attributes: Attributes,
}

impl ErrorEvent {
    /// Creates an error event stamped with the current time
    pub fn new(error_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_class: error_class.into(),
            message: message.into(),
            transaction_name: None,
            timestamp: SystemTime::now(),
            attributes: Attributes::default(),
        }
    }
}

with_attribute!(ErrorEvent);

/// Full detail of one reported error
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorTrace {
    /// Error type
    pub error_class: String,
    /// Error message
    pub message: String,
    /// Transaction the error happened in
    pub transaction_name: String,
    /// Captured stack frames, innermost first
    pub stack_trace: Vec<String>,
    /// When the error was recorded
    pub timestamp: SystemTime,
    /// Trace attributes
    pub attributes: Attributes,
}

impl ErrorTrace {
    /// Creates an error trace without stack frames
    pub fn new(
        transaction_name: impl Into<String>,
        error_class: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_class: error_class.into(),
            message: message.into(),
            transaction_name: transaction_name.into(),
            stack_trace: Vec::new(),
            timestamp: SystemTime::now(),
            attributes: Attributes::default(),
        }
    }
}

with_attribute!(ErrorTrace);

/// One application log record
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// Sampling priority, higher is kept first
    pub priority: f32,
    /// Log level
    pub level: String,
    /// Log message
    pub message: String,
    /// When the record was written
    pub timestamp: SystemTime,
    /// Distributed trace id, if the record was written inside a trace
    pub trace_id: Option<String>,
    /// Span id, if the record was written inside a span
    pub span_id: Option<String>,
}

impl LogEvent {
    /// Creates a record stamped with the current time
    pub fn new(level: impl Into<String>, message: impl Into<String>, priority: f32) -> Self {
        Self {
            priority,
            level: level.into(),
            message: message.into(),
            timestamp: SystemTime::now(),
            trace_id: None,
            span_id: None,
        }
    }
}

impl Prioritized for LogEvent {
    fn priority(&self) -> f32 {
        self.priority
    }
}

/// Summary of one completed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEvent {
    /// Sampling priority, higher is kept first
    pub priority: f32,
    /// Transaction name
    pub name: String,
    /// Response time
    pub duration: Duration,
    /// When the transaction started
    pub timestamp: SystemTime,
    /// Event attributes
    pub attributes: Attributes,
}

impl TransactionEvent {
    /// Creates an event stamped with the current time
    pub fn new(name: impl Into<String>, duration: Duration, priority: f32) -> Self {
        Self {
            priority,
            name: name.into(),
            duration,
            timestamp: SystemTime::now(),
            attributes: Attributes::default(),
        }
    }
}

with_attribute!(TransactionEvent);

impl Prioritized for TransactionEvent {
    fn priority(&self) -> f32 {
        self.priority
    }
}

/// Full detail of one slow transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTrace {
    /// Transaction name
    pub transaction_name: String,
    /// Request URI
    pub uri: String,
    /// Response time
    pub duration: Duration,
    /// When the transaction started
    pub start_time: SystemTime,
    /// Serialized segment tree, opaque to the engine
    pub trace_data: String,
}

impl TransactionTrace {
    /// Creates a trace stamped with the current time
    pub fn new(transaction_name: impl Into<String>, duration: Duration) -> Self {
        Self {
            transaction_name: transaction_name.into(),
            uri: String::new(),
            duration,
            start_time: SystemTime::now(),
            trace_data: String::new(),
        }
    }
}

/// A slow SQL statement, aggregated by statement id.
///
/// Merging two traces of the same statement merges the statistics and keeps the descriptive
/// fields of the first one seen.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlTrace {
    /// Statement id, the aggregation key
    pub sql_id: u64,
    /// Transaction the statement was first seen in
    pub transaction_name: String,
    /// Request URI the statement was first seen in
    pub uri: String,
    /// Obfuscated statement text
    pub sql: String,
    /// Datastore metric the statement is reported under
    pub datastore_metric_name: String,
    /// Call statistics
    pub stats: MetricStats,
    /// Example query parameters from the first trace
    pub parameters: Attributes,
}

impl SqlTrace {
    /// Creates a trace for a single call of `sql`
    pub fn new(sql_id: u64, sql: impl Into<String>, call_time: Duration) -> Self {
        Self {
            sql_id,
            transaction_name: String::new(),
            uri: String::new(),
            sql: sql.into(),
            datastore_metric_name: String::new(),
            stats: MetricStats::timing(call_time, call_time),
            parameters: Attributes::default(),
        }
    }

    /// Slowest call
    pub fn max_call_time(&self) -> Duration {
        Duration::from_secs_f64(self.stats.max)
    }

    /// Fastest call
    pub fn min_call_time(&self) -> Duration {
        Duration::from_secs_f64(self.stats.min)
    }

    /// Sum of all call times
    pub fn total_call_time(&self) -> Duration {
        Duration::from_secs_f64(self.stats.total)
    }
}

impl Keyed for SqlTrace {
    type Key = u64;

    fn key(&self) -> u64 {
        self.sql_id
    }
}

impl Merge for SqlTrace {
    fn merge(&mut self, other: Self) {
        self.stats.merge_from(&other.stats);
    }
}

impl Ranked for SqlTrace {
    type Rank = OrderedFloat<f64>;

    fn rank(&self) -> OrderedFloat<f64> {
        OrderedFloat(self.stats.max)
    }
}
