// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod metric_name;
mod outcome;
pub mod retention;
mod stats;
pub mod traits;

pub use metric_name::MetricName;
pub use outcome::SendOutcome;
pub use stats::MetricStats;
pub use traits::{Keyed, Merge, Prioritized, Ranked};
