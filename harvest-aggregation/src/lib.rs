// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod metric;
mod priority;
mod reservoir;
mod sampled;
mod top_k;

pub use metric::{Metric, MetricReservoir, MetricStatsCollection};
pub use priority::PriorityReservoir;
pub use reservoir::{Harvest, Reservoir};
pub use sampled::{DefaultRng, SampledReservoir};
pub use top_k::TopKReservoir;
