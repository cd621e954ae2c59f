// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decides which sent items are kept for the next harvest.
//!
//! | Outcome | Surviving items |
//! |---|---|
//! | [`Success`](SendOutcome::Success) | none |
//! | [`ExplicitDiscard`](SendOutcome::ExplicitDiscard) | none |
//! | [`Retriable`](SendOutcome::Retriable) | all of them, unchanged |
//! | [`SizeExceeded`](SendOutcome::SizeExceeded) | the more important half, none for one item |
//! | [`Unknown`](SendOutcome::Unknown) | none |

use std::cmp::Ordering;

use crate::SendOutcome;

/// Returns the items that survive a send with the given `outcome`.
///
/// `order` ranks items by ascending importance. For [`SendOutcome::SizeExceeded`] the items
/// are stably sorted with it and the lower half is dropped, so `len / 2` items remain. Items
/// that compare equal keep their relative order, which means the earlier ones are dropped.
///
/// ```
/// use harvest_core::{SendOutcome, retention::reconcile};
///
/// let kept = reconcile(vec![0.3_f64, 0.1, 0.7, 0.5], SendOutcome::SizeExceeded, |a, b| {
///     a.total_cmp(b)
/// });
/// assert_eq!(kept, vec![0.5, 0.7]);
/// ```
pub fn reconcile<T>(
    mut sent: Vec<T>,
    outcome: SendOutcome,
    order: impl FnMut(&T, &T) -> Ordering,
) -> Vec<T> {
    match outcome {
        SendOutcome::Retriable => sent,
        SendOutcome::SizeExceeded if sent.len() > 1 => {
            sent.sort_by(order);
            let dropped = sent.len() - sent.len() / 2;
            sent.split_off(dropped)
        }
        SendOutcome::Success
        | SendOutcome::ExplicitDiscard
        | SendOutcome::SizeExceeded
        | SendOutcome::Unknown => Vec::new(),
    }
}
