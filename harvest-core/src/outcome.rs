// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Outcome of sending one harvest payload to the collector.
///
/// This is a closed set: every transport response, including failures to send at all, is
/// classified into one of these before the retention policy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendOutcome {
    /// The collector accepted the payload
    Success,
    /// The collector rejected the payload and it must not be resent
    ExplicitDiscard,
    /// The payload could not be delivered but may be resent next harvest
    Retriable,
    /// The payload was too large. Resend a smaller one if possible
    SizeExceeded,
    /// Unclassified failure
    Unknown,
}

impl SendOutcome {
    /// Classifies an HTTP status code returned by the collector.
    ///
    /// ```
    /// use harvest_core::SendOutcome;
    ///
    /// assert_eq!(SendOutcome::from_http_status(202), SendOutcome::Success);
    /// assert_eq!(SendOutcome::from_http_status(503), SendOutcome::Retriable);
    /// assert_eq!(SendOutcome::from_http_status(413), SendOutcome::SizeExceeded);
    /// assert_eq!(SendOutcome::from_http_status(401), SendOutcome::ExplicitDiscard);
    /// ```
    pub fn from_http_status(status: u16) -> Self {
        match status {
            200..=299 => SendOutcome::Success,
            408 | 429 | 500 | 503 => SendOutcome::Retriable,
            413 => SendOutcome::SizeExceeded,
            400 | 401 | 403 | 404 | 405 | 407 | 409 | 410 | 411 | 414 | 415 | 417 | 431 => {
                SendOutcome::ExplicitDiscard
            }
            _ => SendOutcome::Unknown,
        }
    }

    /// Returns true if the sent items were delivered.
    pub fn is_success(self) -> bool {
        matches!(self, SendOutcome::Success)
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SendOutcome::Success => "success",
            SendOutcome::ExplicitDiscard => "explicit_discard",
            SendOutcome::Retriable => "retriable",
            SendOutcome::SizeExceeded => "size_exceeded",
            SendOutcome::Unknown => "unknown",
        })
    }
}
