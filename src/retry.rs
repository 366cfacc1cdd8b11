// Copyright (c) 2024 The ocarina project developers
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v. 2.0. If a copy
// of the MPL was not distributed with this file, You can obtain one at
// http://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Retryable-error classification and context-aware backoff.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry attempts after the initial one.
pub const MAX_RETRIES: u32 = 3;

/// Backoff before the first retry; doubles per attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound for the backoff between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Deadline for a single attempt.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Message fragments that mark an error as transient.
///
/// This is a practical heuristic for errors crossing non-typed boundaries
/// (the OS, subprocesses). Errors born inside this crate are classified by
/// kind first.
const RETRYABLE_TOKENS: [&str; 10] = [
    "locked",
    "busy",
    "in use",
    "permission",
    "access",
    "timeout",
    "connection",
    "network",
    "i/o",
    "temporary",
];

/// Returns `true` if the operation that produced this error is worth
/// retrying.
///
/// [`crate::Error::Transient`] is always retryable and
/// [`crate::Error::Canceled`] never is; everything else is classified by
/// scanning the message for the known token list, case-insensitively.
#[must_use]
pub fn is_retryable(error: &crate::Error) -> bool {
    match error {
        crate::Error::Transient(_) => true,
        crate::Error::Canceled => false,
        other => {
            let message = other.to_string().to_lowercase();
            RETRYABLE_TOKENS.iter().any(|token| message.contains(token))
        }
    }
}

/// Run `operation` with retries and exponential backoff.
///
/// The operation gets [`MAX_RETRIES`] retries after the initial attempt,
/// each under a [`ATTEMPT_TIMEOUT`] deadline. Between attempts the runner
/// sleeps [`INITIAL_BACKOFF`] doubled per attempt and capped at
/// [`MAX_BACKOFF`]. Cancellation interrupts both the sleep and the in-flight
/// attempt.
///
/// # Errors
///
/// Returns the last error once the budget is exhausted, the first
/// non-retryable error immediately, or [`crate::Error::Canceled`] when the
/// token fires.
pub async fn retry_with_backoff<T, F, Fut>(
    ctx: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0;
    loop {
        if ctx.is_cancelled() {
            return Err(crate::Error::Canceled);
        }

        let result = tokio::select! {
            () = ctx.cancelled() => return Err(crate::Error::Canceled),
            attempt_result = tokio::time::timeout(ATTEMPT_TIMEOUT, operation()) => {
                attempt_result.unwrap_or_else(|_elapsed| {
                    Err(crate::Error::Transient(format!(
                        "{operation_name}: attempt timed out"
                    )))
                })
            }
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) if attempt < MAX_RETRIES && is_retryable(&error) => {
                attempt += 1;
                log::warn!(
                    "{operation_name} failed (attempt {attempt}/{total}), retrying in {backoff:?}: {error}",
                    total = MAX_RETRIES + 1,
                );
                tokio::select! {
                    () = ctx.cancelled() => return Err(crate::Error::Canceled),
                    () = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(error) => return Err(error),
        }
    }
}
