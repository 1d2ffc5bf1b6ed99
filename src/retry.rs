//! Support utilities for [`keen_retry`]'s retry API.
//!
//! Collaborator clients return [`RetryResult`] values so that callers can tell
//! "try again later" apart from "this will never work".

use std::{ops::RangeInclusive, time::Duration};

use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use reqwest::StatusCode;

use crate::prelude::*;

/// A [`RetryResult`] for collaborator requests, with no retry input.
pub type ClientRetryResult<T> = RetryResult<(), (), T, anyhow::Error>;

/// On error, return either a [`RetryResult::Transient`] or [`RetryResult::Fatal`]
/// value, depending on the return value of [`IsKnownTransient::is_known_transient`].
macro_rules! try_potentially_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) if $crate::retry::IsKnownTransient::is_known_transient(&error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

/// On error, return a [`RetryResult::Fatal`] value.
macro_rules! try_fatal {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

pub(crate) use {try_fatal, try_potentially_transient};

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build an [`RetryResult::Transient`] value.
pub(crate) fn retry_result_transient<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Transient { input: (), error }
}

/// Build an [`RetryResult::Fatal`] value.
pub(crate) fn retry_result_fatal<T, E>(error: E) -> RetryResult<(), (), T, E> {
    RetryResult::Fatal { input: (), error }
}

/// How long a single HTTP request may take, from connecting to reading the
/// last byte of the body.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long we wait to establish a connection.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build an HTTP client whose requests can't hang forever. Timeouts surface
/// as `reqwest` errors with [`reqwest::Error::is_timeout`] set.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .context("cannot build HTTP client")
}

/// How hard should we retry idempotent requests?
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Backoff range, in milliseconds.
    pub backoff_range_millis: RangeInclusive<u32>,

    /// How many times should we try again after the first attempt?
    pub re_attempts: u8,
}

impl RetryPolicy {
    /// A short policy for calls made inside a single pipeline run.
    pub fn short() -> Self {
        Self {
            backoff_range_millis: 250..=8_000,
            re_attempts: 3,
        }
    }

    /// Never try again.
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            backoff_range_millis: 1..=1,
            re_attempts: 0,
        }
    }
}

/// Run `op`, retrying transient failures according to `policy`, and flatten
/// the outcome into a plain [`Result`].
///
/// `what` names the operation in log messages.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ClientRetryResult<T>>,
{
    if policy.re_attempts == 0 {
        return match op().await {
            RetryResult::Ok { output, .. } => Ok(output),
            RetryResult::Transient { error, .. } | RetryResult::Fatal { error, .. } => {
                Err(error)
            }
        };
    }

    let jitter = ExponentialJitter::FromBackoffRange {
        backoff_range_millis: policy.backoff_range_millis.clone(),
        re_attempts: policy.re_attempts,
        jitter_ratio: 0.2,
    };
    let result = op()
        .await
        .retry_with_async(|_| op())
        .with_exponential_jitter(|| jitter)
        .await
        .inspect_recovered(|_, _, retry_errors_list| {
            warn!(
                "{what} succeeded after retrying {} times (failed attempts: [{}])",
                retry_errors_list.len(),
                keen_retry::loggable_retry_errors(retry_errors_list)
            )
        })
        .inspect_given_up(|_, retry_errors_list, fatal_error| {
            error!(
                "{what} FAILED after exhausting all {} retrying attempts with error {fatal_error:?}",
                retry_errors_list.len(),
            )
        });
    match result {
        ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
            Ok(output)
        }
        ResolvedResult::Fatal { error, .. } => Err(error),
        ResolvedResult::GivenUp { fatal_error, .. }
        | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
    }
}

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they're been observed
/// in the wild, investigated and determined to be transient. The prevents us
/// from doing large numbers of retries with exponential backoff on errors that
/// will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            status.is_known_transient()
        } else {
            // Connection resets, DNS hiccups and timeouts all land here, and
            // `reqwest` doesn't expose enough detail to separate them.
            self.is_timeout() || self.is_connect() || self.is_request()
        }
    }
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}
