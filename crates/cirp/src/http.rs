//! Blocking HTTP client shared by the GitHub and Travis adapters.
//!
//! Every request is sent through [`cirp_retry::RetryExecutor`]: transient statuses and
//! connection failures are retried with backoff, everything else fails immediately.

use std::time::Duration;

use anyhow::{Context, Result};
use cirp_retry::{ErrorClass, RetryExecutor, RetryStrategyConfig, classify_status};
use reqwest::blocking::{Client, RequestBuilder, Response};
use thiserror::Error;

pub const USER_AGENT: &str = concat!("ci-release-publisher/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in an error message.
const BODY_EXCERPT_LEN: usize = 300;

/// A request that completed with a non-success status.
#[derive(Debug, Error)]
#[error("{what} failed with status {status}: {body}")]
pub struct HttpStatusError {
    pub what: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryExecutor,
}

impl HttpClient {
    pub fn new(timeout: Duration, retry: RetryStrategyConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            retry: RetryExecutor::new(retry),
        })
    }

    /// Send the request produced by `build`, rebuilding it for every attempt.
    ///
    /// Returns the response of the first successful (2xx) attempt.
    pub fn send<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.retry.run_with_classification(|_attempt| {
            match build(&self.client).send() {
                Ok(resp) if resp.status().is_success() => Ok(resp),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().unwrap_or_default();
                    let err = HttpStatusError {
                        what: what.to_string(),
                        status,
                        body: excerpt(&body),
                    };
                    Err((anyhow::Error::new(err), classify_status(status)))
                }
                Err(e) => {
                    let class = if e.is_timeout() || e.is_connect() || e.is_request() {
                        ErrorClass::Retryable
                    } else {
                        ErrorClass::Permanent
                    };
                    Err((anyhow::Error::new(e).context(format!("{what} failed")), class))
                }
            }
        })
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
