//! HTTP layer with retry and exponential backoff.
//!
//! Only a `200 OK` counts as success. Any other status, and any transport
//! failure (connect, timeout, DNS, body decode), is retried until the
//! attempt budget is spent, after which the caller gets a
//! [`ClientError::RetriesExhausted`] and decides what "no data" means.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode, header};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection attempts exhausted after {attempts} attempt(s), last error: {last}")]
    RetriesExhausted { attempts: u32, last: AttemptError },
}

/// Why a single attempt did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait before the attempt following the 1-based `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_wait
            .checked_mul(factor)
            .map_or(self.max_wait, |wait| wait.min(self.max_wait))
    }

    /// Every sleep taken when all attempts fail, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempts()).map(|a| self.delay_after(a)).collect()
    }

    /// Drive `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. There is no sleep after the
    /// final attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match &err {
                AttemptError::Status(code) => log::warn!(
                    "Unexpected HTTP status ({}) on attempt {}/{}: {}",
                    code,
                    attempt,
                    attempts,
                    label
                ),
                AttemptError::Transport(e) => log::error!(
                    "Error on attempt {}/{}: {}: {}",
                    attempt,
                    attempts,
                    label,
                    e
                ),
            }

            if attempt >= attempts {
                log::error!("Connection attempts exhausted: {}", label);
                return Err(ClientError::RetriesExhausted {
                    attempts,
                    last: err,
                });
            }

            let wait = self.delay_after(attempt);
            log::debug!("Retrying {} in {:?}", label, wait);
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

/// A `reqwest::Client` plus retry policy. Clones share the connection pool
/// and cookie jar.
#[derive(Debug, Clone)]
pub struct ResilientClient {
    client: Client,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn get(&self, url: &str) -> Result<String, ClientError> {
        self.request(Method::Get, url, None).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<String, ClientError> {
        self.request(Method::Post, url, Some(form)).await
    }

    /// Send `method` to `url` and return the body of the first `200` response.
    /// `form` is url-encoded into the body of a POST and ignored for a GET.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        form: Option<&[(&str, String)]>,
    ) -> Result<String, ClientError> {
        let label = format!("{} {}", method, url);
        self.policy
            .run(&label, |_| self.attempt(method, url, form))
            .await
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        form: Option<&[(&str, String)]>,
    ) -> Result<String, AttemptError> {
        let builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url).form(form.unwrap_or_default()),
        };

        let response = builder
            .header(header::REFERER, url)
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(AttemptError::Status(response.status().as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))
    }
}
