//! Outbound HTTP for chain clients: one request in, raw body bytes out.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, StatusCode, header::CONTENT_TYPE};
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

use blocktasks_core::ChainSettings;

use crate::error::ChainError;

/// Bodies longer than this are cut off in debug logs.
const MAX_BODY_LOG_SIZE: usize = 4 * 1024;
const TRUNCATED_MSG: &str = "... [truncated]";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestGateway: Send + Sync {
    /// Send a single request and return the response body.
    ///
    /// Any status other than 200 is an error.
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: String,
    ) -> Result<Vec<u8>, ChainError>;
}

/// [`RequestGateway`] over `reqwest` with optional rate limiting and body logging.
pub struct HttpGateway {
    client: reqwest::Client,
    limiter: Option<RateLimiter>,
    debug: bool,
}

impl HttpGateway {
    /// Must be called from within a Tokio runtime when rate limiting is enabled.
    pub fn new(settings: &ChainSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: &ChainSettings) -> Self {
        Self {
            client,
            limiter: RateLimiter::per_second(settings.rate_limit),
            debug: settings.http_debug,
        }
    }
}

#[async_trait]
impl RequestGateway for HttpGateway {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: String,
    ) -> Result<Vec<u8>, ChainError> {
        if let Some(limiter) = &self.limiter {
            limiter.wait().await;
        }

        let request_id = uuid::Uuid::new_v4();
        let start = Instant::now();

        let mut request = self
            .client
            .request(method.clone(), url)
            .header(CONTENT_TYPE, "application/json");
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let request_body = self.debug.then(|| truncate_body(body.as_bytes()));

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(%request_id, %method, url, error = %e, "request error");
                return Err(e.into());
            }
        };

        let status = response.status();
        let bytes = response.bytes().await?;

        if let Some(request_body) = request_body {
            tracing::debug!(
                %request_id,
                %method,
                url,
                status = status.as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                request_body = %request_body,
                response_body = %truncate_body(&bytes),
                "http request"
            );
        }

        if status != StatusCode::OK {
            return Err(ChainError::Status(status));
        }

        Ok(bytes.to_vec())
    }
}

/// Admits one request per period, no bursts.
struct RateLimiter {
    interval: Mutex<Interval>,
}

impl RateLimiter {
    fn per_second(limit: u32) -> Option<Self> {
        if limit == 0 {
            return None;
        }
        // Above 1e9 per second the period rounds down to zero, which `interval` rejects.
        let period = (Duration::from_secs(1) / limit).max(Duration::from_nanos(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(Self {
            interval: Mutex::new(interval),
        })
    }

    async fn wait(&self) {
        self.interval.lock().await.tick().await;
    }
}

fn truncate_body(body: &[u8]) -> String {
    if body.len() <= MAX_BODY_LOG_SIZE {
        return String::from_utf8_lossy(body).into_owned();
    }
    let mut text = String::from_utf8_lossy(&body[..MAX_BODY_LOG_SIZE]).into_owned();
    text.push_str(TRUNCATED_MSG);
    text
}
