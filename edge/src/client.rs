use crate::reading::Reading;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const SINGLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 256;

/// Positive acknowledgement from the ingestor: the whole request was persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ack {
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeliveryFailure {
    /// Connection, DNS, TLS or timeout failure. The request may or may not
    /// have reached the server.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The ingestor refused the request, but the same payload may succeed
    /// later (5xx, auth, rate limiting).
    #[error("ingestor rejected the request with {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    /// The ingestor refused the payload itself (400, 413, 422). Resending it
    /// unchanged can never succeed.
    #[error("ingestor refused the payload with {status}: {body}")]
    Invalid { status: StatusCode, body: String },

    #[error("refusing to send an empty batch")]
    EmptyBatch,
}

impl DeliveryFailure {
    fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::BAD_REQUEST
            | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::UNPROCESSABLE_ENTITY => Self::Invalid { status, body },
            _ => Self::Rejected { status, body },
        }
    }

    /// Whether keeping the payload for another attempt can help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Invalid { .. } | Self::EmptyBatch)
    }
}

/// Sends readings to the ingestion endpoints. Implementations never retry
/// internally; retry policy belongs to the delivery loop.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send_one(&self, reading: &Reading) -> Result<Ack, DeliveryFailure>;

    /// One request for the whole batch. Failure means none of it is confirmed.
    async fn send_batch(&self, readings: &[Reading]) -> Result<Ack, DeliveryFailure>;
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: Option<String>,
}

pub struct HttpDeliveryClient {
    http: reqwest::Client,
    single_url: String,
    bulk_url: String,
    api_key: String,
    single_timeout: Duration,
    batch_timeout: Duration,
}

impl HttpDeliveryClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, DeliveryFailure> {
        let base = base_url.trim_end_matches('/');
        let http = reqwest::Client::builder()
            .user_agent(concat!("thermo-edge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            single_url: format!("{}/api/temperature/", base),
            bulk_url: format!("{}/api/temperature/bulk", base),
            api_key: api_key.into(),
            single_timeout: SINGLE_TIMEOUT,
            batch_timeout: BATCH_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, single: Duration, batch: Duration) -> Self {
        self.single_timeout = single;
        self.batch_timeout = batch;
        self
    }

    async fn post<B>(&self, url: &str, body: &B, timeout: Duration) -> Result<Ack, DeliveryFailure>
    where
        B: Serialize + ?Sized + Sync,
    {
        let response = self
            .http
            .post(url)
            .header("X-API-Key", &self.api_key)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(DeliveryFailure::from_status(status, body));
        }

        // The status code is the acknowledgement; the body is informational.
        let message = response
            .json::<MessageBody>()
            .await
            .ok()
            .and_then(|b| b.message);
        debug!("Ingestor acknowledged {}: {:?}", url, message);
        Ok(Ack { message })
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn send_one(&self, reading: &Reading) -> Result<Ack, DeliveryFailure> {
        self.post(&self.single_url, reading, self.single_timeout).await
    }

    async fn send_batch(&self, readings: &[Reading]) -> Result<Ack, DeliveryFailure> {
        if readings.is_empty() {
            return Err(DeliveryFailure::EmptyBatch);
        }
        self.post(&self.bulk_url, readings, self.batch_timeout).await
    }
}
