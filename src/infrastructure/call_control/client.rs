//! Delivers messages into live calls through their control URL

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};

use crate::domain::conversation::{ControlMessage, MessageDelivery};
use crate::domain::DomainError;

/// Posts control messages to the voice platform
#[derive(Debug, Clone)]
pub struct CallControlClient {
    http_client: Client,
}

impl CallControlClient {
    pub fn new(timeout: Duration) -> Result<Self, DomainError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl MessageDelivery for CallControlClient {
    async fn deliver(&self, control_url: &str, message: &ControlMessage) -> Result<(), DomainError> {
        let started = Instant::now();

        let response = self
            .http_client
            .post(control_url)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                let error = if e.is_timeout() {
                    "Request timed out".to_string()
                } else if e.is_connect() {
                    "Connection failed".to_string()
                } else {
                    format!("Request failed: {}", e)
                };
                warn!(error = %error, "Call control delivery failed");
                DomainError::provider("call_control", error)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect();

            warn!(status = status.as_u16(), "Call control delivery rejected");
            return Err(DomainError::provider(
                "call_control",
                format!("HTTP {}: {}", status, body),
            ));
        }

        info!(
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Call control message delivered"
        );

        Ok(())
    }
}
