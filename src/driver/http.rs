//! HTTP driver for API test cases
//!
//! Sends case requests with `reqwest` and reports status, headers and body.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{ApiDriver, ApiRequest, ApiResponse, DriverError};

/// `reqwest`-backed [`ApiDriver`]
#[derive(Clone)]
pub struct HttpApiDriver {
    client: Client,
    timeout_secs: u64,
}

impl HttpApiDriver {
    /// Create a driver with a per-request timeout
    pub fn with_timeout(timeout_secs: u64, accept_invalid_certs: bool) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> DriverError {
        if e.is_timeout() {
            DriverError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            DriverError::ConnectionRefused(url.to_string())
        } else {
            DriverError::RequestFailed(e.to_string())
        }
    }
}

#[async_trait]
impl ApiDriver for HttpApiDriver {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, DriverError> {
        debug!("Sending {} request to {}", request.method, request.url);

        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| DriverError::RequestFailed(e.to_string()))?;

        let mut req_builder = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let start = Instant::now();

        let response = req_builder
            .send()
            .await
            .map_err(|e| self.map_error(&request.url, e))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| DriverError::RequestFailed(format!("Failed to read response body: {e}")))?;

        debug!(
            "Response: {} {} in {}ms",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            duration_ms
        );

        Ok(ApiResponse {
            status_code: status.as_u16(),
            headers,
            body,
            duration_ms,
        })
    }
}
