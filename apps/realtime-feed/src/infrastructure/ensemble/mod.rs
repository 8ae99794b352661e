//! Monte Carlo Ensemble Client
//!
//! `EnsembleSource` over the analytics backend's HTTP API:
//! `POST {base}/montecarlo` with `{"simulations": n}` returns
//! `{"paths": [[...]], "time_steps": [...]}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::application::ports::{EnsembleSource, EnsembleSourceError};
use crate::domain::series::EnsembleInput;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in `EnsembleSourceError::Status`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct MonteCarloRequest {
    simulations: u32,
}

/// HTTP client for the analytics backend.
#[derive(Debug, Clone)]
pub struct MonteCarloClient {
    client: Client,
    base_url: String,
}

impl MonteCarloClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `EnsembleSourceError::Request` if the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnsembleSourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnsembleSourceError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/montecarlo", self.base_url)
    }
}

#[async_trait]
impl EnsembleSource for MonteCarloClient {
    async fn fetch(&self, simulations: u32) -> Result<EnsembleInput, EnsembleSourceError> {
        let url = self.endpoint();
        tracing::debug!(url = %url, simulations, "Requesting ensemble");

        let response = self
            .client
            .post(&url)
            .json(&MonteCarloRequest { simulations })
            .send()
            .await
            .map_err(|e| EnsembleSourceError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EnsembleSourceError::Request(e.to_string()))?;

        if !status.is_success() {
            let body: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(EnsembleSourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&text).map_err(|e| EnsembleSourceError::Decode(e.to_string()))
    }
}
