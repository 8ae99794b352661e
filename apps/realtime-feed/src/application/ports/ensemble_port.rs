//! Ensemble Source Port (Driven Port)
//!
//! Interface for fetching simulated path ensembles from the analytics
//! backend.

use async_trait::async_trait;

use crate::domain::series::EnsembleInput;

/// Ensemble fetch error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnsembleSourceError {
    /// Request could not be sent or the connection failed.
    #[error("ensemble request failed: {0}")]
    Request(String),
    /// Backend answered with a non-success status.
    #[error("ensemble backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// Response body did not match the ensemble shape.
    #[error("invalid ensemble payload: {0}")]
    Decode(String),
}

/// Port for fetching path ensembles.
#[async_trait]
pub trait EnsembleSource: Send + Sync {
    /// Fetch one ensemble of `simulations` paths.
    async fn fetch(&self, simulations: u32) -> Result<EnsembleInput, EnsembleSourceError>;
}

/// Source that always returns the same ensemble.
#[derive(Debug, Clone, Default)]
pub struct StaticEnsembleSource {
    input: EnsembleInput,
}

impl StaticEnsembleSource {
    /// Serve `input` on every fetch.
    #[must_use]
    pub const fn new(input: EnsembleInput) -> Self {
        Self { input }
    }
}

#[async_trait]
impl EnsembleSource for StaticEnsembleSource {
    async fn fetch(&self, _simulations: u32) -> Result<EnsembleInput, EnsembleSourceError> {
        Ok(self.input.clone())
    }
}
