//! Ensemble Refresh Service
//!
//! Pulls path ensembles from an [`EnsembleSource`] and folds each into a
//! [`BandSeries`]. A failed fetch or a malformed ensemble leaves the
//! previous bands in place.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EnsembleSource, EnsembleSourceError};
use crate::domain::series::{BandSeries, EnsembleError, PercentileBand};
use crate::infrastructure::metrics;

/// Shortest period accepted by [`EnsembleService::run`].
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// Ensemble refresh errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnsembleRefreshError {
    /// Fetch failed.
    #[error(transparent)]
    Source(#[from] EnsembleSourceError),
    /// Payload violated the ensemble contract.
    #[error(transparent)]
    Shape(#[from] EnsembleError),
}

#[derive(Debug, Default)]
struct RefreshState {
    series: BandSeries,
    source_failures: u64,
}

/// Keeps the latest percentile bands for one ensemble feed.
pub struct EnsembleService {
    source: Arc<dyn EnsembleSource>,
    simulations: u32,
    state: Mutex<RefreshState>,
}

impl std::fmt::Debug for EnsembleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsembleService")
            .field("simulations", &self.simulations)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl EnsembleService {
    /// Create a service requesting `simulations` paths per refresh.
    #[must_use]
    pub fn new(source: Arc<dyn EnsembleSource>, simulations: u32) -> Self {
        Self {
            source,
            simulations,
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// Fetch one ensemble and recompute the bands.
    ///
    /// # Errors
    ///
    /// Returns `EnsembleRefreshError` if the fetch fails or the ensemble is
    /// malformed; the previous bands are kept either way.
    pub async fn refresh(&self) -> Result<Vec<PercentileBand>, EnsembleRefreshError> {
        let input = match self.source.fetch(self.simulations).await {
            Ok(input) => input,
            Err(e) => {
                self.state.lock().source_failures += 1;
                metrics::record_ensemble_refresh(false);
                return Err(e.into());
            }
        };

        let outcome = self
            .state
            .lock()
            .series
            .refresh(input)
            .map(<[PercentileBand]>::to_vec);
        metrics::record_ensemble_refresh(outcome.is_ok());
        if let Ok(bands) = &outcome {
            tracing::debug!(steps = bands.len(), "Ensemble bands refreshed");
        }
        outcome.map_err(Into::into)
    }

    /// Refresh every `interval` until cancelled, logging failures.
    ///
    /// The first refresh is immediate. Intervals below
    /// [`MIN_REFRESH_INTERVAL`] are raised to it.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(MIN_REFRESH_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!(error = %e, "Ensemble refresh failed, keeping previous bands");
                    }
                }
            }
        }
        tracing::debug!("Ensemble refresh stopped");
    }

    /// Latest bands; empty before the first successful refresh.
    #[must_use]
    pub fn bands(&self) -> Vec<PercentileBand> {
        self.state.lock().series.bands().to_vec()
    }

    /// Successful refreshes.
    #[must_use]
    pub fn refreshes(&self) -> u64 {
        self.state.lock().series.refreshes()
    }

    /// Failed refreshes, fetch and shape failures alike.
    #[must_use]
    pub fn failures(&self) -> u64 {
        let state = self.state.lock();
        state.series.failures() + state.source_failures
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::StaticEnsembleSource;
    use crate::domain::series::EnsembleInput;

    struct ScriptedSource {
        responses: Mutex<Vec<Result<EnsembleInput, EnsembleSourceError>>>,
    }

    #[async_trait]
    impl EnsembleSource for ScriptedSource {
        async fn fetch(&self, _simulations: u32) -> Result<EnsembleInput, EnsembleSourceError> {
            self.responses.lock().remove(0)
        }
    }

    fn input(paths: Vec<Vec<f64>>) -> EnsembleInput {
        EnsembleInput {
            paths,
            time_steps: None,
        }
    }

    #[tokio::test]
    async fn refresh_computes_bands() {
        let source = StaticEnsembleSource::new(input(vec![
            vec![1.0],
            vec![2.0],
            vec![3.0],
            vec![4.0],
            vec![5.0],
        ]));
        let service = EnsembleService::new(Arc::new(source), 5);

        let bands = service.refresh().await.unwrap();

        assert_eq!(bands.len(), 1);
        assert_eq!((bands[0].p05, bands[0].p50, bands[0].p95), (1.0, 3.0, 5.0));
        assert_eq!(service.bands(), bands);
        assert_eq!(service.refreshes(), 1);
    }

    #[tokio::test]
    async fn failures_keep_previous_bands() {
        let source = ScriptedSource {
            responses: Mutex::new(vec![
                Ok(input(vec![vec![1.0, 2.0]])),
                Err(EnsembleSourceError::Request("connection refused".to_string())),
                Ok(input(vec![vec![1.0, 2.0], vec![3.0]])),
            ]),
        };
        let service = EnsembleService::new(Arc::new(source), 2);

        let first = service.refresh().await.unwrap();
        assert!(matches!(
            service.refresh().await,
            Err(EnsembleRefreshError::Source(_))
        ));
        assert!(matches!(
            service.refresh().await,
            Err(EnsembleRefreshError::Shape(EnsembleError::RaggedPath { .. }))
        ));

        assert_eq!(service.bands(), first);
        assert_eq!(service.refreshes(), 1);
        assert_eq!(service.failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_refreshes_on_interval_until_cancelled() {
        let source = StaticEnsembleSource::new(input(vec![vec![1.0], vec![2.0]]));
        let service = Arc::new(EnsembleService::new(Arc::new(source), 2));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Arc::clone(&service).run(Duration::from_secs(10), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(service.refreshes(), 3);

        cancel.cancel();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(service.refreshes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_zero_interval_does_not_panic() {
        let source = StaticEnsembleSource::new(input(vec![vec![1.0]]));
        let service = Arc::new(EnsembleService::new(Arc::new(source), 1));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Arc::clone(&service).run(Duration::ZERO, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        assert!(task.await.is_ok());
        assert!(service.refreshes() >= 1);
    }
}
