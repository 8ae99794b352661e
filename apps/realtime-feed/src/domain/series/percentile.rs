//! Percentile Banding
//!
//! Reduces an ensemble of simulated paths into per-step p05/p50/p95 bands.
//! For step `t` the t-th value of every path is collected, sorted ascending,
//! and read at indices `floor(0.05 N)`, `floor(0.50 N)`, `floor(0.95 N)`.
//!
//! Ensembles come from the analytics backend and are validated before any
//! band is computed; a shape violation fails the whole refresh.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lower band quantile.
pub const P05: f64 = 0.05;
/// Median quantile.
pub const P50: f64 = 0.50;
/// Upper band quantile.
pub const P95: f64 = 0.95;

// =============================================================================
// Input
// =============================================================================

/// Step label supplied by the backend (`"M3"`, `3`, `"2025-06"` ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepLabel {
    /// Numeric label.
    Number(serde_json::Number),
    /// Text label.
    Text(String),
}

impl StepLabel {
    /// Default label for step `t`.
    #[must_use]
    pub fn default_for(step: usize) -> Self {
        Self::Text(format!("M{step}"))
    }
}

impl fmt::Display for StepLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Raw ensemble payload: `{ paths: number[][], time_steps?: (string|number)[] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleInput {
    /// Simulated trajectories.
    pub paths: Vec<Vec<f64>>,
    /// Optional labels, one per step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_steps: Option<Vec<StepLabel>>,
}

/// Contract violations in an ensemble payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnsembleError {
    /// No paths at all.
    #[error("ensemble contains no paths")]
    Empty,
    /// A path's length differs from the first path's.
    #[error("path {path} has {found} steps, expected {expected}")]
    RaggedPath {
        /// Offending path index.
        path: usize,
        /// Length of the first path.
        expected: usize,
        /// Length of the offending path.
        found: usize,
    },
    /// Labels do not match the number of steps.
    #[error("{labels} time step labels for {steps} steps")]
    LabelMismatch {
        /// Number of labels supplied.
        labels: usize,
        /// Steps per path.
        steps: usize,
    },
    /// NaN or infinite value.
    #[error("path {path} has a non-finite value at step {step}")]
    NonFinite {
        /// Offending path index.
        path: usize,
        /// Offending step.
        step: usize,
    },
}

// =============================================================================
// Ensemble
// =============================================================================

/// Validated ensemble: N >= 1 paths of equal length T with finite values.
#[derive(Debug, Clone, PartialEq)]
pub struct PathEnsemble {
    paths: Vec<Vec<f64>>,
    labels: Vec<StepLabel>,
}

impl PathEnsemble {
    /// Validate and build an ensemble.
    ///
    /// # Errors
    ///
    /// Returns `EnsembleError` if the ensemble is empty, ragged, mislabelled,
    /// or contains non-finite values.
    pub fn new(
        paths: Vec<Vec<f64>>,
        time_steps: Option<Vec<StepLabel>>,
    ) -> Result<Self, EnsembleError> {
        let steps = paths.first().ok_or(EnsembleError::Empty)?.len();

        for (index, path) in paths.iter().enumerate() {
            if path.len() != steps {
                return Err(EnsembleError::RaggedPath {
                    path: index,
                    expected: steps,
                    found: path.len(),
                });
            }
            if let Some(step) = path.iter().position(|v| !v.is_finite()) {
                return Err(EnsembleError::NonFinite { path: index, step });
            }
        }

        let labels = match time_steps {
            Some(labels) if labels.len() != steps => {
                return Err(EnsembleError::LabelMismatch {
                    labels: labels.len(),
                    steps,
                });
            }
            Some(labels) => labels,
            None => (0..steps).map(StepLabel::default_for).collect(),
        };

        Ok(Self { paths, labels })
    }

    /// Number of paths (N).
    #[must_use]
    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    /// Steps per path (T).
    #[must_use]
    pub fn steps(&self) -> usize {
        self.labels.len()
    }

    /// Raw paths.
    #[must_use]
    pub fn paths(&self) -> &[Vec<f64>] {
        &self.paths
    }

    /// Step labels.
    #[must_use]
    pub fn labels(&self) -> &[StepLabel] {
        &self.labels
    }

    /// The t-th value of every path, sorted ascending; `None` past the last step.
    #[must_use]
    pub fn sorted_values_at(&self, step: usize) -> Option<Vec<f64>> {
        let mut values: Vec<f64> = self
            .paths
            .iter()
            .map(|path| path.get(step).copied())
            .collect::<Option<_>>()?;
        values.sort_by(f64::total_cmp);
        Some(values)
    }
}

impl TryFrom<EnsembleInput> for PathEnsemble {
    type Error = EnsembleError;

    fn try_from(input: EnsembleInput) -> Result<Self, Self::Error> {
        Self::new(input.paths, input.time_steps)
    }
}

// =============================================================================
// Bands
// =============================================================================

/// Percentile band for one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileBand {
    /// Step index.
    pub step: usize,
    /// Step label.
    pub name: StepLabel,
    /// 5th percentile.
    pub p05: f64,
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
}

/// Index read for quantile `q` in a sorted slice of `n` values.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile_index(n: usize, q: f64) -> usize {
    let index = (n as f64 * q).floor() as usize;
    index.min(n.saturating_sub(1))
}

/// Compute one band per step, ordered by step.
#[must_use]
pub fn percentile_bands(ensemble: &PathEnsemble) -> Vec<PercentileBand> {
    let n = ensemble.path_count();
    let (lo, mid, hi) = (
        percentile_index(n, P05),
        percentile_index(n, P50),
        percentile_index(n, P95),
    );

    ensemble
        .labels()
        .iter()
        .enumerate()
        .filter_map(|(step, label)| {
            let values = ensemble.sorted_values_at(step)?;
            Some(PercentileBand {
                step,
                name: label.clone(),
                p05: values[lo],
                p50: values[mid],
                p95: values[hi],
            })
        })
        .collect()
}

/// Latest bands for one ensemble feed.
///
/// A refresh replaces the bands wholesale; a failed refresh leaves the
/// previous bands in place.
#[derive(Debug, Clone, Default)]
pub struct BandSeries {
    bands: Vec<PercentileBand>,
    refreshes: u64,
    failures: u64,
}

impl BandSeries {
    /// Create an empty series.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bands from a new ensemble payload.
    ///
    /// # Errors
    ///
    /// Returns `EnsembleError` if the payload violates the ensemble contract;
    /// the previous bands are kept.
    pub fn refresh(&mut self, input: EnsembleInput) -> Result<&[PercentileBand], EnsembleError> {
        match PathEnsemble::try_from(input) {
            Ok(ensemble) => {
                self.bands = percentile_bands(&ensemble);
                self.refreshes += 1;
                Ok(&self.bands)
            }
            Err(e) => {
                self.failures += 1;
                Err(e)
            }
        }
    }

    /// Current bands.
    #[must_use]
    pub fn bands(&self) -> &[PercentileBand] {
        &self.bands
    }

    /// Successful refreshes.
    #[must_use]
    pub const fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Failed refreshes.
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.failures
    }
}
