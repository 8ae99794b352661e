//! Series Reduction
//!
//! Derives chart-ready series from raw data:
//!
//! - `smoothing`: exponential smoothing into a bounded FIFO window per channel
//! - `percentile`: p05/p50/p95 bands across a simulated path ensemble
//!
//! Both produce fresh snapshots; raw ticks and ensembles are never mutated.

pub mod percentile;
pub mod smoothing;

pub use percentile::{
    BandSeries, EnsembleError, EnsembleInput, PathEnsemble, PercentileBand, StepLabel,
    percentile_bands, percentile_index,
};
pub use smoothing::{SeriesError, SeriesReducer, SmoothedPoint, SmoothedWindow, SmoothingConfig};
