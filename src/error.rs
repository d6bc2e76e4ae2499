use chrono::NaiveDate;
use thiserror::Error;

/// Failures the modeling core distinguishes for callers.
///
/// Everything else (sqlite, filesystem, serialization) travels as
/// `anyhow::Error` with context attached at the call site.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid caller-supplied configuration. Fails fast, never coerced.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A required ability snapshot (or its underlying game data) is absent.
    /// Recoverable via the backfill protocol when game data exists.
    #[error("no ability data for {what} at {date}")]
    DataGap { what: String, date: NaiveDate },

    /// Backfill found no underlying games at all for a configuration.
    #[error("abilities don't exist for this configuration: {0}")]
    AbilitiesMissing(String),

    /// Both win-probability masses were zero before rescale.
    #[error("degenerate win probabilities (home_mean={home_mean}, away_mean={away_mean})")]
    DegenerateProbability { home_mean: f64, away_mean: f64 },
}

impl ModelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
