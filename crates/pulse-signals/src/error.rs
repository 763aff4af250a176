use thiserror::Error;

/// Errors raised at construction or batch-call boundaries.
///
/// Streaming degradations (short windows, missing beats, degenerate PSDs)
/// never surface here; they are reported through quality fields instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("signal is empty")]
    EmptySignal,
    #[error("sample rate must be in [1, 10000] Hz, got {0}")]
    InvalidSampleRate(f64),
    #[error("invalid options: {message}")]
    InvalidOptions { message: String },
}

impl AnalyzerError {
    /// Stable machine-readable code for FFI / logging consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzerError::EmptySignal => "empty_signal",
            AnalyzerError::InvalidSampleRate(_) => "invalid_fs",
            AnalyzerError::InvalidOptions { .. } => "invalid_options",
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
