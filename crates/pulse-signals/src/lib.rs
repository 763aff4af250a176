//! # pulse-signals
//!
//! Real-time heart-rate and heart-rate-variability analysis from streaming
//! photoplethysmogram (PPG) samples.
//!
//! This crate provides:
//! - **Streaming analyzer**: sliding-window ingest with causal IIR
//!   bandpass, incremental peak detection, RR gating, harmonic-doubling
//!   suppression, and continuous SNR/confidence estimation
//! - **Batch analysis**: one-shot `analyze_signal` / `analyze_rr_intervals`
//!   producing the full time-domain, frequency-domain, and Poincare
//!   metric set
//! - **DSP building blocks**: biquad bandpass chains, rolling statistics,
//!   Welch periodogram
//!
//! ## Example
//!
//! ```ignore
//! use pulse_signals::{Options, RealtimeAnalyzer};
//!
//! let mut analyzer = RealtimeAnalyzer::new(50.0, Options::default())?;
//! for chunk in ppg_chunks {
//!     analyzer.push(&chunk);
//!     if let Some(metrics) = analyzer.poll() {
//!         println!("{:.1} BPM (confidence {:.2})", metrics.bpm, metrics.quality.confidence);
//!     }
//! }
//! ```

pub mod batch;
pub mod config;
pub mod dsp;
pub mod error;
pub mod metrics;
pub mod stream;

mod detect;
mod harmonic;
mod quality;

pub use batch::{
    analyze_rr_intervals, analyze_signal, calculate_breathing_rate, calculate_mad,
    hampel_filter, interpolate_clipping, interpolate_peaks, remove_outliers_iqr,
    remove_outliers_quotient_filter, remove_outliers_zscore, scale_data,
};
pub use config::{validate_options, CleanMethod, Options, PoincareMode, SdsdMode};
pub use dsp::{welch_psd, BiquadChain, PsdResult, RollingStats};
pub use error::AnalyzerError;
pub use metrics::{BinarySegment, HeartMetrics, QualityInfo};
pub use stream::RealtimeAnalyzer;
