//! Analyzer configuration.
//!
//! `Options` is immutable once an analyzer is constructed. Defaults match
//! the behavior tuned for mobile-class PPG sensors; presets for torch and
//! ambient capture are applied through the streaming facade.

use serde::{Deserialize, Serialize};

use crate::error::{AnalyzerError, Result};

/// RR cleaning strategy applied before metric computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CleanMethod {
    /// Iterative rejection of RRs outside `[0.8, 1.2] x previous`.
    #[default]
    QuotientFilter,
    Iqr,
    ZScore,
}

/// Successive-difference statistic mode for SDSD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SdsdMode {
    Signed,
    #[default]
    Abs,
}

/// Poincare SD1/SD2 computation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PoincareMode {
    /// Closed-form from RMSSD/SDNN/SDSD.
    Formula,
    /// From successive masked RR pairs.
    #[default]
    Masked,
}

/// Immutable analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    // Bandpass filtering. Both cutoffs <= 0 disables the filter.
    pub low_hz: f64,
    pub high_hz: f64,
    pub iir_order: usize,

    // Welch PSD geometry.
    pub nfft: usize,
    pub overlap: f64,
    pub welch_wsize_sec: f64,

    // Peak detection bounds.
    pub refractory_ms: f64,
    pub threshold_scale: f64,
    pub bpm_min: f64,
    pub bpm_max: f64,

    // HP-style rolling-mean-lift thresholding.
    pub use_hp_threshold: bool,
    pub ma_perc: f64,
    pub adaptive_ma_perc: bool,

    // Min-RR gating.
    pub min_rr_gate_factor: f64,
    pub min_rr_floor_relaxed: f64,
    pub min_rr_floor_strict: f64,
    pub min_rr_ceiling: f64,

    /// Half-width tolerance for periodic suppression, as fraction of the
    /// expected period.
    pub periodic_suppression_tol: f64,

    // RR-pair coalescing acceptance bands.
    pub rr_merge_band_low: f64,
    pub rr_merge_band_high: f64,
    pub rr_merge_equal_band_low: f64,
    pub rr_merge_equal_band_high: f64,

    // PSD half/fundamental ratio thresholds.
    pub p_half_over_fund_threshold_soft: f64,
    pub p_half_over_fund_threshold_low: f64,

    // SNR band and EMA behavior.
    pub snr_band_passive: f64,
    pub snr_band_active: f64,
    pub snr_tau_sec: f64,
    pub snr_active_tau_sec: f64,
    pub snr_band_blend_factor: f64,

    // Half-fundamental drift stability.
    pub half_f0_hist_len: usize,
    pub half_f0_tol_hz_warm: f64,
    pub half_f0_tol_hz_cold: f64,

    // Oversuppression (choke) recovery.
    pub choke_relax_base_sec: f64,
    pub choke_relax_low_bpm_sec: f64,
    pub choke_bpm_threshold: f64,

    // Preprocessing.
    pub interp_clipping: bool,
    pub clipping_threshold: f64,
    pub hampel_correct: bool,
    pub hampel_window: usize,
    pub hampel_threshold: f64,

    // High precision peak refinement.
    pub high_precision: bool,
    pub high_precision_fs: f64,

    // Binary-quality windowing.
    pub reject_segmentwise: bool,
    pub segment_reject_threshold: f64,
    pub segment_reject_window_beats: usize,
    pub segment_reject_max_rejects: usize,
    pub segment_reject_overlap: f64,

    // RR cleaning.
    pub clean_rr: bool,
    pub clean_method: CleanMethod,
    pub clean_iterations: usize,

    /// HeartPy-style threshold_rr interval rejection.
    pub threshold_rr: bool,

    // Metric computation modes.
    pub sdsd_mode: SdsdMode,
    pub poincare_mode: PoincareMode,
    pub pnn_as_percent: bool,
    pub breathing_as_bpm: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            low_hz: 0.5,
            high_hz: 5.0,
            iir_order: 2,

            nfft: 256,
            overlap: 0.5,
            welch_wsize_sec: 240.0,

            refractory_ms: 250.0,
            threshold_scale: 0.5,
            bpm_min: 40.0,
            bpm_max: 180.0,

            use_hp_threshold: false,
            ma_perc: 30.0,
            adaptive_ma_perc: true,

            min_rr_gate_factor: 0.86,
            min_rr_floor_relaxed: 400.0,
            min_rr_floor_strict: 500.0,
            min_rr_ceiling: 1200.0,

            periodic_suppression_tol: 0.24,

            rr_merge_band_low: 0.75,
            rr_merge_band_high: 1.25,
            rr_merge_equal_band_low: 0.85,
            rr_merge_equal_band_high: 1.15,

            p_half_over_fund_threshold_soft: 2.0,
            p_half_over_fund_threshold_low: 1.6,

            snr_band_passive: 0.12,
            snr_band_active: 0.18,
            snr_tau_sec: 10.0,
            snr_active_tau_sec: 7.0,
            snr_band_blend_factor: 0.30,

            half_f0_hist_len: 5,
            half_f0_tol_hz_warm: 0.06,
            half_f0_tol_hz_cold: 0.10,

            choke_relax_base_sec: 5.0,
            choke_relax_low_bpm_sec: 7.0,
            choke_bpm_threshold: 35.0,

            interp_clipping: false,
            clipping_threshold: 1020.0,
            hampel_correct: false,
            hampel_window: 6,
            hampel_threshold: 3.0,

            high_precision: false,
            high_precision_fs: 1000.0,

            reject_segmentwise: false,
            segment_reject_threshold: 0.3,
            segment_reject_window_beats: 10,
            segment_reject_max_rejects: 3,
            segment_reject_overlap: 0.0,

            clean_rr: false,
            clean_method: CleanMethod::QuotientFilter,
            clean_iterations: 2,

            threshold_rr: false,

            sdsd_mode: SdsdMode::Abs,
            poincare_mode: PoincareMode::Masked,
            pnn_as_percent: true,
            breathing_as_bpm: false,
        }
    }
}

impl Options {
    /// Whether the bandpass stage is disabled.
    pub fn bandpass_disabled(&self) -> bool {
        self.low_hz <= 0.0 && self.high_hz <= 0.0
    }
}

/// Validate a sample rate / options pair.
///
/// Returns a typed error with a stable code on the first violated bound.
/// No state is mutated on failure.
pub fn validate_options(fs: f64, opt: &Options) -> Result<()> {
    if !fs.is_finite() || fs < 1.0 || fs > 10_000.0 {
        return Err(AnalyzerError::InvalidSampleRate(fs));
    }
    if !opt.bandpass_disabled() {
        if !(opt.low_hz >= 0.0 && opt.low_hz < opt.high_hz && opt.high_hz <= fs / 2.0) {
            return Err(AnalyzerError::InvalidOptions {
                message: format!(
                    "bandpass must satisfy 0 <= low < high <= fs/2 (low={}, high={}, fs={})",
                    opt.low_hz, opt.high_hz, fs
                ),
            });
        }
    }
    if !(50.0..=2000.0).contains(&opt.refractory_ms) {
        return Err(AnalyzerError::InvalidOptions {
            message: format!("refractory_ms must be in [50, 2000], got {}", opt.refractory_ms),
        });
    }
    if !(opt.bpm_min >= 30.0 && opt.bpm_min < opt.bpm_max && opt.bpm_max <= 240.0) {
        return Err(AnalyzerError::InvalidOptions {
            message: format!(
                "bpm range must satisfy 30 <= min < max <= 240 (min={}, max={})",
                opt.bpm_min, opt.bpm_max
            ),
        });
    }
    if !(64..=16_384).contains(&opt.nfft) {
        return Err(AnalyzerError::InvalidOptions {
            message: format!("nfft must be in [64, 16384], got {}", opt.nfft),
        });
    }
    if !opt.overlap.is_finite() || !(0.0..1.0).contains(&opt.overlap) {
        return Err(AnalyzerError::InvalidOptions {
            message: format!("overlap must be finite in [0, 1), got {}", opt.overlap),
        });
    }
    if !opt.high_precision_fs.is_finite()
        || !opt.segment_reject_threshold.is_finite()
        || !opt.segment_reject_overlap.is_finite()
    {
        return Err(AnalyzerError::InvalidOptions {
            message: "high_precision_fs and segment thresholds must be finite".to_string(),
        });
    }
    Ok(())
}
