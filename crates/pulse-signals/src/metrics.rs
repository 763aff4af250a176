//! Emitted metric bundles.

use serde::{Deserialize, Serialize};

/// One sliding beat window of the binary quality check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinarySegment {
    /// Segment ordinal.
    pub index: usize,
    /// Start beat index (inclusive).
    pub start_beat: usize,
    /// End beat index (exclusive).
    pub end_beat: usize,
    pub total_beats: usize,
    pub rejected_beats: usize,
    pub accepted: bool,
}

/// Signal-quality and harmonic-suppression diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityInfo {
    pub total_beats: usize,
    pub rejected_beats: usize,
    pub rejection_rate: f64,
    pub good_quality: bool,
    pub quality_warning: String,

    /// Band-integrated SNR estimate (dB), EMA smoothed. 0 if unavailable.
    pub snr_db: f64,
    /// Confidence score in [0, 1]. 0 if unavailable or before warm-up.
    pub confidence: f64,
    /// Fundamental frequency used for SNR, possibly harmonically remapped.
    pub f0_hz: f64,
    /// Active HP-threshold ma_perc, if the HP path is enabled.
    pub ma_perc_active: f64,

    // Harmonic suppression diagnostics.
    pub doubling_flag: bool,
    pub soft_doubling_flag: bool,
    pub doubling_hint_flag: bool,
    pub hard_fallback_active: bool,
    pub rr_fallback_mode_active: bool,
    pub rr_short_frac: f64,
    pub rr_long_ms: f64,
    pub p_half_over_fund: f64,
    /// Fraction of adjacent RR pairs summing to about the long RR.
    pub pair_frac: f64,
    pub soft_streak: u32,
    pub soft_secs: f64,

    // Acceptance diagnostics.
    pub refractory_ms_active: f64,
    pub min_rr_bound_ms: f64,
}

impl Default for QualityInfo {
    fn default() -> Self {
        Self {
            total_beats: 0,
            rejected_beats: 0,
            rejection_rate: 0.0,
            good_quality: true,
            quality_warning: String::new(),
            snr_db: 0.0,
            confidence: 0.0,
            f0_hz: 0.0,
            ma_perc_active: 0.0,
            doubling_flag: false,
            soft_doubling_flag: false,
            doubling_hint_flag: false,
            hard_fallback_active: false,
            rr_fallback_mode_active: false,
            rr_short_frac: 0.0,
            rr_long_ms: 0.0,
            p_half_over_fund: 0.0,
            pair_frac: 0.0,
            soft_streak: 0,
            soft_secs: 0.0,
            refractory_ms_active: 0.0,
            min_rr_bound_ms: 0.0,
        }
    }
}

/// Full metric bundle emitted by a poll or a batch analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartMetrics {
    pub bpm: f64,
    /// Inter-beat intervals (ms) from the batch detection path.
    pub ibi_ms: Vec<f64>,
    /// Clean RR intervals (ms); streaming state when polled.
    pub rr_list: Vec<f64>,
    /// Accepted peak indices, window-relative.
    pub peak_list: Vec<i32>,
    /// Pre-repair peak indices, window-relative.
    pub peak_list_raw: Vec<i32>,
    /// Per-peak acceptance mask aligned to `peak_list` (1 = accepted).
    pub binary_peak_mask: Vec<i32>,

    // Time-domain measures.
    pub sdnn: f64,
    pub rmssd: f64,
    pub sdsd: f64,
    pub pnn20: f64,
    pub pnn50: f64,
    /// Absolute count of successive differences > 20 ms.
    pub nn20: f64,
    /// Absolute count of successive differences > 50 ms.
    pub nn50: f64,
    /// Median absolute deviation of RR.
    pub mad: f64,

    // Poincare analysis.
    pub sd1: f64,
    pub sd2: f64,
    pub sd1_sd2_ratio: f64,
    pub ellipse_area: f64,

    // Frequency domain (Welch over resampled RR).
    pub vlf: f64,
    pub lf: f64,
    pub hf: f64,
    pub lfhf: f64,
    pub total_power: f64,
    pub lf_norm: f64,
    pub hf_norm: f64,

    /// Breathing rate, Hz by default or breaths/min per options.
    pub breathing_rate: f64,

    pub quality: QualityInfo,
    pub binary_segments: Vec<BinarySegment>,
}
