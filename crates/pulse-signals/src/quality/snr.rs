//! Band-integrated SNR with EMA smoothing and logistic confidence.
//!
//! Runs on the PSD cadence of the streaming facade. The smoothed SNR and
//! confidence persist across polls so quality does not zero out between
//! PSD updates.

use rustfft::FftPlanner;

use crate::config::Options;
use crate::dsp::{welch_psd_with, PsdResult};

/// Noise floor search range in Hz.
const NOISE_LO_HZ: f64 = 0.4;
const NOISE_HI_HZ: f64 = 5.0;
/// Extra guard band excluded around the signal bands when collecting noise.
const NOISE_GUARD_HZ: f64 = 0.03;

pub struct SnrEstimator {
    planner: FftPlanner<f64>,
    snr_ema: Option<f64>,
    confidence: f64,
    last_update: Option<f64>,
    band_active_prev: bool,
    last_f0_hz: f64,
    p_half_over_fund: f64,
}

impl SnrEstimator {
    pub(crate) fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            snr_ema: None,
            confidence: 0.0,
            last_update: None,
            band_active_prev: false,
            last_f0_hz: 0.0,
            p_half_over_fund: 0.0,
        }
    }

    pub(crate) fn compute_psd(&mut self, x: &[f64], fs: f64, nfft: usize, overlap: f64) -> PsdResult {
        welch_psd_with(&mut self.planner, x, fs, nfft, overlap)
    }

    /// Smoothed SNR in dB; 0 before the first finite update.
    pub(crate) fn snr_db(&self) -> f64 {
        self.snr_ema.unwrap_or(0.0)
    }

    pub(crate) fn confidence(&self) -> f64 {
        self.confidence
    }

    pub(crate) fn last_f0(&self) -> f64 {
        self.last_f0_hz
    }

    pub(crate) fn set_f0(&mut self, f0: f64) {
        self.last_f0_hz = f0;
    }

    pub(crate) fn p_half_over_fund(&self) -> f64 {
        self.p_half_over_fund
    }

    pub(crate) fn set_ratio(&mut self, ratio: f64) {
        self.p_half_over_fund = if ratio.is_finite() { ratio } else { 0.0 };
    }

    /// Fold an instantaneous SNR into the EMA.
    ///
    /// `alpha = 1 - exp(-dt/tau)` with the active or passive tau; on a
    /// band-width mode change the estimate is blended toward the instant
    /// value to avoid a step bias.
    pub(crate) fn apply_update(&mut self, now: f64, inst: f64, active_mode: bool, opt: &Options) {
        if !inst.is_finite() {
            return;
        }
        let tau = if active_mode { opt.snr_active_tau_sec } else { opt.snr_tau_sec };
        match self.snr_ema {
            None => self.snr_ema = Some(inst),
            Some(prev) => {
                let dt = (now - self.last_update.unwrap_or(now)).max(0.0);
                let alpha = 1.0 - (-dt / tau.max(1e-6)).exp();
                let mut v = prev + alpha * (inst - prev);
                if active_mode != self.band_active_prev {
                    v += (inst - v) * opt.snr_band_blend_factor;
                }
                self.snr_ema = Some(v);
            }
        }
        self.band_active_prev = active_mode;
        self.last_update = Some(now);
    }

    /// Recompute the confidence score from the smoothed SNR.
    pub(crate) fn update_confidence(
        &mut self,
        active_mode: bool,
        rejection_rate: f64,
        cv: f64,
        clean_boost: bool,
        warm_blocked: bool,
    ) {
        let (x0, k) = if active_mode { (5.2, 1.0 / 1.2) } else { (6.0, 0.8) };
        let k_cv = if active_mode { 0.5 } else { 1.0 };
        let snr = self.snr_db();
        let sigma = 1.0 / (1.0 + (-k * (snr - x0)).exp());
        let mut conf =
            sigma * (1.0 - rejection_rate).clamp(0.0, 1.0) * (1.0 - k_cv * cv).max(0.0);
        if clean_boost {
            conf = (conf * 1.1).min(1.0);
        }
        if warm_blocked {
            conf = 0.0;
        }
        self.confidence = if conf.is_finite() { conf.clamp(0.0, 1.0) } else { 0.0 };
    }
}

/// Sum of PSD bins within `center +- half_width`.
pub(crate) fn band_power(psd: &PsdResult, center: f64, half_width: f64) -> f64 {
    psd.freqs
        .iter()
        .zip(psd.psd.iter())
        .filter(|(f, _)| (**f - center).abs() <= half_width)
        .map(|(_, p)| *p)
        .sum()
}

/// Frequency of the strongest bin inside `[lo, hi]`; `center` as fallback.
pub(crate) fn peak_freq_in_band(psd: &PsdResult, lo: f64, hi: f64, center: f64) -> f64 {
    let mut best_f = center;
    let mut best_p = f64::NEG_INFINITY;
    for (f, p) in psd.freqs.iter().zip(psd.psd.iter()) {
        if *f >= lo && *f <= hi && *p > best_p {
            best_p = *p;
            best_f = *f;
        }
    }
    best_f
}

/// Instantaneous band-integrated SNR at `f0` with the given band half-width.
///
/// Signal power is collected around `f0` and `2*f0`; the noise baseline is
/// the median PSD over `[0.4, 5.0]` Hz excluding guarded signal bands.
/// `None` when the measurement is degenerate.
pub(crate) fn instantaneous_snr(psd: &PsdResult, f0: f64, band: f64) -> Option<f64> {
    let df = psd.df();
    if df <= 0.0 || f0 <= 0.0 {
        return None;
    }
    let mut signal_pow = 0.0;
    let mut noise = Vec::new();
    for (f, p) in psd.freqs.iter().zip(psd.psd.iter()) {
        let near_fund = (f - f0).abs() <= band;
        let near_harm = (f - 2.0 * f0).abs() <= band;
        if near_fund || near_harm {
            signal_pow += p;
        } else if *f >= NOISE_LO_HZ
            && *f <= NOISE_HI_HZ
            && (f - f0).abs() > band + NOISE_GUARD_HZ
            && (f - 2.0 * f0).abs() > band + NOISE_GUARD_HZ
        {
            noise.push(*p);
        }
    }
    if noise.is_empty() || signal_pow <= 0.0 {
        return None;
    }
    let baseline = crate::dsp::median(&noise);
    if baseline <= 0.0 {
        return None;
    }
    let snr = 10.0 * (signal_pow / (baseline * 2.0 * band / df)).log10();
    snr.is_finite().then_some(snr)
}
