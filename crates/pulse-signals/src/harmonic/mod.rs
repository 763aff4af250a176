//! Harmonic-doubling detection: the soft / hard / hint state machine fed
//! by PSD updates, plus diagnostics derived from the RR sequence.

pub(crate) mod repair;

use std::collections::VecDeque;

use crate::config::Options;
use crate::dsp;

/// Warm-drift stability requires at least this many half-f0 estimates.
const STABILITY_MIN_HIST: usize = 3;
/// Seconds soft must persist before hard can arm.
const HARD_SOFT_SECS: f64 = 8.0;
/// Hard hold window in seconds.
const HARD_HOLD_SECS: f64 = 8.0;
/// Hint holds: PSD-driven and other paths.
const HINT_HOLD_PSD_SECS: f64 = 12.0;
const HINT_HOLD_OTHER_SECS: f64 = 8.0;
/// Sustained violations clear soft and hard after this long.
const AUTO_CLEAR_SECS: f64 = 5.0;

/// Per-update observation handed to the state machine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PsdObservation {
    pub now: f64,
    /// Stream age in seconds.
    pub age: f64,
    /// Warm-up passed (>= 15 s and >= 10 accepted intervals).
    pub warm: bool,
    /// `P(f0/2) / P(f0)` from the current PSD.
    pub ratio: f64,
    /// Half-f0 drift within the warm tolerance.
    pub stable_warm: bool,
    /// Half-f0 drift within the cold (looser) tolerance.
    pub stable_cold: bool,
    /// Recent gate rejection rate, 0..1.
    pub rejection_rate: f64,
    /// RR coefficient of variation.
    pub cv: f64,
    pub median_rr_ms: f64,
    /// BPM implied by the median RR.
    pub median_bpm: f64,
    /// Smoothed BPM from the gate EMA.
    pub bpm_ema: f64,
    pub ma_perc_active: f64,
}

/// Three-tier doubling state with hold timers and drift history.
#[derive(Debug, Clone)]
pub(crate) struct HarmonicState {
    pub soft: bool,
    pub hard: bool,
    pub hint: bool,
    /// Hint currently driven only by the RR fallback path; disables
    /// periodic suppression for the poll.
    pub rr_fallback_driving_hint: bool,
    /// Long-RR estimate cached at hard activation (ms).
    pub doubling_long_rr_ms: f64,
    pub soft_streak: u32,
    soft_since: f64,
    hard_hold_until: f64,
    pub hard_fallback_until: f64,
    hint_until: f64,
    violation_since: Option<f64>,
    /// Low-ratio hint path timer; per-instance.
    psd_lo_since: Option<f64>,
    rr_fallback_streak: u32,
    high_bpm_since: Option<f64>,
    low_bpm_since: Option<f64>,
    pub choke_relax_until: f64,
    half_f0_hist: VecDeque<f64>,
    /// Last time any flag was observed active.
    pub last_active_time: f64,
    active_since: Option<f64>,
}

impl HarmonicState {
    pub(crate) fn new() -> Self {
        Self {
            soft: false,
            hard: false,
            hint: false,
            rr_fallback_driving_hint: false,
            doubling_long_rr_ms: 0.0,
            soft_streak: 0,
            soft_since: 0.0,
            hard_hold_until: 0.0,
            hard_fallback_until: 0.0,
            hint_until: 0.0,
            violation_since: None,
            psd_lo_since: None,
            rr_fallback_streak: 0,
            high_bpm_since: None,
            low_bpm_since: None,
            choke_relax_until: 0.0,
            half_f0_hist: VecDeque::new(),
            last_active_time: f64::NEG_INFINITY,
            active_since: None,
        }
    }

    pub(crate) fn any_active(&self) -> bool {
        self.soft || self.hard || self.hint
    }

    /// Seconds the flags have been continuously active; 0 when inactive.
    pub(crate) fn active_secs(&self, now: f64) -> f64 {
        self.active_since.map_or(0.0, |t| (now - t).max(0.0))
    }

    pub(crate) fn soft_secs(&self, now: f64) -> f64 {
        if self.soft {
            (now - self.soft_since).max(0.0)
        } else {
            0.0
        }
    }

    pub(crate) fn hard_fallback_active(&self, now: f64) -> bool {
        self.hard && now < self.hard_fallback_until
    }

    pub(crate) fn push_half_f0(&mut self, hz: f64, cap: usize) {
        if !hz.is_finite() || hz <= 0.0 {
            return;
        }
        self.half_f0_hist.push_back(hz);
        while self.half_f0_hist.len() > cap.max(1) {
            self.half_f0_hist.pop_front();
        }
    }

    /// Whether the retained half-f0 estimates span no more than `tol_hz`.
    pub(crate) fn half_stable(&self, tol_hz: f64) -> bool {
        if self.half_f0_hist.len() < STABILITY_MIN_HIST {
            return false;
        }
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in &self.half_f0_hist {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        hi - lo <= tol_hz
    }

    /// Long-RR gate estimate used while any flag is active (ms).
    pub(crate) fn long_rr_estimate(&self, rr: &[f64], last_f0_hz: f64, opt: &Options) -> f64 {
        let mut est = self.doubling_long_rr_ms;
        if !rr.is_empty() {
            est = est.max(2.0 * dsp::median(rr));
        }
        if last_f0_hz > 0.0 {
            est = est.max(1000.0 / last_f0_hz);
        }
        if est <= 0.0 {
            return 0.0;
        }
        est.clamp(600.0, opt.min_rr_ceiling)
    }

    /// Advance the state machine on one PSD update.
    pub(crate) fn on_psd_update(&mut self, obs: &PsdObservation, rr: &[f64], opt: &Options) {
        let now = obs.now;

        // Track BPM persistence used by hard and the RR fallback.
        if obs.bpm_ema > 120.0 {
            self.high_bpm_since.get_or_insert(now);
        } else {
            self.high_bpm_since = None;
        }
        let high_bpm_secs = self.high_bpm_since.map_or(0.0, |t| now - t);

        // Soft: immediate activation, clears only through auto-clear.
        let soft_crit = obs.warm
            && obs.ratio >= opt.p_half_over_fund_threshold_soft
            && obs.stable_warm
            && obs.rejection_rate <= 0.05
            && obs.cv <= 0.30;
        if soft_crit {
            self.soft_streak = self.soft_streak.saturating_add(1);
            if !self.soft {
                self.soft = true;
                self.soft_since = now;
                log::debug!("soft doubling flag raised (ratio {:.2})", obs.ratio);
            }
        } else {
            self.soft_streak = 0;
        }

        // Hard: soft seniority plus persistent high BPM with a low ma_perc.
        let hard_crit = self.soft
            && self.soft_secs(now) >= HARD_SOFT_SECS
            && high_bpm_secs >= HARD_SOFT_SECS
            && obs.ma_perc_active < 25.0
            && obs.ratio >= 2.0
            && obs.stable_warm
            && obs.rejection_rate <= 0.05
            && obs.cv <= 0.20;
        if hard_crit {
            if !self.hard {
                self.hard = true;
                self.doubling_long_rr_ms = long_rr(rr);
                self.hard_hold_until = now + HARD_HOLD_SECS;
                let remaining = self.hard_hold_until - now;
                self.hard_fallback_until = now + remaining.min(3.0);
                log::debug!(
                    "hard doubling flag raised, long RR {:.0} ms",
                    self.doubling_long_rr_ms
                );
            } else {
                self.hard_hold_until = now + HARD_HOLD_SECS;
            }
        } else if self.hard && now > self.hard_hold_until {
            self.hard = false;
        }

        // Hint paths. Any PSD-driven trigger overrides the RR fallback.
        let mut psd_hint = false;
        if obs.warm
            && obs.ratio >= opt.p_half_over_fund_threshold_soft
            && obs.stable_warm
            && obs.rejection_rate <= 0.05
            && obs.cv <= 0.30
        {
            self.hint_until = self.hint_until.max(now + HINT_HOLD_PSD_SECS);
            psd_hint = true;
        }
        if obs.warm && obs.ratio >= opt.p_half_over_fund_threshold_low {
            let since = *self.psd_lo_since.get_or_insert(now);
            if now - since >= 6.0 && obs.stable_cold {
                self.hint_until = self.hint_until.max(now + HINT_HOLD_OTHER_SECS);
                psd_hint = true;
            }
        } else {
            self.psd_lo_since = None;
        }

        let rr_fallback_crit = obs.warm
            && high_bpm_secs >= 8.0
            && (370.0..=450.0).contains(&obs.median_rr_ms)
            && obs.cv <= 0.10
            && obs.rejection_rate <= 0.03;
        if rr_fallback_crit {
            self.rr_fallback_streak = self.rr_fallback_streak.saturating_add(1);
            if self.rr_fallback_streak >= 3 {
                self.hint_until = self.hint_until.max(now + HINT_HOLD_OTHER_SECS);
                if !psd_hint {
                    self.rr_fallback_driving_hint = true;
                }
            }
        } else {
            self.rr_fallback_streak = 0;
        }
        if psd_hint {
            self.rr_fallback_driving_hint = false;
        }

        self.hint = now < self.hint_until;
        if !self.hint {
            self.rr_fallback_driving_hint = false;
        }

        // Choke protection: repair has pushed BPM below the physiological
        // floor; relax periodic suppression for a recovery window.
        if self.any_active() && obs.age >= 20.0 && obs.median_bpm > 0.0 && obs.median_bpm < 40.0 {
            let since = *self.low_bpm_since.get_or_insert(now);
            if now - since >= 3.0 {
                let relax = if obs.median_bpm < opt.choke_bpm_threshold {
                    opt.choke_relax_low_bpm_sec
                } else {
                    opt.choke_relax_base_sec
                };
                self.choke_relax_until = self.choke_relax_until.max(now + relax);
                log::warn!("choke protection engaged for {:.0} s", relax);
            }
        } else {
            self.low_bpm_since = None;
        }

        // Auto-clear soft and hard on sustained violations, holds included.
        let violation = obs.ratio < 1.5
            || !obs.stable_warm
            || obs.cv > 0.20
            || obs.rejection_rate > 0.05;
        if violation {
            let since = *self.violation_since.get_or_insert(now);
            if now - since >= AUTO_CLEAR_SECS && (self.soft || self.hard) {
                self.soft = false;
                self.hard = false;
                self.soft_streak = 0;
                log::debug!("doubling flags auto-cleared after sustained violations");
            }
        } else {
            self.violation_since = None;
        }

        if self.any_active() {
            self.last_active_time = now;
            self.active_since.get_or_insert(now);
        } else {
            self.active_since = None;
        }
    }
}

/// Mean of intervals at or above 0.8 times the median.
pub(crate) fn long_rr(rr: &[f64]) -> f64 {
    if rr.is_empty() {
        return 0.0;
    }
    let med = dsp::median(rr);
    let long: Vec<f64> = rr.iter().copied().filter(|&r| r >= 0.8 * med).collect();
    if long.is_empty() {
        med
    } else {
        dsp::mean(&long)
    }
}

/// Fraction of intervals shorter than 0.8 times the median.
pub(crate) fn short_rr_fraction(rr: &[f64]) -> f64 {
    if rr.is_empty() {
        return 0.0;
    }
    let med = dsp::median(rr);
    rr.iter().filter(|&&r| r < 0.8 * med).count() as f64 / rr.len() as f64
}

/// Fraction of adjacent RR pairs whose sum lands near the long RR.
pub(crate) fn pair_fraction(rr: &[f64], long_rr_ms: f64) -> f64 {
    if rr.len() < 2 || long_rr_ms <= 0.0 {
        return 0.0;
    }
    let pairs = rr.len() - 1;
    let near = rr
        .windows(2)
        .filter(|w| {
            let sum = w[0] + w[1];
            sum >= 0.8 * long_rr_ms && sum <= 1.2 * long_rr_ms
        })
        .count();
    near as f64 / pairs as f64
}
