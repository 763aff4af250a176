//! RR acceptance gate: refractory, min-RR bound, strongest-wins policy.

use std::collections::VecDeque;

use crate::config::Options;

/// BPM EMA time constant.
const BPM_EMA_TAU_SEC: f64 = 8.0;
/// Prior before any interval has been accepted.
const DEFAULT_PRIOR_BPM: f64 = 75.0;
/// Rejection-burst sliding window and trigger count.
const BURST_WINDOW_SEC: f64 = 3.0;
const BURST_TRIGGER: usize = 3;
/// Window for the recent rejection rate consumed by quality gating.
const RATE_WINDOW_SEC: f64 = 10.0;
/// Dynamic refractory bounds in ms.
const REFRACTORY_MIN_MS: f64 = 280.0;
const REFRACTORY_MAX_MS: f64 = 450.0;
/// Ceiling the burst extra raises the refractory to.
const BURST_REFRACTORY_MS: f64 = 350.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateDecision {
    Accept,
    /// Candidate inside the refractory but stronger than the last
    /// accepted peak; the caller must swap the last peak for it.
    Replace,
    Reject,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GateInput {
    /// Candidate time in stream seconds.
    pub now: f64,
    pub abs_idx: u64,
    /// Comparison-scaled amplitude.
    pub amp: f64,
    /// Spread of the comparison scale.
    pub sd: f64,
    pub fs: f64,
    pub warm: bool,
    pub harmonic_active: bool,
    pub hard_fallback: bool,
    /// Long-RR estimate in ms while harmonic flags are active, else 0.
    pub long_est_ms: f64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GateOutcome {
    pub decision: GateDecision,
    pub refractory_ms: f64,
    pub min_rr_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RrGate {
    bpm_ema: Option<f64>,
    pub accepted_total: u64,
    pub short_reject_count: u64,
    last_peak: Option<(u64, f64)>,
    accept_times: VecDeque<f64>,
    reject_times: VecDeque<f64>,
    temp_extra_until: f64,
    pub last_refractory_ms: f64,
    pub last_min_rr_ms: f64,
}

impl RrGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bpm_ema(&self) -> Option<f64> {
        self.bpm_ema
    }

    /// Whether the rejection-burst extra is currently armed.
    pub(crate) fn burst_armed(&self, now: f64) -> bool {
        now < self.temp_extra_until
    }

    /// Gate rejection rate over the recent window, 0..1.
    pub(crate) fn recent_rejection_rate(&self, now: f64) -> f64 {
        let lo = now - RATE_WINDOW_SEC;
        let rejects = self.reject_times.iter().filter(|&&t| t >= lo).count();
        let accepts = self.accept_times.iter().filter(|&&t| t >= lo).count();
        let total = rejects + accepts;
        if total == 0 {
            0.0
        } else {
            rejects as f64 / total as f64
        }
    }

    /// Evaluate one peak candidate and update gate state.
    pub(crate) fn evaluate(&mut self, inp: &GateInput, opt: &Options) -> GateOutcome {
        // Before the first interval there is no RR expectation; only the
        // floor and the base refractory gate candidates.
        let rr_prior_ms = self
            .bpm_ema
            .map(|b| 60_000.0 / b.clamp(opt.bpm_min, opt.bpm_max))
            .unwrap_or(60_000.0 / DEFAULT_PRIOR_BPM);
        let has_prior = self.bpm_ema.is_some();

        let mut refractory_ms = if has_prior {
            (0.4 * rr_prior_ms).clamp(REFRACTORY_MIN_MS, REFRACTORY_MAX_MS)
        } else {
            REFRACTORY_MIN_MS
        }
        .max(opt.refractory_ms);
        if inp.now < self.temp_extra_until {
            refractory_ms = refractory_ms.max(BURST_REFRACTORY_MS);
        }
        if inp.hard_fallback {
            refractory_ms = refractory_ms.max((0.5 * rr_prior_ms).min(REFRACTORY_MAX_MS));
        }

        let floor =
            if inp.warm { opt.min_rr_floor_relaxed } else { opt.min_rr_floor_strict };
        let mut min_rr_ms = if has_prior { (0.7 * rr_prior_ms).max(floor) } else { floor };
        if inp.harmonic_active && inp.long_est_ms > 0.0 {
            min_rr_ms = min_rr_ms.max(opt.min_rr_gate_factor * inp.long_est_ms);
        }
        self.last_refractory_ms = refractory_ms;
        self.last_min_rr_ms = min_rr_ms;

        let decision = match self.last_peak {
            None => {
                self.accept(inp, None);
                GateDecision::Accept
            }
            Some((last_idx, last_amp)) => {
                let rr_new_ms = (inp.abs_idx.saturating_sub(last_idx)) as f64 / inp.fs * 1000.0;
                if rr_new_ms < refractory_ms {
                    if inp.amp > last_amp {
                        self.last_peak = Some((inp.abs_idx, inp.amp));
                        GateDecision::Replace
                    } else {
                        self.reject(inp.now);
                        GateDecision::Reject
                    }
                } else if rr_new_ms < min_rr_ms {
                    let margin = if inp.warm { 1.0 } else { 2.5 };
                    if inp.amp > last_amp + margin * inp.sd {
                        self.accept(inp, Some(rr_new_ms));
                        GateDecision::Accept
                    } else {
                        self.reject(inp.now);
                        GateDecision::Reject
                    }
                } else {
                    self.accept(inp, Some(rr_new_ms));
                    GateDecision::Accept
                }
            }
        };

        GateOutcome { decision, refractory_ms, min_rr_ms }
    }

    fn accept(&mut self, inp: &GateInput, rr_new_ms: Option<f64>) {
        self.last_peak = Some((inp.abs_idx, inp.amp));
        self.accepted_total += 1;
        self.accept_times.push_back(inp.now);
        Self::prune(&mut self.accept_times, inp.now);
        if let Some(rr) = rr_new_ms {
            let inst_bpm = 60_000.0 / rr;
            if inst_bpm.is_finite() {
                let dt = rr / 1000.0;
                let alpha = 1.0 - (-dt / BPM_EMA_TAU_SEC).exp();
                self.bpm_ema = Some(match self.bpm_ema {
                    None => inst_bpm,
                    Some(e) => e + alpha * (inst_bpm - e),
                });
            }
        }
    }

    fn reject(&mut self, now: f64) {
        self.short_reject_count += 1;
        self.reject_times.push_back(now);
        Self::prune(&mut self.reject_times, now);
        let burst =
            self.reject_times.iter().filter(|&&t| now - t <= BURST_WINDOW_SEC).count();
        if burst > BURST_TRIGGER {
            self.temp_extra_until = now + BURST_WINDOW_SEC;
        }
    }

    fn prune(times: &mut VecDeque<f64>, now: f64) {
        while times.front().is_some_and(|&t| now - t > RATE_WINDOW_SEC) {
            times.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(now: f64, abs_idx: u64, amp: f64) -> GateInput {
        GateInput {
            now,
            abs_idx,
            amp,
            sd: 0.1,
            fs: 50.0,
            warm: true,
            harmonic_active: false,
            hard_fallback: false,
            long_est_ms: 0.0,
        }
    }

    #[test]
    fn test_first_candidate_accepted() {
        let mut gate = RrGate::new();
        let out = gate.evaluate(&input(1.0, 50, 1.0), &Options::default());
        assert_eq!(out.decision, GateDecision::Accept);
        assert_eq!(gate.accepted_total, 1);
    }

    #[test]
    fn test_stronger_candidate_replaces_within_refractory() {
        let mut gate = RrGate::new();
        let opt = Options::default();
        gate.evaluate(&input(1.0, 50, 1.0), &opt);
        // 100 ms later, stronger by 2 sd
        let out = gate.evaluate(&input(1.1, 55, 1.3), &opt);
        assert_eq!(out.decision, GateDecision::Replace);
        assert_eq!(gate.accepted_total, 1, "replacement is not a new acceptance");
    }

    #[test]
    fn test_weaker_candidate_rejected_within_refractory() {
        let mut gate = RrGate::new();
        let opt = Options::default();
        gate.evaluate(&input(1.0, 50, 1.0), &opt);
        let out = gate.evaluate(&input(1.1, 55, 0.8), &opt);
        assert_eq!(out.decision, GateDecision::Reject);
        assert_eq!(gate.short_reject_count, 1);
    }

    #[test]
    fn test_normal_interval_accepted_and_ema_forms() {
        let mut gate = RrGate::new();
        let opt = Options::default();
        gate.evaluate(&input(1.0, 50, 1.0), &opt);
        let out = gate.evaluate(&input(1.8, 90, 1.0), &opt); // 800 ms later
        assert_eq!(out.decision, GateDecision::Accept);
        let ema = gate.bpm_ema().expect("EMA forms after the first interval");
        assert!((ema - 75.0).abs() < 1.0, "800 ms interval is 75 BPM, got {ema}");
    }

    #[test]
    fn test_cold_floor_is_strict() {
        let mut gate = RrGate::new();
        let opt = Options::default();
        let mut cold = input(1.0, 50, 1.0);
        cold.warm = false;
        gate.evaluate(&cold, &opt);
        // 450 ms interval: above the relaxed floor, below the strict one
        let mut second = input(1.45, 72, 1.0);
        second.warm = false;
        let out = gate.evaluate(&second, &opt);
        assert_eq!(out.decision, GateDecision::Reject);
        assert!(out.min_rr_ms >= opt.min_rr_floor_strict);

        let mut warm_gate = RrGate::new();
        warm_gate.evaluate(&input(1.0, 50, 1.0), &opt);
        let out = warm_gate.evaluate(&input(1.45, 72, 1.0), &opt);
        assert_eq!(out.decision, GateDecision::Accept, "relaxed floor admits 450 ms");
    }

    #[test]
    fn test_amplitude_override_admits_short_interval() {
        let opt = Options::default();
        // Build a 75 BPM prior first so 0.7 * 800 = 560 ms binds.
        let mut gate = RrGate::new();
        gate.evaluate(&input(1.0, 50, 1.0), &opt);
        gate.evaluate(&input(1.8, 90, 1.0), &opt);
        // 460 ms follow-up, stronger than the last peak by > 1 sd
        let out = gate.evaluate(&input(2.26, 113, 1.5), &opt);
        assert_eq!(out.decision, GateDecision::Accept);

        let mut weak_gate = RrGate::new();
        weak_gate.evaluate(&input(1.0, 50, 1.0), &opt);
        weak_gate.evaluate(&input(1.8, 90, 1.0), &opt);
        let out = weak_gate.evaluate(&input(2.26, 113, 1.0), &opt);
        assert_eq!(out.decision, GateDecision::Reject, "same-amplitude short interval stays out");
    }

    #[test]
    fn test_harmonic_gate_raises_min_rr() {
        let mut gate = RrGate::new();
        let opt = Options::default();
        gate.evaluate(&input(1.0, 50, 1.0), &opt);
        let mut inp = input(1.7, 85, 1.0); // 700 ms, normally accepted
        inp.harmonic_active = true;
        inp.long_est_ms = 1000.0;
        let out = gate.evaluate(&inp, &opt);
        assert_eq!(out.decision, GateDecision::Reject);
        assert!((out.min_rr_ms - 860.0).abs() < 1.0);
    }

    #[test]
    fn test_reject_burst_arms_extra_refractory() {
        let mut gate = RrGate::new();
        let opt = Options::default();
        gate.evaluate(&input(1.0, 50, 1.0), &opt);
        for k in 0..5 {
            let t = 1.05 + 0.05 * k as f64;
            gate.evaluate(&input(t, 50 + 3 * (k + 1), 0.5), &opt);
        }
        assert!(gate.burst_armed(1.4), "burst of rejections arms the extra");
    }

    #[test]
    fn test_recent_rejection_rate_window() {
        let mut gate = RrGate::new();
        let opt = Options::default();
        gate.evaluate(&input(1.0, 50, 1.0), &opt);
        gate.evaluate(&input(1.1, 55, 0.5), &opt); // reject
        assert!(gate.recent_rejection_rate(1.2) > 0.4);
        // far in the future, the window is empty again
        assert_eq!(gate.recent_rejection_rate(100.0), 0.0);
    }
}
