//! Periodic grid calibration of the HP-threshold `ma_perc`.

use crate::batch::scale_data;
use crate::config::Options;
use crate::dsp;

const GRID: [f64; 9] = [10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 50.0, 60.0];
/// Calibration cadence in seconds.
const EVAL_PERIOD_SEC: f64 = 3.0;
/// Minimum dwell between accepted changes.
const DWELL_SEC: f64 = 6.0;
/// Relative score improvement required to switch.
const IMPROVE_FRAC: f64 = 0.15;
/// Score addend for candidates landing outside the BPM range.
const OUT_OF_RANGE_PENALTY: f64 = 1000.0;

#[derive(Debug, Clone)]
pub(crate) struct MaCalibrator {
    pub ma_active: f64,
    last_eval: f64,
    last_change: f64,
    high_bpm_since: Option<f64>,
    bpm130_since: Option<f64>,
    cv_high_since: Option<f64>,
}

impl MaCalibrator {
    pub(crate) fn new(initial: f64) -> Self {
        Self {
            ma_active: initial,
            last_eval: f64::NEG_INFINITY,
            last_change: f64::NEG_INFINITY,
            high_bpm_since: None,
            bpm130_since: None,
            cv_high_since: None,
        }
    }

    /// Run a grid calibration when the cadence allows.
    pub(crate) fn maybe_calibrate(
        &mut self,
        now: f64,
        filt: &[f64],
        fs: f64,
        bpm_ema: f64,
        cv: f64,
        opt: &Options,
    ) {
        track(&mut self.high_bpm_since, bpm_ema > 120.0, now);
        track(&mut self.bpm130_since, bpm_ema > 130.0, now);
        track(&mut self.cv_high_since, cv > 0.20 && bpm_ema > 120.0, now);

        if now - self.last_eval >= EVAL_PERIOD_SEC && filt.len() >= (5.0 * fs) as usize {
            self.last_eval = now;
            let scaled = scale_data(filt, 0.0, 1024.0);
            let refr_samples =
                ((opt.refractory_ms / 1000.0 * fs).round() as usize).max(1);

            let current = score_for(&scaled, fs, self.ma_active, refr_samples, opt);
            let mut best_ma = self.ma_active;
            let mut best = current;
            for &ma in &GRID {
                let s = score_for(&scaled, fs, ma, refr_samples, opt);
                if s < best {
                    best = s;
                    best_ma = ma;
                }
            }
            if current.is_finite()
                && current > 0.0
                && best_ma != self.ma_active
                && (current - best) / current >= IMPROVE_FRAC
                && now - self.last_change >= DWELL_SEC
            {
                log::debug!("ma_perc recalibrated {} -> {}", self.ma_active, best_ma);
                self.ma_active = best_ma;
                self.last_change = now;
            }
        }

        // High sustained BPM with an aggressive threshold invites doubling;
        // bias upward and enforce floors.
        if persisted(self.high_bpm_since, now, 10.0) && self.ma_active < 25.0 {
            self.ma_active += 10.0;
            self.last_change = now;
        }
        if persisted(self.cv_high_since, now, 6.0) {
            self.ma_active = self.ma_active.max(15.0);
        }
        if persisted(self.bpm130_since, now, 10.0) {
            self.ma_active = self.ma_active.max(20.0);
        }
    }
}

fn track(slot: &mut Option<f64>, condition: bool, now: f64) {
    if condition {
        slot.get_or_insert(now);
    } else {
        *slot = None;
    }
}

fn persisted(slot: Option<f64>, now: f64, secs: f64) -> bool {
    slot.is_some_and(|t| now - t >= secs)
}

/// HP-style detection on the rescaled window followed by refractory
/// consolidation; lower scores are better.
fn score_for(scaled: &[f64], fs: f64, ma_perc: f64, refr_samples: usize, opt: &Options) -> f64 {
    let peaks = hp_detect_consolidated(scaled, fs, ma_perc, refr_samples);
    if peaks.len() < 3 {
        return f64::INFINITY;
    }
    let rr: Vec<f64> =
        peaks.windows(2).map(|w| (w[1] - w[0]) as f64 / fs * 1000.0).collect();
    if rr.len() < 2 {
        return f64::INFINITY;
    }
    let bpm = 60_000.0 / dsp::mean(&rr);
    let sd = dsp::sd_sample(&rr);
    let mut score = sd * (1.0 + 0.4 * ((bpm - 120.0) / 40.0).max(0.0));
    if bpm < opt.bpm_min || bpm > opt.bpm_max {
        score += OUT_OF_RANGE_PENALTY;
    }
    if bpm > 120.0 && ma_perc < 25.0 {
        score += sd;
    }
    score
}

/// Rolling-mean-lift detection over a `[0, 1024]` rescaled window, keeping
/// the strongest peak within each refractory span.
pub(crate) fn hp_detect_consolidated(
    scaled: &[f64],
    fs: f64,
    ma_perc: f64,
    refr_samples: usize,
) -> Vec<usize> {
    let n = scaled.len();
    if n < 3 {
        return Vec::new();
    }
    let win = ((0.75 * fs).round() as usize).max(5);
    let mut cumsum = vec![0.0; n + 1];
    for i in 0..n {
        cumsum[i + 1] = cumsum[i] + scaled[i];
    }

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..n - 1 {
        let start = i.saturating_sub(win / 2);
        let end = (i + (win - win / 2)).min(n);
        let rm = (cumsum[end] - cumsum[start]) / (end - start).max(1) as f64;
        let thr = rm + rm / 100.0 * ma_perc;
        if scaled[i] > thr && scaled[i] > scaled[i - 1] && scaled[i] >= scaled[i + 1] {
            match peaks.last() {
                Some(&last) if i - last < refr_samples => {
                    if scaled[i] > scaled[last] {
                        *peaks.last_mut().unwrap() = i;
                    }
                }
                _ => peaks.push(i),
            }
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_window(fs: f64, hz: f64, secs: f64) -> Vec<f64> {
        (0..(fs * secs) as usize)
            .map(|i| (2.0 * PI * hz * i as f64 / fs).sin() + 1.0)
            .collect()
    }

    #[test]
    fn test_hp_detect_finds_each_cycle() {
        let fs = 50.0;
        let x = sine_window(fs, 1.2, 20.0);
        let scaled = scale_data(&x, 0.0, 1024.0);
        let peaks = hp_detect_consolidated(&scaled, fs, 30.0, 13);
        // 1.2 Hz over 20 s is 24 cycles
        assert!(
            (20..=25).contains(&peaks.len()),
            "expected about 24 peaks, got {}",
            peaks.len()
        );
    }

    #[test]
    fn test_calibration_respects_dwell() {
        let fs = 50.0;
        let x = sine_window(fs, 1.2, 20.0);
        let mut calib = MaCalibrator::new(30.0);
        let opt = Options::default();
        calib.maybe_calibrate(10.0, &x, fs, 72.0, 0.05, &opt);
        let first = calib.ma_active;
        // Immediately after, the cadence gate blocks another evaluation.
        calib.maybe_calibrate(10.5, &x, fs, 72.0, 0.05, &opt);
        assert_eq!(calib.ma_active, first);
    }

    #[test]
    fn test_floor_applied_on_sustained_fast_rhythm() {
        let mut calib = MaCalibrator::new(10.0);
        let opt = Options::default();
        let x = sine_window(50.0, 2.2, 20.0);
        // Sustain BPM > 130 for over 10 s.
        calib.maybe_calibrate(0.0, &x, 50.0, 140.0, 0.05, &opt);
        calib.maybe_calibrate(11.0, &x, 50.0, 140.0, 0.05, &opt);
        assert!(calib.ma_active >= 20.0, "floor must lift ma_perc, got {}", calib.ma_active);
    }
}
