//! Streaming facade: sliding-window ingest, incremental peak detection,
//! poll-cadence metric assembly.
//!
//! A `RealtimeAnalyzer` owns every piece of mutable state (window, filter,
//! rolling stats, peak train, harmonic machine, EMAs). It is not
//! internally synchronized; push and poll must not overlap on the same
//! instance.

use crate::batch;
use crate::config::{validate_options, Options};
use crate::detect::{self, ma_calib::MaCalibrator, rr_gate::{GateDecision, GateInput, RrGate}};
use crate::dsp::{self, BiquadChain, RollingStats};
use crate::error::Result;
use crate::harmonic::{self, repair, HarmonicState, PsdObservation};
use crate::metrics::{HeartMetrics, QualityInfo};
use crate::quality::{binary, snr, SnrEstimator};

const DEFAULT_WINDOW_SEC: f64 = 60.0;
const DEFAULT_UPDATE_SEC: f64 = 1.0;
const DEFAULT_PSD_UPDATE_SEC: f64 = 2.0;
const DEFAULT_DISPLAY_HZ: f64 = 25.0;
/// Warm-up: seconds of data and accepted intervals.
const WARMUP_SECS: f64 = 15.0;
const WARMUP_MIN_INTERVALS: u64 = 10;
/// Confidence stays zero until either bound is met.
const CONF_WARMUP_BEATS: u64 = 15;
/// Effective-fs EMA step for the timestamped push path.
const EFFECTIVE_FS_ALPHA: f64 = 0.1;
/// SNR stays in active-band mode this long after the last flag clears.
const ACTIVE_BAND_LINGER_SEC: f64 = 5.0;

pub struct RealtimeAnalyzer {
    fs: f64,
    effective_fs: f64,
    opt: Options,
    window_sec: f64,
    update_sec: f64,
    psd_update_sec: f64,
    display_hz: f64,

    chain: BiquadChain,
    raw: Vec<f64>,
    filt: Vec<f64>,
    display: Vec<f64>,
    first_abs: u64,

    stats_signed: RollingStats,
    stats_rect: RollingStats,
    prev1: Option<f64>,
    prev2: Option<f64>,

    peaks: Vec<u64>,
    peak_amps: Vec<f64>,

    gate: RrGate,
    harmonic: HarmonicState,
    snr: SnrEstimator,
    ma_calib: MaCalibrator,

    now_sec: f64,
    start_ts: Option<f64>,
    last_emit_time: f64,
    last_psd_time: f64,
    prev_poll_bpm: f64,
    brake_reverted: bool,

    last_quality: QualityInfo,
    last_peaks: Vec<i32>,
    last_rr: Vec<f64>,
}

impl RealtimeAnalyzer {
    /// Construct an analyzer for the given nominal sample rate.
    pub fn new(fs: f64, opt: Options) -> Result<Self> {
        validate_options(fs, &opt)?;
        let rolling_len = ((0.75 * fs).round() as usize).max(5);
        Ok(Self {
            fs,
            effective_fs: fs,
            chain: BiquadChain::bandpass(fs, opt.low_hz, opt.high_hz, opt.iir_order),
            window_sec: DEFAULT_WINDOW_SEC,
            update_sec: DEFAULT_UPDATE_SEC,
            psd_update_sec: DEFAULT_PSD_UPDATE_SEC,
            display_hz: DEFAULT_DISPLAY_HZ,
            raw: Vec::with_capacity((DEFAULT_WINDOW_SEC * fs) as usize + 8 * fs as usize),
            filt: Vec::with_capacity((DEFAULT_WINDOW_SEC * fs) as usize + 8 * fs as usize),
            display: Vec::new(),
            first_abs: 0,
            stats_signed: RollingStats::new(rolling_len),
            stats_rect: RollingStats::new(rolling_len),
            prev1: None,
            prev2: None,
            peaks: Vec::new(),
            peak_amps: Vec::new(),
            gate: RrGate::new(),
            harmonic: HarmonicState::new(),
            snr: SnrEstimator::new(),
            ma_calib: MaCalibrator::new(opt.ma_perc),
            opt,
            now_sec: 0.0,
            start_ts: None,
            last_emit_time: 0.0,
            last_psd_time: 0.0,
            prev_poll_bpm: 0.0,
            brake_reverted: false,
            last_quality: QualityInfo::default(),
            last_peaks: Vec::new(),
            last_rr: Vec::new(),
        })
    }

    pub fn set_window_seconds(&mut self, sec: f64) {
        self.window_sec = sec.max(1.0);
        self.trim();
    }

    pub fn set_update_interval_seconds(&mut self, sec: f64) {
        self.update_sec = sec.max(0.1);
    }

    pub fn set_psd_update_seconds(&mut self, sec: f64) {
        self.psd_update_sec = sec.max(0.5);
    }

    pub fn set_display_hz(&mut self, hz: f64) {
        self.display_hz = hz.clamp(1.0, self.fs.max(1.0));
        self.rebuild_display();
    }

    /// Canned overrides for torch-lit finger capture.
    pub fn apply_preset_torch(&mut self) {
        self.opt.low_hz = 0.7;
        self.opt.high_hz = 3.0;
        self.opt.refractory_ms = self.opt.refractory_ms.max(300.0);
        self.opt.use_hp_threshold = true;
        self.chain = BiquadChain::bandpass(self.fs, 0.7, 3.0, self.opt.iir_order);
    }

    /// Canned overrides for ambient-light capture.
    pub fn apply_preset_ambient(&mut self) {
        self.opt.low_hz = 0.5;
        self.opt.high_hz = 3.5;
        self.opt.threshold_scale = self.opt.threshold_scale.max(0.5);
        self.opt.refractory_ms = self.opt.refractory_ms.max(320.0);
        self.chain = BiquadChain::bandpass(self.fs, 0.5, 3.5, self.opt.iir_order);
    }

    pub fn options(&self) -> &Options {
        &self.opt
    }

    pub fn effective_fs(&self) -> f64 {
        self.effective_fs
    }

    pub fn last_quality(&self) -> &QualityInfo {
        &self.last_quality
    }

    pub fn latest_peaks(&self) -> &[i32] {
        &self.last_peaks
    }

    pub fn latest_rr(&self) -> &[f64] {
        &self.last_rr
    }

    pub fn display_buffer(&self) -> &[f64] {
        &self.display
    }

    /// Append raw samples at the nominal rate.
    pub fn push(&mut self, samples: &[f64]) {
        if samples.is_empty() {
            return;
        }
        self.append(samples);
        self.now_sec += samples.len() as f64 / self.effective_fs;
        self.trim();
        self.rebuild_display();
    }

    /// Append samples with capture timestamps (seconds). The effective
    /// sample rate follows an EMA of the inverse mean inter-sample delta.
    pub fn push_with_timestamps(&mut self, samples: &[f64], timestamps: &[f64]) {
        if samples.is_empty() {
            return;
        }
        if timestamps.len() != samples.len() || timestamps.len() < 2 {
            self.push(samples);
            return;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for w in timestamps.windows(2) {
            let d = w[1] - w[0];
            if d > 0.0 && d.is_finite() {
                sum += d;
                count += 1;
            }
        }
        if count > 0 {
            let inst_fs = count as f64 / sum;
            self.effective_fs = (self.effective_fs
                + EFFECTIVE_FS_ALPHA * (inst_fs - self.effective_fs))
                .clamp(1.0, 10_000.0);
        }
        let start = *self.start_ts.get_or_insert(timestamps[0]);
        self.append(samples);
        self.now_sec = (timestamps[timestamps.len() - 1] - start).max(self.now_sec);
        self.trim();
        self.rebuild_display();
    }

    /// Emit a metrics bundle when the update interval has elapsed.
    pub fn poll(&mut self) -> Option<HeartMetrics> {
        if self.now_sec - self.last_emit_time < self.update_sec {
            return None;
        }
        self.last_emit_time = self.now_sec;
        if self.filt.is_empty() {
            return None;
        }

        // Batch baseline over the already-filtered window.
        let mut o = self.opt.clone();
        o.low_hz = 0.0;
        o.high_hz = 0.0;
        let mut out = match batch::analyze_signal(&self.filt, self.effective_fs, &o) {
            Ok(m) => m,
            Err(_) => HeartMetrics::default(),
        };

        self.maybe_psd_update(&out);

        if self.opt.use_hp_threshold && self.opt.adaptive_ma_perc {
            let rr = self.rr_from_peaks();
            let cv = dsp::coeff_of_variation(&rr);
            let bpm = self.gate.bpm_ema().unwrap_or(0.0);
            self.ma_calib
                .maybe_calibrate(self.now_sec, &self.filt, self.effective_fs, bpm, cv, &self.opt);
        }

        let raw_snapshot = self.peaks.clone();
        self.brake_reverted = false;
        if self.harmonic.any_active() {
            let rr = self.rr_from_peaks();
            let period_ms = if self.harmonic.doubling_long_rr_ms > 0.0 {
                self.harmonic.doubling_long_rr_ms
            } else if self.snr.last_f0() > 0.0 {
                1000.0 / self.snr.last_f0()
            } else {
                2.0 * dsp::median(&rr)
            };
            let outcome = repair::repair_rr(
                &mut self.peaks,
                &mut self.peak_amps,
                self.effective_fs,
                self.now_sec,
                period_ms / 1000.0,
                &self.harmonic,
                self.prev_poll_bpm,
                &self.opt,
            );
            self.brake_reverted = outcome.reverted;
        }

        self.assemble(&mut out, &raw_snapshot);
        self.prev_poll_bpm = out.bpm;
        self.last_quality = out.quality.clone();
        self.last_peaks = out.peak_list.clone();
        self.last_rr = out.rr_list.clone();
        Some(out)
    }

    fn warm(&self) -> bool {
        self.now_sec >= WARMUP_SECS
            && self.gate.accepted_total.saturating_sub(1) >= WARMUP_MIN_INTERVALS
    }

    fn conf_warm_blocked(&self) -> bool {
        self.now_sec < WARMUP_SECS && self.gate.accepted_total < CONF_WARMUP_BEATS
    }

    fn active_ma_perc(&self) -> f64 {
        if self.opt.use_hp_threshold {
            self.ma_calib.ma_active
        } else {
            self.opt.ma_perc
        }
    }

    fn rr_from_peaks(&self) -> Vec<f64> {
        self.peaks
            .windows(2)
            .map(|w| (w[1] - w[0]) as f64 / self.effective_fs * 1000.0)
            .collect()
    }

    fn append(&mut self, samples: &[f64]) {
        for &x in samples {
            let y = self.chain.process(x);
            self.raw.push(x);
            self.filt.push(y);
            self.stats_signed.push(y);
            self.stats_rect.push(y.abs());
            let abs_idx = self.first_abs + self.filt.len() as u64 - 1;
            if let (Some(p2), Some(p1)) = (self.prev2, self.prev1) {
                if p1 > p2 && p1 >= y && abs_idx >= 1 {
                    self.consider_candidate(abs_idx - 1, p1);
                }
            }
            self.prev2 = self.prev1;
            self.prev1 = Some(y);
        }
    }

    fn consider_candidate(&mut self, abs_idx: u64, amp_raw: f64) {
        let t = abs_idx as f64 / self.effective_fs;

        let (passes, amp_cmp, sd_cmp) = if self.opt.use_hp_threshold {
            match detect::HpScale::from_stats(&self.stats_rect) {
                Some(scale) => {
                    let scaled_amp = scale.rescale(amp_raw.abs());
                    let scaled_mean = scale.rescale(self.stats_rect.mean());
                    let thr = detect::hp_threshold(
                        scaled_mean,
                        self.active_ma_perc(),
                        self.gate.burst_armed(t),
                    );
                    (scaled_amp > thr, scaled_amp, scale.rescale_spread(self.stats_rect.sd()))
                }
                None => (false, 0.0, 0.0),
            }
        } else {
            let thr = detect::adaptive_threshold(&self.stats_signed, self.opt.threshold_scale);
            (amp_raw > thr, amp_raw, self.stats_signed.sd())
        };
        if !passes {
            return;
        }

        let harmonic_active = self.harmonic.any_active();
        let long_est_ms = if harmonic_active {
            let rr = self.rr_from_peaks();
            self.harmonic.long_rr_estimate(&rr, self.snr.last_f0(), &self.opt)
        } else {
            0.0
        };
        let outcome = self.gate.evaluate(
            &GateInput {
                now: t,
                abs_idx,
                amp: amp_cmp,
                sd: sd_cmp,
                fs: self.effective_fs,
                warm: self.warm(),
                harmonic_active,
                hard_fallback: self.harmonic.hard_fallback_active(t),
                long_est_ms,
            },
            &self.opt,
        );
        match outcome.decision {
            GateDecision::Accept => {
                self.peaks.push(abs_idx);
                self.peak_amps.push(amp_raw);
            }
            GateDecision::Replace => match (self.peaks.last_mut(), self.peak_amps.last_mut()) {
                (Some(p), Some(a)) => {
                    *p = abs_idx;
                    *a = amp_raw;
                }
                _ => {
                    self.peaks.push(abs_idx);
                    self.peak_amps.push(amp_raw);
                }
            },
            GateDecision::Reject => {}
        }
    }

    fn trim(&mut self) {
        let max_len = (self.window_sec * self.effective_fs) as usize;
        if self.filt.len() > max_len {
            let drop = self.filt.len() - max_len;
            self.raw.drain(0..drop);
            self.filt.drain(0..drop);
            self.first_abs += drop as u64;
            let fa = self.first_abs;
            let cut = self.peaks.iter().position(|&p| p >= fa).unwrap_or(self.peaks.len());
            self.peaks.drain(0..cut);
            self.peak_amps.drain(0..cut);
        }
    }

    fn rebuild_display(&mut self) {
        let step = ((self.effective_fs / self.display_hz).round() as usize).max(1);
        self.display = self.filt.iter().copied().step_by(step).collect();
    }

    /// PSD-cadence work: SNR, confidence, and harmonic transitions.
    fn maybe_psd_update(&mut self, out: &HeartMetrics) {
        if self.now_sec - self.last_psd_time < self.psd_update_sec {
            return;
        }
        self.last_psd_time = self.now_sec;

        let rr = self.rr_from_peaks();
        let f0_raw = if rr.len() >= 3 {
            1000.0 / dsp::mean(&rr)
        } else if out.bpm > 0.0 {
            out.bpm / 60.0
        } else {
            self.snr.last_f0()
        };
        if !(f0_raw.is_finite() && f0_raw > 0.0) {
            return;
        }

        let psd =
            self.snr.compute_psd(&self.filt, self.effective_fs, self.opt.nfft, self.opt.overlap);
        if psd.is_empty() {
            return;
        }
        let df = psd.df();
        let now = self.now_sec;
        let active_mode = self.harmonic.any_active()
            || now - self.harmonic.last_active_time < ACTIVE_BAND_LINGER_SEC;
        let band = (2.0 * df)
            .max(if active_mode { self.opt.snr_band_active } else { self.opt.snr_band_passive });

        let p_fund = snr::band_power(&psd, f0_raw, band);
        let p_half = snr::band_power(&psd, f0_raw / 2.0, band);
        let ratio = if p_fund > 1e-15 { p_half / p_fund } else { 0.0 };
        let half_meas = snr::peak_freq_in_band(
            &psd,
            (f0_raw / 2.0 - band).max(df),
            f0_raw / 2.0 + band,
            f0_raw / 2.0,
        );
        self.harmonic.push_half_f0(half_meas, self.opt.half_f0_hist_len);
        let stable_warm = self.harmonic.half_stable(self.opt.half_f0_tol_hz_warm);
        let stable_cold = self.harmonic.half_stable(self.opt.half_f0_tol_hz_cold);

        // Harmonic remap: report and score at the halved fundamental.
        let remap = self.harmonic.any_active()
            || (ratio >= self.opt.p_half_over_fund_threshold_soft && stable_warm);
        let f0_used = if remap { f0_raw / 2.0 } else { f0_raw };

        if let Some(inst) = snr::instantaneous_snr(&psd, f0_used, band) {
            self.snr.apply_update(now, inst, active_mode, &self.opt);
        }
        self.snr.set_f0(f0_used);
        self.snr.set_ratio(ratio);

        let rejection = self.gate.recent_rejection_rate(now);
        let cv = dsp::coeff_of_variation(&rr);
        let clean_boost =
            rejection < 0.03 && cv < 0.12 && self.harmonic.active_secs(now) >= 8.0;
        self.snr.update_confidence(active_mode, rejection, cv, clean_boost, self.conf_warm_blocked());

        let median_rr = dsp::median(&rr);
        let obs = PsdObservation {
            now,
            age: self.now_sec,
            warm: self.warm(),
            ratio,
            stable_warm,
            stable_cold,
            rejection_rate: rejection,
            cv,
            median_rr_ms: median_rr,
            median_bpm: if median_rr > 0.0 { 60_000.0 / median_rr } else { 0.0 },
            bpm_ema: self.gate.bpm_ema().unwrap_or(0.0),
            ma_perc_active: self.active_ma_perc(),
        };
        self.harmonic.on_psd_update(&obs, &rr, &self.opt);
    }

    /// Override the batch baseline with streaming state.
    fn assemble(&mut self, out: &mut HeartMetrics, raw_snapshot: &[u64]) {
        let rr = self.rr_from_peaks();
        let plausible: Vec<f64> =
            rr.iter().copied().filter(|&r| r > 250.0 && r < 2000.0).collect();
        if !plausible.is_empty() {
            out.bpm = 60_000.0 / dsp::mean(&plausible);
        }

        let fa = self.first_abs;
        out.peak_list = self.peaks.iter().map(|&p| (p - fa) as i32).collect();
        out.peak_list_raw =
            raw_snapshot.iter().filter(|&&p| p >= fa).map(|&p| (p - fa) as i32).collect();
        out.rr_list = rr.clone();

        let imask = binary::interval_reject_mask(&rr, self.opt.threshold_rr);
        out.binary_peak_mask = binary::peak_mask(out.peak_list.len(), &imask);
        out.binary_segments = binary::build_segments(
            &imask,
            self.opt.segment_reject_window_beats,
            self.opt.segment_reject_max_rejects,
            self.opt.segment_reject_overlap,
        );

        let masked: Vec<f64> = rr
            .iter()
            .zip(imask.iter())
            .filter(|(_, &rej)| !rej)
            .map(|(&r, _)| r)
            .collect();
        batch::apply_time_domain(out, &masked, &self.opt);

        let q = &mut out.quality;
        q.total_beats = rr.len();
        q.rejected_beats = imask.iter().filter(|&&r| r).count();
        q.rejection_rate =
            if rr.is_empty() { 0.0 } else { q.rejected_beats as f64 / rr.len() as f64 };
        q.snr_db = self.snr.snr_db();
        q.confidence = if self.conf_warm_blocked() { 0.0 } else { self.snr.confidence() };
        q.f0_hz = self.snr.last_f0();
        q.ma_perc_active = self.active_ma_perc();
        q.doubling_flag = self.harmonic.hard;
        q.soft_doubling_flag = self.harmonic.soft;
        q.doubling_hint_flag = self.harmonic.hint;
        q.hard_fallback_active = self.harmonic.hard_fallback_active(self.now_sec);
        q.rr_fallback_mode_active =
            self.harmonic.rr_fallback_driving_hint || self.brake_reverted;
        q.rr_short_frac = harmonic::short_rr_fraction(&rr);
        let long_ref = if self.harmonic.doubling_long_rr_ms > 0.0 {
            self.harmonic.doubling_long_rr_ms
        } else {
            2.0 * dsp::median(&rr)
        };
        q.rr_long_ms = if self.harmonic.any_active() { long_ref } else { 0.0 };
        q.pair_frac = harmonic::pair_fraction(&rr, long_ref);
        q.p_half_over_fund = self.snr.p_half_over_fund();
        q.soft_streak = self.harmonic.soft_streak;
        q.soft_secs = self.harmonic.soft_secs(self.now_sec);
        q.refractory_ms_active = self.gate.last_refractory_ms;
        q.min_rr_bound_ms = self.gate.last_min_rr_ms;
        q.good_quality =
            q.rejection_rate <= self.opt.segment_reject_threshold && !self.harmonic.hard;
        q.quality_warning = if self.harmonic.hard {
            "harmonic doubling suppression active".to_string()
        } else if q.rejection_rate > self.opt.segment_reject_threshold {
            "high beat rejection rate".to_string()
        } else {
            String::new()
        };
    }
}
