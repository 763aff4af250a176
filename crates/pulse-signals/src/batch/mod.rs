//! One-shot batch analysis: `analyze_signal` over a raw PPG window and
//! `analyze_rr_intervals` over an RR vector.
//!
//! Both are pure functions of their inputs; the streaming facade calls
//! `analyze_signal` on its sliding window as a baseline inside every poll.

mod clean;
mod preprocess;

pub use clean::{remove_outliers_iqr, remove_outliers_quotient_filter, remove_outliers_zscore};
pub use preprocess::{hampel_filter, interpolate_clipping, interpolate_peaks, scale_data};

use ndarray::Array1;

use crate::config::{validate_options, Options, PoincareMode, SdsdMode};
use crate::dsp::{self, welch_psd, BiquadChain};
use crate::error::{AnalyzerError, Result};
use crate::metrics::HeartMetrics;
use crate::quality::binary;

/// Plausible IBI bounds in ms for the signal path.
const IBI_MIN_MS: f64 = 250.0;
const IBI_MAX_MS: f64 = 2000.0;
/// RR resampling rate for spectral HRV metrics.
const RR_GRID_HZ: f64 = 4.0;

/// Analyze a raw PPG segment: detrend, bandpass, peak detection, and the
/// full time/frequency/quality metric set.
pub fn analyze_signal(signal: &[f64], fs: f64, opt: &Options) -> Result<HeartMetrics> {
    if signal.is_empty() {
        return Err(AnalyzerError::EmptySignal);
    }
    validate_options(fs, opt)?;

    let mut x = signal.to_vec();
    if opt.interp_clipping {
        x = interpolate_clipping(&x, fs, opt.clipping_threshold);
    }
    if opt.hampel_correct {
        x = hampel_filter(&x, opt.hampel_window, opt.hampel_threshold);
    }

    let detrend_win = ((0.75 * fs).round() as usize).max(5);
    let mut y = moving_average_detrend(&x, detrend_win);
    if !opt.bandpass_disabled() {
        let mut chain = BiquadChain::bandpass(fs, opt.low_hz, opt.high_hz, opt.iir_order);
        y = chain.process_slice(&y);
    }

    let peaks = detect_peaks(&y, fs, opt.refractory_ms, opt.threshold_scale);
    let positions: Vec<f64> = if opt.high_precision {
        // Sub-sample refinement quantized onto the high-precision grid.
        let hp_fs = opt.high_precision_fs.max(fs);
        preprocess::refine_peaks_fractional(&y, &peaks)
            .into_iter()
            .map(|f| (f / fs * hp_fs).round() * fs / hp_fs)
            .collect()
    } else {
        peaks.iter().map(|&p| p as f64).collect()
    };

    let mut ibi = Vec::new();
    for w in positions.windows(2) {
        let ms = (w[1] - w[0]) * 1000.0 / fs;
        if ms > IBI_MIN_MS && ms < IBI_MAX_MS {
            ibi.push(ms);
        }
    }

    let mut out = HeartMetrics::default();
    let rr = if opt.clean_rr { clean::clean_rr(&ibi, opt) } else { ibi.clone() };
    if !rr.is_empty() {
        out.bpm = 60000.0 / dsp::mean(&rr);
    }
    out.ibi_ms = ibi;
    out.rr_list = rr.clone();

    apply_time_domain(&mut out, &rr, opt);

    let beat_times: Vec<f64> = positions.iter().map(|&p| p / fs).collect();
    let ibi_for_freq = out.ibi_ms.clone();
    frequency_metrics(&mut out, &beat_times, &ibi_for_freq, opt);

    out.peak_list = peaks.iter().map(|&p| p as i32).collect();
    out.peak_list_raw = out.peak_list.clone();
    apply_binary_quality(&mut out, opt);
    sanitize(&mut out);
    Ok(out)
}

/// Analyze an RR vector directly, skipping detection and IBI filtering.
pub fn analyze_rr_intervals(rr_ms: &[f64], opt: &Options) -> Result<HeartMetrics> {
    if rr_ms.is_empty() {
        return Err(AnalyzerError::EmptySignal);
    }
    let rr = if opt.clean_rr { clean::clean_rr(rr_ms, opt) } else { rr_ms.to_vec() };

    let mut out = HeartMetrics::default();
    if !rr.is_empty() {
        out.bpm = 60000.0 / dsp::mean(&rr);
    }
    out.ibi_ms = rr_ms.to_vec();
    out.rr_list = rr.clone();

    apply_time_domain(&mut out, &rr, opt);

    // Synthetic beat times from the cumulative RR sum.
    let mut beat_times = Vec::with_capacity(rr.len() + 1);
    let mut t = 0.0;
    beat_times.push(t);
    for &r in &rr {
        t += r / 1000.0;
        beat_times.push(t);
    }
    frequency_metrics(&mut out, &beat_times, &rr, opt);

    apply_binary_quality(&mut out, opt);
    sanitize(&mut out);
    Ok(out)
}

/// Median absolute deviation.
pub fn calculate_mad(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let med = dsp::median(data);
    let devs: Vec<f64> = data.iter().map(|&x| (x - med).abs()).collect();
    dsp::median(&devs)
}

/// Breathing rate from RR modulation: Welch peak in the 0.1..0.4 Hz band
/// over the 4 Hz resampled RR series. Hz by default, breaths/min per
/// `breathing_as_bpm`.
pub fn calculate_breathing_rate(rr_ms: &[f64], opt: &Options) -> f64 {
    let mut beat_times = Vec::with_capacity(rr_ms.len() + 1);
    let mut t = 0.0;
    beat_times.push(t);
    for &r in rr_ms {
        t += r / 1000.0;
        beat_times.push(t);
    }
    breathing_rate_inner(&beat_times, rr_ms, opt)
}

/// Moving-average detrend with a centered window.
pub(crate) fn moving_average_detrend(x: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return x.to_vec();
    }
    let n = x.len();
    let mut cumsum = vec![0.0; n + 1];
    for i in 0..n {
        cumsum[i + 1] = cumsum[i] + x[i];
    }
    let mut out = vec![0.0; n];
    for i in 0..n {
        let start = i.saturating_sub(window / 2);
        let end = (i + (window - window / 2)).min(n);
        let count = (end - start).max(1);
        let mean = (cumsum[end] - cumsum[start]) / count as f64;
        out[i] = x[i] - mean;
    }
    out
}

/// Batch peak detection: three-sample local max over an adaptive
/// `mean + scale * sd` threshold from a centered half-second window,
/// with a hard refractory.
pub(crate) fn detect_peaks(x: &[f64], fs: f64, refractory_ms: f64, scale: f64) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }
    let ref_samples = (refractory_ms * 0.001 * fs).round() as i64;
    let win = ((0.5 * fs).round() as usize).max(5);

    let mut cumsum = vec![0.0; n + 1];
    let mut cumsq = vec![0.0; n + 1];
    for i in 0..n {
        cumsum[i + 1] = cumsum[i] + x[i];
        cumsq[i + 1] = cumsq[i] + x[i] * x[i];
    }

    let mut last_peak: i64 = -ref_samples - 1;
    for i in 1..n - 1 {
        let start = i.saturating_sub(win);
        let end = (i + win).min(n);
        let count = (end - start).max(1) as f64;
        let mean = (cumsum[end] - cumsum[start]) / count;
        let var = (cumsq[end] - cumsq[start]) / count - mean * mean;
        let sd = var.max(0.0).sqrt();
        let thr = mean + scale * sd;
        let is_peak = x[i] > thr && x[i] > x[i - 1] && x[i] >= x[i + 1];
        if is_peak && i as i64 - last_peak >= ref_samples {
            peaks.push(i);
            last_peak = i as i64;
        }
    }
    peaks
}

/// Time-domain and Poincare measures over `rr`, written into `out`.
pub(crate) fn apply_time_domain(out: &mut HeartMetrics, rr: &[f64], opt: &Options) {
    out.sdnn = dsp::sd_sample(rr);
    out.mad = calculate_mad(rr);
    if rr.len() < 2 {
        return;
    }

    let diffs: Vec<f64> = rr.windows(2).map(|w| w[1] - w[0]).collect();
    let d = Array1::from(diffs.clone());
    out.rmssd = (d.dot(&d) / d.len() as f64).sqrt();
    out.sdsd = match opt.sdsd_mode {
        SdsdMode::Signed => dsp::sd_sample(&diffs),
        SdsdMode::Abs => {
            let abs: Vec<f64> = diffs.iter().map(|v| v.abs()).collect();
            dsp::sd_sample(&abs)
        }
    };

    let nn20 = diffs.iter().filter(|d| d.abs() > 20.0).count();
    let nn50 = diffs.iter().filter(|d| d.abs() > 50.0).count();
    out.nn20 = nn20 as f64;
    out.nn50 = nn50 as f64;
    let unit = if opt.pnn_as_percent { 100.0 } else { 1.0 };
    out.pnn20 = unit * nn20 as f64 / diffs.len() as f64;
    out.pnn50 = unit * nn50 as f64 / diffs.len() as f64;

    match opt.poincare_mode {
        PoincareMode::Formula => {
            out.sd1 = out.rmssd / std::f64::consts::SQRT_2;
            out.sd2 = (2.0 * out.sdnn * out.sdnn - 0.5 * out.sdsd * out.sdsd).max(0.0).sqrt();
        }
        PoincareMode::Masked => {
            let half: Vec<f64> = diffs.iter().map(|v| v / std::f64::consts::SQRT_2).collect();
            let sums: Vec<f64> =
                rr.windows(2).map(|w| (w[1] + w[0]) / std::f64::consts::SQRT_2).collect();
            out.sd1 = dsp::sd_sample(&half);
            out.sd2 = dsp::sd_sample(&sums);
        }
    }
    out.sd1_sd2_ratio = if out.sd2 > 1e-12 { out.sd1 / out.sd2 } else { 0.0 };
    out.ellipse_area = std::f64::consts::PI * out.sd1 * out.sd2;
}

/// Trapezoidal band integration over a PSD, weighting endpoints by band
/// membership.
pub(crate) fn integrate_band(freqs: &[f64], psd: &[f64], lo: f64, hi: f64) -> f64 {
    let mut area = 0.0;
    for i in 1..freqs.len() {
        let f1 = freqs[i - 1];
        let f2 = freqs[i];
        if f2 < lo || f1 > hi {
            continue;
        }
        let w1 = if f1 >= lo && f1 <= hi { 1.0 } else { 0.0 };
        let w2 = if f2 >= lo && f2 <= hi { 1.0 } else { 0.0 };
        area += (f2 - f1) * 0.5 * (psd[i - 1] * w1 + psd[i] * w2);
    }
    area
}

/// Linear resample of the per-beat IBI series onto a uniform grid.
fn resample_ibi(beat_times: &[f64], ibi_sec: &[f64], target_fs: f64) -> Vec<f64> {
    let duration = beat_times[beat_times.len() - 1] - beat_times[0];
    let n = (duration * target_fs).floor() as usize;
    if n == 0 {
        return Vec::new();
    }
    let t0 = beat_times[0];
    let dt = 1.0 / target_fs;
    let last = ibi_sec.len() - 1;
    let mut reg = vec![0.0; n];
    for (i, slot) in reg.iter_mut().enumerate() {
        let time = t0 + i as f64 * dt;
        let mut k = 1;
        while k < beat_times.len() && beat_times[k] < time {
            k += 1;
        }
        if k >= beat_times.len() {
            k = beat_times.len() - 1;
        }
        let t1 = beat_times[k - 1];
        let t2 = beat_times[k];
        let v1 = ibi_sec[(k - 1).min(last)];
        let v2 = ibi_sec[k.min(last)];
        let alpha = if t2 - t1 > 0.0 { (time - t1) / (t2 - t1) } else { 0.0 };
        *slot = v1 + alpha * (v2 - v1);
    }
    reg
}

fn frequency_metrics(out: &mut HeartMetrics, beat_times: &[f64], ibi_ms: &[f64], opt: &Options) {
    if ibi_ms.len() < 3 || beat_times.len() < ibi_ms.len() + 1 {
        return;
    }
    let ibi_sec: Vec<f64> = ibi_ms.iter().map(|v| v / 1000.0).collect();
    let reg = resample_ibi(beat_times, &ibi_sec, RR_GRID_HZ);
    if reg.is_empty() {
        return;
    }
    let reg = moving_average_detrend(&reg, (2.0 * RR_GRID_HZ).round() as usize);

    // Segment length follows the configured Welch window, capped by nfft.
    let wsize = (opt.welch_wsize_sec * RR_GRID_HZ).round() as usize;
    let nfft = opt.nfft.min(wsize.max(64));
    let psd = welch_psd(&reg, RR_GRID_HZ, nfft, opt.overlap);
    if psd.is_empty() {
        out.breathing_rate = breathing_rate_inner(beat_times, ibi_ms, opt);
        return;
    }
    out.vlf = integrate_band(&psd.freqs, &psd.psd, 0.0033, 0.04);
    out.lf = integrate_band(&psd.freqs, &psd.psd, 0.04, 0.15);
    out.hf = integrate_band(&psd.freqs, &psd.psd, 0.15, 0.40);
    out.lfhf = if out.hf > 1e-12 { out.lf / out.hf } else { 0.0 };
    out.total_power = out.vlf + out.lf + out.hf;
    let lh = out.lf + out.hf;
    if lh > 1e-12 {
        out.lf_norm = out.lf / lh;
        out.hf_norm = out.hf / lh;
    }
    out.breathing_rate = breathing_rate_inner(beat_times, ibi_ms, opt);
}

fn breathing_rate_inner(beat_times: &[f64], ibi_ms: &[f64], opt: &Options) -> f64 {
    if ibi_ms.len() < 3 || beat_times.len() < ibi_ms.len() + 1 {
        return 0.0;
    }
    let ibi_sec: Vec<f64> = ibi_ms.iter().map(|v| v / 1000.0).collect();
    let reg = resample_ibi(beat_times, &ibi_sec, RR_GRID_HZ);
    if reg.len() < 64 {
        return 0.0;
    }
    let reg = moving_average_detrend(&reg, (2.0 * RR_GRID_HZ).round() as usize);
    // Largest power of two that fits, so short series still resolve.
    let mut nfft = 64;
    while nfft * 2 <= reg.len().min(1024) {
        nfft *= 2;
    }
    let psd = welch_psd(&reg, RR_GRID_HZ, nfft, opt.overlap);
    if psd.is_empty() {
        return 0.0;
    }
    let mut best_hz = 0.0;
    let mut best_p = 0.0;
    for (f, p) in psd.freqs.iter().zip(psd.psd.iter()) {
        if *f >= 0.1 && *f <= 0.4 && *p > best_p {
            best_p = *p;
            best_hz = *f;
        }
    }
    if opt.breathing_as_bpm {
        best_hz * 60.0
    } else {
        best_hz
    }
}

fn apply_binary_quality(out: &mut HeartMetrics, opt: &Options) {
    let imask = binary::interval_reject_mask(&out.rr_list, opt.threshold_rr);
    out.binary_peak_mask = binary::peak_mask(out.peak_list.len(), &imask);
    out.binary_segments = binary::build_segments(
        &imask,
        opt.segment_reject_window_beats,
        opt.segment_reject_max_rejects,
        opt.segment_reject_overlap,
    );
    let total = out.rr_list.len();
    let rejected = imask.iter().filter(|&&r| r).count();
    out.quality.total_beats = total;
    out.quality.rejected_beats = rejected;
    out.quality.rejection_rate = if total > 0 { rejected as f64 / total as f64 } else { 0.0 };
    out.quality.good_quality = out.quality.rejection_rate <= opt.segment_reject_threshold;
    if !out.quality.good_quality {
        out.quality.quality_warning = "high beat rejection rate".to_string();
    }

    // Segmentwise rejection: intervals inside failed windows are excluded
    // from the time-domain measures.
    if opt.reject_segmentwise && out.binary_segments.iter().any(|s| !s.accepted) {
        let mut keep = vec![true; out.rr_list.len()];
        for s in out.binary_segments.iter().filter(|s| !s.accepted) {
            for slot in keep[s.start_beat..s.end_beat].iter_mut() {
                *slot = false;
            }
        }
        let kept: Vec<f64> = out
            .rr_list
            .iter()
            .zip(keep.iter())
            .filter(|(_, &k)| k)
            .map(|(&r, _)| r)
            .collect();
        if !kept.is_empty() {
            out.bpm = 60_000.0 / dsp::mean(&kept);
        }
        apply_time_domain(out, &kept, opt);
    }
}

/// Replace non-finite metric values by zero.
fn sanitize(out: &mut HeartMetrics) {
    for v in [
        &mut out.bpm,
        &mut out.sdnn,
        &mut out.rmssd,
        &mut out.sdsd,
        &mut out.pnn20,
        &mut out.pnn50,
        &mut out.nn20,
        &mut out.nn50,
        &mut out.mad,
        &mut out.sd1,
        &mut out.sd2,
        &mut out.sd1_sd2_ratio,
        &mut out.ellipse_area,
        &mut out.vlf,
        &mut out.lf,
        &mut out.hf,
        &mut out.lfhf,
        &mut out.total_power,
        &mut out.lf_norm,
        &mut out.hf_norm,
        &mut out.breathing_rate,
    ] {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sine_ppg(fs: f64, hz: f64, secs: f64) -> Vec<f64> {
        let n = (fs * secs) as usize;
        (0..n).map(|i| 0.8 * (2.0 * PI * hz * i as f64 / fs).sin() + 512.0).collect()
    }

    #[test]
    fn test_empty_signal_is_error() {
        let err = analyze_signal(&[], 50.0, &Options::default()).unwrap_err();
        assert_eq!(err.code(), "empty_signal");
    }

    #[test]
    fn test_bad_fs_is_error() {
        let err = analyze_signal(&[1.0, 2.0], 0.0, &Options::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_fs");
    }

    #[test]
    fn test_clean_sine_bpm() {
        let signal = sine_ppg(50.0, 1.2, 30.0);
        let out = analyze_signal(&signal, 50.0, &Options::default()).unwrap();
        assert!(
            (out.bpm - 72.0).abs() < 1.5,
            "expected ~72 BPM from a 1.2 Hz tone, got {}",
            out.bpm
        );
        assert!(out.peak_list.len() >= 30, "got {} peaks", out.peak_list.len());
    }

    #[test]
    fn test_batch_deterministic() {
        let signal = sine_ppg(50.0, 1.2, 30.0);
        let a = analyze_signal(&signal, 50.0, &Options::default()).unwrap();
        let b = analyze_signal(&signal, 50.0, &Options::default()).unwrap();
        assert_eq!(a.bpm, b.bpm);
        assert_eq!(a.peak_list, b.peak_list);
        assert_eq!(a.rr_list, b.rr_list);
        assert_eq!(a.sdnn, b.sdnn);
    }

    #[test]
    fn test_rr_only_known_values() {
        let rr = [800.0, 780.0, 790.0, 810.0, 805.0, 795.0, 785.0, 800.0];
        let out = analyze_rr_intervals(&rr, &Options::default()).unwrap();
        assert_relative_eq!(out.bpm, 60000.0 / 795.625, epsilon = 0.05);
        assert_relative_eq!(out.sdnn, 10.155, epsilon = 0.1);
        assert_relative_eq!(out.rmssd, 13.887, epsilon = 0.1);
        assert!(out.sd1 > 0.0 && out.sd2 > 0.0);
    }

    #[test]
    fn test_rr_lengths_degrade_silently() {
        for len in [1usize, 2, 10] {
            let rr: Vec<f64> = (0..len).map(|i| 800.0 + i as f64).collect();
            let out = analyze_rr_intervals(&rr, &Options::default()).unwrap();
            assert!(out.bpm > 0.0);
            assert!(out.quality.rejection_rate >= 0.0);
        }
        let long: Vec<f64> = (0..10_000).map(|i| 800.0 + (i % 7) as f64).collect();
        let out = analyze_rr_intervals(&long, &Options::default()).unwrap();
        assert!(out.bpm > 70.0 && out.bpm < 80.0);
        // 10^4 intervals at 4 Hz resampling is enough for spectral metrics
        assert!(out.total_power > 0.0);
    }

    #[test]
    fn test_rr_empty_is_error() {
        assert!(analyze_rr_intervals(&[], &Options::default()).is_err());
    }

    #[test]
    fn test_quotient_cleaning_changes_rr_list() {
        let mut opt = Options::default();
        opt.clean_rr = true;
        let rr = [800.0, 810.0, 400.0, 805.0, 795.0];
        let out = analyze_rr_intervals(&rr, &opt).unwrap();
        assert!(out.rr_list.len() < rr.len());
        assert!(out.bpm < 77.0 && out.bpm > 73.0, "bpm {}", out.bpm);
    }

    #[test]
    fn test_mad_known() {
        assert_relative_eq!(calculate_mad(&[1.0, 2.0, 3.0, 4.0, 100.0]), 1.0);
    }

    #[test]
    fn test_integrate_band_rectangle() {
        let freqs = vec![0.0, 0.1, 0.2, 0.3, 0.4];
        let psd = vec![1.0; 5];
        // full interior coverage integrates the band width
        assert_relative_eq!(integrate_band(&freqs, &psd, 0.1, 0.3), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_bandpass_disabled_still_analyzes() {
        let mut opt = Options::default();
        opt.low_hz = 0.0;
        opt.high_hz = 0.0;
        let signal = sine_ppg(50.0, 1.2, 30.0);
        let out = analyze_signal(&signal, 50.0, &opt).unwrap();
        assert!((out.bpm - 72.0).abs() < 2.0, "bpm {}", out.bpm);
    }

    #[test]
    fn test_pnn_counts_strict() {
        let rr = [800.0, 820.0, 800.0, 851.0, 800.0];
        // diffs: 20, -20, 51, -51 -> nn20 counts strictly greater than 20
        let out = analyze_rr_intervals(&rr, &Options::default()).unwrap();
        assert_relative_eq!(out.nn20, 2.0);
        assert_relative_eq!(out.nn50, 2.0);
        assert_relative_eq!(out.pnn20, 50.0);
    }
}
