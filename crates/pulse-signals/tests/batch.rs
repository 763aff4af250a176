//! Batch analyzer scenarios: RR-only metrics, binary quality windowing,
//! and boundary behavior.

use approx::assert_relative_eq;
use pulse_signals::{analyze_rr_intervals, analyze_signal, Options};
use std::f64::consts::PI;

#[test]
fn test_rr_only_reference_values() {
    let rr = [800.0, 780.0, 790.0, 810.0, 805.0, 795.0, 785.0, 800.0];
    let out = analyze_rr_intervals(&rr, &Options::default()).unwrap();
    // mean RR 795.625 ms
    assert_relative_eq!(out.bpm, 75.41, epsilon = 0.05);
    assert_relative_eq!(out.sdnn, 10.16, epsilon = 0.1);
    assert_relative_eq!(out.rmssd, 13.89, epsilon = 0.1);
    assert!(out.sd1 > 0.0 && out.sd2 > out.sd1, "long axis exceeds short axis");
    assert!(out.ellipse_area > 0.0);
}

#[test]
fn test_binary_window_acceptance_scenario() {
    // 20 intervals with 2 outliers beyond max(0.3 * mean, 300 ms).
    let mut rr = vec![800.0; 20];
    rr[4] = 1150.0;
    rr[13] = 450.0;
    let mut opt = Options::default();
    opt.threshold_rr = true;
    opt.segment_reject_window_beats = 10;
    opt.segment_reject_max_rejects = 3;
    let out = analyze_rr_intervals(&rr, &opt).unwrap();

    assert_eq!(out.quality.total_beats, 20);
    assert_eq!(out.quality.rejected_beats, 2);
    assert_relative_eq!(out.quality.rejection_rate, 0.1);
    assert_eq!(out.binary_segments.len(), 2);
    assert!(
        out.binary_segments.iter().all(|s| s.accepted),
        "two spread-out outliers stay within the per-window budget"
    );
    for s in &out.binary_segments {
        assert_eq!(s.total_beats, 10);
    }
}

#[test]
fn test_binary_window_rejects_dense_outliers() {
    let mut rr = vec![800.0; 20];
    for i in 2..6 {
        rr[i] = 1200.0;
    }
    let mut opt = Options::default();
    opt.threshold_rr = true;
    let out = analyze_rr_intervals(&rr, &opt).unwrap();
    assert!(
        out.binary_segments.iter().any(|s| !s.accepted),
        "four outliers inside one window exceed the budget"
    );
}

#[test]
fn test_rr_list_length_boundaries() {
    for len in [0usize, 1, 2, 10, 10_000] {
        let rr: Vec<f64> = (0..len).map(|i| 790.0 + (i % 5) as f64 * 5.0).collect();
        match analyze_rr_intervals(&rr, &Options::default()) {
            Ok(out) => {
                assert!(len > 0);
                assert!(out.bpm.is_finite());
                assert!(out.sdnn.is_finite());
                assert!(out.quality.confidence >= 0.0);
            }
            Err(e) => {
                assert_eq!(len, 0);
                assert_eq!(e.code(), "empty_signal");
            }
        }
    }
}

#[test]
fn test_signal_path_deterministic_across_runs() {
    let fs = 50.0;
    let signal: Vec<f64> = (0..1500)
        .map(|i| {
            let t = i as f64 / fs;
            0.8 * (2.0 * PI * 1.2 * t).sin() + 0.1 * (2.0 * PI * 0.25 * t).sin() + 512.0
        })
        .collect();
    let a = analyze_signal(&signal, fs, &Options::default()).unwrap();
    let b = analyze_signal(&signal, fs, &Options::default()).unwrap();
    assert_eq!(a.bpm, b.bpm);
    assert_eq!(a.peak_list, b.peak_list);
    assert_eq!(a.ibi_ms, b.ibi_ms);
    assert_eq!(a.sdnn, b.sdnn);
    assert_eq!(a.vlf, b.vlf);
    assert_eq!(a.breathing_rate, b.breathing_rate);
}

#[test]
fn test_extreme_sample_rates() {
    // fs = 1 Hz with a sub-Nyquist band: runs, degrades silently.
    let mut slow = Options::default();
    slow.low_hz = 0.1;
    slow.high_hz = 0.4;
    let signal: Vec<f64> = (0..300).map(|i| ((i % 4) as f64) - 1.5).collect();
    let out = analyze_signal(&signal, 1.0, &slow).unwrap();
    assert!(out.bpm >= 0.0);

    // fs = 10 kHz: a 1.2 Hz tone still resolves.
    let fs = 10_000.0;
    let signal: Vec<f64> =
        (0..(10.0 * fs) as usize).map(|i| (2.0 * PI * 1.2 * i as f64 / fs).sin()).collect();
    let out = analyze_signal(&signal, fs, &Options::default()).unwrap();
    assert!((out.bpm - 72.0).abs() < 5.0, "expected ~72 BPM, got {}", out.bpm);
}

#[test]
fn test_spectral_metrics_need_enough_data() {
    // Two minutes of varied RR gives a non-empty 4 Hz grid for Welch.
    let rr: Vec<f64> = (0..160)
        .map(|i| 800.0 + 40.0 * (2.0 * PI * i as f64 / 12.0).sin())
        .collect();
    let out = analyze_rr_intervals(&rr, &Options::default()).unwrap();
    assert!(out.total_power > 0.0, "long varied series produces spectral power");
    assert!(out.hf > 0.0);
    assert!(out.lf_norm >= 0.0 && out.lf_norm <= 1.0);

    // Short series: spectral metrics degrade to zero, no error.
    let out = analyze_rr_intervals(&[800.0, 810.0, 805.0], &Options::default()).unwrap();
    assert_eq!(out.total_power, 0.0);
    assert_eq!(out.lfhf, 0.0);
}

#[test]
fn test_breathing_rate_units() {
    let rr: Vec<f64> = (0..200)
        .map(|i| 800.0 + 50.0 * (2.0 * PI * 0.25 * (i as f64 * 0.8) ).sin())
        .collect();
    let hz = analyze_rr_intervals(&rr, &Options::default()).unwrap().breathing_rate;
    let mut opt = Options::default();
    opt.breathing_as_bpm = true;
    let bpm = analyze_rr_intervals(&rr, &opt).unwrap().breathing_rate;
    if hz > 0.0 {
        assert_relative_eq!(bpm, hz * 60.0, epsilon = 1e-9);
        assert!((0.1..=0.4).contains(&hz), "breathing peak inside band, got {hz}");
    }
}

#[test]
fn test_sdsd_mode_changes_result() {
    // Alternating diffs: +40, -40, ... abs-mode SDSD collapses to 0.
    let rr = [800.0, 840.0, 800.0, 840.0, 800.0, 840.0];
    let abs_out = analyze_rr_intervals(&rr, &Options::default()).unwrap();
    let mut opt = Options::default();
    opt.sdsd_mode = pulse_signals::SdsdMode::Signed;
    let signed_out = analyze_rr_intervals(&rr, &opt).unwrap();
    assert!(abs_out.sdsd < 1e-9);
    assert!(signed_out.sdsd > 30.0);
}
