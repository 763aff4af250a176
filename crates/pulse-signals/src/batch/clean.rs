//! RR-interval outlier removal.

use crate::config::{CleanMethod, Options};
use crate::dsp;

/// Iterative quotient filter: drop intervals outside `[0.8, 1.2]` of their
/// predecessor, repeated `iterations` times.
pub fn remove_outliers_quotient_filter(rr: &[f64], iterations: usize) -> Vec<f64> {
    let mut current = rr.to_vec();
    for _ in 0..iterations.max(1) {
        if current.len() < 2 {
            break;
        }
        let mut next = Vec::with_capacity(current.len());
        next.push(current[0]);
        for i in 1..current.len() {
            let prev = *next.last().unwrap_or(&current[i - 1]);
            let ratio = if prev > 0.0 { current[i] / prev } else { 1.0 };
            if (0.8..=1.2).contains(&ratio) {
                next.push(current[i]);
            }
        }
        if next.len() == current.len() {
            break;
        }
        current = next;
    }
    current
}

/// Tukey-fence IQR filter. Also reports the bounds used.
pub fn remove_outliers_iqr(data: &[f64]) -> (Vec<f64>, f64, f64) {
    if data.len() < 4 {
        return (data.to_vec(), f64::NEG_INFINITY, f64::INFINITY);
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    let kept = data.iter().copied().filter(|&x| x >= lower && x <= upper).collect();
    (kept, lower, upper)
}

/// Z-score filter at the given threshold.
pub fn remove_outliers_zscore(data: &[f64], threshold: f64) -> Vec<f64> {
    let m = dsp::mean(data);
    let s = dsp::sd_sample(data);
    if s <= 0.0 {
        return data.to_vec();
    }
    data.iter().copied().filter(|&x| ((x - m) / s).abs() <= threshold).collect()
}

/// Apply the configured cleaning method; the single dispatch site.
pub(crate) fn clean_rr(rr: &[f64], opt: &Options) -> Vec<f64> {
    match opt.clean_method {
        CleanMethod::QuotientFilter => remove_outliers_quotient_filter(rr, opt.clean_iterations),
        CleanMethod::Iqr => remove_outliers_iqr(rr).0,
        CleanMethod::ZScore => remove_outliers_zscore(rr, 3.0),
    }
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
    }
}
