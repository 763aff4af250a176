//! DSP building blocks: causal biquad bandpass, rolling window statistics,
//! and the Welch periodogram.

mod biquad;
mod rolling;
mod welch;

pub use biquad::{Biquad, BiquadChain};
pub use rolling::RollingStats;
pub use welch::{welch_psd, welch_psd_with, PsdResult};

/// Arithmetic mean; 0 for an empty slice.
pub(crate) fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0 below two elements.
pub(crate) fn sd_sample(v: &[f64]) -> f64 {
    if v.len() <= 1 {
        return 0.0;
    }
    let m = mean(v);
    let acc: f64 = v.iter().map(|x| (x - m) * (x - m)).sum();
    (acc / (v.len() - 1) as f64).sqrt()
}

/// Median; 0 for an empty slice.
pub(crate) fn median(v: &[f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Coefficient of variation of RR intervals; 0 when degenerate.
pub(crate) fn coeff_of_variation(v: &[f64]) -> f64 {
    let m = mean(v);
    if m.abs() < 1e-12 || v.len() < 2 {
        return 0.0;
    }
    sd_sample(v) / m
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_odd_even() {
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_relative_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_relative_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_sd_sample_known() {
        assert_relative_eq!(
            sd_sample(&[1.0, 2.0, 3.0, 4.0, 5.0]),
            (2.5f64).sqrt(),
            epsilon = 1e-12
        );
    }
}
