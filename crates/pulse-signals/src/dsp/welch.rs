//! Welch averaged periodogram.

use num_complex::Complex64;
use rustfft::FftPlanner;

/// One-sided PSD with its frequency grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsdResult {
    pub freqs: Vec<f64>,
    pub psd: Vec<f64>,
}

impl PsdResult {
    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    /// Frequency resolution of the grid; 0 when empty.
    pub fn df(&self) -> f64 {
        if self.freqs.len() < 2 {
            0.0
        } else {
            self.freqs[1] - self.freqs[0]
        }
    }
}

/// Welch PSD over `x` at sample rate `fs`.
///
/// Hamming window per segment of `nfft` samples, segments overlapping by
/// `overlap * nfft`, periodograms scaled by `nfft * fs * winNorm^2` and
/// averaged. Returns an empty result when `x` is shorter than one segment.
/// Deterministic for identical inputs.
pub fn welch_psd(x: &[f64], fs: f64, nfft: usize, overlap: f64) -> PsdResult {
    let mut planner = FftPlanner::new();
    welch_psd_with(&mut planner, x, fs, nfft, overlap)
}

/// `welch_psd` variant reusing a caller-owned FFT planner.
pub fn welch_psd_with(
    planner: &mut FftPlanner<f64>,
    x: &[f64],
    fs: f64,
    nfft: usize,
    overlap: f64,
) -> PsdResult {
    let n = x.len();
    let nfft = if nfft == 0 { 256 } else { nfft };
    if n < nfft || fs <= 0.0 {
        return PsdResult::default();
    }
    let hop = (nfft as f64 - (overlap * nfft as f64).round()).max(1.0) as usize;
    let nseg = 1 + (n - nfft) / hop;

    let window: Vec<f64> = (0..nfft)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f64::consts::PI * i as f64 / (nfft - 1) as f64).cos())
        .collect();
    let win_norm = window.iter().sum::<f64>() / nfft as f64;

    let fft = planner.plan_fft_forward(nfft);
    let kmax = nfft / 2 + 1;
    let mut psd = vec![0.0f64; kmax];
    let mut buf = vec![Complex64::new(0.0, 0.0); nfft];

    for s in 0..nseg {
        let start = s * hop;
        for (t, slot) in buf.iter_mut().enumerate() {
            *slot = Complex64::new(x[start + t] * window[t], 0.0);
        }
        fft.process(&mut buf);
        for (k, acc) in psd.iter_mut().enumerate() {
            *acc += buf[k].norm_sqr() / (nfft as f64 * fs * win_norm * win_norm);
        }
    }
    for v in &mut psd {
        *v /= nseg as f64;
    }

    let freqs = (0..kmax).map(|k| fs * k as f64 / nfft as f64).collect();
    PsdResult { freqs, psd }
}
