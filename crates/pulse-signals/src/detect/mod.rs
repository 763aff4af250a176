//! Incremental peak detection support: threshold policies, the RR
//! acceptance gate, and HP-style ma_perc calibration.

pub(crate) mod ma_calib;
pub(crate) mod rr_gate;

use crate::dsp::RollingStats;

/// Adaptive threshold: `mean + scale * sd` over the rolling window.
pub(crate) fn adaptive_threshold(stats: &RollingStats, scale: f64) -> f64 {
    stats.mean() + scale * stats.sd()
}

/// Rescaling of the rectified rolling window onto `[0, 1024]`.
///
/// The window min/max include the candidate sample itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HpScale {
    min: f64,
    span: f64,
}

impl HpScale {
    pub(crate) fn from_stats(rect: &RollingStats) -> Option<Self> {
        let mn = rect.min();
        let mx = rect.max();
        if mx > mn {
            Some(Self { min: mn, span: mx - mn })
        } else {
            None
        }
    }

    pub(crate) fn rescale(&self, x: f64) -> f64 {
        (x - self.min) / self.span * 1024.0
    }

    pub(crate) fn rescale_spread(&self, sd: f64) -> f64 {
        sd / self.span * 1024.0
    }
}

/// HP-style threshold in rescaled units: the rolling mean lifted by
/// `ma_perc` percent, plus a temporary boost while the rejection-burst
/// refractory extra is armed.
pub(crate) fn hp_threshold(scaled_mean: f64, ma_perc: f64, burst_boost: bool) -> f64 {
    let lift = scaled_mean / 100.0 * ma_perc;
    let boost = if burst_boost { 0.1 * scaled_mean } else { 0.0 };
    scaled_mean + lift + boost
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_adaptive_threshold_tracks_stats() {
        let mut stats = RollingStats::new(8);
        for &x in &[0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, -1.0] {
            stats.push(x);
        }
        let thr = adaptive_threshold(&stats, 0.5);
        assert_relative_eq!(thr, 0.5 * stats.sd(), epsilon = 1e-12);
    }

    #[test]
    fn test_hp_scale_and_threshold() {
        let mut rect = RollingStats::new(4);
        for &x in &[0.0, 2.0, 4.0, 2.0] {
            rect.push(x);
        }
        let scale = HpScale::from_stats(&rect).unwrap();
        assert_relative_eq!(scale.rescale(0.0), 0.0);
        assert_relative_eq!(scale.rescale(4.0), 1024.0);
        let m = scale.rescale(rect.mean());
        let thr = hp_threshold(m, 30.0, false);
        assert_relative_eq!(thr, m * 1.30, epsilon = 1e-9);
        assert!(hp_threshold(m, 30.0, true) > thr);
    }

    #[test]
    fn test_hp_scale_degenerate_window() {
        let mut rect = RollingStats::new(4);
        rect.push(3.0);
        rect.push(3.0);
        assert!(HpScale::from_stats(&rect).is_none());
    }
}
