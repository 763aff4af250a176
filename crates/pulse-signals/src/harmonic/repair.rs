//! RR-sequence repair: periodic suppression of harmonic extras and
//! coalescing of short interval pairs.

use crate::config::Options;
use crate::dsp;
use crate::harmonic::HarmonicState;

const MAX_COALESCE_PASSES: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RepairOutcome {
    pub removed: usize,
    pub reverted: bool,
}

/// Repair the peak train in place while a harmonic flag is active.
///
/// `expected_period_s` is the long-RR period estimate (0 disables the
/// periodic sweep). Removals across both phases share one budget: 40% of
/// the starting peak count, 25% when the RR fallback is driving the hint.
pub(crate) fn repair_rr(
    peaks: &mut Vec<u64>,
    amps: &mut Vec<f64>,
    fs: f64,
    now: f64,
    expected_period_s: f64,
    h: &HarmonicState,
    prev_poll_bpm: f64,
    opt: &Options,
) -> RepairOutcome {
    let start_count = peaks.len();
    if start_count < 3 || fs <= 0.0 {
        return RepairOutcome::default();
    }
    let snapshot_peaks = peaks.clone();
    let snapshot_amps = amps.clone();

    let cap_frac = if h.rr_fallback_driving_hint { 0.25 } else { 0.40 };
    let max_remove = (cap_frac * start_count as f64).floor() as usize;
    let mut removed_total = 0usize;

    let skip_periodic = h.rr_fallback_driving_hint || now < h.choke_relax_until;
    if !skip_periodic && expected_period_s > 0.0 {
        removed_total += periodic_suppression(
            peaks,
            amps,
            fs,
            expected_period_s,
            opt.periodic_suppression_tol,
            max_remove,
        );
    }

    removed_total +=
        coalesce_pairs(peaks, amps, fs, h.any_active(), max_remove.saturating_sub(removed_total), opt);

    // Safety brake: a repair that collapses a fast rhythm to below the
    // physiological floor under RR fallback is structurally reverted.
    let mut reverted = false;
    if h.rr_fallback_driving_hint && prev_poll_bpm > 100.0 {
        let rr = rr_from(peaks, fs);
        if !rr.is_empty() {
            let bpm_after = 60_000.0 / dsp::mean(&rr);
            if bpm_after < 50.0 {
                *peaks = snapshot_peaks;
                *amps = snapshot_amps;
                removed_total = 0;
                reverted = true;
                log::warn!("rr repair reverted: bpm collapse {prev_poll_bpm:.0} -> {bpm_after:.0}");
            }
        }
    }

    RepairOutcome { removed: removed_total, reverted }
}

fn rr_from(peaks: &[u64], fs: f64) -> Vec<f64> {
    peaks.windows(2).map(|w| (w[1] - w[0]) as f64 / fs * 1000.0).collect()
}

/// Sweep expected-beat windows anchored at the first peak; within each
/// window `[t_k + 0.5T, t_k + 1.5T]` keep the strongest peak and drop the
/// others that sit further than `tol * T` from the expected beat time.
fn periodic_suppression(
    peaks: &mut Vec<u64>,
    amps: &mut Vec<f64>,
    fs: f64,
    period: f64,
    tol: f64,
    max_remove: usize,
) -> usize {
    let n = peaks.len();
    let t: Vec<f64> = peaks.iter().map(|&p| p as f64 / fs).collect();
    let mut keep = vec![true; n];
    let mut removed = 0usize;

    let mut anchor = 0usize;
    loop {
        let lo = t[anchor] + 0.5 * period;
        let hi = t[anchor] + 1.5 * period;
        let expected = t[anchor] + period;

        let in_window: Vec<usize> =
            (anchor + 1..n).filter(|&i| keep[i] && t[i] >= lo && t[i] <= hi).collect();
        if in_window.is_empty() {
            match (anchor + 1..n).find(|&i| keep[i]) {
                Some(next) => anchor = next,
                None => break,
            }
            continue;
        }
        let strongest = *in_window
            .iter()
            .max_by(|&&a, &&b| amps[a].partial_cmp(&amps[b]).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap();
        for &i in &in_window {
            if i != strongest && (t[i] - expected).abs() > tol * period && removed < max_remove {
                keep[i] = false;
                removed += 1;
            }
        }
        anchor = strongest;
    }

    apply_keep(peaks, amps, &keep);
    removed
}

/// Delete spurious middle peaks between short interval pairs, iterating
/// until a pass removes nothing or the removal budget is spent.
fn coalesce_pairs(
    peaks: &mut Vec<u64>,
    amps: &mut Vec<f64>,
    fs: f64,
    any_flag: bool,
    budget: usize,
    opt: &Options,
) -> usize {
    let mut removed_total = 0usize;
    for _ in 0..MAX_COALESCE_PASSES {
        if peaks.len() < 3 || removed_total >= budget {
            break;
        }
        let rr = rr_from(peaks, fs);
        let m = dsp::median(&rr);
        if m <= 0.0 {
            break;
        }
        let mut keep = vec![true; peaks.len()];
        let mut removed_this = 0usize;
        let mut i = 0usize;
        while i + 1 < rr.len() {
            if removed_total + removed_this >= budget {
                break;
            }
            let r1 = rr[i];
            let r2 = rr[i + 1];
            let sum = r1 + r2;
            let classic = r1 < 0.65 * m && sum >= 0.8 * m && sum <= 1.2 * m;
            let flagged = any_flag && r1.min(r2) < 0.9 * m && sum >= 1.6 * m && sum <= 2.4 * m;
            let equal_pair = r1 >= opt.rr_merge_equal_band_low * m
                && r1 <= opt.rr_merge_equal_band_high * m
                && r2 >= opt.rr_merge_equal_band_low * m
                && r2 <= opt.rr_merge_equal_band_high * m
                && sum >= opt.rr_merge_band_low * 2.0 * m
                && sum <= opt.rr_merge_band_high * 2.0 * m;
            let amp_ok = amps[i + 1] <= amps[i].max(amps[i + 2]);
            if (classic || flagged || equal_pair) && amp_ok {
                keep[i + 1] = false;
                removed_this += 1;
                i += 2;
            } else {
                i += 1;
            }
        }
        if removed_this == 0 {
            break;
        }
        apply_keep(peaks, amps, &keep);
        removed_total += removed_this;
    }
    removed_total
}

fn apply_keep(peaks: &mut Vec<u64>, amps: &mut Vec<f64>, keep: &[bool]) {
    let mut idx = 0;
    peaks.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
    let mut idx = 0;
    amps.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubled_train(fs: f64, beats: usize) -> (Vec<u64>, Vec<f64>) {
        // Strong beat every 1.0 s with a weak extra at +0.5 s.
        let mut peaks = Vec::new();
        let mut amps = Vec::new();
        for b in 0..beats {
            peaks.push((b as f64 * fs) as u64);
            amps.push(1.0);
            peaks.push((b as f64 * fs + 0.5 * fs) as u64);
            amps.push(0.4);
        }
        (peaks, amps)
    }

    fn active_state() -> HarmonicState {
        let mut h = HarmonicState::new();
        h.soft = true;
        h.doubling_long_rr_ms = 1000.0;
        h
    }

    #[test]
    fn test_periodic_suppression_removes_weak_extras() {
        let fs = 50.0;
        let (mut peaks, mut amps) = doubled_train(fs, 10);
        let h = active_state();
        let out =
            repair_rr(&mut peaks, &mut amps, fs, 30.0, 1.0, &h, 0.0, &Options::default());
        assert!(out.removed > 0);
        let rr = rr_from(&peaks, fs);
        let mean_rr = crate::dsp::mean(&rr);
        assert!(
            mean_rr > 900.0,
            "repaired rhythm should approach 1000 ms, got {mean_rr}"
        );
    }

    #[test]
    fn test_removal_budget_capped() {
        let fs = 50.0;
        let (mut peaks, mut amps) = doubled_train(fs, 20);
        let start = peaks.len();
        let h = active_state();
        let out =
            repair_rr(&mut peaks, &mut amps, fs, 30.0, 1.0, &h, 0.0, &Options::default());
        assert!(
            out.removed <= (0.4 * start as f64).floor() as usize,
            "removals {} exceed the 40% cap",
            out.removed
        );
    }

    #[test]
    fn test_coalesce_classic_doubling() {
        let fs = 50.0;
        // Steady 800 ms rhythm with one beat split into 300 + 500 ms.
        let beat_times = [0.0, 0.8, 1.6, 2.4, 2.7, 3.2, 4.0, 4.8, 5.6, 6.4];
        let mut peaks: Vec<u64> = beat_times.iter().map(|t| (t * fs) as u64).collect();
        let mut amps = vec![1.0; peaks.len()];
        amps[4] = 0.3; // the spurious split peak
        let h = active_state();
        let before = peaks.len();
        let out =
            repair_rr(&mut peaks, &mut amps, fs, 30.0, 0.0, &h, 0.0, &Options::default());
        assert!(out.removed >= 1, "split peak should be coalesced");
        assert!(peaks.len() < before);
    }

    #[test]
    fn test_safety_brake_reverts_collapse() {
        let fs = 50.0;
        // Uniform 420 ms rhythm: the equal-pair rule would halve it.
        let mut peaks: Vec<u64> = (0..30).map(|i| (i as f64 * 0.42 * fs) as u64).collect();
        let mut amps = vec![1.0; peaks.len()];
        let mut h = HarmonicState::new();
        h.hint = true;
        h.rr_fallback_driving_hint = true;
        let snapshot = peaks.clone();
        let out = repair_rr(&mut peaks, &mut amps, fs, 30.0, 0.84, &h, 143.0, &Options::default());
        // Either the brake restored the snapshot, or the capped repair
        // left the rhythm above the collapse threshold.
        if out.reverted {
            assert_eq!(peaks, snapshot);
        } else {
            let rr = rr_from(&peaks, fs);
            let bpm = 60_000.0 / crate::dsp::mean(&rr);
            assert!(bpm > 50.0, "non-reverted repair must stay above 50 BPM, got {bpm}");
        }
    }

    #[test]
    fn test_skip_periodic_under_choke_relax() {
        let fs = 50.0;
        let (mut peaks, mut amps) = doubled_train(fs, 10);
        let mut h = active_state();
        h.choke_relax_until = 100.0; // beyond `now`
        let before = peaks.len();
        let out =
            repair_rr(&mut peaks, &mut amps, fs, 30.0, 1.0, &h, 0.0, &Options::default());
        // Periodic sweep skipped; only coalescing may act.
        assert!(out.removed <= before / 2);
    }
}
