//! Amplitude summary of an audio buffer.
//!
//! Every function here is pure.  Outputs of [`analyze`], [`normalize`],
//! [`interpolate`] and [`fallback`] keep each bar inside
//! `[MIN_BAR, MAX_BAR]`; only [`placeholder`] produces zeros, for the
//! in-flight state before any data exists.

use rand::Rng;
use std::f32::consts::PI;

/// Floor applied to every normalized bar so quiet passages stay visible.
pub const MIN_BAR: f32 = 0.1;
pub const MAX_BAR: f32 = 1.0;

/// Reduce `samples` (one channel) to `bar_count` normalized bars.
///
/// Buckets hold `len / bar_count` samples each; the last bucket also takes
/// the remainder.  A bar is the mean absolute amplitude of its bucket.
pub fn analyze(samples: &[f32], bar_count: usize) -> Vec<f32> {
    if bar_count == 0 {
        return Vec::new();
    }

    let per_bar = samples.len() / bar_count;
    let bars: Vec<f32> = (0..bar_count)
        .map(|i| {
            let start = i * per_bar;
            let end = if i + 1 == bar_count {
                samples.len()
            } else {
                start + per_bar
            };
            mean_abs(&samples[start..end])
        })
        .collect();

    normalize(&bars)
}

fn mean_abs(bucket: &[f32]) -> f32 {
    if bucket.is_empty() {
        return 0.0;
    }
    let sum: f64 = bucket
        .iter()
        .filter(|s| s.is_finite())
        .map(|s| s.abs() as f64)
        .sum();
    (sum / bucket.len() as f64) as f32
}

/// Scale bars so the loudest is `1.0`, flooring everything at [`MIN_BAR`].
///
/// Silence (maximum of zero) becomes all-floor.  An all-floor waveform is a
/// fixed point, which keeps `normalize(normalize(x)) == normalize(x)`: the
/// normalized form of silence must not be rescaled to full height.  The same
/// holds for any input that is already all-floor, including a precomputed
/// waveform passed through [`interpolate`].
pub fn normalize(values: &[f32]) -> Vec<f32> {
    if values.iter().all(|v| *v == MIN_BAR) {
        return values.to_vec();
    }

    let max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![MIN_BAR; values.len()];
    }

    values
        .iter()
        .map(|v| {
            let scaled = if v.is_finite() { v / max } else { 0.0 };
            scaled.clamp(MIN_BAR, MAX_BAR)
        })
        .collect()
}

/// Resample a precomputed waveform to `target_count` bars.
///
/// Returns `data` unchanged when the lengths already match.  An all-floor
/// input stays all-floor, like silence.
pub fn interpolate(data: &[f32], target_count: usize) -> Vec<f32> {
    if data.len() == target_count {
        return data.to_vec();
    }
    if data.is_empty() {
        return normalize(&vec![0.0; target_count]);
    }

    let last = data.len() - 1;
    let ratio = data.len() as f64 / target_count as f64;
    let resampled: Vec<f32> = (0..target_count)
        .map(|i| {
            let pos = i as f64 * ratio;
            let low = (pos.floor() as usize).min(last);
            let high = (pos.ceil() as usize).min(last);
            let weight = (pos - low as f64) as f32;
            data[low] * (1.0 - weight) + data[high] * weight
        })
        .collect();

    normalize(&resampled)
}

/// All-zero bars shown while a load is in flight.
pub fn placeholder(bar_count: usize) -> Vec<f32> {
    vec![0.0; bar_count]
}

/// Synthetic waveform for when no real audio could be analyzed: two periods
/// of a sine biased to mid-range, plus up to `0.2` of noise.
pub fn fallback<R: Rng + ?Sized>(bar_count: usize, rng: &mut R) -> Vec<f32> {
    (0..bar_count)
        .map(|i| {
            let x = i as f32 / bar_count as f32;
            let wave = (x * PI * 4.0).sin() * 0.3 + 0.5;
            let noise = rng.gen::<f32>() * 0.2;
            (wave + noise).clamp(MIN_BAR, MAX_BAR)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn in_range(bars: &[f32]) -> bool {
        bars.iter().all(|b| (MIN_BAR..=MAX_BAR).contains(b))
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * 0.05).sin() * (i as f32 / len as f32))
            .collect()
    }

    #[test]
    fn test_analyze_length_and_range() {
        for bar_count in [1, 7, 32, 100] {
            let bars = analyze(&tone(10_000), bar_count);
            assert_eq!(bars.len(), bar_count);
            assert!(in_range(&bars), "out of range for {}: {:?}", bar_count, bars);
        }
    }

    #[test]
    fn test_analyze_picks_loudest_bucket_as_full_scale() {
        let mut samples = vec![0.25f32; 400];
        samples[300..400].iter_mut().for_each(|s| *s = -1.0);
        let bars = analyze(&samples, 4);
        assert_eq!(bars, vec![0.25, 0.25, 0.25, 1.0]);
    }

    #[test]
    fn test_last_bucket_absorbs_remainder() {
        // 10 samples / 3 bars: buckets [0,3) [3,6) [6,10)
        let samples = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.8];
        let bars = analyze(&samples, 3);
        assert_eq!(bars, vec![MIN_BAR, MIN_BAR, 1.0]);
    }

    #[test]
    fn test_silence_is_floor_not_nan() {
        let bars = analyze(&vec![0.0; 1024], 32);
        assert_eq!(bars, vec![MIN_BAR; 32]);
        assert!(bars.iter().all(|b| !b.is_nan()));
    }

    #[test]
    fn test_fewer_samples_than_bars() {
        let bars = analyze(&[0.5, -0.5], 8);
        assert_eq!(bars.len(), 8);
        assert!(in_range(&bars));

        let bars = analyze(&[], 8);
        assert_eq!(bars, vec![MIN_BAR; 8]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs: Vec<Vec<f32>> = vec![
            vec![0.0, 0.0, 0.0],
            vec![0.01, 0.02, 0.04],
            vec![0.3, 0.3, 0.3],
            vec![5.0, 0.0, 2.5, 0.4],
            vec![0.1, 0.1, 0.1],
        ];
        for input in inputs {
            let once = normalize(&input);
            assert_eq!(normalize(&once), once, "input {:?}", input);
            assert!(in_range(&once));
        }
    }

    #[test]
    fn test_interpolate_identity() {
        let data = vec![0.2, 0.9, 0.4];
        assert_eq!(interpolate(&data, 3), data);
    }

    #[test]
    fn test_interpolate_resamples_and_normalizes() {
        let data = vec![0.1, 0.5, 1.0, 0.5];
        let up = interpolate(&data, 8);
        assert_eq!(up.len(), 8);
        assert!(in_range(&up));
        // i=4 lands exactly on data[2]
        assert_eq!(up[4], 1.0);
        // position 0.5 blends data[0] and data[1]
        assert!((up[1] - 0.3).abs() < 1e-6);

        let down = interpolate(&data, 2);
        assert_eq!(down, vec![0.1, 1.0]);
    }

    #[test]
    fn test_interpolate_keeps_silent_waveform_flat() {
        let silent = analyze(&[0.0; 64], 4);
        assert_eq!(silent, vec![MIN_BAR; 4]);
        assert_eq!(interpolate(&silent, 6), vec![MIN_BAR; 6]);
        // Anything above the floor is rescaled as usual.
        let raised = interpolate(&[0.2, 0.2], 3);
        assert_eq!(raised.len(), 3);
        assert!(raised.iter().all(|v| (v - MAX_BAR).abs() < 1e-6));
    }

    #[test]
    fn test_placeholder_is_zeroed() {
        assert_eq!(placeholder(4), vec![0.0; 4]);
    }

    #[test]
    fn test_fallback_is_seeded_and_bounded() {
        let a = fallback(32, &mut StdRng::seed_from_u64(42));
        let b = fallback(32, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(in_range(&a));

        let c = fallback(32, &mut StdRng::seed_from_u64(43));
        assert_ne!(a, c);
    }
}
