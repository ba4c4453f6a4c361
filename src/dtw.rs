//! Banded dynamic-time-warping comparator (C6).

use crate::config::{DistanceNormalization, DtwConfig, StepPattern};

const INF: f32 = f32::INFINITY;

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// `true` when `(i, j)` falls outside the Sakoe-Chiba band (always
/// `false` when `band_radius_frames == 0`, i.e. unbounded).
fn out_of_band(i: usize, j: usize, m: usize, n: usize, radius: usize) -> bool {
    if radius == 0 || m == 0 || n == 0 {
        return false;
    }
    let expected = i as f32 * (m as f32 / n as f32);
    (expected - j as f32).abs() > radius as f32
}

fn step_weight_diag(pattern: StepPattern) -> f32 {
    match pattern {
        StepPattern::Symmetric1 => 1.0,
        StepPattern::Symmetric2 => 2.0,
    }
}

fn normalizer(normalization: DistanceNormalization, path_len: usize, m: usize, n: usize) -> f32 {
    match normalization {
        DistanceNormalization::None => 1.0,
        DistanceNormalization::PathLength => (path_len.max(1)) as f32,
        DistanceNormalization::SeqSum => (m + n).max(1) as f32,
    }
}

/// Accumulated DTW distance between `master` and `user` feature
/// sequences. `+inf` if either sequence is empty (SPEC_FULL.md C6
/// boundary rule) or if banding leaves no feasible path.
pub fn distance(master: &[Vec<f32>], user: &[Vec<f32>], cfg: &DtwConfig) -> f32 {
    let (m, n) = (master.len(), user.len());
    if m == 0 || n == 0 {
        return INF;
    }

    let diag_weight = step_weight_diag(cfg.step_pattern);
    // Two rolling rows over the user axis; O(n) auxiliary space.
    let mut prev = vec![INF; n + 1];
    let mut curr = vec![INF; n + 1];
    prev[0] = 0.0;

    for i in 1..=m {
        curr[0] = INF;
        for j in 1..=n {
            if out_of_band(i - 1, j - 1, m, n, cfg.band_radius_frames) {
                curr[j] = INF;
                continue;
            }
            let d = squared_euclidean(&master[i - 1], &user[j - 1]);
            let from_up = prev[j] + d;
            let from_diag = prev[j - 1] + diag_weight * d;
            let from_left = curr[j - 1] + d;
            curr[j] = from_up.min(from_diag).min(from_left);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let raw = prev[n];
    if !raw.is_finite() {
        return INF;
    }
    raw / normalizer(cfg.distance_normalization, m + n, m, n)
}

/// Same as [`distance`] but also returns the optimal alignment path
/// (ascending `(i, j)` index pairs). Requires the full `O(m*n)` matrix
/// for backtracking.
pub fn distance_aligned(
    master: &[Vec<f32>],
    user: &[Vec<f32>],
    cfg: &DtwConfig,
) -> (f32, Vec<(usize, usize)>) {
    let (m, n) = (master.len(), user.len());
    if m == 0 || n == 0 {
        return (INF, Vec::new());
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum From {
        None,
        Up,
        Diag,
        Left,
    }

    let diag_weight = step_weight_diag(cfg.step_pattern);
    let mut dp = vec![vec![INF; n + 1]; m + 1];
    let mut back = vec![vec![From::None; n + 1]; m + 1];
    dp[0][0] = 0.0;

    for i in 1..=m {
        for j in 1..=n {
            if out_of_band(i - 1, j - 1, m, n, cfg.band_radius_frames) {
                continue;
            }
            let d = squared_euclidean(&master[i - 1], &user[j - 1]);
            let from_up = dp[i - 1][j] + d;
            let from_diag = dp[i - 1][j - 1] + diag_weight * d;
            let from_left = dp[i][j - 1] + d;

            let (best, from) = [
                (from_up, From::Up),
                (from_diag, From::Diag),
                (from_left, From::Left),
            ]
            .into_iter()
            .fold((INF, From::None), |acc, cand| if cand.0 < acc.0 { cand } else { acc });

            dp[i][j] = best;
            back[i][j] = from;
        }
    }

    let raw = dp[m][n];
    if !raw.is_finite() {
        return (INF, Vec::new());
    }

    let mut path = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        path.push((i - 1, j - 1));
        match back[i][j] {
            From::Up => i -= 1,
            From::Diag => {
                i -= 1;
                j -= 1;
            }
            From::Left => j -= 1,
            From::None => break,
        }
    }
    path.reverse();

    let normalized = raw / normalizer(cfg.distance_normalization, path.len(), m, n);
    (normalized, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(values: &[f32]) -> Vec<Vec<f32>> {
        values.iter().map(|&v| vec![v]).collect()
    }

    fn cfg(normalization: DistanceNormalization, pattern: StepPattern) -> DtwConfig {
        DtwConfig {
            band_radius_frames: 0,
            step_pattern: pattern,
            distance_normalization: normalization,
        }
    }

    #[test]
    fn identical_sequences_have_zero_distance() {
        let a = seq(&[1.0, 2.0, 3.0, 4.0]);
        let d = distance(&a, &a, &cfg(DistanceNormalization::None, StepPattern::Symmetric2));
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn empty_sequence_is_infinite_not_an_error() {
        let a = seq(&[1.0, 2.0]);
        let empty: Vec<Vec<f32>> = Vec::new();
        assert_eq!(distance(&a, &empty, &cfg(DistanceNormalization::None, StepPattern::Symmetric2)), INF);
        let (d, path) = distance_aligned(&empty, &a, &cfg(DistanceNormalization::None, StepPattern::Symmetric2));
        assert_eq!(d, INF);
        assert!(path.is_empty());
    }

    #[test]
    fn symmetric1_is_symmetric_in_arguments() {
        let a = seq(&[1.0, 5.0, 2.0, 9.0, 0.5]);
        let b = seq(&[0.0, 4.0, 3.0, 8.0]);
        let c = cfg(DistanceNormalization::None, StepPattern::Symmetric1);
        assert_eq!(distance(&a, &b, &c), distance(&b, &a, &c));
    }

    #[test]
    fn path_is_ascending_and_bounds_hit_corners() {
        let a = seq(&[1.0, 2.0, 3.0]);
        let b = seq(&[1.0, 1.0, 2.0, 3.0, 3.0]);
        let (_, path) = distance_aligned(&a, &b, &cfg(DistanceNormalization::PathLength, StepPattern::Symmetric2));
        assert_eq!(path.first(), Some(&(0, 0)));
        assert_eq!(path.last(), Some(&(2, 4)));
        for w in path.windows(2) {
            assert!(w[1].0 >= w[0].0 && w[1].1 >= w[0].1);
        }
    }

    #[test]
    fn banding_can_make_path_infeasible() {
        let a = seq(&(0..20).map(|v| v as f32).collect::<Vec<_>>());
        let b = seq(&(0..2).map(|v| v as f32).collect::<Vec<_>>());
        let c = DtwConfig {
            band_radius_frames: 1,
            step_pattern: StepPattern::Symmetric2,
            distance_normalization: DistanceNormalization::None,
        };
        assert_eq!(distance(&a, &b, &c), INF);
    }

    #[test]
    fn oversized_user_sequence_still_finite_without_band() {
        let a = seq(&[1.0, 2.0]);
        let b = seq(&(0..25).map(|v| (v as f32 * 0.1).sin()).collect::<Vec<_>>());
        let c = cfg(DistanceNormalization::PathLength, StepPattern::Symmetric2);
        assert!(distance(&a, &b, &c).is_finite());
    }
}
