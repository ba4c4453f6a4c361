//! YIN fundamental-frequency tracker (C8).
//!
//! Pure per-frame function over the raw (not MFCC) frame; never blocks
//! scoring. Frames too short for the configured period range yield
//! "unvoiced" rather than an error.

const ABSOLUTE_THRESHOLD: f32 = 0.1;
const MIN_WINDOW_SAMPLES: usize = 64;
/// Mean-square energy floor below which a frame is treated as silence
/// rather than run through the difference function: a zero/near-zero
/// frame makes every `difference[tau]` ~0, so the CMNDF is ~0 everywhere
/// and the threshold search would otherwise lock onto `tau_min` and
/// report a spurious high-confidence pitch.
const SILENCE_ENERGY_THRESHOLD: f32 = 1e-9;

/// Per-frame pitch estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PitchFrame {
    /// Fundamental frequency in Hz, or `0.0` when unvoiced.
    pub frequency: f32,
    /// `1 - min(CMNDF)`, clamped to `[0, 1]`.
    pub confidence: f32,
}

/// Aggregate pitch-contour statistics produced at `finalize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PitchProfile {
    pub mean_hz: f32,
    pub std_hz: f32,
    pub min_hz: f32,
    pub max_hz: f32,
    pub voiced_fraction: f32,
    pub vibrato_rate_hz: f32,
    pub vibrato_extent_hz: f32,
    pub vibrato_regularity: f32,
}

pub struct PitchTracker {
    sample_rate_hz: f32,
    frame_rate_hz: f32,
    contour: Vec<f32>,
    difference: Vec<f32>,
}

impl PitchTracker {
    pub fn new(sample_rate_hz: f32, hop_size: usize) -> Self {
        let frame_rate_hz = if hop_size > 0 {
            sample_rate_hz / hop_size as f32
        } else {
            0.0
        };
        Self {
            sample_rate_hz,
            frame_rate_hz,
            contour: Vec::new(),
            difference: Vec::new(),
        }
    }

    pub fn feed_frame(&mut self, frame: &[f32]) -> PitchFrame {
        let n = frame.len();
        let max_period = n / 2;
        if n < MIN_WINDOW_SAMPLES || max_period < 4 {
            self.contour.push(0.0);
            return PitchFrame::default();
        }

        let mean_sq = frame.iter().map(|&s| s * s).sum::<f32>() / n as f32;
        if mean_sq < SILENCE_ENERGY_THRESHOLD {
            self.contour.push(0.0);
            return PitchFrame::default();
        }

        self.difference.clear();
        self.difference.resize(max_period, 0.0);
        for tau in 1..max_period {
            let mut sum = 0.0f32;
            for j in 0..max_period {
                let d = frame[j] - frame[j + tau];
                sum += d * d;
            }
            self.difference[tau] = sum;
        }

        // Cumulative mean normalized difference function.
        let mut cmndf = vec![1.0f32; max_period];
        let mut running_sum = 0.0f32;
        for tau in 1..max_period {
            running_sum += self.difference[tau];
            cmndf[tau] = self.difference[tau] * tau as f32 / running_sum.max(1e-12);
        }

        let tau_min = 2usize;
        let mut chosen: Option<usize> = None;
        for tau in tau_min..max_period - 1 {
            if cmndf[tau] < ABSOLUTE_THRESHOLD && cmndf[tau] <= cmndf[tau + 1] {
                chosen = Some(tau);
                break;
            }
        }
        let tau = chosen.unwrap_or_else(|| {
            (tau_min..max_period)
                .min_by(|&a, &b| cmndf[a].partial_cmp(&cmndf[b]).unwrap())
                .unwrap_or(tau_min)
        });

        if !(cmndf[tau] < ABSOLUTE_THRESHOLD) {
            self.contour.push(0.0);
            return PitchFrame::default();
        }

        let refined_tau = parabolic_interpolate(&cmndf, tau);
        let frequency = if refined_tau > 0.0 {
            self.sample_rate_hz / refined_tau
        } else {
            0.0
        };
        let confidence = (1.0 - cmndf[tau]).clamp(0.0, 1.0);

        self.contour.push(frequency);
        PitchFrame { frequency, confidence }
    }

    pub fn finalize(&self) -> PitchProfile {
        let voiced: Vec<f32> = self.contour.iter().copied().filter(|&f| f > 0.0).collect();
        if voiced.is_empty() {
            return PitchProfile::default();
        }

        let mean = voiced.iter().sum::<f32>() / voiced.len() as f32;
        let variance = voiced.iter().map(|&f| (f - mean).powi(2)).sum::<f32>() / voiced.len() as f32;
        let std = variance.sqrt();
        let min_hz = voiced.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_hz = voiced.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let voiced_fraction = voiced.len() as f32 / self.contour.len() as f32;

        let (vibrato_rate_hz, vibrato_extent_hz, vibrato_regularity) =
            vibrato_stats(&voiced, mean, self.frame_rate_hz);

        PitchProfile {
            mean_hz: mean,
            std_hz: std,
            min_hz,
            max_hz,
            voiced_fraction,
            vibrato_rate_hz,
            vibrato_extent_hz,
            vibrato_regularity,
        }
    }

    pub fn reset(&mut self) {
        self.contour.clear();
        self.difference.clear();
    }
}

fn parabolic_interpolate(cmndf: &[f32], tau: usize) -> f32 {
    if tau == 0 || tau + 1 >= cmndf.len() {
        return tau as f32;
    }
    let (s0, s1, s2) = (cmndf[tau - 1], cmndf[tau], cmndf[tau + 1]);
    let denom = s0 - 2.0 * s1 + s2;
    if denom.abs() < 1e-12 {
        tau as f32
    } else {
        tau as f32 + 0.5 * (s0 - s2) / denom
    }
}

/// Vibrato rate/extent/regularity from the autocorrelation of the
/// detrended (mean-removed) voiced pitch contour. Regularity is the
/// normalized autocorrelation peak within the 3-8 Hz vibrato band
/// (SPEC_FULL.md, Open Question: vibrato regularity definition), the
/// standard published range for vocal/animal-call vibrato.
fn vibrato_stats(voiced: &[f32], mean: f32, frame_rate_hz: f32) -> (f32, f32, f32) {
    if voiced.len() < 8 || frame_rate_hz <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let residual: Vec<f32> = voiced.iter().map(|&f| f - mean).collect();
    let energy0: f32 = residual.iter().map(|&r| r * r).sum();
    if energy0 < 1e-6 {
        return (0.0, 0.0, 0.0);
    }

    let min_lag = (frame_rate_hz / 8.0).floor().max(1.0) as usize;
    let max_lag = (frame_rate_hz / 3.0).ceil() as usize;
    let max_lag = max_lag.min(residual.len() - 1);
    if min_lag >= max_lag {
        return (0.0, 0.0, 0.0);
    }

    let mut best_lag = min_lag;
    let mut best_r = f32::NEG_INFINITY;
    for lag in min_lag..=max_lag {
        let mut s = 0.0f32;
        for i in 0..(residual.len() - lag) {
            s += residual[i] * residual[i + lag];
        }
        let r = s / energy0;
        if r > best_r {
            best_r = r;
            best_lag = lag;
        }
    }

    let rate_hz = frame_rate_hz / best_lag as f32;
    let extent_hz = (energy0 / residual.len() as f32).sqrt() * std::f32::consts::SQRT_2;
    let regularity = best_r.clamp(0.0, 1.0);
    (rate_hz, extent_hz, regularity)
}
