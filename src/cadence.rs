//! Onset/cadence analyzer (C10).
//!
//! Onset detection via spectral flux with a causal adaptive threshold
//! (median over a trailing window plus a fixed margin); tempo via
//! autocorrelation of the onset envelope in the 40-240 BPM range.

use std::collections::VecDeque;

use crate::config::WindowType;
use crate::fft::SpectrumKernel;

const FLUX_HISTORY_FRAMES: usize = 43; // ~1s at a 256-hop/44.1kHz frame rate
const THRESHOLD_MARGIN: f32 = 1.5;
const MIN_BPM: f32 = 40.0;
const MAX_BPM: f32 = 240.0;
const MIN_ONSET_GAP_S: f32 = 0.1;

#[derive(Debug, Clone, Copy, Default)]
pub struct CadenceFrame {
    pub flux: f32,
    pub is_onset: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CadenceProfile {
    pub beat_times: Vec<f32>,
    pub beat_strengths: Vec<f32>,
    pub tempo_bpm: f32,
    pub rhythm_complexity: f32,
}

pub struct CadenceAnalyzer {
    kernel: SpectrumKernel,
    prev_spectrum: Vec<f32>,
    spectrum_scratch: Vec<f32>,
    flux_history: VecDeque<f32>,
    onset_envelope: Vec<f32>,
    frame_rate_hz: f32,
    elapsed_s: f32,
    last_onset_s: Option<f32>,
    beat_times: Vec<f32>,
    beat_strengths: Vec<f32>,
}

impl CadenceAnalyzer {
    pub fn new(frame_size: usize, hop_size: usize, window_type: WindowType, sample_rate_hz: f32) -> Self {
        let n_bins = frame_size / 2 + 1;
        Self {
            kernel: SpectrumKernel::new(frame_size, window_type),
            prev_spectrum: vec![0.0; n_bins],
            spectrum_scratch: Vec::new(),
            flux_history: VecDeque::with_capacity(FLUX_HISTORY_FRAMES),
            onset_envelope: Vec::new(),
            frame_rate_hz: if hop_size > 0 { sample_rate_hz / hop_size as f32 } else { 0.0 },
            elapsed_s: 0.0,
            last_onset_s: None,
            beat_times: Vec::new(),
            beat_strengths: Vec::new(),
        }
    }

    pub fn feed_frame(&mut self, frame: &[f32]) -> CadenceFrame {
        if self.kernel.power_spectrum(frame, &mut self.spectrum_scratch).is_err() {
            self.elapsed_s += 1.0 / self.frame_rate_hz.max(1e-6);
            return CadenceFrame::default();
        }

        let flux: f32 = self
            .spectrum_scratch
            .iter()
            .zip(self.prev_spectrum.iter())
            .map(|(&cur, &prev)| (cur - prev).max(0.0))
            .sum();
        self.prev_spectrum.copy_from_slice(&self.spectrum_scratch);
        self.onset_envelope.push(flux);

        let threshold = median(&self.flux_history) * THRESHOLD_MARGIN;
        let gap_ok = match self.last_onset_s {
            Some(t) => self.elapsed_s - t >= MIN_ONSET_GAP_S,
            None => true,
        };
        let is_onset = flux > threshold && flux > 1e-8 && gap_ok;

        if self.flux_history.len() == FLUX_HISTORY_FRAMES {
            self.flux_history.pop_front();
        }
        self.flux_history.push_back(flux);

        if is_onset {
            self.beat_times.push(self.elapsed_s);
            self.beat_strengths.push(flux);
            self.last_onset_s = Some(self.elapsed_s);
        }

        self.elapsed_s += 1.0 / self.frame_rate_hz.max(1e-6);
        CadenceFrame { flux, is_onset }
    }

    pub fn finalize(&self) -> CadenceProfile {
        CadenceProfile {
            beat_times: self.beat_times.clone(),
            beat_strengths: self.beat_strengths.clone(),
            tempo_bpm: self.estimate_tempo(),
            rhythm_complexity: rhythm_complexity(&self.beat_times),
        }
    }

    fn estimate_tempo(&self) -> f32 {
        if self.frame_rate_hz <= 0.0 || self.onset_envelope.len() < 4 {
            return 0.0;
        }
        let mean = self.onset_envelope.iter().sum::<f32>() / self.onset_envelope.len() as f32;
        let centered: Vec<f32> = self.onset_envelope.iter().map(|&v| v - mean).collect();
        let energy0: f32 = centered.iter().map(|&v| v * v).sum();
        if energy0 < 1e-9 {
            return 0.0;
        }

        let min_lag = (self.frame_rate_hz * 60.0 / MAX_BPM).floor().max(1.0) as usize;
        let max_lag = ((self.frame_rate_hz * 60.0 / MIN_BPM).ceil() as usize).min(centered.len() - 1);
        if min_lag >= max_lag {
            return 0.0;
        }

        let mut best_lag = min_lag;
        let mut best_r = f32::NEG_INFINITY;
        for lag in min_lag..=max_lag {
            let mut s = 0.0f32;
            for i in 0..(centered.len() - lag) {
                s += centered[i] * centered[i + lag];
            }
            let r = s / energy0;
            if r > best_r {
                best_r = r;
                best_lag = lag;
            }
        }
        self.frame_rate_hz * 60.0 / best_lag as f32
    }

    pub fn reset(&mut self) {
        self.prev_spectrum.iter_mut().for_each(|v| *v = 0.0);
        self.flux_history.clear();
        self.onset_envelope.clear();
        self.elapsed_s = 0.0;
        self.last_onset_s = None;
        self.beat_times.clear();
        self.beat_strengths.clear();
    }
}

fn median(values: &VecDeque<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Shannon entropy of the inter-onset-interval histogram, normalized to
/// `[0, 1]` by the maximum possible entropy for the bin count used
/// (SPEC_FULL.md C10).
fn rhythm_complexity(beat_times: &[f32]) -> f32 {
    if beat_times.len() < 3 {
        return 0.0;
    }
    let iois: Vec<f32> = beat_times.windows(2).map(|w| w[1] - w[0]).collect();
    let min_ioi = iois.iter().cloned().fold(f32::INFINITY, f32::min);
    let max_ioi = iois.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if (max_ioi - min_ioi).abs() < 1e-9 {
        return 0.0;
    }

    const BINS: usize = 8;
    let mut counts = [0u32; BINS];
    for &ioi in &iois {
        let t = ((ioi - min_ioi) / (max_ioi - min_ioi)).clamp(0.0, 0.999_999);
        let bin = (t * BINS as f32) as usize;
        counts[bin.min(BINS - 1)] += 1;
    }

    let total = iois.len() as f32;
    let entropy: f32 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f32 / total;
            -p * p.log2()
        })
        .sum();
    let max_entropy = (BINS as f32).log2();
    (entropy / max_entropy).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_train(sample_rate: f32, n: usize, period: usize) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        for start in (0..n).step_by(256) {
            let mut frame = vec![0.0f32; 1024];
            for i in 0..frame.len() {
                let pos = start + i;
                if pos % period == 0 {
                    frame[i] = 1.0;
                }
            }
            frames.push(frame);
            let _ = sample_rate;
        }
        frames
    }

    #[test]
    fn rhythm_complexity_zero_for_regular_beats() {
        let beats: Vec<f32> = (0..10).map(|i| i as f32 * 0.5).collect();
        assert_eq!(rhythm_complexity(&beats), 0.0);
    }

    #[test]
    fn rhythm_complexity_nonzero_for_irregular_beats() {
        let beats = vec![0.0, 0.2, 0.9, 1.0, 2.5, 2.6, 5.0];
        assert!(rhythm_complexity(&beats) > 0.0);
    }

    #[test]
    fn median_of_empty_history_is_zero() {
        assert_eq!(median(&VecDeque::new()), 0.0);
    }

    #[test]
    fn feeds_frames_without_panicking() {
        let sample_rate = 44_100.0;
        let mut analyzer = CadenceAnalyzer::new(1024, 256, WindowType::Hamming, sample_rate);
        for frame in click_train(sample_rate, 44_100 * 2, 11_025) {
            analyzer.feed_frame(&frame);
        }
        let profile = analyzer.finalize();
        assert!(profile.tempo_bpm >= 0.0);
    }
}
