//! Harmonic/spectral descriptor analyzer (C9).
//!
//! Per frame: spectral centroid, bandwidth, 85% rolloff, zero-crossing
//! rate, and harmonic-to-noise ratio via peak-picking at integer
//! multiples of the frame's detected fundamental. The qualitative
//! descriptors (`brightness`, `roughness`, `resonance`) are bounded
//! `[0, 1]` and monotone in their primary input, per SPEC_FULL.md C9.

use crate::config::WindowType;
use crate::fft::SpectrumKernel;

const ROLLOFF_FRACTION: f32 = 0.85;
const HNR_PEAK_BIN_RADIUS: usize = 1;
const HNR_MAX_HARMONICS: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct HarmonicFrame {
    pub centroid_hz: f32,
    pub bandwidth_hz: f32,
    pub rolloff_hz: f32,
    pub zero_crossing_rate: f32,
    pub hnr_db: f32,
    pub brightness: f32,
    pub roughness: f32,
    pub resonance: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HarmonicProfile {
    pub mean_centroid_hz: f32,
    pub mean_bandwidth_hz: f32,
    pub mean_rolloff_hz: f32,
    pub mean_zero_crossing_rate: f32,
    pub mean_hnr_db: f32,
}

pub struct HarmonicAnalyzer {
    kernel: SpectrumKernel,
    sample_rate_hz: f32,
    frame_size: usize,
    scratch: Vec<f32>,

    count: u64,
    sum_centroid: f64,
    sum_bandwidth: f64,
    sum_rolloff: f64,
    sum_zcr: f64,
    sum_hnr: f64,
}

impl HarmonicAnalyzer {
    pub fn new(frame_size: usize, window_type: WindowType, sample_rate_hz: f32) -> Self {
        Self {
            kernel: SpectrumKernel::new(frame_size, window_type),
            sample_rate_hz,
            frame_size,
            scratch: Vec::new(),
            count: 0,
            sum_centroid: 0.0,
            sum_bandwidth: 0.0,
            sum_rolloff: 0.0,
            sum_zcr: 0.0,
            sum_hnr: 0.0,
        }
    }

    /// `f0_hz` is `0.0` for an unvoiced frame (no harmonic peak-picking is
    /// attempted; `hnr_db` is reported as `0.0`).
    pub fn feed_frame(&mut self, frame: &[f32], f0_hz: f32) -> HarmonicFrame {
        if self.kernel.power_spectrum(frame, &mut self.scratch).is_err() {
            return HarmonicFrame::default();
        }
        let bin_hz = self.sample_rate_hz / self.frame_size as f32;
        let total_energy: f32 = self.scratch.iter().sum();

        let centroid_hz = if total_energy > 0.0 {
            self.scratch
                .iter()
                .enumerate()
                .map(|(k, &p)| k as f32 * bin_hz * p)
                .sum::<f32>()
                / total_energy
        } else {
            0.0
        };

        let bandwidth_hz = if total_energy > 0.0 {
            let var = self
                .scratch
                .iter()
                .enumerate()
                .map(|(k, &p)| {
                    let d = k as f32 * bin_hz - centroid_hz;
                    d * d * p
                })
                .sum::<f32>()
                / total_energy;
            var.sqrt()
        } else {
            0.0
        };

        let rolloff_hz = if total_energy > 0.0 {
            let target = total_energy * ROLLOFF_FRACTION;
            let mut cum = 0.0f32;
            let mut bin = self.scratch.len() - 1;
            for (k, &p) in self.scratch.iter().enumerate() {
                cum += p;
                if cum >= target {
                    bin = k;
                    break;
                }
            }
            bin as f32 * bin_hz
        } else {
            0.0
        };

        let zero_crossing_rate = if frame.len() > 1 {
            let crossings = frame
                .windows(2)
                .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
                .count();
            crossings as f32 / (frame.len() - 1) as f32
        } else {
            0.0
        };

        let hnr_db = if f0_hz > 0.0 && total_energy > 0.0 {
            self.harmonic_to_noise_ratio(f0_hz, bin_hz, total_energy)
        } else {
            0.0
        };

        self.count += 1;
        self.sum_centroid += centroid_hz as f64;
        self.sum_bandwidth += bandwidth_hz as f64;
        self.sum_rolloff += rolloff_hz as f64;
        self.sum_zcr += zero_crossing_rate as f64;
        self.sum_hnr += hnr_db as f64;

        let nyquist = self.sample_rate_hz / 2.0;
        HarmonicFrame {
            centroid_hz,
            bandwidth_hz,
            rolloff_hz,
            zero_crossing_rate,
            hnr_db,
            brightness: (centroid_hz / nyquist.max(1.0)).clamp(0.0, 1.0),
            roughness: (bandwidth_hz / (nyquist.max(1.0) / 2.0)).clamp(0.0, 1.0),
            resonance: (hnr_db / 40.0).clamp(0.0, 1.0),
        }
    }

    fn harmonic_to_noise_ratio(&self, f0_hz: f32, bin_hz: f32, total_energy: f32) -> f32 {
        let mut harmonic_energy = 0.0f32;
        let n_bins = self.scratch.len();
        for h in 1..=HNR_MAX_HARMONICS {
            let center_bin = (h as f32 * f0_hz / bin_hz).round() as isize;
            if center_bin < 0 || center_bin as usize >= n_bins {
                break;
            }
            let lo = (center_bin - HNR_PEAK_BIN_RADIUS as isize).max(0) as usize;
            let hi = ((center_bin + HNR_PEAK_BIN_RADIUS as isize) as usize).min(n_bins - 1);
            harmonic_energy += self.scratch[lo..=hi].iter().cloned().fold(0.0f32, f32::max);
        }
        let noise_energy = (total_energy - harmonic_energy).max(1e-10);
        10.0 * (harmonic_energy.max(1e-10) / noise_energy).log10()
    }

    pub fn finalize(&self) -> HarmonicProfile {
        if self.count == 0 {
            return HarmonicProfile::default();
        }
        let n = self.count as f64;
        HarmonicProfile {
            mean_centroid_hz: (self.sum_centroid / n) as f32,
            mean_bandwidth_hz: (self.sum_bandwidth / n) as f32,
            mean_rolloff_hz: (self.sum_rolloff / n) as f32,
            mean_zero_crossing_rate: (self.sum_zcr / n) as f32,
            mean_hnr_db: (self.sum_hnr / n) as f32,
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.sum_centroid = 0.0;
        self.sum_bandwidth = 0.0;
        self.sum_rolloff = 0.0;
        self.sum_zcr = 0.0;
        self.sum_hnr = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn higher_frequency_tone_has_higher_centroid() {
        let sample_rate = 44_100.0;
        let mut low = HarmonicAnalyzer::new(1024, WindowType::Hamming, sample_rate);
        let mut high = HarmonicAnalyzer::new(1024, WindowType::Hamming, sample_rate);
        let low_out = low.feed_frame(&sine(300.0, sample_rate, 1024), 300.0);
        let high_out = high.feed_frame(&sine(3000.0, sample_rate, 1024), 3000.0);
        assert!(high_out.centroid_hz > low_out.centroid_hz);
        assert!(high_out.brightness > low_out.brightness);
    }

    #[test]
    fn descriptors_are_bounded() {
        let sample_rate = 44_100.0;
        let mut analyzer = HarmonicAnalyzer::new(1024, WindowType::Hamming, sample_rate);
        let out = analyzer.feed_frame(&sine(440.0, sample_rate, 1024), 440.0);
        for v in [out.brightness, out.roughness, out.resonance] {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn unvoiced_frame_reports_zero_hnr() {
        let sample_rate = 44_100.0;
        let mut analyzer = HarmonicAnalyzer::new(1024, WindowType::Hamming, sample_rate);
        let out = analyzer.feed_frame(&sine(440.0, sample_rate, 1024), 0.0);
        assert_eq!(out.hnr_db, 0.0);
    }
}
