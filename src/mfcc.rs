//! Mel filterbank and MFCC extraction (C3).
//!
//! Pipeline: window + power spectrum (delegated to [`SpectrumKernel`]) →
//! triangular mel filterbank → `log(eps + energy)` → orthonormal DCT-II.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fft::SpectrumKernel;

/// `log(eps + energy)` floor, per SPEC_FULL.md C3.
const LOG_ENERGY_EPS: f32 = 1e-10;

fn hz_to_mel(f: f32) -> f32 {
    2595.0 * (1.0 + f / 700.0).log10()
}

fn mel_to_hz(m: f32) -> f32 {
    700.0 * (10f32.powf(m / 2595.0) - 1.0)
}

/// Triangular filters spaced on the mel scale between `low_hz` and
/// `high_hz`, one row per filter, `n_bins` columns.
fn build_mel_filterbank(
    mel_filters: usize,
    frame_size: usize,
    sample_rate_hz: f32,
    freq_range: (f32, f32),
) -> Vec<Vec<f32>> {
    let n_bins = frame_size / 2 + 1;
    let (low_hz, high_hz) = freq_range;

    let mel_min = hz_to_mel(low_hz);
    let mel_max = hz_to_mel(high_hz);

    let mel_points: Vec<f32> = (0..mel_filters + 2)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (mel_filters + 1) as f32)
        .collect();

    let bin_points: Vec<f32> = mel_points
        .iter()
        .map(|&m| mel_to_hz(m) * frame_size as f32 / sample_rate_hz)
        .collect();

    let mut filters = Vec::with_capacity(mel_filters);
    for i in 0..mel_filters {
        let mut filter = vec![0.0f32; n_bins];
        let left = bin_points[i];
        let center = bin_points[i + 1];
        let right = bin_points[i + 2];

        for (j, w) in filter.iter_mut().enumerate() {
            let jf = j as f32;
            if jf >= left && jf <= center && (center - left) > 1e-10 {
                *w = (jf - left) / (center - left);
            } else if jf > center && jf <= right && (right - center) > 1e-10 {
                *w = (right - jf) / (right - center);
            }
        }
        filters.push(filter);
    }
    filters
}

/// Orthonormal DCT-II: `sqrt(2/N)` scale, first output coefficient scaled
/// by an additional `1/sqrt(2)`.
fn dct_ii_orthonormal(input: &[f32], n_out: usize) -> Vec<f32> {
    let n = input.len();
    let scale = (2.0 / n as f32).sqrt();
    (0..n_out)
        .map(|k| {
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x * (std::f32::consts::PI / n as f32 * (i as f32 + 0.5) * k as f32).cos()
                })
                .sum();
            let c = if k == 0 { std::f32::consts::FRAC_1_SQRT_2 } else { 1.0 };
            scale * c * sum
        })
        .collect()
}

/// A single MFCC frame plus the scalar the realtime scorer's level
/// component reads without re-walking the spectrum.
#[derive(Debug, Clone)]
pub struct MfccFrame {
    pub coeffs: Vec<f32>,
    pub log_energy: f32,
}

pub struct MfccExtractor {
    kernel: SpectrumKernel,
    filterbank: Vec<Vec<f32>>,
    mfcc_coeffs: usize,
    spectrum_scratch: Vec<f32>,
    mel_energy_scratch: Vec<f32>,
}

impl MfccExtractor {
    pub fn new(config: &EngineConfig) -> Self {
        let filterbank = build_mel_filterbank(
            config.mel_filters,
            config.frame_size,
            config.sample_rate_hz,
            config.freq_range,
        );
        Self {
            kernel: SpectrumKernel::new(config.frame_size, config.window_type),
            filterbank,
            mfcc_coeffs: config.mfcc_coeffs,
            spectrum_scratch: Vec::new(),
            mel_energy_scratch: vec![0.0; config.mel_filters],
        }
    }

    pub fn mfcc(&mut self, frame: &[f32]) -> Result<MfccFrame> {
        self.kernel.power_spectrum(frame, &mut self.spectrum_scratch)?;

        let mut total_energy = 0.0f32;
        for (band, filter) in self.mel_energy_scratch.iter_mut().zip(self.filterbank.iter()) {
            let energy: f32 = filter
                .iter()
                .zip(self.spectrum_scratch.iter())
                .map(|(&w, &p)| w * p)
                .sum();
            total_energy += energy;
            *band = (LOG_ENERGY_EPS + energy).ln();
        }

        let coeffs = dct_ii_orthonormal(&self.mel_energy_scratch, self.mfcc_coeffs);
        let log_energy = (LOG_ENERGY_EPS + total_energy).ln();

        Ok(MfccFrame { coeffs, log_energy })
    }
}

/// Approximates an RMS-like level from the mean zeroth MFCC coefficient
/// across a sequence. `coeffs[0]` is (up to the orthonormal DCT scale) the
/// average log-mel-energy across bands, so `exp(.../2)` gives a positive,
/// monotone stand-in for signal level when the original PCM is not
/// available (see `MasterCall::rms`).
pub fn rms_proxy_from_c0(mean_c0: f32, mel_filters: usize) -> f32 {
    let mean_log_mel = mean_c0 / (mel_filters.max(1) as f32).sqrt();
    (mean_log_mel / 2.0).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn test_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.frame_size = 512;
        cfg.hop_size = 256;
        cfg.mfcc_coeffs = 13;
        cfg.mel_filters = 26;
        cfg
    }

    #[test]
    fn mfcc_vector_has_configured_length() {
        let cfg = test_config();
        let mut extractor = MfccExtractor::new(&cfg);
        let frame: Vec<f32> = (0..cfg.frame_size)
            .map(|i| (i as f32 * 0.1).sin())
            .collect();
        let out = extractor.mfcc(&frame).unwrap();
        assert_eq!(out.coeffs.len(), 13);
    }

    #[test]
    fn identical_frames_give_identical_output() {
        let cfg = test_config();
        let mut extractor = MfccExtractor::new(&cfg);
        let frame: Vec<f32> = (0..cfg.frame_size)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let a = extractor.mfcc(&frame).unwrap();
        let b = extractor.mfcc(&frame).unwrap();
        assert_eq!(a.coeffs, b.coeffs);
        assert_eq!(a.log_energy, b.log_energy);
    }

    #[test]
    fn silent_frame_has_very_negative_log_energy() {
        let cfg = test_config();
        let mut extractor = MfccExtractor::new(&cfg);
        let out = extractor.mfcc(&vec![0.0; cfg.frame_size]).unwrap();
        assert!(out.log_energy < -10.0);
    }
}
