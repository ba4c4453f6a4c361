//! Window functions and the real-FFT power-spectrum kernel (C2).
//!
//! One [`SpectrumKernel`] per session: it owns a single pre-planned FFT
//! and a pre-computed window so `power_spectrum` never allocates on the
//! per-frame path beyond the scratch buffer it owns.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::config::WindowType;
use crate::error::{EngineError, Result};

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (n as f32 - 1.0)).cos())
        .collect()
}

fn hamming_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (n as f32 - 1.0)).cos())
        .collect()
}

pub fn build_window(window_type: WindowType, n: usize) -> Vec<f32> {
    match window_type {
        WindowType::Hann => hann_window(n),
        WindowType::Hamming => hamming_window(n),
    }
}

/// Per-session FFT plan plus the windowing coefficients for `frame_size`.
pub struct SpectrumKernel {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex32>,
    frame_size: usize,
}

impl SpectrumKernel {
    pub fn new(frame_size: usize, window_type: WindowType) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);
        Self {
            fft,
            window: build_window(window_type, frame_size),
            scratch: vec![Complex32::new(0.0, 0.0); frame_size],
            frame_size,
        }
    }

    /// Power spectrum `|X[k]|^2` for `k` in `0..=frame_size/2`. DC and
    /// Nyquist bins are purely real. Rejects non-finite input with
    /// `InvalidAudio`; a zero-variance frame yields an all-zero spectrum.
    pub fn power_spectrum(&mut self, frame: &[f32], out: &mut Vec<f32>) -> Result<()> {
        if frame.len() != self.frame_size {
            return Err(EngineError::Internal(format!(
                "power_spectrum: expected frame of {}, got {}",
                self.frame_size,
                frame.len()
            )));
        }
        for (i, &s) in frame.iter().enumerate() {
            if !s.is_finite() {
                return Err(EngineError::InvalidAudio(format!(
                    "non-finite sample at offset {i} in analysis frame"
                )));
            }
            self.scratch[i] = Complex32::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let n_bins = self.frame_size / 2 + 1;
        out.clear();
        out.extend(self.scratch[..n_bins].iter().map(|c| c.norm_sqr()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_spectrum_has_expected_bin_count() {
        let mut kernel = SpectrumKernel::new(8, WindowType::Hamming);
        let mut out = Vec::new();
        kernel.power_spectrum(&[0.0; 8], &mut out).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn silent_frame_has_zero_energy() {
        let mut kernel = SpectrumKernel::new(8, WindowType::Hann);
        let mut out = Vec::new();
        kernel.power_spectrum(&[0.0; 8], &mut out).unwrap();
        assert!(out.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn rejects_non_finite_samples() {
        let mut kernel = SpectrumKernel::new(8, WindowType::Hamming);
        let mut frame = [0.0f32; 8];
        frame[3] = f32::NAN;
        let mut out = Vec::new();
        let err = kernel.power_spectrum(&frame, &mut out).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAudio(_)));
    }

    #[test]
    fn dc_tone_concentrates_energy_in_bin_zero() {
        let mut kernel = SpectrumKernel::new(64, WindowType::Hamming);
        let frame = [1.0f32; 64];
        let mut out = Vec::new();
        kernel.power_spectrum(&frame, &mut out).unwrap();
        let bin0 = out[0];
        let rest: f32 = out[1..].iter().sum();
        assert!(bin0 > rest);
    }
}
