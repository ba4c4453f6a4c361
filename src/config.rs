//! Engine, VAD, and DTW configuration, plus the engine fingerprint used to
//! invalidate stale feature-cache entries (SPEC_FULL.md 3A).

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Window function applied before the FFT (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    Hann,
    Hamming,
}

impl Default for WindowType {
    fn default() -> Self {
        WindowType::Hamming
    }
}

/// DTW step pattern (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPattern {
    Symmetric1,
    Symmetric2,
}

impl Default for StepPattern {
    fn default() -> Self {
        StepPattern::Symmetric2
    }
}

/// DTW distance normalization (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceNormalization {
    PathLength,
    SeqSum,
    None,
}

impl Default for DistanceNormalization {
    fn default() -> Self {
        DistanceNormalization::PathLength
    }
}

/// Voice-activity-detector thresholds and timing (C4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VadConfig {
    pub energy_threshold: f32,
    pub silence_peak_threshold: f32,
    pub window_ms: f32,
    pub min_sound_ms: f32,
    pub min_silence_ms: f32,
    pub hangover_ms: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.001,
            silence_peak_threshold: 0.02,
            window_ms: 10.0,
            min_sound_ms: 30.0,
            min_silence_ms: 100.0,
            hangover_ms: 150.0,
        }
    }
}

/// DTW comparator configuration (C6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DtwConfig {
    /// Sakoe-Chiba band radius in frames; `0` means unbounded.
    pub band_radius_frames: usize,
    pub step_pattern: StepPattern,
    pub distance_normalization: DistanceNormalization,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            band_radius_frames: 0,
            step_pattern: StepPattern::default(),
            distance_normalization: DistanceNormalization::default(),
        }
    }
}

/// Immutable, validated engine configuration shared by every session
/// created from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate_hz: f32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub mfcc_coeffs: usize,
    pub mel_filters: usize,
    pub freq_range: (f32, f32),
    pub window_type: WindowType,
    pub vad: VadConfig,
    pub dtw: DtwConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100.0,
            frame_size: 512,
            hop_size: 256,
            mfcc_coeffs: 13,
            mel_filters: 26,
            freq_range: (20.0, 8_000.0),
            window_type: WindowType::default(),
            vad: VadConfig::default(),
            dtw: DtwConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Checks the invariants in SPEC_FULL.md §3. The only place
    /// `InvalidConfig` is produced.
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 || !self.frame_size.is_power_of_two() {
            return Err(EngineError::InvalidConfig(format!(
                "frame_size must be a power of two, got {}",
                self.frame_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(EngineError::InvalidConfig(format!(
                "hop_size ({}) must be in 1..=frame_size ({})",
                self.hop_size, self.frame_size
            )));
        }
        if self.mfcc_coeffs == 0 || self.mfcc_coeffs > self.mel_filters {
            return Err(EngineError::InvalidConfig(format!(
                "mfcc_coeffs ({}) must be in 1..=mel_filters ({})",
                self.mfcc_coeffs, self.mel_filters
            )));
        }
        let (low, high) = self.freq_range;
        let nyquist = self.sample_rate_hz / 2.0;
        if !(low.is_finite() && high.is_finite()) || low < 0.0 || low >= high || high > nyquist {
            return Err(EngineError::InvalidConfig(format!(
                "freq_range ({low}, {high}) must satisfy 0 <= low < high <= nyquist ({nyquist})"
            )));
        }
        if self.sample_rate_hz <= 0.0 || !self.sample_rate_hz.is_finite() {
            return Err(EngineError::InvalidConfig(
                "sample_rate_hz must be a positive, finite value".into(),
            ));
        }
        Ok(())
    }

    /// Hashes the subset of fields that affect cached MFCC features
    /// (`FingerprintInputs`, SPEC_FULL.md 3A). Stable FNV-1a over a fixed
    /// little-endian byte encoding, so the fingerprint is reproducible
    /// across processes and targets.
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = Fnv1a::new();
        hasher.write_f32(self.sample_rate_hz);
        hasher.write_usize(self.frame_size);
        hasher.write_usize(self.hop_size);
        hasher.write_usize(self.mfcc_coeffs);
        hasher.write_usize(self.mel_filters);
        hasher.write_f32(self.freq_range.0);
        hasher.write_f32(self.freq_range.1);
        hasher.write_u8(match self.window_type {
            WindowType::Hann => 0,
            WindowType::Hamming => 1,
        });
        hasher.finish()
    }
}

/// Minimal FNV-1a (32-bit) hasher, used instead of `std::hash::Hasher` so
/// the fingerprint format is a stable, documented on-disk contract rather
/// than an implementation detail of the standard library's hasher.
struct Fnv1a(u32);

impl Fnv1a {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn write_u8(&mut self, byte: u8) {
        self.0 ^= byte as u32;
        self.0 = self.0.wrapping_mul(Self::PRIME);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_u8(b);
        }
    }

    fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_usize(&mut self, v: usize) {
        self.write_bytes(&(v as u64).to_le_bytes());
    }

    fn finish(&self) -> u32 {
        self.0
    }
}
