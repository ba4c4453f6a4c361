//! The master-call feature sequence (§3), shared read-only across every
//! session that attaches to it.

/// Immutable master-call feature sequence. Cheap to clone (wraps
/// `Arc`-free owned vectors; the facade is responsible for sharing one
/// instance via `Arc` across sessions, per SPEC_FULL.md §5).
#[derive(Debug, Clone)]
pub struct MasterCall {
    pub id: String,
    pub feature_version: String,
    pub mfcc_sequence: Vec<Vec<f32>>,
    pub duration_s: f32,
    pub sample_rate_hz: f32,
    /// Fingerprint of the `EngineConfig` that produced `mfcc_sequence`.
    pub engine_fingerprint: u32,
    /// Root-mean-square level of the master recording, used by the
    /// realtime scorer's level component. Computed directly from the
    /// source PCM when it was supplied to `load_master`; otherwise
    /// approximated from the cached MFCC energy coefficient (see
    /// `mfcc::rms_proxy_from_c0`) when a master is loaded purely from
    /// the feature cache with no retained audio (DESIGN.md, Open
    /// Question: master RMS without source PCM).
    pub rms: f32,
    /// Mean fundamental frequency of the master recording in Hz, or
    /// `None` when the master was loaded purely from the feature cache
    /// (the binary format carries no pitch data, and unlike `rms` there
    /// is no reasonable proxy to derive from cached MFCC coefficients
    /// alone). A `None` here makes `pitch_component` unavailable for the
    /// scorer, which renormalizes its weights accordingly.
    pub mean_pitch_hz: Option<f32>,
}

impl MasterCall {
    pub fn mfcc_coeffs(&self) -> usize {
        self.mfcc_sequence.first().map(|v| v.len()).unwrap_or(0)
    }

    pub fn frame_count(&self) -> usize {
        self.mfcc_sequence.len()
    }
}
