//! Content-addressed, on-disk feature cache (C5).
//!
//! Disabled entirely on `wasm32` targets and behind the `cache` feature
//! elsewhere (SPEC_FULL.md, WASM target notes): a disabled cache simply
//! means the facade recomputes the master's MFCC sequence every time it
//! is loaded instead of reading it back from disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::master::MasterCall;

const MAGIC: &[u8; 4] = b"MFC1";
const HEADER_LEN: usize = 20;
const FEATURE_VERSION: &str = "mfcc-v1";

fn corrupt(path: &Path, reason: impl Into<String>) -> EngineError {
    EngineError::CacheCorrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Content-addressed store keyed by `(master_id, engine_fingerprint)`.
/// Reads are lock-free; writes serialize per `master_id` through an
/// in-process mutex so concurrent producers for the same master never
/// interleave their tmp-file writes.
pub struct FeatureCache {
    base_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FeatureCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, master_id: &str) -> PathBuf {
        self.base_dir.join(format!("{master_id}.mfc1"))
    }

    fn lock_for(&self, master_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("feature cache lock table poisoned");
        locks
            .entry(master_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns a cached master-call feature sequence if one exists and
    /// matches `config`'s engine fingerprint. A missing file, a stale
    /// fingerprint, or a corrupted file are all reported as `Ok(None)`;
    /// corruption additionally emits a `tracing::warn!` cache-miss event
    /// (SPEC_FULL.md §9A) but is never surfaced as an error to callers.
    pub fn load(&self, master_id: &str, config: &EngineConfig) -> Result<Option<MasterCall>> {
        let path = self.path_for(master_id);
        if !path.exists() {
            return Ok(None);
        }
        match self.read_file(&path, master_id, config) {
            Ok(master) => {
                if master.engine_fingerprint != config.fingerprint() {
                    tracing::debug!(master_id, "feature cache fingerprint stale, recomputing");
                    Ok(None)
                } else {
                    Ok(Some(master))
                }
            }
            Err(EngineError::CacheCorrupt { path, reason }) => {
                tracing::warn!(path = %path.display(), reason, "feature cache entry corrupt, recomputing");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Writes the binary artifact atomically (tmp-file + rename).
    pub fn store(&self, master_id: &str, master: &MasterCall) -> Result<()> {
        let lock = self.lock_for(master_id);
        let _guard = lock.lock().expect("feature cache per-master lock poisoned");

        let path = self.path_for(master_id);
        let tmp_path = self.base_dir.join(format!("{master_id}.mfc1.tmp"));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| corrupt(&path, e.to_string()))?;
        }

        let bytes = Self::encode(master);
        std::fs::write(&tmp_path, &bytes).map_err(|e| corrupt(&tmp_path, e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| corrupt(&path, e.to_string()))?;
        Ok(())
    }

    fn encode(master: &MasterCall) -> Vec<u8> {
        let frame_count = master.frame_count() as u32;
        let coeff_count = master.mfcc_coeffs() as u32;
        let mut out = Vec::with_capacity(HEADER_LEN + (frame_count * coeff_count) as usize * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&frame_count.to_le_bytes());
        out.extend_from_slice(&coeff_count.to_le_bytes());
        out.extend_from_slice(&master.sample_rate_hz.to_le_bytes());
        out.extend_from_slice(&master.engine_fingerprint.to_le_bytes());
        for row in &master.mfcc_sequence {
            for &v in row {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    fn read_file(&self, path: &Path, master_id: &str, config: &EngineConfig) -> Result<MasterCall> {
        let bytes = std::fs::read(path).map_err(|e| corrupt(path, e.to_string()))?;
        if bytes.len() < HEADER_LEN {
            return Err(corrupt(path, "truncated header"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(corrupt(path, "magic mismatch"));
        }
        let frame_count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let coeff_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let sample_rate_hz = f32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let engine_fingerprint = u32::from_le_bytes(bytes[16..20].try_into().unwrap());

        let expected_len = HEADER_LEN + frame_count * coeff_count * 4;
        if bytes.len() != expected_len {
            return Err(corrupt(path, "truncated payload"));
        }

        let mut mfcc_sequence = Vec::with_capacity(frame_count);
        let mut offset = HEADER_LEN;
        for _ in 0..frame_count {
            let mut row = Vec::with_capacity(coeff_count);
            for _ in 0..coeff_count {
                row.push(f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()));
                offset += 4;
            }
            mfcc_sequence.push(row);
        }

        let duration_s = if sample_rate_hz > 0.0 {
            frame_count as f32 * config.hop_size as f32 / sample_rate_hz
        } else {
            0.0
        };

        let rms = if frame_count > 0 && coeff_count > 0 {
            let mean_c0: f32 =
                mfcc_sequence.iter().map(|row| row[0]).sum::<f32>() / frame_count as f32;
            crate::mfcc::rms_proxy_from_c0(mean_c0, config.mel_filters)
        } else {
            0.0
        };

        Ok(MasterCall {
            id: master_id.to_string(),
            feature_version: FEATURE_VERSION.to_string(),
            mfcc_sequence,
            duration_s,
            sample_rate_hz,
            engine_fingerprint,
            rms,
            mean_pitch_hz: None,
        })
    }
}
