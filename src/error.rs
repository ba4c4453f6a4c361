//! Error taxonomy for the Huntmaster engine.
//!
//! A single flat enum at the crate boundary; every fallible public
//! operation returns [`Result<T>`]. Variants map 1:1 onto the kinds in the
//! specification's error taxonomy, not onto internal implementation
//! details.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Violates an `EngineConfig`/`VadConfig`/`DtwConfig` invariant.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Operation invalid for the session's current lifecycle state.
    #[error("bad session state: {0}")]
    BadState(String),

    /// `master_id` not loaded, or a cache-only lookup missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A master's feature fingerprint does not match the session's engine
    /// fingerprint.
    #[error("config mismatch: master fingerprint {master:#010x} != engine fingerprint {engine:#010x}")]
    ConfigMismatch { master: u32, engine: u32 },

    /// NaN/Inf samples, or zero-length input where data is required.
    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    /// Ring backlog would overwrite samples not yet pulled into a frame.
    #[error("ring overflow: {attempted} samples would overwrite {unread} unread")]
    Overflow { attempted: usize, unread: usize },

    /// Cache file unreadable (header mismatch, truncation, I/O error).
    /// Recovered internally by recomputing; surfaced only as a warning
    /// event (see `tracing` output), never propagated to callers of the
    /// facade.
    #[error("cache corrupt at {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// A cooperative deadline was exceeded during `finalize`.
    #[error("cancelled: deadline exceeded")]
    Cancelled,

    /// Invariant violation. Fatal; the session that produced it is
    /// destroyed. Should never be observed from a correctly implemented
    /// engine.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl EngineError {
    /// Exit code mapping for embedding CLIs (see SPEC_FULL.md §6/§10).
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidConfig(_) => 2,
            EngineError::NotFound(_) => 3,
            EngineError::InvalidAudio(_) => 4,
            EngineError::CacheCorrupt { .. } => 5,
            EngineError::BadState(_)
            | EngineError::ConfigMismatch { .. }
            | EngineError::Overflow { .. }
            | EngineError::Cancelled => 1,
            EngineError::Internal(_) => 10,
        }
    }
}
