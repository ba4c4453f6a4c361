//! Real-time wildlife-call comparison engine.
//!
//! Streams PCM into a per-session pipeline (ring buffer → VAD →
//! MFCC → DTW) alongside three independent enhanced analyzers (pitch,
//! harmonic/spectral descriptors, cadence). [`Engine`] is the process-wide
//! facade; everything else is reachable through it or through [`Session`]
//! once a session handle is obtained via [`Engine::with_session`].

pub mod cadence;
#[cfg(all(feature = "cache", not(target_arch = "wasm32")))]
pub mod cache;
pub mod config;
pub mod dtw;
pub mod engine;
pub mod error;
pub mod fft;
pub mod harmonic;
pub mod master;
pub mod mfcc;
pub mod pitch;
pub mod ring;
pub mod scorer;
pub mod session;
pub mod vad;

pub use config::{DistanceNormalization, DtwConfig, EngineConfig, StepPattern, VadConfig, WindowType};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use master::MasterCall;
pub use scorer::ScoreSnapshot;
pub use session::{EnhancedProfile, LifecycleState, Session, SessionId};
