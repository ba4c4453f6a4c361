//! Per-session lifecycle and frame fan-out (C11).
//!
//! `drain_and_score` is the scheduling point: it pulls every frame the
//! ring currently has, routes each through VAD, feeds the three
//! enhanced observers (pitch, harmonic, cadence) unconditionally, feeds
//! MFCC + the scoring loop only for `active*`-tagged frames, then asks
//! the scorer for an updated snapshot.

use std::sync::Arc;

use crate::cadence::{CadenceAnalyzer, CadenceProfile};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::harmonic::{HarmonicAnalyzer, HarmonicProfile};
use crate::master::MasterCall;
use crate::mfcc::MfccExtractor;
use crate::pitch::{PitchProfile, PitchTracker};
use crate::ring::PcmRing;
use crate::scorer::{RealtimeScorer, ScoreSnapshot, ScorerInput};
use crate::vad::VadState;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Finalized,
    Destroyed,
}

/// Aggregated pitch/harmonic/cadence statistics plus the final score,
/// produced by `finalize` (§3 `EnhancedProfile`).
#[derive(Debug, Clone)]
pub struct EnhancedProfile {
    pub pitch: PitchProfile,
    pub harmonic: HarmonicProfile,
    pub cadence: CadenceProfile,
    pub final_score: Option<ScoreSnapshot>,
}

pub struct Session {
    pub id: SessionId,
    config_snapshot: EngineConfig,
    master_ref: Option<Arc<MasterCall>>,
    ring: PcmRing,
    mfcc: MfccExtractor,
    vad_state: VadState,
    pitch_state: PitchTracker,
    harmonic_state: HarmonicAnalyzer,
    cadence_state: CadenceAnalyzer,
    scorer: RealtimeScorer,
    user_features: Vec<Vec<f32>>,
    last_score: Option<ScoreSnapshot>,
    sequence_number: u64,
    samples_analyzed: usize,
    lifecycle_state: LifecycleState,
}

impl Session {
    pub fn new(id: SessionId, config: EngineConfig) -> Self {
        Self {
            id,
            ring: PcmRing::new(config.frame_size, config.hop_size),
            mfcc: MfccExtractor::new(&config),
            vad_state: VadState::new(),
            pitch_state: PitchTracker::new(config.sample_rate_hz, config.hop_size),
            harmonic_state: HarmonicAnalyzer::new(config.frame_size, config.window_type, config.sample_rate_hz),
            cadence_state: CadenceAnalyzer::new(config.frame_size, config.hop_size, config.window_type, config.sample_rate_hz),
            scorer: RealtimeScorer::new(config.sample_rate_hz, config.hop_size),
            config_snapshot: config,
            master_ref: None,
            user_features: Vec::new(),
            last_score: None,
            sequence_number: 0,
            samples_analyzed: 0,
            lifecycle_state: LifecycleState::Created,
        }
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle_state
    }

    /// The id of the master this session references, if any. Used by the
    /// facade to decrement that master's refcount on session destruction.
    pub fn master_id(&self) -> Option<&str> {
        self.master_ref.as_ref().map(|m| m.id.as_str())
    }

    fn require_not_destroyed(&self) -> Result<()> {
        if self.lifecycle_state == LifecycleState::Destroyed {
            Err(EngineError::BadState("session destroyed".into()))
        } else {
            Ok(())
        }
    }

    /// Sets the session's master reference. Per §3 invariant 4,
    /// `master_ref` is immutable once set; attaching a second master
    /// requires a new session.
    pub fn attach_master(&mut self, master: Arc<MasterCall>) -> Result<()> {
        self.require_not_destroyed()?;
        if self.lifecycle_state == LifecycleState::Finalized {
            return Err(EngineError::BadState("session already finalized".into()));
        }
        if self.master_ref.is_some() {
            return Err(EngineError::BadState("master already attached to this session".into()));
        }
        if master.engine_fingerprint != self.config_snapshot.fingerprint() {
            return Err(EngineError::ConfigMismatch {
                master: master.engine_fingerprint,
                engine: self.config_snapshot.fingerprint(),
            });
        }
        self.master_ref = Some(master);
        Ok(())
    }

    /// Appends raw PCM samples into the ring. The first successful call
    /// transitions `Created -> Running` (§3 Lifecycle).
    pub fn append_pcm(&mut self, samples: &[f32]) -> Result<usize> {
        match self.lifecycle_state {
            LifecycleState::Created | LifecycleState::Running => {}
            LifecycleState::Finalized => return Err(EngineError::BadState("session finalized".into())),
            LifecycleState::Destroyed => return Err(EngineError::BadState("session destroyed".into())),
        }
        let appended = self.ring.append(samples)?;
        if self.lifecycle_state == LifecycleState::Created {
            self.lifecycle_state = LifecycleState::Running;
            tracing::info!(session_id = self.id, "session started");
        }
        Ok(appended)
    }

    /// Drains every complete frame currently in the ring, updates all
    /// observers, and returns a fresh similarity snapshot.
    pub fn drain_and_score(&mut self, timestamp_ms: u64) -> Result<ScoreSnapshot> {
        if self.lifecycle_state != LifecycleState::Running {
            return Err(EngineError::BadState(format!(
                "drain_and_score requires Running, session is {:?}",
                self.lifecycle_state
            )));
        }

        while let Some(frame) = self.ring.pull_frame() {
            let pitch_frame = self.pitch_state.feed_frame(&frame);
            self.harmonic_state.feed_frame(&frame, pitch_frame.frequency);
            self.cadence_state.feed_frame(&frame);

            let frame_duration_ms = self.config_snapshot.hop_size as f32 / self.config_snapshot.sample_rate_hz * 1000.0;
            let tag = self.vad_state.process(&frame, &self.config_snapshot.vad, frame_duration_ms);

            if tag.is_active() {
                match self.mfcc.mfcc(&frame) {
                    Ok(out) => {
                        self.user_features.push(out.coeffs);
                        self.samples_analyzed += self.config_snapshot.hop_size;
                        self.scorer.observe_active_frame(&frame);
                    }
                    Err(e) => {
                        tracing::debug!(session_id = self.id, error = %e, "dropping frame: mfcc extraction failed");
                    }
                }
            }
        }

        let snapshot = match &self.master_ref {
            Some(master) => {
                let pitch_profile = self.pitch_state.finalize();
                let user_mean_pitch_hz = if pitch_profile.voiced_fraction > 0.0 {
                    Some(pitch_profile.mean_hz)
                } else {
                    None
                };
                let user_duration_s = self.user_features.len() as f32 * self.config_snapshot.hop_size as f32
                    / self.config_snapshot.sample_rate_hz;

                self.scorer.update(
                    ScorerInput {
                        master,
                        user_mfcc: &self.user_features,
                        dtw_cfg: &self.config_snapshot.dtw,
                        user_duration_s,
                        user_mean_pitch_hz,
                        frame_size: self.config_snapshot.frame_size,
                        timestamp_ms,
                    },
                    self.samples_analyzed,
                )
            }
            None => ScoreSnapshot::empty(timestamp_ms),
        };

        self.last_score = Some(snapshot);
        self.sequence_number += 1;
        Ok(snapshot)
    }

    /// Finalizes the session, producing aggregate pitch/harmonic/cadence
    /// statistics. `deadline_ms`, when set, is a monotone budget checked
    /// before the (potentially expensive) final DTW pass; exceeding it
    /// returns `Cancelled` with the last partial snapshot preserved.
    pub fn finalize(&mut self, timestamp_ms: u64, deadline_ms: Option<u64>) -> Result<EnhancedProfile> {
        if self.lifecycle_state != LifecycleState::Running {
            return Err(EngineError::BadState(format!(
                "finalize requires Running, session is {:?}",
                self.lifecycle_state
            )));
        }
        if let Some(deadline) = deadline_ms {
            if timestamp_ms > deadline {
                return Err(EngineError::Cancelled);
            }
        }

        let final_score = self.drain_and_score(timestamp_ms).ok().or(self.last_score);
        self.lifecycle_state = LifecycleState::Finalized;
        tracing::info!(session_id = self.id, "session finalized");

        Ok(EnhancedProfile {
            pitch: self.pitch_state.finalize(),
            harmonic: self.harmonic_state.finalize(),
            cadence: self.cadence_state.finalize(),
            final_score,
        })
    }

    /// Returns the session to `Created`, discarding all accumulated
    /// processing state but keeping `config_snapshot` and `master_ref`.
    pub fn reset(&mut self) -> Result<()> {
        if self.lifecycle_state == LifecycleState::Destroyed {
            return Err(EngineError::BadState("session destroyed".into()));
        }
        self.ring.clear();
        self.vad_state.reset();
        self.pitch_state.reset();
        self.harmonic_state.reset();
        self.cadence_state.reset();
        self.scorer.reset();
        self.user_features.clear();
        self.last_score = None;
        self.sequence_number = 0;
        self.samples_analyzed = 0;
        self.lifecycle_state = LifecycleState::Created;
        Ok(())
    }

    /// Idempotent: releases buffers and marks the session `Destroyed`.
    pub fn destroy(&mut self) {
        self.ring.clear();
        self.user_features.clear();
        self.master_ref = None;
        self.lifecycle_state = LifecycleState::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn sine(freq: f32, sample_rate: f32, n: usize, amplitude: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn attached_master(config: &EngineConfig, samples: &[f32]) -> Arc<MasterCall> {
        let mut extractor = MfccExtractor::new(config);
        let mut ring = PcmRing::new(config.frame_size, config.hop_size);
        let mut mfcc_sequence = Vec::new();
        for chunk in samples.chunks(config.frame_size) {
            ring.append(chunk).unwrap();
            while let Some(frame) = ring.pull_frame() {
                mfcc_sequence.push(extractor.mfcc(&frame).unwrap().coeffs);
            }
        }
        Arc::new(MasterCall {
            id: "test-master".into(),
            feature_version: "mfcc-v1".into(),
            mfcc_sequence,
            duration_s: samples.len() as f32 / config.sample_rate_hz,
            sample_rate_hz: config.sample_rate_hz,
            engine_fingerprint: config.fingerprint(),
            rms: 0.5 / std::f32::consts::SQRT_2,
            mean_pitch_hz: Some(440.0),
        })
    }

    #[test]
    fn append_pcm_before_running_transitions_to_running() {
        let config = EngineConfig::default();
        let mut session = Session::new(1, config);
        assert_eq!(session.lifecycle_state(), LifecycleState::Created);
        session.append_pcm(&[0.0; 64]).unwrap();
        assert_eq!(session.lifecycle_state(), LifecycleState::Running);
    }

    #[test]
    fn drain_and_score_rejects_non_running_session() {
        let config = EngineConfig::default();
        let mut session = Session::new(1, config);
        assert!(matches!(session.drain_and_score(0), Err(EngineError::BadState(_))));
    }

    #[test]
    fn destroy_rejects_every_further_operation() {
        let config = EngineConfig::default();
        let mut session = Session::new(1, config);
        session.destroy();
        assert!(matches!(session.append_pcm(&[0.0; 4]), Err(EngineError::BadState(_))));
        assert!(matches!(session.reset(), Err(EngineError::BadState(_))));
    }

    #[test]
    fn self_similar_sine_scores_highly_and_sequence_number_increases() {
        let config = EngineConfig::default();
        let samples = sine(440.0, config.sample_rate_hz, config.sample_rate_hz as usize, 0.5);
        let master = attached_master(&config, &samples);

        let mut session = Session::new(1, config);
        session.attach_master(master).unwrap();

        let mut last_seq = 0u64;
        // Chunk size must stay within the ring's `2 * frame_size` capacity
        // (C1); draining every call keeps the backlog well under that.
        for chunk in samples.chunks(config.frame_size) {
            session.append_pcm(chunk).unwrap();
            let snapshot = session.drain_and_score(0).unwrap();
            assert!(snapshot.overall >= snapshot.overall.min(1.0));
            assert!(session.sequence_number > last_seq);
            last_seq = session.sequence_number;
        }

        let snapshot = session.drain_and_score(0).unwrap();
        assert!(snapshot.mfcc_component >= 0.99, "got {}", snapshot.mfcc_component);
        assert!(snapshot.overall >= 0.99, "got {}", snapshot.overall);
    }

    #[test]
    fn attaching_mismatched_master_is_rejected() {
        let config = EngineConfig::default();
        let mut other = config;
        other.frame_size = 1024;
        other.hop_size = 512;
        let master = attached_master(&other, &vec![0.0; 4096]);

        let mut session = Session::new(1, config);
        assert!(matches!(
            session.attach_master(master),
            Err(EngineError::ConfigMismatch { .. })
        ));
    }
}
