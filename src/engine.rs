//! Process-wide session/master registry — the stable public facade (C12).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::master::MasterCall;
use crate::mfcc::MfccExtractor;
use crate::pitch::PitchTracker;
use crate::ring::PcmRing;
use crate::session::{Session, SessionId};

#[cfg(all(feature = "cache", not(target_arch = "wasm32")))]
use crate::cache::FeatureCache;

struct MasterEntry {
    call: Arc<MasterCall>,
    refcount: usize,
}

/// Process-wide registry of sessions and loaded masters. Cheap to clone
/// (wraps `Arc`s internally would be unusual here; instead each `Engine`
/// owns its registries directly, matching §9's "scoped engine, not a
/// singleton" redesign).
pub struct Engine {
    config: EngineConfig,
    next_session_id: Mutex<SessionId>,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<Session>>>>,
    masters: Mutex<HashMap<String, MasterEntry>>,
    #[cfg(all(feature = "cache", not(target_arch = "wasm32")))]
    cache: Option<FeatureCache>,
}

impl Engine {
    /// Validates `config` eagerly (§4.14) so no session can observe a
    /// broken configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            next_session_id: Mutex::new(1),
            sessions: Mutex::new(HashMap::new()),
            masters: Mutex::new(HashMap::new()),
            #[cfg(all(feature = "cache", not(target_arch = "wasm32")))]
            cache: None,
        })
    }

    #[cfg(all(feature = "cache", not(target_arch = "wasm32")))]
    pub fn with_feature_cache(mut self, cache_dir: impl Into<std::path::PathBuf>) -> Self {
        self.cache = Some(FeatureCache::new(cache_dir));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_session(&self) -> SessionId {
        let mut next_id = self.next_session_id.lock().expect("session id counter poisoned");
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        let session = Session::new(id, self.config);
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert(id, Arc::new(Mutex::new(session)));
        tracing::info!(session_id = id, "session created");
        id
    }

    /// Executes `op` while holding only the target session's lock. The
    /// registry lock is held just long enough to clone the `Arc`
    /// (SPEC_FULL.md §6A).
    pub fn with_session<R>(&self, id: SessionId, op: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let session_arc = {
            let sessions = self.sessions.lock().expect("session registry poisoned");
            sessions
                .get(&id)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("session {id}")))?
        };
        let mut session = session_arc.lock().expect("session lock poisoned");
        op(&mut session)
    }

    /// Idempotent: destroying an unknown session id is not an error.
    pub fn destroy_session(&self, id: SessionId) {
        let session_arc = self.sessions.lock().expect("session registry poisoned").remove(&id);
        if let Some(session_arc) = session_arc {
            let mut session = session_arc.lock().expect("session lock poisoned");
            let master_id = session.master_id().map(str::to_string);
            session.destroy();
            drop(session);

            if let Some(master_id) = master_id {
                if let Some(entry) = self.masters.lock().expect("master registry poisoned").get_mut(&master_id) {
                    entry.refcount = entry.refcount.saturating_sub(1);
                }
            }
        }
    }

    /// Attaches the master identified by `master_id` to `session_id`.
    /// This is the session-facing half of attach; the facade half is
    /// resolving `master_id` against the loaded-masters table.
    pub fn attach_master(&self, session_id: SessionId, master_id: &str) -> Result<()> {
        let call = {
            let masters = self.masters.lock().expect("master registry poisoned");
            masters
                .get(master_id)
                .map(|entry| entry.call.clone())
                .ok_or_else(|| EngineError::NotFound(format!("master {master_id}")))?
        };
        let result = self.with_session(session_id, |session| session.attach_master(call));
        if result.is_ok() {
            if let Some(entry) = self.masters.lock().expect("master registry poisoned").get_mut(master_id) {
                entry.refcount += 1;
            }
        }
        result
    }

    /// Loads a master call from raw PCM, computing its MFCC sequence
    /// (and checking the feature cache first, when enabled). `None` PCM
    /// with no cache hit is a `NotFound`.
    pub fn load_master(&self, master_id: &str, pcm: Option<&[f32]>) -> Result<()> {
        if self.masters.lock().expect("master registry poisoned").contains_key(master_id) {
            return Ok(());
        }

        #[cfg(all(feature = "cache", not(target_arch = "wasm32")))]
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.load(master_id, &self.config)? {
                self.insert_master(master_id, cached);
                return Ok(());
            }
        }

        let pcm = pcm.ok_or_else(|| EngineError::NotFound(format!("master {master_id}")))?;
        if pcm.is_empty() {
            return Err(EngineError::InvalidAudio("master PCM is empty".into()));
        }

        let master = self.compute_master(master_id, pcm)?;

        #[cfg(all(feature = "cache", not(target_arch = "wasm32")))]
        if let Some(cache) = &self.cache {
            cache.store(master_id, &master)?;
        }

        self.insert_master(master_id, master);
        Ok(())
    }

    fn compute_master(&self, master_id: &str, pcm: &[f32]) -> Result<MasterCall> {
        let mut ring = PcmRing::new(self.config.frame_size, self.config.hop_size);
        let mut extractor = MfccExtractor::new(&self.config);

        let mut mfcc_sequence = Vec::new();
        let mut pitch_tracker = PitchTracker::new(self.config.sample_rate_hz, self.config.hop_size);

        // The ring's capacity is `2 * frame_size` (C1); a master's PCM is
        // almost always far longer than that, so it must be fed in and
        // drained in frame-sized increments rather than in one `append`.
        for chunk in pcm.chunks(self.config.frame_size) {
            ring.append(chunk)?;
            while let Some(frame) = ring.pull_frame() {
                mfcc_sequence.push(extractor.mfcc(&frame)?.coeffs);
                pitch_tracker.feed_frame(&frame);
            }
        }

        let rms = (pcm.iter().map(|&s| s * s).sum::<f32>() / pcm.len() as f32).sqrt();
        let duration_s = pcm.len() as f32 / self.config.sample_rate_hz;

        let pitch_profile = pitch_tracker.finalize();
        let mean_pitch_hz = if pitch_profile.voiced_fraction > 0.0 {
            Some(pitch_profile.mean_hz)
        } else {
            None
        };

        Ok(MasterCall {
            id: master_id.to_string(),
            feature_version: "mfcc-v1".into(),
            mfcc_sequence,
            duration_s,
            sample_rate_hz: self.config.sample_rate_hz,
            engine_fingerprint: self.config.fingerprint(),
            rms,
            mean_pitch_hz,
        })
    }

    fn insert_master(&self, master_id: &str, master: MasterCall) {
        self.masters.lock().expect("master registry poisoned").insert(
            master_id.to_string(),
            MasterEntry {
                call: Arc::new(master),
                refcount: 0,
            },
        );
    }

    /// Rejected with `BadState` while any live session still references
    /// this master.
    pub fn unload_master(&self, master_id: &str) -> Result<()> {
        let mut masters = self.masters.lock().expect("master registry poisoned");
        match masters.get(master_id) {
            Some(entry) if entry.refcount > 0 => Err(EngineError::BadState(format!(
                "master {master_id} still referenced by {} session(s)",
                entry.refcount
            ))),
            Some(_) => {
                masters.remove(master_id);
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("master {master_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_ids_are_monotone() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let a = engine.create_session();
        let b = engine.create_session();
        assert!(b > a);
    }

    #[test]
    fn with_session_on_unknown_id_is_not_found() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let result = engine.with_session(999, |_| Ok(()));
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn destroy_session_is_idempotent_for_unknown_id() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.destroy_session(999);
    }

    #[test]
    fn load_master_with_no_pcm_and_no_cache_hit_is_not_found() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        assert!(matches!(engine.load_master("missing", None), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn load_then_attach_then_unload_round_trips() {
        let config = EngineConfig::default();
        let engine = Engine::new(config).unwrap();
        let pcm: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();
        engine.load_master("bull-elk", Some(&pcm)).unwrap();

        let session_id = engine.create_session();
        engine.attach_master(session_id, "bull-elk").unwrap();

        assert!(matches!(
            engine.unload_master("bull-elk"),
            Err(EngineError::BadState(_))
        ));

        engine.destroy_session(session_id);
        engine.unload_master("bull-elk").unwrap();
    }

    #[test]
    fn attach_unknown_master_is_not_found() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let session_id = engine.create_session();
        assert!(matches!(
            engine.attach_master(session_id, "no-such-master"),
            Err(EngineError::NotFound(_))
        ));
    }
}
