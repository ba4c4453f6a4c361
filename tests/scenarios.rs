//! End-to-end scenarios driven entirely through the public `Engine`/
//! `Session` facade: self-match, frequency mismatch, noise, timing drift,
//! cache persistence, and ring-overflow recovery.

use gamecalls_engine::{Engine, EngineConfig, EngineError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SAMPLE_RATE: f32 = 44_100.0;

fn sine(freq: f32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let n = (SAMPLE_RATE * seconds) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin())
        .collect()
}

fn white_noise(seconds: f32, rms: f32, seed: u64) -> Vec<f32> {
    let n = (SAMPLE_RATE * seconds) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    // Uniform[-1,1] has RMS 1/sqrt(3); scale to hit the target RMS.
    let scale = rms * 3f32.sqrt();
    (0..n).map(|_| rng.gen_range(-1.0f32..=1.0) * scale).collect()
}

/// Runs `pcm` through a fresh session attached to `master_id` and returns
/// the final score snapshot plus the enhanced profile.
fn score_against(
    engine: &Engine,
    master_id: &str,
    pcm: &[f32],
) -> (gamecalls_engine::ScoreSnapshot, gamecalls_engine::EnhancedProfile) {
    let session_id = engine.create_session();
    engine.attach_master(session_id, master_id).unwrap();

    // Draining after every append keeps the ring's backlog under
    // `frame_size` between calls, so a chunk of up to one frame's worth
    // never approaches the ring's `2 * frame_size` capacity (C1).
    let chunk_size = engine.config().frame_size;
    let mut timestamp_ms = 0u64;
    let mut last = None;
    for chunk in pcm.chunks(chunk_size) {
        engine.with_session(session_id, |s| s.append_pcm(chunk)).unwrap();
        last = Some(
            engine
                .with_session(session_id, |s| s.drain_and_score(timestamp_ms))
                .unwrap(),
        );
        timestamp_ms += (chunk_size as f32 / SAMPLE_RATE * 1000.0) as u64;
    }
    let profile = engine
        .with_session(session_id, |s| s.finalize(timestamp_ms, None))
        .unwrap();
    engine.destroy_session(session_id);
    (last.expect("at least one chunk processed"), profile)
}

#[test]
fn sine_self_match_scores_highly_and_is_reliable() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let master_pcm = sine(440.0, 1.0, 0.5);
    engine.load_master("self-match", Some(&master_pcm)).unwrap();

    let (snapshot, _) = score_against(&engine, "self-match", &master_pcm);

    assert!(snapshot.overall >= 0.9, "overall={}", snapshot.overall);
    assert!(snapshot.mfcc_component >= 0.9, "mfcc={}", snapshot.mfcc_component);
    assert!(snapshot.reliable, "expected a reliable snapshot after 1s of self-match audio");
}

#[test]
fn frequency_mismatch_scores_lower_than_self_match() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let master_pcm = sine(440.0, 1.0, 0.5);
    engine.load_master("freq-mismatch", Some(&master_pcm)).unwrap();

    let (self_match, _) = score_against(&engine, "freq-mismatch", &master_pcm);

    let mismatched_pcm = sine(880.0, 1.0, 0.5);
    let (mismatch, _) = score_against(&engine, "freq-mismatch", &mismatched_pcm);

    assert!(
        mismatch.overall < self_match.overall,
        "mismatch overall ({}) should be lower than self-match overall ({})",
        mismatch.overall,
        self_match.overall
    );
    assert!(mismatch.overall <= 0.8, "overall={}", mismatch.overall);
    assert!(mismatch.mfcc_component <= 0.8, "mfcc={}", mismatch.mfcc_component);
}

#[test]
fn white_noise_scores_lower_than_frequency_mismatch() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let master_pcm = sine(440.0, 1.0, 0.5);
    engine.load_master("noise-cmp", Some(&master_pcm)).unwrap();

    let mismatched_pcm = sine(880.0, 1.0, 0.5);
    let (mismatch, _) = score_against(&engine, "noise-cmp", &mismatched_pcm);

    let noise_pcm = white_noise(1.0, 0.3, 42);
    let (noise, _) = score_against(&engine, "noise-cmp", &noise_pcm);

    assert!(
        noise.mfcc_component <= mismatch.mfcc_component + 1e-3,
        "noise mfcc ({}) should be no better than frequency-mismatch mfcc ({})",
        noise.mfcc_component,
        mismatch.mfcc_component
    );
    assert!(noise.overall <= 0.5, "overall={}", noise.overall);
}

#[test]
fn timing_drift_lowers_timing_component_but_keeps_mfcc_high() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let master_pcm = sine(440.0, 1.0, 0.5);
    engine.load_master("timing-drift", Some(&master_pcm)).unwrap();

    // Same steady tone, stretched to 1.3x the duration: DTW absorbs the
    // stretch (same per-frame spectral content) but duration disagrees.
    let stretched_pcm = sine(440.0, 1.3, 0.5);
    let (snapshot, _) = score_against(&engine, "timing-drift", &stretched_pcm);

    assert!(snapshot.mfcc_component >= 0.8, "mfcc={}", snapshot.mfcc_component);
    assert!(
        (snapshot.timing_component - 0.7).abs() < 0.15,
        "timing={}",
        snapshot.timing_component
    );
}

#[test]
fn cache_persists_features_across_engine_instances() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default();
    let master_pcm = sine(440.0, 1.0, 0.5);

    let first_sequence = {
        let engine = Engine::new(config).unwrap().with_feature_cache(dir.path());
        engine.load_master("cached-elk", Some(&master_pcm)).unwrap();
        // There's no direct accessor for the cached sequence from outside
        // the crate, so round-trip through a session's score against
        // itself, which is only reproducible if the same features load.
        let (snapshot, _) = score_against(&engine, "cached-elk", &master_pcm);
        snapshot
    };

    let second_sequence = {
        let engine = Engine::new(config).unwrap().with_feature_cache(dir.path());
        // No PCM supplied: this only succeeds if the cache resolves it.
        engine.load_master("cached-elk", None).unwrap();
        let (snapshot, _) = score_against(&engine, "cached-elk", &master_pcm);
        snapshot
    };

    assert_eq!(first_sequence.mfcc_component, second_sequence.mfcc_component);
    assert_eq!(first_sequence.dtw_distance, second_sequence.dtw_distance);
}

#[test]
fn overflow_is_recoverable_by_draining_then_retrying() {
    let config = EngineConfig::default();
    let capacity = config.frame_size * 2;
    let engine = Engine::new(config).unwrap();
    let session_id = engine.create_session();

    // First chunk: a full frame's worth, enough to transition to Running
    // and to leave exactly one pullable frame once drained.
    let seed_chunk = vec![0.01f32; config.frame_size];
    let appended_seed = engine
        .with_session(session_id, |s| s.append_pcm(&seed_chunk))
        .unwrap();
    assert_eq!(appended_seed, config.frame_size);

    // Attempting 10x the ring capacity in one call overflows: the ring
    // still only has `capacity - frame_size` samples of headroom.
    let oversized = vec![0.02f32; capacity * 10];
    let err = engine
        .with_session(session_id, |s| s.append_pcm(&oversized))
        .unwrap_err();
    assert!(matches!(err, EngineError::Overflow { .. }));

    // Draining frees the backlog (the seed chunk's one pullable frame).
    engine.with_session(session_id, |s| s.drain_and_score(0)).unwrap();

    // Retry the same payload in frame-sized pieces, draining after each:
    // post-drain backlog is always < frame_size, so appending up to one
    // more frame's worth never reaches the 2*frame_size capacity. Every
    // piece must now succeed, and total appended must equal what was
    // attempted.
    let mut total_appended = appended_seed;
    for retry_chunk in oversized.chunks(config.frame_size) {
        let n = engine
            .with_session(session_id, |s| s.append_pcm(retry_chunk))
            .unwrap();
        total_appended += n;
        engine.with_session(session_id, |s| s.drain_and_score(0)).unwrap();
    }

    assert_eq!(total_appended, appended_seed + oversized.len());
    engine.destroy_session(session_id);
}
