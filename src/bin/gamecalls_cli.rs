//! Demo CLI: scores a user WAV recording against a master WAV call.
//!
//! Not part of the scored core (SPEC_FULL.md §10) — exists to exercise
//! the facade end-to-end from a native entry point.

use std::path::Path;

use anyhow::{bail, Context, Result};
use gamecalls_engine::{Engine, EngineConfig};

fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = if channels <= 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (master_path, user_path) = match (args.next(), args.next()) {
        (Some(m), Some(u)) => (m, u),
        _ => bail!("usage: gamecalls-cli <master.wav> <user.wav>"),
    };

    let (master_pcm, master_rate) = read_wav_mono_f32(Path::new(&master_path))?;
    let (user_pcm, user_rate) = read_wav_mono_f32(Path::new(&user_path))?;
    if master_rate != user_rate {
        bail!("sample rate mismatch: master {master_rate} Hz vs user {user_rate} Hz (resampling is the caller's responsibility)");
    }

    let config = EngineConfig {
        sample_rate_hz: master_rate as f32,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config).map_err(|e| anyhow::anyhow!(e))?;

    engine
        .load_master("cli-master", Some(&master_pcm))
        .map_err(|e| anyhow::anyhow!(e))?;

    let session_id = engine.create_session();
    engine
        .attach_master(session_id, "cli-master")
        .map_err(|e| anyhow::anyhow!(e))?;

    // The ring's capacity is `2 * frame_size` (C1); appending more than
    // `frame_size` per call without draining in between would overflow it
    // as soon as any backlog remains from a prior frame pull.
    let chunk_size = config.frame_size;
    let mut timestamp_ms = 0u64;
    for chunk in user_pcm.chunks(chunk_size) {
        engine
            .with_session(session_id, |session| session.append_pcm(chunk))
            .map_err(|e| anyhow::anyhow!(e))?;

        let snapshot = engine
            .with_session(session_id, |session| session.drain_and_score(timestamp_ms))
            .map_err(|e| anyhow::anyhow!(e))?;

        println!(
            "t={timestamp_ms:>7}ms  overall={:.3}  mfcc={:.3}  level={:.3}  timing={:.3}  confidence={:.3}  reliable={}",
            snapshot.overall, snapshot.mfcc_component, snapshot.level_component, snapshot.timing_component,
            snapshot.confidence, snapshot.reliable,
        );

        timestamp_ms += (chunk_size as f32 / master_rate as f32 * 1000.0) as u64;
    }

    let profile = engine
        .with_session(session_id, |session| session.finalize(timestamp_ms, None))
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("\nfinal score: {:?}", profile.final_score.map(|s| s.overall));
    println!(
        "pitch: mean={:.1}Hz std={:.1}Hz voiced={:.0}%",
        profile.pitch.mean_hz,
        profile.pitch.std_hz,
        profile.pitch.voiced_fraction * 100.0
    );
    println!(
        "cadence: tempo={:.1}bpm beats={} complexity={:.2}",
        profile.cadence.tempo_bpm,
        profile.cadence.beat_times.len(),
        profile.cadence.rhythm_complexity
    );

    engine.destroy_session(session_id);
    Ok(())
}
