//! Realtime similarity scorer (C7).
//!
//! Converts DTW distance plus level/timing/pitch comparisons into a
//! bounded `[0, 1]` similarity score. Recomputes DTW only when new active
//! frames have arrived since the last update; otherwise the cached
//! snapshot is returned with a refreshed `timestamp_ms`.

use std::collections::VecDeque;

use crate::config::DtwConfig;
use crate::dtw;
use crate::master::MasterCall;

/// Tuned so identical master-vs-master input (`d_norm = 0`) scores 1.0
/// and typical uncorrelated-noise `d_norm` scores at or below 0.1
/// (SPEC_FULL.md, Open Question: exact reference weighting was not
/// specified and should be validated empirically before production use).
const ALPHA: f32 = 0.08;

const WEIGHT_MFCC: f32 = 0.6;
const WEIGHT_LEVEL: f32 = 0.15;
const WEIGHT_TIMING: f32 = 0.15;
const WEIGHT_PITCH: f32 = 0.10;

const MIN_PITCH_DENOM_HZ: f32 = 50.0;
const RELIABLE_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct ScoreSnapshot {
    pub overall: f32,
    pub confidence: f32,
    pub mfcc_component: f32,
    pub level_component: f32,
    pub timing_component: f32,
    /// `NaN` when unavailable (no voiced pitch on one or both sides).
    pub pitch_component: f32,
    pub samples_analyzed: usize,
    pub dtw_distance: f32,
    pub timestamp_ms: u64,
    pub reliable: bool,
}

impl ScoreSnapshot {
    /// The all-zero, not-yet-reliable snapshot for a session with no
    /// scored samples yet (SPEC_FULL.md §3 invariant 6).
    pub fn empty(timestamp_ms: u64) -> Self {
        Self {
            overall: 0.0,
            confidence: 0.0,
            mfcc_component: 0.0,
            level_component: 0.0,
            timing_component: 0.0,
            pitch_component: f32::NAN,
            samples_analyzed: 0,
            dtw_distance: f32::INFINITY,
            timestamp_ms,
            reliable: false,
        }
    }
}

/// Inputs the facade/session gathers each `drain_and_score` call. Kept as
/// a plain struct (not threaded through individual arguments) so the
/// scorer's signature doesn't grow with every new component it reads.
pub struct ScorerInput<'a> {
    pub master: &'a MasterCall,
    pub user_mfcc: &'a [Vec<f32>],
    pub dtw_cfg: &'a DtwConfig,
    pub user_duration_s: f32,
    pub user_mean_pitch_hz: Option<f32>,
    pub frame_size: usize,
    pub timestamp_ms: u64,
}

pub struct RealtimeScorer {
    last_snapshot: Option<ScoreSnapshot>,
    last_scored_frame_count: usize,
    trailing_rms: VecDeque<f32>,
    trailing_capacity: usize,
}

impl RealtimeScorer {
    pub fn new(sample_rate_hz: f32, hop_size: usize) -> Self {
        let trailing_capacity = if hop_size > 0 {
            ((sample_rate_hz / hop_size as f32).ceil() as usize).max(1)
        } else {
            1
        };
        Self {
            last_snapshot: None,
            last_scored_frame_count: 0,
            trailing_rms: VecDeque::with_capacity(trailing_capacity),
            trailing_capacity,
        }
    }

    /// Feeds one active frame's RMS into the trailing 1-second window
    /// the level component reads. Only active frames should be observed
    /// here, mirroring which frames feed `user_features` (§4.4).
    pub fn observe_active_frame(&mut self, frame: &[f32]) {
        let rms = if frame.is_empty() {
            0.0
        } else {
            (frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
        };
        if self.trailing_rms.len() == self.trailing_capacity {
            self.trailing_rms.pop_front();
        }
        self.trailing_rms.push_back(rms);
    }

    fn trailing_user_rms(&self) -> f32 {
        if self.trailing_rms.is_empty() {
            return 0.0;
        }
        self.trailing_rms.iter().sum::<f32>() / self.trailing_rms.len() as f32
    }

    /// Recomputes the score if the user feature sequence grew since the
    /// last call, otherwise returns the cached snapshot with a refreshed
    /// timestamp. `samples_analyzed` is `user_mfcc.len() * hop_size`,
    /// the caller's responsibility to compute and carry on the session.
    pub fn update(&mut self, input: ScorerInput<'_>, samples_analyzed: usize) -> ScoreSnapshot {
        if input.user_mfcc.len() == self.last_scored_frame_count {
            if let Some(mut cached) = self.last_snapshot {
                cached.timestamp_ms = input.timestamp_ms;
                self.last_snapshot = Some(cached);
                return cached;
            }
        }
        self.last_scored_frame_count = input.user_mfcc.len();

        if input.user_mfcc.is_empty() {
            let snapshot = ScoreSnapshot::empty(input.timestamp_ms);
            self.last_snapshot = Some(snapshot);
            return snapshot;
        }

        let (raw_distance, path) =
            dtw::distance_aligned(&input.master.mfcc_sequence, input.user_mfcc, input.dtw_cfg);
        let d_norm = raw_distance / path.len().max(1) as f32;
        let mfcc_component = (-ALPHA * d_norm).exp().clamp(0.0, 1.0);

        let level_component = if input.master.rms > 0.0 {
            (self.trailing_user_rms() / input.master.rms).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let timing_component = if input.master.duration_s > 0.0 {
            (1.0 - ((input.user_duration_s - input.master.duration_s).abs() / input.master.duration_s)
                .clamp(0.0, 1.0))
            .clamp(0.0, 1.0)
        } else {
            0.0
        };

        let pitch_component = match (input.user_mean_pitch_hz, input.master.mean_pitch_hz) {
            (Some(user_hz), Some(master_hz)) if user_hz > 0.0 && master_hz > 0.0 => {
                (1.0 - (user_hz - master_hz).abs() / master_hz.max(MIN_PITCH_DENOM_HZ)).clamp(0.0, 1.0)
            }
            _ => f32::NAN,
        };

        let overall = if pitch_component.is_nan() {
            let renorm = WEIGHT_MFCC + WEIGHT_LEVEL + WEIGHT_TIMING;
            (WEIGHT_MFCC * mfcc_component + WEIGHT_LEVEL * level_component + WEIGHT_TIMING * timing_component)
                / renorm
        } else {
            WEIGHT_MFCC * mfcc_component
                + WEIGHT_LEVEL * level_component
                + WEIGHT_TIMING * timing_component
                + WEIGHT_PITCH * pitch_component
        };

        let ramp = (samples_analyzed as f32 / (0.5 * input.master.sample_rate_hz)).clamp(0.0, 1.0);
        let confidence = (ramp * mfcc_component.max(0.0).sqrt()).clamp(0.0, 1.0);
        let reliable = confidence >= RELIABLE_CONFIDENCE && samples_analyzed >= input.frame_size * 4;

        let snapshot = ScoreSnapshot {
            overall: overall.clamp(0.0, 1.0),
            confidence,
            mfcc_component,
            level_component,
            timing_component,
            pitch_component,
            samples_analyzed,
            dtw_distance: d_norm,
            timestamp_ms: input.timestamp_ms,
            reliable,
        };
        self.last_snapshot = Some(snapshot);
        snapshot
    }

    pub fn reset(&mut self) {
        self.last_snapshot = None;
        self.last_scored_frame_count = 0;
        self.trailing_rms.clear();
    }
}
