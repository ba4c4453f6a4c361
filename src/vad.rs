//! Voice activity detector (C4): a three-state hysteresis gate over
//! per-frame energy/peak measurements.

use crate::config::VadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTag {
    Silent,
    ActiveBegin,
    Active,
    ActiveEnd,
}

impl VadTag {
    pub fn is_active(self) -> bool {
        matches!(self, VadTag::ActiveBegin | VadTag::Active | VadTag::ActiveEnd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silent,
    Candidate,
    Active,
}

pub struct VadState {
    phase: Phase,
    candidate_accum_ms: f32,
    silence_accum_ms: f32,
    hangover_remaining_ms: f32,
}

impl VadState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Silent,
            candidate_accum_ms: 0.0,
            silence_accum_ms: 0.0,
            hangover_remaining_ms: 0.0,
        }
    }

    fn is_sound(frame: &[f32], cfg: &VadConfig) -> bool {
        if frame.is_empty() {
            return false;
        }
        let mean_sq = frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32;
        let peak = frame.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        mean_sq > cfg.energy_threshold || peak > cfg.silence_peak_threshold
    }

    /// Processes one analysis frame, returning its activity tag.
    /// `frame_duration_ms` is the wall-clock span the frame advances the
    /// stream by (`hop_size / sample_rate_hz * 1000`).
    pub fn process(&mut self, frame: &[f32], cfg: &VadConfig, frame_duration_ms: f32) -> VadTag {
        let sound = Self::is_sound(frame, cfg);
        match self.phase {
            Phase::Silent => {
                if sound {
                    self.candidate_accum_ms = frame_duration_ms;
                    if self.candidate_accum_ms >= cfg.min_sound_ms {
                        self.enter_active();
                        VadTag::ActiveBegin
                    } else {
                        self.phase = Phase::Candidate;
                        VadTag::Silent
                    }
                } else {
                    VadTag::Silent
                }
            }
            Phase::Candidate => {
                if sound {
                    self.candidate_accum_ms += frame_duration_ms;
                    if self.candidate_accum_ms >= cfg.min_sound_ms {
                        self.enter_active();
                        VadTag::ActiveBegin
                    } else {
                        VadTag::Silent
                    }
                } else {
                    self.phase = Phase::Silent;
                    self.candidate_accum_ms = 0.0;
                    VadTag::Silent
                }
            }
            Phase::Active => {
                if sound {
                    self.hangover_remaining_ms = cfg.hangover_ms;
                    self.silence_accum_ms = 0.0;
                    VadTag::Active
                } else {
                    // Silence accumulates toward min_silence_ms from the
                    // first quiet frame, in parallel with the hangover
                    // grace rather than only once it lapses. ActiveEnd
                    // additionally requires the grace to have elapsed, so
                    // hangover_ms acts as a floor on how long a segment is
                    // kept tagged active after the last sound, not extra
                    // time tacked onto min_silence_ms.
                    self.hangover_remaining_ms = (self.hangover_remaining_ms - frame_duration_ms).max(0.0);
                    self.silence_accum_ms += frame_duration_ms;
                    if self.silence_accum_ms >= cfg.min_silence_ms && self.hangover_remaining_ms <= 0.0 {
                        self.phase = Phase::Silent;
                        self.candidate_accum_ms = 0.0;
                        self.silence_accum_ms = 0.0;
                        VadTag::ActiveEnd
                    } else {
                        VadTag::Active
                    }
                }
            }
        }
    }

    fn enter_active(&mut self) {
        self.phase = Phase::Active;
        self.candidate_accum_ms = 0.0;
        self.silence_accum_ms = 0.0;
        self.hangover_remaining_ms = 0.0;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for VadState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VadConfig {
        VadConfig {
            energy_threshold: 0.01,
            silence_peak_threshold: 0.1,
            window_ms: 10.0,
            min_sound_ms: 20.0,
            min_silence_ms: 30.0,
            hangover_ms: 10.0,
        }
    }

    #[test]
    fn stays_silent_below_threshold() {
        let mut vad = VadState::new();
        let frame = vec![0.001f32; 16];
        for _ in 0..5 {
            assert_eq!(vad.process(&frame, &cfg(), 10.0), VadTag::Silent);
        }
    }

    #[test]
    fn transitions_through_full_cycle() {
        let mut vad = VadState::new();
        let c = cfg();
        let loud = vec![1.0f32; 16];
        let quiet = vec![0.0f32; 16];

        // Candidate phase: below min_sound_ms (20ms) at 10ms/frame.
        assert_eq!(vad.process(&loud, &c, 10.0), VadTag::Silent);
        // Crosses min_sound_ms -> ActiveBegin.
        assert_eq!(vad.process(&loud, &c, 10.0), VadTag::ActiveBegin);
        // Stays active while loud.
        assert_eq!(vad.process(&loud, &c, 10.0), VadTag::Active);
        // Goes quiet: hangover (10ms) absorbs the first quiet frame.
        assert_eq!(vad.process(&quiet, &c, 10.0), VadTag::Active);
        // Past hangover, accumulating silence (< min_silence_ms=30ms).
        assert_eq!(vad.process(&quiet, &c, 10.0), VadTag::Active);
        // Crosses min_silence_ms -> ActiveEnd.
        assert_eq!(vad.process(&quiet, &c, 10.0), VadTag::ActiveEnd);
        // Back to silent.
        assert_eq!(vad.process(&quiet, &c, 10.0), VadTag::Silent);
    }

    #[test]
    fn sound_resuming_during_hangover_cancels_end() {
        let mut vad = VadState::new();
        let c = cfg();
        let loud = vec![1.0f32; 16];
        let quiet = vec![0.0f32; 16];
        vad.process(&loud, &c, 10.0);
        vad.process(&loud, &c, 10.0); // ActiveBegin
        vad.process(&quiet, &c, 10.0); // hangover
        assert_eq!(vad.process(&loud, &c, 10.0), VadTag::Active);
        // Hangover/silence counters reset, so it takes a full new cycle to end.
        assert_eq!(vad.process(&quiet, &c, 10.0), VadTag::Active);
        assert_eq!(vad.process(&quiet, &c, 10.0), VadTag::Active);
        assert_eq!(vad.process(&quiet, &c, 10.0), VadTag::ActiveEnd);
    }
}
