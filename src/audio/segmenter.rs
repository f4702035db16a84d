//! Per-speaker utterance segmentation
//!
//! Accumulates decoded PCM for each allow-listed speaker and finalizes one
//! utterance when a silence window elapses after speech ends. Quiet blips
//! and sub-minimum bursts are discarded. Also arms the barge-in timer when
//! a speaker starts talking over active playback.
//!
//! The segmenter is deliberately synchronous: callers feed it platform
//! events plus `Instant`s and poll fired deadlines, which keeps every
//! timing rule unit-testable without a runtime.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::{INPUT_SAMPLE_RATE, STT_SAMPLE_RATE};

/// Segmentation thresholds
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Silence after speaking-end that finalizes the utterance
    pub silence_window: Duration,
    /// Minimum utterance duration; shorter buffers are discarded
    pub min_utterance: Duration,
    /// Minimum RMS energy on the i16 scale; quieter buffers are discarded
    pub rms_floor: f64,
    /// Sustained speech over playback required to count as barge-in
    pub barge_in_delay: Duration,
    /// Downsample 48 kHz capture to 16 kHz before emitting
    pub downsample: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_window: Duration::from_millis(1000),
            min_utterance: Duration::from_millis(300),
            rms_floor: 500.0,
            barge_in_delay: Duration::from_millis(600),
            downsample: true,
        }
    }
}

/// A completed span of one speaker's speech
#[derive(Debug, Clone)]
pub struct Utterance {
    pub speaker: u64,
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
    pub captured_at: Instant,
    pub duration: Duration,
}

/// Output of a segmenter poll
#[derive(Debug)]
pub enum SegmenterOutput {
    /// A finalized utterance ready for transcription
    Utterance(Utterance),
    /// Sustained speech over playback: clear the player
    BargeIn { speaker: u64 },
}

/// Per-speaker accumulation state
#[derive(Debug)]
struct SpeakerState {
    pcm: Vec<i16>,
    speaking: bool,
    started_at: Instant,
    finalize_at: Option<Instant>,
    barge_in_at: Option<Instant>,
}

/// Turns per-speaker voice frames into silence-bounded utterances
pub struct AudioSegmenter {
    config: SegmenterConfig,
    allowed: HashSet<u64>,
    speakers: HashMap<u64, SpeakerState>,
}

impl AudioSegmenter {
    /// Create a segmenter for the given allow-list
    #[must_use]
    pub fn new(config: SegmenterConfig, allowed: impl IntoIterator<Item = u64>) -> Self {
        Self {
            config,
            allowed: allowed.into_iter().collect(),
            speakers: HashMap::new(),
        }
    }

    /// Handle a speaking-start signal
    ///
    /// `playback_active` arms the barge-in timer: if the speaker is still
    /// talking when it fires, [`Self::poll`] reports a barge-in.
    pub fn on_speaking_start(&mut self, speaker: u64, now: Instant, playback_active: bool) {
        if !self.allowed.contains(&speaker) {
            return;
        }

        let state = self.speakers.entry(speaker).or_insert_with(|| {
            tracing::debug!(speaker, "utterance capture opened");
            SpeakerState {
                pcm: Vec::new(),
                speaking: false,
                started_at: now,
                finalize_at: None,
                barge_in_at: None,
            }
        });

        // Resuming within the silence window continues the same span
        state.finalize_at = None;
        state.speaking = true;

        if playback_active && state.barge_in_at.is_none() {
            state.barge_in_at = Some(now + self.config.barge_in_delay);
            tracing::trace!(speaker, "barge-in timer armed");
        }
    }

    /// Handle a speaking-end signal
    pub fn on_speaking_end(&mut self, speaker: u64, now: Instant) {
        if let Some(state) = self.speakers.get_mut(&speaker) {
            state.speaking = false;
            state.finalize_at = Some(now + self.config.silence_window);
            // Short burst over playback: echo, not barge-in
            state.barge_in_at = None;
        }
    }

    /// Accumulate a decoded mono PCM frame for a speaker
    pub fn on_frame(&mut self, speaker: u64, pcm: &[i16]) {
        if let Some(state) = self.speakers.get_mut(&speaker) {
            if state.speaking {
                state.pcm.extend_from_slice(pcm);
            }
        }
    }

    /// Earliest pending deadline across all speakers, for the caller's
    /// sleep-until loop
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.speakers
            .values()
            .flat_map(|s| [s.finalize_at, s.barge_in_at])
            .flatten()
            .min()
    }

    /// Fire any deadlines at or before `now`
    pub fn poll(&mut self, now: Instant) -> Vec<SegmenterOutput> {
        let mut outputs = Vec::new();

        for (&speaker, state) in &mut self.speakers {
            if let Some(at) = state.barge_in_at {
                if at <= now {
                    state.barge_in_at = None;
                    if state.speaking {
                        tracing::info!(speaker, "barge-in: sustained speech over playback");
                        outputs.push(SegmenterOutput::BargeIn { speaker });
                    }
                }
            }
        }

        let due: Vec<u64> = self
            .speakers
            .iter()
            .filter(|(_, s)| s.finalize_at.is_some_and(|at| at <= now))
            .map(|(&id, _)| id)
            .collect();

        for speaker in due {
            let state = self.speakers.remove(&speaker).expect("due speaker present");
            if let Some(utterance) = self.finalize(speaker, state) {
                outputs.push(SegmenterOutput::Utterance(utterance));
            }
        }

        outputs
    }

    /// Drop all per-speaker state and pending timers (voice reconnect)
    pub fn reset(&mut self) {
        if !self.speakers.is_empty() {
            tracing::debug!(speakers = self.speakers.len(), "segmenter state cleared");
        }
        self.speakers.clear();
    }

    fn finalize(&self, speaker: u64, state: SpeakerState) -> Option<Utterance> {
        let duration = duration_of(state.pcm.len(), INPUT_SAMPLE_RATE);

        if duration < self.config.min_utterance {
            tracing::debug!(speaker, ?duration, "utterance too short, discarded");
            return None;
        }

        let energy = rms(&state.pcm);
        if energy < self.config.rms_floor {
            tracing::debug!(speaker, energy, "utterance below RMS floor, discarded");
            return None;
        }

        let (pcm, sample_rate) = if self.config.downsample {
            (downsample_3to1(&state.pcm), STT_SAMPLE_RATE)
        } else {
            (state.pcm, INPUT_SAMPLE_RATE)
        };

        tracing::info!(speaker, ?duration, samples = pcm.len(), "utterance finalized");
        Some(Utterance {
            speaker,
            pcm,
            sample_rate,
            captured_at: state.started_at,
            duration,
        })
    }
}

fn duration_of(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples as f64 / f64::from(sample_rate))
}

/// Root-mean-square energy on the i16 scale
fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// 48 kHz → 16 kHz by 3:1 block averaging
fn downsample_3to1(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks(3)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| i32::from(s)).sum();
            (sum / chunk.len() as i32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEAKER: u64 = 42;

    fn segmenter() -> AudioSegmenter {
        AudioSegmenter::new(SegmenterConfig::default(), [SPEAKER])
    }

    /// Loud square wave, `ms` milliseconds at 48 kHz
    fn speech(ms: u64) -> Vec<i16> {
        let samples = (INPUT_SAMPLE_RATE as u64 * ms / 1000) as usize;
        (0..samples)
            .map(|i| if (i / 48) % 2 == 0 { 8000 } else { -8000 })
            .collect()
    }

    fn capture(seg: &mut AudioSegmenter, now: Instant, pcm: &[i16], ms: u64) -> Vec<SegmenterOutput> {
        seg.on_speaking_start(SPEAKER, now, false);
        seg.on_frame(SPEAKER, pcm);
        seg.on_speaking_end(SPEAKER, now + Duration::from_millis(ms));
        seg.poll(now + Duration::from_millis(ms) + Duration::from_millis(1001))
    }

    #[test]
    fn long_loud_utterance_is_emitted() {
        let mut seg = segmenter();
        let outputs = capture(&mut seg, Instant::now(), &speech(500), 500);

        assert_eq!(outputs.len(), 1);
        let SegmenterOutput::Utterance(u) = &outputs[0] else {
            panic!("expected utterance");
        };
        assert_eq!(u.speaker, SPEAKER);
        assert_eq!(u.sample_rate, STT_SAMPLE_RATE);
        assert!(u.duration >= Duration::from_millis(499));
        // 3:1 downsample
        assert_eq!(u.pcm.len(), speech(500).len() / 3);
    }

    #[test]
    fn short_utterance_is_discarded() {
        let mut seg = segmenter();
        let outputs = capture(&mut seg, Instant::now(), &speech(100), 100);
        assert!(outputs.is_empty());
    }

    #[test]
    fn quiet_utterance_is_discarded() {
        let mut seg = segmenter();
        let quiet = vec![5i16; INPUT_SAMPLE_RATE as usize / 2];
        let outputs = capture(&mut seg, Instant::now(), &quiet, 500);
        assert!(outputs.is_empty());
    }

    #[test]
    fn unlisted_speaker_is_ignored() {
        let mut seg = segmenter();
        let now = Instant::now();
        seg.on_speaking_start(99, now, false);
        seg.on_frame(99, &speech(500));
        seg.on_speaking_end(99, now);

        assert!(seg.next_deadline().is_none());
        assert!(seg.poll(now + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn resume_within_silence_window_continues_the_span() {
        let mut seg = segmenter();
        let now = Instant::now();

        seg.on_speaking_start(SPEAKER, now, false);
        seg.on_frame(SPEAKER, &speech(300));
        seg.on_speaking_end(SPEAKER, now + Duration::from_millis(300));

        // Speaker resumes 400 ms into the 1000 ms silence window
        let resume = now + Duration::from_millis(700);
        assert!(seg.poll(resume).is_empty());
        seg.on_speaking_start(SPEAKER, resume, false);
        seg.on_frame(SPEAKER, &speech(300));
        seg.on_speaking_end(SPEAKER, resume + Duration::from_millis(300));

        let outputs = seg.poll(resume + Duration::from_millis(1301));
        assert_eq!(outputs.len(), 1);
        let SegmenterOutput::Utterance(u) = &outputs[0] else {
            panic!("expected utterance");
        };
        // Both bursts landed in one utterance
        assert_eq!(u.pcm.len(), speech(600).len() / 3);
    }

    #[test]
    fn sustained_speech_over_playback_fires_barge_in() {
        let mut seg = segmenter();
        let now = Instant::now();
        seg.on_speaking_start(SPEAKER, now, true);
        seg.on_frame(SPEAKER, &speech(700));

        let outputs = seg.poll(now + Duration::from_millis(601));
        assert!(matches!(
            outputs.as_slice(),
            [SegmenterOutput::BargeIn { speaker: SPEAKER }]
        ));

        // Fires once, not on every poll
        assert!(seg.poll(now + Duration::from_millis(700)).is_empty());
    }

    #[test]
    fn short_burst_over_playback_is_echo_not_barge_in() {
        let mut seg = segmenter();
        let now = Instant::now();
        seg.on_speaking_start(SPEAKER, now, true);
        seg.on_frame(SPEAKER, &speech(200));
        seg.on_speaking_end(SPEAKER, now + Duration::from_millis(200));

        let outputs = seg.poll(now + Duration::from_millis(601));
        assert!(!outputs
            .iter()
            .any(|o| matches!(o, SegmenterOutput::BargeIn { .. })));
    }

    #[test]
    fn no_barge_in_timer_without_playback() {
        let mut seg = segmenter();
        let now = Instant::now();
        seg.on_speaking_start(SPEAKER, now, false);
        seg.on_frame(SPEAKER, &speech(700));

        let outputs = seg.poll(now + Duration::from_millis(601));
        assert!(outputs.is_empty());
    }

    #[test]
    fn reset_clears_buffers_and_timers() {
        let mut seg = segmenter();
        let now = Instant::now();
        seg.on_speaking_start(SPEAKER, now, true);
        seg.on_frame(SPEAKER, &speech(500));
        seg.on_speaking_end(SPEAKER, now + Duration::from_millis(500));
        assert!(seg.next_deadline().is_some());

        seg.reset();
        assert!(seg.next_deadline().is_none());
        assert!(seg.poll(now + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn frames_between_spans_are_dropped() {
        let mut seg = segmenter();
        let now = Instant::now();
        seg.on_speaking_start(SPEAKER, now, false);
        seg.on_speaking_end(SPEAKER, now + Duration::from_millis(10));
        // Not speaking: frame must not accumulate
        seg.on_frame(SPEAKER, &speech(500));

        let outputs = seg.poll(now + Duration::from_millis(1011));
        assert!(outputs.is_empty());
    }

    #[test]
    fn rms_math() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[1000, -1000, 1000, -1000]) - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn downsample_averages_blocks() {
        assert_eq!(downsample_3to1(&[3, 6, 9, 30, 60, 90]), vec![6, 60]);
    }
}
