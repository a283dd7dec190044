//! End-of-speech tracking over streamed frames
//!
//! Time is measured in audio, not wall clock: every frame advances the
//! tracker by its own duration.

use std::time::Duration;

use super::capture::SAMPLE_RATE;

/// Tracks speech followed by silence
#[derive(Debug, Clone)]
pub struct SilenceTracker {
    threshold: f32,
    silence_duration: Duration,
    min_speech: Duration,
    clock: Duration,
    speech_start: Duration,
    last_sound: Option<Duration>,
    speaking: bool,
}

impl SilenceTracker {
    /// `threshold` is the mean absolute amplitude, as a fraction of full scale,
    /// below which a frame counts as silent
    #[must_use]
    pub const fn new(threshold: f32, silence_duration: Duration, min_speech: Duration) -> Self {
        Self {
            threshold,
            silence_duration,
            min_speech,
            clock: Duration::ZERO,
            speech_start: Duration::ZERO,
            last_sound: None,
            speaking: false,
        }
    }

    pub fn reset(&mut self) {
        self.clock = Duration::ZERO;
        self.speech_start = Duration::ZERO;
        self.last_sound = None;
        self.speaking = false;
    }

    /// Whether any speech has been heard since the last reset
    #[must_use]
    pub const fn heard_speech(&self) -> bool {
        self.last_sound.is_some()
    }

    /// Feed one frame; returns true once when speech has ended
    pub fn process(&mut self, frame: &[i16]) -> bool {
        self.clock += frame_duration(frame.len());

        if is_silent(frame, self.threshold) {
            let Some(last_sound) = self.last_sound.filter(|_| self.speaking) else {
                return false;
            };
            if self.clock.saturating_sub(last_sound) >= self.silence_duration {
                self.speaking = false;
                // Too short to be an utterance
                return last_sound.saturating_sub(self.speech_start) >= self.min_speech;
            }
        } else {
            self.last_sound = Some(self.clock);
            if !self.speaking {
                self.speaking = true;
                self.speech_start = self.clock;
            }
        }

        false
    }
}

fn frame_duration(samples: usize) -> Duration {
    Duration::from_micros(samples as u64 * 1_000_000 / u64::from(SAMPLE_RATE))
}

/// Mean absolute amplitude below `threshold` of full scale
fn is_silent(frame: &[i16], threshold: f32) -> bool {
    if frame.is_empty() {
        return true;
    }
    let sum: u64 = frame.iter().map(|s| u64::from(s.unsigned_abs())).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum as f32 / frame.len() as f32;
    mean < threshold * 32768.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 512; // 32ms

    fn tracker() -> SilenceTracker {
        SilenceTracker::new(0.008, Duration::from_millis(1200), Duration::from_millis(500))
    }

    fn feed(tracker: &mut SilenceTracker, level: i16, frames: usize) -> bool {
        let frame = vec![level; FRAME];
        (0..frames).fold(false, |ended, _| tracker.process(&frame) || ended)
    }

    #[test]
    fn test_speech_then_silence_ends() {
        let mut t = tracker();
        assert!(!feed(&mut t, 5000, 25)); // 800ms speech
        assert!(t.heard_speech());
        assert!(!feed(&mut t, 0, 30)); // 960ms silence
        assert!(feed(&mut t, 0, 10));
    }

    #[test]
    fn test_short_blip_ignored() {
        let mut t = tracker();
        feed(&mut t, 5000, 5); // 160ms
        assert!(!feed(&mut t, 0, 60));
    }

    #[test]
    fn test_silence_alone_never_ends() {
        let mut t = tracker();
        assert!(!feed(&mut t, 10, 200));
        assert!(!t.heard_speech());
    }

    #[test]
    fn test_reset_clears_speech() {
        let mut t = tracker();
        feed(&mut t, 5000, 25);
        t.reset();
        assert!(!t.heard_speech());
        assert!(!feed(&mut t, 0, 60));
    }
}
