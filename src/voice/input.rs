//! Microphone pipeline
//!
//! Reads frames, feeds both keyword detectors and, while streaming is
//! gated on, forwards gain-adjusted frames for the hub. Muting releases the
//! microphone; unmuting opens it again through the factory.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::capture::{MicrophoneFactory, frame_to_bytes};
use super::detector::{DetectorProvider, KeywordDetector};
use crate::Result;
use crate::settings::MicrophoneSettings;

/// Output of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// Frame to stream, already gain-adjusted, little-endian PCM
    Audio { pcm: Vec<i16>, bytes: Vec<u8> },
    /// A wake word fired
    WakeDetected { phrase: String, id: String },
    /// A stop word fired
    StopDetected { phrase: String },
}

/// Shared switch deciding whether frames are forwarded
#[derive(Debug, Clone, Default)]
pub struct StreamingGate(Arc<AtomicBool>);

impl StreamingGate {
    pub fn set(&self, streaming: bool) {
        self.0.store(streaming, Ordering::Release);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The capture loop and its live configuration
pub struct AudioInput {
    wake_provider: Arc<dyn DetectorProvider>,
    stop_provider: Arc<dyn DetectorProvider>,
    settings: MicrophoneSettings,
    gate: StreamingGate,
}

/// Why one capture session ended
enum SessionEnd {
    Cancelled,
    Muted,
    Closed,
}

impl AudioInput {
    #[must_use]
    pub fn new(
        wake_provider: Arc<dyn DetectorProvider>,
        stop_provider: Arc<dyn DetectorProvider>,
        settings: MicrophoneSettings,
    ) -> Self {
        Self {
            wake_provider,
            stop_provider,
            settings,
            gate: StreamingGate::default(),
        }
    }

    /// Handle to the streaming switch
    #[must_use]
    pub fn gate(&self) -> StreamingGate {
        self.gate.clone()
    }

    /// Run until cancelled or until `events` is closed
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened or fails mid-read
    pub async fn run(
        &self,
        factory: &dyn MicrophoneFactory,
        events: mpsc::Sender<AudioEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut muted = self.settings.muted.subscribe();

        loop {
            if *muted.borrow_and_update() {
                tracing::debug!("microphone muted, capture released");
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    changed = muted.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                        continue;
                    }
                }
            }

            match self.capture(factory, &events, &cancel, &mut muted).await? {
                SessionEnd::Cancelled | SessionEnd::Closed => return Ok(()),
                SessionEnd::Muted => {}
            }
        }
    }

    /// One capture session; the microphone and detectors drop on return
    async fn capture(
        &self,
        factory: &dyn MicrophoneFactory,
        events: &mpsc::Sender<AudioEvent>,
        cancel: &CancellationToken,
        muted: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let mut wake_words = self.settings.wake_words.subscribe();
        let mut stop_words = self.settings.stop_words.subscribe();

        let mut wake_detector = self.wake_provider.create();
        wake_detector.set_active(&wake_words.borrow_and_update());
        let mut stop_detector = self.stop_provider.create();
        stop_detector.set_active(&stop_words.borrow_and_update());

        let mut microphone = factory.open()?;
        tracing::info!("audio capture started");

        loop {
            if wake_words.has_changed().unwrap_or(false) {
                wake_detector.set_active(&wake_words.borrow_and_update());
            }
            if stop_words.has_changed().unwrap_or(false) {
                stop_detector.set_active(&stop_words.borrow_and_update());
            }

            let frame = tokio::select! {
                () = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                changed = muted.changed() => {
                    if changed.is_err() || *muted.borrow() {
                        return Ok(SessionEnd::Muted);
                    }
                    continue;
                }
                frame = microphone.read() => frame?,
            };

            let delivered = self
                .process_frame(&frame, wake_detector.as_mut(), stop_detector.as_mut(), events)
                .await;
            if !delivered {
                return Ok(SessionEnd::Closed);
            }

            tokio::task::yield_now().await;
        }
    }

    /// Stream, then detect; returns false once the receiver is gone
    async fn process_frame(
        &self,
        frame: &[i16],
        wake: &mut dyn KeywordDetector,
        stop: &mut dyn KeywordDetector,
        events: &mpsc::Sender<AudioEvent>,
    ) -> bool {
        if self.gate.is_open() {
            let pcm = apply_gain(frame, self.settings.volume.get());
            let bytes = frame_to_bytes(&pcm);
            if events.send(AudioEvent::Audio { pcm, bytes }).await.is_err() {
                return false;
            }
        }

        for detection in wake.detect(frame) {
            tracing::info!(wake_word = %detection.phrase, "wake word detected");
            let event = AudioEvent::WakeDetected {
                phrase: detection.phrase,
                id: detection.id,
            };
            if events.send(event).await.is_err() {
                return false;
            }
        }

        if let Some(detection) = stop.detect(frame).into_iter().next() {
            tracing::info!(stop_word = %detection.phrase, "stop word detected");
            let event = AudioEvent::StopDetected {
                phrase: detection.phrase,
            };
            if events.send(event).await.is_err() {
                return false;
            }
        }

        true
    }
}

/// Scale samples by `volume` (0.0 to 2.0), saturating at the i16 range
#[must_use]
pub fn apply_gain(frame: &[i16], volume: f32) -> Vec<i16> {
    let volume = volume.clamp(0.0, 2.0);
    if (volume - 1.0).abs() < f32::EPSILON {
        return frame.to_vec();
    }
    frame
        .iter()
        .map(|&s| {
            #[allow(clippy::cast_possible_truncation)]
            let scaled = (f32::from(s) * volume).clamp(-32768.0, 32767.0) as i16;
            scaled
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_unity_is_copy() {
        assert_eq!(apply_gain(&[1, -1, 300], 1.0), vec![1, -1, 300]);
    }

    #[test]
    fn test_gain_saturates() {
        assert_eq!(apply_gain(&[20000, -20000, 100], 2.0), vec![32767, -32768, 200]);
        assert_eq!(apply_gain(&[100], 5.0), vec![200]);
        assert_eq!(apply_gain(&[100], 0.5), vec![50]);
    }

    #[test]
    fn test_gate_toggles() {
        let gate = StreamingGate::default();
        let other = gate.clone();
        assert!(!gate.is_open());
        other.set(true);
        assert!(gate.is_open());
    }
}
