//! TTS and announcement playback for one conversational turn

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::playback::{AudioOutput, OnFinished, PlaybackListener};

type Completion = Box<dyn FnOnce() + Send>;

/// Completion handler of the current turn, tagged with the turn it belongs to
#[derive(Default)]
struct CompletionSlot {
    generation: AtomicU64,
    handler: Mutex<Option<Completion>>,
}

impl CompletionSlot {
    fn install(&self, handler: Option<Completion>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Ok(mut slot) = self.handler.lock() {
            *slot = handler;
        }
        generation
    }

    fn fire(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(generation, "stale TTS completion ignored");
            return;
        }
        let handler = self.handler.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// Forwards playback events and fires the turn completion on finish
struct TtsListener {
    slot: Arc<CompletionSlot>,
    generation: u64,
    inner: Option<Arc<dyn PlaybackListener>>,
}

impl PlaybackListener for TtsListener {
    fn on_duration(&self, duration_ms: u64) {
        if let Some(inner) = &self.inner {
            inner.on_duration(duration_ms);
        }
    }

    fn on_started(&self) {
        if let Some(inner) = &self.inner {
            inner.on_started();
        }
    }

    fn on_progress(&self, position_ms: u64, duration_ms: u64) {
        if let Some(inner) = &self.inner {
            inner.on_progress(position_ms, duration_ms);
        }
    }

    fn on_finished(&self) {
        if let Some(inner) = &self.inner {
            inner.on_finished();
        }
        self.slot.fire(self.generation);
    }
}

/// Plays TTS responses and announcements on one output
pub struct TtsPlayer {
    output: Arc<dyn AudioOutput>,
    played: AtomicBool,
    completion: Arc<CompletionSlot>,
}

impl TtsPlayer {
    #[must_use]
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            played: AtomicBool::new(false),
            completion: Arc::new(CompletionSlot::default()),
        }
    }

    /// Begin a turn: clear the played flag and install its completion handler
    pub fn run_start(&self, on_completion: impl FnOnce() + Send + 'static) {
        self.played.store(false, Ordering::Release);
        self.completion.install(Some(Box::new(on_completion)));
    }

    /// End the turn early: drop its completion handler and stop playback
    pub fn run_stopped(&self) {
        self.completion.install(None);
        self.output.stop();
    }

    /// Whether TTS audio was started during this turn
    #[must_use]
    pub fn tts_played(&self) -> bool {
        self.played.load(Ordering::Acquire)
    }

    /// Record that this turn's TTS was handled without audio
    pub fn mark_played(&self) {
        self.played.store(true, Ordering::Release);
    }

    /// Play the turn's TTS audio; the completion fires when it ends
    pub fn play_tts(&self, url: &str, listener: Option<Arc<dyn PlaybackListener>>) {
        self.played.store(true, Ordering::Release);
        let generation = self.completion.generation.load(Ordering::Acquire);
        tracing::debug!(url, "playing TTS");
        self.output.play(
            vec![url.to_string()],
            Some(Arc::new(TtsListener {
                slot: Arc::clone(&self.completion),
                generation,
                inner: listener,
            })),
        );
    }

    /// Fire the turn completion without playing anything
    pub fn trigger_completion(&self) {
        let generation = self.completion.generation.load(Ordering::Acquire);
        self.completion.fire(generation);
    }

    /// Play an announcement, preceded by its chime when one is given
    pub fn play_announcement(
        &self,
        preannounce: Option<&str>,
        media: &str,
        on_done: impl FnOnce() + Send + 'static,
    ) {
        let sources = preannounce
            .filter(|p| !p.is_empty())
            .into_iter()
            .chain(std::iter::once(media))
            .map(str::to_string)
            .collect();
        self.output.play(sources, Some(OnFinished::new(on_done)));
    }

    pub fn stop(&self) {
        self.output.stop();
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.output.is_playing()
    }

    pub fn set_volume(&self, volume: f32) {
        self.output.set_volume(volume);
    }
}
