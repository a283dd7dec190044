//! Test doubles shared by the voice unit tests

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::playback::{AudioOutput, PlaybackListener};

/// Output that records plays and finishes only when told to
#[derive(Default)]
pub struct FakeOutput {
    plays: Mutex<Vec<Vec<String>>>,
    listener: Mutex<Option<Arc<dyn PlaybackListener>>>,
    volume: AtomicU32,
    playing: AtomicBool,
    pub stops: AtomicUsize,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        let output = Self::default();
        output.volume.store(1.0_f32.to_bits(), Ordering::SeqCst);
        Arc::new(output)
    }

    /// Complete the current playback as if the audio ran out
    pub fn finish(&self) {
        self.playing.store(false, Ordering::SeqCst);
        let listener = self.listener.lock().unwrap().take();
        if let Some(listener) = listener {
            listener.on_finished();
        }
    }

    pub fn plays(&self) -> Vec<Vec<String>> {
        self.plays.lock().unwrap().clone()
    }
}

impl AudioOutput for FakeOutput {
    fn play(&self, sources: Vec<String>, listener: Option<Arc<dyn PlaybackListener>>) {
        self.stop();
        self.plays.lock().unwrap().push(sources);
        self.playing.store(true, Ordering::SeqCst);
        if let Some(listener) = &listener {
            listener.on_duration(1000);
            listener.on_started();
        }
        *self.listener.lock().unwrap() = listener;
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.listener.lock().unwrap().take();
    }

    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::SeqCst);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::SeqCst))
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}
