//! Player façade
//!
//! One master volume and mute flag drive three outputs: TTS, media and
//! feedback sounds. Media is ducked while the assistant speaks, ramping in
//! small steps so the change is not audible as a click.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::playback::{AudioOutput, OnFinished, PlaybackListener};
use super::tts::TtsPlayer;
use crate::settings::PlayerSettings;

/// Steps and delay of the duck ramp
const DUCK_STEPS: u32 = 10;
const DUCK_STEP_DELAY: Duration = Duration::from_millis(30);

/// Steps and delay of the unduck ramp
const UNDUCK_STEPS: u32 = 15;
const UNDUCK_STEP_DELAY: Duration = Duration::from_millis(40);

/// Default media volume factor while ducked
pub const DEFAULT_DUCK_MULTIPLIER: f32 = 0.5;

/// Playback surface used by the voice pipeline and the media player entity
pub struct VoiceSatellitePlayer {
    tts: TtsPlayer,
    media: Arc<dyn AudioOutput>,
    sounds: Arc<dyn AudioOutput>,
    settings: PlayerSettings,
    duck_multiplier: f32,
    ducked: Mutex<bool>,
    fade: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceSatellitePlayer {
    #[must_use]
    pub fn new(
        tts: Arc<dyn AudioOutput>,
        media: Arc<dyn AudioOutput>,
        sounds: Arc<dyn AudioOutput>,
        settings: PlayerSettings,
        duck_multiplier: f32,
    ) -> Self {
        let player = Self {
            tts: TtsPlayer::new(tts),
            media,
            sounds,
            settings,
            duck_multiplier: duck_multiplier.clamp(0.0, 1.0),
            ducked: Mutex::new(false),
            fade: Mutex::new(None),
        };
        player.apply_volume();
        player
    }

    /// TTS side of the player
    #[must_use]
    pub const fn tts(&self) -> &TtsPlayer {
        &self.tts
    }

    /// Master volume, 0.0 to 1.0
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.settings.volume.get()
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.settings.muted.get()
    }

    #[must_use]
    pub fn is_ducked(&self) -> bool {
        self.ducked.lock().map(|d| *d).unwrap_or(false)
    }

    /// Set the master volume on every output
    pub fn set_volume(&self, volume: f32) {
        self.settings.volume.set(volume.clamp(0.0, 1.0));
        self.apply_volume();
    }

    /// Mute or unmute every output; unmuting restores the master volume
    pub fn set_muted(&self, muted: bool) {
        self.settings.muted.set(muted);
        self.apply_volume();
    }

    fn effective_volume(&self) -> f32 {
        if self.is_muted() { 0.0 } else { self.volume() }
    }

    fn media_target(&self) -> f32 {
        let volume = self.effective_volume();
        if self.is_ducked() {
            volume * self.duck_multiplier
        } else {
            volume
        }
    }

    fn apply_volume(&self) {
        self.cancel_fade();
        let volume = self.effective_volume();
        self.tts.set_volume(volume);
        self.sounds.set_volume(volume);
        self.media.set_volume(self.media_target());
    }

    fn cancel_fade(&self) {
        if let Ok(mut fade) = self.fade.lock() {
            if let Some(handle) = fade.take() {
                handle.abort();
            }
        }
    }

    /// Lower media volume while the assistant is speaking
    pub fn duck(&self) {
        if let Ok(mut ducked) = self.ducked.lock() {
            *ducked = true;
        }
        self.ramp_media(DUCK_STEPS, DUCK_STEP_DELAY);
    }

    /// Restore media volume
    pub fn unduck(&self) {
        if let Ok(mut ducked) = self.ducked.lock() {
            *ducked = false;
        }
        self.ramp_media(UNDUCK_STEPS, UNDUCK_STEP_DELAY);
    }

    /// Ramp media from its current volume to the target; a newer ramp replaces this one
    fn ramp_media(&self, steps: u32, delay: Duration) {
        self.cancel_fade();

        let start = self.media.volume();
        let target = self.media_target();
        if (start - target).abs() < f32::EPSILON {
            return;
        }

        let media = Arc::clone(&self.media);
        let handle = tokio::spawn(async move {
            for step in 1..=steps {
                tokio::time::sleep(delay).await;
                #[allow(clippy::cast_precision_loss)]
                let fraction = step as f32 / steps as f32;
                media.set_volume((target - start).mul_add(fraction, start));
            }
        });

        if let Ok(mut fade) = self.fade.lock() {
            *fade = Some(handle);
        }
    }

    fn play_feedback(&self, enabled: bool, sound: &str, on_done: impl FnOnce() + Send + 'static) {
        if !enabled || sound.is_empty() {
            on_done();
            return;
        }
        self.sounds
            .play(vec![sound.to_string()], Some(OnFinished::new(on_done)));
    }

    /// Play the wake sound, or the alternate one, then run `on_done`
    pub fn play_wake_sound(&self, alternate: bool, on_done: impl FnOnce() + Send + 'static) {
        let sound = if alternate {
            self.settings.wake_sound_alt.get()
        } else {
            self.settings.wake_sound.get()
        };
        self.play_feedback(self.settings.enable_wake_sound.get(), &sound, on_done);
    }

    pub fn play_stop_sound(&self, on_done: impl FnOnce() + Send + 'static) {
        self.play_feedback(
            self.settings.enable_stop_sound.get(),
            &self.settings.stop_sound.get(),
            on_done,
        );
    }

    /// Prompt played before a follow-up turn of a continuous conversation
    pub fn play_continuous_prompt_sound(&self, on_done: impl FnOnce() + Send + 'static) {
        self.play_feedback(
            self.settings.enable_wake_sound.get(),
            &self.settings.continuous_prompt_sound.get(),
            on_done,
        );
    }

    pub fn play_timer_finished_sound(&self, on_done: impl FnOnce() + Send + 'static) {
        self.play_feedback(true, &self.settings.timer_finished_sound.get(), on_done);
    }

    /// Play an arbitrary sound on the feedback output
    pub fn play_sound(&self, url: &str) {
        self.play_feedback(true, url, || {});
    }

    /// Play media by URL, replacing whatever media is playing
    pub fn play_media(&self, url: &str, listener: Option<Arc<dyn PlaybackListener>>) {
        self.media.play(vec![url.to_string()], listener);
    }

    pub fn pause_media(&self) {
        self.media.pause();
    }

    pub fn resume_media(&self) {
        self.media.resume();
    }

    pub fn stop_media(&self) {
        self.media.stop();
    }

    #[must_use]
    pub fn is_media_playing(&self) -> bool {
        self.media.is_playing()
    }

    /// Stop every output
    pub fn stop_all(&self) {
        self.tts.stop();
        self.sounds.stop();
        self.media.stop();
    }
}

impl Drop for VoiceSatellitePlayer {
    fn drop(&mut self) {
        self.cancel_fade();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Config;
    use crate::settings::Settings;
    use crate::voice::testing::FakeOutput;

    struct Rig {
        player: VoiceSatellitePlayer,
        media: Arc<FakeOutput>,
        sounds: Arc<FakeOutput>,
        tts: Arc<FakeOutput>,
    }

    fn rig() -> Rig {
        let mut config = Config::default();
        config.player.wake_sound = "wake.wav".to_string();
        config.player.stop_sound = "stop.wav".to_string();
        let settings = Settings::from_config(&config);

        let (tts, media, sounds) = (FakeOutput::new(), FakeOutput::new(), FakeOutput::new());
        let player = VoiceSatellitePlayer::new(
            tts.clone(),
            media.clone(),
            sounds.clone(),
            settings.player.clone(),
            DEFAULT_DUCK_MULTIPLIER,
        );
        Rig {
            player,
            media,
            sounds,
            tts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duck_ramps_to_multiplier() {
        let rig = rig();
        rig.player.set_volume(0.8);
        rig.player.duck();

        tokio::time::sleep(DUCK_STEP_DELAY + DUCK_STEP_DELAY / 2).await;
        let first_step = rig.media.volume();
        assert!(first_step < 0.8 && first_step > 0.4);

        tokio::time::sleep(DUCK_STEP_DELAY * DUCK_STEPS).await;
        assert!((rig.media.volume() - 0.4).abs() < 1e-4);
        assert!((rig.tts.volume() - 0.8).abs() < 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unduck_cancels_duck_in_progress() {
        let rig = rig();
        rig.player.set_volume(1.0);
        rig.player.duck();
        tokio::time::sleep(DUCK_STEP_DELAY * 3).await;
        rig.player.unduck();

        tokio::time::sleep(UNDUCK_STEP_DELAY * (UNDUCK_STEPS + 1)).await;
        assert!((rig.media.volume() - 1.0).abs() < 1e-4);
        assert!(!rig.player.is_ducked());
    }

    #[tokio::test]
    async fn test_mute_and_restore() {
        let rig = rig();
        rig.player.set_volume(0.6);
        rig.player.set_muted(true);
        assert!(rig.media.volume().abs() < f32::EPSILON);
        assert!(rig.tts.volume().abs() < f32::EPSILON);

        rig.player.set_muted(false);
        assert!((rig.media.volume() - 0.6).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_disabled_sound_completes_immediately() {
        let rig = rig();
        rig.player.settings.enable_wake_sound.set(false);
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        rig.player.play_wake_sound(false, move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(rig.sounds.plays().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_sound_completes_after_playback() {
        let rig = rig();
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);
        rig.player.play_stop_sound(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(rig.sounds.plays(), vec![vec!["stop.wav".to_string()]]);
        assert_eq!(done.load(Ordering::SeqCst), 0);
        rig.sounds.finish();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
