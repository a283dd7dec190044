//! Observable settings consumed by the satellite core
//!
//! Each setting is an in-memory cell with change notification. Storage is
//! someone else's problem: the cells are seeded from [`Config`] at startup
//! and mutated by entities or the CLI at runtime.

use std::sync::Arc;

use tokio::sync::watch;

use crate::Config;

/// A single observable setting
#[derive(Debug)]
pub struct SettingState<T> {
    tx: watch::Sender<T>,
}

impl<T> Clone for SettingState<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> SettingState<T> {
    /// Create a setting with an initial value
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value, notifying subscribers only if it changed
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Watch the setting; the receiver starts at the current value
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// Microphone and wake-word settings
#[derive(Debug, Clone)]
pub struct MicrophoneSettings {
    /// Active wake word ids
    pub wake_words: SettingState<Vec<String>>,
    /// Active stop word ids
    pub stop_words: SettingState<Vec<String>>,
    /// Microphone muted (capture released)
    pub muted: SettingState<bool>,
    /// Gain applied to streamed audio, 0.0 to 2.0
    pub volume: SettingState<f32>,
}

/// Player volume and sound preferences
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub volume: SettingState<f32>,
    pub muted: SettingState<bool>,
    pub enable_wake_sound: SettingState<bool>,
    pub wake_sound: SettingState<String>,
    pub wake_sound_alt: SettingState<String>,
    pub enable_stop_sound: SettingState<bool>,
    pub stop_sound: SettingState<String>,
    pub enable_continuous_conversation: SettingState<bool>,
    pub continuous_prompt_sound: SettingState<String>,
    pub timer_finished_sound: SettingState<String>,
}

/// Display-side preferences exposed as entities
#[derive(Debug, Clone)]
pub struct DisplaySettings {
    /// Dashboard URL shown by the device UI
    pub dashboard_url: SettingState<String>,
}

/// Camera capability
#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Expose the camera entity to the hub
    pub enabled: SettingState<bool>,
}

/// All settings groups, shared by handle
#[derive(Debug, Clone)]
pub struct Settings {
    pub microphone: MicrophoneSettings,
    pub player: PlayerSettings,
    pub display: DisplaySettings,
    pub camera: CameraSettings,
}

impl Settings {
    /// Seed settings from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Arc<Self> {
        let voice = &config.voice;
        let player = &config.player;

        Arc::new(Self {
            microphone: MicrophoneSettings {
                wake_words: SettingState::new(voice.wake_words.clone()),
                stop_words: SettingState::new(voice.stop_words.clone()),
                muted: SettingState::new(false),
                volume: SettingState::new(voice.microphone_volume.clamp(0.0, 2.0)),
            },
            player: PlayerSettings {
                volume: SettingState::new(player.volume.clamp(0.0, 1.0)),
                muted: SettingState::new(false),
                enable_wake_sound: SettingState::new(player.enable_wake_sound),
                wake_sound: SettingState::new(player.wake_sound.clone()),
                wake_sound_alt: SettingState::new(player.wake_sound_alt.clone()),
                enable_stop_sound: SettingState::new(player.enable_stop_sound),
                stop_sound: SettingState::new(player.stop_sound.clone()),
                enable_continuous_conversation: SettingState::new(
                    voice.continuous_conversation,
                ),
                continuous_prompt_sound: SettingState::new(player.continuous_prompt_sound.clone()),
                timer_finished_sound: SettingState::new(player.timer_finished_sound.clone()),
            },
            display: DisplaySettings {
                dashboard_url: SettingState::new(String::new()),
            },
            camera: CameraSettings {
                enabled: SettingState::new(config.camera_enabled),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_notifies_once_per_change() {
        let setting = SettingState::new(1);
        let mut rx = setting.subscribe();
        rx.borrow_and_update();

        assert!(setting.set(2));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!setting.set(2));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(setting.get(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let a = SettingState::new(String::from("x"));
        let b = a.clone();
        b.set("y".to_string());
        assert_eq!(a.get(), "y");
    }

    #[test]
    fn test_from_config_clamps_microphone_volume() {
        let mut config = Config::default();
        config.voice.microphone_volume = 5.0;
        let settings = Settings::from_config(&config);
        assert!((settings.microphone.volume.get() - 2.0).abs() < f32::EPSILON);
    }
}
