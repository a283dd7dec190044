//! Configuration management for the voice satellite
//!
//! Layers, lowest priority first: built-in defaults, the TOML config file,
//! environment variables, then CLI flags (applied by `main`).

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::Result;
use file::SatelliteConfigFile;

/// Default native API port
pub const DEFAULT_PORT: u16 = 6053;

/// Default UDP port for wake arbitration
pub const DEFAULT_ARBITER_PORT: u16 = 19847;

/// Voice satellite configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Device identity and server settings
    pub device: DeviceConfig,

    /// Wake words and pipeline timing
    pub voice: VoiceConfig,

    /// Playback volume and sounds
    pub player: PlayerConfig,

    /// Multi-device wake arbitration
    pub arbiter: ArbiterConfig,

    /// Advertise over mDNS
    pub mdns: bool,

    /// Expose a camera entity
    pub camera_enabled: bool,

    /// Diagnostic sensor poll interval
    pub diagnostics_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            voice: VoiceConfig::default(),
            player: PlayerConfig::default(),
            arbiter: ArbiterConfig::default(),
            mdns: true,
            camera_enabled: false,
            diagnostics_interval: Duration::from_secs(60),
        }
    }
}

/// Device identity and server settings
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Node name (used as mDNS instance and `DeviceInfo` name)
    pub name: String,
    /// Human-readable name shown by the hub
    pub friendly_name: String,
    /// MAC address reported to the hub
    pub mac_address: String,
    /// TCP port for the native API
    pub port: u16,
    pub manufacturer: String,
    pub model: String,
    pub suggested_area: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let host = hostname::get().map_or_else(
            |_| "satellite".to_string(),
            |h| h.to_string_lossy().to_string(),
        );
        Self {
            name: sanitize_node_name(&host),
            friendly_name: host,
            mac_address: "00:00:00:00:00:00".to_string(),
            port: DEFAULT_PORT,
            manufacturer: "Omni".to_string(),
            model: "Voice Satellite".to_string(),
            suggested_area: String::new(),
        }
    }
}

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable microphone capture
    pub enabled: bool,
    /// Wake word ids to activate
    pub wake_words: Vec<String>,
    /// Stop word ids to activate
    pub stop_words: Vec<String>,
    /// Gain applied to audio streamed to the hub
    pub microphone_volume: f32,
    /// Abort a turn if no speech is heard this long after it starts
    pub wake_timeout: Duration,
    /// Silence after speech that counts as end of utterance
    pub silence_duration: Duration,
    /// Minimum speech before silence is considered
    pub min_speech_duration: Duration,
    /// Average sample magnitude (fraction of full scale) treated as silence
    pub silence_threshold: f32,
    /// Upper bound on waiting for TTS playback after `RUN_END`
    pub tts_completion_timeout: Duration,
    /// Keep listening after a response unless the user says goodbye
    pub continuous_conversation: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_words: vec!["okay_nabu".to_string()],
            stop_words: vec!["stop".to_string()],
            microphone_volume: 1.0,
            wake_timeout: Duration::from_secs(8),
            silence_duration: Duration::from_millis(1200),
            min_speech_duration: Duration::from_millis(500),
            silence_threshold: 0.008,
            tts_completion_timeout: Duration::from_secs(30),
            continuous_conversation: false,
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Master volume, 0.0 to 1.0
    pub volume: f32,
    /// Media volume multiplier while TTS is speaking
    pub duck_multiplier: f32,
    pub enable_wake_sound: bool,
    pub wake_sound: String,
    pub wake_sound_alt: String,
    pub enable_stop_sound: bool,
    pub stop_sound: String,
    pub continuous_prompt_sound: String,
    pub timer_finished_sound: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            duck_multiplier: 0.5,
            enable_wake_sound: true,
            wake_sound: "sounds/wake_word_triggered.wav".to_string(),
            wake_sound_alt: "sounds/wake_word_triggered_2.wav".to_string(),
            enable_stop_sound: true,
            stop_sound: "sounds/stop.wav".to_string(),
            continuous_prompt_sound: "sounds/continue.wav".to_string(),
            timer_finished_sound: "sounds/timer_finished.wav".to_string(),
        }
    }
}

/// Wake arbitration configuration
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub enabled: bool,
    pub port: u16,
    /// How long to collect competing claims
    pub window: Duration,
    /// Maximum timestamp difference for a claim to count
    pub max_skew_ms: i64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_ARBITER_PORT,
            window: Duration::from_millis(80),
            max_skew_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from defaults, config file and environment
    ///
    /// `config_path` overrides the platform config file location.
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given config file cannot be read or parsed
    pub fn load_with_options(config_path: Option<&Path>) -> Result<Self> {
        let file = match config_path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env(|key| std::env::var(key).ok());

        tracing::debug!(
            name = %config.device.name,
            port = config.device.port,
            wake_words = ?config.voice.wake_words,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Overlay values present in the config file
    pub fn apply_file(&mut self, file: SatelliteConfigFile) {
        let SatelliteConfigFile {
            device,
            voice,
            player,
            arbiter,
            discovery,
            camera,
            diagnostics,
        } = file;

        if let Some(name) = device.name {
            self.device.name = sanitize_node_name(&name);
            if device.friendly_name.is_none() {
                self.device.friendly_name = name;
            }
        }
        if let Some(v) = device.friendly_name {
            self.device.friendly_name = v;
        }
        if let Some(v) = device.mac_address {
            self.device.mac_address = v;
        }
        if let Some(v) = device.port {
            self.device.port = v;
        }
        if let Some(v) = device.manufacturer {
            self.device.manufacturer = v;
        }
        if let Some(v) = device.model {
            self.device.model = v;
        }
        if let Some(v) = device.suggested_area {
            self.device.suggested_area = v;
        }

        if let Some(v) = voice.enabled {
            self.voice.enabled = v;
        }
        if let Some(v) = voice.wake_words {
            self.voice.wake_words = v;
        }
        if let Some(v) = voice.stop_words {
            self.voice.stop_words = v;
        }
        if let Some(v) = voice.microphone_volume {
            self.voice.microphone_volume = v;
        }
        if let Some(v) = voice.wake_timeout_secs {
            self.voice.wake_timeout = Duration::from_secs(v);
        }
        if let Some(v) = voice.silence_duration_ms {
            self.voice.silence_duration = Duration::from_millis(v);
        }
        if let Some(v) = voice.min_speech_duration_ms {
            self.voice.min_speech_duration = Duration::from_millis(v);
        }
        if let Some(v) = voice.silence_threshold {
            self.voice.silence_threshold = v;
        }
        if let Some(v) = voice.tts_completion_timeout_secs {
            self.voice.tts_completion_timeout = Duration::from_secs(v);
        }
        if let Some(v) = voice.continuous_conversation {
            self.voice.continuous_conversation = v;
        }

        if let Some(v) = player.volume {
            self.player.volume = v;
        }
        if let Some(v) = player.duck_multiplier {
            self.player.duck_multiplier = v;
        }
        if let Some(v) = player.enable_wake_sound {
            self.player.enable_wake_sound = v;
        }
        if let Some(v) = player.wake_sound {
            self.player.wake_sound = v;
        }
        if let Some(v) = player.wake_sound_alt {
            self.player.wake_sound_alt = v;
        }
        if let Some(v) = player.enable_stop_sound {
            self.player.enable_stop_sound = v;
        }
        if let Some(v) = player.stop_sound {
            self.player.stop_sound = v;
        }
        if let Some(v) = player.continuous_prompt_sound {
            self.player.continuous_prompt_sound = v;
        }
        if let Some(v) = player.timer_finished_sound {
            self.player.timer_finished_sound = v;
        }

        if let Some(v) = arbiter.enabled {
            self.arbiter.enabled = v;
        }
        if let Some(v) = arbiter.port {
            self.arbiter.port = v;
        }
        if let Some(v) = arbiter.window_ms {
            self.arbiter.window = Duration::from_millis(v);
        }
        if let Some(v) = arbiter.max_skew_ms {
            self.arbiter.max_skew_ms = v;
        }

        if let Some(v) = discovery.mdns {
            self.mdns = v;
        }
        if let Some(v) = camera.enabled {
            self.camera_enabled = v;
        }
        if let Some(v) = diagnostics.interval_secs {
            self.diagnostics_interval = Duration::from_secs(v.max(1));
        }
    }

    /// Overlay environment variables read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("SATELLITE_NAME") {
            self.device.name = sanitize_node_name(&name);
            self.device.friendly_name = name;
        }
        if let Some(port) = lookup("SATELLITE_PORT").and_then(|p| p.parse().ok()) {
            self.device.port = port;
        }
        if let Some(mac) = lookup("SATELLITE_MAC") {
            self.device.mac_address = mac;
        }
        if let Some(words) = lookup("SATELLITE_WAKE_WORDS") {
            self.voice.wake_words = words
                .split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect();
        }
    }
}

/// Lower-case a name and replace anything outside `[a-z0-9-]` with `-`
#[must_use]
pub fn sanitize_node_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.device.port, DEFAULT_PORT);
        assert_eq!(config.arbiter.port, DEFAULT_ARBITER_PORT);
        assert_eq!(config.arbiter.window, Duration::from_millis(80));
        assert!((config.player.duck_multiplier - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_file_overlay() {
        let file: SatelliteConfigFile = toml::from_str(
            r#"
            [device]
            name = "Kitchen Speaker"
            port = 6100

            [voice]
            wake_words = ["hey_jarvis"]
            tts_completion_timeout_secs = 5

            [arbiter]
            enabled = true
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(file);

        assert_eq!(config.device.name, "kitchen-speaker");
        assert_eq!(config.device.friendly_name, "Kitchen Speaker");
        assert_eq!(config.device.port, 6100);
        assert_eq!(config.voice.wake_words, vec!["hey_jarvis"]);
        assert_eq!(config.voice.tts_completion_timeout, Duration::from_secs(5));
        assert!(config.arbiter.enabled);
        // Untouched sections keep defaults
        assert_eq!(config.voice.stop_words, vec!["stop"]);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.device.port = 6100;
        config.apply_env(|key| match key {
            "SATELLITE_PORT" => Some("7000".to_string()),
            "SATELLITE_WAKE_WORDS" => Some("okay_nabu, hey_mycroft,".to_string()),
            _ => None,
        });
        assert_eq!(config.device.port, 7000);
        assert_eq!(config.voice.wake_words, vec!["okay_nabu", "hey_mycroft"]);
    }

    #[test]
    fn test_sanitize_node_name() {
        assert_eq!(sanitize_node_name(" Living Room_1 "), "living-room-1");
    }
}
