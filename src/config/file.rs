//! TOML configuration file loading
//!
//! Supports `~/.config/omni/satellite/satellite.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SatelliteConfigFile {
    /// Device identity
    #[serde(default)]
    pub device: DeviceFileConfig,

    /// Voice pipeline
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Playback and sounds
    #[serde(default)]
    pub player: PlayerFileConfig,

    /// Multi-device wake arbitration
    #[serde(default)]
    pub arbiter: ArbiterFileConfig,

    /// Service discovery
    #[serde(default)]
    pub discovery: DiscoveryFileConfig,

    /// Camera entity
    #[serde(default)]
    pub camera: CameraFileConfig,

    /// Diagnostic sensors
    #[serde(default)]
    pub diagnostics: DiagnosticsFileConfig,
}

/// Device identity configuration
#[derive(Debug, Default, Deserialize)]
pub struct DeviceFileConfig {
    /// Node name (e.g. "kitchen-satellite")
    pub name: Option<String>,
    pub friendly_name: Option<String>,
    pub mac_address: Option<String>,
    /// Native API port (default 6053)
    pub port: Option<u16>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub suggested_area: Option<String>,
}

/// Voice pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable microphone capture
    pub enabled: Option<bool>,
    /// Wake word ids (e.g. `["okay_nabu"]`)
    pub wake_words: Option<Vec<String>>,
    /// Stop word ids
    pub stop_words: Option<Vec<String>>,
    pub microphone_volume: Option<f32>,
    pub wake_timeout_secs: Option<u64>,
    pub silence_duration_ms: Option<u64>,
    pub min_speech_duration_ms: Option<u64>,
    pub silence_threshold: Option<f32>,
    pub tts_completion_timeout_secs: Option<u64>,
    pub continuous_conversation: Option<bool>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlayerFileConfig {
    pub volume: Option<f32>,
    pub duck_multiplier: Option<f32>,
    pub enable_wake_sound: Option<bool>,
    /// URL or local path
    pub wake_sound: Option<String>,
    pub wake_sound_alt: Option<String>,
    pub enable_stop_sound: Option<bool>,
    pub stop_sound: Option<String>,
    pub continuous_prompt_sound: Option<String>,
    pub timer_finished_sound: Option<String>,
}

/// Wake arbitration configuration
#[derive(Debug, Default, Deserialize)]
pub struct ArbiterFileConfig {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
    pub window_ms: Option<u64>,
    pub max_skew_ms: Option<i64>,
}

/// Discovery configuration
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryFileConfig {
    /// Advertise `_esphomelib._tcp` over mDNS
    pub mdns: Option<bool>,
}

/// Camera configuration
#[derive(Debug, Default, Deserialize)]
pub struct CameraFileConfig {
    pub enabled: Option<bool>,
}

/// Diagnostics configuration
#[derive(Debug, Default, Deserialize)]
pub struct DiagnosticsFileConfig {
    pub interval_secs: Option<u64>,
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<SatelliteConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `SatelliteConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SatelliteConfigFile {
    let Some(path) = config_file_path() else {
        return SatelliteConfigFile::default();
    };

    if !path.exists() {
        return SatelliteConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            SatelliteConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/satellite/satellite.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("satellite")
            .join("satellite.toml")
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config: SatelliteConfigFile = toml::from_str("").unwrap();
        assert!(config.device.name.is_none());
        assert!(config.voice.wake_words.is_none());
    }

    #[test]
    fn test_read_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[player]\nvolume = 0.4\nenable_stop_sound = false").unwrap();

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.player.volume, Some(0.4));
        assert_eq!(config.player.enable_stop_sound, Some(false));
    }

    #[test]
    fn test_read_invalid_file_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[player\nvolume = ").unwrap();
        assert!(read_config_file(file.path()).is_err());
    }
}
