//! Device side of the native API
//!
//! [`DeviceServer`] accepts the hub connection and answers the session
//! handshake from [`DeviceInfo`]; entity traffic goes through the
//! [`EntityRegistry`] and voice traffic to the satellite orchestrator.

mod registry;
mod server;

pub use registry::EntityRegistry;
pub use server::{ConnectionEvent, DeviceServer, HubSender};

use crate::config::DeviceConfig;
use crate::proto::{DeviceInfoResponse, HelloResponse, voice_assistant_feature};

/// Native API version implemented by the satellite
pub const API_VERSION: (u32, u32) = (1, 10);

/// Voice features advertised to the hub
pub const VOICE_FEATURE_FLAGS: u32 = voice_assistant_feature::VOICE_ASSISTANT
    | voice_assistant_feature::SPEAKER
    | voice_assistant_feature::API_AUDIO
    | voice_assistant_feature::ANNOUNCE
    | voice_assistant_feature::START_CONVERSATION;

/// Identity reported during the handshake
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub friendly_name: String,
    pub mac_address: String,
    pub manufacturer: String,
    pub model: String,
    pub suggested_area: String,
}

impl DeviceInfo {
    #[must_use]
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            name: config.name.clone(),
            friendly_name: config.friendly_name.clone(),
            mac_address: config.mac_address.clone(),
            manufacturer: config.manufacturer.clone(),
            model: config.model.clone(),
            suggested_area: config.suggested_area.clone(),
        }
    }

    #[must_use]
    pub fn hello_response(&self) -> HelloResponse {
        HelloResponse {
            api_version_major: API_VERSION.0,
            api_version_minor: API_VERSION.1,
            server_info: format!("{} ({})", self.name, env!("CARGO_PKG_VERSION")),
            name: self.name.clone(),
        }
    }

    #[must_use]
    pub fn device_info_response(&self) -> DeviceInfoResponse {
        DeviceInfoResponse {
            uses_password: false,
            name: self.name.clone(),
            mac_address: self.mac_address.clone(),
            esphome_version: env!("CARGO_PKG_VERSION").to_string(),
            compilation_time: String::new(),
            model: self.model.clone(),
            project_name: format!("{}.{}", self.manufacturer, env!("CARGO_PKG_NAME")),
            project_version: env!("CARGO_PKG_VERSION").to_string(),
            manufacturer: self.manufacturer.clone(),
            friendly_name: self.friendly_name.clone(),
            suggested_area: self.suggested_area.clone(),
            voice_assistant_feature_flags: VOICE_FEATURE_FLAGS,
        }
    }
}
