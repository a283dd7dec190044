//! Voice Satellite - a voice endpoint for a home-automation hub
//!
//! This library provides the core functionality of the satellite:
//! - Native device API server (framing, handshake, entity traffic)
//! - Entities the hub can list, observe and command
//! - Microphone pipeline with wake and stop word detection
//! - Voice-assistant turn state machine and audio playback
//! - Multi-device wake arbitration and mDNS discovery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Home-automation hub                  │
//! │   STT  │  Intent  │  TTS  │  Entity UI               │
//! └────────────────────┬────────────────────────────────┘
//!                      │ native API (TCP)
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Voice Satellite                     │
//! │   Device server │ Entity registry │ State machine    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Audio hardware                      │
//! │   Microphone │ Keyword detectors │ Speakers         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod device;
pub mod diagnostics;
pub mod discovery;
pub mod entities;
pub mod error;
pub mod multidevice;
pub mod proto;
pub mod settings;
pub mod voice;

pub use config::Config;
pub use daemon::{Satellite, SatelliteHandle, SatelliteIo};
pub use device::{ConnectionEvent, DeviceInfo, DeviceServer, EntityRegistry, HubSender};
pub use discovery::MdnsAdvertiser;
pub use entities::Entity;
pub use error::{Error, Result};
pub use multidevice::{ArbiterResult, WakeArbiter};
pub use proto::{FrameCodec, ProtocolMessage};
pub use settings::Settings;
