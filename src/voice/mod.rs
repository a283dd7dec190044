//! Voice processing module
//!
//! Microphone capture and keyword detection feed the turn state machine;
//! the player façade owns every audio output. Speech recognition and
//! synthesis happen on the hub.

mod callbacks;
mod capture;
mod detector;
mod input;
pub mod keywords;
mod playback;
mod player;
mod silence;
mod state_machine;
#[cfg(test)]
pub(crate) mod testing;
mod tts;

pub use callbacks::{LoggingCallbacks, NoopCallbacks, SatelliteCallbacks};
pub use capture::{
    CpalMicrophone, CpalMicrophoneFactory, FRAME_SAMPLES, Microphone, MicrophoneFactory,
    SAMPLE_RATE, audio_devices, frame_to_bytes, samples_to_wav,
};
pub use detector::{
    Detection, DetectorProvider, KeywordDetector, PassiveDetectorProvider, WakeWordInfo,
};
pub use input::{AudioEvent, AudioInput, StreamingGate, apply_gain};
pub use keywords::{DeviceAction, DeviceKind};
pub use playback::{AudioOutput, CpalOutput, OnFinished, PlaybackListener};
pub use player::{DEFAULT_DUCK_MULTIPLIER, VoiceSatellitePlayer};
pub use silence::SilenceTracker;
pub use state_machine::{
    Directive, STOP_WORD_PROTECTION, SatelliteState, StateMachine, StateMachineConfig, TurnEnd,
};
pub use tts::TtsPlayer;
