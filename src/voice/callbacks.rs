//! Observer surface for UI and notification collaborators

use super::keywords::DeviceAction;

/// Notifications emitted while a turn progresses
///
/// Every method defaults to doing nothing; implement only what is needed.
/// Playback-related methods may be called from the playback thread.
pub trait SatelliteCallbacks: Send + Sync {
    fn on_conversation_text(&self, _role: &str, _text: &str) {}

    fn on_processing_started(&self) {}

    fn on_streaming_delta(&self, _delta: &str) {}

    fn on_streaming_finished(&self) {}

    fn on_device_action(&self, _action: DeviceAction) {}

    fn on_stt_text(&self, _text: &str) {}

    fn on_tts_text(&self, _text: &str) {}

    fn on_pipeline_error(&self, _code: &str, _message: &str) {}

    fn on_tts_duration_ready(&self, _duration_ms: u64, _text: &str) {}

    fn on_tts_playback_started(&self, _text: &str) {}

    fn on_tts_progress_update(&self, _current_ms: u64, _total_ms: u64, _text: &str) {}
}

/// Callbacks that ignore everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl SatelliteCallbacks for NoopCallbacks {}

/// Callbacks that write each notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallbacks;

impl SatelliteCallbacks for LoggingCallbacks {
    fn on_conversation_text(&self, role: &str, text: &str) {
        tracing::info!(role, text, "conversation");
    }

    fn on_processing_started(&self) {
        tracing::debug!("processing started");
    }

    fn on_device_action(&self, action: DeviceAction) {
        tracing::info!(kind = ?action.kind, on = action.on, "device action");
    }

    fn on_stt_text(&self, text: &str) {
        tracing::info!(text, "speech recognized");
    }

    fn on_pipeline_error(&self, code: &str, message: &str) {
        tracing::warn!(code, message, "pipeline error");
    }

    fn on_tts_duration_ready(&self, duration_ms: u64, _text: &str) {
        tracing::debug!(duration_ms, "TTS playback duration");
    }
}
