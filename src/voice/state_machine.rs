//! Voice-assistant turn state machine
//!
//! Hub pipeline events drive a turn through
//! Connected -> Listening -> Processing -> Responding -> Connected. The
//! machine never sends anything itself: it returns a [`Directive`] and the
//! orchestrator acts on it. TTS completion arrives asynchronously through
//! the hook installed at `RUN_START` and is fed back via
//! [`StateMachine::on_tts_finished`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::callbacks::SatelliteCallbacks;
use super::input::StreamingGate;
use super::keywords::{detect_device_action, is_exit_phrase, is_pipeline_error_text};
use super::playback::PlaybackListener;
use super::player::VoiceSatellitePlayer;
use super::silence::SilenceTracker;
use crate::config::VoiceConfig;
use crate::proto::{VoiceAssistantEvent, VoiceAssistantEventResponse};

/// How long after `RUN_START` stop words are ignored
pub const STOP_WORD_PROTECTION: Duration = Duration::from_secs(2);

/// Satellite-level state, observable by entities and the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SatelliteState {
    #[default]
    Disconnected,
    Connected,
    Listening,
    Processing,
    Responding,
}

impl SatelliteState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Responding => "responding",
        }
    }

    /// Whether a turn is in progress
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Listening | Self::Processing | Self::Responding)
    }
}

impl fmt::Display for SatelliteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator must do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing beyond what the machine already did
    Continue,
    /// Abort the turn and tell the hub
    StopSession,
    /// Local end-of-speech: send the final empty audio frame
    EndAudio,
}

/// How a finished TTS playback ends the turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    /// Back to Connected
    Finished,
    /// Start a follow-up turn
    ContinueConversation,
}

/// Timing knobs of the machine
#[derive(Debug, Clone)]
pub struct StateMachineConfig {
    pub wake_timeout: Duration,
    pub tts_completion_timeout: Duration,
    pub silence_threshold: f32,
    pub silence_duration: Duration,
    pub min_speech_duration: Duration,
}

impl From<&VoiceConfig> for StateMachineConfig {
    fn from(voice: &VoiceConfig) -> Self {
        Self {
            wake_timeout: voice.wake_timeout,
            tts_completion_timeout: voice.tts_completion_timeout,
            silence_threshold: voice.silence_threshold,
            silence_duration: voice.silence_duration,
            min_speech_duration: voice.min_speech_duration,
        }
    }
}

/// Forwards TTS playback progress to the callbacks with the spoken text
struct TtsProgress {
    callbacks: Arc<dyn SatelliteCallbacks>,
    text: String,
    duration_ms: AtomicU64,
}

impl PlaybackListener for TtsProgress {
    fn on_duration(&self, duration_ms: u64) {
        self.duration_ms.store(duration_ms, Ordering::Release);
    }

    fn on_started(&self) {
        let duration_ms = self.duration_ms.load(Ordering::Acquire);
        self.callbacks.on_tts_duration_ready(duration_ms, &self.text);
        self.callbacks.on_tts_playback_started(&self.text);
    }

    fn on_progress(&self, position_ms: u64, duration_ms: u64) {
        self.callbacks
            .on_tts_progress_update(position_ms, duration_ms, &self.text);
    }

    fn on_finished(&self) {}
}

/// Sequencer of one conversational turn at a time
pub struct StateMachine {
    player: Arc<VoiceSatellitePlayer>,
    gate: StreamingGate,
    state: watch::Sender<SatelliteState>,
    callbacks: Arc<dyn SatelliteCallbacks>,
    on_tts_finished: Arc<dyn Fn() + Send + Sync>,
    config: StateMachineConfig,
    silence: SilenceTracker,
    wake_deadline: Option<Instant>,
    tts_deadline: Option<Instant>,
    protected_until: Option<Instant>,
    tts_text: String,
    waking: bool,
    continue_conversation: bool,
    hub_vad_started: bool,
    stop_requested: bool,
    streaming_received: bool,
    intent_ended: bool,
}

impl StateMachine {
    /// `on_tts_finished` is invoked, possibly from another thread, when the
    /// turn's TTS playback completes
    #[must_use]
    pub fn new(
        player: Arc<VoiceSatellitePlayer>,
        gate: StreamingGate,
        callbacks: Arc<dyn SatelliteCallbacks>,
        on_tts_finished: Arc<dyn Fn() + Send + Sync>,
        config: StateMachineConfig,
    ) -> Self {
        let (state, _) = watch::channel(SatelliteState::Disconnected);
        let silence = SilenceTracker::new(
            config.silence_threshold,
            config.silence_duration,
            config.min_speech_duration,
        );
        Self {
            player,
            gate,
            state,
            callbacks,
            on_tts_finished,
            config,
            silence,
            wake_deadline: None,
            tts_deadline: None,
            protected_until: None,
            tts_text: String::new(),
            waking: false,
            continue_conversation: true,
            hub_vad_started: false,
            stop_requested: false,
            streaming_received: false,
            intent_ended: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SatelliteState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SatelliteState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SatelliteState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "satellite state");
        }
    }

    #[must_use]
    pub const fn is_waking(&self) -> bool {
        self.waking
    }

    #[must_use]
    pub const fn intent_ended(&self) -> bool {
        self.intent_ended
    }

    /// Whether no exit phrase was heard this turn
    #[must_use]
    pub const fn continue_conversation(&self) -> bool {
        self.continue_conversation
    }

    /// Stop words are ignored shortly after a run starts
    #[must_use]
    pub fn is_stop_word_protected(&self) -> bool {
        self.protected_until.is_some_and(|until| Instant::now() < until)
    }

    /// Hub connection established
    pub fn connected(&mut self) {
        self.reset();
        self.set_state(SatelliteState::Connected);
    }

    /// Hub connection lost: drop the turn entirely
    pub fn disconnected(&mut self) {
        self.player.tts().run_stopped();
        self.gate.set(false);
        self.reset();
        self.set_state(SatelliteState::Disconnected);
    }

    /// A local wake is starting a new turn
    pub fn begin_wake(&mut self) {
        self.stop_requested = false;
        self.waking = true;
        self.silence.reset();
    }

    /// Local wake did not lead to a request
    pub fn cancel_wake(&mut self) {
        self.waking = false;
    }

    /// Abort the turn and return to Connected
    ///
    /// A `RUN_START` arriving afterwards is ignored until the next local wake.
    pub fn stop_session(&mut self) {
        self.player.tts().run_stopped();
        self.gate.set(false);
        self.reset();
        self.stop_requested = true;
        if self.state() != SatelliteState::Disconnected {
            self.set_state(SatelliteState::Connected);
        }
    }

    fn reset(&mut self) {
        self.wake_deadline = None;
        self.tts_deadline = None;
        self.protected_until = None;
        self.silence.reset();
        self.tts_text.clear();
        self.waking = false;
        self.continue_conversation = true;
        self.hub_vad_started = false;
        self.stop_requested = false;
        self.streaming_received = false;
        self.intent_ended = false;
    }

    /// Apply one hub pipeline event
    pub fn handle_voice_event(&mut self, event: &VoiceAssistantEventResponse) -> Directive {
        let Ok(kind) = VoiceAssistantEvent::try_from(event.event_type) else {
            tracing::debug!(event_type = event.event_type, "unknown voice event ignored");
            return Directive::Continue;
        };
        tracing::debug!(event = ?kind, state = %self.state(), "voice event");

        match kind {
            VoiceAssistantEvent::Error => {
                let code = event.value("code").unwrap_or("unknown");
                let message = event.value("message").unwrap_or_default();
                tracing::warn!(code, message, state = %self.state(), "pipeline error");
                self.callbacks.on_pipeline_error(code, message);
                self.gate.set(false);
                Directive::StopSession
            }
            VoiceAssistantEvent::RunStart => self.run_start(),
            VoiceAssistantEvent::SttVadStart => {
                self.hub_vad_started = true;
                self.silence.reset();
                self.wake_deadline = None;
                Directive::Continue
            }
            VoiceAssistantEvent::SttVadEnd => {
                self.wake_deadline = None;
                self.gate.set(false);
                self.set_state(SatelliteState::Processing);
                self.callbacks.on_processing_started();
                Directive::Continue
            }
            VoiceAssistantEvent::SttEnd => self.stt_end(event.value("text").unwrap_or_default()),
            VoiceAssistantEvent::IntentProgress => {
                if let Some(delta) = event.value("content").filter(|d| !d.trim().is_empty()) {
                    self.streaming_received = true;
                    self.callbacks.on_streaming_delta(delta);
                }
                Directive::Continue
            }
            VoiceAssistantEvent::IntentEnd => {
                self.intent_ended = true;
                if self.streaming_received {
                    self.callbacks.on_streaming_finished();
                }
                Directive::Continue
            }
            VoiceAssistantEvent::TtsStart => self.tts_start(event.value("text").unwrap_or_default()),
            VoiceAssistantEvent::TtsEnd => {
                self.tts_end(event.value("url").unwrap_or_default());
                Directive::Continue
            }
            VoiceAssistantEvent::RunEnd => self.run_end(),
            _ => Directive::Continue,
        }
    }

    fn run_start(&mut self) -> Directive {
        if self.stop_requested {
            tracing::debug!("RUN_START ignored, stop was requested");
            return Directive::Continue;
        }

        self.tts_deadline = None;
        self.silence.reset();
        self.waking = false;
        self.hub_vad_started = false;
        self.streaming_received = false;
        self.intent_ended = false;
        let now = Instant::now();
        self.protected_until = Some(now + STOP_WORD_PROTECTION);
        self.wake_deadline = Some(now + self.config.wake_timeout);

        if self.state() == SatelliteState::Connected {
            self.set_state(SatelliteState::Listening);
        }

        let on_finished = Arc::clone(&self.on_tts_finished);
        self.player.tts().run_start(move || on_finished());
        self.gate.set(true);
        Directive::Continue
    }

    fn stt_end(&mut self, text: &str) -> Directive {
        self.wake_deadline = None;
        self.gate.set(false);

        if is_pipeline_error_text(text) {
            tracing::warn!(text, "STT returned an error, stopping session");
            return Directive::StopSession;
        }

        if !text.trim().is_empty() {
            self.callbacks.on_stt_text(text);
            self.callbacks.on_conversation_text("user", text);
        }

        if self.state() == SatelliteState::Listening {
            self.set_state(SatelliteState::Processing);
        }
        Directive::Continue
    }

    fn tts_start(&mut self, text: &str) -> Directive {
        self.wake_deadline = None;
        self.gate.set(false);

        if is_pipeline_error_text(text) {
            tracing::warn!(text, "TTS text is an error, stopping session");
            return Directive::StopSession;
        }

        self.set_state(SatelliteState::Responding);
        if !text.trim().is_empty() {
            self.tts_text = text.to_string();
            self.callbacks.on_tts_text(text);
            if !self.streaming_received {
                self.callbacks.on_conversation_text("assistant", text);
            }
            if let Some(action) = detect_device_action(text) {
                self.callbacks.on_device_action(action);
            }
            if is_exit_phrase(text) {
                self.continue_conversation = false;
            }
        }
        Directive::Continue
    }

    fn tts_end(&mut self, url: &str) {
        let tts = self.player.tts();
        if self.state() != SatelliteState::Responding || tts.tts_played() {
            tracing::debug!(state = %self.state(), played = tts.tts_played(), "TTS_END skipped");
            return;
        }

        if url.is_empty() {
            tracing::debug!("TTS_END without URL, completing immediately");
            tts.mark_played();
            tts.trigger_completion();
        } else {
            let progress = Arc::new(TtsProgress {
                callbacks: Arc::clone(&self.callbacks),
                text: self.tts_text.clone(),
                duration_ms: AtomicU64::new(0),
            });
            tts.play_tts(url, Some(progress));
        }
    }

    fn run_end(&mut self) -> Directive {
        if self.waking {
            tracing::debug!("RUN_END ignored, new wake in progress");
            return Directive::Continue;
        }

        self.gate.set(false);
        let played = self.player.tts().tts_played();

        match self.state() {
            SatelliteState::Listening | SatelliteState::Processing => {
                tracing::debug!("RUN_END in mid-turn, resetting stuck state");
                Directive::StopSession
            }
            SatelliteState::Responding if !played => {
                tracing::debug!("RUN_END while responding without TTS, resetting");
                Directive::StopSession
            }
            SatelliteState::Responding => {
                tracing::debug!("RUN_END while responding, waiting for playback");
                self.tts_deadline = Some(Instant::now() + self.config.tts_completion_timeout);
                Directive::Continue
            }
            _ => Directive::Continue,
        }
    }

    /// TTS playback of the turn completed
    pub fn on_tts_finished(&mut self, continuous_enabled: bool) -> TurnEnd {
        let follow_up = continuous_enabled && self.continue_conversation;
        self.reset();
        if self.state() != SatelliteState::Disconnected {
            self.set_state(SatelliteState::Connected);
        }

        if follow_up {
            // The follow-up request is already on its way
            self.waking = true;
            TurnEnd::ContinueConversation
        } else {
            TurnEnd::Finished
        }
    }

    /// Feed a streamed frame to the local end-of-speech tracker
    pub fn process_audio(&mut self, frame: &[i16]) -> Directive {
        if self.state() != SatelliteState::Listening || self.hub_vad_started {
            return Directive::Continue;
        }

        let ended = self.silence.process(frame);
        if self.silence.heard_speech() {
            self.wake_deadline = None;
        }
        if ended {
            tracing::debug!("local end of speech");
            self.gate.set(false);
            return Directive::EndAudio;
        }
        Directive::Continue
    }

    /// Earliest pending deadline, if any
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.wake_deadline, self.tts_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Check deadlines against `now`
    pub fn poll_timers(&mut self, now: Instant) -> Directive {
        if self.wake_deadline.is_some_and(|d| now >= d) {
            self.wake_deadline = None;
            tracing::info!("no speech before wake timeout, stopping session");
            return Directive::StopSession;
        }
        if self.tts_deadline.is_some_and(|d| now >= d) {
            self.tts_deadline = None;
            tracing::warn!("TTS completion never arrived, stopping session");
            return Directive::StopSession;
        }
        Directive::Continue
    }
}
