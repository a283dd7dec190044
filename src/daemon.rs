//! Satellite - the main service
//!
//! Wires the hub connection, the microphone pipeline, the turn state machine
//! and the player together. All turn state is owned by one event loop; audio
//! callbacks and timers only post events back into it.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::device::{ConnectionEvent, DeviceInfo, DeviceServer, EntityRegistry, HubSender};
use crate::diagnostics::run_uptime_poller;
use crate::discovery::MdnsAdvertiser;
use crate::entities::action;
use crate::entities::catalog::{CatalogDeps, SatelliteEntities};
use crate::multidevice::{ArbiterResult, WakeArbiter};
use crate::proto::{
    ProtocolMessage, VoiceAssistantAnnounceFinished, VoiceAssistantAnnounceRequest,
    VoiceAssistantAudio, VoiceAssistantConfigurationResponse, VoiceAssistantRequest,
    VoiceAssistantSetConfiguration, VoiceAssistantWakeWord,
};
use crate::settings::Settings;
use crate::voice::{
    AudioEvent, AudioInput, AudioOutput, CpalMicrophoneFactory, CpalOutput, DetectorProvider,
    Directive, LoggingCallbacks, MicrophoneFactory, PassiveDetectorProvider, SatelliteCallbacks,
    SatelliteState, StateMachine, StateMachineConfig, StreamingGate, TurnEnd,
    VoiceSatellitePlayer, WakeWordInfo,
};
use crate::{Config, Result};

/// Most wake words the hub may activate at once
pub const MAX_ACTIVE_WAKE_WORDS: usize = 2;

const CONNECTION_EVENT_CAPACITY: usize = 64;
const AUDIO_EVENT_CAPACITY: usize = 64;

/// Audio hardware and detectors the satellite runs on
pub struct SatelliteIo {
    pub tts_output: Arc<dyn AudioOutput>,
    pub media_output: Arc<dyn AudioOutput>,
    pub sound_output: Arc<dyn AudioOutput>,
    pub microphone: Arc<dyn MicrophoneFactory>,
    pub wake_detectors: Arc<dyn DetectorProvider>,
    pub stop_detectors: Arc<dyn DetectorProvider>,
    pub callbacks: Arc<dyn SatelliteCallbacks>,
}

impl SatelliteIo {
    /// Default host audio devices with passive detectors
    #[must_use]
    pub fn host(config: &Config) -> Self {
        Self {
            tts_output: Arc::new(CpalOutput::new("tts")),
            media_output: Arc::new(CpalOutput::new("media")),
            sound_output: Arc::new(CpalOutput::new("sounds")),
            microphone: Arc::new(CpalMicrophoneFactory),
            wake_detectors: Arc::new(PassiveDetectorProvider::new(&config.voice.wake_words)),
            stop_detectors: Arc::new(PassiveDetectorProvider::new(&config.voice.stop_words)),
            callbacks: Arc::new(LoggingCallbacks),
        }
    }
}

/// Events posted back into the loop by playback callbacks and tasks
#[derive(Debug)]
enum Internal {
    TtsFinished,
    /// Wake or prompt sound done; the request may go out
    WakeReady { generation: u64, phrase: String },
    Arbitrated {
        generation: u64,
        phrase: String,
        wake_word: String,
        result: ArbiterResult,
    },
    AnnouncementFinished { start_conversation: bool },
    ManualWake,
    Stop,
}

/// Cloneable control handle for a running satellite
#[derive(Debug, Clone)]
pub struct SatelliteHandle {
    tx: mpsc::UnboundedSender<Internal>,
}

impl SatelliteHandle {
    /// Start a turn as if a wake word had been heard
    pub fn wake(&self) {
        let _ = self.tx.send(Internal::ManualWake);
    }

    /// Abort the current turn
    pub fn stop(&self) {
        let _ = self.tx.send(Internal::Stop);
    }
}

/// The voice satellite service
pub struct Satellite {
    config: Config,
    microphone: Arc<dyn MicrophoneFactory>,
    input: Arc<AudioInput>,
    entities: Arc<SatelliteEntities>,
    registry: Arc<EntityRegistry>,
    coordinator: Coordinator,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl Satellite {
    /// Build the satellite and register its entities
    ///
    /// # Errors
    ///
    /// Returns error if two entities share a key
    pub fn new(config: Config, io: SatelliteIo) -> Result<Self> {
        let settings = Settings::from_config(&config);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let player = Arc::new(VoiceSatellitePlayer::new(
            io.tts_output,
            io.media_output,
            io.sound_output,
            settings.player.clone(),
            config.player.duck_multiplier,
        ));

        let input = Arc::new(AudioInput::new(
            Arc::clone(&io.wake_detectors),
            io.stop_detectors,
            settings.microphone.clone(),
        ));

        let wake_words = io.wake_detectors.available();
        let button_tx = internal_tx.clone();
        let entities = Arc::new(SatelliteEntities::build(CatalogDeps {
            settings: Arc::clone(&settings),
            player: Arc::clone(&player),
            wake_words: wake_words.clone(),
            start_conversation: action(move || {
                let _ = button_tx.send(Internal::ManualWake);
                async { Ok(()) }
            }),
        }));

        let registry = Arc::new(EntityRegistry::new());
        for entity in entities.entities() {
            registry.add(Arc::clone(entity))?;
        }

        let completion_tx = internal_tx.clone();
        let machine = StateMachine::new(
            Arc::clone(&player),
            input.gate(),
            Arc::clone(&io.callbacks),
            Arc::new(move || {
                let _ = completion_tx.send(Internal::TtsFinished);
            }),
            StateMachineConfig::from(&config.voice),
        );

        let arbiter = config.arbiter.enabled.then(|| WakeArbiter::new(&config.arbiter));

        let coordinator = Coordinator {
            settings,
            player,
            machine,
            gate: input.gate(),
            arbiter,
            wake_words,
            internal_tx,
            hub: None,
            voice_subscribed: false,
            wake_generation: 0,
        };

        Ok(Self {
            config,
            microphone: io.microphone,
            input,
            entities,
            registry,
            coordinator,
            internal_rx,
        })
    }

    #[must_use]
    pub fn handle(&self) -> SatelliteHandle {
        SatelliteHandle {
            tx: self.coordinator.internal_tx.clone(),
        }
    }

    /// Watch the satellite state
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SatelliteState> {
        self.coordinator.machine.subscribe()
    }

    #[must_use]
    pub fn registry(&self) -> Arc<EntityRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn entities(&self) -> Arc<SatelliteEntities> {
        Arc::clone(&self.entities)
    }

    #[must_use]
    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.coordinator.settings)
    }

    /// Serve the hub until cancelled
    ///
    /// # Errors
    ///
    /// Returns error if the API port cannot be bound
    #[allow(clippy::future_not_send)]
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.device.port));
        let listener = DeviceServer::bind(addr).await?;
        let tasks = cancel.child_token();

        let (connection_tx, connection_rx) = mpsc::channel(CONNECTION_EVENT_CAPACITY);
        let server = DeviceServer::new(
            DeviceInfo::from_config(&self.config.device),
            Arc::clone(&self.registry),
            connection_tx,
        );
        let server_task = tokio::spawn(server.run(listener, tasks.clone()));

        let advertiser = if self.config.mdns {
            start_mdns(&self.config).await
        } else {
            None
        };

        let mirror_task = {
            let entities = Arc::clone(&self.entities);
            let state = self.subscribe_state();
            let token = tasks.clone();
            tokio::spawn(async move { entities.mirror(state, token).await })
        };

        let camera_task = {
            let entities = Arc::clone(&self.entities);
            let registry = Arc::clone(&self.registry);
            let token = tasks.clone();
            tokio::spawn(async move { entities.track_camera(registry, token).await })
        };

        let diagnostics_task = tokio::spawn(run_uptime_poller(
            Arc::clone(&self.entities.uptime),
            self.config.diagnostics_interval,
            tasks.clone(),
        ));

        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_EVENT_CAPACITY);
        let audio_task = if self.config.voice.enabled {
            let input = Arc::clone(&self.input);
            let microphone = Arc::clone(&self.microphone);
            let token = tasks.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = input.run(microphone.as_ref(), audio_tx, token).await {
                    tracing::error!(error = %e, "audio input stopped");
                }
            }))
        } else {
            tracing::info!("voice disabled, microphone not opened");
            drop(audio_tx);
            None
        };

        tracing::info!(
            name = %self.config.device.name,
            port = self.config.device.port,
            "satellite running"
        );

        let player = Arc::clone(&self.coordinator.player);
        self.drive(connection_rx, audio_rx, cancel).await;

        tasks.cancel();
        let _ = server_task.await;
        let _ = mirror_task.await;
        let _ = camera_task.await;
        let _ = diagnostics_task.await;
        if let Some(task) = audio_task {
            let _ = task.await;
        }
        if let Some(advertiser) = advertiser {
            advertiser.stop().await;
        }
        player.stop_all();

        tracing::info!("satellite stopped");
        Ok(())
    }

    /// Process connection and audio events until cancelled
    ///
    /// The connection channel closing also ends the loop; the audio channel
    /// closing only stops wake detection.
    pub async fn drive(
        self,
        mut connections: mpsc::Receiver<ConnectionEvent>,
        mut audio: mpsc::Receiver<AudioEvent>,
        cancel: CancellationToken,
    ) {
        let Self {
            mut coordinator,
            mut internal_rx,
            ..
        } = self;
        let mut audio_open = true;

        loop {
            let deadline = coordinator.machine.next_deadline();

            tokio::select! {
                () = cancel.cancelled() => break,
                event = connections.recv() => {
                    let Some(event) = event else { break };
                    coordinator.on_connection_event(event).await;
                }
                event = audio.recv(), if audio_open => match event {
                    Some(event) => coordinator.on_audio_event(event).await,
                    None => {
                        tracing::warn!("audio pipeline closed");
                        audio_open = false;
                    }
                },
                Some(event) = internal_rx.recv() => coordinator.on_internal(event).await,
                () = sleep_until(deadline) => {
                    let directive = coordinator.machine.poll_timers(Instant::now());
                    coordinator.apply(directive).await;
                }
            }
        }

        coordinator.machine.disconnected();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn start_mdns(config: &Config) -> Option<MdnsAdvertiser> {
    let advertiser = match MdnsAdvertiser::new() {
        Ok(advertiser) => advertiser,
        Err(e) => {
            tracing::warn!(error = %e, "mDNS unavailable");
            return None;
        }
    };
    let device = &config.device;
    if let Err(e) = advertiser
        .start(&device.name, &device.mac_address, device.port)
        .await
    {
        tracing::warn!(error = %e, "failed to advertise over mDNS");
    }
    Some(advertiser)
}

/// State owned by the event loop
struct Coordinator {
    settings: Arc<Settings>,
    player: Arc<VoiceSatellitePlayer>,
    machine: StateMachine,
    gate: StreamingGate,
    arbiter: Option<WakeArbiter>,
    wake_words: Vec<WakeWordInfo>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    hub: Option<HubSender>,
    voice_subscribed: bool,
    /// Bumped per wake so late sound or arbitration results can be dropped
    wake_generation: u64,
}

impl Coordinator {
    async fn send(&self, message: impl Into<ProtocolMessage>) -> bool {
        match &self.hub {
            Some(hub) => hub.send(message).await,
            None => false,
        }
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(hub) => {
                self.hub = Some(hub);
                self.voice_subscribed = false;
                self.machine.connected();
            }
            ConnectionEvent::Voice(message) => self.on_voice_message(message).await,
            ConnectionEvent::Disconnected => {
                self.hub = None;
                self.voice_subscribed = false;
                self.wake_generation += 1;
                self.machine.disconnected();
                self.player.unduck();
            }
        }
    }

    async fn on_voice_message(&mut self, message: ProtocolMessage) {
        match message {
            ProtocolMessage::SubscribeVoiceAssistantRequest(request) => {
                tracing::info!(subscribe = request.subscribe, "voice assistant subscription");
                self.voice_subscribed = request.subscribe;
            }
            ProtocolMessage::VoiceAssistantEventResponse(event) => {
                let directive = self.machine.handle_voice_event(&event);
                self.apply(directive).await;
            }
            ProtocolMessage::VoiceAssistantResponse(response) => {
                if response.error {
                    tracing::warn!("hub refused the voice run");
                    self.apply(Directive::StopSession).await;
                } else if response.port != 0 {
                    tracing::debug!(port = response.port, "hub offered UDP audio, using API audio");
                }
            }
            ProtocolMessage::VoiceAssistantAnnounceRequest(request) => self.announce(request),
            ProtocolMessage::VoiceAssistantConfigurationRequest(_) => {
                let response = self.configuration();
                self.send(response).await;
            }
            ProtocolMessage::VoiceAssistantSetConfiguration(request) => {
                self.set_configuration(request);
            }
            other => tracing::debug!(type_id = other.type_id(), "unhandled voice message"),
        }
    }

    async fn on_audio_event(&mut self, event: AudioEvent) {
        match event {
            AudioEvent::Audio { pcm, bytes } => {
                if !self.gate.is_open() {
                    return;
                }
                self.send(VoiceAssistantAudio {
                    data: bytes,
                    end: false,
                })
                .await;
                let directive = self.machine.process_audio(&pcm);
                self.apply(directive).await;
            }
            AudioEvent::WakeDetected { phrase, id } => self.wake(phrase, id, true).await,
            AudioEvent::StopDetected { phrase } => self.stop_word(&phrase).await,
        }
    }

    async fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::TtsFinished => self.tts_finished(),
            Internal::WakeReady { generation, phrase } => {
                if generation != self.wake_generation || !self.machine.is_waking() {
                    tracing::debug!("stale wake ignored");
                    return;
                }
                self.request_run(&phrase).await;
            }
            Internal::Arbitrated {
                generation,
                phrase,
                wake_word,
                result,
            } => {
                if generation != self.wake_generation || !self.machine.is_waking() {
                    return;
                }
                if result.should_respond {
                    self.play_wake_sound(&phrase, &wake_word);
                } else {
                    tracing::info!(reason = %result.reason, "another satellite answers this wake");
                    self.machine.cancel_wake();
                }
            }
            Internal::AnnouncementFinished { start_conversation } => {
                self.send(VoiceAssistantAnnounceFinished { success: true })
                    .await;
                if start_conversation {
                    self.wake(String::new(), String::new(), false).await;
                } else {
                    self.player.unduck();
                }
            }
            Internal::ManualWake => self.wake(String::new(), String::new(), false).await,
            Internal::Stop => {
                if self.machine.state().is_active() || self.machine.is_waking() {
                    self.apply(Directive::StopSession).await;
                }
            }
        }
    }

    /// Act on a state machine directive
    async fn apply(&mut self, directive: Directive) {
        match directive {
            Directive::Continue => {}
            Directive::StopSession => {
                self.wake_generation += 1;
                self.machine.stop_session();
                self.send(VoiceAssistantRequest {
                    start: false,
                    ..VoiceAssistantRequest::default()
                })
                .await;
                self.player.unduck();
            }
            Directive::EndAudio => {
                self.send(VoiceAssistantAudio {
                    data: Vec::new(),
                    end: true,
                })
                .await;
            }
        }
    }

    async fn wake(&mut self, phrase: String, wake_word: String, arbitrate: bool) {
        if self.hub.is_none() || !self.voice_subscribed {
            tracing::debug!("wake ignored, hub not listening for voice");
            return;
        }

        match self.machine.state() {
            SatelliteState::Disconnected => return,
            SatelliteState::Listening | SatelliteState::Processing => {
                tracing::debug!(state = %self.machine.state(), "wake ignored mid-turn");
                return;
            }
            SatelliteState::Responding => {
                tracing::info!("barge-in, interrupting response");
                self.apply(Directive::StopSession).await;
            }
            SatelliteState::Connected => {
                if self.machine.is_waking() {
                    tracing::debug!("wake already in progress");
                    return;
                }
            }
        }

        self.machine.begin_wake();
        self.wake_generation += 1;

        match &self.arbiter {
            Some(arbiter) if arbitrate => {
                let arbiter = arbiter.clone();
                let tx = self.internal_tx.clone();
                let generation = self.wake_generation;
                tokio::spawn(async move {
                    let result = arbiter.arbitrate(&wake_word).await;
                    let _ = tx.send(Internal::Arbitrated {
                        generation,
                        phrase,
                        wake_word,
                        result,
                    });
                });
            }
            _ => self.play_wake_sound(&phrase, &wake_word),
        }
    }

    fn play_wake_sound(&self, phrase: &str, wake_word: &str) {
        let alternate = self
            .settings
            .microphone
            .wake_words
            .get()
            .iter()
            .position(|w| w == wake_word)
            == Some(1);

        self.player.duck();
        let tx = self.internal_tx.clone();
        let generation = self.wake_generation;
        let phrase = phrase.to_string();
        self.player.play_wake_sound(alternate, move || {
            let _ = tx.send(Internal::WakeReady { generation, phrase });
        });
    }

    async fn request_run(&mut self, phrase: &str) {
        let sent = self
            .send(VoiceAssistantRequest {
                start: true,
                wake_word_phrase: phrase.to_string(),
                ..VoiceAssistantRequest::default()
            })
            .await;
        if sent {
            tracing::info!(phrase, "voice run requested");
        } else {
            self.machine.cancel_wake();
            self.player.unduck();
        }
    }

    async fn stop_word(&mut self, phrase: &str) {
        let state = self.machine.state();
        if !state.is_active() {
            tracing::debug!(phrase, %state, "stop word ignored");
            return;
        }
        if self.machine.is_stop_word_protected() {
            tracing::debug!(phrase, "stop word ignored, run just started");
            return;
        }

        tracing::info!(phrase, "stop word, ending turn");
        self.apply(Directive::StopSession).await;
        self.player.play_stop_sound(|| {});
    }

    fn tts_finished(&mut self) {
        if self.machine.state() != SatelliteState::Responding {
            tracing::debug!(state = %self.machine.state(), "late TTS completion ignored");
            return;
        }

        let continuous = self
            .settings
            .player
            .enable_continuous_conversation
            .get();
        match self.machine.on_tts_finished(continuous) {
            TurnEnd::Finished => self.player.unduck(),
            TurnEnd::ContinueConversation => {
                tracing::debug!("continuing conversation");
                self.wake_generation += 1;
                let tx = self.internal_tx.clone();
                let generation = self.wake_generation;
                self.player.play_continuous_prompt_sound(move || {
                    let _ = tx.send(Internal::WakeReady {
                        generation,
                        phrase: String::new(),
                    });
                });
            }
        }
    }

    fn announce(&self, request: VoiceAssistantAnnounceRequest) {
        tracing::info!(media = %request.media_id, text = %request.text, "announcement");
        self.player.duck();
        let tx = self.internal_tx.clone();
        let start_conversation = request.start_conversation;
        let preannounce = Some(request.preannounce_media_id.as_str()).filter(|p| !p.is_empty());
        self.player
            .tts()
            .play_announcement(preannounce, &request.media_id, move || {
                let _ = tx.send(Internal::AnnouncementFinished { start_conversation });
            });
    }

    fn configuration(&self) -> VoiceAssistantConfigurationResponse {
        VoiceAssistantConfigurationResponse {
            available_wake_words: self
                .wake_words
                .iter()
                .map(|w| VoiceAssistantWakeWord {
                    id: w.id.clone(),
                    wake_word: w.phrase.clone(),
                    trained_languages: w.trained_languages.clone(),
                })
                .collect(),
            active_wake_words: self.settings.microphone.wake_words.get(),
            max_active_wake_words: u32::try_from(MAX_ACTIVE_WAKE_WORDS).unwrap_or(u32::MAX),
        }
    }

    fn set_configuration(&self, request: VoiceAssistantSetConfiguration) {
        let active: Vec<String> = request
            .active_wake_words
            .into_iter()
            .filter(|id| self.wake_words.iter().any(|w| w.id == *id))
            .take(MAX_ACTIVE_WAKE_WORDS)
            .collect();

        if active.is_empty() {
            tracing::warn!("no known wake words in configuration, keeping current ones");
            return;
        }
        tracing::info!(wake_words = ?active, "active wake words changed");
        self.settings.microphone.wake_words.set(active);
    }
}
