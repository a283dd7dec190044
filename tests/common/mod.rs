//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use voice_satellite::device::{ConnectionEvent, HubSender};
use voice_satellite::proto::{
    ProtocolMessage, SubscribeVoiceAssistantRequest, VoiceAssistantConfigurationRequest,
    VoiceAssistantEvent, VoiceAssistantEventData, VoiceAssistantEventResponse,
};
use voice_satellite::voice::{
    AudioEvent, AudioOutput, Detection, DetectorProvider, DeviceAction, KeywordDetector, Microphone,
    MicrophoneFactory, PassiveDetectorProvider, PlaybackListener, SatelliteCallbacks,
    SatelliteState, WakeWordInfo,
};
use voice_satellite::{Config, Result, Satellite, SatelliteHandle, SatelliteIo, Settings};

/// Output that records plays
///
/// With `auto_finish` every playback completes immediately, like a short
/// feedback sound; otherwise it completes on [`RecordingOutput::finish`].
pub struct RecordingOutput {
    auto_finish: bool,
    plays: Mutex<Vec<Vec<String>>>,
    listener: Mutex<Option<Arc<dyn PlaybackListener>>>,
    volume: AtomicU32,
    playing: AtomicBool,
}

impl RecordingOutput {
    pub fn new(auto_finish: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_finish,
            plays: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            volume: AtomicU32::new(1.0_f32.to_bits()),
            playing: AtomicBool::new(false),
        })
    }

    pub fn plays(&self) -> Vec<Vec<String>> {
        self.plays.lock().unwrap().clone()
    }

    /// Complete the current playback
    pub fn finish(&self) {
        self.playing.store(false, Ordering::SeqCst);
        let listener = self.listener.lock().unwrap().take();
        if let Some(listener) = listener {
            listener.on_finished();
        }
    }

    /// Wait until at least `count` playbacks were started
    pub async fn wait_for_plays(&self, count: usize) -> Vec<Vec<String>> {
        for _ in 0..200 {
            let plays = self.plays();
            if plays.len() >= count {
                return plays;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} plays, got {:?}", self.plays());
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&self, sources: Vec<String>, listener: Option<Arc<dyn PlaybackListener>>) {
        self.stop();
        self.plays.lock().unwrap().push(sources);
        self.playing.store(true, Ordering::SeqCst);
        if let Some(listener) = &listener {
            listener.on_duration(1000);
            listener.on_started();
        }
        *self.listener.lock().unwrap() = listener;
        if self.auto_finish {
            self.finish();
        }
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.listener.lock().unwrap().take();
    }

    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::SeqCst);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::SeqCst))
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Microphone that replays queued frames, then silence
pub struct ScriptedMicrophone {
    frames: mpsc::UnboundedReceiver<Vec<i16>>,
}

#[async_trait]
impl Microphone for ScriptedMicrophone {
    async fn read(&mut self) -> Result<Vec<i16>> {
        match self.frames.recv().await {
            Some(frame) => Ok(frame),
            None => std::future::pending().await,
        }
    }
}

/// Factory handing out one scripted microphone per open
pub struct ScriptedMicrophoneFactory {
    frames: Mutex<Option<mpsc::UnboundedReceiver<Vec<i16>>>>,
    opens: AtomicU32,
}

impl ScriptedMicrophoneFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Vec<i16>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = Arc::new(Self {
            frames: Mutex::new(Some(rx)),
            opens: AtomicU32::new(0),
        });
        (factory, tx)
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl MicrophoneFactory for ScriptedMicrophoneFactory {
    fn open(&self) -> Result<Box<dyn Microphone>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let frames = self.frames.lock().unwrap().take().unwrap_or_else(|| {
            let (_, rx) = mpsc::unbounded_channel();
            rx
        });
        Ok(Box::new(ScriptedMicrophone { frames }))
    }
}

/// Detector that fires on frames whose first sample is `trigger`
pub struct ScriptedDetectorProvider {
    pub trigger: i16,
    pub words: Vec<WakeWordInfo>,
}

struct ScriptedDetector {
    trigger: i16,
    words: Vec<WakeWordInfo>,
    active: Vec<String>,
}

impl KeywordDetector for ScriptedDetector {
    fn set_active(&mut self, ids: &[String]) {
        self.active = ids.to_vec();
    }

    fn detect(&mut self, frame: &[i16]) -> Vec<Detection> {
        if frame.first() != Some(&self.trigger) {
            return Vec::new();
        }
        self.words
            .iter()
            .filter(|w| self.active.contains(&w.id))
            .map(|w| Detection {
                id: w.id.clone(),
                phrase: w.phrase.clone(),
            })
            .collect()
    }
}

impl DetectorProvider for ScriptedDetectorProvider {
    fn available(&self) -> Vec<WakeWordInfo> {
        self.words.clone()
    }

    fn create(&self) -> Box<dyn KeywordDetector> {
        Box::new(ScriptedDetector {
            trigger: self.trigger,
            words: self.words.clone(),
            active: Vec::new(),
        })
    }
}

/// Callbacks that record what they were told
#[derive(Default)]
pub struct RecordingCallbacks {
    pub conversation: Mutex<Vec<(String, String)>>,
    pub errors: Mutex<Vec<String>>,
    pub actions: Mutex<Vec<DeviceAction>>,
}

impl SatelliteCallbacks for RecordingCallbacks {
    fn on_conversation_text(&self, role: &str, text: &str) {
        self.conversation
            .lock()
            .unwrap()
            .push((role.to_string(), text.to_string()));
    }

    fn on_pipeline_error(&self, code: &str, _message: &str) {
        self.errors.lock().unwrap().push(code.to_string());
    }

    fn on_device_action(&self, action: DeviceAction) {
        self.actions.lock().unwrap().push(action);
    }
}

/// A satellite driven through channels instead of sockets and hardware
pub struct Harness {
    pub tts: Arc<RecordingOutput>,
    pub media: Arc<RecordingOutput>,
    pub sounds: Arc<RecordingOutput>,
    pub callbacks: Arc<RecordingCallbacks>,
    pub settings: Arc<Settings>,
    pub handle: SatelliteHandle,
    pub state: watch::Receiver<SatelliteState>,
    pub connections: mpsc::Sender<ConnectionEvent>,
    pub audio: mpsc::Sender<AudioEvent>,
    pub hub: mpsc::Receiver<ProtocolMessage>,
    pub cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub async fn start(config: Config) -> Self {
        Self::start_with(config, true).await
    }

    /// Start connected; `subscribe` decides whether the hub listens for voice
    pub async fn start_with(config: Config, subscribe: bool) -> Self {
        let tts = RecordingOutput::new(false);
        let media = RecordingOutput::new(false);
        let sounds = RecordingOutput::new(true);
        let callbacks = Arc::new(RecordingCallbacks::default());
        let (microphone, _frames) = ScriptedMicrophoneFactory::new();

        let io = SatelliteIo {
            tts_output: tts.clone(),
            media_output: media.clone(),
            sound_output: sounds.clone(),
            microphone,
            wake_detectors: Arc::new(PassiveDetectorProvider::new(&config.voice.wake_words)),
            stop_detectors: Arc::new(PassiveDetectorProvider::new(&config.voice.stop_words)),
            callbacks: callbacks.clone(),
        };

        let satellite = Satellite::new(config, io).expect("satellite builds");
        let handle = satellite.handle();
        let state = satellite.subscribe_state();
        let settings = satellite.settings();

        let (connections, connection_rx) = mpsc::channel(16);
        let (audio, audio_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(satellite.drive(connection_rx, audio_rx, cancel.clone()));

        let (hub_tx, hub) = mpsc::channel(64);
        connections
            .send(ConnectionEvent::Connected(HubSender::new(hub_tx)))
            .await
            .unwrap();
        connections
            .send(ConnectionEvent::Voice(
                SubscribeVoiceAssistantRequest {
                    subscribe,
                    flags: 0,
                }
                .into(),
            ))
            .await
            .unwrap();

        let mut harness = Self {
            tts,
            media,
            sounds,
            callbacks,
            settings,
            handle,
            state,
            connections,
            audio,
            hub,
            cancel,
            task,
        };
        harness.wait_state(SatelliteState::Connected).await;
        harness.sync().await;
        harness
    }

    /// Wait until every connection event sent so far was processed
    pub async fn sync(&mut self) {
        self.hub_message(VoiceAssistantConfigurationRequest {}).await;
        loop {
            if let ProtocolMessage::VoiceAssistantConfigurationResponse(_) =
                self.next_hub_message().await
            {
                return;
            }
        }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }

    pub async fn wait_state(&mut self, expected: SatelliteState) {
        tokio::time::timeout(Duration::from_secs(60), self.state.wait_for(|s| *s == expected))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {expected}"))
            .unwrap();
    }

    pub fn current_state(&self) -> SatelliteState {
        *self.state.borrow()
    }

    /// Next message the satellite sent to the hub
    pub async fn next_hub_message(&mut self) -> ProtocolMessage {
        tokio::time::timeout(Duration::from_secs(60), self.hub.recv())
            .await
            .expect("hub message expected")
            .expect("hub channel open")
    }

    /// Assert nothing reaches the hub for a while
    pub async fn expect_hub_silence(&mut self) {
        let received = tokio::time::timeout(Duration::from_millis(200), self.hub.recv()).await;
        assert!(received.is_err(), "unexpected hub message: {received:?}");
    }

    pub async fn voice_event(&self, kind: VoiceAssistantEvent, data: &[(&str, &str)]) {
        self.connections
            .send(ConnectionEvent::Voice(event(kind, data)))
            .await
            .unwrap();
    }

    pub async fn hub_message(&self, message: impl Into<ProtocolMessage>) {
        self.connections
            .send(ConnectionEvent::Voice(message.into()))
            .await
            .unwrap();
    }

    pub async fn wake(&self, phrase: &str, id: &str) {
        self.audio
            .send(AudioEvent::WakeDetected {
                phrase: phrase.to_string(),
                id: id.to_string(),
            })
            .await
            .unwrap();
    }
}

pub fn event(kind: VoiceAssistantEvent, data: &[(&str, &str)]) -> ProtocolMessage {
    VoiceAssistantEventResponse {
        event_type: kind as i32,
        data: data
            .iter()
            .map(|(name, value)| VoiceAssistantEventData {
                name: (*name).to_string(),
                value: (*value).to_string(),
            })
            .collect(),
    }
    .into()
}
