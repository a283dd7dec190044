//! Default entity set of a voice satellite
//!
//! Entities are bound to the shared settings cells, so a command from the hub
//! and a change made anywhere else in the process look the same to
//! subscribers.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{
    Action, BinarySensorEntity, ButtonEntity, CameraEntity, Entity, EntityInfo,
    MediaPlayerEntity, NumberEntity, SelectEntity, SelectOptions, SensorEntity, ServiceArg,
    ServiceEntity, SwitchEntity, TextEntity, TextSensorEntity, setter,
};
use crate::device::EntityRegistry;
use crate::proto::{EntityCategory, NumberMode, SensorStateClass, ServiceArgType};
use crate::settings::{SettingState, Settings};
use crate::voice::{SatelliteState, VoiceSatellitePlayer, WakeWordInfo};

pub const MEDIA_PLAYER_KEY: u32 = 0;
pub const MUTE_MICROPHONE_KEY: u32 = 1;
pub const WAKE_SOUND_KEY: u32 = 2;
pub const MICROPHONE_VOLUME_KEY: u32 = 3;
pub const WAKE_WORD_KEY: u32 = 4;
pub const START_CONVERSATION_KEY: u32 = 5;
pub const ASSIST_STATE_KEY: u32 = 6;
pub const ASSIST_IN_PROGRESS_KEY: u32 = 7;
pub const UPTIME_KEY: u32 = 8;
pub const DASHBOARD_URL_KEY: u32 = 9;
pub const PLAY_SOUND_KEY: u32 = 10;
pub const CAMERA_KEY: u32 = 11;
pub const CAMERA_ENABLED_KEY: u32 = 12;

/// Collaborators the catalog binds entities to
pub struct CatalogDeps {
    pub settings: Arc<Settings>,
    pub player: Arc<VoiceSatellitePlayer>,
    /// Wake words the detector can recognize
    pub wake_words: Vec<WakeWordInfo>,
    /// Invoked by the start-conversation button
    pub start_conversation: Action,
}

/// The satellite's entities plus handles to the ones fed from outside
pub struct SatelliteEntities {
    pub media_player: Arc<MediaPlayerEntity>,
    pub assist_state: Arc<TextSensorEntity>,
    pub assist_in_progress: Arc<BinarySensorEntity>,
    pub uptime: Arc<SensorEntity>,
    pub camera: Arc<CameraEntity>,
    settings: Arc<Settings>,
    wake_word: watch::Sender<String>,
    entities: Vec<Arc<dyn Entity>>,
}

fn bool_setting(setting: &SettingState<bool>) -> super::Setter<bool> {
    let setting = setting.clone();
    setter(move |value: bool| {
        let setting = setting.clone();
        async move {
            setting.set(value);
            Ok(())
        }
    })
}

fn first_or_empty(words: &[String]) -> String {
    words.first().cloned().unwrap_or_default()
}

impl SatelliteEntities {
    /// Build the catalog in key order
    #[must_use]
    pub fn build(deps: CatalogDeps) -> Self {
        let CatalogDeps {
            settings,
            player,
            wake_words,
            start_conversation,
        } = deps;
        let microphone = &settings.microphone;

        let media_player = Arc::new(MediaPlayerEntity::new(
            EntityInfo::new(MEDIA_PLAYER_KEY, "Media Player", "media_player"),
            Arc::clone(&player),
        ));

        let mute = SwitchEntity::new(
            EntityInfo::new(MUTE_MICROPHONE_KEY, "Mute Microphone", "mute")
                .icon("mdi:microphone-off")
                .category(EntityCategory::Config),
            microphone.muted.subscribe(),
            bool_setting(&microphone.muted),
        );

        let wake_sound = SwitchEntity::new(
            EntityInfo::new(WAKE_SOUND_KEY, "Play Wake Sound", "wake_sound")
                .icon("mdi:bell-ring")
                .category(EntityCategory::Config),
            settings.player.enable_wake_sound.subscribe(),
            bool_setting(&settings.player.enable_wake_sound),
        );

        let volume_setting = microphone.volume.clone();
        let microphone_volume = NumberEntity::new(
            EntityInfo::new(MICROPHONE_VOLUME_KEY, "Microphone Volume", "microphone_volume")
                .icon("mdi:microphone-plus")
                .category(EntityCategory::Config),
            microphone.volume.subscribe(),
            setter(move |value: f32| {
                let setting = volume_setting.clone();
                async move {
                    setting.set(value.clamp(0.0, 2.0));
                    Ok(())
                }
            }),
        )
        .with_range(0.0, 2.0, 0.1)
        .with_mode(NumberMode::Slider);

        let (wake_word, wake_word_rx) =
            watch::channel(first_or_empty(&microphone.wake_words.get()));
        let wake_words_setting = microphone.wake_words.clone();
        let wake_word_select = SelectEntity::new(
            EntityInfo::new(WAKE_WORD_KEY, "Wake Word", "wake_word")
                .icon("mdi:account-voice")
                .category(EntityCategory::Config),
            SelectOptions::Static(wake_words.iter().map(|w| w.id.clone()).collect()),
            wake_word_rx,
            setter(move |id: String| {
                let setting = wake_words_setting.clone();
                async move {
                    setting.set(vec![id]);
                    Ok(())
                }
            }),
        );

        let start_button = ButtonEntity::new(
            EntityInfo::new(START_CONVERSATION_KEY, "Start Conversation", "start_conversation")
                .icon("mdi:chat-processing"),
            start_conversation,
        );

        let assist_state = Arc::new(TextSensorEntity::new(
            EntityInfo::new(ASSIST_STATE_KEY, "Assist State", "assist_state")
                .icon("mdi:state-machine"),
            SatelliteState::Disconnected.as_str(),
        ));

        let assist_in_progress = Arc::new(BinarySensorEntity::new(
            EntityInfo::new(ASSIST_IN_PROGRESS_KEY, "Assist In Progress", "assist_in_progress")
                .device_class("running"),
            false,
        ));

        let uptime = Arc::new(
            SensorEntity::new(
                EntityInfo::new(UPTIME_KEY, "Uptime", "uptime")
                    .icon("mdi:timer-outline")
                    .device_class("duration")
                    .category(EntityCategory::Diagnostic),
                0.0,
            )
            .with_unit("s")
            .with_accuracy_decimals(0)
            .with_state_class(SensorStateClass::TotalIncreasing),
        );

        let dashboard_setting = settings.display.dashboard_url.clone();
        let dashboard_url = TextEntity::new(
            EntityInfo::new(DASHBOARD_URL_KEY, "Dashboard URL", "dashboard_url")
                .icon("mdi:web")
                .category(EntityCategory::Config),
            settings.display.dashboard_url.subscribe(),
            setter(move |url: String| {
                let setting = dashboard_setting.clone();
                async move {
                    setting.set(url);
                    Ok(())
                }
            }),
        );

        let sound_player = Arc::clone(&player);
        let play_sound = ServiceEntity::new(
            PLAY_SOUND_KEY,
            "play_sound",
            vec![ServiceArg::new("url", ServiceArgType::String)],
            move |args| {
                let player = Arc::clone(&sound_player);
                async move {
                    match args.get("url").and_then(|v| v.as_str()) {
                        Some(url) if !url.is_empty() => player.play_sound(url),
                        _ => tracing::debug!("play_sound called without url"),
                    }
                    Ok(())
                }
            },
        );

        let camera = Arc::new(CameraEntity::new(
            EntityInfo::new(CAMERA_KEY, "Camera", "camera").icon("mdi:camera"),
        ));

        let camera_enabled = SwitchEntity::new(
            EntityInfo::new(CAMERA_ENABLED_KEY, "Enable Camera", "camera_enabled")
                .icon("mdi:camera-off")
                .category(EntityCategory::Config),
            settings.camera.enabled.subscribe(),
            bool_setting(&settings.camera.enabled),
        );

        let fixed: [Arc<dyn Entity>; 11] = [
            media_player.clone(),
            Arc::new(mute),
            Arc::new(wake_sound),
            Arc::new(microphone_volume),
            Arc::new(wake_word_select),
            Arc::new(start_button),
            assist_state.clone(),
            assist_in_progress.clone(),
            uptime.clone(),
            Arc::new(dashboard_url),
            Arc::new(play_sound),
        ];
        let mut entities = Vec::from(fixed);
        if settings.camera.enabled.get() {
            entities.push(camera.clone());
        }
        entities.push(Arc::new(camera_enabled));

        Self {
            media_player,
            assist_state,
            assist_in_progress,
            uptime,
            camera,
            settings,
            wake_word,
            entities,
        }
    }

    /// Entities to register at startup, in key order
    #[must_use]
    pub fn entities(&self) -> &[Arc<dyn Entity>] {
        &self.entities
    }

    /// Add or remove the camera as its setting changes, until cancelled
    pub async fn track_camera(&self, registry: Arc<EntityRegistry>, cancel: CancellationToken) {
        let camera: Arc<dyn Entity> = self.camera.clone();
        follow_capability(self.settings.camera.enabled.subscribe(), camera, registry, cancel).await;
    }

    fn apply_state(&self, state: SatelliteState) {
        self.assist_state.update_state(state.as_str());
        self.assist_in_progress.update_state(state.is_active());
    }

    /// Keep derived entities in step with the satellite until cancelled
    pub async fn mirror(&self, mut state: watch::Receiver<SatelliteState>, cancel: CancellationToken) {
        let mut wake_words = self.settings.microphone.wake_words.subscribe();
        let current = *state.borrow_and_update();
        self.apply_state(current);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    self.apply_state(current);
                }
                changed = wake_words.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let first = first_or_empty(&wake_words.borrow_and_update());
                    self.wake_word.send_if_modified(|current| {
                        let modified = *current != first;
                        *current = first;
                        modified
                    });
                }
            }
        }
    }
}

/// Keep `entity` registered exactly while `enabled` is true
///
/// Runs until cancelled or the setting is dropped.
pub async fn follow_capability(
    mut enabled: watch::Receiver<bool>,
    entity: Arc<dyn Entity>,
    registry: Arc<EntityRegistry>,
    cancel: CancellationToken,
) {
    let key = entity.key();
    loop {
        let on = *enabled.borrow_and_update();
        if on && !registry.contains(key) {
            match registry.add(Arc::clone(&entity)) {
                Ok(()) => tracing::info!(key, object_id = entity.object_id(), "capability enabled"),
                Err(e) => tracing::warn!(key, error = %e, "failed to register entity"),
            }
        } else if !on && registry.remove(key) {
            tracing::info!(key, object_id = entity.object_id(), "capability disabled");
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            changed = enabled.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
