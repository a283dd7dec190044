//! Media player entity
//!
//! Mirrors hub media commands onto the player façade. State changes are
//! event-backed: subscribers see only changes made after they subscribed,
//! and `SubscribeHomeAssistantStatesRequest` asks for the current state
//! explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, StateStream, watch_changes};
use crate::Result;
use crate::proto::{
    ListEntitiesMediaPlayerResponse, MediaPlayerCommand, MediaPlayerCommandRequest,
    MediaPlayerState, MediaPlayerStateResponse, ProtocolMessage,
};
use crate::voice::{PlaybackListener, VoiceSatellitePlayer};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    state: MediaPlayerState,
    volume: f32,
    muted: bool,
}

/// Returns the entity to idle when media playback ends on its own
struct IdleOnFinish(watch::Sender<Snapshot>);

impl PlaybackListener for IdleOnFinish {
    fn on_finished(&self) {
        self.0.send_if_modified(|s| {
            let changed = s.state != MediaPlayerState::Idle;
            s.state = MediaPlayerState::Idle;
            changed
        });
    }
}

/// Hub-controlled media player
pub struct MediaPlayerEntity {
    info: EntityInfo,
    player: Arc<VoiceSatellitePlayer>,
    state: watch::Sender<Snapshot>,
}

impl MediaPlayerEntity {
    #[must_use]
    pub fn new(info: EntityInfo, player: Arc<VoiceSatellitePlayer>) -> Self {
        let (state, _) = watch::channel(Snapshot {
            state: MediaPlayerState::Idle,
            volume: player.volume(),
            muted: player.is_muted(),
        });
        Self {
            info,
            player,
            state,
        }
    }

    /// Current playback state
    #[must_use]
    pub fn playback_state(&self) -> MediaPlayerState {
        self.state.borrow().state
    }

    fn state_response(key: u32, snapshot: Snapshot) -> ProtocolMessage {
        MediaPlayerStateResponse {
            key,
            state: snapshot.state.into(),
            volume: snapshot.volume,
            muted: snapshot.muted,
        }
        .into()
    }

    fn set_state(&self, state: MediaPlayerState) {
        self.state.send_if_modified(|s| {
            let changed = s.state != state;
            s.state = state;
            changed
        });
    }

    fn apply(&self, command: &MediaPlayerCommandRequest) {
        if command.has_media_url {
            let listener: Arc<dyn PlaybackListener> = Arc::new(IdleOnFinish(self.state.clone()));
            self.player.play_media(&command.media_url, Some(listener));
            self.set_state(MediaPlayerState::Playing);
        } else if command.has_command {
            match MediaPlayerCommand::try_from(command.command) {
                Ok(MediaPlayerCommand::Play) => {
                    if self.playback_state() == MediaPlayerState::Paused {
                        self.player.resume_media();
                        self.set_state(MediaPlayerState::Playing);
                    }
                }
                Ok(MediaPlayerCommand::Pause) => {
                    if self.playback_state() == MediaPlayerState::Playing {
                        self.player.pause_media();
                        self.set_state(MediaPlayerState::Paused);
                    }
                }
                Ok(MediaPlayerCommand::Stop) => {
                    self.player.stop_media();
                    self.set_state(MediaPlayerState::Idle);
                }
                Ok(MediaPlayerCommand::Mute) => {
                    self.player.set_muted(true);
                    self.state.send_modify(|s| s.muted = true);
                }
                Ok(MediaPlayerCommand::Unmute) => {
                    // Volume set while muted was only cached
                    let volume = self.state.borrow().volume;
                    self.player.set_volume(volume);
                    self.player.set_muted(false);
                    self.state.send_modify(|s| s.muted = false);
                }
                Err(_) => {
                    tracing::debug!(command = command.command, "unknown media player command");
                }
            }
        }

        if command.has_volume && command.volume.is_finite() {
            let volume = command.volume.clamp(0.0, 1.0);
            if !self.state.borrow().muted {
                self.player.set_volume(volume);
            }
            self.state.send_modify(|s| s.volume = volume);
        }
    }
}

#[async_trait]
impl Entity for MediaPlayerEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesMediaPlayerResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            icon: self.info.icon_or_empty(),
            disabled_by_default: self.info.disabled_by_default,
            entity_category: self.info.category_i32(),
            supports_pause: true,
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        match message {
            ProtocolMessage::SubscribeHomeAssistantStatesRequest(_) => {
                let snapshot = *self.state.borrow();
                Ok(vec![Self::state_response(self.info.key, snapshot)])
            }
            ProtocolMessage::MediaPlayerCommandRequest(command) if command.key == self.info.key => {
                self.apply(command);
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn subscribe(&self) -> StateStream {
        let key = self.info.key;
        watch_changes(self.state.subscribe(), move |snapshot| {
            Self::state_response(key, snapshot)
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::Config;
    use crate::settings::Settings;
    use crate::voice::AudioOutput;
    use crate::voice::testing::FakeOutput;

    fn entity() -> (MediaPlayerEntity, Arc<FakeOutput>) {
        let settings = Settings::from_config(&Config::default());
        let media = FakeOutput::new();
        let player = Arc::new(VoiceSatellitePlayer::new(
            FakeOutput::new(),
            media.clone(),
            FakeOutput::new(),
            settings.player.clone(),
            0.5,
        ));
        (
            MediaPlayerEntity::new(EntityInfo::new(0, "Media Player", "media_player"), player),
            media,
        )
    }

    fn command(f: impl FnOnce(&mut MediaPlayerCommandRequest)) -> ProtocolMessage {
        let mut request = MediaPlayerCommandRequest {
            key: 0,
            ..Default::default()
        };
        f(&mut request);
        request.into()
    }

    fn state_of(message: &ProtocolMessage) -> MediaPlayerStateResponse {
        let ProtocolMessage::MediaPlayerStateResponse(state) = message else {
            panic!("expected media player state");
        };
        state.clone()
    }

    #[tokio::test]
    async fn test_play_pause_resume_and_finish() {
        let (entity, media) = entity();
        let mut updates = entity.subscribe();

        entity
            .handle(&command(|c| {
                c.has_media_url = true;
                c.media_url = "http://x/song.mp3".to_string();
            }))
            .await
            .unwrap();
        assert_eq!(media.plays(), vec![vec!["http://x/song.mp3".to_string()]]);
        assert_eq!(state_of(&updates.next().await.unwrap()).state, MediaPlayerState::Playing as i32);

        let pause = command(|c| {
            c.has_command = true;
            c.command = MediaPlayerCommand::Pause.into();
        });
        entity.handle(&pause).await.unwrap();
        assert_eq!(entity.playback_state(), MediaPlayerState::Paused);

        let play = command(|c| {
            c.has_command = true;
            c.command = MediaPlayerCommand::Play.into();
        });
        entity.handle(&play).await.unwrap();
        assert_eq!(entity.playback_state(), MediaPlayerState::Playing);

        media.finish();
        assert_eq!(entity.playback_state(), MediaPlayerState::Idle);
    }

    #[tokio::test]
    async fn test_volume_cached_while_muted() {
        let (entity, media) = entity();
        let mute = command(|c| {
            c.has_command = true;
            c.command = MediaPlayerCommand::Mute.into();
        });
        entity.handle(&mute).await.unwrap();

        entity
            .handle(&command(|c| {
                c.has_volume = true;
                c.volume = 0.3;
            }))
            .await
            .unwrap();
        assert!(media.volume().abs() < f32::EPSILON);

        let unmute = command(|c| {
            c.has_command = true;
            c.command = MediaPlayerCommand::Unmute.into();
        });
        entity.handle(&unmute).await.unwrap();
        assert!((media.volume() - 0.3).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_current_state_on_home_assistant_subscribe() {
        let (entity, _) = entity();
        let responses = entity
            .handle(&crate::proto::SubscribeHomeAssistantStatesRequest {}.into())
            .await
            .unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(state_of(&responses[0]).state, MediaPlayerState::Idle as i32);
    }

    #[tokio::test]
    async fn test_other_key_ignored() {
        let (entity, media) = entity();
        let mut request = MediaPlayerCommandRequest {
            key: 7,
            has_media_url: true,
            media_url: "http://x/a.mp3".to_string(),
            ..Default::default()
        };
        entity.handle(&request.clone().into()).await.unwrap();
        assert!(media.plays().is_empty());

        request.key = 0;
        entity.handle(&request.into()).await.unwrap();
        assert_eq!(media.plays().len(), 1);
    }
}
