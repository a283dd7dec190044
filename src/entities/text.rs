//! Text entity

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, Setter, StateStream, watch_updates};
use crate::Result;
use crate::proto::{ListEntitiesTextResponse, ProtocolMessage, TextMode, TextStateResponse};

/// Settable string value
pub struct TextEntity {
    info: EntityInfo,
    min_length: u32,
    max_length: u32,
    mode: TextMode,
    state: watch::Receiver<String>,
    on_set: Setter<String>,
}

impl TextEntity {
    /// Create a text entity accepting 0 to 255 characters
    #[must_use]
    pub fn new(info: EntityInfo, state: watch::Receiver<String>, on_set: Setter<String>) -> Self {
        Self {
            info,
            min_length: 0,
            max_length: 255,
            mode: TextMode::Text,
            state,
            on_set,
        }
    }

    #[must_use]
    pub const fn with_length(mut self, min: u32, max: u32) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: TextMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl Entity for TextEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesTextResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            icon: self.info.icon_or_empty(),
            disabled_by_default: self.info.disabled_by_default,
            entity_category: self.info.category_i32(),
            min_length: self.min_length,
            max_length: self.max_length,
            pattern: String::new(),
            mode: self.mode.into(),
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        let ProtocolMessage::TextCommandRequest(command) = message else {
            return Ok(Vec::new());
        };
        if command.key != self.info.key {
            return Ok(Vec::new());
        }

        let length = u32::try_from(command.state.chars().count()).unwrap_or(u32::MAX);
        if length < self.min_length || length > self.max_length {
            tracing::debug!(
                object_id = %self.info.object_id,
                length,
                "ignoring text outside length bounds"
            );
            return Ok(Vec::new());
        }

        (self.on_set)(command.state.clone()).await?;
        Ok(Vec::new())
    }

    fn subscribe(&self) -> StateStream {
        let key = self.info.key;
        watch_updates(self.state.clone(), move |state| {
            TextStateResponse {
                key,
                state,
                missing_state: false,
            }
            .into()
        })
    }
}
