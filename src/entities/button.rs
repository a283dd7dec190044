//! Button entity

use async_trait::async_trait;
use futures::StreamExt;

use super::{Action, Entity, EntityInfo, StateStream};
use crate::Result;
use crate::proto::{ListEntitiesButtonResponse, ProtocolMessage};

/// Momentary action with no state
pub struct ButtonEntity {
    info: EntityInfo,
    on_press: Action,
}

impl ButtonEntity {
    #[must_use]
    pub fn new(info: EntityInfo, on_press: Action) -> Self {
        Self { info, on_press }
    }
}

#[async_trait]
impl Entity for ButtonEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesButtonResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            icon: self.info.icon_or_empty(),
            disabled_by_default: self.info.disabled_by_default,
            entity_category: self.info.category_i32(),
            device_class: self.info.device_class_or_empty(),
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        let ProtocolMessage::ButtonCommandRequest(command) = message else {
            return Ok(Vec::new());
        };
        if command.key == self.info.key {
            tracing::debug!(object_id = %self.info.object_id, "button pressed");
            (self.on_press)().await?;
        }
        Ok(Vec::new())
    }

    fn subscribe(&self) -> StateStream {
        futures::stream::empty().boxed()
    }
}
