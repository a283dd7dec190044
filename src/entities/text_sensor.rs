//! Text sensor entity

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, StateStream, watch_updates};
use crate::Result;
use crate::proto::{ListEntitiesTextSensorResponse, ProtocolMessage, TextSensorStateResponse};

/// Read-only string value
pub struct TextSensorEntity {
    info: EntityInfo,
    state: watch::Sender<String>,
}

impl TextSensorEntity {
    #[must_use]
    pub fn new(info: EntityInfo, initial: impl Into<String>) -> Self {
        let (state, _) = watch::channel(initial.into());
        Self { info, state }
    }

    /// Publish a new value
    pub fn update_state(&self, value: impl Into<String>) {
        self.state.send_replace(value.into());
    }

    #[must_use]
    pub fn value(&self) -> String {
        self.state.borrow().clone()
    }
}

#[async_trait]
impl Entity for TextSensorEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesTextSensorResponse {
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

    async fn handle(&self, _message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        Ok(Vec::new())
    }

    fn subscribe(&self) -> StateStream {
        let key = self.info.key;
        watch_updates(self.state.subscribe(), move |state| {
            TextSensorStateResponse {
                key,
                state,
                missing_state: false,
            }
            .into()
        })
    }
}
