//! Binary sensor entity

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, StateStream, watch_updates};
use crate::Result;
use crate::proto::{BinarySensorStateResponse, ListEntitiesBinarySensorResponse, ProtocolMessage};

/// Read-only on/off value
pub struct BinarySensorEntity {
    info: EntityInfo,
    is_status_binary_sensor: bool,
    state: watch::Sender<bool>,
}

impl BinarySensorEntity {
    #[must_use]
    pub fn new(info: EntityInfo, initial: bool) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            info,
            is_status_binary_sensor: false,
            state,
        }
    }

    /// Mark as the device's connectivity status sensor
    #[must_use]
    pub const fn status(mut self, is_status: bool) -> Self {
        self.is_status_binary_sensor = is_status;
        self
    }

    /// Publish a new value
    pub fn update_state(&self, value: bool) {
        self.state.send_replace(value);
    }

    #[must_use]
    pub fn value(&self) -> bool {
        *self.state.borrow()
    }
}

#[async_trait]
impl Entity for BinarySensorEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesBinarySensorResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            device_class: self.info.device_class_or_empty(),
            is_status_binary_sensor: self.is_status_binary_sensor,
            disabled_by_default: self.info.disabled_by_default,
            icon: self.info.icon_or_empty(),
            entity_category: self.info.category_i32(),
        }
        .into()
    }

    async fn handle(&self, _message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        Ok(Vec::new())
    }

    fn subscribe(&self) -> StateStream {
        let key = self.info.key;
        watch_updates(self.state.subscribe(), move |state| {
            BinarySensorStateResponse {
                key,
                state,
                missing_state: false,
            }
            .into()
        })
    }
}
