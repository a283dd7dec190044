//! Numeric sensor entity

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, StateStream, watch_updates};
use crate::Result;
use crate::proto::{
    ListEntitiesSensorResponse, ProtocolMessage, SensorStateClass, SensorStateResponse,
};

/// Read-only numeric value pushed by a poller
pub struct SensorEntity {
    info: EntityInfo,
    unit: Option<String>,
    accuracy_decimals: i32,
    state_class: SensorStateClass,
    state: watch::Sender<f32>,
}

impl SensorEntity {
    /// Create a measurement sensor starting at `initial`
    #[must_use]
    pub fn new(info: EntityInfo, initial: f32) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            info,
            unit: None,
            accuracy_decimals: 0,
            state_class: SensorStateClass::Measurement,
            state,
        }
    }

    /// Set the unit of measurement (e.g. `s`, `%`)
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into()).filter(|u: &String| !u.is_empty());
        self
    }

    #[must_use]
    pub const fn with_accuracy_decimals(mut self, decimals: i32) -> Self {
        self.accuracy_decimals = decimals;
        self
    }

    #[must_use]
    pub const fn with_state_class(mut self, class: SensorStateClass) -> Self {
        self.state_class = class;
        self
    }

    /// Publish a new reading; every call emits one update
    pub fn update_state(&self, value: f32) {
        self.state.send_replace(value);
    }

    /// Last published reading
    #[must_use]
    pub fn value(&self) -> f32 {
        *self.state.borrow()
    }
}

#[async_trait]
impl Entity for SensorEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesSensorResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            icon: self.info.icon_or_empty(),
            unit_of_measurement: self.unit.clone().unwrap_or_default(),
            accuracy_decimals: self.accuracy_decimals,
            force_update: false,
            device_class: self.info.device_class_or_empty(),
            state_class: self.state_class.into(),
            disabled_by_default: self.info.disabled_by_default,
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
            SensorStateResponse {
                key,
                state,
                missing_state: false,
            }
            .into()
        })
    }
}
