//! Number entity

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, Setter, StateStream, watch_updates};
use crate::Result;
use crate::proto::{ListEntitiesNumberResponse, NumberMode, NumberStateResponse, ProtocolMessage};

/// Settable numeric value within a range
pub struct NumberEntity {
    info: EntityInfo,
    min: f32,
    max: f32,
    step: f32,
    unit: Option<String>,
    mode: NumberMode,
    state: watch::Receiver<f32>,
    on_set: Setter<f32>,
}

impl NumberEntity {
    /// Create a number with range 0..=100, step 1, box mode
    #[must_use]
    pub fn new(info: EntityInfo, state: watch::Receiver<f32>, on_set: Setter<f32>) -> Self {
        Self {
            info,
            min: 0.0,
            max: 100.0,
            step: 1.0,
            unit: None,
            mode: NumberMode::Box,
            state,
            on_set,
        }
    }

    /// Set the accepted range; reversed bounds are swapped
    #[must_use]
    pub fn with_range(mut self, min: f32, max: f32, step: f32) -> Self {
        let (min, max) = if min > max { (max, min) } else { (min, max) };
        self.min = min;
        self.max = max;
        self.step = step;
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into()).filter(|u: &String| !u.is_empty());
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: NumberMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl Entity for NumberEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesNumberResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            icon: self.info.icon_or_empty(),
            min_value: self.min,
            max_value: self.max,
            step: self.step,
            disabled_by_default: self.info.disabled_by_default,
            entity_category: self.info.category_i32(),
            unit_of_measurement: self.unit.clone().unwrap_or_default(),
            mode: self.mode.into(),
            device_class: self.info.device_class_or_empty(),
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        let ProtocolMessage::NumberCommandRequest(command) = message else {
            return Ok(Vec::new());
        };
        if command.key != self.info.key {
            return Ok(Vec::new());
        }
        if !command.state.is_finite() {
            tracing::debug!(object_id = %self.info.object_id, "ignoring non-finite number");
            return Ok(Vec::new());
        }

        (self.on_set)(command.state.max(self.min).min(self.max)).await?;
        Ok(Vec::new())
    }

    fn subscribe(&self) -> StateStream {
        let key = self.info.key;
        watch_updates(self.state.clone(), move |state| {
            NumberStateResponse {
                key,
                state,
                missing_state: false,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::entities::setter;
    use crate::proto::NumberCommandRequest;

    #[tokio::test]
    async fn test_command_clamped_to_range() {
        let (_tx, rx) = watch::channel(1.0_f32);
        let written = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&written);
        let number = NumberEntity::new(
            EntityInfo::new(3, "Microphone Volume", "microphone_volume"),
            rx,
            setter(move |v: f32| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() = Some(v);
                    Ok(())
                }
            }),
        )
        .with_range(0.0, 2.0, 0.1);

        number
            .handle(&NumberCommandRequest { key: 3, state: 9.0 }.into())
            .await
            .unwrap();
        assert_eq!(*written.lock().unwrap(), Some(2.0));
    }

    #[test]
    fn test_describe_defaults() {
        let (_tx, rx) = watch::channel(0.0_f32);
        let number = NumberEntity::new(
            EntityInfo::new(1, "Level", "level"),
            rx,
            setter(|_: f32| async { Ok(()) }),
        );
        let ProtocolMessage::ListEntitiesNumberResponse(d) = number.describe() else {
            panic!("wrong descriptor type");
        };
        assert!((d.max_value - 100.0).abs() < f32::EPSILON);
        assert!((d.step - 1.0).abs() < f32::EPSILON);
        assert_eq!(d.mode, NumberMode::Box as i32);
    }

    #[tokio::test]
    async fn test_reversed_range_is_swapped() {
        let (_tx, rx) = watch::channel(1.0_f32);
        let written = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&written);
        let number = NumberEntity::new(
            EntityInfo::new(3, "Microphone Volume", "microphone_volume"),
            rx,
            setter(move |v: f32| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() = Some(v);
                    Ok(())
                }
            }),
        )
        .with_range(2.0, 0.0, 0.1);

        let ProtocolMessage::ListEntitiesNumberResponse(described) = number.describe() else {
            panic!("expected number descriptor");
        };
        assert_eq!((described.min_value, described.max_value), (0.0, 2.0));

        number
            .handle(&NumberCommandRequest { key: 3, state: -4.0 }.into())
            .await
            .unwrap();
        assert_eq!(*written.lock().unwrap(), Some(0.0));
    }
}
