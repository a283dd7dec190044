//! Switch entity

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, Setter, StateStream, watch_updates};
use crate::Result;
use crate::proto::{ListEntitiesSwitchResponse, ProtocolMessage, SwitchStateResponse};

/// On/off switch backed by an observable value
pub struct SwitchEntity {
    info: EntityInfo,
    state: watch::Receiver<bool>,
    on_set: Setter<bool>,
}

impl SwitchEntity {
    /// Create a switch reading `state` and writing through `on_set`
    #[must_use]
    pub fn new(info: EntityInfo, state: watch::Receiver<bool>, on_set: Setter<bool>) -> Self {
        Self {
            info,
            state,
            on_set,
        }
    }
}

#[async_trait]
impl Entity for SwitchEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesSwitchResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            icon: self.info.icon_or_empty(),
            assumed_state: false,
            disabled_by_default: self.info.disabled_by_default,
            entity_category: self.info.category_i32(),
            device_class: self.info.device_class_or_empty(),
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        let ProtocolMessage::SwitchCommandRequest(command) = message else {
            return Ok(Vec::new());
        };
        if command.key != self.info.key {
            return Ok(Vec::new());
        }

        (self.on_set)(command.state).await?;

        Ok(vec![
            SwitchStateResponse {
                key: self.info.key,
                state: command.state,
            }
            .into(),
        ])
    }

    fn subscribe(&self) -> StateStream {
        let key = self.info.key;
        watch_updates(self.state.clone(), move |state| {
            SwitchStateResponse { key, state }.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::StreamExt;

    use super::*;
    use crate::entities::setter;
    use crate::proto::SwitchCommandRequest;

    fn switch(key: u32, initial: bool) -> (SwitchEntity, watch::Sender<bool>, Arc<AtomicBool>) {
        let (tx, rx) = watch::channel(initial);
        let written = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&written);
        let entity = SwitchEntity::new(
            EntityInfo::new(key, "Mute", "mute"),
            rx,
            setter(move |v: bool| {
                let flag = Arc::clone(&flag);
                async move {
                    flag.store(v, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        (entity, tx, written)
    }

    #[tokio::test]
    async fn test_command_echoes_state() {
        let (entity, _tx, written) = switch(1, false);
        let responses = entity
            .handle(&SwitchCommandRequest { key: 1, state: true }.into())
            .await
            .unwrap();

        assert!(written.load(Ordering::SeqCst));
        assert_eq!(
            responses,
            vec![ProtocolMessage::SwitchStateResponse(SwitchStateResponse {
                key: 1,
                state: true
            })]
        );
    }

    #[tokio::test]
    async fn test_other_key_ignored() {
        let (entity, _tx, written) = switch(1, false);
        let responses = entity
            .handle(&SwitchCommandRequest { key: 2, state: true }.into())
            .await
            .unwrap();
        assert!(responses.is_empty());
        assert!(!written.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_subscriber_gets_current_value() {
        let (entity, tx, _) = switch(4, true);
        let mut updates = entity.subscribe();
        assert_eq!(
            updates.next().await,
            Some(SwitchStateResponse { key: 4, state: true }.into())
        );

        tx.send(false).unwrap();
        assert_eq!(
            updates.next().await,
            Some(SwitchStateResponse { key: 4, state: false }.into())
        );
    }
}
