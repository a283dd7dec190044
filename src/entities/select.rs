//! Select entity

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Entity, EntityInfo, Setter, StateStream, watch_updates};
use crate::Result;
use crate::proto::{ListEntitiesSelectResponse, ProtocolMessage, SelectStateResponse};

/// Where a select's option list comes from
#[derive(Clone)]
pub enum SelectOptions {
    /// Fixed at construction
    Static(Vec<String>),
    /// Evaluated on every describe and command
    Dynamic(Arc<dyn Fn() -> Vec<String> + Send + Sync>),
}

impl SelectOptions {
    fn resolve(&self) -> Vec<String> {
        match self {
            Self::Static(options) => options.clone(),
            Self::Dynamic(provider) => provider(),
        }
    }
}

/// One-of-many string choice
pub struct SelectEntity {
    info: EntityInfo,
    options: SelectOptions,
    state: watch::Receiver<String>,
    on_set: Setter<String>,
}

impl SelectEntity {
    #[must_use]
    pub fn new(
        info: EntityInfo,
        options: SelectOptions,
        state: watch::Receiver<String>,
        on_set: Setter<String>,
    ) -> Self {
        Self {
            info,
            options,
            state,
            on_set,
        }
    }
}

#[async_trait]
impl Entity for SelectEntity {
    fn key(&self) -> u32 {
        self.info.key
    }

    fn object_id(&self) -> &str {
        &self.info.object_id
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesSelectResponse {
            object_id: self.info.object_id.clone(),
            key: self.info.key,
            name: self.info.name.clone(),
            unique_id: self.info.object_id.clone(),
            icon: self.info.icon_or_empty(),
            options: self.options.resolve(),
            disabled_by_default: self.info.disabled_by_default,
            entity_category: self.info.category_i32(),
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        let ProtocolMessage::SelectCommandRequest(command) = message else {
            return Ok(Vec::new());
        };
        if command.key != self.info.key {
            return Ok(Vec::new());
        }
        if !self.options.resolve().contains(&command.state) {
            tracing::debug!(
                object_id = %self.info.object_id,
                option = %command.state,
                "ignoring unknown select option"
            );
            return Ok(Vec::new());
        }

        (self.on_set)(command.state.clone()).await?;
        Ok(Vec::new())
    }

    fn subscribe(&self) -> StateStream {
        let key = self.info.key;
        watch_updates(self.state.clone(), move |state| {
            SelectStateResponse {
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
    use std::sync::Mutex;

    use super::*;
    use crate::entities::setter;
    use crate::proto::SelectCommandRequest;

    fn select(written: Arc<Mutex<Vec<String>>>) -> SelectEntity {
        let (_tx, rx) = watch::channel("okay_nabu".to_string());
        SelectEntity::new(
            EntityInfo::new(4, "Wake Word", "wake_word"),
            SelectOptions::Dynamic(Arc::new(|| {
                vec!["okay_nabu".to_string(), "hey_jarvis".to_string()]
            })),
            rx,
            setter(move |v: String| {
                let written = Arc::clone(&written);
                async move {
                    written.lock().unwrap().push(v);
                    Ok(())
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_unknown_option_ignored() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let entity = select(Arc::clone(&written));

        let command = |state: &str| -> ProtocolMessage {
            SelectCommandRequest {
                key: 4,
                state: state.to_string(),
            }
            .into()
        };
        entity.handle(&command("alexa")).await.unwrap();
        entity.handle(&command("hey_jarvis")).await.unwrap();

        assert_eq!(*written.lock().unwrap(), vec!["hey_jarvis".to_string()]);
    }

    #[test]
    fn test_dynamic_options_in_descriptor() {
        let entity = select(Arc::new(Mutex::new(Vec::new())));
        let ProtocolMessage::ListEntitiesSelectResponse(d) = entity.describe() else {
            panic!("wrong descriptor type");
        };
        assert_eq!(d.options, vec!["okay_nabu", "hey_jarvis"]);
    }
}
