//! Entities exposed to the hub
//!
//! Every entity answers three things: what it is (`describe`), what to do
//! with an inbound message (`handle`), and what changed (`subscribe`).
//! The registry broadcasts every inbound message to every entity, so each
//! variant filters by key or message type itself.

mod binary_sensor;
mod button;
mod camera;
pub mod catalog;
mod media_player;
mod number;
mod select;
mod sensor;
mod service;
mod switch;
mod text;
mod text_sensor;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::Result;
use crate::proto::{EntityCategory, ProtocolMessage};

pub use binary_sensor::BinarySensorEntity;
pub use button::ButtonEntity;
pub use camera::{CAMERA_CHUNK_SIZE, CameraEntity};
pub use media_player::MediaPlayerEntity;
pub use number::NumberEntity;
pub use select::{SelectEntity, SelectOptions};
pub use sensor::SensorEntity;
pub use service::{ServiceArg, ServiceEntity, ServiceValue, sanitize_service_name};
pub use switch::SwitchEntity;
pub use text::TextEntity;
pub use text_sensor::TextSensorEntity;

/// Stream of state updates produced by one entity
pub type StateStream = BoxStream<'static, ProtocolMessage>;

/// Async callback receiving a new value from the hub
pub type Setter<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Async zero-argument callback
pub type Action = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Setter`]
pub fn setter<T, F, Fut>(f: F) -> Setter<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |value| Box::pin(f(value)))
}

/// Wrap an async closure as an [`Action`]
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// A capability exposed over the native API
#[async_trait]
pub trait Entity: Send + Sync {
    /// Session-unique numeric id
    fn key(&self) -> u32;

    /// Stable string id
    fn object_id(&self) -> &str;

    /// Descriptor sent in answer to `ListEntitiesRequest`
    fn describe(&self) -> ProtocolMessage;

    /// Handle an inbound message, returning immediate responses
    ///
    /// Messages addressed to other keys or of unrelated types must be
    /// ignored by returning an empty list.
    ///
    /// # Errors
    ///
    /// Returns error if the entity's callback fails
    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>>;

    /// Fresh stream of state updates for one subscriber
    fn subscribe(&self) -> StateStream;
}

/// Identity and static metadata shared by all entity kinds
#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub key: u32,
    pub name: String,
    pub object_id: String,
    pub icon: Option<String>,
    pub device_class: Option<String>,
    pub category: EntityCategory,
    pub disabled_by_default: bool,
}

impl EntityInfo {
    /// Create metadata with no icon, device class or category
    #[must_use]
    pub fn new(key: u32, name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            object_id: object_id.into(),
            icon: None,
            device_class: None,
            category: EntityCategory::None,
            disabled_by_default: false,
        }
    }

    /// Set the icon (e.g. `mdi:microphone`); empty strings are ignored
    #[must_use]
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into()).filter(|i: &String| !i.is_empty());
        self
    }

    /// Set the device class; empty strings are ignored
    #[must_use]
    pub fn device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = Some(class.into()).filter(|c: &String| !c.is_empty());
        self
    }

    #[must_use]
    pub const fn category(mut self, category: EntityCategory) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub const fn disabled_by_default(mut self, disabled: bool) -> Self {
        self.disabled_by_default = disabled;
        self
    }

    pub(crate) fn icon_or_empty(&self) -> String {
        self.icon.clone().unwrap_or_default()
    }

    pub(crate) fn device_class_or_empty(&self) -> String {
        self.device_class.clone().unwrap_or_default()
    }

    pub(crate) fn category_i32(&self) -> i32 {
        self.category.into()
    }
}

/// Stream that yields the current value immediately, then every change
///
/// Intermediate values may be skipped when the subscriber lags; only the
/// latest is delivered.
pub(crate) fn watch_updates<T, F>(rx: watch::Receiver<T>, to_message: F) -> StateStream
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> ProtocolMessage + Send + 'static,
{
    WatchStream::new(rx).map(to_message).boxed()
}

/// Stream that yields only future changes
pub(crate) fn watch_changes<T, F>(rx: watch::Receiver<T>, to_message: F) -> StateStream
where
    T: Clone + Send + Sync + 'static,
    F: Fn(T) -> ProtocolMessage + Send + 'static,
{
    WatchStream::from_changes(rx).map(to_message).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_ignores_empty_optionals() {
        let info = EntityInfo::new(1, "Name", "name").icon("").device_class("");
        assert!(info.icon.is_none());
        assert!(info.device_class.is_none());
        assert_eq!(info.icon_or_empty(), "");
    }

    #[test]
    fn test_info_builder() {
        let info = EntityInfo::new(3, "Volume", "volume")
            .icon("mdi:volume-high")
            .category(EntityCategory::Config);
        assert_eq!(info.icon.as_deref(), Some("mdi:volume-high"));
        assert_eq!(info.category_i32(), 1);
    }
}
