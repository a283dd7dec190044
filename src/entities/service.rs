//! User-defined service entity
//!
//! The hub calls services with a positional argument list. Each argument is
//! read as the type declared at the same position; extra arguments are
//! dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;

use super::{Entity, StateStream};
use crate::Result;
use crate::proto::{
    ExecuteServiceArgument, ListEntitiesServicesArgument, ListEntitiesServicesResponse,
    ProtocolMessage, ServiceArgType,
};

/// Declared service argument
#[derive(Debug, Clone)]
pub struct ServiceArg {
    pub name: String,
    pub arg_type: ServiceArgType,
}

impl ServiceArg {
    #[must_use]
    pub fn new(name: impl Into<String>, arg_type: ServiceArgType) -> Self {
        Self {
            name: name.into(),
            arg_type,
        }
    }
}

/// Argument value after coercion to its declared type
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
}

impl ServiceValue {
    fn coerce(arg: &ExecuteServiceArgument, arg_type: ServiceArgType) -> Self {
        match arg_type {
            ServiceArgType::Bool => Self::Bool(arg.bool_),
            ServiceArgType::Int => {
                Self::Int(if arg.int_ == 0 { arg.legacy_int } else { arg.int_ })
            }
            ServiceArgType::Float => Self::Float(arg.float_),
            _ => Self::String(arg.string_.clone()),
        }
    }

    /// String payload, if this is a string value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

type ServiceCallback =
    Arc<dyn Fn(HashMap<String, ServiceValue>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Hub-callable service with typed arguments
pub struct ServiceEntity {
    key: u32,
    name: String,
    args: Vec<ServiceArg>,
    on_execute: ServiceCallback,
}

/// Name as sent to the hub: spaces removed, hyphens to underscores, lower-cased
#[must_use]
pub fn sanitize_service_name(name: &str) -> String {
    name.replace(' ', "").replace('-', "_").to_lowercase()
}

impl ServiceEntity {
    pub fn new<F, Fut>(key: u32, name: impl Into<String>, args: Vec<ServiceArg>, on_execute: F) -> Self
    where
        F: Fn(HashMap<String, ServiceValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        Self {
            key,
            name: sanitize_service_name(&name),
            args,
            on_execute: Arc::new(move |values| Box::pin(on_execute(values))),
        }
    }
}

#[async_trait]
impl Entity for ServiceEntity {
    fn key(&self) -> u32 {
        self.key
    }

    fn object_id(&self) -> &str {
        &self.name
    }

    fn describe(&self) -> ProtocolMessage {
        ListEntitiesServicesResponse {
            name: self.name.clone(),
            key: self.key,
            args: self
                .args
                .iter()
                .map(|arg| ListEntitiesServicesArgument {
                    name: arg.name.clone(),
                    r#type: arg.arg_type.into(),
                })
                .collect(),
        }
        .into()
    }

    async fn handle(&self, message: &ProtocolMessage) -> Result<Vec<ProtocolMessage>> {
        let ProtocolMessage::ExecuteServiceRequest(request) = message else {
            return Ok(Vec::new());
        };
        if request.key != self.key {
            return Ok(Vec::new());
        }

        let values: HashMap<String, ServiceValue> = self
            .args
            .iter()
            .zip(&request.args)
            .map(|(decl, arg)| (decl.name.clone(), ServiceValue::coerce(arg, decl.arg_type)))
            .collect();

        tracing::debug!(service = %self.name, args = values.len(), "executing service");
        (self.on_execute)(values).await?;
        Ok(Vec::new())
    }

    fn subscribe(&self) -> StateStream {
        futures::stream::empty().boxed()
    }
}
