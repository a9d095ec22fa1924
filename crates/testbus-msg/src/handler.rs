//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Handler capability trait and declarations."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::channel::ChannelSpec;
use crate::types::DeliveryContext;
use crate::DeliveryMode;

/// Outcome of a handler: an optional return value, or a failure.
pub type HandlerResult = anyhow::Result<Option<JsonValue>>;

/// Capability shared by every message handler: accept a payload plus its
/// delivery context, then return or fail.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one delivered message.
    async fn handle(&self, payload: JsonValue, context: DeliveryContext) -> HandlerResult;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F> {
    func: F,
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(JsonValue, DeliveryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { func }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(JsonValue, DeliveryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, payload: JsonValue, context: DeliveryContext) -> HandlerResult {
        (self.func)(payload, context).await
    }
}

/// Application-side declaration of one handler binding.
#[derive(Clone)]
pub struct HandlerDeclaration {
    pub(crate) name: String,
    pub(crate) spec: ChannelSpec,
    pub(crate) mode: Option<DeliveryMode>,
    pub(crate) publishes_to: Option<String>,
    pub(crate) handler: Arc<dyn Handler>,
}

impl HandlerDeclaration {
    /// Declare `handler` under `name`, bound to `spec`.
    pub fn new<H>(name: impl Into<String>, spec: impl Into<ChannelSpec>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        Self::from_arc(name, spec, Arc::new(handler))
    }

    /// Declare an already shared handler.
    pub fn from_arc(
        name: impl Into<String>,
        spec: impl Into<ChannelSpec>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            spec: spec.into(),
            mode: None,
            publishes_to: None,
            handler,
        }
    }

    /// Override the flavour's default delivery mode.
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Re-publish non-empty return values to `channel`.
    pub fn publishes_to(mut self, channel: impl Into<String>) -> Self {
        self.publishes_to = Some(channel.into());
        self
    }

    /// Declared handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared channel spec.
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }
}

impl std::fmt::Debug for HandlerDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDeclaration")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("mode", &self.mode)
            .field("publishes_to", &self.publishes_to)
            .finish_non_exhaustive()
    }
}
