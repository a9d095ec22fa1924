//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Scoped broker lifecycle: open, publish, request, close."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
//! A scope owns one registry, one resolver and one recorder. It moves through
//! `Unopened -> Open -> Closed`; `Closed` is terminal.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use testbus_logging::{log_system_event, tb_error, LogContext, SystemEventOutcome};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::channel::ChannelMatcher;
use crate::codec::{codec_for, Codec};
use crate::handler::HandlerDeclaration;
use crate::invoker::DeliveryInvoker;
use crate::metrics::{BrokerMetricsExporter, Counters, ScopeMetrics};
use crate::recorder::{CallRecorder, HandlerMock, InvocationOutcome, PublishRecord};
use crate::registry::{BindingId, ChannelRegistry, HandlerBinding};
use crate::routing::{Route, RoutingResolver};
use crate::types::{Envelope, PublishOptions};
use crate::{BrokerError, BrokerSettings, ErrorPolicy, Result};

/// Lifecycle state of a [`BrokerScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeState {
    /// Created but not yet opened.
    Unopened,
    /// Accepting publishes.
    Open,
    /// Torn down; terminal.
    Closed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScopeState::Unopened => "unopened",
            ScopeState::Open => "open",
            ScopeState::Closed => "closed",
        })
    }
}

struct ScopeRuntime {
    registry: Arc<ChannelRegistry>,
    resolver: RoutingResolver,
    offsets: HashMap<String, u64>,
}

struct ScopeCore {
    state: ScopeState,
    runtime: Option<ScopeRuntime>,
}

struct ScopeInner {
    id: String,
    settings: Arc<BrokerSettings>,
    declarations: Arc<Vec<HandlerDeclaration>>,
    codec: Arc<dyn Codec>,
    invoker: DeliveryInvoker,
    exporter: Option<BrokerMetricsExporter>,
    core: Mutex<ScopeCore>,
    recorder: Arc<CallRecorder>,
    counters: Counters,
    // Publishes in progress, nested re-publishes from handlers included.
    // Close waits for this to reach zero before clearing the recorder.
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Marks one publish as in flight until dropped.
struct InFlight<'a> {
    inner: &'a ScopeInner,
}

impl<'a> InFlight<'a> {
    fn enter(inner: &'a ScopeInner) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl ScopeInner {
    fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_scope(&self.id)
            .with_flavor(self.settings.flavor.as_str())
    }

    fn teardown(&self) -> ScopeState {
        let previous = {
            let mut core = self.core.lock();
            let previous = core.state;
            core.state = ScopeState::Closed;
            core.runtime = None;
            previous
        };
        self.recorder.clear();
        self.counters.reset();
        previous
    }

    async fn drained(&self) {
        loop {
            // Registered before the check so a concurrent last exit is not missed.
            let idle = self.idle.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if self.teardown() == ScopeState::Open {
            log_system_event(
                Some(&self.log_context()),
                "scope.close",
                "scope dropped while open",
                SystemEventOutcome::Success,
            );
        }
    }
}

/// Handle on one scoped broker simulation.
///
/// Clones share the same scope. The scope tears itself down when the last
/// handle is dropped, even if [`BrokerScope::close`] was never awaited.
#[derive(Clone)]
pub struct BrokerScope {
    inner: Arc<ScopeInner>,
}

impl BrokerScope {
    pub(crate) fn new(
        settings: Arc<BrokerSettings>,
        declarations: Arc<Vec<HandlerDeclaration>>,
        exporter: Option<BrokerMetricsExporter>,
    ) -> Self {
        let codec = codec_for(settings.codec);
        let invoker = DeliveryInvoker::from_settings(&settings);
        Self {
            inner: Arc::new(ScopeInner {
                id: Uuid::new_v4().to_string(),
                settings,
                declarations,
                codec,
                invoker,
                exporter,
                core: Mutex::new(ScopeCore {
                    state: ScopeState::Unopened,
                    runtime: None,
                }),
                recorder: Arc::new(CallRecorder::new()),
                counters: Counters::default(),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Unique identifier of this scope, used in logs.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ScopeState {
        self.inner.core.lock().state
    }

    /// Settings the scope was created with.
    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    /// Build the registry, reset routing cursors and start accepting publishes.
    pub fn open(&self) -> Result<()> {
        let mut core = self.inner.core.lock();
        if core.state != ScopeState::Unopened {
            return Err(BrokerError::ScopeState {
                operation: "open",
                state: core.state,
            });
        }

        let registry = ChannelRegistry::from_declarations(
            ChannelMatcher::from_settings(&self.inner.settings),
            &self.inner.declarations,
        )?;
        let bindings = registry.len();
        core.runtime = Some(ScopeRuntime {
            registry: Arc::new(registry),
            resolver: RoutingResolver::new(self.inner.settings.competing_policy),
            offsets: HashMap::new(),
        });
        self.inner.recorder.clear();
        core.state = ScopeState::Open;
        drop(core);

        log_system_event(
            Some(&self.inner.log_context()),
            "scope.open",
            &format!("scope opened with {bindings} binding(s)"),
            SystemEventOutcome::Success,
        );
        Ok(())
    }

    /// Tear the scope down.
    ///
    /// Waits for in-flight publishes to finish, including publishes those
    /// handlers make in turn, then discards the registry, resolver, recorded
    /// calls and counters. Closing twice is a no-op. Must not be awaited from
    /// inside a handler of this scope.
    pub async fn close(&self) {
        self.inner.drained().await;
        let previous = self.inner.teardown();
        if previous == ScopeState::Open {
            log_system_event(
                Some(&self.inner.log_context()),
                "scope.close",
                "scope closed",
                SystemEventOutcome::Success,
            );
        }
    }

    /// Publish `payload` to `channel` and deliver it to every matching binding.
    ///
    /// Returns once every selected handler has completed. Publishing to a
    /// channel nothing is bound to is a silent no-op.
    pub async fn publish<T>(&self, channel: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.publish_with(channel, payload, PublishOptions::default())
            .await
    }

    /// Publish with headers, key, exchange or other metadata.
    pub async fn publish_with<T>(
        &self,
        channel: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let _in_flight = InFlight::enter(&self.inner);
        self.dispatch(channel.to_owned(), payload, options, 0)
            .await
            .map(|_| ())
    }

    /// Publish and return the value returned by the first delivered handler.
    pub async fn request<T>(&self, channel: &str, payload: &T) -> Result<Option<JsonValue>>
    where
        T: Serialize + ?Sized,
    {
        self.request_with(channel, payload, PublishOptions::default())
            .await
    }

    /// [`BrokerScope::request`] with publish metadata.
    pub async fn request_with<T>(
        &self,
        channel: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<Option<JsonValue>>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let _in_flight = InFlight::enter(&self.inner);
        self.dispatch(channel.to_owned(), payload, options, 0).await
    }

    fn dispatch(
        &self,
        channel: String,
        payload: JsonValue,
        options: PublishOptions,
        depth: usize,
    ) -> BoxFuture<'_, Result<Option<JsonValue>>> {
        async move {
            let (envelope, routes) = self.prepare(&channel, payload, options, depth)?;
            let mut reply = None;

            for (position, route) in routes.iter().enumerate() {
                let delivery = self
                    .inner
                    .invoker
                    .deliver(route, &envelope, &self.inner.recorder)
                    .await;
                self.inner.counters.outcome(&delivery.outcome);
                if let Some(exporter) = &self.inner.exporter {
                    exporter.observe_delivery(&delivery.outcome, delivery.elapsed);
                }

                match delivery.outcome {
                    InvocationOutcome::Returned(value) => {
                        if position == 0 {
                            reply = value.clone();
                        }
                        if let (Some(target), Some(value)) = (route.binding.publishes_to(), value) {
                            self.inner.counters.republished();
                            let options = PublishOptions::new()
                                .with_correlation_id(envelope.correlation_id.clone());
                            self.dispatch(target.to_owned(), value, options, depth + 1)
                                .await?;
                        }
                    }
                    InvocationOutcome::Failed(message) => {
                        tb_error!(
                            context = self
                                .inner
                                .log_context()
                                .with_channel(&channel)
                                .with_handler(route.binding.name())
                                .with_sequence(delivery.sequence),
                            "handler failed: {}",
                            message
                        );
                        if self.inner.settings.error_policy == ErrorPolicy::Raise {
                            return Err(BrokerError::HandlerExecution {
                                handler: route.binding.name().to_owned(),
                                channel,
                                message,
                            });
                        }
                    }
                }
            }

            Ok(reply)
        }
        .boxed()
    }

    fn prepare(
        &self,
        channel: &str,
        payload: JsonValue,
        options: PublishOptions,
        depth: usize,
    ) -> Result<(Envelope, Vec<Route>)> {
        let mut core = self.inner.core.lock();
        if core.state != ScopeState::Open {
            return Err(BrokerError::ScopeState {
                operation: "publish",
                state: core.state,
            });
        }
        if depth > self.inner.settings.max_republish_depth {
            return Err(BrokerError::RepublishDepthExceeded {
                channel: channel.to_owned(),
                depth: self.inner.settings.max_republish_depth,
            });
        }
        let Some(runtime) = core.runtime.as_mut() else {
            return Err(BrokerError::ScopeState {
                operation: "publish",
                state: ScopeState::Closed,
            });
        };

        let body = self.inner.codec.encode(&payload)?;
        let decoded = self.inner.codec.decode(&body)?;
        let offset = runtime.offsets.entry(channel.to_owned()).or_insert(0);
        let envelope = Envelope::new(
            channel,
            options,
            body,
            decoded,
            self.inner.codec.content_type(),
            *offset,
        );
        *offset += 1;

        self.inner.recorder.record_publish(&envelope, depth);
        self.inner.counters.published();
        if let Some(exporter) = &self.inner.exporter {
            exporter.observe_published();
        }

        let routes = runtime.resolver.route(&runtime.registry, &envelope);
        if routes.is_empty() {
            self.inner.counters.unrouted();
            if let Some(exporter) = &self.inner.exporter {
                exporter.observe_unrouted();
            }
        }
        Ok((envelope, routes))
    }

    /// Calls recorded in this scope.
    pub fn recorder(&self) -> &CallRecorder {
        &self.inner.recorder
    }

    /// Publishes addressed to `channel`, including re-published replies.
    pub fn published_to(&self, channel: &str) -> Vec<PublishRecord> {
        self.inner.recorder.published_to(channel)
    }

    /// Counters for this scope; zeroed once the scope is torn down.
    pub fn metrics(&self) -> ScopeMetrics {
        self.inner.counters.snapshot()
    }

    /// Mock view over the first binding declared under `handler`.
    pub fn mock(&self, handler: &str) -> Result<HandlerMock> {
        let binding = self.with_registry("inspect", |registry| registry.find(handler).cloned())?;
        binding
            .map(|binding| HandlerMock::new(binding, self.inner.recorder.clone()))
            .ok_or_else(|| BrokerError::UnknownHandler(handler.to_owned()))
    }

    /// Mock view over a binding by identity.
    pub fn mock_by_id(&self, id: BindingId) -> Result<HandlerMock> {
        let binding = self.with_registry("inspect", |registry| registry.binding(id).cloned())?;
        binding
            .map(|binding| HandlerMock::new(binding, self.inner.recorder.clone()))
            .ok_or_else(|| BrokerError::UnknownHandler(id.to_string()))
    }

    /// Bindings of the open scope, in registration order.
    pub fn bindings(&self) -> Result<Vec<Arc<HandlerBinding>>> {
        self.with_registry("inspect", |registry| registry.iter().cloned().collect())
    }

    fn with_registry<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&ChannelRegistry) -> R,
    ) -> Result<R> {
        let core = self.inner.core.lock();
        match (&core.state, &core.runtime) {
            (ScopeState::Open, Some(runtime)) => Ok(f(&runtime.registry)),
            (state, _) => Err(BrokerError::ScopeState {
                operation,
                state: *state,
            }),
        }
    }
}

impl fmt::Debug for BrokerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerScope")
            .field("id", &self.inner.id)
            .field("flavor", &self.inner.settings.flavor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
