//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Test broker construction and scoped execution."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use testbus_logging::{tb_info, LogContext};

use crate::channel::{ChannelMatcher, ChannelSpec};
use crate::handler::{Handler, HandlerDeclaration};
use crate::metrics::BrokerMetricsExporter;
use crate::registry::{BindingId, ChannelRegistry};
use crate::scope::BrokerScope;
use crate::{BrokerError, BrokerFlavor, BrokerSettings, Result};

/// Collects handler declarations and settings for a [`TestBroker`].
#[derive(Debug)]
pub struct TestBrokerBuilder {
    settings: BrokerSettings,
    declarations: Vec<HandlerDeclaration>,
    exporter: Option<BrokerMetricsExporter>,
}

impl TestBrokerBuilder {
    /// Builder emulating `flavor` with default settings.
    pub fn new(flavor: BrokerFlavor) -> Self {
        Self::with_settings(BrokerSettings::for_flavor(flavor))
    }

    /// Builder using explicit settings.
    pub fn with_settings(settings: BrokerSettings) -> Self {
        Self {
            settings,
            declarations: Vec::new(),
            exporter: None,
        }
    }

    /// Bind `handler` under `name` to `spec` with the flavour's default mode.
    pub fn subscriber<H>(self, name: impl Into<String>, spec: impl Into<ChannelSpec>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.declare(HandlerDeclaration::new(name, spec, handler))
    }

    /// Add a prepared declaration.
    pub fn declare(mut self, declaration: HandlerDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    /// Feed every scope's activity into prometheus metrics.
    pub fn with_metrics(mut self, exporter: BrokerMetricsExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Validate settings and declarations.
    ///
    /// Fails on invalid settings, malformed channel specs, or duplicate
    /// competing bindings.
    pub fn build(self) -> Result<TestBroker> {
        self.settings
            .validate()
            .map_err(|err| BrokerError::Config(format!("{err:#}")))?;
        let registry = ChannelRegistry::from_declarations(
            ChannelMatcher::from_settings(&self.settings),
            &self.declarations,
        )?;

        tb_info!(
            context = LogContext::new().with_flavor(self.settings.flavor.as_str()),
            "test broker built with {} binding(s)",
            registry.len()
        );

        Ok(TestBroker {
            settings: Arc::new(self.settings),
            declarations: Arc::new(self.declarations),
            registry,
            exporter: self.exporter,
        })
    }
}

/// Validated, immutable broker definition.
///
/// Holds no per-test state: every scope opened from it gets its own registry,
/// resolver and recorder.
#[derive(Debug)]
pub struct TestBroker {
    settings: Arc<BrokerSettings>,
    declarations: Arc<Vec<HandlerDeclaration>>,
    registry: ChannelRegistry,
    exporter: Option<BrokerMetricsExporter>,
}

impl TestBroker {
    /// Start declaring a broker of the given flavour.
    pub fn builder(flavor: BrokerFlavor) -> TestBrokerBuilder {
        TestBrokerBuilder::new(flavor)
    }

    /// Start declaring a broker from loaded settings.
    pub fn from_settings(settings: BrokerSettings) -> TestBrokerBuilder {
        TestBrokerBuilder::with_settings(settings)
    }

    /// Settings every scope of this broker uses.
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Emulated broker flavour.
    pub fn flavor(&self) -> BrokerFlavor {
        self.settings.flavor
    }

    /// Identity of the first binding declared under `handler`.
    pub fn binding_id(&self, handler: &str) -> Result<BindingId> {
        self.registry
            .find(handler)
            .map(|binding| binding.id())
            .ok_or_else(|| BrokerError::UnknownHandler(handler.to_owned()))
    }

    /// Declared bindings, in registration order.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// A new scope in the `Unopened` state.
    pub fn scope(&self) -> BrokerScope {
        BrokerScope::new(
            self.settings.clone(),
            self.declarations.clone(),
            self.exporter.clone(),
        )
    }

    /// A new scope, already open.
    pub fn open(&self) -> Result<BrokerScope> {
        let scope = self.scope();
        scope.open()?;
        Ok(scope)
    }

    /// Run `body` inside a fresh open scope and close it afterwards.
    ///
    /// The scope is closed on every exit path: normal return, an error
    /// returned by `body`, or a panic, which is resumed after teardown.
    pub async fn run<F, Fut, T, E>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(BrokerScope) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<BrokerError>,
    {
        let scope = self.open()?;
        let outcome = AssertUnwindSafe(body(scope.clone())).catch_unwind().await;
        scope.close().await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
