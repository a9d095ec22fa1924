//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Channel registry of handler bindings."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelMatcher, ChannelSpec, RouteTarget};
use crate::handler::{Handler, HandlerDeclaration};
use crate::{BrokerError, DeliveryMode, Result};

/// Identity of a binding: its registration index on the broker.
///
/// Stable across scopes opened from the same broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(pub usize);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One handler bound to one channel spec with a delivery mode.
pub struct HandlerBinding {
    id: BindingId,
    name: String,
    spec: ChannelSpec,
    mode: DeliveryMode,
    publishes_to: Option<String>,
    handler: Arc<dyn Handler>,
}

impl HandlerBinding {
    /// Registration index of this binding.
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Handler name given at declaration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel spec the handler is bound to.
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// Broadcast or competing delivery.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Channel receiving the handler's return values, if any.
    pub fn publishes_to(&self) -> Option<&str> {
        self.publishes_to.as_deref()
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("mode", &self.mode)
            .field("publishes_to", &self.publishes_to)
            .finish_non_exhaustive()
    }
}

/// Ordered bindings for one scope, resolved by channel name.
#[derive(Debug)]
pub struct ChannelRegistry {
    matcher: ChannelMatcher,
    bindings: Vec<Arc<HandlerBinding>>,
}

impl ChannelRegistry {
    /// Empty registry using `matcher` for resolution.
    pub fn new(matcher: ChannelMatcher) -> Self {
        Self {
            matcher,
            bindings: Vec::new(),
        }
    }

    /// Build a registry from declarations, in declaration order.
    pub fn from_declarations(
        matcher: ChannelMatcher,
        declarations: &[HandlerDeclaration],
    ) -> Result<Self> {
        let mut registry = Self::new(matcher);
        for declaration in declarations {
            registry.register(declaration.clone())?;
        }
        Ok(registry)
    }

    /// Add a binding.
    ///
    /// Fails when the spec is malformed, or when the same handler is bound a
    /// second time to the same exact competing channel. Broadcast and
    /// pattern bindings may repeat freely.
    pub fn register(&mut self, declaration: HandlerDeclaration) -> Result<BindingId> {
        self.matcher.validate(&declaration.spec)?;
        let mode = declaration
            .mode
            .unwrap_or_else(|| self.matcher.flavor().default_mode());

        if mode == DeliveryMode::Competing && !self.matcher.is_pattern(&declaration.spec) {
            let duplicate = self.bindings.iter().any(|existing| {
                existing.mode == DeliveryMode::Competing
                    && existing.name == declaration.name
                    && existing.spec == declaration.spec
            });
            if duplicate {
                return Err(BrokerError::DuplicateBinding {
                    handler: declaration.name,
                    channel: declaration.spec.to_string(),
                });
            }
        }

        let id = BindingId(self.bindings.len());
        self.bindings.push(Arc::new(HandlerBinding {
            id,
            name: declaration.name,
            spec: declaration.spec,
            mode,
            publishes_to: declaration.publishes_to,
            handler: declaration.handler,
        }));
        Ok(id)
    }

    /// All bindings whose spec matches `target`, in registration order.
    ///
    /// Unknown channels resolve to an empty list.
    pub fn resolve(&self, target: &RouteTarget<'_>) -> Vec<Arc<HandlerBinding>> {
        self.bindings
            .iter()
            .filter(|binding| self.matcher.matches(&binding.spec, target))
            .cloned()
            .collect()
    }

    /// Binding registered under `id`.
    pub fn binding(&self, id: BindingId) -> Option<&Arc<HandlerBinding>> {
        self.bindings.get(id.0)
    }

    /// First binding declared under `name`.
    pub fn find(&self, name: &str) -> Option<&Arc<HandlerBinding>> {
        self.bindings.iter().find(|binding| binding.name == name)
    }

    /// Bindings in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<HandlerBinding>> {
        self.bindings.iter()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Matcher used for validation and routing.
    pub fn matcher(&self) -> ChannelMatcher {
        self.matcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Exchange;
    use crate::handler::handler_fn;
    use crate::BrokerFlavor;

    fn noop(name: &str, spec: impl Into<ChannelSpec>) -> HandlerDeclaration {
        HandlerDeclaration::new(name, spec, handler_fn(|_, _| async { Ok(None) }))
    }

    fn names(bindings: &[Arc<HandlerBinding>]) -> Vec<&str> {
        bindings.iter().map(|b| b.name()).collect()
    }

    #[test]
    fn resolve_returns_matches_in_registration_order() {
        let mut registry = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Kafka, '.'));
        registry.register(noop("all", "orders.#")).unwrap();
        registry.register(noop("created", "orders.created")).unwrap();
        registry.register(noop("other", "payments")).unwrap();
        registry.register(noop("star", "orders.*")).unwrap();

        let resolved = registry.resolve(&RouteTarget::channel("orders.created"));
        assert_eq!(names(&resolved), vec!["all", "created", "star"]);
        assert!(registry.resolve(&RouteTarget::channel("nowhere")).is_empty());
    }

    #[test]
    fn default_mode_follows_flavor() {
        let mut kafka = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Kafka, '.'));
        let id = kafka.register(noop("h", "t")).unwrap();
        assert_eq!(kafka.binding(id).unwrap().mode(), DeliveryMode::Broadcast);

        let mut rabbit = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Rabbit, '.'));
        let id = rabbit.register(noop("h", "q")).unwrap();
        assert_eq!(rabbit.binding(id).unwrap().mode(), DeliveryMode::Competing);
    }

    #[test]
    fn duplicate_competing_binding_is_rejected() {
        let mut registry = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Rabbit, '.'));
        registry.register(noop("worker", "test-queue")).unwrap();
        registry.register(noop("other-worker", "test-queue")).unwrap();
        let err = registry.register(noop("worker", "test-queue")).unwrap_err();
        assert!(matches!(err, BrokerError::DuplicateBinding { ref handler, .. } if handler == "worker"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn topics_and_patterns_allow_repeats() {
        let mut kafka = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Kafka, '.'));
        kafka.register(noop("h", "test-topic")).unwrap();
        kafka.register(noop("h", "test-topic")).unwrap();

        let mut rabbit = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Rabbit, '.'));
        let fanout = ChannelSpec::new("mirror").bound_to(Exchange::fanout("everything"));
        rabbit.register(noop("h", fanout.clone())).unwrap();
        rabbit.register(noop("h", fanout)).unwrap();
        assert_eq!(rabbit.len(), 2);
    }

    #[test]
    fn malformed_spec_fails_registration() {
        let mut registry = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Nats, '.'));
        let err = registry.register(noop("h", "a.>.b")).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidChannelSpec { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn find_and_binding_lookups() {
        let declarations = vec![noop("first", "a"), noop("second", "b")];
        let registry = ChannelRegistry::from_declarations(
            ChannelMatcher::new(BrokerFlavor::Memory, '.'),
            &declarations,
        )
        .unwrap();
        assert_eq!(registry.find("second").map(|b| b.id()), Some(BindingId(1)));
        assert!(registry.find("third").is_none());
        assert!(registry.binding(BindingId(5)).is_none());
    }
}
