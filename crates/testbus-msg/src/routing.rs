//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Routing resolver: broadcast fan-out and competing selection."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::channel::ChannelSpec;
use crate::registry::{ChannelRegistry, HandlerBinding};
use crate::types::Envelope;
use crate::{CompetingPolicy, DeliveryMode};

/// One binding selected to receive a message.
#[derive(Debug, Clone)]
pub struct Route {
    /// Binding to invoke.
    pub binding: Arc<HandlerBinding>,
    /// Mode under which it was selected.
    pub mode: DeliveryMode,
}

enum Slot {
    Broadcast(Arc<HandlerBinding>),
    Group(ChannelSpec),
}

/// Decides which bindings receive a publish.
///
/// Broadcast bindings all receive the message. Competing bindings sharing a
/// spec form a group and exactly one member is chosen per publish. Round-robin
/// cursors live here and are dropped with the scope.
#[derive(Debug)]
pub struct RoutingResolver {
    policy: CompetingPolicy,
    cursors: HashMap<ChannelSpec, usize>,
}

impl RoutingResolver {
    /// Resolver with fresh cursors.
    pub fn new(policy: CompetingPolicy) -> Self {
        Self {
            policy,
            cursors: HashMap::new(),
        }
    }

    /// Select the routes for `envelope`, ordered by registration.
    ///
    /// An empty result means the publish is a no-op.
    pub fn route(&mut self, registry: &ChannelRegistry, envelope: &Envelope) -> Vec<Route> {
        let matched = registry.resolve(&envelope.target());
        if matched.is_empty() {
            debug!(
                channel = %envelope.channel,
                exchange = envelope.exchange.as_deref().unwrap_or(""),
                "routing mismatch: no binding matched"
            );
            return Vec::new();
        }

        let mut slots = Vec::new();
        let mut groups: IndexMap<ChannelSpec, Vec<Arc<HandlerBinding>>> = IndexMap::new();
        for binding in matched {
            match binding.mode() {
                DeliveryMode::Broadcast => slots.push(Slot::Broadcast(binding)),
                DeliveryMode::Competing => {
                    let spec = binding.spec().clone();
                    let members = groups.entry(spec.clone()).or_default();
                    if members.is_empty() {
                        slots.push(Slot::Group(spec));
                    }
                    members.push(binding);
                }
            }
        }

        slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Broadcast(binding) => Some(Route {
                    binding,
                    mode: DeliveryMode::Broadcast,
                }),
                Slot::Group(spec) => {
                    let members = groups.get(&spec)?;
                    let chosen = self.select(&spec, members);
                    Some(Route {
                        binding: chosen,
                        mode: DeliveryMode::Competing,
                    })
                }
            })
            .collect()
    }

    fn select(&mut self, spec: &ChannelSpec, members: &[Arc<HandlerBinding>]) -> Arc<HandlerBinding> {
        let index = match self.policy {
            CompetingPolicy::FirstRegistered => 0,
            CompetingPolicy::RoundRobin => {
                let cursor = self.cursors.entry(spec.clone()).or_insert(0);
                let index = *cursor % members.len();
                *cursor = cursor.wrapping_add(1);
                index
            }
        };
        members[index].clone()
    }

    /// Forget all round-robin positions.
    pub fn reset(&mut self) {
        self.cursors.clear();
    }
}
