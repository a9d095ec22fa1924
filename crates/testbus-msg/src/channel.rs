//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Channel specs, exchanges, and wildcard matching."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BrokerError, BrokerFlavor, BrokerSettings, Result};

/// Matches exactly one segment.
pub const WILDCARD_SINGLE: &str = "*";
/// Matches zero or more segments (RabbitMQ topic exchanges).
pub const WILDCARD_MULTI: &str = "#";
/// Matches zero or more segments (glob style).
pub const WILDCARD_GLOB: &str = "**";
/// Matches one or more trailing segments (NATS style).
pub const WILDCARD_TAIL: &str = ">";

fn is_wildcard(segment: &str) -> bool {
    matches!(
        segment,
        WILDCARD_SINGLE | WILDCARD_MULTI | WILDCARD_GLOB | WILDCARD_TAIL
    )
}

/// RabbitMQ exchange types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Binding key must equal the routing key.
    Direct,
    /// Binding key is a `*`/`#` pattern over the routing key.
    Topic,
    /// Every bound queue receives every message.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        })
    }
}

/// Named exchange a queue binding is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exchange {
    /// Exchange name.
    pub name: String,
    /// Exchange type.
    pub kind: ExchangeKind,
}

impl Exchange {
    /// Direct exchange.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
        }
    }

    /// Topic exchange.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
        }
    }

    /// Fanout exchange.
    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Fanout,
        }
    }
}

/// Channel a handler is bound to: a topic, subject, or queue, optionally
/// attached to an exchange under a binding key.
///
/// Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    name: String,
    exchange: Option<Exchange>,
    binding_key: Option<String>,
}

impl ChannelSpec {
    /// Spec for a topic, subject, or queue name (which may contain wildcards).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exchange: None,
            binding_key: None,
        }
    }

    /// Attach the queue to an exchange.
    pub fn bound_to(mut self, exchange: Exchange) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Binding key used on the exchange; defaults to the queue name.
    pub fn with_binding_key(mut self, key: impl Into<String>) -> Self {
        self.binding_key = Some(key.into());
        self
    }

    /// Topic, subject, or queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exchange the queue is bound to.
    pub fn exchange(&self) -> Option<&Exchange> {
        self.exchange.as_ref()
    }

    /// Key compared against the published channel.
    pub fn routing_pattern(&self) -> &str {
        match &self.exchange {
            Some(_) => self.binding_key.as_deref().unwrap_or(&self.name),
            None => &self.name,
        }
    }
}

impl From<&str> for ChannelSpec {
    fn from(name: &str) -> Self {
        ChannelSpec::new(name)
    }
}

impl From<String> for ChannelSpec {
    fn from(name: String) -> Self {
        ChannelSpec::new(name)
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exchange {
            Some(exchange) => write!(
                f,
                "{}({})[{}] -> {}",
                exchange.name,
                exchange.kind,
                self.routing_pattern(),
                self.name
            ),
            None => f.write_str(&self.name),
        }
    }
}

/// Destination of a publish as seen by the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTarget<'a> {
    /// Topic, routing key, or subject.
    pub channel: &'a str,
    /// Exchange the publish went through; `None` or empty is the default exchange.
    pub exchange: Option<&'a str>,
}

impl<'a> RouteTarget<'a> {
    /// Target on the default exchange.
    pub fn channel(channel: &'a str) -> Self {
        Self {
            channel,
            exchange: None,
        }
    }
}

/// Flavour-aware, case-sensitive matcher between specs and publish targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMatcher {
    flavor: BrokerFlavor,
    delimiter: char,
}

impl ChannelMatcher {
    /// Matcher for `flavor` splitting segments on `delimiter`.
    pub fn new(flavor: BrokerFlavor, delimiter: char) -> Self {
        Self { flavor, delimiter }
    }

    /// Matcher configured from broker settings.
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(settings.flavor, settings.segment_delimiter)
    }

    /// Flavour this matcher emulates.
    pub fn flavor(&self) -> BrokerFlavor {
        self.flavor
    }

    fn wildcards_apply(&self, spec: &ChannelSpec) -> bool {
        match &spec.exchange {
            Some(exchange) => exchange.kind == ExchangeKind::Topic,
            None => self.flavor.wildcard_names(),
        }
    }

    /// Reject specs that could never match as intended.
    pub fn validate(&self, spec: &ChannelSpec) -> Result<()> {
        let invalid = |reason: &str| BrokerError::InvalidChannelSpec {
            spec: spec.to_string(),
            reason: reason.to_owned(),
        };
        if spec.name.trim().is_empty() {
            return Err(invalid("channel name is empty"));
        }
        if let Some(exchange) = &spec.exchange {
            if exchange.name.trim().is_empty() {
                return Err(invalid("exchange name is empty"));
            }
        }
        if !self.wildcards_apply(spec) {
            return Ok(());
        }
        let segments: Vec<&str> = spec.routing_pattern().split(self.delimiter).collect();
        for (index, segment) in segments.iter().enumerate() {
            if is_wildcard(segment) {
                if *segment == WILDCARD_TAIL && index + 1 != segments.len() {
                    return Err(invalid("`>` is only allowed as the last segment"));
                }
                continue;
            }
            if segment.contains(['*', '#', '>']) {
                return Err(invalid("wildcards must occupy a whole segment"));
            }
        }
        Ok(())
    }

    /// Whether the spec can match more than one literal channel.
    pub fn is_pattern(&self, spec: &ChannelSpec) -> bool {
        if let Some(Exchange {
            kind: ExchangeKind::Fanout,
            ..
        }) = &spec.exchange
        {
            return true;
        }
        self.wildcards_apply(spec)
            && spec
                .routing_pattern()
                .split(self.delimiter)
                .any(is_wildcard)
    }

    /// Whether a publish to `target` reaches a binding on `spec`.
    pub fn matches(&self, spec: &ChannelSpec, target: &RouteTarget<'_>) -> bool {
        let published_exchange = target.exchange.filter(|name| !name.is_empty());
        match (&spec.exchange, published_exchange) {
            (Some(exchange), Some(name)) if exchange.name == name => match exchange.kind {
                ExchangeKind::Fanout => true,
                ExchangeKind::Direct => spec.routing_pattern() == target.channel,
                ExchangeKind::Topic => self.segments_match(spec.routing_pattern(), target.channel),
            },
            (None, None) if self.flavor.wildcard_names() => {
                self.segments_match(&spec.name, target.channel)
            }
            (None, None) => spec.name == target.channel,
            _ => false,
        }
    }

    fn segments_match(&self, pattern: &str, channel: &str) -> bool {
        if pattern == channel {
            return true;
        }
        let pattern: Vec<&str> = pattern.split(self.delimiter).collect();
        if !pattern.iter().any(|segment| is_wildcard(segment)) {
            return false;
        }
        let channel: Vec<&str> = channel.split(self.delimiter).collect();
        match_segments(&pattern, &channel)
    }
}

/// Segment matching over one row of reachable channel prefixes, so repeated
/// `#` segments cost `pattern.len() * channel.len()` steps at most.
fn match_segments(pattern: &[&str], channel: &[&str]) -> bool {
    // reachable[j]: the pattern consumed so far matches `channel[..j]`.
    let mut reachable = vec![false; channel.len() + 1];
    reachable[0] = true;

    for segment in pattern {
        let mut next = vec![false; channel.len() + 1];
        match *segment {
            WILDCARD_MULTI | WILDCARD_GLOB => {
                let mut any = false;
                for (slot, &hit) in next.iter_mut().zip(&reachable) {
                    any |= hit;
                    *slot = any;
                }
            }
            WILDCARD_TAIL => {
                let mut any = false;
                for (slot, &hit) in next[1..].iter_mut().zip(&reachable) {
                    any |= hit;
                    *slot = any;
                }
            }
            WILDCARD_SINGLE => {
                for (slot, &hit) in next[1..].iter_mut().zip(&reachable) {
                    *slot = hit;
                }
            }
            literal => {
                for ((slot, &hit), name) in next[1..].iter_mut().zip(&reachable).zip(channel) {
                    *slot = hit && *name == literal;
                }
            }
        }
        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }

    reachable[channel.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ChannelMatcher {
        ChannelMatcher::new(BrokerFlavor::Memory, '.')
    }

    fn rabbit() -> ChannelMatcher {
        ChannelMatcher::new(BrokerFlavor::Rabbit, '.')
    }

    fn hits(matcher: &ChannelMatcher, spec: &str, channel: &str) -> bool {
        matcher.matches(&ChannelSpec::new(spec), &RouteTarget::channel(channel))
    }

    #[test]
    fn exact_specs_match_only_themselves() {
        let m = memory();
        assert!(hits(&m, "test-topic", "test-topic"));
        assert!(!hits(&m, "test-topic", "test-topic.extra"));
        assert!(!hits(&m, "test-topic", "Test-Topic"));
    }

    #[test]
    fn single_segment_wildcard() {
        let m = memory();
        assert!(hits(&m, "orders.*", "orders.created"));
        assert!(!hits(&m, "orders.*", "orders"));
        assert!(!hits(&m, "orders.*", "orders.us.created"));
        assert!(hits(&m, "*.created", "orders.created"));
    }

    #[test]
    fn multi_segment_wildcards_match_zero_or_more() {
        let m = memory();
        assert!(hits(&m, "orders.#", "orders"));
        assert!(hits(&m, "orders.#", "orders.us.east.created"));
        assert!(hits(&m, "orders.**", "orders.created"));
        assert!(hits(&m, "#.created", "orders.us.created"));
        assert!(hits(&m, "orders.#.created", "orders.created"));
        assert!(!hits(&m, "orders.#.created", "orders.us.deleted"));
    }

    #[test]
    fn tail_wildcard_requires_a_segment() {
        let m = ChannelMatcher::new(BrokerFlavor::Nats, '.');
        assert!(hits(&m, "orders.>", "orders.created"));
        assert!(hits(&m, "orders.>", "orders.us.created"));
        assert!(!hits(&m, "orders.>", "orders"));
    }

    #[test]
    fn repeated_multi_wildcards_match_in_bounded_time() {
        let m = memory();
        let pattern = vec!["#"; 12].join(".") + ".z";
        let long: Vec<String> = (0..40).map(|i| format!("s{i}")).collect();
        let miss = long.join(".");
        let hit = format!("{miss}.z");

        let started = std::time::Instant::now();
        assert!(!hits(&m, &pattern, &miss));
        assert!(hits(&m, &pattern, &hit));
        assert!(hits(&m, "#.#.#", "a"));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn custom_delimiter() {
        let m = ChannelMatcher::new(BrokerFlavor::Memory, '/');
        assert!(hits(&m, "sensors/*/temp", "sensors/a1/temp"));
        assert!(!hits(&m, "sensors.*.temp", "sensors.a1.temp"));
    }

    #[test]
    fn rabbit_default_exchange_is_literal() {
        let m = rabbit();
        assert!(hits(&m, "test-queue", "test-queue"));
        assert!(!hits(&m, "orders.*", "orders.created"));
        assert!(hits(&m, "orders.*", "orders.*"));
        assert!(!m.is_pattern(&ChannelSpec::new("orders.*")));
    }

    #[test]
    fn rabbit_exchange_kinds() {
        let m = rabbit();
        let direct = ChannelSpec::new("billing")
            .bound_to(Exchange::direct("events"))
            .with_binding_key("invoice.paid");
        let topic = ChannelSpec::new("audit")
            .bound_to(Exchange::topic("events-topic"))
            .with_binding_key("invoice.#");
        let fanout = ChannelSpec::new("mirror").bound_to(Exchange::fanout("broadcast"));

        let paid = RouteTarget {
            channel: "invoice.paid",
            exchange: Some("events"),
        };
        assert!(m.matches(&direct, &paid));
        assert!(!m.matches(&topic, &paid), "exchange names differ");
        assert!(!m.matches(&direct, &RouteTarget::channel("invoice.paid")));

        let topic_target = RouteTarget {
            channel: "invoice.paid.eu",
            exchange: Some("events-topic"),
        };
        assert!(m.matches(&topic, &topic_target));

        let anything = RouteTarget {
            channel: "whatever",
            exchange: Some("broadcast"),
        };
        assert!(m.matches(&fanout, &anything));
        assert!(m.is_pattern(&fanout));
        assert!(m.is_pattern(&topic));
        assert!(!m.is_pattern(&direct));
    }

    #[test]
    fn binding_key_defaults_to_queue_name() {
        let spec = ChannelSpec::new("test-queue").bound_to(Exchange::direct("events"));
        assert_eq!(spec.routing_pattern(), "test-queue");
        assert_eq!(spec.to_string(), "events(direct)[test-queue] -> test-queue");
    }

    #[test]
    fn validation_rejects_malformed_patterns() {
        let m = memory();
        assert!(m.validate(&ChannelSpec::new("orders.*")).is_ok());
        assert!(m.validate(&ChannelSpec::new("")).is_err());
        assert!(m.validate(&ChannelSpec::new("orders.cre*")).is_err());
        assert!(m.validate(&ChannelSpec::new("orders.>.created")).is_err());
        assert!(rabbit().validate(&ChannelSpec::new("orders.cre*")).is_ok());
        let nameless = ChannelSpec::new("q").bound_to(Exchange::topic(" "));
        assert!(matches!(
            rabbit().validate(&nameless),
            Err(BrokerError::InvalidChannelSpec { .. })
        ));
    }
}
