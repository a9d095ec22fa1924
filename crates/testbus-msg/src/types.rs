//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Message envelope and delivery context types."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::channel::RouteTarget;
use crate::registry::HandlerBinding;
use crate::BrokerFlavor;

/// Message headers, ordered for stable comparisons.
pub type Headers = BTreeMap<String, String>;

/// Optional metadata supplied alongside a publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    /// Headers attached to the message.
    pub headers: Headers,
    /// Message key (Kafka record key, NATS/Rabbit ignore it for routing).
    pub key: Option<String>,
    /// Partition hint for Kafka-flavoured brokers.
    pub partition: Option<i32>,
    /// Exchange to publish through; `None` targets the default exchange.
    pub exchange: Option<String>,
    /// Correlation identifier; defaults to the message id.
    pub correlation_id: Option<String>,
    /// Reply destination exposed to handlers.
    pub reply_to: Option<String>,
}

impl PublishOptions {
    /// Create empty publish options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a message key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attach a partition hint.
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Publish through the named exchange.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Override the correlation identifier.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attach a reply destination.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Published message plus the channel metadata it travelled with.
///
/// Built once per publish and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier.
    pub id: Uuid,
    /// Correlation identifier shared by a publish and its replies.
    pub correlation_id: String,
    /// Channel (topic, routing key, or subject) the message was published to.
    pub channel: String,
    /// Exchange the message was published through, if any.
    pub exchange: Option<String>,
    /// Message key.
    pub key: Option<String>,
    /// Partition hint.
    pub partition: Option<i32>,
    /// Position of the message within its channel for this scope.
    pub offset: u64,
    /// Headers attached by the publisher.
    pub headers: Headers,
    /// Reply destination supplied by the publisher.
    pub reply_to: Option<String>,
    /// Content type reported by the codec.
    pub content_type: String,
    /// Publish timestamp.
    pub timestamp: DateTime<Utc>,
    /// Encoded bytes as they would cross the wire.
    pub body: Vec<u8>,
    /// Payload decoded back from `body`.
    pub payload: JsonValue,
}

impl Envelope {
    pub(crate) fn new(
        channel: &str,
        options: PublishOptions,
        body: Vec<u8>,
        payload: JsonValue,
        content_type: &str,
        offset: u64,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            correlation_id: options.correlation_id.unwrap_or_else(|| id.to_string()),
            channel: channel.to_owned(),
            exchange: options.exchange,
            key: options.key,
            partition: options.partition,
            offset,
            headers: options.headers,
            reply_to: options.reply_to,
            content_type: content_type.to_owned(),
            timestamp: Utc::now(),
            body,
            payload,
        }
    }

    /// Routing view of this envelope.
    pub fn target(&self) -> RouteTarget<'_> {
        RouteTarget {
            channel: &self.channel,
            exchange: self.exchange.as_deref(),
        }
    }
}

/// Broker-specific fields a handler would read from the native client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flavor", rename_all = "snake_case")]
pub enum BrokerFields {
    /// Kafka consumer record metadata.
    Kafka {
        /// Topic the record was read from.
        topic: String,
        /// Partition; `0` unless the publisher supplied a hint.
        partition: i32,
        /// Offset within the topic for this scope.
        offset: u64,
    },
    /// RabbitMQ delivery metadata.
    Rabbit {
        /// Exchange; empty for the default exchange.
        exchange: String,
        /// Routing key the message was published with.
        routing_key: String,
        /// Queue the consuming binding reads from.
        queue: String,
    },
    /// NATS message metadata.
    Nats {
        /// Subject the message was published to.
        subject: String,
        /// Reply subject, if any.
        reply_to: Option<String>,
    },
    /// No broker-specific metadata.
    Memory,
}

/// Context injected into a handler next to the decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryContext {
    /// Channel the message was published to.
    pub channel: String,
    /// Spec of the binding that matched.
    pub binding: String,
    /// Handler name receiving the message.
    pub handler: String,
    /// Message identifier.
    pub message_id: Uuid,
    /// Correlation identifier.
    pub correlation_id: String,
    /// Message headers; empty when none were published.
    pub headers: Headers,
    /// Message key; `None` when absent.
    pub key: Option<String>,
    /// Reply destination; `None` when absent.
    pub reply_to: Option<String>,
    /// Content type reported by the codec.
    pub content_type: String,
    /// Publish timestamp.
    pub timestamp: DateTime<Utc>,
    /// Flavour-specific metadata.
    pub broker: BrokerFields,
}

impl DeliveryContext {
    /// Build the context a real client of `flavor` would hand to `binding`.
    pub fn for_delivery(flavor: BrokerFlavor, binding: &HandlerBinding, envelope: &Envelope) -> Self {
        let broker = match flavor {
            BrokerFlavor::Kafka => BrokerFields::Kafka {
                topic: envelope.channel.clone(),
                partition: envelope.partition.unwrap_or(0),
                offset: envelope.offset,
            },
            BrokerFlavor::Rabbit => BrokerFields::Rabbit {
                exchange: envelope.exchange.clone().unwrap_or_default(),
                routing_key: envelope.channel.clone(),
                queue: binding.spec().name().to_owned(),
            },
            BrokerFlavor::Nats => BrokerFields::Nats {
                subject: envelope.channel.clone(),
                reply_to: envelope.reply_to.clone(),
            },
            BrokerFlavor::Memory => BrokerFields::Memory,
        };
        Self {
            channel: envelope.channel.clone(),
            binding: binding.spec().to_string(),
            handler: binding.name().to_owned(),
            message_id: envelope.id,
            correlation_id: envelope.correlation_id.clone(),
            headers: envelope.headers.clone(),
            key: envelope.key.clone(),
            reply_to: envelope.reply_to.clone(),
            content_type: envelope.content_type.clone(),
            timestamp: envelope.timestamp,
            broker,
        }
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Kafka topic.
    pub fn topic(&self) -> Option<&str> {
        match &self.broker {
            BrokerFields::Kafka { topic, .. } => Some(topic),
            _ => None,
        }
    }

    /// Kafka partition.
    pub fn partition(&self) -> Option<i32> {
        match &self.broker {
            BrokerFields::Kafka { partition, .. } => Some(*partition),
            _ => None,
        }
    }

    /// Kafka offset.
    pub fn offset(&self) -> Option<u64> {
        match &self.broker {
            BrokerFields::Kafka { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// RabbitMQ exchange.
    pub fn exchange(&self) -> Option<&str> {
        match &self.broker {
            BrokerFields::Rabbit { exchange, .. } => Some(exchange),
            _ => None,
        }
    }

    /// RabbitMQ routing key.
    pub fn routing_key(&self) -> Option<&str> {
        match &self.broker {
            BrokerFields::Rabbit { routing_key, .. } => Some(routing_key),
            _ => None,
        }
    }

    /// RabbitMQ queue.
    pub fn queue(&self) -> Option<&str> {
        match &self.broker {
            BrokerFields::Rabbit { queue, .. } => Some(queue),
            _ => None,
        }
    }

    /// NATS subject.
    pub fn subject(&self) -> Option<&str> {
        match &self.broker {
            BrokerFields::Nats { subject, .. } => Some(subject),
            _ => None,
        }
    }
}
