//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "In-process broker routing, delivery, and call recording."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! In-process test double for message brokers.
//!
//! A [`TestBroker`] is built once from handler declarations. Each test opens a
//! [`BrokerScope`] from it, publishes messages, and asserts on the calls the
//! scope recorded. Routing follows the selected [`BrokerFlavor`]: Kafka topics,
//! RabbitMQ queues and exchanges, NATS subjects, or a neutral in-memory model.
//! Delivery is sequential and fully awaited, so assertions made right after
//! `publish` observe a settled state.

pub mod broker;
pub mod channel;
pub mod codec;
pub mod fixtures;
pub mod handler;
pub mod invoker;
pub mod metrics;
pub mod recorder;
pub mod registry;
pub mod routing;
pub mod scope;
pub mod types;

/// Shared result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by the broker simulation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The same handler was bound twice to one exact competing channel.
    #[error("handler `{handler}` is already bound to queue channel `{channel}`")]
    DuplicateBinding {
        /// Handler name.
        handler: String,
        /// Channel spec the duplicate targeted.
        channel: String,
    },
    /// A channel spec could not be interpreted.
    #[error("invalid channel spec `{spec}`: {reason}")]
    InvalidChannelSpec {
        /// Offending spec.
        spec: String,
        /// Why the spec was rejected.
        reason: String,
    },
    /// A handler failed while processing a delivered message.
    #[error("handler `{handler}` failed on `{channel}`: {message}")]
    HandlerExecution {
        /// Handler name.
        handler: String,
        /// Channel the message was published to.
        channel: String,
        /// Rendered failure, including its cause chain.
        message: String,
    },
    /// An operation was attempted while the scope was not open.
    #[error("cannot {operation} while scope is {state}")]
    ScopeState {
        /// Attempted operation.
        operation: &'static str,
        /// State the scope was in.
        state: ScopeState,
    },
    /// A call assertion did not hold.
    #[error("{0}")]
    AssertionMismatch(Box<AssertionMismatch>),
    /// No handler with this name was declared.
    #[error("no handler named `{0}` is declared on this broker")]
    UnknownHandler(String),
    /// Handler replies kept re-publishing past the configured depth.
    #[error("republish depth {depth} exceeded while publishing to `{channel}`")]
    RepublishDepthExceeded {
        /// Channel of the publish that would exceed the limit.
        channel: String,
        /// Configured maximum depth.
        depth: usize,
    },
    /// Broker settings failed validation.
    #[error("invalid broker settings: {0}")]
    Config(String),
    /// The codec rejected a payload.
    #[error("codec error: {0}")]
    Codec(String),
    /// Wrapper for IO errors encountered while reading fixtures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AssertionMismatch> for BrokerError {
    fn from(mismatch: AssertionMismatch) -> Self {
        BrokerError::AssertionMismatch(Box::new(mismatch))
    }
}

pub use broker::{TestBroker, TestBrokerBuilder};
pub use channel::{ChannelMatcher, ChannelSpec, Exchange, ExchangeKind, RouteTarget};
pub use codec::{codec_for, CborCodec, Codec, JsonCodec};
pub use fixtures::replay_from_file;
pub use handler::{handler_fn, FnHandler, Handler, HandlerDeclaration, HandlerResult};
pub use invoker::{Delivery, DeliveryInvoker};
pub use metrics::{log_delivery, BrokerMetricsExporter, ScopeMetrics};
pub use recorder::{
    AssertionMismatch, CallRecorder, HandlerMock, InvocationOutcome, InvocationRecord,
    PublishRecord,
};
pub use registry::{BindingId, ChannelRegistry, HandlerBinding};
pub use routing::{Route, RoutingResolver};
pub use scope::{BrokerScope, ScopeState};
pub use testbus_common::{
    BrokerFlavor, BrokerSettings, CodecKind, CompetingPolicy, DeliveryMode, ErrorPolicy,
};
pub use types::{BrokerFields, DeliveryContext, Envelope, Headers, PublishOptions};
