//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Invocation records and the assertion surface over them."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::registry::{BindingId, HandlerBinding};
use crate::types::{DeliveryContext, Envelope};
use crate::{DeliveryMode, Result};

/// How a handler call ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The handler returned, optionally with a value.
    Returned(Option<JsonValue>),
    /// The handler failed; holds the rendered error chain.
    Failed(String),
}

impl InvocationOutcome {
    /// Whether the handler returned normally.
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Returned(_))
    }

    /// Value returned by the handler, if any.
    pub fn return_value(&self) -> Option<&JsonValue> {
        match self {
            InvocationOutcome::Returned(value) => value.as_ref(),
            InvocationOutcome::Failed(_) => None,
        }
    }

    /// Failure detail, if the handler failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            InvocationOutcome::Failed(message) => Some(message),
            InvocationOutcome::Returned(_) => None,
        }
    }
}

/// One handler call and its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRecord {
    /// Ordinal of this call within the scope, starting at 0.
    pub sequence: u64,
    /// Binding that was invoked.
    pub binding: BindingId,
    /// Handler name of the binding.
    pub handler: String,
    /// Mode the binding was selected under.
    pub mode: DeliveryMode,
    /// Envelope delivered.
    pub envelope: Envelope,
    /// Context handed to the handler.
    pub context: DeliveryContext,
    /// How the call ended.
    pub outcome: InvocationOutcome,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl InvocationRecord {
    /// Decoded payload the handler received.
    pub fn payload(&self) -> &JsonValue {
        &self.envelope.payload
    }

    /// Channel the message was published to.
    pub fn channel(&self) -> &str {
        &self.envelope.channel
    }
}

/// One accepted publish, including re-publishes of handler return values.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    /// Ordinal of this publish within the scope, starting at 0.
    pub sequence: u64,
    /// Nesting depth; 0 for publishes issued by test code.
    pub depth: usize,
    /// Envelope that was published.
    pub envelope: Envelope,
}

impl PublishRecord {
    /// Decoded payload.
    pub fn payload(&self) -> &JsonValue {
        &self.envelope.payload
    }
}

/// Details of a failed call assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionMismatch {
    /// Handler the assertion was about.
    pub handler: String,
    /// Channel spec the handler is bound to.
    pub channel: String,
    /// What the assertion required.
    pub expectation: &'static str,
    /// Expected payload, when the assertion names one.
    pub expected: Option<JsonValue>,
    /// Payloads of the recorded calls, in order.
    pub actual: Vec<JsonValue>,
}

impl fmt::Display for AssertionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler `{}` on `{}` expected {}",
            self.handler, self.channel, self.expectation
        )?;
        if let Some(expected) = &self.expected {
            write!(f, " with {}", expected)?;
        }
        write!(f, ", but it was called {} time(s)", self.actual.len())?;
        if !self.actual.is_empty() {
            let rendered: Vec<String> = self.actual.iter().map(ToString::to_string).collect();
            write!(f, " with [{}]", rendered.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionMismatch {}

#[derive(Debug, Default)]
struct RecorderState {
    invocations: Vec<InvocationRecord>,
    publishes: Vec<PublishRecord>,
    next_invocation: u64,
    next_publish: u64,
}

/// Per-scope log of handler calls and publishes.
///
/// Only the delivery path appends; every query returns a snapshot and leaves
/// the log untouched.
#[derive(Debug, Default)]
pub struct CallRecorder {
    state: RwLock<RecorderState>,
}

impl CallRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an invocation, assigning its sequence number.
    pub(crate) fn record(&self, mut record: InvocationRecord) -> u64 {
        let mut state = self.state.write();
        record.sequence = state.next_invocation;
        state.next_invocation += 1;
        let sequence = record.sequence;
        state.invocations.push(record);
        sequence
    }

    /// Append a publish, assigning its sequence number.
    pub(crate) fn record_publish(&self, envelope: &Envelope, depth: usize) -> u64 {
        let mut state = self.state.write();
        let sequence = state.next_publish;
        state.next_publish += 1;
        state.publishes.push(PublishRecord {
            sequence,
            depth,
            envelope: envelope.clone(),
        });
        sequence
    }

    pub(crate) fn clear(&self) {
        *self.state.write() = RecorderState::default();
    }

    /// Every recorded call, in call order.
    pub fn calls(&self) -> Vec<InvocationRecord> {
        self.state.read().invocations.clone()
    }

    /// Calls made to `binding`, in call order.
    pub fn calls_for(&self, binding: BindingId) -> Vec<InvocationRecord> {
        self.state
            .read()
            .invocations
            .iter()
            .filter(|record| record.binding == binding)
            .cloned()
            .collect()
    }

    /// Number of calls made to `binding`.
    pub fn call_count(&self, binding: BindingId) -> usize {
        self.state
            .read()
            .invocations
            .iter()
            .filter(|record| record.binding == binding)
            .count()
    }

    /// Bindings in the order they were called.
    pub fn call_order(&self) -> Vec<BindingId> {
        self.state
            .read()
            .invocations
            .iter()
            .map(|record| record.binding)
            .collect()
    }

    /// Every accepted publish, in publish order.
    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.state.read().publishes.clone()
    }

    /// Publishes addressed to `channel`, in publish order.
    pub fn published_to(&self, channel: &str) -> Vec<PublishRecord> {
        self.state
            .read()
            .publishes
            .iter()
            .filter(|record| record.envelope.channel == channel)
            .cloned()
            .collect()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.invocations.is_empty() && state.publishes.is_empty()
    }

    /// Fail unless `binding` was called exactly once, with `expected`.
    pub fn assert_called_once_with(
        &self,
        binding: &HandlerBinding,
        expected: &JsonValue,
    ) -> Result<()> {
        let actual = self.payloads_for(binding.id());
        if actual.len() == 1 && actual[0] == *expected {
            return Ok(());
        }
        Err(mismatch(binding, "exactly one call", Some(expected.clone()), actual).into())
    }

    fn payloads_for(&self, binding: BindingId) -> Vec<JsonValue> {
        self.state
            .read()
            .invocations
            .iter()
            .filter(|record| record.binding == binding)
            .map(|record| record.envelope.payload.clone())
            .collect()
    }
}

fn mismatch(
    binding: &HandlerBinding,
    expectation: &'static str,
    expected: Option<JsonValue>,
    actual: Vec<JsonValue>,
) -> AssertionMismatch {
    AssertionMismatch {
        handler: binding.name().to_owned(),
        channel: binding.spec().to_string(),
        expectation,
        expected,
        actual,
    }
}

/// Mock-style view over the calls of one binding.
#[derive(Debug, Clone)]
pub struct HandlerMock {
    binding: Arc<HandlerBinding>,
    recorder: Arc<CallRecorder>,
}

impl HandlerMock {
    pub(crate) fn new(binding: Arc<HandlerBinding>, recorder: Arc<CallRecorder>) -> Self {
        Self { binding, recorder }
    }

    /// Binding this mock observes.
    pub fn binding_id(&self) -> BindingId {
        self.binding.id()
    }

    /// Handler name.
    pub fn name(&self) -> &str {
        self.binding.name()
    }

    /// Recorded calls to this binding, in order.
    pub fn calls(&self) -> Vec<InvocationRecord> {
        self.recorder.calls_for(self.binding.id())
    }

    /// Number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.recorder.call_count(self.binding.id())
    }

    /// Whether the handler was called at least once.
    pub fn called(&self) -> bool {
        self.call_count() > 0
    }

    /// Payloads of every call, in order.
    pub fn call_args(&self) -> Vec<JsonValue> {
        self.recorder.payloads_for(self.binding.id())
    }

    /// Most recent call, if any.
    pub fn last_call(&self) -> Option<InvocationRecord> {
        self.calls().pop()
    }

    /// Fail unless the handler was called exactly once, with `expected`.
    pub fn assert_called_once_with<T>(&self, expected: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let expected = serde_json::to_value(expected)?;
        self.recorder.assert_called_once_with(&self.binding, &expected)
    }

    /// Fail unless the most recent call carried `expected`.
    pub fn assert_called_with<T>(&self, expected: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let expected = serde_json::to_value(expected)?;
        let actual = self.call_args();
        if actual.last() == Some(&expected) {
            return Ok(());
        }
        Err(mismatch(&self.binding, "the last call", Some(expected), actual).into())
    }

    /// Fail unless some call carried `expected`.
    pub fn assert_any_call<T>(&self, expected: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let expected = serde_json::to_value(expected)?;
        let actual = self.call_args();
        if actual.contains(&expected) {
            return Ok(());
        }
        Err(mismatch(&self.binding, "at least one call", Some(expected), actual).into())
    }

    /// Fail if the handler was called at all.
    pub fn assert_not_called(&self) -> Result<()> {
        let actual = self.call_args();
        if actual.is_empty() {
            return Ok(());
        }
        Err(mismatch(&self.binding, "no calls", None, actual).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelMatcher;
    use crate::handler::{handler_fn, HandlerDeclaration};
    use crate::registry::ChannelRegistry;
    use crate::types::PublishOptions;
    use crate::{BrokerError, BrokerFlavor};

    fn binding() -> Arc<HandlerBinding> {
        let mut registry = ChannelRegistry::new(ChannelMatcher::new(BrokerFlavor::Kafka, '.'));
        let id = registry
            .register(HandlerDeclaration::new(
                "handle",
                "test-topic",
                handler_fn(|_, _| async { Ok(None) }),
            ))
            .unwrap();
        registry.binding(id).unwrap().clone()
    }

    fn record_for(binding: &HandlerBinding, payload: JsonValue) -> InvocationRecord {
        let envelope = Envelope::new(
            "test-topic",
            PublishOptions::default(),
            Vec::new(),
            payload,
            "application/json",
            0,
        );
        let context = DeliveryContext::for_delivery(BrokerFlavor::Kafka, binding, &envelope);
        InvocationRecord {
            sequence: 0,
            binding: binding.id(),
            handler: binding.name().to_owned(),
            mode: binding.mode(),
            envelope,
            context,
            outcome: InvocationOutcome::Returned(None),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn record_assigns_sequence_numbers() {
        let binding = binding();
        let recorder = CallRecorder::new();
        assert_eq!(recorder.record(record_for(&binding, "a".into())), 0);
        assert_eq!(recorder.record(record_for(&binding, "b".into())), 1);
        let sequences: Vec<u64> = recorder.calls().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(recorder.call_order(), vec![binding.id(), binding.id()]);
    }

    #[test]
    fn queries_are_idempotent() {
        let binding = binding();
        let recorder = CallRecorder::new();
        recorder.record(record_for(&binding, "Hi!".into()));
        let first = recorder.calls_for(binding.id());
        let second = recorder.calls_for(binding.id());
        assert_eq!(first, second);
        assert_eq!(recorder.call_count(binding.id()), 1);
    }

    #[test]
    fn called_once_with_checks_count_and_payload() {
        let binding = binding();
        let recorder = Arc::new(CallRecorder::new());
        let mock = HandlerMock::new(binding.clone(), recorder.clone());

        let err = mock.assert_called_once_with("Hi!").unwrap_err();
        assert!(matches!(err, BrokerError::AssertionMismatch(_)));

        recorder.record(record_for(&binding, "Hi!".into()));
        mock.assert_called_once_with("Hi!").expect("single matching call");

        let err = mock.assert_called_once_with("Bye!").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"Bye!\""), "{message}");
        assert!(message.contains("\"Hi!\""), "{message}");
        assert!(message.contains("test-topic"), "{message}");

        recorder.record(record_for(&binding, "Hi!".into()));
        let err = mock.assert_called_once_with("Hi!").unwrap_err();
        assert!(err.to_string().contains("2 time(s)"));
    }

    #[test]
    fn other_mock_assertions() {
        let binding = binding();
        let recorder = Arc::new(CallRecorder::new());
        let mock = HandlerMock::new(binding.clone(), recorder.clone());
        mock.assert_not_called().expect("no calls yet");

        recorder.record(record_for(&binding, serde_json::json!({"n": 1})));
        recorder.record(record_for(&binding, serde_json::json!({"n": 2})));
        mock.assert_called_with(&serde_json::json!({"n": 2})).expect("last call");
        mock.assert_any_call(&serde_json::json!({"n": 1})).expect("first call");
        assert!(mock.assert_any_call(&serde_json::json!({"n": 3})).is_err());
        assert!(mock.assert_not_called().is_err());
        assert_eq!(mock.call_args().len(), 2);
        assert_eq!(mock.last_call().map(|r| r.sequence), Some(1));
    }

    #[test]
    fn clear_discards_everything() {
        let binding = binding();
        let recorder = CallRecorder::new();
        recorder.record(record_for(&binding, "Hi!".into()));
        recorder.record_publish(&record_for(&binding, "Hi!".into()).envelope, 0);
        assert!(!recorder.is_empty());
        recorder.clear();
        assert!(recorder.is_empty());
        assert_eq!(recorder.record(record_for(&binding, "again".into())), 0);
    }
}
