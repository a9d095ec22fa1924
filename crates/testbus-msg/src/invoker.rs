//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Delivery invoker: runs one handler and records the call."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;

use crate::metrics::log_delivery;
use crate::recorder::{CallRecorder, InvocationOutcome, InvocationRecord};
use crate::routing::Route;
use crate::types::{DeliveryContext, Envelope};
use crate::{BrokerFlavor, BrokerSettings};

/// Result of handing one envelope to one binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Sequence number the call was recorded under.
    pub sequence: u64,
    /// How the handler call ended.
    pub outcome: InvocationOutcome,
    /// Time spent inside the handler.
    pub elapsed: Duration,
}

/// Builds the delivery context, awaits the handler, and records the outcome.
///
/// The record is appended before `deliver` returns, whether the handler
/// returned, failed, panicked, or overran the timeout. A panic is caught and
/// recorded as a failure.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryInvoker {
    flavor: BrokerFlavor,
    timeout: Option<Duration>,
}

impl DeliveryInvoker {
    /// Invoker for `flavor`, optionally bounding each handler call.
    pub fn new(flavor: BrokerFlavor, timeout: Option<Duration>) -> Self {
        Self { flavor, timeout }
    }

    /// Invoker configured from broker settings.
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(settings.flavor, settings.handler_timeout)
    }

    /// Deliver `envelope` to the binding selected by `route`.
    pub async fn deliver(
        &self,
        route: &Route,
        envelope: &Envelope,
        recorder: &CallRecorder,
    ) -> Delivery {
        let binding = &route.binding;
        let context = DeliveryContext::for_delivery(self.flavor, binding, envelope);
        let call = AssertUnwindSafe(
            binding
                .handler()
                .handle(envelope.payload.clone(), context.clone()),
        )
        .catch_unwind()
        .map(|caught| {
            caught.unwrap_or_else(|panic| {
                Err(anyhow::anyhow!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                ))
            })
        });

        let started = Instant::now();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "handler timed out after {} ms",
                    limit.as_millis()
                )),
            },
            None => call.await,
        };
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(value) => InvocationOutcome::Returned(value),
            Err(err) => InvocationOutcome::Failed(format!("{err:#}")),
        };

        let sequence = recorder.record(InvocationRecord {
            sequence: 0,
            binding: binding.id(),
            handler: binding.name().to_owned(),
            mode: route.mode,
            envelope: envelope.clone(),
            context,
            outcome: outcome.clone(),
            recorded_at: Utc::now(),
        });
        log_delivery(binding.name(), sequence, envelope, &outcome, elapsed);

        Delivery {
            sequence,
            outcome,
            elapsed,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
