//! ---
//! tb_section: "02-broker-simulation"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Delivery logging, scope counters, and the prometheus exporter."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::recorder::InvocationOutcome;
use crate::types::Envelope;

/// Emit a structured log entry for one handler call.
pub fn log_delivery(
    handler: &str,
    sequence: u64,
    envelope: &Envelope,
    outcome: &InvocationOutcome,
    elapsed: Duration,
) {
    debug!(
        message_id = %envelope.id,
        channel = %envelope.channel,
        handler,
        sequence,
        success = outcome.is_success(),
        elapsed_us = elapsed.as_micros() as u64,
        "handler delivery"
    );
}

/// Snapshot of the activity inside one scope.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeMetrics {
    /// Publishes accepted, including re-publishes.
    pub published: u64,
    /// Handler calls that returned normally.
    pub delivered: u64,
    /// Handler calls that failed or timed out.
    pub failed: u64,
    /// Publishes no binding matched.
    pub unrouted: u64,
    /// Handler return values re-published.
    pub republished: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    unrouted: AtomicU64,
    republished: AtomicU64,
}

impl Counters {
    pub(crate) fn published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn republished(&self) {
        self.republished.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn outcome(&self, outcome: &InvocationOutcome) {
        if outcome.is_success() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.published,
            &self.delivered,
            &self.failed,
            &self.unrouted,
            &self.republished,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> ScopeMetrics {
        ScopeMetrics {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            republished: self.republished.load(Ordering::Relaxed),
        }
    }
}

/// Prometheus metric handles shared by every scope of a broker.
#[derive(Clone)]
pub struct BrokerMetricsExporter {
    published: IntCounter,
    delivered: IntCounter,
    failed: IntCounter,
    unrouted: IntCounter,
    handler_latency: Histogram,
}

impl BrokerMetricsExporter {
    /// Register broker metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published = IntCounter::with_opts(Opts::new(
            "testbus_messages_published_total",
            "Messages accepted by test broker scopes",
        ))?;
        let delivered = IntCounter::with_opts(Opts::new(
            "testbus_deliveries_total",
            "Handler calls that returned normally",
        ))?;
        let failed = IntCounter::with_opts(Opts::new(
            "testbus_delivery_failures_total",
            "Handler calls that failed or timed out",
        ))?;
        let unrouted = IntCounter::with_opts(Opts::new(
            "testbus_unrouted_total",
            "Publishes that matched no binding",
        ))?;
        let handler_latency = Histogram::with_opts(HistogramOpts::new(
            "testbus_handler_latency_seconds",
            "Time spent inside handlers per delivery",
        ))?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(delivered.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(unrouted.clone()))?;
        registry.register(Box::new(handler_latency.clone()))?;

        Ok(Self {
            published,
            delivered,
            failed,
            unrouted,
            handler_latency,
        })
    }

    pub(crate) fn observe_published(&self) {
        self.published.inc();
    }

    pub(crate) fn observe_unrouted(&self) {
        self.unrouted.inc();
    }

    pub(crate) fn observe_delivery(&self, outcome: &InvocationOutcome, elapsed: Duration) {
        if outcome.is_success() {
            self.delivered.inc();
        } else {
            self.failed.inc();
        }
        self.handler_latency.observe(elapsed.as_secs_f64());
    }
}

impl std::fmt::Debug for BrokerMetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerMetricsExporter").finish_non_exhaustive()
    }
}
