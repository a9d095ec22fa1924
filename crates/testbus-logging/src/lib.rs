//! ---
//! tb_section: "03-logging"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Structured logging context and macros."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Context-enriched logging shared by the broker simulation crates.

use tracing::Level;

pub mod macros;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Scope identifier the event belongs to.
    pub scope: Option<&'a str>,
    /// Channel the message was published to.
    pub channel: Option<&'a str>,
    /// Handler name the event concerns.
    pub handler: Option<&'a str>,
    /// Invocation sequence number within the scope.
    pub sequence: Option<u64>,
    /// Emulated broker flavour.
    pub flavor: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a scope identifier.
    pub fn with_scope(mut self, scope: &'a str) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Attach a channel name.
    pub fn with_channel(mut self, channel: &'a str) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Attach a handler name.
    pub fn with_handler(mut self, handler: &'a str) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Attach an invocation sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Attach the broker flavour.
    pub fn with_flavor(mut self, flavor: &'a str) -> Self {
        self.flavor = Some(flavor);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with a success/fault outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default = LogContext::default();
    let ctx = context.unwrap_or(&default);
    // `tracing::event!` needs a constant level, so branch on the outcome.
    match outcome {
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            scope = ctx.scope.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            handler = ctx.handler.unwrap_or(""),
            sequence = ctx.sequence.unwrap_or_default(),
            flavor = ctx.flavor.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            scope = ctx.scope.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            handler = ctx.handler.unwrap_or(""),
            sequence = ctx.sequence.unwrap_or_default(),
            flavor = ctx.flavor.unwrap_or(""),
            message = %message
        ),
    }
}
