//! ---
//! tb_section: "03-logging"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Structured logging context and macros."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
/// Emit an informational log enriched with broker context.
#[macro_export]
macro_rules! tb_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            scope = ctx.scope.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            handler = ctx.handler.unwrap_or(""),
            sequence = ctx.sequence.unwrap_or_default(),
            flavor = ctx.flavor.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::tb_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a debug log enriched with broker context.
#[macro_export]
macro_rules! tb_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            scope = ctx.scope.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            handler = ctx.handler.unwrap_or(""),
            sequence = ctx.sequence.unwrap_or_default(),
            flavor = ctx.flavor.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::tb_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an error log enriched with broker context.
#[macro_export]
macro_rules! tb_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            scope = ctx.scope.unwrap_or(""),
            channel = ctx.channel.unwrap_or(""),
            handler = ctx.handler.unwrap_or(""),
            sequence = ctx.sequence.unwrap_or_default(),
            flavor = ctx.flavor.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::tb_error!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
