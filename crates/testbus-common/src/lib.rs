//! ---
//! tb_section: "01-core-functionality"
//! tb_subsection: "module"
//! tb_type: "source"
//! tb_scope: "code"
//! tb_description: "Shared settings and tracing primitives for the broker simulation."
//! tb_version: "v0.0.0-prealpha"
//! tb_owner: "tbd"
//! ---
//! Shared primitives for the testbus workspace.
//! This crate exposes the broker settings model (flavour, error policy,
//! competing-consumer selection, codec choice) and tracing initialisation
//! consumed by the simulation core and the integration suites.

pub mod config;
pub mod logging;

pub use config::{
    BrokerFlavor, BrokerSettings, CodecKind, CompetingPolicy, DeliveryMode, ErrorPolicy,
    LoadedBrokerSettings, LoggingConfig,
};
pub use logging::{init_tracing, LogFormat};
