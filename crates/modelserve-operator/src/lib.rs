//! modelserve operator: command line, startup and cluster registration
//!
//! The binary runs either the ServeRequest controller or the admission
//! webhook server, and can print the manifests needed to register both.

#![deny(missing_docs)]

pub mod cli;
pub mod startup;
pub mod webhook_config;

pub use cli::{Cli, Commands, ConfigArgs, WebhookArgs, WebhookConfigArgs};
pub use startup::{crd_manifest, ensure_crds_installed};
pub use webhook_config::{
    mutating_webhook_configuration, validating_webhook_configuration, webhook_manifests,
    WebhookTarget,
};
