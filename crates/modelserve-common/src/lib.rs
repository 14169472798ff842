//! Common types for modelserve: the ServeRequest CRD, operator configuration,
//! errors, Kubernetes Events and telemetry setup.

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod telemetry;

pub use config::{GatewayConfig, OperatorConfig, RuntimeConfig, SigningSecret, SpecDefaults};
pub use error::Error;

/// API group of the ServeRequest CRD
pub const API_GROUP: &str = "modelserve.dev";

/// Field manager / reporting component used for writes made by the operator
pub const FIELD_MANAGER: &str = "modelserve-controller";

/// Annotation carrying the optional signed token checked at admission
pub const AUTH_TOKEN_ANNOTATION: &str = "modelserve.dev/auth-token";

/// Pod annotation correlating a runtime pod to the model catalog record
pub const MODEL_UUID_ANNOTATION: &str = "modelserve.dev/model-uuid";

/// Label key identifying workloads managed by this operator
pub const APP_LABEL_KEY: &str = "app";

/// Fixed value of the `app` label on every managed workload
pub const APP_LABEL_VALUE: &str = "model-serve";

/// Label key naming the ServeRequest that owns a workload
pub const OWNER_LABEL_KEY: &str = "owner";
