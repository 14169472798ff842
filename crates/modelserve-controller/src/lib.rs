//! ServeRequest controller
//!
//! Turns each ServeRequest into a running inference workload: a Deployment
//! with a model-download init step and a telemetry sidecar, a Service in
//! front of it, and a gateway route. Status reports progress back to the
//! ServeRequest.

#![deny(missing_docs)]

pub mod children;
pub mod client;
pub mod controller;
pub mod pipeline;
pub mod runner;
pub mod status;

pub use children::{build_children, ChildIdentity, ChildSet};
pub use client::{CreateOutcome, ServeKubeClient, ServeKubeClientImpl};
pub use controller::{backoff_delay, error_policy, reconcile, Context};
pub use runner::run_controller;
