//! Kubernetes Events for ServeRequest lifecycle transitions.
//!
//! Each milestone of a ServeRequest maps to one [`LifecycleEvent`]; its reason
//! and note show up in `kubectl describe serverequest <name>`. Publishing
//! never fails the caller: errors from the API server are logged and dropped.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::warn;

use crate::crd::ServeRequest;

/// Milestone in the life of a ServeRequest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Deployment created; artifact download started
    WorkloadCreated,
    /// API server refused the Deployment
    WorkloadFailed {
        /// Message written to status
        message: String,
    },
    /// Service created
    EndpointCreated,
    /// Ingress and strip-prefix config created
    RouteCreated,
    /// First available replica observed
    ModelRunning {
        /// URL reported in status
        gateway_url: String,
    },
}

impl LifecycleEvent {
    /// REASON column of `kubectl get events`
    pub fn reason(&self) -> &'static str {
        match self {
            Self::WorkloadCreated => "WorkloadCreated",
            Self::WorkloadFailed { .. } => "WorkloadFailed",
            Self::EndpointCreated => "EndpointCreated",
            Self::RouteCreated => "RouteCreated",
            Self::ModelRunning { .. } => "ModelRunning",
        }
    }

    /// `Create` for child objects, `Reconcile` for observed transitions
    pub fn action(&self) -> &'static str {
        match self {
            Self::ModelRunning { .. } => "Reconcile",
            _ => "Create",
        }
    }

    /// Only a refused workload is a warning
    pub fn event_type(&self) -> EventType {
        match self {
            Self::WorkloadFailed { .. } => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Human-readable note for the request named `name`
    pub fn note(&self, name: &str) -> String {
        match self {
            Self::WorkloadCreated => format!("Created Deployment {name}; downloading model"),
            Self::WorkloadFailed { message } => message.clone(),
            Self::EndpointCreated => format!("Created Service {name}"),
            Self::RouteCreated => format!("Created Ingress {name} for /{name}/"),
            Self::ModelRunning { gateway_url } => format!("Model reachable at {gateway_url}"),
        }
    }

    /// Event as recorded against the request named `name`
    pub fn to_event(&self, name: &str) -> Event {
        Event {
            type_: self.event_type(),
            reason: self.reason().to_string(),
            note: Some(self.note(name)),
            action: self.action().to_string(),
            secondary: None,
        }
    }
}

/// Records lifecycle events against ServeRequests.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` on `request`.
    async fn publish(&self, request: &ServeRequest, event: LifecycleEvent);
}

/// Publisher backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, request: &ServeRequest, event: LifecycleEvent) {
        let name = request.name_any();
        let reference = request.object_ref(&());
        if let Err(e) = self
            .recorder
            .publish(&event.to_event(&name), &reference)
            .await
        {
            warn!(request = %name, reason = event.reason(), error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _request: &ServeRequest, _event: LifecycleEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_workload_is_the_only_warning() {
        let failed = LifecycleEvent::WorkloadFailed {
            message: "Failed to create workload: quota exceeded".to_string(),
        };
        assert_eq!(failed.event_type(), EventType::Warning);
        assert_eq!(failed.note("demo"), "Failed to create workload: quota exceeded");

        for event in [
            LifecycleEvent::WorkloadCreated,
            LifecycleEvent::EndpointCreated,
            LifecycleEvent::RouteCreated,
        ] {
            assert_eq!(event.event_type(), EventType::Normal);
            assert_eq!(event.action(), "Create");
        }
    }

    #[test]
    fn running_event_points_at_the_gateway() {
        let event = LifecycleEvent::ModelRunning {
            gateway_url: "http://localhost/demo/".to_string(),
        }
        .to_event("demo");
        assert_eq!(event.reason, "ModelRunning");
        assert_eq!(event.action, "Reconcile");
        assert_eq!(event.note.as_deref(), Some("Model reachable at http://localhost/demo/"));
    }

    #[test]
    fn route_note_names_the_path_prefix() {
        assert_eq!(
            LifecycleEvent::RouteCreated.note("llama"),
            "Created Ingress llama for /llama/"
        );
    }
}
