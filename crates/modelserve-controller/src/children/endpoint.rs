//! ClusterIP Service in front of the runtime pods

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use modelserve_common::RuntimeConfig;

use super::ChildIdentity;

/// Port exposed by the Service; the route targets it
pub const SERVICE_PORT: i32 = 80;

/// Build the Service selecting the parent's runtime pods by owner label
pub fn build_endpoint(identity: &ChildIdentity, runtime: &RuntimeConfig) -> Service {
    Service {
        metadata: identity.metadata(),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(identity.labels()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(runtime.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
