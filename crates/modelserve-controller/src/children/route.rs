//! Gateway route and its strip-prefix middleware
//!
//! Requests for `/<name>/...` enter through the gateway Ingress, pass the
//! optional auth middleware, have `/<name>` stripped, and reach the Service.
//! The middleware definition ships as YAML inside a ConfigMap so the operator
//! does not depend on the gateway's CRDs being installed.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use serde_json::json;

use modelserve_common::{Error, GatewayConfig};

use super::endpoint::SERVICE_PORT;
use super::ChildIdentity;

/// Ingress annotation listing the middleware chain
pub const MIDDLEWARES_ANNOTATION: &str = "traefik.ingress.kubernetes.io/router.middlewares";

/// ConfigMap key holding the middleware manifest
pub const MIDDLEWARE_KEY: &str = "middleware.yaml";

const MIDDLEWARE_API_VERSION: &str = "traefik.containo.us/v1alpha1";

/// Name of the strip-prefix middleware for a ServeRequest
pub fn middleware_name(name: &str) -> String {
    format!("{name}-stripprefix")
}

fn path_prefix(name: &str) -> String {
    format!("/{name}")
}

/// Reference to a namespaced middleware in the annotation format
fn middleware_ref(namespace: &str, middleware: &str) -> String {
    format!("{namespace}-{middleware}@kubernetescrd")
}

/// Build the ConfigMap carrying the strip-prefix middleware manifest
pub fn build_strip_prefix(identity: &ChildIdentity) -> Result<ConfigMap, Error> {
    let middleware = json!({
        "apiVersion": MIDDLEWARE_API_VERSION,
        "kind": "Middleware",
        "metadata": {
            "name": middleware_name(&identity.name),
            "namespace": identity.namespace,
        },
        "spec": {
            "stripPrefix": {
                "prefixes": [path_prefix(&identity.name)],
            },
        },
    });
    let manifest = serde_yaml::to_string(&middleware)
        .map_err(|e| Error::serialization_for("Middleware", e.to_string()))?;

    Ok(ConfigMap {
        metadata: identity.metadata(),
        data: Some(BTreeMap::from([(MIDDLEWARE_KEY.to_string(), manifest)])),
        ..Default::default()
    })
}

/// Build the gateway Ingress for the ServeRequest's path prefix
pub fn build_route(identity: &ChildIdentity, gateway: &GatewayConfig) -> Ingress {
    let mut chain = Vec::with_capacity(2);
    if let Some(auth) = &gateway.auth_middleware {
        chain.push(middleware_ref(&identity.namespace, auth));
    }
    chain.push(middleware_ref(
        &identity.namespace,
        &middleware_name(&identity.name),
    ));

    let mut metadata = identity.metadata();
    metadata.annotations = Some(BTreeMap::from([(
        MIDDLEWARES_ANNOTATION.to_string(),
        chain.join(","),
    )]));

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: Some(gateway.ingress_class.clone()),
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(path_prefix(&identity.name)),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: identity.name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(SERVICE_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
