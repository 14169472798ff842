//! Desired child objects of a ServeRequest
//!
//! Every child is named exactly like its parent and carries a controller
//! owner reference to it, so deleting the ServeRequest cascades to them.
//! Builders are pure functions of the parent identity, the defaulted spec
//! and the operator config.

mod endpoint;
mod route;
mod workload;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use modelserve_common::crd::{ServeRequest, ServeRequestSpec};
use modelserve_common::{Error, OperatorConfig, APP_LABEL_KEY, APP_LABEL_VALUE, OWNER_LABEL_KEY};

pub use endpoint::{build_endpoint, SERVICE_PORT};
pub use route::{build_route, build_strip_prefix, middleware_name, MIDDLEWARES_ANNOTATION};
pub use workload::{build_workload, runtime_args, RUNTIME_CONTAINER};

/// Name, namespace and owner reference shared by all children of one parent
#[derive(Clone, Debug, PartialEq)]
pub struct ChildIdentity {
    /// Name of the parent, reused for every child
    pub name: String,
    /// Namespace of the parent and its children
    pub namespace: String,
    /// Controller reference back to the parent
    pub owner: OwnerReference,
}

impl ChildIdentity {
    /// Derive the identity from a persisted ServeRequest.
    ///
    /// Fails when the object has no namespace or UID, which only happens for
    /// objects that never went through the API server.
    pub fn from_parent(parent: &ServeRequest) -> Result<Self, Error> {
        let name = parent.name_any();
        let namespace = parent.namespace().ok_or_else(|| {
            Error::validation_for_field(&name, "metadata.namespace", "ServeRequest must be namespaced")
        })?;
        let mut owner = parent.controller_owner_ref(&()).ok_or_else(|| {
            Error::internal_with_context(format!("ServeRequest {name} has no UID"), "children")
        })?;
        owner.block_owner_deletion = Some(true);
        Ok(Self {
            name,
            namespace,
            owner,
        })
    }

    /// `{app: model-serve, owner: <name>}`
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (APP_LABEL_KEY.to_string(), APP_LABEL_VALUE.to_string()),
            (OWNER_LABEL_KEY.to_string(), self.name.clone()),
        ])
    }

    /// Label selector matching the parent's runtime pods
    pub fn label_selector(&self) -> String {
        format!(
            "{APP_LABEL_KEY}={APP_LABEL_VALUE},{OWNER_LABEL_KEY}={}",
            self.name
        )
    }

    /// Named, labelled and owned metadata shared by every child
    pub(crate) fn metadata(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }
}

/// The full desired child set of one ServeRequest
#[derive(Clone, Debug)]
pub struct ChildSet {
    /// Runtime Deployment
    pub workload: Deployment,
    /// ClusterIP Service in front of the runtime
    pub endpoint: Service,
    /// Strip-prefix middleware config consumed by the route
    pub strip_prefix: ConfigMap,
    /// Gateway Ingress
    pub route: Ingress,
}

/// Build every child for `parent` using the defaulted `spec`
pub fn build_children(
    identity: &ChildIdentity,
    spec: &ServeRequestSpec,
    config: &OperatorConfig,
) -> Result<ChildSet, Error> {
    Ok(ChildSet {
        workload: build_workload(identity, spec, &config.runtime),
        endpoint: build_endpoint(identity, &config.runtime),
        strip_prefix: build_strip_prefix(identity)?,
        route: build_route(identity, &config.gateway),
    })
}
