//! Admission webhook registrations
//!
//! The API server calls the mutating hook on create and update and the
//! validating hook on create, update and delete. Both fail closed.

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use modelserve_admission::webhook::{MUTATE_PATH, VALIDATE_PATH};
use modelserve_common::API_GROUP;

/// Name of the MutatingWebhookConfiguration
pub const MUTATING_CONFIG_NAME: &str = "modelserve-defaulter";
/// Name of the ValidatingWebhookConfiguration
pub const VALIDATING_CONFIG_NAME: &str = "modelserve-validator";

const TIMEOUT_SECONDS: i32 = 10;

/// Service through which the API server reaches the webhook server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    /// Service name
    pub service: String,
    /// Service namespace
    pub namespace: String,
    /// Service port
    pub port: i32,
    /// PEM CA bundle for the serving certificate
    pub ca_bundle: Option<Vec<u8>>,
}

impl WebhookTarget {
    fn client_config(&self, path: &str) -> WebhookClientConfig {
        WebhookClientConfig {
            service: Some(ServiceReference {
                name: self.service.clone(),
                namespace: self.namespace.clone(),
                path: Some(path.to_string()),
                port: Some(self.port),
            }),
            ca_bundle: self.ca_bundle.clone().map(ByteString),
            ..Default::default()
        }
    }
}

fn serve_request_rule(operations: &[&str]) -> RuleWithOperations {
    RuleWithOperations {
        operations: Some(operations.iter().map(|op| op.to_string()).collect()),
        api_groups: Some(vec![API_GROUP.to_string()]),
        api_versions: Some(vec!["v1alpha1".to_string()]),
        resources: Some(vec!["serverequests".to_string()]),
        scope: Some("Namespaced".to_string()),
    }
}

/// Registration of the defaulting hook
pub fn mutating_webhook_configuration(target: &WebhookTarget) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(MUTATING_CONFIG_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: format!("mserverequest.{API_GROUP}"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            match_policy: Some("Equivalent".to_string()),
            timeout_seconds: Some(TIMEOUT_SECONDS),
            rules: Some(vec![serve_request_rule(&["CREATE", "UPDATE"])]),
            client_config: target.client_config(MUTATE_PATH),
            ..Default::default()
        }]),
    }
}

/// Registration of the validating hook
pub fn validating_webhook_configuration(target: &WebhookTarget) -> ValidatingWebhookConfiguration {
    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(VALIDATING_CONFIG_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![ValidatingWebhook {
            name: format!("vserverequest.{API_GROUP}"),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            match_policy: Some("Equivalent".to_string()),
            timeout_seconds: Some(TIMEOUT_SECONDS),
            rules: Some(vec![serve_request_rule(&["CREATE", "UPDATE", "DELETE"])]),
            client_config: target.client_config(VALIDATE_PATH),
            ..Default::default()
        }]),
    }
}

/// Both registrations as a multi-document YAML stream
pub fn webhook_manifests(target: &WebhookTarget) -> anyhow::Result<String> {
    let mutating = serde_yaml::to_string(&mutating_webhook_configuration(target))
        .map_err(|e| anyhow::anyhow!("Failed to serialize MutatingWebhookConfiguration: {}", e))?;
    let validating = serde_yaml::to_string(&validating_webhook_configuration(target))
        .map_err(|e| {
            anyhow::anyhow!("Failed to serialize ValidatingWebhookConfiguration: {}", e)
        })?;
    Ok(format!("{mutating}---\n{validating}"))
}
