//! Startup utilities: CRD installation and manifest rendering

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use modelserve_common::crd::ServeRequest;
use modelserve_common::FIELD_MANAGER;

/// Install or update the ServeRequest CRD with server-side apply.
///
/// Runs on every controller start so the installed schema always matches
/// the running operator version.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!(crd = ServeRequest::crd_name(), "installing CRD");
    crds.patch(
        ServeRequest::crd_name(),
        &params,
        &Patch::Apply(&ServeRequest::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ServeRequest CRD: {}", e))?;

    tracing::info!("ServeRequest CRD installed/updated");
    Ok(())
}

/// ServeRequest CRD as YAML
pub fn crd_manifest() -> anyhow::Result<String> {
    serde_yaml::to_string(&ServeRequest::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))
}
