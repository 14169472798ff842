//! Runtime Deployment construction
//!
//! The pod has three containers sharing an `emptyDir` model volume:
//! - `download-model` (init): copies the artifact from the object store
//! - `llama-server`: the inference runtime serving `/models/<modelName>`
//! - `monitor-sidecar`: reports runtime identity to the telemetry store

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, EnvVarSource, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use modelserve_common::crd::ServeRequestSpec;
use modelserve_common::{RuntimeConfig, MODEL_UUID_ANNOTATION};

use super::ChildIdentity;

/// Name of the inference runtime container
pub const RUNTIME_CONTAINER: &str = "llama-server";

const INIT_CONTAINER: &str = "download-model";
const SIDECAR_CONTAINER: &str = "monitor-sidecar";
const MODEL_VOLUME: &str = "model-volume";
const MODEL_MOUNT_PATH: &str = "/models";
const SCRIPT_VOLUME: &str = "monitor-script";
const SCRIPT_MOUNT_PATH: &str = "/scripts";

// Artifact coordinates reach the shell only through the environment.
const DOWNLOAD_SCRIPT: &str = r#"mc alias set source "http://${SOURCE_ENDPOINT}" "${MINIO_ACCESS_KEY}" "${MINIO_SECRET_KEY}" && mc cp "source/${SOURCE_BUCKET}/${SOURCE_PATH}" "${MODEL_DEST}""#;
const SIDECAR_SCRIPT: &str =
    "pip install psycopg2-binary psutil requests && python /scripts/monitor.py";

/// Runtime launch arguments: model path, bind address, port, then `runtimeParams`
pub fn runtime_args(spec: &ServeRequestSpec, port: i32) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        model_path(spec),
        "--host".to_string(),
        "0.0.0.0".to_string(),
        "--port".to_string(),
        port.to_string(),
    ];
    args.extend(spec.runtime_param_tokens());
    args
}

fn model_path(spec: &ServeRequestSpec) -> String {
    format!("{MODEL_MOUNT_PATH}/{}", spec.model_name)
}

/// Build the runtime Deployment. Resource requests are half the limits.
pub fn build_workload(
    identity: &ChildIdentity,
    spec: &ServeRequestSpec,
    runtime: &RuntimeConfig,
) -> Deployment {
    let labels = identity.labels();
    let annotations = BTreeMap::from([(
        MODEL_UUID_ANNOTATION.to_string(),
        spec.model_uuid.clone(),
    )]);

    Deployment {
        metadata: identity.metadata(),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    share_process_namespace: Some(true),
                    init_containers: Some(vec![download_container(spec, runtime)]),
                    containers: vec![
                        runtime_container(spec, runtime),
                        sidecar_container(identity, spec, runtime),
                    ],
                    volumes: Some(vec![
                        Volume {
                            name: MODEL_VOLUME.to_string(),
                            empty_dir: Some(EmptyDirVolumeSource {
                                size_limit: Some(Quantity(runtime.model_volume_size.clone())),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: SCRIPT_VOLUME.to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: runtime.monitor_script_config_map.clone(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn download_container(spec: &ServeRequestSpec, runtime: &RuntimeConfig) -> Container {
    let env = vec![
        plain_env("SOURCE_ENDPOINT", &spec.source_endpoint),
        plain_env("SOURCE_BUCKET", &spec.source_bucket),
        plain_env("SOURCE_PATH", &spec.source_path),
        plain_env("MODEL_DEST", &model_path(spec)),
        secret_env("MINIO_ACCESS_KEY", &runtime.credentials_secret),
        secret_env("MINIO_SECRET_KEY", &runtime.credentials_secret),
    ];

    Container {
        name: INIT_CONTAINER.to_string(),
        image: Some(runtime.loader_image.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![DOWNLOAD_SCRIPT.to_string()]),
        env: Some(env),
        volume_mounts: Some(vec![model_mount()]),
        ..Default::default()
    }
}

fn runtime_container(spec: &ServeRequestSpec, runtime: &RuntimeConfig) -> Container {
    Container {
        name: RUNTIME_CONTAINER.to_string(),
        image: Some(spec.image.clone()),
        args: Some(runtime_args(spec, runtime.port)),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: runtime.port,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![model_mount()]),
        resources: Some(resources(
            &format!("{}Mi", spec.memory_limit_mb / 2),
            &format!("{}m", spec.cpu_limit_millicores / 2),
            &format!("{}Mi", spec.memory_limit_mb),
            &format!("{}m", spec.cpu_limit_millicores),
        )),
        readiness_probe: Some(health_probe(runtime, 30, 10)),
        liveness_probe: Some(health_probe(runtime, 60, 30)),
        ..Default::default()
    }
}

fn sidecar_container(
    identity: &ChildIdentity,
    spec: &ServeRequestSpec,
    runtime: &RuntimeConfig,
) -> Container {
    Container {
        name: SIDECAR_CONTAINER.to_string(),
        image: Some(runtime.sidecar_image.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![SIDECAR_SCRIPT.to_string()]),
        env: Some(vec![
            plain_env("SERVER_UUID", &identity.name),
            plain_env("MODEL_UUID", &spec.model_uuid),
            plain_env("MODEL_NAME", &spec.model_name),
            EnvVar {
                name: "DATABASE_URL".to_string(),
                value_from: Some(EnvVarSource {
                    config_map_key_ref: Some(ConfigMapKeySelector {
                        name: runtime.telemetry_config_map.clone(),
                        key: "DATABASE_URL".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: SCRIPT_VOLUME.to_string(),
            mount_path: SCRIPT_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        resources: Some(resources("64Mi", "50m", "128Mi", "100m")),
        ..Default::default()
    }
}

fn health_probe(runtime: &RuntimeConfig, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(runtime.health_path.clone()),
            port: IntOrString::Int(runtime.port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        ..Default::default()
    }
}

fn resources(req_mem: &str, req_cpu: &str, lim_mem: &str, lim_cpu: &str) -> ResourceRequirements {
    let quantities = |mem: &str, cpu: &str| {
        BTreeMap::from([
            ("memory".to_string(), Quantity(mem.to_string())),
            ("cpu".to_string(), Quantity(cpu.to_string())),
        ])
    };
    ResourceRequirements {
        requests: Some(quantities(req_mem, req_cpu)),
        limits: Some(quantities(lim_mem, lim_cpu)),
        ..Default::default()
    }
}

fn model_mount() -> VolumeMount {
    VolumeMount {
        name: MODEL_VOLUME.to_string(),
        mount_path: MODEL_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn secret_env(key: &str, secret: &str) -> EnvVar {
    EnvVar {
        name: key.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{identity, spec};
    use super::*;

    fn pod_spec(deployment: &Deployment) -> &PodSpec {
        deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .unwrap()
    }

    fn container<'a>(pod: &'a PodSpec, name: &str) -> &'a Container {
        pod.containers.iter().find(|c| c.name == name).unwrap()
    }

    fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
        container
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)?
            .value
            .as_deref()
    }

    #[test]
    fn args_append_runtime_params_verbatim() {
        assert_eq!(
            runtime_args(&spec(), 8080),
            vec![
                "-m",
                "/models/llama-7b.gguf",
                "--host",
                "0.0.0.0",
                "--port",
                "8080",
                "--ctx-size",
                "4096",
                "--threads",
                "8"
            ]
        );
    }

    #[test]
    fn requests_are_half_of_limits() {
        let deployment = build_workload(&identity("demo"), &spec(), &RuntimeConfig::default());
        let runtime = container(pod_spec(&deployment), RUNTIME_CONTAINER);
        let resources = runtime.resources.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        assert_eq!(limits["memory"], Quantity("4096Mi".to_string()));
        assert_eq!(limits["cpu"], Quantity("2000m".to_string()));
        assert_eq!(requests["memory"], Quantity("2048Mi".to_string()));
        assert_eq!(requests["cpu"], Quantity("1000m".to_string()));
    }

    #[test]
    fn liveness_waits_longer_than_readiness() {
        let deployment = build_workload(&identity("demo"), &spec(), &RuntimeConfig::default());
        let runtime = container(pod_spec(&deployment), RUNTIME_CONTAINER);
        let readiness = runtime.readiness_probe.as_ref().unwrap();
        let liveness = runtime.liveness_probe.as_ref().unwrap();
        assert_eq!(readiness.initial_delay_seconds, Some(30));
        assert_eq!(liveness.initial_delay_seconds, Some(60));
        let get = readiness.http_get.as_ref().unwrap();
        assert_eq!(get.path.as_deref(), Some("/health"));
        assert_eq!(get.port, IntOrString::Int(8080));
    }

    #[test]
    fn selector_and_template_carry_owner_labels() {
        let deployment = build_workload(&identity("demo"), &spec(), &RuntimeConfig::default());
        let dspec = deployment.spec.as_ref().unwrap();
        let selector = dspec.selector.match_labels.as_ref().unwrap();
        assert_eq!(selector["app"], "model-serve");
        assert_eq!(selector["owner"], "demo");
        let template_meta = dspec.template.metadata.as_ref().unwrap();
        assert_eq!(template_meta.labels.as_ref(), Some(selector));
        assert_eq!(
            template_meta.annotations.as_ref().unwrap()[MODEL_UUID_ANNOTATION],
            "u-1"
        );
        assert_eq!(dspec.replicas, Some(1));
    }

    #[test]
    fn init_container_downloads_into_shared_volume() {
        let deployment = build_workload(&identity("demo"), &spec(), &RuntimeConfig::default());
        let pod = pod_spec(&deployment);
        let init = &pod.init_containers.as_ref().unwrap()[0];
        assert_eq!(init.image.as_deref(), Some("minio/mc:latest"));
        assert_eq!(env_value(init, "SOURCE_BUCKET"), Some("inference-models"));
        assert_eq!(env_value(init, "SOURCE_PATH"), Some("models/llama-7b.gguf"));
        assert_eq!(env_value(init, "MODEL_DEST"), Some("/models/llama-7b.gguf"));
        let mounts = init.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].name, MODEL_VOLUME);
        let runtime = container(pod, RUNTIME_CONTAINER);
        assert_eq!(runtime.volume_mounts.as_ref().unwrap()[0].name, MODEL_VOLUME);
        assert!(!init.args.as_ref().unwrap()[0].contains("llama-7b"));
    }

    #[test]
    fn credentials_come_from_secret() {
        let deployment = build_workload(&identity("demo"), &spec(), &RuntimeConfig::default());
        let init = &pod_spec(&deployment).init_containers.as_ref().unwrap()[0];
        let access = init
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == "MINIO_ACCESS_KEY")
            .unwrap();
        let secret_ref = access
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret_ref.name, "inference-secrets");
        assert!(access.value.is_none());
    }

    #[test]
    fn sidecar_reports_identity() {
        let deployment = build_workload(&identity("demo"), &spec(), &RuntimeConfig::default());
        let sidecar = container(pod_spec(&deployment), SIDECAR_CONTAINER);
        assert_eq!(env_value(sidecar, "SERVER_UUID"), Some("demo"));
        assert_eq!(env_value(sidecar, "MODEL_UUID"), Some("u-1"));
        assert_eq!(env_value(sidecar, "MODEL_NAME"), Some("llama-7b.gguf"));
    }
}
