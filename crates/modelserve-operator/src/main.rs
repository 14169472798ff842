//! modelserve - Kubernetes operator serving ML models from ServeRequest resources

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;

use modelserve_admission::{serve, WebhookState};
use modelserve_common::telemetry::{init_telemetry, TelemetryConfig};
use modelserve_common::OperatorConfig;
use modelserve_operator::{
    crd_manifest, ensure_crds_installed, webhook_manifests, Cli, Commands, WebhookArgs,
    WebhookConfigArgs, WebhookTarget,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - aws-lc-rs backs both the kube client and the
    // webhook listener
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {:?}. \
             The operator cannot talk TLS without it.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let service_name = match &cli.command {
        Commands::Crd => {
            println!("{}", crd_manifest()?);
            return Ok(());
        }
        Commands::WebhookConfig(args) => {
            println!("{}", webhook_manifests(&webhook_target(args)?)?);
            return Ok(());
        }
        Commands::Controller(_) => "modelserve-controller",
        Commands::Webhook(_) => "modelserve-webhook",
    };

    init_telemetry(TelemetryConfig {
        service_name: service_name.to_string(),
        otlp_endpoint: cli.otlp_endpoint.clone(),
        json: !cli.log_text,
    })?;

    match cli.command {
        Commands::Controller(args) => run_controller(args.to_config()).await,
        Commands::Webhook(args) => run_webhook(args).await,
        Commands::Crd | Commands::WebhookConfig(_) => Ok(()),
    }
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(
        gateway = %config.gateway.host,
        concurrency = config.concurrency,
        reconcile_timeout_secs = config.reconcile_timeout.as_secs(),
        "starting modelserve controller"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;
    modelserve_controller::run_controller(client, Arc::new(config)).await;

    tracing::info!("modelserve controller shutting down");
    Ok(())
}

async fn run_webhook(args: WebhookArgs) -> anyhow::Result<()> {
    let config = args.config.to_config();
    if config.token_secret.is_insecure_default() {
        tracing::warn!(
            "TOKEN_SECRET is not set; admission tokens are verified with the built-in insecure secret"
        );
    }

    let server = args.server_config();
    tracing::info!(addr = %server.addr, "starting modelserve admission webhook");
    serve(server, Arc::new(WebhookState::new(&config))).await?;
    Ok(())
}

fn webhook_target(args: &WebhookConfigArgs) -> anyhow::Result<WebhookTarget> {
    let ca_bundle = args
        .ca_bundle
        .as_ref()
        .map(|path| {
            std::fs::read(path)
                .with_context(|| format!("Failed to read CA bundle {}", path.display()))
        })
        .transpose()?;
    Ok(WebhookTarget {
        service: args.service.clone(),
        namespace: args.namespace.clone(),
        port: args.port,
        ca_bundle,
    })
}
