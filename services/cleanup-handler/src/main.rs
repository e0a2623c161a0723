//! reaper Cleanup Handler
//!
//! Lambda-hosted custom-resource handler that tears down a cluster's
//! Karpenter footprint when its stack is deleted: node pools and node
//! classes first, then the EC2 instances they provisioned, then the
//! instance profiles holding the node role.

use anyhow::Result;
use reaper_aws::Credentials;
use reaper_cleanup_handler::{
    config::Config,
    providers::LiveProviderFactory,
    response::CfnResponder,
    runtime::{self, RuntimeClient},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to REAPER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting reaper cleanup handler");
    info!(
        mode = %config.mode,
        kubectl_path = %config.kubectl_path.display(),
        "Configuration loaded"
    );

    let creds = Credentials::from_env()?;
    let factory = LiveProviderFactory::new(creds);
    let responder = CfnResponder::new();
    let client = RuntimeClient::from_env()?;

    runtime::run(client, config, responder, &factory).await
}
