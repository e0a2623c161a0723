//! Invocation handler: decides what the event requires, runs the
//! teardown, and always reports back to CloudFormation.
//!
//! Everything past region resolution is inside the reporting boundary.
//! Teardown steps log their own failures and keep going where they can;
//! whatever still escapes becomes a SUCCESS response with the error in
//! the message, so stack deletion is never wedged on cleanup.

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::config::{CleanupMode, Config};
use crate::error::{CleanupError, InvocationError};
use crate::event::{CfnEvent, CfnResponse, InvocationContext, RequestType, ResponseStatus};
use crate::noderes::{resolve_tool, KubectlDriver};
use crate::profiles::cleanup_instance_profiles;
use crate::providers::{ProviderFactory, Providers};
use crate::response::CfnResponder;
use crate::waiter::wait_for_instances_terminated;

/// Handle one custom-resource event and report the outcome.
///
/// Returns the status that was reported. An error here means the event
/// could not be acted on at all (no region to bind clients to); the
/// caller turns that into an invocation error instead of a response.
pub async fn handle(
    event: &CfnEvent,
    context: &InvocationContext,
    config: &Config,
    responder: &CfnResponder,
    factory: &dyn ProviderFactory,
) -> Result<ResponseStatus, InvocationError> {
    let cluster = &event.resource_properties.cluster_name;
    info!(
        request_type = ?event.request_type,
        stack_id = %event.stack_id,
        cluster = %cluster,
        "Handling custom resource event"
    );

    if event.request_type != RequestType::Delete {
        respond(responder, event, context, ResponseStatus::Success, "No cleanup needed").await;
        return Ok(ResponseStatus::Success);
    }

    let region = config.resolve_region(event.resource_properties.region.as_deref())?;
    let providers = factory.for_region(&region);

    let (status, message) = match teardown(cluster, config, &providers).await {
        Ok(()) => (
            ResponseStatus::Success,
            "Karpenter resources cleaned up successfully".to_string(),
        ),
        Err(e) if e.is_prereq_missing() => {
            error!(error = %e, "Cleanup prerequisite missing");
            (ResponseStatus::Failed, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Cleanup ran into errors");
            (
                ResponseStatus::Success,
                format!("Cleanup attempted with errors: {e}"),
            )
        }
    };

    respond(responder, event, context, status, message).await;
    Ok(status)
}

/// Tear down the cluster's Karpenter footprint.
///
/// Ordering matters: deleting node pools first lets Karpenter drain and
/// deregister its instances, so the wait that follows observes them
/// leaving. In direct mode (or the auto fallback) there is no drain, so
/// the waiter terminates whatever it finds instead.
async fn teardown(
    cluster: &str,
    config: &Config,
    providers: &Providers,
) -> Result<(), CleanupError> {
    let tool = resolve_tool(&config.kubectl_path);
    let kubectl: Option<PathBuf> = match config.mode {
        CleanupMode::Direct => None,
        CleanupMode::Graceful => match tool {
            Some(path) => Some(path),
            None => {
                return Err(CleanupError::PrereqMissing {
                    path: config.kubectl_path.display().to_string(),
                })
            }
        },
        CleanupMode::Auto => {
            if tool.is_none() {
                info!(
                    kubectl_path = %config.kubectl_path.display(),
                    "kubectl not available, falling back to direct termination"
                );
            }
            tool
        }
    };

    let force_terminate = kubectl.is_none();
    if let Some(kubectl) = kubectl {
        tokio::fs::create_dir_all(&config.scratch_dir).await?;
        let kubeconfig = match providers
            .cluster
            .write_kubeconfig(cluster, &config.scratch_dir)
            .await
        {
            Ok(path) => {
                info!(path = %path.display(), "Wrote kubeconfig");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, "Could not build kubeconfig, using ambient configuration");
                None
            }
        };

        let driver = KubectlDriver::new(kubectl, kubeconfig);
        if let Err(e) = driver.delete_all_node_pools().await {
            warn!(error = %e, "Node pool deletion failed");
        }
        if let Err(e) = driver.delete_all_node_classes().await {
            warn!(error = %e, "Node class deletion failed");
        }
    }

    if !wait_for_instances_terminated(
        providers.compute.as_ref(),
        cluster,
        force_terminate,
        &config.poll_policy(),
    )
    .await
    {
        info!("Instances still present after the wait, continuing with cleanup");
    }

    let role = format!("KarpenterNodeRole-{cluster}");
    cleanup_instance_profiles(providers.profiles.as_ref(), &role, &config.retry_policy()).await;

    Ok(())
}

/// Report the outcome to the response URL. Delivery failures are logged
/// and swallowed; there is nobody left to report them to.
async fn respond(
    responder: &CfnResponder,
    event: &CfnEvent,
    context: &InvocationContext,
    status: ResponseStatus,
    message: impl Into<String>,
) {
    let message = message.into();
    info!(status = ?status, message = %message, "Reporting to CloudFormation");
    let response = CfnResponse::for_event(event, context, status, message);
    if let Err(e) = responder.send(&event.response_url, &response).await {
        error!(error = %e, "Could not deliver response to CloudFormation");
    }
}
