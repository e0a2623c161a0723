//! Instance terminator/waiter.
//!
//! Polls EC2 for Karpenter-managed instances that have not finished
//! terminating and blocks until none remain or the deadline passes.
//! In the direct teardown path each cycle also issues a terminate for
//! everything still visible; termination is idempotent, so repeating it
//! for instances already shutting down is harmless.

use tracing::{debug, info, instrument, warn};

use reaper_retry::PollPolicy;

use crate::providers::ComputeProvider;

/// Wait until no tagged instances remain in a non-terminal state.
///
/// Returns `true` when the set drained within the deadline, `false`
/// otherwise. Never errors: query failures count as "instances may
/// remain" and the poll continues; the caller proceeds either way.
#[instrument(skip(compute, policy))]
pub async fn wait_for_instances_terminated(
    compute: &dyn ComputeProvider,
    cluster: &str,
    force_terminate: bool,
    policy: &PollPolicy,
) -> bool {
    let probe = || async move {
        let instances = match compute.active_karpenter_instances(cluster).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Instance query failed, will retry until the deadline");
                return None;
            }
        };

        if instances.is_empty() {
            return Some(());
        }

        info!(
            count = instances.len(),
            "Waiting for Karpenter instances to terminate"
        );

        if force_terminate {
            let ids: Vec<String> = instances.into_iter().map(|i| i.id).collect();
            info!(ids = ?ids, "Terminating instances");
            match compute.terminate_instances(&ids).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("Some instances were already gone before termination")
                }
                Err(e) => warn!(error = %e, "Error terminating instances"),
            }
        }

        None
    };

    match policy.poll_until(probe).await {
        Ok(()) => {
            info!("All Karpenter-managed instances have terminated");
            true
        }
        Err(deadline) => {
            warn!(
                probes = deadline.probes,
                "Timeout waiting for Karpenter instances to terminate"
            );
            false
        }
    }
}
