//! Instance-Profile Cleaner: removes the instance profiles attached to
//! the cluster's Karpenter node role so the role itself can be deleted
//! by the stack.
//!
//! Profiles are deleted best-effort. Conflicts (profile still referenced
//! by a terminating instance) are retried with a fixed backoff; anything
//! else is logged and abandoned so the teardown keeps moving.

use tracing::{debug, info, instrument, warn};

use reaper_aws::AwsError;
use reaper_retry::{RetryError, RetryPolicy};

use crate::providers::ProfileProvider;

/// Delete every instance profile attached to `role`.
///
/// Never fails: a role that is already gone means nothing to clean, and
/// profiles that cannot be deleted after the retry budget are left for
/// manual cleanup.
#[instrument(skip(provider, retry))]
pub async fn cleanup_instance_profiles(
    provider: &dyn ProfileProvider,
    role: &str,
    retry: &RetryPolicy,
) {
    let profiles = match provider.profiles_for_role(role).await {
        Ok(profiles) => profiles,
        Err(e) if e.is_not_found() => {
            info!(role, "Node role not found, no instance profiles to clean");
            return;
        }
        Err(e) => {
            warn!(role, error = %e, "Could not list instance profiles");
            return;
        }
    };

    if profiles.is_empty() {
        info!(role, "No instance profiles attached");
        return;
    }

    info!(role, count = profiles.len(), "Cleaning up instance profiles");
    for profile in &profiles {
        cleanup_one(provider, role, profile, retry).await;
    }
}

/// Detach the role and delete one profile, retrying the whole pair while
/// the profile is still in use.
async fn cleanup_one(
    provider: &dyn ProfileProvider,
    role: &str,
    profile: &str,
    retry: &RetryPolicy,
) {
    let attempt = move |attempt: u32| async move {
        match provider.detach_role(profile, role).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(profile, role, "Role already detached");
            }
            Err(e) => return Err(e),
        }
        match provider.delete_profile(profile).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(profile, attempt, "Profile already deleted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    };

    match retry.run(attempt, AwsError::is_conflict).await {
        Ok(true) => info!(profile, "Instance profile deleted"),
        Ok(false) => info!(profile, "Instance profile already gone"),
        Err(RetryError::Exhausted { attempts, last }) => {
            warn!(
                profile,
                attempts,
                error = %last,
                "Instance profile still in use, leaving it for manual cleanup"
            );
        }
        Err(RetryError::Aborted(e)) => {
            warn!(profile, error = %e, "Could not delete instance profile");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    use reaper_aws::AwsError;

    use crate::providers::MockProfiles;

    fn conflict() -> AwsError {
        AwsError::Conflict {
            code: "DeleteConflict".to_string(),
            message: "Cannot delete entity, must remove roles from instance profile first"
                .to_string(),
        }
    }

    fn not_found() -> AwsError {
        AwsError::NotFound {
            code: "NoSuchEntity".to_string(),
            message: "Instance Profile demo cannot be found".to_string(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(30), 5)
    }

    #[tokio::test(start_paused = true)]
    async fn detaches_and_deletes_every_profile() {
        let mock = MockProfiles::new();
        mock.push_list(Ok(vec!["profile-a".to_string(), "profile-b".to_string()]))
            .await;

        let started = Instant::now();
        cleanup_instance_profiles(&mock, "KarpenterNodeRole-demo", &policy()).await;

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(
            mock.detach_calls().await,
            vec![
                ("profile-a".to_string(), "KarpenterNodeRole-demo".to_string()),
                ("profile-b".to_string(), "KarpenterNodeRole-demo".to_string()),
            ]
        );
        assert_eq!(
            mock.delete_calls().await,
            vec!["profile-a".to_string(), "profile-b".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_role_means_nothing_to_clean() {
        let mock = MockProfiles::new();
        mock.push_list(Err(not_found())).await;

        cleanup_instance_profiles(&mock, "KarpenterNodeRole-demo", &policy()).await;

        assert!(mock.detach_calls().await.is_empty());
        assert!(mock.delete_calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn role_with_no_profiles_completes_without_calls() {
        let mock = MockProfiles::new();
        mock.push_list(Ok(Vec::new())).await;

        cleanup_instance_profiles(&mock, "KarpenterNodeRole-demo", &policy()).await;

        assert!(mock.detach_calls().await.is_empty());
        assert!(mock.delete_calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_back_off_until_the_final_attempt_succeeds() {
        let mock = MockProfiles::new();
        mock.push_list(Ok(vec!["profile-a".to_string()])).await;
        for _ in 0..4 {
            mock.push_delete(Err(conflict())).await;
        }

        let started = Instant::now();
        cleanup_instance_profiles(&mock, "KarpenterNodeRole-demo", &policy()).await;

        // Four conflicts, four 30s backoffs, success on the fifth and
        // final attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(120));
        assert_eq!(mock.delete_calls().await.len(), 5);
        assert_eq!(mock.detach_calls().await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_conflict_gives_up_after_the_attempt_budget() {
        let mock = MockProfiles::new();
        mock.push_list(Ok(vec!["profile-a".to_string(), "profile-b".to_string()]))
            .await;
        for _ in 0..5 {
            mock.push_delete(Err(conflict())).await;
        }

        let started = Instant::now();
        cleanup_instance_profiles(&mock, "KarpenterNodeRole-demo", &policy()).await;

        // profile-a burns all five attempts (four backoffs), then
        // profile-b succeeds immediately off the drained queue.
        assert_eq!(started.elapsed(), Duration::from_secs(120));
        assert_eq!(mock.delete_calls().await.len(), 6);
        assert_eq!(
            mock.delete_calls().await.last(),
            Some(&"profile-b".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detach_not_found_still_deletes_the_profile() {
        let mock = MockProfiles::new();
        mock.push_list(Ok(vec!["profile-a".to_string()])).await;
        mock.push_detach(Err(not_found())).await;

        cleanup_instance_profiles(&mock, "KarpenterNodeRole-demo", &policy()).await;

        assert_eq!(mock.delete_calls().await, vec!["profile-a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_errors_abandon_without_retrying() {
        let mock = MockProfiles::new();
        mock.push_list(Ok(vec!["profile-a".to_string(), "profile-b".to_string()]))
            .await;
        mock.push_delete(Err(AwsError::Api {
            status: 403,
            code: "AccessDenied".to_string(),
            message: "not authorized".to_string(),
        }))
        .await;

        let started = Instant::now();
        cleanup_instance_profiles(&mock, "KarpenterNodeRole-demo", &policy()).await;

        // No backoff for a non-conflict error, and profile-b still runs.
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(mock.delete_calls().await.len(), 2);
    }
}
