//! Node-Resource Deleter: drives kubectl to remove Karpenter's cluster
//! resources so draining happens upstream, plus the kubeconfig refresh
//! that points kubectl at the right cluster.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use reaper_aws::{eks_bearer_token, Credentials, EksClient};

use crate::error::CleanupError;

pub const NODE_POOL_KIND: &str = "nodepools.karpenter.sh";
pub const NODE_CLASS_KIND: &str = "ec2nodeclasses.karpenter.k8s.aws";

/// Bound on each kubectl invocation.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// kubectl's complaint when a CRD kind is not installed. Deleting a kind
/// that was never installed means there is nothing to clean up.
const MISSING_KIND_MARKER: &str = "the server doesn't have a resource type";

/// Check that the kubectl binary exists and is executable.
pub fn resolve_tool(path: &Path) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).ok()?;
    if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
        Some(path.to_path_buf())
    } else {
        None
    }
}

/// Issues bulk deletes for Karpenter resource kinds through kubectl.
pub struct KubectlDriver {
    kubectl: PathBuf,
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl KubectlDriver {
    pub fn new(kubectl: PathBuf, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubectl,
            kubeconfig,
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// Override the execution timeout. Used by tests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn delete_all_node_pools(&self) -> Result<(), CleanupError> {
        self.delete_all(NODE_POOL_KIND).await
    }

    pub async fn delete_all_node_classes(&self) -> Result<(), CleanupError> {
        self.delete_all(NODE_CLASS_KIND).await
    }

    /// `kubectl delete <kind> --all --ignore-not-found=true`, bounded by
    /// the execution timeout. A missing CRD kind counts as success.
    async fn delete_all(&self, kind: &str) -> Result<(), CleanupError> {
        let mut command = Command::new(&self.kubectl);
        command.args(["delete", kind, "--all", "--ignore-not-found=true"]);
        if let Some(kubeconfig) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(kubeconfig);
        }
        command.kill_on_drop(true);

        info!(kind, "Deleting Karpenter resources");
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CleanupError::CommandTimeout {
                    command: format!("kubectl delete {kind}"),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        if output.status.success() {
            info!(kind, "Karpenter resources deleted");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains(MISSING_KIND_MARKER) {
            info!(kind, "Resource kind not installed, nothing to delete");
            return Ok(());
        }

        Err(CleanupError::CommandFailed {
            command: format!("kubectl delete {kind}"),
            status: output.status.to_string(),
            stderr,
        })
    }
}

#[derive(Serialize)]
struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    current_context: String,
}

#[derive(Serialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEndpoint,
}

#[derive(Serialize)]
struct ClusterEndpoint {
    server: String,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct NamedUser {
    name: String,
    user: UserToken,
}

#[derive(Serialize)]
struct UserToken {
    token: String,
}

#[derive(Serialize)]
struct NamedContext {
    name: String,
    context: ContextRef,
}

#[derive(Serialize)]
struct ContextRef {
    cluster: String,
    user: String,
}

/// Build a single-cluster kubeconfig under `dir` and return its path.
///
/// The cluster endpoint and CA come from DescribeCluster; auth is a
/// presigned STS token, so the file is only valid for a short window
/// and is regenerated on every invocation.
pub async fn write_kubeconfig(
    eks: &EksClient,
    cluster: &str,
    region: &str,
    creds: &Credentials,
    dir: &Path,
) -> Result<PathBuf, CleanupError> {
    let info = eks.describe_cluster(cluster).await?;
    info!(cluster, status = %info.status, "Resolved cluster endpoint");

    let token = eks_bearer_token(cluster, region, creds, Utc::now());
    let user = format!("cleanup-{cluster}");
    let kubeconfig = Kubeconfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![NamedCluster {
            name: cluster.to_string(),
            cluster: ClusterEndpoint {
                server: info.endpoint,
                certificate_authority_data: info.certificate_authority,
            },
        }],
        users: vec![NamedUser {
            name: user.clone(),
            user: UserToken { token },
        }],
        contexts: vec![NamedContext {
            name: user.clone(),
            context: ContextRef {
                cluster: cluster.to_string(),
                user: user.clone(),
            },
        }],
        current_context: user,
    };

    let path = dir.join(format!("kubeconfig-{cluster}.json"));
    let body = serde_json::to_vec_pretty(&kubeconfig)?;
    if let Err(e) = tokio::fs::write(&path, body).await {
        warn!(path = %path.display(), error = %e, "Could not write kubeconfig");
        return Err(e.into());
    }
    Ok(path)
}
