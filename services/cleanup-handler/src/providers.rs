//! Cloud collaborator seams.
//!
//! The orchestrator talks to EC2, IAM, and EKS through these traits so
//! tests can script outcomes without network access. Live
//! implementations wrap the `reaper-aws` clients; mock implementations
//! replay queued results and record every mutating call.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use reaper_aws::{
    AwsError, Credentials, Ec2Client, EksClient, Filter, IamClient, InstanceSummary,
};

use crate::error::CleanupError;
use crate::noderes;

/// Karpenter instances are discovered by the nodepool marker tag, scoped
/// to one cluster by its discovery tag, in the states that still count
/// as "not yet gone".
const ACTIVE_STATES: [&str; 4] = ["pending", "running", "stopping", "shutting-down"];

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn active_karpenter_instances(
        &self,
        cluster: &str,
    ) -> Result<Vec<InstanceSummary>, AwsError>;

    async fn terminate_instances(&self, ids: &[String]) -> Result<(), AwsError>;
}

#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn profiles_for_role(&self, role: &str) -> Result<Vec<String>, AwsError>;

    async fn detach_role(&self, profile: &str, role: &str) -> Result<(), AwsError>;

    async fn delete_profile(&self, profile: &str) -> Result<(), AwsError>;
}

#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Write a kubeconfig for the cluster under `dir` and return its path.
    async fn write_kubeconfig(&self, cluster: &str, dir: &Path) -> Result<PathBuf, CleanupError>;
}

/// The collaborators for one invocation, bound to its resolved region.
pub struct Providers {
    pub compute: Arc<dyn ComputeProvider>,
    pub profiles: Arc<dyn ProfileProvider>,
    pub cluster: Arc<dyn ClusterAccess>,
}

/// Builds region-bound providers; the region is only known once the
/// event has been resolved.
pub trait ProviderFactory: Send + Sync {
    fn for_region(&self, region: &str) -> Providers;
}

pub struct LiveProviderFactory {
    creds: Credentials,
}

impl LiveProviderFactory {
    pub fn new(creds: Credentials) -> Self {
        Self { creds }
    }
}

impl ProviderFactory for LiveProviderFactory {
    fn for_region(&self, region: &str) -> Providers {
        Providers {
            compute: Arc::new(Ec2Compute::new(Ec2Client::new(region, self.creds.clone()))),
            profiles: Arc::new(IamProfiles::new(IamClient::new(self.creds.clone()))),
            cluster: Arc::new(EksClusterAccess::new(region, self.creds.clone())),
        }
    }
}

pub struct Ec2Compute {
    client: Ec2Client,
}

impl Ec2Compute {
    pub fn new(client: Ec2Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComputeProvider for Ec2Compute {
    async fn active_karpenter_instances(
        &self,
        cluster: &str,
    ) -> Result<Vec<InstanceSummary>, AwsError> {
        let filters = [
            Filter::new("tag:karpenter.sh/nodepool", &["*"]),
            Filter::new("tag:karpenter.sh/discovery", &[cluster]),
            Filter::new("instance-state-name", &ACTIVE_STATES),
        ];
        self.client.describe_instances(&filters).await
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<(), AwsError> {
        self.client.terminate_instances(ids).await
    }
}

pub struct IamProfiles {
    client: IamClient,
}

impl IamProfiles {
    pub fn new(client: IamClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProfileProvider for IamProfiles {
    async fn profiles_for_role(&self, role: &str) -> Result<Vec<String>, AwsError> {
        self.client.list_instance_profiles_for_role(role).await
    }

    async fn detach_role(&self, profile: &str, role: &str) -> Result<(), AwsError> {
        self.client
            .remove_role_from_instance_profile(profile, role)
            .await
    }

    async fn delete_profile(&self, profile: &str) -> Result<(), AwsError> {
        self.client.delete_instance_profile(profile).await
    }
}

pub struct EksClusterAccess {
    eks: EksClient,
    region: String,
    creds: Credentials,
}

impl EksClusterAccess {
    pub fn new(region: &str, creds: Credentials) -> Self {
        Self {
            eks: EksClient::new(region, creds.clone()),
            region: region.to_string(),
            creds,
        }
    }

    /// Use a pre-built EKS client. Used by tests.
    pub fn with_client(eks: EksClient, region: &str, creds: Credentials) -> Self {
        Self {
            eks,
            region: region.to_string(),
            creds,
        }
    }
}

#[async_trait]
impl ClusterAccess for EksClusterAccess {
    async fn write_kubeconfig(&self, cluster: &str, dir: &Path) -> Result<PathBuf, CleanupError> {
        noderes::write_kubeconfig(&self.eks, cluster, &self.region, &self.creds, dir).await
    }
}

/// Scriptable compute provider. Queued responses are replayed in order;
/// once the queue is empty every query returns the fallback set.
#[derive(Default)]
pub struct MockCompute {
    responses: Mutex<VecDeque<Result<Vec<InstanceSummary>, AwsError>>>,
    fallback: Vec<InstanceSummary>,
    terminated: Mutex<Vec<Vec<String>>>,
    terminate_failures: Mutex<VecDeque<AwsError>>,
    query_count: AtomicU32,
}

impl MockCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose queries always return the given set.
    pub fn always(instances: Vec<InstanceSummary>) -> Self {
        Self {
            fallback: instances,
            ..Self::default()
        }
    }

    pub async fn push_instances(&self, instances: Vec<InstanceSummary>) {
        self.responses.lock().await.push_back(Ok(instances));
    }

    pub async fn push_query_failure(&self, err: AwsError) {
        self.responses.lock().await.push_back(Err(err));
    }

    pub async fn fail_next_terminate(&self, err: AwsError) {
        self.terminate_failures.lock().await.push_back(err);
    }

    pub async fn terminated_batches(&self) -> Vec<Vec<String>> {
        self.terminated.lock().await.clone()
    }

    pub fn query_count(&self) -> u32 {
        self.query_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeProvider for MockCompute {
    async fn active_karpenter_instances(
        &self,
        _cluster: &str,
    ) -> Result<Vec<InstanceSummary>, AwsError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<(), AwsError> {
        if let Some(err) = self.terminate_failures.lock().await.pop_front() {
            return Err(err);
        }
        self.terminated.lock().await.push(ids.to_vec());
        Ok(())
    }
}

/// Scriptable profile provider. Empty queues mean "succeed".
#[derive(Default)]
pub struct MockProfiles {
    list_responses: Mutex<VecDeque<Result<Vec<String>, AwsError>>>,
    detach_responses: Mutex<VecDeque<Result<(), AwsError>>>,
    delete_responses: Mutex<VecDeque<Result<(), AwsError>>>,
    detach_calls: Mutex<Vec<(String, String)>>,
    delete_calls: Mutex<Vec<String>>,
    list_count: AtomicU32,
}

impl MockProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_list(&self, result: Result<Vec<String>, AwsError>) {
        self.list_responses.lock().await.push_back(result);
    }

    pub async fn push_detach(&self, result: Result<(), AwsError>) {
        self.detach_responses.lock().await.push_back(result);
    }

    pub async fn push_delete(&self, result: Result<(), AwsError>) {
        self.delete_responses.lock().await.push_back(result);
    }

    pub async fn detach_calls(&self) -> Vec<(String, String)> {
        self.detach_calls.lock().await.clone()
    }

    pub async fn delete_calls(&self) -> Vec<String> {
        self.delete_calls.lock().await.clone()
    }

    pub fn list_count(&self) -> u32 {
        self.list_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileProvider for MockProfiles {
    async fn profiles_for_role(&self, _role: &str) -> Result<Vec<String>, AwsError> {
        self.list_count.fetch_add(1, Ordering::SeqCst);
        match self.list_responses.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    async fn detach_role(&self, profile: &str, role: &str) -> Result<(), AwsError> {
        self.detach_calls
            .lock()
            .await
            .push((profile.to_string(), role.to_string()));
        match self.detach_responses.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn delete_profile(&self, profile: &str) -> Result<(), AwsError> {
        self.delete_calls.lock().await.push(profile.to_string());
        match self.delete_responses.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }
}

/// Cluster access that writes a stub kubeconfig, or fails on demand.
#[derive(Default)]
pub struct MockClusterAccess {
    pub fail: bool,
    written: Mutex<Vec<PathBuf>>,
}

impl MockClusterAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn written_paths(&self) -> Vec<PathBuf> {
        self.written.lock().await.clone()
    }
}

#[async_trait]
impl ClusterAccess for MockClusterAccess {
    async fn write_kubeconfig(&self, cluster: &str, dir: &Path) -> Result<PathBuf, CleanupError> {
        if self.fail {
            return Err(CleanupError::Aws(AwsError::Api {
                status: 503,
                code: "ServiceUnavailable".to_string(),
                message: "cluster lookup unavailable".to_string(),
            }));
        }
        let path = dir.join(format!("kubeconfig-{cluster}.json"));
        tokio::fs::write(&path, b"{\"apiVersion\":\"v1\",\"kind\":\"Config\"}").await?;
        self.written.lock().await.push(path.clone());
        Ok(path)
    }
}

/// Factory handing out the same mock set for every region.
#[derive(Default)]
pub struct MockProviders {
    pub compute: Arc<MockCompute>,
    pub profiles: Arc<MockProfiles>,
    pub cluster: Arc<MockClusterAccess>,
}

impl MockProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_access(cluster: MockClusterAccess) -> Self {
        Self {
            cluster: Arc::new(cluster),
            ..Self::default()
        }
    }
}

impl ProviderFactory for MockProviders {
    fn for_region(&self, _region: &str) -> Providers {
        Providers {
            compute: self.compute.clone(),
            profiles: self.profiles.clone(),
            cluster: self.cluster.clone(),
        }
    }
}
