//! EKS REST client, used to look up cluster connection details.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::credentials::Credentials;
use crate::error::{classify, AwsError};
use crate::query::host_of;
use crate::sign;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection details for a cluster whose API server is reachable.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub endpoint: String,
    /// Base64-encoded cluster CA bundle, as EKS returns it.
    pub certificate_authority: String,
    pub status: String,
}

#[derive(Deserialize)]
struct DescribeClusterResponse {
    cluster: ClusterPayload,
}

#[derive(Deserialize)]
struct ClusterPayload {
    endpoint: Option<String>,
    #[serde(rename = "certificateAuthority")]
    certificate_authority: Option<CertificateAuthority>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct CertificateAuthority {
    data: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

pub struct EksClient {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    creds: Credentials,
}

impl EksClient {
    pub fn new(region: &str, creds: Credentials) -> Self {
        let endpoint = format!("https://eks.{region}.amazonaws.com");
        Self::with_endpoint(endpoint, region, creds)
    }

    /// Point the client at a non-default endpoint. Used by tests.
    pub fn with_endpoint(endpoint: String, region: &str, creds: Credentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        let host = host_of(&endpoint);
        Self {
            http,
            endpoint,
            host,
            region: region.to_string(),
            creds,
        }
    }

    /// Fetch the API endpoint and CA bundle for a cluster.
    ///
    /// Fails with a decode error when the cluster exists but has no
    /// endpoint yet (still creating, or already being torn down).
    pub async fn describe_cluster(&self, name: &str) -> Result<ClusterInfo, AwsError> {
        let path = format!("/clusters/{name}");
        let headers = sign::sign_request(
            "GET",
            &self.host,
            &path,
            &[],
            &[],
            b"",
            &self.creds,
            &self.region,
            "eks",
            Utc::now(),
        );

        let mut request = self.http.get(format!("{}{path}", self.endpoint));
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let code = response
                .headers()
                .get("x-amzn-errortype")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(':').next().unwrap_or(v).to_string())
                .unwrap_or_default();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(body);
            return Err(classify(status.as_u16(), &code, &message));
        }

        let parsed: DescribeClusterResponse = response.json().await?;
        let status = parsed.cluster.status.unwrap_or_default();
        let endpoint = parsed.cluster.endpoint.ok_or_else(|| {
            AwsError::Decode(format!("cluster {name} has no endpoint (status {status})"))
        })?;
        let certificate_authority = parsed
            .cluster
            .certificate_authority
            .and_then(|ca| ca.data)
            .ok_or_else(|| {
                AwsError::Decode(format!("cluster {name} has no CA data (status {status})"))
            })?;

        Ok(ClusterInfo {
            endpoint,
            certificate_authority,
            status,
        })
    }
}
