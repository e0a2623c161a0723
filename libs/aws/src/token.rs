//! EKS bearer tokens.
//!
//! The API server authenticates callers with a presigned STS
//! `GetCallerIdentity` URL: the aws-iam-authenticator webhook executes
//! the URL, checks the `x-k8s-aws-id` header binding it to the cluster,
//! and maps the caller identity to a Kubernetes user.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::credentials::Credentials;
use crate::sign;

const TOKEN_PREFIX: &str = "k8s-aws-v1.";
const PRESIGN_EXPIRES_SECS: u32 = 60;

/// Build a bearer token for the named cluster.
pub fn eks_bearer_token(
    cluster: &str,
    region: &str,
    creds: &Credentials,
    now: DateTime<Utc>,
) -> String {
    let host = format!("sts.{region}.amazonaws.com");
    let url = sign::presign_url(
        &host,
        "/",
        &[
            ("Action".to_string(), "GetCallerIdentity".to_string()),
            ("Version".to_string(), "2011-06-15".to_string()),
        ],
        &[("x-k8s-aws-id".to_string(), cluster.to_string())],
        creds,
        region,
        "sts",
        PRESIGN_EXPIRES_SECS,
        now,
    );
    format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(url))
}
