//! Response Reporter: delivers the completion document to
//! CloudFormation's pre-signed URL.

use std::time::Duration;

use thiserror::Error;

use crate::event::CfnResponse;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response URL returned status {status}")]
    Rejected { status: u16 },
}

pub struct CfnResponder {
    http: reqwest::Client,
}

impl CfnResponder {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self { http }
    }

    /// PUT the response document. The caller logs failures and moves on;
    /// by this point the outcome is already decided and retrying against
    /// an expired pre-signed URL gains nothing.
    pub async fn send(&self, url: &str, response: &CfnResponse) -> Result<(), ResponseError> {
        let reply = self.http.put(url).json(response).send().await?;
        let status = reply.status();
        if !status.is_success() {
            return Err(ResponseError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

impl Default for CfnResponder {
    fn default() -> Self {
        Self::new()
    }
}
