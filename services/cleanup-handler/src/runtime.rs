//! Lambda custom-runtime transport.
//!
//! The runtime API is a plain HTTP loop: long-poll the next invocation,
//! do the work, post a response (or an error) for that request id. Only
//! transport failures end the loop; per-invocation problems are reported
//! through the API and polling continues.

use anyhow::Context as _;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::event::{CfnEvent, InvocationContext};
use crate::handler::handle;
use crate::providers::ProviderFactory;
use crate::response::CfnResponder;

const RUNTIME_API_VERSION: &str = "2018-06-01";

/// One event handed out by the runtime API.
#[derive(Debug)]
pub struct Invocation {
    pub request_id: String,
    pub invoked_function_arn: Option<String>,
    pub deadline_ms: Option<u64>,
    pub body: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("runtime API rejected the call with status {status}")]
    Api { status: u16 },

    #[error("invocation is missing the request id header")]
    MissingRequestId,
}

pub struct RuntimeClient {
    http: reqwest::Client,
    base: String,
}

impl RuntimeClient {
    pub fn from_env() -> anyhow::Result<Self> {
        let api = std::env::var("AWS_LAMBDA_RUNTIME_API")
            .context("AWS_LAMBDA_RUNTIME_API is not set")?;
        Ok(Self::new(&api))
    }

    pub fn new(api: &str) -> Self {
        let base = if api.starts_with("http") {
            format!("{api}/{RUNTIME_API_VERSION}/runtime")
        } else {
            format!("http://{api}/{RUNTIME_API_VERSION}/runtime")
        };
        // The next-invocation poll blocks until an event arrives, so
        // this client must not carry a request timeout.
        let http = reqwest::Client::builder()
            .build()
            .expect("Failed to build HTTP client");
        Self { http, base }
    }

    /// Long-poll the next invocation.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Api {
                status: response.status().as_u16(),
            });
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let request_id =
            header("lambda-runtime-aws-request-id").ok_or(RuntimeError::MissingRequestId)?;
        let invoked_function_arn = header("lambda-runtime-invoked-function-arn");
        let deadline_ms = header("lambda-runtime-deadline-ms").and_then(|v| v.parse().ok());

        let body = response.json().await?;
        Ok(Invocation {
            request_id,
            invoked_function_arn,
            deadline_ms,
            body,
        })
    }

    pub async fn post_response(
        &self,
        request_id: &str,
        body: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        let response = self
            .http
            .post(format!("{}/invocation/{request_id}/response", self.base))
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Api {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    pub async fn post_error(
        &self,
        request_id: &str,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeError> {
        let body = json!({
            "errorMessage": message,
            "errorType": error_type,
        });
        let response = self
            .http
            .post(format!("{}/invocation/{request_id}/error", self.base))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Api {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Poll forever, handling one invocation at a time.
pub async fn run(
    client: RuntimeClient,
    config: Config,
    responder: CfnResponder,
    factory: &dyn ProviderFactory,
) -> anyhow::Result<()> {
    info!("Entering invocation loop");
    loop {
        poll_once(&client, &config, &responder, factory).await?;
    }
}

/// Take one invocation off the runtime API and complete it.
///
/// An event that cannot be decoded, or that fails before the response
/// boundary, is reported as an invocation error; the poll itself still
/// succeeds so the loop moves on to the next event.
pub async fn poll_once(
    client: &RuntimeClient,
    config: &Config,
    responder: &CfnResponder,
    factory: &dyn ProviderFactory,
) -> Result<(), RuntimeError> {
    let invocation = client.next_invocation().await?;
    let context = InvocationContext::for_invocation(&invocation);
    let Invocation {
        request_id, body, ..
    } = invocation;

    match serde_json::from_value::<CfnEvent>(body) {
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Could not decode event");
            client
                .post_error(
                    &request_id,
                    "InvalidEvent",
                    &format!("could not decode event: {e}"),
                )
                .await?;
        }
        Ok(event) => match handle(&event, &context, config, responder, factory).await {
            Ok(status) => {
                client
                    .post_response(&request_id, &json!({ "Status": status }))
                    .await?;
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Invocation failed");
                client
                    .post_error(&request_id, e.error_type(), &e.to_string())
                    .await?;
            }
        },
    }
    Ok(())
}
