//! CloudFormation custom-resource event and response models.
//!
//! Field names and casing are fixed by the custom-resource contract;
//! everything here mirrors that wire shape. Unknown event fields
//! (ServiceToken, OldResourceProperties, ...) are ignored.

use serde::{Deserialize, Serialize};

use crate::runtime::Invocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceProperties {
    pub cluster_name: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnEvent {
    pub request_type: RequestType,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    pub resource_properties: ResourceProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseData {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnResponse {
    pub status: ResponseStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub data: ResponseData,
}

impl CfnResponse {
    /// Build the response document for an event.
    ///
    /// `Reason` always points at the CloudWatch log group; the outcome
    /// detail travels in `Data.Message`. The physical resource id is
    /// echoed from the event when present, otherwise the log stream name
    /// stands in, keeping the id stable across re-invocations.
    pub fn for_event(
        event: &CfnEvent,
        context: &InvocationContext,
        status: ResponseStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            reason: format!("See CloudWatch Logs: {}", context.log_group_name),
            physical_resource_id: event
                .physical_resource_id
                .clone()
                .unwrap_or_else(|| context.log_stream_name.clone()),
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            data: ResponseData {
                message: message.into(),
            },
        }
    }
}

/// Per-invocation diagnostics: runtime-API headers plus the log
/// coordinates Lambda injects into the environment.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub request_id: String,
    pub invoked_function_arn: Option<String>,
    pub deadline_ms: Option<u64>,
    pub log_group_name: String,
    pub log_stream_name: String,
}

impl InvocationContext {
    pub fn for_invocation(invocation: &Invocation) -> Self {
        Self {
            request_id: invocation.request_id.clone(),
            invoked_function_arn: invocation.invoked_function_arn.clone(),
            deadline_ms: invocation.deadline_ms,
            log_group_name: std::env::var("AWS_LAMBDA_LOG_GROUP_NAME")
                .unwrap_or_else(|_| "unknown".to_string()),
            log_stream_name: std::env::var("AWS_LAMBDA_LOG_STREAM_NAME")
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}
