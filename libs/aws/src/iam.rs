//! IAM query client for instance-profile cleanup.
//!
//! IAM is a global service; requests go to `iam.amazonaws.com` and are
//! signed for `us-east-1` regardless of where the stack lives.

use tracing::debug;

use crate::credentials::Credentials;
use crate::error::AwsError;
use crate::query::QueryTransport;
use crate::xml;

const API_VERSION: &str = "2010-05-08";
const ENDPOINT: &str = "https://iam.amazonaws.com";
const SIGNING_REGION: &str = "us-east-1";

pub struct IamClient {
    transport: QueryTransport,
}

impl IamClient {
    pub fn new(creds: Credentials) -> Self {
        Self::with_endpoint(ENDPOINT.to_string(), creds)
    }

    /// Point the client at a non-default endpoint. Used by tests.
    pub fn with_endpoint(endpoint: String, creds: Credentials) -> Self {
        Self {
            transport: QueryTransport::new(
                endpoint,
                SIGNING_REGION.to_string(),
                "iam",
                creds,
            ),
        }
    }

    /// Names of every instance profile the role is attached to.
    pub async fn list_instance_profiles_for_role(
        &self,
        role: &str,
    ) -> Result<Vec<String>, AwsError> {
        let mut profiles = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut params = vec![
                (
                    "Action".to_string(),
                    "ListInstanceProfilesForRole".to_string(),
                ),
                ("Version".to_string(), API_VERSION.to_string()),
                ("RoleName".to_string(), role.to_string()),
            ];
            if let Some(m) = &marker {
                params.push(("Marker".to_string(), m.clone()));
            }

            let body = self.transport.call(&params).await?;
            for list in xml::blocks(&body, "InstanceProfiles") {
                for member in xml::blocks(list, "member") {
                    if let Some(name) = xml::first_text(member, "InstanceProfileName") {
                        profiles.push(name);
                    }
                }
            }

            let truncated = xml::first_text(&body, "IsTruncated")
                .map(|t| t == "true")
                .unwrap_or(false);
            marker = if truncated {
                xml::first_text(&body, "Marker")
            } else {
                None
            };
            if marker.is_none() {
                break;
            }
        }

        debug!(role, count = profiles.len(), "Listed instance profiles");
        Ok(profiles)
    }

    pub async fn remove_role_from_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> Result<(), AwsError> {
        self.transport
            .call(&[
                (
                    "Action".to_string(),
                    "RemoveRoleFromInstanceProfile".to_string(),
                ),
                ("Version".to_string(), API_VERSION.to_string()),
                ("InstanceProfileName".to_string(), profile.to_string()),
                ("RoleName".to_string(), role.to_string()),
            ])
            .await?;
        Ok(())
    }

    pub async fn delete_instance_profile(&self, profile: &str) -> Result<(), AwsError> {
        self.transport
            .call(&[
                ("Action".to_string(), "DeleteInstanceProfile".to_string()),
                ("Version".to_string(), API_VERSION.to_string()),
                ("InstanceProfileName".to_string(), profile.to_string()),
            ])
            .await?;
        Ok(())
    }
}
