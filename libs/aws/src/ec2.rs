//! EC2 query client, scoped to instance discovery and termination.

use tracing::debug;

use crate::credentials::Credentials;
use crate::error::AwsError;
use crate::query::QueryTransport;
use crate::xml;

const API_VERSION: &str = "2016-11-15";

/// One `Filter.N` entry for `DescribeInstances`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Instance id plus its lifecycle state name (`pending`, `running`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSummary {
    pub id: String,
    pub state: String,
}

pub struct Ec2Client {
    transport: QueryTransport,
}

impl Ec2Client {
    pub fn new(region: &str, creds: Credentials) -> Self {
        let endpoint = format!("https://ec2.{region}.amazonaws.com");
        Self::with_endpoint(endpoint, region, creds)
    }

    /// Point the client at a non-default endpoint. Used by tests.
    pub fn with_endpoint(endpoint: String, region: &str, creds: Credentials) -> Self {
        Self {
            transport: QueryTransport::new(endpoint, region.to_string(), "ec2", creds),
        }
    }

    /// List instances matching every filter, following pagination to the
    /// end.
    pub async fn describe_instances(
        &self,
        filters: &[Filter],
    ) -> Result<Vec<InstanceSummary>, AwsError> {
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("Action".to_string(), "DescribeInstances".to_string()),
                ("Version".to_string(), API_VERSION.to_string()),
            ];
            for (i, filter) in filters.iter().enumerate() {
                params.push((format!("Filter.{}.Name", i + 1), filter.name.clone()));
                for (j, value) in filter.values.iter().enumerate() {
                    params.push((format!("Filter.{}.Value.{}", i + 1, j + 1), value.clone()));
                }
            }
            if let Some(token) = &next_token {
                params.push(("NextToken".to_string(), token.clone()));
            }

            let body = self.transport.call(&params).await?;
            for set in xml::blocks(&body, "instancesSet") {
                for item in xml::blocks(set, "item") {
                    let Some(id) = xml::first_text(item, "instanceId") else {
                        continue;
                    };
                    let state = xml::blocks(item, "instanceState")
                        .first()
                        .and_then(|s| xml::first_text(s, "name"))
                        .unwrap_or_default();
                    instances.push(InstanceSummary { id, state });
                }
            }

            next_token = xml::first_text(&body, "nextToken").filter(|t| !t.is_empty());
            if next_token.is_none() {
                break;
            }
        }

        debug!(count = instances.len(), "Described instances");
        Ok(instances)
    }

    /// Request termination of the given instances. No-op on an empty
    /// list, which EC2 would otherwise reject.
    pub async fn terminate_instances(&self, ids: &[String]) -> Result<(), AwsError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut params = vec![
            ("Action".to_string(), "TerminateInstances".to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
        ];
        for (i, id) in ids.iter().enumerate() {
            params.push((format!("InstanceId.{}", i + 1), id.clone()));
        }

        self.transport.call(&params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(endpoint: &str) -> Ec2Client {
        Ec2Client::with_endpoint(
            endpoint.to_string(),
            "us-east-1",
            Credentials::new("AKID", "secret", None),
        )
    }

    const PAGE_ONE: &str = "\
<DescribeInstancesResponse>\
<reservationSet><item><instancesSet>\
<item>\
<instanceId>i-0aaa</instanceId>\
<instanceState><code>16</code><name>running</name></instanceState>\
<tagSet><item><key>karpenter.sh/nodepool</key><value>default</value></item></tagSet>\
</item>\
<item>\
<instanceId>i-0bbb</instanceId>\
<instanceState><code>32</code><name>shutting-down</name></instanceState>\
</item>\
</instancesSet></item></reservationSet>\
<nextToken>page-2</nextToken>\
</DescribeInstancesResponse>";

    const PAGE_TWO: &str = "\
<DescribeInstancesResponse>\
<reservationSet><item><instancesSet>\
<item>\
<instanceId>i-0ccc</instanceId>\
<instanceState><code>0</code><name>pending</name></instanceState>\
</item>\
</instancesSet></item></reservationSet>\
</DescribeInstancesResponse>";

    #[tokio::test]
    async fn describe_instances_parses_and_paginates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("NextToken=page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_ONE))
            .expect(1)
            .mount(&server)
            .await;

        let instances = client(&server.uri())
            .describe_instances(&[
                Filter::new("tag-key", &["karpenter.sh/nodepool"]),
                Filter::new("instance-state-name", &["pending", "running"]),
            ])
            .await
            .unwrap();

        assert_eq!(
            instances,
            vec![
                InstanceSummary {
                    id: "i-0aaa".to_string(),
                    state: "running".to_string()
                },
                InstanceSummary {
                    id: "i-0bbb".to_string(),
                    state: "shutting-down".to_string()
                },
                InstanceSummary {
                    id: "i-0ccc".to_string(),
                    state: "pending".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn describe_instances_sends_numbered_filters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Filter.1.Name=tag%3Akarpenter.sh%2Fdiscovery"))
            .and(body_string_contains("Filter.1.Value.1=demo"))
            .and(body_string_contains("Filter.2.Name=instance-state-name"))
            .and(body_string_contains("Filter.2.Value.2=running"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<DescribeInstancesResponse/>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let instances = client(&server.uri())
            .describe_instances(&[
                Filter::new("tag:karpenter.sh/discovery", &["demo"]),
                Filter::new("instance-state-name", &["pending", "running"]),
            ])
            .await
            .unwrap();
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn terminate_instances_numbers_each_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Action=TerminateInstances"))
            .and(body_string_contains("InstanceId.1=i-0aaa"))
            .and(body_string_contains("InstanceId.2=i-0bbb"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<TerminateInstancesResponse/>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri())
            .terminate_instances(&["i-0aaa".to_string(), "i-0bbb".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn terminate_instances_skips_the_call_for_no_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        client(&server.uri()).terminate_instances(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_instance_errors_are_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                "<Response><Errors><Error>\
                 <Code>InvalidInstanceID.NotFound</Code>\
                 <Message>The instance ID 'i-0dead' does not exist</Message>\
                 </Error></Errors></Response>",
            ))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .terminate_instances(&["i-0dead".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
