//! Signed transport for the EC2/IAM query protocol.

use std::time::Duration;

use chrono::Utc;

use crate::credentials::Credentials;
use crate::error::{classify, AwsError};
use crate::sign;
use crate::xml;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Host portion of an endpoint URL, port included.
pub(crate) fn host_of(endpoint: &str) -> String {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Executes `Action=...` form posts against one query-protocol endpoint,
/// signing each request and classifying error responses.
pub(crate) struct QueryTransport {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    service: &'static str,
    creds: Credentials,
}

impl QueryTransport {
    pub(crate) fn new(
        endpoint: String,
        region: String,
        service: &'static str,
        creds: Credentials,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        let host = host_of(&endpoint);
        Self {
            http,
            endpoint,
            host,
            region,
            service,
            creds,
        }
    }

    /// POST the given parameters as a form body and return the response
    /// body on success.
    pub(crate) async fn call(&self, params: &[(String, String)]) -> Result<String, AwsError> {
        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let headers = sign::sign_request(
            "POST",
            &self.host,
            "/",
            &[],
            &[("content-type".to_string(), FORM_CONTENT_TYPE.to_string())],
            body.as_bytes(),
            &self.creds,
            &self.region,
            self.service,
            Utc::now(),
        );

        let mut request = self.http.post(format!("{}/", self.endpoint));
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.body(body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            return Ok(text);
        }

        let code = xml::first_text(&text, "Code").unwrap_or_default();
        let message = xml::first_text(&text, "Message")
            .unwrap_or_else(|| text.chars().take(200).collect());
        Err(classify(status.as_u16(), &code, &message))
    }
}
