//! HTTP mocking utilities for webhook testing.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// HTTP mock server for webhook notifications.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Full URL of `path`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Answers requests to `endpoint` with `status` and a JSON body.
    pub async fn mock_json(&self, http_method: &str, endpoint: &str, status: u16, body: &Value) {
        self.mount(http_method, endpoint, ResponseTemplate::new(status).set_body_json(body)).await;
    }

    /// Answers requests to `endpoint` with `status` and a plain text body.
    pub async fn mock_text(&self, http_method: &str, endpoint: &str, status: u16, body: &str) {
        let response = ResponseTemplate::new(status)
            .set_body_raw(body.as_bytes().to_vec(), "text/plain; charset=utf-8");
        self.mount(http_method, endpoint, response).await;
    }

    /// Answers requests to `endpoint` with an empty body.
    pub async fn mock_status(&self, http_method: &str, endpoint: &str, status: u16) {
        self.mount(http_method, endpoint, ResponseTemplate::new(status)).await;
    }

    /// Answers requests to `endpoint` only after `delay`.
    pub async fn mock_delay(&self, http_method: &str, endpoint: &str, delay: Duration) {
        self.mount(http_method, endpoint, ResponseTemplate::new(200).set_delay(delay)).await;
    }

    async fn mount(&self, http_method: &str, endpoint: &str, response: ResponseTemplate) {
        Mock::given(method(http_method))
            .and(path(endpoint))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// All requests received by the server.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.to_string(),
                path: request.url.path().to_string(),
                headers: request
                    .headers
                    .iter()
                    .filter_map(|(name, value)| {
                        value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect(),
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.received_requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "Expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// A recorded HTTP request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Header value by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Body decoded as JSON; `Value::Null` when it is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}
