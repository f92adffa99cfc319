//! Shared REST plumbing for backend clients

use crate::error::{SwapError, SwapResult};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A decoded response that was either successful or a 404
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// JSON client for one backend with its default headers
#[derive(Debug, Clone)]
pub struct ApiClient {
    service: &'static str,
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client; `bearer` is sent as `Authorization: Bearer ...` when present
    pub fn new(
        service: &'static str,
        base_url: &str,
        bearer: Option<&str>,
        extra_headers: &[(&str, &str)],
    ) -> SwapResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        if let Some(token) = bearer.filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                SwapError::ConfigurationMissing(format!("{} token is not a valid header", service))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        for (name, value) in extra_headers {
            let name = HeaderName::from_str(name).map_err(|_| {
                SwapError::ConfigurationMissing(format!("invalid header name {}", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                SwapError::ConfigurationMissing(format!("invalid value for header {}", name))
            })?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SwapError::upstream(service, e))?;

        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path))
    }

    /// Send a request; success and 404 come back as a response, everything else as an error
    pub async fn send(&self, request: RequestBuilder) -> SwapResult<ApiResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| SwapError::upstream(self.service, e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| SwapError::upstream(self.service, e))?;
        debug!("{} responded {} ({} bytes)", self.service, status, text.len());

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if let Some(err) = classify(self.service, status, &body) {
            return Err(err);
        }

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Send a request and require a successful response
    pub async fn send_ok(&self, request: RequestBuilder) -> SwapResult<ApiResponse> {
        let response = self.send(request).await?;
        if response.is_not_found() {
            return Err(SwapError::upstream(
                self.service,
                format!("not found: {}", error_message(&response.body)),
            ));
        }
        Ok(response)
    }
}

/// Best-effort human-readable reason from an error body
pub fn error_message(body: &Value) -> String {
    for key in ["message", "error", "description", "detail"] {
        match &body[key] {
            Value::String(s) => return s.clone(),
            Value::Null => {}
            other => return other.to_string(),
        }
    }
    match body {
        Value::String(s) => s.clone(),
        Value::Null => "empty response".to_string(),
        other => other.to_string(),
    }
}

/// Map a non-successful HTTP status to an error; `None` for success and 404
fn classify(service: &str, status: StatusCode, body: &Value) -> Option<SwapError> {
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(SwapError::RateLimited {
            service: service.to_string(),
        });
    }
    let reason = error_message(body);
    if status.is_client_error() {
        Some(SwapError::InvalidRequest(format!(
            "{} rejected request ({}): {}",
            service, status, reason
        )))
    } else {
        Some(SwapError::upstream(service, format!("HTTP {}: {}", status, reason)))
    }
}

/// Decode a JSON body into a typed response
pub fn decode<T: serde::de::DeserializeOwned>(service: &str, body: Value) -> SwapResult<T> {
    serde_json::from_value(body)
        .map_err(|e| SwapError::upstream(service, format!("unexpected response: {}", e)))
}
