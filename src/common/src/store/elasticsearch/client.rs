use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::store::{StoreError, StoreResult};

/// HTTP client for the cluster's administrative API
#[derive(Debug, Clone)]
pub struct EsClient {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl EsClient {
    /// Create a new client pointing at `base_url`. Every request is bounded by `timeout`.
    pub fn new(
        base_url: &str,
        username: Option<&str>,
        password: Option<&str>,
        timeout: Duration,
    ) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::StoreUnavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a GET request and deserialize the response
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &'static str,
        target: &str,
    ) -> StoreResult<T> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| self.transport_error(e, operation, target))?;
        let body = self.read_success(resp, operation, target).await?;
        serde_json::from_str(&body).map_err(|source| StoreError::Deserialize { operation, source })
    }

    /// Send a request with an optional JSON body, discarding the response body
    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        operation: &'static str,
        target: &str,
    ) -> StoreResult<()> {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| self.transport_error(e, operation, target))?;
        self.read_success(resp, operation, target).await?;
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let request = self.http.request(method, &url);
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn read_success(
        &self,
        resp: reqwest::Response,
        operation: &'static str,
        target: &str,
    ) -> StoreResult<String> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| self.transport_error(e, operation, target))?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(error_from_response(operation, target, status, &text))
        }
    }

    fn transport_error(&self, e: reqwest::Error, operation: &'static str, target: &str) -> StoreError {
        if e.is_timeout() {
            StoreError::DeadlineExceeded {
                operation,
                target: target.to_string(),
                timeout: self.timeout,
            }
        } else {
            StoreError::StoreUnavailable(format!("{operation} on {target}: {e}"))
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        index: Option<String>,
    },
    Plain(String),
}

/// Map an error response onto the store error taxonomy.
///
/// `aliases_not_found_exception` stays an `Api` error with status 404; only the
/// caller knows whether that means a conflict or an absent alias.
pub(crate) fn error_from_response(
    operation: &'static str,
    target: &str,
    status: StatusCode,
    text: &str,
) -> StoreError {
    let detail = serde_json::from_str::<ErrorBody>(text).ok().map(|b| b.error);

    match detail {
        Some(ErrorDetail::Structured { kind, reason, index }) => match kind.as_str() {
            "resource_already_exists_exception" | "index_already_exists_exception" => {
                StoreError::AlreadyExists(index.unwrap_or_else(|| target.to_string()))
            }
            "index_not_found_exception" => {
                StoreError::NotFound(index.unwrap_or_else(|| target.to_string()))
            }
            _ => api_error(
                operation,
                target,
                status,
                format!("{kind}: {}", reason.unwrap_or_default()),
            ),
        },
        Some(ErrorDetail::Plain(message)) => {
            if status == StatusCode::NOT_FOUND {
                StoreError::NotFound(target.to_string())
            } else {
                api_error(operation, target, status, message)
            }
        }
        None => {
            if status == StatusCode::NOT_FOUND {
                StoreError::NotFound(target.to_string())
            } else {
                api_error(operation, target, status, text.to_string())
            }
        }
    }
}

fn api_error(operation: &'static str, target: &str, status: StatusCode, message: String) -> StoreError {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            StoreError::StoreUnavailable(format!("{operation} on {target} ({status}): {message}"))
        }
        _ => StoreError::Api {
            operation,
            target: target.to_string(),
            status: status.as_u16(),
            message,
        },
    }
}
