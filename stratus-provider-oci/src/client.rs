//! JSON-over-HTTPS transport for the control plane
//!
//! Every call goes through [`ServiceClient::send`]. [`HttpClient`] is the
//! reqwest implementation; it also serves the work request endpoints the
//! poller needs through [`WorkRequestClient`].

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderMap};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use stratus_core::provider::BoxFuture;
use stratus_core::{
    OperationError, TransportError, TransportResult, WorkRequest, WorkRequestClient, WorkRequestId,
};

use crate::config::{ConfigError, ProviderConfig};

pub const OPC_REQUEST_ID: &str = "opc-request-id";
pub const OPC_RETRY_TOKEN: &str = "opc-retry-token";
pub const OPC_WORK_REQUEST_ID: &str = "opc-work-request-id";
pub const OPC_NEXT_PAGE: &str = "opc-next-page";

/// A single REST call, relative to the versioned base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Sent as `opc-retry-token`; stays the same when the call is retried
    pub retry_token: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retry_token: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a fresh retry token so the service can deduplicate retries
    pub fn with_retry_token(mut self) -> Self {
        self.retry_token = Some(uuid::Uuid::new_v4().to_string());
        self
    }
}

/// Successful response, with the headers the provider cares about lifted out
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub work_request_id: Option<WorkRequestId>,
    pub next_page: Option<String>,
    /// Decoded JSON body; `Null` when the body was empty
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> TransportResult<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| TransportError::decode(format!("unexpected response body: {}", e)))
    }

    /// Items of a list response. Some services return a bare array, others
    /// wrap it as `{"items": [...]}`.
    pub fn items<T: DeserializeOwned>(&self) -> TransportResult<Vec<T>> {
        let items = match &self.body {
            serde_json::Value::Null => return Ok(Vec::new()),
            serde_json::Value::Object(map) => map
                .get("items")
                .cloned()
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            other => other.clone(),
        };
        serde_json::from_value(items)
            .map_err(|e| TransportError::decode(format!("unexpected list body: {}", e)))
    }
}

/// Full client surface used by the provider and the sweeper
pub trait ServiceClient: WorkRequestClient {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, TransportResult<ApiResponse>>;
}

impl<T: ServiceClient + ?Sized> ServiceClient for Arc<T> {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, TransportResult<ApiResponse>> {
        (**self).send(request)
    }
}

/// Fetch every page of a list call, following `opc-next-page`.
///
/// Stops at the first page token seen twice.
pub async fn list_all<C, T>(client: &C, request: ApiRequest) -> TransportResult<Vec<T>>
where
    C: ServiceClient + ?Sized,
    T: DeserializeOwned,
{
    let mut items = Vec::new();
    let mut page: Option<String> = None;
    let mut seen = HashSet::new();

    loop {
        let mut call = request.clone();
        if let Some(token) = page.take() {
            call = call.with_query("page", token);
        }
        let response = client.send(call).await?;
        items.extend(response.items::<T>()?);

        match response.next_page {
            Some(next) if !next.is_empty() => {
                if !seen.insert(next.clone()) {
                    warn!(
                        "{} returned page token {} again, stopping with {} items",
                        request.path,
                        next,
                        items.len()
                    );
                    return Ok(items);
                }
                page = Some(next);
            }
            _ => return Ok(items),
        }
    }
}

/// Error body returned by the service on non-2xx responses
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("stratus/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url()?,
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn execute(&self, request: ApiRequest) -> TransportResult<ApiResponse> {
        let url = self.url(&request.path);
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(OPC_REQUEST_ID, &request_id)
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(token) = &request.retry_token {
            builder = builder.header(OPC_RETRY_TOKEN, token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!("{} {} ({}: {})", request.method, url, OPC_REQUEST_ID, request_id);

        let response = builder.send().await.map_err(|e| {
            TransportError::network(format!("{} {} failed: {}", request.method, url, e))
        })?;

        let status = response.status();
        let work_request_id = header_value(response.headers(), OPC_WORK_REQUEST_ID)
            .map(WorkRequestId::from);
        let next_page = header_value(response.headers(), OPC_NEXT_PAGE);

        let bytes = response.bytes().await.map_err(|e| {
            TransportError::network(format!("{} {} body: {}", request.method, url, e))
        })?;

        if !status.is_success() {
            return Err(error_from_body(status, &bytes));
        }

        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::decode(format!("invalid JSON from {}: {}", url, e)))?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            work_request_id,
            next_page,
            body,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_from_body(status: reqwest::StatusCode, body: &[u8]) -> TransportError {
    let parsed = serde_json::from_slice::<ServiceErrorBody>(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code.clone());
    let message = parsed
        .and_then(|b| b.message)
        .or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    TransportError::http(status.as_u16(), code, message)
}

impl ServiceClient for HttpClient {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, TransportResult<ApiResponse>> {
        Box::pin(self.execute(request))
    }
}

impl WorkRequestClient for HttpClient {
    fn get_work_request<'a>(
        &'a self,
        id: &'a WorkRequestId,
    ) -> BoxFuture<'a, TransportResult<WorkRequest>> {
        Box::pin(async move {
            self.execute(ApiRequest::get(format!("/workRequests/{}", id)))
                .await?
                .json()
        })
    }

    fn list_work_request_errors<'a>(
        &'a self,
        id: &'a WorkRequestId,
    ) -> BoxFuture<'a, TransportResult<Vec<OperationError>>> {
        Box::pin(list_all(
            self,
            ApiRequest::get(format!("/workRequests/{}/errors", id)),
        ))
    }
}
