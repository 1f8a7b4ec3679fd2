//! Authenticated transport to the App Store Connect REST API.
//!
//! The client never retries and never raises on vendor errors: a non-success
//! status comes back as an [`ApiFailure`] carrying the raw body, so callers can
//! decide what a given vendor error code means for them.
use crate::credential::CredentialSource;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

/// Outcome of a mutating call: the decoded body (if any) or the failure.
pub type ApiReply = Result<Option<Value>, ApiFailure>;

/// A call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    /// HTTP status, or `None` when no response arrived (DNS, TLS, timeout).
    pub status: Option<u16>,
    /// Raw response body, or the transport error text.
    pub body: String,
}

impl ApiFailure {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            body: detail.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        self.status.is_none()
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.body.trim()),
            None => write!(f, "transport error: {}", self.body.trim()),
        }
    }
}

/// The three verbs the release workflow needs.
pub trait AppStoreApi {
    /// `None` on any failure; the failure is logged here.
    fn get(&self, path: &str) -> Option<Value>;
    fn post(&self, path: &str, body: &Value) -> ApiReply;
    fn patch(&self, path: &str, body: &Value) -> ApiReply;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
    Patch,
}

impl Method {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        }
    }

    /// GET must be a plain 200; writes also accept created and no-content.
    pub(crate) fn accepts(self, status: u16) -> bool {
        match self {
            Method::Get => status == 200,
            Method::Post | Method::Patch => matches!(status, 200 | 201 | 204),
        }
    }
}

/// Blocking `ureq` client that signs every request with a fresh token.
pub struct HttpClient<C> {
    agent: ureq::Agent,
    base_url: String,
    credentials: C,
}

impl<C: CredentialSource> HttpClient<C> {
    pub fn new(base_url: &str, timeout: Duration, credentials: C) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> ApiReply {
        let token = self
            .credentials
            .mint()
            .map_err(|err| ApiFailure::transport(format!("mint credential: {err:#}")))?;
        let authorization = format!("Bearer {token}");
        let url = self.url(path);
        let start = Instant::now();

        let result = match (method, body) {
            (Method::Get, _) => self
                .agent
                .get(&url)
                .header("Authorization", authorization.as_str())
                .call(),
            (Method::Post, Some(body)) => self
                .agent
                .post(&url)
                .header("Authorization", authorization.as_str())
                .send_json(body),
            (Method::Post, None) => self
                .agent
                .post(&url)
                .header("Authorization", authorization.as_str())
                .send_empty(),
            (Method::Patch, Some(body)) => self
                .agent
                .patch(&url)
                .header("Authorization", authorization.as_str())
                .send_json(body),
            (Method::Patch, None) => self
                .agent
                .patch(&url)
                .header("Authorization", authorization.as_str())
                .send_empty(),
        };
        let elapsed_ms = start.elapsed().as_millis();

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    method = method.as_str(),
                    path,
                    elapsed_ms,
                    error = %err,
                    "request failed before a response arrived"
                );
                return Err(ApiFailure::transport(err.to_string()));
            }
        };
        let status = response.status().as_u16();
        let text = match response.body_mut().read_to_string() {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(
                    method = method.as_str(),
                    path,
                    status,
                    error = %err,
                    "could not read response body"
                );
                String::new()
            }
        };

        tracing::info!(
            method = method.as_str(),
            path,
            status,
            elapsed_ms,
            response_bytes = text.len(),
            "api call complete"
        );

        if !method.accepts(status) {
            return Err(ApiFailure {
                status: Some(status),
                body: text,
            });
        }
        Ok(parse_body(&text))
    }
}

fn parse_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(error = %err, "response body is not JSON");
            None
        }
    }
}

impl<C: CredentialSource> AppStoreApi for HttpClient<C> {
    fn get(&self, path: &str) -> Option<Value> {
        match self.send(Method::Get, path, None) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                tracing::warn!(path, "GET returned an empty or non-JSON body");
                None
            }
            Err(failure) => {
                tracing::warn!(path, %failure, "GET failed");
                None
            }
        }
    }

    fn post(&self, path: &str, body: &Value) -> ApiReply {
        self.send(Method::Post, path, Some(body))
    }

    fn patch(&self, path: &str, body: &Value) -> ApiReply {
        self.send(Method::Patch, path, Some(body))
    }
}
