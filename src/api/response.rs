//! Normalized HTTP responses
//!
//! Expected server-side failures come back as data, not errors: callers get
//! `{success, ok, status, data}` and decide what a rejection means.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrightIdError, Result};

/// Coarse failure category, named as the mobile client reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Problem {
    ClientError,
    ServerError,
    TimeoutError,
    ConnectionError,
    NetworkError,
}

impl Problem {
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_client_error() {
            Some(Problem::ClientError)
        } else if status.is_server_error() {
            Some(Problem::ServerError)
        } else {
            None
        }
    }

    /// Category for a transport failure
    pub fn from_error(err: &BrightIdError) -> Option<Self> {
        match err {
            BrightIdError::Timeout(_) => Some(Problem::TimeoutError),
            BrightIdError::Network(msg) if msg.contains("connect") => Some(Problem::ConnectionError),
            BrightIdError::Network(_) => Some(Problem::NetworkError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Problem::ClientError => "CLIENT_ERROR",
            Problem::ServerError => "SERVER_ERROR",
            Problem::TimeoutError => "TIMEOUT_ERROR",
            Problem::ConnectionError => "CONNECTION_ERROR",
            Problem::NetworkError => "NETWORK_ERROR",
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a request that reached the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Status matched the configured success code
    pub success: bool,
    /// Status was any 2xx
    pub ok: bool,
    pub status: u16,
    /// Parsed body (raw text when it is not JSON), absent when empty
    pub data: Option<Value>,
    pub problem: Option<Problem>,
}

impl SubmitResponse {
    /// Normalize a response, reading its whole body
    pub async fn from_response(response: reqwest::Response, success_status: u16) -> Result<Self> {
        let status = response.status();
        let text = response.text().await?;
        Ok(Self::from_parts(status, &text, success_status))
    }

    pub fn from_parts(status: StatusCode, body: &str, success_status: u16) -> Self {
        let data = if body.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string())))
        };

        Self {
            success: status.as_u16() == success_status,
            ok: status.is_success(),
            status: status.as_u16(),
            data,
            problem: Problem::from_status(status),
        }
    }

    /// Server's `errorMessage` when present, else the problem category
    pub fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(self.failure_message())
    }

    /// Turn an unsuccessful response into [`BrightIdError::ServerRejected`]
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(self.rejection())
    }

    /// Like [`Self::into_result`] but accepting any 2xx status
    pub fn error_for_status(self) -> Result<Self> {
        if self.ok {
            return Ok(self);
        }
        Err(self.rejection())
    }

    fn failure_message(&self) -> String {
        let from_body = self
            .data
            .as_ref()
            .and_then(|d| d.get("errorMessage"))
            .and_then(Value::as_str)
            .map(str::to_string);

        from_body.unwrap_or_else(|| match self.problem {
            Some(problem) => problem.to_string(),
            None => format!("unexpected status {}", self.status),
        })
    }

    fn rejection(&self) -> BrightIdError {
        BrightIdError::ServerRejected {
            status: self.status,
            message: self.failure_message(),
        }
    }
}
