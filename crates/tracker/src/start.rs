//! HTTP client for the start-job API.
//!
//! Starting a generation job is a plain `POST` with a provider-specific
//! payload; the only contract this engine relies on is that a
//! successful response yields `{ projectId, requestId? }`. Any non-2xx
//! response, or a 2xx missing the project id, is a [`StartError`] --
//! terminal, surfaced immediately, never retried here.

use serde_json::Value;

/// Correlation ids returned by a successful start call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReceipt {
    pub project_id: String,
    pub request_id: Option<String>,
}

/// Errors from the start-job API layer.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Start request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The start endpoint returned a non-2xx status code.
    #[error("Start API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response parsed but is missing the required `projectId`.
    #[error("Start response missing required projectId")]
    MissingIds,
}

/// HTTP client for the start-job endpoint.
pub struct StartApi {
    client: reqwest::Client,
    start_url: String,
}

impl StartApi {
    /// Create a client for the start endpoint, e.g.
    /// `http://host:3000/api/generate`.
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            start_url: start_url.into(),
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling with the polling fallback).
    pub fn with_client(client: reqwest::Client, start_url: impl Into<String>) -> Self {
        Self {
            client,
            start_url: start_url.into(),
        }
    }

    /// Start a generation job.
    pub async fn start_job(&self, payload: &Value) -> Result<StartReceipt, StartError> {
        let response = self
            .client
            .post(&self.start_url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StartError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        let receipt = parse_receipt(&body)?;

        tracing::info!(
            project_id = %receipt.project_id,
            request_id = receipt.request_id.as_deref().unwrap_or(""),
            "Generation job started",
        );
        Ok(receipt)
    }
}

/// Extract the correlation ids from a start response body.
pub fn parse_receipt(body: &Value) -> Result<StartReceipt, StartError> {
    let project_id = body
        .get("projectId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(StartError::MissingIds)?;

    let request_id = body
        .get("requestId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(String::from);

    Ok(StartReceipt {
        project_id: project_id.to_string(),
        request_id,
    })
}
