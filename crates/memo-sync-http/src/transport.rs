//! `HttpTransport`: [`SyncTransport`] over the server's `/notes` endpoints.
//!
//! - `GET {base}/notes` returns `{notes, serverDeleted?}`
//! - `POST {base}/notes` upserts `{notes}`
//! - `PUT {base}/notes` replaces with `{notes}`
//! - deletions are reported as `POST {base}/notes` with `{notes: [], deletedMemos}`

use memo_sync_core::transport::{Ack, RemoteSnapshot, Result, SyncTransport, TransportError};
use memo_sync_core::{DeletionRecord, Note};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Trim an endpoint and strip trailing slashes. Returns None if nothing is left.
pub fn normalize_endpoint(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Serialize)]
struct NotesBody<'a> {
    notes: &'a [Note],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletionBody<'a> {
    notes: [Note; 0],
    deleted_memos: &'a [DeletionRecord],
}

/// Sync transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: String,
    token: Option<String>,
}

impl HttpTransport {
    /// Bind to `endpoint` with an optional bearer token.
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        let base = normalize_endpoint(endpoint).ok_or(TransportError::EndpointNotSet)?;
        Ok(Self {
            client: Client::new(),
            base,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Apply a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, label: &str) -> Result<Value> {
        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status();
        tracing::debug!(
            "{} {} responded {} in {}ms",
            label,
            self.base,
            status.as_u16(),
            start.elapsed().as_millis()
        );
        read_json(response).await
    }

    async fn write_notes(&self, method: Method, notes: &[Note], label: &str) -> Result<Ack> {
        let body = self.request(method, "/notes").json(&NotesBody { notes });
        let payload = self.send(body, label).await?;
        Ok(ack_from(&payload))
    }
}

/// Parse a JSON body, turning non-2xx statuses into transport errors.
pub(crate) async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    if !status.is_success() {
        return Err(status_error(status, &text));
    }
    serde_json::from_str(&text).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

fn status_error(status: StatusCode, body: &str) -> TransportError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("error").to_string()
            } else {
                trimmed.to_string()
            }
        });
    if status == StatusCode::UNAUTHORIZED {
        TransportError::Unauthorized(message)
    } else {
        TransportError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

fn ack_from(payload: &Value) -> Ack {
    Ack {
        received: payload
            .get("received")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok()),
    }
}

fn array_field(payload: &Value, key: &str) -> Vec<Value> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_remote_notes(&self) -> Result<RemoteSnapshot> {
        let payload = self.send(self.request(Method::GET, "/notes"), "GET /notes").await?;
        let snapshot = RemoteSnapshot {
            notes: array_field(&payload, "notes"),
            server_deleted: array_field(&payload, "serverDeleted"),
        };
        tracing::debug!("Fetched {} server notes", snapshot.notes.len());
        Ok(snapshot)
    }

    async fn push_notes(&self, notes: &[Note]) -> Result<Ack> {
        self.write_notes(Method::POST, notes, "POST /notes").await
    }

    async fn replace_remote_notes(&self, notes: &[Note]) -> Result<Ack> {
        self.write_notes(Method::PUT, notes, "PUT /notes").await
    }

    async fn report_deletions(&self, deletions: &[DeletionRecord]) -> Result<Ack> {
        let body = DeletionBody {
            notes: [],
            deleted_memos: deletions,
        };
        let builder = self.request(Method::POST, "/notes").json(&body);
        let payload = self.send(builder, "POST /notes (deletions)").await?;
        Ok(ack_from(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("  https://memo.example.com/api/ "), Some("https://memo.example.com/api".into()));
        assert_eq!(normalize_endpoint("http://h//"), Some("http://h".into()));
        assert_eq!(normalize_endpoint("   "), None);
        assert_eq!(normalize_endpoint("/"), None);
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        assert!(matches!(HttpTransport::new("", None), Err(TransportError::EndpointNotSet)));
    }

    #[test]
    fn test_status_error_prefers_server_message() {
        let err = status_error(StatusCode::BAD_REQUEST, r#"{"error": "notes_required"}"#);
        assert!(matches!(
            err,
            TransportError::Status { status: 400, ref message } if message == "notes_required"
        ));

        let err = status_error(StatusCode::UNAUTHORIZED, "");
        assert!(matches!(err, TransportError::Unauthorized(ref m) if m == "Unauthorized"));

        let err = status_error(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert!(matches!(err, TransportError::Status { status: 502, ref message } if message == "upstream down"));
    }

    #[test]
    fn test_ack_reads_received() {
        assert_eq!(ack_from(&serde_json::json!({"status": "ok", "received": 3})).received, Some(3));
        assert_eq!(ack_from(&serde_json::json!({})).received, None);
    }
}
