//! Channel wire message types and parser.
//!
//! The streaming endpoint sends flat JSON messages with a `type` field
//! and optional camelCase scope fields, e.g.
//! `{"type":"file","projectId":"p1","requestId":"r1","object":{"url":"…"}}`.
//! Unknown `type` values are preserved rather than rejected: an
//! unrecognized kind that still carries a `status` field is mapped
//! best-effort by the tracking layer.

use serde::Deserialize;

/// Server acknowledgement of a `subscribe` control frame.
pub const KIND_SUBSCRIBE_ACK: &str = "subscribe-ack";
/// Progress update for an in-flight job.
pub const KIND_PROGRESS: &str = "progress";
/// A job finished and produced a file.
pub const KIND_FILE: &str = "file";
/// A job failed.
pub const KIND_ERROR: &str = "error";

/// A decoded channel message.
///
/// Immutable once parsed; owned by the channel only for the duration of
/// dispatch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub project_id: Option<String>,
    pub request_id: Option<String>,
    /// Completion percentage (0-100) on `progress` events.
    pub progress: Option<f64>,
    /// Result payload on `file` events.
    pub object: Option<ResultObject>,
    /// Human-readable message on `error` events.
    pub error: Option<String>,
    /// Free-form status string on otherwise-unrecognized kinds.
    pub status: Option<String>,
}

/// Typed result object carried by `file` events.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultObject {
    pub url: String,
    /// Result media type (`"image"`, `"video"`), when the server sends one.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ResultObject {
    /// Whether this result is of a recognized media type. Results with
    /// no declared type are accepted.
    pub fn is_recognized_media(&self) -> bool {
        match self.kind.as_deref() {
            None => true,
            Some(kind) => matches!(kind, "image" | "video"),
        }
    }
}

/// Classification of a [`ChannelEvent`] by its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SubscribeAck,
    Progress,
    File,
    Error,
    /// Anything else. May still carry a mappable `status` field.
    Other,
}

impl ChannelEvent {
    pub fn classify(&self) -> EventKind {
        match self.kind.as_str() {
            KIND_SUBSCRIBE_ACK => EventKind::SubscribeAck,
            KIND_PROGRESS => EventKind::Progress,
            KIND_FILE => EventKind::File,
            KIND_ERROR => EventKind::Error,
            _ => EventKind::Other,
        }
    }

    /// `file` and `error` events end a job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self.classify(), EventKind::File | EventKind::Error)
    }

    /// Result URL of a `file` event, provided the result object is of a
    /// recognized media type.
    pub fn result_url(&self) -> Option<&str> {
        let object = self.object.as_ref()?;
        if !object.is_recognized_media() || object.url.is_empty() {
            return None;
        }
        Some(object.url.as_str())
    }

    /// Progress value rounded and clamped to 0-100.
    pub fn progress_percent(&self) -> Option<u8> {
        self.progress.map(|p| p.round().clamp(0.0, 100.0) as u8)
    }
}

/// Parse a channel text frame into a typed event.
///
/// Returns `Err` for malformed JSON or a missing `type` field. Callers
/// log the failure and drop the frame -- a bad message never propagates
/// into handler code.
pub fn parse_event(text: &str) -> Result<ChannelEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Serialize the `subscribe` control frame sent right after connecting.
pub fn subscribe_frame(project_id: &str) -> String {
    serde_json::json!({
        "type": "subscribe",
        "projectId": project_id,
    })
    .to_string()
}
