//! Stream events and their two wire adaptations.
//!
//! Text event stream frames are `event: <message|error>\ndata: <json>\n\n`.
//! Socket messages are the bare event JSON. Both deliveries stop after the
//! first event with `done = true`.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, Sink, SinkExt, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const MESSAGE_EVENT: &str = "message";
pub const ERROR_EVENT: &str = "error";

/// One unit of ordered producer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub data: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub done: bool,
}

impl StreamEvent {
    pub fn new(data: Value, metadata: Map<String, Value>, done: bool) -> Self {
        Self {
            data,
            metadata,
            timestamp: Utc::now(),
            done,
        }
    }

    /// Terminal failure event
    pub fn failure(err: &Error, task: Option<&str>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error".into(), Value::String(err.to_string()));
        metadata.insert("kind".into(), serde_json::to_value(err.kind()).unwrap_or(Value::Null));
        if let Some(task) = task {
            metadata.insert("task".into(), Value::String(task.to_string()));
        }
        Self::new(Value::Null, metadata, true)
    }

    pub fn is_error(&self) -> bool {
        self.metadata.contains_key("error")
    }

    pub fn event_name(&self) -> &'static str {
        if self.is_error() {
            ERROR_EVENT
        } else {
            MESSAGE_EVENT
        }
    }

    pub fn to_sse_frame(&self) -> Result<String> {
        let data = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.event_name(), data))
    }

    /// Parse one frame back into `(event name, event)`
    pub fn from_sse_frame(frame: &str) -> Result<(String, Self)> {
        let mut name = MESSAGE_EVENT.to_string();
        let mut data = Vec::new();
        for line in frame.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                name = value.trim().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push(value.strip_prefix(' ').unwrap_or(value));
            }
        }
        let event = serde_json::from_str(&data.join("\n"))?;
        Ok((name, event))
    }

    pub fn to_socket_message(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_socket_message(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Body stream of SSE frames, ending after the first `done` event
pub fn sse_body_stream(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        loop {
            let event = rx.recv().await?;
            match event.to_sse_frame() {
                Ok(frame) => return Some((Ok(Bytes::from(frame)), (rx, event.done))),
                Err(e) => warn!(error = %e, "Dropping unserializable stream event"),
            }
        }
    })
}

pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}

/// Forward events to a socket as JSON messages.
///
/// Stops after the first `done` event or the first failed write, which is
/// treated as the client going away. Returns the number of messages written.
pub async fn pump_to_sink<S>(mut rx: mpsc::Receiver<StreamEvent>, mut sink: S) -> usize
where
    S: Sink<String> + Unpin,
{
    let mut written = 0;
    while let Some(event) = rx.recv().await {
        let text = match event.to_socket_message() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable stream event");
                continue;
            }
        };
        if sink.send(text).await.is_err() {
            debug!(written, "Socket closed by client");
            return written;
        }
        written += 1;
        if event.done {
            break;
        }
    }
    let _ = sink.close().await;
    written
}
