//! WebSocket streaming: the first client message carries the inputs, every
//! stream event goes back as one JSON text message.

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::{
    context::CallContext,
    middleware::RequestId,
    server::AppState,
    stream::{pump_to_sink, StreamEvent},
};

#[instrument(skip_all, fields(request_id = %request_id.0))]
pub async fn handle_socket(socket: WebSocket, state: AppState, request_id: RequestId) {
    let (mut sender, mut receiver) = socket.split();

    let inputs = loop {
        let Some(message) = receiver.next().await else {
            debug!("Socket closed before inputs arrived");
            return;
        };
        let parsed = match message {
            Ok(Message::Text(text)) => parse_inputs(text.as_bytes()),
            Ok(Message::Binary(bytes)) => parse_inputs(&bytes),
            Ok(Message::Close(_)) => return,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "Socket receive failed");
                return;
            }
        };
        match parsed {
            Ok(inputs) => break inputs,
            Err(reason) => {
                warn!(%reason, "Rejecting socket inputs");
                let body = json!({ "error": reason, "kind": "invalid_request" }).to_string();
                let _ = sender.send(Message::Text(body)).await;
                let _ = sender.close().await;
                return;
            }
        }
    };

    let ctx = AppState::call_context(request_id, state.stream_timeout);
    let rx = state.orchestrator.invoke_stream(ctx.clone(), inputs);

    let sink = std::pin::pin!(sender.with(|text: String| async move {
        Ok::<_, axum::Error>(Message::Text(text))
    }));
    let written = forward_until_closed(&ctx, rx, sink, receiver).await;
    ctx.cancel();
    info!(written, "Socket stream finished");
}

/// Pump events to `sink` while watching `incoming` for the client going away.
///
/// A close frame, a receive error or the end of `incoming` cancels `ctx`;
/// the pump then drains until the producer drops its sender.
async fn forward_until_closed<S, St, E>(
    ctx: &CallContext,
    rx: mpsc::Receiver<StreamEvent>,
    sink: S,
    mut incoming: St,
) -> usize
where
    S: Sink<String> + Unpin,
    St: Stream<Item = Result<Message, E>> + Unpin,
{
    let pump = pump_to_sink(rx, sink);
    tokio::pin!(pump);

    let closed = async {
        while let Some(message) = incoming.next().await {
            if matches!(message, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    };

    tokio::select! {
        written = &mut pump => written,
        () = closed => {
            debug!("Client closed socket, cancelling stream");
            ctx.cancel();
            pump.await
        }
    }
}

fn parse_inputs(bytes: &[u8]) -> Result<Map<String, Value>, String> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    serde_json::from_slice(bytes).map_err(|e| format!("invalid inputs: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_must_be_an_object() {
        assert_eq!(parse_inputs(br#"{"topic":"rust"}"#).unwrap()["topic"], json!("rust"));
        assert!(parse_inputs(b"  ").unwrap().is_empty());
        assert!(parse_inputs(b"\"text\"").is_err());
    }

    fn event(done: bool) -> StreamEvent {
        StreamEvent::new(json!("chunk"), Map::new(), done)
    }

    #[tokio::test]
    async fn client_close_cancels_the_run() {
        let ctx = CallContext::new();
        let (tx, rx) = mpsc::channel(1);
        let (sink, mut delivered) = futures::channel::mpsc::unbounded::<String>();
        let (close_tx, incoming) = futures::channel::mpsc::unbounded::<Result<Message, axum::Error>>();

        // producer: one event, then waits for cancellation like the orchestrator does
        let token = ctx.token().clone();
        tokio::spawn(async move {
            tx.send(event(false)).await.unwrap();
            token.cancelled().await;
        });

        close_tx.unbounded_send(Ok(Message::Ping(Vec::new()))).unwrap();
        close_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let written = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            forward_until_closed(&ctx, rx, sink, incoming),
        )
        .await
        .unwrap();

        assert!(ctx.is_cancelled());
        assert_eq!(written, 1);
        assert!(delivered.next().await.unwrap().contains("chunk"));
    }

    #[tokio::test]
    async fn open_socket_stream_runs_to_done() {
        let ctx = CallContext::new();
        let (tx, rx) = mpsc::channel(1);
        let (sink, _delivered) = futures::channel::mpsc::unbounded::<String>();
        let (_open, incoming) = futures::channel::mpsc::unbounded::<Result<Message, axum::Error>>();

        tokio::spawn(async move {
            tx.send(event(false)).await.unwrap();
            tx.send(event(true)).await.unwrap();
        });

        let written = forward_until_closed(&ctx, rx, sink, incoming).await;
        assert_eq!(written, 2);
        assert!(!ctx.is_cancelled());
    }
}
