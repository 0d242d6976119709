//! Shared fixtures: a scripted ComfyUI WebSocket endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// A single-connection WebSocket server that plays back `frames`.
pub struct FakeComfyWs {
    /// `ws://127.0.0.1:<port>`
    pub url: String,
    /// Request URI seen during the upgrade (path and query).
    pub handshake_uri: oneshot::Receiver<String>,
    /// Number of accepted TCP connections.
    pub accepted: Arc<AtomicUsize>,
}

/// Start a server that sends `frames` after the handshake, then keeps
/// the socket open until the client closes it. With `close_after` the
/// server sends a close frame once the script is done instead.
pub async fn spawn_ws(frames: Vec<Message>, close_after: bool) -> FakeComfyWs {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let (uri_tx, uri_rx) = oneshot::channel();

    let counter = accepted.clone();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        counter.fetch_add(1, Ordering::SeqCst);

        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        for frame in frames {
            if ws.send(frame).await.is_err() {
                return;
            }
        }

        if close_after {
            let _ = ws.close(None).await;
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    FakeComfyWs {
        url: format!("ws://{addr}"),
        handshake_uri: uri_rx,
        accepted,
    }
}

pub fn text(value: serde_json::Value) -> Message {
    Message::Text(value.to_string())
}

pub fn preview() -> Message {
    Message::Binary(vec![0x00, 0x00, 0x00, 0x01, 0xFF, 0xD8, 0xFF])
}
