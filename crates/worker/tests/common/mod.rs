//! Shared fixtures: a scripted ComfyUI WebSocket endpoint for job tests.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// A single-connection WebSocket server that plays back a script.
pub struct FakeComfyWs {
    /// `ws://127.0.0.1:<port>`
    pub url: String,
}

/// Send `frames` after the handshake, then either hold the socket open
/// until the client closes it or, with `close_after`, close it.
pub async fn spawn_ws(frames: Vec<Message>, close_after: bool) -> FakeComfyWs {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

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
    }
}

pub fn text(value: serde_json::Value) -> Message {
    Message::Text(value.to_string())
}

pub fn preview() -> Message {
    Message::Binary(vec![0x00, 0x00, 0x00, 0x01, 0xFF, 0xD8, 0xFF])
}
