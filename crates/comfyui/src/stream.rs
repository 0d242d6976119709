//! Per-job event stream over a ComfyUI WebSocket.
//!
//! [`ComfyUIBridge::stream`] turns one job request into an
//! [`EventStream`]: a lazy, finite sequence of [`StreamEvent`]s read from
//! a socket scoped to the request's `client_id`. Nothing touches the
//! network until the first call to [`EventStream::next_event`].
//!
//! The stream ends after the `executing` message with a null node for
//! the submitted prompt, after the optional wall-clock timeout (which
//! yields a synthetic `execution_error`), or after the first fault.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError, WsStream};
use crate::messages::{parse_message, StreamEvent, MISSING_CLIENT_ID_MESSAGE, TIMEOUT_MESSAGE};

/// Faults that end a job's event stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The job's socket could not be opened.
    #[error("WebSocket connect failed: {0}")]
    Connect(#[from] ComfyUIClientError),

    /// The backend did not accept the prompt.
    #[error("Prompt submission failed: {0}")]
    Submit(#[from] ComfyUIApiError),

    /// A text frame was not valid JSON or had no `type`.
    #[error("Malformed message from ComfyUI: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// The socket reported a transport error.
    #[error("WebSocket receive error: {0}")]
    Socket(#[from] tungstenite::Error),

    /// The backend closed the socket before the completion signal.
    #[error("WebSocket closed before prompt {prompt_id} completed")]
    Closed { prompt_id: String },
}

/// Everything needed to run jobs against one ComfyUI instance.
///
/// Cheap to clone; the HTTP client is shared.
#[derive(Clone)]
pub struct ComfyUIBridge {
    client: ComfyUIClient,
    api: Arc<ComfyUIApi>,
    stream_timeout: Option<Duration>,
}

impl ComfyUIBridge {
    /// * `stream_timeout` - wall-clock bound from submission to completion;
    ///   `None` waits for the backend indefinitely.
    pub fn new(client: ComfyUIClient, api: Arc<ComfyUIApi>, stream_timeout: Option<Duration>) -> Self {
        Self {
            client,
            api,
            stream_timeout,
        }
    }

    /// Create the event stream for one job request.
    pub fn stream(&self, request: serde_json::Value) -> EventStream {
        EventStream {
            bridge: self.clone(),
            state: State::Pending(request),
        }
    }
}

enum State {
    Pending(serde_json::Value),
    Running {
        ws: WsStream,
        prompt_id: String,
        deadline: Option<Instant>,
    },
    Done,
}

/// Lazy sequence of events for a single job. Not restartable.
pub struct EventStream {
    bridge: ComfyUIBridge,
    state: State,
}

impl EventStream {
    /// Receive the next event, or `None` once the stream has ended.
    ///
    /// After an `Err` the stream is finished.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, StreamError>> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Done => None,
            State::Pending(request) => {
                let client_id = match relay_core::types::client_id(&request) {
                    Some(id) => id,
                    None => {
                        tracing::warn!("Job request has no client_id");
                        return Some(Ok(StreamEvent::execution_error(MISSING_CLIENT_ID_MESSAGE)));
                    }
                };

                match self.start(&client_id, &request).await {
                    Ok((ws, prompt_id)) => {
                        let deadline = self.bridge.stream_timeout.map(|t| Instant::now() + t);
                        self.receive(ws, prompt_id, deadline).await
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            State::Running {
                ws,
                prompt_id,
                deadline,
            } => self.receive(ws, prompt_id, deadline).await,
        }
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent, StreamError>> + Send {
        futures::stream::unfold(self, |mut events| async move {
            let item = events.next_event().await?;
            Some((item, events))
        })
    }

    /// Open the socket first so no message for the prompt can be missed,
    /// then queue the request.
    async fn start(
        &self,
        client_id: &str,
        request: &serde_json::Value,
    ) -> Result<(WsStream, String), StreamError> {
        let mut ws = self.bridge.client.connect(client_id).await?;

        match self.bridge.api.submit(request).await {
            Ok(submitted) => {
                tracing::info!(
                    client_id = %client_id,
                    prompt_id = %submitted.prompt_id,
                    "Prompt queued",
                );
                Ok((ws, submitted.prompt_id))
            }
            Err(e) => {
                tracing::error!(client_id = %client_id, error = %e, "Prompt submission failed");
                close(&mut ws).await;
                Err(e.into())
            }
        }
    }

    /// Read frames until one yields an event, updating the state so the
    /// next call resumes on the same socket.
    async fn receive(
        &mut self,
        mut ws: WsStream,
        prompt_id: String,
        deadline: Option<Instant>,
    ) -> Option<Result<StreamEvent, StreamError>> {
        loop {
            let frame = match deadline {
                Some(at) => match tokio::time::timeout_at(at, ws.next()).await {
                    Ok(frame) => frame,
                    Err(_) => {
                        tracing::error!(prompt_id = %prompt_id, "Timed out waiting for completion");
                        close(&mut ws).await;
                        return Some(Ok(StreamEvent::execution_error(TIMEOUT_MESSAGE)));
                    }
                },
                None => ws.next().await,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = match parse_message(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::error!(
                                prompt_id = %prompt_id,
                                error = %e,
                                raw_message = %text,
                                "Failed to parse ComfyUI message",
                            );
                            close(&mut ws).await;
                            return Some(Err(StreamError::MalformedFrame(e)));
                        }
                    };

                    tracing::debug!(prompt_id = %prompt_id, kind = %event.kind, "Relaying event");

                    if event.is_completion_of(&prompt_id) {
                        tracing::info!(prompt_id = %prompt_id, "Execution completed");
                        close(&mut ws).await;
                    } else {
                        self.state = State::Running {
                            ws,
                            prompt_id,
                            deadline,
                        };
                    }
                    return Some(Ok(event));
                }
                Some(Ok(Message::Binary(_))) => {
                    // Preview images; not protocol data.
                    tracing::trace!(prompt_id = %prompt_id, "Ignoring binary message (preview image)");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::error!(prompt_id = %prompt_id, ?frame, "ComfyUI WebSocket closed");
                    return Some(Err(StreamError::Closed { prompt_id }));
                }
                Some(Err(e)) => {
                    tracing::error!(prompt_id = %prompt_id, error = %e, "WebSocket receive error");
                    return Some(Err(e.into()));
                }
                None => {
                    tracing::error!(prompt_id = %prompt_id, "WebSocket stream exhausted");
                    return Some(Err(StreamError::Closed { prompt_id }));
                }
            }
        }
    }
}

async fn close(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        tracing::debug!(error = %e, "Error closing ComfyUI WebSocket");
    }
}
