//! WebSocket control channel

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use mt_core::error::ConnectionError;
use mt_core::relay::RelayUrl;
use mt_core::traits::{ControlChannel, Credentials};
use mt_core::types::{ConnectionState, DisconnectReason};

use super::authorized_request;

/// How long `disconnect` waits for the connection task to finish
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    reason: Option<DisconnectReason>,
}

#[derive(Debug)]
struct Shared {
    status: Mutex<Status>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.status.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    fn reason(&self) -> Option<DisconnectReason> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reason
            .clone()
    }

    fn set(&self, state: ConnectionState, reason: Option<DisconnectReason>) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.state = state;
        if reason.is_some() {
            status.reason = reason;
        }
    }
}

/// Control connection over a WebSocket.
///
/// `connect` spawns a task that performs the handshake and then keeps reading
/// so that a server close or transport error is reflected in
/// [`ControlChannel::state`].
pub struct WsControlChannel {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsControlChannel {
    /// Create a disconnected channel
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    state: ConnectionState::Disconnected,
                    reason: None,
                }),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

impl Default for WsControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlChannel for WsControlChannel {
    async fn connect(
        &self,
        url: &RelayUrl,
        credentials: &Credentials,
    ) -> Result<(), ConnectionError> {
        let request =
            authorized_request(url, credentials).map_err(|reason| ConnectionError::InvalidEndpoint {
                url: url.to_string(),
                reason,
            })?;

        if let Some(hash) = &credentials.cert_hash {
            tracing::debug!("Certificate hash hint {} is not enforced", hash);
        }

        self.shared.set(ConnectionState::Connecting, None);
        let handle = tokio::spawn(run_connection(
            request,
            Arc::clone(&self.shared),
            self.cancel.clone(),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.shared.reason()
    }

    async fn disconnect(&self) {
        self.cancel.cancel();

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(DISCONNECT_GRACE, handle).await.is_err() {
                tracing::warn!("Control connection did not close within {:?}", DISCONNECT_GRACE);
            }
        }

        self.shared.set(ConnectionState::Disconnected, None);
    }
}

impl Drop for WsControlChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_connection(request: Request, shared: Arc<Shared>, cancel: CancellationToken) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            shared.set(
                ConnectionState::Disconnected,
                Some(DisconnectReason::new("cancelled", "disconnect requested while connecting")),
            );
            return;
        }
        result = tokio_tungstenite::connect_async(request) => result,
    };

    let (stream, response) = match connected {
        Ok(connected) => connected,
        Err(e) => {
            shared.set(ConnectionState::Disconnected, Some(handshake_failure(e)));
            return;
        }
    };

    tracing::debug!("Control handshake completed ({})", response.status());
    shared.set(ConnectionState::Connected, None);

    let (mut sink, mut source) = stream.split();
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = sink.send(Message::Close(None)).await {
                    tracing::debug!("Failed to send close frame: {}", e);
                }
                let _ = sink.close().await;
                break DisconnectReason::new("local", "disconnect requested");
            }
            message = source.next() => match message {
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => DisconnectReason::new(
                            u16::from(frame.code).to_string(),
                            frame.reason.into_owned(),
                        ),
                        None => DisconnectReason::new("closed", "server closed the connection"),
                    };
                }
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!("Control message ({} bytes)", text.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break DisconnectReason::new("error", e.to_string()),
                None => break DisconnectReason::new("closed", "connection ended"),
            }
        }
    };

    tracing::debug!("Control connection ended: {}", reason);
    shared.set(ConnectionState::Disconnected, Some(reason));
}

fn handshake_failure(error: WsError) -> DisconnectReason {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            DisconnectReason::new(
                status.as_u16().to_string(),
                status.canonical_reason().unwrap_or("handshake rejected"),
            )
        }
        other => DisconnectReason::new("error", other.to_string()),
    }
}
