//! Relay tunnel worker
//!
//! Binds the mapping's local port on loopback and holds a relay session
//! open for it. The worker is `Active` while both are held and turns
//! `Failed` when the relay session ends on its own.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use mt_core::error::WorkerError;
use mt_core::traits::{ControlChannel, Credentials, TunnelWorker, WorkerFactory, WorkerParams};
use mt_core::types::{ConnectionState, Protocol, WorkerState};
use mt_core::MappingSpec;

use super::authorized_request;

/// Upper bound on the relay session handshake
const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop` waits for the session task to finish
const STOP_GRACE: Duration = Duration::from_secs(2);

type RelayStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Local end of a tunnel, held for the worker's lifetime
#[derive(Debug)]
enum LocalBinding {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl LocalBinding {
    async fn bind(protocol: Protocol, port: u16) -> Result<Self, WorkerError> {
        let addr = (Ipv4Addr::LOCALHOST, port);
        let bound = match protocol {
            Protocol::Tcp => TcpListener::bind(addr).await.map(LocalBinding::Tcp),
            Protocol::Udp => UdpSocket::bind(addr).await.map(LocalBinding::Udp),
            Protocol::Unmapped(_) => return Err(WorkerError::UnsupportedProtocol(protocol)),
        };
        bound.map_err(|source| WorkerError::Bind { port, source })
    }
}

/// Creates [`RelayWorker`]s sharing one set of credentials
#[derive(Debug, Clone)]
pub struct RelayWorkerFactory {
    credentials: Credentials,
}

impl RelayWorkerFactory {
    /// Create a factory
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl WorkerFactory for RelayWorkerFactory {
    type Worker = RelayWorker;

    fn create(&self, mapping: &MappingSpec) -> RelayWorker {
        RelayWorker::new(mapping.name.clone(), self.credentials.clone())
    }
}

/// Tunnel worker backed by a local socket and a relay WebSocket session
pub struct RelayWorker {
    name: String,
    credentials: Credentials,
    state: Arc<Mutex<WorkerState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayWorker {
    /// Create an idle worker
    pub fn new(name: String, credentials: Credentials) -> Self {
        Self {
            name,
            credentials,
            state: Arc::new(Mutex::new(WorkerState::Stopped)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    fn set_state(&self, state: WorkerState) {
        set_state(&self.state, state);
    }

    async fn open(&self, params: &WorkerParams) -> Result<(LocalBinding, RelayStream), WorkerError> {
        let binding = LocalBinding::bind(params.protocol, params.local_port).await?;
        tracing::debug!("Tunnel {} bound {:?}", self.name, binding);

        let request =
            authorized_request(&params.relay_url, &self.credentials).map_err(WorkerError::Relay)?;
        let (stream, _) =
            tokio::time::timeout(RELAY_CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| WorkerError::Relay("relay handshake timed out".to_string()))?
                .map_err(|e| WorkerError::Relay(e.to_string()))?;

        Ok((binding, stream))
    }
}

#[async_trait]
impl TunnelWorker for RelayWorker {
    async fn start(
        &self,
        channel: &dyn ControlChannel,
        params: WorkerParams,
    ) -> Result<(), WorkerError> {
        if channel.state() != ConnectionState::Connected {
            self.set_state(WorkerState::Failed);
            return Err(WorkerError::ControlNotConnected);
        }

        self.set_state(WorkerState::Starting);
        let (binding, stream) = match self.open(&params).await {
            Ok(opened) => opened,
            Err(e) => {
                self.set_state(WorkerState::Failed);
                return Err(e);
            }
        };

        self.set_state(WorkerState::Active);
        let handle = tokio::spawn(hold_session(
            self.name.clone(),
            binding,
            stream,
            Arc::clone(&self.state),
            self.cancel.clone(),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn stop(&self) -> Result<(), WorkerError> {
        self.cancel.cancel();

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                return Err(WorkerError::StopFailed {
                    name: self.name.clone(),
                    reason: format!("relay session did not close within {:?}", STOP_GRACE),
                });
            }
        }

        if self.state() != WorkerState::Failed {
            self.set_state(WorkerState::Stopped);
        }
        Ok(())
    }
}

impl Drop for RelayWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn set_state(state: &Mutex<WorkerState>, value: WorkerState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Keep the binding and session alive until cancelled or the relay closes
async fn hold_session(
    name: String,
    binding: LocalBinding,
    stream: RelayStream,
    state: Arc<Mutex<WorkerState>>,
    cancel: CancellationToken,
) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                set_state(&state, WorkerState::Stopped);
                break;
            }
            message = source.next() => match message {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::warn!("Relay session for tunnel {} closed", name);
                    set_state(&state, WorkerState::Failed);
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!("Relay session for tunnel {} failed: {}", name, e);
                    set_state(&state, WorkerState::Failed);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    drop(binding);
    tracing::debug!("Tunnel {} released its local binding", name);
}
