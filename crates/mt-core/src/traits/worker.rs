//! Tunnel worker traits

use async_trait::async_trait;
use std::net::IpAddr;

use super::ControlChannel;
use crate::config::MappingSpec;
use crate::error::WorkerError;
use crate::relay::RelayUrl;
use crate::types::{Protocol, WorkerState};

/// Everything a worker needs to bring one mapping up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerParams {
    /// Tunnel name, for logs and errors
    pub name: String,
    /// Transport protocol
    pub protocol: Protocol,
    /// Local port to bind
    pub local_port: u16,
    /// Relay session endpoint
    pub relay_url: RelayUrl,
    /// Port on the remote side
    pub remote_port: u16,
    /// Effective remote address (loopback when not configured)
    pub remote_addr: IpAddr,
}

/// Per-mapping forwarding unit
#[async_trait]
pub trait TunnelWorker: Send + Sync {
    /// Bring the tunnel up over `channel`.
    ///
    /// On success the worker state is expected to read `Active`.
    async fn start(
        &self,
        channel: &dyn ControlChannel,
        params: WorkerParams,
    ) -> Result<(), WorkerError>;

    /// Current lifecycle state
    fn state(&self) -> WorkerState;

    /// Tear the tunnel down
    async fn stop(&self) -> Result<(), WorkerError>;
}

/// Creates one worker per mapping
pub trait WorkerFactory: Send + Sync {
    /// The worker type produced
    type Worker: TunnelWorker;

    /// Create an idle worker for `mapping`
    fn create(&self, mapping: &MappingSpec) -> Self::Worker;
}
