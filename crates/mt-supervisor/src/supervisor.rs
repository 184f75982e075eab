//! Tunnel supervision
//!
//! One supervisor drives a single run: connect the control channel, start a
//! worker per mapping in configuration order, poll liveness, then tear
//! everything down. Workers are stopped in start order and the control
//! channel is always disconnected last.
//!
//! # Phases
//!
//! `Idle → ConnectingControl → StartingWorkers → Running → Draining → Stopped`
//!
//! `Stopped` is reached from any phase. There is no reconnection: a lost
//! control channel or a failed worker ends the run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mt_core::error::{ConnectionError, WorkerError};
use mt_core::relay::{control_url, relay_url, split_access_key};
use mt_core::traits::{ControlChannel, TunnelWorker, WorkerFactory, WorkerParams};
use mt_core::types::{ConnectionState, DisconnectReason, WorkerState};
use mt_core::{MappingSpec, TunnelConfig};

/// Interval between control connection state checks
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between liveness checks while running
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on the wait for the control channel to connect
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing knobs of the supervision loops
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Poll interval while the control channel is connecting
    pub connect_poll_interval: Duration,
    /// Poll interval of the liveness loop
    pub liveness_interval: Duration,
    /// Give up connecting after this long (`None` waits forever)
    pub connect_timeout: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            connect_poll_interval: CONNECT_POLL_INTERVAL,
            liveness_interval: LIVENESS_INTERVAL,
            connect_timeout: Some(CONNECT_TIMEOUT),
        }
    }
}

/// Supervisor lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Idle,
    ConnectingControl,
    StartingWorkers,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorPhase::Idle => write!(f, "idle"),
            SupervisorPhase::ConnectingControl => write!(f, "connecting"),
            SupervisorPhase::StartingWorkers => write!(f, "starting"),
            SupervisorPhase::Running => write!(f, "running"),
            SupervisorPhase::Draining => write!(f, "draining"),
            SupervisorPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTrigger {
    /// The control channel left the connected state
    ControlDisconnected(Option<DisconnectReason>),
    /// A worker reached a terminal state on its own
    WorkerTerminated { name: String, state: WorkerState },
    /// The cancellation token fired
    ShutdownRequested,
    /// No worker was running after the start sequence
    NoActiveWorkers,
}

impl fmt::Display for StopTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopTrigger::ControlDisconnected(Some(reason)) => {
                write!(f, "control channel disconnected ({})", reason)
            }
            StopTrigger::ControlDisconnected(None) => write!(f, "control channel disconnected"),
            StopTrigger::WorkerTerminated { name, state } => {
                write!(f, "tunnel {} is {}", name, state)
            }
            StopTrigger::ShutdownRequested => write!(f, "shutdown requested"),
            StopTrigger::NoActiveWorkers => write!(f, "no active tunnels"),
        }
    }
}

/// Fatal supervision errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Control channel did not connect
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Shutdown was requested while connecting
    #[error("Shutdown requested before the control channel connected")]
    Cancelled,
}

/// A started worker paired with its mapping
pub struct WorkerHandle<W> {
    /// The mapping this worker serves
    pub mapping: MappingSpec,
    /// The worker
    pub worker: W,
}

impl<W: TunnelWorker> WorkerHandle<W> {
    /// Current worker state
    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }
}

/// Drives the control channel and all tunnel workers of one run
pub struct TunnelSupervisor<C, F: WorkerFactory> {
    config: Arc<TunnelConfig>,
    channel: Arc<C>,
    factory: F,
    workers: Vec<WorkerHandle<F::Worker>>,
    phase: SupervisorPhase,
    cancel: CancellationToken,
    settings: SupervisorSettings,
}

impl<C, F> TunnelSupervisor<C, F>
where
    C: ControlChannel + 'static,
    F: WorkerFactory,
{
    /// Create a supervisor in the `Idle` phase
    pub fn new(
        config: Arc<TunnelConfig>,
        channel: Arc<C>,
        factory: F,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            channel,
            factory,
            workers: Vec::new(),
            phase: SupervisorPhase::Idle,
            cancel,
            settings: SupervisorSettings::default(),
        }
    }

    /// Override the default timing
    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current phase
    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    /// Started workers, in start order
    pub fn workers(&self) -> &[WorkerHandle<F::Worker>] {
        &self.workers
    }

    /// Run the full sequence. Teardown always runs before this returns.
    pub async fn run(&mut self) -> Result<StopTrigger, SupervisorError> {
        if let Err(e) = self.connect().await {
            self.teardown().await;
            return match e {
                SupervisorError::Cancelled => Ok(StopTrigger::ShutdownRequested),
                other => Err(other),
            };
        }

        let total = self.config.mappings.len();
        match self.start_all().await {
            Ok(started) if started == total => {
                tracing::info!("All {} tunnels activated successfully", started);
            }
            Ok(started) => {
                tracing::info!("{} of {} tunnels activated", started, total);
            }
            Err(e) => {
                tracing::error!("Tunnel error: {}", e);
                tracing::warn!(
                    "Continuing with {} of {} tunnels active",
                    self.workers.len(),
                    total
                );
            }
        }

        let trigger = if self.workers.is_empty() && !self.cancel.is_cancelled() {
            StopTrigger::NoActiveWorkers
        } else {
            self.run_loop().await
        };

        match &trigger {
            StopTrigger::ShutdownRequested => tracing::info!("Stopping: {}", trigger),
            _ => tracing::warn!("Stopping: {}", trigger),
        }

        self.teardown().await;
        Ok(trigger)
    }

    /// Connect the control channel and wait until it settles
    pub async fn connect(&mut self) -> Result<(), SupervisorError> {
        self.phase = SupervisorPhase::ConnectingControl;

        let hostname = &self.config.server.hostname;
        let url = control_url(hostname);
        let (host, _) = split_access_key(hostname);
        tracing::info!("Server connecting to {}...", host);

        self.channel
            .connect(&url, &self.config.server.credentials())
            .await?;

        let started = Instant::now();
        while self.channel.state() == ConnectionState::Connecting {
            if let Some(timeout) = self.settings.connect_timeout {
                if started.elapsed() >= timeout {
                    return Err(ConnectionError::Timeout(timeout).into());
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Shutdown requested while connecting");
                    return Err(SupervisorError::Cancelled);
                }
                _ = tokio::time::sleep(self.settings.connect_poll_interval) => {}
            }
        }

        match self.channel.state() {
            ConnectionState::Connected => {
                tracing::info!("Server connected");
                Ok(())
            }
            state => {
                let reason = self.channel.disconnect_reason().unwrap_or_else(|| {
                    DisconnectReason::new(state.to_string(), "no reason given")
                });
                Err(ConnectionError::Failed {
                    cause: reason.cause,
                    message: reason.message,
                }
                .into())
            }
        }
    }

    /// Start one worker per mapping, in configuration order.
    ///
    /// Stops at the first failure. Workers started before it stay up and are
    /// stopped by [`TunnelSupervisor::teardown`]. Returns the number of
    /// active workers.
    pub async fn start_all(&mut self) -> Result<usize, WorkerError> {
        self.phase = SupervisorPhase::StartingWorkers;
        tracing::info!("Starting tunnels...");

        let hostname = &self.config.server.hostname;
        for mapping in &self.config.mappings {
            if self.cancel.is_cancelled() {
                tracing::info!("Shutdown requested, not starting remaining tunnels");
                break;
            }

            let params = WorkerParams {
                name: mapping.name.clone(),
                protocol: mapping.protocol,
                local_port: mapping.local_port,
                relay_url: relay_url(hostname, mapping),
                remote_port: mapping.remote_port,
                remote_addr: mapping.dispatch_addr(),
            };

            tracing::info!(
                "Starting tunnel {} for node {} (local:{} -> remote:{}:{})",
                mapping.name,
                mapping.node_name,
                mapping.local_port,
                params.remote_addr,
                mapping.remote_port
            );

            let worker = self.factory.create(mapping);
            let started = worker.start(self.channel.as_ref(), params).await;
            let state = worker.state();

            match started {
                Ok(()) if state == WorkerState::Active => {
                    self.workers.push(WorkerHandle {
                        mapping: mapping.clone(),
                        worker,
                    });
                }
                Ok(()) => {
                    return Err(WorkerError::StartFailed {
                        name: mapping.name.clone(),
                        reason: format!("worker is {} after start", state),
                    });
                }
                Err(e) => {
                    return Err(WorkerError::StartFailed {
                        name: mapping.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(self.workers.len())
    }

    /// Poll liveness until the control channel drops, a worker goes
    /// terminal, or shutdown is requested
    pub async fn run_loop(&mut self) -> StopTrigger {
        self.phase = SupervisorPhase::Running;

        loop {
            if self.cancel.is_cancelled() {
                return StopTrigger::ShutdownRequested;
            }
            if let Some(trigger) = self.check_liveness() {
                return trigger;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return StopTrigger::ShutdownRequested,
                _ = tokio::time::sleep(self.settings.liveness_interval) => {
                    tracing::trace!("Liveness check: {} tunnels", self.workers.len());
                }
            }
        }
    }

    /// A terminal worker is removed from the active set here.
    fn check_liveness(&mut self) -> Option<StopTrigger> {
        if self.channel.state() != ConnectionState::Connected {
            return Some(StopTrigger::ControlDisconnected(
                self.channel.disconnect_reason(),
            ));
        }

        let index = self.workers.iter().position(|h| h.state().is_terminal())?;
        let handle = self.workers.remove(index);
        Some(StopTrigger::WorkerTerminated {
            state: handle.state(),
            name: handle.mapping.name,
        })
    }

    /// Stop every worker in start order, then disconnect the control channel.
    ///
    /// Stop failures are logged and do not interrupt the sequence. Calling
    /// this more than once has no further effect.
    pub async fn teardown(&mut self) {
        if self.phase == SupervisorPhase::Stopped {
            return;
        }
        self.phase = SupervisorPhase::Draining;

        tracing::info!("Stopping all tunnels...");
        for handle in self.workers.drain(..) {
            match handle.worker.stop().await {
                Ok(()) => tracing::debug!("Tunnel {} stopped", handle.mapping.name),
                Err(e) => tracing::warn!("Error stopping tunnel {}: {}", handle.mapping.name, e),
            }
        }

        tracing::info!("Disconnecting from server...");
        self.channel.disconnect().await;
        self.phase = SupervisorPhase::Stopped;
    }
}
