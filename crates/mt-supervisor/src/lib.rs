//! mt-supervisor: Tunnel supervision for mesh-tunnel
//!
//! Connects the control channel, starts one tunnel worker per configured
//! mapping, watches their health and tears everything down on failure or
//! shutdown.

pub mod shutdown;
pub mod supervisor;
pub mod transport;

pub use shutdown::{ShutdownCoordinator, ShutdownSignal, SignalSource, StopWaiter};
pub use supervisor::{
    StopTrigger, SupervisorError, SupervisorPhase, SupervisorSettings, TunnelSupervisor,
    WorkerHandle,
};
