//! Collaborator trait definitions

mod channel;
mod worker;

pub use channel::{ControlChannel, Credentials};
pub use worker::{TunnelWorker, WorkerFactory, WorkerParams};
