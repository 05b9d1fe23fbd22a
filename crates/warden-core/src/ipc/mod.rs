//! Inter-process communication with sandbox worker processes.
//!
//! This module provides the wire protocol shared by every context kind and
//! the plumbing for spawning and talking to `warden-worker` processes.

pub mod protocol;
mod worker;

pub use protocol::{
    CorrelationId, Request, RequestKind, Response, ResponseKind, read_frame, read_message,
    write_frame, write_message,
};
pub use worker::{ENGINE_PATH_ENV, WORKER_PATH_ENV, WorkerCommand, WorkerProcess};
