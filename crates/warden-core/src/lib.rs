//! Core of the Warden execution bridge.
//!
//! This crate provides:
//! - `SandboxClient`, the host-side API for running untrusted snippets
//! - Correlated request/response protocol over length-prefixed rkyv frames
//! - Readiness handshake and per-call timeouts with destroy-and-replace
//!   cancellation
//! - Isolated contexts backed by worker processes or dedicated threads
//! - The engine adapter that runs inside each context

pub mod adapter;
pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod ipc;

pub use adapter::{Adapter, AdapterState};
pub use client::{RunOutput, SandboxClient};
pub use config::{AdapterConfig, ClientConfig, RunOptions};
pub use context::{
    ContextEvent, ContextEvents, ContextFactory, IsolatedContext, ProcessContextFactory,
    ThreadContextFactory,
};
pub use engine::{
    CapabilitySlot, DylibEngineLoader, Engine, EngineError, EngineLoader, EngineOutput,
    InProcessLoader,
};
pub use error::{Error, Result};
