//! Core logic for the retro-gba frontend shim
//!
//! This crate provides the foundational types, error handling,
//! configuration and logging, together with the cooperative execution
//! scheduler and the snapshot codec.

pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod snapshot;

pub use config::Config;
pub use error::{EngineError, Result};
pub use scheduler::{ContextId, ContextState, GuestYield, Scheduler, SchedulerStats};
pub use snapshot::{
    SnapshotCodec, SnapshotFormat, Snapshottable, StateReader, StateWriter, STATE_MEM_SIZE,
};
