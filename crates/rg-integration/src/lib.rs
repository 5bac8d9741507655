//! Frontend integration layer for retro-gba
//!
//! This crate connects a guest core to a host frontend: content loading,
//! option resolution, snapshots and the one-frame-per-call run loop.

pub mod guest;
pub mod host;
pub mod loader;
pub mod null_core;
pub mod options;
pub mod runner;

pub use guest::{ExecutionMode, GuestCore};
pub use host::{Host, HostLogLevel, MemoryId, PerfCounter, PixelFormat, VideoFrame};
pub use loader::{ContentPaths, GameLoader};
pub use null_core::NullCore;
pub use options::{EngineOptions, CORE_OPTIONS, DRC_OPTION_KEY};
pub use runner::{Engine, Machine};
