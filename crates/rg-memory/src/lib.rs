//! Translation cache memory for retro-gba
//!
//! This crate owns the writable+executable regions that hold translated
//! guest code, and the gate table the translator consults before resuming
//! translated code.

pub mod pages;
pub mod region;
pub mod translation;

pub use pages::PageFlags;
pub use region::{CodeRegion, RegionKind};
pub use translation::{CacheStats, GateTable, RegionStats, TranslationCache, IDLE_LOOP_NONE};
