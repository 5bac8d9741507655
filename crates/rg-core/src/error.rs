//! Error types for the retro-gba shim

use thiserror::Error;

use crate::scheduler::ContextState;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Fatal environment error: {0}")]
    Fatal(#[from] FatalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No game loaded")]
    NotLoaded,
}

/// Translation cache memory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Region {region} full: {requested} bytes requested, {available} available")]
    RegionFull {
        region: &'static str,
        requested: usize,
        available: usize,
    },

    #[error("Translation cache is not active")]
    NotActive,

    #[error("Translation cache is already active")]
    AlreadyActive,

    #[error("Gate table full ({0} entries)")]
    GateTableFull(usize),
}

/// Execution context precondition violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Invalid switch into {target} context while it is {state:?}")]
    InvalidTransition {
        target: &'static str,
        state: ContextState,
    },

    #[error("Guest context already exists")]
    AlreadyCreated,

    #[error("Guest context exited without yielding")]
    GuestExited,

    #[error("Guest context was destroyed while suspended")]
    ContextDestroyed,
}

/// Snapshot codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Snapshot length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Snapshot format version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: u16, found: u16 },

    #[error("Snapshot payload of {0} bytes does not fit the blob")]
    PayloadTooLarge(usize),

    #[error("Snapshot cannot be taken while the guest context is running")]
    GuestRunning,

    #[error("No guest context exists")]
    NoGuest,

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Content loading errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Could not load BIOS image file {path}: {source}")]
    BiosUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid BIOS image: expected {expected} bytes, got {actual}")]
    InvalidBios { expected: usize, actual: usize },

    #[error("Could not load the game file {path}: {source}")]
    GameUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid game image: {0}")]
    InvalidGame(String),
}

/// Environment failures the engine cannot recover from
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("Could not map {size} bytes of executable memory for {region}")]
    ExecutableAllocation { region: &'static str, size: usize },

    #[error("Could not allocate a {stack_size}-byte guest context stack: {source}")]
    ContextAllocation {
        stack_size: usize,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Whether the error comes from the environment rather than the content
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SnapshotError::LengthMismatch {
            expected: 16,
            actual: 15,
        };
        assert_eq!(
            format!("{}", err),
            "Snapshot length mismatch: expected 16 bytes, got 15"
        );

        let err = SchedulerError::InvalidTransition {
            target: "host",
            state: ContextState::Running,
        };
        assert_eq!(
            format!("{}", err),
            "Invalid switch into host context while it is Running"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: EngineError = FatalError::ExecutableAllocation {
            region: "rom",
            size: 4096,
        }
        .into();
        assert!(err.is_fatal());

        let err: EngineError = SnapshotError::GuestRunning.into();
        assert!(matches!(err, EngineError::Snapshot(_)));
        assert!(!err.is_fatal());

        let err: EngineError = SnapshotError::NoGuest.into();
        assert_eq!(format!("{}", err), "Snapshot error: No guest context exists");
    }
}
