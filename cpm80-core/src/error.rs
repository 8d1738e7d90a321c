//! Error types for the emulator core.

use thiserror::Error;

/// Errors that can surface from the host side of the emulator.
///
/// Guest-visible failures (missing files, bad FCBs, EOF) are reported
/// through CP/M return codes in the A register and never reach this type.
#[derive(Error, Debug)]
pub enum CpmError {
    #[error("Program too large for the TPA: {0} bytes")]
    ProgramTooLarge(usize),

    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Package error: {0}")]
    Package(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for emulator operations.
pub type CpmResult<T> = Result<T, CpmError>;
