//! Error types for the smuctl library

use std::io;
use thiserror::Error;

use crate::cpu::CpuFamily;
use crate::driver::DriverFailure;
use crate::mappings::Tunable;
use crate::smu::{Mailbox, Status};

/// Main error type for smuctl operations
#[derive(Error, Debug)]
pub enum SmuError {
    /// The hardware access driver module could not be loaded or is unusable
    #[error("Driver load error: {0}")]
    DriverLoad(DriverFailure),

    /// The driver module loaded but refused to initialize
    #[error("Driver initialization failed: {0}")]
    DriverInit(String),

    /// A bounded register loop ran out of attempts
    #[error("SMU transaction timed out while {stage} after {attempts} attempts")]
    TransactionTimeout {
        /// Protocol step that exhausted its budget
        stage: &'static str,
        /// Number of attempts made
        attempts: u16,
    },

    /// The process-wide SMU lock could not be acquired in time
    #[error("SMU lock not acquired within {waited_ms}ms")]
    LockTimeout {
        /// How long the caller waited
        waited_ms: u64,
    },

    /// The mailbox has no register geography for this CPU
    #[error("{mailbox} mailbox addresses are not configured")]
    AddressNotConfigured {
        /// Mailbox that was addressed
        mailbox: Mailbox,
    },

    /// Firmware answered, but not with `Ok`
    #[error("SMU rejected command: {0}")]
    CommandRejected(Status),

    /// No command mapping exists for this tunable on this CPU family
    #[error("{tunable} is not supported on {family}")]
    UnsupportedOperation {
        /// Requested tunable
        tunable: Tunable,
        /// Detected CPU family
        family: CpuFamily,
    },

    /// Invalid parameter or setpoint
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error while reading the processor description or a settings file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DriverFailure> for SmuError {
    fn from(failure: DriverFailure) -> Self {
        SmuError::DriverLoad(failure)
    }
}

/// Result type for smuctl operations
pub type Result<T> = std::result::Result<T, SmuError>;
