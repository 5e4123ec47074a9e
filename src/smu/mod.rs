//! SMU mailbox protocol engine
//!
//! A mailbox is a message/response/argument register triple inside the SMU's
//! register space, reached through a PCI index/data port pair. [`SmuTransport`]
//! runs one command at a time through it; [`sim::SimulatedSmu`] models the
//! firmware side for dry runs and tests.

pub mod lock;
pub mod sim;
mod transport;

pub use transport::{SmuTransport, TransportState};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SmuError};

/// Default bound on every register retry/poll loop
pub const SMU_TIMEOUT_ATTEMPTS: u16 = 8192;

/// Default wait for the process-wide SMU lock
pub const SMU_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Response value meaning "command finished"
pub const SMU_RESPONSE_DONE: u32 = 0x1;

/// Firmware response vocabulary
///
/// `Bad` doubles as "never reached firmware" (lock timeout, unconfigured
/// addresses, driver unavailable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// No response / transaction not delivered
    Bad,
    /// Command accepted
    Ok,
    /// Command failed
    Failed,
    /// Firmware does not know the message code
    UnknownCmd,
    /// Rejected: prerequisite not met
    CmdRejectedPrereq,
    /// Rejected: firmware busy
    CmdRejectedBusy,
}

impl Status {
    /// Decode a raw response register value
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x01 => Status::Ok,
            0xFF => Status::Failed,
            0xFE => Status::UnknownCmd,
            0xFD => Status::CmdRejectedPrereq,
            0xFC => Status::CmdRejectedBusy,
            0x00 => Status::Bad,
            other => {
                log::warn!("Unrecognized SMU response 0x{:X}", other);
                Status::Bad
            }
        }
    }

    /// Raw response register value
    pub fn raw(self) -> u32 {
        match self {
            Status::Bad => 0x00,
            Status::Ok => 0x01,
            Status::Failed => 0xFF,
            Status::UnknownCmd => 0xFE,
            Status::CmdRejectedPrereq => 0xFD,
            Status::CmdRejectedBusy => 0xFC,
        }
    }

    /// Whether firmware accepted the command
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Convert to a `Result` for `?` propagation
    ///
    /// # Errors
    ///
    /// Any status other than `Ok` becomes [`SmuError::CommandRejected`].
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(SmuError::CommandRejected(self))
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, self.raw())
    }
}

/// One of the two firmware mailboxes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mailbox {
    /// MP1 (SMU microprocessor)
    Mp1,
    /// PSMU (platform SMU)
    Psmu,
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mailbox::Mp1 => f.pad("MP1"),
            Mailbox::Psmu => f.pad("PSMU"),
        }
    }
}

/// Number of argument registers per mailbox
pub const ARGUMENT_COUNT: usize = 6;

/// The six argument words of a mailbox command
///
/// Word 0 carries the payload; the others are zero by convention but are
/// still written out and read back, since firmware may return data in them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandArguments(pub [u32; ARGUMENT_COUNT]);

impl CommandArguments {
    /// Arguments with `payload` in word 0
    pub fn with_payload(payload: u32) -> Self {
        let mut words = [0u32; ARGUMENT_COUNT];
        words[0] = payload;
        Self(words)
    }

    /// Word 0
    pub fn payload(&self) -> u32 {
        self.0[0]
    }

    /// All six words
    pub fn words(&self) -> &[u32; ARGUMENT_COUNT] {
        &self.0
    }
}

impl std::ops::Index<usize> for CommandArguments {
    type Output = u32;

    fn index(&self, index: usize) -> &u32 {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for CommandArguments {
    fn index_mut(&mut self, index: usize) -> &mut u32 {
        &mut self.0[index]
    }
}

/// Transport tuning
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Longest wait for the process-wide SMU lock
    pub lock_timeout: Duration,
    /// Bound on the response-clear retry loop
    pub clear_attempts: u16,
    /// Bound on the completion poll loop
    pub poll_attempts: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            lock_timeout: SMU_LOCK_TIMEOUT,
            clear_attempts: SMU_TIMEOUT_ATTEMPTS,
            poll_attempts: SMU_TIMEOUT_ATTEMPTS,
        }
    }
}

impl TransportConfig {
    /// Short bounds for simulated runs and tests
    pub fn quick() -> Self {
        Self {
            lock_timeout: Duration::from_millis(500),
            clear_attempts: 16,
            poll_attempts: 16,
        }
    }

    /// Maximum bounds for slow firmware
    pub fn patient() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            clear_attempts: u16::MAX,
            poll_attempts: u16::MAX,
        }
    }
}
