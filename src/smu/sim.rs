//! Simulated SMU behind a PCI index/data port pair
//!
//! Stands in for the hardware access driver in dry runs and tests. It keeps a
//! flat register file, decodes index/data port traffic the way the host
//! bridge does, and answers a write to a mailbox's message register by
//! storing a configurable status in that mailbox's response register.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{lock, Mailbox, Status, ARGUMENT_COUNT};
use crate::cpu::CpuFamily;
use crate::driver::{DriverFailure, PciConfigAccess};
use crate::error::{Result, SmuError};
use crate::mappings::addresses::{self, MailboxAddressSet};

/// Logical register access, after index/data decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterAccess {
    /// Value written to an SMU register
    Write {
        /// SMU register address
        register: u32,
        /// Value written
        value: u32,
    },
    /// Value read from an SMU register
    Read {
        /// SMU register address
        register: u32,
        /// Value returned
        value: u32,
    },
}

impl RegisterAccess {
    /// SMU register address touched
    pub fn register(&self) -> u32 {
        match *self {
            RegisterAccess::Write { register, .. } | RegisterAccess::Read { register, .. } => register,
        }
    }
}

/// A command as the firmware saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimulatedCommand {
    /// Mailbox the message register belonged to
    pub mailbox: Mailbox,
    /// Message code
    pub message: u32,
    /// Argument registers at the time of the message write
    pub arguments: [u32; ARGUMENT_COUNT],
    /// Status stored in the response register
    pub response: Status,
}

#[derive(Debug)]
struct SimState {
    addresses: MailboxAddressSet,
    available: bool,
    initialized: bool,
    fail_writes: bool,
    never_complete: bool,
    default_response: Status,
    responses: HashMap<(Mailbox, u32), Status>,
    index: u32,
    registers: HashMap<u32, u32>,
    commands: Vec<SimulatedCommand>,
    accesses: Vec<RegisterAccess>,
    unlocked_accesses: usize,
    initialize_calls: usize,
    deinitialize_calls: usize,
}

impl SimState {
    fn mailbox_for_message(&self, register: u32) -> Option<Mailbox> {
        [Mailbox::Mp1, Mailbox::Psmu]
            .into_iter()
            .find(|&m| self.addresses.mailbox(m).message == register)
    }

    fn store(&mut self, register: u32, value: u32) {
        self.accesses.push(RegisterAccess::Write { register, value });
        self.registers.insert(register, value);

        let Some(mailbox) = self.mailbox_for_message(register) else {
            return;
        };

        let mailbox_regs = self.addresses.mailbox(mailbox);
        let mut arguments = [0u32; ARGUMENT_COUNT];
        for (i, word) in arguments.iter_mut().enumerate() {
            *word = self.registers.get(&mailbox_regs.argument(i)).copied().unwrap_or(0);
        }

        let response = self
            .responses
            .get(&(mailbox, value))
            .copied()
            .unwrap_or(self.default_response);

        self.commands.push(SimulatedCommand {
            mailbox,
            message: value,
            arguments,
            response,
        });

        if !self.never_complete {
            self.registers.insert(mailbox_regs.response, response.raw());
        }
    }

    fn load(&mut self, register: u32) -> u32 {
        let value = self.registers.get(&register).copied().unwrap_or(0);
        self.accesses.push(RegisterAccess::Read { register, value });
        value
    }

    fn note_lock(&mut self) {
        if !lock::global().is_held() {
            self.unlocked_accesses += 1;
        }
    }
}

/// Cloneable handle to a simulated SMU
///
/// Clones share state, so a test can keep one handle while a transport owns
/// another.
#[derive(Debug, Clone)]
pub struct SimulatedSmu {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSmu {
    /// Simulate a CPU with the given mailbox geography, accepting everything
    pub fn new(addresses: MailboxAddressSet) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                addresses,
                available: true,
                initialized: false,
                fail_writes: false,
                never_complete: false,
                default_response: Status::Ok,
                responses: HashMap::new(),
                index: 0,
                registers: HashMap::new(),
                commands: Vec::new(),
                accesses: Vec::new(),
                unlocked_accesses: 0,
                initialize_calls: 0,
                deinitialize_calls: 0,
            })),
        }
    }

    /// Simulate a CPU of `family`
    pub fn for_family(family: CpuFamily) -> Self {
        Self::new(addresses::configure(family))
    }

    /// Simulate a missing driver module
    pub fn unavailable() -> Self {
        let sim = Self::new(MailboxAddressSet::default());
        sim.state().available = false;
        sim
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `message` on `mailbox` with `status`
    pub fn with_response(self, mailbox: Mailbox, message: u32, status: Status) -> Self {
        self.set_response(mailbox, message, status);
        self
    }

    /// Answer every unlisted message with `status`
    pub fn with_default_response(self, status: Status) -> Self {
        self.state().default_response = status;
        self
    }

    /// Make every port write fail
    pub fn with_failing_writes(self) -> Self {
        self.state().fail_writes = true;
        self
    }

    /// Never write a response after a message
    pub fn never_completing(self) -> Self {
        self.state().never_complete = true;
        self
    }

    /// Change the answer to `message` on `mailbox`
    pub fn set_response(&self, mailbox: Mailbox, message: u32, status: Status) {
        self.state().responses.insert((mailbox, message), status);
    }

    /// Commands received so far, oldest first
    pub fn commands(&self) -> Vec<SimulatedCommand> {
        self.state().commands.clone()
    }

    /// Logical register accesses so far, oldest first
    pub fn accesses(&self) -> Vec<RegisterAccess> {
        self.state().accesses.clone()
    }

    /// Number of port accesses made while the SMU lock was free
    pub fn unlocked_accesses(&self) -> usize {
        self.state().unlocked_accesses
    }

    /// Current value of an SMU register
    pub fn register(&self, register: u32) -> u32 {
        self.state().registers.get(&register).copied().unwrap_or(0)
    }

    /// Mailbox geography being simulated
    pub fn addresses(&self) -> MailboxAddressSet {
        self.state().addresses
    }

    /// Whether a driver session is open
    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// `initialize` calls received
    pub fn initialize_calls(&self) -> usize {
        self.state().initialize_calls
    }

    /// `deinitialize` calls received
    pub fn deinitialize_calls(&self) -> usize {
        self.state().deinitialize_calls
    }

    /// Forget recorded commands and accesses
    pub fn clear_log(&self) {
        let mut state = self.state();
        state.commands.clear();
        state.accesses.clear();
        state.unlocked_accesses = 0;
    }
}

impl PciConfigAccess for SimulatedSmu {
    fn is_ready(&self) -> bool {
        let state = self.state();
        state.available && state.initialized
    }

    fn initialize(&mut self) -> Result<()> {
        let mut state = self.state();
        state.initialize_calls += 1;
        if !state.available {
            return Err(SmuError::DriverLoad(DriverFailure::DllNotFound));
        }
        state.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) {
        let mut state = self.state();
        state.deinitialize_calls += 1;
        state.initialized = false;
    }

    fn read_dword(&self, _pci_address: u32, register: u32) -> Option<u32> {
        let mut state = self.state();
        if !state.initialized || register != state.addresses.data_offset {
            return None;
        }
        state.note_lock();
        let index = state.index;
        Some(state.load(index))
    }

    fn write_dword(&self, _pci_address: u32, register: u32, value: u32) -> bool {
        let mut state = self.state();
        if !state.initialized || state.fail_writes {
            return false;
        }
        state.note_lock();

        if register == state.addresses.index_offset {
            state.index = value;
            true
        } else if register == state.addresses.data_offset {
            let index = state.index;
            state.store(index, value);
            true
        } else {
            false
        }
    }
}
