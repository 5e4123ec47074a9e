//! Mailbox transactions over PCI index/data port access

use serde::{Deserialize, Serialize};

use super::{lock, CommandArguments, Mailbox, Status, TransportConfig, ARGUMENT_COUNT, SMU_RESPONSE_DONE};
use crate::cpu::CpuFamily;
use crate::driver::PciConfigAccess;
use crate::error::{Result, SmuError};
use crate::mappings::addresses::{self, MailboxAddressSet, MailboxRegisters};

/// Transport lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// Created, driver session not opened
    Idle,
    /// Driver session being opened
    Initializing,
    /// Transactions allowed
    Ready,
    /// Driver session closed
    Deinitialized,
}

/// Runs SMU mailbox transactions over a PCI config access backend
///
/// Each transaction holds the process-wide [`lock::global`] lock for its
/// whole duration, so concurrent callers never interleave register traffic
/// on the shared index/data ports.
pub struct SmuTransport<A: PciConfigAccess> {
    access: A,
    addresses: MailboxAddressSet,
    config: TransportConfig,
    state: TransportState,
}

impl<A: PciConfigAccess> SmuTransport<A> {
    /// Create a transport with default bounds
    pub fn new(access: A, addresses: MailboxAddressSet) -> Self {
        Self::with_config(access, addresses, TransportConfig::default())
    }

    /// Create a transport with custom bounds
    pub fn with_config(access: A, addresses: MailboxAddressSet, config: TransportConfig) -> Self {
        Self {
            access,
            addresses,
            config,
            state: TransportState::Idle,
        }
    }

    /// Create a transport addressing the mailboxes of `family`
    pub fn for_family(access: A, family: CpuFamily, config: TransportConfig) -> Self {
        Self::with_config(access, addresses::configure(family), config)
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Mailbox geography in use
    pub fn addresses(&self) -> &MailboxAddressSet {
        &self.addresses
    }

    /// Bounds in use
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Underlying access backend
    pub fn access(&self) -> &A {
        &self.access
    }

    /// Whether transactions will be attempted
    pub fn is_ready(&self) -> bool {
        self.state == TransportState::Ready && self.access.is_ready()
    }

    /// Open the driver session
    ///
    /// Idempotent once ready.
    ///
    /// # Errors
    ///
    /// Propagates the backend's load or initialization failure; the
    /// transport stays unusable.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state == TransportState::Ready {
            return Ok(());
        }

        self.state = TransportState::Initializing;
        match self.access.initialize() {
            Ok(()) => {
                self.state = TransportState::Ready;
                log::debug!("SMU transport ready");
                Ok(())
            }
            Err(e) => {
                self.state = TransportState::Idle;
                Err(e)
            }
        }
    }

    /// Close the driver session
    pub fn deinitialize(&mut self) {
        if self.state == TransportState::Ready {
            self.access.deinitialize();
            self.state = TransportState::Deinitialized;
            log::debug!("SMU transport closed");
        }
    }

    /// Send `message` to the MP1 mailbox
    pub fn send_mp1(&self, message: u32, args: &mut CommandArguments) -> Status {
        self.send(Mailbox::Mp1, message, args)
    }

    /// Send `message` to the PSMU mailbox
    pub fn send_psmu(&self, message: u32, args: &mut CommandArguments) -> Status {
        self.send(Mailbox::Psmu, message, args)
    }

    /// Run one transaction on `mailbox`
    ///
    /// On return `args` holds whatever firmware left in the argument
    /// registers. Lock timeout, unconfigured addresses and an unready
    /// transport all yield [`Status::Bad`] without register traffic.
    pub fn send(&self, mailbox: Mailbox, message: u32, args: &mut CommandArguments) -> Status {
        match self.execute(mailbox, message, args) {
            Ok(status) => {
                log::trace!(
                    "{} msg=0x{:02X} arg0=0x{:X} -> {}",
                    mailbox,
                    message,
                    args.payload(),
                    status
                );
                status
            }
            Err(e) => {
                log::warn!("{} msg=0x{:02X} not delivered: {}", mailbox, message, e);
                Status::Bad
            }
        }
    }

    fn execute(&self, mailbox: Mailbox, message: u32, args: &mut CommandArguments) -> Result<Status> {
        if self.state != TransportState::Ready {
            return Err(SmuError::DriverInit("transport not initialized".to_string()));
        }
        if !self.addresses.is_configured(mailbox) {
            return Err(SmuError::AddressNotConfigured { mailbox });
        }

        let _guard = lock::global()
            .acquire(self.config.lock_timeout)
            .ok_or(SmuError::LockTimeout {
                waited_ms: self.config.lock_timeout.as_millis() as u64,
            })?;

        let registers = self.addresses.mailbox(mailbox);
        match self.transact(registers, message, args) {
            Ok(status) => Ok(status),
            Err(e @ SmuError::TransactionTimeout { .. }) => {
                log::warn!("{} msg=0x{:02X}: {}", mailbox, message, e);
                // Whatever is in the response register now is the best answer
                Ok(self.read_status(registers.response))
            }
            Err(e) => Err(e),
        }
    }

    /// Register sequence of one command; caller holds the SMU lock
    fn transact(&self, registers: MailboxRegisters, message: u32, args: &mut CommandArguments) -> Result<Status> {
        self.clear_response(registers.response)?;

        for (i, word) in args.words().iter().enumerate() {
            // A missed argument write surfaces as a bad or rejected status
            self.write_register(registers.argument(i), *word);
        }
        self.write_register(registers.message, message);

        self.wait_done(registers.response)?;

        for i in 0..ARGUMENT_COUNT {
            if let Some(word) = self.read_register(registers.argument(i)) {
                args[i] = word;
            }
        }

        Ok(self.read_status(registers.response))
    }

    fn clear_response(&self, response: u32) -> Result<()> {
        let attempts = self.config.clear_attempts;
        if (0..attempts).any(|_| self.write_register(response, 0)) {
            Ok(())
        } else {
            Err(SmuError::TransactionTimeout {
                stage: "clearing response",
                attempts,
            })
        }
    }

    fn wait_done(&self, response: u32) -> Result<()> {
        let attempts = self.config.poll_attempts;
        if (0..attempts).any(|_| self.read_register(response) == Some(SMU_RESPONSE_DONE)) {
            Ok(())
        } else {
            Err(SmuError::TransactionTimeout {
                stage: "polling response",
                attempts,
            })
        }
    }

    fn read_status(&self, response: u32) -> Status {
        self.read_register(response)
            .map(Status::from_raw)
            .unwrap_or(Status::Bad)
    }

    fn write_register(&self, register: u32, value: u32) -> bool {
        let pci = self.addresses.pci_address;
        self.access.write_dword(pci, self.addresses.index_offset, register)
            && self.access.write_dword(pci, self.addresses.data_offset, value)
    }

    fn read_register(&self, register: u32) -> Option<u32> {
        let pci = self.addresses.pci_address;
        if !self.access.write_dword(pci, self.addresses.index_offset, register) {
            return None;
        }
        self.access.read_dword(pci, self.addresses.data_offset)
    }
}

impl<A: PciConfigAccess> Drop for SmuTransport<A> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverFailure, MockPciConfigAccess};
    use mockall::predicate::eq;
    use serial_test::serial;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn ready_mock() -> MockPciConfigAccess {
        let mut mock = MockPciConfigAccess::new();
        mock.expect_initialize().times(1).returning(|| Ok(()));
        mock.expect_deinitialize().times(1).return_const(());
        mock.expect_is_ready().return_const(true);
        mock
    }

    fn raphael_transport(mock: MockPciConfigAccess) -> SmuTransport<MockPciConfigAccess> {
        let mut transport = SmuTransport::for_family(mock, CpuFamily::Raphael, TransportConfig::quick());
        transport.initialize().unwrap();
        transport
    }

    #[test]
    fn test_not_initialized_sends_nothing() {
        let transport = SmuTransport::for_family(
            MockPciConfigAccess::new(),
            CpuFamily::Raphael,
            TransportConfig::quick(),
        );
        let mut args = CommandArguments::with_payload(45_000);

        assert_eq!(transport.state(), TransportState::Idle);
        assert_eq!(transport.send_mp1(0x3E, &mut args), Status::Bad);
    }

    #[test]
    fn test_initialize_failure_leaves_transport_idle() {
        let mut mock = MockPciConfigAccess::new();
        mock.expect_initialize()
            .times(1)
            .returning(|| Err(SmuError::DriverLoad(DriverFailure::DllNotFound)));

        let mut transport = SmuTransport::for_family(mock, CpuFamily::Raphael, TransportConfig::quick());
        assert!(matches!(
            transport.initialize(),
            Err(SmuError::DriverLoad(DriverFailure::DllNotFound))
        ));
        assert_eq!(transport.state(), TransportState::Idle);
        assert!(!transport.is_ready());
    }

    #[test]
    fn test_zero_addresses_never_touch_hardware() {
        // No read/write expectations: any register access fails the test
        let mut transport = SmuTransport::with_config(
            ready_mock(),
            MailboxAddressSet::default(),
            TransportConfig::quick(),
        );
        transport.initialize().unwrap();

        let mut args = CommandArguments::with_payload(1);
        assert_eq!(transport.send_mp1(0x14, &mut args), Status::Bad);
        assert_eq!(transport.send_psmu(0x31, &mut args), Status::Bad);
    }

    #[test]
    fn test_successful_transaction_register_traffic() {
        let mut mock = ready_mock();
        // clear 2 + args 12 + message 2 + index writes for 8 reads
        mock.expect_write_dword().times(24).return_const(true);
        mock.expect_read_dword()
            .with(eq(0), eq(0xBC))
            .times(8)
            .return_const(Some(SMU_RESPONSE_DONE));

        let transport = raphael_transport(mock);
        let mut args = CommandArguments::with_payload(45_000);

        assert_eq!(transport.send_mp1(0x3E, &mut args), Status::Ok);
        // Argument registers were read back over the payload
        assert_eq!(args.words(), &[SMU_RESPONSE_DONE; ARGUMENT_COUNT]);
    }

    #[test]
    fn test_argument_and_message_order() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut mock = ready_mock();
        {
            let writes = Arc::clone(&writes);
            mock.expect_write_dword().returning(move |_, register, value| {
                writes.lock().unwrap().push((register, value));
                true
            });
        }
        mock.expect_read_dword().return_const(Some(SMU_RESPONSE_DONE));

        let transport = raphael_transport(mock);
        let mut args = CommandArguments::with_payload(45_000);
        assert_eq!(transport.send_mp1(0x3E, &mut args), Status::Ok);

        let mp1 = addresses::configure(CpuFamily::Raphael).mp1;
        let mut expected = vec![(0xB8, mp1.response), (0xBC, 0)];
        for i in 0..ARGUMENT_COUNT {
            let value = if i == 0 { 45_000 } else { 0 };
            expected.extend([(0xB8, mp1.argument(i)), (0xBC, value)]);
        }
        expected.extend([(0xB8, mp1.message), (0xBC, 0x3E)]);
        // First poll selects the response register
        expected.push((0xB8, mp1.response));

        let writes = writes.lock().unwrap();
        assert_eq!(writes[..expected.len()], expected[..]);
    }

    #[test]
    fn test_clear_exhaustion_is_bounded() {
        let mut mock = ready_mock();
        // 16 clear attempts + the final status read's index write
        mock.expect_write_dword().times(17).return_const(false);
        mock.expect_read_dword().never();

        let transport = raphael_transport(mock);
        let mut args = CommandArguments::with_payload(45_000);

        assert_eq!(transport.send_mp1(0x3E, &mut args), Status::Bad);
        assert_eq!(args.payload(), 45_000);
    }

    #[test]
    fn test_poll_exhaustion_reports_current_response() {
        let mut mock = ready_mock();
        mock.expect_write_dword().return_const(true);
        // 16 polls + the best-effort status read
        mock.expect_read_dword()
            .times(17)
            .return_const(Some(Status::CmdRejectedBusy.raw()));

        let transport = raphael_transport(mock);
        let mut args = CommandArguments::with_payload(45_000);

        assert_eq!(transport.send_psmu(0x53, &mut args), Status::CmdRejectedBusy);
        // No readback after a timeout
        assert_eq!(args.payload(), 45_000);
    }

    #[test]
    fn test_rejected_status_passed_through() {
        let mut mock = ready_mock();
        mock.expect_write_dword().return_const(true);
        let mut reads = 0;
        mock.expect_read_dword().times(8).returning(move |_, _| {
            reads += 1;
            match reads {
                8 => Some(Status::CmdRejectedPrereq.raw()),
                _ => Some(SMU_RESPONSE_DONE),
            }
        });

        let transport = raphael_transport(mock);
        let mut args = CommandArguments::with_payload(45_000);
        assert_eq!(transport.send_psmu(0x53, &mut args), Status::CmdRejectedPrereq);
    }

    #[test]
    #[serial]
    fn test_lock_timeout_sends_nothing() {
        let config = TransportConfig {
            lock_timeout: Duration::from_millis(20),
            ..TransportConfig::quick()
        };
        let mut transport = SmuTransport::for_family(ready_mock(), CpuFamily::Raphael, config);
        transport.initialize().unwrap();

        let _held = lock::global().acquire(Duration::from_secs(1)).expect("lock is free");
        let mut args = CommandArguments::with_payload(45_000);
        assert_eq!(transport.send_mp1(0x3E, &mut args), Status::Bad);
    }

    #[test]
    fn test_deinitialize_once() {
        let mut transport = raphael_transport(ready_mock());
        assert!(transport.is_ready());

        transport.deinitialize();
        transport.deinitialize();
        assert_eq!(transport.state(), TransportState::Deinitialized);
        // Drop must not deinitialize again; the mock expects exactly one call
    }
}
