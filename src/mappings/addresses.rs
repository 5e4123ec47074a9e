//! SMU mailbox register geography per CPU family

use serde::{Deserialize, Serialize};

use crate::cpu::CpuFamily;
use crate::smu::Mailbox;

/// PCI address of the host bridge that fronts the SMU (bus 0, dev 0, fn 0)
pub const SMU_PCI_ADDRESS: u32 = 0x0000_0000;
/// Config-space offset of the SMU index register
pub const SMU_INDEX_OFFSET: u32 = 0xB8;
/// Config-space offset of the SMU data register
pub const SMU_DATA_OFFSET: u32 = 0xBC;

/// Message/response/argument registers of one mailbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxRegisters {
    /// Message register; writing it starts the command
    pub message: u32,
    /// Response register
    pub response: u32,
    /// First of six consecutive argument registers
    pub argument_base: u32,
}

impl MailboxRegisters {
    /// Build a register triple
    pub const fn new(message: u32, response: u32, argument_base: u32) -> Self {
        Self { message, response, argument_base }
    }

    /// Address of argument register `index`
    pub fn argument(&self, index: usize) -> u32 {
        self.argument_base + 4 * index as u32
    }

    /// Every register has a real (non-zero) address
    pub fn is_configured(&self) -> bool {
        self.message != 0 && self.response != 0 && self.argument_base != 0
    }
}

/// Everything needed to reach both mailboxes of one CPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxAddressSet {
    /// PCI device the index/data ports live on
    pub pci_address: u32,
    /// Index register offset
    pub index_offset: u32,
    /// Data register offset
    pub data_offset: u32,
    /// MP1 mailbox
    pub mp1: MailboxRegisters,
    /// PSMU mailbox
    pub psmu: MailboxRegisters,
}

impl MailboxAddressSet {
    /// Registers of one mailbox
    pub fn mailbox(&self, mailbox: Mailbox) -> MailboxRegisters {
        match mailbox {
            Mailbox::Mp1 => self.mp1,
            Mailbox::Psmu => self.psmu,
        }
    }

    /// Whether a transaction on `mailbox` can be issued without touching a
    /// zero address
    pub fn is_configured(&self, mailbox: Mailbox) -> bool {
        self.index_offset != 0 && self.data_offset != 0 && self.mailbox(mailbox).is_configured()
    }
}

impl std::fmt::Display for MailboxAddressSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "PCI 0x{:08X} index 0x{:02X} data 0x{:02X}",
            self.pci_address, self.index_offset, self.data_offset
        )?;
        for (name, regs) in [("MP1", self.mp1), ("PSMU", self.psmu)] {
            writeln!(
                f,
                "{:<4} msg 0x{:08X} rsp 0x{:08X} arg 0x{:08X}",
                name, regs.message, regs.response, regs.argument_base
            )?;
        }
        Ok(())
    }
}

/// Families that share one mailbox geography
#[derive(Debug, Clone, Copy)]
pub struct AddressGroup {
    /// Member families
    pub families: &'static [CpuFamily],
    /// MP1 registers
    pub mp1: MailboxRegisters,
    /// PSMU registers
    pub psmu: MailboxRegisters,
}

/// Mailbox geography of every known family
pub const ADDRESS_GROUPS: &[AddressGroup] = &[
    AddressGroup {
        families: &[CpuFamily::Zen1Desktop],
        mp1: MailboxRegisters::new(0x03B1_0528, 0x03B1_0564, 0x03B1_0598),
        psmu: MailboxRegisters::new(0x03B1_051C, 0x03B1_0568, 0x03B1_0590),
    },
    AddressGroup {
        families: &[
            CpuFamily::Raven,
            CpuFamily::Picasso,
            CpuFamily::Dali,
            CpuFamily::Renoir,
            CpuFamily::Cezanne,
        ],
        mp1: MailboxRegisters::new(0x03B1_0528, 0x03B1_0564, 0x03B1_0998),
        psmu: MailboxRegisters::new(0x03B1_0A20, 0x03B1_0A80, 0x03B1_0A88),
    },
    AddressGroup {
        families: &[
            CpuFamily::VanGogh,
            CpuFamily::Rembrandt,
            CpuFamily::Phoenix,
            CpuFamily::Mendocino,
            CpuFamily::HawkPoint,
            CpuFamily::StrixHalo,
        ],
        mp1: MailboxRegisters::new(0x03B1_0528, 0x03B1_0578, 0x03B1_0998),
        psmu: MailboxRegisters::new(0x03B1_0A20, 0x03B1_0A80, 0x03B1_0A88),
    },
    AddressGroup {
        families: &[CpuFamily::StrixPoint],
        mp1: MailboxRegisters::new(0x03B1_0928, 0x03B1_0978, 0x03B1_0998),
        psmu: MailboxRegisters::new(0x03B1_0A20, 0x03B1_0A80, 0x03B1_0A88),
    },
    AddressGroup {
        families: &[
            CpuFamily::Matisse,
            CpuFamily::Vermeer,
            CpuFamily::Raphael,
            CpuFamily::FireRange,
        ],
        mp1: MailboxRegisters::new(0x03B1_0530, 0x03B1_057C, 0x03B1_09C4),
        psmu: MailboxRegisters::new(0x03B1_0524, 0x03B1_0570, 0x03B1_0A40),
    },
];

/// Mailbox addresses for `family`
///
/// Pure and total: `Unknown`, `Unsupported` and anything without a table
/// entry get the all-zero set, which the transport refuses to use.
pub fn configure(family: CpuFamily) -> MailboxAddressSet {
    ADDRESS_GROUPS
        .iter()
        .find(|group| group.families.contains(&family))
        .map(|group| MailboxAddressSet {
            pci_address: SMU_PCI_ADDRESS,
            index_offset: SMU_INDEX_OFFSET,
            data_offset: SMU_DATA_OFFSET,
            mp1: group.mp1,
            psmu: group.psmu,
        })
        .unwrap_or_default()
}
