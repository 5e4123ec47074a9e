//! Hardware database: mailbox addresses and command codes per CPU family

pub mod addresses;
pub mod commands;

// Re-exports for convenient usage
pub use addresses::{
    configure,
    MailboxAddressSet,
    MailboxRegisters,
    ADDRESS_GROUPS,
};

pub use commands::{routes_for, supported_tunables, CommandRoute, Tunable, COMMAND_TABLE};
