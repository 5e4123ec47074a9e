//! Hardware access driver bridge
//!
//! The SMU is reached through PCI configuration space, which user space cannot
//! touch directly. A vendor kernel-driver support module (WinRing0 /
//! OpenLibSys ABI) exposes config-space accessors; [`DriverBridge`] loads it
//! and resolves those exports. The rest of the crate only sees the
//! [`PciConfigAccess`] trait, so a simulated SMU can stand in for hardware.

mod ols;

pub use ols::{DriverBridge, OlsFunctions};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Raw PCI configuration access primitives
///
/// `initialize`/`deinitialize` bracket an SMU session; the dword accessors are
/// the only register primitives the mailbox protocol needs.
#[cfg_attr(test, mockall::automock)]
pub trait PciConfigAccess {
    /// Whether the underlying module is loaded and usable
    fn is_ready(&self) -> bool;

    /// Bring the driver into a state where register access works
    ///
    /// # Errors
    ///
    /// Returns [`crate::SmuError::DriverLoad`] when the module never loaded and
    /// [`crate::SmuError::DriverInit`] when the driver refused to start.
    fn initialize(&mut self) -> Result<()>;

    /// Release the driver session; a no-op when not initialized
    fn deinitialize(&mut self);

    /// Read a 32-bit config register; `None` when the driver reports failure
    fn read_dword(&self, pci_address: u32, register: u32) -> Option<u32>;

    /// Write a 32-bit config register; `false` when the driver reports failure
    fn write_dword(&self, pci_address: u32, register: u32, value: u32) -> bool;
}

impl<T: PciConfigAccess + ?Sized> PciConfigAccess for Box<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn initialize(&mut self) -> Result<()> {
        (**self).initialize()
    }

    fn deinitialize(&mut self) {
        (**self).deinitialize()
    }

    fn read_dword(&self, pci_address: u32, register: u32) -> Option<u32> {
        (**self).read_dword(pci_address, register)
    }

    fn write_dword(&self, pci_address: u32, register: u32, value: u32) -> bool {
        (**self).write_dword(pci_address, register, value)
    }
}

/// Why the driver module is unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverFailure {
    /// The module could not be found or loaded
    DllNotFound,
    /// The module lacks a mandatory export
    DllIncorrectVersion,
    /// The driver's own initialize call failed
    DllInitializeError,
}

impl std::fmt::Display for DriverFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverFailure::DllNotFound => write!(f, "driver module not found"),
            DriverFailure::DllIncorrectVersion => write!(f, "incorrect driver module version"),
            DriverFailure::DllInitializeError => write!(f, "driver initialization error"),
        }
    }
}

/// Lifecycle of a [`DriverBridge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    /// Nothing loaded yet
    NotLoaded,
    /// Module loaded, exports resolved
    Loaded,
    /// Driver session open
    Initialized,
    /// Unusable; every operation short-circuits
    Error(DriverFailure),
}

/// Status codes reported by the driver module's `GetDllStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OlsDllStatus {
    /// No error
    NoError,
    /// Unsupported platform
    UnsupportedPlatform,
    /// Kernel driver not loaded
    DriverNotLoaded,
    /// Kernel driver not found
    DriverNotFound,
    /// Kernel driver unloaded
    DriverUnloaded,
    /// Kernel driver not loaded on network drive
    DriverNotLoadedOnNetwork,
    /// Anything else
    UnknownError,
}

impl From<u32> for OlsDllStatus {
    fn from(raw: u32) -> Self {
        match raw {
            0 => OlsDllStatus::NoError,
            1 => OlsDllStatus::UnsupportedPlatform,
            2 => OlsDllStatus::DriverNotLoaded,
            3 => OlsDllStatus::DriverNotFound,
            4 => OlsDllStatus::DriverUnloaded,
            5 => OlsDllStatus::DriverNotLoadedOnNetwork,
            _ => OlsDllStatus::UnknownError,
        }
    }
}

/// Driver flavour reported by `GetDriverType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OlsDriverType {
    /// Unknown
    Unknown,
    /// Windows 9x
    Win9x,
    /// Windows NT
    WinNt,
    /// Windows NT4
    WinNt4,
    /// Windows NT x64
    WinNtX64,
    /// Windows NT IA64
    WinNtIa64,
}

impl From<u32> for OlsDriverType {
    fn from(raw: u32) -> Self {
        match raw {
            1 => OlsDriverType::Win9x,
            2 => OlsDriverType::WinNt,
            3 => OlsDriverType::WinNt4,
            4 => OlsDriverType::WinNtX64,
            5 => OlsDriverType::WinNtIa64,
            _ => OlsDriverType::Unknown,
        }
    }
}

/// Four-part version reported by the module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlsVersion {
    /// Major
    pub major: u8,
    /// Minor
    pub minor: u8,
    /// Revision
    pub revision: u8,
    /// Release
    pub release: u8,
}

impl std::fmt::Display for OlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.revision, self.release)
    }
}

/// Driver module configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Library file name looked up next to the executable, then on the default search path
    pub library_name: String,
    /// Explicit module path; skips the search when set
    pub library_path: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        let library_name = if cfg!(target_pointer_width = "64") {
            "libWinRing0x64.so"
        } else {
            "libWinRing0.so"
        };
        Self {
            library_name: library_name.to_string(),
            library_path: None,
        }
    }
}

impl DriverConfig {
    /// Load the module from an explicit path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Candidate paths in search order
    pub fn candidates(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.library_path {
            return vec![path.clone()];
        }

        let mut candidates = Vec::new();
        if let Some(dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(PathBuf::from)) {
            let local = dir.join(&self.library_name);
            if local.exists() {
                candidates.push(local);
            }
        }
        // Bare name: resolved by the OS loader search path
        candidates.push(PathBuf::from(&self.library_name));
        candidates
    }
}

/// Pack bus/device/function into a PCI address
pub fn pci_bus_dev_func(bus: u32, dev: u32, func: u32) -> u32 {
    ((bus & 0xFF) << 8) | ((dev & 0x1F) << 3) | (func & 7)
}

/// Bus number of a PCI address
pub fn pci_bus(address: u32) -> u32 {
    (address >> 8) & 0xFF
}

/// Device number of a PCI address
pub fn pci_dev(address: u32) -> u32 {
    (address >> 3) & 0x1F
}

/// Function number of a PCI address
pub fn pci_func(address: u32) -> u32 {
    address & 7
}
