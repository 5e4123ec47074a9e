//! # smuctl - AMD SMU mailbox control
//!
//! A Rust library for setting power limits, temperature limits and curve
//! optimizer offsets on AMD Ryzen processors by talking to the System
//! Management Unit through its firmware mailboxes.
//!
//! ## Features
//!
//! - **CPU identification** into the Zen family codes the SMU tables cover
//! - **Mailbox protocol engine** with bounded polling and process-wide
//!   serialization
//! - **Declarative command table** per CPU family
//! - **Driver bridge** for the WinRing0/OpenLibSys ABI, loaded at runtime
//! - **Simulated SMU** for dry runs and tests
//! - **JSON settings and reports**
//!
//! ## Quick Start
//!
//! ```no_run
//! use smuctl::{SmuController, TuningSettings};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = SmuController::detect();
//!     println!("CPU: {} [{}]", controller.profile().name, controller.profile().codename());
//!
//!     let settings = TuningSettings::from_json_file("settings.json")?;
//!     let report = controller.apply_settings_report(&settings);
//!     println!("Applied: {}", report.success);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod commands;
pub mod cpu;
pub mod driver;
pub mod error;
pub mod mappings;
pub mod smu;

// Re-export main API for easy access
pub use api::{ApplyReport, SmuConfig, SmuController, TunableOutcome, TuningSettings};
pub use commands::CommandDispatcher;
pub use cpu::{CpuFamily, CpuProfile};
pub use driver::{DriverBridge, DriverConfig, DriverFailure, DriverState, PciConfigAccess};
pub use error::{Result, SmuError};
pub use mappings::{MailboxAddressSet, Tunable};
pub use smu::sim::SimulatedSmu;
pub use smu::{CommandArguments, Mailbox, SmuTransport, Status, TransportConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run a quick compatibility check
///
/// Returns `true` if the host CPU is an AMD part with known SMU tables. Does
/// not load the driver.
///
/// # Example
///
/// ```no_run
/// if smuctl::is_supported() {
///     println!("SMU tuning available");
/// }
/// ```
pub fn is_supported() -> bool {
    let profile = CpuProfile::detect();
    profile.is_amd() && profile.is_supported()
}

/// Get library information
///
/// # Example
///
/// ```no_run
/// println!("Using smuctl v{}", smuctl::version());
/// ```
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(version(), VERSION);
    }

    #[test]
    fn test_is_supported() {
        let profile = CpuProfile::detect();
        assert_eq!(is_supported(), profile.is_amd() && profile.is_supported());
    }
}

/// Prelude module for convenient imports
///
/// # Example
///
/// ```no_run
/// use smuctl::prelude::*;
///
/// let controller = SmuController::detect();
/// let ok = controller.set_stapm_limit(45);
/// ```
pub mod prelude {
    pub use crate::api::{ApplyReport, SmuController, TuningSettings};
    pub use crate::cpu::{CpuFamily, CpuProfile};
    pub use crate::mappings::Tunable;
    pub use crate::smu::Status;
    pub use crate::{is_supported, version};
}
