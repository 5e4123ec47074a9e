//! SMU command codes per CPU family and tunable
//!
//! Different generations expose the same tunable under different message
//! codes, and some only apply a change once both mailboxes have seen it. The
//! table lists, per tunable and family group, the ordered mailbox writes.

use serde::{Deserialize, Serialize};

use crate::cpu::CpuFamily;
use crate::smu::Mailbox;

/// Setting that can be pushed to the SMU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tunable {
    /// Sustained power limit (watts)
    StapmLimit,
    /// Slow PPT limit (watts)
    SlowLimit,
    /// Fast PPT limit (watts)
    FastLimit,
    /// Control temperature limit (°C)
    TctlTemp,
    /// All-core curve optimizer offset
    AllCoreCurveOptimizer,
    /// iGPU curve optimizer offset
    IgpuCurveOptimizer,
}

impl Tunable {
    /// Every tunable
    pub const ALL: [Tunable; 6] = [
        Tunable::StapmLimit,
        Tunable::SlowLimit,
        Tunable::FastLimit,
        Tunable::TctlTemp,
        Tunable::AllCoreCurveOptimizer,
        Tunable::IgpuCurveOptimizer,
    ];
}

impl std::fmt::Display for Tunable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Tunable::StapmLimit => "STAPM limit",
            Tunable::SlowLimit => "slow PPT limit",
            Tunable::FastLimit => "fast PPT limit",
            Tunable::TctlTemp => "TCTL temperature",
            Tunable::AllCoreCurveOptimizer => "all-core curve optimizer",
            Tunable::IgpuCurveOptimizer => "iGPU curve optimizer",
        };
        write!(f, "{}", name)
    }
}

/// One mailbox write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRoute {
    /// Target mailbox
    pub mailbox: Mailbox,
    /// Message code
    pub message: u32,
}

const fn mp1(message: u32) -> CommandRoute {
    CommandRoute { mailbox: Mailbox::Mp1, message }
}

const fn psmu(message: u32) -> CommandRoute {
    CommandRoute { mailbox: Mailbox::Psmu, message }
}

/// Route list for one tunable on a group of families
#[derive(Debug, Clone, Copy)]
pub struct CommandEntry {
    /// Tunable
    pub tunable: Tunable,
    /// Families this entry applies to
    pub families: &'static [CpuFamily],
    /// Mailbox writes, in order
    pub routes: &'static [CommandRoute],
}

const RAVEN_GROUP: &[CpuFamily] = &[CpuFamily::Raven, CpuFamily::Picasso, CpuFamily::Dali];

const RENOIR_GROUP: &[CpuFamily] = &[
    CpuFamily::Renoir,
    CpuFamily::VanGogh,
    CpuFamily::Cezanne,
    CpuFamily::Rembrandt,
    CpuFamily::Phoenix,
    CpuFamily::Mendocino,
    CpuFamily::HawkPoint,
    CpuFamily::StrixPoint,
];

const RENOIR_GROUP_AND_STRIX_HALO: &[CpuFamily] = &[
    CpuFamily::Renoir,
    CpuFamily::VanGogh,
    CpuFamily::Cezanne,
    CpuFamily::Rembrandt,
    CpuFamily::Phoenix,
    CpuFamily::Mendocino,
    CpuFamily::HawkPoint,
    CpuFamily::StrixPoint,
    CpuFamily::StrixHalo,
];

const RAPHAEL_GROUP: &[CpuFamily] = &[CpuFamily::Raphael, CpuFamily::FireRange];

const MATISSE_GROUP: &[CpuFamily] = &[CpuFamily::Matisse, CpuFamily::Vermeer];

const VANGOGH_GROUP: &[CpuFamily] = &[
    CpuFamily::VanGogh,
    CpuFamily::Rembrandt,
    CpuFamily::Phoenix,
    CpuFamily::Mendocino,
    CpuFamily::HawkPoint,
    CpuFamily::StrixPoint,
];

const VANGOGH_GROUP_AND_STRIX_HALO: &[CpuFamily] = &[
    CpuFamily::VanGogh,
    CpuFamily::Rembrandt,
    CpuFamily::Phoenix,
    CpuFamily::Mendocino,
    CpuFamily::HawkPoint,
    CpuFamily::StrixPoint,
    CpuFamily::StrixHalo,
];

/// Complete command table
pub const COMMAND_TABLE: &[CommandEntry] = &[
    // STAPM
    CommandEntry { tunable: Tunable::StapmLimit, families: RAVEN_GROUP,   routes: &[mp1(0x1A)] },
    CommandEntry { tunable: Tunable::StapmLimit, families: RENOIR_GROUP,  routes: &[mp1(0x14), psmu(0x31)] },
    // PSMU 0x53 answers CmdRejectedPrereq on Dragon Range
    CommandEntry { tunable: Tunable::StapmLimit, families: RAPHAEL_GROUP, routes: &[mp1(0x3E)] },

    // Fast PPT
    CommandEntry { tunable: Tunable::FastLimit, families: RAVEN_GROUP,   routes: &[mp1(0x1B)] },
    CommandEntry { tunable: Tunable::FastLimit, families: RENOIR_GROUP,  routes: &[mp1(0x15), psmu(0x32)] },
    // PSMU 0x55 answers CmdRejectedPrereq on Dragon Range
    CommandEntry { tunable: Tunable::FastLimit, families: RAPHAEL_GROUP, routes: &[mp1(0x40)] },

    // Slow PPT
    CommandEntry { tunable: Tunable::SlowLimit, families: RAVEN_GROUP,   routes: &[mp1(0x1C)] },
    CommandEntry { tunable: Tunable::SlowLimit, families: RENOIR_GROUP,  routes: &[mp1(0x16), psmu(0x33), psmu(0x34)] },
    // PSMU 0x54 answers CmdRejectedPrereq on Dragon Range
    CommandEntry { tunable: Tunable::SlowLimit, families: RAPHAEL_GROUP, routes: &[mp1(0x3D)] },

    // TCTL
    CommandEntry { tunable: Tunable::TctlTemp, families: &[CpuFamily::Zen1Desktop], routes: &[psmu(0x68)] },
    CommandEntry { tunable: Tunable::TctlTemp, families: RAVEN_GROUP,                 routes: &[mp1(0x1F)] },
    CommandEntry { tunable: Tunable::TctlTemp, families: RENOIR_GROUP_AND_STRIX_HALO, routes: &[mp1(0x19)] },
    CommandEntry { tunable: Tunable::TctlTemp, families: MATISSE_GROUP,               routes: &[mp1(0x23), psmu(0x56)] },
    CommandEntry { tunable: Tunable::TctlTemp, families: RAPHAEL_GROUP,               routes: &[mp1(0x3F), psmu(0x59)] },

    // All-core curve optimizer
    CommandEntry { tunable: Tunable::AllCoreCurveOptimizer, families: &[CpuFamily::Renoir, CpuFamily::Cezanne], routes: &[mp1(0x55), psmu(0xB1)] },
    CommandEntry { tunable: Tunable::AllCoreCurveOptimizer, families: MATISSE_GROUP,                          routes: &[mp1(0x36), psmu(0x0B)] },
    CommandEntry { tunable: Tunable::AllCoreCurveOptimizer, families: VANGOGH_GROUP,                          routes: &[psmu(0x5D)] },
    CommandEntry { tunable: Tunable::AllCoreCurveOptimizer, families: &[CpuFamily::StrixHalo],                routes: &[mp1(0x4C), psmu(0x5D)] },
    CommandEntry { tunable: Tunable::AllCoreCurveOptimizer, families: RAPHAEL_GROUP,                          routes: &[psmu(0x07)] },

    // iGPU curve optimizer
    CommandEntry { tunable: Tunable::IgpuCurveOptimizer, families: &[CpuFamily::Renoir, CpuFamily::Cezanne], routes: &[mp1(0x64), psmu(0x57)] },
    CommandEntry { tunable: Tunable::IgpuCurveOptimizer, families: VANGOGH_GROUP_AND_STRIX_HALO,             routes: &[psmu(0xB7)] },
];

/// Ordered mailbox writes for `tunable` on `family`
///
/// An empty slice means the combination is not supported; that is a no-op
/// for callers, not an error.
pub fn routes_for(family: CpuFamily, tunable: Tunable) -> &'static [CommandRoute] {
    COMMAND_TABLE
        .iter()
        .find(|entry| entry.tunable == tunable && entry.families.contains(&family))
        .map(|entry| entry.routes)
        .unwrap_or(&[])
}

/// Tunables with at least one route on `family`
pub fn supported_tunables(family: CpuFamily) -> Vec<Tunable> {
    Tunable::ALL
        .into_iter()
        .filter(|&tunable| !routes_for(family, tunable).is_empty())
        .collect()
}
