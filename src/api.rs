//! High-level API for applying SMU tuning settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::commands::{encode_payload, CommandDispatcher};
use crate::cpu::{CpuFamily, CpuProfile};
use crate::driver::{
    DriverBridge, DriverConfig, DriverState, OlsDllStatus, OlsDriverType, OlsVersion, PciConfigAccess,
};
use crate::error::{Result, SmuError};
use crate::mappings::Tunable;
use crate::smu::sim::SimulatedSmu;
use crate::smu::{Status, TransportConfig};

/// Lowest accepted power limit in watts
pub const MIN_POWER_LIMIT: i32 = 1;
/// Highest accepted power limit in watts
pub const MAX_POWER_LIMIT: i32 = 250;

/// Stock STAPM limit restored by [`SmuController::restore_defaults`]
pub const DEFAULT_STAPM_LIMIT: i32 = 65;
/// Stock slow PPT limit
pub const DEFAULT_SLOW_LIMIT: i32 = 80;
/// Stock fast PPT limit
pub const DEFAULT_FAST_LIMIT: i32 = 95;
/// Stock TCTL limit
pub const DEFAULT_TCTL_TEMP: i32 = 95;
/// Curve optimizer offset meaning "no undervolt"
pub const DEFAULT_CURVE_OFFSET: i32 = 0;

/// Tuning settings as stored by a host application
///
/// Every field is optional in JSON. A setpoint is only applied when its
/// `*_enabled` flag is set and a value is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningSettings {
    /// Master switch, carried for the host
    pub enabled: bool,
    /// Host should apply on startup
    pub auto_apply_on_startup: bool,
    /// Host should re-apply when the power mode changes
    pub auto_apply_on_power_mode_change: bool,

    /// Apply `stapm_limit`
    pub stapm_limit_enabled: bool,
    /// Sustained power limit (W)
    pub stapm_limit: Option<i32>,
    /// Apply `slow_limit`
    pub slow_limit_enabled: bool,
    /// Slow PPT limit (W)
    pub slow_limit: Option<i32>,
    /// Apply `fast_limit`
    pub fast_limit_enabled: bool,
    /// Fast PPT limit (W)
    pub fast_limit: Option<i32>,

    /// Apply `cpu_temp_limit`
    pub cpu_temp_limit_enabled: bool,
    /// TCTL limit (°C)
    pub cpu_temp_limit: Option<i32>,

    /// Apply `cpu_undervolt`
    pub cpu_undervolt_enabled: bool,
    /// All-core curve optimizer offset
    pub cpu_undervolt: Option<i32>,
    /// Apply `igpu_undervolt`
    pub igpu_undervolt_enabled: bool,
    /// iGPU curve optimizer offset
    pub igpu_undervolt: Option<i32>,

    /// Host has shown its undervolt warning
    pub undervolt_warning_acknowledged: bool,
}

impl TuningSettings {
    /// Parse settings from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Enabled setpoints, in application order
    pub fn requested(&self) -> Vec<(Tunable, i32)> {
        [
            (Tunable::StapmLimit, self.stapm_limit_enabled, self.stapm_limit),
            (Tunable::SlowLimit, self.slow_limit_enabled, self.slow_limit),
            (Tunable::FastLimit, self.fast_limit_enabled, self.fast_limit),
            (Tunable::TctlTemp, self.cpu_temp_limit_enabled, self.cpu_temp_limit),
            (Tunable::AllCoreCurveOptimizer, self.cpu_undervolt_enabled, self.cpu_undervolt),
            (Tunable::IgpuCurveOptimizer, self.igpu_undervolt_enabled, self.igpu_undervolt),
        ]
        .into_iter()
        .filter_map(|(tunable, enabled, value)| value.filter(|_| enabled).map(|v| (tunable, v)))
        .collect()
    }
}

/// Check a setpoint against the accepted range for `profile`
///
/// # Errors
///
/// [`SmuError::InvalidParameter`] naming the tunable and range.
pub fn validate_setpoint(profile: &CpuProfile, tunable: Tunable, value: i32) -> Result<()> {
    let (min, max) = match tunable {
        Tunable::StapmLimit | Tunable::SlowLimit | Tunable::FastLimit => (MIN_POWER_LIMIT, MAX_POWER_LIMIT),
        Tunable::TctlTemp => {
            let range = profile.temp_limit_range();
            (*range.start() as i32, *range.end() as i32)
        }
        Tunable::AllCoreCurveOptimizer => {
            let range = profile.cpu_undervolt_range();
            (*range.start(), *range.end())
        }
        Tunable::IgpuCurveOptimizer => {
            let range = profile.igpu_undervolt_range();
            (*range.start(), *range.end())
        }
    };

    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SmuError::InvalidParameter(format!(
            "{} {} outside [{}, {}]",
            tunable, value, min, max
        )))
    }
}

/// Driver and transport configuration
#[derive(Debug, Clone, Default)]
pub struct SmuConfig {
    /// Driver module lookup
    pub driver: DriverConfig,
    /// Transaction bounds
    pub transport: TransportConfig,
}

/// Result of one tunable within an apply/restore run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunableOutcome {
    /// Tunable
    pub tunable: Tunable,
    /// Requested value in user units
    pub value: i32,
    /// Aggregate SMU status; `None` if nothing was sent
    pub status: Option<Status>,
    /// Validation error, if the value was rejected before sending
    pub error: Option<String>,
}

impl TunableOutcome {
    /// Firmware accepted every route
    pub fn is_applied(&self) -> bool {
        self.status == Some(Status::Ok)
    }
}

/// Summary of an apply/restore run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    /// When the run finished
    pub applied_at: DateTime<Utc>,
    /// CPU name
    pub cpu: String,
    /// Detected family
    pub family: CpuFamily,
    /// Whether the simulated SMU was used
    pub dry_run: bool,
    /// Per-tunable results, in application order
    pub outcomes: Vec<TunableOutcome>,
    /// Every outcome applied
    pub success: bool,
}

/// Driver module details for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Load state after an initialize attempt
    pub state: DriverState,
    /// Module that was loaded
    pub path: Option<PathBuf>,
    /// Driver's own status
    pub dll_status: Option<OlsDllStatus>,
    /// Module version
    pub dll_version: Option<OlsVersion>,
    /// Kernel driver version
    pub driver_version: Option<OlsVersion>,
    /// Kernel driver flavor
    pub driver_type: Option<OlsDriverType>,
    /// Last loader/initialization error
    pub last_error: Option<String>,
}

/// Load the driver module described by `config` and report what it says
pub fn driver_info(config: &DriverConfig) -> DriverInfo {
    let mut bridge = DriverBridge::load(config);
    if let Err(e) = bridge.initialize() {
        log::debug!("Driver not initialized: {}", e);
    }

    DriverInfo {
        state: bridge.state(),
        path: bridge.loaded_path().map(Path::to_path_buf),
        dll_status: bridge.dll_status(),
        dll_version: bridge.dll_version(),
        driver_version: bridge.driver_version(),
        driver_type: bridge.driver_type(),
        last_error: bridge.last_error().map(str::to_string),
    }
}

/// Entry point for hosts: applies settings to the detected CPU
///
/// Every call loads its own driver session, or talks to the simulated SMU
/// when one was supplied.
#[derive(Debug)]
pub struct SmuController {
    profile: CpuProfile,
    config: SmuConfig,
    simulator: Option<SimulatedSmu>,
}

impl SmuController {
    /// Controller for `profile` using the real driver
    pub fn new(profile: CpuProfile, config: SmuConfig) -> Self {
        Self {
            profile,
            config,
            simulator: None,
        }
    }

    /// Detect the host CPU and use the default driver lookup
    pub fn detect() -> Self {
        Self::new(CpuProfile::detect(), SmuConfig::default())
    }

    /// Controller that sends everything to `simulator` instead of hardware
    pub fn simulated(profile: CpuProfile, simulator: SimulatedSmu, transport: TransportConfig) -> Self {
        Self {
            profile,
            config: SmuConfig {
                driver: DriverConfig::default(),
                transport,
            },
            simulator: Some(simulator),
        }
    }

    /// Detected processor
    pub fn profile(&self) -> &CpuProfile {
        &self.profile
    }

    /// Active configuration
    pub fn config(&self) -> &SmuConfig {
        &self.config
    }

    /// Whether commands go to a simulated SMU
    pub fn is_dry_run(&self) -> bool {
        self.simulator.is_some()
    }

    /// AMD CPU with a known SMU family
    pub fn is_supported(&self) -> bool {
        self.profile.is_amd() && self.profile.is_supported()
    }

    fn access(&self) -> Box<dyn PciConfigAccess> {
        match &self.simulator {
            Some(sim) => Box::new(sim.clone()),
            None => Box::new(DriverBridge::load(&self.config.driver)),
        }
    }

    fn dispatcher(&self) -> CommandDispatcher<Box<dyn PciConfigAccess>> {
        CommandDispatcher::new(&self.profile, self.access(), self.config.transport.clone())
    }

    /// Whether the driver loads and reports no error
    pub fn check_driver_available(&self) -> bool {
        let mut access = self.access();
        match access.initialize() {
            Ok(()) => {
                let ready = access.is_ready();
                access.deinitialize();
                ready
            }
            Err(e) => {
                log::debug!("Driver check failed: {}", e);
                false
            }
        }
    }

    /// Apply every enabled setpoint; `true` only if all were accepted
    pub fn apply_settings(&self, settings: &TuningSettings) -> bool {
        self.apply_settings_report(settings).success
    }

    /// Apply every enabled setpoint and report per-tunable results
    ///
    /// Undervolt setpoints are skipped on CPUs without the capability.
    /// Invalid setpoints are reported and not sent; the rest still are.
    pub fn apply_settings_report(&self, settings: &TuningSettings) -> ApplyReport {
        let plan: Vec<_> = settings
            .requested()
            .into_iter()
            .filter(|&(tunable, _)| self.capable(tunable))
            .collect();
        self.run(&plan)
    }

    /// Push stock limits back to the SMU
    pub fn restore_defaults(&self) -> bool {
        self.restore_defaults_report().success
    }

    /// Push stock limits back to the SMU and report per-tunable results
    pub fn restore_defaults_report(&self) -> ApplyReport {
        log::info!("Restoring SMU defaults");
        let plan: Vec<_> = [
            (Tunable::StapmLimit, DEFAULT_STAPM_LIMIT),
            (Tunable::SlowLimit, DEFAULT_SLOW_LIMIT),
            (Tunable::FastLimit, DEFAULT_FAST_LIMIT),
            (Tunable::TctlTemp, DEFAULT_TCTL_TEMP),
            (Tunable::AllCoreCurveOptimizer, DEFAULT_CURVE_OFFSET),
            (Tunable::IgpuCurveOptimizer, DEFAULT_CURVE_OFFSET),
        ]
        .into_iter()
        .filter(|&(tunable, _)| self.capable(tunable))
        .collect();
        self.run(&plan)
    }

    /// Apply a single setpoint
    pub fn set(&self, tunable: Tunable, value: i32) -> bool {
        self.run(&[(tunable, value)]).success
    }

    /// Sustained power limit in watts
    pub fn set_stapm_limit(&self, watts: i32) -> bool {
        self.set(Tunable::StapmLimit, watts)
    }

    /// Slow PPT limit in watts
    pub fn set_slow_limit(&self, watts: i32) -> bool {
        self.set(Tunable::SlowLimit, watts)
    }

    /// Fast PPT limit in watts
    pub fn set_fast_limit(&self, watts: i32) -> bool {
        self.set(Tunable::FastLimit, watts)
    }

    /// TCTL limit in °C
    pub fn set_temp_limit(&self, celsius: i32) -> bool {
        self.set(Tunable::TctlTemp, celsius)
    }

    /// All-core curve optimizer offset
    pub fn set_cpu_undervolt(&self, offset: i32) -> bool {
        self.set(Tunable::AllCoreCurveOptimizer, offset)
    }

    /// iGPU curve optimizer offset
    pub fn set_igpu_undervolt(&self, offset: i32) -> bool {
        self.set(Tunable::IgpuCurveOptimizer, offset)
    }

    fn capable(&self, tunable: Tunable) -> bool {
        match tunable {
            Tunable::AllCoreCurveOptimizer => self.profile.supports_undervolting(),
            Tunable::IgpuCurveOptimizer => self.profile.supports_igpu_undervolting(),
            _ => true,
        }
    }

    fn run(&self, plan: &[(Tunable, i32)]) -> ApplyReport {
        let mut report = ApplyReport {
            applied_at: Utc::now(),
            cpu: self.profile.name.clone(),
            family: self.profile.family,
            dry_run: self.is_dry_run(),
            outcomes: Vec::with_capacity(plan.len()),
            success: false,
        };

        if !self.is_supported() {
            log::warn!("Cannot apply settings: {} is not supported", self.profile.name);
            return report;
        }

        let mut dispatcher = self.dispatcher();
        for &(tunable, value) in plan {
            let outcome = match validate_setpoint(&self.profile, tunable, value) {
                Ok(()) => TunableOutcome {
                    tunable,
                    value,
                    status: dispatcher.dispatch(tunable, encode_payload(tunable, value)),
                    error: None,
                },
                Err(e) => {
                    log::warn!("Skipping {}: {}", tunable, e);
                    TunableOutcome {
                        tunable,
                        value,
                        status: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        report.success = report.outcomes.iter().all(TunableOutcome::is_applied);
        report.applied_at = Utc::now();
        log::info!(
            "Applied {} setting(s) on {}: success={}",
            report.outcomes.len(),
            report.family,
            report.success
        );
        report
    }
}
