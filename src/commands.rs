//! Semantic SMU operations
//!
//! [`CommandDispatcher`] turns "set STAPM to 45 W" into the mailbox writes the
//! detected CPU family expects, as listed in [`crate::mappings::commands`].

use crate::cpu::{CpuFamily, CpuProfile};
use crate::driver::PciConfigAccess;
use crate::error::{Result, SmuError};
use crate::mappings::{routes_for, CommandRoute, Tunable};
use crate::smu::{CommandArguments, SmuTransport, Status, TransportConfig};

/// Curve optimizer offsets are encoded downward from this value
pub const CURVE_OFFSET_BASE: u32 = 0x10_0000;

/// Watts to the milliwatt payload the SMU expects
pub fn encode_power_limit(watts: u32) -> u32 {
    watts.saturating_mul(1000)
}

/// Curve optimizer offset to its SMU payload
///
/// Firmware reads `BASE + offset`, so `-n` is sent as `BASE - n` and a
/// positive offset stays above the base.
pub fn encode_curve_offset(offset: i32) -> u32 {
    CURVE_OFFSET_BASE.wrapping_add_signed(offset)
}

/// Setpoint in user units (W, °C, offset steps) to the payload for `tunable`
pub fn encode_payload(tunable: Tunable, value: i32) -> u32 {
    match tunable {
        Tunable::StapmLimit | Tunable::SlowLimit | Tunable::FastLimit => {
            encode_power_limit(value.max(0) as u32)
        }
        Tunable::TctlTemp => value.max(0) as u32,
        Tunable::AllCoreCurveOptimizer | Tunable::IgpuCurveOptimizer => encode_curve_offset(value),
    }
}

/// Maps semantic operations onto mailbox transactions for one CPU family
///
/// Every operation opens the driver session, sends all routes for the
/// tunable, and closes the session again before returning.
pub struct CommandDispatcher<A: PciConfigAccess> {
    transport: SmuTransport<A>,
    family: CpuFamily,
}

impl<A: PciConfigAccess> CommandDispatcher<A> {
    /// Dispatcher for `profile`, talking through `access`
    pub fn new(profile: &CpuProfile, access: A, config: TransportConfig) -> Self {
        Self {
            transport: SmuTransport::for_family(access, profile.family, config),
            family: profile.family,
        }
    }

    /// Family commands are chosen for
    pub fn family(&self) -> CpuFamily {
        self.family
    }

    /// Underlying transport
    pub fn transport(&self) -> &SmuTransport<A> {
        &self.transport
    }

    /// Mailbox writes for `tunable` on this family
    ///
    /// # Errors
    ///
    /// [`SmuError::UnsupportedOperation`] when the family has no mapping.
    pub fn routes(&self, tunable: Tunable) -> Result<&'static [CommandRoute]> {
        match routes_for(self.family, tunable) {
            [] => Err(SmuError::UnsupportedOperation {
                tunable,
                family: self.family,
            }),
            routes => Ok(routes),
        }
    }

    /// Send an already-encoded `payload` for `tunable`
    ///
    /// Returns `None` when the family has no mapping for `tunable`; nothing
    /// is touched in that case. Otherwise returns the first non-`Ok` status
    /// of the route list, or `Ok`. All routes are attempted either way.
    pub fn dispatch(&mut self, tunable: Tunable, payload: u32) -> Option<Status> {
        let routes = match self.routes(tunable) {
            Ok(routes) => routes,
            Err(e) => {
                log::debug!("{}", e);
                return None;
            }
        };

        if let Err(e) = self.transport.initialize() {
            log::error!("Cannot set {}: {}", tunable, e);
            return Some(Status::Bad);
        }

        log::debug!(
            "Setting {} on {} (payload 0x{:X}, {} route(s))",
            tunable,
            self.family,
            payload,
            routes.len()
        );

        let mut aggregate = Status::Ok;
        for route in routes {
            let mut args = CommandArguments::with_payload(payload);
            let status = self.transport.send(route.mailbox, route.message, &mut args);
            if !status.is_ok() {
                log::warn!(
                    "{} msg=0x{:02X} for {} answered {}",
                    route.mailbox,
                    route.message,
                    tunable,
                    status
                );
                if aggregate.is_ok() {
                    aggregate = status;
                }
            }
        }

        self.transport.deinitialize();
        Some(aggregate)
    }

    /// Sustained power limit in watts
    pub fn set_stapm_limit(&mut self, watts: u32) -> Option<Status> {
        self.dispatch(Tunable::StapmLimit, encode_power_limit(watts))
    }

    /// Slow PPT limit in watts
    pub fn set_slow_limit(&mut self, watts: u32) -> Option<Status> {
        self.dispatch(Tunable::SlowLimit, encode_power_limit(watts))
    }

    /// Fast PPT limit in watts
    pub fn set_fast_limit(&mut self, watts: u32) -> Option<Status> {
        self.dispatch(Tunable::FastLimit, encode_power_limit(watts))
    }

    /// TCTL temperature limit in °C
    pub fn set_tctl_temp(&mut self, celsius: u32) -> Option<Status> {
        self.dispatch(Tunable::TctlTemp, celsius)
    }

    /// All-core curve optimizer offset
    pub fn set_all_core_curve_optimizer(&mut self, offset: i32) -> Option<Status> {
        self.dispatch(Tunable::AllCoreCurveOptimizer, encode_curve_offset(offset))
    }

    /// iGPU curve optimizer offset
    pub fn set_igpu_curve_optimizer(&mut self, offset: i32) -> Option<Status> {
        self.dispatch(Tunable::IgpuCurveOptimizer, encode_curve_offset(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smu::sim::SimulatedSmu;
    use crate::smu::{Mailbox, TransportState};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn raphael() -> CpuProfile {
        CpuProfile::from_description(
            "AMD Ryzen 9 7945HX with Radeon Graphics",
            "AMD64 Family 25 Model 97 Stepping 2",
        )
    }

    fn renoir() -> CpuProfile {
        CpuProfile::from_description(
            "AMD Ryzen 7 4800H with Radeon Graphics",
            "AMD64 Family 23 Model 96 Stepping 1",
        )
    }

    fn dispatcher(profile: &CpuProfile, sim: &SimulatedSmu) -> CommandDispatcher<SimulatedSmu> {
        CommandDispatcher::new(profile, sim.clone(), TransportConfig::quick())
    }

    #[rstest]
    #[case(0, 0x10_0000)]
    #[case(-1, 0xF_FFFF)]
    #[case(-20, 0xF_FFEC)]
    #[case(-40, 0xF_FFD8)]
    #[case(15, 0x10_000F)]
    fn test_encode_curve_offset(#[case] offset: i32, #[case] expected: u32) {
        assert_eq!(encode_curve_offset(offset), expected);
    }

    #[test]
    fn test_power_limit_exact_over_accepted_range() {
        for watts in 1..=250u32 {
            assert_eq!(encode_power_limit(watts), watts * 1000, "{} W", watts);
        }
    }

    #[rstest]
    #[case(Tunable::StapmLimit, 45, 45_000)]
    #[case(Tunable::FastLimit, -3, 0)]
    #[case(Tunable::TctlTemp, 95, 95)]
    #[case(Tunable::IgpuCurveOptimizer, -10, 0xF_FFF6)]
    fn test_encode_payload(#[case] tunable: Tunable, #[case] value: i32, #[case] expected: u32) {
        assert_eq!(encode_payload(tunable, value), expected);
    }

    #[test]
    fn test_raphael_stapm_single_mp1_write() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let mut dispatcher = dispatcher(&raphael(), &sim);

        assert_eq!(dispatcher.set_stapm_limit(45), Some(Status::Ok));

        let commands = sim.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].mailbox, Mailbox::Mp1);
        assert_eq!(commands[0].message, 0x3E);
        assert_eq!(commands[0].arguments, [45_000, 0, 0, 0, 0, 0]);

        // Session bracketed around the call
        assert_eq!(sim.initialize_calls(), 1);
        assert_eq!(sim.deinitialize_calls(), 1);
        assert_eq!(dispatcher.transport().state(), TransportState::Deinitialized);
    }

    #[test]
    fn test_renoir_slow_limit_three_routes_in_order() {
        let sim = SimulatedSmu::for_family(CpuFamily::Renoir);
        let mut dispatcher = dispatcher(&renoir(), &sim);

        assert_eq!(dispatcher.set_slow_limit(30), Some(Status::Ok));

        let sent: Vec<_> = sim.commands().iter().map(|c| (c.mailbox, c.message)).collect();
        assert_eq!(
            sent,
            vec![(Mailbox::Mp1, 0x16), (Mailbox::Psmu, 0x33), (Mailbox::Psmu, 0x34)]
        );
        assert!(sim.commands().iter().all(|c| c.arguments[0] == 30_000));
    }

    #[test]
    fn test_first_failure_wins_and_all_routes_attempted() {
        let sim = SimulatedSmu::for_family(CpuFamily::Renoir)
            .with_response(Mailbox::Psmu, 0x33, Status::CmdRejectedBusy)
            .with_response(Mailbox::Psmu, 0x34, Status::Failed);
        let mut dispatcher = dispatcher(&renoir(), &sim);

        assert_eq!(dispatcher.set_slow_limit(30), Some(Status::CmdRejectedBusy));
        assert_eq!(sim.commands().len(), 3);
    }

    #[test]
    fn test_unmapped_tunable_is_silent_no_op() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let mut dispatcher = dispatcher(&raphael(), &sim);

        assert_eq!(dispatcher.set_igpu_curve_optimizer(-10), None);
        assert!(matches!(
            dispatcher.routes(Tunable::IgpuCurveOptimizer),
            Err(SmuError::UnsupportedOperation { .. })
        ));
        assert_eq!(sim.initialize_calls(), 0);
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_unknown_family_touches_nothing() {
        let profile = CpuProfile::from_description("", "");
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let mut dispatcher = dispatcher(&profile, &sim);

        assert_eq!(dispatcher.family(), CpuFamily::Unknown);
        assert_eq!(dispatcher.set_stapm_limit(45), None);
        assert_eq!(dispatcher.set_tctl_temp(90), None);
        assert_eq!(sim.initialize_calls(), 0);
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_driver_failure_returns_bad() {
        let sim = SimulatedSmu::unavailable();
        let mut dispatcher = dispatcher(&raphael(), &sim);

        assert_eq!(dispatcher.set_tctl_temp(90), Some(Status::Bad));
        assert!(sim.commands().is_empty());
        assert_eq!(sim.deinitialize_calls(), 0);
    }

    #[test]
    fn test_curve_optimizer_payload() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let mut dispatcher = dispatcher(&raphael(), &sim);

        assert_eq!(dispatcher.set_all_core_curve_optimizer(-20), Some(Status::Ok));

        let commands = sim.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].mailbox, Mailbox::Psmu);
        assert_eq!(commands[0].message, 0x07);
        assert_eq!(commands[0].arguments[0], 0xF_FFEC);
    }

    #[test]
    fn test_positive_curve_offset_keeps_its_sign() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let mut dispatcher = dispatcher(&raphael(), &sim);

        assert_eq!(dispatcher.set_all_core_curve_optimizer(15), Some(Status::Ok));
        assert_eq!(dispatcher.set_all_core_curve_optimizer(-15), Some(Status::Ok));

        let payloads: Vec<_> = sim.commands().iter().map(|c| c.arguments[0]).collect();
        assert_eq!(payloads, vec![0x10_000F, 0xF_FFF1]);
    }

    #[test]
    fn test_every_family_and_tunable_answers_or_is_no_op() {
        for family in CpuFamily::ALL {
            // Any profile text works; the family is what selects routes
            let profile = CpuProfile {
                name: "AMD Ryzen".to_string(),
                caption: String::new(),
                family,
            };
            let sim = SimulatedSmu::for_family(family);
            let mut dispatcher = dispatcher(&profile, &sim);

            for tunable in Tunable::ALL {
                let value = match tunable {
                    Tunable::StapmLimit | Tunable::SlowLimit | Tunable::FastLimit => 45,
                    Tunable::TctlTemp => 90,
                    Tunable::AllCoreCurveOptimizer | Tunable::IgpuCurveOptimizer => -10,
                };
                let result = dispatcher.dispatch(tunable, encode_payload(tunable, value));

                if routes_for(family, tunable).is_empty() {
                    assert_eq!(result, None, "{:?}/{:?}", family, tunable);
                } else {
                    assert_eq!(result, Some(Status::Ok), "{:?}/{:?}", family, tunable);
                }
            }

            if !family.is_known() {
                assert!(sim.accesses().is_empty(), "{:?}", family);
            }
        }
    }

    #[test]
    fn test_repeated_calls_reopen_session() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let mut dispatcher = dispatcher(&raphael(), &sim);

        assert_eq!(dispatcher.set_stapm_limit(45), Some(Status::Ok));
        assert_eq!(dispatcher.set_fast_limit(65), Some(Status::Ok));
        assert_eq!(sim.initialize_calls(), 2);
        assert_eq!(sim.deinitialize_calls(), 2);
    }
}
