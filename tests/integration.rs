#[cfg(test)]
mod integration_tests {
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    use smuctl::api::SmuConfig;
    use smuctl::cpu::parse_cpuinfo;
    use smuctl::mappings::addresses;
    use smuctl::smu::sim::RegisterAccess;
    use smuctl::{
        CommandArguments, CpuFamily, CpuProfile, DriverConfig, Mailbox, SimulatedSmu, SmuController,
        SmuTransport, Status, TransportConfig, Tunable, TuningSettings,
    };

    const RAPHAEL_CPUINFO: &str = "\
processor\t: 0
vendor_id\t: AuthenticAMD
cpu family\t: 25
model\t\t: 97
model name\t: AMD Ryzen 9 7945HX with Radeon Graphics
stepping\t: 2
";

    fn raphael() -> CpuProfile {
        let description = parse_cpuinfo(RAPHAEL_CPUINFO);
        CpuProfile::from_description(description.name, description.caption)
    }

    fn patient_quick() -> TransportConfig {
        TransportConfig {
            lock_timeout: Duration::from_secs(5),
            ..TransportConfig::quick()
        }
    }

    #[test]
    fn test_library_version() {
        assert!(!smuctl::version().is_empty());

        let profile = CpuProfile::detect();
        assert_eq!(smuctl::is_supported(), profile.is_amd() && profile.is_supported());
        if !profile.is_amd() {
            assert!(!smuctl::is_supported());
        }
    }

    #[test]
    fn test_cpuinfo_to_raphael_profile() {
        let profile = raphael();
        assert_eq!(profile.family, CpuFamily::Raphael);
        assert_eq!(profile.codename(), CpuFamily::Raphael.codename());
        assert!(profile.is_amd());
        assert!(profile.supports_undervolting());
    }

    #[test]
    fn test_raphael_stapm_end_to_end() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let controller = SmuController::simulated(raphael(), sim.clone(), patient_quick());

        assert!(controller.set_stapm_limit(45));

        let commands = sim.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].mailbox, Mailbox::Mp1);
        assert_eq!(commands[0].message, 0x3E);
        assert_eq!(commands[0].arguments, [45_000, 0, 0, 0, 0, 0]);

        // Protocol order on the MP1 registers
        let mp1 = addresses::configure(CpuFamily::Raphael).mp1;
        let accesses = sim.accesses();
        assert_eq!(accesses[0], RegisterAccess::Write { register: mp1.response, value: 0 });
        assert_eq!(accesses[1], RegisterAccess::Write { register: mp1.argument_base, value: 45_000 });
        assert_eq!(accesses[7], RegisterAccess::Write { register: mp1.message, value: 0x3E });
        assert_eq!(accesses[8], RegisterAccess::Read { register: mp1.response, value: 1 });
        assert_eq!(sim.unlocked_accesses(), 0);
        assert!(!sim.is_initialized());
    }

    #[test]
    fn test_unknown_family_never_touches_registers() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let profile = CpuProfile::from_description("AMD Ryzen Something", "");
        let controller = SmuController::simulated(profile, sim.clone(), patient_quick());

        assert_eq!(controller.profile().family, CpuFamily::Unknown);
        assert!(!controller.set_stapm_limit(45));
        assert!(!controller.restore_defaults());
        assert!(sim.accesses().is_empty());

        // Even a transport forced onto the all-zero address set stays silent
        let mut transport = SmuTransport::for_family(sim.clone(), CpuFamily::Unknown, patient_quick());
        transport.initialize().unwrap();
        let mut args = CommandArguments::with_payload(45_000);
        assert_eq!(transport.send_mp1(0x3E, &mut args), Status::Bad);
        assert!(sim.accesses().is_empty());
    }

    #[test]
    fn test_missing_driver_module_fails_softly() {
        let config = SmuConfig {
            driver: DriverConfig::with_path("/nonexistent/libWinRing0x64.so"),
            transport: patient_quick(),
        };
        let controller = SmuController::new(raphael(), config);

        assert!(!controller.check_driver_available());
        assert!(!controller.set_stapm_limit(45));

        let report = controller.restore_defaults_report();
        assert!(!report.success);
        assert!(report
            .outcomes
            .iter()
            .filter(|o| o.tunable != Tunable::IgpuCurveOptimizer)
            .all(|o| o.status == Some(Status::Bad)));
    }

    #[test]
    #[serial]
    fn test_concurrent_transactions_never_interleave() {
        const ROUNDS: u32 = 25;
        // clear, 6 args, message, 1 poll, 6 readbacks, status
        const ACCESSES_PER_TRANSACTION: usize = 16;

        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let set = sim.addresses();

        let workers: Vec<_> = [(Mailbox::Mp1, 0x3E, 0xAAAA), (Mailbox::Psmu, 0x59, 0xBBBB)]
            .into_iter()
            .map(|(mailbox, message, payload)| {
                let sim = sim.clone();
                thread::spawn(move || {
                    let mut transport = SmuTransport::for_family(sim, CpuFamily::Raphael, patient_quick());
                    transport.initialize().unwrap();
                    for _ in 0..ROUNDS {
                        let mut args = CommandArguments::with_payload(payload);
                        assert_eq!(transport.send(mailbox, message, &mut args), Status::Ok);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(sim.unlocked_accesses(), 0);
        for command in sim.commands() {
            let payload = if command.mailbox == Mailbox::Mp1 { 0xAAAA } else { 0xBBBB };
            assert_eq!(command.arguments, [payload, 0, 0, 0, 0, 0]);
        }

        let owner = |register: u32| {
            [Mailbox::Mp1, Mailbox::Psmu].into_iter().find(|&m| {
                let regs = set.mailbox(m);
                register == regs.message
                    || register == regs.response
                    || (regs.argument_base..regs.argument_base + 24).contains(&register)
            })
        };

        let accesses = sim.accesses();
        assert_eq!(accesses.len(), 2 * ROUNDS as usize * ACCESSES_PER_TRANSACTION);
        for transaction in accesses.chunks(ACCESSES_PER_TRANSACTION) {
            let mailbox = owner(transaction[0].register()).expect("known register");
            assert_eq!(
                transaction[0],
                RegisterAccess::Write { register: set.mailbox(mailbox).response, value: 0 }
            );
            assert!(transaction.iter().all(|a| owner(a.register()) == Some(mailbox)));
        }
    }

    #[test]
    fn test_apply_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "enabled": true,
                "stapm_limit_enabled": true,
                "stapm_limit": 54,
                "fast_limit_enabled": true,
                "fast_limit": 80,
                "cpu_undervolt_enabled": true,
                "cpu_undervolt": -15,
                "igpu_undervolt_enabled": false,
                "igpu_undervolt": -10
            }}"#
        )
        .unwrap();

        let settings = TuningSettings::from_json_file(file.path()).unwrap();
        assert!(settings.enabled);

        let sim = SimulatedSmu::for_family(CpuFamily::Raphael);
        let controller = SmuController::simulated(raphael(), sim.clone(), patient_quick());
        let report = controller.apply_settings_report(&settings);

        assert!(report.success);
        let sent: Vec<_> = sim
            .commands()
            .iter()
            .map(|c| (c.mailbox, c.message, c.arguments[0]))
            .collect();
        assert_eq!(
            sent,
            vec![
                (Mailbox::Mp1, 0x3E, 54_000),
                (Mailbox::Mp1, 0x40, 80_000),
                (Mailbox::Psmu, 0x07, 0x10_0000 - 15),
            ]
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["family"], "Raphael");
        assert_eq!(json["outcomes"].as_array().map(Vec::len), Some(3));
        assert!(json["applied_at"].is_string());
    }

    #[test]
    fn test_bad_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            TuningSettings::from_json_file(file.path()),
            Err(smuctl::SmuError::Json(_))
        ));
        assert!(matches!(
            TuningSettings::from_json_file("/nonexistent/settings.json"),
            Err(smuctl::SmuError::Io(_))
        ));
    }

    #[test]
    fn test_busy_firmware_reported() {
        let sim = SimulatedSmu::for_family(CpuFamily::Raphael).with_default_response(Status::CmdRejectedBusy);
        let controller = SmuController::simulated(raphael(), sim.clone(), patient_quick());

        let report = controller.restore_defaults_report();
        assert!(!report.success);
        assert_eq!(report.outcomes[0].status, Some(Status::CmdRejectedBusy));
    }
}
