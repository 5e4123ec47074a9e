//! Apply settings against a simulated Raphael SMU and show the traffic

use smuctl::prelude::*;
use smuctl::{SimulatedSmu, TransportConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let profile = CpuProfile::from_description(
        "AMD Ryzen 9 7945HX with Radeon Graphics",
        "AMD64 Family 25 Model 97 Stepping 2",
    );
    let sim = SimulatedSmu::for_family(profile.family);
    let controller = SmuController::simulated(profile, sim.clone(), TransportConfig::quick());

    let settings = TuningSettings::from_json_str(
        r#"{
            "stapm_limit_enabled": true,
            "stapm_limit": 54,
            "cpu_temp_limit_enabled": true,
            "cpu_temp_limit": 90,
            "cpu_undervolt_enabled": true,
            "cpu_undervolt": -20
        }"#,
    )?;

    let report = controller.apply_settings_report(&settings);
    println!("{}", serde_json::to_string_pretty(&report)?);

    for command in sim.commands() {
        println!(
            "{:<4} 0x{:02X} arg0=0x{:06X} -> {}",
            command.mailbox, command.message, command.arguments[0], command.response
        );
    }
    Ok(())
}
