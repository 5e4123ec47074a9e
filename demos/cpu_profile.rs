//! Print the detected CPU, its mailbox addresses and supported tunables

use smuctl::mappings::{addresses, supported_tunables};
use smuctl::CpuProfile;

fn main() {
    let profile = CpuProfile::detect();

    println!("CPU: {}", profile.name);
    println!("Caption: {}", profile.caption);
    println!("Family: {:?} ({})", profile.family, profile.codename());
    println!("Supported: {}", profile.is_amd() && profile.is_supported());

    if !profile.is_supported() {
        return;
    }

    print!("{}", addresses::configure(profile.family));
    for tunable in supported_tunables(profile.family) {
        println!("  - {}", tunable);
    }
}
