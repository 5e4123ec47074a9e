//! Minimal SMU support check

use std::process;

use smuctl::{CpuFamily, CpuProfile};

fn main() {
    let profile = CpuProfile::detect();

    // One-line output
    println!("{} [{}]", profile.name, profile.codename());

    match profile.family {
        CpuFamily::Unknown => process::exit(1),
        CpuFamily::Unsupported => process::exit(2),
        _ if !profile.is_amd() => process::exit(2),
        _ => process::exit(0),
    }
}
