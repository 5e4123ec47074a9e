//! Processor description query

use std::fs;

use crate::error::Result;

const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Raw processor text as reported by the OS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorDescription {
    /// Marketing name
    pub name: String,
    /// `"<arch> Family F Model M Stepping S"`
    pub caption: String,
}

/// Read the description of the first processor
pub fn read_processor_description() -> Result<ProcessorDescription> {
    let contents = fs::read_to_string(CPUINFO_PATH)?;
    Ok(parse_cpuinfo(&contents))
}

/// Parse the first processor block of a `/proc/cpuinfo` dump
///
/// Fields that are missing leave the caption empty, which classifies as
/// `Unknown`.
pub fn parse_cpuinfo(contents: &str) -> ProcessorDescription {
    let mut vendor = None;
    let mut name = None;
    let mut family = None;
    let mut model = None;
    let mut stepping = None;

    for line in contents.lines() {
        // Only the first processor is needed
        if line.trim().is_empty() && name.is_some() {
            break;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "vendor_id" => vendor = Some(value),
            "model name" => name = Some(value),
            "cpu family" => family = value.parse::<u32>().ok(),
            "model" => model = value.parse::<u32>().ok(),
            "stepping" => stepping = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let caption = match (family, model) {
        (Some(family), Some(model)) => {
            let arch = match vendor {
                Some("AuthenticAMD") => "AMD64",
                Some("GenuineIntel") => "Intel64",
                _ => "x86",
            };
            format!(
                "{} Family {} Model {} Stepping {}",
                arch,
                family,
                model,
                stepping.unwrap_or(0)
            )
        }
        _ => String::new(),
    };

    ProcessorDescription {
        name: name.unwrap_or_default().to_string(),
        caption,
    }
}
