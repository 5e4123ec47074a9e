//! Processor identification
//!
//! Classifies the host CPU into one of the AMD microarchitecture families the
//! SMU tables know about. Detection happens once; the resulting
//! [`CpuProfile`] is immutable and handed to everything that needs it.

mod detect;

pub use detect::{parse_cpuinfo, read_processor_description, ProcessorDescription};

use serde::{Deserialize, Serialize};

/// Minimum curve optimizer offset for the CPU cores
pub const MIN_CPU_UNDERVOLT: i32 = -40;
/// Maximum curve optimizer offset for the CPU cores
pub const MAX_CPU_UNDERVOLT: i32 = 0;
/// Minimum curve optimizer offset for the integrated GPU
pub const MIN_IGPU_UNDERVOLT: i32 = -30;
/// Maximum curve optimizer offset for the integrated GPU
pub const MAX_IGPU_UNDERVOLT: i32 = 0;
/// Lowest accepted TCTL limit in °C
pub const MIN_TEMP_LIMIT: u32 = 75;
/// Highest accepted TCTL limit in °C
pub const MAX_TEMP_LIMIT: u32 = 98;
/// Stock TCTL limit in °C
pub const DEFAULT_TEMP_LIMIT: u32 = 96;

/// AMD Ryzen microarchitecture families with distinct SMU geography or commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuFamily {
    /// Processor description could not be obtained
    Unknown,
    /// Processor described, but not a known SMU family
    Unsupported,
    /// Zen1/Zen+ desktop
    Zen1Desktop,
    /// Raven Ridge
    Raven,
    /// Picasso
    Picasso,
    /// Dali
    Dali,
    /// Renoir/Lucienne
    Renoir,
    /// Matisse (desktop)
    Matisse,
    /// Van Gogh
    VanGogh,
    /// Vermeer (desktop)
    Vermeer,
    /// Cezanne/Barcelo
    Cezanne,
    /// Rembrandt
    Rembrandt,
    /// Phoenix
    Phoenix,
    /// Raphael/Dragon Range
    Raphael,
    /// Mendocino
    Mendocino,
    /// Hawk Point
    HawkPoint,
    /// Strix Point
    StrixPoint,
    /// Strix Halo
    StrixHalo,
    /// Fire Range
    FireRange,
}

impl CpuFamily {
    /// Every family, including `Unknown` and `Unsupported`
    pub const ALL: [CpuFamily; 19] = [
        CpuFamily::Unknown,
        CpuFamily::Unsupported,
        CpuFamily::Zen1Desktop,
        CpuFamily::Raven,
        CpuFamily::Picasso,
        CpuFamily::Dali,
        CpuFamily::Renoir,
        CpuFamily::Matisse,
        CpuFamily::VanGogh,
        CpuFamily::Vermeer,
        CpuFamily::Cezanne,
        CpuFamily::Rembrandt,
        CpuFamily::Phoenix,
        CpuFamily::Raphael,
        CpuFamily::Mendocino,
        CpuFamily::HawkPoint,
        CpuFamily::StrixPoint,
        CpuFamily::StrixHalo,
        CpuFamily::FireRange,
    ];

    /// Whether this family has SMU tables
    pub fn is_known(self) -> bool {
        !matches!(self, CpuFamily::Unknown | CpuFamily::Unsupported)
    }

    /// Human-readable codename
    pub fn codename(self) -> &'static str {
        match self {
            CpuFamily::Zen1Desktop => "Zen1/+ Desktop",
            CpuFamily::Raven => "Raven Ridge",
            CpuFamily::Picasso => "Picasso",
            CpuFamily::Dali => "Dali",
            CpuFamily::Renoir => "Renoir/Lucienne",
            CpuFamily::Matisse => "Matisse",
            CpuFamily::VanGogh => "Van Gogh",
            CpuFamily::Vermeer => "Vermeer",
            CpuFamily::Cezanne => "Cezanne/Barcelo",
            CpuFamily::Rembrandt => "Rembrandt",
            CpuFamily::Phoenix => "Phoenix",
            CpuFamily::Raphael => "Raphael/Dragon Range",
            CpuFamily::Mendocino => "Mendocino",
            CpuFamily::HawkPoint => "Hawk Point",
            CpuFamily::StrixPoint => "Strix Point",
            CpuFamily::StrixHalo => "Strix Halo",
            CpuFamily::FireRange => "Fire Range",
            CpuFamily::Unknown | CpuFamily::Unsupported => "Unknown",
        }
    }
}

impl std::fmt::Display for CpuFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.codename())
    }
}

/// One classification predicate
///
/// `cpu_family: None` matches any family number. Rules are evaluated in table
/// order; family-qualified rules sit ahead of bare model rules because model
/// numbers are reused across families.
#[derive(Debug, Clone, Copy)]
pub struct FamilyRule {
    /// Required `Family` number from the caption
    pub cpu_family: Option<u32>,
    /// Accepted `Model` numbers
    pub models: &'static [u32],
    /// Required substring of the CPU name
    pub name_contains: Option<&'static str>,
    /// Family assigned on match
    pub family: CpuFamily,
}

/// `Family` numbers (decimal) that carry an SMU mailbox
pub const SMU_CPU_FAMILIES: [u32; 3] = [23, 25, 26];

/// Ordered classification table
pub const FAMILY_RULES: &[FamilyRule] = &[
    // Family-qualified rules
    FamilyRule { cpu_family: Some(23), models: &[32],      name_contains: None,       family: CpuFamily::Dali },
    FamilyRule { cpu_family: Some(25), models: &[63, 68],  name_contains: None,       family: CpuFamily::Rembrandt },
    FamilyRule { cpu_family: Some(26), models: &[36],      name_contains: None,       family: CpuFamily::StrixPoint },
    FamilyRule { cpu_family: Some(26), models: &[112],     name_contains: None,       family: CpuFamily::StrixHalo },
    FamilyRule { cpu_family: Some(26), models: &[68],      name_contains: Some("HX"), family: CpuFamily::FireRange },
    FamilyRule { cpu_family: Some(23), models: &[113],     name_contains: None,       family: CpuFamily::Matisse },

    // Bare model rules
    FamilyRule { cpu_family: None,     models: &[1, 8],    name_contains: None,       family: CpuFamily::Zen1Desktop },
    FamilyRule { cpu_family: None,     models: &[17],      name_contains: None,       family: CpuFamily::Raven },
    FamilyRule { cpu_family: None,     models: &[24],      name_contains: None,       family: CpuFamily::Picasso },
    FamilyRule { cpu_family: None,     models: &[33],      name_contains: None,       family: CpuFamily::Vermeer },
    FamilyRule { cpu_family: None,     models: &[96, 104], name_contains: None,       family: CpuFamily::Renoir },
    FamilyRule { cpu_family: None,     models: &[144],     name_contains: None,       family: CpuFamily::VanGogh },
    FamilyRule { cpu_family: None,     models: &[80],      name_contains: None,       family: CpuFamily::Cezanne },
    FamilyRule { cpu_family: None,     models: &[116, 120], name_contains: None,       family: CpuFamily::Phoenix },
    FamilyRule { cpu_family: None,     models: &[97],      name_contains: None,       family: CpuFamily::Raphael },
    FamilyRule { cpu_family: None,     models: &[160],     name_contains: None,       family: CpuFamily::Mendocino },
    FamilyRule { cpu_family: None,     models: &[117],     name_contains: None,       family: CpuFamily::HawkPoint },
];

impl FamilyRule {
    fn matches(&self, cpu_family: Option<u32>, model: Option<u32>, name: &str) -> bool {
        if let Some(required) = self.cpu_family {
            if cpu_family != Some(required) {
                return false;
            }
        }

        let model_ok = model.map_or(false, |m| self.models.contains(&m));
        let name_ok = self.name_contains.map_or(true, |s| name.contains(s));

        model_ok && name_ok
    }
}

/// Extract the number following `key` in a caption such as
/// `"AMD64 Family 25 Model 97 Stepping 2"`
fn caption_number(caption: &str, key: &str) -> Option<u32> {
    let mut words = caption.split_whitespace();
    while let Some(word) = words.next() {
        if word == key {
            return words.next().and_then(|n| n.parse().ok());
        }
    }
    None
}

/// Classify a processor from its name and caption
pub fn classify(name: &str, caption: &str) -> CpuFamily {
    if caption.trim().is_empty() {
        return CpuFamily::Unknown;
    }

    let cpu_family = caption_number(caption, "Family");
    let model = caption_number(caption, "Model");

    // Family 17h/19h/1Ah only; bare model rules would otherwise match other vendors
    if cpu_family.map_or(false, |f| !SMU_CPU_FAMILIES.contains(&f)) {
        return CpuFamily::Unsupported;
    }

    FAMILY_RULES
        .iter()
        .find(|rule| rule.matches(cpu_family, model, name))
        .map(|rule| rule.family)
        .unwrap_or(CpuFamily::Unsupported)
}

/// Immutable description of the host processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuProfile {
    /// Marketing name, e.g. "AMD Ryzen 9 7945HX with Radeon Graphics"
    pub name: String,
    /// Caption, e.g. "AMD64 Family 25 Model 97 Stepping 2"
    pub caption: String,
    /// Classified family
    pub family: CpuFamily,
}

impl CpuProfile {
    /// Query the OS processor description and classify it
    ///
    /// Reads the description exactly once. A failed read is logged and yields
    /// an `Unknown` profile rather than an error.
    pub fn detect() -> Self {
        let description = match read_processor_description() {
            Ok(description) => description,
            Err(e) => {
                log::warn!("Failed to detect CPU: {}", e);
                ProcessorDescription::default()
            }
        };

        let profile = Self::from_description(description.name, description.caption);
        log::info!(
            "CPU: {} | Model: {} | Family: {:?} ({})",
            profile.name,
            profile.caption,
            profile.family,
            profile.family
        );
        profile
    }

    /// Build a profile from already-obtained name and caption text
    pub fn from_description(name: impl Into<String>, caption: impl Into<String>) -> Self {
        let name = name.into();
        let caption = caption.into();
        let family = classify(&name, &caption);
        Self { name, caption, family }
    }

    /// Human-readable codename of the detected family
    pub fn codename(&self) -> &'static str {
        self.family.codename()
    }

    /// Whether the SMU tables cover this CPU
    pub fn is_supported(&self) -> bool {
        self.family.is_known()
    }

    /// Name looks like an AMD part
    pub fn is_amd(&self) -> bool {
        ["AMD", "Ryzen", "Athlon", "Radeon"]
            .iter()
            .any(|s| self.name.contains(s))
    }

    /// Name looks like an Intel part
    pub fn is_intel(&self) -> bool {
        ["Intel", "Core", "Pentium", "Celeron", "Atom"]
            .iter()
            .any(|s| self.name.contains(s))
    }

    /// SKUs known to accept all-core curve optimizer offsets.
    ///
    /// This is an allow-list of name fragments, not a hardware query.
    pub fn supports_undervolting(&self) -> bool {
        ["RYZEN AI MAX", "Ryzen AI 9", "Ryzen 9", "4900H", "4800H", "4600H"]
            .iter()
            .any(|s| self.name.contains(s))
    }

    /// SKUs known to accept iGPU curve optimizer offsets
    pub fn supports_igpu_undervolting(&self) -> bool {
        ["RYZEN AI MAX", "6900H", "7945H", "7845H"]
            .iter()
            .any(|s| self.name.contains(s))
    }

    /// Accepted CPU curve optimizer range
    pub fn cpu_undervolt_range(&self) -> std::ops::RangeInclusive<i32> {
        MIN_CPU_UNDERVOLT..=MAX_CPU_UNDERVOLT
    }

    /// Accepted iGPU curve optimizer range
    pub fn igpu_undervolt_range(&self) -> std::ops::RangeInclusive<i32> {
        MIN_IGPU_UNDERVOLT..=MAX_IGPU_UNDERVOLT
    }

    /// Accepted TCTL range in °C
    pub fn temp_limit_range(&self) -> std::ops::RangeInclusive<u32> {
        MIN_TEMP_LIMIT..=MAX_TEMP_LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("AMD Ryzen 7 1700", "AMD64 Family 23 Model 1 Stepping 1", CpuFamily::Zen1Desktop)]
    #[case("AMD Ryzen 5 2500U", "AMD64 Family 23 Model 17 Stepping 0", CpuFamily::Raven)]
    #[case("AMD Ryzen 5 3500U", "AMD64 Family 23 Model 24 Stepping 1", CpuFamily::Picasso)]
    #[case("AMD Athlon Silver 3050U", "AMD64 Family 23 Model 32 Stepping 1", CpuFamily::Dali)]
    #[case("AMD Ryzen 7 4800H", "AMD64 Family 23 Model 96 Stepping 1", CpuFamily::Renoir)]
    #[case("AMD Ryzen 7 5700U", "AMD64 Family 23 Model 104 Stepping 1", CpuFamily::Renoir)]
    #[case("AMD Ryzen 9 3900X", "AMD64 Family 23 Model 113 Stepping 0", CpuFamily::Matisse)]
    #[case("AMD Custom APU 0405", "AMD64 Family 23 Model 144 Stepping 2", CpuFamily::VanGogh)]
    #[case("AMD Ryzen 9 5950X", "AMD64 Family 25 Model 33 Stepping 0", CpuFamily::Vermeer)]
    #[case("AMD Ryzen 7 5800H", "AMD64 Family 25 Model 80 Stepping 0", CpuFamily::Cezanne)]
    #[case("AMD Ryzen 9 6900HS", "AMD64 Family 25 Model 68 Stepping 1", CpuFamily::Rembrandt)]
    #[case("AMD Ryzen 7 7840HS", "AMD64 Family 25 Model 116 Stepping 1", CpuFamily::Phoenix)]
    #[case("AMD Ryzen 9 7945HX", "AMD64 Family 25 Model 97 Stepping 2", CpuFamily::Raphael)]
    #[case("AMD Ryzen 5 7520U", "AMD64 Family 23 Model 160 Stepping 0", CpuFamily::Mendocino)]
    #[case("AMD Ryzen 7 8845HS", "AMD64 Family 25 Model 117 Stepping 2", CpuFamily::HawkPoint)]
    #[case("AMD Ryzen AI 9 HX 370", "AMD64 Family 26 Model 36 Stepping 0", CpuFamily::StrixPoint)]
    #[case("AMD RYZEN AI MAX+ 395", "AMD64 Family 26 Model 112 Stepping 0", CpuFamily::StrixHalo)]
    #[case("AMD Ryzen 9 9955HX", "AMD64 Family 26 Model 68 Stepping 0", CpuFamily::FireRange)]
    fn test_classify_known(#[case] name: &str, #[case] caption: &str, #[case] expected: CpuFamily) {
        assert_eq!(classify(name, caption), expected);
    }

    #[test]
    fn test_model_numbers_are_not_prefix_matched() {
        // "Model 17" must not fall into the Model 1 rule
        assert_eq!(classify("", "AMD64 Family 23 Model 17 Stepping 0"), CpuFamily::Raven);
        assert_eq!(classify("", "AMD64 Family 25 Model 116 Stepping 1"), CpuFamily::Phoenix);
    }

    #[test]
    fn test_family_disambiguation() {
        // Family 26 Model 68 is only Fire Range for HX parts
        assert_eq!(
            classify("AMD Ryzen 7 9800", "AMD64 Family 26 Model 68 Stepping 0"),
            CpuFamily::Unsupported
        );
        // Model 32 outside family 23 is not Dali
        assert_eq!(classify("", "AMD64 Family 25 Model 32 Stepping 0"), CpuFamily::Unsupported);
    }

    #[test]
    fn test_unknown_and_unsupported() {
        assert_eq!(classify("", ""), CpuFamily::Unknown);
        assert_eq!(
            classify("Intel(R) Core(TM) i7-12700H", "Intel64 Family 6 Model 154 Stepping 3"),
            CpuFamily::Unsupported
        );
        assert_eq!(classify("Mystery", "garbled caption"), CpuFamily::Unsupported);
        // Model 17 of a non-AMD family must not look like Raven
        assert_eq!(classify("Intel(R) Celeron", "x86 Family 6 Model 17 Stepping 1"), CpuFamily::Unsupported);
    }

    #[test]
    fn test_profile_capabilities() {
        let profile = CpuProfile::from_description(
            "AMD Ryzen 9 7945HX with Radeon Graphics",
            "AMD64 Family 25 Model 97 Stepping 2",
        );
        assert!(profile.is_supported());
        assert!(profile.is_amd());
        assert!(!profile.is_intel());
        assert!(profile.supports_undervolting());
        assert!(profile.supports_igpu_undervolting());
        assert_eq!(profile.codename(), "Raphael/Dragon Range");
        assert_eq!(profile.cpu_undervolt_range(), -40..=0);
        assert_eq!(profile.igpu_undervolt_range(), -30..=0);
        assert_eq!(profile.temp_limit_range(), 75..=98);

        let profile = CpuProfile::from_description(
            "AMD Ryzen 5 7640HS",
            "AMD64 Family 25 Model 116 Stepping 1",
        );
        assert!(profile.is_supported());
        assert!(!profile.supports_undervolting());
        assert!(!profile.supports_igpu_undervolting());
    }

    #[test]
    fn test_is_supported_excludes_sentinels() {
        for family in CpuFamily::ALL {
            let expected = !matches!(family, CpuFamily::Unknown | CpuFamily::Unsupported);
            assert_eq!(family.is_known(), expected, "{:?}", family);
        }
    }
}
