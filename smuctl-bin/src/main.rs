//! Command-line interface for smuctl

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;

use smuctl::api::{driver_info, ApplyReport, SmuConfig};
use smuctl::mappings::{addresses, supported_tunables};
use smuctl::{CpuProfile, DriverConfig, SimulatedSmu, SmuController, TransportConfig, Tunable, TuningSettings};

#[derive(Parser)]
#[command(name = "smuctl")]
#[command(version = smuctl::VERSION)]
#[command(about = "AMD SMU power, thermal and curve optimizer tuning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output verbosity
    #[arg(short, long, value_enum, default_value_t = Verbosity::Normal, global = true)]
    verbosity: Verbosity,

    /// Driver module to load instead of searching for the default one
    #[arg(long, env = "SMUCTL_DRIVER", global = true)]
    driver: Option<PathBuf>,

    /// Send commands to a simulated SMU instead of hardware
    #[arg(long, global = true)]
    dry_run: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected CPU and what can be tuned on it
    Info,

    /// Load the driver module and report its status
    Driver,

    /// Show the mailbox registers used for the detected CPU
    Addresses,

    /// Apply a single setpoint
    Set {
        /// What to change
        #[arg(value_enum)]
        tunable: TunableArg,

        /// Watts, °C, or curve optimizer steps
        #[arg(allow_hyphen_values = true)]
        value: i32,
    },

    /// Apply every enabled setpoint from a JSON settings file
    Apply {
        /// Settings file
        #[arg(short, long)]
        settings: PathBuf,
    },

    /// Push stock power, thermal and offset values back to the SMU
    Restore,

    /// Show version information
    Version,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Minimal,
    Normal,
    Detailed,
    Debug,
}

impl Verbosity {
    fn level(self) -> log::LevelFilter {
        match self {
            Verbosity::Minimal => log::LevelFilter::Warn,
            Verbosity::Normal => log::LevelFilter::Info,
            Verbosity::Detailed => log::LevelFilter::Debug,
            Verbosity::Debug => log::LevelFilter::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TunableArg {
    /// Sustained power limit (W)
    Stapm,
    /// Slow PPT limit (W)
    Slow,
    /// Fast PPT limit (W)
    Fast,
    /// TCTL temperature limit (°C)
    Tctl,
    /// All-core curve optimizer offset
    CpuCo,
    /// iGPU curve optimizer offset
    IgpuCo,
}

impl From<TunableArg> for Tunable {
    fn from(arg: TunableArg) -> Self {
        match arg {
            TunableArg::Stapm => Tunable::StapmLimit,
            TunableArg::Slow => Tunable::SlowLimit,
            TunableArg::Fast => Tunable::FastLimit,
            TunableArg::Tctl => Tunable::TctlTemp,
            TunableArg::CpuCo => Tunable::AllCoreCurveOptimizer,
            TunableArg::IgpuCo => Tunable::IgpuCurveOptimizer,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbosity.level())
        .parse_default_env()
        .init();

    let driver = match &cli.driver {
        Some(path) => DriverConfig::with_path(path),
        None => DriverConfig::default(),
    };

    match &cli.command {
        Commands::Info => {
            let profile = CpuProfile::detect();
            print_info(&profile, cli.format)?;
        }

        Commands::Driver => {
            let info = driver_info(&driver);
            match cli.format {
                OutputFormat::Text => {
                    println!("State: {:?}", info.state);
                    if let Some(path) = &info.path {
                        println!("Module: {}", path.display());
                    }
                    if let Some(status) = info.dll_status {
                        println!("Status: {:?}", status);
                    }
                    if let Some(version) = info.dll_version {
                        println!("Module version: {}", version);
                    }
                    if let Some(version) = info.driver_version {
                        println!("Driver version: {}", version);
                    }
                    if let Some(kind) = info.driver_type {
                        println!("Driver type: {:?}", kind);
                    }
                    if let Some(error) = &info.last_error {
                        println!("Last error: {}", error);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            }
        }

        Commands::Addresses => {
            let profile = CpuProfile::detect();
            let set = addresses::configure(profile.family);
            match cli.format {
                OutputFormat::Text => {
                    println!("{} [{}]", profile.name, profile.codename());
                    print!("{}", set);
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&set)?),
            }
        }

        Commands::Set { tunable, value } => {
            let (controller, sim) = controller(&cli, driver);
            let tunable = Tunable::from(*tunable);
            let ok = controller.set(tunable, *value);
            report_simulated(sim.as_ref());
            if !ok {
                bail!("{} = {} was not applied", tunable, value);
            }
            println!("{} = {} applied", tunable, value);
        }

        Commands::Apply { settings } => {
            let settings = TuningSettings::from_json_file(settings)
                .with_context(|| format!("reading {}", settings.display()))?;
            if !settings.enabled {
                log::warn!("Settings file has enabled=false; applying anyway");
            }
            let (controller, sim) = controller(&cli, driver);
            let report = controller.apply_settings_report(&settings);
            print_report(&report, cli.format)?;
            report_simulated(sim.as_ref());
            if !report.success {
                bail!("not all settings were applied");
            }
        }

        Commands::Restore => {
            let (controller, sim) = controller(&cli, driver);
            let report = controller.restore_defaults_report();
            print_report(&report, cli.format)?;
            report_simulated(sim.as_ref());
            if !report.success {
                bail!("defaults were not fully restored");
            }
        }

        Commands::Version => {
            println!("smuctl v{}", smuctl::version());
            println!("AMD SMU mailbox control");
        }
    }

    Ok(())
}

fn controller(cli: &Cli, driver: DriverConfig) -> (SmuController, Option<SimulatedSmu>) {
    let profile = CpuProfile::detect();
    if cli.dry_run {
        let sim = SimulatedSmu::for_family(profile.family);
        let controller = SmuController::simulated(profile, sim.clone(), TransportConfig::quick());
        (controller, Some(sim))
    } else {
        let config = SmuConfig {
            driver,
            transport: TransportConfig::default(),
        };
        (SmuController::new(profile, config), None)
    }
}

fn print_info(profile: &CpuProfile, format: OutputFormat) -> anyhow::Result<()> {
    let tunables = supported_tunables(profile.family);
    match format {
        OutputFormat::Text => {
            println!("CPU Information:");
            println!("================");
            println!("Name: {}", profile.name);
            println!("Caption: {}", profile.caption);
            println!("Family: {:?} ({})", profile.family, profile.codename());
            println!("Supported: {}", profile.is_amd() && profile.is_supported());
            println!("CPU undervolt: {}", profile.supports_undervolting());
            println!("iGPU undervolt: {}", profile.supports_igpu_undervolting());
            println!(
                "Temperature limit: {}..={} °C",
                profile.temp_limit_range().start(),
                profile.temp_limit_range().end()
            );
            let names: Vec<String> = tunables.iter().map(|t| t.to_string()).collect();
            println!("Tunables: {}", names.join(", "));
        }
        OutputFormat::Json => {
            let info = json!({
                "profile": profile,
                "codename": profile.codename(),
                "supported": profile.is_amd() && profile.is_supported(),
                "supports_undervolting": profile.supports_undervolting(),
                "supports_igpu_undervolting": profile.supports_igpu_undervolting(),
                "tunables": tunables,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }
    Ok(())
}

fn print_report(report: &ApplyReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{} [{}]{}", report.cpu, report.family, if report.dry_run { " (dry run)" } else { "" });
            for outcome in &report.outcomes {
                let result = match (&outcome.status, &outcome.error) {
                    (_, Some(error)) => error.clone(),
                    (Some(status), None) => status.to_string(),
                    (None, None) => "not supported".to_string(),
                };
                println!("  {:<26} {:>6}  {}", outcome.tunable.to_string(), outcome.value, result);
            }
            println!("Success: {}", report.success);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn report_simulated(sim: Option<&SimulatedSmu>) {
    let Some(sim) = sim else {
        return;
    };
    for command in sim.commands() {
        log::info!(
            "[dry run] {} msg=0x{:02X} arg0=0x{:X} -> {}",
            command.mailbox,
            command.message,
            command.arguments[0],
            command.response
        );
    }
}
