mod cli;
mod config;
mod core;
mod cpu;
mod daemon;
mod display;
mod engine;
mod lifecycle;
mod monitor;
mod topology;
mod util;

use crate::config::AppConfig;
use crate::cpu::SysfsPlatform;
use crate::topology::Topology;
use crate::util::error::ControlError;
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Display topology, core states and thresholds
    Info,
    /// Run as a daemon in the background
    Daemon {
        #[clap(long)]
        verbose: bool,
    },
    /// Bring a core online
    Online { core_id: u32 },
    /// Take a core offline
    Offline { core_id: u32 },
    /// Print the effective configuration
    Config,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {e}. Using default values.");
            AppConfig::default()
        }
    };

    let command_result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Some(Commands::Info) => cli::info::print_info(&config),
        Some(Commands::Daemon { verbose }) => daemon::run_daemon(config, verbose),
        Some(Commands::Online { core_id }) => set_core(core_id, true),
        Some(Commands::Offline { core_id }) => set_core(core_id, false),
        Some(Commands::Config) => toml::to_string_pretty(&config)
            .map(|rendered| println!("{rendered}"))
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
        None => {
            println!("Welcome to hotplugd! Use --help for commands.");
            println!("Current effective configuration: {config:?}");
            Ok(())
        }
    };

    if let Err(e) = command_result {
        eprintln!("Error executing command: {e}");
        if let Some(source) = e.source() {
            eprintln!("Caused by: {source}");
        }
        if let Some(control_error) = e.downcast_ref::<ControlError>() {
            if matches!(control_error, ControlError::PermissionDenied(_)) {
                eprintln!(
                    "Hint: This operation may require administrator privileges (e.g., run with sudo)."
                );
            }
        }

        std::process::exit(1);
    }
}

fn set_core(core_id: u32, online: bool) -> Result<(), Box<dyn std::error::Error>> {
    let platform = SysfsPlatform::default();
    let topology = Topology::discover(platform.root())?;
    cpu::set_core_state(&platform, &topology, core_id, online)?;
    Ok(())
}
