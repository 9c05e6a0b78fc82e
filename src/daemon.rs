use crate::config::watcher::ConfigWatcher;
use crate::config::{AppConfig, LogLevel, find_config_file};
use crate::core::EngineState;
use crate::cpu::SysfsPlatform;
use crate::display::DisplayWatcher;
use crate::lifecycle::{Command, Controller, run_controller};
use crate::topology::Topology;
use chrono::Local;
use log::{LevelFilter, debug, error, info, warn};
use std::fs::File;
use std::io::Write;
use std::sync::mpsc::{Sender, channel};
use std::thread;
use std::time::Duration;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run the daemon
pub fn run_daemon(config: AppConfig, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    // Set effective log level based on config and verbose flag
    let effective_log_level = if verbose {
        LogLevel::Debug
    } else {
        config.daemon.log_level
    };

    let level_filter = match effective_log_level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warning => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
    };
    log::set_max_level(level_filter);

    info!("Starting hotplugd daemon...");

    let platform = SysfsPlatform::default();
    let topology = Topology::discover(platform.root())?;
    for cluster in topology.clusters() {
        info!(
            "Cluster {} ({:?}): CPUs {:?}, anchor CPU {}, at most {} online",
            cluster.id,
            cluster.kind,
            cluster.cores,
            topology.anchor_of(cluster.id),
            cluster.max_online
        );
    }

    let (tx, rx) = channel();

    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, exiting...");
        let _ = shutdown_tx.send(Command::Shutdown);
    })?;

    spawn_config_watcher(tx.clone());

    match DisplayWatcher::from_config(&config.display) {
        Some(watcher) => {
            info!("Watching display state at {}", watcher.path().display());
            if let Err(e) = watcher.spawn(tx.clone()) {
                warn!("Failed to start display watcher: {e}");
            }
        }
        None => info!("Display tracking disabled, cores follow load only"),
    }
    drop(tx);

    if let Some(stats_path) = &config.daemon.stats_file_path {
        info!("Stats will be written to: {stats_path}");
    }
    info!(
        "Daemon initialized, first tick in {}ms, then every {}ms",
        config.hotplug.startup_delay_ms, config.hotplug.delay_ms
    );

    let controller = Controller::new(Box::new(platform), topology, config);
    let mut last_written: Option<(u64, EngineState, bool)> = None;

    run_controller(controller, &rx, |controller| {
        let Some(stats_path) = &controller.config().daemon.stats_file_path else {
            return;
        };

        let snapshot = (
            controller.engine().stats().generation(),
            controller.state(),
            controller.is_enabled(),
        );
        if last_written == Some(snapshot) {
            return;
        }

        if let Err(e) = write_stats_file(stats_path, controller) {
            error!("Failed to write stats file: {e}");
        }
        last_written = Some(snapshot);
    });

    info!("Daemon stopped");
    Ok(())
}

/// Forward config file changes to the controller as `Reload` commands
fn spawn_config_watcher(tx: Sender<Command>) {
    let Some(path) = find_config_file() else {
        warn!("No config file found to watch for changes.");
        return;
    };

    let mut watcher = match ConfigWatcher::new(&path) {
        Ok(watcher) => {
            info!("Watching config file: {}", watcher.config_path().display());
            watcher
        }
        Err(e) => {
            warn!("Failed to initialize config file watcher: {e}");
            return;
        }
    };

    let spawned = thread::Builder::new()
        .name("config-watcher".to_string())
        .spawn(move || {
            loop {
                if let Some(result) = watcher.check_for_changes() {
                    match result {
                        Ok(new_config) => {
                            info!("Config file changed, updating configuration");
                            if tx.send(Command::Reload(Box::new(new_config))).is_err() {
                                break;
                            }
                        }
                        // Continue with existing config
                        Err(e) => error!("Error loading new configuration: {e}"),
                    }
                }
                thread::sleep(CONFIG_POLL_INTERVAL);
            }
            debug!("Config watcher stopped");
        });

    if let Err(e) = spawned {
        warn!("Failed to start config watcher thread: {e}");
    }
}

/// Write current controller state and per-core hotplug counts
fn write_stats_file(path: &str, controller: &Controller) -> Result<(), std::io::Error> {
    let mut file = File::create(path)?;

    writeln!(file, "timestamp={}", Local::now().to_rfc3339())?;
    writeln!(file, "state={:?}", controller.state())?;
    writeln!(file, "enabled={}", controller.is_enabled())?;
    writeln!(file, "cycle={}", controller.engine().counter().get())?;
    writeln!(file, "tick_armed={}", controller.schedule().is_armed())?;

    let online: Vec<String> = controller
        .online_cores()
        .iter()
        .map(ToString::to_string)
        .collect();
    writeln!(file, "online={}", online.join(","))?;

    let stats = controller.engine().stats();
    for core in controller.topology().cores() {
        writeln!(file, "cpu{core}.times_hotplugged={}", stats.times_hotplugged(core))?;
    }

    Ok(())
}
