use crate::config::AppConfig;
use crate::core::{CoreId, SystemReport};
use crate::cpu::SysfsPlatform;
use crate::monitor;
use crate::topology::Topology;
use chrono::{DateTime, Local};
use std::error::Error;

fn format_khz(khz: Option<u32>) -> String {
    khz.map_or_else(|| "N/A".to_string(), |f| format!("{} MHz", f / 1000))
}

/// Prints the discovered topology, per-core state and the active thresholds
pub fn print_info(config: &AppConfig) -> Result<(), Box<dyn Error>> {
    let platform = SysfsPlatform::default();
    let topology = Topology::discover(platform.root())?;
    let report = monitor::collect_system_report(&platform, &topology, config);
    let writable: Vec<CoreId> = topology
        .cores()
        .filter(|&core| platform.is_hotpluggable(core))
        .collect();

    print_report(&report, config, &writable);
    Ok(())
}

fn format_core_list(cores: &[CoreId]) -> String {
    if cores.is_empty() {
        return "none".to_string();
    }
    cores
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_report(report: &SystemReport, config: &AppConfig, writable: &[CoreId]) {
    let timestamp: DateTime<Local> = report.timestamp.into();

    println!("=== HOTPLUGD INFORMATION ===");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Timestamp: {}", timestamp.format("%Y-%m-%d %H:%M:%S"));

    println!("\n--- HOTPLUG SETTINGS ---");
    println!("Enabled: {}", config.hotplug.enabled);
    println!("Tick Interval: {} ms", config.hotplug.delay_ms);
    println!("Startup Delay: {} ms", config.hotplug.startup_delay_ms);
    println!("Global Minimum Online: {}", config.hotplug.min_cpus);
    println!(
        "Global Maximum Online: {}",
        config
            .hotplug
            .max_cpus
            .map_or_else(|| "all".to_string(), |m| m.to_string())
    );

    println!("\n--- HOTPLUG CONTROL ---");
    println!("Writable CPUs: {}", format_core_list(writable));
    if writable.is_empty() {
        println!("Hint: cpuN/online is only writable by root.");
    }

    println!("\n--- CLUSTERS ---");
    for cluster in &report.clusters {
        println!("Cluster {} ({:?}):", cluster.id, cluster.kind);
        println!("  Cores: {:?}", cluster.cores);
        println!("  Anchor: CPU {}", cluster.anchor);
        println!(
            "  Online: {} of at most {}",
            cluster.online_count, cluster.max_cores_online
        );
        println!("  Max Frequency: {}", format_khz(cluster.max_frequency_khz));
        println!("  Grow Above: {}", format_khz(cluster.up_rate_khz));
        println!("  Shrink Below: {}", format_khz(cluster.down_rate_khz));
    }

    println!("\n--- CPU CORES DETAIL ---");
    println!("Total CPU Cores: {}", report.cores.len());
    for core in &report.cores {
        let mut flags = Vec::new();
        if core.online {
            flags.push("online");
        } else {
            flags.push("offline");
        }
        if core.protected {
            flags.push("protected");
        }

        println!(
            "CPU {} [cluster {}, {}]: {} / {}",
            core.core_id,
            core.cluster,
            flags.join(", "),
            format_khz(core.current_frequency_khz),
            format_khz(core.max_frequency_khz)
        );
    }
}
