// Configuration types and structures for hotplugd
use serde::{Deserialize, Serialize};

/// Tunables that are shared by every cluster
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct HotplugConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between decision ticks
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Delay before the first tick after the daemon starts
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Floor on the number of online cores across all clusters
    #[serde(default = "default_min_cpus")]
    pub min_cpus: u32,
    /// Ceiling on the number of online cores across all clusters. `None` means every core.
    #[serde(default)]
    pub max_cpus: Option<u32>,
    /// Consecutive ticks required before a cluster may grow
    #[serde(default = "default_cycle_up")]
    pub cycle_up: u32,
    /// Consecutive ticks required before a cluster may shrink, before the per-cluster multiplier
    #[serde(default = "default_cycle_down")]
    pub cycle_down: u32,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            delay_ms: default_delay_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            min_cpus: default_min_cpus(),
            max_cpus: None,
            cycle_up: default_cycle_up(),
            cycle_down: default_cycle_down(),
        }
    }
}

/// Resolved tunables for one cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterTunables {
    pub min_cpus: u32,
    /// Percentage of the cluster's maximum frequency the slowest core must exceed to grow
    pub cpufreq_up: u32,
    /// Percentage of the cluster's maximum frequency the fastest core must stay below to shrink
    pub cpufreq_down: u32,
    pub cycle_down_multiplier: u32,
}

impl ClusterTunables {
    pub const fn efficiency() -> Self {
        Self {
            min_cpus: 1,
            cpufreq_up: 60,
            cpufreq_down: 30,
            cycle_down_multiplier: 1,
        }
    }

    pub const fn performance() -> Self {
        Self {
            min_cpus: 0,
            cpufreq_up: 90,
            cpufreq_down: 60,
            cycle_down_multiplier: 3, // losing a big core is expensive, wait longer
        }
    }
}

/// One `[[cluster]]` entry. Entries are matched to clusters by position,
/// slowest cluster first, and unset fields keep the built-in value for that
/// position.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpufreq_up: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpufreq_down: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_down_multiplier: Option<u32>,
}

impl ClusterEntry {
    pub fn resolve(&self, base: ClusterTunables) -> ClusterTunables {
        ClusterTunables {
            min_cpus: self.min_cpus.unwrap_or(base.min_cpus),
            cpufreq_up: self.cpufreq_up.unwrap_or(base.cpufreq_up),
            cpufreq_down: self.cpufreq_down.unwrap_or(base.cpufreq_down),
            cycle_down_multiplier: self
                .cycle_down_multiplier
                .unwrap_or(base.cycle_down_multiplier),
        }
    }
}

impl From<ClusterTunables> for ClusterEntry {
    fn from(tunables: ClusterTunables) -> Self {
        Self {
            min_cpus: Some(tunables.min_cpus),
            cpufreq_up: Some(tunables.cpufreq_up),
            cpufreq_down: Some(tunables.cpufreq_down),
            cycle_down_multiplier: Some(tunables.cycle_down_multiplier),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DisplayConfig {
    #[serde(default = "default_display_enabled")]
    pub enabled: bool,
    /// File whose contents reflect the panel power state. Detected from
    /// `/sys/class/backlight` when unset.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_display_poll_ms")]
    pub poll_interval_ms: u64,
    /// Values of `path` that mean the display is off
    #[serde(default = "default_display_off_values")]
    pub off_values: Vec<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: default_display_enabled(),
            path: None,
            poll_interval_ms: default_display_poll_ms(),
            off_values: default_display_off_values(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub stats_file_path: Option<String>,
    /// Bring every core back online when the daemon exits
    #[serde(default = "default_restore_on_exit")]
    pub restore_on_exit: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stats_file_path: None,
            restore_on_exit: default_restore_on_exit(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub hotplug: HotplugConfig,
    #[serde(default = "default_clusters", rename = "cluster")]
    pub clusters: Vec<ClusterEntry>,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hotplug: HotplugConfig::default(),
            clusters: default_clusters(),
            display: DisplayConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl AppConfig {
    /// Tunables for the cluster at `index`, on top of the built-in efficiency
    /// (index 0) or performance defaults.
    pub fn tunables(&self, index: usize) -> ClusterTunables {
        let base = if index == 0 {
            ClusterTunables::efficiency()
        } else {
            ClusterTunables::performance()
        };
        self.clusters
            .get(index)
            .map_or(base, |entry| entry.resolve(base))
    }
}

// Error type for config loading
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(toml::de::Error),
    NotFound(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::TomlError(err)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "I/O error: {e}"),
            Self::TomlError(e) => write!(f, "TOML parsing error: {e}"),
            Self::NotFound(path) => write!(f, "Configuration file not found: {path}"),
        }
    }
}

impl std::error::Error for ConfigError {}

const fn default_enabled() -> bool {
    true
}

const fn default_delay_ms() -> u64 {
    20
}

const fn default_startup_delay_ms() -> u64 {
    20_000
}

const fn default_min_cpus() -> u32 {
    1
}

const fn default_cycle_up() -> u32 {
    1
}

const fn default_cycle_down() -> u32 {
    1
}

fn default_clusters() -> Vec<ClusterEntry> {
    vec![
        ClusterTunables::efficiency().into(),
        ClusterTunables::performance().into(),
    ]
}

const fn default_display_enabled() -> bool {
    true
}

const fn default_display_poll_ms() -> u64 {
    500
}

fn default_display_off_values() -> Vec<String> {
    // bl_power uses FB_BLANK_* values: 1 is normal blank, 4 is powerdown
    vec!["1".to_string(), "4".to_string()]
}

const fn default_log_level() -> LogLevel {
    LogLevel::Info
}

const fn default_restore_on_exit() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.hotplug.delay_ms, 20);
        assert_eq!(config.hotplug.startup_delay_ms, 20_000);
        assert_eq!(config.clusters.len(), 2);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [hotplug]
            cycle_down = 4
            max_cpus = 6

            [[cluster]]
            min_cpus = 2
            cpufreq_up = 70
            cpufreq_down = 20

            [daemon]
            log_level = "Debug"
            "#,
        )
        .unwrap();

        assert!(config.hotplug.enabled);
        assert_eq!(config.hotplug.cycle_down, 4);
        assert_eq!(config.hotplug.max_cpus, Some(6));
        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.tunables(0).cycle_down_multiplier, 1);
        assert_eq!(config.daemon.log_level, LogLevel::Debug);
    }

    #[test]
    fn missing_cluster_entries_fall_back_by_position() {
        let config = AppConfig {
            clusters: vec![ClusterEntry {
                min_cpus: Some(2),
                cpufreq_up: Some(50),
                cpufreq_down: Some(25),
                cycle_down_multiplier: Some(1),
            }],
            ..AppConfig::default()
        };

        assert_eq!(config.tunables(0).min_cpus, 2);
        assert_eq!(config.tunables(1), ClusterTunables::performance());
        assert_eq!(config.tunables(5), ClusterTunables::performance());
        assert_eq!(
            AppConfig {
                clusters: Vec::new(),
                ..AppConfig::default()
            }
            .tunables(0),
            ClusterTunables::efficiency()
        );
    }

    #[test]
    fn cluster_entry_with_single_field_keeps_position_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [[cluster]]
            cpufreq_up = 70

            [[cluster]]
            cycle_down_multiplier = 5
            "#,
        )
        .unwrap();

        assert_eq!(
            config.tunables(0),
            ClusterTunables {
                cpufreq_up: 70,
                ..ClusterTunables::efficiency()
            }
        );
        assert_eq!(
            config.tunables(1),
            ClusterTunables {
                cycle_down_multiplier: 5,
                ..ClusterTunables::performance()
            }
        );
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn out_of_range_percentages_are_accepted() {
        let config: AppConfig = toml::from_str(
            r#"
            [[cluster]]
            min_cpus = 0
            cpufreq_up = 250
            cpufreq_down = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.tunables(0).cpufreq_up, 250);
    }
}
