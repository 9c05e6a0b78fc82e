use crate::config::DisplayConfig;
use crate::core::DisplayEvent;
use crate::lifecycle::Command;
use crate::util::sysfs::read_sysfs_value;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const BACKLIGHT_ROOT: &str = "/sys/class/backlight";

/// Polls a sysfs attribute that mirrors the panel power state and reports
/// transitions as [`DisplayEvent`]s
pub struct DisplayWatcher {
    path: PathBuf,
    off_values: Vec<String>,
    interval: Duration,
    last: Option<DisplayEvent>,
}

impl DisplayWatcher {
    /// `None` when display tracking is disabled or no backlight device exists
    pub fn from_config(config: &DisplayConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let path = match &config.path {
            Some(path) => PathBuf::from(path),
            None => find_backlight_power(Path::new(BACKLIGHT_ROOT))?,
        };

        Some(Self::new(
            path,
            config.off_values.clone(),
            Duration::from_millis(config.poll_interval_ms),
        ))
    }

    pub fn new(path: PathBuf, off_values: Vec<String>, interval: Duration) -> Self {
        Self {
            path,
            off_values,
            interval,
            last: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current state and return it if it changed since the last poll.
    ///
    /// The first successful read only reports `Off`: the controller starts out
    /// active, so an initial `On` carries no information.
    pub fn poll(&mut self) -> Option<DisplayEvent> {
        let value = match read_sysfs_value(&self.path) {
            Ok(value) => value,
            Err(e) => {
                debug!("Could not read display state: {e}");
                return None;
            }
        };

        let state = classify(&value, &self.off_values);
        let previous = self.last.replace(state);
        match previous {
            Some(previous) if previous == state => None,
            None if state == DisplayEvent::On => None,
            _ => Some(state),
        }
    }

    /// Poll on a background thread until the receiving side goes away
    pub fn spawn(mut self, tx: Sender<Command>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("display-watcher".to_string())
            .spawn(move || {
                loop {
                    if let Some(event) = self.poll() {
                        debug!("Display turned {event:?}");
                        if tx.send(Command::Display(event)).is_err() {
                            break;
                        }
                    }
                    thread::sleep(self.interval);
                }
            })
    }
}

pub fn classify(value: &str, off_values: &[String]) -> DisplayEvent {
    if off_values.iter().any(|off| off.trim() == value.trim()) {
        DisplayEvent::Off
    } else {
        DisplayEvent::On
    }
}

fn find_backlight_power(root: &Path) -> Option<PathBuf> {
    let mut devices: Vec<PathBuf> = match fs::read_dir(root) {
        Ok(entries) => entries.flatten().map(|entry| entry.path()).collect(),
        Err(e) => {
            warn!("Cannot read {}: {e}", root.display());
            return None;
        }
    };
    devices.sort();

    let found = devices
        .into_iter()
        .map(|device| device.join("bl_power"))
        .find(|path| path.exists());
    if found.is_none() {
        warn!("No backlight device found, display events are disabled");
    }
    found
}
