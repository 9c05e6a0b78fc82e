use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, warn};

use crate::config::{AppConfig, ConfigError, load_config_from_path};

/// Watches a configuration file for changes and reloads it when modified
pub struct ConfigWatcher {
    rx: Receiver<Result<Event, notify::Error>>,
    _watcher: RecommendedWatcher, // keep watcher alive while watching
    config_path: PathBuf,
    last_event_time: Instant,
}

impl ConfigWatcher {
    /// Initialize a new config watcher for the given path
    pub fn new(config_path: impl AsRef<Path>) -> Result<Self, notify::Error> {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        watcher.watch(config_path.as_ref(), RecursiveMode::NonRecursive)?;

        Ok(Self {
            rx,
            _watcher: watcher,
            config_path: config_path.as_ref().to_path_buf(),
            last_event_time: Instant::now(),
        })
    }

    /// Check for config file changes and reload if necessary
    ///
    /// # Returns
    ///
    /// `Some(..)` with the reload result if the file changed, `None` otherwise
    pub fn check_for_changes(&mut self) -> Option<Result<AppConfig, ConfigError>> {
        let mut should_reload = false;

        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        should_reload = true;
                        self.last_event_time = Instant::now();
                    }
                }
                Ok(Err(e)) => {
                    warn!("Error watching config file: {e}");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    error!("Config watcher channel disconnected");
                    return None;
                }
            }
        }

        if !should_reload {
            return None;
        }

        // Editors tend to write a file several times in a row
        let debounce_time = Duration::from_millis(250);
        let time_since_last_event = self.last_event_time.elapsed();
        if time_since_last_event < debounce_time {
            thread::sleep(debounce_time - time_since_last_event);
        }

        Some(load_config_from_path(&self.config_path))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn quiet_file_reports_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "").unwrap();

        let mut watcher = ConfigWatcher::new(&path).unwrap();
        assert_eq!(watcher.config_path(), path.as_path());
        assert!(watcher.check_for_changes().is_none());
    }
}
