use log::{error, warn};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread;
use std::time::{Duration, Instant};

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
    pub fn new(config_path: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        watcher.watch(config_path, RecursiveMode::NonRecursive)?;

        Ok(Self {
            rx,
            _watcher: watcher,
            config_path: config_path.to_path_buf(),
            last_event_time: Instant::now(),
        })
    }

    /// Check for config file changes and reload if necessary
    ///
    /// # Returns
    ///
    /// `Some(Ok(AppConfig))` if the config was reloaded, `Some(Err(_))` if the
    /// file changed but no longer parses, `None` otherwise
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

        // Editors often write in several steps
        let debounce_time = Duration::from_millis(250);
        let time_since_last_event = self.last_event_time.elapsed();
        if time_since_last_event < debounce_time {
            thread::sleep(debounce_time - time_since_last_event);
        }

        Some(load_config_from_path(&self.config_path))
    }

    /// Get the path of the config file being watched
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
