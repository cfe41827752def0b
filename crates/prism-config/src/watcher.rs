//! Effect hot-reload
//!
//! Watches the effects directory for changes and sends reload events through
//! a channel for the host to drain once per frame.

use notify::{
    Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher,
    event::{CreateKind, ModifyKind},
};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use crate::{Config, ConfigError};

/// Events emitted by the effects watcher
#[derive(Debug, Clone)]
pub enum EffectEvent {
    /// An effect file was created or changed
    EffectChanged(PathBuf),
    /// Error occurred while watching
    WatchError(String),
}

/// Watches the effects directory for changes
pub struct EffectWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<EffectEvent>,
}

impl EffectWatcher {
    /// Create a new watcher over the configured effects directory
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let effects_dir = config.effects_dir()?;
        Self::watch_dir(effects_dir)
    }

    /// Create a new watcher over a specific directory
    pub fn watch_dir(effects_dir: PathBuf) -> Result<Self, ConfigError> {
        let (tx, rx) = mpsc::channel();

        // Track last event time per path for debouncing
        let debounce_duration = Duration::from_millis(100);
        let mut last_event: Option<(PathBuf, Instant)> = None;

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        notify::EventKind::Modify(ModifyKind::Data(_))
                            | notify::EventKind::Create(CreateKind::File)
                    );
                    if !relevant {
                        return;
                    }

                    for path in &event.paths {
                        let now = Instant::now();
                        if let Some((last_path, last_time)) = &last_event
                            && last_path == path
                            && now.duration_since(*last_time) < debounce_duration
                        {
                            continue;
                        }
                        last_event = Some((path.clone(), now));

                        log::info!("Effect file changed: {path:?}");
                        let _ = tx.send(EffectEvent::EffectChanged(path.clone()));
                    }
                }
                Err(e) => {
                    log::error!("Watch error: {e:?}");
                }
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(1)),
        )
        .map_err(|e| ConfigError::Watch(e.to_string()))?;

        if effects_dir.exists() {
            watcher
                .watch(&effects_dir, RecursiveMode::Recursive)
                .map_err(|e| ConfigError::Watch(e.to_string()))?;
            log::info!("Watching effects directory: {effects_dir:?}");
        } else {
            log::warn!("Effects directory {effects_dir:?} does not exist, not watching");
        }

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// Drain all pending events without blocking
    pub fn poll(&self) -> Vec<EffectEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_watcher_on_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let watcher = EffectWatcher::watch_dir(missing).unwrap();
        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn test_watcher_reports_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = EffectWatcher::watch_dir(dir.path().to_path_buf()).unwrap();

        let file = dir.path().join("bloom.fx");
        fs::write(&file, "technique Bloom {}").unwrap();

        // File system notification latency varies between platforms; poll for
        // a bounded time rather than asserting immediately.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = false;
        while Instant::now() < deadline {
            if !watcher.poll().is_empty() {
                seen = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(seen, "expected a change event for {file:?}");
    }
}
