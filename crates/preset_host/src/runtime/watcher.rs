//! Restart trigger watching
//!
//! One `notify` watcher per inbox feeds a single event loop. Trigger files are
//! debounced, read, and deleted by a collector task in detection order, then
//! handed to the supervisor as [`WatchEvent::Trigger`].
//!
//! When a watch fails (backend error, queue overflow, inbox removed) the inbox
//! goes `Active → Degraded`, event delivery stops, and recovery is attempted
//! on every health tick within a bounded budget. Exhausting the budget marks
//! the inbox `Abandoned` and ends [`TriggerWatcher::run`] with an error.
//! A preset inbox whose preset directory was deleted is dropped instead.

use crate::config::{INIT_TRIGGER_NAME, RESTART_DIR_NAME, TRIGGER_EXTENSION};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Which inbox a trigger was dropped into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbox {
    /// `cfg/restart`, shared by all presets
    Shared,
    /// `presets/<name>/restart`
    Preset(String),
}

impl fmt::Display for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inbox::Shared => write!(f, "shared inbox"),
            Inbox::Preset(name) => write!(f, "inbox of preset '{}'", name),
        }
    }
}

/// A consumed trigger file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub source: PathBuf,
    pub inbox: Inbox,
    /// Trimmed file body
    pub content: String,
}

impl Trigger {
    /// Requested preset: the file body, else the owning preset of the inbox
    pub fn request(&self) -> Option<String> {
        let content = self.content.trim();
        if !content.is_empty() {
            return Some(content.to_string());
        }
        match &self.inbox {
            Inbox::Preset(name) => Some(name.clone()),
            Inbox::Shared => None,
        }
    }
}

/// Health of a single inbox watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Active,
    Degraded,
    Abandoned,
}

/// Output of the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Trigger(Trigger),
    /// The startup sentinel came through, the watch is live
    Live,
    StateChanged { path: PathBuf, state: WatchState },
    /// The preset owning this inbox was deleted, the inbox is no longer watched
    Removed { path: PathBuf },
}

/// Watcher timings and recovery budget
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Delay between detection and reading a trigger, lets writers finish
    pub debounce: Duration,
    /// Recovery attempts before an inbox is abandoned
    pub max_recovery_attempts: u32,
    /// Wait between attempts while the inbox directory is missing
    pub missing_backoff: Duration,
    /// Wait after a failed attempt to recreate the watch
    pub error_backoff: Duration,
    /// How often inbox health is checked
    pub health_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_recovery_attempts: 120,
            missing_backoff: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
            health_interval: Duration::from_secs(1),
        }
    }
}

/// `<inbox>/<anything>.asrestart` where the inbox directory is named `restart`
pub fn is_trigger_path(path: &Path) -> bool {
    let is_trigger_file = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(TRIGGER_EXTENSION));
    let in_inbox = path
        .parent()
        .and_then(Path::file_name)
        .is_some_and(|name| name.eq_ignore_ascii_case(RESTART_DIR_NAME));
    is_trigger_file && in_inbox
}

fn is_init_sentinel(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.eq_ignore_ascii_case(INIT_TRIGGER_NAME))
}

/// One watched inbox
struct WatchDescriptor {
    path: PathBuf,
    inbox: Inbox,
    state: WatchState,
    failures: u32,
    retry_at: Option<Instant>,
    waiting_for_dir: bool,
    /// Tag of the live backend watch, 0 when none; stale events carry an old tag
    generation: u64,
    watcher: Option<RecommendedWatcher>,
}

impl WatchDescriptor {
    fn new(path: PathBuf, inbox: Inbox) -> Self {
        Self {
            path,
            inbox,
            state: WatchState::Active,
            failures: 0,
            retry_at: None,
            waiting_for_dir: false,
            generation: 0,
            watcher: None,
        }
    }

    /// A preset inbox whose preset directory is gone
    fn preset_removed(&self) -> bool {
        matches!(self.inbox, Inbox::Preset(_))
            && self.path.parent().is_some_and(|preset| !preset.is_dir())
    }
}

struct RawEvent {
    generation: u64,
    result: notify::Result<Event>,
}

struct Detected {
    path: PathBuf,
    inbox: Inbox,
    at: Instant,
}

/// Watches restart inboxes and emits consumed triggers
pub struct TriggerWatcher {
    descriptors: Vec<WatchDescriptor>,
    config: WatchConfig,
    next_generation: u64,
    added_tx: mpsc::UnboundedSender<(PathBuf, Inbox)>,
    added_rx: Option<mpsc::UnboundedReceiver<(PathBuf, Inbox)>>,
}

impl TriggerWatcher {
    pub fn new(config: WatchConfig) -> Self {
        let (added_tx, added_rx) = mpsc::unbounded_channel();
        Self {
            descriptors: Vec::new(),
            config,
            next_generation: 0,
            added_tx,
            added_rx: Some(added_rx),
        }
    }

    pub fn add_inbox(&mut self, path: impl Into<PathBuf>, inbox: Inbox) {
        self.descriptors.push(WatchDescriptor::new(path.into(), inbox));
    }

    /// Channel for inboxes that appear while [`TriggerWatcher::run`] is going
    ///
    /// An inbox registered again replaces the earlier watch.
    pub fn inbox_sender(&self) -> mpsc::UnboundedSender<(PathBuf, Inbox)> {
        self.added_tx.clone()
    }

    /// Watch until shutdown; fails only when an inbox is abandoned
    pub async fn run(
        mut self,
        events: mpsc::UnboundedSender<WatchEvent>,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<(), WatchError> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let (detected_tx, detected_rx) = mpsc::unbounded_channel();
        let mut added_rx = self
            .added_rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);

        for index in 0..self.descriptors.len() {
            self.start_watch(index, &raw_tx, &detected_tx, &events);
        }

        let collector = tokio::spawn(collect_triggers(
            detected_rx,
            events.clone(),
            self.config.debounce,
        ));

        let mut health = tokio::time::interval(self.config.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                Some(raw) = raw_rx.recv() => self.handle_raw(raw, &detected_tx, &events),
                Some((path, inbox)) = added_rx.recv() => {
                    self.register(path, inbox, &raw_tx, &detected_tx, &events);
                }
                _ = health.tick() => {
                    if let Err(e) = self.check_health(&raw_tx, &detected_tx, &events) {
                        break Err(e);
                    }
                }
            }
        };

        for descriptor in &mut self.descriptors {
            descriptor.watcher = None;
        }
        collector.abort();
        result
    }

    /// Arm a new or pending inbox; degraded on failure
    fn start_watch(
        &mut self,
        index: usize,
        raw_tx: &mpsc::UnboundedSender<RawEvent>,
        detected: &mpsc::UnboundedSender<Detected>,
        events: &mpsc::UnboundedSender<WatchEvent>,
    ) {
        match self.arm(index, raw_tx, detected) {
            Ok(()) => log::info!(
                "Watching {} for restart triggers",
                self.descriptors[index].path.display()
            ),
            Err(e) => {
                log::warn!("{}", e);
                self.degrade(index, events);
            }
        }
    }

    fn register(
        &mut self,
        path: PathBuf,
        inbox: Inbox,
        raw_tx: &mpsc::UnboundedSender<RawEvent>,
        detected: &mpsc::UnboundedSender<Detected>,
        events: &mpsc::UnboundedSender<WatchEvent>,
    ) {
        self.descriptors.retain(|d| d.path != path);
        self.descriptors.push(WatchDescriptor::new(path, inbox));
        self.start_watch(self.descriptors.len() - 1, raw_tx, detected, events);
    }

    /// Create the backend watch, then pick up triggers that are already present
    fn arm(
        &mut self,
        index: usize,
        raw_tx: &mpsc::UnboundedSender<RawEvent>,
        detected: &mpsc::UnboundedSender<Detected>,
    ) -> Result<(), WatchError> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let descriptor = &mut self.descriptors[index];

        let tx = raw_tx.clone();
        let mechanism = |source| WatchError::Mechanism {
            path: descriptor.path.clone(),
            source,
        };
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = tx.send(RawEvent { generation, result });
        })
        .map_err(mechanism)?;
        watcher
            .watch(&descriptor.path, RecursiveMode::NonRecursive)
            .map_err(mechanism)?;

        descriptor.generation = generation;
        descriptor.watcher = Some(watcher);

        if let Ok(entries) = std::fs::read_dir(&descriptor.path) {
            for path in entries.flatten().map(|e| e.path()) {
                if is_trigger_path(&path) {
                    log::info!("Pending restart file found: {}", path.display());
                    let _ = detected.send(Detected {
                        path,
                        inbox: descriptor.inbox.clone(),
                        at: Instant::now(),
                    });
                }
            }
        }
        Ok(())
    }

    fn handle_raw(
        &mut self,
        raw: RawEvent,
        detected: &mpsc::UnboundedSender<Detected>,
        events: &mpsc::UnboundedSender<WatchEvent>,
    ) {
        let Some(index) = self
            .descriptors
            .iter()
            .position(|d| d.generation == raw.generation)
        else {
            return;
        };
        let descriptor = &self.descriptors[index];
        if descriptor.state != WatchState::Active {
            return;
        }

        let event = match raw.result {
            Ok(event) => event,
            Err(e) => {
                log::warn!(
                    "Restart listener error on {}: {}",
                    descriptor.path.display(),
                    e
                );
                self.degrade(index, events);
                return;
            }
        };

        if event.need_rescan() {
            log::warn!(
                "Restart listener internal overflow on {}",
                descriptor.path.display()
            );
            self.degrade(index, events);
            return;
        }

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths.into_iter().filter(|p| is_trigger_path(p)) {
                    log::info!(
                        "Restart file found: {}",
                        path.file_name().unwrap_or_default().to_string_lossy()
                    );
                    let _ = detected.send(Detected {
                        path,
                        inbox: descriptor.inbox.clone(),
                        at: Instant::now(),
                    });
                }
            }
            EventKind::Remove(_) if event.paths.iter().any(|p| p == &descriptor.path) => {
                log::warn!("Directory inaccessible: {}", descriptor.path.display());
                self.degrade(index, events);
            }
            _ => {}
        }
    }

    /// Stop delivering events for an inbox and schedule recovery
    fn degrade(&mut self, index: usize, events: &mpsc::UnboundedSender<WatchEvent>) {
        let descriptor = &mut self.descriptors[index];
        if descriptor.state != WatchState::Active {
            return;
        }

        descriptor.state = WatchState::Degraded;
        descriptor.watcher = None;
        descriptor.generation = 0;
        descriptor.failures = 0;
        descriptor.retry_at = None;
        descriptor.waiting_for_dir = false;

        let _ = events.send(WatchEvent::StateChanged {
            path: descriptor.path.clone(),
            state: WatchState::Degraded,
        });
    }

    fn check_health(
        &mut self,
        raw_tx: &mpsc::UnboundedSender<RawEvent>,
        detected: &mpsc::UnboundedSender<Detected>,
        events: &mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<(), WatchError> {
        let mut index = 0;
        while index < self.descriptors.len() {
            // A deleted preset takes its inbox with it; not a watch failure
            if self.descriptors[index].preset_removed() {
                let descriptor = self.descriptors.remove(index);
                log::warn!(
                    "Preset of {} was removed, no longer watching it",
                    descriptor.path.display()
                );
                let _ = events.send(WatchEvent::Removed {
                    path: descriptor.path,
                });
                continue;
            }

            match self.descriptors[index].state {
                WatchState::Active => {
                    if !self.descriptors[index].path.is_dir() {
                        log::warn!(
                            "Directory inaccessible: {}",
                            self.descriptors[index].path.display()
                        );
                        self.degrade(index, events);
                    }
                }
                WatchState::Degraded => self.recover(index, raw_tx, detected, events)?,
                WatchState::Abandoned => {}
            }
            index += 1;
        }
        Ok(())
    }

    /// One recovery attempt, if due
    fn recover(
        &mut self,
        index: usize,
        raw_tx: &mpsc::UnboundedSender<RawEvent>,
        detected: &mpsc::UnboundedSender<Detected>,
        events: &mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<(), WatchError> {
        let now = Instant::now();
        let max_attempts = self.config.max_recovery_attempts;
        let descriptor = &mut self.descriptors[index];
        let exists = descriptor.path.is_dir();

        // A reappearing directory is retried right away
        let due = match descriptor.retry_at {
            None => true,
            Some(at) => now >= at || (exists && descriptor.waiting_for_dir),
        };
        if !due {
            return Ok(());
        }

        descriptor.failures += 1;
        if descriptor.failures > max_attempts {
            descriptor.state = WatchState::Abandoned;
            log::error!(
                "Giving up on restart listener for {} after {} attempts",
                descriptor.path.display(),
                max_attempts
            );
            let _ = events.send(WatchEvent::StateChanged {
                path: descriptor.path.clone(),
                state: WatchState::Abandoned,
            });
            return Err(WatchError::Abandoned {
                path: descriptor.path.clone(),
                attempts: max_attempts,
            });
        }

        if !exists {
            log::warn!(
                "Directory inaccessible: {} (attempt {}/{})",
                descriptor.path.display(),
                descriptor.failures,
                max_attempts
            );
            descriptor.waiting_for_dir = true;
            descriptor.retry_at = Some(now + self.config.missing_backoff);
            return Ok(());
        }

        descriptor.waiting_for_dir = false;
        log::info!(
            "Try to restart restart listener on {}",
            descriptor.path.display()
        );

        match self.arm(index, raw_tx, detected) {
            Ok(()) => {
                let descriptor = &mut self.descriptors[index];
                descriptor.state = WatchState::Active;
                descriptor.failures = 0;
                descriptor.retry_at = None;
                log::info!(
                    "Restart listener on {} restored",
                    descriptor.path.display()
                );
                let _ = events.send(WatchEvent::StateChanged {
                    path: descriptor.path.clone(),
                    state: WatchState::Active,
                });
            }
            Err(e) => {
                log::warn!("Error trying to restart restart listener: {}", e);
                let descriptor = &mut self.descriptors[index];
                descriptor.watcher = None;
                descriptor.generation = 0;
                descriptor.retry_at = Some(now + self.config.error_backoff);
            }
        }
        Ok(())
    }
}

/// Debounce, read, and delete detected triggers in detection order
async fn collect_triggers(
    mut detected: mpsc::UnboundedReceiver<Detected>,
    events: mpsc::UnboundedSender<WatchEvent>,
    debounce: Duration,
) {
    // Triggers whose deletion failed; never processed twice
    let mut undeletable: HashSet<PathBuf> = HashSet::new();

    while let Some(found) = detected.recv().await {
        tokio::time::sleep_until(found.at + debounce).await;

        if undeletable.contains(&found.path) {
            if !found.path.exists() {
                undeletable.remove(&found.path);
            }
            log::debug!("Ignoring consumed trigger {}", found.path.display());
            continue;
        }

        let content = match tokio::fs::read(&found.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Trigger {} already consumed", found.path.display());
                continue;
            }
            Err(e) => {
                log::warn!(
                    "Unable to read trigger {}: {}",
                    found.path.display(),
                    e
                );
                String::new()
            }
        };

        if let Err(e) = tokio::fs::remove_file(&found.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Unable to delete trigger {}: {}; it will not be processed again",
                    found.path.display(),
                    e
                );
                undeletable.insert(found.path.clone());
            }
        }

        let event = if found.inbox == Inbox::Shared && is_init_sentinel(&found.path) {
            WatchEvent::Live
        } else {
            WatchEvent::Trigger(Trigger {
                source: found.path,
                inbox: found.inbox,
                content,
            })
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

/// Errors from the trigger watcher
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Watch mechanism failure on {}: {source}", .path.display())]
    Mechanism {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Restart listener for {} abandoned after {attempts} recovery attempts", .path.display())]
    Abandoned { path: PathBuf, attempts: u32 },
}
