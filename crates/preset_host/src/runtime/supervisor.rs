//! Server supervisor - owns the current server instance and restarts it on triggers

use crate::config::{HostLayout, INIT_TRIGGER_NAME};
use crate::runtime::preset::{PresetPicker, PresetRegistry, RandomPicker};
use crate::runtime::process::{
    locate_executable, ProcessConfig, ProcessError, ProcessStatus, ServerProcess, StopPolicy,
};
use crate::runtime::relay::StdioRelay;
use crate::runtime::watcher::{
    is_trigger_path, Inbox, Trigger, TriggerWatcher, WatchConfig, WatchError, WatchEvent,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Host configuration
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub layout: HostLayout,
    /// Preset for the first start; a random one is picked when unset or missing
    pub preset: Option<String>,
    pub docker: bool,
    /// Explicit server executable, skips discovery
    pub executable: Option<PathBuf>,
    /// Relay host stdio to the server
    pub relay_stdio: bool,
    pub stop: StopPolicy,
    pub watch: WatchConfig,
    /// Wait after the first start before arming the watch
    pub start_grace: Duration,
    /// Wait after arming before writing the startup sentinel
    pub live_grace: Duration,
    /// Interval of the child exit check
    pub poll_interval: Duration,
    /// Seed for deterministic preset selection
    pub seed: Option<u64>,
}

impl HostConfig {
    pub fn new(layout: HostLayout) -> Self {
        Self {
            layout,
            preset: None,
            docker: false,
            executable: None,
            relay_stdio: true,
            stop: StopPolicy::default(),
            watch: WatchConfig::default(),
            start_grace: Duration::from_secs(1),
            live_grace: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
            seed: None,
        }
    }
}

/// Supervises one server instance at a time
pub struct Supervisor {
    config: HostConfig,
    process: ProcessConfig,
    registry: PresetRegistry,
    picker: std::sync::Mutex<Box<dyn PresetPicker>>,
    /// Restarts hold this lock from stop through start
    current: Mutex<Option<ServerProcess>>,
    relay: Option<StdioRelay>,
}

impl Supervisor {
    pub fn new(config: HostConfig) -> Result<Self, SupervisorError> {
        let picker: Box<dyn PresetPicker> = match config.seed {
            Some(seed) => Box::new(RandomPicker::seeded(seed)),
            None => Box::new(RandomPicker::new()),
        };
        Self::with_picker(config, picker)
    }

    pub fn with_picker(
        config: HostConfig,
        picker: Box<dyn PresetPicker>,
    ) -> Result<Self, SupervisorError> {
        let executable = match &config.executable {
            Some(path) => path.clone(),
            None => locate_executable(config.layout.base(), config.docker)?,
        };
        let process = ProcessConfig {
            executable,
            working_dir: config.layout.base().to_path_buf(),
            docker: config.docker,
        };

        Ok(Self {
            registry: PresetRegistry::new(&config.layout),
            relay: config.relay_stdio.then(StdioRelay::new),
            picker: std::sync::Mutex::new(picker),
            current: Mutex::new(None),
            process,
            config,
        })
    }

    /// Preset of the running server
    pub async fn current_preset(&self) -> Option<String> {
        let current = self.current.lock().await;
        current.as_ref().and_then(|p| p.preset().map(str::to_string))
    }

    pub async fn current_pid(&self) -> Option<u32> {
        self.current.lock().await.as_ref().map(ServerProcess::pid)
    }

    /// Start the server and restart it on triggers until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) -> Result<(), SupervisorError> {
        let inboxes = self.prepare()?;
        let mut known: HashSet<String> = inboxes
            .iter()
            .filter_map(|(_, inbox)| match inbox {
                Inbox::Preset(name) => Some(name.clone()),
                Inbox::Shared => None,
            })
            .collect();

        let preset = self.initial_preset().ok_or_else(|| {
            SupervisorError::NoPresetAvailable(self.registry.presets_dir().to_path_buf())
        })?;
        self.restart(Some(preset)).await?;

        tokio::select! {
            _ = shutdown.changed() => {
                log::info!("Shutdown signal received");
                self.shutdown().await;
                return Ok(());
            }
            _ = tokio::time::sleep(self.config.start_grace) => {}
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut watcher = TriggerWatcher::new(self.config.watch.clone());
        for (path, inbox) in inboxes {
            watcher.add_inbox(path, inbox);
        }
        let inbox_tx = watcher.inbox_sender();
        let mut watch_task = tokio::spawn(watcher.run(events_tx, shutdown.clone()));
        self.write_sentinel();

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    log::info!("Shutdown signal received");
                    break Ok(());
                }

                Some(event) = events_rx.recv() => {
                    // Everything already queued is handled as one batch
                    let mut batch = vec![event];
                    while let Ok(event) = events_rx.try_recv() {
                        batch.push(event);
                    }
                    // A preset recreated later is registered again
                    for event in &batch {
                        if let WatchEvent::Removed { path } = event {
                            let name = path.parent().and_then(Path::file_name);
                            if let Some(name) = name.and_then(|n| n.to_str()) {
                                known.remove(name);
                            }
                        }
                    }
                    self.handle_events(batch).await;
                }

                joined = &mut watch_task => {
                    break match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.into()),
                        Err(_) => Err(SupervisorError::WatcherPanicked),
                    };
                }

                _ = tick.tick() => {
                    self.check_child().await;
                    self.discover_presets(&mut known, &inbox_tx);
                }
            }
        };

        watch_task.abort();
        self.shutdown().await;
        result
    }

    /// Stop the current server and start one with the resolved preset
    ///
    /// `requested` is used when it names an existing preset. Otherwise the
    /// running preset is kept, or a random one is picked if nothing runs.
    pub async fn restart(&self, requested: Option<String>) -> Result<(), SupervisorError> {
        let mut current = self.current.lock().await;

        let running = current
            .as_ref()
            .and_then(|p| p.preset().map(str::to_string));
        let preset = self.resolve_preset(requested, running);

        if let Some(process) = current.take() {
            process.stop(&self.config.stop).await?;
        }

        let process = ServerProcess::spawn(&self.process, preset, self.relay.as_ref()).await?;
        log::info!(
            "Server started with preset {:?} (PID {})",
            process.preset(),
            process.pid()
        );
        *current = Some(process);
        Ok(())
    }

    /// Stop the current server, if any
    pub async fn shutdown(&self) {
        let Some(process) = self.current.lock().await.take() else {
            return;
        };
        if let Err(e) = process.stop(&self.config.stop).await {
            log::error!("Failed to stop server: {}", e);
        }
    }

    /// Create inboxes and clear stale triggers; returns the inboxes to watch
    fn prepare(&self) -> Result<Vec<(PathBuf, Inbox)>, SupervisorError> {
        let layout = &self.config.layout;
        let shared = layout.shared_inbox();
        create_dir(&shared)?;
        create_dir(&layout.presets_dir())?;

        let mut inboxes = vec![(shared, Inbox::Shared)];
        let presets = self
            .registry
            .ensure_inboxes()
            .map_err(|source| SupervisorError::Io {
                context: format!("creating inboxes in {}", layout.presets_dir().display()),
                source,
            })?;
        inboxes.extend(
            presets
                .into_iter()
                .map(|(name, inbox)| (inbox, Inbox::Preset(name))),
        );

        for (path, _) in &inboxes {
            clear_stale_triggers(path);
        }
        Ok(inboxes)
    }

    /// Give presets created since the last tick a watched inbox
    fn discover_presets(
        &self,
        known: &mut HashSet<String>,
        inbox_tx: &mpsc::UnboundedSender<(PathBuf, Inbox)>,
    ) {
        let presets = match self.registry.list() {
            Ok(presets) => presets,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::debug!("Unable to list presets: {}", e);
                return;
            }
        };

        for name in &presets {
            if known.contains(name) {
                continue;
            }
            let inbox = self.config.layout.preset_inbox(name);
            if let Err(e) = fs::create_dir_all(&inbox) {
                log::warn!("Unable to create {}: {}", inbox.display(), e);
                continue;
            }
            log::info!("New preset '{}', watching {}", name, inbox.display());
            let _ = inbox_tx.send((inbox, Inbox::Preset(name.clone())));
            known.insert(name.clone());
        }
        known.retain(|name| presets.contains(name));
    }

    fn initial_preset(&self) -> Option<String> {
        match self.config.preset.as_deref().map(str::trim) {
            Some(name) if self.registry.exists(name) => Some(name.to_string()),
            Some(name) if !name.is_empty() => {
                log::warn!("Preset '{}' not found, picking a random one", name);
                self.pick()
            }
            _ => self.pick(),
        }
    }

    fn resolve_preset(&self, requested: Option<String>, running: Option<String>) -> Option<String> {
        if let Some(name) = requested.as_deref().map(str::trim) {
            if self.registry.exists(name) {
                return Some(name.to_string());
            }
            log::warn!("Requested preset '{}' does not exist", name);
        }
        running.or_else(|| self.pick())
    }

    fn pick(&self) -> Option<String> {
        let mut picker = match self.picker.lock() {
            Ok(picker) => picker,
            Err(poisoned) => poisoned.into_inner(),
        };
        let picked = self.registry.pick(picker.as_mut());
        if let Some(name) = &picked {
            log::info!("Picked random preset '{}'", name);
        }
        picked
    }

    async fn handle_events(&self, batch: Vec<WatchEvent>) {
        let mut triggers = Vec::new();
        for event in batch {
            match event {
                WatchEvent::Trigger(trigger) => {
                    log::info!(
                        "Restart requested from {}: {:?}",
                        trigger.inbox,
                        trigger.content
                    );
                    triggers.push(trigger);
                }
                WatchEvent::Live => log::info!("Restart listener is live"),
                WatchEvent::StateChanged { path, state } => {
                    log::info!("Restart listener on {} is {:?}", path.display(), state)
                }
                WatchEvent::Removed { path } => {
                    log::info!("Stopped watching {}", path.display())
                }
            }
        }

        let Some(trigger) = select_trigger(&triggers) else {
            return;
        };
        if triggers.len() > 1 {
            log::info!(
                "Coalesced {} triggers, using {}",
                triggers.len(),
                trigger.source.display()
            );
        }
        if let Err(e) = self.restart(trigger.request()).await {
            log::error!("Restart failed: {}", e);
        }
    }

    /// Notice a server that exited on its own
    async fn check_child(&self) {
        let mut current = self.current.lock().await;
        let Some(process) = current.as_mut() else {
            return;
        };
        if let ProcessStatus::Exited(code) = process.status() {
            log::warn!(
                "Server (PID {}) exited on its own with code {:?}, waiting for a restart trigger",
                process.pid(),
                code
            );
            if let Some(process) = current.take() {
                let _ = process.stop(&self.config.stop).await;
            }
        }
    }

    fn write_sentinel(&self) {
        let path = self.config.layout.shared_inbox().join(INIT_TRIGGER_NAME);
        let grace = self.config.live_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = tokio::fs::write(&path, b"").await {
                log::warn!("Unable to write {}: {}", path.display(), e);
            }
        });
    }
}

/// Within a batch the last shared-inbox trigger wins, else the last trigger
pub fn select_trigger(triggers: &[Trigger]) -> Option<&Trigger> {
    triggers
        .iter()
        .rev()
        .find(|t| t.inbox == Inbox::Shared)
        .or_else(|| triggers.last())
}

fn create_dir(path: &Path) -> Result<(), SupervisorError> {
    fs::create_dir_all(path).map_err(|source| SupervisorError::Io {
        context: format!("creating {}", path.display()),
        source,
    })
}

fn clear_stale_triggers(inbox: &Path) {
    let Ok(entries) = fs::read_dir(inbox) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        if !is_trigger_path(&path) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("Removed stale trigger {}", path.display()),
            Err(e) => log::warn!("Unable to remove stale trigger {}: {}", path.display(), e),
        }
    }
}

/// Errors from the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("No preset available in {}", .0.display())]
    NoPresetAvailable(PathBuf),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Restart listener task panicked")]
    WatcherPanicked,
}
