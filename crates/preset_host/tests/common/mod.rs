//! Test helpers: a scratch base directory with a fake server executable

#![allow(dead_code)]

use preset_host::{HostConfig, HostLayout, StopPolicy, Supervisor, SupervisorError, WatchConfig};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Records its arguments in `launches.log`, exits 7 for preset `crash`, else
/// runs until SIGTERM. Starts and stops land in `events.log` with the PID.
const FAKE_SERVER: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
echo "$@" >> "$dir/launches.log"
case "$1" in
  --preset=crash) exit 7 ;;
esac
trap 'kill $child 2>/dev/null; echo "stop $1 $$" >> "$dir/events.log"; exit 0' TERM
echo "start $1 $$" >> "$dir/events.log"
sleep 60 &
child=$!
wait $child
"#;

pub struct TestHost {
    pub dir: tempfile::TempDir,
    pub layout: HostLayout,
}

impl TestHost {
    /// Base directory with the given presets and a discoverable fake server
    pub fn new(presets: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = HostLayout::new(dir.path());
        for name in presets {
            fs::create_dir_all(layout.preset_dir(name)).unwrap();
        }
        install_fake_server(dir.path());
        Self { dir, layout }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    /// Production behaviour with test-sized timings
    pub fn config(&self) -> HostConfig {
        let mut config = HostConfig::new(self.layout.clone());
        config.relay_stdio = false;
        config.stop = StopPolicy {
            attempts: 10,
            interval: Duration::from_millis(100),
        };
        config.watch = WatchConfig {
            debounce: Duration::from_millis(50),
            max_recovery_attempts: 100,
            missing_backoff: Duration::from_millis(50),
            error_backoff: Duration::from_millis(50),
            health_interval: Duration::from_millis(20),
        };
        config.start_grace = Duration::from_millis(100);
        config.live_grace = Duration::from_millis(50);
        config.poll_interval = Duration::from_millis(50);
        config
    }

    /// Argument lines of every server start so far
    pub fn launches(&self) -> Vec<String> {
        fs::read_to_string(self.base().join("launches.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// `(kind, preset arg, pid)` for every start and stop, in order
    pub fn server_events(&self) -> Vec<(String, String, u32)> {
        fs::read_to_string(self.base().join("events.log"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let kind = parts.next()?.to_string();
                let preset = parts.next()?.to_string();
                let pid = parts.next()?.parse().ok()?;
                Some((kind, preset, pid))
            })
            .collect()
    }

    /// Drop a trigger into `inbox`
    pub fn trigger(&self, inbox: &Path, name: &str, content: &str) {
        fs::write(inbox.join(format!("{}.asrestart", name)), content).unwrap();
    }
}

#[cfg(unix)]
fn install_fake_server(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("AssettoServer");
    fs::write(&path, FAKE_SERVER).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub struct RunningHost {
    pub supervisor: Arc<Supervisor>,
    pub shutdown: watch::Sender<()>,
    pub handle: JoinHandle<Result<(), SupervisorError>>,
}

impl RunningHost {
    pub fn start(config: HostConfig) -> Self {
        let supervisor = Arc::new(Supervisor::new(config).unwrap());
        let (shutdown, rx) = watch::channel(());
        let runner = supervisor.clone();
        let handle = tokio::spawn(async move { runner.run(rx).await });
        Self {
            supervisor,
            shutdown,
            handle,
        }
    }

    /// Wait for the first start and for the restart listener to be armed
    pub async fn ready(&self, host: &TestHost) {
        let started =
            wait_until(Duration::from_secs(5), || async move { !host.launches().is_empty() }).await;
        assert!(started, "server never started");
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    pub async fn preset_becomes(&self, preset: &str) -> bool {
        wait_until(Duration::from_secs(5), || {
            let supervisor = self.supervisor.clone();
            let preset = preset.to_string();
            async move { supervisor.current_preset().await.as_deref() == Some(preset.as_str()) }
        })
        .await
    }

    pub async fn stop(self) -> Result<(), SupervisorError> {
        self.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("supervisor did not stop")
            .expect("supervisor task panicked")
    }
}

pub fn is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
