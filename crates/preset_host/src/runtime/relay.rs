//! Stdio relay between the host and the current server instance

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Routes host stdin to whichever child is current, and child output to host stdout/stderr
///
/// Host stdin is read by a single pump task for the host's whole lifetime, so
/// swapping children never leaves a stale reader competing for input.
#[derive(Clone, Default)]
pub struct StdioRelay {
    stdin_target: Arc<Mutex<Option<ChildStdin>>>,
    pump: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

/// Output copy tasks for one child
pub struct OutputRelay {
    tasks: Vec<JoinHandle<()>>,
}

impl StdioRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over the child's piped streams
    pub async fn attach(&self, child: &mut Child) -> OutputRelay {
        self.ensure_pump();
        *self.stdin_target.lock().await = child.stdin.take();

        let mut tasks = Vec::with_capacity(2);
        if let Some(mut stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(async move {
                let mut out = tokio::io::stdout();
                if let Err(e) = tokio::io::copy(&mut stdout, &mut out).await {
                    log::debug!("Server stdout relay ended: {}", e);
                }
            }));
        }
        if let Some(mut stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(async move {
                let mut err = tokio::io::stderr();
                if let Err(e) = tokio::io::copy(&mut stderr, &mut err).await {
                    log::debug!("Server stderr relay ended: {}", e);
                }
            }));
        }

        OutputRelay { tasks }
    }

    /// Stop forwarding host stdin to the previous child
    pub async fn detach(&self) {
        self.stdin_target.lock().await.take();
    }

    fn ensure_pump(&self) {
        let Ok(mut pump) = self.pump.lock() else {
            return;
        };
        if pump.is_some() {
            return;
        }

        let target = self.stdin_target.clone();
        *pump = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let mut guard = target.lock().await;
                        let Some(stdin) = guard.as_mut() else {
                            log::debug!("No server running, dropping input line");
                            continue;
                        };
                        let write = async {
                            stdin.write_all(line.as_bytes()).await?;
                            stdin.write_all(b"\n").await?;
                            stdin.flush().await
                        };
                        let result = write.await;
                        if let Err(e) = result {
                            log::debug!("Server stdin closed: {}", e);
                            guard.take();
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Reading host stdin failed: {}", e);
                        break;
                    }
                }
            }
        }));
    }
}

impl Drop for StdioRelay {
    fn drop(&mut self) {
        // Last clone gone: stop the pump
        if Arc::strong_count(&self.pump) == 1 {
            if let Ok(mut pump) = self.pump.lock() {
                if let Some(handle) = pump.take() {
                    handle.abort();
                }
            }
        }
    }
}

impl OutputRelay {
    /// Let the copy tasks flush what the exited child left in its pipes
    pub async fn drain(mut self, timeout: Duration) {
        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if tokio::time::timeout(timeout, task).await.is_err() {
                abort.abort();
            }
        }
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_attach_takes_streams_and_drains() {
        let relay = StdioRelay::new();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo relayed")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let output = relay.attach(&mut child).await;
        assert!(child.stdin.is_none());
        assert!(child.stdout.is_none());
        assert!(child.stderr.is_none());
        assert!(relay.stdin_target.lock().await.is_some());

        child.wait().await.unwrap();
        relay.detach().await;
        assert!(relay.stdin_target.lock().await.is_none());

        tokio::time::timeout(Duration::from_secs(5), output.drain(Duration::from_secs(1)))
            .await
            .unwrap();
    }
}
