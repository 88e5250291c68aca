//! Supervision of the server under test and the auxiliary bot
//!
//! The server is an opaque collaborator: build it, start it with a port and
//! password, keep its output pipes drained, and signal it to stop when the
//! run is over. Draining starts the moment the process does: an unread
//! pipe eventually blocks the child and corrupts the whole run.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::common::{Config, Error, Result};

fn lock_log(log: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run the configured build command through the shell.
///
/// A non-zero exit is fatal: nothing downstream can work without the server
/// binary.
pub async fn build(command: &str) -> Result<()> {
    tracing::info!(command, "building server");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| Error::Build {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(Error::Build {
            command: command.to_string(),
            reason: format!("exit code {:?}", status.code()),
        });
    }
    Ok(())
}

/// An external process with both output streams continuously drained
#[derive(Debug)]
pub struct SupervisedProcess {
    name: String,
    child: Child,
    stdout: Arc<Mutex<Vec<String>>>,
    stderr: Arc<Mutex<Vec<String>>>,
    drains: Vec<JoinHandle<()>>,
}

impl SupervisedProcess {
    /// Spawn `binary args...` with piped output and start draining
    pub async fn spawn(name: &str, binary: &Path, args: &[String]) -> Result<Self> {
        let resolved = which::which(binary)
            .map_err(|e| Error::spawn(binary.display(), e))?;

        let mut child = Command::new(&resolved)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(binary.display(), e))?;

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let mut drains = Vec::new();
        if let Some(out) = child.stdout.take() {
            drains.push(drain_stream(name, "stdout", out, Arc::clone(&stdout)));
        }
        if let Some(err) = child.stderr.take() {
            drains.push(drain_stream(name, "stderr", err, Arc::clone(&stderr)));
        }

        tracing::info!(name, pid = ?child.id(), binary = %resolved.display(), "process started");
        Ok(Self {
            name: name.to_string(),
            child,
            stdout,
            stderr,
            drains,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// Everything the process has written to stdout so far
    pub fn stdout_lines(&self) -> Vec<String> {
        lock_log(&self.stdout).clone()
    }

    /// Everything the process has written to stderr so far
    pub fn stderr_lines(&self) -> Vec<String> {
        lock_log(&self.stderr).clone()
    }

    /// Graceful stop: SIGTERM, short wait, then force kill.
    ///
    /// Best-effort by contract: termination failures are logged, never
    /// propagated, so cleanup of the rest of the run always proceeds.
    pub async fn stop(mut self) {
        let name = self.name.clone();

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if rc != 0 {
                tracing::warn!(name = %name, pid, "failed to signal process");
            }
        }
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => tracing::info!(name = %name, %status, "process exited"),
            Ok(Err(err)) => tracing::warn!(name = %name, error = %err, "failed to reap process"),
            Err(_) => {
                tracing::warn!(name = %name, "process ignored SIGTERM, killing");
                if let Err(err) = self.child.start_kill() {
                    tracing::warn!(name = %name, error = %err, "failed to kill process");
                }
                let _ = tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
            }
        }

        // Child exit closes the pipes, so the drain tasks fall out on EOF
        for handle in self.drains.drain(..) {
            let _ = handle.await;
        }
    }
}

fn drain_stream(
    name: &str,
    stream: &'static str,
    reader: impl AsyncRead + Send + Unpin + 'static,
    log: Arc<Mutex<Vec<String>>>,
) -> JoinHandle<()> {
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::trace!(process = %name, stream, %line, "output");
            lock_log(&log).push(line);
        }
    })
}

/// Owns the server under test (and optional bot) for the duration of a run
pub struct Supervisor {
    server: SupervisedProcess,
    bot: Option<SupervisedProcess>,
}

impl Supervisor {
    /// Build and start the configured processes, then wait out the settle
    /// delay so the server has time to bind its listening port.
    ///
    /// A server failure is fatal; a bot failure is logged and the run
    /// continues without it.
    pub async fn start(config: &Config) -> Result<Self> {
        if let Some(build_command) = &config.server.build_command {
            build(build_command).await?;
        }

        let args = vec![
            config.server.port.to_string(),
            config.server.password.clone(),
        ];
        let server = SupervisedProcess::spawn("server", &config.server.binary, &args).await?;

        let bot = match &config.bot {
            Some(bot_config) => {
                match SupervisedProcess::spawn("bot", &bot_config.binary, &[]).await {
                    Ok(process) => Some(process),
                    Err(err) => {
                        tracing::warn!(error = %err, "bot failed to start, continuing without it");
                        None
                    }
                }
            }
            None => None,
        };

        tokio::time::sleep(Duration::from_millis(config.server.settle_ms)).await;
        Ok(Self { server, bot })
    }

    pub fn server(&self) -> &SupervisedProcess {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut SupervisedProcess {
        &mut self.server
    }

    /// Tear everything down; never fails
    pub async fn stop(self) {
        if let Some(bot) = self.bot {
            bot.stop().await;
        }
        self.server.stop().await;
    }
}
