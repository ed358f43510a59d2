use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{setsid, Pid};
use std::fmt;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::parse::ProgramConfig;


/// Why a child is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    Exited(i32),
    Signaled(Signal),
    /// The launcher could not start the child at all.
    LaunchFailed(String),
    /// The reaper went away without reporting a status.
    Lost,
}

impl ExitCause {
    pub fn success(&self) -> bool {
        matches!(self, ExitCause::Exited(0))
    }
}

impl From<ExitStatus> for ExitCause {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitCause::Exited(code);
        }
        status
            .signal()
            .and_then(|raw| Signal::try_from(raw).ok())
            .map_or(ExitCause::Lost, ExitCause::Signaled)
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Exited(code) => write!(f, "exit status {}", code),
            ExitCause::Signaled(sig) => write!(f, "killed by {}", sig),
            ExitCause::LaunchFailed(reason) => write!(f, "launch failed: {}", reason),
            ExitCause::Lost => f.write_str("exit status lost"),
        }
    }
}

/// The one notification delivered when a child is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    pub pid: u32,
    pub cause: ExitCause,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ExitNotice {
    /// Synthetic exit for a launch that never produced a process.
    pub fn launch_failed(err: &LaunchError) -> Self {
        let now = Utc::now();
        ExitNotice {
            pid: 0,
            cause: ExitCause::LaunchFailed(err.to_string()),
            started_at: now,
            ended_at: now,
        }
    }

    pub fn lost(pid: u32, started_at: DateTime<Utc>) -> Self {
        ExitNotice { pid, cause: ExitCause::Lost, started_at, ended_at: Utc::now() }
    }

    pub fn uptime(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// A spawned child as seen by the control engine.
///
/// Signal delivery is fire-and-forget: signalling a process that has
/// already exited is a silent no-op, since its exit notice may still be
/// in flight.
pub trait Process: Send + Sync + 'static {
    /// OS process id, or 0 once the process is known to have exited.
    fn pid(&self) -> u32;

    fn signal(&self, sig: Signal);

    /// Unconditional forcible termination.
    fn kill(&self) {
        self.signal(Signal::SIGKILL)
    }

    fn started_at(&self) -> DateTime<Utc>;
}

/// A freshly launched child and the receiving end of its exit notice.
pub struct Spawned {
    pub process: Box<dyn Process>,
    pub exit: oneshot::Receiver<ExitNotice>,
}

impl fmt::Debug for Spawned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawned").field("pid", &self.process.pid()).finish()
    }
}

/// Outcome of one launch attempt. A failure carries its synthetic exit so
/// it flows through the same restart policy as a real exit.
#[derive(Debug)]
pub enum Launch {
    Running(Spawned),
    Failed(ExitNotice),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn `{cmd}`: {source}")]
    Spawn { cmd: String, source: std::io::Error },

    #[error("failed to open `{path}`: {source}")]
    Output { path: String, source: std::io::Error },

    #[error("{0}")]
    Config(String),
}

/// Starts children. Only the supervisor loop calls this.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    async fn spawn(&self, cfg: &ProgramConfig) -> Result<Spawned, LaunchError>;
}

/// Runs one launch attempt, folding errors into [`Launch::Failed`].
pub async fn launch<L: Launcher + ?Sized>(launcher: &L, cfg: &ProgramConfig) -> Launch {
    match launcher.spawn(cfg).await {
        Ok(spawned) => Launch::Running(spawned),
        Err(err) => {
            warn!(cmd = %cfg.cmd, error = %err, "launch failed");
            Launch::Failed(ExitNotice::launch_failed(&err))
        }
    }
}



/// A real OS child. The pid is cleared by the reaper task once the
/// process has been waited on.
pub struct OsProcess {
    pid: Arc<AtomicU32>,
    started_at: DateTime<Utc>,
}

impl Process for OsProcess {
    fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    fn signal(&self, sig: Signal) {
        let pid = self.pid();
        if pid == 0 {
            debug!(signal = ?sig, "process already exited, signal dropped");
            return;
        }
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => info!(pid, signal = ?sig, "signal delivered"),
            Err(Errno::ESRCH) => debug!(pid, signal = ?sig, "process already gone, signal dropped"),
            Err(e) => warn!(pid, signal = ?sig, error = %e, "failed to deliver signal"),
        }
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Launches `cfg.cmd` as a real child process in its own session.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

fn output(path: Option<&str>) -> Result<Stdio, LaunchError> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };
    if let Some(dir) = Path::new(path).parent() {
        std::fs::create_dir_all(dir).ok();
    }
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LaunchError::Output { path: path.to_string(), source })?;
    Ok(Stdio::from(file))
}

/*
    @@@
    @CommandLauncher::spawn();
    . Builds the command with args, working directory and environment; stdout/stderr go to append-mode files or /dev/null.
    . Detaches the child into a new session (setsid()) and applies the umask before exec.
    . Hands the child to a reaper task which waits on it, clears the pid and sends exactly one ExitNotice.
*/
#[async_trait]
impl Launcher for CommandLauncher {
    async fn spawn(&self, cfg: &ProgramConfig) -> Result<Spawned, LaunchError> {
        let mask = cfg.umask_bits().map_err(|e| LaunchError::Config(e.to_string()))?;

        let mut cmd = tokio::process::Command::new(&cfg.cmd);
        cmd.args(&cfg.args)
            .stdin(Stdio::null())
            .stdout(output(cfg.stdout.as_deref())?)
            .stderr(output(cfg.stderr.as_deref())?);
        if let Some(dir) = &cfg.workingdir {
            cmd.current_dir(dir);
        }
        if let Some(envs) = &cfg.env {
            cmd.envs(envs);
        }
        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                setsid()?;
                if let Some(mask) = mask {
                    umask(Mode::from_bits_truncate(mask as nix::libc::mode_t));
                }
                Ok(())
            });
        }

        let started_at = Utc::now();
        let mut child = cmd
            .spawn()
            .map_err(|source| LaunchError::Spawn { cmd: cfg.cmd.clone(), source })?;
        let raw = child.id().unwrap_or(0);
        let pid = Arc::new(AtomicU32::new(raw));
        info!(pid = raw, cmd = %cfg.cmd, "spawned child");

        let (tx, rx) = oneshot::channel();
        let reaped = pid.clone();
        tokio::spawn(async move {
            let cause = match child.wait().await {
                Ok(status) => ExitCause::from(status),
                Err(e) => {
                    warn!(pid = raw, error = %e, "failed to wait on child");
                    ExitCause::Lost
                }
            };
            reaped.store(0, Ordering::Release);
            let notice = ExitNotice { pid: raw, cause, started_at, ended_at: Utc::now() };
            debug!(pid = raw, cause = %notice.cause, "child reaped");
            // The engine may already be gone during teardown.
            let _ = tx.send(notice);
        });

        Ok(Spawned { process: Box::new(OsProcess { pid, started_at }), exit: rx })
    }
}
