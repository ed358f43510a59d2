use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::engine::{ControlHandle, Status};
use crate::error::{Error, Result};
use crate::signals::Command;

/// Pause after a failed accept before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Answer to one operator line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Pid(u32),
    Status(Status),
    /// Token not understood; nothing was sent to the engine.
    Unknown(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => f.write_str("ok"),
            Reply::Pid(pid) => write!(f, "{}", pid),
            Reply::Status(s) => write!(
                f,
                "{:?} pid={} lock={} once={} starts={} deferred={}",
                s.phase, s.pid, s.restart_lock, s.restart_once, s.start_count, s.deferred_count
            ),
            Reply::Unknown(token) => write!(f, "unknown command: {}", token),
        }
    }
}

/*
    @@@
    @dispatch();
    . Turns one operator line into engine calls: `pid` and `status` are queries, everything else goes through Command::parse.
    . Unknown tokens never reach the engine and are answered with Reply::Unknown.
    . Fails only with Error::Terminated once the engine is gone.
*/
pub async fn dispatch(control: &ControlHandle, line: &str) -> Result<Reply> {
    let token = line.trim();
    match token.to_lowercase().as_str() {
        "pid" => return control.pid().await.map(Reply::Pid),
        "status" => return control.status().await.map(Reply::Status),
        _ => {}
    }
    match Command::parse(token) {
        Some(cmd) => {
            info!(command = ?cmd, "operator command");
            control.dispatch(cmd).await?;
            Ok(Reply::Ok)
        }
        None => {
            warn!(token, "unknown command ignored");
            Ok(Reply::Unknown(token.to_string()))
        }
    }
}

/// Serves the line protocol on a Unix socket until the engine stops.
/// A stale socket file at `path` is replaced; failed accepts are logged
/// and retried.
pub async fn serve(path: impl AsRef<Path>, control: ControlHandle) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "control socket listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let control = control.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, control).await {
                            debug!(error = %e, "control connection ended");
                        }
                    });
                }
                // EMFILE and friends are transient; keep the socket up.
                Err(e) => {
                    warn!(error = %e, "control socket accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            _ = control.closed() => break,
        }
    }

    std::fs::remove_file(path).ok();
    info!(path = %path.display(), "control socket closed");
    Ok(())
}

async fn handle_connection(stream: UnixStream, control: ControlHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match dispatch(&control, &line).await {
            Ok(reply) => writer.write_all(format!("{}\n", reply).as_bytes()).await?,
            Err(Error::Terminated) => {
                writer.write_all(b"terminated\n").await?;
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
