use anyhow::Context;
use futures::stream::StreamExt;
use nix::sys::signal::Signal;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use tracing::{error, info};

use vigil::engine::ControlHandle;
use vigil::parse::parser;
use vigil::{frontend, logger, shell, CommandLauncher, Supervisor};

/// SIGHUP goes to the child; the terminating signals tear the supervisor down.
async fn forward_signals(mut signals: Signals, control: ControlHandle) {
    while let Some(sig) = signals.next().await {
        let sent = match sig {
            SIGHUP => control.signal(Signal::SIGHUP).await,
            _ => {
                info!(signal = sig, "supervisor signalled, exiting");
                control.shutdown().await
            }
        };
        if sent.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut path = String::from("config/vigil.yml");
    let mut interactive = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--shell" => interactive = true,
            _ => path = arg,
        }
    }

    let cfg = parser(&path).with_context(|| format!("failed to load config `{}`", path))?;
    let _guard = logger::init(&cfg.log);
    info!(config = %path, cmd = %cfg.cmd, "starting supervisor");

    let running = Supervisor::start(CommandLauncher, cfg.clone()).await;
    let control = running.control();

    if let Some(socket) = cfg.control.clone() {
        let control = control.clone();
        tokio::spawn(async move {
            if let Err(e) = frontend::serve(&socket, control).await {
                error!(path = %socket, error = %e, "control socket failed");
            }
        });
    }

    let signals = Signals::new([SIGHUP, SIGINT, SIGQUIT, SIGTERM]).context("failed to install signal handlers")?;
    let signals_handle = signals.handle();
    tokio::spawn(forward_signals(signals, control.clone()));

    if interactive {
        let control = control.clone();
        let runtime = tokio::runtime::Handle::current();
        let history = cfg.log.dir.as_ref().map(|dir| PathBuf::from(dir).join("history.txt"));
        std::thread::spawn(move || {
            if let Err(e) = shell::run_shell(control, runtime, history) {
                error!(error = %e, "shell failed");
            }
        });
    }

    let status = running.wait().await?;
    signals_handle.close();
    info!(
        start_count = status.start_count,
        deferred_count = status.deferred_count,
        "supervisor exited"
    );
    Ok(())
}
