//! Supervision control engine.
//!
//! A single task owns the restart lock, the restart-once arm, the counters
//! and the active child. Operator commands arrive through the mailbox, the
//! active child's exit notice through its oneshot; the engine merges both
//! into one stream and handles one event at a time, so nothing else ever
//! writes that state.
//!
//! ```text
//! ControlHandle ──► mailbox ─┐
//!                            ├─► Engine::run ──► Verdict ──► supervisor loop
//! child exit notice ─────────┘        │
//!                                     └──► Process::signal / Process::kill
//! ```

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::process::{ExitNotice, Launch, Process, Spawned};
use crate::signals::Command;

/// Messages accepted by the engine's mailbox.
pub enum ControlMessage {
    /// Reply with the active child's pid, 0 when none.
    PidQuery(oneshot::Sender<u32>),
    /// Reply with a snapshot of the engine state.
    Status(oneshot::Sender<Status>),
    EnableRestart,
    ArmRestartOnce,
    DisableRestart,
    DeliverSignal(Signal),
    ForceKill,
    Shutdown,
    /// A launch handed over by the supervisor loop.
    Adopt(Launch),
}

impl ControlMessage {
    fn kind(&self) -> &'static str {
        match self {
            ControlMessage::PidQuery(_) => "pid",
            ControlMessage::Status(_) => "status",
            ControlMessage::EnableRestart => "enable-restart",
            ControlMessage::ArmRestartOnce => "arm-once",
            ControlMessage::DisableRestart => "disable-restart",
            ControlMessage::DeliverSignal(_) => "signal",
            ControlMessage::ForceKill => "kill",
            ControlMessage::Shutdown => "shutdown",
            ControlMessage::Adopt(_) => "adopt",
        }
    }

    fn into_launch(self) -> Option<Launch> {
        match self {
            ControlMessage::Adopt(launch) => Some(launch),
            _ => None,
        }
    }
}

/// Where the supervised child is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Child running, will be relaunched when it exits.
    Up,
    /// Child running, will stay down when it exits.
    Stopping,
    /// Child gone, the supervisor loop is launching a replacement.
    Relaunching,
    /// Child gone, waiting for `up`.
    Down,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub phase: Phase,
    pub pid: u32,
    pub restart_lock: bool,
    pub restart_once: bool,
    /// Successful relaunches; the initial launch is not counted.
    pub start_count: u64,
    /// Exits that were not followed by a relaunch because of the lock.
    pub deferred_count: u64,
}

/// What the engine tells the supervisor loop after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The child exited under an unlocked policy.
    Relaunch,
    /// The child exited under a locked policy; wait for `Resume`.
    Hold,
    /// Restarts were re-enabled while held.
    Resume,
    /// The engine has stopped.
    Terminate,
}

/// Cloneable producer side of the engine's mailbox.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlMessage>,
}

impl ControlHandle {
    async fn send(&self, msg: ControlMessage) -> Result<()> {
        self.tx.send(msg).await.map_err(|_| Error::Terminated)
    }

    /// Current child pid, 0 when the child is down.
    pub async fn pid(&self) -> Result<u32> {
        let (tx, rx) = oneshot::channel();
        self.send(ControlMessage::PidQuery(tx)).await?;
        rx.await.map_err(|_| Error::Terminated)
    }

    pub async fn status(&self) -> Result<Status> {
        let (tx, rx) = oneshot::channel();
        self.send(ControlMessage::Status(tx)).await?;
        rx.await.map_err(|_| Error::Terminated)
    }

    pub async fn enable_restart(&self) -> Result<()> {
        self.send(ControlMessage::EnableRestart).await
    }

    pub async fn arm_restart_once(&self) -> Result<()> {
        self.send(ControlMessage::ArmRestartOnce).await
    }

    pub async fn disable_restart(&self) -> Result<()> {
        self.send(ControlMessage::DisableRestart).await
    }

    pub async fn signal(&self, sig: Signal) -> Result<()> {
        self.send(ControlMessage::DeliverSignal(sig)).await
    }

    pub async fn kill(&self) -> Result<()> {
        self.send(ControlMessage::ForceKill).await
    }

    /// Lock restarts, then kill the child.
    pub async fn down(&self) -> Result<()> {
        self.disable_restart().await?;
        self.kill().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(ControlMessage::Shutdown).await
    }

    pub async fn dispatch(&self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Signal(sig) => self.signal(sig).await,
            Command::Kill => self.kill().await,
            Command::Once => self.arm_restart_once().await,
            Command::Up => self.enable_restart().await,
            Command::Down => self.down().await,
            Command::Exit => self.shutdown().await,
        }
    }

    /// Hands a launch to the engine. Gives it back if the engine is gone.
    pub(crate) async fn adopt(&self, launch: Launch) -> Option<Launch> {
        self.tx.send(ControlMessage::Adopt(launch)).await.err().and_then(|e| e.0.into_launch())
    }

    /// Resolves once the engine stops accepting commands.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Active {
    process: Box<dyn Process>,
    exit: oneshot::Receiver<ExitNotice>,
}

impl From<Spawned> for Active {
    fn from(spawned: Spawned) -> Self {
        Active { process: spawned.process, exit: spawned.exit }
    }
}

enum Event {
    Exited(ExitNotice),
    Control(Option<ControlMessage>),
}

/// Waits for the active child's exit; never resolves while there is none.
async fn next_exit(active: &mut Option<Active>) -> ExitNotice {
    match active {
        Some(active) => match (&mut active.exit).await {
            Ok(notice) => notice,
            Err(_) => ExitNotice::lost(active.process.pid(), active.process.started_at()),
        },
        None => std::future::pending().await,
    }
}

pub struct Engine {
    mailbox: mpsc::Receiver<ControlMessage>,
    verdicts: mpsc::UnboundedSender<Verdict>,
    active: Option<Active>,
    restart_lock: bool,
    restart_once: bool,
    start_count: u64,
    deferred_count: u64,
    held: bool,
    shutting_down: bool,
}

impl Engine {
    /// Creates an engine with a mailbox of `capacity`, the handle feeding
    /// it, and the verdict stream for the supervisor loop.
    pub fn new(capacity: usize) -> (Engine, ControlHandle, mpsc::UnboundedReceiver<Verdict>) {
        let (tx, mailbox) = mpsc::channel(capacity.max(1));
        let (verdicts, verdict_rx) = mpsc::unbounded_channel();
        let engine = Engine {
            mailbox,
            verdicts,
            active: None,
            restart_lock: false,
            restart_once: false,
            start_count: 0,
            deferred_count: 0,
            held: false,
            shutting_down: false,
        };
        (engine, ControlHandle { tx }, verdict_rx)
    }

    /*
        @@@
        @run();
        . Installs the initial launch without counting it, a failed one is processed as an immediate exit.
        . Waits on the mailbox and the active child's exit at once and handles exactly one event per iteration.
        . Stops only after shutdown with no child left, sends Verdict::Terminate and returns the final state.
    */
    pub async fn run(mut self, first: Launch) -> Status {
        match first {
            Launch::Running(spawned) => {
                info!(pid = spawned.process.pid(), "supervising initial child");
                self.active = Some(spawned.into());
            }
            Launch::Failed(notice) => self.on_exit(notice),
        }

        while !(self.shutting_down && self.active.is_none()) {
            let event = tokio::select! {
                notice = next_exit(&mut self.active) => Event::Exited(notice),
                msg = self.mailbox.recv(), if !self.shutting_down => Event::Control(msg),
            };
            match event {
                Event::Exited(notice) => self.on_exit(notice),
                Event::Control(Some(msg)) => self.handle(msg),
                Event::Control(None) => {
                    info!("all control handles dropped");
                    self.begin_shutdown();
                }
            }
        }

        self.held = false;
        let status = self.status();
        info!(
            start_count = status.start_count,
            deferred_count = status.deferred_count,
            "control engine stopped"
        );
        self.report(Verdict::Terminate);
        status
    }

    fn handle(&mut self, msg: ControlMessage) {
        debug!(kind = msg.kind(), "control message");
        match msg {
            ControlMessage::PidQuery(reply) => {
                let _ = reply.send(self.pid());
            }
            ControlMessage::Status(reply) => {
                let _ = reply.send(self.status());
            }
            ControlMessage::EnableRestart => {
                self.restart_lock = false;
                self.restart_once = false;
                if self.held {
                    self.held = false;
                    info!("restart enabled, bringing child up");
                    self.report(Verdict::Resume);
                }
            }
            ControlMessage::ArmRestartOnce => self.restart_once = true,
            ControlMessage::DisableRestart => self.restart_lock = true,
            ControlMessage::DeliverSignal(sig) => match &self.active {
                Some(active) => active.process.signal(sig),
                None => debug!(signal = ?sig, "no child running, signal ignored"),
            },
            ControlMessage::ForceKill => match &self.active {
                Some(active) => active.process.kill(),
                None => debug!("no child running, kill ignored"),
            },
            ControlMessage::Shutdown => self.begin_shutdown(),
            ControlMessage::Adopt(launch) => self.adopt(launch),
        }
    }

    fn adopt(&mut self, launch: Launch) {
        match launch {
            Launch::Running(spawned) => {
                if let Some(active) = &self.active {
                    error!(
                        active = active.process.pid(),
                        rejected = spawned.process.pid(),
                        "second child handed over while one is active, killing it"
                    );
                    spawned.process.kill();
                    return;
                }
                // Locked after the exit was consumed (`down` during relaunch).
                if self.restart_lock && !self.shutting_down {
                    info!(pid = spawned.process.pid(), "restart locked during relaunch, killing new child");
                    spawned.process.kill();
                    self.deferred_count += 1;
                    self.held = true;
                    self.report(Verdict::Hold);
                    return;
                }
                if !self.shutting_down {
                    self.start_count += 1;
                }
                info!(pid = spawned.process.pid(), start_count = self.start_count, "child relaunched");
                self.active = Some(spawned.into());
            }
            Launch::Failed(notice) => self.on_exit(notice),
        }
    }

    /*
        @@@
        @on_exit();
        . Drops the active handle: no signal can reach this child afterwards.
        . Consumes a pending restart-once arm by locking restarts; an unarmed exit leaves the lock as it was.
        . Locked: counts a deferred restart and tells the loop to hold. Unlocked: tells the loop to relaunch.
    */
    fn on_exit(&mut self, notice: ExitNotice) {
        self.active = None;
        info!(
            pid = notice.pid,
            cause = %notice.cause,
            uptime_ms = notice.uptime().num_milliseconds(),
            "child exited"
        );
        if self.shutting_down {
            return;
        }

        if self.restart_once {
            self.restart_lock = true;
            self.restart_once = false;
        }
        if self.restart_lock {
            self.deferred_count += 1;
            self.held = true;
            info!(deferred_count = self.deferred_count, "restart locked, staying down");
            self.report(Verdict::Hold);
        } else {
            self.report(Verdict::Relaunch);
        }
    }

    /// Closes the mailbox, takes over anything still queued and kills the
    /// child. The run loop ends once that child's exit has been consumed.
    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!(pid = self.pid(), "shutting down");
        self.shutting_down = true;
        self.restart_lock = true;
        self.mailbox.close();

        while let Ok(msg) = self.mailbox.try_recv() {
            match msg {
                ControlMessage::Adopt(launch) => self.adopt(launch),
                other => debug!(kind = other.kind(), "dropping command queued behind shutdown"),
            }
        }

        if let Some(active) = &self.active {
            active.process.kill();
        }
    }

    fn report(&self, verdict: Verdict) {
        if self.verdicts.send(verdict).is_err() {
            debug!(?verdict, "supervisor loop gone");
        }
    }

    fn pid(&self) -> u32 {
        self.active.as_ref().map_or(0, |active| active.process.pid())
    }

    fn phase(&self) -> Phase {
        match (&self.active, self.restart_lock) {
            (None, _) if self.shutting_down => Phase::Terminated,
            (Some(_), false) => Phase::Up,
            (Some(_), true) => Phase::Stopping,
            (None, _) if self.held => Phase::Down,
            (None, _) => Phase::Relaunching,
        }
    }

    fn status(&self) -> Status {
        Status {
            phase: self.phase(),
            pid: self.pid(),
            restart_lock: self.restart_lock,
            restart_once: self.restart_once,
            start_count: self.start_count,
            deferred_count: self.deferred_count,
        }
    }
}
