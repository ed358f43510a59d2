#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use vigil::engine::{ControlHandle, Status};
use vigil::process::{ExitCause, ExitNotice, LaunchError, Launcher, Process, Spawned};
use vigil::ProgramConfig;

/// Shared bookkeeping of everything the fake launcher did.
#[derive(Default)]
pub struct Ledger {
    next_pid: AtomicU32,
    spawned: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    fail_next: AtomicUsize,
    signals: Mutex<Vec<(u32, Signal)>>,
    children: Mutex<Vec<Arc<FakeChild>>>,
}

impl Ledger {
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Signals delivered so far, as (pid, signal); SIGKILL included.
    pub fn signals(&self) -> Vec<(u32, Signal)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn last_pid(&self) -> u32 {
        self.children.lock().unwrap().last().map_or(0, |c| c.pid)
    }

    /// Makes the next `n` launches fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Lets the newest child exit on its own with `code`.
    pub fn exit_current(&self, code: i32) {
        if let Some(child) = self.children.lock().unwrap().last() {
            child.finish(ExitCause::Exited(code));
        }
    }
}

pub struct FakeChild {
    pid: u32,
    started_at: DateTime<Utc>,
    ledger: Arc<Ledger>,
    exit: Mutex<Option<oneshot::Sender<ExitNotice>>>,
}

impl FakeChild {
    fn finish(&self, cause: ExitCause) {
        if let Some(tx) = self.exit.lock().unwrap().take() {
            self.ledger.live.fetch_sub(1, Ordering::SeqCst);
            let notice = ExitNotice { pid: self.pid, cause, started_at: self.started_at, ended_at: Utc::now() };
            let _ = tx.send(notice);
        }
    }

    fn alive(&self) -> bool {
        self.exit.lock().unwrap().is_some()
    }
}

struct FakeProcess(Arc<FakeChild>);

impl Process for FakeProcess {
    fn pid(&self) -> u32 {
        if self.0.alive() { self.0.pid } else { 0 }
    }

    fn signal(&self, sig: Signal) {
        self.0.ledger.signals.lock().unwrap().push((self.0.pid, sig));
        if matches!(sig, Signal::SIGKILL) {
            self.0.finish(ExitCause::Signaled(Signal::SIGKILL));
        }
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.0.started_at
    }
}

/// Launcher handing out in-memory children with increasing pids.
#[derive(Clone)]
pub struct FakeLauncher {
    pub ledger: Arc<Ledger>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        let ledger = Ledger { next_pid: AtomicU32::new(1000), ..Default::default() };
        FakeLauncher { ledger: Arc::new(ledger) }
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn spawn(&self, cfg: &ProgramConfig) -> Result<Spawned, LaunchError> {
        let ledger = &self.ledger;
        let pending = ledger.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            ledger.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(LaunchError::Spawn {
                cmd: cfg.cmd.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        let pid = ledger.next_pid.fetch_add(1, Ordering::SeqCst);
        ledger.spawned.fetch_add(1, Ordering::SeqCst);
        let live = ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        ledger.max_live.fetch_max(live, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        let child = Arc::new(FakeChild {
            pid,
            started_at: Utc::now(),
            ledger: ledger.clone(),
            exit: Mutex::new(Some(tx)),
        });
        ledger.children.lock().unwrap().push(child.clone());
        Ok(Spawned { process: Box::new(FakeProcess(child)), exit: rx })
    }
}

pub fn config() -> ProgramConfig {
    ProgramConfig::new("fake", Vec::new())
}

/// Polls the engine until `pred` holds, panicking after five seconds.
pub async fn wait_for(control: &ControlHandle, what: &str, pred: impl Fn(&Status) -> bool) -> Status {
    let poll = async {
        loop {
            let status = control.status().await.expect("engine stopped");
            if pred(&status) {
                return status;
            }
            sleep(Duration::from_millis(5)).await;
        }
    };
    match timeout(Duration::from_secs(5), poll).await {
        Ok(status) => status,
        Err(_) => panic!("timed out waiting for {}", what),
    }
}
