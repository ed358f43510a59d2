use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{ControlHandle, Engine, Status, Verdict};
use crate::error::{Error, Result};
use crate::parse::ProgramConfig;
use crate::process::{launch, Launch, Launcher};

/// Minimum pause before relaunching after a failed launch.
pub const LAUNCH_RETRY_FLOOR: Duration = Duration::from_millis(100);

/// Entry point: launches the child and keeps it running.
pub struct Supervisor;

/// A started supervisor.
pub struct Running {
    control: ControlHandle,
    task: JoinHandle<Result<Status>>,
}

impl Running {
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Waits for the supervisor to terminate and returns the engine's final state.
    pub async fn wait(self) -> Result<Status> {
        self.task.await.map_err(|e| Error::Task(e.to_string()))?
    }
}

impl Supervisor {
    /*
        @@@
        @start();
        . Launches the first child before the engine starts, so the engine begins UP (or with a failed launch to process).
        . Spawns the control engine task and the relaunch loop task.
        . Returns the handle operators use to control the child and to wait for termination.
    */
    pub async fn start<L: Launcher>(launcher: L, config: ProgramConfig) -> Running {
        let (engine, control, verdicts) = Engine::new(config.mailbox);
        let first = launch(&launcher, &config).await;
        let first_failed = matches!(first, Launch::Failed(_));
        let engine = tokio::spawn(engine.run(first));

        let relaunch = Relaunch {
            launcher,
            delay: config.relaunch_delay(),
            config,
            control: control.clone(),
            verdicts,
            last_failed: first_failed,
        };
        let task = tokio::spawn(relaunch.run(engine));
        Running { control, task }
    }
}

struct Relaunch<L> {
    launcher: L,
    config: ProgramConfig,
    delay: Duration,
    control: ControlHandle,
    verdicts: mpsc::UnboundedReceiver<Verdict>,
    last_failed: bool,
}

impl<L: Launcher> Relaunch<L> {
    /*
        @@@
        @run();
        . Waits for the engine's verdict on each exit: relaunch, hold until `up`, or terminate.
        . Launches at most one child at a time; the next launch only follows the verdict for the previous exit.
        . A launch the engine no longer accepts (after `exit`) is killed and reaped here.
    */
    async fn run(mut self, engine: JoinHandle<Status>) -> Result<Status> {
        while let Some(verdict) = self.verdicts.recv().await {
            let delay = match verdict {
                Verdict::Hold => {
                    info!("child down, waiting for `up`");
                    continue;
                }
                Verdict::Terminate => break,
                Verdict::Resume => Duration::ZERO,
                Verdict::Relaunch if self.last_failed => self.delay.max(LAUNCH_RETRY_FLOOR),
                Verdict::Relaunch => self.delay,
            };
            if !self.pause(delay).await {
                break;
            }

            let next = launch(&self.launcher, &self.config).await;
            self.last_failed = matches!(next, Launch::Failed(_));
            if let Some(rejected) = self.control.adopt(next).await {
                reap(rejected).await;
                break;
            }
        }

        let status = engine.await.map_err(|e| Error::Task(e.to_string()))?;
        info!(
            start_count = status.start_count,
            deferred_count = status.deferred_count,
            "supervisor terminated"
        );
        Ok(status)
    }

    /// Sleeps before a relaunch. False when the engine stopped meanwhile.
    async fn pause(&mut self, delay: Duration) -> bool {
        if delay.is_zero() {
            return true;
        }
        debug!(delay_ms = delay.as_millis() as u64, "waiting before relaunch");
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            verdict = self.verdicts.recv() => !matches!(verdict, Some(Verdict::Terminate) | None),
        }
    }
}

async fn reap(launch: Launch) {
    if let Launch::Running(spawned) = launch {
        let pid = spawned.process.pid();
        info!(pid, "supervisor stopped during launch, killing late child");
        spawned.process.kill();
        let _ = spawned.exit.await;
    }
}
