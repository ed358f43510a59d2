use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use vigil::process::{ExitCause, LaunchError, Launcher, Spawned};
use vigil::{CommandLauncher, Phase, ProgramConfig, Supervisor};

fn sleeper() -> ProgramConfig {
    ProgramConfig::new("/bin/sleep", vec!["30".into()])
}

fn is_alive(pid: u32) -> bool {
    !matches!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH))
}

/// Real launcher that counts how often it was asked to launch.
#[derive(Clone, Default)]
struct Counting {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl Launcher for Counting {
    async fn spawn(&self, cfg: &ProgramConfig) -> Result<Spawned, LaunchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        CommandLauncher.spawn(cfg).await
    }
}

#[tokio::test]
async fn signal_reaches_the_child_and_exit_is_reported_once() {
    let spawned = CommandLauncher.spawn(&sleeper()).await.unwrap();
    let pid = spawned.process.pid();
    assert_ne!(pid, 0);
    assert!(is_alive(pid));

    spawned.process.signal(Signal::SIGTERM);
    let notice = timeout(Duration::from_secs(5), spawned.exit).await.unwrap().unwrap();
    assert_eq!(notice.pid, pid);
    assert_eq!(notice.cause, ExitCause::Signaled(Signal::SIGTERM));
    assert!(notice.ended_at >= notice.started_at);

    // the handle is empty once the exit has been observed
    assert_eq!(spawned.process.pid(), 0);
    spawned.process.signal(Signal::SIGTERM);
    spawned.process.kill();
}

#[tokio::test]
async fn exit_code_is_reported() {
    let cfg = ProgramConfig::new("/bin/sh", vec!["-c".into(), "exit 3".into()]);
    let spawned = CommandLauncher.spawn(&cfg).await.unwrap();
    let notice = timeout(Duration::from_secs(5), spawned.exit).await.unwrap().unwrap();
    assert_eq!(notice.cause, ExitCause::Exited(3));
}

#[tokio::test]
async fn missing_command_is_a_launch_error() {
    let cfg = ProgramConfig::new("/nonexistent/vigil-child", Vec::new());
    let err = CommandLauncher.spawn(&cfg).await.unwrap_err();
    assert!(matches!(err, LaunchError::Spawn { .. }));
}

#[tokio::test]
async fn child_output_goes_to_configured_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("nested/out.log");
    let mut cfg = ProgramConfig::new("/bin/sh", vec!["-c".into(), "echo hello; echo $MODE".into()]);
    cfg.stdout = Some(out.to_string_lossy().into_owned());
    cfg.env = Some([("MODE".to_string(), "test".to_string())].into_iter().collect());
    cfg.workingdir = Some(dir.path().to_string_lossy().into_owned());

    let spawned = CommandLauncher.spawn(&cfg).await.unwrap();
    let notice = timeout(Duration::from_secs(5), spawned.exit).await.unwrap().unwrap();
    assert!(notice.cause.success());
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\ntest\n");
}

#[tokio::test]
async fn supervises_a_real_process() {
    let running = Supervisor::start(CommandLauncher, sleeper()).await;
    let control = running.control();
    let first = control.pid().await.unwrap();
    assert_ne!(first, 0);
    assert!(is_alive(first));

    control.kill().await.unwrap();
    let second = timeout(Duration::from_secs(5), async {
        loop {
            let status = control.status().await.unwrap();
            if status.phase == Phase::Up && status.start_count == 1 {
                return status.pid;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_ne!(second, first);
    assert!(!is_alive(first));

    control.shutdown().await.unwrap();
    let last = timeout(Duration::from_secs(5), running.wait()).await.unwrap().unwrap();
    assert_eq!(last.phase, Phase::Terminated);
    assert!(!is_alive(second));
}

#[tokio::test]
async fn unlaunchable_command_keeps_retrying_until_exit() {
    let cfg = ProgramConfig::new("/nonexistent/vigil-child", Vec::new());
    let launcher = Counting::default();
    let attempts = launcher.attempts.clone();
    let running = Supervisor::start(launcher, cfg).await;
    let control = running.control();

    sleep(Duration::from_millis(350)).await;
    let status = control.status().await.unwrap();
    assert_eq!(status.pid, 0);
    assert_eq!(status.start_count, 0);
    assert_eq!(status.deferred_count, 0);
    // first launch plus retries spaced by the 100ms floor
    let tried = attempts.load(Ordering::SeqCst);
    assert!(tried > 1, "only {} launch attempt(s)", tried);

    control.shutdown().await.unwrap();
    let last = timeout(Duration::from_secs(2), running.wait()).await.unwrap().unwrap();
    assert_eq!(last.phase, Phase::Terminated);
    let settled = attempts.load(Ordering::SeqCst);
    sleep(Duration::from_millis(250)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), settled);
}
