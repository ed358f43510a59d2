use nix::sys::signal::Signal;



/// One parsed operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Forward an OS signal to the running child.
    Signal(Signal),
    /// `k`/`kill`: SIGKILL the child; restarts per the current policy.
    Kill,
    /// `o`/`once`: stop for good after the next exit.
    Once,
    /// `u`/`up`: clear the restart lock, relaunch if down.
    Up,
    /// `d`/`down`: lock restarts and kill the child.
    Down,
    /// `exit`: kill the child and tear the supervisor down.
    Exit,
}

impl Command {
    /// Parses one token, case-insensitively. `None` for anything unknown.
    pub fn parse(token: &str) -> Option<Command> {
        let token = token.trim().to_lowercase();
        let cmd = match token.as_str() {
            "k" | "kill" => Command::Kill,
            "o" | "once" => Command::Once,
            "u" | "up" => Command::Up,
            "d" | "down" => Command::Down,
            "exit" => Command::Exit,
            other => Command::Signal(lookup(other)?),
        };
        Some(cmd)
    }
}

/*
    @@@
    @lookup();
    . Maps a short or long signal token (any case) to the signal it delivers.
    . Lifecycle verbs are not signals and return None here, see Command::parse.
*/
pub fn lookup(token: &str) -> Option<Signal> {
    let sig = match token.trim().to_lowercase().as_str() {
        "p" | "pause" | "s" | "stop" => Signal::SIGSTOP,
        "c" | "cont" => Signal::SIGCONT,
        "h" | "hup" => Signal::SIGHUP,
        "a" | "alrm" => Signal::SIGALRM,
        "i" | "int" => Signal::SIGINT,
        "q" | "quit" => Signal::SIGQUIT,
        "1" | "usr1" => Signal::SIGUSR1,
        "2" | "usr2" => Signal::SIGUSR2,
        "t" | "term" => Signal::SIGTERM,
        "in" | "ttin" => Signal::SIGTTIN,
        "ou" | "out" | "ttou" => Signal::SIGTTOU,
        "w" | "winch" => Signal::SIGWINCH,
        _ => return None,
    };
    Some(sig)
}

/// Every token the front-end understands, for completion and help.
pub const TOKENS: &[&str] = &[
    "p", "pause", "s", "stop", "c", "cont", "h", "hup", "a", "alrm", "i", "int", "q", "quit",
    "1", "usr1", "2", "usr2", "t", "term", "in", "ttin", "ou", "out", "ttou", "w", "winch",
    "k", "kill", "o", "once", "u", "up", "d", "down", "exit",
];
