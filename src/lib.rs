/* src/lib.rs */

// Re-export modules for both binary and tests
pub mod engine;
pub mod error;
pub mod frontend;
pub mod logger;
pub mod parse;
pub mod process;
pub mod shell;
pub mod signals;
pub mod supervisor;

pub use engine::{ControlHandle, Phase, Status};
pub use error::{Error, Result};
pub use parse::ProgramConfig;
pub use process::{CommandLauncher, ExitCause, ExitNotice, Launcher, Process, Spawned};
pub use signals::Command;
pub use supervisor::{Running, Supervisor};
