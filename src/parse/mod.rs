mod parse;

pub use parse::{parser, LogConfig, ProgramConfig};
