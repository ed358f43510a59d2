use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, time::Duration};

use crate::error::{Error, Result};

fn default_mailbox() -> usize { 64 }
fn default_level() -> String { String::from("info") }

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogConfig {
    /// Directory for the daily-rotated `vigil.log`; stderr when unset.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { dir: None, level: default_level() }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProgramConfig {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub workingdir: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub umask: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    /// Seconds to wait before every relaunch.
    #[serde(default)]
    pub wait: f64,
    /// Capacity of the control engine's mailbox.
    #[serde(default = "default_mailbox")]
    pub mailbox: usize,
    /// Path of the local control socket.
    #[serde(default)]
    pub control: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
}

impl ProgramConfig {
    /// Minimal config running `cmd` with everything else defaulted.
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        ProgramConfig {
            cmd: cmd.into(),
            args,
            workingdir: None,
            env: None,
            umask: None,
            stdout: None,
            stderr: None,
            wait: 0.0,
            mailbox: default_mailbox(),
            control: None,
            log: LogConfig::default(),
        }
    }

    /// Pause before a relaunch; out-of-range values saturate.
    pub fn relaunch_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.wait).unwrap_or(if self.wait > 0.0 { Duration::MAX } else { Duration::ZERO })
    }

    /// Parsed umask, if one is configured.
    pub fn umask_bits(&self) -> Result<Option<u32>> {
        match &self.umask {
            None => Ok(None),
            Some(mask) => u32::from_str_radix(mask, 8)
                .map(Some)
                .map_err(|_| Error::Config(format!("umask `{}` is not an octal number", mask))),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cmd.trim().is_empty() {
            return Err(Error::Config("`cmd` must not be empty".into()));
        }
        if Duration::try_from_secs_f64(self.wait).is_err() {
            return Err(Error::Config(format!("`wait` must be a non-negative number of seconds, got {}", self.wait)));
        }
        if self.mailbox == 0 {
            return Err(Error::Config("`mailbox` must be at least 1".into()));
        }
        self.umask_bits()?;
        Ok(())
    }
}



/*
    @@@
    @parser();
    . Reads the YAML config at `path`; io errors are returned as Err.
    . Deserializes it into a ProgramConfig with serde_yaml and rejects values the launcher could not use.
*/
pub fn parser(path: impl AsRef<Path>) -> Result<ProgramConfig> {
    let yaml_file = fs::read_to_string(path)?;
    let parsed_config: ProgramConfig = serde_yaml::from_str(&yaml_file)?;
    parsed_config.validate()?;
    Ok(parsed_config)
}
