//! Session configuration.

use crate::error::{CoreError, CoreResult};
use crate::mode::RrMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Log file used when `--log-file-rr` is not given
pub const DEFAULT_LOG_NAME: &str = "_temp_rr_.log";

const MODE_OPTION: &str = "--record-replay";
const LOG_OPTION: &str = "--log-file-rr";

/// Record/replay session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RrConfig {
    /// Record, replay or neither
    pub mode: RrMode,
    /// Path of the log file
    pub log_path: PathBuf,
    /// Polls of an exiting thread's flag before giving up
    pub exit_wait_retries: u32,
    /// Delay between two polls of an exiting thread's flag
    pub exit_wait_interval_ms: u64,
    /// Diverging register snapshots reported in detail before going quiet
    pub mismatch_report_limit: u64,
}

impl Default for RrConfig {
    fn default() -> Self {
        Self {
            mode: RrMode::Inactive,
            log_path: PathBuf::from(DEFAULT_LOG_NAME),
            exit_wait_retries: 10,
            exit_wait_interval_ms: 1,
            mismatch_report_limit: 10,
        }
    }
}

impl RrConfig {
    /// Configuration for recording into `path`
    #[must_use]
    pub fn record(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: RrMode::Record,
            log_path: path.into(),
            ..Self::default()
        }
    }

    /// Configuration for replaying from `path`
    #[must_use]
    pub fn replay(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: RrMode::Replay,
            log_path: path.into(),
            ..Self::default()
        }
    }

    /// Parse the record/replay options out of a tool command line.
    ///
    /// The first element is the program name. Only the leading block of
    /// `-`-prefixed options is scanned; options this engine does not own are
    /// skipped so the tool harness can parse them itself.
    ///
    /// # Errors
    ///
    /// Returns error if the mode is missing or invalid, or the log path is empty
    pub fn from_args<I, S>(args: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        let mut mode = None;

        for arg in args.into_iter().skip(1) {
            let arg = arg.as_ref();
            if !arg.starts_with('-') {
                break;
            }
            if let Some(value) = option_value(arg, MODE_OPTION) {
                mode = Some(RrMode::from_option(value)?);
            } else if let Some(value) = option_value(arg, LOG_OPTION) {
                if value.is_empty() {
                    return Err(CoreError::InvalidOption {
                        option: LOG_OPTION.to_string(),
                        reason: "empty path".to_string(),
                    });
                }
                config.log_path = PathBuf::from(value);
            }
        }

        config.mode = mode.ok_or(CoreError::MissingMode)?;
        Ok(config)
    }

    /// Delay between two polls of an exiting thread's flag
    #[must_use]
    pub fn exit_wait_interval(&self) -> Duration {
        Duration::from_millis(self.exit_wait_interval_ms)
    }

    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserialize from JSON
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn option_value<'a>(arg: &'a str, name: &str) -> Option<&'a str> {
    arg.strip_prefix(name)?.strip_prefix('=')
}
