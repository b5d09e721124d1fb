//! Connection logging and the worker-init error-context decorator.
//!
//! A [`ConnectionLog`] renders diagnostics for one connection: the message,
//! then whatever its render handler appends.  The worker-init bootstrap
//! installs [`log_init_worker_error`] so every line produced by the
//! placeholder connection says where it came from.

use std::fmt::{self, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Severity of a diagnostic, most severe first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// System is unusable.
    Emerg,
    /// Action must be taken immediately.
    Alert,
    /// Critical conditions.
    Crit,
    /// Error conditions.
    #[default]
    Error,
    /// Warning conditions.
    Warn,
    /// Normal but significant.
    Notice,
    /// Informational.
    Info,
    /// Debug-level messages.
    Debug,
}

impl LogLevel {
    /// Map the numeric levels exposed to scripts (`ngx.ERR` and friends).
    ///
    /// `0` (stderr) is treated as [`LogLevel::Emerg`] so it is never filtered.
    pub fn from_script_level(level: i64) -> Option<Self> {
        Some(match level {
            0 | 1 => Self::Emerg,
            2 => Self::Alert,
            3 => Self::Crit,
            4 => Self::Error,
            5 => Self::Warn,
            6 => Self::Notice,
            7 => Self::Info,
            8 => Self::Debug,
            _ => return None,
        })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Emerg => "emerg",
            Self::Alert => "alert",
            Self::Crit => "crit",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// An error log target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLog {
    /// Log file.
    #[serde(default = "default_error_log_file")]
    pub file: PathBuf,
    /// Least severe level that is still written.
    #[serde(default)]
    pub level: LogLevel,
}

fn default_error_log_file() -> PathBuf {
    PathBuf::from("logs/error.log")
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self {
            file: default_error_log_file(),
            level: LogLevel::default(),
        }
    }
}

/// Appends context to a rendered diagnostic.
pub type LogHandler = fn(&ConnectionLog, &mut String);

/// Per-connection logger.
#[derive(Debug, Clone)]
pub struct ConnectionLog {
    /// Connection the log belongs to.
    pub connection: u64,
    /// What the connection is currently doing, rendered as ` while <action>`.
    pub action: Option<String>,
    /// Render hook.
    pub handler: Option<LogHandler>,
    /// Where diagnostics go.
    pub error_log: ErrorLog,
}

impl ConnectionLog {
    /// Create a logger for `connection` writing to `error_log`.
    pub fn new(connection: u64, error_log: ErrorLog) -> Self {
        Self {
            connection,
            action: None,
            handler: None,
            error_log,
        }
    }

    /// Point the logger at another error log.
    pub fn set_error_log(&mut self, error_log: &ErrorLog) {
        debug!(connection = self.connection, file = %error_log.file.display(), "Binding connection log");
        self.error_log = error_log.clone();
    }

    /// Render `msg` with the handler's context appended.
    pub fn render(&self, msg: &str) -> String {
        let mut line = String::with_capacity(msg.len() + 64);
        line.push_str(msg);
        if let Some(handler) = self.handler {
            handler(self, &mut line);
        }
        line
    }

    /// Emit `msg` at `level`, returning the rendered line unless the level
    /// is filtered out.
    pub fn log(&self, level: LogLevel, msg: &str) -> Option<String> {
        if level > self.error_log.level {
            return None;
        }
        let line = self.render(msg);
        let file = self.error_log.file.display();
        match level {
            LogLevel::Emerg | LogLevel::Alert | LogLevel::Crit | LogLevel::Error => {
                error!(connection = self.connection, log = %file, level = %level, "{line}")
            }
            LogLevel::Warn => warn!(connection = self.connection, log = %file, "{line}"),
            LogLevel::Notice | LogLevel::Info => {
                info!(connection = self.connection, log = %file, level = %level, "{line}")
            }
            LogLevel::Debug => debug!(connection = self.connection, log = %file, "{line}"),
        }
        Some(line)
    }

    /// Emit `msg` at [`LogLevel::Error`].
    pub fn error(&self, msg: &str) -> Option<String> {
        self.log(LogLevel::Error, msg)
    }
}

// Handlers compare by presence only; fn pointer addresses are not stable.
impl PartialEq for ConnectionLog {
    fn eq(&self, other: &Self) -> bool {
        self.connection == other.connection
            && self.action == other.action
            && self.handler.is_some() == other.handler.is_some()
            && self.error_log == other.error_log
    }
}

impl Eq for ConnectionLog {}

/// Render hook installed on the worker-init placeholder connection.
pub fn log_init_worker_error(log: &ConnectionLog, buf: &mut String) {
    if let Some(action) = &log.action {
        let _ = write!(buf, " while {action}");
    }
    buf.push_str(", context: init_worker_by_lua*");
}
