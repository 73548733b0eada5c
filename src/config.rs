use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;

use crate::cli::Cli;
use crate::errors::ShimError;

/// The remote process this shim proxies. Fixed for the lifetime of the shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub container_id: String,
    pub exec_id: String,
}

impl ProcessIdentity {
    pub fn new(container_id: impl Into<String>, exec_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            exec_id: exec_id.into(),
        }
    }

    /// The first process of a container carries the container id as its exec id.
    pub fn is_init_process(&self) -> bool {
        self.container_id == self.exec_id
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_id, self.exec_id)
    }
}

/// Log verbosity accepted by `--log`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Panic => "panic",
        }
    }

    /// tracing has no fatal/panic levels; both collapse onto ERROR.
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ShimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            "panic" => Ok(LogLevel::Panic),
            _ => Err(ShimError::InvalidLogLevel(s.to_string())),
        }
    }
}

/// Validated startup parameters.
#[derive(Debug, Clone)]
pub struct ShimConfig {
    pub agent_addr: String,
    pub identity: ProcessIdentity,
    pub terminal: bool,
    pub proxy_exit_code: bool,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    /// Abort (and dump core) on panics instead of unwinding.
    pub crash_on_error: bool,
}

impl ShimConfig {
    /// Validate parsed flags. Required identifiers are checked before the log
    /// level so that a bare invocation reports what is missing.
    pub fn from_cli(cli: &Cli) -> Result<Self, ShimError> {
        let agent_addr = cli.agent.trim();
        let container = cli.container.trim();
        let exec_id = cli.exec_id.trim();

        let mut missing: Vec<&str> = Vec::new();
        if agent_addr.is_empty() {
            missing.push("--agent");
        }
        if container.is_empty() {
            missing.push("--container");
        }
        if exec_id.is_empty() {
            missing.push("--exec-id");
        }
        if !missing.is_empty() {
            return Err(ShimError::Config(format!(
                "container ID, exec ID and agent socket endpoint must be set (missing: {})",
                missing.join(", ")
            )));
        }

        let log_level: LogLevel = cli.log.parse()?;
        let debug = cli.debug || log_level == LogLevel::Debug;

        Ok(ShimConfig {
            agent_addr: agent_addr.to_string(),
            identity: ProcessIdentity::new(container, exec_id),
            terminal: cli.terminal,
            proxy_exit_code: cli.proxy_exit_code,
            log_level,
            log_file: cli.log_file.clone(),
            crash_on_error: debug,
        })
    }
}
