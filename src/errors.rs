//! Error mapping guide:
//! - Every fatal shim error exits with `EXIT_FAILURE`; the only other non-zero
//!   code the shim produces is a proxied remote exit code.
//! - Per-stream and per-event failures never become a `ShimError`; they are
//!   logged where they happen and the activity moves on.
use std::fmt;

/// Fixed exit code for every fatal shim error.
pub const EXIT_FAILURE: i32 = 1;

/// Fatal errors, one variant per failure class that ends a session.
#[derive(Debug)]
pub enum ShimError {
    /// Missing or malformed startup parameter.
    Config(String),
    /// `--log` value outside debug|info|warn|error|fatal|panic.
    InvalidLogLevel(String),
    /// Agent endpoint could not be dialled.
    Connect(anyhow::Error),
    /// `--terminal` was given but the local terminal refused raw mode.
    RawMode(std::io::Error),
    /// One of the three remote stdio streams could not be opened.
    OpenStdio(anyhow::Error),
    /// The start signal subscription for the init process failed.
    StartGate(std::io::Error),
    /// The blocking wait for the remote exit status failed.
    Wait(anyhow::Error),
}

impl fmt::Display for ShimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShimError::Config(msg) => write!(f, "{msg}"),
            ShimError::InvalidLogLevel(level) => write!(
                f,
                "invalid log level '{level}' (expected debug, info, warn, error, fatal or panic)"
            ),
            ShimError::Connect(e) => write!(f, "failed to connect to agent: {e:#}"),
            ShimError::RawMode(e) => write!(f, "failed to set raw terminal: {e}"),
            ShimError::OpenStdio(e) => write!(f, "failed to open stdio streams: {e:#}"),
            ShimError::StartGate(e) => write!(f, "failed to wait for start signal: {e}"),
            ShimError::Wait(e) => write!(f, "failed waiting for process: {e:#}"),
        }
    }
}

impl std::error::Error for ShimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShimError::RawMode(e) | ShimError::StartGate(e) => Some(e),
            ShimError::Connect(e) | ShimError::OpenStdio(e) | ShimError::Wait(e) => {
                Some(e.as_ref())
            }
            ShimError::Config(_) | ShimError::InvalidLogLevel(_) => None,
        }
    }
}

/// Convert a ShimError to the shim's own exit code.
pub fn exit_code_for_shim_error(_e: &ShimError) -> i32 {
    EXIT_FAILURE
}

/// Decide the shim's exit code from the outcome of the remote wait.
///
/// A failed wait always yields `EXIT_FAILURE`. A successful wait yields the
/// remote code only when proxying is enabled and the code is non-zero.
pub fn exit_code_for_wait(result: &Result<i32, ShimError>, proxy_exit_code: bool) -> i32 {
    match result {
        Err(e) => exit_code_for_shim_error(e),
        Ok(code) if proxy_exit_code && *code != 0 => *code,
        Ok(_) => 0,
    }
}

/// Narrow an exit code to what the OS reports to our parent (low 8 bits).
pub fn process_exit_byte(code: i32) -> u8 {
    (code & 0xff) as u8
}
