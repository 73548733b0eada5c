use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// `--version` output, including the metadata baked in by build.rs.
pub const LONG_VERSION: &str = concat!(
    env!("AGENT_SHIM_VERSION"),
    "\nbuilt: ",
    env!("AGENT_SHIM_BUILD_DATE"),
    "\ntarget: ",
    env!("AGENT_SHIM_BUILD_TARGET"),
    " (",
    env!("AGENT_SHIM_BUILD_PROFILE"),
    ")\nrustc: ",
    env!("AGENT_SHIM_BUILD_RUSTC"),
);

// Identifiers default to empty and are validated by ShimConfig::from_cli so that
// a missing value exits with the shim's failure code instead of clap's usage code.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "agent-shim",
    version = env!("AGENT_SHIM_VERSION"),
    long_version = LONG_VERSION,
    about = "Proxy stdio, signals and terminal size of one sandboxed container process to its agent."
)]
pub struct Cli {
    /// Agent RPC endpoint (unix:///path/to.sock or tcp://host:port)
    #[arg(long, default_value = "")]
    pub agent: String,

    /// Container id of the proxied process
    #[arg(long, default_value = "")]
    pub container: String,

    /// Exec id of the proxied process (equal to --container for the init process)
    #[arg(long = "exec-id", default_value = "")]
    pub exec_id: String,

    /// A terminal is attached; put it in raw mode while proxying
    #[arg(long)]
    pub terminal: bool,

    /// Exit with the remote process' exit code
    #[arg(
        long = "proxy-exit-code",
        action = ArgAction::Set,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub proxy_exit_code: bool,

    /// Log level: debug, info, warn, error, fatal or panic
    #[arg(long, default_value = "warn")]
    pub log: String,

    /// Write logs to this file (stdout and stderr carry the proxied streams)
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Enable debug mode (abort with a core dump on internal errors)
    #[arg(long)]
    pub debug: bool,
}
