//! agent-shim: host-side proxy for one process running inside a sandboxed
//! container.
//!
//! The shim forwards its standard streams, signals and terminal size to the
//! agent that manages the real process, then exits with that process' exit
//! code.

pub mod agent;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exit;
pub mod host;
pub mod logging;
pub mod session;
pub mod signals;
pub mod stdio;
pub mod terminal;
pub mod tty;

use tracing::Instrument;

pub use agent::{AgentClient, Endpoint, RemoteStdio, SocketAgent};
pub use cli::Cli;
pub use config::{LogLevel, ProcessIdentity, ShimConfig};
pub use errors::{
    exit_code_for_shim_error, exit_code_for_wait, process_exit_byte, ShimError, EXIT_FAILURE,
};
pub use exit::{ExitStatus, ExitWaiter};
pub use host::{HostIo, ProcessHost};
pub use session::{SessionOptions, SessionState, ShimSession};
pub use signals::{SignalForwarder, SignalSource, SIGNAL_IGNORE_SET, SIG_CHAN_SIZE};
pub use stdio::{LocalStdio, OutputDrain, StdioProxy};
pub use terminal::{RawTerminalToken, StdinTerminal, Terminal, WindowSize};
pub use tty::{ResizeNotifier, ResizeOutcome, TtyMonitor};

pub const VERSION: &str = env!("AGENT_SHIM_VERSION");

/// Run a shim for `config` against the real process environment and return
/// the code this process should exit with. Must run inside a tokio runtime.
pub async fn run_shim(config: &ShimConfig) -> i32 {
    let span = logging::session_span(&config.identity);
    async move {
        tracing::info!(
            version = VERSION,
            log_level = config.log_level.as_str(),
            "shim started"
        );

        let host = match ProcessHost::new(config.identity.is_init_process()) {
            Ok(h) => h,
            Err(e) => {
                let e = ShimError::StartGate(e);
                tracing::error!(error = %e, "failed to set up host");
                return exit_code_for_shim_error(&e);
            }
        };
        let options = SessionOptions {
            terminal: config.terminal,
            proxy_exit_code: config.proxy_exit_code,
        };
        let session = match ShimSession::connect(
            config.identity.clone(),
            options,
            host,
            SocketAgent::connect(&config.agent_addr),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, agent = %config.agent_addr, "failed to create new shim");
                return exit_code_for_shim_error(&e);
            }
        };

        let result = session.run().await.map(|status| status.code);
        match &result {
            Ok(code) if config.proxy_exit_code => {
                tracing::info!(exitcode = code, "using shim to proxy exit code")
            }
            Ok(_) => {}
            Err(e @ ShimError::Wait(_)) => tracing::error!(error = %e, "failed waiting for process"),
            Err(e) => tracing::error!(error = %e, "shim session failed"),
        }
        exit_code_for_wait(&result, config.proxy_exit_code)
    }
    .instrument(span)
    .await
}
