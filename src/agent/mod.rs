//! Client side of the agent RPC contract.
//!
//! The shim only consumes these operations; the agent that serves them runs
//! inside the sandbox. Every call is an independent request/response unit, so
//! one client value is shared by all shim activities.

mod socket;
pub mod wire;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ProcessIdentity;

pub use socket::{Endpoint, SocketAgent};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The three remote byte channels of one process.
pub struct RemoteStdio {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: BoxedReader,
}

/// Process-oriented operations offered by the agent.
#[async_trait]
pub trait AgentClient: Send + Sync + 'static {
    /// Open the stdin, stdout and stderr channels of the process.
    async fn open_stdio(&self, id: &ProcessIdentity) -> Result<RemoteStdio>;

    /// Tell the remote process its stdin reached end-of-input.
    async fn close_stdin(&self, id: &ProcessIdentity) -> Result<()>;

    /// Deliver signal number `signal` to the remote process.
    async fn signal_process(&self, id: &ProcessIdentity, signal: i32) -> Result<()>;

    /// Set the remote terminal geometry.
    async fn tty_win_resize(&self, id: &ProcessIdentity, rows: u16, columns: u16) -> Result<()>;

    /// Block until the remote process exits and return its status.
    async fn wait_process(&self, id: &ProcessIdentity) -> Result<i32>;
}
