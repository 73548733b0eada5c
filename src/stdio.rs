//! Byte copying between the local standard streams and the remote process.
//!
//! Three tasks run per session. The two output copies are joined by
//! [`OutputDrain`] before the session ends; the stdin copy is detached and
//! may stay parked on a read until the process exits.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::agent::{AgentClient, BoxedReader, BoxedWriter, RemoteStdio};
use crate::config::ProcessIdentity;
use crate::errors::ShimError;

/// The shim's own standard streams.
pub struct LocalStdio {
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
}

impl LocalStdio {
    pub fn inherit() -> Self {
        LocalStdio {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

/// Completion of the stdout and stderr copies.
pub struct OutputDrain {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl OutputDrain {
    /// Resolves once both remote output streams are closed and copied out.
    pub async fn wait(self) {
        if let Err(e) = self.stdout.await {
            tracing::warn!(error = %e, "stdout copy task failed");
        }
        if let Err(e) = self.stderr.await {
            tracing::warn!(error = %e, "stderr copy task failed");
        }
    }
}

pub struct StdioProxy<A> {
    agent: Arc<A>,
    identity: ProcessIdentity,
}

impl<A: AgentClient> StdioProxy<A> {
    pub fn new(agent: Arc<A>, identity: ProcessIdentity) -> Self {
        Self { agent, identity }
    }

    /// Open the remote streams and start the three copy tasks.
    ///
    /// Failing to open any stream is fatal; copy failures later on are only
    /// logged.
    pub async fn start(self, local: LocalStdio) -> Result<OutputDrain, ShimError> {
        let RemoteStdio {
            stdin: remote_in,
            stdout: remote_out,
            stderr: remote_err,
        } = self
            .agent
            .open_stdio(&self.identity)
            .await
            .map_err(ShimError::OpenStdio)?;

        let span = tracing::Span::current();

        // Detached on purpose: an interactive stdin may never reach EOF.
        let _stdin_task = tokio::spawn(
            copy_stdin(self.agent, self.identity, local.stdin, remote_in).instrument(span.clone()),
        );

        let stdout = tokio::spawn(
            copy_output("stdout", remote_out, local.stdout).instrument(span.clone()),
        );
        let stderr =
            tokio::spawn(copy_output("stderr", remote_err, local.stderr).instrument(span));

        Ok(OutputDrain { stdout, stderr })
    }
}

async fn copy_stdin<A: AgentClient>(
    agent: Arc<A>,
    identity: ProcessIdentity,
    mut local: BoxedReader,
    mut remote: BoxedWriter,
) {
    let copied = tokio::io::copy(&mut local, &mut remote).await;
    if let Err(e) = remote.shutdown().await {
        tracing::debug!(error = %e, "half-close of remote stdin failed");
    }
    drop(remote);

    // Exactly one close notification, however the copy ended.
    let closed = agent.close_stdin(&identity).await;

    match copied {
        Ok(n) => tracing::debug!(bytes = n, "stdin reached end of input"),
        Err(e) => tracing::warn!(error = %e, "copy stdin failed"),
    }
    if let Err(e) = closed {
        tracing::warn!(error = %format!("{e:#}"), "close stdin failed");
    }
}

async fn copy_output(name: &'static str, mut remote: BoxedReader, mut local: BoxedWriter) {
    let copied = tokio::io::copy(&mut remote, &mut local).await;
    let flushed = local.flush().await;
    match (copied, flushed) {
        (Ok(n), Ok(())) => tracing::debug!(stream = name, bytes = n, "remote stream closed"),
        (Err(e), _) | (_, Err(e)) => tracing::info!(stream = name, error = %e, "copy failed"),
    }
}
