use std::sync::Arc;

use crate::agent::AgentClient;
use crate::config::ProcessIdentity;
use crate::errors::ShimError;

/// Final status of the remote process, exactly as the agent reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
}

pub struct ExitWaiter<A> {
    agent: Arc<A>,
    identity: ProcessIdentity,
}

impl<A: AgentClient> ExitWaiter<A> {
    pub fn new(agent: Arc<A>, identity: ProcessIdentity) -> Self {
        Self { agent, identity }
    }

    /// Block until the remote process has terminated. Not retried: a lost
    /// connection leaves no partial status to recover.
    pub async fn wait(&self) -> Result<ExitStatus, ShimError> {
        let code = self
            .agent
            .wait_process(&self.identity)
            .await
            .map_err(ShimError::Wait)?;
        tracing::info!(exitcode = code, "process exited");
        Ok(ExitStatus { code })
    }
}
