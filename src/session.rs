//! Lifecycle of one shim session.
//!
//! ```text
//! Created -> Connected -> (AwaitingStart) -> Running -> Draining -> Terminated
//! ```
//!
//! `AwaitingStart` is only entered for a container's init process. The raw
//! terminal token taken on the way into `Running` is released on every path
//! out of it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::agent::AgentClient;
use crate::config::ProcessIdentity;
use crate::errors::ShimError;
use crate::exit::{ExitStatus, ExitWaiter};
use crate::host::HostIo;
use crate::signals::SignalForwarder;
use crate::stdio::StdioProxy;
use crate::terminal::RawTerminalToken;
use crate::tty::TtyMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connected,
    AwaitingStart,
    Running,
    Draining,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// A terminal is attached and must be put in raw mode.
    pub terminal: bool,
    /// Exit with the remote exit code when it is non-zero.
    pub proxy_exit_code: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            terminal: false,
            proxy_exit_code: true,
        }
    }
}

pub struct ShimSession<A, H> {
    identity: ProcessIdentity,
    options: SessionOptions,
    agent: Arc<A>,
    host: H,
    state: watch::Sender<SessionState>,
}

impl<A: AgentClient, H: HostIo> ShimSession<A, H> {
    /// Session around an agent that is already connected.
    pub fn new(identity: ProcessIdentity, options: SessionOptions, agent: Arc<A>, host: H) -> Self {
        let (state, _) = watch::channel(SessionState::Connected);
        Self::with_state(identity, options, agent, host, state)
    }

    fn with_state(
        identity: ProcessIdentity,
        options: SessionOptions,
        agent: Arc<A>,
        host: H,
        state: watch::Sender<SessionState>,
    ) -> Self {
        state.send_replace(SessionState::Connected);
        ShimSession {
            identity,
            options,
            agent,
            host,
            state,
        }
    }

    /// Dial the agent and build a session around it. Failing to connect is
    /// fatal.
    pub async fn connect<F>(
        identity: ProcessIdentity,
        options: SessionOptions,
        host: H,
        dial: F,
    ) -> Result<Self, ShimError>
    where
        F: Future<Output = anyhow::Result<A>>,
    {
        let (state, _) = watch::channel(SessionState::Created);
        Self::connect_observed(identity, options, host, dial, state).await
    }

    /// Like [`connect`](Self::connect), publishing every state from `Created`
    /// onwards on `state`.
    pub async fn connect_observed<F>(
        identity: ProcessIdentity,
        options: SessionOptions,
        host: H,
        dial: F,
        state: watch::Sender<SessionState>,
    ) -> Result<Self, ShimError>
    where
        F: Future<Output = anyhow::Result<A>>,
    {
        state.send_replace(SessionState::Created);
        tracing::debug!(state = ?SessionState::Created, "connecting to agent");
        let agent = dial.await.map_err(ShimError::Connect)?;
        Ok(Self::with_state(identity, options, Arc::new(agent), host, state))
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn enter(&self, next: SessionState) {
        tracing::debug!(state = ?next, "session state");
        self.state.send_replace(next);
    }

    /// Run the session to completion.
    ///
    /// `Ok` carries the remote exit status. Setup failures and a failed wait
    /// come back as `Err`; in both cases the terminal has been restored.
    pub async fn run(self) -> Result<ExitStatus, ShimError> {
        let result = self.run_inner().await;
        self.enter(SessionState::Terminated);
        result
    }

    async fn run_inner(&self) -> Result<ExitStatus, ShimError> {
        if self.identity.is_init_process() {
            self.enter(SessionState::AwaitingStart);
            tracing::info!("waiting for start signal");
            self.host
                .wait_for_start()
                .await
                .map_err(ShimError::StartGate)?;
        }

        // Dropped (and thereby restored) on every early return below.
        let token = if self.options.terminal {
            Some(RawTerminalToken::acquire(self.host.terminal()).map_err(ShimError::RawMode)?)
        } else {
            None
        };

        self.enter(SessionState::Running);

        let tty = TtyMonitor::new(
            self.agent.clone(),
            self.host.terminal(),
            self.identity.clone(),
        );
        let resize_task = match self.host.subscribe_resize() {
            Ok(notifier) => Some(tty.monitor(notifier).await),
            Err(e) => {
                tracing::warn!(error = %e, "cannot watch terminal resizes");
                tty.resize_once().await;
                None
            }
        };

        let drain = match StdioProxy::new(self.agent.clone(), self.identity.clone())
            .start(self.host.local_stdio())
            .await
        {
            Ok(d) => d,
            Err(e) => {
                if let Some(t) = resize_task {
                    t.abort();
                }
                return Err(e);
            }
        };

        let forwarder = match self.host.subscribe_signals() {
            Ok(source) => {
                Some(SignalForwarder::new(self.agent.clone(), self.identity.clone()).spawn(source))
            }
            Err(e) => {
                tracing::warn!(error = %e, "signal forwarding disabled");
                None
            }
        };

        let waited = ExitWaiter::new(self.agent.clone(), self.identity.clone())
            .wait()
            .await;

        self.enter(SessionState::Draining);
        drain.wait().await;
        if let Some(f) = forwarder {
            f.stop().await;
        }
        if let Some(t) = resize_task {
            t.abort();
        }
        if let Some(t) = token {
            t.release();
        }

        waited
    }
}
