//! Keeps the remote terminal geometry in step with the local one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::agent::AgentClient;
use crate::config::ProcessIdentity;
use crate::terminal::Terminal;

/// Source of "the local terminal was resized" notifications.
#[async_trait]
pub trait ResizeNotifier: Send + 'static {
    /// Resolves on the next notification; `None` once no more can arrive.
    async fn notified(&mut self) -> Option<()>;
}

#[async_trait]
impl ResizeNotifier for tokio::signal::unix::Signal {
    async fn notified(&mut self) -> Option<()> {
        self.recv().await
    }
}

#[async_trait]
impl ResizeNotifier for mpsc::Receiver<()> {
    async fn notified(&mut self) -> Option<()> {
        self.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Resized { rows: u16, columns: u16 },
    NotATerminal,
    Failed,
}

pub struct TtyMonitor<A, T> {
    agent: Arc<A>,
    terminal: Arc<T>,
    identity: ProcessIdentity,
}

impl<A: AgentClient, T: Terminal> TtyMonitor<A, T> {
    pub fn new(agent: Arc<A>, terminal: Arc<T>, identity: ProcessIdentity) -> Self {
        Self {
            agent,
            terminal,
            identity,
        }
    }

    /// Push the current local geometry to the remote process.
    pub async fn resize_once(&self) -> ResizeOutcome {
        let size = match self.terminal.window_size() {
            Ok(size) => size,
            Err(e) => {
                tracing::info!(error = %e, "error getting size");
                return ResizeOutcome::NotATerminal;
            }
        };
        match self
            .agent
            .tty_win_resize(&self.identity, size.rows, size.columns)
            .await
        {
            Ok(()) => {
                tracing::debug!(rows = size.rows, columns = size.columns, "window resized");
                ResizeOutcome::Resized {
                    rows: size.rows,
                    columns: size.columns,
                }
            }
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "set winsize failed");
                ResizeOutcome::Failed
            }
        }
    }

    /// Resize once now, then again on every notification until the returned
    /// task is aborted or the notifier runs dry.
    pub async fn monitor<N: ResizeNotifier>(self, mut notifier: N) -> JoinHandle<()> {
        self.resize_once().await;
        tokio::spawn(
            async move {
                while notifier.notified().await.is_some() {
                    self.resize_once().await;
                }
            }
            .instrument(tracing::Span::current()),
        )
    }
}
