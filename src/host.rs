//! The shim's view of its own process: terminal, standard streams, signal
//! subscriptions and the out-of-band start signal.

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::signals::{HostSignals, SignalSource};
use crate::stdio::LocalStdio;
use crate::terminal::{StdinTerminal, Terminal};
use crate::tty::ResizeNotifier;

#[async_trait]
pub trait HostIo: Send + Sync + 'static {
    type Terminal: Terminal;
    type Signals: SignalSource;
    type Resize: ResizeNotifier;

    fn terminal(&self) -> Arc<Self::Terminal>;

    /// Called once per session.
    fn local_stdio(&self) -> LocalStdio;

    fn subscribe_signals(&self) -> io::Result<Self::Signals>;

    fn subscribe_resize(&self) -> io::Result<Self::Resize>;

    /// Block until an orchestrator tells the init process shim to proceed.
    async fn wait_for_start(&self) -> io::Result<()>;
}

/// Host side of a real shim process. The start signal is `SIGCONT`.
pub struct ProcessHost {
    terminal: Arc<StdinTerminal>,
    start_signal: Mutex<Option<Signal>>,
}

impl ProcessHost {
    /// `await_start` subscribes to the start signal right away so one sent
    /// before the session reaches its wait is not lost. Must be called from
    /// within the tokio runtime.
    pub fn new(await_start: bool) -> io::Result<Self> {
        let start_signal = if await_start {
            Some(signal(SignalKind::from_raw(libc::SIGCONT))?)
        } else {
            None
        };
        Ok(ProcessHost {
            terminal: Arc::new(StdinTerminal),
            start_signal: Mutex::new(start_signal),
        })
    }
}

#[async_trait]
impl HostIo for ProcessHost {
    type Terminal = StdinTerminal;
    type Signals = HostSignals;
    type Resize = Signal;

    fn terminal(&self) -> Arc<StdinTerminal> {
        self.terminal.clone()
    }

    fn local_stdio(&self) -> LocalStdio {
        LocalStdio::inherit()
    }

    fn subscribe_signals(&self) -> io::Result<HostSignals> {
        HostSignals::subscribe_all()
    }

    fn subscribe_resize(&self) -> io::Result<Signal> {
        signal(SignalKind::window_change())
    }

    async fn wait_for_start(&self) -> io::Result<()> {
        let pending = self
            .start_signal
            .lock()
            .map_err(|_| io::Error::other("start signal lock poisoned"))?
            .take();
        let mut start = match pending {
            Some(s) => s,
            None => signal(SignalKind::from_raw(libc::SIGCONT))?,
        };
        // No timeout: an orchestrator that never signals leaves the shim here.
        start
            .recv()
            .await
            .ok_or_else(|| io::Error::other("start signal stream closed"))
    }
}
