//! Forwarding of host signals to the remote process.
//!
//! The shim subscribes to the whole catchable signal space, drops the kinds
//! in [`SIGNAL_IGNORE_SET`] and forwards everything else by number.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::{SigHandler, Signal};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::agent::AgentClient;
use crate::config::ProcessIdentity;

/// Buffer between the OS handlers and the forwarding loop.
pub const SIG_CHAN_SIZE: usize = 2048;

/// Signals that are never forwarded.
pub const SIGNAL_IGNORE_SET: [Signal; 6] = [
    Signal::SIGCHLD,
    Signal::SIGPIPE,
    Signal::SIGWINCH,
    Signal::SIGBUS,
    Signal::SIGSEGV,
    Signal::SIGABRT,
];

/// Told to the OS as "ignore" before subscribing.
const OS_DISCARDED: [Signal; 2] = [Signal::SIGCHLD, Signal::SIGPIPE];

// SIGKILL/SIGSTOP cannot be caught; tokio refuses SIGILL, SIGFPE and SIGSEGV;
// SIGBUS and SIGABRT keep their default action so real faults still crash.
const NOT_SUBSCRIBED: [Signal; 7] = [
    Signal::SIGKILL,
    Signal::SIGSTOP,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGABRT,
];

pub fn is_ignored(signo: i32) -> bool {
    SIGNAL_IGNORE_SET.iter().any(|s| *s as i32 == signo)
}

#[cfg(target_os = "linux")]
fn is_realtime(signo: i32) -> bool {
    (libc::SIGRTMIN()..=libc::SIGRTMAX()).contains(&signo)
}

#[cfg(not(target_os = "linux"))]
fn is_realtime(_signo: i32) -> bool {
    false
}

/// Map a raw event to an OS signal number, if it names one.
pub fn signal_number(raw: i32) -> Option<i32> {
    if Signal::try_from(raw).is_ok() || is_realtime(raw) {
        Some(raw)
    } else {
        None
    }
}

pub fn signal_name(signo: i32) -> String {
    match Signal::try_from(signo) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) if is_realtime(signo) => format!("SIGRT{signo}"),
        Err(_) => format!("signal {signo}"),
    }
}

/// Every signal number the host subscription listens to.
pub fn subscribable_signals() -> Vec<i32> {
    let mut out: Vec<i32> = Signal::iterator()
        .filter(|s| !NOT_SUBSCRIBED.contains(s) && !OS_DISCARDED.contains(s))
        .map(|s| s as i32)
        .collect();
    #[cfg(target_os = "linux")]
    out.extend(libc::SIGRTMIN()..=libc::SIGRTMAX());
    out
}

/// Stream of raw signal numbers delivered to the shim.
#[async_trait]
pub trait SignalSource: Send + 'static {
    /// Next delivered signal; `None` once the source is closed.
    async fn next_signal(&mut self) -> Option<i32>;
}

#[async_trait]
impl SignalSource for mpsc::Receiver<i32> {
    async fn next_signal(&mut self) -> Option<i32> {
        self.recv().await
    }
}

/// OS-level subscription to all catchable signals.
///
/// Dropping it unsubscribes: the per-signal listener tasks are aborted and
/// their tokio signal streams released.
pub struct HostSignals {
    events: mpsc::Receiver<i32>,
    listeners: Vec<JoinHandle<()>>,
}

impl HostSignals {
    /// Must be called from within the tokio runtime.
    pub fn subscribe_all() -> io::Result<Self> {
        for sig in OS_DISCARDED {
            unsafe { nix::sys::signal::signal(sig, SigHandler::SigIgn) }?;
        }

        let (tx, events) = mpsc::channel(SIG_CHAN_SIZE);
        let mut listeners = Vec::new();
        for signo in subscribable_signals() {
            let mut stream = match signal(SignalKind::from_raw(signo)) {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(signal = %signal_name(signo), error = %e, "cannot subscribe");
                    continue;
                }
            };
            let tx = tx.clone();
            listeners.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(signo).await.is_err() {
                        break;
                    }
                }
            }));
        }
        tracing::debug!(count = listeners.len(), "subscribed to host signals");
        Ok(HostSignals { events, listeners })
    }
}

impl Drop for HostSignals {
    fn drop(&mut self) {
        for l in &self.listeners {
            l.abort();
        }
    }
}

#[async_trait]
impl SignalSource for HostSignals {
    async fn next_signal(&mut self) -> Option<i32> {
        self.events.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Ignored,
    Unknown,
    Sent(i32),
    Failed(i32),
}

pub struct SignalForwarder<A> {
    agent: Arc<A>,
    identity: ProcessIdentity,
}

impl<A: AgentClient> SignalForwarder<A> {
    pub fn new(agent: Arc<A>, identity: ProcessIdentity) -> Self {
        Self { agent, identity }
    }

    /// Handle one received signal event.
    pub async fn forward(&self, raw: i32) -> Forwarded {
        if is_ignored(raw) {
            return Forwarded::Ignored;
        }
        let Some(signo) = signal_number(raw) else {
            tracing::error!(signal = raw, "unknown signal");
            return Forwarded::Unknown;
        };
        match self.agent.signal_process(&self.identity, signo).await {
            Ok(()) => {
                tracing::debug!(signal = %signal_name(signo), "signal forwarded");
                Forwarded::Sent(signo)
            }
            Err(e) => {
                tracing::error!(
                    signal = %signal_name(signo),
                    error = %format!("{e:#}"),
                    "forward signal failed"
                );
                Forwarded::Failed(signo)
            }
        }
    }

    /// Forward every event from `source` on a background task.
    pub fn spawn<S: SignalSource>(self, mut source: S) -> ForwarderHandle {
        let task = tokio::spawn(
            async move {
                while let Some(raw) = source.next_signal().await {
                    self.forward(raw).await;
                }
            }
            .instrument(tracing::Span::current()),
        );
        ForwarderHandle { task }
    }
}

/// Running forwarding loop; owns the signal subscription.
pub struct ForwarderHandle {
    task: JoinHandle<()>,
}

impl ForwarderHandle {
    /// Stop forwarding and drop the subscription.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
