#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use agent_shim::agent::wire::{Request, Response, StreamKind};
use agent_shim::{AgentClient, HostIo, LocalStdio, ProcessIdentity, RemoteStdio, Terminal, WindowSize};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};

pub const STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    OpenStdio,
    StdinShutdown,
    CloseStdin,
    Signal(i32),
    Resize(u16, u16),
    Wait,
    RawMode,
    Restored,
    Flushed(&'static str),
}

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn push(&self, e: Event) {
        self.0.lock().unwrap().push(e);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, e: &Event) -> usize {
        self.events().iter().filter(|x| *x == e).count()
    }

    pub fn position(&self, e: &Event) -> Option<usize> {
        self.events().iter().position(|x| x == e)
    }

    pub fn last_position(&self, e: &Event) -> Option<usize> {
        self.events().iter().rposition(|x| x == e)
    }

    /// Poll until `pred` holds or `STEP` elapses.
    pub async fn wait_until<F: Fn(&[Event]) -> bool>(&self, pred: F) {
        let deadline = tokio::time::Instant::now() + STEP;
        loop {
            if pred(self.events().as_slice()) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("condition not reached; journal: {:?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn identity(container: &str, exec: &str) -> ProcessIdentity {
    ProcessIdentity::new(container, exec)
}

/// Writer that records shutdown in the journal and forwards everything else.
pub struct ShutdownRecorder {
    inner: DuplexStream,
    journal: Journal,
}

impl AsyncWrite for ShutdownRecorder {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let res = Pin::new(&mut self.inner).poll_shutdown(cx);
        if res.is_ready() {
            self.journal.push(Event::StdinShutdown);
        }
        res
    }
}

/// In-memory sink standing in for the shim's own stdout/stderr.
#[derive(Clone)]
pub struct Capture {
    name: &'static str,
    buf: Arc<Mutex<Vec<u8>>>,
    journal: Journal,
}

impl Capture {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Capture {
            name,
            buf: Arc::default(),
            journal: journal.clone(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for Capture {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.journal.push(Event::Flushed(self.name));
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Agent double. Every call is journalled before it is answered.
pub struct FakeAgent {
    journal: Journal,
    remote: Mutex<Option<RemoteStdio>>,
    wait: tokio::sync::Mutex<Option<oneshot::Receiver<Result<i32, String>>>>,
    pub fail_open: bool,
    pub fail_resize: bool,
    failing_signals: AtomicUsize,
}

impl FakeAgent {
    pub fn fail_next_signals(&self, n: usize) {
        self.failing_signals.store(n, Ordering::SeqCst);
    }
}

/// The agent-side ends of the fake's remote streams plus the wait result.
pub struct AgentControl {
    pub stdin: DuplexStream,
    pub stdout: Option<DuplexStream>,
    pub stderr: Option<DuplexStream>,
    pub wait: Option<oneshot::Sender<Result<i32, String>>>,
}

impl AgentControl {
    pub fn exit(&mut self, result: Result<i32, String>) {
        if let Some(tx) = self.wait.take() {
            let _ = tx.send(result);
        }
    }

    pub async fn write_stdout(&mut self, data: &[u8]) {
        self.stdout.as_mut().unwrap().write_all(data).await.unwrap();
    }

    pub async fn write_stderr(&mut self, data: &[u8]) {
        self.stderr.as_mut().unwrap().write_all(data).await.unwrap();
    }

    pub fn close_outputs(&mut self) {
        self.stdout = None;
        self.stderr = None;
    }

    /// Report `code` and close both output streams.
    pub fn finish(&mut self, code: i32) {
        self.exit(Ok(code));
        self.close_outputs();
    }

    pub async fn read_stdin(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        tokio::time::timeout(STEP, self.stdin.read_to_end(&mut out))
            .await
            .expect("remote stdin never closed")
            .unwrap();
        out
    }
}

pub fn fake_agent(journal: &Journal) -> (FakeAgent, AgentControl) {
    let (stdin_local, stdin_remote) = tokio::io::duplex(64 * 1024);
    let (stdout_local, stdout_remote) = tokio::io::duplex(64 * 1024);
    let (stderr_local, stderr_remote) = tokio::io::duplex(64 * 1024);
    let (wait_tx, wait_rx) = oneshot::channel();

    let remote = RemoteStdio {
        stdin: Box::new(ShutdownRecorder {
            inner: stdin_local,
            journal: journal.clone(),
        }),
        stdout: Box::new(stdout_local),
        stderr: Box::new(stderr_local),
    };
    let agent = FakeAgent {
        journal: journal.clone(),
        remote: Mutex::new(Some(remote)),
        wait: tokio::sync::Mutex::new(Some(wait_rx)),
        fail_open: false,
        fail_resize: false,
        failing_signals: AtomicUsize::new(0),
    };
    let ctl = AgentControl {
        stdin: stdin_remote,
        stdout: Some(stdout_remote),
        stderr: Some(stderr_remote),
        wait: Some(wait_tx),
    };
    (agent, ctl)
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn open_stdio(&self, _id: &ProcessIdentity) -> anyhow::Result<RemoteStdio> {
        self.journal.push(Event::OpenStdio);
        if self.fail_open {
            anyhow::bail!("stream refused");
        }
        self.remote
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("stdio already opened"))
    }

    async fn close_stdin(&self, _id: &ProcessIdentity) -> anyhow::Result<()> {
        self.journal.push(Event::CloseStdin);
        Ok(())
    }

    async fn signal_process(&self, _id: &ProcessIdentity, signal: i32) -> anyhow::Result<()> {
        self.journal.push(Event::Signal(signal));
        let failing = self.failing_signals.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_signals.store(failing - 1, Ordering::SeqCst);
            anyhow::bail!("process not found");
        }
        Ok(())
    }

    async fn tty_win_resize(&self, _id: &ProcessIdentity, rows: u16, columns: u16) -> anyhow::Result<()> {
        self.journal.push(Event::Resize(rows, columns));
        if self.fail_resize {
            anyhow::bail!("no tty");
        }
        Ok(())
    }

    async fn wait_process(&self, _id: &ProcessIdentity) -> anyhow::Result<i32> {
        self.journal.push(Event::Wait);
        let rx = self
            .wait
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("already waited"))?;
        match rx.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(msg)) => Err(anyhow::anyhow!(msg)),
            Err(_) => Err(anyhow::anyhow!("agent connection lost")),
        }
    }
}

pub struct FakeTerminal {
    journal: Journal,
    size: Mutex<Option<WindowSize>>,
    refuse_raw: bool,
}

impl FakeTerminal {
    pub fn set_size(&self, rows: u16, columns: u16) {
        *self.size.lock().unwrap() = Some(WindowSize { rows, columns });
    }
}

impl Terminal for FakeTerminal {
    type Saved = ();

    fn enter_raw(&self) -> io::Result<()> {
        if self.refuse_raw {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        }
        self.journal.push(Event::RawMode);
        Ok(())
    }

    fn restore(&self, _saved: &()) -> io::Result<()> {
        self.journal.push(Event::Restored);
        Ok(())
    }

    fn window_size(&self) -> io::Result<WindowSize> {
        self.size
            .lock()
            .unwrap()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOTTY))
    }
}

pub struct FakeHost {
    terminal: Arc<FakeTerminal>,
    stdio: Mutex<Option<LocalStdio>>,
    signals: Mutex<Option<mpsc::Receiver<i32>>>,
    resize: Mutex<Option<mpsc::Receiver<()>>>,
    start: Mutex<Option<oneshot::Receiver<()>>>,
}

pub struct HostControl {
    pub terminal: Arc<FakeTerminal>,
    pub stdin: Option<DuplexStream>,
    pub stdout: Capture,
    pub stderr: Capture,
    pub signals: mpsc::Sender<i32>,
    pub resize: mpsc::Sender<()>,
    pub start: Option<oneshot::Sender<()>>,
}

impl HostControl {
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    pub fn fire_start(&mut self) {
        if let Some(tx) = self.start.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct HostSetup {
    pub size: Option<WindowSize>,
    pub refuse_raw: bool,
    pub no_signals: bool,
}

pub fn fake_host(journal: &Journal, setup: HostSetup) -> (FakeHost, HostControl) {
    let terminal = Arc::new(FakeTerminal {
        journal: journal.clone(),
        size: Mutex::new(setup.size),
        refuse_raw: setup.refuse_raw,
    });
    let (stdin_writer, stdin_reader) = tokio::io::duplex(64 * 1024);
    let stdout = Capture::new("stdout", journal);
    let stderr = Capture::new("stderr", journal);
    let (sig_tx, sig_rx) = mpsc::channel(agent_shim::SIG_CHAN_SIZE);
    let (resize_tx, resize_rx) = mpsc::channel(8);
    let (start_tx, start_rx) = oneshot::channel();

    let host = FakeHost {
        terminal: terminal.clone(),
        stdio: Mutex::new(Some(LocalStdio {
            stdin: Box::new(stdin_reader),
            stdout: Box::new(stdout.clone()),
            stderr: Box::new(stderr.clone()),
        })),
        signals: Mutex::new(if setup.no_signals { None } else { Some(sig_rx) }),
        resize: Mutex::new(Some(resize_rx)),
        start: Mutex::new(Some(start_rx)),
    };
    let ctl = HostControl {
        terminal,
        stdin: Some(stdin_writer),
        stdout,
        stderr,
        signals: sig_tx,
        resize: resize_tx,
        start: Some(start_tx),
    };
    (host, ctl)
}

#[async_trait]
impl HostIo for FakeHost {
    type Terminal = FakeTerminal;
    type Signals = mpsc::Receiver<i32>;
    type Resize = mpsc::Receiver<()>;

    fn terminal(&self) -> Arc<FakeTerminal> {
        self.terminal.clone()
    }

    fn local_stdio(&self) -> LocalStdio {
        self.stdio.lock().unwrap().take().expect("local stdio taken twice")
    }

    fn subscribe_signals(&self) -> io::Result<mpsc::Receiver<i32>> {
        self.signals
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| io::Error::other("signals unavailable"))
    }

    fn subscribe_resize(&self) -> io::Result<mpsc::Receiver<()>> {
        self.resize
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| io::Error::other("resize unavailable"))
    }

    async fn wait_for_start(&self) -> io::Result<()> {
        let rx = self.start.lock().unwrap().take();
        match rx {
            Some(rx) => rx.await.map_err(|_| io::Error::other("start gate dropped")),
            None => Ok(()),
        }
    }
}

/// Behaviour of [`MockAgentServer`].
#[derive(Clone, Debug, Default)]
pub struct MockAgentSetup {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Answer this op with `ok: false`.
    pub reject_op: Option<&'static str>,
}

/// JSON-lines agent listening on a unix socket inside a temp dir.
pub struct MockAgentServer {
    pub socket: PathBuf,
    pub requests: Arc<Mutex<Vec<Request>>>,
    pub stdin: Arc<Mutex<Vec<u8>>>,
    _dir: tempfile::TempDir,
}

impl MockAgentServer {
    pub fn start(setup: MockAgentSetup) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).expect("bind agent socket");
        let requests: Arc<Mutex<Vec<Request>>> = Arc::default();
        let stdin: Arc<Mutex<Vec<u8>>> = Arc::default();

        let (reqs, input) = (requests.clone(), stdin.clone());
        tokio::spawn(async move {
            while let Ok((conn, _)) = listener.accept().await {
                tokio::spawn(serve_one(conn, setup.clone(), reqs.clone(), input.clone()));
            }
        });

        MockAgentServer {
            socket,
            requests,
            stdin,
            _dir: dir,
        }
    }

    pub fn address(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    pub fn path(&self) -> &Path {
        &self.socket
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.requests.lock().unwrap().iter().map(|r| r.op()).collect()
    }
}

async fn serve_one(
    conn: tokio::net::UnixStream,
    setup: MockAgentSetup,
    requests: Arc<Mutex<Vec<Request>>>,
    stdin: Arc<Mutex<Vec<u8>>>,
) {
    let mut conn = BufReader::new(conn);
    let mut line = String::new();
    match conn.read_line(&mut line).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }
    let req: Request = match serde_json::from_str(line.trim_end()) {
        Ok(r) => r,
        Err(_) => return,
    };
    requests.lock().unwrap().push(req.clone());

    let resp = if setup.reject_op == Some(req.op()) {
        Response::failed(format!("{} not allowed", req.op()))
    } else if let Request::WaitProcess { .. } = req {
        Response::exited(setup.exit_status)
    } else {
        Response::ok()
    };
    let mut out = serde_json::to_vec(&resp).unwrap();
    out.push(b'\n');
    if conn.write_all(&out).await.is_err() || !resp.ok {
        return;
    }

    if let Request::OpenStream { stream, .. } = req {
        match stream {
            StreamKind::Stdin => {
                let mut buf = Vec::new();
                let _ = conn.read_to_end(&mut buf).await;
                stdin.lock().unwrap().extend_from_slice(&buf);
            }
            StreamKind::Stdout => {
                let _ = conn.write_all(&setup.stdout).await;
            }
            StreamKind::Stderr => {
                let _ = conn.write_all(&setup.stderr).await;
            }
        }
    }
    let _ = conn.shutdown().await;
}
