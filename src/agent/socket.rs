use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

use super::wire::{Request, Response, StreamKind};
use super::{AgentClient, RemoteStdio};
use crate::config::ProcessIdentity;

/// Where the agent listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    /// Accepts `unix:///path`, `tcp://host:port` or a bare absolute socket path.
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        if addr.starts_with('/') {
            return Ok(Endpoint::Unix(PathBuf::from(addr)));
        }
        let url = url::Url::parse(addr).with_context(|| format!("invalid agent address {addr:?}"))?;
        match url.scheme() {
            "unix" => {
                if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
                    bail!("agent address {addr:?} names host {host:?}; use unix:///absolute/path");
                }
                let path = url.path();
                if path.is_empty() || path == "/" {
                    bail!("agent address {addr:?} has no socket path");
                }
                Ok(Endpoint::Unix(PathBuf::from(path)))
            }
            "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| anyhow!("agent address {addr:?} has no host"))?;
                let port = url
                    .port()
                    .ok_or_else(|| anyhow!("agent address {addr:?} has no port"))?;
                Ok(Endpoint::Tcp(format!("{host}:{port}")))
            }
            other => bail!("unsupported agent address scheme {other:?} in {addr:?}"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(p) => write!(f, "unix://{}", p.display()),
            Endpoint::Tcp(hp) => write!(f, "tcp://{hp}"),
        }
    }
}

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

type Conn = BufReader<Box<dyn Io>>;

/// Agent client speaking the JSON-lines protocol, one connection per call.
#[derive(Debug, Clone)]
pub struct SocketAgent {
    endpoint: Endpoint,
}

impl SocketAgent {
    /// Parse `addr` and make sure the agent accepts connections.
    pub async fn connect(addr: &str) -> Result<Self> {
        let agent = SocketAgent {
            endpoint: Endpoint::parse(addr)?,
        };
        // Probe only; no request is sent on this connection.
        drop(agent.dial().await?);
        tracing::debug!(endpoint = %agent.endpoint, "agent reachable");
        Ok(agent)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn dial(&self) -> Result<Box<dyn Io>> {
        let io: Box<dyn Io> = match &self.endpoint {
            Endpoint::Unix(path) => Box::new(
                UnixStream::connect(path)
                    .await
                    .with_context(|| format!("dial {}", self.endpoint))?,
            ),
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .with_context(|| format!("dial {}", self.endpoint))?;
                let _ = stream.set_nodelay(true);
                Box::new(stream)
            }
        };
        Ok(io)
    }

    /// Send one request and read its response line. The connection is
    /// returned so that stream-opening calls can keep using it.
    async fn call(&self, req: &Request) -> Result<(Response, Conn)> {
        let mut line = serde_json::to_vec(req).context("encode request")?;
        line.push(b'\n');

        let mut conn = BufReader::new(self.dial().await?);
        conn.write_all(&line)
            .await
            .with_context(|| format!("send {}", req.op()))?;
        conn.flush().await?;

        let mut resp_line = String::new();
        let n = conn
            .read_line(&mut resp_line)
            .await
            .with_context(|| format!("read {} response", req.op()))?;
        if n == 0 {
            bail!("agent closed the connection before answering {}", req.op());
        }
        let resp: Response = serde_json::from_str(resp_line.trim_end())
            .with_context(|| format!("decode {} response", req.op()))?;
        if !resp.ok {
            bail!(
                "{} rejected by agent: {}",
                req.op(),
                resp.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok((resp, conn))
    }

    async fn open_stream(&self, id: &ProcessIdentity, kind: StreamKind) -> Result<Conn> {
        let (_, conn) = self
            .call(&Request::open_stream(id, kind))
            .await
            .with_context(|| format!("open {kind:?} stream"))?;
        Ok(conn)
    }
}

#[async_trait]
impl AgentClient for SocketAgent {
    async fn open_stdio(&self, id: &ProcessIdentity) -> Result<RemoteStdio> {
        let (stdin, stdout, stderr) = tokio::try_join!(
            self.open_stream(id, StreamKind::Stdin),
            self.open_stream(id, StreamKind::Stdout),
            self.open_stream(id, StreamKind::Stderr),
        )?;
        // BufReader passes writes straight through, and any bytes it already
        // buffered past the response line belong to the stream.
        Ok(RemoteStdio {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        })
    }

    async fn close_stdin(&self, id: &ProcessIdentity) -> Result<()> {
        self.call(&Request::close_stdin(id)).await?;
        Ok(())
    }

    async fn signal_process(&self, id: &ProcessIdentity, signal: i32) -> Result<()> {
        self.call(&Request::signal_process(id, signal)).await?;
        Ok(())
    }

    async fn tty_win_resize(&self, id: &ProcessIdentity, rows: u16, columns: u16) -> Result<()> {
        self.call(&Request::tty_win_resize(id, rows, columns)).await?;
        Ok(())
    }

    async fn wait_process(&self, id: &ProcessIdentity) -> Result<i32> {
        let (resp, _) = self.call(&Request::wait_process(id)).await?;
        resp.status
            .ok_or_else(|| anyhow!("wait_process response carries no status"))
    }
}
