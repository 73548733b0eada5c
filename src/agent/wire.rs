//! Newline-delimited JSON messages exchanged with the agent.
//!
//! Each connection carries exactly one request line and one response line.
//! For `open_stream` an ok response turns the rest of the connection into the
//! raw byte stream that was asked for.

use serde::{Deserialize, Serialize};

use crate::config::ProcessIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    OpenStream {
        container_id: String,
        exec_id: String,
        stream: StreamKind,
    },
    CloseStdin {
        container_id: String,
        exec_id: String,
    },
    SignalProcess {
        container_id: String,
        exec_id: String,
        signal: i32,
    },
    TtyWinResize {
        container_id: String,
        exec_id: String,
        rows: u16,
        columns: u16,
    },
    WaitProcess {
        container_id: String,
        exec_id: String,
    },
}

impl Request {
    pub fn open_stream(id: &ProcessIdentity, stream: StreamKind) -> Self {
        Request::OpenStream {
            container_id: id.container_id.clone(),
            exec_id: id.exec_id.clone(),
            stream,
        }
    }

    pub fn close_stdin(id: &ProcessIdentity) -> Self {
        Request::CloseStdin {
            container_id: id.container_id.clone(),
            exec_id: id.exec_id.clone(),
        }
    }

    pub fn signal_process(id: &ProcessIdentity, signal: i32) -> Self {
        Request::SignalProcess {
            container_id: id.container_id.clone(),
            exec_id: id.exec_id.clone(),
            signal,
        }
    }

    pub fn tty_win_resize(id: &ProcessIdentity, rows: u16, columns: u16) -> Self {
        Request::TtyWinResize {
            container_id: id.container_id.clone(),
            exec_id: id.exec_id.clone(),
            rows,
            columns,
        }
    }

    pub fn wait_process(id: &ProcessIdentity) -> Self {
        Request::WaitProcess {
            container_id: id.container_id.clone(),
            exec_id: id.exec_id.clone(),
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Request::OpenStream { .. } => "open_stream",
            Request::CloseStdin { .. } => "close_stdin",
            Request::SignalProcess { .. } => "signal_process",
            Request::TtyWinResize { .. } => "tty_win_resize",
            Request::WaitProcess { .. } => "wait_process",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

impl Response {
    pub fn ok() -> Self {
        Response {
            ok: true,
            ..Default::default()
        }
    }

    pub fn exited(status: i32) -> Self {
        Response {
            ok: true,
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Response {
            ok: false,
            error: Some(msg.into()),
            status: None,
        }
    }
}
