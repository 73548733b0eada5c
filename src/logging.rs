//! Structured logging for the shim.
//!
//! stdout and stderr belong to the proxied process, so log records are only
//! ever written to `--log-file`; without one they are discarded. Every record
//! emitted inside the session span carries the `container` and `exec_id`
//! fields.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{LogLevel, ProcessIdentity};

pub const SHIM_NAME: &str = "agent-shim";

static INIT: OnceCell<()> = OnceCell::new();

fn make_writer(log_file: Option<&Path>) -> BoxMakeWriter {
    let Some(path) = log_file else {
        return BoxMakeWriter::new(std::io::sink);
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => BoxMakeWriter::new(Mutex::new(f)),
        Err(e) => {
            // Proxying has not started yet, so stderr is still ours.
            eprintln!(
                "{SHIM_NAME}: cannot open log file {}: {e}; logging disabled",
                path.display()
            );
            BoxMakeWriter::new(std::io::sink)
        }
    }
}

/// Install the global subscriber. Returns false when one was already set.
pub fn init_logger(level: LogLevel, log_file: Option<&Path>) -> bool {
    if INIT.get().is_some() {
        return false;
    }

    let filter = EnvFilter::default().add_directive(level.level_filter().into());
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer(log_file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed {
        let _ = INIT.set(());
    }
    installed
}

/// Root span binding the identity of the proxied process.
///
/// Created at ERROR level so it stays enabled under every `--log` filter and
/// its fields reach each record.
pub fn session_span(identity: &ProcessIdentity) -> tracing::Span {
    tracing::error_span!(
        "shim",
        name = SHIM_NAME,
        pid = std::process::id(),
        source = "shim",
        container = %identity.container_id,
        exec_id = %identity.exec_id,
    )
}

/// Last-resort diagnostic for panics on any thread.
///
/// The terminal is put back first since release builds abort on panic and no
/// destructor runs. The record only goes to the log: stderr belongs to the
/// proxied process. With `crash_on_error` the process aborts right after
/// logging so the kernel can write a core dump.
pub fn install_panic_hook(crash_on_error: bool) {
    std::panic::set_hook(Box::new(move |info| {
        let restored = crate::terminal::restore_after_panic();
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(
            panic = %info,
            backtrace = %backtrace,
            terminal_restored = restored,
            "fatal error"
        );
        if crash_on_error {
            std::process::abort();
        }
    }));
}
