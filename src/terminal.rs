use std::io;
use std::os::fd::AsFd;
use std::sync::{Arc, Mutex};

use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub columns: u16,
}

/// Local terminal operations used by the shim.
pub trait Terminal: Send + Sync + 'static {
    /// Whatever is needed to undo `enter_raw`.
    type Saved: Send + 'static;

    fn enter_raw(&self) -> io::Result<Self::Saved>;
    fn restore(&self, saved: &Self::Saved) -> io::Result<()>;
    fn window_size(&self) -> io::Result<WindowSize>;
}

/// The shim's own stdin, which is the terminal when one is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinTerminal;

impl Terminal for StdinTerminal {
    type Saved = Termios;

    fn enter_raw(&self) -> io::Result<Termios> {
        let stdin = io::stdin();
        let original = tcgetattr(stdin.as_fd())?;
        let mut raw = original.clone();
        cfmakeraw(&mut raw);
        tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)?;
        Ok(original)
    }

    fn restore(&self, saved: &Termios) -> io::Result<()> {
        tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, saved)?;
        Ok(())
    }

    fn window_size(&self) -> io::Result<WindowSize> {
        if !atty::is(atty::Stream::Stdin) {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        }
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut ws) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(WindowSize {
            rows: ws.ws_row,
            columns: ws.ws_col,
        })
    }
}

/// Saved terminal state shared by a token and the panic-time restore hook.
/// Whichever side takes it first performs the restore.
struct SavedState<T: Terminal> {
    terminal: Arc<T>,
    saved: Mutex<Option<T::Saved>>,
}

trait RestoreOnce: Send + Sync {
    fn restore_once(&self) -> bool;
}

impl<T: Terminal> RestoreOnce for SavedState<T> {
    fn restore_once(&self) -> bool {
        let saved = self
            .saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(saved) = saved else {
            return false;
        };
        match self.terminal.restore(&saved) {
            Ok(()) => tracing::debug!("terminal restored"),
            Err(e) => tracing::warn!(error = %e, "failed to restore terminal"),
        }
        true
    }
}

// The raw-mode state of this process, if any. Read by the panic hook, which
// runs even when panics abort and no destructor does.
static ACTIVE: Mutex<Option<Arc<dyn RestoreOnce>>> = Mutex::new(None);

/// Restore the terminal held by a live [`RawTerminalToken`] from a panic
/// hook. Returns whether a restore was performed.
pub fn restore_after_panic() -> bool {
    let active = ACTIVE.lock().unwrap_or_else(|e| e.into_inner()).take();
    active.is_some_and(|state| state.restore_once())
}

/// Ownership of "the local terminal is in raw mode".
///
/// The saved state is restored exactly once: by `release` on the normal path,
/// by `Drop` on any other path, or by [`restore_after_panic`].
pub struct RawTerminalToken<T: Terminal> {
    state: Arc<SavedState<T>>,
}

impl<T: Terminal> RawTerminalToken<T> {
    pub fn acquire(terminal: Arc<T>) -> io::Result<Self> {
        let saved = terminal.enter_raw()?;
        tracing::debug!("terminal switched to raw mode");
        let state = Arc::new(SavedState {
            terminal,
            saved: Mutex::new(Some(saved)),
        });
        *ACTIVE.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(RawTerminalToken { state })
    }

    pub fn release(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        self.state.restore_once();
        let mut active = ACTIVE.lock().unwrap_or_else(|e| e.into_inner());
        let ours = active
            .as_ref()
            .is_some_and(|a| Arc::as_ptr(a) as *const () == Arc::as_ptr(&self.state) as *const ());
        if ours {
            *active = None;
        }
    }
}

impl<T: Terminal> Drop for RawTerminalToken<T> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Serialises unit tests that touch the process-wide raw-mode registration.
#[cfg(test)]
pub(crate) fn serial() -> std::sync::MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}
