//! Terminal session
//!
//! Scoped ownership of the controlling terminal. Creating a
//! [`TerminalSession`] puts the terminal into raw mode with VT output
//! interpretation enabled; dropping it puts the saved mode back.
//!
//! Restoration is guaranteed on every exit path the OS lets us observe.
//! Normal drop and unwinding panics go through `Drop`; runtime traps,
//! termination signals and aborting panics run the session's restore hook
//! (see [`crate::core::restore`]).

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::restore::{self, HookId};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("standard streams are not attached to a terminal")]
    NotATerminal,

    #[error("terminal refused the mode change")]
    PermissionDenied,

    #[error("terminal mode control is not supported on this platform")]
    PlatformUnsupported,

    #[error("terminal is already owned by another session")]
    AlreadyAcquired,

    #[error("interrupted by a signal")]
    Interrupted,

    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Raw OS handle of a terminal stream.
#[cfg(unix)]
pub type RawStream = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawStream = std::os::windows::io::RawHandle;

/// Identity of a terminal device, used to refuse nested sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey(pub u64, pub u64);

/// Platform operations a session needs.
///
/// [`enter`](Backend::enter) must be all-or-nothing: on error the
/// terminal is left exactly as it was.
pub trait Backend: Send + Sync + 'static {
    /// Everything needed to put the terminal back.
    type Mode: Clone + Send + 'static;

    fn device_key(&self) -> io::Result<DeviceKey>;
    fn is_tty(&self) -> bool;
    /// Save the current mode, switch to raw + VT mode, return the saved mode.
    fn enter(&self) -> Result<Self::Mode>;
    fn restore(&self, saved: &Self::Mode) -> io::Result<()>;
    fn size(&self) -> io::Result<(u16, u16)>;
    fn input(&self) -> RawStream;
    fn output(&self) -> RawStream;
    fn write(&self, bytes: &[u8]) -> io::Result<()>;
    fn flush(&self) -> io::Result<()>;

    /// Whether `enter` had to switch VT output processing on itself.
    fn vt_output_enabled_by_session(_saved: &Self::Mode) -> bool {
        false
    }
}

static ACQUIRED: Mutex<Option<HashSet<DeviceKey>>> = Mutex::new(None);

fn acquire(key: DeviceKey) -> Result<()> {
    let mut acquired = ACQUIRED.lock().unwrap_or_else(|e| e.into_inner());
    if !acquired.get_or_insert_with(HashSet::new).insert(key) {
        return Err(SessionError::AlreadyAcquired);
    }
    Ok(())
}

fn release(key: DeviceKey) {
    let mut acquired = ACQUIRED.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(set) = acquired.as_mut() {
        set.remove(&key);
    }
}

/// Restore a saved mode, reporting failures on stderr.
fn restore_logged<B: Backend>(backend: &B, saved: &B::Mode) {
    if let Err(e) = backend.restore(saved) {
        warn!("Failed to restore terminal mode: {}", e);
        eprintln!("vipertui: failed to restore terminal mode: {}", e);
    }
}

/// A terminal in raw mode, restored when dropped.
pub struct TerminalSession<B: Backend = super::console::NativeBackend> {
    backend: Arc<B>,
    saved: B::Mode,
    key: DeviceKey,
    hook: HookId,
    #[cfg(unix)]
    _signals: Option<restore::SignalGuard>,
}

impl TerminalSession {
    /// Acquire the terminal attached to the standard streams.
    pub fn open() -> Result<Self> {
        let backend = super::console::NativeBackend::stdio()?;
        Self::with_backend(backend)
    }

    /// Build an event pump reading this session's input.
    pub fn event_pump(
        &self,
        config: crate::ui::PumpConfig,
    ) -> Result<crate::ui::EventPump<super::input::TtyInput>> {
        let source = super::input::TtyInput::new(self.backend.as_ref())?;
        Ok(crate::ui::EventPump::new(source, config))
    }
}

impl<B: Backend> TerminalSession<B> {
    /// Acquire the terminal through an explicit backend.
    pub fn with_backend(backend: B) -> Result<Self> {
        if !backend.is_tty() {
            return Err(SessionError::NotATerminal);
        }
        let key = backend.device_key()?;
        acquire(key)?;

        let saved = match backend.enter() {
            Ok(saved) => saved,
            Err(e) => {
                release(key);
                return Err(e);
            }
        };
        debug!("Terminal switched to raw mode");

        let backend = Arc::new(backend);
        let hook = {
            let backend = backend.clone();
            let saved = saved.clone();
            restore::register(move || restore_logged(backend.as_ref(), &saved))
        };

        #[cfg(unix)]
        let signals = match restore::SignalGuard::new() {
            Ok(guard) => Some(guard),
            Err(e) => {
                // Signals still terminate the process; the panic hook and
                // trap paths keep working.
                warn!("Failed to watch termination signals: {}", e);
                None
            }
        };

        info!("Terminal session acquired");
        Ok(Self {
            backend,
            saved,
            key,
            hook,
            #[cfg(unix)]
            _signals: signals,
        })
    }

    pub fn input_fd(&self) -> RawStream {
        self.backend.input()
    }

    pub fn output_fd(&self) -> RawStream {
        self.backend.output()
    }

    /// Terminal size as (cols, rows).
    pub fn size(&self) -> Result<(u16, u16)> {
        Ok(self.backend.size()?)
    }

    pub fn is_tty(&self) -> bool {
        self.backend.is_tty()
    }

    /// True when the session itself turned VT output processing on.
    pub fn vt_output_enabled(&self) -> bool {
        B::vt_output_enabled_by_session(&self.saved)
    }

    /// Write VT output to the terminal.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        Ok(self.backend.write(bytes)?)
    }

    pub fn flush(&self) -> Result<()> {
        Ok(self.backend.flush()?)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> Drop for TerminalSession<B> {
    fn drop(&mut self) {
        #[cfg(unix)]
        drop(self._signals.take());

        if let Err(e) = self.backend.flush() {
            warn!("Failed to flush terminal output: {}", e);
        }
        // If the hook already ran (trap or signal), the terminal is
        // restored; restoring again is harmless.
        restore::unregister(self.hook);
        restore_logged(self.backend.as_ref(), &self.saved);
        release(self.key);
        info!("Terminal session released");
    }
}
