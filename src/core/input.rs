//! Terminal input with cancellable waits
//!
//! [`TtyInput`] waits on the terminal and on a wake channel at the same
//! time. [`CancelHandle::cancel`] pokes the wake channel so a blocked
//! wait returns [`Readiness::Cancelled`] right away.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::session::Result;

/// Outcome of waiting for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Data,
    Timeout,
    Cancelled,
}

/// A byte source the event pump can wait on.
pub trait InputSource {
    /// Wait until input is readable. `None` waits forever.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Readiness>;

    /// Read whatever is available. May return 0 on a spurious wake-up.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn cancel_handle(&self) -> CancelHandle;
}

enum Waker {
    Flag,
    #[cfg(unix)]
    Pipe(std::os::unix::net::UnixStream),
    #[cfg(windows)]
    Event(event::EventHandle),
}

struct CancelState {
    cancelled: AtomicBool,
    waker: Waker,
}

/// Stops a pump from another thread.
///
/// Cancellation is sticky: every wait returns `Cancelled` until
/// [`reset`](CancelHandle::reset) is called.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    /// A handle with no wake channel; waits must check it themselves.
    pub fn new() -> Self {
        Self::with_waker(Waker::Flag)
    }

    fn with_waker(waker: Waker) -> Self {
        Self {
            inner: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                waker,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        match &self.inner.waker {
            Waker::Flag => {}
            #[cfg(unix)]
            Waker::Pipe(stream) => {
                use std::io::Write;
                // A full pipe already carries a pending wake-up
                let _ = (&*stream).write(&[1]);
            }
            #[cfg(windows)]
            Waker::Event(event) => event.set(),
        }
        tracing::debug!("input wait cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(unix)]
pub use unix::TtyInput;
#[cfg(windows)]
pub use windows_input::TtyInput;

#[cfg(unix)]
mod unix {
    use std::fs::File;
    use std::io::{self, Read};
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    use super::{CancelHandle, InputSource, Readiness, Waker};
    use crate::core::console::NativeBackend;
    use crate::core::session::{Result, SessionError};

    /// Terminal input plus the read end of the cancel pipe.
    pub struct TtyInput {
        tty: File,
        wake: UnixStream,
        cancel: CancelHandle,
    }

    impl TtyInput {
        pub fn new(backend: &NativeBackend) -> Result<Self> {
            let tty = backend.clone_input()?;
            let (wake, notify) = UnixStream::pair()?;
            wake.set_nonblocking(true)?;
            notify.set_nonblocking(true)?;
            Ok(Self {
                tty,
                wake,
                cancel: CancelHandle::with_waker(Waker::Pipe(notify)),
            })
        }

        fn drain_wake(&self) {
            let mut sink = [0u8; 64];
            while matches!((&self.wake).read(&mut sink), Ok(n) if n > 0) {}
        }
    }

    pub(super) fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
        match timeout {
            None => PollTimeout::NONE,
            Some(t) => {
                // Round up so a sub-millisecond remainder still sleeps
                let ms = (t.as_micros() + 999) / 1000;
                PollTimeout::from(ms.min(u16::MAX as u128) as u16)
            }
        }
    }

    impl InputSource for TtyInput {
        fn wait(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
            if self.cancel.is_cancelled() {
                self.drain_wake();
                return Ok(Readiness::Cancelled);
            }

            let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
            let (tty_events, wake_events) = {
                let mut fds = [
                    PollFd::new(self.tty.as_fd(), PollFlags::POLLIN),
                    PollFd::new(self.wake.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, poll_timeout(timeout)) {
                    Ok(0) => return Ok(Readiness::Timeout),
                    Ok(_) => {}
                    Err(Errno::EINTR) => return Err(SessionError::Interrupted),
                    Err(e) => return Err(SessionError::Io(e.into())),
                }
                (
                    fds[0].revents().unwrap_or(PollFlags::empty()),
                    fds[1].revents().unwrap_or(PollFlags::empty()),
                )
            };

            if wake_events.intersects(ready) || self.cancel.is_cancelled() {
                self.drain_wake();
                return Ok(Readiness::Cancelled);
            }
            if tty_events.contains(PollFlags::POLLIN) {
                Ok(Readiness::Data)
            } else if tty_events.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
                Err(SessionError::Io(io::ErrorKind::UnexpectedEof.into()))
            } else {
                Ok(Readiness::Timeout)
            }
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.tty.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(SessionError::Interrupted),
                Err(e) => Err(SessionError::Io(e)),
            }
        }

        fn cancel_handle(&self) -> CancelHandle {
            self.cancel.clone()
        }
    }

}

#[cfg(windows)]
mod event {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Threading::{CreateEventW, ResetEvent, SetEvent};

    /// Manual-reset event object owned by a cancel handle.
    pub struct EventHandle(HANDLE);

    // Event handles may be signalled from any thread
    unsafe impl Send for EventHandle {}
    unsafe impl Sync for EventHandle {}

    impl EventHandle {
        pub fn new() -> std::io::Result<Self> {
            let handle = unsafe { CreateEventW(None, true, false, None)? };
            Ok(Self(handle))
        }

        pub fn raw(&self) -> HANDLE {
            self.0
        }

        pub fn set(&self) {
            unsafe {
                let _ = SetEvent(self.0);
            }
        }

        pub fn reset(&self) {
            unsafe {
                let _ = ResetEvent(self.0);
            }
        }
    }

    impl Drop for EventHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

#[cfg(windows)]
mod windows_input {
    use std::io;
    use std::time::{Duration, Instant};

    use windows::Win32::Foundation::{HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
    use windows::Win32::Storage::FileSystem::ReadFile;
    use windows::Win32::System::Console::{
        PeekConsoleInputW, ReadConsoleInputW, INPUT_RECORD, KEY_EVENT,
    };
    use windows::Win32::System::Threading::{WaitForMultipleObjects, INFINITE};

    use super::event::EventHandle;
    use super::{CancelHandle, InputSource, Readiness, Waker};
    use crate::core::console::NativeBackend;
    use crate::core::session::{Result, SessionError};

    /// Console input plus the cancel event.
    pub struct TtyInput {
        input: HANDLE,
        cancel: CancelHandle,
    }

    impl TtyInput {
        pub fn new(backend: &NativeBackend) -> Result<Self> {
            let event = EventHandle::new()?;
            Ok(Self {
                input: backend.input_handle(),
                cancel: CancelHandle::with_waker(Waker::Event(event)),
            })
        }

        fn event(&self) -> HANDLE {
            match &self.cancel.inner.waker {
                Waker::Event(event) => event.raw(),
                _ => HANDLE::default(),
            }
        }

        fn clear_event(&self) {
            if let Waker::Event(event) = &self.cancel.inner.waker {
                event.reset();
            }
        }

        /// True if a ReadFile would return characters. Mouse, focus, resize
        /// and key-up records are discarded so they don't block the read.
        fn has_key_input(&self) -> io::Result<bool> {
            let mut records = [INPUT_RECORD::default(); 32];
            let mut count = 0u32;
            unsafe { PeekConsoleInputW(self.input, &mut records, &mut count)? };
            let count = count as usize;

            let has_char = records[..count].iter().any(|record| {
                record.EventType == KEY_EVENT as u16 && unsafe {
                    let key = record.Event.KeyEvent;
                    key.bKeyDown.as_bool() && key.uChar.UnicodeChar != 0
                }
            });
            if !has_char && count > 0 {
                let mut discarded = 0u32;
                unsafe { ReadConsoleInputW(self.input, &mut records[..count], &mut discarded)? };
            }
            Ok(has_char)
        }
    }

    impl InputSource for TtyInput {
        fn wait(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
            let deadline = timeout.map(|t| Instant::now() + t);
            loop {
                if self.cancel.is_cancelled() {
                    self.clear_event();
                    return Ok(Readiness::Cancelled);
                }

                let millis = match deadline {
                    None => INFINITE,
                    Some(deadline) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        ((left.as_micros() + 999) / 1000).min(u32::MAX as u128 - 1) as u32
                    }
                };
                let handles = [self.input, self.event()];
                let result = unsafe { WaitForMultipleObjects(&handles, false, millis) };

                if result == WAIT_TIMEOUT {
                    return Ok(Readiness::Timeout);
                } else if result.0 == WAIT_OBJECT_0.0 + 1 {
                    self.clear_event();
                    return Ok(Readiness::Cancelled);
                } else if result == WAIT_OBJECT_0 {
                    if self.has_key_input()? {
                        return Ok(Readiness::Data);
                    }
                } else {
                    return Err(SessionError::Io(io::Error::last_os_error()));
                }
            }
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let mut read = 0u32;
            unsafe { ReadFile(self.input, Some(buf), Some(&mut read), None).map_err(io::Error::from)? };
            Ok(read as usize)
        }

        fn cancel_handle(&self) -> CancelHandle {
            self.cancel.clone()
        }
    }
}
