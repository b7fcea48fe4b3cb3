//! Native terminal backends
//!
//! Unix drives the line discipline through termios. Windows toggles the
//! console input and output modes and, when needed, turns on VT
//! sequence processing.

#[cfg(unix)]
pub use unix::NativeBackend;
#[cfg(windows)]
pub use windows_console::NativeBackend;

#[cfg(unix)]
mod unix {
    use std::fs::File;
    use std::io::{self, Write};
    use std::os::fd::{AsFd, OwnedFd};
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;

    use crossterm::tty::IsTty;
    use nix::errno::Errno;
    use nix::sys::termios::{
        self, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices, Termios,
    };
    use tracing::{debug, warn};

    use crate::core::session::{Backend, DeviceKey, RawStream, Result, SessionError};

    /// The terminal behind stdin and stdout.
    ///
    /// Both streams are duplicated so the session never closes the
    /// process's own descriptors.
    pub struct NativeBackend {
        input: File,
        output: File,
    }

    impl NativeBackend {
        pub fn stdio() -> Result<Self> {
            let input = File::from(io::stdin().as_fd().try_clone_to_owned()?);
            let output = File::from(io::stdout().as_fd().try_clone_to_owned()?);
            Ok(Self { input, output })
        }

        /// A backend over explicit descriptors, such as one side of a pty.
        pub fn from_fds(input: OwnedFd, output: OwnedFd) -> Self {
            Self {
                input: File::from(input),
                output: File::from(output),
            }
        }

        /// A second handle on the input stream, for readers.
        pub fn clone_input(&self) -> io::Result<File> {
            self.input.try_clone()
        }
    }

    pub(crate) fn mode_error(errno: Errno) -> SessionError {
        match errno {
            Errno::ENOTTY | Errno::EBADF => SessionError::NotATerminal,
            // EIO: a background process group touching the terminal
            Errno::EPERM | Errno::EACCES | Errno::EIO => SessionError::PermissionDenied,
            Errno::ENOSYS => SessionError::PlatformUnsupported,
            Errno::EINTR => SessionError::Interrupted,
            other => SessionError::Io(other.into()),
        }
    }

    fn make_raw(termios: &mut Termios) {
        termios.local_flags.remove(
            LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG | LocalFlags::IEXTEN,
        );
        termios.input_flags.remove(InputFlags::IXON | InputFlags::ICRNL);
        termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    }

    fn is_raw(termios: &Termios) -> bool {
        !termios
            .local_flags
            .intersects(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG)
    }

    /// Save the current mode and switch to raw mode.
    ///
    /// `get` and `set` stand for tcgetattr and tcsetattr. Once the mode has
    /// been changed, any failure puts `saved` back before returning.
    fn enter_raw(
        mut get: impl FnMut() -> nix::Result<Termios>,
        mut set: impl FnMut(SetArg, &Termios) -> nix::Result<()>,
    ) -> Result<Termios> {
        let saved = get().map_err(mode_error)?;
        let mut raw = saved.clone();
        make_raw(&mut raw);
        set(SetArg::TCSAFLUSH, &raw).map_err(mode_error)?;

        // tcsetattr succeeds when any of the changes applied
        let err = match get() {
            Ok(applied) if is_raw(&applied) => return Ok(saved),
            Ok(_) => SessionError::PermissionDenied,
            Err(errno) => mode_error(errno),
        };
        if let Err(errno) = set(SetArg::TCSANOW, &saved) {
            warn!("Failed to roll back terminal mode: {}", errno);
            eprintln!("vipertui: failed to roll back terminal mode: {}", errno);
        }
        Err(err)
    }

    impl Backend for NativeBackend {
        type Mode = Termios;

        fn device_key(&self) -> io::Result<DeviceKey> {
            let meta = self.input.metadata()?;
            Ok(DeviceKey(meta.dev(), meta.ino()))
        }

        fn is_tty(&self) -> bool {
            self.input.is_tty() && self.output.is_tty()
        }

        fn enter(&self) -> Result<Termios> {
            let saved = enter_raw(
                || termios::tcgetattr(&self.input),
                |when, mode| termios::tcsetattr(&self.input, when, mode),
            )?;
            debug!(fd = self.input.as_raw_fd(), "termios raw mode applied");
            Ok(saved)
        }

        fn restore(&self, saved: &Termios) -> io::Result<()> {
            termios::tcsetattr(&self.input, SetArg::TCSAFLUSH, saved).map_err(io::Error::from)
        }

        fn size(&self) -> io::Result<(u16, u16)> {
            crossterm::terminal::size()
        }

        fn input(&self) -> RawStream {
            self.input.as_raw_fd()
        }

        fn output(&self) -> RawStream {
            self.output.as_raw_fd()
        }

        fn write(&self, bytes: &[u8]) -> io::Result<()> {
            (&self.output).write_all(bytes)
        }

        fn flush(&self) -> io::Result<()> {
            (&self.output).flush()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::restore::tests::serial;
        use crate::core::session::TerminalSession;
        use std::cell::RefCell;

        const VMIN: usize = SpecialCharacterIndices::VMIN as usize;
        const VTIME: usize = SpecialCharacterIndices::VTIME as usize;

        fn same_mode(a: &Termios, b: &Termios) -> bool {
            a.input_flags == b.input_flags
                && a.output_flags == b.output_flags
                && a.control_flags == b.control_flags
                && a.local_flags == b.local_flags
                && a.control_chars == b.control_chars
        }

        #[test]
        fn test_make_raw_clears_line_discipline() {
            // A pty gives us a real termios to work on
            let pty = nix::pty::openpty(None, None);
            let Ok(pty) = pty else { return };
            let mut t = termios::tcgetattr(&pty.slave).unwrap();
            make_raw(&mut t);
            assert!(is_raw(&t));
            assert!(!t.input_flags.contains(InputFlags::ICRNL));
            assert_eq!(t.control_chars[VMIN], 0);
        }

        #[test]
        fn test_session_on_pty_restores_mode() {
            let _guard = serial();
            let Ok(pty) = nix::pty::openpty(None, None) else { return };
            let watch = pty.slave.try_clone().unwrap();
            let before = termios::tcgetattr(&watch).unwrap();
            assert!(before.local_flags.contains(LocalFlags::ICANON));

            let backend = NativeBackend::from_fds(pty.slave.try_clone().unwrap(), pty.slave);
            let session = TerminalSession::with_backend(backend).unwrap();
            assert!(session.is_tty());

            let during = termios::tcgetattr(&watch).unwrap();
            assert!(!during
                .local_flags
                .intersects(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG));
            assert_eq!(during.control_chars[VMIN], 0);
            assert_eq!(during.control_chars[VTIME], 0);

            drop(session);
            let after = termios::tcgetattr(&watch).unwrap();
            assert!(same_mode(&after, &before));
            drop(pty.master);
        }

        #[test]
        fn test_failed_read_back_rolls_back() {
            let Ok(pty) = nix::pty::openpty(None, None) else { return };
            let cooked = termios::tcgetattr(&pty.slave).unwrap();

            let gets = RefCell::new(0);
            let sets = RefCell::new(Vec::new());
            let result = enter_raw(
                || {
                    *gets.borrow_mut() += 1;
                    if *gets.borrow() == 1 {
                        Ok(cooked.clone())
                    } else {
                        Err(Errno::EIO)
                    }
                },
                |when, mode| {
                    sets.borrow_mut().push((when, mode.clone()));
                    Ok(())
                },
            );

            assert!(matches!(result, Err(SessionError::PermissionDenied)));
            let sets = sets.into_inner();
            assert_eq!(sets.len(), 2);
            assert!(is_raw(&sets[0].1));
            assert_eq!(sets[1].0, SetArg::TCSANOW);
            assert!(same_mode(&sets[1].1, &cooked));
        }

        #[test]
        fn test_unapplied_mode_rolls_back() {
            let Ok(pty) = nix::pty::openpty(None, None) else { return };
            let cooked = termios::tcgetattr(&pty.slave).unwrap();

            let sets = RefCell::new(Vec::new());
            let result = enter_raw(
                || Ok(cooked.clone()),
                |_, mode| {
                    sets.borrow_mut().push(mode.clone());
                    Ok(())
                },
            );

            assert!(matches!(result, Err(SessionError::PermissionDenied)));
            let sets = sets.into_inner();
            assert_eq!(sets.len(), 2);
            assert!(same_mode(&sets[1], &cooked));
        }

        #[test]
        fn test_failed_mode_change_touches_nothing() {
            let Ok(pty) = nix::pty::openpty(None, None) else { return };
            let cooked = termios::tcgetattr(&pty.slave).unwrap();

            let sets = RefCell::new(0);
            let result = enter_raw(
                || Ok(cooked.clone()),
                |_, _| {
                    *sets.borrow_mut() += 1;
                    Err(Errno::EPERM)
                },
            );
            assert!(matches!(result, Err(SessionError::PermissionDenied)));
            assert_eq!(sets.into_inner(), 1);
        }

        #[test]
        fn test_errno_mapping() {
            assert!(matches!(mode_error(Errno::ENOTTY), SessionError::NotATerminal));
            assert!(matches!(mode_error(Errno::EPERM), SessionError::PermissionDenied));
            assert!(matches!(mode_error(Errno::ENOSYS), SessionError::PlatformUnsupported));
            assert!(matches!(mode_error(Errno::EINTR), SessionError::Interrupted));
            assert!(matches!(mode_error(Errno::ENOMEM), SessionError::Io(_)));
        }
    }
}

#[cfg(windows)]
mod windows_console {
    use std::io;
    use std::os::windows::io::RawHandle;

    use tracing::debug;
    use windows::core::HRESULT;
    use windows::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, HANDLE,
    };
    use windows::Win32::Storage::FileSystem::{FlushFileBuffers, WriteFile};
    use windows::Win32::System::Console::{
        GetConsoleCP, GetConsoleMode, GetConsoleScreenBufferInfo, GetStdHandle, SetConsoleCP,
        SetConsoleMode, CONSOLE_MODE, CONSOLE_SCREEN_BUFFER_INFO, ENABLE_ECHO_INPUT,
        ENABLE_LINE_INPUT, ENABLE_PROCESSED_INPUT, ENABLE_VIRTUAL_TERMINAL_INPUT,
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
    };

    use crate::core::session::{Backend, DeviceKey, RawStream, Result, SessionError};

    const UTF8_CODEPAGE: u32 = 65001;

    /// Console state saved on entry.
    #[derive(Debug, Clone, Copy)]
    pub struct ConsoleModes {
        input: CONSOLE_MODE,
        output: CONSOLE_MODE,
        codepage: u32,
        enabled_vt_input: bool,
        enabled_vt_output: bool,
    }

    /// The console attached to the process.
    pub struct NativeBackend {
        input: HANDLE,
        output: HANDLE,
    }

    // Console handles are process-wide and usable from any thread
    unsafe impl Send for NativeBackend {}
    unsafe impl Sync for NativeBackend {}

    impl NativeBackend {
        pub fn stdio() -> Result<Self> {
            unsafe {
                let input = GetStdHandle(STD_INPUT_HANDLE).map_err(|_| SessionError::NotATerminal)?;
                let output =
                    GetStdHandle(STD_OUTPUT_HANDLE).map_err(|_| SessionError::NotATerminal)?;
                Ok(Self { input, output })
            }
        }

        pub(crate) fn input_handle(&self) -> HANDLE {
            self.input
        }
    }

    fn mode_error(err: windows::core::Error) -> SessionError {
        let code = err.code();
        if code == HRESULT::from_win32(ERROR_ACCESS_DENIED.0) {
            SessionError::PermissionDenied
        } else if code == HRESULT::from_win32(ERROR_INVALID_HANDLE.0) {
            SessionError::NotATerminal
        } else if code == HRESULT::from_win32(ERROR_INVALID_PARAMETER.0) {
            // Consoles older than Windows 10 reject the VT flags
            SessionError::PlatformUnsupported
        } else {
            SessionError::Io(io::Error::from_raw_os_error(code.0 & 0xFFFF))
        }
    }

    fn console_mode(handle: HANDLE) -> Option<CONSOLE_MODE> {
        let mut mode = CONSOLE_MODE(0);
        unsafe { GetConsoleMode(handle, &mut mode).ok().map(|_| mode) }
    }

    const LINE_BITS: u32 = ENABLE_LINE_INPUT.0 | ENABLE_ECHO_INPUT.0 | ENABLE_PROCESSED_INPUT.0;

    impl Backend for NativeBackend {
        type Mode = ConsoleModes;

        fn device_key(&self) -> io::Result<DeviceKey> {
            // A process has at most one console
            Ok(DeviceKey(0, 0))
        }

        fn is_tty(&self) -> bool {
            console_mode(self.input).is_some() && console_mode(self.output).is_some()
        }

        fn enter(&self) -> Result<ConsoleModes> {
            let input = console_mode(self.input).ok_or(SessionError::NotATerminal)?;
            let output = console_mode(self.output).ok_or(SessionError::NotATerminal)?;
            let codepage = unsafe { GetConsoleCP() };

            let enabled_vt_input = input.0 & ENABLE_VIRTUAL_TERMINAL_INPUT.0 == 0;
            let enabled_vt_output = output.0 & ENABLE_VIRTUAL_TERMINAL_PROCESSING.0 == 0;

            let raw_input = (input.0 & !LINE_BITS) | ENABLE_VIRTUAL_TERMINAL_INPUT.0;
            unsafe {
                SetConsoleMode(self.input, CONSOLE_MODE(raw_input)).map_err(mode_error)?;
            }

            let vt_output = output.0 | ENABLE_VIRTUAL_TERMINAL_PROCESSING.0;
            if let Err(e) = unsafe { SetConsoleMode(self.output, CONSOLE_MODE(vt_output)) } {
                unsafe {
                    let _ = SetConsoleMode(self.input, input);
                }
                return Err(mode_error(e));
            }

            if codepage != UTF8_CODEPAGE {
                unsafe {
                    let _ = SetConsoleCP(UTF8_CODEPAGE);
                }
            }

            debug!(enabled_vt_input, enabled_vt_output, "console raw mode applied");
            Ok(ConsoleModes {
                input,
                output,
                codepage,
                enabled_vt_input,
                enabled_vt_output,
            })
        }

        fn restore(&self, saved: &ConsoleModes) -> io::Result<()> {
            let mut result = Ok(());

            // Put back the line discipline; drop only the VT flags we added
            let current = console_mode(self.input).unwrap_or(saved.input);
            let mut input = (current.0 & !LINE_BITS) | (saved.input.0 & LINE_BITS);
            if saved.enabled_vt_input {
                input &= !ENABLE_VIRTUAL_TERMINAL_INPUT.0;
            }
            if let Err(e) = unsafe { SetConsoleMode(self.input, CONSOLE_MODE(input)) } {
                result = Err(io::Error::from(e));
            }

            if saved.enabled_vt_output {
                let current = console_mode(self.output).unwrap_or(saved.output);
                let output = current.0 & !ENABLE_VIRTUAL_TERMINAL_PROCESSING.0;
                if let Err(e) = unsafe { SetConsoleMode(self.output, CONSOLE_MODE(output)) } {
                    if result.is_ok() {
                        result = Err(io::Error::from(e));
                    }
                }
            }

            unsafe {
                let _ = SetConsoleCP(saved.codepage);
            }
            result
        }

        fn size(&self) -> io::Result<(u16, u16)> {
            let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
            unsafe { GetConsoleScreenBufferInfo(self.output, &mut info)? };
            let cols = (info.srWindow.Right - info.srWindow.Left + 1).max(0) as u16;
            let rows = (info.srWindow.Bottom - info.srWindow.Top + 1).max(0) as u16;
            Ok((cols, rows))
        }

        fn input(&self) -> RawStream {
            self.input.0 as RawHandle
        }

        fn output(&self) -> RawStream {
            self.output.0 as RawHandle
        }

        fn write(&self, bytes: &[u8]) -> io::Result<()> {
            let mut rest = bytes;
            while !rest.is_empty() {
                let mut written = 0u32;
                unsafe { WriteFile(self.output, Some(rest), Some(&mut written), None)? };
                if written == 0 {
                    return Err(io::ErrorKind::WriteZero.into());
                }
                rest = &rest[written as usize..];
            }
            Ok(())
        }

        fn flush(&self) -> io::Result<()> {
            // Console handles are unbuffered; FlushFileBuffers fails on them
            let _ = unsafe { FlushFileBuffers(self.output) };
            Ok(())
        }

        fn vt_output_enabled_by_session(saved: &ConsoleModes) -> bool {
            saved.enabled_vt_output
        }
    }
}
