//! Terminal ownership and raw input.
//!
//! - **session**: `TerminalSession`, scoped raw mode with guaranteed restore
//! - **console**: native backends (termios on Unix, console modes on Windows)
//! - **input**: cancellable waits on the terminal input stream
//! - **restore**: process-wide restore hooks for panics, traps and signals
//!
//! # Architecture
//!
//! ```text
//! TerminalSession
//! ├── Backend (NativeBackend: termios / console modes)
//! ├── restore hook (panic hook, signal thread, trap)
//! └── event_pump() → EventPump<TtyInput>
//!                    └── CancelHandle (self-pipe / event object)
//! ```

pub mod console;
pub mod input;
pub mod restore;
pub mod session;

pub use input::{CancelHandle, InputSource, Readiness, TtyInput};
pub use session::{Backend, DeviceKey, RawStream, SessionError, TerminalSession};
