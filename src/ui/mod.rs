//! Keyboard input for widgets.
//!
//! - **key**: `KeyEvent`, `KeyCode`, `Modifiers` and the UI `Event`
//! - **decoder**: byte stream to key events
//! - **keymapper**: key events back to xterm byte sequences
//! - **pump**: polls the terminal and delivers events
//!
//! # Data flow
//!
//! ```text
//! terminal bytes ─► EventPump ─► KeyDecoder ─► KeyEvent ─► Event ─► EventSink
//! ```

pub mod decoder;
pub mod key;
pub mod keymapper;
pub mod pump;

pub use decoder::KeyDecoder;
pub use key::{Event, KeyCode, KeyEvent, Modifiers};
pub use keymapper::KeyMapper;
pub use pump::{EventPump, EventSink, PumpConfig, DEFAULT_ESC_TIMEOUT};
