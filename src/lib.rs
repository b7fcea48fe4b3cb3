//! vipertui - terminal session, key input and runtime strings
//!
//! - [`core`]: scoped raw-mode terminal ownership with guaranteed restore
//! - [`ui`]: key decoding and the event pump delivering key events
//! - [`runtime`]: immutable runtime strings and fatal traps
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use vipertui::core::TerminalSession;
//! use vipertui::ui::{Event, PumpConfig};
//!
//! # fn main() -> Result<(), vipertui::core::SessionError> {
//! let session = TerminalSession::open()?;
//! let mut pump = session.event_pump(PumpConfig::default())?;
//! while let Some(event) = pump.poll(Some(Duration::from_secs(5)))? {
//!     if let Event::Key(key) = event {
//!         session.write(format!("{}\r\n", key).as_bytes())?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod runtime;
pub mod ui;
pub mod version;

pub use version::{version, VERSION};
