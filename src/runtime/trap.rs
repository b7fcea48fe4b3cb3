//! Runtime traps
//!
//! A trap is a fatal runtime error. The terminal is restored, a one-line
//! diagnostic goes to stderr and the process exits with status 134.

use std::io::{self, Write};

use tracing::error;

use crate::core::restore;

/// Exit status of a trapped process (128 + SIGABRT).
pub const TRAP_EXIT_CODE: i32 = 134;

/// Abort the program with `msg`. Never returns.
pub fn trap(msg: &str) -> ! {
    restore::run_hooks();
    error!(target: "vipertui::trap", "runtime trap: {}", msg);

    let line = diagnostic(msg);
    let mut stderr = io::stderr().lock();
    let _ = stderr.write_all(line.as_bytes());
    let _ = stderr.flush();
    std::process::exit(TRAP_EXIT_CODE)
}

/// The stderr line for a trap message, folded onto a single line.
fn diagnostic(msg: &str) -> String {
    let msg: String = msg
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!("vipertui: runtime trap: {}\n", msg)
}
