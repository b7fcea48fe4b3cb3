//! Runtime support for compiled programs.
//!
//! - **string**: `RtString` and the total `rt_*` string primitives
//! - **trap**: fatal runtime errors

pub mod string;
pub mod trap;

pub use string::*;
pub use trap::{trap, TRAP_EXIT_CODE};
