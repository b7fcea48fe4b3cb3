//! Library version.

use std::ffi::{c_char, CStr};

/// `MAJOR.MINOR.PATCH` from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const VERSION_NUL: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// The version as a C string.
pub fn version() -> &'static CStr {
    CStr::from_bytes_with_nul(VERSION_NUL.as_bytes()).unwrap_or_default()
}

/// C entry point returning a static NUL-terminated version string.
#[no_mangle]
pub extern "C" fn vipertui_version() -> *const c_char {
    version().as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_package() {
        assert_eq!(version().to_str().unwrap(), VERSION);
        assert_eq!(VERSION.split('.').count(), 3);
        let exported = unsafe { CStr::from_ptr(vipertui_version()) };
        assert_eq!(exported, version());
    }
}
