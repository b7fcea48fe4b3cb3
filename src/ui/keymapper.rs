//! Key mapping for terminal input
//!
//! Converts key events back to the VT sequences an xterm-compatible
//! terminal sends for them. This is the inverse of [`KeyDecoder`].
//!
//! [`KeyDecoder`]: super::decoder::KeyDecoder

use super::key::{KeyCode, KeyEvent, Modifiers};

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a key event to bytes, or `None` for keys with no encoding.
    pub fn map(event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = event.modifiers;

        match event.code {
            // Character keys
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            KeyCode::Enter => Some(Self::alt_prefixed(vec![0x0D], mods)),

            KeyCode::Backspace => Some(Self::alt_prefixed(vec![0x7F], mods)),

            KeyCode::Tab => {
                if mods.contains(Modifiers::SHIFT) {
                    Some(b"\x1b[Z".to_vec())
                } else {
                    Some(vec![0x09])
                }
            }

            KeyCode::Escape => Some(Self::alt_prefixed(vec![0x1B], mods)),

            // Arrow keys
            KeyCode::Up => Some(Self::letter_key(b'A', mods)),
            KeyCode::Down => Some(Self::letter_key(b'B', mods)),
            KeyCode::Right => Some(Self::letter_key(b'C', mods)),
            KeyCode::Left => Some(Self::letter_key(b'D', mods)),

            // Navigation keys
            KeyCode::Home => Some(Self::letter_key(b'H', mods)),
            KeyCode::End => Some(Self::letter_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            // Function keys
            KeyCode::F(n) => Self::function_key(n, mods),

            KeyCode::Unknown => event.raw.as_ref().map(|raw| raw.to_vec()),
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            let code = match ch {
                'a'..='z' => Some(ch as u8 - b'a' + 1),
                'A'..='Z' => Some(ch as u8 - b'A' + 1),
                '@' | '`' | ' ' => Some(0x00), // Ctrl+@ = NUL
                '\\' => Some(0x1C),            // Ctrl+\ = FS
                ']' => Some(0x1D),             // Ctrl+] = GS
                '^' | '~' => Some(0x1E),       // Ctrl+^ = RS
                '_' | '?' => Some(0x1F),       // Ctrl+_ = US
                _ => None,
            };
            if let Some(code) = code {
                return Self::alt_prefixed(vec![code], mods);
            }
        }

        let mut buf = [0u8; 4];
        let bytes = ch.encode_utf8(&mut buf).as_bytes().to_vec();
        if alt {
            Self::alt_prefixed(bytes, mods)
        } else {
            bytes
        }
    }

    /// Alt + key = ESC + key
    fn alt_prefixed(mut bytes: Vec<u8>, mods: Modifiers) -> Vec<u8> {
        if mods.contains(Modifiers::ALT) {
            bytes.insert(0, 0x1B);
        }
        bytes
    }

    /// Arrow, Home and End: `ESC [ <key>` or `ESC [ 1 ; <mod> <key>`
    fn letter_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            format!("\x1b[1;{}{}", mods.to_xterm(), key as char).into_bytes()
        }
    }

    /// Tilde key sequence (PageUp, PageDown, Insert, Delete, F5..F12)
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            format!("\x1b[{};{}~", code, mods.to_xterm()).into_bytes()
        }
    }

    /// Function key sequence
    fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
        match n {
            1..=4 => {
                let key = b'P' + (n - 1);
                if mods.is_empty() {
                    Some(vec![0x1B, b'O', key])
                } else {
                    // ESC O X -> ESC [ 1 ; mod X
                    Some(Self::letter_key(key, mods))
                }
            }
            5 => Some(Self::tilde_key(15, mods)),
            6..=10 => Some(Self::tilde_key(n + 11, mods)),
            11 | 12 => Some(Self::tilde_key(n + 12, mods)),
            _ => None,
        }
    }
}
