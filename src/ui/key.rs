//! Key event model
//!
//! Structured key values produced by the decoder and delivered by the pump.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Modifier keys.
    ///
    /// The bit layout is the xterm one: a CSI modifier parameter `m`
    /// decodes as `Modifiers::from_bits_truncate(m - 1)`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const ALT   = 0b0010;
        const CTRL  = 0b0100;
        const META  = 0b1000;
    }
}

impl Modifiers {
    /// Decode an xterm modifier parameter (`1` means no modifiers).
    pub fn from_xterm(param: u32) -> Self {
        let bits = param.saturating_sub(1).min(u8::MAX as u32) as u8;
        Modifiers::from_bits_truncate(bits)
    }

    /// Encode as an xterm modifier parameter.
    pub fn to_xterm(self) -> u8 {
        self.bits() + 1
    }
}

/// Key code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// Printable Unicode scalar value
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    /// Function key F1..F12
    F(u8),
    /// Unrecognized or ill-formed input; see [`KeyEvent::raw`]
    Unknown,
}

/// A decoded key press.
///
/// Equality is structural: code, modifiers and raw tag all take part.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub modifiers: Modifiers,
    /// Raw bytes for sequences the decoder did not recognize
    pub raw: Option<Box<[u8]>>,
}

impl KeyEvent {
    pub fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: Modifiers::empty(),
            raw: None,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn char(ch: char) -> Self {
        Self::new(KeyCode::Char(ch))
    }

    pub fn ctrl(ch: char) -> Self {
        Self::char(ch).with_modifiers(Modifiers::CTRL)
    }

    /// An `Unknown` event tagged with the bytes it was decoded from.
    pub fn unknown(raw: &[u8]) -> Self {
        Self {
            code: KeyCode::Unknown,
            modifiers: Modifiers::empty(),
            raw: Some(raw.into()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.code == KeyCode::Unknown
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (Modifiers::CTRL, "Ctrl+"),
            (Modifiers::ALT, "Alt+"),
            (Modifiers::SHIFT, "Shift+"),
            (Modifiers::META, "Meta+"),
        ] {
            if self.modifiers.contains(flag) {
                f.write_str(name)?;
            }
        }
        match self.code {
            KeyCode::Char(' ') => f.write_str("Space"),
            KeyCode::Char(ch) => write!(f, "{}", ch),
            KeyCode::F(n) => write!(f, "F{}", n),
            KeyCode::Unknown => {
                f.write_str("Unknown")?;
                if let Some(raw) = &self.raw {
                    write!(f, "({})", raw.escape_ascii())?;
                }
                Ok(())
            }
            other => write!(f, "{:?}", other),
        }
    }
}

/// UI event delivered to widgets.
///
/// Only key input exists today; further payloads (resize, focus, paste)
/// will be added as new variants, so match with a wildcard arm.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Key(KeyEvent),
}

impl Event {
    pub fn as_key(&self) -> Option<&KeyEvent> {
        match self {
            Event::Key(key) => Some(key),
        }
    }
}

impl From<KeyEvent> for Event {
    fn from(key: KeyEvent) -> Self {
        Event::Key(key)
    }
}
