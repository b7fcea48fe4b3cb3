//! Key decoder
//!
//! Turns the raw byte stream read from the terminal into [`KeyEvent`]s.
//! The decoder does no I/O and keeps no clock: the pump decides when a
//! lone ESC has been idle long enough and calls [`KeyDecoder::flush_timeout`].
//!
//! # Grammar
//!
//! ```text
//! ESC [ params intermediates final   CSI   (arrows, Home/End, tilde keys)
//! ESC O final                         SS3   (F1..F4, application cursor keys)
//! ESC <key>                           Alt-modified key
//! 0x01..0x1A                          Ctrl+letter (0x09 Tab, 0x0D Enter)
//! 0x7F                                Backspace
//! UTF-8 scalar                        printable key
//! ```

use super::key::{KeyCode, KeyEvent, Modifiers};

const ESC: u8 = 0x1B;

/// Longest CSI sequence accepted before it is reported as `Unknown`.
const MAX_CSI_LEN: usize = 256;

/// Not enough bytes buffered to finish the current sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecodeIncomplete;

type Decoded = Result<(KeyEvent, usize), DecodeIncomplete>;

/// Stateful byte-to-key decoder
#[derive(Debug, Default, Clone)]
pub struct KeyDecoder {
    buffer: Vec<u8>,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Append raw input bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True when the buffer holds an unfinished sequence starting with ESC.
    pub fn has_pending_escape(&self) -> bool {
        self.buffer.first() == Some(&ESC)
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Decode the next complete event and report how many bytes it used.
    pub fn next_with_len(&mut self) -> Option<(KeyEvent, usize)> {
        if self.buffer.is_empty() {
            return None;
        }
        match decode(&self.buffer) {
            Ok((event, used)) => {
                self.buffer.drain(..used);
                Some((event, used))
            }
            Err(DecodeIncomplete) => None,
        }
    }

    /// Resolve a stalled partial sequence after the idle window expired.
    ///
    /// A bare `ESC [` or `ESC O` is the user pressing Alt+[ or Alt+O and
    /// resolves to that key. Otherwise a leading ESC becomes a bare Escape
    /// key (one byte consumed) and the bytes after it are decoded normally
    /// on the next call. Any other stale prefix (a truncated UTF-8 scalar)
    /// becomes one `Unknown` byte.
    pub fn flush_timeout(&mut self) -> Option<KeyEvent> {
        let first = *self.buffer.first()?;
        if decode(&self.buffer).is_ok() {
            return None;
        }
        if let [ESC, introducer @ (b'[' | b'O')] = self.buffer[..] {
            self.buffer.clear();
            return Some(KeyEvent::char(introducer as char).with_modifiers(Modifiers::ALT));
        }
        self.buffer.remove(0);
        if first == ESC {
            Some(KeyEvent::new(KeyCode::Escape))
        } else {
            Some(KeyEvent::unknown(&[first]))
        }
    }
}

impl Iterator for KeyDecoder {
    type Item = KeyEvent;

    /// Next complete event, or `None` when more bytes are needed.
    fn next(&mut self) -> Option<KeyEvent> {
        self.next_with_len().map(|(event, _)| event)
    }
}

fn decode(buf: &[u8]) -> Decoded {
    if buf[0] != ESC {
        return decode_plain(buf);
    }
    match buf.get(1) {
        None => Err(DecodeIncomplete),
        Some(b'[') => decode_csi(buf),
        Some(b'O') => decode_ss3(buf),
        Some(&ESC) => Ok((
            KeyEvent::new(KeyCode::Escape).with_modifiers(Modifiers::ALT),
            2,
        )),
        Some(_) => {
            // An ill-formed key after the prefix is one Unknown, ESC included
            let (mut event, used) = decode_plain(&buf[1..])?;
            if event.is_unknown() {
                return Ok((KeyEvent::unknown(&buf[..used + 1]), used + 1));
            }
            event.modifiers |= Modifiers::ALT;
            Ok((event, used + 1))
        }
    }
}

/// Decode a key that does not start with ESC.
fn decode_plain(buf: &[u8]) -> Decoded {
    let byte = buf[0];
    let event = match byte {
        0x00 => KeyEvent::ctrl(' '),
        0x09 => KeyEvent::new(KeyCode::Tab),
        0x0D => KeyEvent::new(KeyCode::Enter),
        0x01..=0x1A => KeyEvent::ctrl((byte - 1 + b'a') as char),
        0x1C => KeyEvent::ctrl('\\'),
        0x1D => KeyEvent::ctrl(']'),
        0x1E => KeyEvent::ctrl('^'),
        0x1F => KeyEvent::ctrl('_'),
        0x7F => KeyEvent::new(KeyCode::Backspace),
        0x20..=0x7E => KeyEvent::char(byte as char),
        0x80..=0xFF => return decode_utf8(buf),
        // ESC is handled by the caller
        0x1B => KeyEvent::new(KeyCode::Escape),
    };
    Ok((event, 1))
}

fn decode_utf8(buf: &[u8]) -> Decoded {
    let expected = match buf[0] {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return Ok((KeyEvent::unknown(&buf[..1]), 1)),
    };
    let available = buf.len().min(expected);
    if buf[1..available].iter().any(|b| b & 0xC0 != 0x80) {
        return Ok((KeyEvent::unknown(&buf[..1]), 1));
    }
    if buf.len() < expected {
        return Err(DecodeIncomplete);
    }
    match std::str::from_utf8(&buf[..expected]) {
        Ok(s) => match s.chars().next() {
            Some(ch) => Ok((KeyEvent::char(ch), expected)),
            None => Ok((KeyEvent::unknown(&buf[..1]), 1)),
        },
        // Overlong forms and surrogates
        Err(_) => Ok((KeyEvent::unknown(&buf[..1]), 1)),
    }
}

/// `ESC [ params intermediates final`
fn decode_csi(buf: &[u8]) -> Decoded {
    let limit = buf.len().min(MAX_CSI_LEN);
    let mut i = 2;
    while i < limit && (0x30..=0x3F).contains(&buf[i]) {
        i += 1;
    }
    let params_end = i;
    while i < limit && (0x20..=0x2F).contains(&buf[i]) {
        i += 1;
    }
    let intermediates_end = i;

    if i == MAX_CSI_LEN {
        return Ok((KeyEvent::unknown(&buf[..i]), i));
    }
    let Some(&final_byte) = buf.get(i) else {
        return Err(DecodeIncomplete);
    };
    if !(0x40..=0x7E).contains(&final_byte) {
        // Interrupted by a control byte; leave that byte for the next event.
        return Ok((KeyEvent::unknown(&buf[..i]), i));
    }

    let used = i + 1;
    let raw = &buf[..used];
    if intermediates_end != params_end {
        return Ok((KeyEvent::unknown(raw), used));
    }
    let event = parse_params(&buf[2..params_end])
        .and_then(|params| csi_key(&params, final_byte))
        .unwrap_or_else(|| KeyEvent::unknown(raw));
    Ok((event, used))
}

/// Parse `;`-separated decimal parameters. Empty fields are `None`.
/// Private markers (`<`, `=`, `>`, `?`) and sub-parameters are rejected.
fn parse_params(bytes: &[u8]) -> Option<Vec<Option<u32>>> {
    if bytes.is_empty() {
        return Some(Vec::new());
    }
    bytes
        .split(|&b| b == b';')
        .map(|field| {
            if field.is_empty() {
                return Some(None);
            }
            if !field.iter().all(u8::is_ascii_digit) {
                return None;
            }
            let mut value: u32 = 0;
            for &digit in field {
                value = value.saturating_mul(10).saturating_add((digit - b'0') as u32);
            }
            Some(Some(value))
        })
        .collect()
}

fn csi_key(params: &[Option<u32>], final_byte: u8) -> Option<KeyEvent> {
    if params.len() > 2 {
        return None;
    }
    let first = params.first().copied().flatten();
    let modifiers = match params.get(1) {
        Some(Some(m)) => Modifiers::from_xterm(*m),
        Some(None) | None => Modifiers::empty(),
    };

    let code = match final_byte {
        b'~' => tilde_key(first?)?,
        b'Z' if params.is_empty() => {
            return Some(KeyEvent::new(KeyCode::Tab).with_modifiers(Modifiers::SHIFT));
        }
        _ => {
            // Letter finals only take the `1;<m>` form
            if !matches!(first, None | Some(1)) {
                return None;
            }
            letter_key(final_byte)?
        }
    };
    Some(KeyEvent::new(code).with_modifiers(modifiers))
}

fn letter_key(final_byte: u8) -> Option<KeyCode> {
    Some(match final_byte {
        b'A' => KeyCode::Up,
        b'B' => KeyCode::Down,
        b'C' => KeyCode::Right,
        b'D' => KeyCode::Left,
        b'H' => KeyCode::Home,
        b'F' => KeyCode::End,
        b'P' => KeyCode::F(1),
        b'Q' => KeyCode::F(2),
        b'R' => KeyCode::F(3),
        b'S' => KeyCode::F(4),
        _ => return None,
    })
}

fn tilde_key(code: u32) -> Option<KeyCode> {
    Some(match code {
        1 | 7 => KeyCode::Home,
        2 => KeyCode::Insert,
        3 => KeyCode::Delete,
        4 | 8 => KeyCode::End,
        5 => KeyCode::PageUp,
        6 => KeyCode::PageDown,
        11..=15 => KeyCode::F((code - 10) as u8),
        17..=21 => KeyCode::F((code - 11) as u8),
        23 | 24 => KeyCode::F((code - 12) as u8),
        _ => return None,
    })
}

/// `ESC O final`
fn decode_ss3(buf: &[u8]) -> Decoded {
    let Some(&final_byte) = buf.get(2) else {
        return Err(DecodeIncomplete);
    };
    let code = match final_byte {
        b'P' => KeyCode::F(1),
        b'Q' => KeyCode::F(2),
        b'R' => KeyCode::F(3),
        b'S' => KeyCode::F(4),
        b'A' => KeyCode::Up,
        b'B' => KeyCode::Down,
        b'C' => KeyCode::Right,
        b'D' => KeyCode::Left,
        b'H' => KeyCode::Home,
        b'F' => KeyCode::End,
        _ => return Ok((KeyEvent::unknown(&buf[..3]), 3)),
    };
    Ok((KeyEvent::new(code), 3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_all(bytes: &[u8]) -> Vec<KeyEvent> {
        let mut decoder = KeyDecoder::new();
        decoder.feed(bytes);
        decoder.by_ref().collect()
    }

    fn key(code: KeyCode, mods: Modifiers) -> KeyEvent {
        KeyEvent::new(code).with_modifiers(mods)
    }

    #[test]
    fn test_csi_arrow() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(&[0x1B, 0x5B, 0x41]);
        assert_eq!(decoder.next(), Some(KeyEvent::new(KeyCode::Up)));
        assert!(decoder.is_empty());
        assert_eq!(decoder.next(), None);
    }

    #[test]
    fn test_csi_modified_arrow() {
        assert_eq!(
            decode_all(&[0x1B, 0x5B, 0x31, 0x3B, 0x35, 0x41]),
            vec![key(KeyCode::Up, Modifiers::CTRL)]
        );
        assert_eq!(
            decode_all(b"\x1b[1;2D\x1b[1;3H\x1b[1;9F"),
            vec![
                key(KeyCode::Left, Modifiers::SHIFT),
                key(KeyCode::Home, Modifiers::ALT),
                key(KeyCode::End, Modifiers::META),
            ]
        );
    }

    #[test]
    fn test_tilde_keys() {
        assert_eq!(
            decode_all(b"\x1b[2~\x1b[3~\x1b[5~\x1b[6~\x1b[3;5~"),
            vec![
                KeyEvent::new(KeyCode::Insert),
                KeyEvent::new(KeyCode::Delete),
                KeyEvent::new(KeyCode::PageUp),
                KeyEvent::new(KeyCode::PageDown),
                key(KeyCode::Delete, Modifiers::CTRL),
            ]
        );
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(
            decode_all(b"\x1bOP\x1bOS\x1b[15~\x1b[21~\x1b[24~\x1b[1;2Q"),
            vec![
                KeyEvent::new(KeyCode::F(1)),
                KeyEvent::new(KeyCode::F(4)),
                KeyEvent::new(KeyCode::F(5)),
                KeyEvent::new(KeyCode::F(10)),
                KeyEvent::new(KeyCode::F(12)),
                key(KeyCode::F(2), Modifiers::SHIFT),
            ]
        );
    }

    #[test]
    fn test_alt_prefix() {
        assert_eq!(decode_all(&[0x1B, 0x61]), vec![key(KeyCode::Char('a'), Modifiers::ALT)]);
        assert_eq!(
            decode_all(b"\x1b\x03"),
            vec![key(KeyCode::Char('c'), Modifiers::CTRL | Modifiers::ALT)]
        );
        assert_eq!(decode_all(b"\x1b\x1b"), vec![key(KeyCode::Escape, Modifiers::ALT)]);
        assert_eq!(
            decode_all("\x1bé".as_bytes()),
            vec![key(KeyCode::Char('é'), Modifiers::ALT)]
        );
    }

    #[test]
    fn test_control_bytes() {
        assert_eq!(
            decode_all(b"\x01\x09\x0d\x1a\x7f\x00\x1c"),
            vec![
                KeyEvent::ctrl('a'),
                KeyEvent::new(KeyCode::Tab),
                KeyEvent::new(KeyCode::Enter),
                KeyEvent::ctrl('z'),
                KeyEvent::new(KeyCode::Backspace),
                KeyEvent::ctrl(' '),
                KeyEvent::ctrl('\\'),
            ]
        );
    }

    #[test]
    fn test_utf8_split_across_feeds() {
        let bytes = "€".as_bytes();
        let mut decoder = KeyDecoder::new();
        decoder.feed(&bytes[..1]);
        assert_eq!(decoder.next(), None);
        decoder.feed(&bytes[1..2]);
        assert_eq!(decoder.next(), None);
        decoder.feed(&bytes[2..]);
        assert_eq!(decoder.next_with_len(), Some((KeyEvent::char('€'), 3)));
    }

    #[test]
    fn test_ill_formed_utf8() {
        // Stray continuation byte, then a lead byte followed by ASCII
        assert_eq!(
            decode_all(b"\x80\xc3A"),
            vec![
                KeyEvent::unknown(b"\x80"),
                KeyEvent::unknown(b"\xc3"),
                KeyEvent::char('A'),
            ]
        );
        // Encoded surrogate
        assert_eq!(decode_all(b"\xed\xa0\x80")[0], KeyEvent::unknown(b"\xed"));
    }

    #[test]
    fn test_unknown_csi_keeps_raw_bytes() {
        assert_eq!(decode_all(b"\x1b[99x"), vec![KeyEvent::unknown(b"\x1b[99x")]);
        assert_eq!(decode_all(b"\x1b[<0;1;1M"), vec![KeyEvent::unknown(b"\x1b[<0;1;1M")]);
        assert_eq!(decode_all(b"\x1b[1 q"), vec![KeyEvent::unknown(b"\x1b[1 q")]);
        assert_eq!(decode_all(b"\x1bOx"), vec![KeyEvent::unknown(b"\x1bOx")]);
    }

    #[test]
    fn test_csi_interrupted_by_escape() {
        assert_eq!(
            decode_all(b"\x1b[1\x1b[A"),
            vec![KeyEvent::unknown(b"\x1b[1"), KeyEvent::new(KeyCode::Up)]
        );
    }

    #[test]
    fn test_overlong_csi_is_bounded() {
        let mut bytes = b"\x1b[".to_vec();
        bytes.extend(std::iter::repeat(b'1').take(400));
        let mut decoder = KeyDecoder::new();
        decoder.feed(&bytes);
        let (event, used) = decoder.next_with_len().unwrap();
        assert!(event.is_unknown());
        assert_eq!(used, MAX_CSI_LEN);
    }

    #[test]
    fn test_partial_sequences_stay_buffered() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(b"\x1b[1;");
        assert_eq!(decoder.next(), None);
        assert_eq!(decoder.pending(), b"\x1b[1;");
        decoder.feed(b"5C");
        assert_eq!(decoder.next(), Some(key(KeyCode::Right, Modifiers::CTRL)));
    }

    #[test]
    fn test_flush_timeout_lone_escape() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(&[0x1B]);
        assert!(decoder.has_pending_escape());
        assert_eq!(decoder.next(), None);
        assert_eq!(decoder.flush_timeout(), Some(KeyEvent::new(KeyCode::Escape)));
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_flush_timeout_bare_introducer_is_alt_key() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(b"\x1b[");
        assert_eq!(decoder.flush_timeout(), Some(key(KeyCode::Char('['), Modifiers::ALT)));
        assert!(decoder.is_empty());

        decoder.feed(b"\x1bO");
        assert_eq!(decoder.flush_timeout(), Some(key(KeyCode::Char('O'), Modifiers::ALT)));
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_flush_timeout_longer_prefix_splits_escape() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(b"\x1b[1;");
        assert_eq!(decoder.flush_timeout(), Some(KeyEvent::new(KeyCode::Escape)));
        assert_eq!(
            decoder.by_ref().collect::<Vec<_>>(),
            vec![KeyEvent::char('['), KeyEvent::char('1'), KeyEvent::char(';')]
        );
    }

    #[test]
    fn test_alt_prefix_with_ill_formed_byte() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(b"\x1b\x80a");
        assert_eq!(decoder.next_with_len(), Some((KeyEvent::unknown(b"\x1b\x80"), 2)));
        assert_eq!(decoder.next(), Some(KeyEvent::char('a')));
    }

    #[test]
    fn test_flush_timeout_ignores_complete_input() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(b"a");
        assert_eq!(decoder.flush_timeout(), None);
        assert_eq!(decoder.next(), Some(KeyEvent::char('a')));
    }

    #[test]
    fn test_restartable_after_reset() {
        let mut decoder = KeyDecoder::new();
        decoder.feed(b"\x1b[1");
        decoder.reset();
        decoder.feed(b"q");
        assert_eq!(decoder.next(), Some(KeyEvent::char('q')));
    }

    proptest! {
        #[test]
        fn consumed_bytes_account_for_input(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut decoder = KeyDecoder::new();
            decoder.feed(&bytes);
            let mut consumed = 0;
            while let Some((_, used)) = decoder.next_with_len() {
                prop_assert!(used > 0);
                consumed += used;
            }
            prop_assert_eq!(consumed + decoder.pending().len(), bytes.len());
            prop_assert_eq!(decoder.pending(), &bytes[consumed..]);
        }

        #[test]
        fn printable_ascii_decodes_one_to_one(text in "[ -~]{0,64}") {
            let events = decode_all(text.as_bytes());
            prop_assert_eq!(events.len(), text.len());
            for (event, ch) in events.iter().zip(text.chars()) {
                prop_assert_eq!(event, &KeyEvent::char(ch));
            }
        }
    }
}
