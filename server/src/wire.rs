/*
 * This file is part of meshreg.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The wire codec: one line per record, `key` or `key=value` pairs
//! separated by spaces, terminated by `\n`. Anything that isn't a plain
//! printable ASCII byte gets escaped so a line always round-trips
//! through `encode`/`decode` intact.

use std::borrow::Cow;
use std::fmt::Write as _;

const TERMINATOR: u8 = b'\n';

/// Escape a single field so it can't be mistaken for a separator,
/// terminator, or control byte when the line is re-split.
pub fn escape(field: &str) -> Cow<'_, str> {
    if field.bytes().all(|b| matches!(b, 0x21..=0x7e) && b != b'\\' && b != b'=' ) {
        return Cow::Borrowed(field);
    }
    let mut out = String::with_capacity(field.len());
    for b in field.bytes() {
        match b {
            b'\\' => out.push_str("\\\\"),
            b' ' => out.push_str("\\_"),
            b'=' => out.push_str("\\="),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0x00 => out.push_str("\\0"),
            0x01..=0x1f | 0x7f..=0xff => {
                let _ = write!(out, "\\x{b:02x}");
            }
            _ => out.push(b as char),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape`]: decode `\\`, `\_`, `\=`, `\n`, `\r`, `\0`, and
/// `\xHH` sequences back to their literal bytes.
pub fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'\\' => {
                    out.push(b'\\');
                    i += 2;
                }
                b'_' => {
                    out.push(b' ');
                    i += 2;
                }
                b'=' => {
                    out.push(b'=');
                    i += 2;
                }
                b'n' => {
                    out.push(b'\n');
                    i += 2;
                }
                b'r' => {
                    out.push(b'\r');
                    i += 2;
                }
                b'0' => {
                    out.push(0x00);
                    i += 2;
                }
                b'x' if i + 3 < bytes.len() => {
                    if let Ok(v) = u8::from_str_radix(&field[i + 2..i + 4], 16) {
                        out.push(v);
                        i += 4;
                    } else {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
                _ => {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// One `key` or `key=value` field, in the order it appeared on the
/// line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    pub value: Option<String>,
}

/// A decoded line: insertion-ordered fields. Duplicate keys are kept —
/// [`Record::get`] resolves them first-wins, matching the order they
/// were written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: Option<String>) -> &mut Self {
        self.fields.push(Field {
            key: key.into(),
            value,
        });
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, Some(value.into()));
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>) -> Self {
        self.push(key, None);
        self
    }

    /// The value of the first field with this key, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .and_then(|f| f.value.as_deref())
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f.key == key)
    }

    /// Encode as one terminated line: `key=value` pairs (or bare `key`
    /// for a flag), space-separated, each field escaped.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&escape(&field.key));
            if let Some(v) = &field.value {
                out.push('=');
                out.push_str(&escape(v));
            }
        }
        let mut bytes = out.into_bytes();
        bytes.push(TERMINATOR);
        bytes
    }

    /// Decode one line (without its terminator) into a [`Record`].
    pub fn decode(line: &str) -> Self {
        let mut record = Record::new();
        if line.is_empty() {
            return record;
        }
        for token in split_unescaped(line, b' ') {
            if token.is_empty() {
                continue;
            }
            match split_first_unescaped(&token, b'=') {
                Some((k, v)) => {
                    record.push(unescape(&k), Some(unescape(&v)));
                }
                None => {
                    record.push(unescape(&token), None);
                }
            }
        }
        record
    }
}

/// Split `s` on unescaped occurrences of `sep` (a `\` before `sep`
/// protects it).
fn split_unescaped(s: &str, sep: u8) -> Vec<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == sep {
            out.push(s[start..i].to_string());
            start = i + 1;
            i += 1;
            continue;
        }
        i += 1;
    }
    out.push(s[start..].to_string());
    out
}

/// Split `s` on the first unescaped occurrence of `sep`, if any.
fn split_first_unescaped(s: &str, sep: u8) -> Option<(String, String)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == sep {
            return Some((s[..i].to_string(), s[i + 1..].to_string()));
        }
        i += 1;
    }
    None
}

/// Read one terminated line's worth of bytes out of `buf`, draining
/// them, or `None` if no terminator has arrived yet.
pub fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let idx = buf.iter().position(|&b| b == TERMINATOR)?;
    let line: Vec<u8> = buf.drain(..=idx).collect();
    Some(line[..line.len() - 1].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_table_covers_reserved_bytes() {
        assert_eq!(escape("a b"), "a\\_b");
        assert_eq!(escape("k=v"), "k\\=v");
        assert_eq!(escape("back\\slash"), "back\\\\slash");
        assert_eq!(escape("line\nbreak"), "line\\nbreak");
        assert_eq!(escape("cr\rreturn"), "cr\\rreturn");
        assert_eq!(escape("nul\0byte"), "nul\\0byte");
    }

    #[test]
    fn escape_unescape_round_trips() {
        for s in ["plain", "with space", "k=v", "back\\slash", "line\nbreak\r\0end", "\x01\x02"] {
            let escaped = escape(s);
            let back = unescape(&escaped);
            assert_eq!(back, s);
        }
    }

    #[test]
    fn record_encode_decode_round_trips() {
        let record = Record::new()
            .with("key", "val ue")
            .with_flag("flag")
            .with("k2", "a=b");
        let encoded = record.encode();
        assert!(encoded.ends_with(b"\n"));
        let line = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        let decoded = Record::decode(line);
        assert_eq!(decoded, record);
    }

    #[test]
    fn duplicate_keys_preserve_order_and_first_wins_lookup() {
        let record = Record::new().with("k", "first").with("k", "second");
        assert_eq!(record.get("k"), Some("first"));
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.fields[1].value.as_deref(), Some("second"));
    }

    #[test]
    fn take_line_drains_exactly_one_terminated_line() {
        let mut buf = b"sync id=1\nver=2\n".to_vec();
        let first = take_line(&mut buf).unwrap();
        assert_eq!(first, b"sync id=1");
        assert_eq!(buf, b"ver=2\n");
        let second = take_line(&mut buf).unwrap();
        assert_eq!(second, b"ver=2");
        assert!(buf.is_empty());
    }

    #[test]
    fn take_line_returns_none_without_a_terminator() {
        let mut buf = b"partial".to_vec();
        assert!(take_line(&mut buf).is_none());
    }
}
