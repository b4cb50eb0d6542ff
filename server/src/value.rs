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

//! The typed value cell held by every leaf link: a tagged union over
//! {null, int, real, bytes, text, variant} with lazy cross-type
//! conversion and a write counter.

use bytes::Bytes;
use std::cell::RefCell;

/// The wire/export type tag. Numeric values are fixed so the binary
/// export format (§6) is stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Null = 0,
    Int = 1,
    Real = 2,
    Bytes = 3,
    Text = 4,
    Variant = 5,
}

impl ValueType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Null,
            1 => Self::Int,
            2 => Self::Real,
            3 => Self::Bytes,
            4 => Self::Text,
            5 => Self::Variant,
            _ => return None,
        })
    }
}

/// A variant payload: a self-describing blob whose interpretation is
/// left to the application (a pipe's RPC façade, say). Stored as raw
/// bytes with a caller-chosen tag, round-tripping through the same
/// binary export format as the other representations.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub tag: u32,
    pub payload: Bytes,
}

/// The authoritative representation the cell currently holds. Requests
/// for other representations are satisfied by conversion, then cached
/// (see [`ValueCell`]).
#[derive(Debug, Clone, PartialEq)]
enum Stored {
    Null,
    Int(i64),
    Real(f64),
    Bytes(Bytes),
    Text(String),
    Variant(Variant),
}

/// Lazily-materialized alternate representations of the current value.
/// Cleared on every write.
#[derive(Debug, Default)]
struct Cache {
    int: Option<i64>,
    real: Option<f64>,
    text: Option<String>,
    bytes: Option<Bytes>,
}

/// A typed, polymorphic value with cross-representation conversion and
/// an update counter. Not thread-safe on its own — callers (the link
/// node) hold it behind their own lock.
#[derive(Debug)]
pub struct ValueCell {
    stored: Stored,
    cache: RefCell<Cache>,
    updates: u64,
}

impl ValueCell {
    pub fn new_null() -> Self {
        Self {
            stored: Stored::Null,
            cache: RefCell::new(Cache::default()),
            updates: 0,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.stored {
            Stored::Null => ValueType::Null,
            Stored::Int(_) => ValueType::Int,
            Stored::Real(_) => ValueType::Real,
            Stored::Bytes(_) => ValueType::Bytes,
            Stored::Text(_) => ValueType::Text,
            Stored::Variant(_) => ValueType::Variant,
        }
    }

    /// Number of successful writes since creation.
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    fn invalidate_and_bump(&mut self) {
        *self.cache.get_mut() = Cache::default();
        self.updates += 1;
    }

    pub fn set_null(&mut self) {
        self.stored = Stored::Null;
        self.invalidate_and_bump();
    }
    pub fn set_int(&mut self, v: i64) {
        self.stored = Stored::Int(v);
        self.invalidate_and_bump();
    }
    pub fn set_real(&mut self, v: f64) {
        self.stored = Stored::Real(v);
        self.invalidate_and_bump();
    }
    pub fn set_bytes(&mut self, v: Bytes) {
        self.stored = Stored::Bytes(v);
        self.invalidate_and_bump();
    }
    pub fn set_text(&mut self, v: String) {
        self.stored = Stored::Text(v);
        self.invalidate_and_bump();
    }
    pub fn set_variant(&mut self, v: Variant) {
        self.stored = Stored::Variant(v);
        self.invalidate_and_bump();
    }

    /// `true` if `other`, interpreted in this cell's current
    /// representation, decodes to the same bytes as the current value.
    /// Used by the handle-level equal-value suppression flag (§4.2);
    /// pipe-mode links never call this.
    pub fn equals_current_bytes(&self, other: &[u8]) -> bool {
        self.to_bytes().0 == other
    }

    pub fn to_int(&self) -> (i64, bool) {
        if let Stored::Int(v) = &self.stored {
            return (*v, true);
        }
        if let Some(v) = self.cache.borrow().int {
            return (v, true);
        }
        let (v, ok) = match &self.stored {
            Stored::Null => (0, false),
            Stored::Real(v) => (*v as i64, true),
            Stored::Text(s) => s.trim().parse::<i64>().map(|v| (v, true)).unwrap_or((0, false)),
            Stored::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .map(|v| (v, true))
                .unwrap_or((0, false)),
            Stored::Int(_) | Stored::Variant(_) => (0, false),
        };
        if ok {
            self.cache.borrow_mut().int = Some(v);
        }
        (v, ok)
    }

    pub fn to_real(&self) -> (f64, bool) {
        if let Stored::Real(v) = &self.stored {
            return (*v, true);
        }
        if let Some(v) = self.cache.borrow().real {
            return (v, true);
        }
        let (v, ok) = match &self.stored {
            Stored::Int(v) => (*v as f64, true),
            Stored::Null => (0.0, false),
            Stored::Text(s) => s.trim().parse::<f64>().map(|v| (v, true)).unwrap_or((0.0, false)),
            Stored::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .map(|v| (v, true))
                .unwrap_or((0.0, false)),
            Stored::Real(_) | Stored::Variant(_) => (0.0, false),
        };
        if ok {
            self.cache.borrow_mut().real = Some(v);
        }
        (v, ok)
    }

    pub fn to_text(&self) -> (String, bool) {
        if let Stored::Text(s) = &self.stored {
            return (s.clone(), true);
        }
        if let Some(s) = self.cache.borrow().text.clone() {
            return (s, true);
        }
        let (s, ok): (String, bool) = match &self.stored {
            Stored::Int(v) => (v.to_string(), true),
            Stored::Real(v) => (v.to_string(), true),
            Stored::Null => (String::new(), false),
            Stored::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => (s.to_string(), true),
                Err(_) => (String::new(), false),
            },
            Stored::Text(_) | Stored::Variant(_) => (String::new(), false),
        };
        if ok {
            self.cache.borrow_mut().text = Some(s.clone());
        }
        (s, ok)
    }

    /// Bytes in the cell's native encoding. This is what gets hashed for
    /// equal-value suppression and what travels on the wire for a plain
    /// `set`.
    pub fn to_bytes(&self) -> (Bytes, bool) {
        if let Stored::Bytes(b) = &self.stored {
            return (b.clone(), true);
        }
        if let Some(b) = self.cache.borrow().bytes.clone() {
            return (b, true);
        }
        let (b, ok): (Bytes, bool) = match &self.stored {
            Stored::Text(s) => (Bytes::copy_from_slice(s.as_bytes()), true),
            Stored::Int(v) => (Bytes::copy_from_slice(v.to_string().as_bytes()), true),
            Stored::Real(v) => (Bytes::copy_from_slice(v.to_string().as_bytes()), true),
            Stored::Null => (Bytes::new(), false),
            Stored::Variant(v) => (v.payload.clone(), true),
            Stored::Bytes(_) => unreachable!(),
        };
        if ok {
            self.cache.borrow_mut().bytes = Some(b.clone());
        }
        (b, ok)
    }

    pub fn to_variant(&self) -> (Option<Variant>, bool) {
        match &self.stored {
            Stored::Variant(v) => (Some(v.clone()), true),
            _ => (None, false),
        }
    }

    /// One-byte type tag plus canonical payload, per the binary export
    /// format (§6). Ints are narrowed to signed 32-bit little-endian on
    /// the wire; the in-memory cell stays `i64` for headroom, truncating
    /// on export the same way a `set_int` from a 32-bit peer would.
    pub fn export(&self) -> Vec<u8> {
        let mut out = vec![self.value_type() as u8];
        match &self.stored {
            Stored::Null => {}
            Stored::Int(v) => out.extend_from_slice(&(*v as i32).to_le_bytes()),
            Stored::Real(v) => out.extend_from_slice(&v.to_le_bytes()),
            Stored::Bytes(b) => out.extend_from_slice(b),
            Stored::Text(s) => out.extend_from_slice(s.as_bytes()),
            Stored::Variant(v) => {
                out.extend_from_slice(&v.tag.to_le_bytes());
                out.extend_from_slice(&v.payload);
            }
        }
        out
    }

    /// Reconstruct a cell from its binary export. The update counter
    /// always starts fresh; it is not part of the exported blob.
    pub fn import(blob: &[u8]) -> Option<Self> {
        let (&tag, rest) = blob.split_first()?;
        let stored = match ValueType::from_tag(tag)? {
            ValueType::Null => Stored::Null,
            ValueType::Int => Stored::Int(i32::from_le_bytes(rest.try_into().ok()?) as i64),
            ValueType::Real => Stored::Real(f64::from_le_bytes(rest.try_into().ok()?)),
            ValueType::Bytes => Stored::Bytes(Bytes::copy_from_slice(rest)),
            ValueType::Text => Stored::Text(String::from_utf8(rest.to_vec()).ok()?),
            ValueType::Variant => {
                if rest.len() < 4 {
                    return None;
                }
                let (tag_bytes, payload) = rest.split_at(4);
                Stored::Variant(Variant {
                    tag: u32::from_le_bytes(tag_bytes.try_into().ok()?),
                    payload: Bytes::copy_from_slice(payload),
                })
            }
        };
        Some(Self {
            stored,
            cache: RefCell::new(Cache::default()),
            updates: 0,
        })
    }
}

impl Default for ValueCell {
    fn default() -> Self {
        Self::new_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_bumps_update_counter() {
        let mut v = ValueCell::new_null();
        assert_eq!(v.update_count(), 0);
        v.set_int(5);
        assert_eq!(v.update_count(), 1);
        v.set_int(6);
        assert_eq!(v.update_count(), 2);
    }

    #[test]
    fn numeric_conversion_failure_yields_zero_and_not_ok() {
        let mut v = ValueCell::new_null();
        v.set_text("not a number".into());
        let (i, ok) = v.to_int();
        assert_eq!(i, 0);
        assert!(!ok);
    }

    #[test]
    fn text_to_int_round_trip() {
        let mut v = ValueCell::new_null();
        v.set_text("42".into());
        assert_eq!(v.to_int(), (42, true));
    }

    #[test]
    fn null_conversions_are_not_ok() {
        let v = ValueCell::new_null();
        assert_eq!(v.to_int(), (0, false));
        assert_eq!(v.to_real(), (0.0, false));
        assert_eq!(v.to_text().1, false);
        assert_eq!(v.to_bytes().1, false);
    }

    #[test]
    fn export_import_round_trip_int() {
        let mut v = ValueCell::new_null();
        v.set_int(-7);
        let blob = v.export();
        let back = ValueCell::import(&blob).unwrap();
        assert_eq!(back.to_int(), (-7, true));
        assert_eq!(back.update_count(), 0);
    }

    #[test]
    fn export_import_round_trip_variant() {
        let mut v = ValueCell::new_null();
        v.set_variant(Variant {
            tag: 9,
            payload: Bytes::from_static(b"hello"),
        });
        let blob = v.export();
        let back = ValueCell::import(&blob).unwrap();
        let (variant, ok) = back.to_variant();
        assert!(ok);
        assert_eq!(variant.unwrap().payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn equal_value_suppression_compares_native_bytes() {
        let mut v = ValueCell::new_null();
        v.set_text("same".into());
        assert!(v.equals_current_bytes(b"same"));
        assert!(!v.equals_current_bytes(b"different"));
    }
}
