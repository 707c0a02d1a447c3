//! Ordered header field list with case-insensitive lookup.

use std::io::{self, Write};

/// A single header field.
///
/// `raw` keeps the exact bytes the field was scanned from (folded lines and
/// line endings included) so the block can be written back losslessly.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeaderField {
    key: String,
    value: String,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl HeaderField {
    /// Build a field from its parts. `key` is canonicalized.
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        let key = canonical_key(key);
        let value = value.into();
        let raw = format!("{key}: {value}\r\n").into_bytes();
        Self { key, value, raw }
    }

    /// Build a field from scanned bytes. The caller has already validated
    /// and canonicalized `key`.
    pub(crate) fn scanned(key: String, value: String, raw: Vec<u8>) -> Self {
        Self { key, value, raw }
    }

    /// Canonical key, e.g. `Content-Type`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Unfolded, trimmed value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Original bytes of the field, including its line ending.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Append recovered text to the value and the raw bytes it came from.
    pub(crate) fn append(&mut self, text: &str, raw: &[u8]) {
        self.value.push_str(text);
        self.raw.extend_from_slice(raw);
    }
}

/// An ordered header block. Repeated keys keep their original order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct Header {
    fields: Vec<HeaderField>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Vec<HeaderField>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in order.
    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    /// First value for `key` (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key.eq_ignore_ascii_case(key))
            .map(|f| f.value.as_str())
    }

    /// Every value for `key`, in order.
    pub fn get_all<'h>(&'h self, key: &'h str) -> impl Iterator<Item = &'h str> + 'h {
        self.fields
            .iter()
            .filter(move |f| f.key.eq_ignore_ascii_case(key))
            .map(|f| f.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Append a field, keeping any existing ones with the same key.
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.fields.push(HeaderField::new(key, value));
    }

    /// Replace every field named `key` with a single one, at the position of
    /// the first occurrence (or at the end if there was none).
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let field = HeaderField::new(key, value);
        match self
            .fields
            .iter()
            .position(|f| f.key.eq_ignore_ascii_case(key))
        {
            Some(first) => {
                self.fields[first] = field;
                let mut i = first + 1;
                while i < self.fields.len() {
                    if self.fields[i].key.eq_ignore_ascii_case(key) {
                        self.fields.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.fields.push(field),
        }
    }

    /// Remove every field named `key`. Returns how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| !f.key.eq_ignore_ascii_case(key));
        before - self.fields.len()
    }

    pub(crate) fn push(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut HeaderField> {
        self.fields.last_mut()
    }

    /// Write the raw field bytes followed by the blank separator line.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for field in &self.fields {
            w.write_all(&field.raw)?;
        }
        w.write_all(b"\r\n")
    }

    /// The header block as bytes, blank separator line included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.fields.iter().map(|f| f.raw.len()).sum::<usize>() + 2);
        for field in &self.fields {
            out.extend_from_slice(&field.raw);
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl<'h> IntoIterator for &'h Header {
    type Item = &'h HeaderField;
    type IntoIter = std::slice::Iter<'h, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Canonical MIME capitalization: `content-TYPE` → `Content-Type`.
///
/// Keys containing bytes outside the token set are returned unchanged.
pub fn canonical_key(key: &str) -> String {
    if !key.bytes().all(is_token_byte) {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len());
    let mut upper = true;
    for c in key.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Printable ASCII except `:`.
pub fn is_token_byte(b: u8) -> bool {
    (33..=126).contains(&b) && b != b':'
}
