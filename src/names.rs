//! Interned symbol names.
//!
//! Every class name, member name and descriptor the loader handles goes
//! through a [`NameTable`], which hands out one canonical [`Name`] per distinct
//! sequence of UTF-16 code units. Two names from the same table are equal
//! exactly when they are the same handle, so comparisons and hashing never
//! look at the characters.
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::{Debug, Display, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

struct NameData {
    units: Box<[u16]>,
    text: Box<str>,
    hash: u64,
}

/// Canonical handle for an interned string. Cheap to clone.
#[derive(Clone)]
pub struct Name(Arc<NameData>);

impl Name {
    /// The name as text. Unpaired surrogates show up as U+FFFD here, so two
    /// distinct names can share a rendering; compare handles, not strings.
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// The exact code units this name was interned from.
    pub fn units(&self) -> &[u16] {
        &self.0.units
    }

    /// Hash computed once at interning time.
    pub fn hash_code(&self) -> u64 {
        self.0.hash
    }

    pub fn len(&self) -> usize {
        self.0.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.units.is_empty()
    }

    /// First character, used to classify descriptors (`[`, `L`, primitive ids).
    pub fn first_char(&self) -> Option<char> {
        self.0.text.chars().next()
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl Debug for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.0.text, f)
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.text)
    }
}

fn fnv1a(units: &[u16]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for b in units.iter().flat_map(|u| u.to_be_bytes()) {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Interning table shared by a loader hierarchy.
///
/// Lookup-or-insert happens under one lock, so no caller ever observes a
/// half-built entry. Entries are never removed.
#[derive(Default)]
pub struct NameTable {
    names: Mutex<HashMap<Box<[u16]>, Name>>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, text: &str) -> Name {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.intern_utf16(&units)
    }

    /// Interns the modified UTF-8 encoding used by class files. Returns `None`
    /// for malformed input.
    pub fn intern_bytes(&self, bytes: &[u8]) -> Option<Name> {
        decode_modified_utf8_units(bytes).map(|units| self.intern_utf16(&units))
    }

    /// Interns a sequence of UTF-16 code units as given, unpaired surrogates
    /// included.
    pub fn intern_utf16(&self, units: &[u16]) -> Name {
        let mut names = self.names.lock();
        if let Some(existing) = names.get(units) {
            return existing.clone();
        }
        let name = Name(Arc::new(NameData {
            units: units.into(),
            text: String::from_utf16_lossy(units).into(),
            hash: fnv1a(units),
        }));
        names.insert(units.into(), name.clone());
        name
    }

    /// Returns the handle for `text` only if it was interned before.
    pub fn lookup(&self, text: &str) -> Option<Name> {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.names.lock().get(units.as_slice()).cloned()
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Debug for NameTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameTable")
            .field("len", &self.len())
            .finish()
    }
}

/// Decodes the class-file flavour of UTF-8: `NUL` is two bytes and
/// supplementary characters are surrogate pairs encoded separately. Returns
/// `None` for malformed input or text that is not valid UTF-16.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    if bytes.iter().all(|b| *b != 0 && *b < 0x80) {
        return std::str::from_utf8(bytes).ok().map(str::to_owned);
    }
    String::from_utf16(&decode_modified_utf8_units(bytes)?).ok()
}

/// Decodes modified UTF-8 to raw code units, keeping unpaired surrogates.
pub fn decode_modified_utf8_units(bytes: &[u8]) -> Option<Vec<u16>> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        match bytes[i] {
            0x01..=0x7f => {
                units.push(b0);
                i += 1;
            }
            0xc0..=0xdf => {
                let b1 = *bytes.get(i + 1)? as u16;
                if b1 & 0xc0 != 0x80 {
                    return None;
                }
                units.push(((b0 & 0x1f) << 6) | (b1 & 0x3f));
                i += 2;
            }
            0xe0..=0xef => {
                let b1 = *bytes.get(i + 1)? as u16;
                let b2 = *bytes.get(i + 2)? as u16;
                if b1 & 0xc0 != 0x80 || b2 & 0xc0 != 0x80 {
                    return None;
                }
                units.push(((b0 & 0x0f) << 12) | ((b1 & 0x3f) << 6) | (b2 & 0x3f));
                i += 3;
            }
            _ => return None,
        }
    }
    Some(units)
}
