//! Interned byte strings with small-string optimization.
//!
//! Every string is interned, so two equal strings always share one
//! `StringId` and handle comparison is content comparison. Short strings
//! (<=40 bytes) are stored inline, longer ones on the heap.
use std::collections::HashMap;
use std::fmt;

/// Maximum bytes for inline (short) string storage.
const SSO_MAX: usize = 40;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StringId(pub u32);

#[derive(Clone)]
enum StringData {
    Short { buf: [u8; SSO_MAX], len: u8 },
    Long(Box<[u8]>),
}

/// A string with its precomputed hash.
#[derive(Clone)]
pub struct TString {
    data: StringData,
    hash: u32,
}

impl TString {
    fn new(bytes: &[u8], hash: u32) -> Self {
        if bytes.len() <= SSO_MAX {
            let mut buf = [0u8; SSO_MAX];
            buf[..bytes.len()].copy_from_slice(bytes);
            TString {
                data: StringData::Short {
                    buf,
                    len: bytes.len() as u8,
                },
                hash,
            }
        } else {
            TString {
                data: StringData::Long(bytes.into()),
                hash,
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            StringData::Short { buf, len } => &buf[..*len as usize],
            StringData::Long(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_short(&self) -> bool {
        matches!(&self.data, StringData::Short { .. })
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

impl fmt::Debug for TString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Classic Lua string hash: seeded with the length, sampling at most ~32
/// bytes of long strings.
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

/// Owns all strings and deduplicates them.
///
/// Slots of collected strings are recycled, so a `StringId` is only
/// meaningful while the string is reachable.
#[derive(Debug, Default)]
pub struct StringInterner {
    strings: Vec<Option<TString>>,
    free: Vec<u32>,
    /// hash -> ids sharing that hash
    lookup: HashMap<u32, Vec<u32>>,
    /// Strings created since the last sweep.
    created: usize,
    /// Payload bytes of all live strings.
    bytes: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `bytes`, returning the existing id when already present.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let hash = lua_hash(bytes);
        if let Some(id) = self.find_hashed(bytes, hash) {
            return id;
        }
        let s = TString::new(bytes, hash);
        let id = match self.free.pop() {
            Some(id) => {
                self.strings[id as usize] = Some(s);
                id
            }
            None => {
                self.strings.push(Some(s));
                (self.strings.len() - 1) as u32
            }
        };
        self.lookup.entry(hash).or_default().push(id);
        self.created += 1;
        self.bytes += bytes.len();
        StringId(id)
    }

    pub fn intern_str(&mut self, s: &str) -> StringId {
        self.intern(s.as_bytes())
    }

    fn find_hashed(&self, bytes: &[u8], hash: u32) -> Option<StringId> {
        self.lookup
            .get(&hash)?
            .iter()
            .copied()
            .find(|&id| self.get_bytes(StringId(id)) == bytes)
            .map(StringId)
    }

    /// Look up a string without interning it.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        self.find_hashed(bytes, lua_hash(bytes))
    }

    pub fn get(&self, id: StringId) -> &TString {
        self.strings[id.0 as usize]
            .as_ref()
            .expect("string was collected")
    }

    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        self.get(id).as_bytes()
    }

    /// Lossy UTF-8 view, for diagnostics.
    pub fn get_lossy(&self, id: StringId) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.get_bytes(id))
    }

    /// Number of live strings.
    pub fn len(&self) -> usize {
        self.strings.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots, live or free.
    pub fn capacity(&self) -> usize {
        self.strings.len()
    }

    pub fn created_since_sweep(&self) -> usize {
        self.created
    }

    /// Rough size of the live strings in bytes.
    pub fn estimate_bytes(&self) -> usize {
        self.bytes + self.len() * std::mem::size_of::<TString>()
    }

    /// Drop every live string whose mark is unset. Returns the number freed.
    pub fn sweep(&mut self, marks: &[bool]) -> usize {
        let mut freed = 0;
        for (i, slot) in self.strings.iter_mut().enumerate() {
            if marks.get(i).copied().unwrap_or(false) {
                continue;
            }
            let Some(s) = slot.take() else {
                continue;
            };
            if let Some(ids) = self.lookup.get_mut(&s.hash) {
                ids.retain(|&id| id != i as u32);
                if ids.is_empty() {
                    self.lookup.remove(&s.hash);
                }
            }
            self.bytes -= s.len();
            self.free.push(i as u32);
            freed += 1;
        }
        self.created = 0;
        freed
    }
}
