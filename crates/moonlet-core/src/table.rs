//! Hybrid array+hash table.

use crate::gc::GcIdx;
use crate::string::StringId;
use crate::value::TValue;
use indexmap::IndexMap;

/// A key in the hash part of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Number key, stored as raw bits with -0 folded into 0.
    Number(u64),
    String(StringId),
    Boolean(bool),
    /// Heap object key (table, closure, thread...), stored as raw TValue bits.
    Object(u64),
}

/// Errors raised by `raw_set` for keys that can never be stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyError {
    Nil,
    NaN,
}

impl KeyError {
    pub fn message(self) -> &'static str {
        match self {
            KeyError::Nil => "table index is nil",
            KeyError::NaN => "table index is NaN",
        }
    }
}

/// A table: dense array part for keys 1..n plus an insertion-ordered hash.
pub struct Table {
    /// array[0] holds key 1.
    array: Vec<TValue>,
    /// Entries set to nil stay as tombstones so `next` can continue past them.
    hash: IndexMap<TableKey, TValue>,
    tombstones: usize,
    pub metatable: Option<GcIdx<Table>>,
}

/// Array slot for a number key, if it is a positive integer.
#[inline]
fn array_slot(n: f64) -> Option<usize> {
    if n >= 1.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
        Some(n as usize - 1)
    } else {
        None
    }
}

impl Table {
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
            tombstones: 0,
            metatable: None,
        }
    }

    pub fn raw_get(&self, key: TValue) -> TValue {
        if let Some(n) = key.as_number() {
            return self.raw_getn(n);
        }
        match to_table_key(key) {
            Some(tk) => self.hash.get(&tk).copied().unwrap_or_default(),
            None => TValue::nil(),
        }
    }

    /// Lookup by number key.
    pub fn raw_getn(&self, n: f64) -> TValue {
        if let Some(slot) = array_slot(n) {
            if slot < self.array.len() {
                return self.array[slot];
            }
        }
        if n.is_nan() {
            return TValue::nil();
        }
        self.hash
            .get(&number_key(n))
            .copied()
            .unwrap_or_default()
    }

    pub fn raw_geti(&self, i: i64) -> TValue {
        self.raw_getn(i as f64)
    }

    pub fn raw_get_str(&self, key: StringId) -> TValue {
        self.hash
            .get(&TableKey::String(key))
            .copied()
            .unwrap_or_default()
    }

    pub fn raw_set(&mut self, key: TValue, value: TValue) -> Result<(), KeyError> {
        if key.is_nil() {
            return Err(KeyError::Nil);
        }
        if let Some(n) = key.as_number() {
            if n.is_nan() {
                return Err(KeyError::NaN);
            }
            self.raw_setn(n, value);
            return Ok(());
        }
        if let Some(tk) = to_table_key(key) {
            self.hash_set(tk, value);
        }
        Ok(())
    }

    /// Store under a (non-NaN) number key.
    pub fn raw_setn(&mut self, n: f64, value: TValue) {
        if let Some(slot) = array_slot(n) {
            if slot < self.array.len() {
                self.array[slot] = value;
                return;
            }
            if slot == self.array.len() {
                if value.is_nil() {
                    self.hash_set(number_key(n), value);
                    return;
                }
                self.array.push(value);
                if let Some(old) = self.hash.get_mut(&number_key(n)) {
                    // The key migrated to the array part; leave a tombstone behind.
                    if !old.is_nil() {
                        *old = TValue::nil();
                        self.tombstones += 1;
                    }
                }
                self.migrate_hash_to_array();
                return;
            }
        }
        self.hash_set(number_key(n), value);
    }

    pub fn raw_seti(&mut self, i: i64, value: TValue) {
        self.raw_setn(i as f64, value);
    }

    pub fn raw_set_str(&mut self, key: StringId, value: TValue) {
        self.hash_set(TableKey::String(key), value);
    }

    fn hash_set(&mut self, tk: TableKey, value: TValue) {
        if let Some(slot) = self.hash.get_mut(&tk) {
            match (slot.is_nil(), value.is_nil()) {
                (false, true) => self.tombstones += 1,
                (true, false) => self.tombstones -= 1,
                _ => {}
            }
            *slot = value;
            return;
        }
        if value.is_nil() {
            return;
        }
        if self.tombstones > 8 && self.tombstones * 2 > self.hash.len() {
            self.compact_hash();
        }
        self.hash.insert(tk, value);
    }

    /// A border: an index n with t[n] non-nil and t[n+1] nil, or 0.
    pub fn length(&self) -> usize {
        match self.array.last() {
            None => 0,
            Some(last) if !last.is_nil() => self.array.len(),
            Some(_) => {
                let mut lo = 0usize;
                let mut hi = self.array.len();
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    if self.array[mid].is_nil() {
                        hi = mid;
                    } else {
                        lo = mid + 1;
                    }
                }
                lo
            }
        }
    }

    /// Largest positive integer key with a non-nil value.
    pub fn max_index(&self) -> f64 {
        let mut max = self
            .array
            .iter()
            .rposition(|v| !v.is_nil())
            .map_or(0.0, |i| (i + 1) as f64);
        for (k, v) in &self.hash {
            if let TableKey::Number(bits) = k {
                let n = f64::from_bits(*bits);
                if !v.is_nil() && n > max {
                    max = n;
                }
            }
        }
        max
    }

    /// The entry following `key` in traversal order; `nil` starts the walk.
    /// `Err(())` means `key` is not present in the table.
    #[allow(clippy::result_unit_err)]
    pub fn next(&self, key: TValue) -> Result<Option<(TValue, TValue)>, ()> {
        let hash_start = if key.is_nil() {
            match self.next_in_array(0) {
                Some(pair) => return Ok(Some(pair)),
                None => 0,
            }
        } else if let Some(slot) = key
            .as_number()
            .and_then(array_slot)
            .filter(|&s| s < self.array.len())
        {
            match self.next_in_array(slot + 1) {
                Some(pair) => return Ok(Some(pair)),
                None => 0,
            }
        } else {
            let tk = to_table_key(key).ok_or(())?;
            self.hash.get_index_of(&tk).ok_or(())? + 1
        };
        Ok((hash_start..self.hash.len())
            .filter_map(|i| self.hash.get_index(i))
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (from_table_key(*k), *v)))
    }

    fn next_in_array(&self, from: usize) -> Option<(TValue, TValue)> {
        self.array
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, v)| !v.is_nil())
            .map(|(i, v)| (TValue::from_number((i + 1) as f64), *v))
    }

    /// Drop tombstones from the hash part.
    pub fn compact_hash(&mut self) {
        self.hash.retain(|_, v| !v.is_nil());
        self.tombstones = 0;
    }

    /// Move consecutive integer entries from hash into array.
    fn migrate_hash_to_array(&mut self) {
        loop {
            let next = number_key((self.array.len() + 1) as f64);
            match self.hash.get_mut(&next) {
                Some(v) if !v.is_nil() => {
                    let moved = std::mem::take(v);
                    self.tombstones += 1;
                    self.array.push(moved);
                }
                _ => break,
            }
        }
    }

    /// Insert at 1-based `pos`, shifting later elements up.
    pub fn insert_at(&mut self, pos: usize, value: TValue) {
        let len = self.length();
        if pos >= 1 && pos <= len && len == self.array.len() {
            self.array.insert(pos - 1, value);
            self.migrate_hash_to_array();
            return;
        }
        let mut i = len;
        while i >= pos && i >= 1 {
            let v = self.raw_getn(i as f64);
            self.raw_setn((i + 1) as f64, v);
            i -= 1;
        }
        self.raw_setn(pos as f64, value);
    }

    /// Remove at 1-based `pos`, shifting later elements down.
    pub fn remove_at(&mut self, pos: usize) -> TValue {
        let len = self.length();
        let removed = self.raw_getn(pos as f64);
        if pos >= 1 && pos <= len && len == self.array.len() {
            self.array.remove(pos - 1);
            return removed;
        }
        for i in pos..len {
            let v = self.raw_getn((i + 1) as f64);
            self.raw_setn(i as f64, v);
        }
        if len >= 1 {
            self.raw_setn(len as f64, TValue::nil());
        }
        removed
    }

    /// Visit every key and value the table holds. Keys of cleared hash
    /// entries are included: `next` may still be asked to continue from them.
    pub fn for_each_ref(&self, mut f: impl FnMut(TValue)) {
        for &v in &self.array {
            f(v);
        }
        for (k, v) in &self.hash {
            f(from_table_key(*k));
            f(*v);
        }
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len() - self.tombstones
    }
}

fn number_key(n: f64) -> TableKey {
    // -0 and 0 are the same key.
    let n = if n == 0.0 { 0.0 } else { n };
    TableKey::Number(n.to_bits())
}

fn to_table_key(v: TValue) -> Option<TableKey> {
    if v.is_nil() {
        return None;
    }
    if let Some(n) = v.as_number() {
        return if n.is_nan() { None } else { Some(number_key(n)) };
    }
    if let Some(b) = v.as_bool() {
        return Some(TableKey::Boolean(b));
    }
    if let Some(sid) = v.as_string_id() {
        return Some(TableKey::String(sid));
    }
    if v.is_gc() {
        return Some(TableKey::Object(v.raw_bits()));
    }
    None
}

fn from_table_key(k: TableKey) -> TValue {
    match k {
        TableKey::Number(bits) => TValue::from_number(f64::from_bits(bits)),
        TableKey::String(sid) => TValue::from_string_id(sid),
        TableKey::Boolean(b) => TValue::from_bool(b),
        TableKey::Object(bits) => TValue::from_raw_bits(bits),
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table(array={}, hash={})",
            self.array.len(),
            self.hash_len()
        )
    }
}
