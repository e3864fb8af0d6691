/// NaN-boxed runtime value.
///
/// Layout (64 bits):
/// - Number: any non-NaN double (every NaN is canonicalized to QNAN)
/// - Tagged values: QNAN prefix (0x7FF8) | tag (3 bits, 48-50) | payload (48 bits)
///
/// Tags:
///   000 = canonical NaN (no payload)
///   001 = nil
///   010 = bool
///   100 = heap object (sub-tag in bits 44-46 of the payload, arena index below)
use crate::gc::*;
use crate::string::StringId;
use crate::table::Table;
use std::fmt;
use std::marker::PhantomData;

/// Quiet NaN prefix: exponent all 1s + quiet bit set
const QNAN: u64 = 0x7FF8_0000_0000_0000;

const TAG_MASK: u64 = 0x0007_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const TAG_NIL: u64 = 0x0001_0000_0000_0000;
const TAG_BOOL: u64 = 0x0002_0000_0000_0000;
const TAG_GC: u64 = 0x0004_0000_0000_0000;

/// A runtime value packed into 8 bytes.
#[derive(Clone, Copy)]
pub struct TValue(u64);

impl TValue {
    // ---- Constructors ----

    #[inline]
    pub fn nil() -> Self {
        TValue(QNAN | TAG_NIL)
    }

    #[inline]
    pub fn from_bool(b: bool) -> Self {
        TValue(QNAN | TAG_BOOL | (b as u64))
    }

    /// Create a number. NaN inputs are canonicalized.
    #[inline]
    pub fn from_number(f: f64) -> Self {
        if f.is_nan() {
            TValue(QNAN)
        } else {
            TValue(f.to_bits())
        }
    }

    /// Create a heap value with a sub-tag and arena index.
    #[inline]
    pub fn from_gc_sub(sub_tag: u64, index: u32) -> Self {
        let payload = (sub_tag << GC_SUB_SHIFT) | (index as u64);
        debug_assert!(payload & !PAYLOAD_MASK == 0);
        TValue(QNAN | TAG_GC | payload)
    }

    #[inline]
    pub fn from_string_id(id: StringId) -> Self {
        Self::from_gc_sub(GC_SUB_STRING, id.0)
    }

    #[inline]
    pub fn from_table(idx: GcIdx<Table>) -> Self {
        Self::from_gc_sub(GC_SUB_TABLE, idx.0)
    }

    #[inline]
    pub fn from_closure(idx: GcIdx<LuaClosure>) -> Self {
        Self::from_gc_sub(GC_SUB_CLOSURE, idx.0)
    }

    #[inline]
    pub fn from_native(id: NativeId) -> Self {
        Self::from_gc_sub(GC_SUB_NATIVE, id.0)
    }

    #[inline]
    pub fn from_thread(id: ThreadId) -> Self {
        Self::from_gc_sub(GC_SUB_THREAD, id.0)
    }

    #[inline]
    pub fn from_userdata(idx: GcIdx<Userdata>) -> Self {
        Self::from_gc_sub(GC_SUB_USERDATA, idx.0)
    }

    // ---- Type checks ----

    /// Returns true if this is a NaN-boxed tagged value (not a plain number).
    #[inline]
    fn is_tagged(&self) -> bool {
        (self.0 & QNAN) == QNAN
    }

    #[inline]
    fn tag(&self) -> u64 {
        self.0 & TAG_MASK
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_NIL
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_BOOL
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        !self.is_tagged() || self.tag() == 0
    }

    #[inline]
    pub fn is_gc(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_GC
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        self.gc_sub_tag() == Some(GC_SUB_STRING)
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        self.gc_sub_tag() == Some(GC_SUB_TABLE)
    }

    /// Closure or native function.
    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(
            self.gc_sub_tag(),
            Some(GC_SUB_CLOSURE) | Some(GC_SUB_NATIVE)
        )
    }

    #[inline]
    pub fn is_thread(&self) -> bool {
        self.gc_sub_tag() == Some(GC_SUB_THREAD)
    }

    #[inline]
    pub fn is_userdata(&self) -> bool {
        self.gc_sub_tag() == Some(GC_SUB_USERDATA)
    }

    // ---- Extractors ----

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        if !self.is_tagged() {
            Some(f64::from_bits(self.0))
        } else if self.tag() == 0 {
            Some(f64::from_bits(QNAN))
        } else {
            None
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        if self.is_bool() {
            Some((self.0 & 1) != 0)
        } else {
            None
        }
    }

    /// Extract the heap sub-tag (bits 44-46 of payload).
    #[inline]
    pub fn gc_sub_tag(&self) -> Option<u64> {
        if self.is_gc() {
            Some(((self.0 & PAYLOAD_MASK) >> GC_SUB_SHIFT) & GC_SUB_MASK)
        } else {
            None
        }
    }

    /// Extract the arena index (bits 0-43 of payload).
    #[inline]
    pub fn gc_index(&self) -> Option<u32> {
        if self.is_gc() {
            Some(((self.0 & PAYLOAD_MASK) & GC_INDEX_MASK) as u32)
        } else {
            None
        }
    }

    #[inline]
    fn sub_index(&self, sub: u64) -> Option<u32> {
        if self.gc_sub_tag() == Some(sub) {
            self.gc_index()
        } else {
            None
        }
    }

    #[inline]
    pub fn as_string_id(&self) -> Option<StringId> {
        self.sub_index(GC_SUB_STRING).map(StringId)
    }

    #[inline]
    pub fn as_table_idx(&self) -> Option<GcIdx<Table>> {
        self.sub_index(GC_SUB_TABLE).map(|i| GcIdx(i, PhantomData))
    }

    #[inline]
    pub fn as_closure_idx(&self) -> Option<GcIdx<LuaClosure>> {
        self.sub_index(GC_SUB_CLOSURE).map(|i| GcIdx(i, PhantomData))
    }

    #[inline]
    pub fn as_native_id(&self) -> Option<NativeId> {
        self.sub_index(GC_SUB_NATIVE).map(NativeId)
    }

    #[inline]
    pub fn as_thread_id(&self) -> Option<ThreadId> {
        self.sub_index(GC_SUB_THREAD).map(ThreadId)
    }

    #[inline]
    pub fn as_userdata_idx(&self) -> Option<GcIdx<Userdata>> {
        self.sub_index(GC_SUB_USERDATA).map(|i| GcIdx(i, PhantomData))
    }

    // ---- Language semantics ----

    /// Only nil and false are falsy.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        self.is_nil() || (self.is_bool() && self.as_bool() == Some(false))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    /// Primitive equality without metamethods. Strings are interned, so
    /// handle identity is content equality.
    #[inline]
    pub fn raw_equals(&self, other: &TValue) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.0 == other.0,
            _ => false,
        }
    }

    #[inline]
    pub fn raw_bits(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw_bits(bits: u64) -> Self {
        TValue(bits)
    }
}

impl Default for TValue {
    fn default() -> Self {
        TValue::nil()
    }
}

impl fmt::Debug for TValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "nil")
        } else if let Some(b) = self.as_bool() {
            write!(f, "{b}")
        } else if let Some(n) = self.as_number() {
            write!(f, "{n}")
        } else if let (Some(sub), Some(idx)) = (self.gc_sub_tag(), self.gc_index()) {
            let kind = match sub {
                GC_SUB_STRING => "string",
                GC_SUB_TABLE => "table",
                GC_SUB_CLOSURE => "closure",
                GC_SUB_NATIVE => "native",
                GC_SUB_THREAD => "thread",
                GC_SUB_USERDATA => "userdata",
                _ => "gc",
            };
            write!(f, "{kind}(#{idx})")
        } else {
            write!(f, "unknown({:#018x})", self.0)
        }
    }
}

impl PartialEq for TValue {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

impl From<f64> for TValue {
    fn from(n: f64) -> Self {
        TValue::from_number(n)
    }
}

impl From<bool> for TValue {
    fn from(b: bool) -> Self {
        TValue::from_bool(b)
    }
}

impl From<StringId> for TValue {
    fn from(id: StringId) -> Self {
        TValue::from_string_id(id)
    }
}
