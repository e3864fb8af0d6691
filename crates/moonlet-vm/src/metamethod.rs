//! Metatable lookup.

use moonlet_core::gc::{GcHeap, GcIdx};
use moonlet_core::string::{StringId, StringInterner};
use moonlet_core::table::Table;
use moonlet_core::value::TValue;

/// Pre-interned event names.
#[derive(Clone, Copy, Debug)]
pub struct MetamethodNames {
    pub index: StringId,
    pub newindex: StringId,
    pub call: StringId,
    pub add: StringId,
    pub sub: StringId,
    pub mul: StringId,
    pub div: StringId,
    pub mod_: StringId,
    pub pow: StringId,
    pub unm: StringId,
    pub len: StringId,
    pub concat: StringId,
    pub eq: StringId,
    pub lt: StringId,
    pub le: StringId,
    pub tostring: StringId,
    pub metatable: StringId,
}

impl MetamethodNames {
    pub fn init(strings: &mut StringInterner) -> Self {
        MetamethodNames {
            index: strings.intern(b"__index"),
            newindex: strings.intern(b"__newindex"),
            call: strings.intern(b"__call"),
            add: strings.intern(b"__add"),
            sub: strings.intern(b"__sub"),
            mul: strings.intern(b"__mul"),
            div: strings.intern(b"__div"),
            mod_: strings.intern(b"__mod"),
            pow: strings.intern(b"__pow"),
            unm: strings.intern(b"__unm"),
            len: strings.intern(b"__len"),
            concat: strings.intern(b"__concat"),
            eq: strings.intern(b"__eq"),
            lt: strings.intern(b"__lt"),
            le: strings.intern(b"__le"),
            tostring: strings.intern(b"__tostring"),
            metatable: strings.intern(b"__metatable"),
        }
    }

    pub fn all(&self) -> [StringId; 17] {
        [
            self.index,
            self.newindex,
            self.call,
            self.add,
            self.sub,
            self.mul,
            self.div,
            self.mod_,
            self.pow,
            self.unm,
            self.len,
            self.concat,
            self.eq,
            self.lt,
            self.le,
            self.tostring,
            self.metatable,
        ]
    }
}

/// Metatables shared by every value of a primitive type. Tables and
/// userdata carry their own.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeMetatables {
    pub nil: Option<GcIdx<Table>>,
    pub boolean: Option<GcIdx<Table>>,
    pub number: Option<GcIdx<Table>>,
    pub string: Option<GcIdx<Table>>,
    pub function: Option<GcIdx<Table>>,
    pub thread: Option<GcIdx<Table>>,
}

impl TypeMetatables {
    pub fn all(&self) -> [Option<GcIdx<Table>>; 6] {
        [
            self.nil,
            self.boolean,
            self.number,
            self.string,
            self.function,
            self.thread,
        ]
    }

    /// The metatable of `val`, if any.
    pub fn metatable_of(&self, val: TValue, gc: &GcHeap) -> Option<GcIdx<Table>> {
        if let Some(t) = val.as_table_idx() {
            return gc.get_table(t).metatable;
        }
        if let Some(u) = val.as_userdata_idx() {
            return gc.get_userdata(u).metatable;
        }
        if val.is_string() {
            self.string
        } else if val.is_number() {
            self.number
        } else if val.is_bool() {
            self.boolean
        } else if val.is_nil() {
            self.nil
        } else if val.is_function() {
            self.function
        } else if val.is_thread() {
            self.thread
        } else {
            None
        }
    }

    /// Slot for setting the shared metatable of `val`'s type. `None` for
    /// tables and userdata.
    pub fn slot_for(&mut self, val: TValue) -> Option<&mut Option<GcIdx<Table>>> {
        if val.is_string() {
            Some(&mut self.string)
        } else if val.is_number() {
            Some(&mut self.number)
        } else if val.is_bool() {
            Some(&mut self.boolean)
        } else if val.is_nil() {
            Some(&mut self.nil)
        } else if val.is_function() {
            Some(&mut self.function)
        } else if val.is_thread() {
            Some(&mut self.thread)
        } else {
            None
        }
    }

    /// Look up event `name` on `val`; nil handlers count as absent.
    pub fn get_metamethod(&self, val: TValue, name: StringId, gc: &GcHeap) -> Option<TValue> {
        let mt = self.metatable_of(val, gc)?;
        let handler = gc.get_table(mt).raw_get_str(name);
        (!handler.is_nil()).then_some(handler)
    }
}
