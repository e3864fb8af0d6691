//! Object kinds and type names.

use crate::gc::*;
use crate::value::TValue;

/// The kind of a heap object, decoded from a value's sub-tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcObjectType {
    Table,
    LuaClosure,
    NativeFunction,
    String,
    Thread,
    Userdata,
}

impl GcObjectType {
    pub fn from_sub_tag(tag: u64) -> Option<Self> {
        match tag {
            GC_SUB_TABLE => Some(GcObjectType::Table),
            GC_SUB_CLOSURE => Some(GcObjectType::LuaClosure),
            GC_SUB_NATIVE => Some(GcObjectType::NativeFunction),
            GC_SUB_STRING => Some(GcObjectType::String),
            GC_SUB_THREAD => Some(GcObjectType::Thread),
            GC_SUB_USERDATA => Some(GcObjectType::Userdata),
            _ => None,
        }
    }
}

/// The language-level type name of a value, as returned by `type()`.
pub fn lua_type_name(val: TValue) -> &'static str {
    if val.is_nil() {
        return "nil";
    }
    if val.is_bool() {
        return "boolean";
    }
    if val.is_number() {
        return "number";
    }
    match val.gc_sub_tag().and_then(GcObjectType::from_sub_tag) {
        Some(GcObjectType::Table) => "table",
        Some(GcObjectType::LuaClosure | GcObjectType::NativeFunction) => "function",
        Some(GcObjectType::String) => "string",
        Some(GcObjectType::Thread) => "thread",
        Some(GcObjectType::Userdata) | None => "userdata",
    }
}
