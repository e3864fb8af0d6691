//! Moonlet core types: values, strings, tables and the object heap.

pub mod gc;
pub mod number;
pub mod object;
pub mod string;
pub mod table;
pub mod value;
