//! Moonlet compiler: lexer, single-pass parser and register bytecode
//! generator.

pub mod compiler;
pub mod disasm;
pub mod lexer;
pub mod opcode;
pub mod proto;
pub mod token;

pub use compiler::{compile, CompileError};
pub use proto::Proto;
