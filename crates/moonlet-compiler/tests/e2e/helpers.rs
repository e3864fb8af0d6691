use moonlet_compiler::compile;
use moonlet_compiler::opcode::OpCode;
use moonlet_compiler::proto::{Constant, Proto};
use moonlet_core::string::StringInterner;

/// Compile a source string and return the Proto + StringInterner.
pub fn compile_str(source: &str) -> (Proto, StringInterner) {
    let mut strings = StringInterner::new();
    let proto = compile(source.as_bytes(), "=test", &mut strings).unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    });
    (proto, strings)
}

/// Compile a source string and expect an error; returns the full message.
pub fn compile_str_err(source: &str) -> String {
    let mut strings = StringInterner::new();
    match compile(source.as_bytes(), "=test", &mut strings) {
        Err(e) => e.to_string(),
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

pub fn has_opcode(proto: &Proto, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.opcode() == op)
}

pub fn count_opcode(proto: &Proto, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.opcode() == op).count()
}

#[allow(dead_code)]
pub fn find_opcode(proto: &Proto, op: OpCode) -> Option<usize> {
    proto.code.iter().position(|i| i.opcode() == op)
}

/// String constant value by index.
pub fn get_string_constant(proto: &Proto, idx: usize, strings: &StringInterner) -> String {
    match &proto.constants[idx] {
        Constant::String(id) => strings.get_lossy(*id).into_owned(),
        other => panic!("expected string constant, got {other:?}"),
    }
}

#[allow(dead_code)]
pub fn get_number_constant(proto: &Proto, idx: usize) -> f64 {
    match &proto.constants[idx] {
        Constant::Number(n) => *n,
        other => panic!("expected number constant, got {other:?}"),
    }
}
