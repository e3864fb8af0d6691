//! Names for registers in error messages (`global 'x'`, `local 't'`...).

use moonlet_compiler::opcode::{index_k, is_k, OpCode};
use moonlet_compiler::proto::{Constant, Proto};
use moonlet_core::string::StringInterner;

/// Describe what register `reg` holds at `pc`, if it can be named.
pub fn describe_register(
    proto: &Proto,
    pc: usize,
    reg: u32,
    strings: &StringInterner,
) -> Option<String> {
    if let Some(name) = proto.local_name(reg as usize + 1, pc as u32) {
        return Some(format!("local '{}'", strings.get_lossy(name)));
    }
    let setter = last_setter(proto, pc, reg)?;
    let inst = proto.code[setter];
    match inst.opcode() {
        OpCode::GetGlobal => {
            constant_name(proto, inst.bx(), strings).map(|n| format!("global '{n}'"))
        }
        OpCode::GetTable if is_k(inst.c()) => {
            constant_name(proto, index_k(inst.c()), strings).map(|n| format!("field '{n}'"))
        }
        OpCode::Self_ if is_k(inst.c()) => {
            constant_name(proto, index_k(inst.c()), strings).map(|n| format!("method '{n}'"))
        }
        OpCode::GetUpval => proto
            .upvalues
            .get(inst.b() as usize)
            .map(|u| format!("upvalue '{}'", strings.get_lossy(u.name))),
        OpCode::Move if inst.b() < inst.a() => describe_register(proto, setter, inst.b(), strings),
        _ => None,
    }
}

fn constant_name(proto: &Proto, idx: u32, strings: &StringInterner) -> Option<String> {
    match proto.constants.get(idx as usize)? {
        Constant::String(sid) => Some(strings.get_lossy(*sid).into_owned()),
        _ => None,
    }
}

/// The last instruction before `last_pc` that writes `reg`, scanning
/// straight-line.
fn last_setter(proto: &Proto, last_pc: usize, reg: u32) -> Option<usize> {
    let mut found = None;
    let mut pc = 0;
    while pc < last_pc.min(proto.code.len()) {
        let inst = proto.code[pc];
        let a = inst.a();
        let sets = match inst.opcode() {
            OpCode::Move
            | OpCode::LoadK
            | OpCode::LoadBool
            | OpCode::GetUpval
            | OpCode::GetGlobal
            | OpCode::GetTable
            | OpCode::NewTable
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Unm
            | OpCode::Not
            | OpCode::Len
            | OpCode::Concat
            | OpCode::Closure => a == reg,
            OpCode::LoadNil => a <= reg && reg <= inst.b(),
            OpCode::Self_ => reg == a || reg == a + 1,
            OpCode::Call | OpCode::TailCall | OpCode::VarArg => reg >= a,
            OpCode::TForLoop => reg >= a + 2,
            OpCode::ForLoop | OpCode::ForPrep => reg >= a && reg <= a + 3,
            _ => false,
        };
        if sets {
            found = Some(pc);
        }
        if inst.opcode() == OpCode::SetList && inst.c() == 0 {
            pc += 1;
        }
        pc += 1;
    }
    found
}
