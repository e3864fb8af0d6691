/// Bytecode listing in the style of `luac -l`.
use crate::opcode::{index_k, is_k, Instruction, InstructionFormat, OpCode};
use crate::proto::{Constant, Proto, UpvalSource};
use moonlet_core::number::format_number;
use moonlet_core::string::StringInterner;
use std::fmt::Write;

/// Disassemble a prototype and all nested prototypes.
pub fn disassemble(proto: &Proto, strings: &StringInterner) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, strings);
    out
}

fn disassemble_proto(out: &mut String, proto: &Proto, strings: &StringInterner) {
    let kind = if proto.line_defined == 0 { "main" } else { "function" };
    writeln!(
        out,
        "\n{kind} <{}:{},{}> ({} instructions)",
        proto.chunk_id(),
        proto.line_defined,
        proto.last_line_defined,
        proto.code.len()
    )
    .unwrap();
    let vararg = if proto.is_vararg { "+" } else { "" };
    writeln!(
        out,
        "{}{vararg} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
        proto.num_params,
        proto.max_stack_size,
        proto.upvalues.len(),
        proto.local_vars.len(),
        proto.constants.len(),
        proto.protos.len(),
    )
    .unwrap();

    let mut pc = 0;
    while pc < proto.code.len() {
        let inst = proto.code[pc];
        let line = proto.get_line(pc);
        let line_str = if line > 0 { format!("[{line}]") } else { "[-]".to_string() };
        write!(out, "\t{}\t{line_str}\t", pc + 1).unwrap();
        disasm_instruction(out, &inst, pc, proto, strings);
        writeln!(out).unwrap();
        if inst.opcode() == OpCode::SetList && inst.c() == 0 {
            // raw batch number follows
            pc += 1;
            if let Some(raw) = proto.code.get(pc) {
                writeln!(out, "\t{}\t{line_str}\t{:<10}{}", pc + 1, "(batch)", raw.0).unwrap();
            }
        }
        pc += 1;
    }

    writeln!(out, "constants ({}):", proto.constants.len()).unwrap();
    for (i, k) in proto.constants.iter().enumerate() {
        write!(out, "\t{}\t", i + 1).unwrap();
        format_constant(out, k, strings);
        writeln!(out).unwrap();
    }

    writeln!(out, "locals ({}):", proto.local_vars.len()).unwrap();
    for (i, var) in proto.local_vars.iter().enumerate() {
        writeln!(
            out,
            "\t{i}\t{}\t{}\t{}",
            strings.get_lossy(var.name),
            var.start_pc + 1,
            var.end_pc + 1
        )
        .unwrap();
    }

    writeln!(out, "upvalues ({}):", proto.upvalues.len()).unwrap();
    for (i, up) in proto.upvalues.iter().enumerate() {
        let (instack, idx) = match up.source {
            UpvalSource::Local(r) => (1, r),
            UpvalSource::Upvalue(u) => (0, u),
        };
        writeln!(out, "\t{i}\t{}\t{instack}\t{idx}", strings.get_lossy(up.name)).unwrap();
    }

    for p in &proto.protos {
        disassemble_proto(out, p, strings);
    }
}

/// Render one instruction with a trailing comment for constants, jump
/// targets and globals.
pub fn disasm_instruction(
    out: &mut String,
    inst: &Instruction,
    pc: usize,
    proto: &Proto,
    strings: &StringInterner,
) {
    let op = inst.opcode();
    write!(out, "{:<10}", op.name()).unwrap();

    match op.format() {
        InstructionFormat::IABC => {
            let b = rk_operand(inst.b(), op.b_is_rk());
            let c = rk_operand(inst.c(), op.c_is_rk());
            write!(out, "{} {b} {c}", inst.a()).unwrap();
            let mut notes = Vec::new();
            for (raw, rk) in [(inst.b(), op.b_is_rk()), (inst.c(), op.c_is_rk())] {
                if rk && is_k(raw) {
                    if let Some(k) = proto.constants.get(index_k(raw) as usize) {
                        let mut s = String::new();
                        format_constant(&mut s, k, strings);
                        notes.push(s);
                    }
                }
            }
            if op == OpCode::GetUpval || op == OpCode::SetUpval {
                if let Some(up) = proto.upvalues.get(inst.b() as usize) {
                    notes.push(strings.get_lossy(up.name).into_owned());
                }
            }
            if !notes.is_empty() {
                write!(out, "\t; {}", notes.join(" ")).unwrap();
            }
        }
        InstructionFormat::IABx => {
            write!(out, "{} {}", inst.a(), bx_operand(op, inst.bx())).unwrap();
            match op {
                OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal => {
                    if let Some(k) = proto.constants.get(inst.bx() as usize) {
                        write!(out, "\t; ").unwrap();
                        format_constant(out, k, strings);
                    }
                }
                OpCode::Closure => write!(out, "\t; function [{}]", inst.bx()).unwrap(),
                _ => {}
            }
        }
        InstructionFormat::IAsBx => {
            write!(out, "{} {}", inst.a(), inst.sbx()).unwrap();
            let target = pc as i64 + 1 + inst.sbx() as i64;
            write!(out, "\t; to {}", target + 1).unwrap();
        }
    }
}

/// Constant operands print as negative 1-based indices, like `luac`.
fn rk_operand(raw: u32, rk: bool) -> String {
    if rk && is_k(raw) {
        format!("-{}", index_k(raw) + 1)
    } else {
        raw.to_string()
    }
}

fn bx_operand(op: OpCode, bx: u32) -> String {
    match op {
        OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal => format!("-{}", bx + 1),
        _ => bx.to_string(),
    }
}

fn format_constant(out: &mut String, k: &Constant, strings: &StringInterner) {
    match k {
        Constant::Nil => write!(out, "nil").unwrap(),
        Constant::Boolean(b) => write!(out, "{b}").unwrap(),
        Constant::Number(n) => write!(out, "{}", format_number(*n)).unwrap(),
        Constant::String(id) => write!(out, "\"{}\"", strings.get_lossy(*id)).unwrap(),
    }
}
