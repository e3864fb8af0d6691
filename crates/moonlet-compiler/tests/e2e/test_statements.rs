use super::helpers::*;
use moonlet_compiler::opcode::OpCode;

#[test]
fn e2e_local_declaration() {
    let (proto, _) = compile_str("local x = 42");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(proto.local_vars.len(), 1);
}

#[test]
fn e2e_local_fewer_values() {
    let (proto, _) = compile_str("local a, b, c = 1");
    assert!(has_opcode(&proto, OpCode::LoadK));
    let nil = proto.code.iter().find(|i| i.opcode() == OpCode::LoadNil).unwrap();
    assert_eq!((nil.a(), nil.b()), (1, 2));
}

#[test]
fn e2e_local_extra_values_are_evaluated() {
    let (proto, _) = compile_str("local a = 1, f()");
    let call = proto.code.iter().find(|i| i.opcode() == OpCode::Call).unwrap();
    assert_eq!(call.c(), 1);
}

#[test]
fn e2e_local_from_call_expands() {
    let (proto, _) = compile_str("local a, b, c = f()");
    let call = proto.code.iter().find(|i| i.opcode() == OpCode::Call).unwrap();
    assert_eq!(call.c(), 4);
}

#[test]
fn e2e_global_assign() {
    let (proto, strings) = compile_str("x = 42");
    assert!(has_opcode(&proto, OpCode::SetGlobal));
    assert_eq!(get_string_constant(&proto, 0, &strings), "x");
}

#[test]
fn e2e_multiple_assignment() {
    let (proto, _) = compile_str("local a, b = 1, 2\na, b = b, a");
    assert_eq!(count_opcode(&proto, OpCode::Move), 3);
}

#[test]
fn e2e_table_field_assign() {
    let (proto, _) = compile_str("local t = {}\nt.x = 1\nt[2] = 'y'");
    assert_eq!(count_opcode(&proto, OpCode::SetTable), 2);
}

#[test]
fn e2e_if_elseif_else() {
    let (proto, _) = compile_str(
        "local x\nif x == 1 then x = 2 elseif x == 2 then x = 3 else x = 4 end",
    );
    assert_eq!(count_opcode(&proto, OpCode::Eq), 2);
    assert!(count_opcode(&proto, OpCode::Jmp) >= 4);
}

#[test]
fn e2e_while_loop_jumps_back() {
    let (proto, _) = compile_str("local i = 0\nwhile i < 10 do i = i + 1 end");
    let back = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::Jmp)
        .any(|i| i.sbx() < 0);
    assert!(back);
}

#[test]
fn e2e_repeat_until() {
    let (proto, _) = compile_str("local i = 0\nrepeat i = i + 1 until i >= 10");
    assert!(has_opcode(&proto, OpCode::Le));
}

#[test]
fn e2e_repeat_with_captured_local_closes() {
    let (proto, _) = compile_str("repeat local x = 1; f = function() return x end until x");
    assert!(has_opcode(&proto, OpCode::Close));
}

#[test]
fn e2e_numeric_for_with_step() {
    let (proto, _) = compile_str("for i = 10, 1, -1 do end");
    assert!(has_opcode(&proto, OpCode::ForPrep));
    assert!(has_opcode(&proto, OpCode::ForLoop));
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 3);
}

#[test]
fn e2e_generic_for() {
    let (proto, strings) = compile_str("for k, v in pairs(t) do end");
    assert!(has_opcode(&proto, OpCode::TForLoop));
    let names: Vec<String> = proto
        .local_vars
        .iter()
        .map(|v| strings.get_lossy(v.name).into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["(for generator)", "(for state)", "(for control)", "k", "v"]
    );
}

#[test]
fn e2e_break_in_loop() {
    let (proto, _) = compile_str("while true do break end");
    assert!(count_opcode(&proto, OpCode::Jmp) >= 2);
}

#[test]
fn e2e_break_closes_captured_locals() {
    let (proto, _) = compile_str("while true do local x; f = function() return x end; do break end end");
    assert!(count_opcode(&proto, OpCode::Close) >= 2);
}

#[test]
fn e2e_do_block_scoping() {
    let (proto, _) = compile_str("do local x = 1 end\nlocal y = 2");
    assert_eq!(proto.local_vars.len(), 2);
    assert!(proto.local_vars[0].end_pc <= proto.local_vars[1].start_pc);
}

#[test]
fn e2e_semicolons() {
    let (proto, _) = compile_str("local a = 1; local b = 2;");
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 2);
}

#[test]
fn e2e_empty_statement_rejected() {
    let err = compile_str_err("local a = 1;;");
    assert_eq!(err, "test:1: unexpected symbol near ';'");
}
