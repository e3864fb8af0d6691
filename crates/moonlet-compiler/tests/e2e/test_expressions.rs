use super::helpers::*;
use moonlet_compiler::opcode::{is_k, OpCode};

#[test]
fn e2e_arith_on_locals() {
    let (proto, _) = compile_str("local a, b = 1, 2\nreturn a + b * 2");
    assert!(has_opcode(&proto, OpCode::Mul));
    assert!(has_opcode(&proto, OpCode::Add));
}

#[test]
fn e2e_power_is_right_associative() {
    let (proto, _) = compile_str("local a, b, c\nreturn a ^ b ^ c");
    let pows: Vec<_> = proto.code.iter().filter(|i| i.opcode() == OpCode::Pow).collect();
    assert_eq!(pows.len(), 2);
    // b ^ c is evaluated first
    assert_eq!((pows[0].b(), pows[0].c()), (1, 2));
}

#[test]
fn e2e_unary_minus_folds_literal() {
    let (proto, _) = compile_str("return -5");
    assert!(!has_opcode(&proto, OpCode::Unm));
    assert_eq!(get_number_constant(&proto, 0), -5.0);
}

#[test]
fn e2e_unary_operators() {
    let (proto, _) = compile_str("local t, x\nreturn #t, -x, not x");
    assert!(has_opcode(&proto, OpCode::Len));
    assert!(has_opcode(&proto, OpCode::Unm));
    assert!(has_opcode(&proto, OpCode::Not));
}

#[test]
fn e2e_constant_operand_in_rk() {
    let (proto, _) = compile_str("local a\nreturn a + 10");
    let add = proto.code.iter().find(|i| i.opcode() == OpCode::Add).unwrap();
    assert!(is_k(add.c()));
}

#[test]
fn e2e_string_constants_dedup() {
    let (proto, strings) = compile_str("local a = 'x'; local b = 'x'; local c = 'y'");
    assert_eq!(proto.constants.len(), 2);
    assert_eq!(get_string_constant(&proto, 0, &strings), "x");
    assert_eq!(get_string_constant(&proto, 1, &strings), "y");
}

#[test]
fn e2e_field_access_uses_constant_key() {
    let (proto, strings) = compile_str("local t\nreturn t.name");
    let get = proto.code.iter().find(|i| i.opcode() == OpCode::GetTable).unwrap();
    assert!(is_k(get.c()));
    assert_eq!(get_string_constant(&proto, 0, &strings), "name");
}

#[test]
fn e2e_comparison_in_value_context() {
    let (proto, _) = compile_str("local a, b\nlocal c = a < b");
    assert!(has_opcode(&proto, OpCode::Lt));
    assert_eq!(count_opcode(&proto, OpCode::LoadBool), 2);
}

#[test]
fn e2e_not_equal_uses_eq() {
    let (proto, _) = compile_str("local a, b\nif a ~= b then a = 1 end");
    let eq = proto.code.iter().find(|i| i.opcode() == OpCode::Eq).unwrap();
    assert_eq!(eq.a(), 1);
}

#[test]
fn e2e_or_default_value() {
    let (proto, _) = compile_str("local a\nlocal b = a or 5");
    assert!(has_opcode(&proto, OpCode::TestSet));
}

#[test]
fn e2e_vararg_in_table() {
    let (proto, _) = compile_str("return {...}");
    assert!(has_opcode(&proto, OpCode::VarArg));
    let setlist = proto.code.iter().find(|i| i.opcode() == OpCode::SetList).unwrap();
    assert_eq!(setlist.b(), 0);
}

#[test]
fn e2e_call_with_string_and_table_args() {
    let (proto, _) = compile_str("f 'x'\ng { 1 }");
    assert_eq!(count_opcode(&proto, OpCode::Call), 2);
    assert!(has_opcode(&proto, OpCode::NewTable));
}

#[test]
fn e2e_paren_truncates_multiple_results() {
    let (proto, _) = compile_str("return (f())");
    let call = proto.code.iter().find(|i| i.opcode() == OpCode::Call).unwrap();
    assert_eq!(call.c(), 2);
}
