use super::helpers::*;

#[test]
fn e2e_error_unfinished_string() {
    let err = compile_str_err("local x = \"hello");
    assert_eq!(err, "test:1: unfinished string near '<eof>'");
}

#[test]
fn e2e_error_break_outside_loop() {
    let err = compile_str_err("break");
    assert_eq!(err, "test:1: no loop to break near '<eof>'");
}

#[test]
fn e2e_error_unexpected_symbol() {
    let err = compile_str_err("return )");
    assert_eq!(err, "test:1: unexpected symbol near ')'");
}

#[test]
fn e2e_error_malformed_number() {
    let err = compile_str_err("local x = 1e");
    assert_eq!(err, "test:1: malformed number near '1e'");
}

#[test]
fn e2e_error_expected_end() {
    let err = compile_str_err("if true then");
    assert_eq!(err, "test:1: 'end' expected near '<eof>'");
}

#[test]
fn e2e_error_expected_end_other_line() {
    let err = compile_str_err("function f()\n  return 1\n");
    assert_eq!(err, "test:3: 'end' expected (to close 'function' at line 1) near '<eof>'");
}

#[test]
fn e2e_error_expected_then() {
    let err = compile_str_err("if true do end");
    assert_eq!(err, "test:1: 'then' expected near 'do'");
}

#[test]
fn e2e_error_vararg_outside() {
    let err = compile_str_err("function f() return ... end");
    assert!(err.contains("cannot use '...' outside a vararg function"));
}

#[test]
fn e2e_error_expression_not_statement() {
    let err = compile_str_err("42");
    assert_eq!(err, "test:1: unexpected symbol near '42'");
}

#[test]
fn e2e_error_call_result_not_assignable() {
    let err = compile_str_err("x, f() = 1, 2");
    assert!(err.contains("syntax error"), "{err}");
}

#[test]
fn e2e_error_for_missing_in() {
    let err = compile_str_err("for k v in pairs(t) do end");
    assert_eq!(err, "test:1: '=' or 'in' expected near 'v'");
}

#[test]
fn e2e_error_bad_parameter() {
    let err = compile_str_err("function f(a, 1) end");
    assert!(err.contains("<name> or '...' expected"), "{err}");
}

#[test]
fn e2e_error_string_escape_too_large() {
    let err = compile_str_err("x = '\\300'");
    assert!(err.contains("escape sequence too large"), "{err}");
}

#[test]
fn e2e_error_chunk_name_in_message() {
    let mut strings = moonlet_core::string::StringInterner::new();
    let err = moonlet_compiler::compile(b"x = ", "@scripts/broken.lua", &mut strings).unwrap_err();
    assert_eq!(err.to_string(), "scripts/broken.lua:1: unexpected symbol near '<eof>'");
    let err = moonlet_compiler::compile(b"x = ", "x = ", &mut strings).unwrap_err();
    assert!(err.to_string().starts_with("[string \"x = \"]:1:"));
}
