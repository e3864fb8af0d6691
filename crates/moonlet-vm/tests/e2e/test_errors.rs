use super::helpers::*;
use moonlet_vm::{LuaError, RuntimeErrorKind};

#[test]
fn test_call_nil_global_names_the_global() {
    let err = run_lua_err("foo()");
    assert_eq!(err, "test:1: attempt to call global 'foo' (a nil value)");
}

#[test]
fn test_index_nil_field() {
    let err = run_lua_err("local t = {}\nreturn t.x.y");
    assert_eq!(err, "test:2: attempt to index field 'x' (a nil value)");
}

#[test]
fn test_arithmetic_on_nil_local() {
    let err = run_lua_err("local a\nlocal b = 1\nreturn b + a");
    assert!(
        err.contains("attempt to perform arithmetic on local 'a' (a nil value)"),
        "{err}"
    );
}

#[test]
fn test_index_upvalue() {
    let err = run_lua_err("local a\nlocal function f() return a.b end\nreturn f()");
    assert!(err.contains("attempt to index upvalue 'a' (a nil value)"), "{err}");
}

#[test]
fn test_concat_and_compare_errors() {
    let err = run_lua_err(r#"return {} .. "x""#);
    assert!(err.contains("attempt to concatenate a table value"), "{err}");
    let err = run_lua_err(r#"return 1 < "2""#);
    assert!(err.contains("attempt to compare number with string"), "{err}");
    let err = run_lua_err("return {} < {}");
    assert!(err.contains("attempt to compare two table values"), "{err}");
}

#[test]
fn test_length_of_nil() {
    let err = run_lua_err("local n\nreturn #n");
    assert!(err.contains("attempt to get length of local 'n' (a nil value)"), "{err}");
}

#[test]
fn test_for_loop_requires_numbers() {
    let err = run_lua_err(r#"for i = 1, "x" do end"#);
    assert!(err.contains("'for' limit must be a number"), "{err}");
}

#[test]
fn test_unbounded_recursion_overflows() {
    let err = run_lua_err("local function f() return 1 + f() end\nreturn f()");
    assert!(err.contains("stack overflow"), "{err}");
}

#[test]
fn test_stack_overflow_kind() {
    let mut vm = new_vm();
    let err = vm
        .execute("local function f() return 1 + f() end return f()", "=test")
        .unwrap_err();
    assert_eq!(err.kind(), Some(RuntimeErrorKind::StackOverflow));
}

#[test]
fn test_pcall_catches_with_position() {
    run_check_display(
        "local ok, msg = pcall(function()\n  error(\"boom\")\nend)\nreturn ok, msg",
        &["false", "test:2: boom"],
    );
}

#[test]
fn test_pcall_returns_traceback_and_raw_value() {
    let out = run_lua_display(
        "local ok, msg, tb, raw = pcall(function() error(\"boom\") end)\nreturn ok, raw, tb",
    );
    assert_eq!(out[0], "false");
    assert_eq!(out[1], "boom");
    assert!(out[2].starts_with("stack traceback:"), "{}", out[2]);
}

#[test]
fn test_pcall_success_prefixes_true() {
    run_check_display(
        "return pcall(function(a, b) return a + b, 'x' end, 2, 3)",
        &["true", "5", "x"],
    );
}

#[test]
fn test_error_with_table_value() {
    run_check_nums(
        "local ok, e = pcall(function() error({code = 7}) end)\nreturn e.code",
        &[7.0],
    );
}

#[test]
fn test_runtime_error_inside_pcall_does_not_escape() {
    run_check_display(
        "local ok, e = pcall(function() local t = nil return t.x end)\nreturn ok, e",
        &["false", "test:1: attempt to index local 't' (a nil value)"],
    );
}

#[test]
fn test_nested_pcall() {
    run_check_display(
        r#"
        local ok1, ok2, msg = pcall(function()
            return pcall(function() error("inner", 0) end)
        end)
        return ok1, ok2, msg
        "#,
        &["true", "false", "inner"],
    );
}

#[test]
fn test_compile_error_is_reported() {
    let mut vm = new_vm();
    let err = vm.execute("x = = 1", "=test").unwrap_err();
    assert!(matches!(err, LuaError::Compile(_)), "{err:?}");
    assert!(err.to_string().starts_with("test:1:"), "{err}");
}

#[test]
fn test_vm_usable_after_error() {
    let mut vm = new_vm();
    assert!(vm.execute("error('first')", "=test").is_err());
    assert!(vm.is_idle());
    let r = vm.execute("return 40 + 2", "=test").unwrap();
    assert_eq!(r[0].as_number(), Some(42.0));
}

#[test]
fn test_chunk_names_in_messages() {
    let mut vm = new_vm();
    let err = vm.execute("local t\nt.x = 1", "@scripts/demo.lua").unwrap_err();
    assert!(err.to_string().starts_with("scripts/demo.lua:2:"), "{err}");
    let err = vm.execute("local t\nt.x = 1", "local t").unwrap_err();
    assert!(err.to_string().starts_with("[string \"local t\"]:2:"), "{err}");
}

#[test]
fn test_deep_traceback_elides_middle_levels() {
    let out = run_lua_display(
        "local function f(n) if n == 0 then error('deep') end return 1 + f(n - 1) end\n\
         local ok, msg, tb = pcall(f, 40)\n\
         return tb",
    );
    let levels: Vec<&str> = out[0].lines().skip(1).collect();
    assert_eq!(levels.len(), 23, "{}", out[0]);
    assert_eq!(levels[12], "\t...");
    assert!(levels[0].contains("in function <test:1>"), "{}", out[0]);
    assert!(levels[22].contains("in main chunk"), "{}", out[0]);
}
