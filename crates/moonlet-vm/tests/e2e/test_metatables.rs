use super::helpers::*;
use moonlet_vm::RuntimeErrorKind;

#[test]
fn test_index_table_chain() {
    run_check_nums(
        r#"
        local base = {greet = 1}
        local mid = setmetatable({}, {__index = base})
        local obj = setmetatable({}, {__index = mid})
        return obj.greet
        "#,
        &[1.0],
    );
}

#[test]
fn test_index_function_receives_table_and_key() {
    run_check_display(
        r#"
        local t = setmetatable({}, {__index = function(tbl, k) return k .. "!" end})
        return t.hello, t[1]
        "#,
        &["hello!", "1!"],
    );
}

#[test]
fn test_index_chain_too_long() {
    let err = run_lua_err(
        r#"
        local a, b = {}, {}
        setmetatable(a, {__index = b})
        setmetatable(b, {__index = a})
        return a.missing
        "#,
    );
    assert!(err.contains("'__index' chain too long; possible loop"), "{err}");
}

#[test]
fn test_index_chain_error_is_recursion_limit() {
    let mut vm = new_vm();
    let err = vm
        .execute(
            "local a = {} setmetatable(a, {__index = a}) return a.x",
            "=test",
        )
        .unwrap_err();
    assert_eq!(err.kind(), Some(RuntimeErrorKind::RecursionLimit));
}

#[test]
fn test_newindex_function_and_table() {
    run_check_nums(
        r#"
        local log = {}
        local t = setmetatable({}, {__newindex = function(tbl, k, v) log[k] = v * 2 end})
        t.a = 5
        local store = {}
        local u = setmetatable({}, {__newindex = store})
        u.b = 7
        return log.a, store.b, u.b == nil and 1 or 0
        "#,
        &[10.0, 7.0, 1.0],
    );
}

#[test]
fn test_arithmetic_metamethods() {
    run_check_nums(
        r#"
        local mt = {}
        mt.__add = function(a, b) return a.v + b.v end
        mt.__unm = function(a) return -a.v end
        mt.__mul = function(a, b) return a.v * b end
        local x = setmetatable({v = 2}, mt)
        local y = setmetatable({v = 5}, mt)
        return x + y, -x, x * 4
        "#,
        &[7.0, -2.0, 8.0],
    );
}

#[test]
fn test_comparison_metamethods() {
    run_check_display(
        r#"
        local mt = {}
        mt.__lt = function(a, b) return a.v < b.v end
        mt.__le = function(a, b) return a.v <= b.v end
        mt.__eq = function(a, b) return a.v == b.v end
        local a = setmetatable({v = 1}, mt)
        local b = setmetatable({v = 2}, mt)
        local c = setmetatable({v = 1}, mt)
        return a < b, b <= a, a == c, a ~= b, a > b
        "#,
        &["true", "false", "true", "true", "false"],
    );
}

#[test]
fn test_le_falls_back_to_lt() {
    run_check_display(
        r#"
        local mt = {__lt = function(a, b) return a.v < b.v end}
        local a = setmetatable({v = 1}, mt)
        local b = setmetatable({v = 2}, mt)
        return a <= b, b <= a
        "#,
        &["true", "false"],
    );
}

#[test]
fn test_concat_metamethod_in_chain() {
    run_check_display(
        r#"
        local t = {}
        setmetatable(t, {__concat = function(a, b)
            if a == t then return "T" .. b end
            return a .. "T"
        end})
        return "a" .. t .. "b" .. "c"
        "#,
        &["aTbc"],
    );
}

#[test]
fn test_call_metamethod() {
    run_check_nums(
        r#"
        local callable = setmetatable({}, {__call = function(self, a, b) return a * b end})
        return callable(6, 7)
        "#,
        &[42.0],
    );
}

#[test]
fn test_len_metamethod_ignored_for_tables() {
    run_check_nums(
        r#"
        local t = setmetatable({1, 2}, {__len = function() return 99 end})
        return #t
        "#,
        &[2.0],
    );
}
