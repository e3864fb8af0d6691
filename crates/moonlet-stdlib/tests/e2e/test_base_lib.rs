use super::helpers::*;

#[test]
fn test_type_names() {
    run_check_strs(
        r#"
        return type(nil), type(true), type(1), type("s"), type({}), type(print),
            type(function() end), type(coroutine.create(function() end))
        "#,
        &["nil", "boolean", "number", "string", "table", "function", "function", "thread"],
    );
}

#[test]
fn test_tostring() {
    run_check_strs(
        r#"
        local obj = setmetatable({}, {__tostring = function() return "obj" end})
        return tostring(nil), tostring(true), tostring(12.5), tostring(obj)
        "#,
        &["nil", "true", "12.5", "obj"],
    );
    let r = run_lua_display("return tostring({})");
    assert!(r[0].starts_with("table: 0x"), "{}", r[0]);
}

#[test]
fn test_tonumber() {
    let r = run_lua(
        r#"
        return tonumber("0x1F"), tonumber("  12  "), tonumber("z", 36), tonumber("10", 2),
            tonumber("abc"), tonumber("1e2"), tonumber(5)
        "#,
    );
    assert_num(&r, 0, 31.0);
    assert_num(&r, 1, 12.0);
    assert_num(&r, 2, 35.0);
    assert_num(&r, 3, 2.0);
    assert_nil(&r, 4);
    assert_num(&r, 5, 100.0);
    assert_num(&r, 6, 5.0);
    let err = run_lua_err(r#"return tonumber("1", 99)"#);
    assert!(err.contains("base out of range"), "{err}");
}

#[test]
fn test_select() {
    run_check_display(
        r##"
        local a = select("#", 1, nil, 3)
        local b, c = select(2, "a", "b", "c")
        local d = select(-1, "x", "y")
        return a, b, c, d
        "##,
        &["3", "b", "c", "y"],
    );
    let err = run_lua_err("return select(0, 1)");
    assert!(err.contains("bad argument #1 to 'select' (index out of range)"), "{err}");
}

#[test]
fn test_ipairs_stops_at_nil() {
    run_check_nums(
        r#"
        local s, n = 0, 0
        for i, v in ipairs({1, 2, nil, 4}) do s = s + v n = i end
        return s, n
        "#,
        &[3.0, 2.0],
    );
}

#[test]
fn test_pairs_visits_every_key() {
    run_check_nums(
        r#"
        local t = {10, 20, 30, x = 1, y = 2, [100] = 5}
        local count, sum = 0, 0
        for k, v in pairs(t) do count = count + 1 sum = sum + v end
        return count, sum
        "#,
        &[6.0, 68.0],
    );
}

#[test]
fn test_pairs_allows_clearing_fields() {
    run_check_nums(
        r#"
        local t = {a = 1, b = 2, c = 3, d = 4}
        for k in pairs(t) do t[k] = nil end
        return next(t) == nil and 1 or 0
        "#,
        &[1.0],
    );
}

#[test]
fn test_next() {
    let r = run_lua("return next({})");
    assert_nil(&r, 0);
    let err = run_lua_err("return next({}, 'missing')");
    assert!(err.contains("invalid key to 'next'"), "{err}");
}

#[test]
fn test_raw_access_bypasses_metamethods() {
    run_check_display(
        r#"
        local t = setmetatable({}, {
            __index = function() return "meta" end,
            __newindex = function() error("blocked") end,
        })
        rawset(t, "k", "raw")
        return t.k, rawget(t, "other"), t.other, rawequal(t, t), rawequal(t, {})
        "#,
        &["raw", "nil", "meta", "true", "false"],
    );
}

#[test]
fn test_protected_metatable() {
    let r = run_lua_display(
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        local ok, msg = pcall(setmetatable, t, {})
        return getmetatable(t), ok, msg
        "#,
    );
    assert_eq!(r[0], "locked");
    assert_eq!(r[1], "false");
    assert!(r[2].contains("cannot change a protected metatable"), "{}", r[2]);
}

#[test]
fn test_setmetatable_argument_checks() {
    let err = run_lua_err("setmetatable({}, 5)");
    assert!(err.contains("bad argument #2 to 'setmetatable'"), "{err}");
    let err = run_lua_err("setmetatable(5, {})");
    assert!(err.contains("bad argument #1 to 'setmetatable' (table expected, got number)"), "{err}");
}

#[test]
fn test_assert() {
    run_check_nums("return assert(1, 2)", &[1.0, 2.0]);
    let err = run_lua_err("assert(false, 'custom')");
    assert_eq!(err, "test:1: custom");
    let err = run_lua_err("assert(nil)");
    assert_eq!(err, "test:1: assertion failed!");
}

#[test]
fn test_error_levels() {
    let r = run_lua_display(
        "local function check(x)\n  if not x then error(\"bad input\", 2) end\nend\nlocal function caller()\n  check(false)\nend\nlocal ok, e = pcall(caller)\nreturn e",
    );
    assert_eq!(r[0], "test:5: bad input");
    let r = run_lua_display("local ok, e = pcall(function() error('plain', 0) end) return e");
    assert_eq!(r[0], "plain");
}

#[test]
fn test_error_non_string_values() {
    run_check_display(
        r#"
        local ok, e = pcall(error, 42)
        local ok2, e2 = pcall(error)
        return e, e2
        "#,
        &["42", "nil"],
    );
}

#[test]
fn test_xpcall() {
    run_check_display(
        r#"
        local a, b = xpcall(function() error("oops", 0) end, function(m) return "handled: " .. m end)
        local c, d = xpcall(function() return "fine" end, print)
        return a, b, c, d
        "#,
        &["false", "handled: oops", "true", "fine"],
    );
}

#[test]
fn test_xpcall_failing_handler() {
    run_check_display(
        r#"
        local ok, msg = xpcall(function() error("first") end, function(m) error("second") end)
        return ok, msg
        "#,
        &["false", "error in error handling"],
    );
}

#[test]
fn test_recursive_tostring_raises_c_stack_overflow() {
    let out = run_lua_display(
        r#"
        local t = setmetatable({}, {__tostring = function(self) return tostring(self) end})
        return pcall(tostring, t)
        "#,
    );
    assert_eq!(out[0], "false");
    assert!(out[1].contains("C stack overflow"), "{}", out[1]);
}

#[test]
fn test_collectgarbage_options() {
    run_check_display(
        r#"
        collectgarbage("stop")
        local kb = collectgarbage("count")
        collectgarbage("restart")
        local p1 = collectgarbage("setpause", 150)
        local p2 = collectgarbage("setpause", 200)
        return type(kb), kb > 0, p1, p2, collectgarbage("step"), collectgarbage()
        "#,
        &["number", "true", "200", "150", "true", "0"],
    );
    let err = run_lua_err("collectgarbage('bogus')");
    assert!(
        err.contains("bad argument #1 to 'collectgarbage' (invalid option 'bogus')"),
        "{err}"
    );
}

#[test]
fn test_unpack() {
    run_check_nums("return unpack({1, 2, 3})", &[1.0, 2.0, 3.0]);
    run_check_nums("return unpack({1, 2, 3}, 2)", &[2.0, 3.0]);
    run_check_nums("return unpack({1, 2, 3}, 2, 2)", &[2.0]);
    let r = run_lua("return unpack({}, 1, 0)");
    assert!(r.is_empty());
}

#[test]
fn test_function_environments() {
    run_check_nums(
        r#"
        x = 1
        local function f() return x end
        setfenv(f, {x = 5})
        local env = getfenv(f)
        return f(), env.x, x
        "#,
        &[5.0, 5.0, 1.0],
    );
}

#[test]
fn test_getfenv_levels() {
    let r = run_lua("return getfenv(0) == _G, getfenv(1) == _G, getfenv() == _G");
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, true);
}

#[test]
fn test_loadstring() {
    run_check_nums("local f = loadstring('return 1 + 1') return f()", &[2.0]);
    let r = run_lua_display("local f, e = loadstring('return +') return f, e");
    assert_eq!(r[0], "nil");
    assert!(r[1].starts_with("[string \"return +\"]:1:"), "{}", r[1]);
    run_check_nums(
        "local f = loadstring('local a, b = ... return a * b') return f(6, 7)",
        &[42.0],
    );
}

#[test]
fn test_loadstring_chunks_share_globals() {
    run_check_nums("loadstring('shared = 9')() return shared", &[9.0]);
}

#[test]
fn test_version_and_g() {
    let r = run_lua_display("return _VERSION, _G._G == _G");
    assert_eq!(r, vec!["Lua 5.1", "true"]);
}
