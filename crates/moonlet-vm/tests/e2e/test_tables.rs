use super::helpers::*;

#[test]
fn test_integer_float_keys_match() {
    run_check_display(
        r#"
        local t = {}
        t[1.0] = "a"
        t["1"] = "s"
        return t[1], t["1"], t[2 / 2]
        "#,
        &["a", "s", "a"],
    );
}

#[test]
fn test_nil_and_nan_keys_rejected() {
    let err = run_lua_err("local t = {}\nt[nil] = 1");
    assert!(err.contains("table index is nil"), "{err}");
    let err = run_lua_err("local t = {}\nt[0/0] = 1");
    assert!(err.contains("table index is NaN"), "{err}");
}

#[test]
fn test_reading_nil_key_is_nil() {
    let r = run_lua("local t = {} return t[nil]");
    assert_nil(&r, 0);
}

#[test]
fn test_large_constructor_flushes_in_batches() {
    run_check_nums(
        "local t = {1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 65, 66, 67, 68, 69, 70, 71, 72, 73, 74, 75, 76, 77, 78, 79, 80, 81, 82, 83, 84, 85, 86, 87, 88, 89, 90, 91, 92, 93, 94, 95, 96, 97, 98, 99, 100, 101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 116, 117, 118, 119, 120} return #t, t[1], t[50], t[51], t[120]",
        &[120.0, 1.0, 50.0, 51.0, 120.0],
    );
}

#[test]
fn test_constructor_with_trailing_varargs() {
    run_check_nums(
        r#"
        local function pack(...) return {0, ...} end
        local t = pack(1, 2, 3)
        return #t, t[4]
        "#,
        &[4.0, 3.0],
    );
}

#[test]
fn test_length_border_after_removal() {
    run_check_nums(
        "local t = {1, 2, 3} t[3] = nil return #t",
        &[2.0],
    );
}

#[test]
fn test_mixed_keys() {
    run_check_nums(
        r#"
        local t = {10, 20, x = 1, ["y"] = 2, [-1] = 3, [1.5] = 4}
        return t[1] + t[2], t.x + t.y, t[-1], t[1.5]
        "#,
        &[30.0, 3.0, 3.0, 4.0],
    );
}

#[test]
fn test_nested_constructors() {
    run_check_nums(
        "local t = {a = {b = {c = 3}}, {1, {2}}} return t.a.b.c, t[1][2][1]",
        &[3.0, 2.0],
    );
}

#[test]
fn test_table_identity() {
    let r = run_lua("local a = {} local b = a b.x = 1 return a.x, a == b");
    assert_num(&r, 0, 1.0);
    assert_bool(&r, 1, true);
}

#[test]
fn test_array_grows_through_hash_part() {
    run_check_nums(
        r#"
        local t = {}
        t[3] = 3
        t[2] = 2
        t[1] = 1
        local s = 0
        for i = 1, 3 do s = s + t[i] end
        return #t, s
        "#,
        &[3.0, 6.0],
    );
}
