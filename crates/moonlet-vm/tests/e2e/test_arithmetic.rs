use super::helpers::*;

#[test]
fn test_return_sum() {
    let r = run_lua("return 1+2");
    assert_eq!(r.len(), 1);
    assert_num(&r, 0, 3.0);
}

#[test]
fn test_basic_operators() {
    run_check_nums(
        "return 7 - 10, 6 * 7, 10 / 4, 2 ^ 10, -2 ^ 2",
        &[-3.0, 42.0, 2.5, 1024.0, -4.0],
    );
}

#[test]
fn test_modulo_follows_divisor_sign() {
    run_check_nums("return 7 % 3, -7 % 3, 7 % -3, 5.5 % 2", &[1.0, 2.0, -2.0, 1.5]);
}

#[test]
fn test_division_by_zero() {
    let r = run_lua("return 1 / 0, -1 / 0");
    assert_eq!(r[0].as_number(), Some(f64::INFINITY));
    assert_eq!(r[1].as_number(), Some(f64::NEG_INFINITY));
    let nan = run_lua("local x = 0 / 0 return x ~= x");
    assert_bool(&nan, 0, true);
}

#[test]
fn test_string_coercion() {
    run_check_nums(
        r#"return "10" + 1, "0x10" * 2, " 3 " - 1, 2 * "1e2""#,
        &[11.0, 32.0, 2.0, 200.0],
    );
}

#[test]
fn test_concat_numbers_and_strings() {
    run_check_display(
        r#"return 1 .. 2, "a" .. "b" .. "c", 1.5 .. "x", 10 / 2 .. """#,
        &["12", "abc", "1.5x", "5"],
    );
}

#[test]
fn test_number_display() {
    run_check_display(
        "return 1e15, 0.1 + 0.2, 100, -0.5, 2^53",
        &["1e+15", "0.3", "100", "-0.5", "9.007199254741e+15"],
    );
}

#[test]
fn test_comparisons() {
    let r = run_lua(r#"return 1 < 2, 2 <= 2, "a" < "b", "abc" < "abd", "Z" < "a", 3 > 4"#);
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, true);
    assert_bool(&r, 3, true);
    assert_bool(&r, 4, true);
    assert_bool(&r, 5, false);
}

#[test]
fn test_equality_does_not_coerce() {
    let r = run_lua(r#"return 1 == "1", "1" == "1", 1 == 1.0, {} == {}"#);
    assert_bool(&r, 0, false);
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, true);
    assert_bool(&r, 3, false);
}

#[test]
fn test_logical_operators() {
    run_check_display(
        "return nil or 5, false and 1, 1 and 2, nil and 1, not nil, not 0",
        &["5", "false", "2", "nil", "true", "false"],
    );
}

#[test]
fn test_length_operator() {
    run_check_nums(r#"return #"hello", #{1, 2, 3}, #{}"#, &[5.0, 3.0, 0.0]);
}

#[test]
fn test_constant_folding_matches_runtime() {
    run_check_nums(
        "local a, b = 3, 4 return a * b + 2, 3 * 4 + 2, (a + b) * 2, (3 + 4) * 2",
        &[14.0, 14.0, 14.0, 14.0],
    );
}
