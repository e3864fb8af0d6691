use super::helpers::*;

#[test]
fn test_rounding() {
    run_check_nums(
        "return math.floor(3.7), math.ceil(3.2), math.floor(-3.5), math.ceil(-3.5)",
        &[3.0, 4.0, -4.0, -3.0],
    );
}

#[test]
fn test_basic_functions() {
    run_check_nums(
        "return math.abs(-2), math.sqrt(16), math.pow(2, 8), math.exp(0), math.log(1)",
        &[2.0, 4.0, 256.0, 1.0, 0.0],
    );
}

#[test]
fn test_min_max() {
    run_check_nums("return math.max(3, 9, 2), math.min(3, 9, 2), math.max(-1)", &[9.0, 2.0, -1.0]);
    let err = run_lua_err("return math.max()");
    assert!(err.contains("bad argument #1 to 'max' (number expected, got no value)"), "{err}");
}

#[test]
fn test_fmod_and_modf() {
    let r = run_lua("return math.fmod(7, 3), math.fmod(-7, 3), math.modf(3.75)");
    assert_num(&r, 0, 1.0);
    assert_num(&r, 1, -1.0);
    assert_num(&r, 2, 3.0);
    assert_num(&r, 3, 0.75);
}

#[test]
fn test_trig() {
    let r = run_lua("return math.sin(0), math.cos(0), math.tan(0), math.sin(math.pi / 2)");
    assert_num(&r, 0, 0.0);
    assert_num(&r, 1, 1.0);
    assert_num(&r, 2, 0.0);
    assert_num(&r, 3, 1.0);
}

#[test]
fn test_constants() {
    let r = run_lua("return math.pi, math.huge, -math.huge < 0");
    assert_num(&r, 0, std::f64::consts::PI);
    assert_eq!(r[1].as_number(), Some(f64::INFINITY));
    assert_bool(&r, 2, true);
}

#[test]
fn test_random_ranges() {
    let r = run_lua(
        r#"
        local ok = true
        for i = 1, 200 do
            local a = math.random()
            local b = math.random(6)
            local c = math.random(-3, 3)
            if a < 0 or a >= 1 then ok = false end
            if b < 1 or b > 6 or b ~= math.floor(b) then ok = false end
            if c < -3 or c > 3 then ok = false end
        end
        return ok
        "#,
    );
    assert_bool(&r, 0, true);
}

#[test]
fn test_randomseed_is_deterministic() {
    let r = run_lua(
        r#"
        math.randomseed(42)
        local a, b = math.random(1000), math.random(1000)
        math.randomseed(42)
        local c, d = math.random(1000), math.random(1000)
        return a == c and b == d
        "#,
    );
    assert_bool(&r, 0, true);
}

#[test]
fn test_random_empty_interval() {
    let err = run_lua_err("return math.random(0)");
    assert!(err.contains("interval is empty"), "{err}");
    let err = run_lua_err("return math.random(5, 1)");
    assert!(err.contains("bad argument #2 to 'random' (interval is empty)"), "{err}");
}

#[test]
fn test_rng_state_is_per_vm() {
    let a = run_lua("return math.random(1000000)");
    let b = run_lua("return math.random(1000000)");
    assert_eq!(a[0].as_number(), b[0].as_number());
}
