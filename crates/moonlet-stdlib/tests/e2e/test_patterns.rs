use super::helpers::*;

#[test]
fn test_anchors() {
    run_check_display(
        r#"
        return string.find("hello", "^h"), string.find("hello", "^e"), string.find("hello", "o$"),
            string.match("a$b", "%$")
        "#,
        &["1", "nil", "5", "$"],
    );
}

#[test]
fn test_character_classes() {
    run_check_strs(
        r#"
        return string.match("abc123", "%d+"), string.match("  x", "%S"), string.match("a,b", "%p"),
            string.match("FOOBar", "%u+"), string.match("0x1F", "%x+", 3), string.match("a_1", "[%w_]+")
        "#,
        &["123", "x", ",", "FOOB", "1F", "a_1"],
    );
}

#[test]
fn test_sets_and_ranges() {
    run_check_strs(
        r#"
        return string.match("hello-world", "[a-z]+"), string.match("abc", "[^a]+"),
            string.match("a]b", "[]]"), string.match("x-y", "[a%-]+", 2)
        "#,
        &["hello", "bc", "]", "-"],
    );
}

#[test]
fn test_quantifiers() {
    run_check_strs(
        r#"
        return string.match("<a><b>", "<(.*)>"), string.match("<a><b>", "<(.-)>"),
            string.match("color", "colou?r"), string.match("aaab", "a+b"), string.match("b", "a*b")
        "#,
        &["a><b", "a", "color", "aaab", "b"],
    );
}

#[test]
fn test_balanced_match() {
    run_check_strs(
        r#"return string.match("f(a(b)c)d", "%b()"), (string.gsub("x[1][2]", "%b[]", ""))"#,
        &["(a(b)c)", "x"],
    );
}

#[test]
fn test_frontier() {
    let (r, vm) = run_lua_vm(r#"return string.gsub("THE (quick) fox", "%f[%a]%a+", "W")"#);
    assert_str(&r, 0, "W (W) W", &vm);
    assert_num(&r, 1, 3.0);
}

#[test]
fn test_back_reference() {
    run_check_strs(
        r#"return string.match([[say "hi" ok]], [[(["'])(.-)%1]])"#,
        &["\"", "hi"],
    );
}

#[test]
fn test_malformed_patterns() {
    for (pat, msg) in [
        ("[a", "malformed pattern (missing ']')"),
        ("%", "malformed pattern (ends with '%')"),
        ("(a", "unfinished capture"),
        ("a)", "invalid pattern capture"),
        ("%b", "missing arguments to '%b'"),
        ("%f", "missing '[' after '%f' in pattern"),
        ("%1", "invalid capture index"),
    ] {
        let src = format!("return string.find('abc', '{pat}')");
        let err = run_lua_err(&src);
        assert!(err.contains(msg), "pattern {pat}: {err}");
    }
}

#[test]
fn test_pattern_error_is_catchable() {
    let r = run_lua_display(r#"return pcall(string.match, "x", "[x")"#);
    assert_eq!(r[0], "false");
    assert!(r[1].contains("malformed pattern"), "{}", r[1]);
}

#[test]
fn test_too_many_captures() {
    let pat = "()".repeat(40);
    let err = run_lua_err(&format!("return string.find('abc', '{pat}')"));
    assert!(err.contains("too many captures"), "{err}");
}

#[test]
fn test_deep_pattern_recursion_is_bounded() {
    let subject = "a".repeat(5000);
    let err = run_lua_err(&format!(
        "return string.match('{subject}', string.rep('a?', 300) .. string.rep('a', 300))"
    ));
    assert!(err.contains("pattern too complex"), "{err}");
}
