use super::helpers::*;

#[test]
fn test_len_sub_rep_reverse() {
    run_check_display(
        r#"
        return string.len("hello"), string.sub("hello", 2, -2), string.sub("hello", -3),
            string.sub("hello", 10), string.rep("ab", 3), string.rep("x", 0),
            string.reverse("abc")
        "#,
        &["5", "ell", "llo", "", "ababab", "", "cba"],
    );
}

#[test]
fn test_upper_lower() {
    run_check_strs(
        r#"return string.upper("MiXed 1"), string.lower("MiXed 1")"#,
        &["MIXED 1", "mixed 1"],
    );
}

#[test]
fn test_byte_and_char() {
    run_check_nums(r#"return string.byte("ABC", 1, -1)"#, &[65.0, 66.0, 67.0]);
    run_check_nums(r#"return string.byte("A")"#, &[65.0]);
    run_check_strs("return string.char(72, 105)", &["Hi"]);
    let err = run_lua_err("return string.char(256)");
    assert!(err.contains("bad argument #1 to 'char' (invalid value)"), "{err}");
}

#[test]
fn test_method_syntax_on_strings() {
    run_check_display(
        r#"
        local s = "hello"
        return s:upper(), ("x"):rep(3), s:len(), #s
        "#,
        &["HELLO", "xxx", "5", "5"],
    );
}

#[test]
fn test_string_metatable_index_is_string_table() {
    let r = run_lua(r#"return getmetatable("abc").__index == string"#);
    assert_bool(&r, 0, true);
}

#[test]
fn test_format_integers() {
    run_check_strs(
        r#"
        return string.format("%d", 3.7), string.format("%5d|", 42), string.format("%-5d|", 42),
            string.format("%05d", -42), string.format("%+d", 5), string.format("%.3d", 7)
        "#,
        &["3", "   42|", "42   |", "-0042", "+5", "007"],
    );
}

#[test]
fn test_format_hex_octal_char() {
    run_check_strs(
        r#"
        return string.format("%x", 255), string.format("%X", 255), string.format("%#x", 255),
            string.format("%o", 8), string.format("%c", 65), string.format("100%%")
        "#,
        &["ff", "FF", "0xff", "10", "A", "100%"],
    );
}

#[test]
fn test_format_floats() {
    run_check_strs(
        r#"
        return string.format("%5.2f", 3.14159), string.format("%.0f", 2.5),
            string.format("%e", 12345.678), string.format("%.2E", 0.000123),
            string.format("%g", 1e20), string.format("%g", 0.1), string.format("%.3g", 2/3),
            string.format("%05.1f", -2.5)
        "#,
        &[" 3.14", "2", "1.234568e+04", "1.23E-04", "1e+20", "0.1", "0.667", "-02.5"],
    );
}

#[test]
fn test_format_strings() {
    run_check_strs(
        r#"
        return string.format("%5s|%-5s|", "ab", "cd"), string.format("%.2s", "abcdef"),
            string.format("%s=%s", "n", 12)
        "#,
        &["   ab|cd   |", "ab", "n=12"],
    );
}

#[test]
fn test_format_quoted() {
    run_check_strs(
        r#"return string.format("%q", 'a "b"\n\\')"#,
        &["\"a \\\"b\\\"\\\n\\\\\""],
    );
}

#[test]
fn test_format_errors() {
    let err = run_lua_err(r#"return string.format("%d", "x")"#);
    assert!(err.contains("bad argument #2 to 'format' (number expected, got string)"), "{err}");
    let err = run_lua_err(r#"return string.format("%y", 1)"#);
    assert!(err.contains("invalid option '%y' to 'format'"), "{err}");
    let err = run_lua_err(r#"return string.format("%s")"#);
    assert!(err.contains("bad argument #2 to 'format'"), "{err}");
}

#[test]
fn test_find_plain_and_pattern() {
    run_check_display(
        r#"
        local a, b = string.find("hello world", "o w")
        local c, d = string.find("a.b", ".", 1, true)
        local e = string.find("abc", "b", -1)
        local f, g = string.find("", "")
        local h, i, cap = string.find("key=val", "(%w+)=")
        return a, b, c, d, e, f, g, h, i, cap
        "#,
        &["5", "7", "2", "2", "nil", "1", "0", "1", "4", "key"],
    );
}

#[test]
fn test_match_captures() {
    run_check_display(
        r#"
        local k, v = string.match("key=val", "(%w+)=(%w+)")
        local trimmed = string.match("  trim me  ", "^%s*(.-)%s*$")
        local p1, p2 = string.match("hello", "()ll()")
        return k, v, trimmed, p1, p2, string.match("abc", "x")
        "#,
        &["key", "val", "trim me", "3", "5", "nil"],
    );
}

#[test]
fn test_gmatch_words() {
    run_check_display(
        r#"
        local words = {}
        for w in string.gmatch("one two  three", "%a+") do words[#words + 1] = w end
        local pairs_found = {}
        for k, v in string.gmatch("a=1, b=2", "(%w+)=(%w+)") do pairs_found[#pairs_found + 1] = k .. v end
        return #words, words[3], table.concat(pairs_found, ",")
        "#,
        &["3", "three", "a1,b2"],
    );
}

#[test]
fn test_gmatch_iterator_called_directly() {
    run_check_display(
        r#"
        local it = ("x1y22z333"):gmatch("%d+")
        return it(), it(), it(), it()
        "#,
        &["1", "22", "333", "nil"],
    );
}

#[test]
fn test_gmatch_caret_is_a_plain_character() {
    run_check_nums(
        r#"
        local function count(s, p)
            local n = 0
            for _ in s:gmatch(p) do n = n + 1 end
            return n
        end
        return count("aaa", "^a"), count("^a^a", "^a"), count("aaa", "a")
        "#,
        &[0.0, 2.0, 3.0],
    );
}

#[test]
fn test_gmatch_long_subject_with_many_matches() {
    run_check_nums(
        r#"
        local s = string.rep("ab ", 20000)
        local n, last = 0, nil
        for w in s:gmatch("%a+") do n = n + 1 last = w end
        return n, #last
        "#,
        &[20000.0, 2.0],
    );
}

#[test]
fn test_find_init_past_end_clamps() {
    run_check_display(
        r#"
        local a, b = ("abc"):find("", 10)
        return a, b, ("abc"):find("c", 10), ("abc"):match("()", 10), ("abc"):find("", -10)
        "#,
        &["4", "3", "nil", "4", "1", "0"],
    );
}

#[test]
fn test_gsub_basic() {
    let (r, vm) = run_lua_vm(r##"return string.gsub("a12b34", "%d+", "#")"##);
    assert_str(&r, 0, "a#b#", &vm);
    assert_num(&r, 1, 2.0);
}

#[test]
fn test_gsub_replacement_forms() {
    run_check_display(
        r#"
        local a = string.gsub("hello world", "(%w+)", "<%1>")
        local b = string.gsub("abc", "%w", "%0%0")
        local c = string.gsub("$name is $age", "%$(%w+)", {name = "bob", age = 3})
        local d = string.gsub("a b", "%w", function(ch) if ch == "a" then return "X" end end)
        local e = string.gsub("50%", "%%", "%%%%")
        return a, b, c, d, e
        "#,
        &["<hello> <world>", "aabbcc", "bob is 3", "X b", "50%%"],
    );
}

#[test]
fn test_gsub_limit_and_empty_matches() {
    run_check_display(
        r#"
        local a, n1 = string.gsub("hello world", "o", "0", 1)
        local b, n2 = string.gsub("abc", "", "-")
        local c, n3 = string.gsub("aaa", "^a", "b")
        return a, n1, b, n2, c, n3
        "#,
        &["hell0 world", "1", "-a-b-c-", "4", "baa", "1"],
    );
}

#[test]
fn test_gsub_invalid_replacement() {
    let err = run_lua_err(r#"return string.gsub("abc", "%w", function() return {} end)"#);
    assert!(err.contains("invalid replacement value (a table)"), "{err}");
    let err = run_lua_err(r#"return string.gsub("abc", "%w", true)"#);
    assert!(err.contains("string/function/table expected"), "{err}");
}

#[test]
fn test_numbers_are_accepted_as_strings() {
    run_check_strs(
        "return string.rep(1, 3), string.upper(12), string.sub(12345, 2, 3)",
        &["111", "12", "23"],
    );
}
