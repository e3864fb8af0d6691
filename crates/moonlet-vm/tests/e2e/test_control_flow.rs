use super::helpers::*;

#[test]
fn test_if_elseif_else() {
    run_check_display(
        r#"
        local function classify(n)
            if n < 0 then return "neg" elseif n == 0 then return "zero" else return "pos" end
        end
        return classify(-1), classify(0), classify(5)
        "#,
        &["neg", "zero", "pos"],
    );
}

#[test]
fn test_numeric_for_variants() {
    run_check_nums(
        r#"
        local a, b, c = 0, 0, 0
        for i = 1, 10 do a = a + i end
        for i = 10, 1, -2 do b = b + i end
        for i = 0, 1, 0.25 do c = c + 1 end
        for i = 5, 1 do a = -1 end
        return a, b, c
        "#,
        &[55.0, 30.0, 5.0],
    );
}

#[test]
fn test_for_loop_variable_is_a_copy() {
    run_check_nums(
        r#"
        local n = 0
        for i = 1, 3 do i = i * 10 n = n + 1 end
        return n
        "#,
        &[3.0],
    );
}

#[test]
fn test_while_and_break() {
    run_check_nums(
        r#"
        local i = 0
        while true do
            i = i + 1
            if i >= 7 then break end
        end
        return i
        "#,
        &[7.0],
    );
}

#[test]
fn test_repeat_until_sees_body_locals() {
    run_check_nums(
        r#"
        local n = 0
        repeat
            local done = n >= 4
            n = n + 1
        until done
        return n
        "#,
        &[5.0],
    );
}

#[test]
fn test_generic_for_with_lua_iterator() {
    run_check_nums(
        r#"
        local function range(n)
            return function(_, i)
                if i < n then return i + 1 end
            end, nil, 0
        end
        local s = 0
        for i in range(5) do s = s + i end
        return s
        "#,
        &[15.0],
    );
}

#[test]
fn test_block_scoping_and_shadowing() {
    run_check_nums(
        r#"
        local x = 1
        do
            local x = 2
            x = x + 1
        end
        local y = x
        local x = 10
        return y, x
        "#,
        &[1.0, 10.0],
    );
}

#[test]
fn test_nested_break_only_exits_inner_loop() {
    run_check_nums(
        r#"
        local count = 0
        for i = 1, 3 do
            for j = 1, 10 do
                if j > 2 then break end
                count = count + 1
            end
        end
        return count
        "#,
        &[6.0],
    );
}

#[test]
fn test_globals_persist_across_functions() {
    run_check_nums(
        r#"
        function setx(v) x = v end
        setx(9)
        return x
        "#,
        &[9.0],
    );
}
