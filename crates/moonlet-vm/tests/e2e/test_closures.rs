use super::helpers::*;

#[test]
fn test_closure_captures_local() {
    run_check_nums(
        r#"
        local function counter()
            local n = 0
            return function() n = n + 1 return n end
        end
        local c = counter()
        c() c()
        return c()
        "#,
        &[3.0],
    );
}

#[test]
fn test_closures_share_upvalue() {
    run_check_nums(
        r#"
        local function pair()
            local v = 0
            return function(x) v = x end, function() return v end
        end
        local set, get = pair()
        set(42)
        return get()
        "#,
        &[42.0],
    );
}

#[test]
fn test_loop_closures_capture_fresh_binding() {
    run_check_nums(
        r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        return fns[1](), fns[2](), fns[3]()
        "#,
        &[1.0, 2.0, 3.0],
    );
}

#[test]
fn test_while_loop_closures_capture_fresh_local() {
    run_check_nums(
        r#"
        local fns, i = {}, 1
        while i <= 3 do
            local j = i
            fns[i] = function() return j end
            i = i + 1
        end
        return fns[1](), fns[3]()
        "#,
        &[1.0, 3.0],
    );
}

#[test]
fn test_nested_upvalues() {
    run_check_nums(
        r#"
        local a = 1
        local function outer()
            local b = 10
            return function()
                return function() return a + b end
            end
        end
        a = 5
        return outer()()()
        "#,
        &[15.0],
    );
}

#[test]
fn test_recursive_local_function() {
    run_check_nums(
        r#"
        local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end
        return fib(20)
        "#,
        &[6765.0],
    );
}

#[test]
fn test_varargs() {
    run_check_nums(
        r#"
        local function count(...) return #{...} end
        local function second(_, b) return b end
        local function pass(...) return ... end
        return count(1, 2, 3), second(pass(7, 8, 9)), count(), (pass(4, 5))
        "#,
        &[3.0, 8.0, 0.0, 4.0],
    );
}

#[test]
fn test_multiple_results_truncate_in_middle() {
    run_check_nums(
        r#"
        local function two() return 1, 2 end
        local t = {two(), two()}
        return #t, t[1], t[2], t[3]
        "#,
        &[3.0, 1.0, 1.0, 2.0],
    );
}

#[test]
fn test_method_call_syntax() {
    run_check_nums(
        r#"
        local obj = {v = 3}
        function obj:scale(k) return self.v * k end
        function obj.static(x) return x + 1 end
        return obj:scale(4), obj.static(1)
        "#,
        &[12.0, 2.0],
    );
}

#[test]
fn test_deep_tail_calls_do_not_grow_stack() {
    run_check_display(
        r#"
        local function loop(n)
            if n == 0 then return "done" end
            return loop(n - 1)
        end
        return loop(100000)
        "#,
        &["done"],
    );
}
