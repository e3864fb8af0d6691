use super::helpers::*;
use moonlet_stdlib::execute_source;

/// Live objects in a fresh stdlib VM after a full collection.
fn baseline_live_objects() -> usize {
    let mut vm = stdlib_vm();
    execute_source(&mut vm, "collectgarbage()", "=base").unwrap();
    vm.live_objects()
}

#[test]
fn test_memory_stays_bounded_across_allocation_loop() {
    let (r, vm) = run_lua_vm(
        r#"
        collectgarbage()
        local before = collectgarbage("count")
        for i = 1, 50000 do
            local t = {i, tostring(i), {x = i}}
            local s = "str" .. i
        end
        collectgarbage()
        return before, collectgarbage("count")
        "#,
    );
    let before = r[0].as_number().unwrap();
    let after = r[1].as_number().unwrap();
    assert!(after < before + 64.0, "before {before} KB, after {after} KB");
    assert!(vm.gc.gc_state.cycles > 1);
    assert!(vm.strings.len() < 2000, "{} strings live", vm.strings.len());
}

#[test]
fn test_gmatch_and_wrap_natives_are_reclaimed() {
    let src = r#"
        local n = 0
        for i = 1, 2000 do
            for w in ("a b c"):gmatch("%a") do n = n + 1 end
            local gen = coroutine.wrap(function() coroutine.yield(i) end)
            n = n + gen()
        end
        collectgarbage()
        return n
    "#;
    let (r, vm) = run_lua_vm(src);
    assert_num(&r, 0, 2_007_000.0);
    // Without collection this would be the libraries plus 4000 natives.
    assert!(vm.natives.len() < 2000, "{} native slots", vm.natives.len());
    assert!(vm.threads.len() < 2000, "{} thread slots", vm.threads.len());
    let baseline = baseline_live_objects();
    assert!(
        vm.live_objects() <= baseline + 64,
        "{} live, baseline {baseline}",
        vm.live_objects()
    );
}

#[test]
fn test_suspended_coroutine_survives_collection() {
    run_check_display(
        r#"
        local co = coroutine.create(function(a)
            local t = {a}
            local b = coroutine.yield()
            return t[1] + b
        end)
        coroutine.resume(co, 5)
        for i = 1, 10000 do local _ = {i} end
        collectgarbage()
        return coroutine.resume(co, 7)
        "#,
        &["true", "12"],
    );
}

#[test]
fn test_closures_and_metatables_survive_collection() {
    run_check_display(
        r#"
        local function counter()
            local c = 0
            return function() c = c + 1 return c end
        end
        local f = counter()
        f()
        local obj = setmetatable({}, {__index = function(_, k) return k .. "!" end})
        for i = 1, 20000 do local _ = tostring(i) .. "x" end
        collectgarbage()
        return f(), obj.hey, getmetatable("").__index == string
        "#,
        &["2", "hey!", "true"],
    );
}

#[test]
fn test_error_value_and_handler_survive_collection() {
    run_check_display(
        r#"
        local ok, e = xpcall(function()
            for i = 1, 10000 do local _ = {i} end
            collectgarbage()
            error({code = 9})
        end, function(err) return err.code end)
        return ok, e
        "#,
        &["false", "9"],
    );
}

#[test]
fn test_stopped_collector_does_not_run() {
    let (_, vm) = run_lua_vm(
        r#"
        collectgarbage("stop")
        for i = 1, 20000 do local _ = {i} end
        "#,
    );
    assert_eq!(vm.gc.gc_state.cycles, 0);
    assert!(vm.gc.tables.len() >= 20000);
}
