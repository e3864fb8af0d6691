use super::helpers::*;
use moonlet_stdlib::execute_source;
use moonlet_vm::{Driver, DriverState, StepResult};

const WORKLOAD: &str = r#"
local log = {}
local gen = coroutine.wrap(function()
    for i = 1, 5 do coroutine.yield(i) end
end)
local mt = {__concat = function(a, b)
    local l = type(a) == "table" and a.tag or a
    local r = type(b) == "table" and b.tag or b
    return l .. r
end}
local box = setmetatable({tag = "[box]"}, mt)
for v in gen do
    log[#log + 1] = "v" .. v .. box .. string.rep("!", v)
end
local ok, err = pcall(function() error("inside", 0) end)
return table.concat(log, ","), ok, err
"#;

#[test]
fn test_stepped_run_matches_direct_run() {
    let expected = run_lua_display(WORKLOAD);
    for slice in [1, 3, 17, 1000] {
        let mut vm = stdlib_vm();
        let f = vm.load(WORKLOAD.as_bytes(), "=test").unwrap();
        let mut driver = Driver::new(f, vec![]);
        driver.start(&mut vm).unwrap();
        let values = driver.run_to_end(&mut vm, slice).unwrap();
        let got: Vec<String> = values.iter().map(|v| vm.display_value(*v)).collect();
        assert_eq!(got, expected, "slice {slice}");
        assert!(vm.is_idle());
    }
}

const YIELDING_METAMETHODS: &str = r#"
local mt = {}
mt.__index = function(t, k)
    local v = coroutine.yield(k)
    return v * 2
end
mt.__add = function(a, b) return a.n + b end
local co = coroutine.create(function()
    local obj = setmetatable({n = 10}, mt)
    local x = obj.missing
    local y = obj + x
    return x, y
end)
local trace = {}
local ok, k = coroutine.resume(co)
trace[#trace + 1] = tostring(ok) .. ":" .. tostring(k)
local ok2, x, y = coroutine.resume(co, 21)
trace[#trace + 1] = tostring(ok2) .. ":" .. x .. ":" .. y
trace[#trace + 1] = coroutine.status(co)
return table.concat(trace, " ")
"#;

#[test]
fn test_small_budgets_across_yield_inside_metamethod() {
    let expected = "true:missing true:42:52 dead";
    assert_eq!(run_lua_display(YIELDING_METAMETHODS), vec![expected]);
    for slice in 1..=7 {
        let mut vm = stdlib_vm();
        let f = vm.load(YIELDING_METAMETHODS.as_bytes(), "=test").unwrap();
        let mut driver = Driver::new(f, vec![]);
        driver.start(&mut vm).unwrap();
        let values = driver.run_to_end(&mut vm, slice).unwrap();
        let got: Vec<String> = values.iter().map(|v| vm.display_value(*v)).collect();
        assert_eq!(got, vec![expected], "slice {slice}");
        assert!(vm.is_idle());
    }
}

#[test]
fn test_stepped_run_collects_garbage() {
    let src = r#"
        local keep = {}
        for i = 1, 30000 do
            local t = {i, tostring(i)}
            if i % 1000 == 0 then keep[#keep + 1] = t end
        end
        return #keep, keep[30][2]
    "#;
    let mut vm = stdlib_vm();
    let f = vm.load(src.as_bytes(), "=test").unwrap();
    let mut driver = Driver::new(f, vec![]);
    driver.start(&mut vm).unwrap();
    let values = driver.run_to_end(&mut vm, 5).unwrap();
    assert_num(&values, 0, 30.0);
    assert_str(&values, 1, "30000", &vm);
    assert!(vm.gc.gc_state.cycles > 0);
    assert!(vm.gc.tables.len() < 20_000, "{} tables live", vm.gc.tables.len());
}

#[test]
fn test_step_reports_pending() {
    let mut vm = stdlib_vm();
    let f = vm.load(WORKLOAD.as_bytes(), "=test").unwrap();
    let mut driver = Driver::new(f, vec![]);
    driver.start(&mut vm).unwrap();
    assert_eq!(driver.step(&mut vm, 1).unwrap(), StepResult::Pending);
    assert_eq!(driver.state(), &DriverState::Running);
}

#[test]
fn test_crash_inside_coroutine_chain() {
    let mut vm = stdlib_vm();
    let f = vm
        .load(
            b"local f = coroutine.wrap(function() local t = nil return t.x end)\nreturn f()",
            "=test",
        )
        .unwrap();
    let mut driver = Driver::new(f, vec![]);
    driver.start(&mut vm).unwrap();
    let err = driver.run_to_end(&mut vm, 2).unwrap_err();
    assert!(err.to_string().contains("attempt to index local 't'"), "{err}");
    assert!(matches!(driver.state(), DriverState::Crashed(_)));
    assert!(vm.is_idle());
    let r = execute_source(&mut vm, "return 1", "=after").unwrap();
    assert_num(&r, 0, 1.0);
}

#[test]
fn test_rerunning_pure_chunk_is_stable() {
    let src = "local t = {} for i = 1, 20 do t[i] = i * i end return table.concat(t, ','), #t";
    let mut vm = stdlib_vm();
    let f = vm.load(src.as_bytes(), "=pure").unwrap();
    let first = vm.call_value(f, &[]).unwrap();
    let second = vm.call_value(f, &[]).unwrap();
    assert_eq!(first, second);
    assert_num(&second, 1, 20.0);
}
