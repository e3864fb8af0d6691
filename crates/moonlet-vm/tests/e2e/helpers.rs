use moonlet_core::value::TValue;
use moonlet_vm::vm::Vm;
use moonlet_vm::{LuaError, NativeContext, NativeFn, NativeOutcome};

/// Natives the language tests lean on, kept independent of the stdlib.
fn test_setmetatable(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let mt = ctx.arg(1).as_table_idx();
    ctx.vm.gc.get_table_mut(t).metatable = mt;
    ctx.returns(&[TValue::from_table(t)])
}

fn test_pcall(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    ctx.check_any(0)?;
    Ok(NativeOutcome::ProtectedCall {
        handler: None,
        first_arg: 1,
    })
}

fn test_error(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let raw = ctx.arg(0);
    let level = ctx.opt_integer(1, 1)?.max(0) as usize;
    Err(ctx.vm.error_value(raw, level))
}

pub fn new_vm() -> Vm {
    let mut vm = Vm::new();
    let natives: [(&'static str, NativeFn); 3] = [
        ("setmetatable", test_setmetatable),
        ("pcall", test_pcall),
        ("error", test_error),
    ];
    for (name, f) in natives {
        let v = vm.register_native(name, f);
        vm.set_global(name, v);
    }
    vm
}

/// Compile and execute Lua source, returning result TValues.
pub fn run_lua(source: &str) -> Vec<TValue> {
    let mut vm = new_vm();
    vm.execute(source, "=test")
        .unwrap_or_else(|e| panic!("error: {e}\nsource:\n{source}"))
}

/// Execute and render every result the way `tostring` would.
pub fn run_lua_display(source: &str) -> Vec<String> {
    let mut vm = new_vm();
    let results = vm
        .execute(source, "=test")
        .unwrap_or_else(|e| panic!("error: {e}\nsource:\n{source}"));
    results.into_iter().map(|v| vm.display_value(v)).collect()
}

/// Compile and execute Lua source, expecting an error.
pub fn run_lua_err(source: &str) -> String {
    let mut vm = new_vm();
    match vm.execute(source, "=test") {
        Err(e) => e.to_string(),
        Ok(vals) => panic!("expected error, got {} results: {:?}", vals.len(), vals),
    }
}

/// Check that results[idx] is a number with the expected value.
pub fn assert_num(results: &[TValue], idx: usize, expected: f64) {
    let val = results[idx];
    let got = val
        .as_number()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected number {expected}"));
    assert!(
        (got - expected).abs() < 1e-10,
        "result[{idx}] = {got}, expected {expected}"
    );
}

pub fn assert_bool(results: &[TValue], idx: usize, expected: bool) {
    let val = results[idx];
    let got = val
        .as_bool()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected bool {expected}"));
    assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}");
}

pub fn assert_nil(results: &[TValue], idx: usize) {
    let val = results[idx];
    assert!(val.is_nil(), "result[{idx}] = {val:?}, expected nil");
}

/// Run Lua source and check results against expected numbers.
pub fn run_check_nums(source: &str, expected: &[f64]) {
    let results = run_lua(source);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {}",
        expected.len(),
        results.len()
    );
    for (i, &exp) in expected.iter().enumerate() {
        assert_num(&results, i, exp);
    }
}

/// Run Lua source and compare the rendered results.
pub fn run_check_display(source: &str, expected: &[&str]) {
    let got = run_lua_display(source);
    assert_eq!(got, expected, "source:\n{source}");
}
