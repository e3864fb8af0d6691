use moonlet_core::value::TValue;
use moonlet_stdlib::{execute_source, new_vm};
use moonlet_vm::vm::Vm;
use moonlet_vm::VmConfig;

/// A VM with every library loaded.
pub fn stdlib_vm() -> Vm {
    new_vm(VmConfig::default())
}

/// Compile and execute Lua source, returning result TValues and the VM
/// that owns them.
pub fn run_lua_vm(source: &str) -> (Vec<TValue>, Vm) {
    let mut vm = stdlib_vm();
    let results = execute_source(&mut vm, source, "=test")
        .unwrap_or_else(|e| panic!("error: {e}\nsource:\n{source}"));
    (results, vm)
}

pub fn run_lua(source: &str) -> Vec<TValue> {
    run_lua_vm(source).0
}

/// Execute and render every result the way `tostring` would.
pub fn run_lua_display(source: &str) -> Vec<String> {
    let (results, vm) = run_lua_vm(source);
    results.into_iter().map(|v| vm.display_value(v)).collect()
}

/// Compile and execute Lua source, expecting an error.
pub fn run_lua_err(source: &str) -> String {
    let mut vm = stdlib_vm();
    match execute_source(&mut vm, source, "=test") {
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

/// Check that results[idx] is a string with the expected value.
pub fn assert_str(results: &[TValue], idx: usize, expected: &str, vm: &Vm) {
    let val = results[idx];
    let sid = val
        .as_string_id()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected string \"{expected}\""));
    let got = vm.strings.get_lossy(sid);
    assert_eq!(got, expected, "result[{idx}] = \"{got}\", expected \"{expected}\"");
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

/// Run Lua source and check every result as a string.
pub fn run_check_strs(source: &str, expected: &[&str]) {
    let (results, vm) = run_lua_vm(source);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {}",
        expected.len(),
        results.len()
    );
    for (i, exp) in expected.iter().enumerate() {
        assert_str(&results, i, exp, &vm);
    }
}

/// Run Lua source and compare the rendered results.
pub fn run_check_display(source: &str, expected: &[&str]) {
    let got = run_lua_display(source);
    assert_eq!(got, expected, "source:\n{source}");
}
