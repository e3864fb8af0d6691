use super::helpers::*;
use moonlet_core::value::TValue;
use moonlet_vm::{LuaError, NativeContext, NativeOutcome};

fn sum(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let mut total = 0.0;
    for i in 0..ctx.nargs() {
        total += ctx.check_number(i)?;
    }
    ctx.returns(&[TValue::from_number(total)])
}

fn apply(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let f = ctx.check_function(0)?;
    let x = ctx.arg(1);
    let results = ctx.call(f, &[x])?;
    ctx.returns(&results)
}

struct Point {
    x: f64,
}

fn point_x(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    match ctx.vm.userdata_ref::<Point>(ctx.arg(0)).map(|p| p.x) {
        Some(x) => ctx.returns(&[TValue::from_number(x)]),
        None => Err(ctx.type_error(0, "point")),
    }
}

fn vm_with_natives() -> moonlet_vm::Vm {
    let mut vm = new_vm();
    let f = vm.register_native("sum", sum);
    vm.set_global("sum", f);
    let f = vm.register_native("apply", apply);
    vm.set_global("apply", f);
    vm
}

#[test]
fn test_native_receives_arguments() {
    let mut vm = vm_with_natives();
    let r = vm.execute("return sum(1, 2, 3.5)", "=test").unwrap();
    assert_num(&r, 0, 6.5);
}

#[test]
fn test_native_argument_error() {
    let mut vm = vm_with_natives();
    let err = vm.execute("return sum(1, nil)", "=test").unwrap_err();
    assert_eq!(
        err.to_string(),
        "test:1: bad argument #2 to 'sum' (number expected, got nil)"
    );
}

#[test]
fn test_native_calls_back_into_lua() {
    let mut vm = vm_with_natives();
    let r = vm
        .execute("return apply(function(x) return x * 2, x + 1 end, 20)", "=test")
        .unwrap();
    assert_num(&r, 0, 40.0);
    assert_num(&r, 1, 21.0);
}

#[test]
fn test_error_in_callback_propagates_through_native() {
    let mut vm = vm_with_natives();
    let r = vm
        .execute(
            "local ok, e = pcall(apply, function() error('deep', 0) end)\nreturn ok, e",
            "=test",
        )
        .unwrap();
    assert_bool(&r, 0, false);
    assert_eq!(vm.display_value(r[1]), "deep");
    assert!(vm.is_idle());
}

#[test]
fn test_nested_native_callbacks() {
    let mut vm = vm_with_natives();
    let r = vm
        .execute(
            "return apply(function(x) return apply(function(y) return y + 1 end, x) * 10 end, 1)",
            "=test",
        )
        .unwrap();
    assert_num(&r, 0, 20.0);
}

#[test]
fn test_host_calls_lua_function() {
    let mut vm = new_vm();
    let r = vm
        .execute("return function(a, b) return a .. b end", "=test")
        .unwrap();
    let a = vm.str_value(b"moon");
    let b = vm.str_value(b"let");
    let out = vm.call_value(r[0], &[a, b]).unwrap();
    assert_eq!(vm.display_value(out[0]), "moonlet");
}

#[test]
fn test_userdata_with_metatable() {
    let mut vm = vm_with_natives();
    let p = vm.new_userdata(Box::new(Point { x: 3.5 }));
    let methods = vm.gc.alloc_table(0, 1);
    let getter = vm.register_native("x", point_x);
    let key = vm.strings.intern(b"x");
    vm.gc.get_table_mut(methods).raw_set_str(key, getter);
    let mt = vm.gc.alloc_table(0, 1);
    let index = vm.mm_names.index;
    vm.gc
        .get_table_mut(mt)
        .raw_set_str(index, TValue::from_table(methods));
    if let Some(idx) = p.as_userdata_idx() {
        vm.gc.get_userdata_mut(idx).metatable = Some(mt);
    }
    vm.set_global("p", p);
    let r = vm.execute("return p:x()", "=test").unwrap();
    assert_num(&r, 0, 3.5);
    let err = vm.execute("return p.x(42)", "=test").unwrap_err();
    assert!(err.to_string().contains("point expected, got number"), "{err}");
}

#[test]
fn test_default_native_depth_raises_before_the_rust_stack_runs_out() {
    let mut vm = moonlet_vm::Vm::new();
    let f = vm.register_native("apply", apply);
    vm.set_global("apply", f);
    let err = vm
        .execute(
            "local function f(x) return apply(f, x) end\nreturn f(1)",
            "=test",
        )
        .unwrap_err();
    assert!(err.to_string().contains("C stack overflow"), "{err}");
    assert!(vm.is_idle());
}

#[test]
fn test_native_depth_is_bounded() {
    let mut vm = moonlet_vm::Vm::with_config(moonlet_vm::VmConfig {
        max_native_depth: 10,
        ..Default::default()
    });
    let f = vm.register_native("apply", apply);
    vm.set_global("apply", f);
    let err = vm
        .execute(
            "local function f(x) return apply(f, x) end\nreturn f(1)",
            "=test",
        )
        .unwrap_err();
    assert!(err.to_string().contains("C stack overflow"), "{err}");
}
