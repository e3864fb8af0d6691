//! Coroutine library.
//!
//! Coroutines are VM threads. `resume` and `yield` hand control back to
//! the dispatch loop, which switches threads instead of recursing.

use moonlet_core::value::TValue;
use moonlet_vm::vm::{Vm, MAIN_THREAD};
use moonlet_vm::{LuaError, NativeContext, NativeFn, NativeOutcome};

const COROUTINE_FUNCS: &[(&str, NativeFn)] = &[
    ("create", native_coroutine_create),
    ("resume", native_coroutine_resume),
    ("yield", native_coroutine_yield),
    ("status", native_coroutine_status),
    ("wrap", native_coroutine_wrap),
    ("running", native_coroutine_running),
];

pub fn register(vm: &mut Vm) {
    vm.register_lib("coroutine", COROUTINE_FUNCS);
}

/// coroutine.create(f)
fn native_coroutine_create(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let func = ctx.check_function(0)?;
    let id = ctx.vm.new_thread(func);
    ctx.returns(&[TValue::from_thread(id)])
}

/// coroutine.resume(co, ...)
fn native_coroutine_resume(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let thread = ctx.check_thread(0)?;
    Ok(NativeOutcome::Resume {
        thread,
        first_arg: 1,
        wrap: false,
    })
}

/// coroutine.yield(...)
fn native_coroutine_yield(_ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    Ok(NativeOutcome::Yield)
}

/// coroutine.status(co)
fn native_coroutine_status(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let thread = ctx.check_thread(0)?;
    let name = match ctx.vm.thread_status(thread) {
        Some(status) => status.name(),
        None => return Err(LuaError::Internal(format!("unknown thread {}", thread.0))),
    };
    ctx.return_str(name.as_bytes())
}

/// coroutine.wrap(f): a function that resumes a new coroutine and
/// re-raises its errors.
fn native_coroutine_wrap(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let func = ctx.check_function(0)?;
    let id = ctx.vm.new_thread(func);
    let resume = ctx
        .vm
        .register_native_with_upvalue("wrap", native_wrap_resume, TValue::from_thread(id));
    ctx.returns(&[resume])
}

fn native_wrap_resume(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let Some(thread) = ctx.upvalue().as_thread_id() else {
        return Err(LuaError::Internal("wrap function lost its coroutine".into()));
    };
    Ok(NativeOutcome::Resume {
        thread,
        first_arg: 0,
        wrap: true,
    })
}

/// coroutine.running(): the running coroutine, or nil on the main thread.
fn native_coroutine_running(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let current = ctx.vm.current;
    if current == MAIN_THREAD {
        ctx.returns(&[TValue::nil()])
    } else {
        ctx.returns(&[TValue::from_thread(current)])
    }
}
