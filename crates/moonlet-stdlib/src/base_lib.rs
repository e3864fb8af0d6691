//! Base library: globals such as `print`, `pairs`, `pcall` and `setmetatable`.

use std::io::Write;

use moonlet_core::object::lua_type_name;
use moonlet_core::value::TValue;
use moonlet_vm::coerce;
use moonlet_vm::vm::Vm;
use moonlet_vm::{LuaError, NativeContext, NativeFn, NativeOutcome};

const BASE_FUNCS: &[(&str, NativeFn)] = &[
    ("print", native_print),
    ("type", native_type),
    ("tostring", native_tostring),
    ("tonumber", native_tonumber),
    ("next", native_next),
    ("select", native_select),
    ("rawget", native_rawget),
    ("rawset", native_rawset),
    ("rawequal", native_rawequal),
    ("setmetatable", native_setmetatable),
    ("getmetatable", native_getmetatable),
    ("assert", native_assert),
    ("error", native_error),
    ("pcall", native_pcall),
    ("xpcall", native_xpcall),
    ("unpack", native_unpack),
    ("getfenv", native_getfenv),
    ("setfenv", native_setfenv),
    ("loadstring", native_loadstring),
    ("collectgarbage", native_collectgarbage),
];

pub fn register(vm: &mut Vm) {
    for &(name, func) in BASE_FUNCS {
        let f = vm.register_native(name, func);
        vm.set_global(name, f);
    }
    // The iterator functions travel as upvalues of their factories.
    let next = vm.get_global("next");
    let pairs = vm.register_native_with_upvalue("pairs", native_pairs, next);
    vm.set_global("pairs", pairs);
    let aux = vm.register_native("ipairs_aux", native_ipairs_aux);
    let ipairs = vm.register_native_with_upvalue("ipairs", native_ipairs, aux);
    vm.set_global("ipairs", ipairs);

    let version = vm.str_value(b"Lua 5.1");
    vm.set_global("_VERSION", version);
}

fn native_print(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let mut line = Vec::new();
    for i in 0..ctx.nargs() {
        if i > 0 {
            line.push(b'\t');
        }
        let s = ctx.vm.tostring(ctx.arg(i))?;
        if let Some(sid) = s.as_string_id() {
            line.extend_from_slice(ctx.vm.strings.get_bytes(sid));
        }
    }
    line.push(b'\n');
    let mut out = std::io::stdout().lock();
    out.write_all(&line)
        .and_then(|_| out.flush())
        .map_err(|e| LuaError::Internal(format!("print: {e}")))?;
    Ok(NativeOutcome::Return(0))
}

fn native_type(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let v = ctx.check_any(0)?;
    ctx.return_str(lua_type_name(v).as_bytes())
}

fn native_tostring(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let v = ctx.check_any(0)?;
    let s = ctx.vm.tostring(v)?;
    ctx.returns(&[s])
}

/// Parse an unsigned integer in `base`, allowing surrounding whitespace
/// and a leading minus sign.
fn parse_in_base(s: &[u8], base: u32) -> Option<f64> {
    let s = s.trim_ascii();
    let (negative, digits) = match s.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n = 0.0f64;
    for &c in digits {
        let d = (c as char).to_digit(base)?;
        n = n * base as f64 + d as f64;
    }
    Some(if negative { -n } else { n })
}

fn native_tonumber(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let v = ctx.check_any(0)?;
    if ctx.arg(1).is_nil() {
        let n = coerce::to_number(v, &ctx.vm.strings);
        return ctx.returns(&[n.map_or(TValue::nil(), TValue::from_number)]);
    }
    let base = ctx.check_integer(1)?;
    if !(2..=36).contains(&base) {
        return Err(ctx.arg_error(1, "base out of range"));
    }
    let s = ctx.check_bytes(0)?;
    let n = parse_in_base(&s, base as u32);
    ctx.returns(&[n.map_or(TValue::nil(), TValue::from_number)])
}

fn native_next(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let key = ctx.arg(1);
    match ctx.vm.gc.get_table(t).next(key) {
        Ok(Some((k, v))) => ctx.returns(&[k, v]),
        Ok(None) => ctx.returns(&[TValue::nil()]),
        Err(()) => Err(ctx.error("invalid key to 'next'")),
    }
}

/// pairs(t): `next, t, nil`.
fn native_pairs(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let next = ctx.upvalue();
    ctx.returns(&[next, TValue::from_table(t), TValue::nil()])
}

/// ipairs(t): `ipairs_aux, t, 0`.
fn native_ipairs(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let aux = ctx.upvalue();
    ctx.returns(&[aux, TValue::from_table(t), TValue::from_number(0.0)])
}

fn native_ipairs_aux(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let i = ctx.check_integer(1)? + 1;
    let v = ctx.vm.gc.get_table(t).raw_getn(i as f64);
    if v.is_nil() {
        return ctx.returns(&[TValue::nil()]);
    }
    ctx.returns(&[TValue::from_number(i as f64), v])
}

fn native_select(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let n = ctx.nargs();
    if ctx.arg(0).as_string_id().map(|sid| ctx.vm.strings.get_bytes(sid)) == Some(b"#".as_slice()) {
        return ctx.returns(&[TValue::from_number((n - 1) as f64)]);
    }
    let i = ctx.check_integer(0)?;
    let start = if i < 0 {
        n as i64 + i
    } else if i == 0 {
        return Err(ctx.arg_error(0, "index out of range"));
    } else {
        i
    };
    if start < 1 {
        return Err(ctx.arg_error(0, "index out of range"));
    }
    let values: Vec<TValue> = ctx.args().iter().skip(start as usize).copied().collect();
    ctx.returns(&values)
}

fn native_rawget(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let key = ctx.check_any(1)?;
    let v = ctx.vm.gc.get_table(t).raw_get(key);
    ctx.returns(&[v])
}

fn native_rawset(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let key = ctx.check_any(1)?;
    let value = ctx.check_any(2)?;
    if let Err(e) = ctx.vm.gc.get_table_mut(t).raw_set(key, value) {
        return Err(ctx.error(e.message()));
    }
    ctx.returns(&[TValue::from_table(t)])
}

fn native_rawequal(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let a = ctx.check_any(0)?;
    let b = ctx.check_any(1)?;
    ctx.returns(&[TValue::from_bool(a.raw_equals(&b))])
}

fn native_setmetatable(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let mt = ctx.arg(1);
    if !(mt.is_nil() || mt.is_table()) {
        return Err(ctx.type_error(1, "nil or table"));
    }
    let guard = ctx.vm.mm_names.metatable;
    if let Some(old) = ctx.vm.gc.get_table(t).metatable {
        if !ctx.vm.gc.get_table(old).raw_get_str(guard).is_nil() {
            return Err(ctx.error("cannot change a protected metatable"));
        }
    }
    ctx.vm.gc.get_table_mut(t).metatable = mt.as_table_idx();
    ctx.returns(&[TValue::from_table(t)])
}

fn native_getmetatable(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let v = ctx.check_any(0)?;
    let Some(mt) = ctx.vm.metatable_of(v) else {
        return ctx.returns(&[TValue::nil()]);
    };
    let guard = ctx.vm.gc.get_table(mt).raw_get_str(ctx.vm.mm_names.metatable);
    if guard.is_nil() {
        ctx.returns(&[TValue::from_table(mt)])
    } else {
        ctx.returns(&[guard])
    }
}

fn native_assert(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let v = ctx.check_any(0)?;
    if v.is_falsy() {
        let msg = ctx.opt_bytes(1, b"assertion failed!")?;
        return Err(ctx.error(String::from_utf8_lossy(&msg)));
    }
    let values = ctx.args().to_vec();
    ctx.returns(&values)
}

/// error(value [, level]): level 1 blames the caller of `error`.
fn native_error(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let raw = ctx.arg(0);
    let level = ctx.opt_integer(1, 1)?.max(0) as usize;
    Err(ctx.vm.error_value(raw, level))
}

fn native_pcall(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    ctx.check_any(0)?;
    Ok(NativeOutcome::ProtectedCall {
        handler: None,
        first_arg: 1,
    })
}

/// xpcall(f, handler): the handler receives the error and its result
/// replaces the message.
fn native_xpcall(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    ctx.check_any(0)?;
    let handler = ctx.check_any(1)?;
    Ok(NativeOutcome::ProtectedCall {
        handler: Some(handler),
        first_arg: 2,
    })
}

fn native_unpack(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let i = ctx.opt_integer(1, 1)?;
    let len = ctx.vm.gc.get_table(t).length() as i64;
    let j = ctx.opt_integer(2, len)?;
    if i > j {
        return Ok(NativeOutcome::Return(0));
    }
    if j - i >= ctx.vm.config.max_stack_slots as i64 {
        return Err(ctx.error("too many results to unpack"));
    }
    let values: Vec<TValue> = (i..=j)
        .map(|k| ctx.vm.gc.get_table(t).raw_getn(k as f64))
        .collect();
    ctx.returns(&values)
}

/// Which function `getfenv`/`setfenv` address: a function value, or a
/// stack level (0 means the global environment).
enum EnvTarget {
    Globals,
    Closure(moonlet_core::gc::GcIdx<moonlet_core::gc::LuaClosure>),
    Native,
}

fn env_target(ctx: &mut NativeContext<'_>, fname: &str) -> Result<EnvTarget, LuaError> {
    let v = ctx.arg(0);
    if let Some(c) = v.as_closure_idx() {
        return Ok(EnvTarget::Closure(c));
    }
    if v.is_function() {
        return Ok(EnvTarget::Native);
    }
    let level = ctx.opt_integer(0, 1)?;
    if level < 0 {
        return Err(ctx.arg_error(0, "level must be non-negative"));
    }
    if level == 0 {
        return Ok(EnvTarget::Globals);
    }
    let frames = &ctx.vm.frames;
    match frames.len().checked_sub(level as usize) {
        Some(i) => Ok(EnvTarget::Closure(frames[i].closure)),
        None => Err(ctx.arg_error(0, &format!("invalid level to '{fname}'"))),
    }
}

fn native_getfenv(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let env = match env_target(ctx, "getfenv")? {
        EnvTarget::Closure(c) => ctx.vm.gc.get_closure(c).env,
        EnvTarget::Globals | EnvTarget::Native => ctx.vm.globals,
    };
    ctx.returns(&[TValue::from_table(env)])
}

fn native_setfenv(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let env = ctx.check_table(1)?;
    match env_target(ctx, "setfenv")? {
        EnvTarget::Closure(c) => {
            ctx.vm.gc.get_closure_mut(c).env = env;
            ctx.returns(&[TValue::from_closure(c)])
        }
        EnvTarget::Globals => {
            ctx.vm.globals = env;
            Ok(NativeOutcome::Return(0))
        }
        EnvTarget::Native => Err(ctx.error("'setfenv' cannot change environment of given object")),
    }
}

/// loadstring(s [, chunkname]): the compiled chunk, or nil and the message.
fn native_loadstring(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let source = ctx.check_bytes(0)?;
    let name = ctx.opt_bytes(1, &source)?;
    let name = String::from_utf8_lossy(&name).into_owned();
    match ctx.vm.load(&source, &name) {
        Ok(f) => ctx.returns(&[f]),
        Err(LuaError::Compile(e)) => {
            let msg = ctx.vm.str_value(e.to_string().as_bytes());
            ctx.returns(&[TValue::nil(), msg])
        }
        Err(e) => Err(e),
    }
}

/// collectgarbage([opt [, arg]]). A collection requested from inside a
/// nested native call (e.g. a sort comparator) is skipped.
fn native_collectgarbage(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let opt = ctx.opt_bytes(0, b"collect")?;
    match opt.as_slice() {
        b"collect" => {
            if ctx.vm.can_collect() {
                ctx.vm.gc_collect();
            }
            ctx.returns(&[TValue::from_number(0.0)])
        }
        b"count" => {
            let kb = ctx.vm.gc_count_kb();
            ctx.returns(&[TValue::from_number(kb)])
        }
        b"step" => {
            let done = ctx.vm.can_collect();
            if done {
                ctx.vm.gc_collect();
            }
            ctx.returns(&[TValue::from_bool(done)])
        }
        b"stop" => {
            ctx.vm.gc.gc_state.stopped = true;
            ctx.returns(&[TValue::from_number(0.0)])
        }
        b"restart" => {
            ctx.vm.gc.gc_state.stopped = false;
            ctx.returns(&[TValue::from_number(0.0)])
        }
        b"setpause" => {
            let pause = ctx.opt_integer(1, 0)?.max(0) as usize;
            let prev = std::mem::replace(&mut ctx.vm.gc.gc_state.pause, pause.max(100));
            ctx.returns(&[TValue::from_number(prev as f64)])
        }
        b"setstepmul" => {
            // Cycles are never incremental; the multiplier is accepted and ignored.
            ctx.opt_integer(1, 0)?;
            ctx.returns(&[TValue::from_number(200.0)])
        }
        other => {
            let msg = format!("invalid option '{}'", String::from_utf8_lossy(other));
            Err(ctx.arg_error(0, &msg))
        }
    }
}
