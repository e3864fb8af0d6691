//! Math library. The random source lives in the VM state.

use moonlet_core::value::TValue;
use moonlet_vm::arith::lua_mod;
use moonlet_vm::vm::Vm;
use moonlet_vm::{LuaError, NativeContext, NativeFn, NativeOutcome};

const MATH_FUNCS: &[(&str, NativeFn)] = &[
    ("abs", native_math_abs),
    ("ceil", native_math_ceil),
    ("floor", native_math_floor),
    ("sqrt", native_math_sqrt),
    ("sin", native_math_sin),
    ("cos", native_math_cos),
    ("tan", native_math_tan),
    ("asin", native_math_asin),
    ("acos", native_math_acos),
    ("atan", native_math_atan),
    ("atan2", native_math_atan2),
    ("exp", native_math_exp),
    ("log", native_math_log),
    ("log10", native_math_log10),
    ("deg", native_math_deg),
    ("rad", native_math_rad),
    ("pow", native_math_pow),
    ("fmod", native_math_fmod),
    ("mod", native_math_mod),
    ("modf", native_math_modf),
    ("max", native_math_max),
    ("min", native_math_min),
    ("random", native_math_random),
    ("randomseed", native_math_randomseed),
];

pub fn register(vm: &mut Vm) {
    let math = vm.register_lib("math", MATH_FUNCS);
    let pi = vm.strings.intern(b"pi");
    let huge = vm.strings.intern(b"huge");
    let table = vm.gc.get_table_mut(math);
    table.raw_set_str(pi, TValue::from_number(std::f64::consts::PI));
    table.raw_set_str(huge, TValue::from_number(f64::INFINITY));
}

fn unary(ctx: &mut NativeContext<'_>, f: fn(f64) -> f64) -> Result<NativeOutcome, LuaError> {
    let x = ctx.check_number(0)?;
    ctx.returns(&[TValue::from_number(f(x))])
}

fn native_math_abs(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::abs)
}

fn native_math_ceil(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::ceil)
}

fn native_math_floor(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::floor)
}

fn native_math_sqrt(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::sqrt)
}

fn native_math_sin(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::sin)
}

fn native_math_cos(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::cos)
}

fn native_math_tan(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::tan)
}

fn native_math_asin(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::asin)
}

fn native_math_acos(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::acos)
}

fn native_math_atan(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::atan)
}

fn native_math_atan2(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let y = ctx.check_number(0)?;
    let x = ctx.check_number(1)?;
    ctx.returns(&[TValue::from_number(y.atan2(x))])
}

fn native_math_exp(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::exp)
}

fn native_math_log(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::ln)
}

fn native_math_log10(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::log10)
}

fn native_math_deg(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::to_degrees)
}

fn native_math_rad(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    unary(ctx, f64::to_radians)
}

fn native_math_pow(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let x = ctx.check_number(0)?;
    let y = ctx.check_number(1)?;
    ctx.returns(&[TValue::from_number(x.powf(y))])
}

/// C `fmod`: the result takes the sign of `x`.
fn native_math_fmod(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let x = ctx.check_number(0)?;
    let y = ctx.check_number(1)?;
    ctx.returns(&[TValue::from_number(x % y)])
}

/// The `%` operator as a function.
fn native_math_mod(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let x = ctx.check_number(0)?;
    let y = ctx.check_number(1)?;
    ctx.returns(&[TValue::from_number(lua_mod(x, y))])
}

fn native_math_modf(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let x = ctx.check_number(0)?;
    let int = x.trunc();
    let frac = if x.is_infinite() { 0.0 } else { x - int };
    ctx.returns(&[TValue::from_number(int), TValue::from_number(frac)])
}

fn extreme(ctx: &mut NativeContext<'_>, better: fn(f64, f64) -> bool) -> Result<NativeOutcome, LuaError> {
    let mut best = ctx.check_number(0)?;
    for i in 1..ctx.nargs() {
        let x = ctx.check_number(i)?;
        if better(x, best) {
            best = x;
        }
    }
    ctx.returns(&[TValue::from_number(best)])
}

fn native_math_max(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    extreme(ctx, |x, best| x > best)
}

fn native_math_min(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    extreme(ctx, |x, best| x < best)
}

/// random() in [0,1), random(m) in [1,m], random(m,n) in [m,n].
fn native_math_random(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let r = match ctx.nargs() {
        0 => ctx.vm.rng.f64(),
        1 => {
            let m = ctx.check_integer(0)?;
            if m < 1 {
                return Err(ctx.arg_error(0, "interval is empty"));
            }
            ctx.vm.rng.i64(1..=m) as f64
        }
        2 => {
            let m = ctx.check_integer(0)?;
            let n = ctx.check_integer(1)?;
            if m > n {
                return Err(ctx.arg_error(1, "interval is empty"));
            }
            ctx.vm.rng.i64(m..=n) as f64
        }
        _ => return Err(ctx.error("wrong number of arguments")),
    };
    ctx.returns(&[TValue::from_number(r)])
}

fn native_math_randomseed(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let seed = ctx.check_integer(0)?;
    ctx.vm.rng.seed(seed as u64);
    Ok(NativeOutcome::Return(0))
}
