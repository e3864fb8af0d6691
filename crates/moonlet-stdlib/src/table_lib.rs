//! Table library.

use moonlet_core::object::lua_type_name;
use moonlet_core::value::TValue;
use moonlet_vm::compare::less_than;
use moonlet_vm::coerce;
use moonlet_vm::vm::Vm;
use moonlet_vm::{LuaError, NativeContext, NativeFn, NativeOutcome};

const TABLE_FUNCS: &[(&str, NativeFn)] = &[
    ("insert", native_table_insert),
    ("remove", native_table_remove),
    ("concat", native_table_concat),
    ("sort", native_table_sort),
    ("getn", native_table_getn),
    ("maxn", native_table_maxn),
];

pub fn register(vm: &mut Vm) {
    vm.register_lib("table", TABLE_FUNCS);
}

/// table.insert(t [,pos], val)
fn native_table_insert(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let len = ctx.vm.gc.get_table(t).length();
    match ctx.nargs() {
        2 => {
            let val = ctx.arg(1);
            ctx.vm.gc.get_table_mut(t).raw_setn((len + 1) as f64, val);
        }
        3 => {
            let pos = ctx.check_integer(1)?;
            let val = ctx.arg(2);
            if pos >= 1 {
                ctx.vm.gc.get_table_mut(t).insert_at(pos as usize, val);
            } else {
                ctx.vm.gc.get_table_mut(t).raw_setn(pos as f64, val);
            }
        }
        _ => return Err(ctx.error("wrong number of arguments to 'insert'")),
    }
    Ok(NativeOutcome::Return(0))
}

/// table.remove(t [,pos])
fn native_table_remove(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let len = ctx.vm.gc.get_table(t).length();
    if len == 0 {
        return Ok(NativeOutcome::Return(0));
    }
    let pos = ctx.opt_integer(1, len as i64)?;
    if pos < 1 {
        let removed = ctx.vm.gc.get_table(t).raw_getn(pos as f64);
        return ctx.returns(&[removed]);
    }
    let removed = ctx.vm.gc.get_table_mut(t).remove_at(pos as usize);
    ctx.returns(&[removed])
}

/// table.concat(t [,sep [,i [,j]]])
fn native_table_concat(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let sep = ctx.opt_bytes(1, b"")?;
    let i = ctx.opt_integer(2, 1)?;
    let len = ctx.vm.gc.get_table(t).length() as i64;
    let j = ctx.opt_integer(3, len)?;

    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        let v = ctx.vm.gc.get_table(t).raw_getn(k as f64);
        if !(v.is_string() || v.is_number()) {
            let msg = format!(
                "invalid value (at index {k}) in table for 'concat' (a {} value)",
                lua_type_name(v)
            );
            return Err(ctx.error(msg));
        }
        if let Some(sid) = coerce::to_string_for_concat(v, &mut ctx.vm.strings) {
            out.extend_from_slice(ctx.vm.strings.get_bytes(sid));
        }
        if k < j {
            out.extend_from_slice(&sep);
        }
        k += 1;
    }
    ctx.return_str(&out)
}

/// table.getn(t)
fn native_table_getn(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let n = ctx.vm.gc.get_table(t).length();
    ctx.returns(&[TValue::from_number(n as f64)])
}

/// table.maxn(t)
fn native_table_maxn(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let n = ctx.vm.gc.get_table(t).max_index();
    ctx.returns(&[TValue::from_number(n)])
}

/// `a < b` for sorting: the comparator if given, else the `<` operator.
fn sort_less(
    ctx: &mut NativeContext<'_>,
    comp: Option<TValue>,
    a: TValue,
    b: TValue,
) -> Result<bool, LuaError> {
    if let Some(f) = comp {
        let results = ctx.call(f, &[a, b])?;
        return Ok(results.first().is_some_and(|v| v.is_truthy()));
    }
    if let Some(lt) = less_than(a, b, &ctx.vm.strings) {
        return Ok(lt);
    }
    let event = ctx.vm.mm_names.lt;
    let handler = ctx
        .vm
        .get_metamethod(a, event)
        .or_else(|| ctx.vm.get_metamethod(b, event));
    match handler {
        Some(h) => {
            let results = ctx.call(h, &[a, b])?;
            Ok(results.first().is_some_and(|v| v.is_truthy()))
        }
        None => {
            let (ta, tb) = (lua_type_name(a), lua_type_name(b));
            let msg = if ta == tb {
                format!("attempt to compare two {ta} values")
            } else {
                format!("attempt to compare {ta} with {tb}")
            };
            Err(ctx.error(msg))
        }
    }
}

/// Stable bottom-up merge sort with a fallible comparison.
fn merge_sort(
    ctx: &mut NativeContext<'_>,
    comp: Option<TValue>,
    values: &mut Vec<TValue>,
) -> Result<(), LuaError> {
    let n = values.len();
    let mut buf = values.clone();
    let mut width = 1;
    while width < n {
        let mut lo = 0;
        while lo < n {
            let mid = (lo + width).min(n);
            let hi = (lo + 2 * width).min(n);
            let (mut a, mut b) = (lo, mid);
            for slot in buf.iter_mut().take(hi).skip(lo) {
                let take_right = a >= mid || (b < hi && sort_less(ctx, comp, values[b], values[a])?);
                if take_right {
                    *slot = values[b];
                    b += 1;
                } else {
                    *slot = values[a];
                    a += 1;
                }
            }
            lo = hi;
        }
        std::mem::swap(values, &mut buf);
        width *= 2;
    }
    Ok(())
}

/// table.sort(t [,comp])
fn native_table_sort(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let t = ctx.check_table(0)?;
    let comp = if ctx.arg(1).is_nil() {
        None
    } else {
        Some(ctx.check_function(1)?)
    };
    let len = ctx.vm.gc.get_table(t).length();
    let mut values: Vec<TValue> = (1..=len)
        .map(|i| ctx.vm.gc.get_table(t).raw_getn(i as f64))
        .collect();
    merge_sort(ctx, comp, &mut values)?;
    let table = ctx.vm.gc.get_table_mut(t);
    for (i, v) in values.into_iter().enumerate() {
        table.raw_setn((i + 1) as f64, v);
    }
    Ok(NativeOutcome::Return(0))
}
