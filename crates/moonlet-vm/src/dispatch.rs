//! Main bytecode dispatch loop.
//!
//! The loop never recurses for Lua-to-Lua calls, metamethods, `pcall` or
//! coroutine switches. An instruction that needs a call pushes the callee
//! frame with a [`ReturnDest`] describing where the results go and what
//! is left of the instruction ([`PostProcess`]); the instruction is
//! finished when that frame returns. Natives calling back into Lua start a
//! nested run bounded by a [`RunBoundary`].

use crate::arith::{self, ArithOp};
use crate::callinfo::{CallFrame, Catch, PostProcess, ReturnDest};
use crate::coerce;
use crate::compare;
use crate::error::{LuaError, RuntimeError, RuntimeErrorKind};
use crate::native::{NativeContext, NativeOutcome};
use crate::varinfo;
use crate::vm::{ResumeDest, RunBoundary, ThreadStatus, Vm};
use moonlet_compiler::opcode::{fb2int, index_k, is_k, OpCode, FIELDS_PER_FLUSH};
use moonlet_compiler::proto::{Constant, UpvalSource};
use moonlet_core::gc::{GcIdx, LuaClosure, NativeId, ThreadId};
use moonlet_core::object::lua_type_name;
use moonlet_core::string::StringId;
use moonlet_core::value::TValue;

/// Outcome of one dispatch step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// The instruction completed in place.
    Done,
    /// A frame was pushed; the instruction completes when it returns.
    Pushed,
}

/// How a run stopped.
#[derive(Debug)]
pub(crate) enum RunExit {
    Finished(Vec<TValue>),
    /// The instruction budget ran out.
    Paused,
}

/// Convert a constant to TValue.
#[inline]
pub fn constant_to_tvalue(k: Constant) -> TValue {
    match k {
        Constant::Nil => TValue::nil(),
        Constant::Boolean(b) => TValue::from_bool(b),
        Constant::Number(n) => TValue::from_number(n),
        Constant::String(sid) => TValue::from_string_id(sid),
    }
}

#[inline]
fn constant(vm: &Vm, proto_idx: usize, idx: u32) -> TValue {
    constant_to_tvalue(vm.protos[proto_idx].proto.constants[idx as usize])
}

/// Register or constant operand.
#[inline]
fn rk(vm: &Vm, proto_idx: usize, base: usize, x: u32) -> TValue {
    if is_k(x) {
        constant(vm, proto_idx, index_k(x))
    } else {
        vm.stack[base + x as usize]
    }
}

#[inline]
fn rk_reg(x: u32) -> Option<u32> {
    (!is_k(x)).then_some(x)
}

#[inline]
fn frame_base(vm: &Vm) -> usize {
    vm.frames.last().map_or(0, |f| f.base)
}

#[inline]
fn set_reg(vm: &mut Vm, reg: u32, value: TValue) {
    let slot = frame_base(vm) + reg as usize;
    vm.stack[slot] = value;
}

/// Skip the jump following a test unless `result == expect`.
#[inline]
fn cond_jump(vm: &mut Vm, result: bool, expect: bool) {
    if result != expect {
        if let Some(frame) = vm.frames.last_mut() {
            frame.pc += 1;
        }
    }
}

/// First slot above everything the current frame may still use.
fn scratch_slot(vm: &Vm) -> usize {
    match vm.frames.last() {
        Some(f) => (f.base + vm.protos[f.proto_idx].proto.max_stack_size as usize).max(vm.top),
        None => vm.top,
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Call `func` and run it to completion on the current thread.
pub fn call_function(vm: &mut Vm, func: TValue, args: &[TValue]) -> Result<Vec<TValue>, LuaError> {
    start_run(vm, func, args)?;
    match run(vm, None)? {
        RunExit::Finished(values) => Ok(values),
        RunExit::Paused => Err(LuaError::Internal("unbudgeted run paused".into())),
    }
}

/// Push `func(args...)` above the live stack and open a run for it.
pub(crate) fn start_run(vm: &mut Vm, func: TValue, args: &[TValue]) -> Result<(), LuaError> {
    if vm.runs.len() >= vm.config.max_native_depth {
        return Err(vm.error_with_kind("C stack overflow", RuntimeErrorKind::RecursionLimit));
    }
    let slot = scratch_slot(vm);
    vm.ensure_stack(slot + args.len() + 1)?;
    vm.stack[slot] = func;
    vm.stack[slot + 1..slot + 1 + args.len()].copy_from_slice(args);
    vm.top = slot + 1 + args.len();
    vm.runs.push(RunBoundary {
        thread: vm.current,
        depth: vm.frames.len(),
        ret_base: slot,
    });
    if let Err(e) = precall(vm, slot, args.len(), ReturnDest::new(slot, -1)) {
        unwind(vm, e)?;
    }
    Ok(())
}

/// Execute until the innermost run finishes or `budget` instructions
/// have been executed.
pub(crate) fn run(vm: &mut Vm, mut budget: Option<u64>) -> Result<RunExit, LuaError> {
    loop {
        let boundary = *vm
            .runs
            .last()
            .ok_or_else(|| LuaError::Internal("no active run".into()))?;
        if vm.current == boundary.thread && vm.frames.len() <= boundary.depth {
            let end = vm.top.max(boundary.ret_base);
            let results = vm.stack[boundary.ret_base..end].to_vec();
            vm.top = boundary.ret_base;
            vm.runs.pop();
            return Ok(RunExit::Finished(results));
        }
        if vm.frames.is_empty() {
            // A coroutine body returned.
            if let Err(e) = finish_coroutine(vm) {
                unwind(vm, e)?;
            }
            continue;
        }
        if let Some(left) = budget.as_mut() {
            if *left == 0 {
                return Ok(RunExit::Paused);
            }
            *left -= 1;
        }
        // Instruction boundary: every live value is in VM state.
        vm.gc_check();
        if let Err(e) = execute_instruction(vm) {
            unwind(vm, e)?;
        }
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

fn execute_instruction(vm: &mut Vm) -> Result<Flow, LuaError> {
    let fi = vm.frames.len() - 1;
    let frame = &vm.frames[fi];
    let (base, pc, proto_idx, closure) = (frame.base, frame.pc, frame.proto_idx, frame.closure);
    let Some(&inst) = vm.protos[proto_idx].proto.code.get(pc) else {
        return Err(LuaError::Internal(format!("pc {pc} out of range")));
    };
    vm.frames[fi].pc = pc + 1;

    let a = inst.a();
    let ra = base + a as usize;
    match inst.opcode() {
        OpCode::Move => {
            vm.stack[ra] = vm.stack[base + inst.b() as usize];
        }
        OpCode::LoadK => {
            vm.stack[ra] = constant(vm, proto_idx, inst.bx());
        }
        OpCode::LoadBool => {
            vm.stack[ra] = TValue::from_bool(inst.b() != 0);
            if inst.c() != 0 {
                vm.frames[fi].pc += 1;
            }
        }
        OpCode::LoadNil => {
            for slot in &mut vm.stack[ra..=base + inst.b() as usize] {
                *slot = TValue::nil();
            }
        }
        OpCode::GetUpval => {
            let uv = vm.gc.get_closure(closure).upvalues[inst.b() as usize];
            vm.stack[ra] = vm.get_upval(uv);
        }
        OpCode::GetGlobal => {
            let env = TValue::from_table(vm.gc.get_closure(closure).env);
            let key = constant(vm, proto_idx, inst.bx());
            return index_value(vm, env, key, a, None);
        }
        OpCode::GetTable => {
            let t = vm.stack[base + inst.b() as usize];
            let key = rk(vm, proto_idx, base, inst.c());
            return index_value(vm, t, key, a, Some(inst.b()));
        }
        OpCode::SetGlobal => {
            let env = TValue::from_table(vm.gc.get_closure(closure).env);
            let key = constant(vm, proto_idx, inst.bx());
            let val = vm.stack[ra];
            return newindex_value(vm, env, key, val, None);
        }
        OpCode::SetUpval => {
            let uv = vm.gc.get_closure(closure).upvalues[inst.b() as usize];
            let val = vm.stack[ra];
            vm.set_upval(uv, val);
        }
        OpCode::SetTable => {
            let t = vm.stack[ra];
            let key = rk(vm, proto_idx, base, inst.b());
            let val = rk(vm, proto_idx, base, inst.c());
            return newindex_value(vm, t, key, val, Some(a));
        }
        OpCode::NewTable => {
            let t = vm
                .gc
                .alloc_table(fb2int(inst.b()) as usize, fb2int(inst.c()) as usize);
            vm.stack[ra] = TValue::from_table(t);
        }
        OpCode::Self_ => {
            let obj = vm.stack[base + inst.b() as usize];
            vm.stack[ra + 1] = obj;
            let key = rk(vm, proto_idx, base, inst.c());
            return index_value(vm, obj, key, a, Some(inst.b()));
        }
        OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
            let op = match inst.opcode() {
                OpCode::Add => ArithOp::Add,
                OpCode::Sub => ArithOp::Sub,
                OpCode::Mul => ArithOp::Mul,
                OpCode::Div => ArithOp::Div,
                OpCode::Mod => ArithOp::Mod,
                _ => ArithOp::Pow,
            };
            let x = rk(vm, proto_idx, base, inst.b());
            let y = rk(vm, proto_idx, base, inst.c());
            if let (Some(p), Some(q)) = (x.as_number(), y.as_number()) {
                vm.stack[ra] = TValue::from_number(arith::arith_num(op, p, q));
            } else {
                return arith_meta(vm, op, a, x, y, (rk_reg(inst.b()), rk_reg(inst.c())));
            }
        }
        OpCode::Unm => {
            let x = vm.stack[base + inst.b() as usize];
            match x.as_number() {
                Some(n) => vm.stack[ra] = TValue::from_number(-n),
                None => {
                    let reg = Some(inst.b());
                    return arith_meta(vm, ArithOp::Unm, a, x, x, (reg, reg));
                }
            }
        }
        OpCode::Not => {
            vm.stack[ra] = TValue::from_bool(vm.stack[base + inst.b() as usize].is_falsy());
        }
        OpCode::Len => return length(vm, a, inst.b()),
        OpCode::Concat => {
            let (b, c) = (inst.b(), inst.c());
            return concat(vm, a, b, c - b + 1);
        }
        OpCode::Jmp => jump(vm, fi, inst.sbx()),
        OpCode::Eq => {
            let x = rk(vm, proto_idx, base, inst.b());
            let y = rk(vm, proto_idx, base, inst.c());
            return compare_eq(vm, a != 0, x, y);
        }
        OpCode::Lt => {
            let x = rk(vm, proto_idx, base, inst.b());
            let y = rk(vm, proto_idx, base, inst.c());
            return compare_lt(vm, a != 0, x, y);
        }
        OpCode::Le => {
            let x = rk(vm, proto_idx, base, inst.b());
            let y = rk(vm, proto_idx, base, inst.c());
            return compare_le(vm, a != 0, x, y);
        }
        OpCode::Test => {
            if vm.stack[ra].is_truthy() != (inst.c() != 0) {
                vm.frames[fi].pc += 1;
            }
        }
        OpCode::TestSet => {
            let v = vm.stack[base + inst.b() as usize];
            if v.is_truthy() == (inst.c() != 0) {
                vm.stack[ra] = v;
            } else {
                vm.frames[fi].pc += 1;
            }
        }
        OpCode::Call => {
            let nargs = call_args(vm, ra, inst.b());
            let f = vm.stack[ra];
            check_callable(vm, f, a)?;
            let dest = ReturnDest::new(ra, inst.c() as i32 - 1);
            return precall(vm, ra, nargs, dest);
        }
        OpCode::TailCall => {
            let nargs = call_args(vm, ra, inst.b());
            let f = vm.stack[ra];
            check_callable(vm, f, a)?;
            return tail_call(vm, ra, nargs);
        }
        OpCode::Return => {
            let n = match inst.b() {
                0 => vm.top.saturating_sub(ra),
                b => b as usize - 1,
            };
            return do_return(vm, ra, n);
        }
        OpCode::ForLoop => {
            let step = for_number(vm, ra + 2)?;
            let idx = for_number(vm, ra)? + step;
            let limit = for_number(vm, ra + 1)?;
            let more = if step > 0.0 { idx <= limit } else { limit <= idx };
            if more {
                jump(vm, fi, inst.sbx());
                vm.stack[ra] = TValue::from_number(idx);
                vm.stack[ra + 3] = TValue::from_number(idx);
            }
        }
        OpCode::ForPrep => {
            let init = for_operand(vm, ra, "initial value")?;
            let limit = for_operand(vm, ra + 1, "limit")?;
            let step = for_operand(vm, ra + 2, "step")?;
            vm.stack[ra] = TValue::from_number(init - step);
            vm.stack[ra + 1] = TValue::from_number(limit);
            vm.stack[ra + 2] = TValue::from_number(step);
            jump(vm, fi, inst.sbx());
        }
        OpCode::TForLoop => {
            let cb = ra + 3;
            vm.ensure_stack(cb + 3)?;
            vm.stack[cb + 2] = vm.stack[ra + 2];
            vm.stack[cb + 1] = vm.stack[ra + 1];
            vm.stack[cb] = vm.stack[ra];
            vm.top = cb + 3;
            let f = vm.stack[cb];
            check_callable(vm, f, a)?;
            let dest =
                ReturnDest::new(cb, inst.c() as i32).with_post(PostProcess::TForLoop { a });
            return precall(vm, cb, 2, dest);
        }
        OpCode::SetList => {
            let n = match inst.b() {
                0 => vm.top.saturating_sub(ra + 1),
                b => b as usize,
            };
            let batch = match inst.c() {
                0 => {
                    let raw = vm.protos[proto_idx]
                        .proto
                        .code
                        .get(pc + 1)
                        .map(|word| word.0 as usize)
                        .ok_or_else(|| LuaError::Internal("SETLIST batch word missing".into()))?;
                    vm.frames[fi].pc += 1;
                    raw
                }
                c => c as usize,
            };
            let Some(t) = vm.stack[ra].as_table_idx() else {
                return Err(LuaError::Internal("SETLIST target is not a table".into()));
            };
            let offset = batch.saturating_sub(1) * FIELDS_PER_FLUSH as usize;
            for i in 1..=n {
                let v = vm.stack[ra + i];
                vm.gc.get_table_mut(t).raw_setn((offset + i) as f64, v);
            }
        }
        OpCode::Close => vm.close_upvals(ra),
        OpCode::Closure => {
            let child = *vm.protos[proto_idx]
                .children
                .get(inst.bx() as usize)
                .ok_or_else(|| LuaError::Internal("CLOSURE index out of range".into()))?;
            let nup = vm.protos[child].proto.upvalues.len();
            let mut upvals = Vec::with_capacity(nup);
            for i in 0..nup {
                let source = vm.protos[child].proto.upvalues[i].source;
                let uv = match source {
                    UpvalSource::Local(r) => vm.find_or_create_upval(base + r as usize),
                    UpvalSource::Upvalue(u) => vm.gc.get_closure(closure).upvalues[u as usize],
                };
                upvals.push(uv);
            }
            let env = vm.gc.get_closure(closure).env;
            let cl = vm.gc.alloc_closure(child, upvals, env);
            vm.stack[ra] = TValue::from_closure(cl);
        }
        OpCode::VarArg => {
            let frame = &vm.frames[fi];
            let (nva, va_base) = (frame.num_varargs, frame.vararg_base());
            let n = match inst.b() {
                0 => nva,
                b => b as usize - 1,
            };
            vm.ensure_stack(ra + n)?;
            for i in 0..n {
                vm.stack[ra + i] = if i < nva {
                    vm.stack[va_base + i]
                } else {
                    TValue::nil()
                };
            }
            if inst.b() == 0 {
                vm.top = ra + n;
            }
        }
    }
    Ok(Flow::Done)
}

#[inline]
fn jump(vm: &mut Vm, fi: usize, sbx: i32) {
    let frame = &mut vm.frames[fi];
    frame.pc = (frame.pc as i64 + sbx as i64) as usize;
}

/// Argument count of a CALL/TAILCALL with operand B.
#[inline]
fn call_args(vm: &Vm, ra: usize, b: u32) -> usize {
    match b {
        0 => vm.top.saturating_sub(ra + 1),
        b => b as usize - 1,
    }
}

fn for_number(vm: &Vm, slot: usize) -> Result<f64, LuaError> {
    vm.stack[slot]
        .as_number()
        .ok_or_else(|| LuaError::Internal("numeric for state is not a number".into()))
}

fn for_operand(vm: &mut Vm, slot: usize, what: &str) -> Result<f64, LuaError> {
    match coerce::to_number(vm.stack[slot], &vm.strings) {
        Some(n) => Ok(n),
        None => Err(vm.rt_error(format!("'for' {what} must be a number"))),
    }
}

// ---------------------------------------------------------------------------
// Error helpers
// ---------------------------------------------------------------------------

fn describe_reg(vm: &Vm, reg: u32) -> Option<String> {
    let frame = vm.frames.last()?;
    varinfo::describe_register(
        &vm.protos[frame.proto_idx].proto,
        frame.current_pc(),
        reg,
        &vm.strings,
    )
}

/// `attempt to <op> <name> (a <type> value)`.
fn op_error(vm: &mut Vm, op: &str, value: TValue, reg: Option<u32>) -> LuaError {
    let ty = lua_type_name(value);
    match reg.and_then(|r| describe_reg(vm, r)) {
        Some(name) => vm.rt_error(format!("attempt to {op} {name} (a {ty} value)")),
        None => vm.rt_error(format!("attempt to {op} a {ty} value")),
    }
}

fn order_error(vm: &mut Vm, x: TValue, y: TValue) -> LuaError {
    let (t1, t2) = (lua_type_name(x), lua_type_name(y));
    if t1 == t2 {
        vm.rt_error(format!("attempt to compare two {t1} values"))
    } else {
        vm.rt_error(format!("attempt to compare {t1} with {t2}"))
    }
}

fn check_callable(vm: &mut Vm, f: TValue, reg: u32) -> Result<(), LuaError> {
    if f.is_function() || vm.get_metamethod(f, vm.mm_names.call).is_some() {
        Ok(())
    } else {
        Err(op_error(vm, "call", f, Some(reg)))
    }
}

// ---------------------------------------------------------------------------
// Metamethod-driven operations
// ---------------------------------------------------------------------------

/// Call metamethod `handler` above the current frame; `post` finishes the
/// interrupted instruction with its first result.
fn call_meta(
    vm: &mut Vm,
    handler: TValue,
    args: &[TValue],
    post: PostProcess,
) -> Result<Flow, LuaError> {
    let slot = scratch_slot(vm);
    vm.ensure_stack(slot + args.len() + 1)?;
    vm.stack[slot] = handler;
    vm.stack[slot + 1..slot + 1 + args.len()].copy_from_slice(args);
    vm.top = slot + 1 + args.len();
    tracing::trace!(?post, "metamethod call");
    precall(
        vm,
        slot,
        args.len(),
        ReturnDest::new(slot, 1).with_post(post),
    )
}

/// `R(dest) = obj[key]`, following `__index`.
fn index_value(
    vm: &mut Vm,
    obj: TValue,
    key: TValue,
    dest: u32,
    origin: Option<u32>,
) -> Result<Flow, LuaError> {
    let mut t = obj;
    for hop in 0..vm.config.max_index_chain {
        let handler = match t.as_table_idx() {
            Some(tid) => {
                let table = vm.gc.get_table(tid);
                let v = table.raw_get(key);
                if !v.is_nil() {
                    set_reg(vm, dest, v);
                    return Ok(Flow::Done);
                }
                let h = table
                    .metatable
                    .map(|mt| vm.gc.get_table(mt).raw_get_str(vm.mm_names.index))
                    .unwrap_or_default();
                if h.is_nil() {
                    set_reg(vm, dest, TValue::nil());
                    return Ok(Flow::Done);
                }
                h
            }
            None => match vm.get_metamethod(t, vm.mm_names.index) {
                Some(h) => h,
                None => {
                    let reg = if hop == 0 { origin } else { None };
                    return Err(op_error(vm, "index", t, reg));
                }
            },
        };
        if handler.is_function() {
            return call_meta(vm, handler, &[t, key], PostProcess::Store(dest));
        }
        t = handler;
    }
    Err(vm.error_with_kind(
        "'__index' chain too long; possible loop",
        RuntimeErrorKind::RecursionLimit,
    ))
}

/// `obj[key] = val`, following `__newindex`.
fn newindex_value(
    vm: &mut Vm,
    obj: TValue,
    key: TValue,
    val: TValue,
    origin: Option<u32>,
) -> Result<Flow, LuaError> {
    let mut t = obj;
    for hop in 0..vm.config.max_index_chain {
        let handler = match t.as_table_idx() {
            Some(tid) => {
                let table = vm.gc.get_table(tid);
                let h = match table.metatable {
                    Some(mt) if table.raw_get(key).is_nil() => {
                        vm.gc.get_table(mt).raw_get_str(vm.mm_names.newindex)
                    }
                    _ => TValue::nil(),
                };
                if h.is_nil() {
                    if let Err(e) = vm.gc.get_table_mut(tid).raw_set(key, val) {
                        return Err(vm.rt_error(e.message()));
                    }
                    return Ok(Flow::Done);
                }
                h
            }
            None => match vm.get_metamethod(t, vm.mm_names.newindex) {
                Some(h) => h,
                None => {
                    let reg = if hop == 0 { origin } else { None };
                    return Err(op_error(vm, "index", t, reg));
                }
            },
        };
        if handler.is_function() {
            return call_meta(vm, handler, &[t, key, val], PostProcess::Discard);
        }
        t = handler;
    }
    Err(vm.error_with_kind(
        "'__newindex' chain too long; possible loop",
        RuntimeErrorKind::RecursionLimit,
    ))
}

fn arith_event(vm: &Vm, op: ArithOp) -> StringId {
    let names = &vm.mm_names;
    match op {
        ArithOp::Add => names.add,
        ArithOp::Sub => names.sub,
        ArithOp::Mul => names.mul,
        ArithOp::Div => names.div,
        ArithOp::Mod => names.mod_,
        ArithOp::Pow => names.pow,
        ArithOp::Unm => names.unm,
    }
}

/// Arithmetic with string coercion, then metamethods of either operand.
fn arith_meta(
    vm: &mut Vm,
    op: ArithOp,
    dest: u32,
    x: TValue,
    y: TValue,
    regs: (Option<u32>, Option<u32>),
) -> Result<Flow, LuaError> {
    if let Some(v) = arith::arith_op(op, x, y, &vm.strings) {
        set_reg(vm, dest, v);
        return Ok(Flow::Done);
    }
    let event = arith_event(vm, op);
    let handler = vm
        .get_metamethod(x, event)
        .or_else(|| vm.get_metamethod(y, event));
    match handler {
        Some(h) => call_meta(vm, h, &[x, y], PostProcess::Store(dest)),
        None => {
            let (bad, reg) = if coerce::to_number(x, &vm.strings).is_none() {
                (x, regs.0)
            } else {
                (y, regs.1)
            };
            Err(op_error(vm, "perform arithmetic on", bad, reg))
        }
    }
}

fn length(vm: &mut Vm, dest: u32, b: u32) -> Result<Flow, LuaError> {
    let v = vm.stack[frame_base(vm) + b as usize];
    if let Some(sid) = v.as_string_id() {
        let n = vm.strings.get_bytes(sid).len();
        set_reg(vm, dest, TValue::from_number(n as f64));
        return Ok(Flow::Done);
    }
    if let Some(t) = v.as_table_idx() {
        let n = vm.gc.get_table(t).length();
        set_reg(vm, dest, TValue::from_number(n as f64));
        return Ok(Flow::Done);
    }
    match vm.get_metamethod(v, vm.mm_names.len) {
        Some(h) => call_meta(vm, h, &[v], PostProcess::Store(dest)),
        None => Err(op_error(vm, "get length of", v, Some(b))),
    }
}

/// Concatenate `R(b)..R(b + n - 1)` into `R(a)`, folding from the right.
/// Intermediate results are written back into the operand registers so a
/// `__concat` call can pick up where it left off.
fn concat(vm: &mut Vm, a: u32, b: u32, mut n: u32) -> Result<Flow, LuaError> {
    let base = frame_base(vm);
    while n > 1 {
        let end = base + (b + n) as usize;
        let (x, y) = (vm.stack[end - 2], vm.stack[end - 1]);
        if coerce::is_concatable(x) && coerce::is_concatable(y) {
            let mut count = 2;
            while count < n as usize && coerce::is_concatable(vm.stack[end - count - 1]) {
                count += 1;
            }
            let mut buf = Vec::new();
            for slot in end - count..end {
                let sid = coerce::to_string_for_concat(vm.stack[slot], &mut vm.strings)
                    .ok_or_else(|| LuaError::Internal("concat operand changed type".into()))?;
                buf.extend_from_slice(vm.strings.get_bytes(sid));
            }
            let joined = vm.str_value(&buf);
            vm.stack[end - count] = joined;
            n -= count as u32 - 1;
        } else {
            let event = vm.mm_names.concat;
            let handler = vm
                .get_metamethod(x, event)
                .or_else(|| vm.get_metamethod(y, event));
            return match handler {
                Some(h) => call_meta(vm, h, &[x, y], PostProcess::Concat { a, b, n }),
                None => {
                    let (bad, slot) = if coerce::is_concatable(x) {
                        (y, end - 1)
                    } else {
                        (x, end - 2)
                    };
                    Err(op_error(vm, "concatenate", bad, Some((slot - base) as u32)))
                }
            };
        }
    }
    vm.stack[base + a as usize] = vm.stack[base + b as usize];
    Ok(Flow::Done)
}

/// Handler shared by both operands, as comparisons require.
fn comparison_handler(vm: &Vm, x: TValue, y: TValue, event: StringId) -> Option<TValue> {
    let h1 = vm.get_metamethod(x, event)?;
    let h2 = vm.get_metamethod(y, event)?;
    compare::raw_equal(h1, h2).then_some(h1)
}

fn compare_eq(vm: &mut Vm, expect: bool, x: TValue, y: TValue) -> Result<Flow, LuaError> {
    if compare::raw_equal(x, y) {
        cond_jump(vm, true, expect);
        return Ok(Flow::Done);
    }
    let same_kind = (x.is_table() && y.is_table()) || (x.is_userdata() && y.is_userdata());
    if same_kind {
        if let Some(h) = comparison_handler(vm, x, y, vm.mm_names.eq) {
            let post = PostProcess::Cond {
                expect,
                negate: false,
            };
            return call_meta(vm, h, &[x, y], post);
        }
    }
    cond_jump(vm, false, expect);
    Ok(Flow::Done)
}

fn compare_lt(vm: &mut Vm, expect: bool, x: TValue, y: TValue) -> Result<Flow, LuaError> {
    if let Some(r) = compare::less_than(x, y, &vm.strings) {
        cond_jump(vm, r, expect);
        return Ok(Flow::Done);
    }
    if lua_type_name(x) == lua_type_name(y) {
        if let Some(h) = comparison_handler(vm, x, y, vm.mm_names.lt) {
            let post = PostProcess::Cond {
                expect,
                negate: false,
            };
            return call_meta(vm, h, &[x, y], post);
        }
    }
    Err(order_error(vm, x, y))
}

fn compare_le(vm: &mut Vm, expect: bool, x: TValue, y: TValue) -> Result<Flow, LuaError> {
    if let Some(r) = compare::less_equal(x, y, &vm.strings) {
        cond_jump(vm, r, expect);
        return Ok(Flow::Done);
    }
    if lua_type_name(x) == lua_type_name(y) {
        if let Some(h) = comparison_handler(vm, x, y, vm.mm_names.le) {
            let post = PostProcess::Cond {
                expect,
                negate: false,
            };
            return call_meta(vm, h, &[x, y], post);
        }
        // a <= b  ==  not (b < a)
        if let Some(h) = comparison_handler(vm, y, x, vm.mm_names.lt) {
            let post = PostProcess::Cond {
                expect,
                negate: true,
            };
            return call_meta(vm, h, &[y, x], post);
        }
    }
    Err(order_error(vm, x, y))
}

// ---------------------------------------------------------------------------
// Calls and returns
// ---------------------------------------------------------------------------

/// Resolve `__call` until the slot holds a function, shifting the
/// arguments up by one per hop.
fn resolve_callable(vm: &mut Vm, func_slot: usize, nargs: &mut usize) -> Result<TValue, LuaError> {
    let mut func = vm.stack[func_slot];
    let mut hops = 0;
    while !func.is_function() {
        let Some(handler) = vm.get_metamethod(func, vm.mm_names.call) else {
            return Err(vm.rt_error(format!("attempt to call a {} value", lua_type_name(func))));
        };
        hops += 1;
        if hops > vm.config.max_index_chain {
            return Err(vm.error_with_kind(
                "'__call' chain too long; possible loop",
                RuntimeErrorKind::RecursionLimit,
            ));
        }
        vm.ensure_stack(func_slot + *nargs + 2)?;
        vm.stack
            .copy_within(func_slot..func_slot + *nargs + 1, func_slot + 1);
        vm.stack[func_slot] = handler;
        *nargs += 1;
        vm.top = func_slot + *nargs + 1;
        func = handler;
    }
    Ok(func)
}

/// Start a call of `stack[func_slot]` with `nargs` arguments above it.
pub(crate) fn precall(
    vm: &mut Vm,
    func_slot: usize,
    mut nargs: usize,
    dest: ReturnDest,
) -> Result<Flow, LuaError> {
    let func = resolve_callable(vm, func_slot, &mut nargs)?;
    if let Some(cl) = func.as_closure_idx() {
        push_lua_frame(vm, cl, func_slot, nargs, dest, false)?;
        Ok(Flow::Pushed)
    } else if let Some(id) = func.as_native_id() {
        call_native(vm, id, func_slot, nargs, dest)
    } else {
        Err(LuaError::Internal("callable value is neither closure nor native".into()))
    }
}

fn push_lua_frame(
    vm: &mut Vm,
    cl: GcIdx<LuaClosure>,
    func_slot: usize,
    nargs: usize,
    ret: ReturnDest,
    is_tail: bool,
) -> Result<(), LuaError> {
    if vm.frames.len() >= vm.config.max_call_depth {
        return Err(vm.error_with_kind("stack overflow", RuntimeErrorKind::StackOverflow));
    }
    let proto_idx = vm.gc.get_closure(cl).proto_idx;
    let p = &vm.protos[proto_idx].proto;
    let num_params = p.num_params as usize;
    let is_vararg = p.is_vararg;
    let frame_size = (p.max_stack_size as usize).max(num_params);

    let args_start = func_slot + 1;
    let (base, num_varargs) = if is_vararg {
        (args_start + nargs, nargs.saturating_sub(num_params))
    } else {
        (args_start, 0)
    };
    vm.ensure_stack(base + frame_size)?;
    if is_vararg {
        // Fixed parameters move above the varargs.
        for i in 0..num_params {
            vm.stack[base + i] = if i < nargs {
                vm.stack[args_start + i]
            } else {
                TValue::nil()
            };
        }
    } else {
        for slot in &mut vm.stack[base + nargs.min(num_params)..base + num_params] {
            *slot = TValue::nil();
        }
    }
    for slot in &mut vm.stack[base + num_params..base + frame_size] {
        *slot = TValue::nil();
    }
    vm.top = base + frame_size;
    vm.frames.push(CallFrame {
        closure: cl,
        proto_idx,
        pc: 0,
        base,
        func_slot,
        num_varargs,
        nargs,
        is_tail,
        ret,
    });
    Ok(())
}

fn call_native(
    vm: &mut Vm,
    id: NativeId,
    func_slot: usize,
    nargs: usize,
    dest: ReturnDest,
) -> Result<Flow, LuaError> {
    let native = vm
        .natives
        .get(id.0 as usize)
        .copied()
        .ok_or_else(|| LuaError::Internal(format!("unknown native {}", id.0)))?;
    let base = func_slot + 1;
    vm.top = base + nargs;
    let mut ctx = NativeContext::new(vm, id, base, nargs);
    let outcome = (native.func)(&mut ctx)?;
    let pushed = ctx.pushed();
    match outcome {
        NativeOutcome::Return(n) => {
            let n = n.min(pushed);
            place_results(vm, dest, base + nargs + pushed - n, n)
        }
        NativeOutcome::ProtectedCall { handler, first_arg } => {
            protected_call(vm, base, nargs, first_arg, handler, dest)
        }
        NativeOutcome::Resume {
            thread,
            first_arg,
            wrap,
        } => {
            let args = vm.stack[base + first_arg.min(nargs)..base + nargs].to_vec();
            resume_thread(vm, thread, args, dest, wrap)
        }
        NativeOutcome::Yield => {
            let values = vm.stack[base..base + nargs].to_vec();
            yield_thread(vm, values, dest)
        }
    }
}

/// `pcall`/`xpcall`: call argument 0 with a catching return descriptor.
fn protected_call(
    vm: &mut Vm,
    base: usize,
    nargs: usize,
    first_arg: usize,
    handler: Option<TValue>,
    dest: ReturnDest,
) -> Result<Flow, LuaError> {
    let catch = match handler {
        Some(h) => Catch::Xpcall { handler: h },
        None => Catch::Pcall,
    };
    let first_arg = first_arg.clamp(1, nargs.max(1));
    let call_nargs = nargs.saturating_sub(first_arg);
    vm.ensure_stack(base + 1)?;
    if nargs == 0 {
        vm.stack[base] = TValue::nil();
    }
    vm.stack
        .copy_within(base + first_arg..base + first_arg + call_nargs, base + 1);
    vm.top = base + 1 + call_nargs;

    if dest.catch.is_protected() {
        // Directly protecting a protected call: the outer boundary is
        // already taken, so run the inner one to completion.
        let func = vm.stack[base];
        let args = vm.stack[base + 1..base + 1 + call_nargs].to_vec();
        let values = match vm.call_value(func, &args) {
            Ok(mut values) => {
                values.insert(0, TValue::from_bool(true));
                values
            }
            Err(e) => {
                let err = catchable(vm, e)?;
                failure_values(vm, catch, err)?
            }
        };
        return deliver_values(vm, dest, &values);
    }

    let thread = vm.current;
    let pdest = dest.with_catch(catch);
    match precall(vm, base, call_nargs, pdest) {
        Ok(flow) => Ok(flow),
        Err(e) if vm.current == thread => {
            let err = catchable(vm, e)?;
            deliver_error(vm, pdest, err)
        }
        Err(e) => Err(e),
    }
}

/// Move `n` results from `src` to the destination and finish the
/// instruction that made the call.
fn place_results(vm: &mut Vm, dest: ReturnDest, src: usize, n: usize) -> Result<Flow, LuaError> {
    if dest.catch.is_protected() {
        let values = vm.stack[src..src + n].to_vec();
        return deliver_values(vm, dest, &values);
    }
    if src != dest.ret_base {
        vm.stack.copy_within(src..src + n, dest.ret_base);
    }
    finish_dest(vm, dest, n)
}

/// Write `values` at the destination (prefixed with `true` for a
/// protected call) and finish the call.
fn deliver_values(vm: &mut Vm, dest: ReturnDest, values: &[TValue]) -> Result<Flow, LuaError> {
    let mut slot = dest.ret_base;
    let extra = usize::from(dest.catch.is_protected());
    vm.ensure_stack(slot + values.len() + extra)?;
    if extra == 1 {
        vm.stack[slot] = TValue::from_bool(true);
        slot += 1;
    }
    vm.stack[slot..slot + values.len()].copy_from_slice(values);
    finish_dest(vm, dest, values.len() + extra)
}

/// Trim or pad `n` placed results to what the caller wants, then apply
/// the pending post-process step.
fn finish_dest(vm: &mut Vm, dest: ReturnDest, n: usize) -> Result<Flow, LuaError> {
    let ret_base = dest.ret_base;
    if dest.wanted >= 0 {
        let wanted = dest.wanted as usize;
        vm.ensure_stack(ret_base + wanted)?;
        for slot in &mut vm.stack[ret_base + n.min(wanted)..ret_base + wanted] {
            *slot = TValue::nil();
        }
        vm.top = ret_base + wanted;
    } else {
        vm.top = ret_base + n;
    }
    apply_post(vm, dest)?;
    Ok(Flow::Done)
}

fn apply_post(vm: &mut Vm, dest: ReturnDest) -> Result<Flow, LuaError> {
    match dest.post {
        PostProcess::None | PostProcess::Discard => Ok(Flow::Done),
        PostProcess::Store(reg) => {
            let v = vm.stack[dest.ret_base];
            set_reg(vm, reg, v);
            Ok(Flow::Done)
        }
        PostProcess::Cond { expect, negate } => {
            let result = vm.stack[dest.ret_base].is_truthy() ^ negate;
            cond_jump(vm, result, expect);
            Ok(Flow::Done)
        }
        PostProcess::Concat { a, b, n } => {
            let v = vm.stack[dest.ret_base];
            set_reg(vm, b + n - 2, v);
            concat(vm, a, b, n - 1)
        }
        PostProcess::TForLoop { a } => {
            let ra = frame_base(vm) + a as usize;
            let first = vm.stack[ra + 3];
            if first.is_nil() {
                if let Some(frame) = vm.frames.last_mut() {
                    frame.pc += 1;
                }
            } else {
                vm.stack[ra + 2] = first;
            }
            Ok(Flow::Done)
        }
    }
}

fn tail_call(vm: &mut Vm, ra: usize, mut nargs: usize) -> Result<Flow, LuaError> {
    let func = resolve_callable(vm, ra, &mut nargs)?;
    let Some(cl) = func.as_closure_idx() else {
        // Natives run in place; the RETURN that follows hands back their
        // results.
        return precall(vm, ra, nargs, ReturnDest::new(ra, -1));
    };
    let frame = vm
        .frames
        .pop()
        .ok_or_else(|| LuaError::Internal("tail call without a frame".into()))?;
    vm.close_upvals(frame.base);
    let dst = frame.func_slot;
    vm.stack.copy_within(ra..ra + nargs + 1, dst);
    push_lua_frame(vm, cl, dst, nargs, frame.ret, true)?;
    Ok(Flow::Pushed)
}

fn do_return(vm: &mut Vm, ra: usize, n: usize) -> Result<Flow, LuaError> {
    let frame = vm
        .frames
        .pop()
        .ok_or_else(|| LuaError::Internal("return without a frame".into()))?;
    vm.close_upvals(frame.base);
    vm.ensure_stack(ra + n)?;
    place_results(vm, frame.ret, ra, n)
}

// ---------------------------------------------------------------------------
// Coroutines
// ---------------------------------------------------------------------------

fn resume_thread(
    vm: &mut Vm,
    target: ThreadId,
    args: Vec<TValue>,
    dest: ReturnDest,
    wrap: bool,
) -> Result<Flow, LuaError> {
    let status = vm
        .thread_status(target)
        .ok_or_else(|| LuaError::Internal(format!("unknown thread {}", target.0)))?;
    if status != ThreadStatus::Suspended {
        let msg = if status == ThreadStatus::Dead {
            "cannot resume dead coroutine"
        } else {
            "cannot resume non-suspended coroutine"
        };
        if wrap {
            return Err(vm.rt_error(msg));
        }
        let m = vm.str_value(msg.as_bytes());
        return deliver_values(vm, dest, &[TValue::from_bool(false), m]);
    }

    let caller = vm.current;
    tracing::debug!(target: "moonlet::coroutine", from = caller.0, to = target.0, "resume");
    let saved = &mut vm.threads[caller.0 as usize];
    saved.status = ThreadStatus::Normal;
    saved.resume_dest = Some(ResumeDest { dest, wrap });
    vm.switch_to(target);
    let t = &mut vm.threads[target.0 as usize];
    t.status = ThreadStatus::Running;
    t.parent = Some(caller);

    let started = match t.yield_dest.take() {
        Some(ydest) => deliver_values(vm, ydest, &args),
        None => {
            let entry = std::mem::take(&mut vm.threads[target.0 as usize].entry);
            start_thread(vm, entry, &args)
        }
    };
    match started {
        Ok(flow) => Ok(flow),
        Err(e) => coroutine_failed(vm, e),
    }
}

fn start_thread(vm: &mut Vm, entry: TValue, args: &[TValue]) -> Result<Flow, LuaError> {
    vm.ensure_stack(args.len() + 1)?;
    vm.stack[0] = entry;
    vm.stack[1..=args.len()].copy_from_slice(args);
    vm.top = args.len() + 1;
    precall(vm, 0, args.len(), ReturnDest::new(0, -1))
}

fn yield_thread(vm: &mut Vm, values: Vec<TValue>, dest: ReturnDest) -> Result<Flow, LuaError> {
    let cur = vm.current;
    let Some(parent) = vm.threads[cur.0 as usize].parent else {
        return Err(vm.rt_error("attempt to yield from outside a coroutine"));
    };
    if vm.runs.iter().any(|r| r.thread == cur) {
        return Err(vm.rt_error("attempt to yield across metamethod/C-call boundary"));
    }
    tracing::debug!(target: "moonlet::coroutine", from = cur.0, to = parent.0, nvalues = values.len(), "yield");
    let t = &mut vm.threads[cur.0 as usize];
    t.yield_dest = Some(dest);
    t.status = ThreadStatus::Suspended;
    t.parent = None;
    vm.switch_to(parent);
    let rd = take_resume_dest(vm, parent)?;
    deliver_resume(vm, rd, &values)
}

fn take_resume_dest(vm: &mut Vm, thread: ThreadId) -> Result<ResumeDest, LuaError> {
    let t = &mut vm.threads[thread.0 as usize];
    t.status = ThreadStatus::Running;
    t.resume_dest
        .take()
        .ok_or_else(|| LuaError::Internal("resumer has no pending resume".into()))
}

/// Mark the current coroutine dead and switch back to its resumer.
fn retire_current(vm: &mut Vm) -> Result<ResumeDest, LuaError> {
    let cur = vm.current;
    let parent = vm.threads[cur.0 as usize]
        .parent
        .take()
        .ok_or_else(|| LuaError::Internal("finished coroutine has no resumer".into()))?;
    vm.close_upvals(0);
    vm.frames.clear();
    vm.stack.clear();
    vm.top = 0;
    let t = &mut vm.threads[cur.0 as usize];
    t.status = ThreadStatus::Dead;
    t.yield_dest = None;
    vm.switch_to(parent);
    take_resume_dest(vm, parent)
}

fn deliver_resume(vm: &mut Vm, rd: ResumeDest, values: &[TValue]) -> Result<Flow, LuaError> {
    if rd.wrap {
        deliver_values(vm, rd.dest, values)
    } else {
        let mut out = Vec::with_capacity(values.len() + 1);
        out.push(TValue::from_bool(true));
        out.extend_from_slice(values);
        deliver_values(vm, rd.dest, &out)
    }
}

fn finish_coroutine(vm: &mut Vm) -> Result<Flow, LuaError> {
    let end = vm.top.min(vm.stack.len());
    let results = vm.stack[..end].to_vec();
    tracing::debug!(target: "moonlet::coroutine", thread = vm.current.0, nresults = results.len(), "finished");
    let rd = retire_current(vm)?;
    deliver_resume(vm, rd, &results)
}

fn coroutine_failed(vm: &mut Vm, err: LuaError) -> Result<Flow, LuaError> {
    let err = catchable(vm, err)?;
    coroutine_died(vm, err)
}

/// The current coroutine raised `err`: it dies and the resumer sees the
/// failure.
fn coroutine_died(vm: &mut Vm, err: Box<RuntimeError>) -> Result<Flow, LuaError> {
    tracing::debug!(target: "moonlet::coroutine", thread = vm.current.0, message = %err.message, "died");
    let rd = retire_current(vm)?;
    if rd.wrap {
        if rd.dest.catch.is_protected() {
            return deliver_error(vm, rd.dest, err);
        }
        return Err(LuaError::Runtime(err));
    }
    deliver_values(vm, rd.dest, &[TValue::from_bool(false), err.value])
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Turn `err` into a value `pcall` can catch, recording the traceback of
/// the current thread if none was captured yet. Internal errors pass
/// through.
fn catchable(vm: &mut Vm, err: LuaError) -> Result<Box<RuntimeError>, LuaError> {
    let mut err = match err {
        LuaError::Runtime(e) => e,
        LuaError::Compile(ce) => {
            let message = ce.to_string();
            let value = vm.str_value(message.as_bytes());
            Box::new(RuntimeError {
                value,
                raw: value,
                message,
                traceback: None,
                kind: RuntimeErrorKind::Raised,
            })
        }
        fatal @ LuaError::Internal(_) => return Err(fatal),
    };
    if err.traceback.is_none() {
        err.traceback = Some(vm.traceback());
    }
    Ok(err)
}

/// The values a protected call returns on failure.
fn failure_values(
    vm: &mut Vm,
    catch: Catch,
    err: Box<RuntimeError>,
) -> Result<Vec<TValue>, LuaError> {
    match catch {
        Catch::Pcall => {
            let tb = err.traceback.clone().unwrap_or_default();
            let tb = vm.str_value(tb.as_bytes());
            Ok(vec![TValue::from_bool(false), err.value, tb, err.raw])
        }
        Catch::Xpcall { handler } => {
            let handled = match vm.call_value(handler, &[err.value]) {
                Ok(values) => values.first().copied().unwrap_or_default(),
                Err(LuaError::Runtime(e)) => {
                    tracing::debug!(target: "moonlet::unwind", error = %e.message, "message handler failed");
                    vm.str_value(b"error in error handling")
                }
                Err(fatal) => return Err(fatal),
            };
            Ok(vec![TValue::from_bool(false), handled])
        }
        Catch::None => Err(LuaError::Internal("error delivered to unprotected call".into())),
    }
}

fn deliver_error(vm: &mut Vm, dest: ReturnDest, err: Box<RuntimeError>) -> Result<Flow, LuaError> {
    let values = failure_values(vm, dest.catch, err)?;
    deliver_values(vm, dest.with_catch(Catch::None), &values)
}

/// Drop the innermost run after an escaping error.
fn abandon_run(vm: &mut Vm) {
    if let Some(run) = vm.runs.pop() {
        if vm.current == run.thread {
            vm.close_upvals(run.ret_base);
            vm.frames.truncate(run.depth);
            vm.top = run.ret_base;
        }
    }
}

/// Unwind to the nearest protected call of the current run. Returns `Err`
/// when the error escapes the run.
fn unwind(vm: &mut Vm, err: LuaError) -> Result<(), LuaError> {
    let mut err = match catchable(vm, err) {
        Ok(e) => e,
        Err(fatal) => {
            abandon_run(vm);
            return Err(fatal);
        }
    };
    loop {
        let run = *vm
            .runs
            .last()
            .ok_or_else(|| LuaError::Internal("unwinding without a run".into()))?;
        let floor = if vm.current == run.thread { run.depth } else { 0 };
        let catcher = (floor..vm.frames.len())
            .rev()
            .find(|&i| vm.frames[i].ret.catch.is_protected());

        let next = if let Some(i) = catcher {
            let frame = vm.frames[i].clone();
            tracing::debug!(target: "moonlet::unwind", message = %err.message, depth = i, "caught");
            vm.close_upvals(frame.func_slot);
            vm.frames.truncate(i);
            deliver_error(vm, frame.ret, err)
        } else if vm.current == run.thread {
            tracing::debug!(target: "moonlet::unwind", message = %err.message, "escaped run");
            abandon_run(vm);
            return Err(LuaError::Runtime(err));
        } else {
            coroutine_died(vm, err)
        };

        match next {
            Ok(_) => return Ok(()),
            Err(e) => {
                err = match catchable(vm, e) {
                    Ok(e) => e,
                    Err(fatal) => {
                        abandon_run(vm);
                        return Err(fatal);
                    }
                };
            }
        }
    }
}
