//! Native function ABI.
//!
//! A native sees its arguments in place on the caller's stack and pushes
//! its results right after them. Most natives finish with
//! [`NativeContext::returns`]; the few that need to drive the interpreter
//! (`pcall`, `coroutine.resume`, `coroutine.yield`) return one of the
//! other [`NativeOutcome`]s and let the dispatch loop do the work without
//! recursing.

use crate::coerce;
use crate::error::LuaError;
use crate::vm::Vm;
use moonlet_core::gc::{GcIdx, NativeId, ThreadId};
use moonlet_core::object::lua_type_name;
use moonlet_core::string::StringId;
use moonlet_core::table::Table;
use moonlet_core::value::TValue;

pub type NativeFn = fn(&mut NativeContext<'_>) -> Result<NativeOutcome, LuaError>;

/// A registered native.
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub func: NativeFn,
    pub name: &'static str,
    /// Value bound at registration (e.g. the thread behind a wrap function).
    pub upvalue: TValue,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "native '{}'", self.name)
    }
}

/// What the interpreter should do once a native returns.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NativeOutcome {
    /// The last `n` pushed values are the results.
    Return(usize),
    /// Call argument 0 with the arguments from `first_arg` on, catching
    /// errors. `handler` receives the error message (`xpcall`).
    ProtectedCall {
        handler: Option<TValue>,
        first_arg: usize,
    },
    /// Resume `thread` with the arguments from `first_arg` on.
    Resume {
        thread: ThreadId,
        first_arg: usize,
        /// Deliver bare results and propagate errors.
        wrap: bool,
    },
    /// Suspend the running coroutine, handing all arguments to the resumer.
    Yield,
}

/// A native's view of its call.
pub struct NativeContext<'a> {
    pub vm: &'a mut Vm,
    id: NativeId,
    base: usize,
    nargs: usize,
    pushed: usize,
}

impl<'a> NativeContext<'a> {
    pub(crate) fn new(vm: &'a mut Vm, id: NativeId, base: usize, nargs: usize) -> Self {
        NativeContext {
            vm,
            id,
            base,
            nargs,
            pushed: 0,
        }
    }

    pub fn nargs(&self) -> usize {
        self.nargs
    }

    /// Argument `i` (0-based); nil when absent.
    pub fn arg(&self, i: usize) -> TValue {
        if i < self.nargs {
            self.vm.stack[self.base + i]
        } else {
            TValue::nil()
        }
    }

    pub fn args(&self) -> &[TValue] {
        &self.vm.stack[self.base..self.base + self.nargs]
    }

    pub(crate) fn pushed(&self) -> usize {
        self.pushed
    }

    pub fn name(&self) -> &'static str {
        self.vm.natives[self.id.0 as usize].name
    }

    pub fn upvalue(&self) -> TValue {
        self.vm.natives[self.id.0 as usize].upvalue
    }

    // ---- Results ----

    pub fn push(&mut self, value: TValue) -> Result<(), LuaError> {
        let slot = self.base + self.nargs + self.pushed;
        self.vm.ensure_stack(slot + 1)?;
        self.vm.stack[slot] = value;
        self.pushed += 1;
        self.vm.top = slot + 1;
        Ok(())
    }

    /// Push `values` and return them.
    pub fn returns(&mut self, values: &[TValue]) -> Result<NativeOutcome, LuaError> {
        for &v in values {
            self.push(v)?;
        }
        Ok(NativeOutcome::Return(values.len()))
    }

    pub fn return_str(&mut self, s: &[u8]) -> Result<NativeOutcome, LuaError> {
        let v = self.vm.str_value(s);
        self.returns(&[v])
    }

    /// Call back into the interpreter. The call runs to completion.
    pub fn call(&mut self, func: TValue, args: &[TValue]) -> Result<Vec<TValue>, LuaError> {
        let saved_top = self.vm.top;
        self.vm.top = self.base + self.nargs + self.pushed;
        let result = self.vm.call_value(func, args);
        self.vm.top = saved_top.max(self.base + self.nargs + self.pushed);
        result
    }

    // ---- Errors ----

    pub fn error(&mut self, msg: impl Into<String>) -> LuaError {
        self.vm.rt_error(msg)
    }

    /// `bad argument #i to 'name' (msg)`, with `i` 0-based.
    pub fn arg_error(&mut self, i: usize, msg: &str) -> LuaError {
        let name = self.name();
        self.vm
            .rt_error(format!("bad argument #{} to '{name}' ({msg})", i + 1))
    }

    pub fn type_error(&mut self, i: usize, expected: &str) -> LuaError {
        let got = if i < self.nargs {
            lua_type_name(self.arg(i))
        } else {
            "no value"
        };
        self.arg_error(i, &format!("{expected} expected, got {got}"))
    }

    // ---- Argument checks ----

    pub fn check_any(&mut self, i: usize) -> Result<TValue, LuaError> {
        if i >= self.nargs {
            return Err(self.arg_error(i, "value expected"));
        }
        Ok(self.arg(i))
    }

    pub fn check_number(&mut self, i: usize) -> Result<f64, LuaError> {
        match coerce::to_number(self.arg(i), &self.vm.strings) {
            Some(n) => Ok(n),
            None => Err(self.type_error(i, "number")),
        }
    }

    pub fn check_integer(&mut self, i: usize) -> Result<i64, LuaError> {
        match coerce::to_integer(self.arg(i), &self.vm.strings) {
            Some(n) => Ok(n),
            None => Err(self.type_error(i, "number")),
        }
    }

    pub fn opt_number(&mut self, i: usize, default: f64) -> Result<f64, LuaError> {
        if self.arg(i).is_nil() {
            Ok(default)
        } else {
            self.check_number(i)
        }
    }

    pub fn opt_integer(&mut self, i: usize, default: i64) -> Result<i64, LuaError> {
        if self.arg(i).is_nil() {
            Ok(default)
        } else {
            self.check_integer(i)
        }
    }

    /// A string argument; numbers are converted.
    pub fn check_string(&mut self, i: usize) -> Result<StringId, LuaError> {
        let v = self.arg(i);
        match coerce::to_string_for_concat(v, &mut self.vm.strings) {
            Some(sid) => Ok(sid),
            None => Err(self.type_error(i, "string")),
        }
    }

    pub fn check_bytes(&mut self, i: usize) -> Result<Vec<u8>, LuaError> {
        let sid = self.check_string(i)?;
        Ok(self.vm.strings.get_bytes(sid).to_vec())
    }

    pub fn opt_bytes(&mut self, i: usize, default: &[u8]) -> Result<Vec<u8>, LuaError> {
        if self.arg(i).is_nil() {
            Ok(default.to_vec())
        } else {
            self.check_bytes(i)
        }
    }

    pub fn check_table(&mut self, i: usize) -> Result<GcIdx<Table>, LuaError> {
        match self.arg(i).as_table_idx() {
            Some(t) => Ok(t),
            None => Err(self.type_error(i, "table")),
        }
    }

    pub fn check_function(&mut self, i: usize) -> Result<TValue, LuaError> {
        let v = self.arg(i);
        if v.is_function() {
            Ok(v)
        } else {
            Err(self.type_error(i, "function"))
        }
    }

    pub fn check_thread(&mut self, i: usize) -> Result<ThreadId, LuaError> {
        match self.arg(i).as_thread_id() {
            Some(t) => Ok(t),
            None => Err(self.type_error(i, "coroutine")),
        }
    }
}
