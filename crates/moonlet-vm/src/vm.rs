//! Interpreter state.

use crate::callinfo::{CallFrame, Catch, ReturnDest};
use crate::config::VmConfig;
use crate::dispatch;
use crate::error::{LuaError, RuntimeErrorKind};
use crate::metamethod::{MetamethodNames, TypeMetatables};
use crate::native::{NativeContext, NativeFn, NativeFunction, NativeOutcome};
use moonlet_compiler::proto::{Constant, Proto};
use moonlet_core::gc::{GcHeap, GcIdx, GcState, NativeId, ThreadId, UpVal, UpValLocation, GC_MIN_THRESHOLD};
use moonlet_core::number::format_number;
use moonlet_core::object::lua_type_name;
use moonlet_core::string::StringInterner;
use moonlet_core::table::Table;
use moonlet_core::value::TValue;
use std::any::Any;

/// Id of the thread that runs top-level code.
pub const MAIN_THREAD: ThreadId = ThreadId(0);

/// Innermost levels kept by a truncated traceback.
const TRACEBACK_HEAD: usize = 12;
/// Outermost levels kept by a truncated traceback.
const TRACEBACK_TAIL: usize = 10;

/// A prototype in the VM store. Nested prototypes are stored separately
/// and referenced by index.
#[derive(Debug)]
pub struct LoadedProto {
    pub proto: Proto,
    /// Store indices of `proto`'s nested functions, in `CLOSURE Bx` order.
    pub children: Vec<usize>,
}

/// Coroutine lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created or yielded; ready to be resumed.
    Suspended,
    Running,
    /// Resumed another coroutine and waits for it.
    Normal,
    /// Returned or raised.
    Dead,
}

impl ThreadStatus {
    pub fn name(self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

/// Where a resumer waits for its coroutine to yield, return or fail.
#[derive(Clone, Copy, Debug)]
pub struct ResumeDest {
    pub dest: ReturnDest,
    /// Called through a `coroutine.wrap` function: results are delivered
    /// without the status flag and errors propagate.
    pub wrap: bool,
}

/// An independent frame stack.
///
/// While a thread runs, its `stack`, `frames`, `top` and `open_upvals`
/// are moved into the [`Vm`] and the copies here are empty.
#[derive(Debug)]
pub struct LuaThread {
    pub stack: Vec<TValue>,
    pub frames: Vec<CallFrame>,
    pub top: usize,
    /// Open upvalues of this thread as `(slot, cell)`.
    pub open_upvals: Vec<(usize, GcIdx<UpVal>)>,
    pub status: ThreadStatus,
    /// The thread that resumed this one.
    pub parent: Option<ThreadId>,
    /// Function run on first resume; nil once started.
    pub entry: TValue,
    /// Results slot of the pending `yield` call.
    pub yield_dest: Option<ReturnDest>,
    /// Set while this thread waits in `resume`.
    pub resume_dest: Option<ResumeDest>,
}

impl LuaThread {
    fn new(entry: TValue, status: ThreadStatus) -> Self {
        LuaThread {
            stack: Vec::new(),
            frames: Vec::new(),
            top: 0,
            open_upvals: Vec::new(),
            status,
            parent: None,
            entry,
            yield_dest: None,
            resume_dest: None,
        }
    }
}

/// Boundary of one activation of the dispatch loop.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RunBoundary {
    pub thread: ThreadId,
    /// Frame count of `thread` when the run started.
    pub depth: usize,
    /// Slot of the called function; results are collected from here.
    pub ret_base: usize,
}

/// The virtual machine.
///
/// `stack`, `frames`, `top` and `open_upvals` always belong to the
/// **current** thread. Switching threads swaps them with the saved copies
/// in `threads`.
pub struct Vm {
    pub stack: Vec<TValue>,
    pub frames: Vec<CallFrame>,
    /// First free slot after variable-length results.
    pub top: usize,
    pub open_upvals: Vec<(usize, GcIdx<UpVal>)>,
    pub current: ThreadId,
    pub threads: Vec<LuaThread>,
    pub gc: GcHeap,
    pub strings: StringInterner,
    pub protos: Vec<LoadedProto>,
    pub natives: Vec<NativeFunction>,
    /// Collected native slots, reused by registration.
    free_natives: Vec<u32>,
    /// Collected thread slots, reused by `new_thread`.
    free_threads: Vec<u32>,
    /// Host-held values kept alive across collections.
    anchors: Vec<TValue>,
    pub mm_names: MetamethodNames,
    pub type_metatables: TypeMetatables,
    pub globals: GcIdx<Table>,
    pub rng: fastrand::Rng,
    pub config: VmConfig,
    pub(crate) runs: Vec<RunBoundary>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut gc = GcHeap::new();
        let mut strings = StringInterner::new();
        let mm_names = MetamethodNames::init(&mut strings);
        let globals = gc.alloc_table(0, 64);
        let g = strings.intern(b"_G");
        gc.get_table_mut(globals)
            .raw_set_str(g, TValue::from_table(globals));
        Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            top: 0,
            open_upvals: Vec::new(),
            current: MAIN_THREAD,
            threads: vec![LuaThread::new(TValue::nil(), ThreadStatus::Running)],
            gc,
            strings,
            protos: Vec::new(),
            natives: Vec::new(),
            free_natives: Vec::new(),
            free_threads: Vec::new(),
            anchors: Vec::new(),
            mm_names,
            type_metatables: TypeMetatables::default(),
            globals,
            rng: fastrand::Rng::with_seed(0),
            config,
            runs: Vec::new(),
        }
    }

    /// True when no call is in progress.
    pub fn is_idle(&self) -> bool {
        self.runs.is_empty() && self.current == MAIN_THREAD && self.frames.is_empty()
    }

    // ---- Stack ----

    /// Make sure slots `0..size` exist.
    pub fn ensure_stack(&mut self, size: usize) -> Result<(), LuaError> {
        if size > self.stack.len() {
            if size > self.config.max_stack_slots {
                return Err(self.error_with_kind("stack overflow", RuntimeErrorKind::StackOverflow));
            }
            self.stack.resize(size, TValue::nil());
        }
        Ok(())
    }

    // ---- Prototypes and loading ----

    /// Move a compiled prototype tree into the store, returning the index
    /// of its root.
    pub fn load_proto(&mut self, mut proto: Proto) -> usize {
        let nested = std::mem::take(&mut proto.protos);
        let idx = self.protos.len();
        self.protos.push(LoadedProto {
            proto,
            children: Vec::new(),
        });
        let children = nested.into_iter().map(|p| self.load_proto(p)).collect();
        self.protos[idx].children = children;
        idx
    }

    /// Compile `source` into a function whose environment is the globals
    /// table.
    pub fn load(&mut self, source: &[u8], chunk_name: &str) -> Result<TValue, LuaError> {
        let proto = moonlet_compiler::compile(source, chunk_name, &mut self.strings)?;
        let idx = self.load_proto(proto);
        let closure = self.gc.alloc_closure(idx, Vec::new(), self.globals);
        Ok(TValue::from_closure(closure))
    }

    /// Compile and run `source`, returning what the chunk returns.
    pub fn execute(&mut self, source: &str, chunk_name: &str) -> Result<Vec<TValue>, LuaError> {
        let f = self.load(source.as_bytes(), chunk_name)?;
        self.call_value(f, &[])
    }

    /// Call `func` to completion. Coroutines may be resumed inside the call
    /// but the calling thread cannot yield across it.
    pub fn call_value(&mut self, func: TValue, args: &[TValue]) -> Result<Vec<TValue>, LuaError> {
        dispatch::call_function(self, func, args)
    }

    // ---- Natives and globals ----

    pub fn register_native(&mut self, name: &'static str, func: NativeFn) -> TValue {
        self.register_native_with_upvalue(name, func, TValue::nil())
    }

    /// Register a native bound to one value, readable through
    /// `NativeContext::upvalue`.
    pub fn register_native_with_upvalue(
        &mut self,
        name: &'static str,
        func: NativeFn,
        upvalue: TValue,
    ) -> TValue {
        let native = NativeFunction {
            func,
            name,
            upvalue,
        };
        self.gc.gc_state.allocated += 1;
        let id = match self.free_natives.pop() {
            Some(i) => {
                self.natives[i as usize] = native;
                NativeId(i)
            }
            None => {
                self.natives.push(native);
                NativeId(self.natives.len() as u32 - 1)
            }
        };
        TValue::from_native(id)
    }

    pub fn set_global(&mut self, name: &str, value: TValue) {
        let key = self.strings.intern(name.as_bytes());
        self.gc.get_table_mut(self.globals).raw_set_str(key, value);
    }

    pub fn get_global(&mut self, name: &str) -> TValue {
        let key = self.strings.intern(name.as_bytes());
        self.gc.get_table(self.globals).raw_get_str(key)
    }

    /// Create a table of natives and store it as global `lib`.
    pub fn register_lib(&mut self, lib: &str, funcs: &[(&'static str, NativeFn)]) -> GcIdx<Table> {
        let table = self.gc.alloc_table(0, funcs.len());
        for &(name, func) in funcs {
            let f = self.register_native(name, func);
            let key = self.strings.intern(name.as_bytes());
            self.gc.get_table_mut(table).raw_set_str(key, f);
        }
        self.set_global(lib, TValue::from_table(table));
        table
    }

    // ---- Values ----

    pub fn str_value(&mut self, s: &[u8]) -> TValue {
        TValue::from_string_id(self.strings.intern(s))
    }

    pub fn new_table(&mut self) -> TValue {
        TValue::from_table(self.gc.alloc_table(0, 0))
    }

    /// Wrap a host object. Its metatable starts empty.
    pub fn new_userdata(&mut self, data: Box<dyn Any>) -> TValue {
        TValue::from_userdata(self.gc.alloc_userdata(data))
    }

    /// Borrow the host object behind a userdata value.
    pub fn userdata_ref<T: Any>(&self, value: TValue) -> Option<&T> {
        let idx = value.as_userdata_idx()?;
        self.gc.get_userdata(idx).data.downcast_ref::<T>()
    }

    pub fn get_metamethod(&self, value: TValue, name: moonlet_core::string::StringId) -> Option<TValue> {
        self.type_metatables.get_metamethod(value, name, &self.gc)
    }

    pub fn metatable_of(&self, value: TValue) -> Option<GcIdx<Table>> {
        self.type_metatables.metatable_of(value, &self.gc)
    }

    /// `tostring` without metamethods.
    pub fn display_value(&self, value: TValue) -> String {
        if let Some(n) = value.as_number() {
            return format_number(n);
        }
        if let Some(sid) = value.as_string_id() {
            return self.strings.get_lossy(sid).into_owned();
        }
        if let Some(b) = value.as_bool() {
            return b.to_string();
        }
        if value.is_nil() {
            return "nil".to_string();
        }
        format!(
            "{}: 0x{:08x}",
            lua_type_name(value),
            value.raw_bits() & 0x0000_FFFF_FFFF_FFFF
        )
    }

    /// `tostring` honoring `__tostring`.
    pub fn tostring(&mut self, value: TValue) -> Result<TValue, LuaError> {
        if value.is_string() {
            return Ok(value);
        }
        if let Some(handler) = self.get_metamethod(value, self.mm_names.tostring) {
            let results = self.call_value(handler, &[value])?;
            let out = results.first().copied().unwrap_or_default();
            if !out.is_string() && !out.is_number() {
                return Err(self.rt_error("'__tostring' must return a string"));
            }
            if out.is_number() {
                let s = self.display_value(out);
                return Ok(self.str_value(s.as_bytes()));
            }
            return Ok(out);
        }
        let s = self.display_value(value);
        Ok(self.str_value(s.as_bytes()))
    }

    // ---- Threads ----

    /// Create a suspended coroutine that will call `entry`.
    pub fn new_thread(&mut self, entry: TValue) -> ThreadId {
        let thread = LuaThread::new(entry, ThreadStatus::Suspended);
        self.gc.gc_state.allocated += 1;
        match self.free_threads.pop() {
            Some(i) => {
                self.threads[i as usize] = thread;
                ThreadId(i)
            }
            None => {
                self.threads.push(thread);
                ThreadId(self.threads.len() as u32 - 1)
            }
        }
    }

    pub fn thread_status(&self, id: ThreadId) -> Option<ThreadStatus> {
        self.threads.get(id.0 as usize).map(|t| t.status)
    }

    /// Make `target` the current thread, saving the running one.
    pub(crate) fn switch_to(&mut self, target: ThreadId) {
        if target == self.current {
            return;
        }
        let saved = &mut self.threads[self.current.0 as usize];
        saved.stack = std::mem::take(&mut self.stack);
        saved.frames = std::mem::take(&mut self.frames);
        saved.open_upvals = std::mem::take(&mut self.open_upvals);
        saved.top = self.top;

        let next = &mut self.threads[target.0 as usize];
        self.stack = std::mem::take(&mut next.stack);
        self.frames = std::mem::take(&mut next.frames);
        self.open_upvals = std::mem::take(&mut next.open_upvals);
        self.top = next.top;
        self.current = target;
    }

    // ---- Upvalues ----

    /// The open upvalue for `slot` of the current thread, created on demand.
    pub fn find_or_create_upval(&mut self, slot: usize) -> GcIdx<UpVal> {
        if let Some(&(_, idx)) = self.open_upvals.iter().find(|(s, _)| *s == slot) {
            return idx;
        }
        let idx = self.gc.alloc_upval(UpValLocation::Open {
            thread: self.current,
            slot,
        });
        self.open_upvals.push((slot, idx));
        idx
    }

    /// Close every open upvalue of the current thread at or above `level`.
    pub fn close_upvals(&mut self, level: usize) {
        let mut i = 0;
        while i < self.open_upvals.len() {
            let (slot, idx) = self.open_upvals[i];
            if slot >= level {
                let value = self.stack.get(slot).copied().unwrap_or_default();
                self.gc.get_upval_mut(idx).location = UpValLocation::Closed(value);
                self.open_upvals.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub fn get_upval(&self, idx: GcIdx<UpVal>) -> TValue {
        match self.gc.get_upval(idx).location {
            UpValLocation::Closed(v) => v,
            UpValLocation::Open { thread, slot } => {
                let stack = if thread == self.current {
                    &self.stack
                } else {
                    &self.threads[thread.0 as usize].stack
                };
                stack.get(slot).copied().unwrap_or_default()
            }
        }
    }

    pub fn set_upval(&mut self, idx: GcIdx<UpVal>, value: TValue) {
        match self.gc.get_upval(idx).location {
            UpValLocation::Closed(_) => {
                self.gc.get_upval_mut(idx).location = UpValLocation::Closed(value);
            }
            UpValLocation::Open { thread, slot } => {
                let stack = if thread == self.current {
                    &mut self.stack
                } else {
                    &mut self.threads[thread.0 as usize].stack
                };
                if let Some(cell) = stack.get_mut(slot) {
                    *cell = value;
                }
            }
        }
    }

    // ---- Garbage collection ----

    /// Keep `value` alive until a matching [`Vm::release`]. Other values a
    /// host holds between calls survive a collection only while Lua can
    /// still reach them.
    pub fn anchor(&mut self, value: TValue) {
        if value.is_gc() {
            self.anchors.push(value);
        }
    }

    pub fn release(&mut self, value: TValue) {
        if let Some(i) = self
            .anchors
            .iter()
            .rposition(|v| v.raw_bits() == value.raw_bits())
        {
            self.anchors.swap_remove(i);
        }
    }

    /// Collection is only safe outside nested runs: a native suspended in
    /// `call_value` may hold values the collector cannot see.
    pub fn can_collect(&self) -> bool {
        self.runs.len() <= 1
    }

    /// Run a full mark-sweep cycle. Returns the number of objects freed.
    pub fn gc_collect(&mut self) -> usize {
        self.gc.gc_prepare_marks(
            self.natives.len(),
            self.threads.len(),
            self.strings.capacity(),
        );
        self.gc_mark_roots();
        loop {
            let work = self.gc.gc_propagate() + self.gc_propagate_vm();
            if work == 0 {
                break;
            }
        }
        let freed = self.gc.gc_sweep()
            + self.sweep_natives()
            + self.sweep_threads()
            + self.strings.sweep(&self.gc.gc_state.string_marks);

        let live = self.live_objects();
        let st = &mut self.gc.gc_state;
        st.allocated = 0;
        st.live_after_cycle = live;
        st.threshold = (live.saturating_mul(st.pause) / 100)
            .saturating_sub(live)
            .max(GC_MIN_THRESHOLD);
        st.cycles += 1;
        tracing::debug!(target: "moonlet::gc", freed, live, threshold = st.threshold, "cycle done");
        freed
    }

    /// Collect if enough was allocated since the last cycle.
    pub fn gc_check(&mut self) {
        if self.can_collect()
            && self
                .gc
                .gc_state
                .should_collect(self.strings.created_since_sweep())
        {
            self.gc_collect();
        }
    }

    /// Live objects of every kind, strings included.
    pub fn live_objects(&self) -> usize {
        self.gc.live_objects()
            + self.strings.len()
            + (self.natives.len() - self.free_natives.len())
            + (self.threads.len() - self.free_threads.len())
    }

    /// Approximate memory in use, in kilobytes.
    pub fn gc_count_kb(&self) -> f64 {
        use std::mem::size_of;
        let slots: usize = self.stack.len() + self.threads.iter().map(|t| t.stack.len()).sum::<usize>();
        let bytes = self.gc.estimate_bytes()
            + self.strings.estimate_bytes()
            + slots * size_of::<TValue>()
            + (self.natives.len() - self.free_natives.len()) * size_of::<NativeFunction>()
            + (self.threads.len() - self.free_threads.len()) * size_of::<LuaThread>();
        bytes as f64 / 1024.0
    }

    fn gc_mark_roots(&mut self) {
        let st = &mut self.gc.gc_state;
        st.mark_table(self.globals);
        for mt in self.type_metatables.all().into_iter().flatten() {
            st.mark_table(mt);
        }
        for name in self.mm_names.all() {
            st.mark_string(name);
        }
        // Prototypes are never freed; their constants and debug names stay.
        for lp in &self.protos {
            let p = &lp.proto;
            for k in &p.constants {
                if let Constant::String(sid) = k {
                    st.mark_string(*sid);
                }
            }
            for uv in &p.upvalues {
                st.mark_string(uv.name);
            }
            for lv in &p.local_vars {
                st.mark_string(lv.name);
            }
        }
        for &v in &self.anchors {
            st.mark_value(v);
        }
        st.mark_thread(MAIN_THREAD);
        st.mark_thread(self.current);
        for run in &self.runs {
            st.mark_thread(run.thread);
        }
        for (i, t) in self.threads.iter().enumerate() {
            if matches!(t.status, ThreadStatus::Running | ThreadStatus::Normal) {
                st.mark_thread(ThreadId(i as u32));
            }
        }
    }

    /// Traverse gray natives and threads, which the heap cannot see.
    fn gc_propagate_vm(&mut self) -> usize {
        let mut work = 0;
        let st = &mut self.gc.gc_state;
        while let Some(i) = st.gray_natives.pop() {
            work += 1;
            if let Some(n) = self.natives.get(i as usize) {
                st.mark_value(n.upvalue);
            }
        }
        while let Some(i) = st.gray_threads.pop() {
            work += 1;
            let Some(t) = self.threads.get(i as usize) else {
                continue;
            };
            st.mark_value(t.entry);
            if let Some(parent) = t.parent {
                st.mark_thread(parent);
            }
            mark_dest(st, t.yield_dest);
            mark_dest(st, t.resume_dest.map(|r| r.dest));
            if ThreadId(i) == self.current {
                mark_activation(st, &self.stack, &self.frames, &self.open_upvals);
            } else {
                mark_activation(st, &t.stack, &t.frames, &t.open_upvals);
            }
        }
        work
    }

    fn sweep_natives(&mut self) -> usize {
        let mut already_free = vec![false; self.natives.len()];
        for &i in &self.free_natives {
            already_free[i as usize] = true;
        }
        let mut freed = 0;
        for (i, native) in self.natives.iter_mut().enumerate() {
            if already_free[i] || self.gc.gc_state.is_native_marked(NativeId(i as u32)) {
                continue;
            }
            *native = NativeFunction {
                func: native_collected,
                name: "?",
                upvalue: TValue::nil(),
            };
            self.free_natives.push(i as u32);
            freed += 1;
        }
        freed
    }

    fn sweep_threads(&mut self) -> usize {
        let mut already_free = vec![false; self.threads.len()];
        for &i in &self.free_threads {
            already_free[i as usize] = true;
        }
        let mut freed = 0;
        for (i, thread) in self.threads.iter_mut().enumerate() {
            if already_free[i] || self.gc.gc_state.is_thread_marked(ThreadId(i as u32)) {
                continue;
            }
            *thread = LuaThread::new(TValue::nil(), ThreadStatus::Dead);
            self.free_threads.push(i as u32);
            freed += 1;
        }
        freed
    }

    // ---- Errors ----

    /// `chunk:line:` of the Lua frame `level` steps down the current
    /// thread (1 = innermost), or an empty string.
    pub fn where_(&self, level: usize) -> String {
        if level == 0 || level > self.frames.len() {
            return String::new();
        }
        let frame = &self.frames[self.frames.len() - level];
        let proto = &self.protos[frame.proto_idx].proto;
        let line = proto.get_line(frame.current_pc());
        format!("{}:{}: ", proto.chunk_id(), line)
    }

    /// A runtime error whose message is prefixed with the current position.
    pub fn rt_error(&mut self, msg: impl Into<String>) -> LuaError {
        self.error_with_kind(msg, RuntimeErrorKind::Raised)
    }

    pub fn error_with_kind(&mut self, msg: impl Into<String>, kind: RuntimeErrorKind) -> LuaError {
        let raw_msg = msg.into();
        let message = format!("{}{raw_msg}", self.where_(1));
        let value = self.str_value(message.as_bytes());
        let raw = self.str_value(raw_msg.as_bytes());
        LuaError::runtime(value, raw, message, kind)
    }

    /// The error raised by `error(value, level)`.
    pub fn error_value(&mut self, raw: TValue, level: usize) -> LuaError {
        if let Some(sid) = raw.as_string_id() {
            let mut message = self.where_(level);
            message.push_str(&self.strings.get_lossy(sid));
            let value = self.str_value(message.as_bytes());
            return LuaError::runtime(value, raw, message, RuntimeErrorKind::Raised);
        }
        let message = if raw.is_number() {
            self.display_value(raw)
        } else if raw.is_nil() {
            "nil".to_string()
        } else {
            format!("(error object is a {} value)", lua_type_name(raw))
        };
        LuaError::runtime(raw, raw, message, RuntimeErrorKind::Raised)
    }

    /// Render the current thread's frames, innermost first. Deep stacks
    /// keep the innermost and outermost levels and elide the middle.
    pub fn traceback(&self) -> String {
        let levels: Vec<String> = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let proto = &self.protos[frame.proto_idx].proto;
                let line = proto.get_line(frame.current_pc());
                let chunk = proto.chunk_id();
                let mut level = if proto.line_defined == 0 {
                    format!("\n\t{chunk}:{line}: in main chunk")
                } else {
                    format!("\n\t{chunk}:{line}: in function <{chunk}:{}>", proto.line_defined)
                };
                if frame.is_tail {
                    level.push_str("\n\t(tail call): ?");
                }
                level
            })
            .collect();
        let mut out = String::from("stack traceback:");
        if levels.len() > TRACEBACK_HEAD + TRACEBACK_TAIL {
            for level in &levels[..TRACEBACK_HEAD] {
                out.push_str(level);
            }
            out.push_str("\n\t...");
            for level in &levels[levels.len() - TRACEBACK_TAIL..] {
                out.push_str(level);
            }
        } else {
            for level in &levels {
                out.push_str(level);
            }
        }
        out
    }
}

fn mark_dest(st: &mut GcState, dest: Option<ReturnDest>) {
    if let Some(ReturnDest {
        catch: Catch::Xpcall { handler },
        ..
    }) = dest
    {
        st.mark_value(handler);
    }
}

/// Mark a thread's registers, frame closures, pending handlers and open
/// upvalues. The whole stack is scanned, dead slots included.
fn mark_activation(
    st: &mut GcState,
    stack: &[TValue],
    frames: &[CallFrame],
    open_upvals: &[(usize, GcIdx<UpVal>)],
) {
    for &v in stack {
        st.mark_value(v);
    }
    for frame in frames {
        st.mark_closure(frame.closure);
        mark_dest(st, Some(frame.ret));
    }
    for &(_, uv) in open_upvals {
        st.mark_upval(uv);
    }
}

/// Stands in for a collected native until its slot is reused.
fn native_collected(_ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    Err(LuaError::Internal("call of a collected native".into()))
}
