//! Object heap with arena-based allocation and typed indices.
//!
//! Objects are never moved once allocated; a value refers to an object by
//! its arena index. Natives and threads live in the VM, which owns their
//! storage, so the heap only hands out opaque ids for them.
//!
//! Collection is a stop-the-world mark-sweep. [`GcState`] keeps one mark
//! bit per slot of every object kind, including natives, threads and
//! strings, plus gray lists. The heap traverses the objects it owns; the
//! VM drains the native and thread gray lists and sweeps its own storage.

use crate::table::Table;
use crate::value::TValue;
use std::any::Any;
use std::marker::PhantomData;

/// A typed index into an arena in the GcHeap.
#[derive(Debug)]
pub struct GcIdx<T>(pub u32, pub PhantomData<T>);

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> GcIdx<T> {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Handle to a native function registered with the VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeId(pub u32);

/// Handle to a coroutine thread owned by the VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

/// Sub-tags for heap objects (stored in bits 44-46 of payload).
pub const GC_SUB_TABLE: u64 = 0;
pub const GC_SUB_CLOSURE: u64 = 1;
pub const GC_SUB_NATIVE: u64 = 2;
pub const GC_SUB_STRING: u64 = 3;
pub const GC_SUB_THREAD: u64 = 4;
pub const GC_SUB_USERDATA: u64 = 5;

pub const GC_SUB_SHIFT: u64 = 44;
pub const GC_SUB_MASK: u64 = 0x7;
/// Mask for the index within the payload.
pub const GC_INDEX_MASK: u64 = (1u64 << 44) - 1;

/// A compiled function bound to its upvalues and environment.
#[derive(Debug, Clone)]
pub struct LuaClosure {
    /// Index of the prototype in the VM's proto store.
    pub proto_idx: usize,
    pub upvalues: Vec<GcIdx<UpVal>>,
    /// Table used for global name resolution.
    pub env: GcIdx<Table>,
}

/// A captured variable cell.
#[derive(Debug)]
pub struct UpVal {
    pub location: UpValLocation,
}

/// Where an upvalue's value lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpValLocation {
    /// Aliases a slot of a live thread's value stack.
    Open { thread: ThreadId, slot: usize },
    /// Owns a private copy taken when the defining scope ended.
    Closed(TValue),
}

/// An opaque host object.
pub struct Userdata {
    pub data: Box<dyn Any>,
    pub metatable: Option<GcIdx<Table>>,
}

impl std::fmt::Debug for Userdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "userdata(metatable={:?})", self.metatable)
    }
}

/// Slot storage with a free list.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn alloc(&mut self, value: T) -> GcIdx<T> {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(value);
            GcIdx(idx, PhantomData)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(value));
            GcIdx(idx, PhantomData)
        }
    }

    pub fn get(&self, idx: GcIdx<T>) -> Option<&T> {
        self.slots.get(idx.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: GcIdx<T>) -> Option<&mut T> {
        self.slots.get_mut(idx.0 as usize).and_then(Option::as_mut)
    }

    /// Release a slot for reuse.
    pub fn free(&mut self, idx: GcIdx<T>) -> Option<T> {
        let taken = self.slots.get_mut(idx.0 as usize)?.take();
        if taken.is_some() {
            self.free.push(idx.0);
        }
        taken
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of slots, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live objects with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (GcIdx<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (GcIdx(i as u32, PhantomData), v)))
    }

    /// Free every live slot whose mark is unset. Returns the number freed.
    pub fn sweep(&mut self, marks: &[bool]) -> usize {
        let mut freed = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marks.get(i).copied().unwrap_or(false) {
                *slot = None;
                self.free.push(i as u32);
                freed += 1;
            }
        }
        freed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Objects allocated between cycles before the first automatic collection.
pub const GC_MIN_THRESHOLD: usize = 4096;

/// Mark bits, gray lists and pacing for the collector.
#[derive(Debug)]
pub struct GcState {
    pub table_marks: Vec<bool>,
    pub closure_marks: Vec<bool>,
    pub upval_marks: Vec<bool>,
    pub userdata_marks: Vec<bool>,
    pub native_marks: Vec<bool>,
    pub thread_marks: Vec<bool>,
    pub string_marks: Vec<bool>,
    pub gray_tables: Vec<u32>,
    pub gray_closures: Vec<u32>,
    pub gray_upvals: Vec<u32>,
    pub gray_userdata: Vec<u32>,
    /// Drained by the VM, which owns natives.
    pub gray_natives: Vec<u32>,
    /// Drained by the VM, which owns threads.
    pub gray_threads: Vec<u32>,
    /// Objects created since the last cycle (heap objects, natives, threads).
    pub allocated: usize,
    /// `allocated` value that triggers the next automatic cycle.
    pub threshold: usize,
    /// Live objects left by the last cycle.
    pub live_after_cycle: usize,
    /// Growth factor in percent applied to the live count after a cycle.
    pub pause: usize,
    /// Set by `collectgarbage("stop")`.
    pub stopped: bool,
    pub cycles: u64,
}

impl Default for GcState {
    fn default() -> Self {
        GcState {
            table_marks: Vec::new(),
            closure_marks: Vec::new(),
            upval_marks: Vec::new(),
            userdata_marks: Vec::new(),
            native_marks: Vec::new(),
            thread_marks: Vec::new(),
            string_marks: Vec::new(),
            gray_tables: Vec::new(),
            gray_closures: Vec::new(),
            gray_upvals: Vec::new(),
            gray_userdata: Vec::new(),
            gray_natives: Vec::new(),
            gray_threads: Vec::new(),
            allocated: 0,
            threshold: GC_MIN_THRESHOLD,
            live_after_cycle: 0,
            pause: 200,
            stopped: false,
            cycles: 0,
        }
    }
}

/// Set `marks[i]`, returning true when it was clear.
#[inline]
fn set_mark(marks: &mut [bool], i: u32) -> bool {
    match marks.get_mut(i as usize) {
        Some(m) if !*m => {
            *m = true;
            true
        }
        _ => false,
    }
}

impl GcState {
    /// Mark the object behind `value` and queue it for traversal.
    pub fn mark_value(&mut self, value: TValue) {
        let (Some(sub), Some(i)) = (value.gc_sub_tag(), value.gc_index()) else {
            return;
        };
        match sub {
            GC_SUB_STRING => {
                set_mark(&mut self.string_marks, i);
            }
            GC_SUB_TABLE => {
                if set_mark(&mut self.table_marks, i) {
                    self.gray_tables.push(i);
                }
            }
            GC_SUB_CLOSURE => {
                if set_mark(&mut self.closure_marks, i) {
                    self.gray_closures.push(i);
                }
            }
            GC_SUB_NATIVE => {
                if set_mark(&mut self.native_marks, i) {
                    self.gray_natives.push(i);
                }
            }
            GC_SUB_THREAD => self.mark_thread(ThreadId(i)),
            GC_SUB_USERDATA => {
                if set_mark(&mut self.userdata_marks, i) {
                    self.gray_userdata.push(i);
                }
            }
            _ => {}
        }
    }

    pub fn mark_table(&mut self, idx: GcIdx<Table>) {
        self.mark_value(TValue::from_table(idx));
    }

    pub fn mark_closure(&mut self, idx: GcIdx<LuaClosure>) {
        self.mark_value(TValue::from_closure(idx));
    }

    pub fn mark_upval(&mut self, idx: GcIdx<UpVal>) {
        if set_mark(&mut self.upval_marks, idx.0) {
            self.gray_upvals.push(idx.0);
        }
    }

    pub fn mark_thread(&mut self, id: ThreadId) {
        if set_mark(&mut self.thread_marks, id.0) {
            self.gray_threads.push(id.0);
        }
    }

    pub fn mark_string(&mut self, id: crate::string::StringId) {
        set_mark(&mut self.string_marks, id.0);
    }

    pub fn is_native_marked(&self, id: NativeId) -> bool {
        self.native_marks.get(id.0 as usize).copied().unwrap_or(false)
    }

    pub fn is_thread_marked(&self, id: ThreadId) -> bool {
        self.thread_marks.get(id.0 as usize).copied().unwrap_or(false)
    }

    /// True once the allocation debt reaches the threshold. Strings are
    /// counted by the interner and passed in.
    pub fn should_collect(&self, strings_created: usize) -> bool {
        !self.stopped && self.allocated + strings_created >= self.threshold
    }
}

/// Arena-based heap for tables, closures, upvalues and userdata.
#[derive(Debug, Default)]
pub struct GcHeap {
    pub tables: Arena<Table>,
    pub closures: Arena<LuaClosure>,
    pub upvals: Arena<UpVal>,
    pub userdata: Arena<Userdata>,
    pub gc_state: GcState,
}

impl GcHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_table(&mut self, array_hint: usize, hash_hint: usize) -> GcIdx<Table> {
        self.gc_state.allocated += 1;
        self.tables.alloc(Table::new(array_hint, hash_hint))
    }

    pub fn get_table(&self, idx: GcIdx<Table>) -> &Table {
        self.tables.get(idx).expect("table was freed")
    }

    pub fn get_table_mut(&mut self, idx: GcIdx<Table>) -> &mut Table {
        self.tables.get_mut(idx).expect("table was freed")
    }

    pub fn alloc_closure(
        &mut self,
        proto_idx: usize,
        upvalues: Vec<GcIdx<UpVal>>,
        env: GcIdx<Table>,
    ) -> GcIdx<LuaClosure> {
        self.gc_state.allocated += 1;
        self.closures.alloc(LuaClosure {
            proto_idx,
            upvalues,
            env,
        })
    }

    pub fn get_closure(&self, idx: GcIdx<LuaClosure>) -> &LuaClosure {
        self.closures.get(idx).expect("closure was freed")
    }

    pub fn get_closure_mut(&mut self, idx: GcIdx<LuaClosure>) -> &mut LuaClosure {
        self.closures.get_mut(idx).expect("closure was freed")
    }

    pub fn alloc_upval(&mut self, location: UpValLocation) -> GcIdx<UpVal> {
        self.gc_state.allocated += 1;
        self.upvals.alloc(UpVal { location })
    }

    pub fn get_upval(&self, idx: GcIdx<UpVal>) -> &UpVal {
        self.upvals.get(idx).expect("upval was freed")
    }

    pub fn get_upval_mut(&mut self, idx: GcIdx<UpVal>) -> &mut UpVal {
        self.upvals.get_mut(idx).expect("upval was freed")
    }

    pub fn alloc_userdata(&mut self, data: Box<dyn Any>) -> GcIdx<Userdata> {
        self.gc_state.allocated += 1;
        self.userdata.alloc(Userdata {
            data,
            metatable: None,
        })
    }

    pub fn get_userdata(&self, idx: GcIdx<Userdata>) -> &Userdata {
        self.userdata.get(idx).expect("userdata was freed")
    }

    pub fn get_userdata_mut(&mut self, idx: GcIdx<Userdata>) -> &mut Userdata {
        self.userdata.get_mut(idx).expect("userdata was freed")
    }

    // ---- Collection ----

    /// Clear all mark bits and size them for the current slot counts.
    /// `natives`, `threads` and `strings` are the VM-owned slot counts.
    pub fn gc_prepare_marks(&mut self, natives: usize, threads: usize, strings: usize) {
        fn reset(marks: &mut Vec<bool>, n: usize) {
            marks.clear();
            marks.resize(n, false);
        }
        let st = &mut self.gc_state;
        reset(&mut st.table_marks, self.tables.capacity());
        reset(&mut st.closure_marks, self.closures.capacity());
        reset(&mut st.upval_marks, self.upvals.capacity());
        reset(&mut st.userdata_marks, self.userdata.capacity());
        reset(&mut st.native_marks, natives);
        reset(&mut st.thread_marks, threads);
        reset(&mut st.string_marks, strings);
        st.gray_tables.clear();
        st.gray_closures.clear();
        st.gray_upvals.clear();
        st.gray_userdata.clear();
        st.gray_natives.clear();
        st.gray_threads.clear();
    }

    pub fn gc_mark_value(&mut self, value: TValue) {
        self.gc_state.mark_value(value);
    }

    /// Traverse gray heap objects. Returns how many were processed; the
    /// caller repeats until this and its own gray lists are empty.
    pub fn gc_propagate(&mut self) -> usize {
        let mut work = 0;
        let st = &mut self.gc_state;
        while let Some(i) = st.gray_tables.pop() {
            work += 1;
            if let Some(t) = self.tables.get(GcIdx(i, PhantomData)) {
                t.for_each_ref(|v| st.mark_value(v));
                if let Some(mt) = t.metatable {
                    st.mark_table(mt);
                }
            }
        }
        while let Some(i) = st.gray_closures.pop() {
            work += 1;
            if let Some(c) = self.closures.get(GcIdx(i, PhantomData)) {
                for &uv in &c.upvalues {
                    st.mark_upval(uv);
                }
                st.mark_table(c.env);
            }
        }
        while let Some(i) = st.gray_upvals.pop() {
            work += 1;
            match self.upvals.get(GcIdx(i, PhantomData)).map(|u| u.location) {
                Some(UpValLocation::Closed(v)) => st.mark_value(v),
                // The cell aliases a stack slot, so the thread must survive.
                Some(UpValLocation::Open { thread, .. }) => st.mark_thread(thread),
                None => {}
            }
        }
        while let Some(i) = st.gray_userdata.pop() {
            work += 1;
            if let Some(mt) = self
                .userdata
                .get(GcIdx(i, PhantomData))
                .and_then(|u| u.metatable)
            {
                st.mark_table(mt);
            }
        }
        work
    }

    /// Free every unmarked heap object. Returns the number freed.
    pub fn gc_sweep(&mut self) -> usize {
        let st = &self.gc_state;
        self.tables.sweep(&st.table_marks)
            + self.closures.sweep(&st.closure_marks)
            + self.upvals.sweep(&st.upval_marks)
            + self.userdata.sweep(&st.userdata_marks)
    }

    pub fn live_objects(&self) -> usize {
        self.tables.len() + self.closures.len() + self.upvals.len() + self.userdata.len()
    }

    /// Rough heap size in bytes.
    pub fn estimate_bytes(&self) -> usize {
        use std::mem::size_of;
        let tables: usize = self
            .tables
            .iter()
            .map(|(_, t)| size_of::<Table>() + t.array_len() * 8 + t.hash_len() * 24)
            .sum();
        let closures: usize = self
            .closures
            .iter()
            .map(|(_, c)| size_of::<LuaClosure>() + c.upvalues.len() * 4)
            .sum();
        tables
            + closures
            + self.upvals.len() * size_of::<UpVal>()
            + self.userdata.len() * size_of::<Userdata>()
    }
}
