//! Call frames and the descriptors that tell a returning call where its
//! results go.

use moonlet_core::gc::{GcIdx, LuaClosure};
use moonlet_core::value::TValue;

/// Work left over from the instruction that started a call. Applied to the
/// caller's frame once the callee's results have been placed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PostProcess {
    /// Plain `CALL`: results stay where they were placed.
    None,
    /// Copy the first result into register `reg` of the caller.
    Store(u32),
    /// Comparison metamethod: skip the following jump unless the
    /// (optionally negated) truthiness of the first result equals `expect`.
    Cond { expect: bool, negate: bool },
    /// A `__concat` call finished the pair ending at register `b + n - 1`;
    /// concatenation of `R(b)..R(b + n - 2)` continues into `R(a)`.
    Concat { a: u32, b: u32, n: u32 },
    /// Generic-for iterator call; results sit at `R(a + 3)..`.
    TForLoop { a: u32 },
    /// `__newindex` handler: results are dropped.
    Discard,
}

/// Error boundary installed by `pcall`/`xpcall`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Catch {
    None,
    Pcall,
    Xpcall { handler: TValue },
}

impl Catch {
    pub fn is_protected(&self) -> bool {
        !matches!(self, Catch::None)
    }
}

/// Where a call's results land.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReturnDest {
    /// First stack slot receiving results.
    pub ret_base: usize,
    /// Results wanted by the caller; -1 keeps all of them and moves `top`.
    pub wanted: i32,
    pub post: PostProcess,
    /// A protected call prefixes `true` on success.
    pub catch: Catch,
}

impl ReturnDest {
    pub fn new(ret_base: usize, wanted: i32) -> Self {
        ReturnDest {
            ret_base,
            wanted,
            post: PostProcess::None,
            catch: Catch::None,
        }
    }

    pub fn with_post(mut self, post: PostProcess) -> Self {
        self.post = post;
        self
    }

    pub fn with_catch(mut self, catch: Catch) -> Self {
        self.catch = catch;
        self
    }
}

/// An active Lua function.
#[derive(Clone, Debug)]
pub struct CallFrame {
    pub closure: GcIdx<LuaClosure>,
    /// Index into the VM proto store.
    pub proto_idx: usize,
    pub pc: usize,
    /// Register 0 of this frame.
    pub base: usize,
    /// Slot that held the called function.
    pub func_slot: usize,
    /// Extra arguments of a vararg function, stored below `base`.
    pub num_varargs: usize,
    /// Arguments passed by the caller.
    pub nargs: usize,
    pub is_tail: bool,
    pub ret: ReturnDest,
}

impl CallFrame {
    /// First vararg slot.
    pub fn vararg_base(&self) -> usize {
        self.base - self.num_varargs
    }

    /// The pc of the instruction currently executing.
    pub fn current_pc(&self) -> usize {
        self.pc.saturating_sub(1)
    }
}
