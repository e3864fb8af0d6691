//! Locals, upvalues, blocks and function nesting.

use super::expr::{ExpDesc, ExpKind};
use super::{CResult, CompileError, Compiler, FuncState};
use crate::opcode::{OpCode, MAX_BX, NO_JUMP};
use crate::proto::{LocalVar, Proto, UpvalDesc, UpvalSource};
use moonlet_core::string::StringId;

/// Maximum active locals per function.
pub const MAX_VARS: u32 = 200;
/// Maximum upvalues per function.
pub const MAX_UPVALUES: u32 = 60;

/// A lexical block.
#[derive(Clone, Debug)]
pub(crate) struct BlockCnt {
    /// Pending `break` jumps out of this block.
    pub(super) break_list: i32,
    /// Active locals outside the block.
    pub(super) nactvar: u32,
    /// Some local of this block is captured by a closure.
    pub(super) upval: bool,
    pub(super) is_breakable: bool,
}

/// Result of resolving a name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VarKind {
    Local(u32),
    Upval(u32),
    Global,
}

impl FuncState {
    pub(super) fn local_var_mut(&mut self, i: u32) -> &mut LocalVar {
        let idx = self.actvar[i as usize] as usize;
        &mut self.proto.local_vars[idx]
    }

    /// Register of the innermost active local called `name`.
    fn search_var(&self, name: StringId) -> Option<u32> {
        (0..self.nactvar)
            .rev()
            .find(|&i| self.proto.local_vars[self.actvar[i as usize] as usize].name == name)
    }

    /// Flag the block owning register `level` as needing CLOSE on exit.
    fn mark_upval(&mut self, level: u32) {
        if let Some(bl) = self.blocks.iter_mut().rev().find(|bl| bl.nactvar <= level) {
            bl.upval = true;
        }
    }
}

pub(super) fn limit_error(line_defined: u32, limit: u32, what: &str, chunk: &str, line: u32) -> CompileError {
    let message = if line_defined == 0 {
        format!("main function has more than {limit} {what}")
    } else {
        format!("function at line {line_defined} has more than {limit} {what}")
    };
    CompileError {
        message,
        chunk: chunk.to_string(),
        line,
    }
}

impl Compiler<'_> {
    // ---- Locals ----

    /// Declare the `n`-th pending local of the current statement. It stays
    /// invisible until `adjust_local_vars`.
    pub(super) fn new_local_var(&mut self, name: StringId, n: u32) -> CResult<()> {
        let slot = self.fs.nactvar + n;
        if slot + 1 > MAX_VARS {
            return Err(self.error_limit(MAX_VARS, "local variables"));
        }
        let idx = self.fs.proto.local_vars.len() as u32;
        self.fs.proto.local_vars.push(LocalVar {
            name,
            start_pc: 0,
            end_pc: 0,
        });
        let slot = slot as usize;
        if self.fs.actvar.len() <= slot {
            self.fs.actvar.resize(slot + 1, 0);
        }
        self.fs.actvar[slot] = idx;
        Ok(())
    }

    pub(super) fn new_local_var_str(&mut self, name: &str, n: u32) -> CResult<()> {
        let id = self.lexer.intern(name);
        self.new_local_var(id, n)
    }

    /// Activate the last `nvars` declared locals.
    pub(super) fn adjust_local_vars(&mut self, nvars: u32) {
        self.fs.nactvar += nvars;
        let pc = self.pc() as u32;
        for i in (self.fs.nactvar - nvars)..self.fs.nactvar {
            self.fs.local_var_mut(i).start_pc = pc;
        }
    }

    pub(super) fn remove_vars(&mut self, to_level: u32) {
        let pc = self.pc() as u32;
        while self.fs.nactvar > to_level {
            self.fs.nactvar -= 1;
            let n = self.fs.nactvar;
            self.fs.local_var_mut(n).end_pc = pc;
        }
    }

    // ---- Name resolution ----

    /// Function state `level` steps out from the current one.
    fn fs_at(&mut self, level: usize) -> Option<&mut FuncState> {
        if level == 0 {
            return Some(&mut self.fs);
        }
        let len = self.enclosing.len();
        if level > len {
            return None;
        }
        self.enclosing.get_mut(len - level)
    }

    fn index_upvalue(&mut self, level: usize, name: StringId, source: UpvalSource) -> CResult<u32> {
        let chunk = self.lexer.chunk().to_string();
        let line = self.lexer.line();
        let fs = self
            .fs_at(level)
            .ok_or_else(|| CompileError {
                message: "internal compiler error: missing function state".into(),
                chunk: chunk.clone(),
                line,
            })?;
        if let Some(i) = fs.proto.upvalues.iter().position(|u| u.source == source) {
            return Ok(i as u32);
        }
        let n = fs.proto.upvalues.len() as u32;
        if n + 1 > MAX_UPVALUES {
            return Err(limit_error(fs.proto.line_defined, MAX_UPVALUES, "upvalues", &chunk, line));
        }
        fs.proto.upvalues.push(UpvalDesc { name, source });
        Ok(n)
    }

    fn single_var_aux(&mut self, level: usize, name: StringId, base: bool) -> CResult<VarKind> {
        let Some(fs) = self.fs_at(level) else {
            return Ok(VarKind::Global);
        };
        if let Some(reg) = fs.search_var(name) {
            if !base {
                fs.mark_upval(reg);
            }
            return Ok(VarKind::Local(reg));
        }
        let source = match self.single_var_aux(level + 1, name, false)? {
            VarKind::Global => return Ok(VarKind::Global),
            VarKind::Local(reg) => UpvalSource::Local(reg as u8),
            VarKind::Upval(idx) => UpvalSource::Upvalue(idx as u8),
        };
        Ok(VarKind::Upval(self.index_upvalue(level, name, source)?))
    }

    /// Resolve `name` as a local, an upvalue or a global.
    pub(super) fn single_var(&mut self, name: StringId) -> CResult<ExpDesc> {
        let kind = match self.single_var_aux(0, name, true)? {
            VarKind::Local(reg) => ExpKind::Local(reg),
            VarKind::Upval(idx) => ExpKind::Upval(idx),
            VarKind::Global => ExpKind::Global(self.string_k(name)?),
        };
        Ok(ExpDesc::new(kind))
    }

    // ---- Blocks ----

    pub(super) fn enter_block(&mut self, is_breakable: bool) {
        self.fs.blocks.push(BlockCnt {
            break_list: NO_JUMP,
            nactvar: self.fs.nactvar,
            upval: false,
            is_breakable,
        });
        debug_assert_eq!(self.fs.free_reg, self.fs.nactvar);
    }

    pub(super) fn leave_block(&mut self) -> CResult<()> {
        let bl = self
            .fs
            .blocks
            .pop()
            .ok_or_else(|| self.internal_error("block stack underflow"))?;
        self.remove_vars(bl.nactvar);
        if bl.upval {
            self.code_abc(OpCode::Close, bl.nactvar, 0, 0)?;
        }
        self.fs.free_reg = self.fs.nactvar;
        self.patch_to_here(bl.break_list)
    }

    // ---- Functions ----

    /// Start compiling a nested function.
    pub(super) fn open_func(&mut self, line_defined: u32) {
        let child = FuncState::new(&self.source_name, line_defined);
        let parent = std::mem::replace(&mut self.fs, child);
        self.enclosing.push(parent);
    }

    /// Finish the current function and return its prototype, making the
    /// enclosing function current again.
    pub(super) fn close_func(&mut self) -> CResult<Proto> {
        self.remove_vars(0);
        self.ret(0, 0)?;
        let finished = match self.enclosing.pop() {
            Some(parent) => std::mem::replace(&mut self.fs, parent),
            None => std::mem::replace(&mut self.fs, FuncState::new(&self.source_name, 0)),
        };
        debug_assert_eq!(finished.proto.code.len(), finished.proto.line_info.len());
        Ok(finished.proto)
    }

    /// Add `child` to the current function and load it as a closure.
    pub(super) fn push_closure(&mut self, child: Proto, e: &mut ExpDesc) -> CResult<()> {
        let idx = self.fs.proto.protos.len() as u32;
        if idx >= MAX_BX {
            return Err(self.error_limit(MAX_BX, "functions"));
        }
        self.fs.proto.protos.push(child);
        *e = ExpDesc::new(ExpKind::Relocable(self.code_abx(OpCode::Closure, 0, idx)?));
        Ok(())
    }
}
