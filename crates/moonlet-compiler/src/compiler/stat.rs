//! Statement parsing.

use super::code::MULT_RET;
use super::expr::{ExpDesc, ExpKind};
use super::{CResult, Compiler, MAX_SYNTAX_DEPTH};
use crate::opcode::{OpCode, NO_JUMP};
use crate::token::Token;

impl Compiler<'_> {
    /// `chunk -> { stat [';'] }`
    pub(super) fn chunk(&mut self) -> CResult<()> {
        self.enter_level()?;
        let mut is_last = false;
        while !is_last && !self.token()?.is_block_follow() {
            is_last = self.statement()?;
            self.test_next(&Token::Semi)?;
            debug_assert!(self.fs.free_reg >= self.fs.nactvar);
            self.fs.free_reg = self.fs.nactvar;
        }
        self.leave_level();
        Ok(())
    }

    fn block(&mut self) -> CResult<()> {
        self.enter_block(false);
        self.chunk()?;
        self.leave_block()
    }

    /// Parse one statement. Returns true for statements that must end a
    /// block (`return` and `break`).
    fn statement(&mut self) -> CResult<bool> {
        let line = self.lexer.line();
        match self.token()? {
            Token::If => self.if_stat(line)?,
            Token::While => self.while_stat(line)?,
            Token::Do => {
                self.next()?;
                self.block()?;
                self.check_match(&Token::End, &Token::Do, line)?;
            }
            Token::For => self.for_stat(line)?,
            Token::Repeat => self.repeat_stat(line)?,
            Token::Function => self.func_stat(line)?,
            Token::Local => {
                self.next()?;
                if self.test_next(&Token::Function)? {
                    self.local_func()?;
                } else {
                    self.local_stat()?;
                }
            }
            Token::Return => {
                self.next()?;
                self.ret_stat()?;
                return Ok(true);
            }
            Token::Break => {
                self.next()?;
                self.break_stat()?;
                return Ok(true);
            }
            _ => self.expr_stat()?,
        }
        Ok(false)
    }

    /// Condition of a control structure. Returns its false-exit list.
    fn cond(&mut self) -> CResult<i32> {
        let mut v = ExpDesc::void();
        self.expr(&mut v)?;
        if v.kind == ExpKind::Nil {
            v.kind = ExpKind::False;
        }
        self.go_if_true(&mut v)?;
        Ok(v.f)
    }

    fn break_stat(&mut self) -> CResult<()> {
        let mut upval = false;
        let mut target = None;
        for (i, bl) in self.fs.blocks.iter().enumerate().rev() {
            if bl.is_breakable {
                target = Some(i);
                break;
            }
            upval |= bl.upval;
        }
        let Some(idx) = target else {
            return Err(self.syntax_error("no loop to break"));
        };
        if upval {
            let level = self.fs.blocks[idx].nactvar;
            self.code_abc(OpCode::Close, level, 0, 0)?;
        }
        let j = self.jump()?;
        let mut list = self.fs.blocks[idx].break_list;
        self.concat(&mut list, j)?;
        self.fs.blocks[idx].break_list = list;
        Ok(())
    }

    fn while_stat(&mut self, line: u32) -> CResult<()> {
        self.next()?;
        let while_init = self.get_label();
        let cond_exit = self.cond()?;
        self.enter_block(true);
        self.check_next(&Token::Do)?;
        self.block()?;
        let back = self.jump()?;
        self.patch_list(back, while_init)?;
        self.check_match(&Token::End, &Token::While, line)?;
        self.leave_block()?;
        self.patch_to_here(cond_exit)
    }

    fn repeat_stat(&mut self, line: u32) -> CResult<()> {
        let repeat_init = self.get_label();
        self.enter_block(true);
        self.enter_block(false);
        self.next()?;
        self.chunk()?;
        self.check_match(&Token::Until, &Token::Repeat, line)?;
        // the condition can see the body's locals
        let cond_exit = self.cond()?;
        let scope_has_upval = self.fs.blocks.last().is_some_and(|bl| bl.upval);
        if !scope_has_upval {
            self.leave_block()?;
            self.patch_list(cond_exit, repeat_init)?;
        } else {
            // captured locals must be closed on every iteration
            self.break_stat()?;
            self.patch_to_here(cond_exit)?;
            self.leave_block()?;
            let back = self.jump()?;
            self.patch_list(back, repeat_init)?;
        }
        self.leave_block()
    }

    /// Parse one expression into the next free register.
    fn exp1(&mut self) -> CResult<()> {
        let mut e = ExpDesc::void();
        self.expr(&mut e)?;
        self.exp_to_next_reg(&mut e)
    }

    fn for_body(&mut self, base: u32, line: u32, nvars: u32, is_num: bool) -> CResult<()> {
        self.adjust_local_vars(3);
        self.check_next(&Token::Do)?;
        let prep = if is_num {
            self.code_asbx(OpCode::ForPrep, base, NO_JUMP)? as i32
        } else {
            self.jump()?
        };
        self.enter_block(false);
        self.adjust_local_vars(nvars);
        self.reserve_regs(nvars)?;
        self.block()?;
        self.leave_block()?;
        self.patch_to_here(prep)?;
        let end_for = if is_num {
            self.code_asbx(OpCode::ForLoop, base, NO_JUMP)? as i32
        } else {
            self.code_abc(OpCode::TForLoop, base, 0, nvars)? as i32
        };
        self.fix_line(line);
        let back = if is_num { end_for } else { self.jump()? };
        self.patch_list(back, prep as usize + 1)
    }

    fn for_num(&mut self, var: moonlet_core::string::StringId, line: u32) -> CResult<()> {
        let base = self.fs.free_reg;
        self.new_local_var_str("(for index)", 0)?;
        self.new_local_var_str("(for limit)", 1)?;
        self.new_local_var_str("(for step)", 2)?;
        self.new_local_var(var, 3)?;
        self.check_next(&Token::Assign)?;
        self.exp1()?;
        self.check_next(&Token::Comma)?;
        self.exp1()?;
        if self.test_next(&Token::Comma)? {
            self.exp1()?;
        } else {
            let k = self.number_k(1.0)?;
            let reg = self.fs.free_reg;
            self.code_abx(OpCode::LoadK, reg, k)?;
            self.reserve_regs(1)?;
        }
        self.for_body(base, line, 1, true)
    }

    fn for_list(&mut self, index_name: moonlet_core::string::StringId) -> CResult<()> {
        let base = self.fs.free_reg;
        self.new_local_var_str("(for generator)", 0)?;
        self.new_local_var_str("(for state)", 1)?;
        self.new_local_var_str("(for control)", 2)?;
        self.new_local_var(index_name, 3)?;
        let mut nvars = 4;
        while self.test_next(&Token::Comma)? {
            let name = self.str_check_name()?;
            self.new_local_var(name, nvars)?;
            nvars += 1;
        }
        self.check_next(&Token::In)?;
        let line = self.lexer.line();
        let mut e = ExpDesc::void();
        let nexps = self.exp_list(&mut e)?;
        self.adjust_assign(3, nexps, &mut e)?;
        // room for the iterator call's function and arguments
        self.check_stack(3)?;
        self.for_body(base, line, nvars - 3, false)
    }

    fn for_stat(&mut self, line: u32) -> CResult<()> {
        self.enter_block(true);
        self.next()?;
        let var = self.str_check_name()?;
        match self.token()? {
            Token::Assign => self.for_num(var, line)?,
            Token::Comma | Token::In => self.for_list(var)?,
            _ => return Err(self.syntax_error("'=' or 'in' expected")),
        }
        self.check_match(&Token::End, &Token::For, line)?;
        self.leave_block()
    }

    /// `[IF | ELSEIF] cond THEN block`; returns the false-exit list.
    fn test_then_block(&mut self) -> CResult<i32> {
        self.next()?;
        let cond_exit = self.cond()?;
        self.check_next(&Token::Then)?;
        self.block()?;
        Ok(cond_exit)
    }

    fn if_stat(&mut self, line: u32) -> CResult<()> {
        let mut escape_list = NO_JUMP;
        let mut false_list = self.test_then_block()?;
        while self.is(&Token::ElseIf)? {
            let j = self.jump()?;
            self.concat(&mut escape_list, j)?;
            self.patch_to_here(false_list)?;
            false_list = self.test_then_block()?;
        }
        if self.is(&Token::Else)? {
            let j = self.jump()?;
            self.concat(&mut escape_list, j)?;
            self.patch_to_here(false_list)?;
            self.next()?;
            self.block()?;
        } else {
            self.concat(&mut escape_list, false_list)?;
        }
        self.patch_to_here(escape_list)?;
        self.check_match(&Token::End, &Token::If, line)
    }

    fn local_func(&mut self) -> CResult<()> {
        let name = self.str_check_name()?;
        self.new_local_var(name, 0)?;
        let var = ExpDesc::new(ExpKind::Local(self.fs.free_reg));
        self.reserve_regs(1)?;
        self.adjust_local_vars(1);
        let mut b = ExpDesc::void();
        let line = self.lexer.line();
        self.body(&mut b, false, line)?;
        self.store_var(&var, &mut b)?;
        // debug info sees the local only once the closure is stored
        let pc = self.pc() as u32;
        let n = self.fs.nactvar - 1;
        self.fs.local_var_mut(n).start_pc = pc;
        Ok(())
    }

    fn local_stat(&mut self) -> CResult<()> {
        let mut nvars = 0;
        loop {
            let name = self.str_check_name()?;
            self.new_local_var(name, nvars)?;
            nvars += 1;
            if !self.test_next(&Token::Comma)? {
                break;
            }
        }
        let mut e = ExpDesc::void();
        let nexps = if self.test_next(&Token::Assign)? {
            self.exp_list(&mut e)?
        } else {
            0
        };
        self.adjust_assign(nvars, nexps, &mut e)?;
        self.adjust_local_vars(nvars);
        Ok(())
    }

    /// Balance `nexps` values against `nvars` targets: open calls and
    /// varargs are widened or truncated, missing values become nil.
    fn adjust_assign(&mut self, nvars: u32, nexps: u32, e: &mut ExpDesc) -> CResult<()> {
        let extra = nvars as i32 - nexps as i32;
        if e.has_multret() {
            let extra = (extra + 1).max(0);
            self.set_returns(e, extra)?;
            if extra > 1 {
                self.reserve_regs(extra as u32 - 1)?;
            }
        } else {
            if e.kind != ExpKind::Void {
                self.exp_to_next_reg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.free_reg;
                self.reserve_regs(extra as u32)?;
                self.code_nil(reg, extra as u32)?;
            }
        }
        Ok(())
    }

    /// `funcname -> NAME {'.' NAME} [':' NAME]`; returns whether it names
    /// a method.
    fn func_name(&mut self, v: &mut ExpDesc) -> CResult<bool> {
        let name = self.str_check_name()?;
        *v = self.single_var(name)?;
        while self.is(&Token::Dot)? {
            self.field(v)?;
        }
        if self.is(&Token::Colon)? {
            self.field(v)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn func_stat(&mut self, line: u32) -> CResult<()> {
        self.next()?;
        let mut v = ExpDesc::void();
        let is_method = self.func_name(&mut v)?;
        let mut b = ExpDesc::void();
        self.body(&mut b, is_method, line)?;
        self.store_var(&v, &mut b)?;
        self.fix_line(line);
        Ok(())
    }

    fn expr_stat(&mut self) -> CResult<()> {
        let mut v = ExpDesc::void();
        self.primary_exp(&mut v)?;
        if let ExpKind::Call(pc) = v.kind {
            // call statement: no results
            self.instr_mut(pc).set_c(1);
            Ok(())
        } else {
            self.assignment(v)
        }
    }

    /// Rewrite earlier indexed targets that use local `reg` as table or
    /// key so they read a copy taken before `reg` is assigned.
    fn check_conflict(&mut self, targets: &mut [ExpDesc], reg: u32) -> CResult<()> {
        let extra = self.fs.free_reg;
        let mut conflict = false;
        for t in targets.iter_mut() {
            if let ExpKind::Indexed { table, key } = &mut t.kind {
                if *table == reg {
                    conflict = true;
                    *table = extra;
                }
                if *key == reg {
                    conflict = true;
                    *key = extra;
                }
            }
        }
        if conflict {
            self.code_abc(OpCode::Move, extra, reg, 0)?;
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    /// `target {',' target} '=' explist`. Values are evaluated left to
    /// right into registers, then stored into the targets right to left.
    fn assignment(&mut self, first: ExpDesc) -> CResult<()> {
        let mut targets = vec![first];
        loop {
            if !targets.last().is_some_and(ExpDesc::is_assignable) {
                return Err(self.syntax_error("syntax error"));
            }
            if !self.test_next(&Token::Comma)? {
                break;
            }
            let mut nv = ExpDesc::void();
            self.primary_exp(&mut nv)?;
            if let ExpKind::Local(reg) = nv.kind {
                self.check_conflict(&mut targets, reg)?;
            }
            let limit = MAX_SYNTAX_DEPTH.saturating_sub(self.depth);
            if targets.len() as u32 > limit {
                return Err(self.error_limit(limit, "variables in assignment"));
            }
            targets.push(nv);
        }
        self.check_next(&Token::Assign)?;
        let nvars = targets.len() as u32;
        let mut e = ExpDesc::void();
        let nexps = self.exp_list(&mut e)?;
        let Some(last) = targets.pop() else {
            return Err(self.internal_error("empty assignment"));
        };
        if nexps != nvars {
            self.adjust_assign(nvars, nexps, &mut e)?;
            if nexps > nvars {
                self.fs.free_reg -= nexps - nvars;
            }
            let mut top = ExpDesc::new(ExpKind::NonReloc(self.fs.free_reg - 1));
            self.store_var(&last, &mut top)?;
        } else {
            self.set_one_ret(&mut e);
            self.store_var(&last, &mut e)?;
        }
        for target in targets.iter().rev() {
            let mut top = ExpDesc::new(ExpKind::NonReloc(self.fs.free_reg - 1));
            self.store_var(target, &mut top)?;
        }
        Ok(())
    }

    fn ret_stat(&mut self) -> CResult<()> {
        let (first, nret) = if self.token()?.is_block_follow() || self.is(&Token::Semi)? {
            (0, 0)
        } else {
            let mut e = ExpDesc::void();
            let n = self.exp_list(&mut e)? as i32;
            if e.has_multret() {
                self.set_mult_ret(&mut e)?;
                if let (ExpKind::Call(pc), 1) = (e.kind, n) {
                    self.instr_mut(pc).set_opcode(OpCode::TailCall);
                    debug_assert_eq!(self.fs.proto.code[pc].a(), self.fs.nactvar);
                }
                (self.fs.nactvar, MULT_RET)
            } else if n == 1 {
                (self.exp_to_any_reg(&mut e)?, 1)
            } else {
                self.exp_to_next_reg(&mut e)?;
                debug_assert_eq!(n as u32, self.fs.free_reg - self.fs.nactvar);
                (self.fs.nactvar, n)
            }
        };
        self.ret(first, nret)
    }
}
