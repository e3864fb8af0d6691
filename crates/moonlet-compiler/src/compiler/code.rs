//! Code generation over expression descriptors.
//!
//! Jump lists are threaded through the sBx fields of the pending jumps
//! themselves and terminated by `NO_JUMP`. `jpc` collects jumps that target
//! the next emitted instruction; they are resolved lazily by `code`.

use super::expr::{BinOp, ExpDesc, ExpKind, UnOp};
use super::{CResult, Compiler, ConstKey};
use crate::opcode::{
    int2fb, is_k, rk_as_k, Instruction, OpCode, FIELDS_PER_FLUSH, MAX_A, MAX_BX, MAX_C, MAX_INDEX_RK,
    MAX_SBX, NO_JUMP,
};
use crate::proto::Constant;
use moonlet_core::string::StringId;

/// "No register" marker for TESTSET patching.
const NO_REG: u32 = MAX_A;

/// Registers available to one function.
pub const MAX_REGISTERS: u32 = 250;

/// `nresults` value meaning "all results".
pub const MULT_RET: i32 = -1;

impl Compiler<'_> {
    pub(super) fn pc(&self) -> usize {
        self.fs.proto.code.len()
    }

    fn code(&mut self, inst: Instruction) -> CResult<usize> {
        self.discharge_jpc()?;
        let line = self.lexer.lastline;
        Ok(self.fs.proto.emit(inst, line))
    }

    pub(super) fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> CResult<usize> {
        self.code(Instruction::abc(op, a, b, c))
    }

    pub(super) fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> CResult<usize> {
        self.code(Instruction::abx(op, a, bx))
    }

    pub(super) fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> CResult<usize> {
        self.code(Instruction::asbx(op, a, sbx))
    }

    /// Attribute the last emitted instruction to `line`.
    pub(super) fn fix_line(&mut self, line: u32) {
        if let Some(last) = self.fs.proto.line_info.last_mut() {
            *last = line;
        }
    }

    pub(super) fn instr_mut(&mut self, pc: usize) -> &mut Instruction {
        &mut self.fs.proto.code[pc]
    }

    // ---- Jumps ----

    pub(super) fn jump(&mut self) -> CResult<i32> {
        let jpc = std::mem::replace(&mut self.fs.jpc, NO_JUMP);
        let mut j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP)? as i32;
        self.concat(&mut j, jpc)?;
        Ok(j)
    }

    pub(super) fn ret(&mut self, first: u32, nret: i32) -> CResult<()> {
        self.code_abc(OpCode::Return, first, (nret + 1) as u32, 0)?;
        Ok(())
    }

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> CResult<i32> {
        self.code_abc(op, a, b, c)?;
        self.jump()
    }

    fn fix_jump(&mut self, pc: i32, dest: usize) -> CResult<()> {
        let offset = dest as i64 - (pc as i64 + 1);
        if offset.abs() > MAX_SBX as i64 {
            return Err(self.syntax_error("control structure too long"));
        }
        self.instr_mut(pc as usize).set_sbx(offset as i32);
        Ok(())
    }

    /// Mark the current pc as a jump target.
    pub(super) fn get_label(&mut self) -> usize {
        self.fs.last_target = self.pc() as i32;
        self.pc()
    }

    fn get_jump(&self, pc: i32) -> i32 {
        let offset = self.fs.proto.code[pc as usize].sbx();
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    /// The instruction controlling the jump at `pc`: the preceding test
    /// instruction if there is one, else the jump itself.
    fn jump_control(&self, pc: i32) -> usize {
        let pc = pc as usize;
        if pc >= 1 && self.fs.proto.code[pc - 1].opcode().is_test() {
            pc - 1
        } else {
            pc
        }
    }

    /// Whether any jump in the list is not a TESTSET (and so produces no
    /// value of its own).
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctl = self.jump_control(list);
            if self.fs.proto.code[ctl].opcode() != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    fn patch_test_reg(&mut self, node: i32, reg: u32) -> bool {
        let ctl = self.jump_control(node);
        let inst = self.fs.proto.code[ctl];
        if inst.opcode() != OpCode::TestSet {
            return false;
        }
        if reg != NO_REG && reg != inst.b() {
            self.instr_mut(ctl).set_a(reg);
        } else {
            *self.instr_mut(ctl) = Instruction::abc(OpCode::Test, inst.b(), 0, inst.c());
        }
        true
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list, NO_REG);
            list = self.get_jump(list);
        }
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: usize, reg: u32, dtarget: usize) -> CResult<()> {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget)?;
            } else {
                self.fix_jump(list, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    fn discharge_jpc(&mut self) -> CResult<()> {
        let pc = self.pc();
        let jpc = std::mem::replace(&mut self.fs.jpc, NO_JUMP);
        self.patch_list_aux(jpc, pc, NO_REG, pc)
    }

    pub(super) fn patch_list(&mut self, list: i32, target: usize) -> CResult<()> {
        if target == self.pc() {
            self.patch_to_here(list)
        } else {
            self.patch_list_aux(list, target, NO_REG, target)
        }
    }

    pub(super) fn patch_to_here(&mut self, list: i32) -> CResult<()> {
        self.get_label();
        let mut jpc = self.fs.jpc;
        self.concat(&mut jpc, list)?;
        self.fs.jpc = jpc;
        Ok(())
    }

    pub(super) fn concat(&mut self, l1: &mut i32, l2: i32) -> CResult<()> {
        if l2 == NO_JUMP {
            return Ok(());
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return Ok(());
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2 as usize)
    }

    // ---- Registers ----

    pub(super) fn check_stack(&mut self, n: u32) -> CResult<()> {
        let new_stack = self.fs.free_reg + n;
        if new_stack > self.fs.proto.max_stack_size as u32 {
            if new_stack >= MAX_REGISTERS {
                return Err(self.syntax_error("function or expression too complex"));
            }
            self.fs.proto.max_stack_size = new_stack as u8;
        }
        Ok(())
    }

    pub(super) fn reserve_regs(&mut self, n: u32) -> CResult<()> {
        self.check_stack(n)?;
        self.fs.free_reg += n;
        Ok(())
    }

    fn free_reg(&mut self, reg: u32) {
        if !is_k(reg) && reg >= self.fs.nactvar {
            self.fs.free_reg -= 1;
            debug_assert_eq!(reg, self.fs.free_reg, "registers freed out of order");
        }
    }

    fn free_exp(&mut self, e: &ExpDesc) {
        if let ExpKind::NonReloc(reg) = e.kind {
            self.free_reg(reg);
        }
    }

    /// Load nil into `n` registers starting at `from`, merging with a
    /// directly preceding LOADNIL when no jump targets this point.
    pub(super) fn code_nil(&mut self, from: u32, n: u32) -> CResult<()> {
        if self.pc() as i32 > self.fs.last_target {
            if self.pc() == 0 {
                if from >= self.fs.nactvar {
                    return Ok(());
                }
            } else {
                let prev_pc = self.pc() - 1;
                let prev = self.fs.proto.code[prev_pc];
                if prev.opcode() == OpCode::LoadNil {
                    let (pfrom, pto) = (prev.a(), prev.b());
                    if pfrom <= from && from <= pto + 1 {
                        if from + n - 1 > pto {
                            self.instr_mut(prev_pc).set_b(from + n - 1);
                        }
                        return Ok(());
                    }
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, from + n - 1, 0)?;
        Ok(())
    }

    // ---- Constants ----

    fn add_k(&mut self, key: ConstKey, k: Constant) -> CResult<u32> {
        if let Some(&idx) = self.fs.k_cache.get(&key) {
            return Ok(idx);
        }
        let idx = self.fs.proto.constants.len() as u32;
        if idx >= MAX_BX {
            return Err(self.syntax_error("constant table overflow"));
        }
        self.fs.proto.constants.push(k);
        self.fs.k_cache.insert(key, idx);
        Ok(idx)
    }

    pub(super) fn string_k(&mut self, s: StringId) -> CResult<u32> {
        self.add_k(ConstKey::Str(s), Constant::String(s))
    }

    pub(super) fn number_k(&mut self, n: f64) -> CResult<u32> {
        self.add_k(ConstKey::Num(n.to_bits()), Constant::Number(n))
    }

    fn bool_k(&mut self, b: bool) -> CResult<u32> {
        self.add_k(ConstKey::Bool(b), Constant::Boolean(b))
    }

    fn nil_k(&mut self) -> CResult<u32> {
        self.add_k(ConstKey::Nil, Constant::Nil)
    }

    // ---- Discharging ----

    pub(super) fn set_returns(&mut self, e: &mut ExpDesc, nresults: i32) -> CResult<()> {
        match e.kind {
            ExpKind::Call(pc) => {
                self.instr_mut(pc).set_c((nresults + 1) as u32);
            }
            ExpKind::VarArg(pc) => {
                let free = self.fs.free_reg;
                let inst = self.instr_mut(pc);
                inst.set_b((nresults + 1) as u32);
                inst.set_a(free);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn set_mult_ret(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.set_returns(e, MULT_RET)
    }

    pub(super) fn set_one_ret(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::Call(pc) => {
                e.kind = ExpKind::NonReloc(self.fs.proto.code[pc].a());
            }
            ExpKind::VarArg(pc) => {
                self.instr_mut(pc).set_b(2);
                e.kind = ExpKind::Relocable(pc);
            }
            _ => {}
        }
    }

    pub(super) fn discharge_vars(&mut self, e: &mut ExpDesc) -> CResult<()> {
        match e.kind {
            ExpKind::Local(reg) => e.kind = ExpKind::NonReloc(reg),
            ExpKind::Upval(idx) => {
                e.kind = ExpKind::Relocable(self.code_abc(OpCode::GetUpval, 0, idx, 0)?);
            }
            ExpKind::Global(k) => {
                e.kind = ExpKind::Relocable(self.code_abx(OpCode::GetGlobal, 0, k)?);
            }
            ExpKind::Indexed { table, key } => {
                self.free_reg(key);
                self.free_reg(table);
                e.kind = ExpKind::Relocable(self.code_abc(OpCode::GetTable, 0, table, key)?);
            }
            ExpKind::Call(_) | ExpKind::VarArg(_) => self.set_one_ret(e),
            _ => {}
        }
        Ok(())
    }

    fn code_label(&mut self, a: u32, b: u32, jump: u32) -> CResult<usize> {
        self.get_label();
        self.code_abc(OpCode::LoadBool, a, b, jump)
    }

    fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> CResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::Nil => self.code_nil(reg, 1)?,
            ExpKind::False | ExpKind::True => {
                let b = (e.kind == ExpKind::True) as u32;
                self.code_abc(OpCode::LoadBool, reg, b, 0)?;
            }
            ExpKind::K(k) => {
                self.code_abx(OpCode::LoadK, reg, k)?;
            }
            ExpKind::KNum(n) => {
                let k = self.number_k(n)?;
                self.code_abx(OpCode::LoadK, reg, k)?;
            }
            ExpKind::Relocable(pc) => self.instr_mut(pc).set_a(reg),
            ExpKind::NonReloc(src) => {
                if src != reg {
                    self.code_abc(OpCode::Move, reg, src, 0)?;
                }
            }
            // Void and Jmp: nothing to load
            _ => return Ok(()),
        }
        e.kind = ExpKind::NonReloc(reg);
        Ok(())
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) -> CResult<()> {
        if !matches!(e.kind, ExpKind::NonReloc(_)) {
            self.reserve_regs(1)?;
            let reg = self.fs.free_reg - 1;
            self.discharge_to_reg(e, reg)?;
        }
        Ok(())
    }

    fn exp_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> CResult<()> {
        self.discharge_to_reg(e, reg)?;
        if let ExpKind::Jmp(pc) = e.kind {
            let mut t = e.t;
            self.concat(&mut t, pc as i32)?;
            e.t = t;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP as usize;
            let mut p_t = NO_JUMP as usize;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if matches!(e.kind, ExpKind::Jmp(_)) {
                    NO_JUMP
                } else {
                    self.jump()?
                };
                p_f = self.code_label(reg, 0, 1)?;
                p_t = self.code_label(reg, 1, 0)?;
                self.patch_to_here(fj)?;
            }
            let end = self.get_label();
            self.patch_list_aux(e.f, end, reg, p_f)?;
            self.patch_list_aux(e.t, end, reg, p_t)?;
        }
        e.t = NO_JUMP;
        e.f = NO_JUMP;
        e.kind = ExpKind::NonReloc(reg);
        Ok(())
    }

    pub(super) fn exp_to_next_reg(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.fs.free_reg - 1;
        self.exp_to_reg(e, reg)
    }

    pub(super) fn exp_to_any_reg(&mut self, e: &mut ExpDesc) -> CResult<u32> {
        self.discharge_vars(e)?;
        if let ExpKind::NonReloc(reg) = e.kind {
            if !e.has_jumps() {
                return Ok(reg);
            }
            if reg >= self.fs.nactvar {
                self.exp_to_reg(e, reg)?;
                return Ok(reg);
            }
        }
        self.exp_to_next_reg(e)?;
        match e.kind {
            ExpKind::NonReloc(reg) => Ok(reg),
            _ => Err(self.internal_error("expression not in a register")),
        }
    }

    pub(super) fn exp_to_val(&mut self, e: &mut ExpDesc) -> CResult<()> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
            Ok(())
        } else {
            self.discharge_vars(e)
        }
    }

    /// Make `e` usable as an RK operand.
    pub(super) fn exp_to_rk(&mut self, e: &mut ExpDesc) -> CResult<u32> {
        self.exp_to_val(e)?;
        match e.kind {
            ExpKind::KNum(_) | ExpKind::True | ExpKind::False | ExpKind::Nil => {
                if self.fs.proto.constants.len() as u32 <= MAX_INDEX_RK {
                    let k = match e.kind {
                        ExpKind::Nil => self.nil_k()?,
                        ExpKind::KNum(n) => self.number_k(n)?,
                        _ => self.bool_k(e.kind == ExpKind::True)?,
                    };
                    e.kind = ExpKind::K(k);
                    return Ok(rk_as_k(k));
                }
            }
            ExpKind::K(k) if k <= MAX_INDEX_RK => return Ok(rk_as_k(k)),
            _ => {}
        }
        self.exp_to_any_reg(e)
    }

    pub(super) fn store_var(&mut self, var: &ExpDesc, ex: &mut ExpDesc) -> CResult<()> {
        match var.kind {
            ExpKind::Local(reg) => {
                self.free_exp(ex);
                return self.exp_to_reg(ex, reg);
            }
            ExpKind::Upval(idx) => {
                let e = self.exp_to_any_reg(ex)?;
                self.code_abc(OpCode::SetUpval, e, idx, 0)?;
            }
            ExpKind::Global(k) => {
                let e = self.exp_to_any_reg(ex)?;
                self.code_abx(OpCode::SetGlobal, e, k)?;
            }
            ExpKind::Indexed { table, key } => {
                let e = self.exp_to_rk(ex)?;
                self.code_abc(OpCode::SetTable, table, key, e)?;
            }
            _ => return Err(self.internal_error("invalid assignment target")),
        }
        self.free_exp(ex);
        Ok(())
    }

    /// `obj:method` -- loads the method and the receiver into two
    /// consecutive registers.
    pub(super) fn code_self(&mut self, e: &mut ExpDesc, key: &mut ExpDesc) -> CResult<()> {
        let obj = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let func = self.fs.free_reg;
        self.reserve_regs(2)?;
        let k = self.exp_to_rk(key)?;
        self.code_abc(OpCode::Self_, func, obj, k)?;
        self.free_exp(key);
        e.kind = ExpKind::NonReloc(func);
        Ok(())
    }

    fn invert_jump(&mut self, e: &ExpDesc) {
        if let ExpKind::Jmp(pc) = e.kind {
            let ctl = self.jump_control(pc as i32);
            let inst = self.instr_mut(ctl);
            let a = inst.a();
            inst.set_a((a == 0) as u32);
        }
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> CResult<i32> {
        if let ExpKind::Relocable(pc) = e.kind {
            let inst = self.fs.proto.code[pc];
            if inst.opcode() == OpCode::Not && pc + 1 == self.pc() {
                // drop the NOT and test its operand with the opposite sense
                self.fs.proto.code.pop();
                self.fs.proto.line_info.pop();
                return self.cond_jump(OpCode::Test, inst.b(), 0, (!cond) as u32);
            }
        }
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        let reg = match e.kind {
            ExpKind::NonReloc(reg) => reg,
            _ => return Err(self.internal_error("condition not in a register")),
        };
        self.cond_jump(OpCode::TestSet, NO_REG, reg, cond as u32)
    }

    /// Fall through when `e` is true, jump (via `e.f`) when false.
    pub(super) fn go_if_true(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::K(_) | ExpKind::KNum(_) | ExpKind::True => NO_JUMP,
            ExpKind::False => self.jump()?,
            ExpKind::Jmp(pc) => {
                self.invert_jump(e);
                pc as i32
            }
            _ => self.jump_on_cond(e, false)?,
        };
        let mut f = e.f;
        self.concat(&mut f, pc)?;
        e.f = f;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    /// Fall through when `e` is false, jump (via `e.t`) when true.
    pub(super) fn go_if_false(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::Nil | ExpKind::False => NO_JUMP,
            ExpKind::True => self.jump()?,
            ExpKind::Jmp(pc) => pc as i32,
            _ => self.jump_on_cond(e, true)?,
        };
        let mut t = e.t;
        self.concat(&mut t, pc)?;
        e.t = t;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::Nil | ExpKind::False => e.kind = ExpKind::True,
            ExpKind::K(_) | ExpKind::KNum(_) | ExpKind::True => e.kind = ExpKind::False,
            ExpKind::Jmp(_) => self.invert_jump(e),
            ExpKind::Relocable(_) | ExpKind::NonReloc(_) => {
                self.discharge_to_any_reg(e)?;
                self.free_exp(e);
                let reg = match e.kind {
                    ExpKind::NonReloc(reg) => reg,
                    _ => return Err(self.internal_error("operand not in a register")),
                };
                e.kind = ExpKind::Relocable(self.code_abc(OpCode::Not, 0, reg, 0)?);
            }
            _ => return Err(self.internal_error("invalid operand for not")),
        }
        std::mem::swap(&mut e.t, &mut e.f);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    pub(super) fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> CResult<()> {
        let key = self.exp_to_rk(k)?;
        let table = match t.kind {
            ExpKind::NonReloc(reg) | ExpKind::Local(reg) => reg,
            _ => return Err(self.internal_error("indexed value not in a register")),
        };
        t.kind = ExpKind::Indexed { table, key };
        Ok(())
    }

    // ---- Operators ----

    fn const_folding(op: OpCode, e1: &mut ExpDesc, e2: &ExpDesc) -> bool {
        let (v1, v2) = match (e1.numeral(), e2.numeral()) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let r = match op {
            OpCode::Add => v1 + v2,
            OpCode::Sub => v1 - v2,
            OpCode::Mul => v1 * v2,
            OpCode::Div if v2 == 0.0 => return false,
            OpCode::Div => v1 / v2,
            OpCode::Mod if v2 == 0.0 => return false,
            OpCode::Mod => v1 - (v1 / v2).floor() * v2,
            OpCode::Pow => v1.powf(v2),
            OpCode::Unm => -v1,
            _ => return false,
        };
        if !r.is_finite() {
            return false;
        }
        e1.kind = ExpKind::KNum(r);
        true
    }

    fn code_arith(&mut self, op: OpCode, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CResult<()> {
        if Self::const_folding(op, e1, e2) {
            return Ok(());
        }
        let o2 = if op != OpCode::Unm && op != OpCode::Len {
            self.exp_to_rk(e2)?
        } else {
            0
        };
        let o1 = self.exp_to_rk(e1)?;
        if o1 > o2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
        e1.kind = ExpKind::Relocable(self.code_abc(op, 0, o1, o2)?);
        Ok(())
    }

    fn code_comp(&mut self, op: OpCode, cond: bool, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CResult<()> {
        let mut o1 = self.exp_to_rk(e1)?;
        let mut o2 = self.exp_to_rk(e2)?;
        self.free_exp(e2);
        self.free_exp(e1);
        let mut cond = cond;
        if !cond && op != OpCode::Eq {
            // a > b becomes b < a, a >= b becomes b <= a
            std::mem::swap(&mut o1, &mut o2);
            cond = true;
        }
        e1.kind = ExpKind::Jmp(self.cond_jump(op, cond as u32, o1, o2)? as usize);
        Ok(())
    }

    pub(super) fn prefix(&mut self, op: UnOp, e: &mut ExpDesc) -> CResult<()> {
        let mut e2 = ExpDesc::new(ExpKind::KNum(0.0));
        match op {
            UnOp::Neg => {
                if e.numeral().is_none() {
                    self.exp_to_any_reg(e)?;
                }
                self.code_arith(OpCode::Unm, e, &mut e2)
            }
            UnOp::Not => self.code_not(e),
            UnOp::Len => {
                self.exp_to_any_reg(e)?;
                self.code_arith(OpCode::Len, e, &mut e2)
            }
        }
    }

    /// Prepare the left operand before the right one is parsed.
    pub(super) fn infix(&mut self, op: BinOp, v: &mut ExpDesc) -> CResult<()> {
        match op {
            BinOp::And => self.go_if_true(v),
            BinOp::Or => self.go_if_false(v),
            BinOp::Concat => self.exp_to_next_reg(v),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                if v.numeral().is_none() {
                    self.exp_to_rk(v)?;
                }
                Ok(())
            }
            _ => {
                self.exp_to_rk(v)?;
                Ok(())
            }
        }
    }

    pub(super) fn posfix(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CResult<()> {
        match op {
            BinOp::And => {
                debug_assert_eq!(e1.t, NO_JUMP);
                self.discharge_vars(e2)?;
                let mut f = e2.f;
                self.concat(&mut f, e1.f)?;
                e2.f = f;
                *e1 = *e2;
                Ok(())
            }
            BinOp::Or => {
                debug_assert_eq!(e1.f, NO_JUMP);
                self.discharge_vars(e2)?;
                let mut t = e2.t;
                self.concat(&mut t, e1.t)?;
                e2.t = t;
                *e1 = *e2;
                Ok(())
            }
            BinOp::Concat => {
                self.exp_to_val(e2)?;
                if let ExpKind::Relocable(pc) = e2.kind {
                    if self.fs.proto.code[pc].opcode() == OpCode::Concat {
                        // a .. (b .. c): extend the right CONCAT downwards
                        if let ExpKind::NonReloc(r1) = e1.kind {
                            self.free_exp(e1);
                            self.instr_mut(pc).set_b(r1);
                            e1.kind = ExpKind::Relocable(pc);
                            return Ok(());
                        }
                    }
                }
                self.exp_to_next_reg(e2)?;
                self.code_arith(OpCode::Concat, e1, e2)
            }
            BinOp::Add => self.code_arith(OpCode::Add, e1, e2),
            BinOp::Sub => self.code_arith(OpCode::Sub, e1, e2),
            BinOp::Mul => self.code_arith(OpCode::Mul, e1, e2),
            BinOp::Div => self.code_arith(OpCode::Div, e1, e2),
            BinOp::Mod => self.code_arith(OpCode::Mod, e1, e2),
            BinOp::Pow => self.code_arith(OpCode::Pow, e1, e2),
            BinOp::Eq => self.code_comp(OpCode::Eq, true, e1, e2),
            BinOp::NotEq => self.code_comp(OpCode::Eq, false, e1, e2),
            BinOp::Lt => self.code_comp(OpCode::Lt, true, e1, e2),
            BinOp::LtEq => self.code_comp(OpCode::Le, true, e1, e2),
            BinOp::Gt => self.code_comp(OpCode::Lt, false, e1, e2),
            BinOp::GtEq => self.code_comp(OpCode::Le, false, e1, e2),
        }
    }

    /// Flush pending list items of a table constructor.
    pub(super) fn set_list(&mut self, base: u32, nelems: u32, tostore: i32) -> CResult<()> {
        let c = (nelems.saturating_sub(1)) / FIELDS_PER_FLUSH + 1;
        let b = if tostore == MULT_RET { 0 } else { tostore as u32 };
        if c <= MAX_C {
            self.code_abc(OpCode::SetList, base, b, c)?;
        } else {
            // batch number too large for C: stored in the next word
            self.code_abc(OpCode::SetList, base, b, 0)?;
            self.code(Instruction(c))?;
        }
        self.fs.free_reg = base + 1;
        Ok(())
    }

    /// Patch NEWTABLE size hints once the constructor is complete.
    pub(super) fn set_table_size(&mut self, pc: usize, narray: u32, nhash: u32) {
        let inst = self.instr_mut(pc);
        inst.set_b(int2fb(narray));
        inst.set_c(int2fb(nhash));
    }
}
