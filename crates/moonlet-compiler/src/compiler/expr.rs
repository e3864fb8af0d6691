//! Expression descriptors, operator tables and expression parsing.

use super::code::MULT_RET;
use super::{CResult, Compiler};
use crate::opcode::{OpCode, FIELDS_PER_FLUSH, NO_JUMP};
use crate::token::Token;

/// Describes where an expression's value currently lives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExpKind {
    /// No value (empty expression list).
    Void,
    Nil,
    True,
    False,
    /// Constant pool entry.
    K(u32),
    /// Numeric literal not yet in the constant pool.
    KNum(f64),
    /// Active local in a fixed register.
    Local(u32),
    Upval(u32),
    /// Global name; payload is the name's constant index.
    Global(u32),
    /// `table[key]` with the table in a register and the key as an RK operand.
    Indexed { table: u32, key: u32 },
    /// Result of a comparison; payload is the pc of its jump.
    Jmp(usize),
    /// Instruction at pc whose destination register is not yet set.
    Relocable(usize),
    /// Value in a register that is not a local's home.
    NonReloc(u32),
    /// Open function call at pc.
    Call(usize),
    /// `...` at pc.
    VarArg(usize),
}

/// An expression being compiled plus its pending true/false jump lists.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpDesc {
    pub kind: ExpKind,
    /// Jumps taken when the expression is true.
    pub t: i32,
    /// Jumps taken when the expression is false.
    pub f: i32,
}

impl ExpDesc {
    pub fn new(kind: ExpKind) -> Self {
        ExpDesc {
            kind,
            t: NO_JUMP,
            f: NO_JUMP,
        }
    }

    pub fn void() -> Self {
        Self::new(ExpKind::Void)
    }

    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    /// A numeric literal with no pending jumps.
    pub fn numeral(&self) -> Option<f64> {
        match self.kind {
            ExpKind::KNum(n) if !self.has_jumps() => Some(n),
            _ => None,
        }
    }

    pub fn has_multret(&self) -> bool {
        matches!(self.kind, ExpKind::Call(_) | ExpKind::VarArg(_))
    }

    /// Kinds that can appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExpKind::Local(_) | ExpKind::Upval(_) | ExpKind::Global(_) | ExpKind::Indexed { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

impl BinOp {
    pub fn from_token(tok: &Token) -> Option<BinOp> {
        Some(match tok {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
            Token::Caret => BinOp::Pow,
            Token::DotDot => BinOp::Concat,
            Token::Equal => BinOp::Eq,
            Token::NotEqual => BinOp::NotEq,
            Token::Less => BinOp::Lt,
            Token::LessEq => BinOp::LtEq,
            Token::Greater => BinOp::Gt,
            Token::GreaterEq => BinOp::GtEq,
            Token::And => BinOp::And,
            Token::Or => BinOp::Or,
            _ => return None,
        })
    }

    /// (left priority, right priority). Right-associative operators bind
    /// less tightly on their right.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq | BinOp::NotEq | BinOp::Eq => (3, 3),
            BinOp::Concat => (5, 4),
            BinOp::Add | BinOp::Sub => (6, 6),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (7, 7),
            BinOp::Pow => (10, 9),
        }
    }
}

impl UnOp {
    pub fn from_token(tok: &Token) -> Option<UnOp> {
        match tok {
            Token::Not => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            Token::Hash => Some(UnOp::Len),
            _ => None,
        }
    }
}

/// Priority of unary operators.
pub const UNARY_PRIORITY: u8 = 8;

/// Pending state of a table constructor.
struct ConsControl {
    /// Last list item read, not yet stored.
    v: ExpDesc,
    /// Register holding the table.
    table: u32,
    /// Hash fields seen.
    nh: u32,
    /// Array items seen.
    na: u32,
    /// Array items pending a SETLIST.
    tostore: i32,
}

impl Compiler<'_> {
    pub(super) fn expr(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.subexpr(v, 0)?;
        Ok(())
    }

    /// Parse `subexpr { binop subexpr }` where every binary operator binds
    /// tighter than `limit`. Returns the first operator not consumed.
    fn subexpr(&mut self, v: &mut ExpDesc, limit: u8) -> CResult<Option<BinOp>> {
        self.enter_level()?;
        if let Some(uop) = UnOp::from_token(self.token()?) {
            self.next()?;
            self.subexpr(v, UNARY_PRIORITY)?;
            self.prefix(uop, v)?;
        } else {
            self.simple_exp(v)?;
        }
        let mut op = BinOp::from_token(self.token()?);
        while let Some(o) = op {
            let (left, right) = o.priority();
            if left <= limit {
                break;
            }
            self.next()?;
            self.infix(o, v)?;
            let mut v2 = ExpDesc::void();
            let next_op = self.subexpr(&mut v2, right)?;
            self.posfix(o, v, &mut v2)?;
            op = next_op;
        }
        self.leave_level();
        Ok(op)
    }

    fn simple_exp(&mut self, v: &mut ExpDesc) -> CResult<()> {
        let kind = match self.token()? {
            Token::Number(n) => ExpKind::KNum(*n),
            Token::String(s) => {
                let s = *s;
                ExpKind::K(self.string_k(s)?)
            }
            Token::Nil => ExpKind::Nil,
            Token::True => ExpKind::True,
            Token::False => ExpKind::False,
            Token::DotDotDot => {
                if !self.fs.proto.is_vararg {
                    return Err(self.syntax_error("cannot use '...' outside a vararg function"));
                }
                ExpKind::VarArg(self.code_abc(OpCode::VarArg, 0, 1, 0)?)
            }
            Token::LBrace => return self.constructor(v),
            Token::Function => {
                let line = self.lexer.line();
                self.next()?;
                return self.body(v, false, line);
            }
            _ => return self.primary_exp(v),
        };
        *v = ExpDesc::new(kind);
        self.next()
    }

    fn prefix_exp(&mut self, v: &mut ExpDesc) -> CResult<()> {
        match self.token()? {
            Token::LParen => {
                let line = self.lexer.line();
                self.next()?;
                self.expr(v)?;
                self.check_match(&Token::RParen, &Token::LParen, line)?;
                self.discharge_vars(v)
            }
            Token::Name(name) => {
                let name = *name;
                self.next()?;
                *v = self.single_var(name)?;
                Ok(())
            }
            _ => Err(self.syntax_error("unexpected symbol")),
        }
    }

    /// `prefixexp { '.' NAME | '[' exp ']' | ':' NAME funcargs | funcargs }`
    pub(super) fn primary_exp(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.prefix_exp(v)?;
        loop {
            match self.token()? {
                Token::Dot => self.field(v)?,
                Token::LBracket => {
                    self.exp_to_any_reg(v)?;
                    let mut key = self.yindex()?;
                    self.indexed(v, &mut key)?;
                }
                Token::Colon => {
                    self.next()?;
                    let mut key = self.check_name()?;
                    self.code_self(v, &mut key)?;
                    self.func_args(v)?;
                }
                Token::LParen | Token::String(_) | Token::LBrace => {
                    self.exp_to_next_reg(v)?;
                    self.func_args(v)?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// `'.' NAME` applied to `v`.
    pub(super) fn field(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.exp_to_any_reg(v)?;
        self.next()?;
        let mut key = self.check_name()?;
        self.indexed(v, &mut key)
    }

    /// A name as a string constant.
    pub(super) fn check_name(&mut self) -> CResult<ExpDesc> {
        let name = self.str_check_name()?;
        Ok(ExpDesc::new(ExpKind::K(self.string_k(name)?)))
    }

    /// `'[' exp ']'`
    fn yindex(&mut self) -> CResult<ExpDesc> {
        self.next()?;
        let mut key = ExpDesc::void();
        self.expr(&mut key)?;
        self.exp_to_val(&mut key)?;
        self.check_next(&Token::RBracket)?;
        Ok(key)
    }

    /// Parse an expression list, leaving all but the last value in
    /// consecutive registers. Returns the number of expressions.
    pub(super) fn exp_list(&mut self, v: &mut ExpDesc) -> CResult<u32> {
        let mut n = 1;
        self.expr(v)?;
        while self.test_next(&Token::Comma)? {
            self.exp_to_next_reg(v)?;
            self.expr(v)?;
            n += 1;
        }
        Ok(n)
    }

    fn func_args(&mut self, f: &mut ExpDesc) -> CResult<()> {
        let line = self.lexer.line();
        let mut args = ExpDesc::void();
        match self.token()? {
            Token::LParen => {
                if line != self.lexer.lastline {
                    return Err(self.syntax_error("ambiguous syntax (function call x new statement)"));
                }
                self.next()?;
                if !self.is(&Token::RParen)? {
                    self.exp_list(&mut args)?;
                    self.set_mult_ret(&mut args)?;
                }
                self.check_match(&Token::RParen, &Token::LParen, line)?;
            }
            Token::LBrace => self.constructor(&mut args)?,
            Token::String(s) => {
                let s = *s;
                args = ExpDesc::new(ExpKind::K(self.string_k(s)?));
                self.next()?;
            }
            _ => return Err(self.syntax_error("function arguments expected")),
        }
        let base = match f.kind {
            ExpKind::NonReloc(reg) => reg,
            _ => return Err(self.internal_error("call target not in a register")),
        };
        let nparams = if args.has_multret() {
            MULT_RET
        } else {
            if args.kind != ExpKind::Void {
                self.exp_to_next_reg(&mut args)?;
            }
            (self.fs.free_reg - (base + 1)) as i32
        };
        let pc = self.code_abc(OpCode::Call, base, (nparams + 1) as u32, 2)?;
        *f = ExpDesc::new(ExpKind::Call(pc));
        self.fix_line(line);
        // the call leaves one result in `base`
        self.fs.free_reg = base + 1;
        Ok(())
    }

    // ---- Table constructors ----

    fn constructor(&mut self, t: &mut ExpDesc) -> CResult<()> {
        let line = self.lexer.line();
        let pc = self.code_abc(OpCode::NewTable, 0, 0, 0)?;
        *t = ExpDesc::new(ExpKind::Relocable(pc));
        self.exp_to_next_reg(t)?;
        let table = match t.kind {
            ExpKind::NonReloc(reg) => reg,
            _ => return Err(self.internal_error("table not in a register")),
        };
        let mut cc = ConsControl {
            v: ExpDesc::void(),
            table,
            nh: 0,
            na: 0,
            tostore: 0,
        };
        self.check_next(&Token::LBrace)?;
        loop {
            if self.is(&Token::RBrace)? {
                break;
            }
            self.close_list_field(&mut cc)?;
            match self.token()? {
                Token::Name(_) => {
                    if *self.lexer.peek_ahead()? == Token::Assign {
                        self.rec_field(&mut cc)?;
                    } else {
                        self.list_field(&mut cc)?;
                    }
                }
                Token::LBracket => self.rec_field(&mut cc)?,
                _ => self.list_field(&mut cc)?,
            }
            if !(self.test_next(&Token::Comma)? || self.test_next(&Token::Semi)?) {
                break;
            }
        }
        self.check_match(&Token::RBrace, &Token::LBrace, line)?;
        self.last_list_field(&mut cc)?;
        self.set_table_size(pc, cc.na, cc.nh);
        Ok(())
    }

    fn close_list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        if cc.v.kind == ExpKind::Void {
            return Ok(());
        }
        self.exp_to_next_reg(&mut cc.v)?;
        cc.v = ExpDesc::void();
        if cc.tostore == FIELDS_PER_FLUSH as i32 {
            self.set_list(cc.table, cc.na, cc.tostore)?;
            cc.tostore = 0;
        }
        Ok(())
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        if cc.tostore == 0 {
            return Ok(());
        }
        if cc.v.has_multret() {
            self.set_mult_ret(&mut cc.v)?;
            self.set_list(cc.table, cc.na, MULT_RET)?;
            // the open item is not counted in the size hint
            cc.na -= 1;
        } else {
            if cc.v.kind != ExpKind::Void {
                self.exp_to_next_reg(&mut cc.v)?;
            }
            self.set_list(cc.table, cc.na, cc.tostore)?;
        }
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        self.expr(&mut cc.v)?;
        cc.na += 1;
        cc.tostore += 1;
        Ok(())
    }

    fn rec_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        let reg = self.fs.free_reg;
        let mut key = if matches!(self.token()?, Token::Name(_)) {
            self.check_name()?
        } else {
            self.yindex()?
        };
        cc.nh += 1;
        self.check_next(&Token::Assign)?;
        let rk_key = self.exp_to_rk(&mut key)?;
        let mut val = ExpDesc::void();
        self.expr(&mut val)?;
        let rk_val = self.exp_to_rk(&mut val)?;
        self.code_abc(OpCode::SetTable, cc.table, rk_key, rk_val)?;
        self.fs.free_reg = reg;
        Ok(())
    }

    // ---- Function bodies ----

    /// `'(' parlist ')' chunk END`, leaving the closure in `e`.
    pub(super) fn body(&mut self, e: &mut ExpDesc, is_method: bool, line: u32) -> CResult<()> {
        self.open_func(line);
        self.check_next(&Token::LParen)?;
        if is_method {
            self.new_local_var_str("self", 0)?;
            self.adjust_local_vars(1);
        }
        self.par_list()?;
        self.check_next(&Token::RParen)?;
        self.chunk()?;
        self.fs.proto.last_line_defined = self.lexer.line();
        self.check_match(&Token::End, &Token::Function, line)?;
        let proto = self.close_func()?;
        self.push_closure(proto, e)
    }

    fn par_list(&mut self) -> CResult<()> {
        let mut nparams = 0;
        let mut is_vararg = false;
        if !self.is(&Token::RParen)? {
            loop {
                match self.token()? {
                    Token::Name(_) => {
                        let name = self.str_check_name()?;
                        self.new_local_var(name, nparams)?;
                        nparams += 1;
                    }
                    Token::DotDotDot => {
                        self.next()?;
                        is_vararg = true;
                    }
                    _ => return Err(self.syntax_error("<name> or '...' expected")),
                }
                if is_vararg || !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        self.adjust_local_vars(nparams);
        self.fs.proto.num_params = self.fs.nactvar as u8;
        self.fs.proto.is_vararg = is_vararg;
        self.reserve_regs(self.fs.nactvar)
    }
}
