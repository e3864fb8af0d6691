/// Single-pass compiler: source → Proto bytecode.
///
/// There is no syntax tree. The parser calls straight into the code
/// generator, which narrows expression descriptors toward registers as the
/// surrounding context becomes known.
pub mod code;
pub mod expr;
pub mod scope;
pub mod stat;

use crate::lexer::{LexError, Lexer};
use crate::opcode::NO_JUMP;
use crate::proto::{chunk_id, Proto};
use crate::token::Token;
use moonlet_core::string::{StringId, StringInterner};
use scope::BlockCnt;
use std::collections::HashMap;

/// Maximum nesting of syntactic constructs.
pub const MAX_SYNTAX_DEPTH: u32 = 200;

/// Compile error: lexical or syntactic, fatal to the whole chunk.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{chunk}:{line}: {message}")]
pub struct CompileError {
    /// Message including the `near '...'` context when there is one.
    pub message: String,
    pub chunk: String,
    pub line: u32,
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        let message = match &e.near {
            Some(near) => format!("{} near '{near}'", e.message),
            None => e.message.clone(),
        };
        CompileError {
            message,
            chunk: e.chunk,
            line: e.line,
        }
    }
}

pub(crate) type CResult<T> = Result<T, CompileError>;

/// Constant-table dedup key. Numbers are keyed by bit pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ConstKey {
    Nil,
    Bool(bool),
    Num(u64),
    Str(StringId),
}

/// Compile-time state of one function.
pub(crate) struct FuncState {
    proto: Proto,
    k_cache: HashMap<ConstKey, u32>,
    blocks: Vec<BlockCnt>,
    /// pc of the last jump target, -1 if none.
    last_target: i32,
    /// Jumps pending to the next emitted instruction.
    jpc: i32,
    free_reg: u32,
    /// Number of active locals.
    nactvar: u32,
    /// `proto.local_vars` index of each declared local, active ones first.
    actvar: Vec<u32>,
}

impl FuncState {
    fn new(source: &str, line_defined: u32) -> Self {
        let mut proto = Proto::new(source);
        proto.line_defined = line_defined;
        FuncState {
            proto,
            k_cache: HashMap::new(),
            blocks: Vec::new(),
            last_target: -1,
            jpc: NO_JUMP,
            free_reg: 0,
            nactvar: 0,
            actvar: Vec::new(),
        }
    }
}

/// The compiler: holds the lexer and the chain of function states. The
/// innermost function is `fs`; `enclosing` holds its parents, outermost
/// first.
pub struct Compiler<'a> {
    lexer: Lexer<'a>,
    fs: FuncState,
    enclosing: Vec<FuncState>,
    source_name: String,
    depth: u32,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a [u8], chunk_name: &str, strings: &'a mut StringInterner) -> Self {
        Compiler {
            lexer: Lexer::new(source, chunk_name, strings),
            fs: FuncState::new(chunk_name, 0),
            enclosing: Vec::new(),
            source_name: chunk_name.to_string(),
            depth: 0,
        }
    }

    // ---- Errors ----

    /// Syntax error at the current token.
    fn syntax_error(&self, msg: &str) -> CompileError {
        CompileError {
            message: format!("{msg} near '{}'", self.lexer.near_text()),
            chunk: self.lexer.chunk().to_string(),
            line: self.lexer.line(),
        }
    }

    fn plain_error(&self, msg: String) -> CompileError {
        CompileError {
            message: msg,
            chunk: self.lexer.chunk().to_string(),
            line: self.lexer.line(),
        }
    }

    fn error_limit(&self, limit: u32, what: &str) -> CompileError {
        scope::limit_error(
            self.fs.proto.line_defined,
            limit,
            what,
            self.lexer.chunk(),
            self.lexer.line(),
        )
    }

    fn internal_error(&self, msg: &str) -> CompileError {
        self.plain_error(format!("internal compiler error: {msg}"))
    }

    // ---- Token helpers ----

    fn token(&self) -> CResult<&Token> {
        Ok(&self.lexer.current()?.token)
    }

    fn next(&mut self) -> CResult<()> {
        self.lexer.advance()?;
        Ok(())
    }

    fn is(&self, tok: &Token) -> CResult<bool> {
        Ok(self.token()? == tok)
    }

    fn test_next(&mut self, tok: &Token) -> CResult<bool> {
        if self.is(tok)? {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn error_expected(&self, tok: &Token) -> CompileError {
        self.syntax_error(&format!("'{}' expected", token_name(tok)))
    }

    fn check(&self, tok: &Token) -> CResult<()> {
        if self.is(tok)? {
            Ok(())
        } else {
            Err(self.error_expected(tok))
        }
    }

    fn check_next(&mut self, tok: &Token) -> CResult<()> {
        self.check(tok)?;
        self.next()
    }

    /// Expect `what` closing a construct opened by `who` at line `line`.
    fn check_match(&mut self, what: &Token, who: &Token, line: u32) -> CResult<()> {
        if self.test_next(what)? {
            return Ok(());
        }
        if line == self.lexer.line() {
            Err(self.error_expected(what))
        } else {
            Err(self.syntax_error(&format!(
                "'{}' expected (to close '{}' at line {line})",
                token_name(what),
                token_name(who)
            )))
        }
    }

    fn str_check_name(&mut self) -> CResult<StringId> {
        match self.token()? {
            Token::Name(id) => {
                let id = *id;
                self.next()?;
                Ok(id)
            }
            _ => Err(self.syntax_error("<name> expected")),
        }
    }

    fn enter_level(&mut self) -> CResult<()> {
        self.depth += 1;
        if self.depth > MAX_SYNTAX_DEPTH {
            return Err(self.plain_error("chunk has too many syntax levels".to_string()));
        }
        Ok(())
    }

    fn leave_level(&mut self) {
        self.depth -= 1;
    }
}

fn token_name(tok: &Token) -> String {
    match tok {
        Token::Name(_) => "<name>".to_string(),
        Token::String(_) => "<string>".to_string(),
        Token::Number(_) => "<number>".to_string(),
        other => other.to_string(),
    }
}

/// Compile a chunk into its main function prototype.
///
/// `chunk_name` follows the usual convention: `=name` for a literal
/// display name, `@path` for files, otherwise the source itself.
pub fn compile(
    source: &[u8],
    chunk_name: &str,
    strings: &mut StringInterner,
) -> Result<Proto, CompileError> {
    tracing::debug!(target: "moonlet::compile", chunk = %chunk_id(chunk_name), bytes = source.len(), "compiling chunk");
    let mut c = Compiler::new(source, chunk_name, strings);
    c.fs.proto.is_vararg = true;
    let result = c.chunk().and_then(|()| c.check(&Token::Eof));
    match result {
        Ok(()) => {
            let proto = c.close_func()?;
            tracing::debug!(
                target: "moonlet::compile",
                instructions = proto.code.len(),
                functions = proto.protos.len(),
                "chunk compiled"
            );
            Ok(proto)
        }
        Err(e) => {
            tracing::debug!(target: "moonlet::compile", error = %e, "compile failed");
            Err(e)
        }
    }
}
