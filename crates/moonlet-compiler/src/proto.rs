/// Function prototype: holds compiled bytecode, constants, and debug info.
use crate::opcode::Instruction;
use moonlet_core::string::StringId;

/// Display budget for chunk ids, decoration included.
pub const CHUNK_ID_SIZE: usize = 60;

/// A constant value in the constant pool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(StringId),
}

/// Where a closure finds one of its upvalues when it is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpvalSource {
    /// A register of the enclosing function.
    Local(u8),
    /// An upvalue of the enclosing function.
    Upvalue(u8),
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpvalDesc {
    pub name: StringId,
    pub source: UpvalSource,
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVar {
    pub name: StringId,
    /// First PC where the variable is active.
    pub start_pc: u32,
    /// First PC where the variable is dead.
    pub end_pc: u32,
}

/// A compiled function prototype. Immutable once the compiler returns it.
#[derive(Clone, Debug, PartialEq)]
pub struct Proto {
    pub code: Vec<Instruction>,
    /// Source line of each instruction; same length as `code`.
    pub line_info: Vec<u32>,
    pub constants: Vec<Constant>,
    pub protos: Vec<Proto>,
    pub upvalues: Vec<UpvalDesc>,
    pub local_vars: Vec<LocalVar>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    /// Raw chunk name (`=name`, `@file` or source text).
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
}

impl Proto {
    pub fn new(source: &str) -> Self {
        Proto {
            code: Vec::new(),
            line_info: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            local_vars: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2, // minimum
            source: source.to_string(),
            line_defined: 0,
            last_line_defined: 0,
        }
    }

    /// Emit an instruction at the given source line.
    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.line_info.push(line);
        pc
    }

    /// Line number for a given PC, 0 when unknown.
    pub fn get_line(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Name of the `n`-th (1-based) local active at `pc`, if any.
    pub fn local_name(&self, n: usize, pc: u32) -> Option<StringId> {
        self.local_vars
            .iter()
            .filter(|v| v.start_pc <= pc && pc < v.end_pc)
            .nth(n.checked_sub(1)?)
            .map(|v| v.name)
    }

    /// The display form of this prototype's chunk name.
    pub fn chunk_id(&self) -> String {
        chunk_id(&self.source)
    }
}

/// Render a chunk name for diagnostics.
///
/// `=name` is shown verbatim without the `=`, `@file` as the file name
/// (keeping its tail when too long), anything else as
/// `[string "first line..."]`.
pub fn chunk_id(source: &str) -> String {
    if let Some(rest) = source.strip_prefix('=') {
        return truncate_chars(rest, CHUNK_ID_SIZE - 1).to_string();
    }
    if let Some(rest) = source.strip_prefix('@') {
        let budget = CHUNK_ID_SIZE - " '...' ".len() - 1;
        if rest.len() > budget {
            let mut start = rest.len() - budget;
            while !rest.is_char_boundary(start) {
                start += 1;
            }
            return format!("...{}", &rest[start..]);
        }
        return rest.to_string();
    }
    let budget = CHUNK_ID_SIZE - " [string \"...\"] ".len() - 1;
    let first_line = source.split(['\n', '\r']).next().unwrap_or("");
    let shown = truncate_chars(first_line, budget);
    if shown.len() < source.len() {
        format!("[string \"{shown}...\"]")
    } else {
        format!("[string \"{shown}\"]")
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
