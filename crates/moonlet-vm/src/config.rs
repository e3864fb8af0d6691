//! Runtime limits.

use serde::Deserialize;

/// Limits applied by the interpreter. Every field has a default, so a
/// partial TOML table is enough to override a single limit.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Lua call frames per thread before `stack overflow`.
    pub max_call_depth: usize,
    /// Nested native re-entries before `C stack overflow`. Each one nests
    /// the dispatch loop on the Rust stack.
    pub max_native_depth: usize,
    /// `__index` / `__newindex` hops before the lookup is abandoned.
    pub max_index_chain: usize,
    /// Value-stack slots per thread.
    pub max_stack_slots: usize,
    /// Open plus closed captures per pattern match.
    pub pattern_max_captures: usize,
    /// Recursion depth of the pattern matcher.
    pub pattern_max_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 200,
            max_native_depth: 32,
            max_index_chain: 100,
            max_stack_slots: 1_000_000,
            pattern_max_captures: 32,
            pattern_max_depth: 200,
        }
    }
}
