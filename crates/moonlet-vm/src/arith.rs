//! Arithmetic on numbers.

use crate::coerce;
use moonlet_core::string::StringInterner;
use moonlet_core::value::TValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

/// Apply `op` to two numbers.
pub fn arith_num(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => lua_mod(a, b),
        ArithOp::Pow => a.powf(b),
        ArithOp::Unm => -a,
    }
}

/// `a - floor(a / b) * b`; the result takes the sign of the divisor.
pub fn lua_mod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

/// Raw arithmetic with string coercion. `None` means a metamethod is needed.
pub fn arith_op(op: ArithOp, a: TValue, b: TValue, strings: &StringInterner) -> Option<TValue> {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Some(TValue::from_number(arith_num(op, x, y)));
    }
    let x = coerce::to_number(a, strings)?;
    let y = coerce::to_number(b, strings)?;
    Some(TValue::from_number(arith_num(op, x, y)))
}
