//! String library. Strings also get a shared metatable whose `__index`
//! is this table, so `s:upper()` works.

use crate::pattern::{Capture, Match, Pattern, PatternLimits};
use moonlet_core::number::format_g;
use moonlet_core::value::TValue;
use moonlet_vm::coerce;
use moonlet_vm::{LuaError, NativeContext, NativeFn, NativeOutcome};
use moonlet_vm::vm::Vm;

const STRING_FUNCS: &[(&str, NativeFn)] = &[
    ("len", native_string_len),
    ("sub", native_string_sub),
    ("upper", native_string_upper),
    ("lower", native_string_lower),
    ("rep", native_string_rep),
    ("reverse", native_string_reverse),
    ("byte", native_string_byte),
    ("char", native_string_char),
    ("format", native_string_format),
    ("find", native_string_find),
    ("match", native_string_match),
    ("gmatch", native_string_gmatch),
    ("gsub", native_string_gsub),
];

/// Characters that make a pattern more than a plain substring.
const SPECIALS: &[u8] = b"^$*+?.([%-";

/// Largest string `rep` and `format` will build.
const MAX_STRING_SIZE: usize = i32::MAX as usize;

/// Register the string library and the string metatable.
pub fn register(vm: &mut Vm) {
    let string = vm.register_lib("string", STRING_FUNCS);
    let mt = vm.gc.alloc_table(0, 1);
    let index = vm.mm_names.index;
    vm.gc
        .get_table_mut(mt)
        .raw_set_str(index, TValue::from_table(string));
    vm.type_metatables.string = Some(mt);
}

fn pattern_limits(vm: &Vm) -> PatternLimits {
    PatternLimits {
        max_captures: vm.config.pattern_max_captures,
        max_depth: vm.config.pattern_max_depth,
    }
}

/// Resolve a 1-based, possibly negative, position against `len`.
fn posrelat(pos: i64, len: usize) -> i64 {
    if pos < 0 {
        len as i64 + pos + 1
    } else {
        pos
    }
}

// ---- Simple string functions ----

fn native_string_len(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let sid = ctx.check_string(0)?;
    let len = ctx.vm.strings.get_bytes(sid).len();
    ctx.returns(&[TValue::from_number(len as f64)])
}

fn native_string_sub(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let s = ctx.check_bytes(0)?;
    let len = s.len();
    let start = posrelat(ctx.opt_integer(1, 1)?, len).max(1);
    let end = posrelat(ctx.opt_integer(2, -1)?, len).min(len as i64);
    if start > end {
        return ctx.return_str(b"");
    }
    ctx.return_str(&s[start as usize - 1..end as usize])
}

fn native_string_upper(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let s = ctx.check_bytes(0)?;
    ctx.return_str(&s.to_ascii_uppercase())
}

fn native_string_lower(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let s = ctx.check_bytes(0)?;
    ctx.return_str(&s.to_ascii_lowercase())
}

fn native_string_rep(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let s = ctx.check_bytes(0)?;
    let n = ctx.check_integer(1)?;
    if n <= 0 || s.is_empty() {
        return ctx.return_str(b"");
    }
    match s.len().checked_mul(n as usize) {
        Some(total) if total <= MAX_STRING_SIZE => ctx.return_str(&s.repeat(n as usize)),
        _ => Err(ctx.error("resulting string too large")),
    }
}

fn native_string_reverse(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let mut s = ctx.check_bytes(0)?;
    s.reverse();
    ctx.return_str(&s)
}

fn native_string_byte(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let s = ctx.check_bytes(0)?;
    let len = s.len();
    let i = ctx.opt_integer(1, 1)?;
    let start = posrelat(i, len).max(1);
    let end = posrelat(ctx.opt_integer(2, i)?, len).min(len as i64);
    if start > end {
        return Ok(NativeOutcome::Return(0));
    }
    let values: Vec<TValue> = s[start as usize - 1..end as usize]
        .iter()
        .map(|&b| TValue::from_number(b as f64))
        .collect();
    ctx.returns(&values)
}

fn native_string_char(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let mut out = Vec::with_capacity(ctx.nargs());
    for i in 0..ctx.nargs() {
        let c = ctx.check_integer(i)?;
        let byte = u8::try_from(c).map_err(|_| ctx.arg_error(i, "invalid value"))?;
        out.push(byte);
    }
    ctx.return_str(&out)
}

// ---- string.format ----

#[derive(Debug, Default)]
struct FormatSpec {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
}

impl FormatSpec {
    /// Parse flags, width and precision starting at `fmt[i]`. Returns the
    /// spec and the index of the conversion character.
    fn parse(fmt: &[u8], mut i: usize) -> Result<(FormatSpec, usize), &'static str> {
        let mut spec = FormatSpec::default();
        let flags_start = i;
        while let Some(&c) = fmt.get(i) {
            match c {
                b'-' => spec.left = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'#' => spec.alt = true,
                b'0' => spec.zero = true,
                _ => break,
            }
            i += 1;
        }
        if i - flags_start > 5 {
            return Err("invalid format (repeated flags)");
        }
        let digits = |i: &mut usize| -> Result<usize, &'static str> {
            let start = *i;
            let mut n = 0usize;
            while let Some(d) = fmt.get(*i).filter(|d| d.is_ascii_digit()) {
                n = n * 10 + (d - b'0') as usize;
                *i += 1;
            }
            if *i - start > 2 {
                return Err("invalid format (width or precision too long)");
            }
            Ok(n)
        };
        spec.width = digits(&mut i)?;
        if fmt.get(i) == Some(&b'.') {
            i += 1;
            spec.precision = Some(digits(&mut i)?);
        }
        Ok((spec, i))
    }

    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }

    /// Append `body` padded to the field width.
    fn pad(&self, out: &mut Vec<u8>, sign: &str, body: &[u8], zero_ok: bool) {
        let len = sign.len() + body.len();
        let fill = self.width.saturating_sub(len);
        if self.left {
            out.extend_from_slice(sign.as_bytes());
            out.extend_from_slice(body);
            out.resize(out.len() + fill, b' ');
        } else if self.zero && zero_ok {
            out.extend_from_slice(sign.as_bytes());
            out.resize(out.len() + fill, b'0');
            out.extend_from_slice(body);
        } else {
            out.resize(out.len() + fill, b' ');
            out.extend_from_slice(sign.as_bytes());
            out.extend_from_slice(body);
        }
    }
}

/// `1.5e5` -> `1.5e+05`.
fn c_exponent(s: &str) -> String {
    match s.split_once(['e', 'E']) {
        Some((mantissa, exp)) => {
            let e = if s.contains('E') { 'E' } else { 'e' };
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}{e}{sign}{digits:0>2}")
        }
        None => s.to_string(),
    }
}

fn format_float(spec: &FormatSpec, conv: u8, n: f64) -> String {
    if !n.is_finite() {
        let s = if n.is_nan() { "nan" } else { "inf" };
        return if conv.is_ascii_uppercase() {
            s.to_ascii_uppercase()
        } else {
            s.to_string()
        };
    }
    let prec = spec.precision.unwrap_or(6);
    match conv {
        b'f' => format!("{:.*}", prec, n.abs()),
        b'e' => c_exponent(&format!("{:.*e}", prec, n.abs())),
        b'E' => c_exponent(&format!("{:.*E}", prec, n.abs())),
        b'G' => format_g(n.abs(), prec).to_ascii_uppercase(),
        _ => format_g(n.abs(), prec),
    }
}

fn add_quoted(out: &mut Vec<u8>, s: &[u8]) {
    out.push(b'"');
    for &b in s {
        match b {
            b'"' | b'\\' | b'\n' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            0 => out.extend_from_slice(b"\\000"),
            _ => out.push(b),
        }
    }
    out.push(b'"');
}

fn native_string_format(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let fmt = ctx.check_bytes(0)?;
    let mut out = Vec::with_capacity(fmt.len());
    let mut arg = 0;
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        let (spec, at) = FormatSpec::parse(&fmt, i).map_err(|msg| ctx.error(msg))?;
        let Some(&conv) = fmt.get(at) else {
            return Err(ctx.error("invalid option '%' to 'format'"));
        };
        i = at + 1;
        arg += 1;
        match conv {
            b'd' | b'i' => {
                let n = ctx.check_number(arg)? as i64;
                let mut digits = n.unsigned_abs().to_string();
                if let Some(p) = spec.precision {
                    if digits.len() < p {
                        digits = format!("{digits:0>p$}");
                    }
                }
                spec.pad(&mut out, spec.sign(n < 0), digits.as_bytes(), spec.precision.is_none());
            }
            b'u' => {
                let n = ctx.check_number(arg)? as i64 as u64;
                spec.pad(&mut out, "", n.to_string().as_bytes(), true);
            }
            b'c' => {
                let n = ctx.check_number(arg)? as i64;
                spec.pad(&mut out, "", &[n as u8], false);
            }
            b'o' | b'x' | b'X' => {
                let n = ctx.check_number(arg)? as i64 as u64;
                let (body, prefix) = match conv {
                    b'o' => (format!("{n:o}"), "0"),
                    b'x' => (format!("{n:x}"), "0x"),
                    _ => (format!("{n:X}"), "0X"),
                };
                let prefix = if spec.alt && n != 0 { prefix } else { "" };
                spec.pad(&mut out, prefix, body.as_bytes(), true);
            }
            b'e' | b'E' | b'f' | b'g' | b'G' => {
                let n = ctx.check_number(arg)?;
                let body = format_float(&spec, conv, n);
                let negative = n.is_sign_negative() && !n.is_nan();
                spec.pad(&mut out, spec.sign(negative), body.as_bytes(), n.is_finite());
            }
            b'q' => {
                let s = ctx.check_bytes(arg)?;
                add_quoted(&mut out, &s);
            }
            b's' => {
                let s = ctx.check_bytes(arg)?;
                let s = match spec.precision {
                    Some(p) => &s[..s.len().min(p)],
                    None => &s[..],
                };
                spec.pad(&mut out, "", s, false);
            }
            other => {
                let msg = format!("invalid option '%{}' to 'format'", other as char);
                return Err(ctx.error(msg));
            }
        }
        if out.len() > MAX_STRING_SIZE {
            return Err(ctx.error("resulting string too large"));
        }
    }
    ctx.return_str(&out)
}

// ---- Pattern functions ----

fn pattern_error(ctx: &mut NativeContext<'_>, e: crate::pattern::PatternError) -> LuaError {
    ctx.error(e.to_string())
}

fn capture_value(ctx: &mut NativeContext<'_>, subject: &[u8], cap: Capture) -> TValue {
    match cap {
        Capture::Span(s, e) => ctx.vm.str_value(&subject[s..e]),
        Capture::Position(p) => TValue::from_number((p + 1) as f64),
    }
}

/// Every value a match produces (captures, or the whole match).
fn match_values(
    ctx: &mut NativeContext<'_>,
    subject: &[u8],
    m: &Match,
) -> Result<Vec<TValue>, LuaError> {
    let mut values = Vec::with_capacity(m.num_values());
    for i in 0..m.num_values() {
        let cap = m.value(i).map_err(|e| pattern_error(ctx, e))?;
        values.push(capture_value(ctx, subject, cap));
    }
    Ok(values)
}

fn find_plain(subject: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from);
    }
    subject[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn str_find_aux(ctx: &mut NativeContext<'_>, find: bool) -> Result<NativeOutcome, LuaError> {
    let subject = ctx.check_bytes(0)?;
    let pat = ctx.check_bytes(1)?;
    let len = subject.len();
    // An init past the end still lets an empty pattern match at `#s + 1`.
    let init = posrelat(ctx.opt_integer(2, 1)?, len).clamp(1, len as i64 + 1) as usize - 1;

    let plain = ctx.arg(3).is_truthy() || !pat.iter().any(|c| SPECIALS.contains(c));
    if find && plain {
        return match find_plain(&subject, &pat, init) {
            Some(start) => ctx.returns(&[
                TValue::from_number((start + 1) as f64),
                TValue::from_number((start + pat.len()) as f64),
            ]),
            None => ctx.returns(&[TValue::nil()]),
        };
    }

    let limits = pattern_limits(ctx.vm);
    let pattern = Pattern::new(&pat, limits).map_err(|e| pattern_error(ctx, e))?;
    let found = pattern
        .find(&subject, init)
        .map_err(|e| pattern_error(ctx, e))?;
    let Some(m) = found else {
        return ctx.returns(&[TValue::nil()]);
    };
    if find {
        let mut values = vec![
            TValue::from_number((m.start + 1) as f64),
            TValue::from_number(m.end as f64),
        ];
        for &cap in &m.captures {
            values.push(capture_value(ctx, &subject, cap));
        }
        ctx.returns(&values)
    } else {
        let values = match_values(ctx, &subject, &m)?;
        ctx.returns(&values)
    }
}

fn native_string_find(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    str_find_aux(ctx, true)
}

fn native_string_match(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    str_find_aux(ctx, false)
}

/// Iteration state behind a `gmatch` iterator.
struct GmatchState {
    subject: Vec<u8>,
    pattern: Vec<u8>,
    pos: usize,
}

fn native_string_gmatch(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let subject = ctx.check_bytes(0)?;
    let pattern = ctx.check_bytes(1)?;
    let limits = pattern_limits(ctx.vm);
    Pattern::unanchored(&pattern, limits).map_err(|e| pattern_error(ctx, e))?;
    let state = ctx.vm.new_userdata(Box::new(GmatchState {
        subject,
        pattern,
        pos: 0,
    }));
    let iter = ctx
        .vm
        .register_native_with_upvalue("gmatch_iter", native_gmatch_iter, state);
    ctx.returns(&[iter])
}

fn native_gmatch_iter(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let Some(idx) = ctx.upvalue().as_userdata_idx() else {
        return Err(LuaError::Internal("gmatch iterator lost its state".into()));
    };
    let limits = pattern_limits(ctx.vm);
    let Some(state) = ctx.vm.gc.get_userdata_mut(idx).data.downcast_mut::<GmatchState>() else {
        return Err(LuaError::Internal("gmatch state has the wrong type".into()));
    };
    // Moved out and back so the subject is never copied per call.
    let subject = std::mem::take(&mut state.subject);
    let pat = std::mem::take(&mut state.pattern);
    let start = state.pos;

    let step = gmatch_step(ctx, &subject, &pat, start, limits);
    if let Some(state) = ctx.vm.gc.get_userdata_mut(idx).data.downcast_mut::<GmatchState>() {
        state.subject = subject;
        state.pattern = pat;
        if let Ok((next, _)) = &step {
            state.pos = *next;
        }
    }
    let (_, values) = step?;
    ctx.returns(&values)
}

/// Find the next match at or after `start`. A leading `^` is an ordinary
/// character here. Returns the resume position and the iterator results.
fn gmatch_step(
    ctx: &mut NativeContext<'_>,
    subject: &[u8],
    pat: &[u8],
    start: usize,
    limits: PatternLimits,
) -> Result<(usize, Vec<TValue>), LuaError> {
    let pattern = Pattern::unanchored(pat, limits).map_err(|e| pattern_error(ctx, e))?;
    for src in start..=subject.len() {
        let found = pattern
            .match_at(subject, src)
            .map_err(|e| pattern_error(ctx, e))?;
        if let Some(m) = found {
            // An empty match advances one position.
            let next = if m.end == m.start { m.end + 1 } else { m.end };
            return Ok((next, match_values(ctx, subject, &m)?));
        }
    }
    Ok((subject.len() + 1, vec![TValue::nil()]))
}

/// Append the replacement for match `m` to `out`.
fn add_value(
    ctx: &mut NativeContext<'_>,
    out: &mut Vec<u8>,
    subject: &[u8],
    m: &Match,
    repl: TValue,
) -> Result<(), LuaError> {
    let whole = &subject[m.start..m.end];
    if repl.is_string() || repl.is_number() {
        let sid = coerce::to_string_for_concat(repl, &mut ctx.vm.strings)
            .ok_or_else(|| LuaError::Internal("replacement lost its string form".into()))?;
        let news = ctx.vm.strings.get_bytes(sid).to_vec();
        let mut i = 0;
        while i < news.len() {
            let c = news[i];
            i += 1;
            if c != b'%' {
                out.push(c);
                continue;
            }
            match news.get(i) {
                Some(b'0') => out.extend_from_slice(whole),
                Some(d) if d.is_ascii_digit() => {
                    let cap = m
                        .value((d - b'1') as usize)
                        .map_err(|e| pattern_error(ctx, e))?;
                    match cap {
                        Capture::Span(s, e) => out.extend_from_slice(&subject[s..e]),
                        Capture::Position(p) => out.extend_from_slice((p + 1).to_string().as_bytes()),
                    }
                }
                Some(&other) => out.push(other),
                None => out.push(b'%'),
            }
            i += 1;
        }
        return Ok(());
    }

    let first = m.value(0).map_err(|e| pattern_error(ctx, e))?;
    let key = capture_value(ctx, subject, first);
    let value = if let Some(t) = repl.as_table_idx() {
        ctx.vm.gc.get_table(t).raw_get(key)
    } else {
        let args = match_values(ctx, subject, m)?;
        ctx.call(repl, &args)?.first().copied().unwrap_or_default()
    };
    if value.is_falsy() {
        out.extend_from_slice(whole);
    } else if let Some(sid) = coerce::to_string_for_concat(value, &mut ctx.vm.strings) {
        out.extend_from_slice(ctx.vm.strings.get_bytes(sid));
    } else {
        let msg = format!(
            "invalid replacement value (a {})",
            moonlet_core::object::lua_type_name(value)
        );
        return Err(ctx.error(msg));
    }
    Ok(())
}

fn native_string_gsub(ctx: &mut NativeContext<'_>) -> Result<NativeOutcome, LuaError> {
    let subject = ctx.check_bytes(0)?;
    let pat = ctx.check_bytes(1)?;
    let repl = ctx.arg(2);
    if !(repl.is_string() || repl.is_number() || repl.is_table() || repl.is_function()) {
        return Err(ctx.arg_error(2, "string/function/table expected"));
    }
    let max_n = ctx.opt_integer(3, subject.len() as i64 + 1)?;

    let limits = pattern_limits(ctx.vm);
    let pattern = Pattern::new(&pat, limits).map_err(|e| pattern_error(ctx, e))?;
    let mut out = Vec::with_capacity(subject.len());
    let mut src = 0;
    let mut n = 0i64;
    while n < max_n {
        let found = pattern
            .match_at(&subject, src)
            .map_err(|e| pattern_error(ctx, e))?;
        let end = match found {
            Some(m) => {
                n += 1;
                add_value(ctx, &mut out, &subject, &m, repl)?;
                Some(m.end)
            }
            None => None,
        };
        match end {
            Some(e) if e > src => src = e,
            _ if src < subject.len() => {
                out.push(subject[src]);
                src += 1;
            }
            _ => break,
        }
        if pattern.is_anchored() {
            break;
        }
    }
    out.extend_from_slice(&subject[src..]);
    let s = ctx.vm.str_value(&out);
    ctx.returns(&[s, TValue::from_number(n as f64)])
}
