//! Backtracking pattern matcher used by `string.find`, `match`, `gmatch`
//! and `gsub`.
//!
//! Patterns are byte oriented: classes (`%a %c %d %l %p %s %u %w %x %z`
//! and their complements), sets, anchors, captures, position captures,
//! back-references, `%bxy` and `%f[set]`, with the quantifiers `* + - ?`.

use thiserror::Error;

/// Bounds on one match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternLimits {
    pub max_captures: usize,
    /// Nested matcher calls before giving up.
    pub max_depth: usize,
}

impl Default for PatternLimits {
    fn default() -> Self {
        PatternLimits {
            max_captures: 32,
            max_depth: 200,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("malformed pattern (ends with '%')")]
    TrailingEscape,
    #[error("malformed pattern (missing ']')")]
    UnclosedSet,
    #[error("malformed pattern (missing arguments to '%b')")]
    MissingBalanceArgs,
    #[error("missing '[' after '%f' in pattern")]
    FrontierWithoutSet,
    #[error("unfinished capture")]
    UnfinishedCapture,
    #[error("invalid pattern capture")]
    InvalidPatternCapture,
    #[error("invalid capture index")]
    InvalidCaptureIndex,
    #[error("too many captures")]
    TooManyCaptures,
    #[error("pattern too complex")]
    TooComplex,
}

/// One capture of a successful match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    /// Byte range `start..end` of the subject.
    Span(usize, usize),
    /// `()`: the 0-based position.
    Position(usize),
}

/// A successful match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Capture>,
}

impl Match {
    /// Number of values the match produces: its captures, or the whole
    /// match when there are none.
    pub fn num_values(&self) -> usize {
        self.captures.len().max(1)
    }

    /// Value `i` (0-based) in the sense of [`Match::num_values`].
    pub fn value(&self, i: usize) -> Result<Capture, PatternError> {
        if i == 0 && self.captures.is_empty() {
            return Ok(Capture::Span(self.start, self.end));
        }
        self.captures
            .get(i)
            .copied()
            .ok_or(PatternError::InvalidCaptureIndex)
    }
}

/// A checked pattern.
#[derive(Clone, Copy, Debug)]
pub struct Pattern<'p> {
    pat: &'p [u8],
    anchored: bool,
    limits: PatternLimits,
}

impl<'p> Pattern<'p> {
    /// Check `pattern` for structural errors.
    pub fn new(pattern: &'p [u8], limits: PatternLimits) -> Result<Self, PatternError> {
        let (anchored, pat) = match pattern.split_first() {
            Some((b'^', rest)) => (true, rest),
            _ => (false, pattern),
        };
        validate(pat)?;
        Ok(Pattern {
            pat,
            anchored,
            limits,
        })
    }

    /// Like [`Pattern::new`], but a leading `^` matches itself.
    pub fn unanchored(pattern: &'p [u8], limits: PatternLimits) -> Result<Self, PatternError> {
        validate(pattern)?;
        Ok(Pattern {
            pat: pattern,
            anchored: false,
            limits,
        })
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// First match at or after `init`. Anchored patterns only try `init`.
    pub fn find(&self, subject: &[u8], init: usize) -> Result<Option<Match>, PatternError> {
        let mut si = init;
        loop {
            if let Some(m) = self.match_at(subject, si)? {
                return Ok(Some(m));
            }
            si += 1;
            if self.anchored || si > subject.len() {
                return Ok(None);
            }
        }
    }

    /// Match starting exactly at `si`.
    pub fn match_at(&self, subject: &[u8], si: usize) -> Result<Option<Match>, PatternError> {
        if si > subject.len() {
            return Ok(None);
        }
        let mut state = MatchState {
            subject,
            pat: self.pat,
            caps: Vec::new(),
            depth: 0,
            limits: self.limits,
        };
        match state.do_match(si, 0)? {
            Some(end) => {
                let captures = state
                    .caps
                    .iter()
                    .map(|c| match *c {
                        CapState::Open(_) => Err(PatternError::UnfinishedCapture),
                        CapState::Closed(s, e) => Ok(Capture::Span(s, e)),
                        CapState::Position(p) => Ok(Capture::Position(p)),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(Match {
                    start: si,
                    end,
                    captures,
                }))
            }
            None => Ok(None),
        }
    }
}

/// Structural check run before matching.
fn validate(pat: &[u8]) -> Result<(), PatternError> {
    let mut depth = 0usize;
    let mut p = 0;
    while p < pat.len() {
        match pat[p] {
            b'(' => {
                depth += 1;
                p += 1;
            }
            b')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(PatternError::InvalidPatternCapture)?;
                p += 1;
            }
            b'%' => match pat.get(p + 1) {
                None => return Err(PatternError::TrailingEscape),
                Some(b'b') => {
                    if p + 3 >= pat.len() {
                        return Err(PatternError::MissingBalanceArgs);
                    }
                    p += 4;
                }
                Some(b'f') => {
                    if pat.get(p + 2) != Some(&b'[') {
                        return Err(PatternError::FrontierWithoutSet);
                    }
                    p = class_end(pat, p + 2)?;
                }
                Some(_) => p += 2,
            },
            _ => p = class_end(pat, p)?,
        }
    }
    if depth > 0 {
        return Err(PatternError::UnfinishedCapture);
    }
    Ok(())
}

/// Index just past the single-character class starting at `p`.
fn class_end(pat: &[u8], p: usize) -> Result<usize, PatternError> {
    let mut q = p + 1;
    match pat[p] {
        b'%' => {
            if q >= pat.len() {
                return Err(PatternError::TrailingEscape);
            }
            Ok(q + 1)
        }
        b'[' => {
            if pat.get(q) == Some(&b'^') {
                q += 1;
            }
            // The first character is always part of the set, so `[]]`
            // matches a bracket.
            loop {
                if q >= pat.len() {
                    return Err(PatternError::UnclosedSet);
                }
                let c = pat[q];
                q += 1;
                if c == b'%' && q < pat.len() {
                    q += 1;
                }
                if q >= pat.len() {
                    return Err(PatternError::UnclosedSet);
                }
                if pat[q] == b']' {
                    return Ok(q + 1);
                }
            }
        }
        _ => Ok(q),
    }
}

fn match_class(c: u8, class: u8) -> bool {
    let res = match class.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        b's' => matches!(c, b' ' | b'\t'..=b'\r'),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        b'z' => c == 0,
        _ => return class == c,
    };
    if class.is_ascii_uppercase() {
        !res
    } else {
        res
    }
}

/// Does `c` belong to the set `pat[p..=ec]` (`p` at `[`, `ec` at `]`)?
fn match_set(pat: &[u8], p: usize, ec: usize, c: u8) -> bool {
    let mut q = p + 1;
    let negate = pat[q] == b'^';
    if negate {
        q += 1;
    }
    while q < ec {
        if pat[q] == b'%' {
            q += 1;
            if match_class(c, pat[q]) {
                return !negate;
            }
            q += 1;
        } else if pat[q + 1] == b'-' && q + 2 < ec {
            if pat[q] <= c && c <= pat[q + 2] {
                return !negate;
            }
            q += 3;
        } else {
            if pat[q] == c {
                return !negate;
            }
            q += 1;
        }
    }
    negate
}

fn single_match(c: u8, pat: &[u8], p: usize, ep: usize) -> bool {
    match pat[p] {
        b'.' => true,
        b'%' => match_class(c, pat[p + 1]),
        b'[' => match_set(pat, p, ep - 1, c),
        lit => lit == c,
    }
}

#[derive(Clone, Copy, Debug)]
enum CapState {
    Open(usize),
    Closed(usize, usize),
    Position(usize),
}

struct MatchState<'a> {
    subject: &'a [u8],
    pat: &'a [u8],
    caps: Vec<CapState>,
    depth: usize,
    limits: PatternLimits,
}

type Step = Result<Option<usize>, PatternError>;

impl MatchState<'_> {
    fn do_match(&mut self, si: usize, pp: usize) -> Step {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(PatternError::TooComplex);
        }
        let result = self.match_body(si, pp);
        self.depth -= 1;
        result
    }

    fn match_body(&mut self, mut si: usize, mut pp: usize) -> Step {
        let pat = self.pat;
        loop {
            if pp == pat.len() {
                return Ok(Some(si));
            }
            match pat[pp] {
                b'(' => {
                    return if pat.get(pp + 1) == Some(&b')') {
                        self.start_capture(si, pp + 2, CapState::Position(si))
                    } else {
                        self.start_capture(si, pp + 1, CapState::Open(si))
                    };
                }
                b')' => return self.end_capture(si, pp + 1),
                b'$' if pp + 1 == pat.len() => {
                    return Ok((si == self.subject.len()).then_some(si));
                }
                b'%' => match pat.get(pp + 1) {
                    Some(b'b') => {
                        match self.match_balance(si, pp + 2)? {
                            Some(next) => {
                                si = next;
                                pp += 4;
                                continue;
                            }
                            None => return Ok(None),
                        }
                    }
                    Some(b'f') => {
                        pp += 2;
                        if pat.get(pp) != Some(&b'[') {
                            return Err(PatternError::FrontierWithoutSet);
                        }
                        let ep = class_end(pat, pp)?;
                        let prev = if si == 0 { 0 } else { self.subject[si - 1] };
                        let cur = self.subject.get(si).copied().unwrap_or(0);
                        if !match_set(pat, pp, ep - 1, prev) && match_set(pat, pp, ep - 1, cur) {
                            pp = ep;
                            continue;
                        }
                        return Ok(None);
                    }
                    Some(d) if d.is_ascii_digit() => {
                        match self.match_capture(si, *d)? {
                            Some(next) => {
                                si = next;
                                pp += 2;
                                continue;
                            }
                            None => return Ok(None),
                        }
                    }
                    _ => {}
                },
                _ => {}
            }

            let ep = class_end(pat, pp)?;
            let matched = si < self.subject.len() && single_match(self.subject[si], pat, pp, ep);
            match pat.get(ep) {
                Some(b'?') => {
                    if matched {
                        if let Some(end) = self.do_match(si + 1, ep + 1)? {
                            return Ok(Some(end));
                        }
                    }
                    pp = ep + 1;
                }
                Some(b'*') => return self.max_expand(si, pp, ep),
                Some(b'+') => {
                    return if matched {
                        self.max_expand(si + 1, pp, ep)
                    } else {
                        Ok(None)
                    };
                }
                Some(b'-') => return self.min_expand(si, pp, ep),
                _ => {
                    if !matched {
                        return Ok(None);
                    }
                    si += 1;
                    pp = ep;
                }
            }
        }
    }

    fn max_expand(&mut self, si: usize, pp: usize, ep: usize) -> Step {
        let mut count = 0;
        while si + count < self.subject.len()
            && single_match(self.subject[si + count], self.pat, pp, ep)
        {
            count += 1;
        }
        loop {
            if let Some(end) = self.do_match(si + count, ep + 1)? {
                return Ok(Some(end));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut si: usize, pp: usize, ep: usize) -> Step {
        loop {
            if let Some(end) = self.do_match(si, ep + 1)? {
                return Ok(Some(end));
            }
            if si < self.subject.len() && single_match(self.subject[si], self.pat, pp, ep) {
                si += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn start_capture(&mut self, si: usize, pp: usize, cap: CapState) -> Step {
        if self.caps.len() >= self.limits.max_captures {
            return Err(PatternError::TooManyCaptures);
        }
        self.caps.push(cap);
        let result = self.do_match(si, pp)?;
        if result.is_none() {
            self.caps.pop();
        }
        Ok(result)
    }

    fn end_capture(&mut self, si: usize, pp: usize) -> Step {
        let open = self.caps.iter().rposition(|c| matches!(c, CapState::Open(_)));
        let Some(l) = open else {
            return Err(PatternError::InvalidPatternCapture);
        };
        let CapState::Open(start) = self.caps[l] else {
            return Err(PatternError::InvalidPatternCapture);
        };
        self.caps[l] = CapState::Closed(start, si);
        let result = self.do_match(si, pp)?;
        if result.is_none() {
            self.caps[l] = CapState::Open(start);
        }
        Ok(result)
    }

    /// `%bxy` with `p` at `x`.
    fn match_balance(&self, si: usize, p: usize) -> Step {
        if p + 1 >= self.pat.len() {
            return Err(PatternError::MissingBalanceArgs);
        }
        let (open, close) = (self.pat[p], self.pat[p + 1]);
        if self.subject.get(si) != Some(&open) {
            return Ok(None);
        }
        let mut level = 1;
        for (i, &c) in self.subject.iter().enumerate().skip(si + 1) {
            if c == close {
                level -= 1;
                if level == 0 {
                    return Ok(Some(i + 1));
                }
            } else if c == open {
                level += 1;
            }
        }
        Ok(None)
    }

    /// Back-reference `%d`.
    fn match_capture(&self, si: usize, digit: u8) -> Step {
        let l = (digit as usize).wrapping_sub(b'1' as usize);
        let (start, end) = match self.caps.get(l) {
            Some(CapState::Closed(s, e)) => (*s, *e),
            Some(CapState::Position(_)) => return Ok(None),
            _ => return Err(PatternError::InvalidCaptureIndex),
        };
        let len = end - start;
        let rest = &self.subject[si..];
        if rest.len() >= len && rest[..len] == self.subject[start..end] {
            Ok(Some(si + len))
        } else {
            Ok(None)
        }
    }
}
