use crate::proto::chunk_id;
use crate::token::{Span, SpannedToken, Token};
use moonlet_core::number::str_to_number;
use moonlet_core::string::{StringId, StringInterner};

/// Lexical error, rendered as `chunk:line: message near 'token'`.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{chunk}:{line}: {message}{}", render_near(.near))]
pub struct LexError {
    pub message: String,
    /// Display form of the chunk name.
    pub chunk: String,
    pub line: u32,
    /// Rendered text of the offending token.
    pub near: Option<String>,
}

fn render_near(near: &Option<String>) -> String {
    match near {
        Some(text) => format!(" near '{text}'"),
        None => String::new(),
    }
}

/// A scanned token plus the byte range it came from.
struct Scanned {
    tok: Result<SpannedToken, LexError>,
    start: usize,
    end: usize,
}

/// Pull-based lexer with one token of lookahead.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    chunk: String,
    strings: &'a mut StringInterner,
    current: Scanned,
    ahead: Option<Scanned>,
    /// Line number of the last consumed token.
    pub lastline: u32,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over `source`. `chunk_name` is the raw chunk name
    /// (`=name`, `@file` or source text) used in diagnostics.
    pub fn new(source: &'a [u8], chunk_name: &str, strings: &'a mut StringInterner) -> Self {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            chunk: chunk_id(chunk_name),
            strings,
            current: Scanned {
                tok: Ok(SpannedToken {
                    token: Token::Eof,
                    span: Span { line: 1, column: 1 },
                }),
                start: 0,
                end: 0,
            },
            ahead: None,
            lastline: 1,
        };
        lexer.skip_shebang();
        lexer.current = lexer.scan();
        lexer
    }

    /// Peek at the current token without consuming.
    pub fn current(&self) -> Result<&SpannedToken, LexError> {
        self.current.tok.as_ref().map_err(Clone::clone)
    }

    /// Consume the current token and advance to the next one.
    pub fn advance(&mut self) -> Result<SpannedToken, LexError> {
        if let Ok(tok) = &self.current.tok {
            self.lastline = tok.span.line;
        }
        let next = match self.ahead.take() {
            Some(ahead) => ahead,
            None => self.scan(),
        };
        std::mem::replace(&mut self.current, next).tok
    }

    /// Look one token past the current one.
    pub fn peek_ahead(&mut self) -> Result<&Token, LexError> {
        if self.ahead.is_none() {
            self.ahead = Some(self.scan());
        }
        match self.ahead.as_ref().map(|s| &s.tok) {
            Some(Ok(tok)) => Ok(&tok.token),
            Some(Err(e)) => Err(e.clone()),
            None => Err(self.error_here("lookahead unavailable", None)),
        }
    }

    /// Line of the current token.
    pub fn line(&self) -> u32 {
        match &self.current.tok {
            Ok(tok) => tok.span.line,
            Err(e) => e.line,
        }
    }

    pub fn chunk(&self) -> &str {
        &self.chunk
    }

    /// Text of the current token as shown in `near '...'` messages.
    pub fn near_text(&self) -> String {
        match &self.current.tok {
            Ok(SpannedToken {
                token: Token::Name(_) | Token::String(_) | Token::Number(_),
                ..
            }) => String::from_utf8_lossy(&self.source[self.current.start..self.current.end])
                .into_owned(),
            Ok(tok) => tok.token.to_string(),
            Err(e) => e.near.clone().unwrap_or_default(),
        }
    }

    pub fn intern(&mut self, s: &str) -> StringId {
        self.strings.intern_str(s)
    }

    pub fn strings(&self) -> &StringInterner {
        &*self.strings
    }

    // ---- Internal scanning ----

    fn error_here(&self, message: &str, near: Option<String>) -> LexError {
        LexError {
            message: message.to_string(),
            chunk: self.chunk.clone(),
            line: self.line,
            near,
        }
    }

    fn text_from(&self, start: usize) -> String {
        let end = self.pos.min(self.source.len());
        String::from_utf8_lossy(&self.source[start..end]).into_owned()
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == b'\n' || ch == b'\r' {
            // \n\r and \r\n count as one newline
            let other = if ch == b'\n' { b'\r' } else { b'\n' };
            if self.peek() == Some(other) {
                self.pos += 1;
            }
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_shebang(&mut self) {
        if self.source.first() == Some(&b'#') {
            while let Some(ch) = self.peek() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                self.advance_char();
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(b' ' | b'\t' | b'\n' | b'\r' | b'\x0C' | b'\x0B') = self.peek() {
                self.advance_char();
            }

            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                self.advance_char();
                self.advance_char();
                if let Some(level) = self.long_bracket_level() {
                    self.read_long_string(level, false)?;
                    continue;
                }
                while let Some(ch) = self.peek() {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.advance_char();
                }
                continue;
            }
            return Ok(());
        }
    }

    /// At `[`: the level of a long bracket `[=*[`, if one starts here.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(level + 1) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(level + 1) == Some(b'[')).then_some(level)
    }

    fn scan(&mut self) -> Scanned {
        if let Err(e) = self.skip_whitespace_and_comments() {
            return Scanned {
                tok: Err(e),
                start: self.pos,
                end: self.pos,
            };
        }
        let start = self.pos;
        let span = Span {
            line: self.line,
            column: self.column,
        };
        let tok = self
            .scan_token(start)
            .map(|token| SpannedToken { token, span });
        Scanned {
            tok,
            start,
            end: self.pos,
        }
    }

    fn single(&mut self, token: Token) -> Result<Token, LexError> {
        self.advance_char();
        Ok(token)
    }

    /// `first` if the next char is not `second`, else consume both and
    /// return `double`.
    fn maybe_double(&mut self, second: u8, first: Token, double: Token) -> Result<Token, LexError> {
        self.advance_char();
        if self.peek() == Some(second) {
            self.advance_char();
            Ok(double)
        } else {
            Ok(first)
        }
    }

    fn scan_token(&mut self, start: usize) -> Result<Token, LexError> {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return Ok(Token::Eof),
        };

        match ch {
            b'+' => self.single(Token::Plus),
            b'-' => self.single(Token::Minus),
            b'*' => self.single(Token::Star),
            b'/' => self.single(Token::Slash),
            b'%' => self.single(Token::Percent),
            b'^' => self.single(Token::Caret),
            b'#' => self.single(Token::Hash),
            b'(' => self.single(Token::LParen),
            b')' => self.single(Token::RParen),
            b'{' => self.single(Token::LBrace),
            b'}' => self.single(Token::RBrace),
            b']' => self.single(Token::RBracket),
            b';' => self.single(Token::Semi),
            b':' => self.single(Token::Colon),
            b',' => self.single(Token::Comma),
            b'=' => self.maybe_double(b'=', Token::Assign, Token::Equal),
            b'<' => self.maybe_double(b'=', Token::Less, Token::LessEq),
            b'>' => self.maybe_double(b'=', Token::Greater, Token::GreaterEq),
            b'~' => {
                self.advance_char();
                if self.peek() == Some(b'=') {
                    self.advance_char();
                    Ok(Token::NotEqual)
                } else {
                    Err(self.error_here("unexpected symbol", Some("~".to_string())))
                }
            }
            b'[' => {
                if let Some(level) = self.long_bracket_level() {
                    let content = self.read_long_string(level, true)?;
                    return Ok(Token::String(self.strings.intern(&content)));
                }
                let mut level = 0;
                while self.peek_at(level + 1) == Some(b'=') {
                    level += 1;
                }
                if level == 0 {
                    self.single(Token::LBracket)
                } else {
                    for _ in 0..=level {
                        self.advance_char();
                    }
                    Err(self.error_here("invalid long string delimiter", Some(self.text_from(start))))
                }
            }
            b'.' => {
                if self.peek_at(1) == Some(b'.') {
                    self.advance_char();
                    if self.peek_at(1) == Some(b'.') {
                        self.advance_char();
                        self.advance_char();
                        return Ok(Token::DotDotDot);
                    }
                    self.advance_char();
                    return Ok(Token::DotDot);
                }
                if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    return self.scan_number(start);
                }
                self.single(Token::Dot)
            }
            b'"' | b'\'' => self.scan_short_string(ch, start),
            b'0'..=b'9' => self.scan_number(start),
            c if is_ident_start(c) => Ok(self.scan_name(start)),
            c => {
                self.advance_char();
                let near = if c.is_ascii_graphic() {
                    (c as char).to_string()
                } else {
                    format!("char({c})")
                };
                Err(self.error_here("unexpected symbol", Some(near)))
            }
        }
    }

    fn scan_name(&mut self, start: usize) -> Token {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance_char();
        }
        let bytes = &self.source[start..self.pos];
        if let Some(kw) = std::str::from_utf8(bytes).ok().and_then(Token::keyword_from_str) {
            return kw;
        }
        Token::Name(self.strings.intern(bytes))
    }

    /// Digits and dots, an optional exponent with sign, then any trailing
    /// alphanumerics (which makes `0x1F` a single numeral).
    fn scan_number(&mut self, start: usize) -> Result<Token, LexError> {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'.') {
            self.advance_char();
        }
        if let Some(b'e' | b'E') = self.peek() {
            self.advance_char();
            if let Some(b'+' | b'-') = self.peek() {
                self.advance_char();
            }
        }
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
            self.advance_char();
        }
        match str_to_number(&self.source[start..self.pos]) {
            Some(n) => Ok(Token::Number(n)),
            None => Err(self.error_here("malformed number", Some(self.text_from(start)))),
        }
    }

    fn scan_short_string(&mut self, delim: u8, start: usize) -> Result<Token, LexError> {
        self.advance_char(); // opening quote
        let mut buf = Vec::new();
        loop {
            let ch = match self.peek() {
                None => return Err(self.error_here("unfinished string", Some("<eof>".into()))),
                Some(ch) => ch,
            };
            match ch {
                c if c == delim => {
                    self.advance_char();
                    break;
                }
                b'\n' | b'\r' => {
                    return Err(self.error_here("unfinished string", Some(self.text_from(start))));
                }
                b'\\' => {
                    self.advance_char();
                    let esc = match self.peek() {
                        // reported as unfinished on the next iteration
                        None => continue,
                        Some(esc) => esc,
                    };
                    match esc {
                        b'a' => buf.push(0x07),
                        b'b' => buf.push(0x08),
                        b'f' => buf.push(0x0C),
                        b'n' => buf.push(b'\n'),
                        b'r' => buf.push(b'\r'),
                        b't' => buf.push(b'\t'),
                        b'v' => buf.push(0x0B),
                        b'\n' | b'\r' => {
                            buf.push(b'\n');
                            self.advance_char();
                            continue;
                        }
                        b'0'..=b'9' => {
                            let mut value: u32 = 0;
                            let mut digits = 0;
                            while digits < 3 && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                                value = value * 10 + (self.peek().unwrap_or(b'0') - b'0') as u32;
                                self.advance_char();
                                digits += 1;
                            }
                            if value > 255 {
                                return Err(self.error_here(
                                    "escape sequence too large",
                                    Some(self.text_from(start)),
                                ));
                            }
                            buf.push(value as u8);
                            continue;
                        }
                        // \\, \", \' and unknown escapes keep the character
                        other => buf.push(other),
                    }
                    self.advance_char();
                }
                _ => {
                    buf.push(ch);
                    self.advance_char();
                }
            }
        }
        Ok(Token::String(self.strings.intern(&buf)))
    }

    /// Read a long string or comment starting at its opening `[`.
    /// A newline immediately after the opening bracket is skipped; line
    /// breaks inside are normalized to `\n`.
    fn read_long_string(&mut self, level: usize, is_string: bool) -> Result<Vec<u8>, LexError> {
        for _ in 0..level + 2 {
            self.advance_char();
        }
        if let Some(b'\n' | b'\r') = self.peek() {
            self.advance_char();
        }
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None => {
                    let msg = if is_string {
                        "unfinished long string"
                    } else {
                        "unfinished long comment"
                    };
                    return Err(self.error_here(msg, Some("<eof>".into())));
                }
                Some(b']') if self.closes_long_bracket(level) => {
                    for _ in 0..level + 2 {
                        self.advance_char();
                    }
                    return Ok(buf);
                }
                Some(b'\n' | b'\r') => {
                    self.advance_char();
                    if is_string {
                        buf.push(b'\n');
                    }
                }
                Some(ch) => {
                    self.advance_char();
                    if is_string {
                        buf.push(ch);
                    }
                }
            }
        }
    }

    fn closes_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_at(i) == Some(b'=')) && self.peek_at(level + 1) == Some(b']')
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}
