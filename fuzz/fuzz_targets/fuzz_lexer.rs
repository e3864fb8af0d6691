#![no_main]

use libfuzzer_sys::fuzz_target;
use moonlet_compiler::lexer::Lexer;
use moonlet_compiler::token::Token;
use moonlet_core::string::StringInterner;

fuzz_target!(|data: &[u8]| {
    let mut strings = StringInterner::new();
    let mut lexer = Lexer::new(data, "=fuzz", &mut strings);
    loop {
        match lexer.advance() {
            Ok(tok) if tok.token == Token::Eof => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
});
