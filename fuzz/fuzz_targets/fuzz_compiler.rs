#![no_main]

use libfuzzer_sys::fuzz_target;
use moonlet_compiler::compile;
use moonlet_core::string::StringInterner;

fuzz_target!(|data: &[u8]| {
    // Any input may be rejected, none may panic.
    let mut strings = StringInterner::new();
    let _ = compile(data, "=fuzz", &mut strings);
});
