use super::helpers::*;
use moonlet_compiler::disasm::disassemble;
use moonlet_compiler::opcode::OpCode;

#[test]
fn e2e_fibonacci() {
    let src = r#"
local function fib(n)
    if n < 2 then
        return n
    end
    return fib(n - 1) + fib(n - 2)
end
return fib(20)
"#;
    let (proto, _) = compile_str(src);
    assert!(has_opcode(&proto, OpCode::Closure));
    let fib = &proto.protos[0];
    assert!(has_opcode(fib, OpCode::Lt));
    assert_eq!(count_opcode(fib, OpCode::GetUpval), 2);
}

#[test]
fn e2e_counter_closure() {
    let src = r#"
local function make_counter()
    local count = 0
    return function()
        count = count + 1
        return count
    end
end
local c = make_counter()
return c()
"#;
    let (proto, _) = compile_str(src);
    assert!(has_opcode(&proto, OpCode::Closure));
    assert!(has_opcode(&proto.protos[0].protos[0], OpCode::SetUpval));
}

#[test]
fn e2e_nested_loops() {
    let src = r#"
local total = 0
for i = 1, 10 do
    for j = 1, 10 do
        if (i + j) % 2 == 0 then total = total + 1 end
    end
end
return total
"#;
    let (proto, _) = compile_str(src);
    assert_eq!(count_opcode(&proto, OpCode::ForLoop), 2);
    assert!(has_opcode(&proto, OpCode::Mod));
}

#[test]
fn e2e_big_constructor() {
    let items: Vec<String> = (0..600).map(|i| format!("{i}")).collect();
    let src = format!("return {{{}}}", items.join(", "));
    let (proto, _) = compile_str(&src);
    assert_eq!(count_opcode(&proto, OpCode::SetList), 12);
}

#[test]
fn e2e_disassembly_lists_all_functions() {
    let src = "local function a() end\nlocal function b() return function() end end";
    let (proto, strings) = compile_str(src);
    let listing = disassemble(&proto, &strings);
    assert_eq!(listing.matches("function <test:").count(), 3);
    assert!(listing.starts_with("\nmain <test:0,0>"));
}
