use super::helpers::*;
use moonlet_compiler::opcode::OpCode;
use moonlet_compiler::proto::UpvalSource;

#[test]
fn e2e_local_function() {
    let (proto, _) = compile_str("local function f(x) return x end");
    assert!(has_opcode(&proto, OpCode::Closure));
    assert_eq!(proto.protos.len(), 1);
    assert_eq!(proto.protos[0].num_params, 1);
    assert!(!proto.protos[0].is_vararg);
}

#[test]
fn e2e_local_function_is_recursive() {
    let (proto, _) = compile_str("local function f(n) return f(n) end");
    let child = &proto.protos[0];
    assert_eq!(child.upvalues.len(), 1);
    assert_eq!(child.upvalues[0].source, UpvalSource::Local(0));
}

#[test]
fn e2e_vararg_function() {
    let (proto, _) = compile_str("function f(a, ...) return select('#', ...) end");
    let child = &proto.protos[0];
    assert!(child.is_vararg);
    assert_eq!(child.num_params, 1);
    assert!(has_opcode(child, OpCode::VarArg));
}

#[test]
fn e2e_dotted_function_name() {
    let (proto, _) = compile_str("local a = {b = {}}\nfunction a.b.c() end");
    assert!(has_opcode(&proto, OpCode::SetTable));
}

#[test]
fn e2e_method_call_and_definition() {
    let (proto, _) = compile_str("local obj = {}\nfunction obj:get() return self end\nreturn obj:get()");
    assert!(has_opcode(&proto, OpCode::Self_));
    assert_eq!(proto.protos[0].num_params, 1);
}

#[test]
fn e2e_line_defined() {
    let (proto, _) = compile_str("\n\nfunction f()\n  return 1\nend");
    assert_eq!(proto.protos[0].line_defined, 3);
    assert_eq!(proto.protos[0].last_line_defined, 5);
}

#[test]
fn e2e_upvalue_shared_between_closures() {
    let src = "local n = 0\nlocal function inc() n = n + 1 end\nlocal function get() return n end";
    let (proto, _) = compile_str(src);
    for child in &proto.protos {
        assert_eq!(child.upvalues[0].source, UpvalSource::Local(0));
    }
    assert!(has_opcode(&proto.protos[0], OpCode::SetUpval));
}

#[test]
fn e2e_tail_call_in_nested_function() {
    let (proto, _) = compile_str("function f(x) return g(x) end");
    assert!(has_opcode(&proto.protos[0], OpCode::TailCall));
}

#[test]
fn e2e_multiple_returns() {
    let (proto, _) = compile_str("local a, b\nreturn a, b, 3");
    let ret = proto.code.iter().find(|i| i.opcode() == OpCode::Return).unwrap();
    assert_eq!(ret.b(), 4);
}

#[test]
fn e2e_closure_in_loop_gets_fresh_upvalue() {
    let (proto, _) = compile_str("local fs = {}\nfor i = 1, 3 do fs[i] = function() return i end end");
    assert!(has_opcode(&proto, OpCode::Close));
    assert_eq!(proto.protos[0].upvalues[0].source, UpvalSource::Local(4));
}
