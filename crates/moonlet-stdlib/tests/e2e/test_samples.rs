use super::helpers::*;
use moonlet_stdlib::execute_source;

fn samples_dir() -> String {
    let manifest = env!("CARGO_MANIFEST_DIR");
    format!("{manifest}/../../tests/lua_samples")
}

#[test]
fn test_all_samples_run() {
    let entries = std::fs::read_dir(samples_dir()).expect("samples directory");
    let mut ran = 0;
    for entry in entries {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("lua") {
            continue;
        }
        let source = std::fs::read_to_string(&path).unwrap();
        let mut vm = stdlib_vm();
        let name = format!("@{}", path.display());
        execute_source(&mut vm, &source, &name)
            .unwrap_or_else(|e| panic!("{} failed: {e}", path.display()));
        ran += 1;
    }
    assert!(ran >= 5);
}
