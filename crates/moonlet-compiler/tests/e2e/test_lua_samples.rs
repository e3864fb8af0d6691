use moonlet_compiler::compile;
use moonlet_core::string::StringInterner;

fn samples_dir() -> String {
    let manifest = env!("CARGO_MANIFEST_DIR");
    format!("{manifest}/../../tests/lua_samples")
}

#[test]
fn e2e_all_samples_compile() {
    let entries = std::fs::read_dir(samples_dir()).expect("samples directory");
    let mut compiled = 0;
    for entry in entries {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("lua") {
            continue;
        }
        let content = std::fs::read(&path).unwrap();
        let name = format!("@{}", path.display());
        let mut strings = StringInterner::new();
        compile(&content, &name, &mut strings).unwrap_or_else(|e| {
            panic!("failed to compile {}: {e}", path.display());
        });
        compiled += 1;
    }
    assert!(compiled >= 5);
}
