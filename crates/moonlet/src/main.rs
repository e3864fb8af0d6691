use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use moonlet_compiler::disasm::disassemble;
use moonlet_core::value::TValue;
use moonlet_stdlib::new_vm;
use moonlet_vm::vm::Vm;
use moonlet_vm::{Driver, LuaError, VmConfig};
use tracing_subscriber::EnvFilter;

/// Run moonlet scripts.
#[derive(Debug, Parser)]
#[command(name = "moonlet", version)]
struct Cli {
    /// Execute a chunk of code before the script. May be repeated.
    #[arg(short = 'e', value_name = "CODE")]
    exec: Vec<String>,

    /// Print the bytecode listing instead of running.
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Run the script through the stepped driver, this many instructions
    /// per slice.
    #[arg(long, value_name = "N")]
    budget: Option<u64>,

    /// TOML file overriding runtime limits.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Script to run; the remaining arguments become its varargs.
    script: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MOONLET_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("moonlet: {msg}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<VmConfig, String> {
    let Some(path) = path else {
        return Ok(VmConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let config: VmConfig =
        toml::from_str(&text).map_err(|e| format!("invalid config {}: {e}", path.display()))?;
    tracing::debug!(?config, "loaded config");
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = load_config(cli.config.as_ref())?;
    let mut vm = new_vm(config);

    for code in &cli.exec {
        if cli.list {
            list(&mut vm, code.as_bytes(), "=(command line)")?;
        } else {
            vm.execute(code, "=(command line)").map_err(render_error)?;
        }
    }

    let Some(path) = &cli.script else {
        return Ok(());
    };
    let source =
        std::fs::read(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let source = strip_shebang(&source);
    let chunk_name = format!("@{}", path.display());
    if cli.list {
        return list(&mut vm, source, &chunk_name);
    }

    let entry = vm.load(source, &chunk_name).map_err(render_error)?;
    let args: Vec<TValue> = cli.args.iter().map(|a| vm.str_value(a.as_bytes())).collect();
    match cli.budget {
        Some(slice) => {
            let mut driver = Driver::new(entry, args);
            driver.start(&mut vm).map_err(|e| e.to_string())?;
            driver
                .run_to_end(&mut vm, slice.max(1))
                .map_err(|e| match e {
                    moonlet_vm::DriverError::Lua(err) => render_error(err),
                    other => other.to_string(),
                })?;
        }
        None => {
            vm.call_value(entry, &args).map_err(render_error)?;
        }
    }
    Ok(())
}

fn list(vm: &mut Vm, source: &[u8], chunk_name: &str) -> Result<(), String> {
    let proto = moonlet_compiler::compile(source, chunk_name, &mut vm.strings)
        .map_err(|e| e.to_string())?;
    print!("{}", disassemble(&proto, &vm.strings));
    Ok(())
}

fn render_error(err: LuaError) -> String {
    match err.traceback() {
        Some(tb) => format!("{}\n{tb}", err.message()),
        None => err.message(),
    }
}

fn strip_shebang(source: &[u8]) -> &[u8] {
    if source.starts_with(b"#") {
        match source.iter().position(|&b| b == b'\n') {
            // Keep the newline so line numbers stay correct.
            Some(pos) => &source[pos..],
            None => b"",
        }
    } else {
        source
    }
}
