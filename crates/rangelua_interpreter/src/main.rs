// The rangelua command-line driver: run, compile, dump and repl over the
// rangelua library crate.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use rangelua::bytecode::{disasm, dump};
use rangelua::{LuaError, Proto, Vm, stdlib};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = concat!("RangeLua 5.5 (rangelua ", env!("CARGO_PKG_VERSION"), ")");

const EXIT_COMPILE: u8 = 1;
const EXIT_RUNTIME: u8 = 2;
const EXIT_IO: u8 = 3;

#[derive(Parser)]
#[command(name = "rangelua")]
#[command(version, about = "A Lua 5.5 compiler and virtual machine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and execute a script (source or compiled chunk).
    Run { file: PathBuf },
    /// Compile a script to a bytecode artifact.
    Compile {
        file: PathBuf,
        /// Output path (defaults to the input with a .rlbc extension).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a disassembly of a script or compiled chunk.
    Dump { file: PathBuf },
    /// Interactive read-eval-print loop.
    Repl,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);

    match cli.command {
        Command::Run { file } => cmd_run(&mut vm, &file),
        Command::Compile { file, output } => cmd_compile(&mut vm, &file, output),
        Command::Dump { file } => cmd_dump(&mut vm, &file),
        Command::Repl => cmd_repl(&mut vm),
    }
}

fn init_logging() {
    let level = std::env::var("RANGELUA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = if level == "off" {
        EnvFilter::new("off")
    } else {
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load a file as either Lua source or a compiled chunk.
fn load_file(vm: &mut Vm, path: &Path) -> Result<Rc<Proto>, ExitCode> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("rangelua: cannot open {}: {e}", path.display());
            return Err(ExitCode::from(EXIT_IO));
        }
    };
    if dump::is_compiled_chunk(&bytes) {
        return match dump::load_chunk(&bytes, &mut vm.pool) {
            Ok(proto) => Ok(vm.adopt_proto(Rc::new(proto))),
            Err(e) => {
                eprintln!("rangelua: {}: {e}", path.display());
                Err(ExitCode::from(EXIT_COMPILE))
            }
        };
    }
    let source = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            eprintln!("rangelua: {}: source is not valid UTF-8", path.display());
            return Err(ExitCode::from(EXIT_IO));
        }
    };
    let chunk_name = path.to_string_lossy();
    match vm.compile(&source, &chunk_name) {
        Ok(proto) => Ok(proto),
        Err(e) => {
            eprintln!("rangelua: {e}");
            Err(ExitCode::from(EXIT_COMPILE))
        }
    }
}

fn cmd_run(vm: &mut Vm, file: &Path) -> ExitCode {
    let proto = match load_file(vm, file) {
        Ok(p) => p,
        Err(code) => return code,
    };
    match vm.execute(proto) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e @ LuaError::Runtime(_)) => {
            eprintln!("rangelua: {e}");
            ExitCode::from(EXIT_RUNTIME)
        }
        Err(e) => {
            eprintln!("rangelua: {e}");
            ExitCode::from(EXIT_COMPILE)
        }
    }
}

fn cmd_compile(vm: &mut Vm, file: &Path, output: Option<PathBuf>) -> ExitCode {
    let proto = match load_file(vm, file) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let out_path = output.unwrap_or_else(|| file.with_extension("rlbc"));
    let bytes = dump::dump_chunk(&proto, &vm.pool);
    match std::fs::write(&out_path, bytes) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rangelua: cannot write {}: {e}", out_path.display());
            ExitCode::from(EXIT_IO)
        }
    }
}

fn cmd_dump(vm: &mut Vm, file: &Path) -> ExitCode {
    let proto = match load_file(vm, file) {
        Ok(p) => p,
        Err(code) => return code,
    };
    print!("{}", disasm::disassemble(&proto, &vm.pool));
    ExitCode::SUCCESS
}

fn cmd_repl(vm: &mut Vm) -> ExitCode {
    println!("{VERSION}");
    let mut editor = match rustyline::DefaultEditor::new() {
        Ok(ed) => ed,
        Err(e) => {
            eprintln!("rangelua: cannot start line editor: {e}");
            return ExitCode::from(EXIT_IO);
        }
    };

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "> " } else { ">> " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("rangelua: {e}");
                break;
            }
        };

        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(&line);
        let chunk = pending.clone();
        let _ = editor.add_history_entry(&chunk);

        // Expression first, so `1 + 1` prints without an explicit return.
        let as_expr = format!("return {chunk}");
        let compiled = match vm.compile(&as_expr, "=stdin") {
            Ok(p) => Ok(p),
            Err(_) => vm.compile(&chunk, "=stdin"),
        };

        match compiled {
            Ok(proto) => {
                pending.clear();
                match vm.execute(proto) {
                    Ok(values) => {
                        if !values.is_empty() {
                            let rendered: Vec<String> =
                                values.iter().map(|v| vm.display_value(*v)).collect();
                            println!("{}", rendered.join("\t"));
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
            Err(e) => {
                // Incomplete input keeps accumulating; anything else reports.
                let message = e.to_string();
                if message.contains("<eof>") {
                    continue;
                }
                pending.clear();
                eprintln!("{message}");
            }
        }
    }
    ExitCode::SUCCESS
}
