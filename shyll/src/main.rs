use std::{env, fs, process};

use compiler::compile;
use core::InterpretResult;
use linker::{link, NoBuiltins};
use vm::VirtualMachine;

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => run_repl(),
        2 => run_file(&args[1]),
        3 if args[1] == "--dump" => dump_file(&args[2]),
        _ => {
            eprintln!("Usage: shyll [--dump] [path]");
            process::exit(1);
        }
    }
}

fn read_source(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not open file '{}': {}", path, err);
            process::exit(err.raw_os_error().unwrap_or(70));
        }
    }
}

fn run_file(path: &str) {
    let source = read_source(path);
    let mut vm = VirtualMachine::new();
    let result = vm.interpret(&source);
    process::exit(exit_code(result));
}

/// Compiles and links `path` without running it, writing a disassembly of
/// the merged chunk to stderr instead. Diagnostics from a failed compile are
/// already streamed to stderr by the compiler itself as they're found.
fn dump_file(path: &str) {
    let source = read_source(path);
    let symbols = match compile(&source) {
        Ok(symbols) => symbols,
        Err(_) => process::exit(1),
    };

    match link(symbols, &NoBuiltins) {
        Ok(chunk) => plv::disassemble(&chunk, path),
        Err(err) => {
            eprintln!("{}", err);
            process::exit(2);
        }
    }
}

fn exit_code(result: InterpretResult) -> i32 {
    match result {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => 1,
        InterpretResult::LinkerError => 2,
        InterpretResult::RuntimeError => 3,
    }
}

fn run_repl() {
    todo!("REPL")
}
