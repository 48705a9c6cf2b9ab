// patina - A small scripting language with a bytecode virtual machine
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;

use patina_vm::{InterpretResult, VM};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() == 2 && (args[1] == "--version" || args[1] == "-v") {
        println!("Patina v0.1.0");
        return;
    }

    let mut vm = VM::new();

    match args.len() {
        1 => run_repl(&mut vm),
        2 => run_file(&args[1], &mut vm),
        _ => {
            eprintln!("Usage: patina [script]");
            process::exit(64);
        }
    }
}

/// Interpret a single source file and exit on failure.
fn run_file(file_path: &str, vm: &mut VM) {
    let path = Path::new(file_path);

    match path.extension().and_then(|e| e.to_str()) {
        Some("pat") => {}
        Some(ext) => {
            eprintln!(
                "Error: unsupported file extension '.{}' for '{}' (expected .pat)",
                ext, file_path
            );
            process::exit(64);
        }
        None => {
            eprintln!(
                "Error: file '{}' has no extension (expected .pat)",
                file_path
            );
            process::exit(64);
        }
    }

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading '{}': {}", file_path, e);
            process::exit(74);
        }
    };

    match vm.interpret(&source) {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => process::exit(65),
        InterpretResult::RuntimeError => process::exit(70),
    }
}

/// Run the interactive REPL. Globals persist between lines.
fn run_repl(vm: &mut VM) {
    println!("Patina v0.1.0");

    loop {
        print!("> ");
        io::stdout().flush().unwrap();

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                // Errors have already been reported on stderr.
                vm.interpret(input);
            }
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }
}
