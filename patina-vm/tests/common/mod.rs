// patina-vm - Common test utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared helpers for the patina-vm integration tests.

use patina_vm::{InterpretResult, VM};

/// Run a source unit in a fresh VM, capturing everything it prints.
pub fn run_source(source: &str) -> (InterpretResult, String) {
    let mut vm = VM::new();
    let mut out: Vec<u8> = Vec::new();
    let result = vm.interpret_to(source, &mut out);
    (result, String::from_utf8_lossy(&out).into_owned())
}

/// Run a source unit against an existing VM, capturing output.
#[allow(dead_code)]
pub fn run_source_with_vm(source: &str, vm: &mut VM) -> (InterpretResult, String) {
    let mut out: Vec<u8> = Vec::new();
    let result = vm.interpret_to(source, &mut out);
    (result, String::from_utf8_lossy(&out).into_owned())
}
