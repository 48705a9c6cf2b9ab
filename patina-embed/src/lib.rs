// patina-embed - Embedding API for the Patina programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Embed Patina in a Rust program.
//!
//! [`Engine`] wraps one virtual machine behind a small API: evaluate source,
//! read globals back as Rust values, and register native functions.

pub mod engine;

pub use engine::{Engine, EngineError, ScriptValue};
pub use patina_vm::{NativeFn, Value};
