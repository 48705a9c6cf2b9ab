// patina-embed - Engine implementation
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The Engine struct - main entry point for embedding Patina.

use std::fmt;

use patina_vm::heap::Heap;
use patina_vm::object::ObjKind;
use patina_vm::{InterpretResult, NativeFn, Value, VM};

/// Evaluation failure. Details have already been reported on stderr by the
/// VM, in the same form the command-line driver shows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    Compile,
    Runtime,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Compile => write!(f, "compile error"),
            EngineError::Runtime => write!(f, "runtime error"),
        }
    }
}

impl std::error::Error for EngineError {}

/// A Patina value converted for the embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    None,
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
    /// Anything without a natural Rust counterpart, rendered as text.
    Other(String),
}

/// The Patina scripting engine.
///
/// `Engine` owns a single virtual machine: its globals, interner, and heap
/// persist across `eval` calls, so definitions from one call are visible to
/// the next.
///
/// # Thread Safety
///
/// `Engine` is NOT thread-safe and the VM it owns is a singleton by
/// contract. For concurrent evaluation, create one `Engine` per thread.
///
/// # Example
///
/// ```rust
/// use patina_embed::Engine;
///
/// let mut engine = Engine::new();
/// let output = engine.eval("print 1 + 2;").unwrap();
/// assert_eq!(output, "3\n");
/// ```
pub struct Engine {
    vm: VM,
}

impl Engine {
    /// Create an engine with the built-in natives registered.
    pub fn new() -> Engine {
        Engine { vm: VM::new() }
    }

    /// Evaluate a complete source unit, returning everything it printed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Compile`] when the source does not compile
    /// and [`EngineError::Runtime`] when execution fails.
    pub fn eval(&mut self, source: &str) -> Result<String, EngineError> {
        let mut out: Vec<u8> = Vec::new();
        match self.vm.interpret_to(source, &mut out) {
            InterpretResult::Ok => Ok(String::from_utf8_lossy(&out).into_owned()),
            InterpretResult::CompileError => Err(EngineError::Compile),
            InterpretResult::RuntimeError => Err(EngineError::Runtime),
        }
    }

    /// Read a global by name, converted for the embedder.
    ///
    /// Returns `None` if the global is not defined.
    #[must_use]
    pub fn global(&mut self, name: &str) -> Option<ScriptValue> {
        let value = self.vm.get_global(name)?;
        Some(convert(self.vm.heap(), value))
    }

    /// Register a native Rust function under a global name.
    ///
    /// # Example
    ///
    /// ```rust
    /// use patina_embed::{Engine, Value};
    ///
    /// let mut engine = Engine::new();
    /// engine.register_native("double", 1, |_heap, args| {
    ///     if !args[0].is_int() {
    ///         return Err("double() expects an int.".to_string());
    ///     }
    ///     Ok(Value::from_int(args[0].as_int() * 2))
    /// });
    /// assert_eq!(engine.eval("print double(21);").unwrap(), "42\n");
    /// ```
    pub fn register_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        self.vm.define_native(name, arity, function);
    }

    /// Force a full garbage-collection cycle.
    pub fn collect_garbage(&mut self) {
        self.vm.collect_garbage();
    }

    /// Access the underlying virtual machine.
    pub fn vm_mut(&mut self) -> &mut VM {
        &mut self.vm
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}

fn convert(heap: &Heap, value: Value) -> ScriptValue {
    if value.is_none() {
        ScriptValue::None
    } else if value.is_bool() {
        ScriptValue::Bool(value.as_bool())
    } else if value.is_int() {
        ScriptValue::Int(value.as_int())
    } else if value.is_float() {
        ScriptValue::Float(value.as_float())
    } else {
        let obj = value.as_obj();
        match &heap.get(obj).kind {
            ObjKind::Str(_) => ScriptValue::Str(heap.string(obj).to_string()),
            _ => ScriptValue::Other(heap.format_value(value)),
        }
    }
}
