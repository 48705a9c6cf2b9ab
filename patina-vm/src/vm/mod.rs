// patina-vm - Virtual machine
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The stack-based virtual machine.
//!
//! `interpret` compiles a source unit and runs it to completion or error.
//! The dispatch loop reads one opcode at a time from the current frame's
//! chunk; calls push frames (capped at [`FRAMES_MAX`]) and returns pop them.
//! Runtime errors unwind to the caller of `interpret` with a stack trace on
//! stderr, after which the VM is reset and reusable: globals and the heap
//! survive between calls, which is what makes the REPL work.

pub mod frame;
pub mod stack;

use std::fmt;
use std::io::{self, Write};

use crate::compiler::compile;
use crate::heap::Heap;
use crate::natives::{self, NativeFn};
use crate::object::{Native, ObjKind, ObjRef, Upvalue, UpvalueState};
use crate::opcode::OpCode;
use crate::table::Table;
use crate::value::Value;

pub use frame::CallFrame;
pub use stack::ValueStack;

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;
/// Value stack capacity: one full window of slots per frame.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// Outcome of an `interpret` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Runtime error during VM execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// An operation needed more stack values than were present.
    StackUnderflow,
    /// Call depth exceeded `FRAMES_MAX`.
    StackOverflow,
    /// Operand kind mismatch; carries the exact message.
    Type(&'static str),
    /// Zero divisor in `/`, `%`, or `%%`.
    DivisionByZero,
    /// Read or write of a global that was never defined.
    UndefinedVariable(String),
    /// Property lookup that found neither field nor method.
    UndefinedProperty(String),
    /// Call with the wrong number of arguments.
    Arity { expected: u8, got: u8 },
    /// Callee was not a function, class, or bound method.
    NotCallable,
    /// A native function reported failure.
    Native(String),
    /// Corrupt bytecode or a broken VM invariant.
    Internal(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::StackUnderflow => write!(f, "Stack underflow."),
            RuntimeError::StackOverflow => write!(f, "Stack overflow."),
            RuntimeError::Type(message) => write!(f, "{}", message),
            RuntimeError::DivisionByZero => write!(f, "Cannot divide by zero."),
            RuntimeError::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            RuntimeError::UndefinedProperty(name) => {
                write!(f, "Undefined property '{}'.", name)
            }
            RuntimeError::Arity { expected, got } => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            RuntimeError::NotCallable => write!(f, "Can only call functions and classes."),
            RuntimeError::Native(message) => write!(f, "{}", message),
            RuntimeError::Internal(message) => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Result type for VM operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// How a callee dispatches, read out of its object kind.
enum Callee {
    Bound(Value, ObjRef),
    Class,
    Closure,
    Native,
    NotCallable,
}

/// The Patina virtual machine. Keep at most one alive at a time; it owns
/// the heap, the interner, and the globals.
pub struct VM {
    stack: ValueStack,
    frames: Vec<CallFrame>,
    globals: Table,
    heap: Heap,
    /// Head of the open-upvalue list, sorted by descending stack slot.
    open_upvalues: Option<ObjRef>,
    /// Cached interned `"__init__"`.
    init_string: ObjRef,
}

impl VM {
    /// Create a VM with the built-in natives registered.
    pub fn new() -> VM {
        let mut heap = Heap::new();
        let init_string = heap.intern("__init__");
        let mut vm = VM {
            stack: ValueStack::new(),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            heap,
            open_upvalues: None,
            init_string,
        };
        vm.define_native("time", 0, natives::native_time);
        vm.define_native("str", 1, natives::native_str);
        vm.define_native("int", 1, natives::native_int);
        vm
    }

    /// Register a native function under a global name.
    pub fn define_native(&mut self, name: &str, arity: u8, function: NativeFn) {
        let name = self.heap.intern(name);
        let hash = self.heap.string_hash(name);
        let native = self.heap.alloc_native(Native { arity, function });
        self.globals.set(name, hash, Value::from_obj(native));
    }

    /// Compile and run a complete source unit, printing to stdout.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let mut stdout = io::stdout();
        self.interpret_to(source, &mut stdout)
    }

    /// Compile and run a complete source unit, printing to `out`.
    /// Compile and runtime errors go to stderr.
    pub fn interpret_to(&mut self, source: &str, out: &mut dyn Write) -> InterpretResult {
        let function = match compile(source, &mut self.heap) {
            Ok(function) => function,
            Err(errors) => {
                for error in &errors {
                    eprintln!("{}", error);
                }
                return InterpretResult::CompileError;
            }
        };

        let closure = self.heap.alloc_closure(function);
        self.stack.push(Value::from_obj(closure));
        if let Err(error) = self.call_closure(closure, 0) {
            self.report_runtime_error(&error);
            return InterpretResult::RuntimeError;
        }

        match self.run(out) {
            Ok(()) => InterpretResult::Ok,
            Err(error) => {
                self.report_runtime_error(&error);
                InterpretResult::RuntimeError
            }
        }
    }

    /// Look up a global by name.
    pub fn get_global(&mut self, name: &str) -> Option<Value> {
        let name = self.heap.intern(name);
        let hash = self.heap.string_hash(name);
        self.globals.get(name, hash)
    }

    /// The VM's heap, for inspecting values.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // ========================================================================
    // Dispatch loop
    // ========================================================================

    fn run(&mut self, out: &mut dyn Write) -> Result<()> {
        loop {
            #[cfg(feature = "trace-execution")]
            {
                let mut rendered = String::from("          ");
                for value in self.stack.as_slice() {
                    rendered.push_str(&format!("[ {} ]", self.heap.format_value(*value)));
                }
                eprintln!("{}", rendered);
                let frame = self.frames.last().unwrap();
                let function = self.heap.closure(frame.closure).function;
                crate::debug::disassemble_instruction(
                    &self.heap,
                    &self.heap.function(function).chunk,
                    frame.ip,
                );
            }

            let byte = self.read_byte()?;
            let op = OpCode::from_byte(byte)
                .ok_or_else(|| RuntimeError::Internal(format!("unknown opcode {}", byte)))?;

            match op {
                OpCode::Constant => {
                    let constant = self.read_constant()?;
                    self.stack.push(constant);
                }
                OpCode::ConstantLong => {
                    let constant = self.read_long_constant()?;
                    self.stack.push(constant);
                }
                OpCode::None => self.stack.push(Value::NONE),
                OpCode::True => self.stack.push(Value::TRUE),
                OpCode::False => self.stack.push(Value::FALSE),
                OpCode::Pop => {
                    self.stack.pop()?;
                }

                OpCode::Add => self.op_add()?,
                OpCode::Subtract => self.op_subtract()?,
                OpCode::Multiply => self.op_multiply()?,
                OpCode::Divide => self.op_divide()?,
                OpCode::Modulus => self.op_modulus()?,
                OpCode::FloorDivide => self.op_floor_divide()?,
                OpCode::Exponent => self.op_exponent()?,
                OpCode::Negate => self.op_negate()?,
                OpCode::Invert => self.op_invert()?,
                OpCode::Not => {
                    let value = self.stack.pop()?;
                    self.stack.push(Value::from_bool(value.is_falsey()));
                }

                OpCode::Equal => {
                    let b = self.stack.pop()?;
                    let a = self.stack.pop()?;
                    self.stack.push(Value::from_bool(a == b));
                }
                OpCode::Greater => self.op_compare(|a, b| a > b)?,
                OpCode::Less => self.op_compare(|a, b| a < b)?,
                OpCode::And => self.op_int_binary(|a, b| a & b)?,
                OpCode::Or => self.op_int_binary(|a, b| a | b)?,
                OpCode::Xor => self.op_int_binary(|a, b| a ^ b)?,
                OpCode::Lshift => self.op_int_binary(|a, b| a.wrapping_shl(b as u32))?,
                OpCode::Rshift => self.op_int_binary(|a, b| a.wrapping_shr(b as u32))?,

                OpCode::DefineGlobal => {
                    let name = self.read_string()?;
                    let hash = self.heap.string_hash(name);
                    let value = self.stack.peek(0)?;
                    self.globals.set(name, hash, value);
                    self.stack.pop()?;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string()?;
                    let hash = self.heap.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.stack.push(value),
                        None => {
                            return Err(RuntimeError::UndefinedVariable(
                                self.heap.string(name).to_string(),
                            ));
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_string()?;
                    let hash = self.heap.string_hash(name);
                    let value = self.stack.peek(0)?;
                    // Assignment must not create a global: if the insert
                    // reports a new key, undo it and error.
                    if self.globals.set(name, hash, value) {
                        self.globals.delete(name, hash);
                        return Err(RuntimeError::UndefinedVariable(
                            self.heap.string(name).to_string(),
                        ));
                    }
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame()?.base;
                    let value = self.stack.get(base + slot)?;
                    self.stack.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame()?.base;
                    let value = self.stack.peek(0)?;
                    self.stack.set(base + slot, value)?;
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte()? as usize;
                    let upvalue = self.frame_upvalue(slot)?;
                    let value = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(stack_slot) => self.stack.get(stack_slot)?,
                        UpvalueState::Closed(value) => value,
                    };
                    self.stack.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte()? as usize;
                    let upvalue = self.frame_upvalue(slot)?;
                    let value = self.stack.peek(0)?;
                    match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(stack_slot) => self.stack.set(stack_slot, value)?,
                        UpvalueState::Closed(_) => {
                            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
                        }
                    }
                }

                OpCode::Jump => {
                    let offset = self.read_short()? as usize;
                    self.frame_mut()?.ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short()? as usize;
                    if self.stack.peek(0)?.is_falsey() {
                        self.frame_mut()?.ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short()? as usize;
                    self.frame_mut()?.ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte()?;
                    let callee = self.stack.peek(arg_count as usize)?;
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Closure => {
                    let function = self.read_constant()?.as_obj();
                    self.maybe_collect();
                    let closure = self.heap.alloc_closure(function);
                    self.stack.push(Value::from_obj(closure));

                    let upvalue_count = self.heap.function(function).upvalue_count;
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte()? != 0;
                        let index = self.read_byte()? as usize;
                        let upvalue = if is_local {
                            let base = self.frame()?.base;
                            self.capture_upvalue(base + index)?
                        } else {
                            let enclosing = self.frame()?.closure;
                            self.heap
                                .closure(enclosing)
                                .upvalues
                                .get(index)
                                .copied()
                                .ok_or_else(|| {
                                    RuntimeError::Internal("upvalue index out of range".to_string())
                                })?
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self
                        .stack
                        .len()
                        .checked_sub(1)
                        .ok_or(RuntimeError::StackUnderflow)?;
                    self.close_upvalues(top)?;
                    self.stack.pop()?;
                }
                OpCode::Return => {
                    let result = self.stack.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| RuntimeError::Internal("return with no frame".to_string()))?;
                    self.close_upvalues(frame.base)?;
                    if self.frames.is_empty() {
                        // The script closure is the last thing left.
                        self.stack.pop()?;
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.stack.push(result);
                }

                OpCode::Class => {
                    let name = self.read_string()?;
                    self.maybe_collect();
                    let class = self.heap.alloc_class(name);
                    self.stack.push(Value::from_obj(class));
                }
                OpCode::Inherit => {
                    let superclass = self.stack.peek(1)?;
                    if !self.is_kind(superclass, |kind| matches!(kind, ObjKind::Class(_))) {
                        return Err(RuntimeError::Type("Superclass must be a class."));
                    }
                    let subclass = self.stack.peek(0)?.as_obj();
                    let methods = self.heap.class(superclass.as_obj()).methods.clone();
                    self.heap.class_mut(subclass).methods.add_all(&methods);
                    self.stack.pop()?;
                }
                OpCode::Method => {
                    let name = self.read_string()?;
                    let hash = self.heap.string_hash(name);
                    let method = self.stack.peek(0)?;
                    let class = self.stack.peek(1)?.as_obj();
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.stack.pop()?;
                }
                OpCode::GetProperty => {
                    let target = self.stack.peek(0)?;
                    if !self.is_kind(target, |kind| matches!(kind, ObjKind::Instance(_))) {
                        return Err(RuntimeError::Type("Only instances have properties."));
                    }
                    let instance = target.as_obj();
                    let name = self.read_string()?;
                    let hash = self.heap.string_hash(name);

                    if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                        self.stack.pop()?;
                        self.stack.push(value);
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let target = self.stack.peek(1)?;
                    if !self.is_kind(target, |kind| matches!(kind, ObjKind::Instance(_))) {
                        return Err(RuntimeError::Type("Only instances have fields."));
                    }
                    let name = self.read_string()?;
                    let hash = self.heap.string_hash(name);
                    let value = self.stack.peek(0)?;
                    self.heap
                        .instance_mut(target.as_obj())
                        .fields
                        .set(name, hash, value);
                    let value = self.stack.pop()?;
                    self.stack.pop()?;
                    self.stack.push(value);
                }
                OpCode::Invoke => {
                    let method = self.read_string()?;
                    let arg_count = self.read_byte()?;
                    self.invoke(method, arg_count)?;
                }
                OpCode::GetSuper => {
                    let name = self.read_string()?;
                    let superclass = self.stack.pop()?.as_obj();
                    self.bind_method(superclass, name)?;
                }
                OpCode::SuperInvoke => {
                    let method = self.read_string()?;
                    let arg_count = self.read_byte()?;
                    let superclass = self.stack.pop()?.as_obj();
                    self.invoke_from_class(superclass, method, arg_count)?;
                }

                OpCode::ListBuild => {
                    let count = self.read_byte()? as usize;
                    if count > self.stack.len() {
                        return Err(RuntimeError::StackUnderflow);
                    }
                    self.maybe_collect();
                    let list = self.heap.alloc_list();
                    let start = self.stack.len() - count;
                    for i in 0..count {
                        let value = self.stack.get(start + i)?;
                        self.heap.list_push(list, value);
                    }
                    self.stack.truncate(start);
                    self.stack.push(Value::from_obj(list));
                }
                OpCode::ListIndex => self.op_list_index()?,
                OpCode::ListStore => self.op_list_store()?,

                OpCode::Print => {
                    let value = self.stack.pop()?;
                    let rendered = self.heap.format_value(value);
                    writeln!(out, "{}", rendered)
                        .map_err(|e| RuntimeError::Internal(format!("write failed: {}", e)))?;
                }
            }
        }
    }

    // ========================================================================
    // Instruction reads
    // ========================================================================

    fn frame(&self) -> Result<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| RuntimeError::Internal("no active frame".to_string()))
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::Internal("no active frame".to_string()))
    }

    fn read_byte(&mut self) -> Result<u8> {
        let frame = self.frame()?;
        let ip = frame.ip;
        let closure = frame.closure;
        let function = self.heap.closure(closure).function;
        let byte = self
            .heap
            .function(function)
            .chunk
            .code
            .get(ip)
            .copied()
            .ok_or_else(|| RuntimeError::Internal("instruction pointer out of bounds".to_string()))?;
        self.frame_mut()?.ip = ip + 1;
        Ok(byte)
    }

    fn read_short(&mut self) -> Result<u16> {
        let hi = self.read_byte()? as u16;
        let lo = self.read_byte()? as u16;
        Ok((hi << 8) | lo)
    }

    fn constant_at(&self, index: usize) -> Result<Value> {
        let frame = self.frame()?;
        let function = self.heap.closure(frame.closure).function;
        self.heap
            .function(function)
            .chunk
            .constants
            .get(index)
            .copied()
            .ok_or_else(|| RuntimeError::Internal("constant index out of bounds".to_string()))
    }

    fn read_constant(&mut self) -> Result<Value> {
        let index = self.read_byte()? as usize;
        self.constant_at(index)
    }

    fn read_long_constant(&mut self) -> Result<Value> {
        let hi = self.read_byte()? as usize;
        let mid = self.read_byte()? as usize;
        let lo = self.read_byte()? as usize;
        self.constant_at((hi << 16) | (mid << 8) | lo)
    }

    fn read_string(&mut self) -> Result<ObjRef> {
        let value = self.read_constant()?;
        if value.is_obj() && self.heap.is_string(value.as_obj()) {
            Ok(value.as_obj())
        } else {
            Err(RuntimeError::Internal(
                "constant is not a string".to_string(),
            ))
        }
    }

    fn frame_upvalue(&self, slot: usize) -> Result<ObjRef> {
        let closure = self.frame()?.closure;
        self.heap
            .closure(closure)
            .upvalues
            .get(slot)
            .copied()
            .ok_or_else(|| RuntimeError::Internal("upvalue slot out of range".to_string()))
    }

    fn is_kind(&self, value: Value, predicate: impl Fn(&ObjKind) -> bool) -> bool {
        value.is_obj() && predicate(&self.heap.get(value.as_obj()).kind)
    }

    fn is_string_value(&self, value: Value) -> bool {
        value.is_obj() && self.heap.is_string(value.as_obj())
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<()> {
        let dispatch = if callee.is_obj() {
            match &self.heap.get(callee.as_obj()).kind {
                ObjKind::BoundMethod(bound) => Callee::Bound(bound.receiver, bound.method),
                ObjKind::Class(_) => Callee::Class,
                ObjKind::Closure(_) => Callee::Closure,
                ObjKind::Native(_) => Callee::Native,
                _ => Callee::NotCallable,
            }
        } else {
            Callee::NotCallable
        };

        match dispatch {
            Callee::Bound(receiver, method) => {
                let slot = self.stack.len() - arg_count as usize - 1;
                self.stack.set(slot, receiver)?;
                self.call_closure(method, arg_count)
            }
            Callee::Class => {
                let class = callee.as_obj();
                let hash = self.heap.string_hash(self.init_string);
                let initializer = self.heap.class(class).methods.get(self.init_string, hash);

                self.maybe_collect();
                let instance = self.heap.alloc_instance(class);
                let slot = self.stack.len() - arg_count as usize - 1;
                self.stack.set(slot, Value::from_obj(instance))?;

                match initializer {
                    Some(init) => self.call_closure(init.as_obj(), arg_count),
                    None if arg_count != 0 => Err(RuntimeError::Arity {
                        expected: 0,
                        got: arg_count,
                    }),
                    None => Ok(()),
                }
            }
            Callee::Closure => self.call_closure(callee.as_obj(), arg_count),
            Callee::Native => self.call_native(callee.as_obj(), arg_count),
            Callee::NotCallable => Err(RuntimeError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, arg_count: u8) -> Result<()> {
        let arity = self.heap.function(self.heap.closure(closure).function).arity;
        if arg_count != arity {
            return Err(RuntimeError::Arity {
                expected: arity,
                got: arg_count,
            });
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(RuntimeError::StackOverflow);
        }

        let base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame::new(closure, base));
        Ok(())
    }

    fn call_native(&mut self, native: ObjRef, arg_count: u8) -> Result<()> {
        let native = self.heap.native(native);
        if arg_count != native.arity {
            return Err(RuntimeError::Arity {
                expected: native.arity,
                got: arg_count,
            });
        }

        let start = self.stack.len() - arg_count as usize;
        let result = (native.function)(&mut self.heap, &self.stack.as_slice()[start..])
            .map_err(RuntimeError::Native)?;
        self.stack.truncate(start - 1);
        self.stack.push(result);
        Ok(())
    }

    fn invoke(&mut self, name: ObjRef, arg_count: u8) -> Result<()> {
        let receiver = self.stack.peek(arg_count as usize)?;
        if !self.is_kind(receiver, |kind| matches!(kind, ObjKind::Instance(_))) {
            return Err(RuntimeError::Type("Only instances have methods."));
        }
        let instance = receiver.as_obj();
        let hash = self.heap.string_hash(name);

        // A field shadows a method of the same name.
        if let Some(field) = self.heap.instance(instance).fields.get(name, hash) {
            let slot = self.stack.len() - arg_count as usize - 1;
            self.stack.set(slot, field)?;
            return self.call_value(field, arg_count);
        }

        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, arg_count)
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: ObjRef, arg_count: u8) -> Result<()> {
        let hash = self.heap.string_hash(name);
        match self.heap.class(class).methods.get(name, hash) {
            Some(method) => self.call_closure(method.as_obj(), arg_count),
            None => Err(RuntimeError::UndefinedProperty(
                self.heap.string(name).to_string(),
            )),
        }
    }

    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<()> {
        let hash = self.heap.string_hash(name);
        let method = match self.heap.class(class).methods.get(name, hash) {
            Some(method) => method.as_obj(),
            None => {
                return Err(RuntimeError::UndefinedProperty(
                    self.heap.string(name).to_string(),
                ));
            }
        };

        let receiver = self.stack.peek(0)?;
        self.maybe_collect();
        let bound = self.heap.alloc_bound_method(receiver, method);
        self.stack.pop()?;
        self.stack.push(Value::from_obj(bound));
        Ok(())
    }

    // ========================================================================
    // Upvalues
    // ========================================================================

    /// Find or create the open upvalue for a stack slot, keeping the list
    /// sorted by descending slot with no duplicates.
    fn capture_upvalue(&mut self, slot: usize) -> Result<ObjRef> {
        let mut prev: Option<ObjRef> = None;
        let mut current = self.open_upvalues;
        while let Some(candidate) = current {
            let upvalue = self.heap.upvalue(candidate);
            let location = match upvalue.state {
                UpvalueState::Open(location) => location,
                UpvalueState::Closed(_) => {
                    return Err(RuntimeError::Internal(
                        "closed upvalue on the open list".to_string(),
                    ));
                }
            };
            if location <= slot {
                if location == slot {
                    return Ok(candidate);
                }
                break;
            }
            prev = Some(candidate);
            current = upvalue.next;
        }

        self.maybe_collect();
        let created = self.heap.alloc_upvalue(Upvalue {
            state: UpvalueState::Open(slot),
            next: current,
        });
        match prev {
            None => self.open_upvalues = Some(created),
            Some(prev) => self.heap.upvalue_mut(prev).next = Some(created),
        }
        Ok(created)
    }

    /// Close every open upvalue at or above `from`, hoisting its value off
    /// the stack.
    fn close_upvalues(&mut self, from: usize) -> Result<()> {
        while let Some(head) = self.open_upvalues {
            let (location, next) = {
                let upvalue = self.heap.upvalue(head);
                match upvalue.state {
                    UpvalueState::Open(location) => (location, upvalue.next),
                    UpvalueState::Closed(_) => {
                        return Err(RuntimeError::Internal(
                            "closed upvalue on the open list".to_string(),
                        ));
                    }
                }
            };
            if location < from {
                break;
            }
            let value = self.stack.get(location)?;
            let upvalue = self.heap.upvalue_mut(head);
            upvalue.state = UpvalueState::Closed(value);
            upvalue.next = None;
            self.open_upvalues = next;
        }
        Ok(())
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    fn op_add(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if self.is_string_value(a) && self.is_string_value(b) {
            return self.concatenate();
        }
        if a.is_int() && b.is_int() {
            let result = a.as_int().wrapping_add(b.as_int());
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_int(result));
            return Ok(());
        }
        if a.is_number() && b.is_number() {
            let result = a.as_number() + b.as_number();
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_float(result));
            return Ok(());
        }
        Err(RuntimeError::Type(
            "Operands must be two numbers or two strings.",
        ))
    }

    fn op_subtract(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if a.is_int() && b.is_int() {
            let result = a.as_int().wrapping_sub(b.as_int());
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_int(result));
            return Ok(());
        }
        if a.is_number() && b.is_number() {
            let result = a.as_number() - b.as_number();
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_float(result));
            return Ok(());
        }
        Err(RuntimeError::Type("Operands must be two numbers."))
    }

    fn op_multiply(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        // A string repeats by an int in either operand order.
        if b.is_int() && self.is_string_value(a) {
            return self.repeat_string(a.as_obj(), b.as_int());
        }
        if a.is_int() && self.is_string_value(b) {
            return self.repeat_string(b.as_obj(), a.as_int());
        }
        if a.is_int() && b.is_int() {
            let result = a.as_int().wrapping_mul(b.as_int());
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_int(result));
            return Ok(());
        }
        if a.is_number() && b.is_number() {
            let result = a.as_number() * b.as_number();
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_float(result));
            return Ok(());
        }
        Err(RuntimeError::Type("Operands must be two numbers."))
    }

    fn op_divide(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if !a.is_number() || !b.is_number() {
            return Err(RuntimeError::Type("Operands must be two numbers."));
        }
        let divisor = b.as_number();
        if divisor == 0.0 {
            return Err(RuntimeError::DivisionByZero);
        }
        let result = a.as_number() / divisor;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::from_float(result));
        Ok(())
    }

    fn op_modulus(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if a.is_int() && b.is_int() {
            if b.as_int() == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            let result = a.as_int().wrapping_rem(b.as_int());
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_int(result));
            return Ok(());
        }
        if a.is_number() && b.is_number() {
            let divisor = b.as_number();
            if divisor == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            let result = a.as_number() % divisor;
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_float(result));
            return Ok(());
        }
        Err(RuntimeError::Type("Operands must be two numbers."))
    }

    fn op_floor_divide(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if !a.is_number() || !b.is_number() {
            return Err(RuntimeError::Type("Operands must be two numbers."));
        }
        let divisor = b.as_number();
        if divisor == 0.0 {
            return Err(RuntimeError::DivisionByZero);
        }
        let result = (a.as_number() / divisor) as i32;
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::from_int(result));
        Ok(())
    }

    fn op_exponent(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if a.is_int() && b.is_int() {
            let result = (a.as_int() as f64).powf(b.as_int() as f64).round() as i32;
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_int(result));
            return Ok(());
        }
        if a.is_number() && b.is_number() {
            let result = a.as_number().powf(b.as_number());
            self.stack.pop()?;
            self.stack.pop()?;
            self.stack.push(Value::from_float(result));
            return Ok(());
        }
        Err(RuntimeError::Type("Operands must be two numbers."))
    }

    fn op_negate(&mut self) -> Result<()> {
        let value = self.stack.peek(0)?;
        if value.is_int() {
            let result = value.as_int().wrapping_neg();
            self.stack.pop()?;
            self.stack.push(Value::from_int(result));
            return Ok(());
        }
        if value.is_number() {
            let result = -value.as_number();
            self.stack.pop()?;
            self.stack.push(Value::from_float(result));
            return Ok(());
        }
        Err(RuntimeError::Type("Operand must be a number."))
    }

    fn op_invert(&mut self) -> Result<()> {
        let value = self.stack.peek(0)?;
        if !value.is_int() {
            return Err(RuntimeError::Type("Operand must be a number."));
        }
        let result = !value.as_int();
        self.stack.pop()?;
        self.stack.push(Value::from_int(result));
        Ok(())
    }

    fn op_compare(&mut self, compare: impl Fn(f64, f64) -> bool) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if !a.is_number() || !b.is_number() {
            return Err(RuntimeError::Type("Operands must be numbers."));
        }
        let result = compare(a.as_number(), b.as_number());
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::from_bool(result));
        Ok(())
    }

    fn op_int_binary(&mut self, apply: impl Fn(i32, i32) -> i32) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        if !a.is_int() || !b.is_int() {
            return Err(RuntimeError::Type("Operands must be two integers."));
        }
        let result = apply(a.as_int(), b.as_int());
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::from_int(result));
        Ok(())
    }

    /// Concatenate the two strings on top of the stack. The operands stay
    /// on the stack across the collection point so they remain rooted.
    fn concatenate(&mut self) -> Result<()> {
        let b = self.stack.peek(0)?;
        let a = self.stack.peek(1)?;
        let mut chars =
            String::with_capacity(self.heap.string(a.as_obj()).len() + self.heap.string(b.as_obj()).len());
        chars.push_str(self.heap.string(a.as_obj()));
        chars.push_str(self.heap.string(b.as_obj()));

        self.maybe_collect();
        let result = self.heap.intern_owned(chars);
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::from_obj(result));
        Ok(())
    }

    fn repeat_string(&mut self, string: ObjRef, count: i32) -> Result<()> {
        let chars = self.heap.string(string).repeat(count.max(0) as usize);

        self.maybe_collect();
        let result = self.heap.intern_owned(chars);
        self.stack.pop()?;
        self.stack.pop()?;
        self.stack.push(Value::from_obj(result));
        Ok(())
    }

    // ========================================================================
    // Lists and string indexing
    // ========================================================================

    fn op_list_index(&mut self) -> Result<()> {
        let index_value = self.stack.pop()?;
        let target = self.stack.pop()?;

        if !index_value.is_int() {
            return Err(RuntimeError::Type("Invalid index type."));
        }
        let index = index_value.as_int();

        if self.is_string_value(target) {
            return self.string_index(target.as_obj(), index);
        }

        if !self.is_kind(target, |kind| matches!(kind, ObjKind::List(_))) {
            return Err(RuntimeError::Type("Invalid type to index into."));
        }
        let list = self.heap.list(target.as_obj());
        if !list.is_valid_index(index) {
            return Err(RuntimeError::Type("List index out of range."));
        }
        let value = list.items[list.wrap_index(index)];
        self.stack.push(value);
        Ok(())
    }

    /// Indexing a string yields a one-character string; negative indices
    /// wrap after the raw index passes the range check.
    fn string_index(&mut self, string: ObjRef, index: i32) -> Result<()> {
        let text = {
            let chars = self.heap.string(string);
            let length = chars.chars().count() as i32;
            if index < -length || index > length - 1 {
                return Err(RuntimeError::Type("String index out of range."));
            }
            let wrapped = if index < 0 { length + index } else { index } as usize;
            chars
                .chars()
                .nth(wrapped)
                .map(|c| c.to_string())
                .ok_or_else(|| RuntimeError::Internal("string index misses".to_string()))?
        };
        self.maybe_collect();
        let result = self.heap.intern_owned(text);
        self.stack.push(Value::from_obj(result));
        Ok(())
    }

    fn op_list_store(&mut self) -> Result<()> {
        let item = self.stack.pop()?;
        let index_value = self.stack.pop()?;
        let target = self.stack.pop()?;

        if !self.is_kind(target, |kind| matches!(kind, ObjKind::List(_))) {
            return Err(RuntimeError::Type("Cannot store value in a non-list."));
        }
        if !index_value.is_int() {
            return Err(RuntimeError::Type("List index is not an integer."));
        }
        let index = index_value.as_int();
        let list = target.as_obj();

        // Validity is decided on the raw index, before wrapping or writing.
        if !self.heap.list(list).is_valid_index(index) {
            return Err(RuntimeError::Type("Invalid list index."));
        }
        let slot = self.heap.list(list).wrap_index(index);
        self.heap.list_mut(list).items[slot] = item;
        self.stack.push(item);
        Ok(())
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Collection point: every VM allocation is preceded by this check, so
    /// a cycle can only start while the operands are rooted.
    fn maybe_collect(&mut self) {
        if cfg!(feature = "gc-stress") || self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Run a full mark-sweep cycle now.
    pub fn collect_garbage(&mut self) {
        // Roots: the stack, frame closures, the open-upvalue list, the
        // globals table, and the cached init string.
        for value in self.stack.as_slice() {
            self.heap.mark_value(*value);
        }
        let closures: Vec<ObjRef> = self.frames.iter().map(|frame| frame.closure).collect();
        for closure in closures {
            self.heap.mark_object(closure);
        }
        let mut upvalue = self.open_upvalues;
        while let Some(current) = upvalue {
            self.heap.mark_object(current);
            upvalue = self.heap.upvalue(current).next;
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.prune_strings();
        self.heap.sweep();
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn report_runtime_error(&mut self, error: &RuntimeError) {
        eprintln!("{}", error);

        for frame in self.frames.iter().rev() {
            let function_ref = self.heap.closure(frame.closure).function;
            let function = self.heap.function(function_ref);
            // The ip has advanced past the faulting instruction.
            let line = function.chunk.line(frame.ip.saturating_sub(1));
            match function.name {
                Some(name) => eprintln!("[line {}] in <func {}>", line, self.heap.string(name)),
                None => eprintln!("[line {}] in script", line),
            }
        }

        self.reset_stack();
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }
}

impl Default for VM {
    fn default() -> VM {
        VM::new()
    }
}
