// patina-vm - Bytecode instruction definitions
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode instructions for the Patina VM.
//!
//! Instructions are encoded as single bytes followed by their operands.
//! Multi-byte operands are big-endian. Stack effects below are written
//! `before -> after` with the top of the stack on the right.

/// Bytecode instructions for the Patina VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Push constant `idx8` from the constant pool: `-> value`.
    Constant,
    /// Push constant `idx24` (big-endian) from the constant pool: `-> value`.
    ConstantLong,
    /// Push `none`: `-> none`.
    None,
    /// Push `true`: `-> true`.
    True,
    /// Push `false`: `-> false`.
    False,
    /// Pop the top value: `v ->`.
    Pop,

    /// Add numbers or concatenate strings: `a b -> a+b`.
    Add,
    /// Subtract: `a b -> a-b`.
    Subtract,
    /// Multiply numbers, or repeat a string by an int: `a b -> a*b`.
    Multiply,
    /// Divide, always producing a float: `a b -> a/b`.
    Divide,
    /// Remainder (`%` on ints, `fmod` on floats): `a b -> a%b`.
    Modulus,
    /// Floating divide truncated to an int: `a b -> a//b`.
    FloorDivide,
    /// Exponentiation; int base and exponent round to an int: `a b -> a**b`.
    Exponent,
    /// Arithmetic negation: `v -> -v`.
    Negate,
    /// Bitwise not on an int: `v -> ~v`.
    Invert,
    /// Logical not (falsey = `none` or `false`): `v -> !v`.
    Not,

    /// Kind-sensitive equality: `a b -> a==b`.
    Equal,
    /// Numeric greater-than: `a b -> a>b`.
    Greater,
    /// Numeric less-than: `a b -> a<b`.
    Less,
    /// Bitwise and on ints: `a b -> a&b`.
    And,
    /// Bitwise or on ints: `a b -> a|b`.
    Or,
    /// Bitwise xor on ints: `a b -> a^b`.
    Xor,
    /// Left shift on ints: `a b -> a<<b`.
    Lshift,
    /// Right shift on ints: `a b -> a>>b`.
    Rshift,

    /// Define global named by string constant `idx8`: `v ->`.
    DefineGlobal,
    /// Push global named by string constant `idx8`: `-> v`.
    GetGlobal,
    /// Assign existing global named by string constant `idx8`; errors if
    /// undefined. Leaves the value: `v -> v`.
    SetGlobal,
    /// Push local at frame slot `slot8`: `-> v`.
    GetLocal,
    /// Store top of stack into frame slot `slot8` without popping: `v -> v`.
    SetLocal,
    /// Push the value of upvalue `slot8`: `-> v`.
    GetUpvalue,
    /// Store top of stack into upvalue `slot8` without popping: `v -> v`.
    SetUpvalue,

    /// Unconditional forward jump by `off16`.
    Jump,
    /// Forward jump by `off16` when the top of the stack is falsey. Peeks,
    /// never pops.
    JumpIfFalse,
    /// Backward jump by `off16`.
    Loop,

    /// Call the value at `peek(argc)` with `argc8` arguments.
    Call,
    /// Build a closure from function constant `idx8`; followed by one
    /// `(is_local, index)` byte pair per upvalue.
    Closure,
    /// Close the topmost stack slot's upvalue and pop it: `v ->`.
    CloseUpvalue,
    /// Return from the current function: pops the result, closes upvalues
    /// above the frame base, and restores the caller's stack.
    Return,

    /// Push a new class named by string constant `idx8`: `-> class`.
    Class,
    /// Copy methods from superclass at `peek(1)` into subclass at `peek(0)`,
    /// then pop the subclass: `super sub -> super`.
    Inherit,
    /// Bind the closure at `peek(0)` as a method (named by string constant
    /// `idx8`) of the class at `peek(1)`: `class closure -> class`.
    Method,
    /// Read field or bind method named by string constant `idx8`:
    /// `instance -> v`.
    GetProperty,
    /// Write field named by string constant `idx8`:
    /// `instance v -> v`.
    SetProperty,
    /// Invoke method named by string constant `idx8` with `argc8` arguments
    /// directly on the receiver at `peek(argc)`.
    Invoke,
    /// Bind a superclass method named by string constant `idx8`:
    /// `instance superclass -> bound`.
    GetSuper,
    /// Invoke a superclass method named by string constant `idx8` with
    /// `argc8` arguments: pops the superclass, then calls.
    SuperInvoke,

    /// Collect the top `n8` values into a new list: `v1 .. vn -> list`.
    ListBuild,
    /// Index a list or string: `target index -> element`.
    ListIndex,
    /// Store into a list, leaving the value: `list index v -> v`.
    ListStore,

    /// Pop and print a value followed by a newline: `v ->`.
    Print,
}

impl OpCode {
    /// Decode a byte back into an instruction. Returns `None` for bytes
    /// that are not valid opcodes.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        use OpCode::*;
        const OPCODES: &[OpCode] = &[
            Constant,
            ConstantLong,
            None,
            True,
            False,
            Pop,
            Add,
            Subtract,
            Multiply,
            Divide,
            Modulus,
            FloorDivide,
            Exponent,
            Negate,
            Invert,
            Not,
            Equal,
            Greater,
            Less,
            And,
            Or,
            Xor,
            Lshift,
            Rshift,
            DefineGlobal,
            GetGlobal,
            SetGlobal,
            GetLocal,
            SetLocal,
            GetUpvalue,
            SetUpvalue,
            Jump,
            JumpIfFalse,
            Loop,
            Call,
            Closure,
            CloseUpvalue,
            Return,
            Class,
            Inherit,
            Method,
            GetProperty,
            SetProperty,
            Invoke,
            GetSuper,
            SuperInvoke,
            ListBuild,
            ListIndex,
            ListStore,
            Print,
        ];
        OPCODES.get(byte as usize).copied()
    }

    /// Encode the instruction as its byte form.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}
