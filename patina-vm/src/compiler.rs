// patina-vm - Single-pass compiler
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The single-pass compiler: tokens straight to bytecode.
//!
//! Expressions parse with a Pratt table mapping each token kind to optional
//! prefix and infix rules plus a precedence. Statements and declarations
//! recurse directly. Each function under compilation gets its own state
//! (locals, upvalues, scope depth) on a stack mirroring the lexical nesting;
//! class bodies push a parallel class-state stack. Errors are collected and
//! reported together; panic mode suppresses cascades until the parser
//! resynchronizes on a statement boundary.

use std::fmt;

use patina_lexer::{Scanner, Token, TokenKind};

use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::object::{Function, ObjRef};
use crate::opcode::OpCode;
use crate::value::Value;

/// Where a compile error sits relative to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorAt {
    /// At end of input.
    End,
    /// At a particular lexeme.
    Token(String),
    /// The token itself was a scan error; its message stands alone.
    Nowhere,
}

/// A single compile error with its line and context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub at: ErrorAt,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.at {
            ErrorAt::End => write!(f, " at end")?,
            ErrorAt::Token(lexeme) => write!(f, " at '{}'", lexeme)?,
            ErrorAt::Nowhere => {}
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Compile a source unit into a script function on the heap.
///
/// On failure returns every error collected during the parse.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, heap);
    compiler.begin_state(FunctionKind::Script);

    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let (function, _upvalues) = compiler.end_state();

    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(compiler.heap.alloc_function(function))
    }
}

/// Expression precedence, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Ternary,    // ?:
    LogicalOr,  // or ||
    LogicalAnd, // and &&
    Equality,   // == !=
    Comparison, // < > <= >=
    BitwiseOr,  // |
    BitwiseXor, // ^
    BitwiseAnd, // &
    Shift,      // << >>
    Term,       // + -
    Factor,     // * / % %%
    Exponent,   // **
    Unary,      // ~ ! - +
    Prefix,     // ++ --
    Call,       // . () []
    Postfix,    // ++ --
    Primary,
}

impl Precedence {
    /// One level tighter; binary operators parse their right operand here,
    /// which makes every binary operator left-associative.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Ternary,
            Precedence::Ternary => Precedence::LogicalOr,
            Precedence::LogicalOr => Precedence::LogicalAnd,
            Precedence::LogicalAnd => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::BitwiseOr,
            Precedence::BitwiseOr => Precedence::BitwiseXor,
            Precedence::BitwiseXor => Precedence::BitwiseAnd,
            Precedence::BitwiseAnd => Precedence::Shift,
            Precedence::Shift => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Exponent,
            Precedence::Exponent => Precedence::Unary,
            Precedence::Unary => Precedence::Prefix,
            Precedence::Prefix => Precedence::Call,
            Precedence::Call => Precedence::Postfix,
            Precedence::Postfix => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Compiler<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

/// A local variable slot. Depth −1 marks "declared but not yet
/// initialized", which forbids reading a local in its own initializer.
struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

/// A captured variable recorded while compiling a function.
#[derive(Clone, Copy)]
struct UpvalueInfo {
    index: u8,
    /// Captures the enclosing function's local when true, otherwise one of
    /// its upvalues.
    is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_LIST_ITEMS: usize = 256;

/// Per-function compilation state; the stack of these mirrors lexical
/// function nesting.
struct FunctionState<'src> {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueInfo>,
    scope_depth: i32,
}

/// Per-class compilation state.
struct ClassState {
    has_superclass: bool,
}

struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: &'h mut Heap,
    states: Vec<FunctionState<'src>>,
    classes: Vec<ClassState>,
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        Compiler {
            scanner: Scanner::new(source),
            current: Token::empty(),
            previous: Token::empty(),
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            states: Vec::new(),
            classes: Vec::new(),
        }
    }

    // ========================================================================
    // Function state
    // ========================================================================

    fn begin_state(&mut self, kind: FunctionKind) {
        let mut function = Function::new();
        if kind != FunctionKind::Script {
            function.name = Some(self.heap.intern(self.previous.lexeme));
        }

        let mut state = FunctionState {
            function,
            kind,
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
        };

        // Slot 0 is reserved: it holds the receiver for methods and an
        // unnameable local otherwise.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        state.locals.push(Local {
            name: slot_zero,
            depth: 0,
            is_captured: false,
        });

        self.states.push(state);
    }

    fn end_state(&mut self) -> (Function, Vec<UpvalueInfo>) {
        self.emit_return();
        let state = self.states.pop().unwrap();

        #[cfg(feature = "print-code")]
        if !self.had_error {
            let name = match state.function.name {
                Some(name) => self.heap.string(name).to_string(),
                None => "<script>".to_string(),
            };
            crate::debug::disassemble_chunk(self.heap, &state.function.chunk, &name);
        }

        (state.function, state.upvalues)
    }

    fn state(&self) -> &FunctionState<'src> {
        self.states.last().unwrap()
    }

    fn state_mut(&mut self) -> &mut FunctionState<'src> {
        self.states.last_mut().unwrap()
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.state_mut().function.chunk
    }

    // ========================================================================
    // Token plumbing
    // ========================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let at = match token.kind {
            TokenKind::Eof => ErrorAt::End,
            TokenKind::Error => ErrorAt::Nowhere,
            _ => ErrorAt::Token(token.lexeme.to_string()),
        };
        self.errors.push(CompileError {
            line: token.line,
            at,
            message: message.to_string(),
        });
        self.had_error = true;
    }

    /// Skip tokens until a statement boundary, then resume reporting.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Func
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.as_byte());
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_return(&mut self) {
        if self.state().kind == FunctionKind::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::None);
        }
        self.emit_op(OpCode::Return);
    }

    fn emit_constant(&mut self, value: Value) {
        let line = self.previous.line;
        if !self.chunk_mut().write_constant(value, line) {
            self.error("Too many constants in one chunk.");
        }
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let constant = self.chunk_mut().add_constant(value);
        if constant > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        constant as u8
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let string = self.heap.intern(name);
        self.make_constant(Value::from_obj(string))
    }

    /// Emit a jump with a placeholder offset; returns the operand's
    /// position for patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_mut().code.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // Account for the two operand bytes the VM has already read.
        let jump = self.chunk_mut().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let chunk = self.chunk_mut();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk_mut().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    // ========================================================================
    // Scopes and variables
    // ========================================================================

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state_mut().scope_depth -= 1;

        loop {
            let (live, captured) = {
                let state = self.state();
                match state.locals.last() {
                    Some(local) if local.depth > state.scope_depth => (true, local.is_captured),
                    _ => (false, false),
                }
            };
            if !live {
                break;
            }
            // Captured locals close their upvalue as they leave the stack.
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.state_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.state().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.state_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.state().scope_depth == 0 {
            return;
        }

        let name = self.previous.lexeme;
        let mut duplicate = false;
        {
            let state = self.state();
            for local in state.locals.iter().rev() {
                if local.depth != -1 && local.depth < state.scope_depth {
                    break;
                }
                if local.name == name {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.state().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_initialized(&mut self) {
        let state = self.state_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        state.locals.last_mut().unwrap().depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, state_idx: usize, name: &str) -> Option<u8> {
        let found = self.states[state_idx]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot, local.depth));

        if let Some((slot, depth)) = found {
            if depth == -1 {
                self.error("Can't read local variable in its own initializer.");
            }
            return Some(slot as u8);
        }
        None
    }

    fn add_upvalue(&mut self, state_idx: usize, index: u8, is_local: bool) -> u8 {
        for (i, upvalue) in self.states[state_idx].upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i as u8;
            }
        }

        if self.states[state_idx].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        let state = &mut self.states[state_idx];
        state.upvalues.push(UpvalueInfo { index, is_local });
        state.function.upvalue_count = state.upvalues.len();
        (state.upvalues.len() - 1) as u8
    }

    /// Search the enclosing compiler chain for a captured variable, adding
    /// a deduplicated upvalue entry to every compiler along the way.
    fn resolve_upvalue(&mut self, state_idx: usize, name: &str) -> Option<u8> {
        if state_idx == 0 {
            return None;
        }
        let enclosing = state_idx - 1;

        if let Some(local) = self.resolve_local(enclosing, name) {
            self.states[enclosing].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(state_idx, local, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(state_idx, upvalue, false));
        }

        None
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let state_idx = self.states.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(state_idx, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(state_idx, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    // ========================================================================
    // Pratt parsing
    // ========================================================================

    fn get_rule(kind: TokenKind) -> ParseRule<'src, 'h> {
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'h>>,
            Option<ParseFn<'src, 'h>>,
            Precedence,
        ) = match kind {
            TokenKind::LeftParen => (
                Some(Self::grouping),
                Some(Self::call),
                Precedence::Call,
            ),
            TokenKind::LeftBracket => (
                Some(Self::list),
                Some(Self::subscript),
                Precedence::Call,
            ),
            TokenKind::Dot => (None, Some(Self::dot), Precedence::Call),
            TokenKind::Question => (None, Some(Self::ternary), Precedence::Ternary),

            TokenKind::Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            TokenKind::Plus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            TokenKind::Star => (None, Some(Self::binary), Precedence::Factor),
            TokenKind::Slash => (None, Some(Self::binary), Precedence::Factor),
            TokenKind::Percent => (None, Some(Self::binary), Precedence::Factor),
            TokenKind::PercentPercent => (None, Some(Self::binary), Precedence::Factor),
            TokenKind::StarStar => (None, Some(Self::binary), Precedence::Exponent),

            TokenKind::Bang => (Some(Self::unary), None, Precedence::None),
            TokenKind::Tilde => (Some(Self::unary), None, Precedence::None),

            TokenKind::BangEqual => (None, Some(Self::binary), Precedence::Equality),
            TokenKind::EqualEqual => (None, Some(Self::binary), Precedence::Equality),
            TokenKind::Greater => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::GreaterEqual => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::Less => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::LessEqual => (None, Some(Self::binary), Precedence::Comparison),

            TokenKind::Pipe => (None, Some(Self::binary), Precedence::BitwiseOr),
            TokenKind::Caret => (None, Some(Self::binary), Precedence::BitwiseXor),
            TokenKind::Amp => (None, Some(Self::binary), Precedence::BitwiseAnd),
            TokenKind::LessLess => (None, Some(Self::binary), Precedence::Shift),
            TokenKind::GreaterGreater => (None, Some(Self::binary), Precedence::Shift),

            TokenKind::Identifier => (Some(Self::variable), None, Precedence::None),
            TokenKind::String => (Some(Self::string), None, Precedence::None),
            TokenKind::Int => (Some(Self::int), None, Precedence::None),
            TokenKind::Float => (Some(Self::float), None, Precedence::None),

            TokenKind::And => (None, Some(Self::logical_and), Precedence::LogicalAnd),
            TokenKind::Or => (None, Some(Self::logical_or), Precedence::LogicalOr),
            TokenKind::True => (Some(Self::literal), None, Precedence::None),
            TokenKind::False => (Some(Self::literal), None, Precedence::None),
            TokenKind::None => (Some(Self::literal), None, Precedence::None),
            TokenKind::Super => (Some(Self::super_), None, Precedence::None),
            TokenKind::This => (Some(Self::this), None, Precedence::None),

            _ => (None, None, Precedence::None),
        };
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match Self::get_rule(self.previous.kind).prefix {
            Some(rule) => rule,
            None => {
                self.error("Expect expression.");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        // An `=` nobody consumed means the target was not assignable.
        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    // ========================================================================
    // Expression rules
    // ========================================================================

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn int(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<i32>() {
            Ok(value) => self.emit_constant(Value::from_int(value)),
            Err(_) => self.error("Integer literal too large."),
        }
    }

    fn float(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::from_float(value)),
            Err(_) => self.error("Invalid float literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let bytes = lexeme.as_bytes();
        // Triple-quoted lexemes carry three delimiters on each side.
        let content = if bytes.len() >= 6 && bytes[1] == bytes[0] && bytes[2] == bytes[0] {
            &lexeme[3..lexeme.len() - 3]
        } else {
            &lexeme[1..lexeme.len() - 1]
        };
        let string = self.heap.intern(content);
        self.emit_constant(Value::from_obj(string));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::None => self.emit_op(OpCode::None),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;

        self.parse_precedence(Precedence::Unary);

        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Tilde => self.emit_op(OpCode::Invert),
            // Unary plus parses its operand and emits nothing.
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = Self::get_rule(operator);
        self.parse_precedence(rule.precedence.next());

        match operator {
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            TokenKind::Pipe => self.emit_op(OpCode::Or),
            TokenKind::Caret => self.emit_op(OpCode::Xor),
            TokenKind::Amp => self.emit_op(OpCode::And),
            TokenKind::LessLess => self.emit_op(OpCode::Lshift),
            TokenKind::GreaterGreater => self.emit_op(OpCode::Rshift),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Percent => self.emit_op(OpCode::Modulus),
            TokenKind::PercentPercent => self.emit_op(OpCode::FloorDivide),
            TokenKind::StarStar => self.emit_op(OpCode::Exponent),
            _ => {}
        }
    }

    fn ternary(&mut self, _can_assign: bool) {
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.expression();
        let end_jump = self.emit_jump(OpCode::Jump);

        self.consume(TokenKind::Colon, "Expect ':' in ternary.");
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Ternary);
        self.patch_jump(end_jump);
    }

    fn logical_and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::LogicalAnd);
        self.patch_jump(end_jump);
    }

    fn logical_or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::LogicalOr);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op_byte(OpCode::Call, arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, name);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_op_byte(OpCode::Invoke, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_op_byte(OpCode::GetProperty, name);
        }
    }

    fn list(&mut self, _can_assign: bool) {
        let mut item_count: usize = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                // Allow a trailing comma before the closing bracket.
                if self.check(TokenKind::RightBracket) {
                    break;
                }
                self.parse_precedence(Precedence::Ternary);
                if item_count == MAX_LIST_ITEMS {
                    self.error("Cannot have more than 256 items in a list literal.");
                }
                item_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after list literal.");

        self.emit_op(OpCode::ListBuild);
        self.emit_byte(item_count as u8);
    }

    fn subscript(&mut self, can_assign: bool) {
        self.parse_precedence(Precedence::Ternary);
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::ListStore);
        } else {
            self.emit_op(OpCode::ListIndex);
        }
    }

    fn super_(&mut self, _can_assign: bool) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.")
            }
            _ => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after super.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::SuperInvoke, name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable("super", false);
            self.emit_op_byte(OpCode::GetSuper, name);
        }
    }

    fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn argument_list(&mut self) -> u8 {
        let mut arg_count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                arg_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        arg_count.min(255) as u8
    }

    // ========================================================================
    // Declarations and statements
    // ========================================================================

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Func) {
            self.func_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::None);
        }

        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn func_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may refer to itself; it is initialized before its body.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        self.begin_state(kind);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.state().function.arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.state_mut().function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_state();
        let function = self.heap.alloc_function(function);
        let constant = self.make_constant(Value::from_obj(function));
        self.emit_op_byte(OpCode::Closure, constant);

        for upvalue in upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Func, "Expect only methods in class body.");
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);

        let kind = if self.previous.lexeme == "__init__" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };

        self.function(kind);
        self.emit_op_byte(OpCode::Method, constant);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.match_token(TokenKind::LeftParen) {
            if self.match_token(TokenKind::Identifier) {
                self.variable(false);

                if class_name == self.previous.lexeme {
                    self.error("A class can't inherit from itself.");
                }

                // A hidden scope holds the superclass under the name 'super'.
                self.begin_scope();
                self.add_local("super");
                self.define_variable(0);

                self.named_variable(class_name, false);
                self.emit_op(OpCode::Inherit);
                self.classes.last_mut().unwrap().has_superclass = true;
            }
            self.consume(TokenKind::RightParen, "Expect ')' after superclass.");
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }

        self.classes.pop();
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.state().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.state().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }

            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_mut().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_mut().code.len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // The increment runs after the body, so jump over it now and
            // loop back to it from the body's end.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_mut().code.len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }
}
