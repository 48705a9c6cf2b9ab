// patina-vm - Bytecode disassembler
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Chunk disassembly, used by the `print-code` and `trace-execution`
//! features and handy when debugging the compiler.

use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::object::ObjKind;
use crate::opcode::OpCode;

/// Disassemble a whole chunk to stderr under a header.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) {
    eprintln!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(heap, chunk, offset);
    }
}

/// Disassemble the instruction at `offset` to stderr, returning the offset
/// of the next instruction.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> usize {
    let (text, next) = render_instruction(heap, chunk, offset);
    let line = if offset > 0 && chunk.line(offset) == chunk.line(offset - 1) {
        "   |".to_string()
    } else {
        format!("{:4}", chunk.line(offset))
    };
    eprintln!("{:04} {} {}", offset, line, text);
    next
}

/// Render one instruction; returns the text and the next offset.
pub fn render_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let byte = chunk.code[offset];
    let op = match OpCode::from_byte(byte) {
        Some(op) => op,
        None => return (format!("Unknown opcode {}", byte), offset + 1),
    };

    match op {
        OpCode::Constant => constant_instruction(heap, chunk, op, offset),
        OpCode::ConstantLong => long_constant_instruction(heap, chunk, offset),
        OpCode::DefineGlobal
        | OpCode::GetGlobal
        | OpCode::SetGlobal
        | OpCode::Class
        | OpCode::Method
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper => constant_instruction(heap, chunk, op, offset),

        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call
        | OpCode::ListBuild => byte_instruction(chunk, op, offset),

        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(chunk, op, 1, offset),
        OpCode::Loop => jump_instruction(chunk, op, -1, offset),

        OpCode::Invoke | OpCode::SuperInvoke => invoke_instruction(heap, chunk, op, offset),

        OpCode::Closure => closure_instruction(heap, chunk, offset),

        _ => (format!("{:?}", op), offset + 1),
    }
}

fn constant_value(heap: &Heap, chunk: &Chunk, index: usize) -> String {
    match chunk.constants.get(index) {
        Some(value) => heap.format_value(*value),
        None => "<bad constant>".to_string(),
    }
}

fn constant_instruction(heap: &Heap, chunk: &Chunk, op: OpCode, offset: usize) -> (String, usize) {
    let index = chunk.code[offset + 1] as usize;
    (
        format!(
            "{:<16} {:4} '{}'",
            format!("{:?}", op),
            index,
            constant_value(heap, chunk, index)
        ),
        offset + 2,
    )
}

fn long_constant_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let index = ((chunk.code[offset + 1] as usize) << 16)
        | ((chunk.code[offset + 2] as usize) << 8)
        | chunk.code[offset + 3] as usize;
    (
        format!(
            "{:<16} {:4} '{}'",
            "ConstantLong",
            index,
            constant_value(heap, chunk, index)
        ),
        offset + 4,
    )
}

fn byte_instruction(chunk: &Chunk, op: OpCode, offset: usize) -> (String, usize) {
    let operand = chunk.code[offset + 1];
    (
        format!("{:<16} {:4}", format!("{:?}", op), operand),
        offset + 2,
    )
}

fn jump_instruction(chunk: &Chunk, op: OpCode, sign: i64, offset: usize) -> (String, usize) {
    let jump = ((chunk.code[offset + 1] as i64) << 8) | chunk.code[offset + 2] as i64;
    let target = offset as i64 + 3 + sign * jump;
    (
        format!("{:<16} {:4} -> {}", format!("{:?}", op), offset, target),
        offset + 3,
    )
}

fn invoke_instruction(heap: &Heap, chunk: &Chunk, op: OpCode, offset: usize) -> (String, usize) {
    let index = chunk.code[offset + 1] as usize;
    let arg_count = chunk.code[offset + 2];
    (
        format!(
            "{:<16} ({} args) {:4} '{}'",
            format!("{:?}", op),
            arg_count,
            index,
            constant_value(heap, chunk, index)
        ),
        offset + 3,
    )
}

fn closure_instruction(heap: &Heap, chunk: &Chunk, offset: usize) -> (String, usize) {
    let index = chunk.code[offset + 1] as usize;
    let mut text = format!(
        "{:<16} {:4} {}",
        "Closure",
        index,
        constant_value(heap, chunk, index)
    );

    // The upvalue descriptors follow inline.
    let mut next = offset + 2;
    if let Some(value) = chunk.constants.get(index) {
        if value.is_obj() {
            if let ObjKind::Function(function) = &heap.get(value.as_obj()).kind {
                for _ in 0..function.upvalue_count {
                    let is_local = chunk.code[next] != 0;
                    let slot = chunk.code[next + 1];
                    text.push_str(&format!(
                        "\n{:04}    | {:>21} {}",
                        next,
                        if is_local { "local" } else { "upvalue" },
                        slot
                    ));
                    next += 2;
                }
            }
        }
    }
    (text, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn renders_operand_forms() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::from_int(7), 1);
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write(2, 1);
        chunk.write_op(OpCode::Jump, 2);
        chunk.write(0, 2);
        chunk.write(4, 2);
        chunk.write_op(OpCode::Pop, 2);

        let (text, next) = render_instruction(&heap, &chunk, 0);
        assert!(text.contains("Constant"));
        assert!(text.contains("'7'"));
        assert_eq!(next, 2);

        let (text, next) = render_instruction(&heap, &chunk, 2);
        assert!(text.contains("GetLocal"));
        assert_eq!(next, 4);

        let (text, next) = render_instruction(&heap, &chunk, 4);
        assert!(text.contains("Jump"));
        assert!(text.contains("-> 11"));
        assert_eq!(next, 7);

        let (text, next) = render_instruction(&heap, &chunk, 7);
        assert_eq!(text, "Pop");
        assert_eq!(next, 8);
    }
}
