use super::chunk::{Chunk, Instruction};
use std::convert::TryFrom;

/// Prints every instruction in `chunk` under a header. Inspection only.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset);
    }
}

/// Prints the instruction at `offset` and returns the offset of the next one.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.line(offset) == chunk.line(offset - 1) {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.line(offset));
    }

    let instr = match Instruction::try_from(chunk.byte(offset)) {
        Ok(instr) => instr,
        Err(_) => {
            println!("unknown opcode {}", chunk.byte(offset));
            return offset + 1;
        }
    };

    match instr {
        Instruction::Constant
        | Instruction::GetGlobal
        | Instruction::DefineGlobal
        | Instruction::SetGlobal => constant_instruction(chunk, instr, offset),
        Instruction::GetLocal | Instruction::SetLocal => byte_instruction(chunk, instr, offset),
        _ => simple_instruction(instr, offset),
    }
}

fn name(instr: Instruction) -> &'static str {
    match instr {
        Instruction::Constant => "OP_CONSTANT",
        Instruction::Nil => "OP_NIL",
        Instruction::True => "OP_TRUE",
        Instruction::False => "OP_FALSE",
        Instruction::Pop => "OP_POP",
        Instruction::GetLocal => "OP_GET_LOCAL",
        Instruction::SetLocal => "OP_SET_LOCAL",
        Instruction::GetGlobal => "OP_GET_GLOBAL",
        Instruction::DefineGlobal => "OP_DEFINE_GLOBAL",
        Instruction::SetGlobal => "OP_SET_GLOBAL",
        Instruction::Equal => "OP_EQUAL",
        Instruction::Greater => "OP_GREATER",
        Instruction::Less => "OP_LESS",
        Instruction::Add => "OP_ADD",
        Instruction::Subtract => "OP_SUBTRACT",
        Instruction::Multiply => "OP_MULTIPLY",
        Instruction::Divide => "OP_DIVIDE",
        Instruction::Not => "OP_NOT",
        Instruction::Negate => "OP_NEGATE",
        Instruction::Print => "OP_PRINT",
        Instruction::Return => "OP_RETURN",
    }
}

fn simple_instruction(instr: Instruction, offset: usize) -> usize {
    println!("{}", name(instr));
    offset + 1
}

fn constant_instruction(chunk: &Chunk, instr: Instruction, offset: usize) -> usize {
    let index = chunk.byte(offset + 1) as usize;
    println!(
        "{:<16} {:4} '{}'",
        name(instr),
        index,
        chunk.constant(index)
    );
    offset + 2
}

fn byte_instruction(chunk: &Chunk, instr: Instruction, offset: usize) -> usize {
    let slot = chunk.byte(offset + 1);
    println!("{:<16} {:4}", name(instr), slot);
    offset + 2
}
