use super::{
    chunk::{Chunk, Instruction},
    compiler, debug,
    map::Map,
    value::{ObjString, Value},
};
use std::convert::TryFrom;
use std::io::Write;
use std::rc::Rc;

const STACK_MAX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    Compile,
    Runtime,
}

/// The virtual machine. Globals and interned strings outlive any single
/// `interpret` call, so a REPL feeding one VM keeps its state. Program
/// output goes to `out`; diagnostics go to stderr.
pub struct Vm<W: Write> {
    stack: Vec<Value>,
    globals: Map,
    strings: Map,
    out: W,
}

impl<W: Write> Vm<W> {
    pub fn new(out: W) -> Self {
        Self {
            stack: Vec::with_capacity(STACK_MAX),
            globals: Map::new(),
            strings: Map::new(),
            out,
        }
    }

    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let chunk =
            compiler::compile(source, &mut self.strings).map_err(|_| InterpretError::Compile)?;
        if cfg!(feature = "debug-bytecode") {
            debug::disassemble_chunk(&chunk, "script");
        }
        self.run(&chunk)
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap()
    }

    /// The compiler only emits arithmetic after a type check, so popping a
    /// number cannot fail once `are_numbers` has passed.
    fn pop_number(&mut self) -> f64 {
        match self.pop() {
            Value::Number(n) => n,
            _ => unreachable!(),
        }
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn runtime_error(&mut self, chunk: &Chunk, ip: usize, message: &str) -> InterpretError {
        eprintln!("{}", message);
        eprintln!("[line {}] in script", chunk.line(ip - 1));
        self.reset_stack();
        InterpretError::Runtime
    }

    fn read_string(chunk: &Chunk, index: usize) -> Rc<ObjString> {
        match chunk.constant(index) {
            Value::Str(name) => Rc::clone(name),
            _ => unreachable!(),
        }
    }

    fn concatenate(&mut self) {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Str(a), Value::Str(b)) => {
                let chars = format!("{}{}", a, b);
                let string = ObjString::intern(&chars, &mut self.strings);
                self.push(Value::Str(string));
            }
            _ => unreachable!(),
        }
    }

    fn run(&mut self, chunk: &Chunk) -> Result<(), InterpretError> {
        let mut ip = 0;

        while ip < chunk.len() {
            if cfg!(feature = "debug-execution") {
                print!("          ");
                for value in &self.stack {
                    print!("[ {} ]", value);
                }
                println!();
                debug::disassemble_instruction(chunk, ip);
            }

            let instr = match Instruction::try_from(chunk.byte(ip)) {
                Ok(instr) => instr,
                Err(_) => unreachable!(),
            };
            ip += 1;

            match instr {
                Instruction::Constant => {
                    let index = chunk.byte(ip) as usize;
                    ip += 1;
                    self.push(chunk.constant(index).clone());
                }
                Instruction::Nil => self.push(Value::Nil),
                Instruction::True => self.push(Value::Bool(true)),
                Instruction::False => self.push(Value::Bool(false)),
                Instruction::Pop => {
                    self.pop();
                }
                Instruction::GetLocal => {
                    let slot = chunk.byte(ip) as usize;
                    ip += 1;
                    self.push(self.stack[slot].clone());
                }
                Instruction::SetLocal => {
                    // Assignment is an expression: the value stays on top.
                    let slot = chunk.byte(ip) as usize;
                    ip += 1;
                    self.stack[slot] = self.peek(0).clone();
                }
                Instruction::GetGlobal => {
                    let index = chunk.byte(ip) as usize;
                    ip += 1;
                    let name = Self::read_string(chunk, index);
                    match self.globals.get(&name) {
                        Some(value) => self.push(value),
                        None => {
                            let message = format!("Undefined variable '{}'", name);
                            return Err(self.runtime_error(chunk, ip, &message));
                        }
                    }
                }
                Instruction::DefineGlobal => {
                    let index = chunk.byte(ip) as usize;
                    ip += 1;
                    let name = Self::read_string(chunk, index);
                    let value = self.peek(0).clone();
                    self.globals.set(name, value);
                    self.pop();
                }
                Instruction::SetGlobal => {
                    let index = chunk.byte(ip) as usize;
                    ip += 1;
                    let name = Self::read_string(chunk, index);
                    let value = self.peek(0).clone();
                    if self.globals.set(Rc::clone(&name), value) {
                        // Assignment must not create the variable.
                        self.globals.delete(&name);
                        let message = format!("Undefined variable '{}'", name);
                        return Err(self.runtime_error(chunk, ip, &message));
                    }
                }
                Instruction::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Instruction::Greater => {
                    if !Value::are_numbers(self.peek(1), self.peek(0)) {
                        return Err(self.runtime_error(chunk, ip, "Operands must be numbers."));
                    }
                    let b = self.pop_number();
                    let a = self.pop_number();
                    self.push(Value::Bool(a > b));
                }
                Instruction::Less => {
                    if !Value::are_numbers(self.peek(1), self.peek(0)) {
                        return Err(self.runtime_error(chunk, ip, "Operands must be numbers."));
                    }
                    let b = self.pop_number();
                    let a = self.pop_number();
                    self.push(Value::Bool(a < b));
                }
                Instruction::Add => {
                    if Value::are_strings(self.peek(1), self.peek(0)) {
                        self.concatenate();
                    } else if Value::are_numbers(self.peek(1), self.peek(0)) {
                        let b = self.pop_number();
                        let a = self.pop_number();
                        self.push(Value::Number(a + b));
                    } else {
                        return Err(self.runtime_error(
                            chunk,
                            ip,
                            "Operands must be two numbers or two strings.",
                        ));
                    }
                }
                Instruction::Subtract => {
                    if !Value::are_numbers(self.peek(1), self.peek(0)) {
                        return Err(self.runtime_error(chunk, ip, "Operands must be numbers."));
                    }
                    let b = self.pop_number();
                    let a = self.pop_number();
                    self.push(Value::Number(a - b));
                }
                Instruction::Multiply => {
                    if !Value::are_numbers(self.peek(1), self.peek(0)) {
                        return Err(self.runtime_error(chunk, ip, "Operands must be numbers."));
                    }
                    let b = self.pop_number();
                    let a = self.pop_number();
                    self.push(Value::Number(a * b));
                }
                Instruction::Divide => {
                    if !Value::are_numbers(self.peek(1), self.peek(0)) {
                        return Err(self.runtime_error(chunk, ip, "Operands must be numbers."));
                    }
                    let b = self.pop_number();
                    let a = self.pop_number();
                    self.push(Value::Number(a / b));
                }
                Instruction::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Instruction::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error(chunk, ip, "Operand must be a number."));
                    }
                    let n = self.pop_number();
                    self.push(Value::Number(-n));
                }
                Instruction::Print => {
                    let value = self.pop();
                    writeln!(self.out, "{}", value).ok();
                }
                Instruction::Return => return Ok(()),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_source(source: &str) -> (Result<(), InterpretError>, String) {
        let mut vm = Vm::new(Vec::new());
        let result = vm.interpret(source);
        (result, String::from_utf8(vm.out).unwrap())
    }

    fn assert_prints(source: &str, expected: &str) {
        let (result, output) = run_source(source);
        assert_eq!(result, Ok(()), "{source}");
        assert_eq!(output, expected, "{source}");
    }

    #[test]
    fn arithmetic_precedence() {
        assert_prints("print 1 + 2 * 3;", "7\n");
        assert_prints("print (1 + 2) * 3;", "9\n");
        assert_prints("print 6 / 2 - 1;", "2\n");
        assert_prints("print -(3);", "-3\n");
        assert_prints("print 1 - 2 - 3;", "-4\n");
    }

    #[test]
    fn string_concatenation() {
        assert_prints("print \"foo\" + \"bar\";", "foobar\n");
        assert_prints("print \"a\" + \"b\" + \"c\";", "abc\n");
    }

    #[test]
    fn comparison_and_equality() {
        assert_prints("print !(5 == 4);", "true\n");
        assert_prints("print 1 < 2;", "true\n");
        assert_prints("print 2 <= 2;", "true\n");
        assert_prints("print 3 > 4;", "false\n");
        assert_prints("print 3 >= 4;", "false\n");
        assert_prints("print 1 != 1;", "false\n");
        assert_prints("print nil == false;", "false\n");
        assert_prints("print \"a\" == \"b\";", "false\n");
        // Concatenation interns, so equality holds by identity.
        assert_prints("print \"foo\" + \"bar\" == \"foobar\";", "true\n");
    }

    #[test]
    fn truthiness() {
        assert_prints("print !nil;", "true\n");
        assert_prints("print !false;", "true\n");
        assert_prints("print !0;", "false\n");
        assert_prints("print !\"\";", "false\n");
    }

    #[test]
    fn globals() {
        assert_prints("var a = 1; var b = 2; print a + b;", "3\n");
        assert_prints("var a; print a;", "nil\n");
        assert_prints("var a = 1; a = 2; print a;", "2\n");
        // Assignment is an expression yielding the assigned value.
        assert_prints("var a = 1; print a = 2;", "2\n");
        // Redefinition is allowed at global scope.
        assert_prints("var a = 1; var a = 2; print a;", "2\n");
    }

    #[test]
    fn locals_and_shadowing() {
        assert_prints(
            "{ var x = 10; { var x = 20; print x; } print x; }",
            "20\n10\n",
        );
        assert_prints("{ var a = 1; var b = 2; a = b = 3; print a + b; }", "6\n");
        assert_prints("var g = 1; { var l = 2; print g + l; }", "3\n");
    }

    #[test]
    fn runtime_errors_reset_the_stack() {
        let mut vm = Vm::new(Vec::new());
        assert_eq!(vm.interpret("print x;"), Err(InterpretError::Runtime));
        assert!(vm.stack.is_empty());

        assert_eq!(vm.interpret("x = 1;"), Err(InterpretError::Runtime));
        // The failed assignment must not have defined the variable.
        assert_eq!(vm.interpret("print x;"), Err(InterpretError::Runtime));

        assert_eq!(vm.interpret("print -\"a\";"), Err(InterpretError::Runtime));
        assert_eq!(vm.interpret("print 1 + \"a\";"), Err(InterpretError::Runtime));
        assert_eq!(vm.interpret("print \"a\" - \"b\";"), Err(InterpretError::Runtime));
        assert_eq!(vm.interpret("print 1 < \"a\";"), Err(InterpretError::Runtime));
    }

    #[test]
    fn compile_errors_do_not_run() {
        let (result, output) = run_source("print 1; var a = 1 a = 2;");
        assert_eq!(result, Err(InterpretError::Compile));
        // Nothing executes when compilation fails.
        assert_eq!(output, "");

        assert_eq!(
            run_source("a + b = 3;").0,
            Err(InterpretError::Compile)
        );
    }

    #[test]
    fn state_persists_across_interpret_calls() {
        let mut vm = Vm::new(Vec::new());
        assert_eq!(vm.interpret("var a = 1;"), Ok(()));
        assert_eq!(vm.interpret("a = a + 1;"), Ok(()));
        assert_eq!(vm.interpret("print a;"), Ok(()));
        assert_eq!(String::from_utf8(vm.out).unwrap(), "2\n");
    }

    #[test]
    fn var_initializer_sees_prior_binding_only_at_global_scope() {
        // Globals: `var a = a + 1;` reads the existing global.
        assert_prints("var a = 1; var a = a + 1; print a;", "2\n");
        // Locals: reading the variable in its own initializer is rejected.
        let (result, _) = run_source("{ var a = a; }");
        assert_eq!(result, Err(InterpretError::Compile));
    }

    #[test]
    fn number_printing() {
        assert_prints("print 1;", "1\n");
        assert_prints("print 0.5;", "0.5\n");
        assert_prints("print 10 / 4;", "2.5\n");
        assert_prints("print 1 / 0 * -1;", "-inf\n");
    }
}
