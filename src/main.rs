mod chunk;
mod compiler;
mod debug;
mod lexer;
mod map;
mod token;
mod value;
mod vm;

use rustyline::Editor;
use std::{env, fs, io, process::exit};
use vm::{InterpretError, Vm};

fn main() {
    let mut args = env::args().skip(1);
    match (args.next(), args.next()) {
        (None, _) => repl(),
        (Some(path), None) => run_file(&path),
        _ => {
            eprintln!("Usage: loxide [path]");
            exit(exitcode::USAGE);
        }
    }
}

fn repl() {
    let mut vm = Vm::new(io::stdout());
    let mut rl = Editor::<()>::new();
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(&line);
                vm.interpret(&line).ok();
            }
            Err(_) => break,
        }
    }
}

fn run_file(path: &str) {
    let source = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("Could not read {}: {}", path, err);
        exit(exitcode::IOERR);
    });

    let mut vm = Vm::new(io::stdout());
    match vm.interpret(&source) {
        Ok(()) => {}
        Err(InterpretError::Compile) => exit(exitcode::DATAERR),
        Err(InterpretError::Runtime) => exit(exitcode::SOFTWARE),
    }
}
