mod bytecode;
mod lang;
mod runtime;

use std::time::Instant;
use std::{env, fs, path::Path};

use crate::bytecode::assemble::assemble;
use crate::bytecode::disasm::disassemble;
use crate::bytecode::lower::Lowerer;
use crate::lang::node::Node;
use crate::runtime::vm::Vm;

fn main() {
    let args: Vec<String> = env::args().collect();

    let asm = args.contains(&"--asm".to_string());
    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());
    let time = args.contains(&"--time".to_string());

    // first non-flag argument is the filename
    let filename = args.iter().skip(1).find(|a| !a.starts_with('-'));

    match filename {
        Some(filename) => {
            ensure_extension(filename);
            match fs::read_to_string(filename) {
                Ok(source) => run_program(&source, asm, bytecode, time),
                Err(e) => {
                    eprintln!("Failed to read '{}': {}", filename, e);
                    std::process::exit(1);
                }
            }
        }
        None => print_usage(),
    }
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        eprintln!("Error: expected a .json syntax tree, got {}", filename);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("CINDER - Bytecode Compiler and Virtual Machine");
    println!();
    println!("Usage:");
    println!("  cinder <tree.json>          Compile and run a program");
    println!("  cinder --asm <tree.json>    Show textual instructions only");
    println!("  cinder --bc <tree.json>     Show assembled bytecode only");
    println!("  cinder --time <tree.json>   Report compile and run timings");
}

fn run_program(source: &str, asm: bool, bytecode: bool, time: bool) {
    let compile_start = Instant::now();

    let tree = match Node::from_json_str(source) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("Syntax tree error: {}", e);
            std::process::exit(1);
        }
    };

    let lowered = match Lowerer::new().lower(&tree) {
        Ok(lowered) => lowered,
        Err(e) => {
            eprintln!("Compile error: {}", e);
            std::process::exit(1);
        }
    };

    if asm {
        for instr in &lowered.instrs {
            println!("{}", instr);
        }
        return;
    }

    let bc = match assemble(&lowered.instrs, &lowered.functions) {
        Ok(bc) => bc,
        Err(e) => {
            eprintln!("Assemble error: {}", e);
            std::process::exit(1);
        }
    };

    if bytecode {
        print!("{}", disassemble(&bc));
        return;
    }

    let compile_elapsed = compile_start.elapsed();
    let run_start = Instant::now();

    let mut vm = Vm::new(&bc);
    if let Err(e) = vm.run() {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }

    if time {
        eprintln!("compile: {:?}", compile_elapsed);
        eprintln!("run:     {:?}", run_start.elapsed());
    }
}
