//! Assembly to bytecode compiler CLI.
//!
//! Reads flow assembly source files and compiles them to the bytecode the
//! engine executes.
//!
//! # Usage
//! ```text
//! assembler <input.vis> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `input.vis`: Assembly source file to compile
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `<input>.bin`)
//! - `-n, --dry-run`: Validate only, print the encoded size

use std::env;
use std::fs;
use std::path::Path;
use std::process;
use vise::asm::{assemble_file, check};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut output_path: Option<String> = None;
    let mut dry_run = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    eprintln!("{k} requires an argument");
                    process::exit(1);
                }
                output_path = Some(args[i].clone());
                i += 1;
            }
            "--dry-run" | "-n" => {
                dry_run = true;
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if !Path::new(input_path).exists() {
        eprintln!("Input file does not exist: {}", input_path);
        process::exit(1);
    }

    if dry_run {
        let source = match fs::read_to_string(input_path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to read {}: {}", input_path, e);
                process::exit(1);
            }
        };
        match check(&source) {
            Ok(n) => println!("{}: ok ({} bytes)", input_path, n),
            Err(e) => {
                eprintln!("Assembly failed: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let output_path = output_path.unwrap_or_else(|| {
        let p = Path::new(input_path);
        let stem = p.file_stem().unwrap_or_default().to_string_lossy();
        let parent = p.parent().unwrap_or(Path::new("."));
        parent
            .join(format!("{}.bin", stem))
            .to_string_lossy()
            .into_owned()
    });

    let bytecode = match assemble_file(input_path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Assembly failed: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = fs::write(&output_path, &bytecode) {
        eprintln!("Failed to write output file: {}", e);
        process::exit(1);
    }

    println!(
        "Compiled {} -> {} ({} bytes)",
        input_path,
        output_path,
        bytecode.len()
    );
}

const USAGE: &str = "\
vise flow assembler

USAGE:
    {program} <input.vis> [OPTIONS]

ARGS:
    <input.vis>    Assembly source file to compile

OPTIONS:
    -o, --output <file>    Output file path (defaults to <input>.bin)
    -n, --dry-run          Validate only, print the encoded size
    -h, --help             Print this help message

EXAMPLES:
    # Compile to default output name
    {program} root.vis

    # Compile with explicit output
    {program} root.vis -o build/root.bin
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
