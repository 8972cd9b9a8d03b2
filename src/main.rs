//! Interactive session driver.
//!
//! Runs a compiled flow from a resource directory, reading user input from
//! stdin and writing screens to stdout.
//!
//! # Usage
//! ```text
//! vise <resource_dir> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `resource_dir`: Directory holding per-symbol bytecode (`<sym>.bin` or
//!   `<sym>.vis`) and templates (`<sym>`)
//!
//! # Options
//! - `--root <symbol>`: Entry point symbol (default `root`)
//! - `--session-id <id>`: Session identifier (default `default`)
//! - `-s <bytes>`: Maximum output size, 0 for unlimited (default 0)

use std::env;
use std::io;
use std::path::Path;
use std::process;
use vise::engine::{run_loop, Config, Engine};
use vise::resource::{ExtResult, FsResource};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let dir = &args[1];
    let mut cfg = Config::default();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--root" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--root requires an argument");
                    process::exit(1);
                }
                cfg.root = args[i].clone();
                i += 1;
            }
            "--session-id" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--session-id requires an argument");
                    process::exit(1);
                }
                cfg.session_id = args[i].clone();
                i += 1;
            }
            "-s" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("-s requires an argument");
                    process::exit(1);
                }
                cfg.output_size = match args[i].parse() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Invalid output size: {}", args[i]);
                        process::exit(1);
                    }
                };
                i += 1;
            }
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if !Path::new(dir).is_dir() {
        eprintln!("Resource directory does not exist: {}", dir);
        process::exit(1);
    }

    eprintln!(
        "starting session at symbol '{}' using resource dir: {}",
        cfg.root, dir
    );

    let mut resource = FsResource::new(dir);
    // The stock driver ships one external so flows can personalize screens.
    resource.add_func("session_id", |ctx, _, _| {
        Ok(ExtResult::content(ctx.session_id().as_bytes().to_vec()))
    });
    let mut en = Engine::new(cfg, resource);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    if let Err(e) = run_loop(&mut en, &mut input, &mut output) {
        eprintln!("session exited with error: {}", e);
        process::exit(1);
    }
}

const USAGE: &str = "\
vise interactive session driver

USAGE:
    {program} <resource_dir> [OPTIONS]

ARGS:
    <resource_dir>    Directory with per-symbol bytecode and templates

OPTIONS:
    --root <symbol>        Entry point symbol (default: root)
    --session-id <id>      Session identifier (default: default)
    -s <bytes>             Maximum output size, 0 = unlimited (default: 0)
    -h, --help             Print this help message

EXAMPLES:
    # Run the demo flow
    {program} demos/profile

    # Separate session state per user
    {program} demos/profile --session-id user_12345
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
