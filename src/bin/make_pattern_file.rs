//! Reference File Generator
//!
//! Writes a flat file of exactly `<size>` pattern bytes (no header or
//! footer) for device benchmarks to read back and verify.
//!
//! # Output Format
//!
//! One line to stdout: `path=<path> size=<bytes> pattern=<p> checksum=<sum>`
//!
//! # Exit Codes
//!
//! - `0`: File written and synced
//! - `1`: I/O failure
//! - `2`: Invalid arguments

use std::env;
use std::path::PathBuf;
use std::process;

use bandwidth_rs::config::parse_size;
use bandwidth_rs::logging::init_logging;
use bandwidth_rs::pattern::{write_reference_file, PatternKind};

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS] <path> <size>

ARGS:
    <path>                  Output file (truncated if it exists)
    <size>                  Bytes to write, e.g. 10G, 512M, 4096

OPTIONS:
    --pattern=<p>           const:<0-255> | ramp (default: const:1)
    --help, -h              Show this help message",
        exe.to_string_lossy()
    );
}

fn main() {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "make-pattern-file".into());
    let mut pattern = PatternKind::default();
    let mut positional: Vec<String> = Vec::new();

    for arg in args {
        let Some(flag) = arg.to_str() else {
            eprintln!("non-UTF-8 argument: {}", arg.to_string_lossy());
            process::exit(2);
        };
        if let Some(value) = flag.strip_prefix("--pattern=") {
            pattern = value.parse().unwrap_or_else(|err: String| {
                eprintln!("{err}");
                process::exit(2);
            });
            continue;
        }
        match flag {
            "--help" | "-h" => {
                print_usage(&exe);
                process::exit(0);
            }
            _ if flag.starts_with("--") => {
                eprintln!("unknown flag: {flag}");
                print_usage(&exe);
                process::exit(2);
            }
            _ => positional.push(flag.to_string()),
        }
    }

    let [path, size] = positional.as_slice() else {
        print_usage(&exe);
        process::exit(2);
    };
    let path = PathBuf::from(path);
    let size = parse_size(size).unwrap_or_else(|err| {
        eprintln!("{err}");
        process::exit(2);
    }) as u64;

    init_logging(false);

    match write_reference_file(&path, size, pattern) {
        Ok(checksum) => {
            println!(
                "path={} size={size} pattern={pattern} checksum={checksum}",
                path.display()
            );
        }
        Err(err) => {
            eprintln!("failed to write {}: {err}", path.display());
            process::exit(1);
        }
    }
}
