//! Dumps the locations assigned to a textual trace and its bridges.

use clap::Parser;
use std::{error::Error, fs::read_to_string, path::PathBuf, process::exit};
use tests::{dump_regalloc, regfile};
use ykra::{Backend, config::Config};

/// Assign locations to the trace in a file and print the pseudo-ops.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// The trace file. Lines of the form `--- bridge <n>` start a bridge attached to the guard at
    /// op `n` of the loop.
    trace_file: PathBuf,

    /// The register file to assign locations from (`x86_32` or `x86_32_minimal`).
    #[arg(short, long, default_value = "x86_32_minimal")]
    regfile: String,
}

fn inner() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let src = read_to_string(&args.trace_file)?;
    let backend = Backend::new(regfile(&args.regfile)?, Config::from_env()?)?;
    print!("{}", dump_regalloc(&backend, &src)?);
    Ok(())
}

fn main() {
    if let Err(e) = inner() {
        eprintln!("{e}");
        exit(1);
    }
}
