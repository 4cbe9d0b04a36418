use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use callcount::counter::{CallCounter, CallTable};
use callcount::symbols;
use callcount::trace::{self, Options};
use nix::sys::signal::{signal, SigHandler, Signal};
use structopt::clap::AppSettings;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

/// Use ptrace to find the number of times each function is reached at run-time.
#[derive(StructOpt, Debug)]
#[structopt(name = "callcount", setting = AppSettings::TrailingVarArg)]
struct Opt {
    /// Print an informational line for every tracee stop and exit.
    #[structopt(short, long)]
    verbose: bool,

    /// Symbol addresses are offsets from the executable's load base (PIE executables).
    #[structopt(short, long)]
    relative: bool,

    /// File with function start addresses and names, as printed by `nm`.
    #[structopt(parse(from_os_str))]
    symbols: PathBuf,

    /// Program to trace, followed by its arguments.
    #[structopt(parse(from_os_str))]
    argv: Vec<OsString>,
}

fn main() -> Result<()> {
    init_logging();

    // Usage problems are reported, but are not failures.
    let opt = match Opt::from_iter_safe(std::env::args_os()) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err.message);
            process::exit(0);
        },
    };

    let symbols = match symbols::load(&opt.symbols) {
        Ok(symbols) => symbols,
        Err(err) => {
            println!("{}", err);
            process::exit(0);
        },
    };

    if opt.argv.is_empty() {
        println!("No executable specified to trace");
        process::exit(0);
    }

    let mut table = CallTable::new();
    for sym in &symbols {
        table.insert(sym.address, sym.name.as_str());
    }

    // Let a terminal interrupt stop only the tracee, so we still get to report.
    for sig in [Signal::SIGINT, Signal::SIGHUP] {
        unsafe { signal(sig, SigHandler::SigIgn) }
            .with_context(|| format!("Error disabling {} handling", sig))?;
    }

    let options = Options {
        verbose: opt.verbose,
        relative: opt.relative,
    };
    let addresses = symbols.iter().map(|sym| sym.address);

    let outcome = trace::run(opt.argv, addresses, &mut table, &options)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "{}", trace::summary(outcome))?;
    table.report(&mut out)?;

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("callcount=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
