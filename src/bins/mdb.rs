use std::path::{Path, PathBuf};

use minidbg::debuggee::Debuggee;
use minidbg::debugger::Debugger;
use minidbg::dwarf_parse;
use minidbg::errors::DebuggerError;
use minidbg::ui::cli::CliUi;

use clap::Parser;
use tracing::{debug, warn};

/// Debug a program on the source level
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to launch as debuggee, looked up in $PATH if it is not a file
    program: PathBuf,

    /// Arguments for the debuggee
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Log more, can be given multiple times
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), DebuggerError> {
    human_panic::setup_panic!();
    let args = Args::parse();
    setup_logger(args.verbose);
    debug!("set up the logger");

    let program = resolve_program(&args.program);
    let info = dwarf_parse::load(&program)?;
    let debuggee = Debuggee::launch(&program, &args.args)?;
    let mut debugger = Debugger::new(debuggee, info);
    let mut ui = CliUi::build()?;
    debugger.run_debugger(&mut ui)?;

    Ok(())
}

fn resolve_program(program: &Path) -> PathBuf {
    if program.exists() {
        return program.to_path_buf();
    }
    match which::which(program) {
        Ok(found) => {
            debug!("found {} at {}", program.display(), found.display());
            found
        }
        Err(e) => {
            warn!("could not find {} in $PATH: {e}", program.display());
            program.to_path_buf()
        }
    }
}

fn setup_logger(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
