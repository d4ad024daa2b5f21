//! # Command line interface
//!
//! An interactive prompt with history. Lines are split like a shell would split them, numbers
//! are decimal or hexadecimal with a `0x` prefix.
//!
//! | command                               | does                                  |
//! |---------------------------------------|---------------------------------------|
//! | `c`, `cont`, `continue`               | continue                              |
//! | `b`, `break <0xaddr\|func\|file:line>` | set a breakpoint                      |
//! | `delete <0xaddr>`                     | remove a breakpoint                   |
//! | `reg dump`, `reg read <r>`, `reg write <r> <v>` | registers                   |
//! | `mem read <a>`, `mem write <a> <v>`   | memory words                          |
//! | `stepi`, `si`                         | one instruction                       |
//! | `step`, `s`                           | one line, into calls                  |
//! | `next`, `n`                           | one line, over calls                  |
//! | `finish`                              | return from the current function      |
//! | `where`, `line`                       | current source line                   |
//! | `bt`, `backtrace`                     | call stack                            |
//! | `sym <name>`                          | look up a linkage symbol              |
//! | `vars`, `variables`                   | local variables                       |
//! | `functions`                           | all functions                         |
//! | `maps`                                | memory map of the tracee              |
//! | `q`, `quit`                           | kill the tracee and quit              |

use std::path::PathBuf;

use dialoguer::theme::ColorfulTheme;
use dialoguer::BasicHistory;
use tracing::{debug, warn};

use super::{DebuggerUI, Status};
use crate::addr::Addr;
use crate::dbginfo::SourceLocation;
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::regs::Register;

/// Lines of source shown around the current line
const SOURCE_CONTEXT: u64 = 2;

pub struct CliUi {
    history: BasicHistory,
    theme: ColorfulTheme,
}

impl CliUi {
    pub fn build() -> Result<Self> {
        Ok(CliUi {
            history: BasicHistory::new().max_entries(1000).no_duplicates(true),
            theme: ColorfulTheme::default(),
        })
    }

    fn get_input(&mut self) -> Result<String> {
        Ok(dialoguer::Input::<String>::with_theme(&self.theme)
            .with_prompt("mdb")
            .history_with(&mut self.history)
            .interact_text()?)
    }

    fn show(&self, feedback: &Feedback) {
        match feedback {
            Feedback::Ok => (),
            Feedback::Location(loc) => {
                println!("{loc}");
                print_source(&loc.source);
            }
            Feedback::Stopped {
                location: Some(loc),
                ..
            } => {
                println!("{feedback}");
                print_source(&loc.source);
            }
            other => println!("{other}"),
        }
    }
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: Feedback) -> Result<Status> {
        self.show(&feedback);
        loop {
            let line = self.get_input()?;
            match parse_command(&line) {
                Ok(status) => {
                    debug!("command: {status:?}");
                    return Ok(status);
                }
                Err(e) => println!("Error: {e}"),
            }
        }
    }

    fn finished(&mut self, feedback: Feedback) -> Result<()> {
        self.show(&feedback);
        Ok(())
    }
}

/// Prints the lines around `loc`, if the source file can be read
fn print_source(loc: &SourceLocation) {
    let text = match std::fs::read_to_string(&loc.file) {
        Ok(t) => t,
        Err(e) => {
            warn!("could not read {}: {e}", loc.file.display());
            return;
        }
    };
    let first = loc.line.saturating_sub(SOURCE_CONTEXT).max(1);
    let last = loc.line + SOURCE_CONTEXT;
    for (number, line) in (1u64..).zip(text.lines()) {
        if number < first {
            continue;
        }
        if number > last {
            break;
        }
        let marker = if number == loc.line { '>' } else { ' ' };
        println!("{marker}{number:>5} {line}");
    }
}

/// Parses a decimal or `0x` prefixed hexadecimal number
pub fn parse_number(s: &str) -> Result<u64> {
    Ok(match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => s.parse()?,
    })
}

fn parse_addr(s: Option<&String>) -> Result<Addr> {
    let s = s.ok_or(DebuggerError::MissingArgument("address"))?;
    Ok(Addr::from(parse_number(s)?))
}

fn parse_value(s: Option<&String>) -> Result<u64> {
    parse_number(s.ok_or(DebuggerError::MissingArgument("value"))?)
}

fn parse_register(s: Option<&String>) -> Result<Register> {
    Register::from_name(s.ok_or(DebuggerError::MissingArgument("register"))?)
}

/// `0xaddr`, `file:line` or a function name
fn parse_breakpoint(target: &str) -> Result<Status> {
    if target.starts_with("0x") {
        return Ok(Status::SetBreakpoint(Addr::from(parse_number(target)?)));
    }
    if let Some((file, line)) = target.rsplit_once(':') {
        if let Ok(line) = line.parse() {
            return Ok(Status::SetBreakpointAtLine(PathBuf::from(file), line));
        }
    }
    Ok(Status::SetBreakpointAtFunction(target.to_string()))
}

/// Turns a command line into a [`Status`]
pub fn parse_command(line: &str) -> Result<Status> {
    let words = shlex::split(line)
        .ok_or_else(|| DebuggerError::UnknownCommand(format!("unbalanced quotes: {line}")))?;
    let Some(cmd) = words.first() else {
        return Err(DebuggerError::MissingArgument("command"));
    };
    let args = &words[1..];

    Ok(match cmd.as_str() {
        "c" | "cont" | "continue" => Status::Continue,
        "b" | "break" => {
            parse_breakpoint(args.first().ok_or(DebuggerError::MissingArgument("location"))?)?
        }
        "d" | "delete" => Status::DelBreakpoint(parse_addr(args.first())?),
        "reg" | "register" => match args.first().map(String::as_str) {
            Some("dump") => Status::DumpRegisters,
            Some("read") => Status::ReadRegister(parse_register(args.get(1))?),
            Some("write") => {
                Status::SetRegister(parse_register(args.get(1))?, parse_value(args.get(2))?)
            }
            Some(other) => return Err(DebuggerError::UnknownCommand(format!("reg {other}"))),
            None => return Err(DebuggerError::MissingArgument("dump, read or write")),
        },
        "mem" | "memory" => match args.first().map(String::as_str) {
            Some("read") => Status::ReadMem(parse_addr(args.get(1))?),
            Some("write") => Status::WriteMem(parse_addr(args.get(1))?, parse_value(args.get(2))?),
            Some(other) => return Err(DebuggerError::UnknownCommand(format!("mem {other}"))),
            None => return Err(DebuggerError::MissingArgument("read or write")),
        },
        "si" | "stepi" => Status::StepSingle,
        "s" | "step" => Status::StepInto,
        "n" | "next" => Status::StepOver,
        "finish" => Status::StepOut,
        "where" | "line" => Status::Location,
        "bt" | "backtrace" => Status::Backtrace,
        "sym" | "symbol" => Status::GetSymbolsByName(
            args.first()
                .ok_or(DebuggerError::MissingArgument("symbol name"))?
                .to_string(),
        ),
        "vars" | "variables" => Status::Variables,
        "functions" => Status::Functions,
        "maps" => Status::Maps,
        "q" | "quit" | "exit" => Status::Quit,
        other => return Err(DebuggerError::UnknownCommand(other.to_string())),
    })
}
