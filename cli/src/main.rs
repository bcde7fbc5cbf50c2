use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cosmo_cli::commands::Command;

/// The embedding driver accepts `-s <file...>` (compile and run), `-c <in>
/// <out>` (compile and dump), `-l <in>` (undump and run), or `-r` (REPL).
/// With no flags at all it falls back to the REPL, the same as the
/// reference CLI with no arguments.
#[derive(Debug, Parser)]
#[clap(name = "cosmo", version)]
pub struct App {
  /// Compile and run each FILE as a Cosmo script.
  #[arg(
    short = 's',
    long = "script",
    value_name = "FILE",
    num_args = 1..,
    conflicts_with_all = ["compile", "load", "repl"]
  )]
  script: Vec<PathBuf>,

  /// Compile IN to bytecode and write it to OUT, without running it.
  #[arg(
    short = 'c',
    long = "compile",
    value_names = ["IN", "OUT"],
    num_args = 2,
    conflicts_with_all = ["script", "load", "repl"]
  )]
  compile: Option<Vec<PathBuf>>,

  /// Load a previously dumped bytecode file and run it.
  #[arg(
    short = 'l',
    long = "load",
    value_name = "FILE",
    conflicts_with_all = ["script", "compile", "repl"]
  )]
  load: Option<PathBuf>,

  /// Start an interactive REPL.
  #[arg(short = 'r', long = "repl", conflicts_with_all = ["script", "compile", "load"])]
  repl: bool,
}

impl App {
  fn into_command(self) -> Command {
    if !self.script.is_empty() {
      Command::Run(self.script)
    } else if let Some(mut pair) = self.compile {
      let output = pair.pop().expect("num_args = 2");
      let input = pair.pop().expect("num_args = 2");
      Command::Compile(input, output)
    } else if let Some(input) = self.load {
      Command::Load(input)
    } else {
      Command::Repl
    }
  }
}

fn main() -> ExitCode {
  let command = App::parse().into_command();
  match command.execute() {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("{e:#}");
      ExitCode::FAILURE
    }
  }
}
