//! The four modes named by the CLI ("CLI" in the embedding surface
//! section): compile-and-run, compile-and-dump, undump-and-run, REPL.

use std::path::PathBuf;

use anyhow::Context;

use crate::common::PathOrStdin;
use crate::cosmo::{build_state, render_error, report_compile_error};

/// One of the CLI's mutually exclusive modes.
#[derive(Clone, Debug)]
pub enum Command {
  /// `-s <file...>`: compile and run each file in turn.
  Run(Vec<PathBuf>),
  /// `-c <in> <out>`: compile `in` and dump the prototype to `out`,
  /// without running it.
  Compile(PathBuf, PathBuf),
  /// `-l <in>`: undump a previously compiled file and run it.
  Load(PathBuf),
  /// `-r`, or no arguments at all: interactive REPL.
  Repl,
}

impl Command {
  pub fn execute(self) -> anyhow::Result<()> {
    match self {
      Self::Run(files) => handle_run(&files),
      Self::Compile(input, output) => handle_compile(&input, &output),
      Self::Load(input) => handle_load(&input),
      Self::Repl => crate::repl::run(),
    }
  }
}

fn handle_run(files: &[PathBuf]) -> anyhow::Result<()> {
  for file in files {
    run_one(file)?;
  }
  Ok(())
}

fn run_one(file: &PathBuf) -> anyhow::Result<()> {
  let path = PathOrStdin::new(file.clone());
  let source = path.read()?;

  let mut state = build_state();
  if let Err(e) = state.compile_string(&source, &path.name()) {
    report_compile_error(&e);
    anyhow::bail!("failed to compile {}", path.name());
  }
  if !state.pcall(0, 0) {
    let top = state.top(0);
    anyhow::bail!("{}: {}", path.name(), render_error(top));
  }
  Ok(())
}

fn handle_compile(input: &PathBuf, output: &PathBuf) -> anyhow::Result<()> {
  let path = PathOrStdin::new(input.clone());
  let source = path.read()?;

  let mut state = build_state();
  if let Err(e) = state.compile_string(&source, &path.name()) {
    report_compile_error(&e);
    anyhow::bail!("failed to compile {}", path.name());
  }

  let mut out =
    std::fs::File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
  state
    .dump(0, &mut out)
    .map_err(|e| anyhow::anyhow!("failed to dump to {}: {}", output.display(), e.render()))
}

fn handle_load(input: &PathBuf) -> anyhow::Result<()> {
  let mut file =
    std::fs::File::open(input).with_context(|| format!("failed to open {}", input.display()))?;

  let mut state = build_state();
  state
    .undump(&mut file)
    .map_err(|e| anyhow::anyhow!("failed to undump {}: {}", input.display(), e.render()))?;

  if !state.pcall(0, 0) {
    let top = state.top(0);
    anyhow::bail!("{}: {}", input.display(), render_error(top));
  }
  Ok(())
}
