//! The interactive REPL (`-r`), grounded on the reference `repl()` in
//! `main.c`: one VM for the whole session so `var` declarations persist
//! as globals across lines, each line compiled and run independently, and
//! a `quit()` builtin that ends the loop. The reference holds that flag
//! in a file-scope `static bool _ACTIVE`; a REPL is inherently
//! single-session, so we do the same with a process-wide atomic instead
//! of threading a handle through the `fn` pointer `quit` is registered
//! with.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use cosmo::{CFunction, Result, Value, Vm};

use crate::cosmo::{build_state, render_error, report_compile_error};

static ACTIVE: AtomicBool = AtomicBool::new(true);

fn quit(_vm: &mut Vm, _args: &[Value]) -> Result<Value> {
  ACTIVE.store(false, Ordering::SeqCst);
  Ok(Value::nil())
}

pub fn run() -> anyhow::Result<()> {
  ACTIVE.store(true, Ordering::SeqCst);

  let mut state = build_state();
  state.push_string("quit")?;
  state.push_cfunction("quit", quit as CFunction)?;
  state.register(1);

  let mut line = String::new();
  while ACTIVE.load(Ordering::SeqCst) {
    print!("> ");
    std::io::stdout().flush().ok();

    line.clear();
    if std::io::stdin().read_line(&mut line)? == 0 {
      println!();
      break;
    }

    if let Err(e) = state.compile_string(&line, "repl") {
      report_compile_error(&e);
      continue;
    }
    if !state.pcall(0, 0) {
      let top = state.top(0);
      eprintln!("{}", render_error(top));
      state.pop(1);
    }
  }

  Ok(())
}
