//! Base library (§1's "surrounding... standard-library glue"), grounded on
//! `cbaselib.c`'s `cosmoB_print`/`cosmoB_loadLibrary` and `main.c`'s
//! `cosmoB_input`. These are ordinary C-functions registered into
//! `heap.globals` like any host callback would be — nothing about them is
//! privileged over `State::register`.

use std::io::{BufRead, Write};

use crate::error::{CosmoError, Result};
use crate::value::Value;
use crate::vm::Vm;

/// `print(...)`: stringifies every argument (via `Value`'s `Display`, the
/// same conversion `cosmoV_toString` performs) and writes them with no
/// separator, followed by one newline. Returns nothing.
fn lib_print(vm: &mut Vm, args: &[Value]) -> Result<Value> {
  for a in args {
    let _ = write!(vm.io.output, "{a}");
  }
  let _ = writeln!(vm.io.output);
  Ok(Value::nil())
}

/// `input(...)`: prints its arguments like `print` (no trailing newline),
/// then reads one line from stdin and returns it with the trailing `\n`
/// stripped.
fn lib_input(vm: &mut Vm, args: &[Value]) -> Result<Value> {
  for a in args {
    let _ = write!(vm.io.output, "{a}");
  }
  let _ = vm.io.output.flush();

  let mut line = String::new();
  vm.io
    .input
    .read_line(&mut line)
    .map_err(|e| CosmoError::runtime(format!("input: {e}"), Vec::new()))?;
  while line.ends_with('\n') || line.ends_with('\r') {
    line.pop();
  }
  let s = vm.heap.intern_string(line.as_bytes());
  Ok(Value::object(s))
}

/// `time()`: seconds since the Unix epoch as a float, standing in for
/// `gettimeofday` (`_time.h`). Used by scripts for coarse benchmarking,
/// not for anything the VM itself depends on.
fn lib_time(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  if !args.is_empty() {
    return Err(CosmoError::runtime(
      format!("expected 0 arguments, got {}", args.len()),
      Vec::new(),
    ));
  }
  let now = std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default();
  Ok(Value::number(now.as_secs_f64()))
}

/// `cosmoB_loadLibrary`: registers the base library's globals. Called once
/// when a fresh `State`/`Vm` is built.
pub fn load_library(vm: &mut Vm) {
  register(vm, "print", lib_print);
  register(vm, "input", lib_input);
  register(vm, "time", lib_time);
}

fn register(vm: &mut Vm, name: &'static str, func: crate::obj::CFunction) {
  let f = vm.heap.alloc_cfunction(name, func);
  let key = vm.heap.intern_string(name.as_bytes());
  vm.heap.globals.insert(Value::object(key), Value::object(f));
}
