//! Embedding surface (§6): a thin, stack-oriented wrapper around [`Vm`],
//! mirroring the reference `cosmoV_*` C API rather than a typed/bound
//! value API — callers push arguments in natural order, call, and pop
//! results, the same convention the bytecode interpreter itself uses.

use std::io::{Read, Write};

use crate::builtins;
use crate::dump;
use crate::emit;
use crate::error::{CosmoError, Result};
use crate::obj::{CFunction, Gc};
use crate::value::Value;
use crate::vm::Vm;

/// A Cosmo VM instance. Owns its own heap; nothing is shared between two
/// `State`s (§5: "two VMs share nothing").
pub struct State {
  vm: Vm,
}

impl Default for State {
  fn default() -> Self {
    Self::new()
  }
}

impl State {
  /// `cosmoV_newState` + `cosmoB_loadLibrary`: a fresh VM with the base
  /// library (`print`/`input`/`time`) already registered as globals.
  pub fn new() -> Self {
    let mut vm = Vm::new();
    builtins::load_library(&mut vm);
    State { vm }
  }

  /// Like [`State::new`], but `print`/`input` read and write through
  /// `output`/`input` instead of the process's real stdio. Used by tests
  /// that need to assert on a script's printed output.
  pub fn with_io(output: Box<dyn Write>, input: Box<dyn Read>) -> Self {
    let mut vm = Vm::with_io(output, Box::new(std::io::BufReader::new(input)));
    builtins::load_library(&mut vm);
    State { vm }
  }

  /// Escape hatch for callers that want the interpreter directly (running
  /// a pre-built closure, inspecting GC stats, and so on).
  pub fn vm(&mut self) -> &mut Vm {
    &mut self.vm
  }

  // ---- stack -----------------------------------------------------------

  pub fn push_nil(&mut self) -> Result<()> {
    self.vm.push(Value::nil())
  }

  pub fn push_bool(&mut self, b: bool) -> Result<()> {
    self.vm.push(Value::bool_(b))
  }

  pub fn push_number(&mut self, n: f64) -> Result<()> {
    self.vm.push(Value::number(n))
  }

  pub fn push_string(&mut self, s: &str) -> Result<()> {
    let g = self.vm.heap.intern_string(s.as_bytes());
    self.vm.push(Value::object(g))
  }

  pub fn push_ref(&mut self, obj: Gc) -> Result<()> {
    self.vm.push(Value::object(obj))
  }

  pub fn push_cfunction(&mut self, name: &'static str, func: CFunction) -> Result<()> {
    let g = self.vm.heap.alloc_cfunction(name, func);
    self.vm.push(Value::object(g))
  }

  /// Pops and discards the top `n` values.
  pub fn pop(&mut self, n: usize) {
    for _ in 0..n {
      self.vm.pop();
    }
  }

  /// Peeks `i` slots below the current top without removing anything.
  pub fn top(&self, i: usize) -> Value {
    self.vm.top(i)
  }

  // ---- calls -------------------------------------------------------------

  /// Unprotected call: `argc` arguments and the callee must already be on
  /// the stack (callee on top), in that order. Propagates any panic to the
  /// caller instead of catching it.
  pub fn call(&mut self, argc: usize, nresults: usize) -> Result<()> {
    self.vm.call(argc, nresults)
  }

  /// Protected call: catches any panic raised during the call, restores
  /// the stack to its pre-call depth, and leaves the caught `Error` object
  /// on top. Returns `true` on success, `false` if a panic was caught.
  pub fn pcall(&mut self, argc: usize, nresults: usize) -> bool {
    self.vm.pcall(argc, nresults)
  }

  /// Consumes `n` {key, value} pairs from the top of the stack (key
  /// pushed first, so the pairs read top-down as value, key, value, key,
  /// ...) and stores them into the globals table.
  pub fn register(&mut self, n: usize) {
    for _ in 0..n {
      let value = self.vm.pop();
      let key = self.vm.pop();
      self.vm.heap.globals.insert(key, value);
    }
  }

  /// Raises a runtime error from within a host callback, unwinding to the
  /// nearest `pcall` boundary.
  pub fn error(&self, message: impl Into<String>) -> CosmoError {
    CosmoError::runtime(message.into(), Vec::new())
  }

  // ---- compilation / serialization --------------------------------------

  /// Compiles `source` to a top-level function and pushes a closure onto
  /// the stack. `module_name` names the module for trace rendering; the
  /// compiler itself never looks at it (§4.7's dump format is what
  /// actually records a module name, via the prototype's `module` field).
  pub fn compile_string(&mut self, source: &str, module_name: &str) -> Result<()> {
    let _ = module_name;
    let module = syntax::parse(source).map_err(|e| CosmoError::Parse {
      message: e.message.to_string(),
      line: crate::emit::line_of(source, e.span.start),
    })?;
    self.vm.freeze_heap();
    let proto = emit::compile(&mut self.vm.heap, source, &module);
    let proto = match proto {
      Ok(proto) => proto,
      Err(e) => {
        self.vm.unfreeze_heap();
        return Err(e);
      }
    };
    let closure = self.vm.heap.alloc_closure(proto, Vec::new());
    let pushed = self.vm.push(Value::object(closure));
    self.vm.unfreeze_heap();
    pushed
  }

  /// Dumps the function `n` slots below the top (0 = the top of stack) to
  /// `w`. Accepts either a bare prototype or a closure (in which case its
  /// prototype is dumped).
  pub fn dump(&self, n: usize, w: &mut dyn Write) -> Result<()> {
    let v = self.vm.top(n);
    let gc = v
      .as_gc()
      .ok_or_else(|| CosmoError::fatal("dump: top of stack is not a reference"))?;
    let proto = match gc.as_closure() {
      Some(c) => c.function,
      None => gc,
    };
    dump::dump(w, proto)
  }

  /// Reads a dumped module from `r` and pushes the resulting closure.
  pub fn undump(&mut self, r: &mut dyn Read) -> Result<()> {
    let proto = dump::undump(r, &mut self.vm.heap)?;
    let closure = self.vm.heap.alloc_closure(proto, Vec::new());
    self.vm.push(Value::object(closure))
  }

  // ---- roots -------------------------------------------------------------

  /// Pins `obj` so the collector treats it as reachable even while it is
  /// off the value stack (e.g. held in a host data structure).
  pub fn add_root(&mut self, obj: Gc) {
    self.vm.heap.add_root(obj);
  }

  /// Unpins a previously-rooted object.
  pub fn remove_root(&mut self, obj: Gc) {
    self.vm.heap.remove_root(obj);
  }
}
