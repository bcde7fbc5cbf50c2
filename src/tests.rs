//! End-to-end scenarios from §8 "Concrete scenarios", run through the full
//! pipeline (parse → compile → execute) via the public [`State`] API.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::public::State;

/// A `Write` sink that several handles can read back from, used to assert
/// on what a script's `print` calls produced.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.lock().unwrap().write(buf)
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

impl SharedBuf {
  fn take_string(&self) -> String {
    String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
  }
}

fn run(src: &str) -> String {
  let buf = SharedBuf::default();
  let mut state = State::with_io(Box::new(buf.clone()), Box::new(std::io::empty()));
  state.compile_string(src, "test").expect("compile");
  state.call(0, 0).expect("run");
  buf.take_string()
}

#[test]
fn reassignment_and_arithmetic() {
  assert_eq!(run("var x = 1; x = x + 2; print(x);"), "3\n");
}

#[test]
fn closures_share_one_upvalue() {
  let src = r#"
    function f()
      local a = 10;
      return function()
        a = a + 1;
        return a;
      end;
    end
    local g = f();
    print(g());
    print(g());
  "#;
  assert_eq!(run(src), "11\n12\n");
}

#[test]
fn table_literal_count_opcode() {
  assert_eq!(run("local t = [1, 2, 3]; print(#t);"), "3\n");
}

#[test]
fn prototype_chain_and_method_invocation() {
  let src = r#"
    proto P
      function greet() return "hi"; end
    end
    var p = {};
    __proto(p) = P;
    print(p.greet());
  "#;
  assert_eq!(run(src), "hi\n");
}

#[test]
fn dump_undump_round_trip_executes_identically() {
  let src = r#"print("x");"#;

  let mut state = State::new();
  state.compile_string(src, "test").expect("compile");
  let mut buf = Vec::new();
  state.dump(0, &mut buf).expect("dump");
  state.pop(1);

  let out_buf = SharedBuf::default();
  let mut undumped = State::with_io(Box::new(out_buf.clone()), Box::new(std::io::empty()));
  let mut cursor = &buf[..];
  undumped.undump(&mut cursor).expect("undump");
  undumped.call(0, 0).expect("run undumped");
  assert_eq!(out_buf.take_string(), "x\n");
}

#[test]
fn dump_undump_round_trip_preserves_captured_upvalues() {
  let src = r#"
    function f()
      local a = 10;
      return function()
        a = a + 1;
        return a;
      end;
    end
    local g = f();
    print(g());
    print(g());
  "#;

  let mut state = State::new();
  state.compile_string(src, "test").expect("compile");
  let mut buf = Vec::new();
  state.dump(0, &mut buf).expect("dump");
  state.pop(1);

  let out_buf = SharedBuf::default();
  let mut undumped = State::with_io(Box::new(out_buf.clone()), Box::new(std::io::empty()));
  let mut cursor = &buf[..];
  undumped.undump(&mut cursor).expect("undump");
  undumped.call(0, 0).expect("run undumped");
  assert_eq!(out_buf.take_string(), "11\n12\n");
}

#[test]
fn undump_rejects_corrupted_header() {
  let src = "print(1);";
  let mut state = State::new();
  state.compile_string(src, "test").expect("compile");
  let mut buf = Vec::new();
  state.dump(0, &mut buf).expect("dump");

  buf[0] ^= 0xFF;
  let mut cursor = &buf[..];
  let err = state.undump(&mut cursor).unwrap_err();
  assert!(err.render().contains("bad header!"));
}

#[test]
fn arity_mismatch_is_a_runtime_error_under_pcall() {
  let src = "function f(a, b) return a + b; end";
  let mut state = State::new();
  state.compile_string(src, "test").expect("compile");
  state.call(0, 0).expect("run top level defines the global `f`");

  let key = state.vm().heap.intern_string(b"f");
  let f = state
    .vm()
    .heap
    .globals
    .get(&crate::Value::object(key))
    .expect("f is a global");

  state.push_number(1.0).unwrap(); // one argument; `f` wants two
  state.push_ref(f.as_gc().unwrap()).unwrap(); // callee goes on top
  assert!(!state.pcall(1, 1));
  let err = state.top(0);
  assert_eq!(err.as_gc().unwrap().kind(), crate::ObjKind::Error);
}
