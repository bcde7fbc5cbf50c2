//! Bytecode serialization (§4.7), grounded on `cdump.c`'s magic-header +
//! recursive-prototype layout. Non-portable by design: the header records
//! the sizes the dumping process used for `number`/`size`/`int`, and
//! `undump` refuses to load a file stamped with different ones rather than
//! attempt any conversion.

use std::io::{self, Read, Write};

use crate::error::{CosmoError, Result};
use crate::gc::Heap;
use crate::obj::{FunctionObj, Gc};
use crate::value::Value;

const MAGIC: [u8; 4] = [0x43, 0x4F, 0x53, 0x12]; // "COS\x12"

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_FUNCTION: u8 = 4;

fn io_err(e: io::Error) -> CosmoError {
  CosmoError::fatal(format!("dump i/o error: {e}"))
}

fn write_u8(w: &mut dyn Write, b: u8) -> Result<()> {
  w.write_all(&[b]).map_err(io_err)
}

fn write_u32(w: &mut dyn Write, v: u32) -> Result<()> {
  w.write_all(&v.to_ne_bytes()).map_err(io_err)
}

fn write_u64(w: &mut dyn Write, v: u64) -> Result<()> {
  w.write_all(&v.to_ne_bytes()).map_err(io_err)
}

fn write_f64(w: &mut dyn Write, v: f64) -> Result<()> {
  w.write_all(&v.to_ne_bytes()).map_err(io_err)
}

fn write_bytes(w: &mut dyn Write, bytes: &[u8]) -> Result<()> {
  write_u32(w, bytes.len() as u32)?;
  w.write_all(bytes).map_err(io_err)
}

fn read_u8(r: &mut dyn Read) -> Result<u8> {
  let mut buf = [0u8; 1];
  r.read_exact(&mut buf).map_err(io_err)?;
  Ok(buf[0])
}

fn read_u32(r: &mut dyn Read) -> Result<u32> {
  let mut buf = [0u8; 4];
  r.read_exact(&mut buf).map_err(io_err)?;
  Ok(u32::from_ne_bytes(buf))
}

fn read_u64(r: &mut dyn Read) -> Result<u64> {
  let mut buf = [0u8; 8];
  r.read_exact(&mut buf).map_err(io_err)?;
  Ok(u64::from_ne_bytes(buf))
}

fn read_f64(r: &mut dyn Read) -> Result<f64> {
  let mut buf = [0u8; 8];
  r.read_exact(&mut buf).map_err(io_err)?;
  Ok(f64::from_ne_bytes(buf))
}

fn read_bytes(r: &mut dyn Read) -> Result<Vec<u8>> {
  let len = read_u32(r)? as usize;
  let mut buf = vec![0u8; len];
  r.read_exact(&mut buf).map_err(io_err)?;
  Ok(buf)
}

fn read_opt_name(r: &mut dyn Read) -> Result<Option<Vec<u8>>> {
  let bytes = read_bytes(r)?;
  if bytes.is_empty() {
    Ok(None)
  } else {
    Ok(Some(bytes))
  }
}

fn write_opt_name_bytes(w: &mut dyn Write, g: Option<Gc>) -> Result<()> {
  match g.and_then(|g| g.as_string_bytes()) {
    Some(bytes) => write_bytes(w, bytes),
    None => write_bytes(w, &[]),
  }
}

/// Writes one function prototype, recursing into any function-valued
/// constants.
fn write_function(w: &mut dyn Write, f: &FunctionObj) -> Result<()> {
  write_opt_name_bytes(w, f.name)?;
  write_opt_name_bytes(w, f.module)?;
  write_u32(w, f.arity as u32)?;
  write_u32(w, f.upvalue_count as u32)?;
  write_u8(w, f.variadic as u8)?;

  write_u64(w, f.code.len() as u64)?;
  w.write_all(&f.code).map_err(io_err)?;

  write_u64(w, f.lines.len() as u64)?;
  for &line in &f.lines {
    write_u32(w, line)?;
  }

  write_u64(w, f.constants.len() as u64)?;
  for c in &f.constants {
    write_value(w, c)?;
  }

  write_u64(w, f.upvalue_refs.len() as u64)?;
  for &(is_local, index) in &f.upvalue_refs {
    write_u8(w, is_local as u8)?;
    write_u8(w, index)?;
  }
  Ok(())
}

fn write_value(w: &mut dyn Write, v: &Value) -> Result<()> {
  if v.is_nil() {
    write_u8(w, TAG_NIL)
  } else if let Some(b) = v.as_bool() {
    write_u8(w, TAG_BOOL)?;
    write_u8(w, b as u8)
  } else if let Some(n) = v.as_number() {
    write_u8(w, TAG_NUMBER)?;
    write_f64(w, n)
  } else if let Some(g) = v.as_gc() {
    if let Some(bytes) = g.as_string_bytes() {
      write_u8(w, TAG_STRING)?;
      write_bytes(w, bytes)
    } else if let Some(func) = g.as_function() {
      write_u8(w, TAG_FUNCTION)?;
      write_function(w, func)
    } else {
      Err(CosmoError::fatal("cannot dump a non-string, non-function constant"))
    }
  } else {
    Err(CosmoError::fatal("cannot dump value"))
  }
}

/// Writes the dump header: magic, a reserved flag byte, then the sizes of
/// `number`/`size`/`int` the dumping build used.
fn write_header(w: &mut dyn Write) -> Result<()> {
  w.write_all(&MAGIC).map_err(io_err)?;
  write_u8(w, 0)?; // reserved flag byte
  write_u8(w, std::mem::size_of::<f64>() as u8)?;
  write_u8(w, std::mem::size_of::<usize>() as u8)?;
  write_u8(w, std::mem::size_of::<i32>() as u8)?;
  Ok(())
}

/// Dumps `func` (a top-level function prototype) to `w`, per §4.7.
pub fn dump(w: &mut dyn Write, func: Gc) -> Result<()> {
  let f = func
    .as_function()
    .ok_or_else(|| CosmoError::fatal("dump: not a function prototype"))?;
  write_header(w)?;
  write_function(w, f)
}

fn read_header(r: &mut dyn Read) -> Result<()> {
  let mut magic = [0u8; 4];
  r.read_exact(&mut magic).map_err(io_err)?;
  if magic != MAGIC {
    return Err(CosmoError::runtime("bad header!", Vec::new()));
  }
  let _flag = read_u8(r)?;
  let number_size = read_u8(r)?;
  let size_size = read_u8(r)?;
  let int_size = read_u8(r)?;
  if number_size != std::mem::size_of::<f64>() as u8
    || size_size != std::mem::size_of::<usize>() as u8
    || int_size != std::mem::size_of::<i32>() as u8
  {
    return Err(CosmoError::runtime("bad header!", Vec::new()));
  }
  Ok(())
}

fn read_function(r: &mut dyn Read, heap: &mut Heap) -> Result<Gc> {
  let name = read_opt_name(r)?.map(|b| heap.intern_string(&b));
  let module = read_opt_name(r)?.map(|b| heap.intern_string(&b));
  let arity = read_u32(r)? as u8;
  let upvalue_count = read_u32(r)? as u8;
  let variadic = read_u8(r)? != 0;

  let code_len = read_u64(r)? as usize;
  let mut code = vec![0u8; code_len];
  r.read_exact(&mut code).map_err(io_err)?;

  let lines_len = read_u64(r)? as usize;
  let mut lines = Vec::with_capacity(lines_len);
  for _ in 0..lines_len {
    lines.push(read_u32(r)?);
  }

  let const_len = read_u64(r)? as usize;
  let mut constants = Vec::with_capacity(const_len);
  for _ in 0..const_len {
    constants.push(read_value(r, heap)?);
  }

  let upvalue_refs_len = read_u64(r)? as usize;
  let mut upvalue_refs = Vec::with_capacity(upvalue_refs_len);
  for _ in 0..upvalue_refs_len {
    let is_local = read_u8(r)? != 0;
    let index = read_u8(r)?;
    upvalue_refs.push((is_local, index));
  }

  Ok(heap.alloc_function(FunctionObj {
    name,
    module,
    arity,
    upvalue_count,
    variadic,
    code,
    lines,
    constants,
    upvalue_refs,
  }))
}

fn read_value(r: &mut dyn Read, heap: &mut Heap) -> Result<Value> {
  match read_u8(r)? {
    TAG_NIL => Ok(Value::nil()),
    TAG_BOOL => Ok(Value::bool_(read_u8(r)? != 0)),
    TAG_NUMBER => Ok(Value::number(read_f64(r)?)),
    TAG_STRING => {
      let bytes = read_bytes(r)?;
      Ok(Value::object(heap.intern_string(&bytes)))
    }
    TAG_FUNCTION => Ok(Value::object(read_function(r, heap)?)),
    tag => Err(CosmoError::fatal(format!("undump: unknown constant tag {tag}"))),
  }
}

/// Reads a dumped module from `r`, rejecting any header that disagrees
/// with this build's endianness or primitive sizes.
pub fn undump(r: &mut dyn Read, heap: &mut Heap) -> Result<Gc> {
  read_header(r)?;
  read_function(r, heap)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emit;

  fn compile(src: &str, heap: &mut Heap) -> Gc {
    let module = syntax::parse(src).expect("parse");
    emit::compile(heap, src, &module).expect("compile")
  }

  #[test]
  fn dump_undump_round_trip_preserves_constants_and_code() {
    let mut heap = Heap::new();
    let proto = compile("var x = 1; x = x + 2;", &mut heap);

    let mut buf = Vec::new();
    dump(&mut buf, proto).unwrap();

    let mut cursor = &buf[..];
    let loaded = undump(&mut cursor, &mut heap).unwrap();

    let a = proto.as_function().unwrap();
    let b = loaded.as_function().unwrap();
    assert_eq!(a.code, b.code);
    assert_eq!(a.lines, b.lines);
    assert_eq!(a.arity, b.arity);
    assert_eq!(a.variadic, b.variadic);
    assert_eq!(a.constants.len(), b.constants.len());
  }

  #[test]
  fn undump_rejects_flipped_header_byte() {
    let mut heap = Heap::new();
    let proto = compile("print(1);", &mut heap);
    let mut buf = Vec::new();
    dump(&mut buf, proto).unwrap();
    buf[0] ^= 0xFF;

    let mut cursor = &buf[..];
    let err = undump(&mut cursor, &mut heap).unwrap_err();
    match err {
      CosmoError::Runtime { payload, .. } => {
        assert_eq!(payload.display(), "bad header!");
      }
      other => panic!("expected a runtime error, got {other:?}"),
    }
  }

  #[test]
  fn nested_function_constant_round_trips() {
    let mut heap = Heap::new();
    let proto = compile("function f() return 1; end", &mut heap);

    let mut buf = Vec::new();
    dump(&mut buf, proto).unwrap();
    let mut cursor = &buf[..];
    let loaded = undump(&mut cursor, &mut heap).unwrap();

    let has_function_constant = loaded
      .as_function()
      .unwrap()
      .constants
      .iter()
      .any(|c| c.as_gc().map(|g| g.as_function().is_some()).unwrap_or(false));
    assert!(has_function_constant);
  }
}
