//! Heap object set: the common header and the nine concrete object kinds
//! (§3 "Heap object common header", grounded directly on `cobj.h`'s
//! `CObj`/`CommonHeader` pattern — every concrete struct is a `GcHeader`
//! followed by its own payload, and a [`Gc`] handle is just a tagged
//! pointer to the header, cast to the payload type once the kind tag
//! confirms it's safe).
//!
//! Objects are never moved once allocated (the allocator in `crate::gc`
//! only ever grows the heap by `Box`-ing a new `GcBox<T>` and linking it
//! into the allocation list), so a [`Gc`] handle stays valid for the
//! object's lifetime and is never invalidated by allocating more objects.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr::NonNull;

use crate::error::Result;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjKind {
  String,
  Object,
  Dict,
  Function,
  CFunction,
  Method,
  Closure,
  Upvalue,
  Error,
}

/// The header every heap object carries: type tag, mark bit, and the
/// intrusive allocation-list link the GC sweeps.
pub struct GcHeader {
  pub kind: ObjKind,
  pub marked: Cell<bool>,
  pub next: Cell<Option<NonNull<GcHeader>>>,
}

#[repr(C)]
pub struct GcBox<T> {
  pub header: GcHeader,
  pub data: T,
}

/// A handle to a heap object. Copy, because the handle is just a pointer —
/// ownership of the pointee lives on the allocation list, not here.
#[derive(Clone, Copy)]
pub struct Gc(NonNull<GcHeader>);

impl Gc {
  pub(crate) unsafe fn from_header(ptr: NonNull<GcHeader>) -> Gc {
    Gc(ptr)
  }

  pub fn kind(&self) -> ObjKind {
    unsafe { self.0.as_ref().kind }
  }

  pub(crate) fn header_ptr(&self) -> NonNull<GcHeader> {
    self.0
  }

  pub fn is_marked(&self) -> bool {
    unsafe { self.0.as_ref().marked.get() }
  }

  pub fn mark(&self) {
    unsafe { self.0.as_ref().marked.set(true) };
  }

  pub fn unmark(&self) {
    unsafe { self.0.as_ref().marked.set(false) };
  }

  /// Objects are leaked onto the allocation list and never moved or freed
  /// while reachable, so a payload reference's real lifetime is "until
  /// the next sweep that doesn't mark this object" — not expressible in
  /// the borrow checker's terms, and not tied to any particular `Gc`
  /// handle's scope (handles are freely copied and dropped). We take
  /// `self` by value (a pointer copy) and hand back a caller-chosen
  /// lifetime, the same unsafe contract `NonNull::as_ref` itself exposes.
  fn payload<'a, T>(self) -> &'a T {
    unsafe { &self.0.cast::<GcBox<T>>().as_ref().data }
  }

  pub fn as_string<'a>(self) -> Option<&'a StringObj> {
    (self.kind() == ObjKind::String).then(|| self.payload())
  }

  pub fn as_object<'a>(self) -> Option<&'a ObjectObj> {
    (self.kind() == ObjKind::Object).then(|| self.payload())
  }

  pub fn as_dict<'a>(self) -> Option<&'a DictObj> {
    (self.kind() == ObjKind::Dict).then(|| self.payload())
  }

  pub fn as_function<'a>(self) -> Option<&'a FunctionObj> {
    (self.kind() == ObjKind::Function).then(|| self.payload())
  }

  pub fn as_cfunction<'a>(self) -> Option<&'a CFunctionObj> {
    (self.kind() == ObjKind::CFunction).then(|| self.payload())
  }

  pub fn as_method<'a>(self) -> Option<&'a MethodObj> {
    (self.kind() == ObjKind::Method).then(|| self.payload())
  }

  pub fn as_closure<'a>(self) -> Option<&'a ClosureObj> {
    (self.kind() == ObjKind::Closure).then(|| self.payload())
  }

  pub fn as_upvalue<'a>(self) -> Option<&'a UpvalueObj> {
    (self.kind() == ObjKind::Upvalue).then(|| self.payload())
  }

  pub fn as_error<'a>(self) -> Option<&'a ErrorObj> {
    (self.kind() == ObjKind::Error).then(|| self.payload())
  }

  /// Equality rule from §3: strings compare by identity post-interning,
  /// everything else by pointer identity too.
  pub fn identical(&self, other: &Gc) -> bool {
    self.0 == other.0
  }

  pub fn as_string_bytes<'a>(self) -> Option<&'a [u8]> {
    self.as_string().map(|s| s.bytes.as_ref())
  }

  pub fn string_hash(&self) -> u32 {
    self.as_string().map(|s| s.hash).unwrap_or(0)
  }

  pub fn ptr_bits(&self) -> u64 {
    self.0.as_ptr() as u64
  }

  /// `blacken`: pushes every `Value`/`Gc` this object references onto the
  /// GC's gray worklist.
  pub fn trace(&self, mut push: impl FnMut(Value)) {
    match self.kind() {
      ObjKind::String | ObjKind::CFunction => {}
      ObjKind::Object => {
        let o = self.as_object().unwrap();
        for (k, v) in o.fields.borrow().iter() {
          push(k);
          push(v);
        }
        if let Some(p) = o.proto.get() {
          push(Value::object(p));
        }
      }
      ObjKind::Dict => {
        let d = self.as_dict().unwrap();
        for (k, v) in d.table.borrow().iter() {
          push(k);
          push(v);
        }
      }
      ObjKind::Function => {
        let f = self.as_function().unwrap();
        if let Some(n) = f.name {
          push(Value::object(n));
        }
        if let Some(m) = f.module {
          push(Value::object(m));
        }
        for c in &f.constants {
          push(*c);
        }
      }
      ObjKind::Closure => {
        let c = self.as_closure().unwrap();
        push(Value::object(c.function));
        for u in &c.upvalues {
          push(Value::object(*u));
        }
      }
      ObjKind::Upvalue => {
        let u = self.as_upvalue().unwrap();
        if let UpvalueState::Closed(v) = u.state.borrow().clone() {
          push(v);
        }
      }
      ObjKind::Method => {
        let m = self.as_method().unwrap();
        push(Value::object(m.receiver));
        push(m.callable);
      }
      ObjKind::Error => {
        let e = self.as_error().unwrap();
        push(e.payload);
      }
    }
  }

  /// Dispatches to the destructor of the concrete payload type, releasing
  /// any owned buffers (table storage, bytecode/line arrays, upvalue
  /// arrays). Called exactly once, by sweep, for a white object.
  pub(crate) unsafe fn drop_in_place(ptr: NonNull<GcHeader>) {
    macro_rules! drop_as {
      ($ty:ty) => {
        drop(Box::from_raw(ptr.cast::<GcBox<$ty>>().as_ptr()))
      };
    }
    match ptr.as_ref().kind {
      ObjKind::String => drop_as!(StringObj),
      ObjKind::Object => drop_as!(ObjectObj),
      ObjKind::Dict => drop_as!(DictObj),
      ObjKind::Function => drop_as!(FunctionObj),
      ObjKind::CFunction => drop_as!(CFunctionObj),
      ObjKind::Method => drop_as!(MethodObj),
      ObjKind::Closure => drop_as!(ClosureObj),
      ObjKind::Upvalue => drop_as!(UpvalueObj),
      ObjKind::Error => drop_as!(ErrorObj),
    }
  }
}

impl fmt::Debug for Gc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Gc({:?}@{:p})", self.kind(), self.0.as_ptr())
  }
}

pub(crate) fn alloc<T>(kind: ObjKind, data: T) -> (NonNull<GcHeader>, Gc) {
  let boxed = Box::new(GcBox {
    header: GcHeader {
      kind,
      marked: Cell::new(false),
      next: Cell::new(None),
    },
    data,
  });
  let raw = Box::into_raw(boxed);
  let header_ptr = unsafe { NonNull::new_unchecked(raw as *mut GcHeader) };
  (header_ptr, unsafe { Gc::from_header(header_ptr) })
}

/// Well-known protocol key names, flagged on `StringObj::is_istring` so
/// objects can cache negative lookups against them in a single bitflag
/// word (§3, §4.6).
pub const ISTRINGS: &[&str] = &[
  "__init",
  "__tostring",
  "__index",
  "__newindex",
  "__getter",
  "__setter",
  "__iter",
  "__next",
  "__reserved",
];

pub struct StringObj {
  pub bytes: Box<[u8]>,
  pub hash: u32,
  pub is_istring: bool,
  /// Index into `ISTRINGS` when `is_istring`, used as the miss-cache bit
  /// position.
  pub istring_bit: Option<u32>,
}

impl StringObj {
  pub fn as_str(&self) -> &str {
    std::str::from_utf8(&self.bytes).unwrap_or("<invalid utf8>")
  }
}

pub struct FunctionObj {
  pub name: Option<Gc>,
  pub module: Option<Gc>,
  pub arity: u8,
  pub upvalue_count: u8,
  pub variadic: bool,
  pub code: Vec<u8>,
  pub lines: Vec<u32>,
  pub constants: Vec<Value>,
  /// (is_local, index) pairs consumed by `CLOSURE` to resolve captures.
  pub upvalue_refs: Vec<(bool, u8)>,
}

pub struct ClosureObj {
  pub function: Gc,
  pub upvalues: Vec<Gc>,
}

#[derive(Clone, Copy)]
pub enum UpvalueState {
  /// Points at `stack[index]` of the owning VM's value stack.
  Open(usize),
  Closed(Value),
}

pub struct UpvalueObj {
  pub state: RefCell<UpvalueState>,
}

pub struct ObjectObj {
  pub fields: RefCell<Table>,
  pub proto: Cell<Option<Gc>>,
  /// Bit `i` set means "no own field found for `ISTRINGS[i]` last time".
  pub miss_cache: Cell<u64>,
  pub user_tag: Cell<i64>,
}

pub struct DictObj {
  pub table: RefCell<Table>,
}

pub type CFunction = fn(&mut Vm, &[Value]) -> Result<Value>;

pub struct CFunctionObj {
  pub name: &'static str,
  pub func: CFunction,
}

pub struct MethodObj {
  pub receiver: Gc,
  pub callable: Value,
}

pub struct ErrorObj {
  pub payload: Value,
  pub trace: Vec<crate::error::TraceFrame>,
  pub is_parse_error: bool,
}
