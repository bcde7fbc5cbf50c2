//! Tri-color mark-sweep garbage collector (§4.2), grounded on `cmem.c`'s
//! allocate/collect/freeze cycle.
//!
//! All heap allocation in this crate routes through [`Heap`]'s typed
//! `alloc_*` constructors; there is no other way to get a [`Gc`] handle.
//! Every constructor links the new object onto the allocation list before
//! returning it, and the caller is responsible for making the result
//! reachable (push it on the stack, or register it as a root) before the
//! next allocation that might trigger a cycle.

use std::ptr::NonNull;

use crate::obj::{
  alloc, CFunction, CFunctionObj, ClosureObj, DictObj, FunctionObj, Gc, GcHeader, MethodObj,
  ObjKind, ObjectObj, StringObj, UpvalueObj, UpvalueState, ISTRINGS,
};
use crate::table::Table;
use crate::value::Value;

const HEAP_GROW_FACTOR: usize = 2;
const INITIAL_THRESHOLD: usize = 1024 * 1024;

fn hash_bytes(bytes: &[u8]) -> u32 {
  // length-mixed sampling hash (§4.1): h = len; step = (len>>5)+1;
  // walk backwards from the end in `step` strides.
  let len = bytes.len();
  let mut h = len as u32;
  let step = (len >> 5) + 1;
  let mut i = len;
  while i >= step {
    h = (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
    i -= step;
  }
  h
}

pub struct Heap {
  allocation_list: Option<NonNull<GcHeader>>,
  bytes_allocated: usize,
  next_gc: usize,
  freeze_count: u32,
  gray: Vec<Value>,
  pub intern: Table,
  pub globals: Table,
  roots: Vec<Gc>,
  pub stress: bool,
}

impl Default for Heap {
  fn default() -> Self {
    Self::new()
  }
}

impl Heap {
  pub fn new() -> Self {
    Heap {
      allocation_list: None,
      bytes_allocated: 0,
      next_gc: INITIAL_THRESHOLD,
      freeze_count: 0,
      gray: Vec::new(),
      intern: Table::new(),
      globals: Table::new(),
      roots: Vec::new(),
      stress: cfg!(feature = "gc-stress"),
    }
  }

  pub fn is_frozen(&self) -> bool {
    self.freeze_count > 0
  }

  pub fn freeze(&mut self) {
    self.freeze_count += 1;
  }

  /// Unfreezes and, if the counter reaches zero, offers the collector a
  /// chance to run (mirrors `cosmoM_unfreezeGC`'s `checkGarbage` call).
  pub fn unfreeze(&mut self, roots: &dyn Fn(&mut Vec<Value>)) {
    self.freeze_count = self.freeze_count.saturating_sub(1);
    if self.freeze_count == 0 {
      self.maybe_collect(0, roots);
    }
  }

  pub fn add_root(&mut self, obj: Gc) {
    self.roots.push(obj);
  }

  pub fn remove_root(&mut self, obj: Gc) {
    if let Some(pos) = self.roots.iter().position(|r| r.identical(&obj)) {
      self.roots.swap_remove(pos);
    }
  }

  fn link(&mut self, header: NonNull<GcHeader>, size: usize) {
    unsafe { header.as_ref().next.set(self.allocation_list) };
    self.allocation_list = Some(header);
    self.bytes_allocated += size;
  }

  fn maybe_collect(&mut self, needed: usize, roots: &dyn Fn(&mut Vec<Value>)) -> bool {
    if self.is_frozen() {
      return false;
    }
    if self.stress || self.bytes_allocated + needed > self.next_gc {
      self.collect(roots);
      true
    } else {
      false
    }
  }

  /// Runs one full mark-sweep cycle. `roots` pushes every externally-held
  /// root `Value` (stack slots, active closures, open upvalues, the
  /// default prototype) into the passed buffer; the globals table, intern
  /// pool, and user-root list are always included by this function.
  pub fn collect(&mut self, roots: &dyn Fn(&mut Vec<Value>)) {
    log::debug!("gc: collecting, {} bytes allocated", self.bytes_allocated);
    self.gray.clear();
    roots(&mut self.gray);
    for (k, v) in self.globals.iter() {
      self.gray.push(k);
      self.gray.push(v);
    }
    for r in &self.roots {
      self.gray.push(Value::object(*r));
    }
    // Deliberately NOT rooting the intern pool's own entries: a string
    // reachable only from the pool is weak and must die this cycle.

    self.mark_phase();

    // Pre-sweep intern-pool cleanup: drop entries whose string is still
    // white before the sweep frees their backing objects.
    self.intern.retain_marked_keys(|v| {
      v.as_gc().map(|g| g.is_marked()).unwrap_or(true)
    });

    self.sweep();

    self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
    log::debug!(
      "gc: done, {} bytes allocated, next at {}",
      self.bytes_allocated,
      self.next_gc
    );
  }

  fn mark_value(gray: &mut Vec<Value>, v: Value) {
    if let Some(g) = v.as_gc() {
      if !g.is_marked() {
        g.mark();
        if !matches!(g.kind(), ObjKind::String | ObjKind::CFunction) {
          gray.push(v);
        }
      }
    }
  }

  fn mark_phase(&mut self) {
    let mut worklist = std::mem::take(&mut self.gray);
    let mut i = 0;
    // first pass: mark every root value itself (they may not yet be marked)
    while i < worklist.len() {
      let v = worklist[i];
      i += 1;
      if let Some(g) = v.as_gc() {
        if !g.is_marked() {
          g.mark();
        }
      }
    }
    // blacken: repeatedly trace any marked, traceable object's children
    let mut frontier: Vec<Gc> = worklist.iter().filter_map(|v| v.as_gc()).collect();
    while let Some(g) = frontier.pop() {
      g.trace(|child| {
        if let Some(cg) = child.as_gc() {
          if !cg.is_marked() {
            cg.mark();
            frontier.push(cg);
          }
        }
      });
    }
    self.gray = worklist;
    self.gray.clear();
  }

  fn sweep(&mut self) {
    let mut freed = 0usize;
    let mut prev: Option<NonNull<GcHeader>> = None;
    let mut cur = self.allocation_list;
    while let Some(node) = cur {
      let marked = unsafe { node.as_ref().marked.get() };
      let next = unsafe { node.as_ref().next.get() };
      if marked {
        unsafe { node.as_ref().marked.set(false) };
        prev = Some(node);
      } else {
        match prev {
          Some(p) => unsafe { p.as_ref().next.set(next) },
          None => self.allocation_list = next,
        }
        freed += 1;
        unsafe { crate::obj::Gc::drop_in_place(node) };
      }
      cur = next;
    }
    self.bytes_allocated = self.bytes_allocated.saturating_sub(freed * 64);
  }

  // ---- typed constructors ------------------------------------------

  pub fn intern_string(&mut self, bytes: &[u8]) -> Gc {
    let hash = hash_bytes(bytes);
    if let Some(existing) = self.intern.find_interned(bytes, hash) {
      return existing.as_gc().expect("intern pool entries are always strings");
    }
    let istring_bit = ISTRINGS.iter().position(|s| s.as_bytes() == bytes).map(|i| i as u32);
    let (header, handle) = alloc(
      ObjKind::String,
      StringObj {
        bytes: bytes.to_vec().into_boxed_slice(),
        hash,
        is_istring: istring_bit.is_some(),
        istring_bit,
      },
    );
    self.link(header, std::mem::size_of::<StringObj>() + bytes.len());
    self.intern.insert(Value::object(handle), Value::bool_(true));
    handle
  }

  pub fn alloc_function(&mut self, f: FunctionObj) -> Gc {
    let size = std::mem::size_of::<FunctionObj>() + f.code.len() + f.constants.len() * 8;
    let (header, handle) = alloc(ObjKind::Function, f);
    self.link(header, size);
    handle
  }

  pub fn alloc_closure(&mut self, function: Gc, upvalues: Vec<Gc>) -> Gc {
    let size = std::mem::size_of::<ClosureObj>() + upvalues.len() * 8;
    let (header, handle) = alloc(ObjKind::Closure, ClosureObj { function, upvalues });
    self.link(header, size);
    handle
  }

  pub fn alloc_upvalue(&mut self, slot: usize) -> Gc {
    let (header, handle) = alloc(
      ObjKind::Upvalue,
      UpvalueObj {
        state: std::cell::RefCell::new(UpvalueState::Open(slot)),
      },
    );
    self.link(header, std::mem::size_of::<UpvalueObj>());
    handle
  }

  pub fn alloc_object(&mut self, proto: Option<Gc>) -> Gc {
    let (header, handle) = alloc(
      ObjKind::Object,
      ObjectObj {
        fields: std::cell::RefCell::new(Table::new()),
        proto: std::cell::Cell::new(proto),
        miss_cache: std::cell::Cell::new(0),
        user_tag: std::cell::Cell::new(0),
      },
    );
    self.link(header, std::mem::size_of::<ObjectObj>());
    handle
  }

  pub fn alloc_dict(&mut self) -> Gc {
    let (header, handle) = alloc(
      ObjKind::Dict,
      DictObj {
        table: std::cell::RefCell::new(Table::new()),
      },
    );
    self.link(header, std::mem::size_of::<DictObj>());
    handle
  }

  pub fn alloc_cfunction(&mut self, name: &'static str, func: CFunction) -> Gc {
    let (header, handle) = alloc(ObjKind::CFunction, CFunctionObj { name, func });
    self.link(header, std::mem::size_of::<CFunctionObj>());
    handle
  }

  pub fn alloc_method(&mut self, receiver: Gc, callable: Value) -> Gc {
    let (header, handle) = alloc(ObjKind::Method, MethodObj { receiver, callable });
    self.link(header, std::mem::size_of::<MethodObj>());
    handle
  }

  pub fn alloc_error(&mut self, payload: Value, trace: Vec<crate::error::TraceFrame>, is_parse_error: bool) -> Gc {
    let (header, handle) = alloc(
      ObjKind::Error,
      crate::obj::ErrorObj {
        payload,
        trace,
        is_parse_error,
      },
    );
    self.link(header, std::mem::size_of::<crate::obj::ErrorObj>());
    handle
  }

  pub fn bytes_allocated(&self) -> usize {
    self.bytes_allocated
  }

  /// Called by the VM after every opcode: runs a collection if the heap
  /// is due (stress mode, or past the grow-factor threshold) and not
  /// currently frozen.
  pub fn collect_if_due(&mut self, roots: &dyn Fn(&mut Vec<Value>)) {
    self.maybe_collect(0, roots);
  }
}

impl Drop for Heap {
  fn drop(&mut self) {
    let mut cur = self.allocation_list;
    while let Some(node) = cur {
      let next = unsafe { node.as_ref().next.get() };
      unsafe { crate::obj::Gc::drop_in_place(node) };
      cur = next;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn no_roots(_gray: &mut Vec<Value>) {}

  #[test]
  fn interning_same_bytes_twice_returns_identical_handle() {
    let mut heap = Heap::new();
    let a = heap.intern_string(b"hello");
    let b = heap.intern_string(b"hello");
    assert!(a.identical(&b));
  }

  #[test]
  fn interning_distinct_bytes_returns_distinct_handles() {
    let mut heap = Heap::new();
    let a = heap.intern_string(b"hello");
    let b = heap.intern_string(b"world");
    assert!(!a.identical(&b));
  }

  #[test]
  fn collect_with_no_roots_frees_unreferenced_objects() {
    let mut heap = Heap::new();
    heap.alloc_object(None);
    heap.alloc_dict();
    assert!(heap.bytes_allocated() > 0);

    heap.collect(&no_roots);

    assert_eq!(heap.bytes_allocated(), 0);
  }

  #[test]
  fn collect_keeps_objects_reachable_from_roots() {
    let mut heap = Heap::new();
    let kept = heap.alloc_dict();
    heap.alloc_object(None); // unreachable, should be swept

    heap.collect(&move |gray| gray.push(Value::object(kept)));

    // the kept handle is still valid and of the expected kind.
    assert_eq!(kept.kind(), ObjKind::Dict);
    assert!(heap.bytes_allocated() > 0);
  }

  #[test]
  fn collect_drops_interned_strings_with_no_other_referents() {
    let mut heap = Heap::new();
    heap.intern_string(b"transient");
    heap.collect(&no_roots);
    // a fresh intern call must allocate again, proving the old entry
    // (and its pool slot) did not survive the cycle.
    let before = heap.bytes_allocated();
    heap.intern_string(b"transient");
    assert!(heap.bytes_allocated() > before);
  }

  #[test]
  fn freeze_suppresses_collection_even_under_stress() {
    let mut heap = Heap::new();
    heap.stress = true;
    heap.freeze();
    heap.alloc_object(None);
    let before = heap.bytes_allocated();
    heap.collect_if_due(&no_roots);
    assert_eq!(heap.bytes_allocated(), before);
  }

  #[test]
  fn unfreeze_to_zero_offers_a_collection() {
    let mut heap = Heap::new();
    heap.stress = true;
    heap.freeze();
    heap.alloc_object(None);
    heap.unfreeze(&no_roots);
    assert_eq!(heap.bytes_allocated(), 0);
  }

  #[test]
  fn add_root_keeps_an_object_alive_without_stack_reachability() {
    let mut heap = Heap::new();
    let rooted = heap.alloc_dict();
    heap.add_root(rooted);
    heap.collect(&no_roots);
    assert_eq!(rooted.kind(), ObjKind::Dict);
    assert!(heap.bytes_allocated() > 0);
  }

  #[test]
  fn remove_root_allows_the_next_collection_to_free_it() {
    let mut heap = Heap::new();
    let rooted = heap.alloc_dict();
    heap.add_root(rooted);
    heap.remove_root(rooted);
    heap.collect(&no_roots);
    assert_eq!(heap.bytes_allocated(), 0);
  }
}
