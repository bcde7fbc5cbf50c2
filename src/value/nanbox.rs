//! NaN-boxed `Value` representation (default; disabled by the `portable`
//! feature).
//!
//! A single `u64`. Any bit pattern that is not a quiet NaN is a live
//! `f64`. Quiet NaNs are repurposed: the sign bit marks a heap reference
//! (pointer packed into the low 48 bits, the usable span on every
//! architecture this targets), and the low 2 bits of a non-reference NaN
//! distinguish `nil`/`true`/`false`.
//!
//! This relies on pointers fitting in 48 bits and the target being
//! little/big-endian-agnostic at the bit level (we never read the u64 as
//! bytes) — true of every mainstream 64-bit target, not true in general,
//! which is exactly why `portable` exists as an escape hatch.

use std::ptr::NonNull;

use crate::obj::{Gc, GcHeader};

const QNAN: u64 = 0x7ffc_0000_0000_0000;
const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
const TAG_NIL: u64 = 1;
const TAG_FALSE: u64 = 2;
const TAG_TRUE: u64 = 3;
const PTR_MASK: u64 = 0x0000_ffff_ffff_ffff;

#[derive(Clone, Copy)]
pub struct Value(u64);

impl Value {
  pub fn nil() -> Value {
    Value(QNAN | TAG_NIL)
  }

  pub(super) fn from_bool(b: bool) -> Value {
    Value(QNAN | if b { TAG_TRUE } else { TAG_FALSE })
  }

  pub(super) fn from_number(n: f64) -> Value {
    Value(n.to_bits())
  }

  pub(super) fn from_gc(obj: Gc) -> Value {
    let bits = obj.header_ptr().as_ptr() as u64 & PTR_MASK;
    Value(SIGN_BIT | QNAN | bits)
  }

  fn is_number_bits(&self) -> bool {
    (self.0 & QNAN) != QNAN
  }

  pub fn is_nil(&self) -> bool {
    self.0 == (QNAN | TAG_NIL)
  }

  pub fn as_bool(&self) -> Option<bool> {
    if self.0 == (QNAN | TAG_TRUE) {
      Some(true)
    } else if self.0 == (QNAN | TAG_FALSE) {
      Some(false)
    } else {
      None
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    self.is_number_bits().then(|| f64::from_bits(self.0))
  }

  pub fn as_gc(&self) -> Option<Gc> {
    if !self.is_number_bits() && (self.0 & SIGN_BIT) != 0 {
      let ptr = (self.0 & PTR_MASK) as *mut GcHeader;
      NonNull::new(ptr).map(|p| unsafe { Gc::from_header(p) })
    } else {
      None
    }
  }
}
