//! The `Value` contract (§3): `Nil | Bool(b) | Number(f64) | Ref(&HeapObj)`.
//!
//! Two encodings satisfy it — a NaN-boxed 64-bit word, or a discriminated
//! tagged union — selected by the `portable` feature. Every caller in this
//! crate goes through the inherent methods below (`is_nil`, `as_number`,
//! `as_gc`, ...), never the encoding, so the two are interchangeable.

#[cfg(not(feature = "portable"))]
mod nanbox;
#[cfg(feature = "portable")]
mod portable;

#[cfg(not(feature = "portable"))]
pub use nanbox::Value;
#[cfg(feature = "portable")]
pub use portable::Value;

use crate::obj::Gc;

impl Value {
  pub fn object(obj: Gc) -> Value {
    Value::from_gc(obj)
  }

  pub fn bool_(b: bool) -> Value {
    Value::from_bool(b)
  }

  pub fn number(n: f64) -> Value {
    Value::from_number(n)
  }

  pub fn as_string_bytes(&self) -> Option<&[u8]> {
    self.as_gc().and_then(|g| g.as_string_bytes())
  }

  /// The `== falsey` rule used by jumps: nil or boolean false.
  pub fn is_falsey(&self) -> bool {
    self.is_nil() || self.as_bool() == Some(false)
  }

  pub fn truthy(&self) -> bool {
    !self.is_falsey()
  }

  pub fn type_name(&self) -> &'static str {
    if self.is_nil() {
      "nil"
    } else if self.as_bool().is_some() {
      "bool"
    } else if self.as_number().is_some() {
      "number"
    } else {
      match self.as_gc().map(|g| g.kind()) {
        Some(crate::obj::ObjKind::String) => "string",
        Some(crate::obj::ObjKind::Object) => "object",
        Some(crate::obj::ObjKind::Dict) => "table",
        Some(crate::obj::ObjKind::Function) => "function",
        Some(crate::obj::ObjKind::CFunction) => "function",
        Some(crate::obj::ObjKind::Method) => "method",
        Some(crate::obj::ObjKind::Closure) => "function",
        Some(crate::obj::ObjKind::Upvalue) => "upvalue",
        Some(crate::obj::ObjKind::Error) => "error",
        None => "nil",
      }
    }
  }

  /// Equality rule from §3: nil=nil; booleans by value; numbers by IEEE
  /// `==`; references by identity (sufficient for interned strings and
  /// every other heap kind, since none of them are structurally
  /// deduplicated except strings).
  pub fn identical(&self, other: &Value) -> bool {
    if self.is_nil() && other.is_nil() {
      return true;
    }
    match (self.as_bool(), other.as_bool()) {
      (Some(a), Some(b)) => return a == b,
      (None, None) => {}
      _ => return false,
    }
    match (self.as_number(), other.as_number()) {
      (Some(a), Some(b)) => return a == b,
      (None, None) => {}
      _ => return false,
    }
    match (self.as_gc(), other.as_gc()) {
      (Some(a), Some(b)) => a.identical(&b),
      _ => false,
    }
  }

  /// Hash per §4.1: numbers hash by xoring the 32-bit halves of their bit
  /// pattern (zero forced to hash 0 so `-0.0`/`0.0` collide); strings use
  /// their cached content hash; other references hash by pointer address.
  pub fn hash_bits(&self) -> u32 {
    if let Some(n) = self.as_number() {
      if n == 0.0 {
        return 0;
      }
      let bits = n.to_bits();
      return (bits as u32) ^ ((bits >> 32) as u32);
    }
    if let Some(b) = self.as_bool() {
      return b as u32;
    }
    if let Some(g) = self.as_gc() {
      return match g.kind() {
        crate::obj::ObjKind::String => g.string_hash(),
        _ => (g.ptr_bits() as u32) ^ ((g.ptr_bits() >> 32) as u32),
      };
    }
    0
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    self.identical(other)
  }
}

impl std::fmt::Display for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.is_nil() {
      return write!(f, "nil");
    }
    if let Some(b) = self.as_bool() {
      return write!(f, "{b}");
    }
    if let Some(n) = self.as_number() {
      if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        return write!(f, "{}", n as i64);
      }
      return write!(f, "{n}");
    }
    match self.as_gc().map(|g| g.kind()) {
      Some(crate::obj::ObjKind::String) => {
        write!(f, "{}", self.as_gc().unwrap().as_string().unwrap().as_str())
      }
      Some(crate::obj::ObjKind::Function) => write!(f, "<function>"),
      Some(crate::obj::ObjKind::Closure) => write!(f, "<function>"),
      Some(crate::obj::ObjKind::CFunction) => write!(f, "<cfunction>"),
      Some(crate::obj::ObjKind::Object) => write!(f, "<object>"),
      Some(crate::obj::ObjKind::Dict) => write!(f, "<table>"),
      Some(crate::obj::ObjKind::Method) => write!(f, "<method>"),
      Some(crate::obj::ObjKind::Upvalue) => write!(f, "<upvalue>"),
      Some(crate::obj::ObjKind::Error) => write!(f, "<error>"),
      None => write!(f, "nil"),
    }
  }
}

impl std::fmt::Debug for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Value({self})")
  }
}
