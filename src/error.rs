//! Error kinds surfaced by the compiler, VM, and embedding layer.
//!
//! A [`CosmoError`] is plain data: it never carries a `Backtrace` or unwinds
//! the host process. Runtime errors unwind only as far as the nearest
//! `pcall` boundary (see `crate::vm::Vm::pcall`); fatal errors are the one
//! kind the reference design terminates the process over.

use std::fmt;

use crate::value::Value;

/// The value an `Error` object wraps. Most engine-raised errors are plain
/// messages; `error(v)` called from host or script code may raise any
/// `Value`, which requires no extra heap access to construct here.
#[derive(Debug, Clone)]
pub enum ErrorPayload {
  Message(String),
  Value(Value),
}

impl ErrorPayload {
  pub fn display(&self) -> String {
    match self {
      ErrorPayload::Message(m) => m.clone(),
      ErrorPayload::Value(v) => format!("{v}"),
    }
  }
}

#[derive(Debug, Clone)]
pub enum CosmoError {
  /// Malformed source at compile time. Never reaches the interpreter.
  Parse { message: String, line: u32 },
  /// A type error, arity mismatch, overflow, or host-raised error.
  /// Carries the frame trace captured at the point of the throw.
  Runtime {
    payload: ErrorPayload,
    trace: Vec<TraceFrame>,
  },
  /// Out-of-memory, an unknown opcode, or panic-while-panicking. The
  /// reference design terminates the process over these.
  Fatal { message: String },
}

#[derive(Debug, Clone)]
pub struct TraceFrame {
  pub name: Option<String>,
  pub line: u32,
}

impl CosmoError {
  pub fn runtime(message: impl Into<String>, trace: Vec<TraceFrame>) -> Self {
    CosmoError::Runtime {
      payload: ErrorPayload::Message(message.into()),
      trace,
    }
  }

  pub fn runtime_value(payload: Value, trace: Vec<TraceFrame>) -> Self {
    CosmoError::Runtime {
      payload: ErrorPayload::Value(payload),
      trace,
    }
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    CosmoError::Fatal {
      message: message.into(),
    }
  }

  /// Render per spec's `print_error`: `"Objection on [line N] in
  /// <name>()\n\t"` for the innermost frame, `"[line N] in <name>()\n"`
  /// for the rest.
  pub fn render(&self) -> String {
    match self {
      CosmoError::Parse { message, line } => format!("[line {line}] {message}"),
      CosmoError::Fatal { message } => format!("fatal: {message}"),
      CosmoError::Runtime { payload, trace } => {
        let mut out = String::new();
        let msg = payload.display();
        let mut frames = trace.iter();
        if let Some(first) = frames.next() {
          out.push_str(&format!(
            "Objection on [line {}] in {}()\n\t{}\n",
            first.line,
            first.name.as_deref().unwrap_or("?"),
            msg
          ));
        } else {
          out.push_str(&format!("Objection: {msg}\n"));
        }
        for frame in frames {
          out.push_str(&format!(
            "[line {}] in {}()\n",
            frame.line,
            frame.name.as_deref().unwrap_or("?")
          ));
        }
        out
      }
    }
  }
}

impl fmt::Display for CosmoError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.render())
  }
}

impl std::error::Error for CosmoError {}

pub type Result<T> = std::result::Result<T, CosmoError>;
