//! Lexer and parser for Cosmo source text.
//!
//! [`parse`] turns source text into an [`ast::Module`]. Errors are plain
//! data (message + span); turning them into a rendered `diag::Report` is
//! left to the caller, since only the caller knows the source's display
//! name.

pub mod ast;
mod lexer;
mod parser;

use beef::lean::Cow;
use span::Span;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug)]
pub struct Error {
  pub message: Cow<'static, str>,
  pub span: Span,
}

impl Error {
  pub fn new(message: impl Into<Cow<'static, str>>, span: impl Into<Span>) -> Self {
    let message = message.into();
    let span = span.into();
    Error { message, span }
  }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let Error { message, span } = self;
    write!(f, "error at {span}: {message}")
  }
}

pub fn parse(source: &str) -> Result<ast::Module<'_>> {
  parser::Parser::new(source).parse_module()
}
