//! Tokenizer for Cosmo source text, built on `logos`.
//!
//! The token set mirrors the reserved words and punctuation of the
//! reference lexer: single-character tokens, the doubled `++`/`--`/`..`
//! forms, and the keyword set (`var`, `local`, `function`, `proto`, `if`,
//! `elseif`, `else`, `then`, `end`, `while`, `do`, `for`, `in`, `return`,
//! `break`, `continue`, `and`, `or`, `not`, `nil`, `true`, `false`).
//! Statements are terminated by `;` rather than the reference
//! newline-sensitive `TOKEN_EOS`; the surface grammar here does not need to
//! track brace nesting to disambiguate line breaks.

use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
pub enum Token {
  #[regex(r"[ \t\r\n]+", logos::skip)]
  #[regex(r"//[^\n]*", logos::skip)]
  Whitespace,

  #[token("(")]
  LeftParen,
  #[token(")")]
  RightParen,
  #[token("{")]
  LeftBrace,
  #[token("}")]
  RightBrace,
  #[token("[")]
  LeftBracket,
  #[token("]")]
  RightBracket,
  #[token(",")]
  Comma,
  #[token(":")]
  Colon,
  #[token(";")]
  Semi,
  #[token(".")]
  Dot,
  #[token("..")]
  DotDot,
  #[token("-")]
  Minus,
  #[token("--")]
  MinusMinus,
  #[token("+")]
  Plus,
  #[token("++")]
  PlusPlus,
  #[token("+=")]
  PlusEqual,
  #[token("-=")]
  MinusEqual,
  #[token("*=")]
  StarEqual,
  #[token("/=")]
  SlashEqual,
  #[token("/")]
  Slash,
  #[token("*")]
  Star,
  #[token("#")]
  Pound,
  #[token("%")]
  Percent,

  #[token("!")]
  Bang,
  #[token("!=")]
  BangEqual,
  #[token("=")]
  Equal,
  #[token("==")]
  EqualEqual,
  #[token(">")]
  Greater,
  #[token(">=")]
  GreaterEqual,
  #[token("<")]
  Less,
  #[token("<=")]
  LessEqual,

  #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
  Identifier,
  #[regex(r#""([^"\\]|\\.)*""#)]
  #[regex(r"'([^'\\]|\\.)*'")]
  String,
  #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
  #[regex(r"0[xX][0-9a-fA-F]+")]
  Number,

  #[token("nil")]
  Nil,
  #[token("true")]
  True,
  #[token("false")]
  False,

  #[token("and")]
  And,
  #[token("break")]
  Break,
  #[token("continue")]
  Continue,
  #[token("do")]
  Do,
  #[token("else")]
  Else,
  #[token("elseif")]
  ElseIf,
  #[token("end")]
  End,
  #[token("for")]
  For,
  #[token("function")]
  Function,
  #[token("proto")]
  Proto,
  #[token("if")]
  If,
  #[token("in")]
  In,
  #[token("local")]
  Local,
  #[token("not")]
  Not,
  #[token("or")]
  Or,
  #[token("return")]
  Return,
  #[token("then")]
  Then,
  #[token("var")]
  Var,
  #[token("while")]
  While,

  #[error]
  Error,
  Eof,
}

impl Token {
  pub fn is_eof(&self) -> bool {
    matches!(self, Token::Eof)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lex(src: &str) -> Vec<Token> {
    Token::lexer(src).collect()
  }

  #[test]
  fn punctuation() {
    assert_eq!(
      lex("( ) { } [ ] , : ; . .. - -- + ++ / * # %"),
      vec![
        Token::LeftParen,
        Token::RightParen,
        Token::LeftBrace,
        Token::RightBrace,
        Token::LeftBracket,
        Token::RightBracket,
        Token::Comma,
        Token::Colon,
        Token::Semi,
        Token::Dot,
        Token::DotDot,
        Token::Minus,
        Token::MinusMinus,
        Token::Plus,
        Token::PlusPlus,
        Token::Slash,
        Token::Star,
        Token::Pound,
        Token::Percent,
      ]
    );
  }

  #[test]
  fn keywords_vs_identifiers() {
    assert_eq!(lex("var x = nil"), vec![Token::Var, Token::Identifier, Token::Equal, Token::Nil]);
    assert_eq!(lex("variable"), vec![Token::Identifier]);
  }

  #[test]
  fn numbers_and_strings() {
    assert_eq!(lex("1 1.5 0x1F"), vec![Token::Number, Token::Number, Token::Number]);
    assert_eq!(lex(r#" "hi" 'there' "#), vec![Token::String, Token::String]);
  }

  #[test]
  fn comment_is_skipped() {
    assert_eq!(lex("1 // trailing\n2"), vec![Token::Number, Token::Number]);
  }
}
