//! A single-pass, Pratt-style recursive descent parser.
//!
//! Mirrors the shape of a hand-rolled `statement`/`expression`/`parsePrecedence`
//! compiler: one token of lookahead, a precedence-climbing expression parser,
//! and assignment handled at the statement level (so the parser can tell
//! `a.b = 1;` from `a.b();` without backtracking).

use beef::lean::Cow;
use logos::Logos;
use span::{Span, Spanned};

use crate::ast::*;
use crate::lexer::Token;
use crate::{Error, Result};

#[derive(Clone, Copy, PartialEq, PartialOrd)]
#[repr(u8)]
enum Prec {
  None,
  Assignment,
  Concat,
  Or,
  And,
  Equality,
  Comparison,
  Term,
  Factor,
  Unary,
  Call,
  Primary,
}

impl Prec {
  fn next(self) -> Prec {
    match self {
      Prec::None => Prec::Assignment,
      Prec::Assignment => Prec::Concat,
      Prec::Concat => Prec::Or,
      Prec::Or => Prec::And,
      Prec::And => Prec::Equality,
      Prec::Equality => Prec::Comparison,
      Prec::Comparison => Prec::Term,
      Prec::Term => Prec::Factor,
      Prec::Factor => Prec::Unary,
      Prec::Unary => Prec::Call,
      Prec::Call => Prec::Primary,
      Prec::Primary => Prec::Primary,
    }
  }
}

fn infix_prec(tok: Token) -> Prec {
  use Token::*;
  match tok {
    DotDot => Prec::Concat,
    Or => Prec::Or,
    And => Prec::And,
    EqualEqual | BangEqual => Prec::Equality,
    Less | LessEqual | Greater | GreaterEqual => Prec::Comparison,
    Plus | Minus => Prec::Term,
    Star | Slash | Percent => Prec::Factor,
    Dot | LeftParen | LeftBracket => Prec::Call,
    _ => Prec::None,
  }
}

// On average, a single parse method consumes between 10 and 700 bytes of
// stack space. Assuming ~50 recursive calls per dive and 700 bytes of stack
// space per call, we'll require 50 * 700 = 35k bytes of stack space in order
// to dive. For future proofing, we round this value up to 64k bytes.
const MINIMUM_STACK_REQUIRED: usize = 64_000;

// On WASM, remaining_stack() will always return None. Stack overflow panics
// are converted to exceptions and handled by the host, so a try/catch around
// a call into the parser is enough to handle this case there.
#[cfg(target_family = "wasm")]
fn check_recursion_limit(_span: Span) -> Result<()> {
  Ok(())
}

#[cfg(not(target_family = "wasm"))]
fn check_recursion_limit(span: Span) -> Result<()> {
  if stacker::remaining_stack()
    .map(|available| available > MINIMUM_STACK_REQUIRED)
    .unwrap_or(true)
  {
    Ok(())
  } else {
    Err(Error::new("nesting limit reached", span))
  }
}

pub struct Parser<'src> {
  src: &'src str,
  lexer: logos::Lexer<'src, Token>,
  current: (Token, Span),
  previous: (Token, Span),
}

impl<'src> Parser<'src> {
  pub fn new(src: &'src str) -> Self {
    let mut lexer = Token::lexer(src);
    let current = Self::advance_raw(&mut lexer);
    Parser {
      src,
      lexer,
      current,
      previous: current,
    }
  }

  fn advance_raw(lexer: &mut logos::Lexer<'src, Token>) -> (Token, Span) {
    match lexer.next() {
      Some(tok) => (tok, lexer.span().into()),
      None => {
        let end = lexer.source().len();
        (Token::Eof, Span { start: end, end })
      }
    }
  }

  fn text(&self, span: Span) -> &'src str {
    &self.src[span.range()]
  }

  fn bump(&mut self) -> (Token, Span) {
    self.previous = self.current;
    self.current = Self::advance_raw(&mut self.lexer);
    self.previous
  }

  fn check(&self, tok: Token) -> bool {
    self.current.0 == tok
  }

  fn eat(&mut self, tok: Token) -> bool {
    if self.check(tok) {
      self.bump();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, tok: Token, what: &'static str) -> Result<Span> {
    if self.check(tok) {
      Ok(self.bump().1)
    } else {
      Err(self.error(format!("expected {what}")))
    }
  }

  fn error(&self, message: impl Into<Cow<'static, str>>) -> Error {
    Error::new(message, self.current.1)
  }

  fn ident(&mut self, what: &'static str) -> Result<Ident<'src>> {
    let span = self.expect(Token::Identifier, what)?;
    Ok(Ident::new(span, Cow::borrowed(self.text(span))))
  }

  pub fn parse_module(mut self) -> Result<Module<'src>> {
    let mut body = Vec::new();
    while !self.check(Token::Eof) {
      body.push(self.declaration()?);
    }
    Ok(Module { body })
  }

  // ---- statements ----------------------------------------------------

  fn block(&mut self, terminators: &[Token]) -> Result<Vec<Stmt<'src>>> {
    check_recursion_limit(self.current.1)?;
    let mut out = Vec::new();
    while !terminators.iter().any(|t| self.check(*t)) && !self.check(Token::Eof) {
      out.push(self.declaration()?);
    }
    Ok(out)
  }

  fn declaration(&mut self) -> Result<Stmt<'src>> {
    match self.current.0 {
      Token::Var => self.var_decl(false),
      Token::Local => self.var_decl(true),
      Token::Function => self.func_stmt(),
      Token::Proto => self.proto_stmt(),
      _ => self.statement(),
    }
  }

  fn var_decl(&mut self, local: bool) -> Result<Stmt<'src>> {
    let start = self.bump().1; // `var` | `local`
    let name = self.ident("a variable name")?;
    self.expect(Token::Equal, "'=' after variable name")?;
    let value = self.expression()?;
    let end = self.expect(Token::Semi, "';' after variable declaration")?;
    let decl = Box::new(Decl { name, value });
    let kind = if local { StmtKind::Local(decl) } else { StmtKind::Var(decl) };
    Ok(stmt(start.join(end), kind))
  }

  fn func_stmt(&mut self) -> Result<Stmt<'src>> {
    let start = self.bump().1; // `function`
    let name = self.ident("a function name")?;
    let params = self.params()?;
    let body = self.block(&[Token::End])?;
    let end = self.expect(Token::End, "'end' after function body")?;
    Ok(stmt(
      start.join(end),
      StmtKind::Func(Box::new(FuncStmt { name, params, body })),
    ))
  }

  fn proto_stmt(&mut self) -> Result<Stmt<'src>> {
    let start = self.bump().1; // `proto`
    let name = self.ident("a proto name")?;
    let parent = if self.eat(Token::Colon) {
      Some(self.ident("a parent proto name")?)
    } else {
      None
    };
    let mut methods = Vec::new();
    while self.eat(Token::Function) {
      let mname = self.ident("a method name")?;
      let params = self.params()?;
      let body = self.block(&[Token::End])?;
      self.expect(Token::End, "'end' after method body")?;
      methods.push(Func {
        name: Some(mname),
        params,
        body,
      });
    }
    let end = self.expect(Token::End, "'end' after proto body")?;
    Ok(stmt(
      start.join(end),
      StmtKind::Proto(Box::new(ProtoStmt { name, parent, methods })),
    ))
  }

  fn params(&mut self) -> Result<Params<'src>> {
    self.expect(Token::LeftParen, "'(' after name")?;
    let mut names = Vec::new();
    if !self.check(Token::RightParen) {
      loop {
        names.push(self.ident("a parameter name")?);
        if !self.eat(Token::Comma) {
          break;
        }
      }
    }
    self.expect(Token::RightParen, "')' after parameters")?;
    Ok(Params { names })
  }

  fn statement(&mut self) -> Result<Stmt<'src>> {
    match self.current.0 {
      Token::If => self.if_stmt(),
      Token::While => self.while_stmt(),
      Token::For => self.for_stmt(),
      Token::Return => self.return_stmt(),
      Token::Break => {
        let span = self.bump().1;
        let end = self.expect(Token::Semi, "';' after 'break'")?;
        Ok(stmt(span.join(end), StmtKind::Break))
      }
      Token::Continue => {
        let span = self.bump().1;
        let end = self.expect(Token::Semi, "';' after 'continue'")?;
        Ok(stmt(span.join(end), StmtKind::Continue))
      }
      _ => self.expr_or_assign_stmt(),
    }
  }

  fn if_stmt(&mut self) -> Result<Stmt<'src>> {
    let start = self.bump().1; // `if`
    let mut branches = Vec::new();
    let cond = self.expression()?;
    self.expect(Token::Then, "'then' after condition")?;
    let body = self.block(&[Token::ElseIf, Token::Else, Token::End])?;
    branches.push(Branch { cond, body });
    while self.eat(Token::ElseIf) {
      let cond = self.expression()?;
      self.expect(Token::Then, "'then' after condition")?;
      let body = self.block(&[Token::ElseIf, Token::Else, Token::End])?;
      branches.push(Branch { cond, body });
    }
    let default = if self.eat(Token::Else) {
      Some(self.block(&[Token::End])?)
    } else {
      None
    };
    let end = self.expect(Token::End, "'end' after if statement")?;
    Ok(stmt(start.join(end), StmtKind::If(Box::new(If { branches, default }))))
  }

  fn while_stmt(&mut self) -> Result<Stmt<'src>> {
    let start = self.bump().1; // `while`
    let cond = self.expression()?;
    self.expect(Token::Do, "'do' after condition")?;
    let body = self.block(&[Token::End])?;
    let end = self.expect(Token::End, "'end' after while body")?;
    Ok(stmt(start.join(end), StmtKind::While(Box::new(While { cond, body }))))
  }

  fn for_stmt(&mut self) -> Result<Stmt<'src>> {
    let start = self.bump().1; // `for`
    let item = self.ident("a loop variable")?;
    self.expect(Token::In, "'in' after loop variable")?;
    let iter = self.expression()?;
    self.expect(Token::Do, "'do' after iterable")?;
    let body = self.block(&[Token::End])?;
    let end = self.expect(Token::End, "'end' after for body")?;
    Ok(stmt(start.join(end), StmtKind::For(Box::new(For { item, iter, body }))))
  }

  fn return_stmt(&mut self) -> Result<Stmt<'src>> {
    let start = self.bump().1; // `return`
    let value = if self.check(Token::Semi) {
      None
    } else {
      Some(self.expression()?)
    };
    let end = self.expect(Token::Semi, "';' after return statement")?;
    Ok(stmt(start.join(end), StmtKind::Return(value)))
  }

  /// `__proto(e) = v;`, `target = v;`, `target op= v;`, `target++;`,
  /// or a bare call expression statement.
  fn expr_or_assign_stmt(&mut self) -> Result<Stmt<'src>> {
    if self.check(Token::Identifier) && self.text(self.current.1) == "__proto" {
      let start = self.current.1;
      let save = (self.current, self.previous, self.lexer.clone());
      self.bump();
      if self.eat(Token::LeftParen) {
        let target = self.expression()?;
        self.expect(Token::RightParen, "')' after '__proto(...)'")?;
        if self.eat(Token::Equal) {
          let value = self.expression()?;
          let end = self.expect(Token::Semi, "';' after statement")?;
          return Ok(stmt(
            start.join(end),
            StmtKind::SetProto(Box::new(SetProto { target, value })),
          ));
        }
      }
      (self.current, self.previous, self.lexer) = save;
    }

    let start = self.current.1;
    let primary = self.call_or_primary()?;

    let target = match self.as_target(primary) {
      Ok(t) => t,
      Err(e) => {
        let end = self.expect(Token::Semi, "';' after expression statement")?;
        return Ok(stmt(start.join(end), StmtKind::Expr(Box::new(e))));
      }
    };

    if self.eat(Token::PlusPlus) {
      let end = self.expect(Token::Semi, "';' after statement")?;
      return Ok(stmt(start.join(end), StmtKind::Expr(Box::new(expr(
        start.join(end),
        ExprKind::IncDec(Box::new(IncDec { target, delta: 1 })),
      )))));
    }
    if self.eat(Token::MinusMinus) {
      let end = self.expect(Token::Semi, "';' after statement")?;
      return Ok(stmt(start.join(end), StmtKind::Expr(Box::new(expr(
        start.join(end),
        ExprKind::IncDec(Box::new(IncDec { target, delta: -1 })),
      )))));
    }

    let op = match self.current.0 {
      Token::Equal => None,
      Token::PlusEqual => Some(BinaryOp::Add),
      Token::MinusEqual => Some(BinaryOp::Sub),
      Token::StarEqual => Some(BinaryOp::Mul),
      Token::SlashEqual => Some(BinaryOp::Div),
      _ => return Err(self.error("expected an assignment or ';'")),
    };
    self.bump();
    let value = self.expression()?;
    let end = self.expect(Token::Semi, "';' after assignment")?;
    Ok(stmt(
      start.join(end),
      StmtKind::Assign(Box::new(Assign { target, op, value })),
    ))
  }

  fn as_target(&self, e: Expr<'src>) -> std::result::Result<Target<'src>, Expr<'src>> {
    let span = e.span;
    match e.into_inner() {
      ExprKind::GetVar(name) => Ok(Target::Var(*name)),
      ExprKind::GetField(base, name) => Ok(Target::Field(base, name)),
      ExprKind::GetIndex(base, idx) => Ok(Target::Index(base, idx)),
      other => Err(expr(span, other)),
    }
  }

  // ---- expressions -----------------------------------------------------

  fn expression(&mut self) -> Result<Expr<'src>> {
    self.parse_precedence(Prec::Assignment.next())
  }

  fn parse_precedence(&mut self, min: Prec) -> Result<Expr<'src>> {
    let mut left = self.unary()?;
    while infix_prec(self.current.0) >= min && infix_prec(self.current.0) != Prec::None {
      left = self.infix(left)?;
    }
    Ok(left)
  }

  fn infix(&mut self, left: Expr<'src>) -> Result<Expr<'src>> {
    match self.current.0 {
      Token::Dot => {
        self.bump();
        let name = self.ident("a field name")?;
        if self.check(Token::LeftParen) {
          let args = self.arg_list()?;
          let span = left.span.join(self.previous.1);
          Ok(expr(
            span,
            ExprKind::Invoke(Box::new(Invoke {
              receiver: left,
              method: name,
              args,
            })),
          ))
        } else {
          let span = left.span.join(name.span);
          Ok(expr(span, ExprKind::GetField(Box::new(left), name)))
        }
      }
      Token::LeftBracket => {
        self.bump();
        let index = self.expression()?;
        let end = self.expect(Token::RightBracket, "']' after index expression")?;
        let span = left.span.join(end);
        Ok(expr(span, ExprKind::GetIndex(Box::new(left), Box::new(index))))
      }
      Token::LeftParen => {
        let args = self.arg_list()?;
        let span = left.span.join(self.previous.1);
        Ok(expr(span, ExprKind::Call(Box::new(Call { callee: left, args }))))
      }
      tok => {
        let op = binary_op(tok).ok_or_else(|| self.error("expected an operator"))?;
        let prec = infix_prec(tok);
        self.bump();
        let right = self.parse_precedence(prec.next())?;
        let span = left.span.join(right.span);
        Ok(expr(span, ExprKind::Binary(Box::new(Binary { op, left, right }))))
      }
    }
  }

  fn arg_list(&mut self) -> Result<Vec<Expr<'src>>> {
    self.expect(Token::LeftParen, "'(' to begin arguments")?;
    let mut args = Vec::new();
    if !self.check(Token::RightParen) {
      loop {
        args.push(self.expression()?);
        if !self.eat(Token::Comma) {
          break;
        }
      }
    }
    self.expect(Token::RightParen, "')' after arguments")?;
    Ok(args)
  }

  fn unary(&mut self) -> Result<Expr<'src>> {
    match self.current.0 {
      Token::Minus => {
        let start = self.bump().1;
        let right = self.parse_precedence(Prec::Unary)?;
        let span = start.join(right.span);
        Ok(expr(span, ExprKind::Unary(Box::new(Unary { op: UnaryOp::Neg, right }))))
      }
      Token::Not | Token::Bang => {
        let start = self.bump().1;
        let right = self.parse_precedence(Prec::Unary)?;
        let span = start.join(right.span);
        Ok(expr(span, ExprKind::Unary(Box::new(Unary { op: UnaryOp::Not, right }))))
      }
      Token::Pound => {
        let start = self.bump().1;
        let right = self.parse_precedence(Prec::Unary)?;
        let span = start.join(right.span);
        Ok(expr(span, ExprKind::Unary(Box::new(Unary { op: UnaryOp::Count, right }))))
      }
      _ => self.call_or_primary(),
    }
  }

  fn call_or_primary(&mut self) -> Result<Expr<'src>> {
    let mut e = self.primary()?;
    while matches!(self.current.0, Token::Dot | Token::LeftBracket | Token::LeftParen) {
      e = self.infix(e)?;
    }
    Ok(e)
  }

  fn primary(&mut self) -> Result<Expr<'src>> {
    check_recursion_limit(self.current.1)?;
    match self.current.0 {
      Token::Nil => {
        let span = self.bump().1;
        Ok(expr(span, ExprKind::Literal(Box::new(Literal::Nil))))
      }
      Token::True => {
        let span = self.bump().1;
        Ok(expr(span, ExprKind::Literal(Box::new(Literal::Bool(true)))))
      }
      Token::False => {
        let span = self.bump().1;
        Ok(expr(span, ExprKind::Literal(Box::new(Literal::Bool(false)))))
      }
      Token::Number => {
        let span = self.bump().1;
        let text = self.text(span);
        let n = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
          i64::from_str_radix(hex, 16).map(|v| v as f64)
        } else {
          text.parse::<f64>()
        }
        .map_err(|_| Error::new("invalid number literal", span))?;
        Ok(expr(span, ExprKind::Literal(Box::new(Literal::Number(n)))))
      }
      Token::String => {
        let span = self.bump().1;
        let raw = self.text(span);
        let s = unescape(&raw[1..raw.len() - 1]);
        Ok(expr(span, ExprKind::Literal(Box::new(Literal::String(s)))))
      }
      Token::Identifier => {
        let ident = self.ident("an identifier")?;
        let span = ident.span;
        Ok(expr(span, ExprKind::GetVar(Box::new(ident))))
      }
      Token::LeftParen => {
        self.bump();
        let inner = self.expression()?;
        self.expect(Token::RightParen, "')' after expression")?;
        Ok(inner)
      }
      Token::LeftBracket => self.table_literal(),
      Token::LeftBrace => self.object_literal(),
      Token::Function => self.func_expr(),
      _ => Err(self.error("expected an expression")),
    }
  }

  fn table_literal(&mut self) -> Result<Expr<'src>> {
    let start = self.bump().1; // `[`
    let mut items = Vec::new();
    if !self.check(Token::RightBracket) {
      loop {
        items.push(self.expression()?);
        if !self.eat(Token::Comma) {
          break;
        }
      }
    }
    let end = self.expect(Token::RightBracket, "']' after table literal")?;
    Ok(expr(start.join(end), ExprKind::Literal(Box::new(Literal::Table(items)))))
  }

  fn object_literal(&mut self) -> Result<Expr<'src>> {
    let start = self.bump().1; // `{`
    let mut fields = Vec::new();
    if !self.check(Token::RightBrace) {
      loop {
        let key = if self.check(Token::Identifier) {
          let ident = self.ident("a field name")?;
          let span = ident.span;
          expr(span, ExprKind::Literal(Box::new(Literal::String(ident.into_inner()))))
        } else {
          self.expression()?
        };
        self.expect(Token::Colon, "':' after field name")?;
        let value = self.expression()?;
        fields.push((key, value));
        if !self.eat(Token::Comma) {
          break;
        }
      }
    }
    let end = self.expect(Token::RightBrace, "'}' after object literal")?;
    Ok(expr(start.join(end), ExprKind::Literal(Box::new(Literal::Object(fields)))))
  }

  fn func_expr(&mut self) -> Result<Expr<'src>> {
    let start = self.bump().1; // `function`
    let name = if self.check(Token::Identifier) {
      Some(self.ident("a function name")?)
    } else {
      None
    };
    let params = self.params()?;
    let body = self.block(&[Token::End])?;
    let end = self.expect(Token::End, "'end' after function body")?;
    Ok(expr(
      start.join(end),
      ExprKind::Func(Box::new(Func { name, params, body })),
    ))
  }
}

fn binary_op(tok: Token) -> Option<BinaryOp> {
  use Token::*;
  Some(match tok {
    Plus => BinaryOp::Add,
    Minus => BinaryOp::Sub,
    Star => BinaryOp::Mul,
    Slash => BinaryOp::Div,
    Percent => BinaryOp::Rem,
    DotDot => BinaryOp::Concat,
    EqualEqual => BinaryOp::Eq,
    BangEqual => BinaryOp::Neq,
    Less => BinaryOp::Less,
    LessEqual => BinaryOp::LessEq,
    Greater => BinaryOp::Greater,
    GreaterEqual => BinaryOp::GreaterEq,
    And => BinaryOp::And,
    Or => BinaryOp::Or,
    _ => return None,
  })
}

fn unescape(s: &str) -> Cow<'_, str> {
  if !s.contains('\\') {
    return Cow::borrowed(s);
  }
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some('r') => out.push('\r'),
      Some('0') => out.push('\0'),
      Some('"') => out.push('"'),
      Some('\'') => out.push('\''),
      Some('\\') => out.push('\\'),
      Some(other) => out.push(other),
      None => {}
    }
  }
  Cow::owned(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(src: &str) -> Module {
    Parser::new(src).parse_module().expect("parse error")
  }

  #[test]
  fn var_and_reassign() {
    let m = parse("var x = 1; x = x + 2; print(x);");
    assert_eq!(m.body.len(), 3);
  }

  #[test]
  fn closures() {
    let src = "function f() local a = 10; return function() a = a + 1; return a; end; end";
    let m = parse(src);
    assert_eq!(m.body.len(), 1);
  }

  #[test]
  fn table_count() {
    let m = parse("local t = [1, 2, 3]; print(#t);");
    assert_eq!(m.body.len(), 2);
  }

  #[test]
  fn proto_and_invoke() {
    let src = r#"
      proto P
        function greet() return "hi"; end
      end
      var p = {};
      __proto(p) = P;
      print(p.greet());
    "#;
    let m = parse(src);
    assert_eq!(m.body.len(), 4);
  }

  #[test]
  fn if_while_for() {
    let src = r#"
      if x > 0 then
        print(x);
      elseif x < 0 then
        print(0 - x);
      else
        print(0);
      end
      while x > 0 do
        x--;
      end
      for item in t do
        print(item);
      end
    "#;
    parse(src);
  }
}
