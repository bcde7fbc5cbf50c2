//! Abstract syntax tree for Cosmo source.
//!
//! The grammar is intentionally small: this layer only needs to carry enough
//! structure for the emitter (`cosmo::emit`) to produce bytecode matching the
//! instruction set in the core spec. Precedence and token grammar are not
//! part of the core contract; this is one reasonable surface syntax that
//! reaches every opcode.

use beef::lean::Cow;
use span::{Span, Spanned};

pub type Ident<'src> = Spanned<Cow<'src, str>>;

#[cfg_attr(test, derive(Debug))]
pub struct Module<'src> {
  pub body: Vec<Stmt<'src>>,
}

pub type Stmt<'src> = Spanned<StmtKind<'src>>;

#[cfg_attr(test, derive(Debug))]
pub enum StmtKind<'src> {
  Var(Box<Decl<'src>>),
  Local(Box<Decl<'src>>),
  Assign(Box<Assign<'src>>),
  SetProto(Box<SetProto<'src>>),
  Func(Box<FuncStmt<'src>>),
  Proto(Box<ProtoStmt<'src>>),
  Return(Option<Expr<'src>>),
  If(Box<If<'src>>),
  While(Box<While<'src>>),
  For(Box<For<'src>>),
  Expr(Box<Expr<'src>>),
  Break,
  Continue,
}

#[cfg_attr(test, derive(Debug))]
pub struct Decl<'src> {
  pub name: Ident<'src>,
  pub value: Expr<'src>,
}

/// The left-hand side of a plain assignment.
#[cfg_attr(test, derive(Debug))]
pub enum Target<'src> {
  /// `name = ...`
  Var(Ident<'src>),
  /// `target.field = ...` — object protocol (getter/setter aware).
  Field(Box<Expr<'src>>, Ident<'src>),
  /// `target[index] = ...` — raw table/dict access.
  Index(Box<Expr<'src>>, Box<Expr<'src>>),
}

#[cfg_attr(test, derive(Debug))]
pub struct Assign<'src> {
  pub target: Target<'src>,
  pub op: Option<BinaryOp>,
  pub value: Expr<'src>,
}

/// `__proto(target) = value;` — bypasses getter/setter, rewires the
/// prototype link directly.
#[cfg_attr(test, derive(Debug))]
pub struct SetProto<'src> {
  pub target: Expr<'src>,
  pub value: Expr<'src>,
}

#[cfg_attr(test, derive(Debug))]
pub struct Params<'src> {
  pub names: Vec<Ident<'src>>,
}

#[cfg_attr(test, derive(Debug))]
pub struct FuncStmt<'src> {
  pub name: Ident<'src>,
  pub params: Params<'src>,
  pub body: Vec<Stmt<'src>>,
}

#[cfg_attr(test, derive(Debug))]
pub struct Func<'src> {
  pub name: Option<Ident<'src>>,
  pub params: Params<'src>,
  pub body: Vec<Stmt<'src>>,
}

/// `proto Name [: Parent] funcname(...) ... end ... end`
#[cfg_attr(test, derive(Debug))]
pub struct ProtoStmt<'src> {
  pub name: Ident<'src>,
  pub parent: Option<Ident<'src>>,
  pub methods: Vec<Func<'src>>,
}

#[cfg_attr(test, derive(Debug))]
pub struct If<'src> {
  pub branches: Vec<Branch<'src>>,
  pub default: Option<Vec<Stmt<'src>>>,
}

#[cfg_attr(test, derive(Debug))]
pub struct Branch<'src> {
  pub cond: Expr<'src>,
  pub body: Vec<Stmt<'src>>,
}

#[cfg_attr(test, derive(Debug))]
pub struct While<'src> {
  pub cond: Expr<'src>,
  pub body: Vec<Stmt<'src>>,
}

/// `for item in iterable ... end` — drives the `__iter`/`__next` protocol.
#[cfg_attr(test, derive(Debug))]
pub struct For<'src> {
  pub item: Ident<'src>,
  pub iter: Expr<'src>,
  pub body: Vec<Stmt<'src>>,
}

pub type Expr<'src> = Spanned<ExprKind<'src>>;

#[cfg_attr(test, derive(Debug))]
pub enum ExprKind<'src> {
  Literal(Box<Literal<'src>>),
  Func(Box<Func<'src>>),
  Binary(Box<Binary<'src>>),
  Unary(Box<Unary<'src>>),
  GetVar(Box<Ident<'src>>),
  GetField(Box<Expr<'src>>, Ident<'src>),
  GetIndex(Box<Expr<'src>>, Box<Expr<'src>>),
  Call(Box<Call<'src>>),
  /// `target.method(args)` — compiles to `INVOKE` instead of
  /// `GETOBJECT` + `CALL`.
  Invoke(Box<Invoke<'src>>),
  IncDec(Box<IncDec<'src>>),
}

#[cfg_attr(test, derive(Debug))]
pub enum Literal<'src> {
  Nil,
  Bool(bool),
  Number(f64),
  String(Cow<'src, str>),
  /// `[a, b, c]` — a raw dict/table (the "count"-able list form).
  Table(Vec<Expr<'src>>),
  /// `{k: v, ...}` — an object with getter/setter/prototype protocol.
  Object(Vec<(Expr<'src>, Expr<'src>)>),
}

#[cfg_attr(test, derive(Debug))]
pub struct Binary<'src> {
  pub op: BinaryOp,
  pub left: Expr<'src>,
  pub right: Expr<'src>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(Debug))]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Concat,
  Eq,
  Neq,
  Less,
  LessEq,
  Greater,
  GreaterEq,
  And,
  Or,
}

#[cfg_attr(test, derive(Debug))]
pub struct Unary<'src> {
  pub op: UnaryOp,
  pub right: Expr<'src>,
}

#[derive(Clone, Copy)]
#[cfg_attr(test, derive(Debug))]
pub enum UnaryOp {
  Neg,
  Not,
  Count,
}

#[cfg_attr(test, derive(Debug))]
pub struct Call<'src> {
  pub callee: Expr<'src>,
  pub args: Vec<Expr<'src>>,
}

#[cfg_attr(test, derive(Debug))]
pub struct Invoke<'src> {
  pub receiver: Expr<'src>,
  pub method: Ident<'src>,
  pub args: Vec<Expr<'src>>,
}

/// `x++` / `x--`, the only surface forms that reach the `INC*` opcode
/// family (fixed +-1 delta).
#[cfg_attr(test, derive(Debug))]
pub struct IncDec<'src> {
  pub target: Target<'src>,
  pub delta: i8,
}

pub fn stmt(span: impl Into<Span>, kind: StmtKind<'_>) -> Stmt<'_> {
  Stmt::new(span, kind)
}

pub fn expr(span: impl Into<Span>, kind: ExprKind<'_>) -> Expr<'_> {
  Expr::new(span, kind)
}
