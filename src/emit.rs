//! Compiles a parsed module into bytecode (§4.4, §4.5), mirroring the
//! reference `CCompilerState`: one [`FuncState`] per function being
//! compiled, chained through `self.funcs` so nested closures can resolve
//! names in outer scopes as upvalues.

use span::Span;
use syntax::ast::{self, BinaryOp, Ident, Target, UnaryOp};

use crate::error::{CosmoError, Result};
use crate::gc::Heap;
use crate::obj::{FunctionObj, Gc};
use crate::op::{CodeWriter, Op};
use crate::value::Value;

/// `Ident` derefs to `Cow<str>`, but `Spanned`'s inner field is private, so
/// this is the one place that peels it down to a plain `&str`.
fn istr<'a>(id: &'a Ident<'a>) -> &'a str {
  id.as_ref()
}

struct LocalVar {
  name: String,
  captured: bool,
}

struct UpvalueDesc {
  index: u8,
  is_local: bool,
}

struct LoopCtx {
  break_jumps: Vec<usize>,
  continue_target: usize,
  /// How many locals to shed (in bytecode) on `break`, i.e. everything
  /// declared since the loop was entered.
  locals_base: usize,
  /// How many locals to shed on `continue`. Differs from `locals_base`
  /// for `for` loops, which keep the hidden iterator slot alive.
  continue_locals_base: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FuncKind {
  Script,
  Function,
  Method,
}

struct FuncState {
  code: CodeWriter,
  constants: Vec<Value>,
  locals: Vec<LocalVar>,
  scope_stack: Vec<usize>,
  upvalues: Vec<UpvalueDesc>,
  loops: Vec<LoopCtx>,
  kind: FuncKind,
  name: Option<String>,
}

impl FuncState {
  fn new(kind: FuncKind, name: Option<String>) -> Self {
    FuncState {
      code: CodeWriter::default(),
      constants: Vec::new(),
      // slot 0 is always reserved for the callee/receiver value itself
      // (clox's convention); it is never resolvable by name.
      locals: vec![LocalVar {
        name: String::new(),
        captured: false,
      }],
      scope_stack: Vec::new(),
      upvalues: Vec::new(),
      loops: Vec::new(),
      kind,
      name,
    }
  }
}

pub struct Compiler<'c> {
  source: &'c str,
  heap: &'c mut Heap,
  funcs: Vec<FuncState>,
}

impl<'c> Compiler<'c> {
  pub fn new(heap: &'c mut Heap, source: &'c str) -> Self {
    Compiler {
      source,
      heap,
      funcs: Vec::new(),
    }
  }

  pub fn compile_module(mut self, module: &ast::Module<'_>) -> Result<Gc> {
    self.funcs.push(FuncState::new(FuncKind::Script, None));
    self.begin_scope();
    for s in &module.body {
      self.stmt(s)?;
    }
    self.end_scope(0);
    self.emit_op(Op::Nil, 0);
    self.emit_byte(1, 0);
    self.emit_op(Op::Return, 0);
    Ok(self.finish_function(0, false))
  }

  // ---- FuncState plumbing ----------------------------------------------

  fn cur(&self) -> &FuncState {
    self.funcs.last().unwrap()
  }

  fn cur_mut(&mut self) -> &mut FuncState {
    self.funcs.last_mut().unwrap()
  }

  fn line_at(&self, span: Span) -> u32 {
    line_of(self.source, span.start)
  }

  fn emit_byte(&mut self, byte: u8, line: u32) {
    self.cur_mut().code.emit_byte(byte, line);
  }

  fn emit_op(&mut self, op: Op, line: u32) {
    self.cur_mut().code.emit_op(op, line);
  }

  fn emit_u16(&mut self, v: u16, line: u32) {
    self.cur_mut().code.emit_u16(v, line);
  }

  fn make_constant(&mut self, v: Value) -> Result<u16> {
    if let Some(pos) = self.cur().constants.iter().position(|c| c.identical(&v)) {
      return Ok(pos as u16);
    }
    let idx = self.cur().constants.len();
    if idx > u16::MAX as usize {
      return Err(self.error_at("too many constants in one function", 0));
    }
    self.cur_mut().constants.push(v);
    Ok(idx as u16)
  }

  fn string_const(&mut self, s: &str) -> Result<u16> {
    let handle = self.heap.intern_string(s.as_bytes());
    self.make_constant(Value::object(handle))
  }

  fn error_at(&self, message: impl Into<String>, line: u32) -> CosmoError {
    CosmoError::Parse {
      message: message.into(),
      line,
    }
  }

  // ---- scopes / locals ---------------------------------------------

  fn begin_scope(&mut self) {
    let base = self.cur().locals.len();
    self.cur_mut().scope_stack.push(base);
  }

  /// Pops the current scope's locals, emitting one `Close` (if the local
  /// was captured by a closure) or `Pop` per local.
  fn end_scope(&mut self, line: u32) {
    let base = self.cur_mut().scope_stack.pop().unwrap();
    self.pop_locals_to(base, line);
  }

  /// Like `end_scope`, but for scopes whose runtime cleanup already
  /// happened via another opcode (the `for`-loop's hidden iterator slot,
  /// shed by `NEXT`'s exhaustion path or by `break`'s own unwind) — only
  /// the compiler's bookkeeping is rolled back, no bytecode is emitted.
  fn end_scope_silent(&mut self) {
    let base = self.cur_mut().scope_stack.pop().unwrap();
    self.cur_mut().locals.truncate(base);
  }

  fn pop_locals_to(&mut self, base: usize, line: u32) {
    while self.cur().locals.len() > base {
      let captured = self.cur().locals.last().unwrap().captured;
      if captured {
        self.emit_op(Op::Close, line);
      } else {
        self.emit_op(Op::Pop, line);
        self.emit_byte(1, line);
      }
      self.cur_mut().locals.pop();
    }
  }

  fn declare_local(&mut self, name: &str, line: u32) -> Result<()> {
    let base = *self.cur().scope_stack.last().unwrap_or(&0);
    if self.cur().locals[base..].iter().any(|l| l.name == name) {
      return Err(self.error_at(format!("'{name}' already declared in this scope"), line));
    }
    if self.cur().locals.len() >= 256 {
      return Err(self.error_at("too many locals in one function", line));
    }
    self.cur_mut().locals.push(LocalVar {
      name: name.to_string(),
      captured: false,
    });
    Ok(())
  }

  fn find_local(&self, func_idx: usize, name: &str) -> Option<usize> {
    self.funcs[func_idx].locals.iter().rposition(|l| l.name == name)
  }

  fn resolve_upvalue(&mut self, func_idx: usize, name: &str) -> Option<u8> {
    if func_idx == 0 {
      return None;
    }
    let enclosing = func_idx - 1;
    if let Some(slot) = self.find_local(enclosing, name) {
      self.funcs[enclosing].locals[slot].captured = true;
      return Some(self.add_upvalue(func_idx, slot as u8, true));
    }
    if let Some(up) = self.resolve_upvalue(enclosing, name) {
      return Some(self.add_upvalue(func_idx, up, false));
    }
    None
  }

  fn add_upvalue(&mut self, func_idx: usize, index: u8, is_local: bool) -> u8 {
    let ups = &mut self.funcs[func_idx].upvalues;
    if let Some(pos) = ups.iter().position(|u| u.index == index && u.is_local == is_local) {
      return pos as u8;
    }
    ups.push(UpvalueDesc { index, is_local });
    (ups.len() - 1) as u8
  }

  // ---- jumps -------------------------------------------------------

  fn emit_jump(&mut self, op: Op, line: u32) -> usize {
    self.emit_op(op, line);
    let at = self.cur().code.len();
    self.emit_u16(0, line);
    at
  }

  fn patch_jump(&mut self, at: usize) {
    let target = self.cur().code.len();
    let offset = (target - (at + 2)) as u16;
    self.cur_mut().code.patch_u16(at, offset);
  }

  fn emit_loop_back(&mut self, target: usize, line: u32) {
    self.emit_op(Op::JmpBack, line);
    let at = self.cur().code.len();
    let offset = ((at + 2) - target) as u16;
    self.emit_u16(offset, line);
  }

  // ---- functions -----------------------------------------------------

  fn finish_function(&mut self, arity: u8, variadic: bool) -> Gc {
    let state = self.funcs.pop().unwrap();
    let name = state.name.map(|n| self.heap.intern_string(n.as_bytes()));
    let upvalue_refs = state.upvalues.iter().map(|u| (u.is_local, u.index)).collect();
    self.heap.alloc_function(FunctionObj {
      name,
      module: None,
      arity,
      upvalue_count: state.upvalues.len() as u8,
      variadic,
      code: state.code.code,
      lines: state.code.lines,
      constants: state.constants,
      upvalue_refs,
    })
  }

  fn compile_function(
    &mut self,
    kind: FuncKind,
    name: Option<&str>,
    params: &ast::Params<'_>,
    body: &[ast::Stmt<'_>],
    line: u32,
  ) -> Result<Gc> {
    self.funcs.push(FuncState::new(kind, name.map(|s| s.to_string())));
    self.begin_scope();
    if kind == FuncKind::Method {
      self.declare_local("this", line)?;
    }
    for p in &params.names {
      self.declare_local(istr(p), line)?;
    }
    for s in body {
      self.stmt(s)?;
    }
    self.end_scope(line);
    self.emit_op(Op::Nil, line);
    self.emit_byte(1, line);
    self.emit_op(Op::Return, line);
    let arity = params.names.len() as u8 + if kind == FuncKind::Method { 1 } else { 0 };
    Ok(self.finish_function(arity, false))
  }

  fn emit_closure(&mut self, proto: Gc, line: u32) -> Result<()> {
    let idx = self.make_constant(Value::object(proto))?;
    self.emit_op(Op::Closure, line);
    self.emit_u16(idx, line);
    Ok(())
  }

  // ---- statements ----------------------------------------------------

  fn block(&mut self, body: &[ast::Stmt<'_>], line: u32) -> Result<()> {
    self.begin_scope();
    for s in body {
      self.stmt(s)?;
    }
    self.end_scope(line);
    Ok(())
  }

  fn stmt(&mut self, s: &ast::Stmt<'_>) -> Result<()> {
    let line = self.line_at(s.span);
    match &**s {
      ast::StmtKind::Var(decl) => {
        self.expr(&decl.value)?;
        let idx = self.string_const(istr(&decl.name))?;
        self.emit_op(Op::SetGlobal, line);
        self.emit_u16(idx, line);
        self.emit_op(Op::Pop, line);
        self.emit_byte(1, line);
      }
      ast::StmtKind::Local(decl) => {
        self.expr(&decl.value)?;
        self.declare_local(istr(&decl.name), line)?;
      }
      ast::StmtKind::Assign(a) => {
        self.assign(a, line)?;
        self.emit_op(Op::Pop, line);
        self.emit_byte(1, line);
      }
      ast::StmtKind::SetProto(sp) => {
        self.expr(&sp.target)?;
        self.expr(&sp.value)?;
        self.emit_op(Op::SetProto, line);
        self.emit_op(Op::Pop, line);
        self.emit_byte(1, line);
      }
      ast::StmtKind::Func(f) => {
        let proto = self.compile_function(FuncKind::Function, Some(istr(&f.name)), &f.params, &f.body, line)?;
        self.emit_closure(proto, line)?;
        self.declare_or_set_global(istr(&f.name), line)?;
      }
      ast::StmtKind::Proto(p) => self.proto_stmt(p, line)?,
      ast::StmtKind::Return(e) => {
        match e {
          Some(e) => self.expr(e)?,
          None => self.emit_op(Op::Nil, line),
        }
        self.emit_byte(1, line);
        self.emit_op(Op::Return, line);
      }
      ast::StmtKind::If(i) => self.if_stmt(i, line)?,
      ast::StmtKind::While(w) => self.while_stmt(w, line)?,
      ast::StmtKind::For(f) => self.for_stmt(f, line)?,
      ast::StmtKind::Expr(e) => {
        self.expr(e)?;
        self.emit_op(Op::Pop, line);
        self.emit_byte(1, line);
      }
      ast::StmtKind::Break => {
        let ctx_idx = self
          .cur()
          .loops
          .len()
          .checked_sub(1)
          .ok_or_else(|| self.error_at("'break' outside a loop", line))?;
        let base = self.cur().loops[ctx_idx].locals_base;
        self.pop_locals_to(base, line);
        let jmp = self.emit_jump(Op::Jmp, line);
        self.cur_mut().loops[ctx_idx].break_jumps.push(jmp);
      }
      ast::StmtKind::Continue => {
        let ctx_idx = self
          .cur()
          .loops
          .len()
          .checked_sub(1)
          .ok_or_else(|| self.error_at("'continue' outside a loop", line))?;
        let base = self.cur().loops[ctx_idx].continue_locals_base;
        let target = self.cur().loops[ctx_idx].continue_target;
        self.pop_locals_to(base, line);
        self.emit_loop_back(target, line);
      }
    }
    Ok(())
  }

  fn declare_or_set_global(&mut self, name: &str, line: u32) -> Result<()> {
    if self.cur().scope_stack.is_empty() {
      let idx = self.string_const(name)?;
      self.emit_op(Op::SetGlobal, line);
      self.emit_u16(idx, line);
      self.emit_op(Op::Pop, line);
      self.emit_byte(1, line);
    } else {
      self.declare_local(name, line)?;
    }
    Ok(())
  }

  fn proto_stmt(&mut self, p: &ast::ProtoStmt<'_>, line: u32) -> Result<()> {
    for method in &p.methods {
      let name = istr(method.name.as_ref().expect("proto methods are always named")).to_string();
      let key_idx = self.string_const(&name)?;
      self.emit_op(Op::LoadConst, line);
      self.emit_u16(key_idx, line);
      let proto_fn = self.compile_function(FuncKind::Method, Some(&name), &method.params, &method.body, line)?;
      self.emit_closure(proto_fn, line)?;
    }
    self.emit_op(Op::NewObject, line);
    self.emit_u16(p.methods.len() as u16, line);
    if let Some(parent) = &p.parent {
      self.emit_op(Op::Dup, line);
      self.emit_byte(0, line);
      self.get_var(istr(parent), line)?;
      self.emit_op(Op::SetProto, line);
      self.emit_op(Op::Pop, line);
      self.emit_byte(1, line);
    }
    self.declare_or_set_global(istr(&p.name), line)
  }

  fn if_stmt(&mut self, i: &ast::If<'_>, line: u32) -> Result<()> {
    let mut exit_jumps = Vec::new();
    let mut prev_skip: Option<usize> = None;
    for branch in &i.branches {
      if let Some(at) = prev_skip.take() {
        self.patch_jump(at);
      }
      self.expr(&branch.cond)?;
      let skip = self.emit_jump(Op::PeJmp, line);
      self.block(&branch.body, line)?;
      exit_jumps.push(self.emit_jump(Op::Jmp, line));
      prev_skip = Some(skip);
    }
    if let Some(at) = prev_skip.take() {
      self.patch_jump(at);
    }
    if let Some(default) = &i.default {
      self.block(default, line)?;
    }
    for j in exit_jumps {
      self.patch_jump(j);
    }
    Ok(())
  }

  fn while_stmt(&mut self, w: &ast::While<'_>, line: u32) -> Result<()> {
    self.begin_scope();
    let locals_base = self.cur().locals.len();
    let loop_start = self.cur().code.len();
    self.expr(&w.cond)?;
    let exit = self.emit_jump(Op::PeJmp, line);
    self.cur_mut().loops.push(LoopCtx {
      break_jumps: Vec::new(),
      continue_target: loop_start,
      locals_base,
      continue_locals_base: locals_base,
    });
    self.block(&w.body, line)?;
    self.emit_loop_back(loop_start, line);
    self.patch_jump(exit);
    let ctx = self.cur_mut().loops.pop().unwrap();
    for bj in ctx.break_jumps {
      self.patch_jump(bj);
    }
    self.end_scope(line);
    Ok(())
  }

  fn for_stmt(&mut self, f: &ast::For<'_>, line: u32) -> Result<()> {
    self.expr(&f.iter)?;
    self.emit_op(Op::Iter, line);
    self.begin_scope();
    let locals_base = self.cur().locals.len();
    self.declare_local("", line)?;
    let loop_start = self.cur().code.len();
    let exit = self.emit_jump(Op::Next, line);
    self.begin_scope();
    let continue_locals_base = self.cur().locals.len();
    self.declare_local(istr(&f.item), line)?;
    self.cur_mut().loops.push(LoopCtx {
      break_jumps: Vec::new(),
      continue_target: loop_start,
      locals_base,
      continue_locals_base,
    });
    for s in &f.body {
      self.stmt(s)?;
    }
    self.end_scope(line);
    self.emit_loop_back(loop_start, line);
    self.patch_jump(exit);
    let ctx = self.cur_mut().loops.pop().unwrap();
    for bj in ctx.break_jumps {
      self.patch_jump(bj);
    }
    self.end_scope_silent();
    Ok(())
  }

  // ---- assignment ----------------------------------------------------

  fn assign(&mut self, a: &ast::Assign<'_>, line: u32) -> Result<()> {
    match &a.target {
      Target::Var(name) => self.assign_var(istr(name), a.op, &a.value, line),
      Target::Field(recv, field) => self.assign_field(recv, istr(field), a.op, &a.value, line),
      Target::Index(recv, key) => self.assign_index(recv, key, a.op, &a.value, line),
    }
  }

  fn assign_var(&mut self, name: &str, op: Option<BinaryOp>, value: &ast::Expr<'_>, line: u32) -> Result<()> {
    let func_idx = self.funcs.len() - 1;
    if let Some(slot) = self.find_local(func_idx, name) {
      if let Some(op) = op {
        self.emit_op(Op::GetLocal, line);
        self.emit_byte(slot as u8, line);
        self.expr(value)?;
        self.binary_op(op, line);
      } else {
        self.expr(value)?;
      }
      self.emit_op(Op::SetLocal, line);
      self.emit_byte(slot as u8, line);
    } else if let Some(up) = self.resolve_upvalue(func_idx, name) {
      if let Some(op) = op {
        self.emit_op(Op::GetUpval, line);
        self.emit_byte(up, line);
        self.expr(value)?;
        self.binary_op(op, line);
      } else {
        self.expr(value)?;
      }
      self.emit_op(Op::SetUpval, line);
      self.emit_byte(up, line);
    } else {
      let idx = self.string_const(name)?;
      if let Some(op) = op {
        self.emit_op(Op::GetGlobal, line);
        self.emit_u16(idx, line);
        self.expr(value)?;
        self.binary_op(op, line);
      } else {
        self.expr(value)?;
      }
      self.emit_op(Op::SetGlobal, line);
      self.emit_u16(idx, line);
    }
    Ok(())
  }

  fn assign_field(&mut self, recv: &ast::Expr<'_>, field: &str, op: Option<BinaryOp>, value: &ast::Expr<'_>, line: u32) -> Result<()> {
    let name_idx = self.string_const(field)?;
    self.expr(recv)?;
    if let Some(op) = op {
      self.emit_op(Op::Dup, line);
      self.emit_byte(0, line);
      self.emit_op(Op::GetObject, line);
      self.emit_u16(name_idx, line);
      self.expr(value)?;
      self.binary_op(op, line);
    } else {
      self.expr(value)?;
    }
    self.emit_op(Op::SetObject, line);
    self.emit_u16(name_idx, line);
    Ok(())
  }

  fn assign_index(&mut self, recv: &ast::Expr<'_>, key: &ast::Expr<'_>, op: Option<BinaryOp>, value: &ast::Expr<'_>, line: u32) -> Result<()> {
    self.expr(recv)?;
    self.expr(key)?;
    if let Some(op) = op {
      self.emit_op(Op::Dup, line);
      self.emit_byte(1, line);
      self.emit_op(Op::Dup, line);
      self.emit_byte(1, line);
      self.emit_op(Op::Index, line);
      self.expr(value)?;
      self.binary_op(op, line);
    } else {
      self.expr(value)?;
    }
    self.emit_op(Op::NewIndex, line);
    Ok(())
  }

  // ---- expressions -----------------------------------------------------

  fn get_var(&mut self, name: &str, line: u32) -> Result<()> {
    let func_idx = self.funcs.len() - 1;
    if let Some(slot) = self.find_local(func_idx, name) {
      self.emit_op(Op::GetLocal, line);
      self.emit_byte(slot as u8, line);
    } else if let Some(up) = self.resolve_upvalue(func_idx, name) {
      self.emit_op(Op::GetUpval, line);
      self.emit_byte(up, line);
    } else {
      let idx = self.string_const(name)?;
      self.emit_op(Op::GetGlobal, line);
      self.emit_u16(idx, line);
    }
    Ok(())
  }

  fn binary_op(&mut self, op: BinaryOp, line: u32) {
    match op {
      BinaryOp::Add => self.emit_op(Op::Add, line),
      BinaryOp::Sub => self.emit_op(Op::Sub, line),
      BinaryOp::Mul => self.emit_op(Op::Mult, line),
      BinaryOp::Div => self.emit_op(Op::Div, line),
      BinaryOp::Rem => self.emit_op(Op::Mod, line),
      BinaryOp::Concat => {
        self.emit_op(Op::Concat, line);
        self.emit_byte(2, line);
      }
      BinaryOp::Eq => self.emit_op(Op::Equal, line),
      BinaryOp::Neq => {
        self.emit_op(Op::Equal, line);
        self.emit_op(Op::Not, line);
      }
      BinaryOp::Less => self.emit_op(Op::Less, line),
      BinaryOp::LessEq => self.emit_op(Op::LessEqual, line),
      BinaryOp::Greater => self.emit_op(Op::Greater, line),
      BinaryOp::GreaterEq => self.emit_op(Op::GreaterEqual, line),
      BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit ops handled in expr()"),
    }
  }

  fn expr(&mut self, e: &ast::Expr<'_>) -> Result<()> {
    let line = self.line_at(e.span);
    match &**e {
      ast::ExprKind::Literal(lit) => self.literal(lit, line)?,
      ast::ExprKind::Func(f) => {
        let name = f.name.as_ref().map(istr);
        let proto = self.compile_function(FuncKind::Function, name, &f.params, &f.body, line)?;
        self.emit_closure(proto, line)?;
      }
      ast::ExprKind::Binary(b) => match b.op {
        BinaryOp::And => {
          self.expr(&b.left)?;
          let exit = self.emit_jump(Op::EJmp, line);
          self.emit_op(Op::Pop, line);
          self.emit_byte(1, line);
          self.expr(&b.right)?;
          self.patch_jump(exit);
        }
        BinaryOp::Or => {
          self.expr(&b.left)?;
          let to_rhs = self.emit_jump(Op::EJmp, line);
          let end = self.emit_jump(Op::Jmp, line);
          self.patch_jump(to_rhs);
          self.emit_op(Op::Pop, line);
          self.emit_byte(1, line);
          self.expr(&b.right)?;
          self.patch_jump(end);
        }
        op => {
          self.expr(&b.left)?;
          self.expr(&b.right)?;
          self.binary_op(op, line);
        }
      },
      ast::ExprKind::Unary(u) => {
        self.expr(&u.right)?;
        match u.op {
          UnaryOp::Neg => self.emit_op(Op::Negate, line),
          UnaryOp::Not => self.emit_op(Op::Not, line),
          UnaryOp::Count => self.emit_op(Op::Count, line),
        }
      }
      ast::ExprKind::GetVar(ident) => self.get_var(istr(ident), line)?,
      ast::ExprKind::GetField(recv, field) => {
        self.expr(recv)?;
        let idx = self.string_const(istr(field))?;
        self.emit_op(Op::GetObject, line);
        self.emit_u16(idx, line);
      }
      ast::ExprKind::GetIndex(recv, key) => {
        self.expr(recv)?;
        self.expr(key)?;
        self.emit_op(Op::Index, line);
      }
      ast::ExprKind::Call(c) => {
        self.expr(&c.callee)?;
        for a in &c.args {
          self.expr(a)?;
        }
        self.emit_op(Op::Call, line);
        self.emit_byte(c.args.len() as u8, line);
        self.emit_byte(1, line);
      }
      ast::ExprKind::Invoke(inv) => {
        self.expr(&inv.receiver)?;
        let name_idx = self.string_const(istr(&inv.method))?;
        for a in &inv.args {
          self.expr(a)?;
        }
        self.emit_op(Op::Invoke, line);
        self.emit_u16(name_idx, line);
        self.emit_byte(inv.args.len() as u8, line);
        self.emit_byte(1, line);
      }
      ast::ExprKind::IncDec(id) => self.inc_dec(&id.target, id.delta, line)?,
    }
    Ok(())
  }

  fn inc_dec(&mut self, target: &Target<'_>, delta: i8, line: u32) -> Result<()> {
    match target {
      Target::Var(name) => {
        let func_idx = self.funcs.len() - 1;
        let name = istr(name);
        if let Some(slot) = self.find_local(func_idx, name) {
          self.emit_op(Op::IncLocal, line);
          self.emit_byte(slot as u8, line);
          self.emit_byte(delta as u8, line);
        } else if let Some(up) = self.resolve_upvalue(func_idx, name) {
          self.emit_op(Op::IncUpval, line);
          self.emit_byte(up, line);
          self.emit_byte(delta as u8, line);
        } else {
          let idx = self.string_const(name)?;
          self.emit_op(Op::IncGlobal, line);
          self.emit_u16(idx, line);
          self.emit_byte(delta as u8, line);
        }
      }
      Target::Field(recv, field) => {
        self.expr(recv)?;
        let idx = self.string_const(istr(field))?;
        self.emit_op(Op::IncObject, line);
        self.emit_u16(idx, line);
        self.emit_byte(delta as u8, line);
      }
      Target::Index(recv, key) => {
        self.expr(recv)?;
        self.expr(key)?;
        self.emit_op(Op::IncIndex, line);
        self.emit_byte(delta as u8, line);
      }
    }
    Ok(())
  }

  fn literal(&mut self, lit: &ast::Literal<'_>, line: u32) -> Result<()> {
    match lit {
      ast::Literal::Nil => self.emit_op(Op::Nil, line),
      ast::Literal::Bool(true) => self.emit_op(Op::True, line),
      ast::Literal::Bool(false) => self.emit_op(Op::False, line),
      ast::Literal::Number(n) => {
        let idx = self.make_constant(Value::number(*n))?;
        self.emit_op(Op::LoadConst, line);
        self.emit_u16(idx, line);
      }
      ast::Literal::String(s) => {
        let idx = self.string_const(s.as_ref())?;
        self.emit_op(Op::LoadConst, line);
        self.emit_u16(idx, line);
      }
      ast::Literal::Table(items) => {
        for item in items {
          self.expr(item)?;
        }
        self.emit_op(Op::NewDict, line);
        self.emit_u16(items.len() as u16, line);
      }
      ast::Literal::Object(pairs) => {
        for (k, v) in pairs {
          self.expr(k)?;
          self.expr(v)?;
        }
        self.emit_op(Op::NewObject, line);
        self.emit_u16(pairs.len() as u16, line);
      }
    }
    Ok(())
  }
}

/// Compiles a parsed module into the top-level script function.
pub fn compile(heap: &mut Heap, source: &str, module: &ast::Module<'_>) -> Result<Gc> {
  let compiler = Compiler::new(heap, source);
  compiler.compile_module(module)
}

/// 1-based line number of a byte offset into `source`, for attributing a
/// parse error (whose span comes from the syntax crate, not the emitter)
/// to a line.
pub fn line_of(source: &str, offset: usize) -> u32 {
  let end = offset.min(source.len());
  1 + source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() as u32
}

#[cfg(test)]
mod tests {
  use super::*;

  fn compile_src(src: &str, heap: &mut Heap) -> Gc {
    let module = syntax::parse(src).expect("parse");
    compile(heap, src, &module).expect("compile")
  }

  #[test]
  fn identical_constants_are_deduplicated_within_one_function() {
    let mut heap = Heap::new();
    let proto = compile_src("print(1); print(1);", &mut heap);
    let f = proto.as_function().unwrap();
    let ones = f.constants.iter().filter(|c| c.as_number() == Some(1.0)).count();
    assert_eq!(ones, 1);
  }

  #[test]
  fn distinct_constants_each_get_their_own_slot() {
    let mut heap = Heap::new();
    let proto = compile_src("print(1); print(2);", &mut heap);
    let f = proto.as_function().unwrap();
    assert!(f.constants.iter().any(|c| c.as_number() == Some(1.0)));
    assert!(f.constants.iter().any(|c| c.as_number() == Some(2.0)));
  }

  #[test]
  fn top_level_script_always_ends_in_a_return() {
    let mut heap = Heap::new();
    let proto = compile_src("var x = 1;", &mut heap);
    let f = proto.as_function().unwrap();
    assert_eq!(*f.code.last().unwrap(), Op::Return as u8);
  }

  #[test]
  fn line_of_counts_newlines_up_to_the_given_offset() {
    let src = "a\nb\nc";
    assert_eq!(line_of(src, 0), 1);
    assert_eq!(line_of(src, 2), 2);
    assert_eq!(line_of(src, 4), 3);
  }

  #[test]
  fn line_of_clamps_an_offset_past_the_end_of_source() {
    let src = "a\nb";
    assert_eq!(line_of(src, 1000), line_of(src, src.len()));
  }
}
