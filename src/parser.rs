//! Recursive-descent parser producing function definitions with resolved locals.
//!
//! The parser mirrors the classic chibicc structure: one helper per
//! precedence level, each threading the token cursor through. Identifiers are
//! resolved against the current function's [`Scope`] while parsing, so the
//! tree handed to codegen only carries stack offsets.

use crate::codegen::is_register;
use crate::error::{CompileError, CompileResult};
use crate::locals::{LocalKind, Scope};
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};
use crate::ty::Type;

/// Calls and definitions pass at most this many arguments, all in registers.
pub const MAX_ARGS: usize = 6;

/// Binary operators recognised by the language. `>` and `>=` are parsed as
/// `Lt`/`Le` with swapped operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
}

/// Expression tree produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstNode {
  Num {
    value: i64,
  },
  Var {
    offset: usize,
  },
  Addr {
    operand: Box<AstNode>,
  },
  Deref {
    operand: Box<AstNode>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<AstNode>,
    rhs: Box<AstNode>,
  },
  Assign {
    lhs: Box<AstNode>,
    rhs: Box<AstNode>,
  },
  Funcall {
    name: String,
    args: Vec<AstNode>,
  },
}

impl AstNode {
  pub fn number(value: i64) -> Self {
    Self::Num { value }
  }

  pub fn var(offset: usize) -> Self {
    Self::Var { offset }
  }

  pub fn addr(operand: AstNode) -> Self {
    Self::Addr {
      operand: Box::new(operand),
    }
  }

  pub fn deref(operand: AstNode) -> Self {
    Self::Deref {
      operand: Box::new(operand),
    }
  }

  pub fn binary(op: BinaryOp, lhs: AstNode, rhs: AstNode) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn assign(lhs: AstNode, rhs: AstNode) -> Self {
    Self::Assign {
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  /// Only variables and dereferences denote storage.
  pub fn is_lvalue(&self) -> bool {
    matches!(self, Self::Var { .. } | Self::Deref { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
  Expr(AstNode),
  Return(AstNode),
  If {
    cond: AstNode,
    then: Box<Stmt>,
    els: Option<Box<Stmt>>,
  },
  While {
    cond: AstNode,
    body: Box<Stmt>,
  },
  /// A missing condition is stored as the literal `1`.
  For {
    init: Option<AstNode>,
    cond: AstNode,
    step: Option<AstNode>,
    body: Box<Stmt>,
  },
  Block(Vec<Stmt>),
  /// `int x;` or `int x = init;` for the local at `offset`.
  Decl {
    offset: usize,
    init: Option<AstNode>,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
  pub name: String,
  /// Indices into `locals`, in declaration order.
  pub params: Vec<usize>,
  pub locals: Scope,
  pub body: Vec<Stmt>,
  pub stack_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
  pub functions: Vec<Function>,
}

/// Parse a whole translation unit from the token stream.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  let mut stream = TokenStream::new(tokens, source);

  if stream.is_eof() {
    return Err(CompileError::syntax(source, 0, "program is empty"));
  }

  let mut functions = Vec::new();
  while !stream.is_eof() {
    let function = parse_function(&mut stream, &functions)?;
    functions.push(function);
  }

  Ok(Program { functions })
}

fn parse_function(stream: &mut TokenStream, defined: &[Function]) -> CompileResult<Function> {
  parse_declspec(stream)?;
  let (name, name_loc) = stream.get_ident()?;
  check_symbol_name(stream, &name, name_loc)?;
  if defined.iter().any(|function| function.name == name) {
    return Err(CompileError::resolution(
      stream.source,
      name_loc,
      format!("redefinition of function '{name}'"),
    ));
  }

  let mut scope = Scope::new();
  let mut params = Vec::new();
  stream.skip("(")?;
  if !stream.equal(")") {
    loop {
      if params.len() == MAX_ARGS {
        return Err(CompileError::resolution(
          stream.source,
          stream.loc(),
          format!("too many parameters in definition of '{name}' (at most {MAX_ARGS})"),
        ));
      }
      params.push(parse_declarator(stream, &mut scope, LocalKind::Param)?);
      if stream.equal(")") {
        break;
      }
      stream.skip(",")?;
    }
  }

  stream.skip("{")?;
  let body = parse_block_body(stream, &mut scope)?;
  let stack_size = scope.frame_size();

  Ok(Function {
    name,
    params,
    locals: scope,
    body,
    stack_size,
  })
}

/// Function names reach the assembler verbatim, where a register name would
/// be read as an operand instead of a symbol.
fn check_symbol_name(stream: &TokenStream, name: &str, loc: usize) -> CompileResult<()> {
  if is_register(name) {
    return Err(CompileError::resolution(
      stream.source,
      loc,
      format!("'{name}' is a register name and cannot name a function"),
    ));
  }
  Ok(())
}

/// `"int" "*"*`
fn parse_declspec(stream: &mut TokenStream) -> CompileResult<Type> {
  stream.expect_kind(TokenKind::Int, "int")?;
  let mut ty = Type::int();
  while stream.equal("*") {
    ty = Type::pointer_to(ty);
  }
  Ok(ty)
}

/// `"int" "*"* ident`, declaring the name in `scope`.
fn parse_declarator(
  stream: &mut TokenStream,
  scope: &mut Scope,
  kind: LocalKind,
) -> CompileResult<usize> {
  let ty = parse_declspec(stream)?;
  let (name, loc) = stream.get_ident()?;
  scope.declare(&name, ty, kind).ok_or_else(|| {
    CompileError::resolution(stream.source, loc, format!("redeclaration of '{name}'"))
  })
}

/// Statements up to and including the closing brace.
fn parse_block_body(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<Vec<Stmt>> {
  let mut stmts = Vec::new();
  while !stream.equal("}") {
    if stream.is_eof() {
      return Err(CompileError::syntax(
        stream.source,
        stream.loc(),
        "expected \"}\", but got \"EOF\"",
      ));
    }
    stmts.push(parse_stmt(stream, scope)?);
  }
  Ok(stmts)
}

fn parse_stmt(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<Stmt> {
  if stream.consume_kind(TokenKind::Return) {
    let expr = parse_expr(stream, scope)?;
    stream.skip(";")?;
    return Ok(Stmt::Return(expr));
  }

  if stream.consume_kind(TokenKind::If) {
    stream.skip("(")?;
    let cond = parse_expr(stream, scope)?;
    stream.skip(")")?;
    let then = Box::new(parse_stmt(stream, scope)?);
    let els = if stream.consume_kind(TokenKind::Else) {
      Some(Box::new(parse_stmt(stream, scope)?))
    } else {
      None
    };
    return Ok(Stmt::If { cond, then, els });
  }

  if stream.consume_kind(TokenKind::While) {
    stream.skip("(")?;
    let cond = parse_expr(stream, scope)?;
    stream.skip(")")?;
    let body = Box::new(parse_stmt(stream, scope)?);
    return Ok(Stmt::While { cond, body });
  }

  if stream.consume_kind(TokenKind::For) {
    return parse_for(stream, scope);
  }

  if stream.equal("{") {
    return Ok(Stmt::Block(parse_block_body(stream, scope)?));
  }

  if stream.peek_kind() == Some(TokenKind::Int) {
    return parse_declaration(stream, scope);
  }

  let expr = parse_expr(stream, scope)?;
  stream.skip(";")?;
  Ok(Stmt::Expr(expr))
}

fn parse_for(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<Stmt> {
  stream.skip("(")?;

  let init = if stream.equal(";") {
    None
  } else {
    let expr = parse_expr(stream, scope)?;
    stream.skip(";")?;
    Some(expr)
  };

  let cond = if stream.equal(";") {
    AstNode::number(1)
  } else {
    let expr = parse_expr(stream, scope)?;
    stream.skip(";")?;
    expr
  };

  let step = if stream.equal(")") {
    None
  } else {
    let expr = parse_expr(stream, scope)?;
    stream.skip(")")?;
    Some(expr)
  };

  let body = Box::new(parse_stmt(stream, scope)?);
  Ok(Stmt::For {
    init,
    cond,
    step,
    body,
  })
}

fn parse_declaration(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<Stmt> {
  let index = parse_declarator(stream, scope, LocalKind::Local)?;
  let offset = scope.get(index).offset;

  let init = if stream.equal("=") {
    Some(parse_expr(stream, scope)?)
  } else {
    None
  };
  stream.skip(";")?;
  Ok(Stmt::Decl { offset, init })
}

fn parse_expr(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  parse_assign(stream, scope)
}

fn parse_assign(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  let start = stream.loc();
  let node = parse_equality(stream, scope)?;

  if stream.equal("=") {
    if !node.is_lvalue() {
      return Err(CompileError::resolution(
        stream.source,
        start,
        "cannot assign to an rvalue",
      ));
    }
    let rhs = parse_assign(stream, scope)?;
    return Ok(AstNode::assign(node, rhs));
  }

  Ok(node)
}

fn parse_equality(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  let mut node = parse_relational(stream, scope)?;

  while let Some(op) = stream.consume_any(&["==", "!="]) {
    let rhs = parse_relational(stream, scope)?;
    node = match op {
      "==" => AstNode::binary(BinaryOp::Eq, node, rhs),
      _ => AstNode::binary(BinaryOp::Ne, node, rhs),
    };
  }

  Ok(node)
}

fn parse_relational(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  let mut node = parse_add(stream, scope)?;

  while let Some(op) = stream.consume_any(&["<", "<=", ">", ">="]) {
    let rhs = parse_add(stream, scope)?;
    node = match op {
      "<" => AstNode::binary(BinaryOp::Lt, node, rhs),
      "<=" => AstNode::binary(BinaryOp::Le, node, rhs),
      ">" => AstNode::binary(BinaryOp::Lt, rhs, node),
      _ => AstNode::binary(BinaryOp::Le, rhs, node),
    };
  }

  Ok(node)
}

fn parse_add(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  let mut node = parse_mul(stream, scope)?;

  while let Some(op) = stream.consume_any(&["+", "-"]) {
    let rhs = parse_mul(stream, scope)?;
    node = match op {
      "+" => AstNode::binary(BinaryOp::Add, node, rhs),
      _ => AstNode::binary(BinaryOp::Sub, node, rhs),
    };
  }

  Ok(node)
}

fn parse_mul(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  let mut node = parse_unary(stream, scope)?;

  while let Some(op) = stream.consume_any(&["*", "/"]) {
    let rhs = parse_unary(stream, scope)?;
    node = match op {
      "*" => AstNode::binary(BinaryOp::Mul, node, rhs),
      _ => AstNode::binary(BinaryOp::Div, node, rhs),
    };
  }

  Ok(node)
}

fn parse_unary(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  if stream.equal("+") {
    return parse_unary(stream, scope);
  }

  if stream.equal("-") {
    let operand = parse_unary(stream, scope)?;
    return Ok(AstNode::binary(BinaryOp::Sub, AstNode::number(0), operand));
  }

  if stream.equal("*") {
    let operand = parse_unary(stream, scope)?;
    return Ok(AstNode::deref(operand));
  }

  if stream.equal("&") {
    let start = stream.loc();
    let operand = parse_unary(stream, scope)?;
    if !operand.is_lvalue() {
      return Err(CompileError::resolution(
        stream.source,
        start,
        "cannot take the address of an rvalue",
      ));
    }
    return Ok(AstNode::addr(operand));
  }

  parse_primary(stream, scope)
}

fn parse_primary(stream: &mut TokenStream, scope: &mut Scope) -> CompileResult<AstNode> {
  if stream.equal("(") {
    let node = parse_expr(stream, scope)?;
    stream.skip(")")?;
    return Ok(node);
  }

  match stream.peek_kind() {
    Some(TokenKind::Ident) => {
      let (name, loc) = stream.get_ident()?;
      if stream.equal("(") {
        return parse_funcall(stream, scope, name, loc);
      }
      let index = scope.find(&name).ok_or_else(|| {
        CompileError::resolution(stream.source, loc, format!("undefined variable '{name}'"))
      })?;
      Ok(AstNode::var(scope.get(index).offset))
    }
    Some(TokenKind::Num) => {
      let (value, _) = stream.get_number()?;
      Ok(AstNode::number(value))
    }
    _ => {
      let got = describe_token(stream.peek(), stream.source);
      Err(CompileError::syntax(
        stream.source,
        stream.loc(),
        format!("expected an expression, but got \"{got}\""),
      ))
    }
  }
}

/// Arguments of a call whose `name (` has already been consumed.
fn parse_funcall(
  stream: &mut TokenStream,
  scope: &mut Scope,
  name: String,
  loc: usize,
) -> CompileResult<AstNode> {
  check_symbol_name(stream, &name, loc)?;
  let mut args = Vec::new();
  if !stream.equal(")") {
    loop {
      if args.len() == MAX_ARGS {
        return Err(CompileError::resolution(
          stream.source,
          loc,
          format!("too many arguments in call to '{name}' (at most {MAX_ARGS})"),
        ));
      }
      args.push(parse_assign(stream, scope)?);
      if stream.equal(")") {
        break;
      }
      stream.skip(",")?;
    }
  }
  Ok(AstNode::Funcall { name, args })
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_kind(&self) -> Option<TokenKind> {
    self.peek().map(|token| token.kind)
  }

  /// Byte offset of the current token, or the end of input.
  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  /// Consume the current token if it matches the provided punctuator.
  fn equal(&mut self, op: &str) -> bool {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Punctuator
      && token.len == op.len()
      && token_text(token, self.source) == op
    {
      self.pos += 1;
      return true;
    }
    false
  }

  /// Consume the first of `ops` matching the current token.
  fn consume_any(&mut self, ops: &[&'static str]) -> Option<&'static str> {
    let op = ops.iter().copied().find(|op| {
      self
        .peek()
        .is_some_and(|token| token.kind == TokenKind::Punctuator && token_text(token, self.source) == *op)
    })?;
    self.pos += 1;
    Some(op)
  }

  fn consume_kind(&mut self, kind: TokenKind) -> bool {
    if self.peek_kind() == Some(kind) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn unexpected(&self, expected: &str) -> CompileError {
    let got = describe_token(self.peek(), self.source);
    CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected \"{expected}\", but got \"{got}\""),
    )
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      Err(self.unexpected(s))
    }
  }

  fn expect_kind(&mut self, kind: TokenKind, what: &str) -> CompileResult<()> {
    if self.consume_kind(kind) {
      Ok(())
    } else {
      Err(self.unexpected(what))
    }
  }

  /// Parse the current token as an integer literal returning its value and location.
  fn get_number(&mut self) -> CompileResult<(i64, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
    {
      let value = token.value.ok_or_else(|| {
        CompileError::syntax(
          self.source,
          token.loc,
          "internal error: numeric token missing value",
        )
      })?;
      let loc = token.loc;
      self.pos += 1;
      return Ok((value, loc));
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected a number, but got \"{got}\""),
    ))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
    {
      let ident = token_text(token, self.source).to_string();
      let loc = token.loc;
      self.pos += 1;
      return Ok((ident, loc));
    }

    let got = describe_token(self.peek(), self.source);
    Err(CompileError::syntax(
      self.source,
      self.loc(),
      format!("expected an identifier, but got \"{got}\""),
    ))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek_kind(), Some(TokenKind::Eof))
  }
}
