//! Code generation: lower the parsed program into Intel-syntax x86-64 assembly.
//!
//! The emitter uses a simple stack machine: every expression leaves a single
//! value on the machine stack and statements pop intermediate results as we
//! chain them. Locals live in the stack frame and are addressed relative to
//! `rbp`.

use std::ops::Range;

use crate::parser::{AstNode, BinaryOp, Function, MAX_ARGS, Program, Stmt};

/// Integer argument registers of the System V AMD64 calling convention.
const ARG_REGS: [&str; MAX_ARGS] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Marks the stack non-executable; without it GNU ld warns and may make it executable.
const NOTE_GNU_STACK: &str = ".section .note.GNU-stack,\"\",@progbits\n";

const NAMED_REGISTERS: &[&str] = &[
  "rax", "eax", "ax", "al", "ah", "rbx", "ebx", "bx", "bl", "bh", "rcx", "ecx", "cx", "cl", "ch",
  "rdx", "edx", "dx", "dl", "dh", "rsi", "esi", "si", "sil", "rdi", "edi", "di", "dil", "rbp",
  "ebp", "bp", "bpl", "rsp", "esp", "sp", "spl", "rip", "eip", "ip", "cs", "ds", "es", "fs", "gs",
  "ss", "st",
];

/// `prefix` + number in range + optional width suffix, e.g. `r10d` or `xmm3`.
const NUMBERED_REGISTERS: &[(&str, Range<u32>, &[&str])] = &[
  ("r", 8..16, &["", "d", "w", "b"]),
  ("xmm", 0..32, &[""]),
  ("ymm", 0..32, &[""]),
  ("zmm", 0..32, &[""]),
  ("mm", 0..8, &[""]),
  ("k", 0..8, &[""]),
  ("cr", 0..16, &[""]),
  ("dr", 0..16, &[""]),
];

/// Whether `name` is an x86-64 register in Intel syntax. Symbols are emitted
/// bare, so `call rdi` would be an indirect call through the register.
pub fn is_register(name: &str) -> bool {
  let name = name.to_ascii_lowercase();
  NAMED_REGISTERS.contains(&name.as_str())
    || NUMBERED_REGISTERS
      .iter()
      .any(|(prefix, range, suffixes)| is_numbered(&name, prefix, range, suffixes))
}

fn is_numbered(name: &str, prefix: &str, range: &Range<u32>, suffixes: &[&str]) -> bool {
  let Some(rest) = name.strip_prefix(prefix) else {
    return false;
  };
  let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
  let (digits, suffix) = rest.split_at(end);
  !digits.is_empty()
    && (digits == "0" || !digits.starts_with('0'))
    && digits.parse::<u32>().is_ok_and(|n| range.contains(&n))
    && suffixes.contains(&suffix)
}

/// Emit assembly for a whole program.
pub fn generate(program: &Program) -> String {
  Codegen::new().generate(program)
}

/// Output buffer plus the running state of one compilation: a label counter
/// shared by every function and the current evaluation-stack depth.
#[derive(Debug, Default)]
pub struct Codegen {
  asm: String,
  labels: usize,
  depth: usize,
}

impl Codegen {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn generate(mut self, program: &Program) -> String {
    self.asm.push_str(".intel_syntax noprefix\n");
    for func in &program.functions {
      self.asm.push_str(&format!(".globl {}\n", func.name));
    }
    for func in &program.functions {
      self.emit_function(func);
    }
    self.asm.push_str(NOTE_GNU_STACK);
    self.asm
  }

  fn emit(&mut self, inst: &str) {
    self.asm.push_str("    ");
    self.asm.push_str(inst);
    self.asm.push('\n');
  }

  fn label(&mut self, name: &str) {
    self.asm.push_str(name);
    self.asm.push_str(":\n");
  }

  fn next_label(&mut self) -> usize {
    self.labels += 1;
    self.labels
  }

  fn push(&mut self) {
    self.emit("push rax");
    self.depth += 1;
  }

  fn pop(&mut self, reg: &str) {
    self.emit(&format!("pop {reg}"));
    self.depth -= 1;
  }

  fn emit_function(&mut self, func: &Function) {
    self.asm.push_str(&format!("{}:\n", func.name));
    self.emit("push rbp");
    self.emit("mov rbp, rsp");
    if func.stack_size > 0 {
      self.emit(&format!("sub rsp, {}", func.stack_size));
    }

    for (&index, reg) in func.params.iter().zip(ARG_REGS) {
      let offset = func.locals.get(index).offset;
      self.emit(&format!("mov [rbp-{offset}], {reg}"));
    }

    for stmt in &func.body {
      self.emit_stmt(stmt, func);
    }

    // Falling off the end returns 0.
    self.emit("mov rax, 0");
    self.label(&format!(".L.return.{}", func.name));
    self.emit("mov rsp, rbp");
    self.emit("pop rbp");
    self.emit("ret");
  }

  /// Every statement leaves the evaluation stack as it found it.
  fn emit_stmt(&mut self, stmt: &Stmt, func: &Function) {
    match stmt {
      Stmt::Expr(expr) => {
        self.emit_expr(expr);
        self.pop("rax");
      }
      Stmt::Return(expr) => {
        self.emit_expr(expr);
        self.pop("rax");
        self.emit(&format!("jmp .L.return.{}", func.name));
      }
      Stmt::If { cond, then, els } => {
        let n = self.next_label();
        self.emit_cond(cond, &format!(".L.else.{n}"));
        self.emit_stmt(then, func);
        self.emit(&format!("jmp .L.end.{n}"));
        self.label(&format!(".L.else.{n}"));
        if let Some(els) = els {
          self.emit_stmt(els, func);
        }
        self.label(&format!(".L.end.{n}"));
      }
      Stmt::While { cond, body } => {
        let n = self.next_label();
        self.label(&format!(".L.begin.{n}"));
        self.emit_cond(cond, &format!(".L.end.{n}"));
        self.emit_stmt(body, func);
        self.emit(&format!("jmp .L.begin.{n}"));
        self.label(&format!(".L.end.{n}"));
      }
      Stmt::For {
        init,
        cond,
        step,
        body,
      } => {
        let n = self.next_label();
        if let Some(init) = init {
          self.emit_expr(init);
          self.pop("rax");
        }
        self.label(&format!(".L.begin.{n}"));
        self.emit_cond(cond, &format!(".L.end.{n}"));
        self.emit_stmt(body, func);
        if let Some(step) = step {
          self.emit_expr(step);
          self.pop("rax");
        }
        self.emit(&format!("jmp .L.begin.{n}"));
        self.label(&format!(".L.end.{n}"));
      }
      Stmt::Block(stmts) => {
        for stmt in stmts {
          self.emit_stmt(stmt, func);
        }
      }
      Stmt::Decl { offset, init } => {
        if let Some(init) = init {
          self.emit_addr(&AstNode::var(*offset));
          self.emit_expr(init);
          self.store();
          self.pop("rax");
        }
      }
    }
    debug_assert_eq!(self.depth, 0, "unbalanced stack after {stmt:?}");
  }

  /// Evaluate `cond` and jump to `target` when it is zero.
  fn emit_cond(&mut self, cond: &AstNode, target: &str) {
    self.emit_expr(cond);
    self.pop("rax");
    self.emit("cmp rax, 0");
    self.emit(&format!("je {target}"));
  }

  /// Emit stack-based code for a single expression node.
  fn emit_expr(&mut self, node: &AstNode) {
    match node {
      AstNode::Num { value } => {
        self.emit(&format!("mov rax, {value}"));
        self.push();
      }
      AstNode::Var { .. } => {
        self.emit_addr(node);
        self.load();
      }
      AstNode::Addr { operand } => self.emit_addr(operand),
      AstNode::Deref { operand } => {
        self.emit_expr(operand);
        self.load();
      }
      AstNode::Assign { lhs, rhs } => {
        self.emit_addr(lhs);
        self.emit_expr(rhs);
        self.store();
      }
      AstNode::Binary { op, lhs, rhs } => {
        self.emit_expr(lhs);
        self.emit_expr(rhs);
        self.pop("rdi");
        self.pop("rax");
        match op {
          BinaryOp::Add => self.emit("add rax, rdi"),
          BinaryOp::Sub => self.emit("sub rax, rdi"),
          BinaryOp::Mul => self.emit("imul rax, rdi"),
          BinaryOp::Div => {
            self.emit("cqo");
            self.emit("idiv rdi");
          }
          BinaryOp::Eq => self.emit_compare("sete"),
          BinaryOp::Ne => self.emit_compare("setne"),
          BinaryOp::Lt => self.emit_compare("setl"),
          BinaryOp::Le => self.emit_compare("setle"),
        }
        self.push();
      }
      AstNode::Funcall { name, args } => self.emit_funcall(name, args),
    }
  }

  fn emit_compare(&mut self, set: &str) {
    self.emit("cmp rax, rdi");
    self.emit(&format!("{set} al"));
    self.emit("movzx rax, al");
  }

  /// Replace the address on top of the stack with the word it points to.
  fn load(&mut self) {
    self.pop("rax");
    self.emit("mov rax, [rax]");
    self.push();
  }

  /// Pop a value and then an address, store the value there and push it back.
  fn store(&mut self) {
    self.pop("rdi");
    self.pop("rax");
    self.emit("mov [rax], rdi");
    self.emit("mov rax, rdi");
    self.push();
  }

  /// Push the address of an lvalue.
  fn emit_addr(&mut self, node: &AstNode) {
    match node {
      AstNode::Var { offset } => {
        self.emit(&format!("lea rax, [rbp-{offset}]"));
        self.push();
      }
      AstNode::Deref { operand } => self.emit_expr(operand),
      _ => unreachable!("parser only builds lvalue targets from variables and dereferences"),
    }
  }

  /// Arguments go left to right onto the stack, then into registers. The
  /// stack pointer's alignment is only known at run time, so the call is
  /// emitted twice: once as is and once padded by 8 bytes.
  fn emit_funcall(&mut self, name: &str, args: &[AstNode]) {
    debug_assert!(args.len() <= MAX_ARGS, "call to {name} with {} arguments", args.len());
    for arg in args {
      self.emit_expr(arg);
    }
    for (_, reg) in args.iter().zip(ARG_REGS).rev() {
      self.pop(reg);
    }

    let n = self.next_label();
    self.emit("mov rax, rsp");
    self.emit("and rax, 15");
    self.emit(&format!("jnz .L.call.{n}"));
    self.emit("mov rax, 0");
    self.emit(&format!("call {name}"));
    self.emit(&format!("jmp .L.end.{n}"));
    self.label(&format!(".L.call.{n}"));
    self.emit("sub rsp, 8");
    self.emit("mov rax, 0");
    self.emit(&format!("call {name}"));
    self.emit("add rsp, 8");
    self.label(&format!(".L.end.{n}"));
    self.push();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::locals::Scope;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn compile(src: &str) -> String {
    let tokens = tokenize(src).unwrap();
    generate(&parse(tokens, src).unwrap())
  }

  fn lines(asm: &str) -> Vec<&str> {
    asm.lines().map(str::trim).collect()
  }

  /// Count of evaluation-stack pushes minus pops, ignoring the frame pointer.
  fn stack_balance(asm: &str) -> i64 {
    lines(asm).iter().fold(0, |acc, line| match *line {
      "push rbp" | "pop rbp" => acc,
      l if l.starts_with("push ") => acc + 1,
      l if l.starts_with("pop ") => acc - 1,
      _ => acc,
    })
  }

  #[test]
  fn emits_header_and_globals_for_every_function() {
    let asm = compile("int one() { return 1; } int main() { return one(); }");
    assert!(asm.starts_with(".intel_syntax noprefix\n.globl one\n.globl main\none:\n"));
    assert!(asm.contains("\nmain:\n"));
    assert!(asm.contains("    call one\n"));
  }

  #[test]
  fn function_has_prologue_and_shared_epilogue() {
    let asm = compile("int main() { int a; int b; int c; return 0; }");
    let lines = lines(&asm);
    let start = lines.iter().position(|l| *l == "main:").unwrap();
    assert_eq!(
      &lines[start + 1..start + 4],
      ["push rbp", "mov rbp, rsp", "sub rsp, 32"]
    );
    assert!(lines.contains(&"jmp .L.return.main"));
    assert!(asm.contains(".L.return.main:\n    mov rsp, rbp\n    pop rbp\n    ret\n"));
  }

  #[test]
  fn output_ends_with_non_executable_stack_note() {
    let asm = compile("int main() { return 0; }");
    assert!(asm.ends_with("    ret\n.section .note.GNU-stack,\"\",@progbits\n"));
    assert_eq!(asm.matches(".note.GNU-stack").count(), 1);
  }

  #[test]
  fn declarations_store_only_their_initializer() {
    let asm = compile("int main() { int x; return 0; }");
    assert!(!asm.contains("mov [rax], rdi"));

    let asm = compile("int main() { int a; int x = 7; return x; }");
    assert!(asm.contains(
      "    lea rax, [rbp-16]\n    push rax\n    mov rax, 7\n    push rax\n    \
       pop rdi\n    pop rax\n    mov [rax], rdi\n"
    ));
    assert_eq!(stack_balance(&asm), 0);
  }

  #[test]
  fn parameter_spills_follow_declared_slots() {
    let asm = compile("int f(int a, int *b) { int c; return c; } int main() { return 0; }");
    assert!(asm.contains("    sub rsp, 32\n    mov [rbp-8], rdi\n    mov [rbp-16], rsi\n    lea"));
  }

  #[test]
  #[should_panic(expected = "call to f with 7 arguments")]
  fn oversized_call_built_by_hand_is_caught() {
    let call = AstNode::Funcall {
      name: "f".to_string(),
      args: (1..=7).map(AstNode::number).collect(),
    };
    let program = Program {
      functions: vec![Function {
        name: "main".to_string(),
        params: Vec::new(),
        locals: Scope::new(),
        body: vec![Stmt::Return(call)],
        stack_size: 0,
      }],
    };
    generate(&program);
  }

  #[test]
  fn register_names_are_recognised() {
    for name in ["rax", "RDI", "r8", "r15d", "r9b", "xmm15", "ymm31", "spl", "rip", "cs", "mm7"] {
      assert!(is_register(name), "{name}");
    }
    for name in ["main", "r7", "r16", "r08", "rdx1", "xmm32", "mm8", "rax_", "f"] {
      assert!(!is_register(name), "{name}");
    }
  }

  #[test]
  fn parameters_are_spilled_from_argument_registers() {
    let asm = compile("int f(int a, int b, int c, int d, int e, int g) { return a; }");
    for (slot, reg) in ["rdi", "rsi", "rdx", "rcx", "r8", "r9"].iter().enumerate() {
      let line = format!("    mov [rbp-{}], {reg}\n", (slot + 1) * 8);
      assert!(asm.contains(&line), "missing {line:?}");
    }
  }

  #[test]
  fn division_sign_extends_before_idiv() {
    let asm = compile("int main() { return 7 / 2; }");
    assert!(asm.contains("    cqo\n    idiv rdi\n"));
  }

  #[test]
  fn comparisons_produce_booleans() {
    let asm = compile("int main() { return 1 < 2; }");
    assert!(asm.contains("    cmp rax, rdi\n    setl al\n    movzx rax, al\n"));
    let asm = compile("int main() { return 1 != 2; }");
    assert!(asm.contains("    setne al\n"));
  }

  #[test]
  fn labels_are_unique_across_functions() {
    let asm = compile(
      "int f(int x) { if (x) return 1; return 0; } \
       int main() { int i; while (i < 3) i = i + 1; if (i) return f(i); else return 2; }",
    );
    let labels: Vec<&str> = lines(&asm)
      .into_iter()
      .filter(|l| l.starts_with(".L.") && l.ends_with(':'))
      .collect();
    let mut unique = labels.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(labels.len(), unique.len());
  }

  #[test]
  fn independent_compilations_number_labels_from_scratch() {
    let src = "int main() { if (1) return 1; return 2; }";
    assert_eq!(compile(src), compile(src));
    assert!(compile(src).contains(".L.else.1:"));
  }

  #[test]
  fn call_site_checks_alignment_at_run_time() {
    let asm = compile("int main() { return f(1, 2); }");
    assert!(asm.contains(
      "    pop rsi\n    pop rdi\n    mov rax, rsp\n    and rax, 15\n    jnz .L.call.1\n"
    ));
    assert!(asm.contains(".L.call.1:\n    sub rsp, 8\n    mov rax, 0\n    call f\n    add rsp, 8\n"));
  }

  #[test]
  fn statements_keep_the_stack_balanced() {
    let programs = [
      "int main() { 1 + 2 * 3; return 4; }",
      "int main() { int x; int *p; p = &x; *p = 3; return x; }",
      "int main() { int i; int s; s = 0; for (i = 0; i <= 10; i = i + 1) s = s + i; return s; }",
      "int main() { int n; n = 5; while (n > 0) { n = n - 1; } return n; }",
      "int g(int a, int b) { return a - b; } int main() { g(1, g(2, 3)); return g(4, 5); }",
      "int main() { for (;;) { if (1) return 1; else return 2; } }",
    ];
    for src in programs {
      assert_eq!(stack_balance(&compile(src)), 0, "{src}");
    }
  }

  #[test]
  fn variable_read_goes_through_its_address() {
    let asm = compile("int main() { int x; int y; return y; }");
    assert!(asm.contains("    lea rax, [rbp-16]\n    push rax\n    pop rax\n    mov rax, [rax]\n"));
  }
}
