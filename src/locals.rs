//! Per-function symbol table.
//!
//! Locals and parameters share one list; each entry owns one slot below the
//! frame pointer, handed out in declaration order.

use crate::ty::Type;

/// Bytes reserved per local regardless of its declared type.
pub const SLOT_SIZE: usize = 8;

/// Frames are kept 16-byte aligned so calls see an aligned stack.
const FRAME_ALIGN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
  Local,
  Param,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
  pub name: String,
  /// Distance below `rbp`, in bytes.
  pub offset: usize,
  pub kind: LocalKind,
  pub ty: Type,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
  locals: Vec<Local>,
}

impl Scope {
  pub fn new() -> Self {
    Self::default()
  }

  /// Index of the local named `name`, if declared.
  pub fn find(&self, name: &str) -> Option<usize> {
    self.locals.iter().position(|local| local.name == name)
  }

  /// Declare a new local and return its index. Returns `None` when the name
  /// is already taken in this function.
  pub fn declare(&mut self, name: &str, ty: Type, kind: LocalKind) -> Option<usize> {
    if self.find(name).is_some() {
      return None;
    }
    let offset = self.used() + ty.size();
    self.locals.push(Local {
      name: name.to_string(),
      offset,
      kind,
      ty,
    });
    Some(self.locals.len() - 1)
  }

  pub fn get(&self, index: usize) -> &Local {
    &self.locals[index]
  }

  /// Bytes taken by the slots handed out so far.
  fn used(&self) -> usize {
    self.locals.last().map_or(0, |local| local.offset)
  }

  /// Bytes to reserve below `rbp` for every slot, rounded up to 16.
  pub fn frame_size(&self) -> usize {
    self.used().next_multiple_of(FRAME_ALIGN)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn assigns_increasing_offsets_in_declaration_order() {
    let mut scope = Scope::new();
    let a = scope.declare("a", Type::int(), LocalKind::Param).unwrap();
    let b = scope.declare("b", Type::int(), LocalKind::Local).unwrap();
    let p = scope
      .declare("p", Type::pointer_to(Type::int()), LocalKind::Local)
      .unwrap();

    assert_eq!(scope.get(a).offset, 8);
    assert_eq!(scope.get(b).offset, 16);
    assert_eq!(scope.get(p).offset, 24);
    assert_eq!(scope.find("b"), Some(b));
    assert_eq!(scope.find("c"), None);
  }

  #[test]
  fn rejects_redeclaration() {
    let mut scope = Scope::new();
    assert!(scope.declare("x", Type::int(), LocalKind::Param).is_some());
    assert!(scope.declare("x", Type::int(), LocalKind::Local).is_none());
    assert_eq!(scope.get(0).kind, LocalKind::Param);
    assert_eq!(scope.frame_size(), 16);
  }

  #[test]
  fn frame_size_is_sixteen_byte_aligned() {
    let mut scope = Scope::new();
    assert_eq!(scope.frame_size(), 0);
    scope.declare("a", Type::int(), LocalKind::Local);
    assert_eq!(scope.frame_size(), 16);
    scope.declare("b", Type::int(), LocalKind::Local);
    assert_eq!(scope.frame_size(), 16);
    scope.declare("c", Type::int(), LocalKind::Local);
    assert_eq!(scope.frame_size(), 32);
  }
}
