use crate::locals::SLOT_SIZE;

/// Declared type of a local. Only `int` and pointers to it exist; code
/// generation treats both as one machine word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
  Int,
  Ptr(Box<Type>),
}

impl Type {
  pub fn int() -> Self {
    Self::Int
  }

  pub fn pointer_to(base: Type) -> Self {
    Self::Ptr(Box::new(base))
  }

  /// Bytes of stack a local of this type occupies.
  pub fn size(&self) -> usize {
    match self {
      Self::Int | Self::Ptr(_) => SLOT_SIZE,
    }
  }
}
