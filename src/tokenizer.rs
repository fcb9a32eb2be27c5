//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond recognising keywords,
//! identifiers, operators and numeric literals. Multi-character punctuators
//! are matched before single-character ones to avoid ambiguity.

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Punctuator,
  Ident,
  Num,
  Return,
  If,
  Else,
  While,
  For,
  Int,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub value: Option<i64>,
  /// Byte offset into the source.
  pub loc: usize,
  pub len: usize,
  /// 1-based line and column, kept for dumps and diagnostics.
  pub line: usize,
  pub column: usize,
}

impl Token {
  pub fn new(kind: TokenKind, loc: usize, len: usize, value: Option<i64>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
      line: 1,
      column: 1,
    }
  }

  fn at_position(mut self, line: usize, column: usize) -> Self {
    self.line = line;
    self.column = column;
    self
  }
}

const PUNCTUATORS: [&str; 18] = [
  "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "(", ")", "{", "}", "=", ";", ",", "&",
];

fn keyword(ident: &str) -> Option<TokenKind> {
  match ident {
    "return" => Some(TokenKind::Return),
    "if" => Some(TokenKind::If),
    "else" => Some(TokenKind::Else),
    "while" => Some(TokenKind::While),
    "for" => Some(TokenKind::For),
    "int" => Some(TokenKind::Int),
    _ => None,
  }
}

fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
  is_ident_start(c) || c.is_ascii_digit()
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;
  let mut line = 1;
  let mut line_start = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c == b'\n' {
      line += 1;
      line_start = i + 1;
      i += 1;
      continue;
    }
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    let column = input[line_start..i].chars().count() + 1;

    if is_ident_start(c) {
      let start = i;
      while i < bytes.len() && is_ident_char(bytes[i]) {
        i += 1;
      }
      let kind = keyword(&input[start..i]).unwrap_or(TokenKind::Ident);
      tokens.push(Token::new(kind, start, i - start, None).at_position(line, column));
      continue;
    }

    if let Some(op) = PUNCTUATORS
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Punctuator, i, op.len(), None).at_position(line, column));
      i += op.len();
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      let value = text
        .parse::<i64>()
        .map_err(|err| CompileError::lexical(input, start, format!("invalid number: {err}")))?;
      tokens.push(Token::new(TokenKind::Num, start, i - start, Some(value)).at_position(line, column));
      continue;
    }

    let invalid_char = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::lexical(
      input,
      i,
      format!("invalid token: '{invalid_char}'"),
    ));
  }

  let column = input[line_start..].chars().count() + 1;
  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None).at_position(line, column));
  Ok(tokens)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;

  fn kinds(src: &str) -> Vec<TokenKind> {
    tokenize(src).unwrap().iter().map(|t| t.kind).collect()
  }

  fn texts(src: &str) -> Vec<String> {
    tokenize(src)
      .unwrap()
      .iter()
      .map(|t| describe_token(Some(t), src))
      .collect()
  }

  #[test]
  fn splits_operators_and_numbers() {
    assert_eq!(
      texts("1+22 *(3-4)/5"),
      ["1", "+", "22", "*", "(", "3", "-", "4", ")", "/", "5", "EOF"]
    );
    let tokens = tokenize("  42 ").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Num);
    assert_eq!(tokens[0].value, Some(42));
    assert_eq!((tokens[0].loc, tokens[0].len), (2, 2));
  }

  #[test]
  fn prefers_two_character_operators() {
    assert_eq!(
      texts("a==b!=c<=d>=e<f>g=h"),
      ["a", "==", "b", "!=", "c", "<=", "d", ">=", "e", "<", "f", ">", "g", "=", "h", "EOF"]
    );
  }

  #[test]
  fn recognises_keywords_only_on_word_boundaries() {
    assert_eq!(
      kinds("return returned if iffy else while for forty int int_"),
      [
        TokenKind::Return,
        TokenKind::Ident,
        TokenKind::If,
        TokenKind::Ident,
        TokenKind::Else,
        TokenKind::While,
        TokenKind::For,
        TokenKind::Ident,
        TokenKind::Int,
        TokenKind::Ident,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn identifiers_may_contain_digits_and_underscores() {
    assert_eq!(texts("_a1 foo_bar9;"), ["_a1", "foo_bar9", ";", "EOF"]);
    assert_eq!(kinds("x1")[0], TokenKind::Ident);
  }

  #[test]
  fn tracks_line_and_column() {
    let tokens = tokenize("int main() {\n  return 0;\n}").unwrap();
    let ret = tokens.iter().find(|t| t.kind == TokenKind::Return).unwrap();
    assert_eq!((ret.line, ret.column), (2, 3));
    let eof = tokens.last().unwrap();
    assert_eq!(eof.kind, TokenKind::Eof);
    assert_eq!((eof.line, eof.column), (3, 2));
  }

  #[test]
  fn tokenizing_is_deterministic() {
    let src = "int main() { int x; x = 3; return &x == &x; }";
    assert_eq!(tokenize(src).unwrap(), tokenize(src).unwrap());
  }

  #[test]
  fn rejects_unknown_characters() {
    let err = tokenize("1 + $").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Lexical));
    assert_eq!(err.position(), Some((1, 5)));
    assert!(err.to_string().contains("invalid token: '$'"));
  }

  #[test]
  fn rejects_literals_wider_than_i64() {
    let err = tokenize("99999999999999999999").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Lexical));
    assert!(err.to_string().contains("invalid number"));
  }
}
