use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use minicc::error::IoSnafu;
use minicc::tokenizer::{self, describe_token};
use minicc::{CompileResult, codegen, parser};
use snafu::ResultExt;

#[derive(Debug, Parser)]
#[command(name = "minicc", version)]
#[command(about = "Compile a small subset of C into x86-64 Intel-syntax assembly")]
struct Args {
  /// Program text. Read from --input or standard input when omitted.
  #[arg(conflicts_with = "input")]
  source: Option<String>,

  /// Read the program from a file ("-" for standard input).
  #[arg(short, long, value_name = "FILE")]
  input: Option<PathBuf>,

  /// Output assembly file. Writes to stdout if omitted.
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,

  /// Print the token stream to stderr.
  #[arg(long)]
  dump_tokens: bool,

  /// Print the parsed program to stderr.
  #[arg(long)]
  dump_ast: bool,
}

fn main() {
  let args = Args::parse();

  if let Err(err) = run(&args) {
    eprintln!("{err}");
    process::exit(1);
  }
}

fn run(args: &Args) -> CompileResult<()> {
  let source = read_source(args)?;

  let tokens = tokenizer::tokenize(&source)?;
  if args.dump_tokens {
    for token in &tokens {
      eprintln!(
        "{}:{}\t{:?}\t{}",
        token.line,
        token.column,
        token.kind,
        describe_token(Some(token), &source)
      );
    }
  }

  let program = parser::parse(tokens, &source)?;
  if args.dump_ast {
    eprintln!("{program:#?}");
  }

  let asm = codegen::generate(&program);
  write_output(args, &asm)
}

fn read_source(args: &Args) -> CompileResult<String> {
  if let Some(source) = &args.source {
    return Ok(source.clone());
  }

  match &args.input {
    Some(path) if path.as_os_str() != "-" => fs::read_to_string(path).context(IoSnafu {
      action: format!("read {}", path.display()),
    }),
    _ => {
      let mut source = String::new();
      io::stdin()
        .read_to_string(&mut source)
        .context(IoSnafu {
          action: "read standard input",
        })?;
      Ok(source)
    }
  }
}

fn write_output(args: &Args, asm: &str) -> CompileResult<()> {
  match &args.output {
    Some(path) => fs::write(path, asm).context(IoSnafu {
      action: format!("write {}", path.display()),
    }),
    None => io::stdout().write_all(asm.as_bytes()).context(IoSnafu {
      action: "write standard output",
    }),
  }
}
