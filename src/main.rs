use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;

use cruxc::ast::DeclarationList;
use cruxc::cctx::CCtx;
use cruxc::sink::WriterSink;
use cruxc::CompileError;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Parsed program as JSON
    source: PathBuf,
    #[arg(short, long, default_value = "a.s")]
    output: PathBuf,
    /// Print the lowered program to stdout instead of writing assembly
    #[arg(long)]
    emit_ir: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed syntax tree: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("cannot write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Compile(CompileError::Diagnostics(diagnostics))) => {
            for diagnostic in &diagnostics {
                eprintln!("{}", diagnostic);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let source = fs::read_to_string(&args.source).map_err(|source| CliError::Read {
        path: args.source.clone(),
        source,
    })?;
    let mut ast: DeclarationList = serde_json::from_str(&source)?;

    let cctx = CCtx::new();
    let program = cruxc::lower_checked(&cctx, &mut ast)?;
    if args.emit_ir {
        print!("{}", program);
        return Ok(());
    }

    let write_error = |source: io::Error| CliError::Write {
        path: args.output.clone(),
        source,
    };
    let file = File::create(&args.output).map_err(write_error)?;
    let mut sink = WriterSink::new(BufWriter::new(file));
    cruxc::codegen::generate(&cctx, &program, &mut sink).map_err(CompileError::from)?;
    sink.into_inner().flush().map_err(write_error)?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}
