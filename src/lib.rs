use thiserror::Error;

pub mod ast;
pub mod ast_lowering;
pub mod ast_resolve;
pub mod ast_typecheck;
pub mod cctx;
pub mod codegen;
pub mod diagnostics;
pub mod ir;
pub mod ir_validation;
pub mod sink;
pub mod symbol_table;
#[cfg(test)]
mod testing;
pub mod types;

use crate::ast::DeclarationList;
use crate::ast_lowering::LowerError;
use crate::cctx::CCtx;
use crate::codegen::CodegenError;
use crate::diagnostics::Diagnostic;
use crate::ir::Program;
use crate::ir_validation::IrValidationError;
use crate::sink::CodeSink;

#[derive(Debug, Error)]
pub enum CompileError {
    /// The source is ill-formed; nothing was lowered.
    #[error("compilation failed with {} error(s)", .0.len())]
    Diagnostics(Vec<Diagnostic>),
    #[error("internal compiler error: {0}")]
    Lower(#[from] LowerError),
    #[error("internal compiler error: {0}")]
    Validation(#[from] IrValidationError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Resolves names and type-checks `ast`, returning every diagnostic found.
pub fn check(cctx: &CCtx, ast: &mut DeclarationList) -> Vec<Diagnostic> {
    let mut diagnostics = ast_resolve::resolve(cctx, ast);
    diagnostics.extend(ast_typecheck::typecheck(ast));
    diagnostics
}

/// Checks `ast` and lowers it when it is free of errors. The lowered program
/// has passed IR validation.
pub fn lower_checked(cctx: &CCtx, ast: &mut DeclarationList) -> Result<Program, CompileError> {
    let diagnostics = check(cctx, ast);
    if !diagnostics.is_empty() {
        log::info!("not lowering: {} diagnostic(s)", diagnostics.len());
        return Err(CompileError::Diagnostics(diagnostics));
    }
    let program = ast_lowering::lower(ast)?;
    program.validate()?;
    Ok(program)
}

pub fn compile(ast: &mut DeclarationList, sink: &mut dyn CodeSink) -> Result<(), CompileError> {
    let cctx = CCtx::new();
    let program = lower_checked(&cctx, ast)?;
    codegen::generate(&cctx, &program, sink)?;
    Ok(())
}
