use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{
    Assignment, Block, Call, DeclarationList, Expr, ExprKind, FunctionDefinition, Ident, Item,
    Operation, Position, Stmt, StmtKind,
};
use crate::cctx::SymbolId;
use crate::ir::{
    BinaryOp, Constant, Function, GlobalDecl, InstId, InstKind, LocalVar, Operand, Predicate,
    Program, EDGE_FALSE, EDGE_NEXT, EDGE_TRUE,
};
use crate::symbol_table::Symbol;
use crate::types::Type;

/// Faults in the lowering input. A type-checked AST never produces these.
#[derive(Debug, Error)]
pub enum LowerError {
    #[error("identifier {name} at {pos} has no resolved symbol")]
    MissingSymbol { pos: Position, name: String },
    #[error("expression at {pos} produces no value")]
    MissingValue { pos: Position },
    #[error("break at {pos} is not inside a loop")]
    BreakOutsideLoop { pos: Position },
    #[error("assignment at {pos} does not target a variable or array element")]
    InvalidLocation { pos: Position },
    #[error("callee {name} at {pos} is not a function")]
    NotAFunction { pos: Position, name: String },
}

pub fn lower(ast: &DeclarationList) -> Result<Program, LowerError> {
    let mut program = Program::new();
    for item in &ast.items {
        match item {
            Item::Decl(decl) => {
                let symbol = resolved(&decl.ident)?.clone();
                let num_elements = match &decl.declared {
                    Type::Array { extent, .. } => *extent,
                    _ => 1,
                };
                program.globals.push(GlobalDecl {
                    symbol,
                    num_elements,
                });
            }
            Item::Function(definition) => {
                let function = FunctionLowering::lower(&mut program, definition)?;
                log::debug!(
                    "lowered {} into {} instructions",
                    function.name,
                    function.num_insts()
                );
                log::trace!("{}", function);
                program.functions.push(function);
            }
        }
    }
    Ok(program)
}

/// A single-entry, single-exit chain of instructions, and the register
/// holding its result when it computes one.
#[derive(Debug, Clone, Copy)]
struct Lowered {
    entry: InstId,
    exit: InstId,
    value: Option<LocalVar>,
}

/// Innermost enclosing loop, if any. Passed down by value so each loop body
/// sees its own exit.
#[derive(Debug, Clone, Copy, Default)]
struct LoopCtx {
    exit: Option<InstId>,
}

/// How an eagerly evaluated binary operation combines its operands.
#[derive(Debug, Clone, Copy)]
enum Combine {
    Binary(BinaryOp),
    Compare(Predicate),
}

#[derive(Debug)]
struct FunctionLowering<'a> {
    program: &'a mut Program,
    function: Function,
    locals: HashMap<SymbolId, LocalVar>,
}

impl<'a> FunctionLowering<'a> {
    fn lower(program: &'a mut Program, definition: &FunctionDefinition) -> Result<Function, LowerError> {
        let symbol = resolved(&definition.ident)?;
        let mut this = FunctionLowering {
            program,
            function: Function::new(&symbol.name, definition.func_type()),
            locals: HashMap::new(),
        };
        for param in &definition.params {
            let var = this.function.fresh_var();
            this.locals.insert(resolved(&param.ident)?.id, var);
            this.function.args.push(var);
        }
        let start = this.function.start;
        this.chain_stmts(start, &definition.body.stmts, LoopCtx::default())?;
        Ok(this.function)
    }

    fn nop(&mut self) -> InstId {
        self.function.push(InstKind::Nop)
    }

    fn link(&mut self, from: InstId, to: InstId) {
        self.function.set_next(from, EDGE_NEXT, to);
    }

    /// Appends `stmts` after `lead`, returning the last instruction.
    fn chain_stmts(&mut self, lead: InstId, stmts: &[Stmt], ctx: LoopCtx) -> Result<InstId, LowerError> {
        let mut exit = lead;
        for stmt in stmts {
            let lowered = self.lower_stmt(stmt, ctx)?;
            self.link(exit, lowered.entry);
            exit = lowered.exit;
        }
        Ok(exit)
    }

    fn lower_block(&mut self, block: &Block, ctx: LoopCtx) -> Result<Lowered, LowerError> {
        let entry = self.nop();
        let exit = self.chain_stmts(entry, &block.stmts, ctx)?;
        Ok(Lowered {
            entry,
            exit,
            value: None,
        })
    }

    fn lower_stmt(&mut self, stmt: &Stmt, ctx: LoopCtx) -> Result<Lowered, LowerError> {
        match &stmt.kind {
            StmtKind::Decl(decl) => {
                let var = self.function.fresh_var();
                self.locals.insert(resolved(&decl.ident)?.id, var);
                let nop = self.nop();
                Ok(Lowered {
                    entry: nop,
                    exit: nop,
                    value: None,
                })
            }
            StmtKind::Assign(assignment) => self.lower_assignment(assignment),
            StmtKind::Call(call) => self.lower_call(stmt.pos, call),
            StmtKind::IfElse { cond, then, else_ } => {
                let cond = self.lower_expr(cond)?;
                let cond_var = value_of(&cond, stmt.pos)?;
                let jump = self.function.push(InstKind::Jump { cond: cond_var });
                self.link(cond.exit, jump);

                let then = self.lower_block(then, ctx)?;
                let else_ = self.lower_block(else_, ctx)?;
                let join = self.nop();
                self.function.set_next(jump, EDGE_TRUE, then.entry);
                self.function.set_next(jump, EDGE_FALSE, else_.entry);
                self.link(then.exit, join);
                self.link(else_.exit, join);
                Ok(Lowered {
                    entry: cond.entry,
                    exit: join,
                    value: None,
                })
            }
            StmtKind::For {
                init,
                cond,
                increment,
                body,
            } => {
                let init = self.lower_assignment(init)?;
                let cond_pos = cond.pos;
                let cond = self.lower_expr(cond)?;
                let cond_var = value_of(&cond, cond_pos)?;
                let jump = self.function.push(InstKind::Jump { cond: cond_var });
                let loop_exit = self.nop();
                self.link(init.exit, cond.entry);
                self.link(cond.exit, jump);

                let body = self.lower_block(
                    body,
                    LoopCtx {
                        exit: Some(loop_exit),
                    },
                )?;
                let increment = self.lower_assignment(increment)?;
                self.function.set_next(jump, EDGE_TRUE, body.entry);
                self.function.set_next(jump, EDGE_FALSE, loop_exit);
                self.link(body.exit, increment.entry);
                // back edge: re-evaluate the condition
                self.link(increment.exit, cond.entry);
                Ok(Lowered {
                    entry: init.entry,
                    exit: loop_exit,
                    value: None,
                })
            }
            StmtKind::Break => {
                let target = ctx
                    .exit
                    .ok_or(LowerError::BreakOutsideLoop { pos: stmt.pos })?;
                let entry = self.nop();
                self.link(entry, target);
                // Statements after the break hang off a detached nop.
                let rest = self.nop();
                Ok(Lowered {
                    entry,
                    exit: rest,
                    value: None,
                })
            }
            StmtKind::Return(value) => {
                let entry = match value {
                    Some(expr) => {
                        // `return f();` with a void `f` still calls `f`
                        let lowered = self.lower_expr(expr)?;
                        let ret = self.function.push(InstKind::Return {
                            value: lowered.value,
                        });
                        self.link(lowered.exit, ret);
                        lowered.entry
                    }
                    None => self.function.push(InstKind::Return { value: None }),
                };
                let rest = self.nop();
                Ok(Lowered {
                    entry,
                    exit: rest,
                    value: None,
                })
            }
        }
    }

    fn lower_assignment(&mut self, assignment: &Assignment) -> Result<Lowered, LowerError> {
        let pos = assignment.pos;
        match &assignment.location.kind {
            ExprKind::Var(ident) => {
                let symbol = resolved(ident)?;
                if let Some(&dst) = self.locals.get(&symbol.id) {
                    let value = self.lower_expr(&assignment.value)?;
                    let src = value_of(&value, assignment.value.pos)?;
                    let copy = self.function.push(InstKind::Copy {
                        dst,
                        src: Operand::Local(src),
                    });
                    self.link(value.exit, copy);
                    Ok(Lowered {
                        entry: value.entry,
                        exit: copy,
                        value: None,
                    })
                } else {
                    let symbol = symbol.clone();
                    let value = self.lower_expr(&assignment.value)?;
                    let src = value_of(&value, assignment.value.pos)?;
                    let dst = self.function.fresh_address_var();
                    let address = self.function.push(InstKind::AddressAt {
                        dst,
                        base: symbol,
                        offset: None,
                    });
                    let store = self.function.push(InstKind::Store { src, dst });
                    self.link(value.exit, address);
                    self.link(address, store);
                    Ok(Lowered {
                        entry: value.entry,
                        exit: store,
                        value: None,
                    })
                }
            }
            ExprKind::Index { base, index } => {
                let symbol = resolved(base)?.clone();
                let index_pos = index.pos;
                let index = self.lower_expr(index)?;
                let offset = value_of(&index, index_pos)?;
                let dst = self.function.fresh_address_var();
                let address = self.function.push(InstKind::AddressAt {
                    dst,
                    base: symbol,
                    offset: Some(offset),
                });
                let value = self.lower_expr(&assignment.value)?;
                let src = value_of(&value, assignment.value.pos)?;
                let store = self.function.push(InstKind::Store { src, dst });
                self.link(index.exit, address);
                self.link(address, value.entry);
                self.link(value.exit, store);
                Ok(Lowered {
                    entry: index.entry,
                    exit: store,
                    value: None,
                })
            }
            _ => Err(LowerError::InvalidLocation { pos }),
        }
    }

    fn lower_call(&mut self, pos: Position, call: &Call) -> Result<Lowered, LowerError> {
        let callee = resolved(&call.callee)?.clone();
        let returns_value = match &callee.ty {
            Some(Type::Func { ret, .. }) => !ret.is_void(),
            _ => {
                return Err(LowerError::NotAFunction {
                    pos,
                    name: callee.name,
                })
            }
        };

        let entry = self.nop();
        let mut exit = entry;
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let lowered = self.lower_expr(arg)?;
            args.push(value_of(&lowered, arg.pos)?);
            self.link(exit, lowered.entry);
            exit = lowered.exit;
        }
        let dst = returns_value.then(|| self.function.fresh_var());
        let inst = self.function.push(InstKind::Call { dst, callee, args });
        self.link(exit, inst);
        Ok(Lowered {
            entry,
            exit: inst,
            value: dst,
        })
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Lowered, LowerError> {
        match &expr.kind {
            ExprKind::LiteralInt(value) => Ok(self.lower_constant(Constant::Int(*value))),
            ExprKind::LiteralBool(value) => Ok(self.lower_constant(Constant::Bool(*value))),
            ExprKind::Var(ident) => {
                let symbol = resolved(ident)?;
                if let Some(&var) = self.locals.get(&symbol.id) {
                    let nop = self.nop();
                    return Ok(Lowered {
                        entry: nop,
                        exit: nop,
                        value: Some(var),
                    });
                }
                let symbol = symbol.clone();
                let address = self.function.fresh_address_var();
                let at = self.function.push(InstKind::AddressAt {
                    dst: address,
                    base: symbol,
                    offset: None,
                });
                let dst = self.function.fresh_var();
                let load = self.function.push(InstKind::Load { dst, src: address });
                self.link(at, load);
                Ok(Lowered {
                    entry: at,
                    exit: load,
                    value: Some(dst),
                })
            }
            ExprKind::Index { base, index } => {
                let symbol = resolved(base)?.clone();
                let index = self.lower_expr(index)?;
                let offset = value_of(&index, expr.pos)?;
                let address = self.function.fresh_address_var();
                let at = self.function.push(InstKind::AddressAt {
                    dst: address,
                    base: symbol,
                    offset: Some(offset),
                });
                let dst = self.function.fresh_var();
                let load = self.function.push(InstKind::Load { dst, src: address });
                self.link(index.exit, at);
                self.link(at, load);
                Ok(Lowered {
                    entry: index.entry,
                    exit: load,
                    value: Some(dst),
                })
            }
            ExprKind::Call(call) => self.lower_call(expr.pos, call),
            ExprKind::Op { op, lhs, rhs } => self.lower_operation(expr.pos, *op, lhs, rhs.as_deref()),
        }
    }

    fn lower_constant(&mut self, constant: Constant) -> Lowered {
        let id = self.program.intern(constant);
        let dst = self.function.fresh_var();
        let copy = self.function.push(InstKind::Copy {
            dst,
            src: Operand::Constant(id),
        });
        Lowered {
            entry: copy,
            exit: copy,
            value: Some(dst),
        }
    }

    fn lower_operation(
        &mut self,
        pos: Position,
        op: Operation,
        lhs: &Expr,
        rhs: Option<&Expr>,
    ) -> Result<Lowered, LowerError> {
        let left = self.lower_expr(lhs)?;
        let left_var = value_of(&left, lhs.pos)?;
        let combine = match op {
            Operation::Add => Combine::Binary(BinaryOp::Add),
            Operation::Sub => Combine::Binary(BinaryOp::Sub),
            Operation::Mul => Combine::Binary(BinaryOp::Mul),
            Operation::Div => Combine::Binary(BinaryOp::Div),
            Operation::Ge => Combine::Compare(Predicate::Ge),
            Operation::Gt => Combine::Compare(Predicate::Gt),
            Operation::Le => Combine::Compare(Predicate::Le),
            Operation::Lt => Combine::Compare(Predicate::Lt),
            Operation::Eq => Combine::Compare(Predicate::Eq),
            Operation::Ne => Combine::Compare(Predicate::Ne),
            Operation::LogicNot => {
                let dst = self.function.fresh_var();
                let not = self.function.push(InstKind::UnaryNot {
                    dst,
                    operand: left_var,
                });
                self.link(left.exit, not);
                return Ok(Lowered {
                    entry: left.entry,
                    exit: not,
                    value: Some(dst),
                });
            }
            Operation::LogicAnd | Operation::LogicOr => {
                let rhs = rhs.ok_or(LowerError::MissingValue { pos })?;
                return self.lower_short_circuit(op, left, left_var, rhs);
            }
        };

        let rhs = rhs.ok_or(LowerError::MissingValue { pos })?;
        let right = self.lower_expr(rhs)?;
        let right_var = value_of(&right, rhs.pos)?;
        let dst = self.function.fresh_var();
        let kind = match combine {
            Combine::Binary(op) => binary_inst(op, dst, left_var, right_var),
            Combine::Compare(predicate) => compare_inst(predicate, dst, left_var, right_var),
        };
        let inst = self.function.push(kind);
        self.link(left.exit, right.entry);
        self.link(right.exit, inst);
        Ok(Lowered {
            entry: left.entry,
            exit: inst,
            value: Some(dst),
        })
    }

    /// `and` skips the right operand when the left one is false, `or` when it
    /// is true; in that case the left value is the result.
    fn lower_short_circuit(
        &mut self,
        op: Operation,
        left: Lowered,
        left_var: LocalVar,
        rhs: &Expr,
    ) -> Result<Lowered, LowerError> {
        let jump = self.function.push(InstKind::Jump { cond: left_var });
        self.link(left.exit, jump);
        let dst = self.function.fresh_var();
        let keep_left = self.function.push(InstKind::Copy {
            dst,
            src: Operand::Local(left_var),
        });
        let right = self.lower_expr(rhs)?;
        let right_var = value_of(&right, rhs.pos)?;
        let take_right = self.function.push(InstKind::Copy {
            dst,
            src: Operand::Local(right_var),
        });
        let join = self.nop();

        let (short_edge, eval_edge) = match op {
            Operation::LogicAnd => (EDGE_FALSE, EDGE_TRUE),
            _ => (EDGE_TRUE, EDGE_FALSE),
        };
        self.function.set_next(jump, short_edge, keep_left);
        self.function.set_next(jump, eval_edge, right.entry);
        self.link(keep_left, join);
        self.link(right.exit, take_right);
        self.link(take_right, join);
        Ok(Lowered {
            entry: left.entry,
            exit: join,
            value: Some(dst),
        })
    }
}

fn binary_inst(op: BinaryOp, dst: LocalVar, lhs: LocalVar, rhs: LocalVar) -> InstKind {
    InstKind::BinaryOperator { op, dst, lhs, rhs }
}

fn compare_inst(predicate: Predicate, dst: LocalVar, lhs: LocalVar, rhs: LocalVar) -> InstKind {
    InstKind::Compare {
        predicate,
        dst,
        lhs,
        rhs,
    }
}

fn resolved(ident: &Ident) -> Result<&Symbol, LowerError> {
    match &ident.symbol {
        Some(symbol) if !symbol.is_error() => Ok(symbol),
        _ => Err(LowerError::MissingSymbol {
            pos: ident.pos,
            name: ident.name.clone(),
        }),
    }
}

fn value_of(lowered: &Lowered, pos: Position) -> Result<LocalVar, LowerError> {
    lowered.value.ok_or(LowerError::MissingValue { pos })
}
