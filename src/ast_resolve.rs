use crate::ast::{Assignment, Block, Call, Decl, DeclarationList, Expr, ExprKind, Ident, Item, StmtKind};
use crate::cctx::CCtx;
use crate::diagnostics::Diagnostic;
use crate::symbol_table::SymbolTable;

/// Binds every identifier in `ast` to a symbol, returning declaration and
/// resolution errors in encounter order.
pub fn resolve(cctx: &CCtx, ast: &mut DeclarationList) -> Vec<Diagnostic> {
    let mut resolver = Resolver {
        table: SymbolTable::new(cctx.symbol_ids.clone()),
    };
    for item in &mut ast.items {
        resolver.resolve_item(item);
    }
    log::debug!(
        "name resolution finished with {} error(s)",
        resolver.table.errors().len()
    );
    resolver.table.into_errors()
}

#[derive(Debug)]
struct Resolver {
    table: SymbolTable,
}

impl Resolver {
    fn resolve_item(&mut self, item: &mut Item) {
        match item {
            Item::Decl(decl) => self.declare(decl),
            Item::Function(function) => {
                let ty = function.func_type();
                let ident = &mut function.ident;
                ident.symbol = Some(self.table.add(ident.pos, &ident.name, ty));

                self.table.enter();
                for param in &mut function.params {
                    let symbol = self
                        .table
                        .add(param.ident.pos, &param.ident.name, param.declared.clone());
                    param.ident.symbol = Some(symbol);
                }
                // Parameters and top-level locals share one scope.
                for stmt in &mut function.body.stmts {
                    self.resolve_stmt_kind(&mut stmt.kind);
                }
                self.table.exit();
            }
        }
    }

    fn declare(&mut self, decl: &mut Decl) {
        let ident = &mut decl.ident;
        ident.symbol = Some(self.table.add(ident.pos, &ident.name, decl.declared.clone()));
    }

    fn resolve_block(&mut self, block: &mut Block) {
        self.table.enter();
        for stmt in &mut block.stmts {
            self.resolve_stmt_kind(&mut stmt.kind);
        }
        self.table.exit();
    }

    fn resolve_stmt_kind(&mut self, kind: &mut StmtKind) {
        match kind {
            StmtKind::Decl(decl) => self.declare(decl),
            StmtKind::Assign(assignment) => self.resolve_assignment(assignment),
            StmtKind::Call(call) => self.resolve_call(call),
            StmtKind::IfElse { cond, then, else_ } => {
                self.resolve_expr(cond);
                self.resolve_block(then);
                self.resolve_block(else_);
            }
            StmtKind::For {
                init,
                cond,
                increment,
                body,
            } => {
                self.resolve_assignment(init);
                self.resolve_expr(cond);
                self.resolve_assignment(increment);
                self.resolve_block(body);
            }
            StmtKind::Break => {}
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.resolve_expr(value);
                }
            }
        }
    }

    fn resolve_assignment(&mut self, assignment: &mut Assignment) {
        self.resolve_expr(&mut assignment.location);
        self.resolve_expr(&mut assignment.value);
    }

    fn resolve_call(&mut self, call: &mut Call) {
        self.use_ident(&mut call.callee);
        for arg in &mut call.args {
            self.resolve_expr(arg);
        }
    }

    fn resolve_expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::LiteralInt(_) | ExprKind::LiteralBool(_) => {}
            ExprKind::Var(ident) => self.use_ident(ident),
            ExprKind::Index { base, index } => {
                self.use_ident(base);
                self.resolve_expr(index);
            }
            ExprKind::Call(call) => self.resolve_call(call),
            ExprKind::Op { lhs, rhs, .. } => {
                self.resolve_expr(lhs);
                if let Some(rhs) = rhs {
                    self.resolve_expr(rhs);
                }
            }
        }
    }

    fn use_ident(&mut self, ident: &mut Ident) {
        ident.symbol = Some(self.table.lookup(ident.pos, &ident.name));
    }
}
