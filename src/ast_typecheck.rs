use crate::ast::{
    Assignment, Call, Decl, DeclarationList, Expr, ExprKind, FunctionDefinition, Ident, Item,
    Operation, Position, Stmt, StmtKind,
};
use crate::diagnostics::Diagnostic;
use crate::types::Type;

/// Annotates every node of a resolved AST with its type and returns all type
/// errors found. Checking never stops at the first error.
pub fn typecheck(ast: &mut DeclarationList) -> Vec<Diagnostic> {
    let mut checker = TypeChecker::new();
    checker.typecheck_program(ast);
    log::debug!("type checking finished with {} error(s)", checker.errors.len());
    checker.errors
}

#[derive(Debug)]
struct TypeChecker {
    errors: Vec<Diagnostic>,
    /// Declared return type of the function being checked.
    ret: Type,
    loop_depth: usize,
}

impl TypeChecker {
    fn new() -> Self {
        Self {
            errors: Vec::new(),
            ret: Type::Void,
            loop_depth: 0,
        }
    }

    fn typecheck_program(&mut self, ast: &mut DeclarationList) {
        for item in &mut ast.items {
            match item {
                Item::Decl(decl) => self.typecheck_decl(decl, true),
                Item::Function(function) => self.typecheck_function(function),
            }
        }
    }

    fn typecheck_decl(&mut self, decl: &mut Decl, global: bool) {
        if decl.is_array() && !global {
            self.errors.push(Diagnostic::type_error(
                decl.pos,
                format!("array {} must be declared at global scope", decl.ident.name),
            ));
        }
        decl.ty = Some(symbol_type(&decl.ident));
    }

    fn typecheck_function(&mut self, function: &mut FunctionDefinition) {
        let name = function.ident.name.as_str();
        log::trace!("checking function {}", name);
        let return_required = !function.ret.is_void();

        if name == "main" {
            if return_required {
                self.errors.push(Diagnostic::type_error(
                    function.pos,
                    "main function must return void",
                ));
                return;
            }
            if !function.params.is_empty() {
                self.errors.push(Diagnostic::type_error(
                    function.pos,
                    "main function must take no parameters",
                ));
                return;
            }
        }

        for param in &function.params {
            if let Type::Array { .. } = param.declared {
                self.errors.push(Diagnostic::type_error(
                    function.pos,
                    format!(
                        "parameter {} of function {} cannot be an array",
                        param.ident.name, name
                    ),
                ));
            }
        }

        self.ret = function.ret.clone();
        self.loop_depth = 0;
        let returns = self.typecheck_stmts(&mut function.body.stmts);
        if return_required && !returns {
            self.errors.push(Diagnostic::type_error(
                function.pos,
                format!("function {} does not return on all paths", function.ident.name),
            ));
        }
    }

    /// Returns whether the list guarantees a `return` on every path through it.
    fn typecheck_stmts(&mut self, stmts: &mut [Stmt]) -> bool {
        let mut returns = false;
        for stmt in stmts {
            returns |= self.typecheck_stmt(stmt);
        }
        returns
    }

    fn typecheck_stmt(&mut self, stmt: &mut Stmt) -> bool {
        let pos = stmt.pos;
        match &mut stmt.kind {
            StmtKind::Decl(decl) => {
                self.typecheck_decl(decl, false);
                stmt.ty = decl.ty.clone();
                false
            }
            StmtKind::Assign(assignment) => {
                let ty = self.typecheck_assignment(assignment);
                stmt.ty = Some(ty);
                false
            }
            StmtKind::Call(call) => {
                let (ty, poisoned) = self.typecheck_call(call);
                self.set_type(pos, &mut stmt.ty, ty, poisoned);
                false
            }
            StmtKind::IfElse { cond, then, else_ } => {
                self.expect_condition(pos, cond, "if");
                // Both branches are checked even when one already fails.
                let then_returns = self.typecheck_stmts(&mut then.stmts);
                let else_returns = self.typecheck_stmts(&mut else_.stmts);
                stmt.ty = Some(Type::Void);
                then_returns && else_returns
            }
            StmtKind::For {
                init,
                cond,
                increment,
                body,
            } => {
                self.typecheck_assignment(init);
                self.expect_condition(pos, cond, "for");
                self.typecheck_assignment(increment);
                self.loop_depth += 1;
                // The body may run zero times, so it never guarantees a return.
                self.typecheck_stmts(&mut body.stmts);
                self.loop_depth -= 1;
                stmt.ty = Some(Type::Void);
                false
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.errors
                        .push(Diagnostic::type_error(pos, "break statement outside of a loop"));
                }
                stmt.ty = Some(Type::Void);
                false
            }
            StmtKind::Return(value) => {
                let ty = match value {
                    Some(value) => self.typecheck_expr(value),
                    None => Type::Void,
                };
                if !ty.is_error() && !ty.equivalent(&self.ret) {
                    self.errors.push(Diagnostic::type_error(
                        pos,
                        format!("cannot return {} from a function returning {}", ty, self.ret),
                    ));
                }
                stmt.ty = Some(ty);
                true
            }
        }
    }

    fn expect_condition(&mut self, pos: Position, cond: &mut Expr, construct: &str) {
        let ty = self.typecheck_expr(cond);
        if !ty.is_error() && !ty.equivalent(&Type::Bool) {
            self.errors.push(Diagnostic::type_error(
                pos,
                format!("condition of {} must be bool, found {}", construct, ty),
            ));
        }
    }

    fn typecheck_assignment(&mut self, assignment: &mut Assignment) -> Type {
        let location_ty = self.typecheck_expr(&mut assignment.location);
        let value_ty = self.typecheck_expr(&mut assignment.value);
        let poisoned = location_ty.is_error() || value_ty.is_error();
        let ty = location_ty.assign(&value_ty);
        self.set_type(assignment.pos, &mut assignment.ty, ty.clone(), poisoned);
        ty
    }

    fn typecheck_call(&mut self, call: &mut Call) -> (Type, bool) {
        let arg_tys = call
            .args
            .iter_mut()
            .map(|arg| self.typecheck_expr(arg))
            .collect::<Vec<_>>();
        let callee_ty = symbol_type(&call.callee);
        let poisoned = callee_ty.is_error() || arg_tys.iter().any(Type::is_error);
        (callee_ty.call(&arg_tys), poisoned)
    }

    fn typecheck_expr(&mut self, expr: &mut Expr) -> Type {
        let (ty, poisoned) = match &mut expr.kind {
            ExprKind::LiteralInt(_) => (Type::Int, false),
            ExprKind::LiteralBool(_) => (Type::Bool, false),
            ExprKind::Var(ident) => match symbol_type(ident) {
                Type::Array { .. } => {
                    let message = format!("array {} can only be used through an index", ident.name);
                    (Type::error(message), false)
                }
                // Unresolved names were already reported by name resolution.
                ty => (ty, true),
            },
            ExprKind::Index { base, index } => {
                let index_ty = self.typecheck_expr(index);
                let base_ty = symbol_type(base);
                let poisoned = base_ty.is_error() || index_ty.is_error();
                (base_ty.index(&index_ty), poisoned)
            }
            ExprKind::Call(call) => self.typecheck_call(call),
            ExprKind::Op { op, lhs, rhs } => {
                let lhs_ty = self.typecheck_expr(lhs);
                let rhs_ty = match rhs {
                    Some(rhs) => Some(self.typecheck_expr(rhs)),
                    None => None,
                };
                let poisoned = lhs_ty.is_error() || rhs_ty.as_ref().map_or(false, Type::is_error);
                (apply_operation(*op, &lhs_ty, rhs_ty.as_ref()), poisoned)
            }
        };
        self.set_type(expr.pos, &mut expr.ty, ty.clone(), poisoned);
        ty
    }

    /// Records `ty` on a node, reporting it if it is a fresh error.
    fn set_type(&mut self, pos: Position, slot: &mut Option<Type>, ty: Type, poisoned: bool) {
        if let Type::Error { message } = &ty {
            if !poisoned {
                self.errors.push(Diagnostic::type_error(pos, message.clone()));
            }
        }
        *slot = Some(ty);
    }
}

fn apply_operation(op: Operation, lhs: &Type, rhs: Option<&Type>) -> Type {
    let Some(rhs) = rhs else {
        return match op {
            Operation::LogicNot => lhs.not(),
            _ => Type::error(format!("missing right operand for {:?}", op)),
        };
    };
    match op {
        Operation::Ge
        | Operation::Gt
        | Operation::Le
        | Operation::Lt
        | Operation::Eq
        | Operation::Ne => lhs.compare(rhs),
        Operation::Add => lhs.add(rhs),
        Operation::Sub => lhs.sub(rhs),
        Operation::Mul => lhs.mul(rhs),
        Operation::Div => lhs.div(rhs),
        Operation::LogicAnd => lhs.and(rhs),
        Operation::LogicOr => lhs.or(rhs),
        // `not` only looks at its left operand.
        Operation::LogicNot => lhs.not(),
    }
}

fn symbol_type(ident: &Ident) -> Type {
    match ident.symbol.as_ref().and_then(|symbol| symbol.ty.as_ref()) {
        Some(ty) => ty.clone(),
        None => Type::error(format!("unresolved symbol {}", ident.name)),
    }
}
