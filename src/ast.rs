//! Abstract syntax tree handed over by the front end.
//!
//! Every node carries its source position. `symbol` and `ty` slots start out
//! empty and are filled by name resolution and type checking respectively.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::symbol_table::Symbol;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.line, self.column)
    }
}

/// Root of a compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeclarationList {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Item {
    Decl(Decl),
    Function(FunctionDefinition),
}

/// Variable or array declaration; it is an array declaration iff `declared`
/// is an array type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decl {
    #[serde(default)]
    pub pos: Position,
    pub ident: Ident,
    pub declared: Type,
    #[serde(skip)]
    pub ty: Option<Type>,
}

impl Decl {
    pub fn is_array(&self) -> bool {
        matches!(self.declared, Type::Array { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    #[serde(default)]
    pub pos: Position,
    pub ident: Ident,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Block,
}

impl FunctionDefinition {
    pub fn func_type(&self) -> Type {
        Type::func(
            self.params.iter().map(|param| param.declared.clone()).collect(),
            self.ret.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub ident: Ident,
    pub declared: Type,
}

/// An identifier occurrence, either declaring or using a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    #[serde(default)]
    pub pos: Position,
    pub name: String,
    #[serde(skip)]
    pub symbol: Option<Symbol>,
}

impl Ident {
    pub fn new(name: &str) -> Self {
        Self {
            pos: Position::default(),
            name: name.to_owned(),
            symbol: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub pos: Position,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(default)]
    pub pos: Position,
    pub kind: StmtKind,
    #[serde(skip)]
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmtKind {
    Decl(Decl),
    Assign(Assignment),
    Call(Call),
    IfElse {
        cond: Expr,
        then: Block,
        else_: Block,
    },
    For {
        init: Assignment,
        cond: Expr,
        increment: Assignment,
        body: Block,
    },
    Break,
    Return(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default)]
    pub pos: Position,
    /// Either `ExprKind::Var` or `ExprKind::Index`.
    pub location: Expr,
    pub value: Expr,
    #[serde(skip)]
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub callee: Ident,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default)]
    pub pos: Position,
    pub kind: ExprKind,
    #[serde(skip)]
    pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    LiteralInt(i64),
    LiteralBool(bool),
    Var(Ident),
    Index { base: Ident, index: Box<Expr> },
    Call(Call),
    Op {
        op: Operation,
        lhs: Box<Expr>,
        /// Absent for `LogicNot`.
        rhs: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    Div,
    LogicAnd,
    LogicOr,
    LogicNot,
}

/// Shorthand constructors, mostly for fixtures. Positions default to `[0,0]`;
/// use the `at` methods to place a node.
pub mod build {
    use super::*;

    impl Expr {
        pub fn at(mut self, line: usize, column: usize) -> Self {
            self.pos = Position::new(line, column);
            match &mut self.kind {
                ExprKind::Var(ident) | ExprKind::Index { base: ident, .. } => ident.pos = self.pos,
                ExprKind::Call(call) => call.callee.pos = self.pos,
                _ => {}
            }
            self
        }
    }

    impl Stmt {
        pub fn at(mut self, line: usize, column: usize) -> Self {
            self.pos = Position::new(line, column);
            self
        }
    }

    impl FunctionDefinition {
        pub fn at(mut self, line: usize, column: usize) -> Self {
            self.pos = Position::new(line, column);
            self
        }
    }

    impl Decl {
        pub fn at(mut self, line: usize, column: usize) -> Self {
            self.pos = Position::new(line, column);
            self.ident.pos = self.pos;
            self
        }
    }

    fn expr(kind: ExprKind) -> Expr {
        Expr {
            pos: Position::default(),
            kind,
            ty: None,
        }
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt {
            pos: Position::default(),
            kind,
            ty: None,
        }
    }

    pub fn program(items: Vec<Item>) -> DeclarationList {
        DeclarationList { items }
    }

    pub fn global(name: &str, declared: Type) -> Item {
        Item::Decl(decl(name, declared))
    }

    pub fn decl(name: &str, declared: Type) -> Decl {
        Decl {
            pos: Position::default(),
            ident: Ident::new(name),
            declared,
            ty: None,
        }
    }

    pub fn function(
        name: &str,
        params: &[(&str, Type)],
        ret: Type,
        stmts: Vec<Stmt>,
    ) -> FunctionDefinition {
        FunctionDefinition {
            pos: Position::default(),
            ident: Ident::new(name),
            params: params
                .iter()
                .map(|(name, declared)| Param {
                    ident: Ident::new(name),
                    declared: declared.clone(),
                })
                .collect(),
            ret,
            body: block(stmts),
        }
    }

    pub fn block(stmts: Vec<Stmt>) -> Block {
        Block {
            pos: Position::default(),
            stmts,
        }
    }

    pub fn int(value: i64) -> Expr {
        expr(ExprKind::LiteralInt(value))
    }

    pub fn bool(value: bool) -> Expr {
        expr(ExprKind::LiteralBool(value))
    }

    pub fn var(name: &str) -> Expr {
        expr(ExprKind::Var(Ident::new(name)))
    }

    pub fn index(base: &str, index: Expr) -> Expr {
        expr(ExprKind::Index {
            base: Ident::new(base),
            index: Box::new(index),
        })
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Expr {
        expr(ExprKind::Call(Call {
            callee: Ident::new(callee),
            args,
        }))
    }

    pub fn binary(op: Operation, lhs: Expr, rhs: Expr) -> Expr {
        expr(ExprKind::Op {
            op,
            lhs: Box::new(lhs),
            rhs: Some(Box::new(rhs)),
        })
    }

    pub fn not(operand: Expr) -> Expr {
        expr(ExprKind::Op {
            op: Operation::LogicNot,
            lhs: Box::new(operand),
            rhs: None,
        })
    }

    pub fn assignment(location: Expr, value: Expr) -> Assignment {
        Assignment {
            pos: location.pos,
            location,
            value,
            ty: None,
        }
    }

    pub fn declare(name: &str, declared: Type) -> Stmt {
        stmt(StmtKind::Decl(decl(name, declared)))
    }

    pub fn assign(location: Expr, value: Expr) -> Stmt {
        let pos = location.pos;
        stmt(StmtKind::Assign(assignment(location, value))).at(pos.line, pos.column)
    }

    pub fn call_stmt(callee: &str, args: Vec<Expr>) -> Stmt {
        stmt(StmtKind::Call(Call {
            callee: Ident::new(callee),
            args,
        }))
    }

    pub fn if_else(cond: Expr, then: Vec<Stmt>, else_: Vec<Stmt>) -> Stmt {
        stmt(StmtKind::IfElse {
            cond,
            then: block(then),
            else_: block(else_),
        })
    }

    pub fn for_(init: Assignment, cond: Expr, increment: Assignment, body: Vec<Stmt>) -> Stmt {
        stmt(StmtKind::For {
            init,
            cond,
            increment,
            body: block(body),
        })
    }

    pub fn break_() -> Stmt {
        stmt(StmtKind::Break)
    }

    pub fn return_(value: Expr) -> Stmt {
        stmt(StmtKind::Return(Some(value)))
    }

    pub fn return_void() -> Stmt {
        stmt(StmtKind::Return(None))
    }
}
