use std::collections::HashMap;
use std::fmt;

use crate::ast::Position;
use crate::cctx::{IdGen, SymbolId};
use crate::diagnostics::Diagnostic;
use crate::types::Type;

/// A named declaration: function, global variable or array, parameter or local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    /// `None` exactly when `error` is set.
    pub ty: Option<Type>,
    pub error: Option<SymbolError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolError {
    Declare,
    Resolve,
}

impl Symbol {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, &self.ty) {
            (Some(SymbolError::Declare), _) => write!(f, "Symbol({}:DeclareSymbolError)", self.name),
            (Some(SymbolError::Resolve), _) => write!(f, "Symbol({}:ResolveSymbolError)", self.name),
            (None, Some(ty)) => write!(f, "Symbol({}:{})", self.name, ty),
            (None, None) => write!(f, "Symbol({})", self.name),
        }
    }
}

/// Runtime-provided functions visible from every scope.
pub fn builtins() -> Vec<(&'static str, Type)> {
    vec![
        ("readInt", Type::func(vec![], Type::int())),
        ("readChar", Type::func(vec![], Type::int())),
        ("printBool", Type::func(vec![Type::bool()], Type::void())),
        ("printInt", Type::func(vec![Type::int()], Type::void())),
        ("printChar", Type::func(vec![Type::int()], Type::void())),
        ("println", Type::func(vec![], Type::void())),
    ]
}

/// Stack of lexical scopes. The bottom scope is the global one and starts out
/// holding the builtins.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
    ids: IdGen,
    errors: Vec<Diagnostic>,
}

impl SymbolTable {
    pub fn new(ids: IdGen) -> Self {
        let mut global = HashMap::new();
        for (name, ty) in builtins() {
            let symbol = Symbol {
                id: ids.fresh_symbol(),
                name: name.to_owned(),
                ty: Some(ty),
                error: None,
            };
            global.insert(name.to_owned(), symbol);
        }
        Self {
            scopes: vec![global],
            ids,
            errors: Vec::new(),
        }
    }

    pub fn enter(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn exit(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot exit the global scope");
        self.scopes.pop();
    }

    /// Declares `name` in the innermost scope. Shadowing an outer declaration
    /// is fine; redeclaring within the same scope is not.
    pub fn add(&mut self, pos: Position, name: &str, ty: Type) -> Symbol {
        let scope = self
            .scopes
            .last_mut()
            .expect("symbol table always holds the global scope");
        if scope.contains_key(name) {
            log::trace!("duplicate declaration of {} at {}", name, pos);
            self.errors.push(Diagnostic::DeclareSymbol {
                pos,
                name: name.to_owned(),
            });
            return Symbol {
                id: self.ids.fresh_symbol(),
                name: name.to_owned(),
                ty: None,
                error: Some(SymbolError::Declare),
            };
        }
        let symbol = Symbol {
            id: self.ids.fresh_symbol(),
            name: name.to_owned(),
            ty: Some(ty),
            error: None,
        };
        scope.insert(name.to_owned(), symbol.clone());
        symbol
    }

    pub fn lookup(&mut self, pos: Position, name: &str) -> Symbol {
        if let Some(symbol) = self.find(name) {
            return symbol.clone();
        }
        log::trace!("unresolved name {} at {}", name, pos);
        self.errors.push(Diagnostic::ResolveSymbol {
            pos,
            name: name.to_owned(),
        });
        Symbol {
            id: self.ids.fresh_symbol(),
            name: name.to_owned(),
            ty: None,
            error: Some(SymbolError::Resolve),
        }
    }

    fn find(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn has_encountered_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Diagnostic> {
        self.errors
    }
}
