// Compiler Context

use std::fmt;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::Arc;

#[derive(Debug)]
pub struct CCtx {
    pub symbol_ids: IdGen,
    /// Branch labels are numbered across the whole compilation unit.
    pub label_ids: IdGen,
}

impl CCtx {
    pub fn new() -> Self {
        Self {
            symbol_ids: IdGen::new(),
            label_ids: IdGen::new(),
        }
    }
}

impl Default for CCtx {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct IdGen {
    next_id: Arc<AtomicUsize>,
}

impl IdGen {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fresh(&self) -> usize {
        self.next_id.fetch_add(1, atomic::Ordering::Relaxed)
    }

    pub fn fresh_symbol(&self) -> SymbolId {
        SymbolId(self.fresh())
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a declaration; two symbols with the same name in different
/// scopes have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub usize);

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym{}", self.0)
    }
}
