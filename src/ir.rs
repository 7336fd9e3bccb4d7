// IR -- control-flow graph of instructions over virtual registers

use std::collections::VecDeque;
use std::fmt;

use bit_set::BitSet;
use indexmap::IndexSet;

use crate::symbol_table::Symbol;
use crate::types::Type;

/// Everything produced from one compilation unit.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub globals: Vec<GlobalDecl>,
    pub functions: Vec<Function>,
    constants: IndexSet<Constant>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle of `constant`, adding it to the pool on first use.
    pub fn intern(&mut self, constant: Constant) -> ConstantId {
        let (index, _) = self.constants.insert_full(constant);
        ConstantId(index)
    }

    pub fn constant(&self, id: ConstantId) -> Option<Constant> {
        self.constants.get_index(id.0).copied()
    }

    pub fn num_constants(&self) -> usize {
        self.constants.len()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Bool(bool),
}

impl Constant {
    /// Machine word holding the constant; booleans are 0 or 1.
    pub fn word(self) -> i64 {
        match self {
            Constant::Int(value) => value,
            Constant::Bool(value) => value as i64,
        }
    }
}

/// Storage reserved for a global scalar (one element) or array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDecl {
    pub symbol: Symbol,
    pub num_elements: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstantId(pub usize);

/// Virtual register holding a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalVar(pub usize);

/// Virtual register holding a memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressVar(pub usize);

/// Handle of an instruction inside its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    Local(LocalVar),
    Address(AddressVar),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Local(LocalVar),
    Address(AddressVar),
    Constant(ConstantId),
}

impl From<LocalVar> for Operand {
    fn from(var: LocalVar) -> Self {
        Operand::Local(var)
    }
}

impl From<AddressVar> for Operand {
    fn from(var: AddressVar) -> Self {
        Operand::Address(var)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
}

/// Edge 0 is the sequential (or false) successor; edge 1 is only used by
/// `Jump` for its true successor.
pub const EDGE_NEXT: usize = 0;
pub const EDGE_FALSE: usize = 0;
pub const EDGE_TRUE: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub kind: InstKind,
    next: [Option<InstId>; 2],
}

impl Inst {
    pub fn new(kind: InstKind) -> Self {
        Self {
            kind,
            next: [None, None],
        }
    }

    pub fn next(&self, edge: usize) -> Option<InstId> {
        self.next[edge]
    }

    pub fn successors(&self) -> impl Iterator<Item = InstId> + '_ {
        self.next.iter().flatten().copied()
    }

    pub fn dst(&self) -> Option<Variable> {
        self.kind.dst()
    }

    pub fn operands(&self) -> Vec<Operand> {
        self.kind.operands()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// Address of `base`, plus `offset` elements when indexing an array.
    AddressAt {
        dst: AddressVar,
        base: Symbol,
        offset: Option<LocalVar>,
    },
    BinaryOperator {
        op: BinaryOp,
        dst: LocalVar,
        lhs: LocalVar,
        rhs: LocalVar,
    },
    Compare {
        predicate: Predicate,
        dst: LocalVar,
        lhs: LocalVar,
        rhs: LocalVar,
    },
    Copy {
        dst: LocalVar,
        src: Operand,
    },
    Load {
        dst: LocalVar,
        src: AddressVar,
    },
    Store {
        src: LocalVar,
        dst: AddressVar,
    },
    Call {
        dst: Option<LocalVar>,
        callee: Symbol,
        args: Vec<LocalVar>,
    },
    Return {
        value: Option<LocalVar>,
    },
    /// Two-way branch on a boolean register.
    Jump {
        cond: LocalVar,
    },
    UnaryNot {
        dst: LocalVar,
        operand: LocalVar,
    },
    Nop,
}

impl InstKind {
    pub fn dst(&self) -> Option<Variable> {
        match self {
            InstKind::AddressAt { dst, .. } => Some(Variable::Address(*dst)),
            InstKind::BinaryOperator { dst, .. }
            | InstKind::Compare { dst, .. }
            | InstKind::Copy { dst, .. }
            | InstKind::Load { dst, .. }
            | InstKind::UnaryNot { dst, .. } => Some(Variable::Local(*dst)),
            InstKind::Call { dst, .. } => dst.map(Variable::Local),
            InstKind::Store { .. }
            | InstKind::Return { .. }
            | InstKind::Jump { .. }
            | InstKind::Nop => None,
        }
    }

    /// Registers and constants read by the instruction, in evaluation order.
    /// `Store` reads its destination address register too.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            InstKind::AddressAt { offset, .. } => offset.iter().map(|&var| var.into()).collect(),
            InstKind::BinaryOperator { lhs, rhs, .. } | InstKind::Compare { lhs, rhs, .. } => {
                vec![(*lhs).into(), (*rhs).into()]
            }
            InstKind::Copy { src, .. } => vec![*src],
            InstKind::Load { src, .. } => vec![(*src).into()],
            InstKind::Store { src, dst } => vec![(*src).into(), (*dst).into()],
            InstKind::Call { args, .. } => args.iter().map(|&var| var.into()).collect(),
            InstKind::Return { value } => value.iter().map(|&var| var.into()).collect(),
            InstKind::Jump { cond } => vec![(*cond).into()],
            InstKind::UnaryNot { operand, .. } => vec![(*operand).into()],
            InstKind::Nop => vec![],
        }
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, InstKind::Jump { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self, InstKind::Return { .. })
    }
}

/// One function's instruction graph. The function owns all of its
/// instructions and virtual registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    /// Always a `Type::Func`.
    pub ty: Type,
    pub args: Vec<LocalVar>,
    pub start: InstId,
    insts: Vec<Inst>,
    num_temp_vars: usize,
    num_temp_address_vars: usize,
}

impl Function {
    /// Creates a function whose body is a single `Nop`.
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_owned(),
            ty,
            args: vec![],
            start: InstId(0),
            insts: vec![Inst::new(InstKind::Nop)],
            num_temp_vars: 0,
            num_temp_address_vars: 0,
        }
    }

    pub fn fresh_var(&mut self) -> LocalVar {
        let var = LocalVar(self.num_temp_vars);
        self.num_temp_vars += 1;
        var
    }

    pub fn fresh_address_var(&mut self) -> AddressVar {
        let var = AddressVar(self.num_temp_address_vars);
        self.num_temp_address_vars += 1;
        var
    }

    pub fn num_temp_vars(&self) -> usize {
        self.num_temp_vars
    }

    pub fn num_temp_address_vars(&self) -> usize {
        self.num_temp_address_vars
    }

    pub fn ret_type(&self) -> &Type {
        static VOID: Type = Type::Void;
        match &self.ty {
            Type::Func { ret, .. } => ret,
            _ => &VOID,
        }
    }

    pub fn push(&mut self, kind: InstKind) -> InstId {
        let id = InstId(self.insts.len());
        self.insts.push(Inst::new(kind));
        id
    }

    pub fn set_next(&mut self, from: InstId, edge: usize, to: InstId) {
        self.insts[from.0].next[edge] = Some(to);
    }

    pub fn next(&self, id: InstId, edge: usize) -> Option<InstId> {
        self.insts.get(id.0).and_then(|inst| inst.next[edge])
    }

    pub fn get(&self, id: InstId) -> Option<&Inst> {
        self.insts.get(id.0)
    }

    /// Panics on a handle from another function.
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.0]
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Instructions reachable from `start`, breadth first. Edges pointing
    /// outside the arena are skipped.
    pub fn reachable(&self) -> Vec<InstId> {
        let mut seen = BitSet::with_capacity(self.insts.len());
        let mut order = vec![];
        let mut queue = VecDeque::from([self.start]);
        seen.insert(self.start.0);
        while let Some(id) = queue.pop_front() {
            let Some(inst) = self.get(id) else {
                continue;
            };
            order.push(id);
            for next in inst.successors() {
                if next.0 < self.insts.len() && seen.insert(next.0) {
                    queue.push_back(next);
                }
            }
        }
        order
    }
}

impl fmt::Display for LocalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%t{}", self.0)
    }
}

impl fmt::Display for AddressVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%a{}", self.0)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local(var) => write!(f, "{}", var),
            Operand::Address(var) => write!(f, "{}", var),
            Operand::Constant(id) => write!(f, "c{}", id.0),
        }
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstKind::AddressAt { dst, base, offset } => match offset {
                Some(offset) => write!(f, "{} = addressAt {}, {}", dst, base.name, offset),
                None => write!(f, "{} = addressAt {}", dst, base.name),
            },
            InstKind::BinaryOperator { op, dst, lhs, rhs } => {
                let op = match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Sub => "sub",
                    BinaryOp::Mul => "mul",
                    BinaryOp::Div => "div",
                };
                write!(f, "{} = {} {}, {}", dst, op, lhs, rhs)
            }
            InstKind::Compare {
                predicate,
                dst,
                lhs,
                rhs,
            } => write!(f, "{} = cmp {:?} {}, {}", dst, predicate, lhs, rhs),
            InstKind::Copy { dst, src } => write!(f, "{} = {}", dst, src),
            InstKind::Load { dst, src } => write!(f, "{} = load {}", dst, src),
            InstKind::Store { src, dst } => write!(f, "store {}, {}", src, dst),
            InstKind::Call { dst, callee, args } => {
                if let Some(dst) = dst {
                    write!(f, "{} = ", dst)?;
                }
                write!(f, "call {}(", callee.name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            InstKind::Return { value: Some(value) } => write!(f, "return {}", value),
            InstKind::Return { value: None } => write!(f, "return"),
            InstKind::Jump { cond } => write!(f, "jump {}", cond),
            InstKind::UnaryNot { dst, operand } => write!(f, "{} = not {}", dst, operand),
            InstKind::Nop => write!(f, "nop"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        writeln!(f, "): {}", self.ret_type())?;
        for id in self.reachable() {
            let inst = self.inst(id);
            write!(f, "  {}: {}", id, inst.kind)?;
            match (inst.next(EDGE_FALSE), inst.next(EDGE_TRUE)) {
                (Some(on_false), Some(on_true)) => writeln!(f, " ? {} : {}", on_true, on_false)?,
                (Some(next), None) => writeln!(f, " -> {}", next)?,
                _ => writeln!(f)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, constant) in self.constants.iter().enumerate() {
            match constant {
                Constant::Int(value) => writeln!(f, "const c{} = {}", i, value)?,
                Constant::Bool(value) => writeln!(f, "const c{} = {}", i, value)?,
            }
        }
        for global in &self.globals {
            writeln!(f, "global {}[{}]", global.symbol.name, global.num_elements)?;
        }
        for function in &self.functions {
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
