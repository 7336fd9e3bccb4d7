use std::fmt;

use serde::{Deserialize, Serialize};

/// Value types of the source language.
///
/// `Error` is produced instead of failing: every operation below is total and
/// yields an `Error` carrying a message when the operands do not fit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    Bool,
    Void,
    Array { base: Box<Type>, extent: u64 },
    Func { params: Vec<Type>, ret: Box<Type> },
    Error { message: String },
}

impl Type {
    pub fn int() -> Self {
        Type::Int
    }
    pub fn bool() -> Self {
        Type::Bool
    }
    pub fn void() -> Self {
        Type::Void
    }
    pub fn array(extent: u64, base: Type) -> Self {
        Type::Array {
            base: Box::new(base),
            extent,
        }
    }
    pub fn func(params: Vec<Type>, ret: Type) -> Self {
        Type::Func {
            params,
            ret: Box::new(ret),
        }
    }
    pub fn error(message: impl Into<String>) -> Self {
        Type::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Structural equivalence. `Error` is not equivalent to anything, itself included.
    pub fn equivalent(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Int, Type::Int) | (Type::Bool, Type::Bool) | (Type::Void, Type::Void) => true,
            (
                Type::Array {
                    base: base1,
                    extent: extent1,
                },
                Type::Array {
                    base: base2,
                    extent: extent2,
                },
            ) => extent1 == extent2 && base1.equivalent(base2),
            (
                Type::Func {
                    params: params1,
                    ret: ret1,
                },
                Type::Func {
                    params: params2,
                    ret: ret2,
                },
            ) => ret1.equivalent(ret2) && list_equivalent(params1, params2),
            _ => false,
        }
    }

    pub fn add(&self, that: &Type) -> Type {
        self.arith(that, || format!("cannot add {} with {}", self, that))
    }

    pub fn sub(&self, that: &Type) -> Type {
        self.arith(that, || format!("cannot subtract {} from {}", that, self))
    }

    pub fn mul(&self, that: &Type) -> Type {
        self.arith(that, || format!("cannot multiply {} with {}", self, that))
    }

    pub fn div(&self, that: &Type) -> Type {
        self.arith(that, || format!("cannot divide {} by {}", self, that))
    }

    fn arith(&self, that: &Type, message: impl FnOnce() -> String) -> Type {
        if let Some(err) = propagate(&[self, that]) {
            return err;
        }
        match (self, that) {
            (Type::Int, Type::Int) => Type::Int,
            _ => Type::error(message()),
        }
    }

    pub fn compare(&self, that: &Type) -> Type {
        if let Some(err) = propagate(&[self, that]) {
            return err;
        }
        match (self, that) {
            (Type::Int, Type::Int) => Type::Bool,
            _ => Type::error(format!("cannot compare {} with {}", self, that)),
        }
    }

    pub fn and(&self, that: &Type) -> Type {
        if let Some(err) = propagate(&[self, that]) {
            return err;
        }
        match (self, that) {
            (Type::Bool, Type::Bool) => Type::Bool,
            _ => Type::error(format!("cannot compute {} and {}", self, that)),
        }
    }

    pub fn or(&self, that: &Type) -> Type {
        if let Some(err) = propagate(&[self, that]) {
            return err;
        }
        match (self, that) {
            (Type::Bool, Type::Bool) => Type::Bool,
            _ => Type::error(format!("cannot compute {} or {}", self, that)),
        }
    }

    pub fn not(&self) -> Type {
        if let Some(err) = propagate(&[self]) {
            return err;
        }
        match self {
            Type::Bool => Type::Bool,
            _ => Type::error(format!("cannot negate {}", self)),
        }
    }

    /// `self` is the location, `that` the assigned value.
    pub fn assign(&self, that: &Type) -> Type {
        if let Some(err) = propagate(&[self, that]) {
            return err;
        }
        match self {
            Type::Int | Type::Bool if self.equivalent(that) => self.clone(),
            _ => Type::error(format!("cannot assign {} to {}", that, self)),
        }
    }

    pub fn call(&self, args: &[Type]) -> Type {
        if let Some(err) = propagate(&[self]).or_else(|| propagate(&args.iter().collect::<Vec<_>>()))
        {
            return err;
        }
        match self {
            Type::Func { params, ret } if list_equivalent(params, args) => (**ret).clone(),
            _ => Type::error(format!("cannot call {} using {}", self, TypeList(args))),
        }
    }

    pub fn index(&self, that: &Type) -> Type {
        if let Some(err) = propagate(&[self, that]) {
            return err;
        }
        match (self, that) {
            (Type::Array { base, .. }, Type::Int) => (**base).clone(),
            _ => Type::error(format!("cannot index {} with {}", self, that)),
        }
    }
}

fn list_equivalent(list1: &[Type], list2: &[Type]) -> bool {
    list1.len() == list2.len()
        && list1
            .iter()
            .zip(list2.iter())
            .all(|(ty1, ty2)| ty1.equivalent(ty2))
}

// An operand that is already an error is handed through unchanged.
fn propagate(operands: &[&Type]) -> Option<Type> {
    operands.iter().find(|ty| ty.is_error()).map(|ty| (*ty).clone())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Void => write!(f, "void"),
            Type::Array { base, extent } => write!(f, "array[{},{}]", extent, base),
            Type::Func { params, ret } => write!(f, "func{}:{}", TypeList(params), ret),
            Type::Error { message } => write!(f, "error({})", message),
        }
    }
}

/// Parenthesized, comma separated rendering of an argument/parameter list.
pub struct TypeList<'a>(pub &'a [Type]);

impl fmt::Display for TypeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, ty) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
        }
        write!(f, ")")
    }
}
