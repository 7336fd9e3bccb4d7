use std::fmt;

use thiserror::Error;

use crate::ir::{Function, Inst, InstId, InstKind, Operand, Program, Variable, EDGE_TRUE};
use crate::types::Type;

#[derive(Debug, Error)]
pub enum IrValidationError {
    #[error("argument register out of range at {pos}")]
    InvalidArgument { pos: IrPosition },
    #[error("edge points outside the function at {pos}")]
    InvalidTarget { pos: IrPosition },
    #[error("jump is missing a successor at {pos}")]
    IncompleteJump { pos: IrPosition },
    #[error("unexpected second successor at {pos}")]
    UnexpectedBranch { pos: IrPosition },
    #[error("return has a successor at {pos}")]
    ReturnWithSuccessor { pos: IrPosition },
    #[error("invalid register at {pos}")]
    InvalidVariable { pos: IrPosition },
    #[error("invalid constant id at {pos}")]
    InvalidConstant { pos: IrPosition },
    #[error("call to {callee} passes {found} argument(s), expected {expected} at {pos}")]
    ArityMismatch {
        pos: IrPosition,
        callee: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IrPosition {
    pub function: String,
    pub inst: Option<InstId>,
}

impl fmt::Display for IrPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}", self.function)?;
        if let Some(inst) = self.inst {
            write!(f, ", {}", inst)?;
        }
        Ok(())
    }
}

impl Program {
    pub fn validate(&self) -> Result<(), IrValidationError> {
        for function in &self.functions {
            function.validate(self)?;
        }
        Ok(())
    }
}

impl Function {
    pub fn validate(&self, program: &Program) -> Result<(), IrValidationError> {
        let pos = IrPosition {
            function: self.name.clone(),
            inst: None,
        };
        if self.get(self.start).is_none() {
            return Err(IrValidationError::InvalidTarget { pos });
        }
        if self.args.iter().any(|arg| arg.0 >= self.num_temp_vars()) {
            return Err(IrValidationError::InvalidArgument { pos });
        }
        for id in self.reachable() {
            self.inst(id).validate(
                program,
                self,
                IrPosition {
                    inst: Some(id),
                    ..pos.clone()
                },
            )?;
        }
        Ok(())
    }
}

impl Inst {
    pub fn validate(
        &self,
        program: &Program,
        function: &Function,
        pos: IrPosition,
    ) -> Result<(), IrValidationError> {
        if self
            .successors()
            .any(|target| function.get(target).is_none())
        {
            return Err(IrValidationError::InvalidTarget { pos });
        }
        match &self.kind {
            InstKind::Jump { .. } => {
                if self.successors().count() != 2 {
                    return Err(IrValidationError::IncompleteJump { pos });
                }
            }
            InstKind::Return { .. } => {
                if self.successors().next().is_some() {
                    return Err(IrValidationError::ReturnWithSuccessor { pos });
                }
            }
            _ => {
                if self.next(EDGE_TRUE).is_some() {
                    return Err(IrValidationError::UnexpectedBranch { pos });
                }
            }
        }

        let registers_ok = self
            .dst()
            .into_iter()
            .map(|var| match var {
                Variable::Local(var) => Operand::Local(var),
                Variable::Address(var) => Operand::Address(var),
            })
            .chain(self.operands())
            .all(|operand| match operand {
                Operand::Local(var) => var.0 < function.num_temp_vars(),
                Operand::Address(var) => var.0 < function.num_temp_address_vars(),
                Operand::Constant(_) => true,
            });
        if !registers_ok {
            return Err(IrValidationError::InvalidVariable { pos });
        }
        if let InstKind::Copy {
            src: Operand::Constant(id),
            ..
        } = &self.kind
        {
            if program.constant(*id).is_none() {
                return Err(IrValidationError::InvalidConstant { pos });
            }
        }

        if let InstKind::Call { callee, args, .. } = &self.kind {
            if let Some(Type::Func { params, .. }) = &callee.ty {
                if params.len() != args.len() {
                    return Err(IrValidationError::ArityMismatch {
                        pos,
                        callee: callee.name.clone(),
                        expected: params.len(),
                        found: args.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ir::testing::insts::*;
    use crate::ir::testing::FunctionTestingExt;
    use crate::ir::{BinaryOp, ConstantId, Constant, LocalVar, EDGE_FALSE, EDGE_NEXT};

    fn void_fn() -> Type {
        Type::func(vec![], Type::void())
    }

    fn program_of(function: Function) -> Program {
        let mut program = Program::new();
        program.intern(Constant::Int(1));
        program.functions.push(function);
        program
    }

    #[test]
    fn test_valid_branching_function() {
        let f = Function::describe("f", void_fn(), 0, |desc, (x, y)| {
            let (entry, jump) = desc.chain(vec![copy_const(x, ConstantId(0)), jump(x)]);
            let (then, _) = desc.chain(vec![not(y, x), return_(None)]);
            let (else_, _) = desc.chain(vec![return_(None)]);
            desc.start(entry)
                .link(jump, EDGE_TRUE, then)
                .link(jump, EDGE_FALSE, else_);
        });
        program_of(f).validate().unwrap();
    }

    #[test]
    fn test_jump_needs_both_edges() {
        let f = Function::describe("f", void_fn(), 0, |desc, (x,)| {
            let (entry, jump) = desc.chain(vec![copy_const(x, ConstantId(0)), jump(x)]);
            let (then, _) = desc.chain(vec![return_(None)]);
            desc.start(entry).link(jump, EDGE_TRUE, then);
        });
        let err = program_of(f).validate().unwrap_err();
        assert!(matches!(err, IrValidationError::IncompleteJump { .. }));
        assert_eq!(
            err.to_string(),
            "jump is missing a successor at function f, i2"
        );
    }

    #[test]
    fn test_return_is_terminal() {
        let f = Function::describe("f", void_fn(), 0, |desc, ()| {
            let (ret, _) = desc.chain(vec![return_(None), nop()]);
            desc.start(ret);
        });
        assert!(matches!(
            program_of(f).validate(),
            Err(IrValidationError::ReturnWithSuccessor { .. })
        ));
    }

    #[test]
    fn test_register_out_of_range() {
        let f = Function::describe("f", void_fn(), 0, |desc, (x,)| {
            let (entry, _) = desc.chain(vec![binary(BinaryOp::Add, x, x, LocalVar(7))]);
            desc.start(entry);
        });
        assert!(matches!(
            program_of(f).validate(),
            Err(IrValidationError::InvalidVariable { .. })
        ));
    }

    #[test]
    fn test_unknown_constant() {
        let f = Function::describe("f", void_fn(), 0, |desc, (x,)| {
            let (entry, _) = desc.chain(vec![copy_const(x, ConstantId(3))]);
            desc.start(entry);
        });
        assert!(matches!(
            program_of(f).validate(),
            Err(IrValidationError::InvalidConstant { .. })
        ));
    }

    #[test]
    fn test_call_arity() {
        let callee = symbol(0, "printInt", Type::func(vec![Type::int()], Type::void()));
        let f = Function::describe("f", void_fn(), 0, |desc, ()| {
            let (entry, _) = desc.chain(vec![call(None, callee, vec![])]);
            desc.start(entry);
        });
        let err = program_of(f).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "call to printInt passes 0 argument(s), expected 1 at function f, i1"
        );
    }

    #[test]
    fn test_dangling_edge() {
        let f = Function::describe("f", void_fn(), 0, |desc, ()| {
            let (entry, last) = desc.chain(vec![nop()]);
            desc.start(entry).link(last, EDGE_NEXT, InstId(99));
        });
        assert!(matches!(
            program_of(f).validate(),
            Err(IrValidationError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_unreachable_instructions_are_ignored() {
        let f = Function::describe("f", void_fn(), 0, |desc, ()| {
            let (entry, _) = desc.chain(vec![return_(None)]);
            // dead code with a bogus constant
            desc.chain(vec![copy_const(LocalVar(0), ConstantId(42))]);
            desc.start(entry);
        });
        program_of(f).validate().unwrap();
    }
}
