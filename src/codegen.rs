//! x86-64 assembly (AT&T syntax) for a lowered program.
//!
//! Every virtual register lives in its own 8-byte stack slot below `%rbp`;
//! `%r10`, `%r11` and `%rax` are scratch. Booleans are 0/1 words.

use std::collections::HashMap;
use std::io;

use bit_set::BitSet;
use thiserror::Error;

use crate::cctx::CCtx;
use crate::ir::{
    AddressVar, BinaryOp, Constant, ConstantId, Function, InstId, InstKind, LocalVar, Operand,
    Predicate, Program, Variable, EDGE_FALSE, EDGE_NEXT, EDGE_TRUE,
};
use crate::sink::CodeSink;

const WORD_SIZE: u64 = 8;
const ARG_REGISTERS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("failed to write assembly: {0}")]
    Io(#[from] io::Error),
    #[error("unknown constant c{} in {function}", constant.0)]
    UnknownConstant {
        function: String,
        constant: ConstantId,
    },
    #[error("jump {inst} in {function} lacks a successor")]
    IncompleteJump { function: String, inst: InstId },
    #[error("no label for {inst} in {function}")]
    MissingLabel { function: String, inst: InstId },
}

macro_rules! emit {
    ($gen:expr, $($arg:tt)*) => {{
        let line = format!("    {}", format_args!($($arg)*));
        $gen.sink.append(&line)?;
    }};
}

pub fn generate(
    cctx: &CCtx,
    program: &Program,
    sink: &mut dyn CodeSink,
) -> Result<(), CodegenError> {
    for global in &program.globals {
        sink.append(&format!(
            "    .comm {}, {}, {}",
            global.symbol.name,
            global.num_elements * WORD_SIZE,
            WORD_SIZE
        ))?;
    }
    for function in &program.functions {
        FunctionCodegen {
            cctx,
            program,
            function,
            sink: &mut *sink,
            slots: HashMap::new(),
            labels: HashMap::new(),
        }
        .generate()?;
    }
    Ok(())
}

/// Emission order: depth first from `start`, each instruction once. After a
/// jump the true successor is scheduled next so it can fall through.
pub fn schedule(function: &Function) -> Vec<InstId> {
    let mut order = vec![];
    let mut seen = BitSet::with_capacity(function.num_insts());
    let mut stack = vec![function.start];
    while let Some(id) = stack.pop() {
        if !seen.insert(id.0) {
            continue;
        }
        order.push(id);
        let Some(inst) = function.get(id) else {
            continue;
        };
        if inst.kind.is_jump() {
            stack.extend(inst.next(EDGE_FALSE));
            stack.extend(inst.next(EDGE_TRUE));
        } else {
            stack.extend(inst.next(EDGE_NEXT));
        }
    }
    order
}

struct FunctionCodegen<'a> {
    cctx: &'a CCtx,
    program: &'a Program,
    function: &'a Function,
    sink: &'a mut dyn CodeSink,
    /// Slot numbers in first-use order, starting at 1.
    slots: HashMap<Variable, usize>,
    labels: HashMap<InstId, usize>,
}

impl FunctionCodegen<'_> {
    fn generate(mut self) -> Result<(), CodegenError> {
        let order = schedule(self.function);
        log::debug!(
            "generating {} ({} of {} instructions reachable)",
            self.function.name,
            order.len(),
            self.function.num_insts()
        );
        self.assign_labels(&order);

        let function = self.function;
        emit!(self, ".globl {}", function.name);
        self.sink.append(&format!("{}:", function.name))?;
        let mut frame = function.num_temp_vars() + function.num_temp_address_vars();
        frame += frame % 2;
        emit!(self, "enter $({} * {}), $0", WORD_SIZE, frame);
        self.bind_args()?;

        for (pos, &id) in order.iter().enumerate() {
            if let Some(label) = self.labels.get(&id) {
                self.sink.append(&format!(".L{}:", label))?;
            }
            log::trace!("{}: {}", id, function.inst(id).kind);
            self.generate_inst(id)?;
            self.generate_exit(id, order.get(pos + 1).copied())?;
        }
        Ok(())
    }

    /// Labels every successor that is not reached by falling through, plus
    /// every false target of a jump.
    fn assign_labels(&mut self, order: &[InstId]) {
        let positions = order
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos))
            .collect::<HashMap<_, _>>();
        let function = self.function;
        for (pos, &id) in order.iter().enumerate() {
            let inst = function.inst(id);
            for edge in [EDGE_FALSE, EDGE_TRUE] {
                let Some(target) = inst.next(edge) else {
                    continue;
                };
                let falls_through = positions.get(&target) == Some(&(pos + 1));
                let needs_label = (inst.kind.is_jump() && edge == EDGE_FALSE) || !falls_through;
                if needs_label && !self.labels.contains_key(&target) {
                    self.labels.insert(target, self.cctx.label_ids.fresh());
                }
            }
        }
    }

    fn label(&self, inst: InstId) -> Result<String, CodegenError> {
        self.labels
            .get(&inst)
            .map(|label| format!(".L{}", label))
            .ok_or_else(|| CodegenError::MissingLabel {
                function: self.function.name.clone(),
                inst,
            })
    }

    fn slot(&mut self, var: Variable) -> String {
        let next = self.slots.len() + 1;
        let index = *self.slots.entry(var).or_insert(next);
        format!("-{}(%rbp)", index as u64 * WORD_SIZE)
    }

    fn local(&mut self, var: LocalVar) -> String {
        self.slot(Variable::Local(var))
    }

    fn address(&mut self, var: AddressVar) -> String {
        self.slot(Variable::Address(var))
    }

    fn bind_args(&mut self) -> Result<(), CodegenError> {
        let function = self.function;
        for (i, &arg) in function.args.iter().enumerate() {
            let slot = self.local(arg);
            match ARG_REGISTERS.get(i) {
                Some(register) => emit!(self, "movq {}, {}", register, slot),
                None => {
                    // above the saved %rbp and the return address
                    let offset = 2 * WORD_SIZE + (i - ARG_REGISTERS.len()) as u64 * WORD_SIZE;
                    emit!(self, "movq {}(%rbp), %r10", offset);
                    emit!(self, "movq %r10, {}", slot);
                }
            }
        }
        Ok(())
    }

    fn load_operand(&mut self, operand: Operand, register: &str) -> Result<(), CodegenError> {
        match operand {
            Operand::Local(var) => {
                let slot = self.local(var);
                emit!(self, "movq {}, {}", slot, register);
            }
            Operand::Address(var) => {
                let slot = self.address(var);
                emit!(self, "movq {}, {}", slot, register);
            }
            Operand::Constant(id) => {
                let value = self
                    .program
                    .constant(id)
                    .map(Constant::word)
                    .ok_or_else(|| CodegenError::UnknownConstant {
                        function: self.function.name.clone(),
                        constant: id,
                    })?;
                if i32::try_from(value).is_ok() {
                    emit!(self, "movq ${}, {}", value, register);
                } else {
                    emit!(self, "movabsq ${}, {}", value, register);
                }
            }
        }
        Ok(())
    }

    fn store_local(&mut self, register: &str, var: LocalVar) -> Result<(), CodegenError> {
        let slot = self.local(var);
        emit!(self, "movq {}, {}", register, slot);
        Ok(())
    }

    fn generate_inst(&mut self, id: InstId) -> Result<(), CodegenError> {
        let function = self.function;
        match &function.inst(id).kind {
            InstKind::Nop | InstKind::Jump { .. } => {}
            InstKind::Copy { dst, src } => {
                self.load_operand(*src, "%r10")?;
                self.store_local("%r10", *dst)?;
            }
            InstKind::BinaryOperator { op, dst, lhs, rhs } => {
                let mnemonic = match op {
                    BinaryOp::Add => "addq",
                    BinaryOp::Sub => "subq",
                    BinaryOp::Mul => "imulq",
                    BinaryOp::Div => {
                        self.load_operand((*lhs).into(), "%rax")?;
                        emit!(self, "cqto");
                        self.load_operand((*rhs).into(), "%r10")?;
                        emit!(self, "idivq %r10");
                        self.store_local("%rax", *dst)?;
                        return Ok(());
                    }
                };
                self.load_operand((*lhs).into(), "%r10")?;
                self.load_operand((*rhs).into(), "%r11")?;
                emit!(self, "{} %r11, %r10", mnemonic);
                self.store_local("%r10", *dst)?;
            }
            InstKind::Compare {
                predicate,
                dst,
                lhs,
                rhs,
            } => {
                let cmov = match predicate {
                    Predicate::Ge => "cmovgeq",
                    Predicate::Gt => "cmovgq",
                    Predicate::Le => "cmovleq",
                    Predicate::Lt => "cmovlq",
                    Predicate::Eq => "cmoveq",
                    Predicate::Ne => "cmovneq",
                };
                emit!(self, "movq $0, %rax");
                emit!(self, "movq $1, %r10");
                self.load_operand((*lhs).into(), "%r11")?;
                let rhs = self.local(*rhs);
                emit!(self, "cmpq {}, %r11", rhs);
                emit!(self, "{} %r10, %rax", cmov);
                self.store_local("%rax", *dst)?;
            }
            InstKind::UnaryNot { dst, operand } => {
                self.load_operand((*operand).into(), "%r10")?;
                emit!(self, "xorq $1, %r10");
                self.store_local("%r10", *dst)?;
            }
            InstKind::AddressAt { dst, base, offset } => {
                emit!(self, "movq {}@GOTPCREL(%rip), %r11", base.name);
                if let Some(offset) = offset {
                    self.load_operand((*offset).into(), "%r10")?;
                    emit!(self, "imulq ${}, %r10", WORD_SIZE);
                    emit!(self, "addq %r10, %r11");
                }
                let dst = self.address(*dst);
                emit!(self, "movq %r11, {}", dst);
            }
            InstKind::Load { dst, src } => {
                self.load_operand((*src).into(), "%r10")?;
                emit!(self, "movq 0(%r10), %r10");
                self.store_local("%r10", *dst)?;
            }
            InstKind::Store { src, dst } => {
                self.load_operand((*dst).into(), "%r11")?;
                self.load_operand((*src).into(), "%r10")?;
                emit!(self, "movq %r10, 0(%r11)");
            }
            InstKind::Call { dst, callee, args } => {
                let (in_registers, on_stack) =
                    args.split_at(args.len().min(ARG_REGISTERS.len()));
                for (arg, register) in in_registers.iter().zip(ARG_REGISTERS) {
                    self.load_operand((*arg).into(), register)?;
                }
                // keep %rsp 16-byte aligned at the call
                let padding = on_stack.len() % 2;
                if padding == 1 {
                    emit!(self, "subq ${}, %rsp", WORD_SIZE);
                }
                for arg in on_stack.iter().rev() {
                    let slot = self.local(*arg);
                    emit!(self, "pushq {}", slot);
                }
                emit!(self, "call {}", callee.name);
                let pushed = (on_stack.len() + padding) as u64 * WORD_SIZE;
                if pushed > 0 {
                    emit!(self, "addq ${}, %rsp", pushed);
                }
                if let Some(dst) = dst {
                    self.store_local("%rax", *dst)?;
                }
            }
            InstKind::Return { value } => {
                if let Some(value) = value {
                    self.load_operand((*value).into(), "%rax")?;
                }
            }
        }
        Ok(())
    }

    /// Control transfer after an instruction: a conditional branch, a jump
    /// when the successor does not follow, or the epilogue.
    fn generate_exit(&mut self, id: InstId, fallthrough: Option<InstId>) -> Result<(), CodegenError> {
        let function = self.function;
        let inst = function.inst(id);
        if let InstKind::Jump { cond } = inst.kind {
            let incomplete = || CodegenError::IncompleteJump {
                function: function.name.clone(),
                inst: id,
            };
            let on_false = inst.next(EDGE_FALSE).ok_or_else(incomplete)?;
            let on_true = inst.next(EDGE_TRUE).ok_or_else(incomplete)?;
            self.load_operand(cond.into(), "%r10")?;
            emit!(self, "cmpq $0, %r10");
            let label = self.label(on_false)?;
            emit!(self, "je {}", label);
            if fallthrough != Some(on_true) {
                let label = self.label(on_true)?;
                emit!(self, "jmp {}", label);
            }
            return Ok(());
        }
        match inst.next(EDGE_NEXT) {
            Some(next) if fallthrough == Some(next) => {}
            Some(next) => {
                let label = self.label(next)?;
                emit!(self, "jmp {}", label);
            }
            None => {
                emit!(self, "leave");
                emit!(self, "ret");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::ir::testing::insts::*;
    use crate::ir::testing::FunctionTestingExt;
    use crate::ir::{GlobalDecl, EDGE_NEXT};
    use crate::types::Type;

    fn generate_to_string(program: &Program) -> String {
        let mut out = String::new();
        generate(&CCtx::new(), program, &mut out).unwrap();
        out
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn test_straight_line_function() {
        let ty = Type::func(vec![Type::int(), Type::int()], Type::int());
        let f = Function::describe("sum", ty, 2, |desc, (x, y, z)| {
            let (entry, _) = desc.chain(vec![
                binary(BinaryOp::Add, z, x, y),
                return_(Some(z)),
            ]);
            desc.start(entry);
        });
        let mut program = Program::new();
        program.functions.push(f);
        assert_eq!(
            lines(&generate_to_string(&program)),
            vec![
                "    .globl sum",
                "sum:",
                "    enter $(8 * 4), $0",
                "    movq %rdi, -8(%rbp)",
                "    movq %rsi, -16(%rbp)",
                "    movq -8(%rbp), %r10",
                "    movq -16(%rbp), %r11",
                "    addq %r11, %r10",
                "    movq %r10, -24(%rbp)",
                "    movq -24(%rbp), %rax",
                "    leave",
                "    ret",
            ]
        );
    }

    #[test]
    fn test_subtract_and_multiply() {
        let ty = Type::func(vec![Type::int(), Type::int()], Type::int());
        let f = Function::describe("f", ty, 2, |desc, (x, y, d, p)| {
            let (entry, _) = desc.chain(vec![
                binary(BinaryOp::Sub, d, x, y),
                binary(BinaryOp::Mul, p, d, x),
                return_(Some(p)),
            ]);
            desc.start(entry);
        });
        let mut program = Program::new();
        program.functions.push(f);
        assert_eq!(
            lines(&generate_to_string(&program))[5..15].to_vec(),
            vec![
                "    movq -8(%rbp), %r10",
                "    movq -16(%rbp), %r11",
                "    subq %r11, %r10",
                "    movq %r10, -24(%rbp)",
                "    movq -24(%rbp), %r10",
                "    movq -8(%rbp), %r11",
                "    imulq %r11, %r10",
                "    movq %r10, -32(%rbp)",
                "    movq -32(%rbp), %rax",
                "    leave",
            ]
        );
    }

    #[test]
    fn test_jump_falls_through_on_true() {
        let mut program = Program::new();
        let one = program.intern(Constant::Bool(true));
        let f = Function::describe("f", Type::func(vec![], Type::void()), 0, |desc, (x,)| {
            let (entry, jump) = desc.chain(vec![copy_const(x, one), jump(x)]);
            let (then, _) = desc.chain(vec![return_(None)]);
            let (else_, _) = desc.chain(vec![return_(None)]);
            desc.start(entry)
                .link(jump, EDGE_TRUE, then)
                .link(jump, EDGE_FALSE, else_);
        });
        program.functions.push(f);
        assert_eq!(
            lines(&generate_to_string(&program)),
            vec![
                "    .globl f",
                "f:",
                "    enter $(8 * 2), $0",
                "    movq $1, %r10",
                "    movq %r10, -8(%rbp)",
                "    movq -8(%rbp), %r10",
                "    cmpq $0, %r10",
                "    je .L0",
                "    leave",
                "    ret",
                ".L0:",
                "    leave",
                "    ret",
            ]
        );
    }

    #[test]
    fn test_loop_back_edge_gets_label() {
        let mut program = Program::new();
        let one = program.intern(Constant::Int(1));
        let f = Function::describe("spin", Type::func(vec![], Type::void()), 0, |desc, (x,)| {
            let (entry, jump) = desc.chain(vec![copy_const(x, one), jump(x)]);
            let (body, _) = desc.chain(vec![nop()]);
            let (exit, _) = desc.chain(vec![return_(None)]);
            desc.start(entry)
                .link(jump, EDGE_TRUE, body)
                .link(jump, EDGE_FALSE, exit)
                .link(body, EDGE_NEXT, entry);
        });
        let order = schedule(&f);
        assert_eq!(order, vec![InstId(1), InstId(2), InstId(3), InstId(4)]);
        program.functions.push(f);
        assert_eq!(
            lines(&generate_to_string(&program))[3..].to_vec(),
            vec![
                ".L1:",
                "    movq $1, %r10",
                "    movq %r10, -8(%rbp)",
                "    movq -8(%rbp), %r10",
                "    cmpq $0, %r10",
                "    je .L0",
                "    jmp .L1",
                ".L0:",
                "    leave",
                "    ret",
            ]
        );
    }

    #[test]
    fn test_each_instruction_emitted_once() {
        let f = Function::describe("f", Type::func(vec![], Type::void()), 0, |desc, (x, y)| {
            let (entry, jump) = desc.chain(vec![nop(), jump(x)]);
            let (then, then_end) = desc.chain(vec![not(y, x)]);
            let (join, _) = desc.chain(vec![nop(), return_(None)]);
            desc.start(entry)
                .link(jump, EDGE_TRUE, then)
                .link(jump, EDGE_FALSE, join)
                .link(then_end, EDGE_NEXT, join);
        });
        let order = schedule(&f);
        assert_eq!(order.len(), 5);
        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), order.len());
    }

    #[test]
    fn test_stack_arguments() {
        let params = vec![Type::int(); 7];
        let callee = symbol(0, "seven", Type::func(params.clone(), Type::int()));
        let f = Function::describe(
            "caller",
            Type::func(params, Type::int()),
            7,
            |desc, (a, b, c, d, e, f, g, r)| {
                let (entry, _) = desc.chain(vec![
                    call(Some(r), callee, vec![a, b, c, d, e, f, g]),
                    return_(Some(r)),
                ]);
                desc.start(entry);
            },
        );
        let mut program = Program::new();
        program.functions.push(f);
        let out = generate_to_string(&program);
        let out = lines(&out);
        assert_eq!(out[2], "    enter $(8 * 8), $0");
        assert_eq!(
            out[9..11].to_vec(),
            vec!["    movq 16(%rbp), %r10", "    movq %r10, -56(%rbp)"]
        );
        assert_eq!(
            out[16..].to_vec(),
            vec![
                "    movq -48(%rbp), %r9",
                "    subq $8, %rsp",
                "    pushq -56(%rbp)",
                "    call seven",
                "    addq $16, %rsp",
                "    movq %rax, -64(%rbp)",
                "    movq -64(%rbp), %rax",
                "    leave",
                "    ret",
            ]
        );
    }

    #[test]
    fn test_global_array_access() {
        let global = symbol(0, "table", Type::array(4, Type::int()));
        let f = Function::describe("f", Type::func(vec![], Type::void()), 0, |desc, (i, v)| {
            let (entry, _) = desc.chain(vec![
                address_at(AddressVar(0), global.clone(), Some(i)),
                load(v, AddressVar(0)),
                store(v, AddressVar(0)),
                return_(None),
            ]);
            desc.function.fresh_address_var();
            desc.start(entry);
        });
        let mut program = Program::new();
        program.globals.push(GlobalDecl {
            symbol: global.clone(),
            num_elements: 4,
        });
        program.functions.push(f);
        assert_eq!(
            lines(&generate_to_string(&program)),
            vec![
                "    .comm table, 32, 8",
                "    .globl f",
                "f:",
                "    enter $(8 * 4), $0",
                "    movq table@GOTPCREL(%rip), %r11",
                "    movq -8(%rbp), %r10",
                "    imulq $8, %r10",
                "    addq %r10, %r11",
                "    movq %r11, -16(%rbp)",
                "    movq -16(%rbp), %r10",
                "    movq 0(%r10), %r10",
                "    movq %r10, -24(%rbp)",
                "    movq -16(%rbp), %r11",
                "    movq -24(%rbp), %r10",
                "    movq %r10, 0(%r11)",
                "    leave",
                "    ret",
            ]
        );
    }

    #[test]
    fn test_compare_and_divide() {
        let ty = Type::func(vec![Type::int(), Type::int()], Type::bool());
        let f = Function::describe("f", ty, 2, |desc, (a, b, q, r)| {
            let (entry, _) = desc.chain(vec![
                binary(BinaryOp::Div, q, a, b),
                compare(Predicate::Lt, r, q, b),
                return_(Some(r)),
            ]);
            desc.start(entry);
        });
        let mut program = Program::new();
        program.functions.push(f);
        let out = generate_to_string(&program);
        assert_eq!(
            lines(&out)[5..17].to_vec(),
            vec![
                "    movq -8(%rbp), %rax",
                "    cqto",
                "    movq -16(%rbp), %r10",
                "    idivq %r10",
                "    movq %rax, -24(%rbp)",
                "    movq $0, %rax",
                "    movq $1, %r10",
                "    movq -24(%rbp), %r11",
                "    cmpq -16(%rbp), %r11",
                "    cmovlq %r10, %rax",
                "    movq %rax, -32(%rbp)",
                "    movq -32(%rbp), %rax",
            ]
        );
    }
}
