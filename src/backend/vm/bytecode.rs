use std::fmt;

use rustc_hash::FxHashSet;

use super::FunctionId;
use crate::backend::BinaryOp;
use crate::builtins::Builtin;

/// Virtual register. Each is written exactly once; parameters occupy the
/// first registers in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

impl Reg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Const {
        dest: Reg,
        value: f64,
    },
    Binary {
        dest: Reg,
        op: BinaryOp,
        lhs: Reg,
        rhs: Reg,
    },
    Call {
        dest: Reg,
        callee: FunctionId,
        args: Vec<Reg>,
    },
    CallBuiltin {
        dest: Reg,
        builtin: Builtin,
        args: Vec<Reg>,
    },
    Return(Reg),
}

/// Straight-line code for one function body.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub registers: u32,
    pub code: Vec<Instruction>,
}

impl Chunk {
    pub fn with_params(arity: usize) -> Self {
        Self {
            registers: arity as u32,
            code: Vec::new(),
        }
    }

    pub fn next_register(&mut self) -> Reg {
        let reg = Reg(self.registers);
        self.registers += 1;
        reg
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    pub fn render(&self, name_of: impl Fn(FunctionId) -> String) -> String {
        let mut output = String::new();
        for instruction in &self.code {
            output.push_str("    ");
            match instruction {
                Instruction::Const { dest, value } => {
                    output.push_str(&format!("{dest} = const {value:?}"));
                }
                Instruction::Binary { dest, op, lhs, rhs } => {
                    output.push_str(&format!("{dest} = {} {lhs}, {rhs}", op_mnemonic(*op)));
                }
                Instruction::Call { dest, callee, args } => {
                    output.push_str(&format!(
                        "{dest} = call %{}({})",
                        name_of(*callee),
                        join_regs(args)
                    ));
                }
                Instruction::CallBuiltin {
                    dest,
                    builtin,
                    args,
                } => {
                    output.push_str(&format!(
                        "{dest} = call builtin {}({})",
                        builtin.name(),
                        join_regs(args)
                    ));
                }
                Instruction::Return(reg) => output.push_str(&format!("ret {reg}")),
            }
            output.push('\n');
        }
        output
    }
}

fn op_mnemonic(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::LessThan => "ult",
    }
}

fn join_regs(regs: &[Reg]) -> String {
    regs.iter()
        .map(Reg::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Folds binary operations over constants, then drops pure instructions
/// whose results are never read. Calls are always kept.
pub fn optimize(chunk: &mut Chunk) {
    fold_constants(chunk);
    eliminate_dead_code(chunk);
}

fn fold_constants(chunk: &mut Chunk) {
    let mut known: Vec<Option<f64>> = vec![None; chunk.registers as usize];
    for instruction in &mut chunk.code {
        let folded = match instruction {
            Instruction::Const { dest, value } => {
                known[dest.index()] = Some(*value);
                None
            }
            Instruction::Binary { dest, op, lhs, rhs } => {
                match (known[lhs.index()], known[rhs.index()]) {
                    (Some(lhs), Some(rhs)) => {
                        let value = op.apply(lhs, rhs);
                        known[dest.index()] = Some(value);
                        Some(Instruction::Const { dest: *dest, value })
                    }
                    _ => None,
                }
            }
            Instruction::Call { .. } | Instruction::CallBuiltin { .. } | Instruction::Return(_) => {
                None
            }
        };
        if let Some(folded) = folded {
            *instruction = folded;
        }
    }
}

fn eliminate_dead_code(chunk: &mut Chunk) {
    let mut live = FxHashSet::default();
    let mut kept = Vec::with_capacity(chunk.code.len());
    for instruction in chunk.code.drain(..).rev() {
        let keep = match &instruction {
            Instruction::Return(reg) => {
                live.insert(*reg);
                true
            }
            Instruction::Const { dest, .. } => live.contains(dest),
            Instruction::Binary { dest, lhs, rhs, .. } => {
                let keep = live.contains(dest);
                if keep {
                    live.insert(*lhs);
                    live.insert(*rhs);
                }
                keep
            }
            Instruction::Call { args, .. } | Instruction::CallBuiltin { args, .. } => {
                live.extend(args.iter().copied());
                true
            }
        };
        if keep {
            kept.push(instruction);
        }
    }
    kept.reverse();
    chunk.code = kept;
}
