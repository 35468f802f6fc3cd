//! Register-bytecode backend with an in-process interpreter.
//!
//! Each function body becomes a [`Chunk`] of straight-line SSA-style
//! instructions. Finished chunks are optimized with constant folding and
//! dead-code elimination, then interpreted on demand.

pub mod bytecode;

use rustc_hash::FxHashMap;

use crate::backend::{
    Backend, BinaryOp, DEFAULT_CALL_DEPTH_LIMIT, ExecutionError, Executor, FunctionEmitter,
};
use crate::builtins::Builtin;
use crate::codegen::{CodegenError, CodegenResult};

use bytecode::{Chunk, Instruction, Reg, optimize};

/// Handle to a slot in the module. Slots are never reused, so a removed
/// function's handle stays dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(usize);

#[derive(Debug)]
struct Slot {
    name: String,
    params: Vec<String>,
    body: Option<Chunk>,
}

pub struct VmBackend {
    slots: Vec<Option<Slot>>,
    names: FxHashMap<String, FunctionId>,
    call_depth_limit: usize,
}

impl VmBackend {
    pub fn new() -> Self {
        Self::with_call_depth_limit(DEFAULT_CALL_DEPTH_LIMIT)
    }

    pub fn with_call_depth_limit(call_depth_limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            names: FxHashMap::default(),
            call_depth_limit,
        }
    }

    /// Number of live functions, declared or defined.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn slot(&self, function: FunctionId) -> Option<&Slot> {
        self.slots.get(function.0).and_then(Option::as_ref)
    }

    fn run(
        &self,
        function: FunctionId,
        args: &[f64],
        depth: usize,
    ) -> Result<f64, ExecutionError> {
        if depth >= self.call_depth_limit {
            return Err(ExecutionError::CallDepthExceeded {
                limit: self.call_depth_limit,
            });
        }
        let slot = self.slot(function).ok_or(ExecutionError::StaleHandle)?;
        let chunk = slot.body.as_ref().ok_or_else(|| ExecutionError::Undefined {
            name: slot.name.clone(),
        })?;

        let mut registers = vec![0.0; chunk.registers as usize];
        registers[..args.len()].copy_from_slice(args);

        for instruction in &chunk.code {
            match instruction {
                Instruction::Const { dest, value } => registers[dest.index()] = *value,
                Instruction::Binary { dest, op, lhs, rhs } => {
                    registers[dest.index()] =
                        op.apply(registers[lhs.index()], registers[rhs.index()]);
                }
                Instruction::Call { dest, callee, args } => {
                    let values = read_registers(&registers, args);
                    registers[dest.index()] = self.run(*callee, &values, depth + 1)?;
                }
                Instruction::CallBuiltin {
                    dest,
                    builtin,
                    args,
                } => {
                    let values = read_registers(&registers, args);
                    registers[dest.index()] = builtin.call(&values);
                }
                Instruction::Return(reg) => return Ok(registers[reg.index()]),
            }
        }

        Err(ExecutionError::Backend {
            message: format!("function '{}' ended without a return", slot.name),
        })
    }

    fn name_of(&self, function: FunctionId) -> String {
        self.slot(function)
            .map(|slot| display_name(&slot.name).to_string())
            .unwrap_or_else(|| "<removed>".to_string())
    }
}

impl Default for VmBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn read_registers(registers: &[f64], regs: &[Reg]) -> Vec<f64> {
    regs.iter().map(|reg| registers[reg.index()]).collect()
}

fn display_name(name: &str) -> &str {
    if name.is_empty() { "__anon_expr" } else { name }
}

struct VmEmitter<'a> {
    backend: &'a VmBackend,
    current: FunctionId,
    chunk: Chunk,
}

impl FunctionEmitter for VmEmitter<'_> {
    type Value = Reg;
    type Function = FunctionId;

    fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.backend.lookup(name)
    }

    fn arity(&self, function: FunctionId) -> usize {
        self.backend.arity(function)
    }

    fn constant(&mut self, value: f64) -> Reg {
        let dest = self.chunk.next_register();
        self.chunk.push(Instruction::Const { dest, value });
        dest
    }

    fn binary(&mut self, op: BinaryOp, lhs: Reg, rhs: Reg) -> Reg {
        let dest = self.chunk.next_register();
        self.chunk.push(Instruction::Binary { dest, op, lhs, rhs });
        dest
    }

    fn call(&mut self, callee: FunctionId, args: &[Reg]) -> CodegenResult<Reg> {
        let slot = self
            .backend
            .slot(callee)
            .ok_or_else(|| CodegenError::backend("stale function handle"))?;

        // Declarations without a body bind to a builtin when one matches;
        // otherwise the call goes to the slot and is checked when it runs.
        let builtin = if callee == self.current || slot.body.is_some() {
            None
        } else {
            Builtin::from_name(&slot.name).filter(|builtin| builtin.arity() == args.len())
        };

        let dest = self.chunk.next_register();
        let args = args.to_vec();
        self.chunk.push(match builtin {
            Some(builtin) => Instruction::CallBuiltin {
                dest,
                builtin,
                args,
            },
            None => Instruction::Call { dest, callee, args },
        });
        Ok(dest)
    }
}

impl Backend for VmBackend {
    type Value = Reg;
    type Function = FunctionId;

    fn name(&self) -> &'static str {
        "vm"
    }

    fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.names.get(name).copied()
    }

    fn arity(&self, function: FunctionId) -> usize {
        self.slot(function).map_or(0, |slot| slot.params.len())
    }

    fn is_defined(&self, function: FunctionId) -> bool {
        self.slot(function).is_some_and(|slot| slot.body.is_some())
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> CodegenResult<FunctionId> {
        if self.names.contains_key(name) {
            return Err(CodegenError::backend(format!(
                "function '{name}' is already declared"
            )));
        }
        let id = FunctionId(self.slots.len());
        self.slots.push(Some(Slot {
            name: name.to_string(),
            params: params.to_vec(),
            body: None,
        }));
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    fn define_function<G>(&mut self, function: FunctionId, generate: G) -> CodegenResult<()>
    where
        G: FnOnce(
            &mut dyn FunctionEmitter<Value = Reg, Function = FunctionId>,
            &[Reg],
        ) -> CodegenResult<Reg>,
    {
        let arity = self
            .slot(function)
            .map(|slot| slot.params.len())
            .ok_or_else(|| CodegenError::backend("stale function handle"))?;
        let params: Vec<Reg> = (0..arity as u32).map(Reg).collect();

        let mut emitter = VmEmitter {
            backend: &*self,
            current: function,
            chunk: Chunk::with_params(arity),
        };
        let result = generate(&mut emitter, &params)?;
        let mut chunk = emitter.chunk;
        chunk.push(Instruction::Return(result));
        optimize(&mut chunk);

        if let Some(slot) = self.slots.get_mut(function.0).and_then(Option::as_mut) {
            slot.body = Some(chunk);
        }
        Ok(())
    }

    fn remove_function(&mut self, function: FunctionId) {
        if let Some(slot) = self.slots.get_mut(function.0).and_then(Option::take)
            && self.names.get(&slot.name) == Some(&function)
        {
            self.names.remove(&slot.name);
        }
    }

    fn listing(&self, function: FunctionId) -> Option<String> {
        let slot = self.slot(function)?;
        let name = display_name(&slot.name);
        let Some(chunk) = &slot.body else {
            return Some(format!("declare %{name}({}) -> f64", slot.params.join(", ")));
        };
        let params = slot
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| format!("r{index}: {param}"))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!(
            "function %{name}({params}) -> f64 {{\n{}}}",
            chunk.render(|id| self.name_of(id))
        ))
    }
}

impl Executor for VmBackend {
    fn execute(&mut self, function: FunctionId) -> Result<f64, ExecutionError> {
        let slot = self.slot(function).ok_or(ExecutionError::StaleHandle)?;
        if !slot.params.is_empty() {
            return Err(ExecutionError::NotNullary {
                name: slot.name.clone(),
                arity: slot.params.len(),
            });
        }
        self.run(function, &[], 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Item;
    use crate::codegen::Codegen;
    use crate::parser::parse;
    use crate::precedence::OperatorTable;

    fn compile(source: &str, limit: usize) -> (Codegen<VmBackend>, Vec<FunctionId>) {
        let items = parse(source, &OperatorTable::standard()).expect("parse");
        let mut codegen = Codegen::new(VmBackend::with_call_depth_limit(limit));
        let handles = items
            .iter()
            .map(|item| match item {
                Item::Definition(function) | Item::Expression(function) => {
                    codegen.define(function).expect("define")
                }
                Item::Extern(prototype) => codegen.declare(prototype).expect("declare"),
            })
            .collect();
        (codegen, handles)
    }

    #[test]
    fn executes_nested_calls() {
        let (mut codegen, handles) = compile("def sq(x) x*x def f(a b) sq(a) + b f(3, 1)", 16);
        let value = codegen.backend_mut().execute(handles[2]).expect("execute");
        assert_eq!(value, 10.0);
    }

    #[test]
    fn constant_expressions_fold_to_a_single_constant() {
        let (codegen, handles) = compile("1 + 2 * 3", 16);
        let listing = codegen.backend().listing(handles[0]).expect("listing");
        assert_eq!(
            listing,
            "function %__anon_expr() -> f64 {\n    r4 = const 7.0\n    ret r4\n}"
        );
    }

    #[test]
    fn calls_builtins_through_externs() {
        let (mut codegen, handles) =
            compile("extern sqrt(x) extern pow(a b) sqrt(pow(3, 2) + 16)", 16);
        assert_eq!(
            codegen.backend().listing(handles[0]).as_deref(),
            Some("declare %sqrt(x) -> f64")
        );
        let value = codegen.backend_mut().execute(handles[2]).expect("execute");
        assert_eq!(value, 5.0);
    }

    #[test]
    fn forward_declared_callee_links_once_defined() {
        let (mut codegen, handles) =
            compile("extern g(x) def f(x) g(x) * 10 def g(x) x + 1 f(2)", 16);
        assert_eq!(handles[0], handles[2]);
        assert_eq!(codegen.backend_mut().execute(handles[3]), Ok(30.0));
    }

    #[test]
    fn calling_a_declaration_without_body_fails_at_run_time() {
        let (mut codegen, handles) = compile("extern mystery(x) mystery(1)", 16);
        let listing = codegen.backend().listing(handles[1]).expect("listing");
        assert!(listing.contains("call %mystery"), "{listing}");
        assert_eq!(
            codegen.backend_mut().execute(handles[1]),
            Err(ExecutionError::Undefined {
                name: "mystery".to_string()
            })
        );

        // A builtin name declared with the wrong arity does not link either.
        let (mut codegen, handles) = compile("extern sin(a b) sin(1, 2)", 16);
        assert_eq!(
            codegen.backend_mut().execute(handles[1]),
            Err(ExecutionError::Undefined {
                name: "sin".to_string()
            })
        );
    }

    #[test]
    fn runaway_recursion_hits_depth_limit() {
        let (mut codegen, handles) = compile("def loop(x) loop(x + 1) loop(0)", 32);
        let err = codegen.backend_mut().execute(handles[1]).unwrap_err();
        assert_eq!(err, ExecutionError::CallDepthExceeded { limit: 32 });
    }

    #[test]
    fn refuses_to_execute_functions_with_parameters() {
        let (mut codegen, handles) = compile("def id(x) x", 16);
        let err = codegen.backend_mut().execute(handles[0]).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::NotNullary {
                name: "id".to_string(),
                arity: 1
            }
        );
    }

    #[test]
    fn removed_handles_stay_dead() {
        let mut backend = VmBackend::new();
        let first = backend.declare_function("f", &[]).unwrap();
        backend.remove_function(first);
        let second = backend.declare_function("f", &[]).unwrap();
        assert_ne!(first, second);
        assert_eq!(backend.lookup("f"), Some(second));
        assert_eq!(backend.execute(first), Err(ExecutionError::StaleHandle));
        assert_eq!(backend.len(), 1);
    }
}
