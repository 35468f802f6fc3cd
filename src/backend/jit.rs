//! Cranelift JIT backend.
//!
//! Each definition is compiled to native code as soon as its body is
//! finished. Symbols are made unique per definition so a name can be freed
//! and defined again; the machine code of a removed function stays mapped
//! until the backend is dropped, but nothing can reach it anymore.
//!
//! Calls to functions that are declared but not yet compiled go through a
//! per-function entry cell that is filled in once the body is compiled.
//! Compiled code also counts its own nesting in a [`CallGuard`] so runaway
//! recursion unwinds with an error instead of overflowing the native stack.

use std::fmt;
use std::mem::offset_of;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{AbiParam, InstBuilder, MemFlags, Signature, Type, Value, types};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module, default_libcall_names};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{
    Backend, BinaryOp, DEFAULT_CALL_DEPTH_LIMIT, ExecutionError, Executor, FunctionEmitter,
};
use crate::builtins::Builtin;
use crate::codegen::{CodegenError, CodegenResult};

type EntryFn = extern "C" fn() -> f64;

/// Cranelift optimization level applied to every compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

impl FromStr for OptLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "none" => Ok(OptLevel::None),
            "speed" => Ok(OptLevel::Speed),
            "speed_and_size" => Ok(OptLevel::SpeedAndSize),
            other => bail!("Unknown optimization level '{other}'"),
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(usize);

/// Read and written by compiled code through its address.
///
/// Every compiled function bumps `depth` on entry and drops it on return.
/// Past the limit it sets `tripped` and returns NaN without running its body,
/// and while `tripped` is set every call does the same.
#[repr(C)]
#[derive(Default)]
struct CallGuard {
    depth: AtomicU64,
    tripped: AtomicU64,
}

const DEPTH_OFFSET: i32 = offset_of!(CallGuard, depth) as i32;
const TRIPPED_OFFSET: i32 = offset_of!(CallGuard, tripped) as i32;

struct Declaration {
    name: String,
    params: Vec<String>,
    compiled: Option<FuncId>,
    /// User functions the compiled body calls, other than itself.
    callees: Vec<FunctionId>,
    listing: Option<String>,
}

pub struct JitBackend {
    module: JITModule,
    slots: Vec<Option<Declaration>>,
    /// Code address per slot, zero until compiled. Never shrunk: compiled
    /// code embeds the cell addresses.
    entries: Vec<Box<AtomicUsize>>,
    names: FxHashMap<String, FunctionId>,
    next_symbol: usize,
    guard: Box<CallGuard>,
    call_depth_limit: usize,
}

impl JitBackend {
    pub fn new(opt_level: OptLevel) -> Result<Self> {
        Self::with_call_depth_limit(opt_level, DEFAULT_CALL_DEPTH_LIMIT)
    }

    pub fn with_call_depth_limit(opt_level: OptLevel, call_depth_limit: usize) -> Result<Self> {
        let mut builder =
            JITBuilder::with_flags(&[("opt_level", opt_level.as_str())], default_libcall_names())?;
        for builtin in Builtin::ALL {
            builder.symbol(builtin.symbol(), builtin.address());
        }
        Ok(Self {
            module: JITModule::new(builder),
            slots: Vec::new(),
            entries: Vec::new(),
            names: FxHashMap::default(),
            next_symbol: 0,
            guard: Box::default(),
            call_depth_limit,
        })
    }

    fn slot(&self, function: FunctionId) -> Option<&Declaration> {
        self.slots.get(function.0).and_then(Option::as_ref)
    }

    /// Fails unless every function reachable from `root` has been compiled.
    fn check_linked(&self, root: FunctionId) -> Result<(), ExecutionError> {
        let mut seen = FxHashSet::default();
        let mut pending = vec![root];
        while let Some(function) = pending.pop() {
            if !seen.insert(function) {
                continue;
            }
            let declaration = self.slot(function).ok_or(ExecutionError::StaleHandle)?;
            if declaration.compiled.is_none() {
                return Err(ExecutionError::Undefined {
                    name: declaration.name.clone(),
                });
            }
            pending.extend(declaration.callees.iter().copied());
        }
        Ok(())
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() { "__anon_expr" } else { name }
}

fn f64_signature(module: &JITModule, arity: usize) -> Signature {
    let mut signature = module.make_signature();
    for _ in 0..arity {
        signature.params.push(AbiParam::new(types::F64));
    }
    signature.returns.push(AbiParam::new(types::F64));
    signature
}

enum CallTarget {
    Direct(FuncId),
    /// Address of an entry cell holding the callee's code address.
    Indirect(usize),
}

struct JitEmitter<'a> {
    builder: FunctionBuilder<'a>,
    module: &'a mut JITModule,
    slots: &'a [Option<Declaration>],
    entries: &'a [Box<AtomicUsize>],
    names: &'a FxHashMap<String, FunctionId>,
    pointer_type: Type,
    current: FunctionId,
    current_id: FuncId,
    callees: Vec<FunctionId>,
}

impl JitEmitter<'_> {
    fn target(&mut self, callee: FunctionId, argc: usize) -> CodegenResult<CallTarget> {
        if callee == self.current {
            return Ok(CallTarget::Direct(self.current_id));
        }
        let declaration = self
            .slots
            .get(callee.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| CodegenError::backend("stale function handle"))?;
        if let Some(id) = declaration.compiled {
            self.callees.push(callee);
            return Ok(CallTarget::Direct(id));
        }
        if let Some(builtin) =
            Builtin::from_name(&declaration.name).filter(|builtin| builtin.arity() == argc)
        {
            let signature = f64_signature(&*self.module, argc);
            return self
                .module
                .declare_function(builtin.symbol(), Linkage::Import, &signature)
                .map(CallTarget::Direct)
                .map_err(CodegenError::backend);
        }

        let entry = self
            .entries
            .get(callee.0)
            .ok_or_else(|| CodegenError::backend("stale function handle"))?;
        self.callees.push(callee);
        Ok(CallTarget::Indirect(entry.as_ptr() as usize))
    }
}

impl FunctionEmitter for JitEmitter<'_> {
    type Value = Value;
    type Function = FunctionId;

    fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.names.get(name).copied()
    }

    fn arity(&self, function: FunctionId) -> usize {
        self.slots
            .get(function.0)
            .and_then(Option::as_ref)
            .map_or(0, |declaration| declaration.params.len())
    }

    fn constant(&mut self, value: f64) -> Value {
        self.builder.ins().f64const(value)
    }

    fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        match op {
            BinaryOp::Add => self.builder.ins().fadd(lhs, rhs),
            BinaryOp::Sub => self.builder.ins().fsub(lhs, rhs),
            BinaryOp::Mul => self.builder.ins().fmul(lhs, rhs),
            BinaryOp::LessThan => {
                let flag = self
                    .builder
                    .ins()
                    .fcmp(FloatCC::UnorderedOrLessThan, lhs, rhs);
                let wide = self.builder.ins().uextend(types::I64, flag);
                self.builder.ins().fcvt_from_uint(types::F64, wide)
            }
        }
    }

    fn call(&mut self, callee: FunctionId, args: &[Value]) -> CodegenResult<Value> {
        let call = match self.target(callee, args.len())? {
            CallTarget::Direct(target) => {
                let func_ref = self.module.declare_func_in_func(target, self.builder.func);
                self.builder.ins().call(func_ref, args)
            }
            CallTarget::Indirect(entry) => {
                let signature = f64_signature(&*self.module, args.len());
                let sig_ref = self.builder.import_signature(signature);
                let cell = self.builder.ins().iconst(self.pointer_type, entry as i64);
                let code = self.builder.ins().load(self.pointer_type, MemFlags::new(), cell, 0);
                self.builder.ins().call_indirect(sig_ref, code, args)
            }
        };
        Ok(self.builder.inst_results(call)[0])
    }
}

impl Backend for JitBackend {
    type Value = Value;
    type Function = FunctionId;

    fn name(&self) -> &'static str {
        "jit"
    }

    fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.names.get(name).copied()
    }

    fn arity(&self, function: FunctionId) -> usize {
        self.slot(function)
            .map_or(0, |declaration| declaration.params.len())
    }

    fn is_defined(&self, function: FunctionId) -> bool {
        self.slot(function)
            .is_some_and(|declaration| declaration.compiled.is_some())
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> CodegenResult<FunctionId> {
        if self.names.contains_key(name) {
            return Err(CodegenError::backend(format!(
                "function '{name}' is already declared"
            )));
        }
        let id = FunctionId(self.slots.len());
        self.slots.push(Some(Declaration {
            name: name.to_string(),
            params: params.to_vec(),
            compiled: None,
            callees: Vec::new(),
            listing: None,
        }));
        self.entries.push(Box::default());
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    fn define_function<G>(&mut self, function: FunctionId, generate: G) -> CodegenResult<()>
    where
        G: FnOnce(
            &mut dyn FunctionEmitter<Value = Value, Function = FunctionId>,
            &[Value],
        ) -> CodegenResult<Value>,
    {
        let (symbol, arity) = {
            let declaration = self
                .slot(function)
                .ok_or_else(|| CodegenError::backend("stale function handle"))?;
            (
                format!("__kscope_{}_{}", self.next_symbol, display_name(&declaration.name)),
                declaration.params.len(),
            )
        };
        self.next_symbol += 1;

        let signature = f64_signature(&self.module, arity);
        let func_id = self
            .module
            .declare_function(&symbol, Linkage::Local, &signature)
            .map_err(CodegenError::backend)?;
        let pointer_type = self.module.target_config().pointer_type();
        let guard = &*self.guard as *const CallGuard as i64;
        let limit = self.call_depth_limit as i64;

        let mut ctx = self.module.make_context();
        ctx.func.signature = signature;
        let mut builder_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let entry_block = builder.create_block();
        let bail_block = builder.create_block();
        let body_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);
        let params = builder.block_params(entry_block).to_vec();

        // Count this frame, or return NaN at once past the depth limit.
        let flags = MemFlags::new();
        let guard = builder.ins().iconst(pointer_type, guard);
        let depth = builder.ins().load(types::I64, flags, guard, DEPTH_OFFSET);
        let tripped = builder.ins().load(types::I64, flags, guard, TRIPPED_OFFSET);
        let too_deep = builder
            .ins()
            .icmp_imm(IntCC::UnsignedGreaterThanOrEqual, depth, limit);
        let unwinding = builder.ins().icmp_imm(IntCC::NotEqual, tripped, 0);
        let stop = builder.ins().bor(too_deep, unwinding);
        builder.ins().brif(stop, bail_block, &[], body_block, &[]);

        builder.switch_to_block(bail_block);
        builder.seal_block(bail_block);
        let one = builder.ins().iconst(types::I64, 1);
        builder.ins().store(flags, one, guard, TRIPPED_OFFSET);
        let nan = builder.ins().f64const(f64::NAN);
        builder.ins().return_(&[nan]);

        builder.switch_to_block(body_block);
        builder.seal_block(body_block);
        let entered = builder.ins().iadd_imm(depth, 1);
        builder.ins().store(flags, entered, guard, DEPTH_OFFSET);

        let mut emitter = JitEmitter {
            builder,
            module: &mut self.module,
            slots: &self.slots,
            entries: &self.entries,
            names: &self.names,
            pointer_type,
            current: function,
            current_id: func_id,
            callees: Vec::new(),
        };
        let result = generate(&mut emitter, &params)?;
        let JitEmitter {
            mut builder,
            callees,
            ..
        } = emitter;

        let depth = builder.ins().load(types::I64, flags, guard, DEPTH_OFFSET);
        let left = builder.ins().iadd_imm(depth, -1);
        builder.ins().store(flags, left, guard, DEPTH_OFFSET);
        builder.ins().return_(&[result]);
        builder.finalize();

        self.module
            .define_function(func_id, &mut ctx)
            .map_err(CodegenError::backend)?;
        let listing = ctx.func.display().to_string();
        self.module.clear_context(&mut ctx);
        self.module
            .finalize_definitions()
            .map_err(CodegenError::backend)?;

        let code = self.module.get_finalized_function(func_id);
        if let Some(entry) = self.entries.get(function.0) {
            entry.store(code as usize, Ordering::Release);
        }
        if let Some(declaration) = self.slots.get_mut(function.0).and_then(Option::as_mut) {
            declaration.compiled = Some(func_id);
            declaration.callees = callees;
            declaration.listing = Some(listing);
        }
        Ok(())
    }

    fn remove_function(&mut self, function: FunctionId) {
        if let Some(declaration) = self.slots.get_mut(function.0).and_then(Option::take)
            && self.names.get(&declaration.name) == Some(&function)
        {
            self.names.remove(&declaration.name);
        }
    }

    fn listing(&self, function: FunctionId) -> Option<String> {
        let declaration = self.slot(function)?;
        match &declaration.listing {
            Some(listing) => Some(listing.trim_end().to_string()),
            None => Some(format!(
                "declare %{}({}) -> f64",
                display_name(&declaration.name),
                declaration.params.join(", ")
            )),
        }
    }
}

impl Executor for JitBackend {
    fn execute(&mut self, function: FunctionId) -> Result<f64, ExecutionError> {
        let declaration = self.slot(function).ok_or(ExecutionError::StaleHandle)?;
        if !declaration.params.is_empty() {
            return Err(ExecutionError::NotNullary {
                name: declaration.name.clone(),
                arity: declaration.params.len(),
            });
        }
        let func_id = declaration
            .compiled
            .ok_or_else(|| ExecutionError::Undefined {
                name: declaration.name.clone(),
            })?;
        self.check_linked(function)?;

        let code = self.module.get_finalized_function(func_id);
        // Compiled with a nullary f64 signature above.
        let entry: EntryFn = unsafe { std::mem::transmute::<*const u8, EntryFn>(code) };
        self.guard.depth.store(0, Ordering::Relaxed);
        self.guard.tripped.store(0, Ordering::Relaxed);
        let value = entry();
        if self.guard.tripped.load(Ordering::Relaxed) != 0 {
            return Err(ExecutionError::CallDepthExceeded {
                limit: self.call_depth_limit,
            });
        }
        Ok(value)
    }
}
