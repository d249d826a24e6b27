//! The lowering engine.
//!
//! Walks an already-resolved program model and emits the typed IR module.
//! Submodules split the work by concern: declarations, statements,
//! expressions, the numeric bridge, builtins, trampolines, flow analysis,
//! and static memory layout.

mod builtins;
mod declarations;
mod expressions;
pub mod flow;
pub mod memory;
mod operators;
mod statements;
mod trampoline;

use std::collections::{HashMap, HashSet};

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::module::{ConstValue, Expr, MemoryConfig, Module, NativeType};
use crate::program::{FunctionInstance, Program, TypeArguments};
use crate::types::{ClassId, Signature, Target, Type};

use flow::{Flow, ScopedLocal};
use memory::MemoryLayout;

/// WebAssembly page size in bytes.
const PAGE_SIZE: u32 = 0x10000;

/// Name of the synthetic function running top-level statements.
const START_FUNCTION: &str = "start";

/// Internal name of the throwaway function the precompute bridge builds.
const PRECOMPUTE_FUNCTION: &str = "precompute|temp";

/// Recognized compiler options.
#[derive(Debug, Clone)]
pub struct Options {
    /// 32-bit or 64-bit pointer/memory model.
    pub target: Target,
    /// Compile every declaration rather than only reachable ones.
    pub no_tree_shaking: bool,
    /// Replace assertions with no-ops.
    pub no_assert: bool,
    /// Do not set up a default memory section.
    pub no_memory: bool,
    /// Import memory from `env.memory` instead of defining it.
    pub import_memory: bool,
    /// Start offset for static memory.
    pub memory_base: u32,
    /// Name of the allocator builtin used by `new`.
    pub allocate_impl: String,
    /// Name of the free builtin.
    pub free_impl: String,
    /// Record names for debugging tooling.
    pub source_map: bool,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            target: Target::Wasm32,
            no_tree_shaking: false,
            no_assert: false,
            no_memory: false,
            import_memory: false,
            memory_base: 0,
            allocate_impl: "allocate_memory".to_string(),
            free_impl: "free_memory".to_string(),
            source_map: false,
        }
    }
}

/// How an expression result relates to its contextual type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Conversion {
    /// Keep the expression's own type.
    None,
    /// Convert, diagnosing non-assignable sources.
    Implicit,
    /// Convert without assignability checks.
    Explicit,
}

/// Compilation-state flags, kept in a side table per element.
pub(crate) mod element_state {
    pub const COMPILED: u8 = 1 << 0;
    pub const INLINED: u8 = 1 << 1;
    pub const IMPORTED: u8 = 1 << 2;
}

#[derive(Debug, Default)]
pub(crate) struct ElementState {
    pub flags: u8,
    pub constant: Option<ConstValue>,
    /// Resolved type of the element's value (globals and enum values).
    pub value_type: Option<Type>,
}

impl ElementState {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.flags |= flag;
    }
}

/// Per-function lowering state: local slots, the temp pool, the label
/// counter, and the flow stack.
#[derive(Debug)]
pub(crate) struct FunctionState {
    pub name: String,
    pub signature: Signature,
    pub this_class: Option<ClassId>,
    pub type_arguments: TypeArguments,
    /// Parameter slot count including `this`.
    pub param_count: u32,
    /// Additional locals after the parameters.
    pub locals: Vec<NativeType>,
    temp_pool: Vec<(NativeType, u32)>,
    break_context: u32,
    pub flow: Flow,
}

impl FunctionState {
    pub fn new(
        name: String,
        signature: Signature,
        this_class: Option<ClassId>,
        type_arguments: TypeArguments,
    ) -> FunctionState {
        let param_count = signature.parameter_count_incl_this() as u32;
        FunctionState {
            name,
            signature,
            this_class,
            type_arguments,
            param_count,
            locals: Vec::new(),
            temp_pool: Vec::new(),
            break_context: 0,
            flow: Flow::new(),
        }
    }

    pub fn add_local(&mut self, ty: NativeType) -> u32 {
        let index = self.param_count + self.locals.len() as u32;
        self.locals.push(ty);
        index
    }

    /// Allocate a temporary slot, reusing a released one of the same type.
    pub fn get_temp_local(&mut self, ty: NativeType) -> u32 {
        if let Some(position) = self.temp_pool.iter().position(|(t, _)| *t == ty) {
            return self.temp_pool.swap_remove(position).1;
        }
        self.add_local(ty)
    }

    /// Release a temporary slot back to the pool.
    pub fn free_temp_local(&mut self, ty: NativeType, index: u32) {
        self.temp_pool.push((ty, index));
    }

    /// Allocate a slot that may be reclaimed by the very next expression.
    pub fn get_and_free_temp_local(&mut self, ty: NativeType) -> u32 {
        let index = self.get_temp_local(ty);
        self.free_temp_local(ty, index);
        index
    }

    pub fn next_break_context(&mut self) -> u32 {
        let context = self.break_context;
        self.break_context += 1;
        context
    }
}

/// The result of a compile run: the finished module plus everything the
/// diagnostic sink accumulated.
#[derive(Debug)]
pub struct CompileResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Compiler {
    pub(crate) program: Program,
    pub(crate) options: Options,
    pub(crate) module: Module,
    pub(crate) diagnostics: DiagnosticSink,
    pub(crate) memory: MemoryLayout,
    pub(crate) table_indices: HashMap<String, u32>,
    pub(crate) files_compiled: HashSet<String>,
    pub(crate) start_body: Vec<Expr>,
    pub(crate) states: HashMap<String, ElementState>,
    pub(crate) instances: HashMap<String, FunctionInstance>,
    /// The function currently being lowered.
    pub(crate) current: Option<FunctionState>,
    /// The start function's lowering state, swapped in for top-level
    /// statements and global initializers.
    pub(crate) start_state: Option<FunctionState>,
    pub(crate) current_enum: Option<String>,
    pub(crate) current_namespace: Option<String>,
    /// Static type of the last compiled expression: the sole channel by
    /// which type information flows out of expression lowering.
    pub(crate) current_type: Type,
}

impl Compiler {
    pub fn new(mut program: Program, options: Options) -> Compiler {
        // The options are authoritative for the pointer model; class
        // layouts are computed lazily, so overriding here is safe.
        program.target = options.target;
        let memory = MemoryLayout::new(options.memory_base, options.target.pointer_size());
        Compiler {
            program,
            options,
            module: Module::new(),
            diagnostics: DiagnosticSink::new(),
            memory,
            table_indices: HashMap::new(),
            files_compiled: HashSet::new(),
            start_body: Vec::new(),
            states: HashMap::new(),
            instances: HashMap::new(),
            current: None,
            start_state: None,
            current_enum: None,
            current_namespace: None,
            current_type: Type::void(),
        }
    }

    /// Compile the program to a module. Never aborts on semantic errors;
    /// inspect the returned diagnostics.
    pub fn compile(mut self) -> CompileResult {
        self.module.set_debug_names(self.options.source_map);
        for message in std::mem::take(&mut self.program.registration_errors) {
            self.diagnostics.error(message, None);
        }

        // The start function's state persists across the whole traversal so
        // top-level statements from every source share one slot space.
        self.start_state = Some(FunctionState::new(
            START_FUNCTION.to_string(),
            Signature {
                parameter_types: Vec::new(),
                this_type: None,
                return_type: Type::void(),
                required_parameters: 0,
                has_rest: false,
            },
            None,
            TypeArguments::new(),
        ));

        let paths: Vec<String> = self
            .program
            .sources
            .iter()
            .filter(|s| s.is_entry || self.options.no_tree_shaking)
            .map(|s| s.normalized_path.clone())
            .collect();
        for path in paths {
            self.compile_source(&path);
        }

        self.make_start();
        self.finalize_memory();

        CompileResult {
            module: self.module,
            diagnostics: self.diagnostics.into_vec(),
        }
    }

    pub(crate) fn target(&self) -> Target {
        self.options.target
    }

    /// The mutable compilation-state record of an element.
    pub(crate) fn state(&mut self, name: &str) -> &mut ElementState {
        self.states.entry(name.to_string()).or_default()
    }

    /// The function currently being lowered. Lowering never runs outside a
    /// function context: top-level statements lower inside the start
    /// function's state.
    pub(crate) fn func(&mut self) -> &mut FunctionState {
        self.current
            .as_mut()
            .expect("expression lowering requires a function context")
    }

    pub(crate) fn func_name(&self) -> String {
        self.current
            .as_ref()
            .map(|f| f.name.clone())
            .unwrap_or_else(|| START_FUNCTION.to_string())
    }

    /// A pointer-width constant.
    pub(crate) fn pointer_const(&self, value: u64) -> Expr {
        match self.target() {
            Target::Wasm32 => Expr::I32(value as i32),
            Target::Wasm64 => Expr::I64(value as i64),
        }
    }

    /// The `string` type as seen by string literals.
    pub(crate) fn string_type(&mut self) -> Type {
        self.program.string_type()
    }

    /// First slot of the function table for `name`, appending on first use.
    /// A function keeps its table index for its lifetime.
    pub(crate) fn ensure_table_index(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.table_indices.get(name) {
            return index;
        }
        let index = self.module.add_table_entry(name);
        self.table_indices.insert(name.to_string(), index);
        index
    }

    /// Fold an expression through the backend: wrap it as the body of a
    /// private function, run the precompute pass, read the body back, and
    /// remove the function. Non-foldable expressions come back unchanged.
    pub(crate) fn precompute_expression(&mut self, expr: Expr) -> Expr {
        let result = expr.ty();
        log::trace!("precomputing {} expression", self.func_name());
        self.module
            .add_function(PRECOMPUTE_FUNCTION, Vec::new(), result, Vec::new(), expr);
        self.module.run_precompute(PRECOMPUTE_FUNCTION);
        let function = self
            .module
            .remove_function(PRECOMPUTE_FUNCTION)
            .expect("the precompute function was just added");
        function.body
    }

    /// Precompute and extract a literal constant, if the expression folds.
    pub(crate) fn precompute_constant(&mut self, expr: Expr) -> Result<ConstValue, Expr> {
        let folded = self.precompute_expression(expr);
        match folded.constant_value() {
            Some(value) => Ok(value),
            None => Err(folded),
        }
    }

    /// Register a parameter or `let` local in the current scope, reporting
    /// duplicates.
    pub(crate) fn declare_local(&mut self, name: &str, local: ScopedLocal) {
        let context = self.func_name();
        if self.func().flow.add_scoped_local(name, local).is_err() {
            self.diagnostics.error(
                format!("duplicate local declaration of `{name}`"),
                Some(&context),
            );
        }
    }

    fn make_start(&mut self) {
        let state = self.start_state.take().expect("start state exists");
        if self.start_body.is_empty() {
            return;
        }
        if self.module.get_function(START_FUNCTION).is_some() {
            self.diagnostics.error(
                "a declared function named `start` conflicts with the module start function",
                None,
            );
            return;
        }
        let body = Expr::Block {
            label: None,
            children: std::mem::take(&mut self.start_body),
            ty: NativeType::None,
        };
        log::debug!("emitting start function with {} locals", state.locals.len());
        self.module.add_function(
            START_FUNCTION,
            Vec::new(),
            NativeType::None,
            state.locals,
            body,
        );
        self.module.set_start(START_FUNCTION);
    }

    fn finalize_memory(&mut self) {
        let pointer_size = self.target().pointer_size();
        let (heap_base, segments) = self.memory.finalize(pointer_size);
        for segment in segments {
            self.module.add_data_segment(segment.offset, segment.data);
        }
        self.module.add_global(
            "HEAP_BASE",
            self.target().pointer_native(),
            false,
            match self.target() {
                Target::Wasm32 => ConstValue::I32(heap_base as i32),
                Target::Wasm64 => ConstValue::I64(heap_base as i64),
            },
        );
        if !self.options.no_memory {
            let initial_pages = u64::from(heap_base.div_ceil(PAGE_SIZE).max(1));
            self.module.set_memory(MemoryConfig {
                initial_pages,
                maximum_pages: None,
                import: self.options.import_memory,
                export_as: Some("memory".to_string()),
                memory64: self.target() == Target::Wasm64,
            });
        }
    }
}

/// Convenience driver: compile a program with the given options.
pub fn compile_program(program: Program, options: Options) -> CompileResult {
    Compiler::new(program, options).compile()
}
