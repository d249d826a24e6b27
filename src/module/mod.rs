//! The typed intermediate representation handed to the WebAssembly backend.
//!
//! The lowering engine builds an owned expression tree per function; the
//! module collects functions, imports, globals, exports, the function table,
//! static data segments, and the start function. Serialization to bytes
//! lives in [`emit`]; the constant-folding pass lives in [`precompute`].

mod emit;
mod precompute;

pub use emit::EmitError;

/// The four WebAssembly value types, plus `None` for void positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    None,
    I32,
    I64,
    F32,
    F64,
}

/// A literal constant extracted from or injected into the IR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ConstValue {
    pub fn native(&self) -> NativeType {
        match self {
            ConstValue::I32(_) => NativeType::I32,
            ConstValue::I64(_) => NativeType::I64,
            ConstValue::F32(_) => NativeType::F32,
            ConstValue::F64(_) => NativeType::F64,
        }
    }

    /// Truthiness as WebAssembly sees it.
    pub fn is_nonzero(&self) -> bool {
        match *self {
            ConstValue::I32(v) => v != 0,
            ConstValue::I64(v) => v != 0,
            ConstValue::F32(v) => v != 0.0,
            ConstValue::F64(v) => v != 0.0,
        }
    }
}

/// Binary IR operators. Integer operators carry signedness in the operator,
/// float operators use the `F`-suffixed comparison variants; the operand
/// family is recovered from the left child's type at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    DivF,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Eq,
    Ne,
    LtS,
    LtU,
    LtF,
    GtS,
    GtU,
    GtF,
    LeS,
    LeU,
    LeF,
    GeS,
    GeU,
    GeF,
}

/// Unary IR operators, including the conversion family. Conversions take
/// their result type from the node's `ty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Eqz,
    Neg,
    WrapI64,
    ExtendI32S,
    ExtendI32U,
    TruncF32S,
    TruncF32U,
    TruncF64S,
    TruncF64U,
    ConvertI32S,
    ConvertI32U,
    ConvertI64S,
    ConvertI64U,
    PromoteF32,
    DemoteF64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    GetLocal {
        index: u32,
        ty: NativeType,
    },
    SetLocal {
        index: u32,
        value: Box<Expr>,
    },
    TeeLocal {
        index: u32,
        value: Box<Expr>,
        ty: NativeType,
    },
    GetGlobal {
        name: String,
        ty: NativeType,
    },
    SetGlobal {
        name: String,
        value: Box<Expr>,
    },
    Load {
        bytes: u8,
        signed: bool,
        offset: u32,
        ptr: Box<Expr>,
        ty: NativeType,
    },
    Store {
        bytes: u8,
        offset: u32,
        ptr: Box<Expr>,
        value: Box<Expr>,
    },
    Unary {
        op: UnOp,
        value: Box<Expr>,
        ty: NativeType,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        ty: NativeType,
    },
    Block {
        label: Option<String>,
        children: Vec<Expr>,
        ty: NativeType,
    },
    Loop {
        label: String,
        body: Box<Expr>,
    },
    If {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Option<Box<Expr>>,
        ty: NativeType,
    },
    Break {
        label: String,
        condition: Option<Box<Expr>>,
    },
    Return {
        value: Option<Box<Expr>>,
    },
    Call {
        target: String,
        operands: Vec<Expr>,
        ty: NativeType,
    },
    CallIndirect {
        params: Vec<NativeType>,
        result: NativeType,
        index: Box<Expr>,
        operands: Vec<Expr>,
    },
    Drop {
        value: Box<Expr>,
    },
    Unreachable,
    Nop,
}

impl Expr {
    /// Static type of the value this expression leaves on the stack.
    pub fn ty(&self) -> NativeType {
        match self {
            Expr::I32(_) => NativeType::I32,
            Expr::I64(_) => NativeType::I64,
            Expr::F32(_) => NativeType::F32,
            Expr::F64(_) => NativeType::F64,
            Expr::GetLocal { ty, .. }
            | Expr::TeeLocal { ty, .. }
            | Expr::GetGlobal { ty, .. }
            | Expr::Load { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Block { ty, .. }
            | Expr::If { ty, .. }
            | Expr::Call { ty, .. } => *ty,
            Expr::CallIndirect { result, .. } => *result,
            Expr::SetLocal { .. }
            | Expr::SetGlobal { .. }
            | Expr::Store { .. }
            | Expr::Loop { .. }
            | Expr::Break { .. }
            | Expr::Return { .. }
            | Expr::Drop { .. }
            | Expr::Unreachable
            | Expr::Nop => NativeType::None,
        }
    }

    pub fn constant(value: ConstValue) -> Expr {
        match value {
            ConstValue::I32(v) => Expr::I32(v),
            ConstValue::I64(v) => Expr::I64(v),
            ConstValue::F32(v) => Expr::F32(v),
            ConstValue::F64(v) => Expr::F64(v),
        }
    }

    /// Constant introspection: the literal value of a constant node.
    pub fn constant_value(&self) -> Option<ConstValue> {
        match *self {
            Expr::I32(v) => Some(ConstValue::I32(v)),
            Expr::I64(v) => Some(ConstValue::I64(v)),
            Expr::F32(v) => Some(ConstValue::F32(v)),
            Expr::F64(v) => Some(ConstValue::F64(v)),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.constant_value().is_some()
    }

    /// Whether re-evaluating this expression is observably equivalent to
    /// evaluating it once. Used to decide between cloning and tee-ing.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Expr::I32(_)
                | Expr::I64(_)
                | Expr::F32(_)
                | Expr::F64(_)
                | Expr::GetLocal { .. }
                | Expr::GetGlobal { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<NativeType>,
    pub result: NativeType,
    /// Additional locals after the parameters.
    pub locals: Vec<NativeType>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionImport {
    pub name: String,
    pub module: String,
    pub field: String,
    pub params: Vec<NativeType>,
    pub result: NativeType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrGlobal {
    pub name: String,
    pub ty: NativeType,
    pub mutable: bool,
    pub init: ConstValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalImport {
    pub name: String,
    pub module: String,
    pub field: String,
    pub ty: NativeType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub offset: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    pub initial_pages: u64,
    pub maximum_pages: Option<u64>,
    /// Import memory from `env.memory` instead of defining it.
    pub import: bool,
    pub export_as: Option<String>,
    pub memory64: bool,
}

/// The module under construction. Functions, globals, and imports are
/// addressed by internal name until emission assigns indices.
#[derive(Debug, Default)]
pub struct Module {
    pub(crate) functions: Vec<IrFunction>,
    pub(crate) function_imports: Vec<FunctionImport>,
    pub(crate) globals: Vec<IrGlobal>,
    pub(crate) global_imports: Vec<GlobalImport>,
    pub(crate) function_exports: Vec<(String, String)>,
    pub(crate) global_exports: Vec<(String, String)>,
    pub(crate) memory: Option<MemoryConfig>,
    pub(crate) segments: Vec<DataSegment>,
    pub(crate) table: Vec<String>,
    pub(crate) start: Option<String>,
    /// Write a name section so tooling shows source-level names.
    pub(crate) debug_names: bool,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    pub fn add_function(
        &mut self,
        name: &str,
        params: Vec<NativeType>,
        result: NativeType,
        locals: Vec<NativeType>,
        body: Expr,
    ) {
        debug_assert!(self.get_function(name).is_none(), "duplicate function {name}");
        self.functions.push(IrFunction {
            name: name.to_string(),
            params,
            result,
            locals,
            body,
        });
    }

    pub fn add_function_import(
        &mut self,
        name: &str,
        module: &str,
        field: &str,
        params: Vec<NativeType>,
        result: NativeType,
    ) {
        self.function_imports.push(FunctionImport {
            name: name.to_string(),
            module: module.to_string(),
            field: field.to_string(),
            params,
            result,
        });
    }

    pub fn add_global(&mut self, name: &str, ty: NativeType, mutable: bool, init: ConstValue) {
        self.globals.push(IrGlobal {
            name: name.to_string(),
            ty,
            mutable,
            init,
        });
    }

    pub fn add_global_import(&mut self, name: &str, module: &str, field: &str, ty: NativeType) {
        self.global_imports.push(GlobalImport {
            name: name.to_string(),
            module: module.to_string(),
            field: field.to_string(),
            ty,
        });
    }

    pub fn add_function_export(&mut self, export_name: &str, internal_name: &str) {
        self.function_exports
            .push((export_name.to_string(), internal_name.to_string()));
    }

    pub fn add_global_export(&mut self, export_name: &str, internal_name: &str) {
        self.global_exports
            .push((export_name.to_string(), internal_name.to_string()));
    }

    pub fn set_memory(&mut self, config: MemoryConfig) {
        self.memory = Some(config);
    }

    pub fn add_data_segment(&mut self, offset: u32, data: Vec<u8>) {
        self.segments.push(DataSegment { offset, data });
    }

    /// Append a function to the function table, returning its table index.
    /// Entries are compact and zero-indexed.
    pub fn add_table_entry(&mut self, name: &str) -> u32 {
        let index = self.table.len() as u32;
        self.table.push(name.to_string());
        index
    }

    pub fn set_start(&mut self, name: &str) {
        self.start = Some(name.to_string());
    }

    pub fn set_debug_names(&mut self, enabled: bool) {
        self.debug_names = enabled;
    }

    pub fn get_function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[IrFunction] {
        &self.functions
    }

    pub fn function_imports(&self) -> &[FunctionImport] {
        &self.function_imports
    }

    pub fn globals(&self) -> &[IrGlobal] {
        &self.globals
    }

    pub fn global_imports(&self) -> &[GlobalImport] {
        &self.global_imports
    }

    pub fn function_exports(&self) -> &[(String, String)] {
        &self.function_exports
    }

    pub fn global_exports(&self) -> &[(String, String)] {
        &self.global_exports
    }

    pub fn segments(&self) -> &[DataSegment] {
        &self.segments
    }

    pub fn table(&self) -> &[String] {
        &self.table
    }

    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.iter().any(|g| g.name == name)
            || self.global_imports.iter().any(|g| g.name == name)
    }

    pub fn remove_function(&mut self, name: &str) -> Option<IrFunction> {
        let index = self.functions.iter().position(|f| f.name == name)?;
        Some(self.functions.remove(index))
    }

    /// Run the precompute pass over one function, folding its body to a
    /// literal constant when it is side-effect free. Precomputing a body
    /// that is already a constant leaves it unchanged.
    pub fn run_precompute(&mut self, name: &str) {
        if let Some(index) = self.functions.iter().position(|f| f.name == name) {
            let body = std::mem::replace(&mut self.functions[index].body, Expr::Nop);
            self.functions[index].body = precompute::precompute(body);
        }
    }

    /// Serialize the module to WebAssembly bytes.
    pub fn emit(&self) -> Result<Vec<u8>, EmitError> {
        emit::emit(self)
    }

    /// Render the module as WebAssembly text, for tests and debugging.
    pub fn to_wat(&self) -> Result<String, EmitError> {
        let bytes = self.emit()?;
        wasmprinter::print_bytes(&bytes).map_err(|e| EmitError::Print(e.to_string()))
    }
}
