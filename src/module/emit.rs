//! Serialization of the IR module to WebAssembly bytes.
//!
//! Section encoders are filled in whatever order emission discovers their
//! contents (the type section grows while function bodies are encoded) and
//! assembled in standard section order at the end. Function types are
//! deduplicated so identical signatures share one type index.

use std::borrow::Cow;
use std::collections::HashMap;

use thiserror::Error;
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, ElementSection, Elements, EntityType,
    ExportKind, ExportSection, Function, FunctionSection, GlobalSection, GlobalType,
    ImportSection, Instruction, MemArg, MemorySection, MemoryType, Module as EncodedModule,
    NameMap, NameSection, RefType, StartSection, TableSection, TableType, TypeSection, ValType,
};

use super::{BinOp, ConstValue, Expr, Module, NativeType, UnOp};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("call to unknown function `{0}`")]
    UnknownFunction(String),
    #[error("reference to unknown global `{0}`")]
    UnknownGlobal(String),
    #[error("branch to unknown label `{0}`")]
    UnknownLabel(String),
    #[error("start function `{0}` is not defined")]
    UnknownStart(String),
    #[error("void expression in a value position")]
    VoidValue,
    #[error("failed to print module: {0}")]
    Print(String),
}

impl NativeType {
    pub(crate) fn val_type(self) -> Option<ValType> {
        match self {
            NativeType::None => None,
            NativeType::I32 => Some(ValType::I32),
            NativeType::I64 => Some(ValType::I64),
            NativeType::F32 => Some(ValType::F32),
            NativeType::F64 => Some(ValType::F64),
        }
    }

    fn block_type(self) -> BlockType {
        match self.val_type() {
            Some(v) => BlockType::Result(v),
            None => BlockType::Empty,
        }
    }
}

struct Emitter<'m> {
    module: &'m Module,
    types: TypeSection,
    type_count: u32,
    type_indices: HashMap<(Vec<NativeType>, NativeType), u32>,
    function_indices: HashMap<&'m str, u32>,
    global_indices: HashMap<&'m str, u32>,
}

pub(crate) fn emit(module: &Module) -> Result<Vec<u8>, EmitError> {
    let mut emitter = Emitter {
        module,
        types: TypeSection::new(),
        type_count: 0,
        type_indices: HashMap::new(),
        function_indices: HashMap::new(),
        global_indices: HashMap::new(),
    };
    emitter.run()
}

impl<'m> Emitter<'m> {
    fn run(&mut self) -> Result<Vec<u8>, EmitError> {
        let module = self.module;
        // Imports occupy the front of each index space.
        for (i, import) in module.function_imports.iter().enumerate() {
            self.function_indices.insert(&import.name, i as u32);
        }
        let import_count = module.function_imports.len() as u32;
        for (i, function) in module.functions.iter().enumerate() {
            self.function_indices
                .insert(&function.name, import_count + i as u32);
        }
        for (i, import) in module.global_imports.iter().enumerate() {
            self.global_indices.insert(&import.name, i as u32);
        }
        let global_import_count = module.global_imports.len() as u32;
        for (i, global) in module.globals.iter().enumerate() {
            self.global_indices
                .insert(&global.name, global_import_count + i as u32);
        }

        let mut imports = ImportSection::new();
        for import in &module.function_imports {
            let type_index = self.type_index(import.params.clone(), import.result);
            imports.import(&import.module, &import.field, EntityType::Function(type_index));
        }
        for import in &module.global_imports {
            let val_type = import.ty.val_type().ok_or(EmitError::VoidValue)?;
            imports.import(
                &import.module,
                &import.field,
                EntityType::Global(GlobalType {
                    val_type,
                    mutable: false,
                    shared: false,
                }),
            );
        }

        let memory64 = module.memory.as_ref().map_or(false, |m| m.memory64);
        let mut memories = MemorySection::new();
        if let Some(config) = &module.memory {
            let memory_type = MemoryType {
                minimum: config.initial_pages,
                maximum: config.maximum_pages,
                memory64: config.memory64,
                shared: false,
                page_size_log2: None,
            };
            if config.import {
                imports.import("env", "memory", EntityType::Memory(memory_type));
            } else {
                memories.memory(memory_type);
            }
        }

        let mut functions = FunctionSection::new();
        let mut code = CodeSection::new();
        for function in &module.functions {
            let type_index = self.type_index(function.params.clone(), function.result);
            functions.function(type_index);

            let locals: Vec<(u32, ValType)> = function
                .locals
                .iter()
                .map(|ty| ty.val_type().ok_or(EmitError::VoidValue).map(|v| (1, v)))
                .collect::<Result<_, _>>()?;
            let mut body = Function::new(locals);
            let mut labels: Vec<Option<String>> = Vec::new();
            // An unlabeled top-level block is the function frame itself:
            // splicing its children keeps `return` polymorphism intact up
            // to the function's end.
            match &function.body {
                Expr::Block { label: None, children, .. } => {
                    for child in children {
                        self.emit_expr(&mut body, child, &mut labels)?;
                    }
                }
                other => self.emit_expr(&mut body, other, &mut labels)?,
            }
            body.instruction(&Instruction::End);
            code.function(&body);
        }

        let mut tables = TableSection::new();
        let mut elements = ElementSection::new();
        if !module.table.is_empty() {
            tables.table(TableType {
                element_type: RefType::FUNCREF,
                table64: false,
                minimum: module.table.len() as u64,
                maximum: Some(module.table.len() as u64),
                shared: false,
            });
            let indices: Vec<u32> = module
                .table
                .iter()
                .map(|name| self.function_index(name))
                .collect::<Result<_, _>>()?;
            elements.active(
                None,
                &ConstExpr::i32_const(0),
                Elements::Functions(Cow::Owned(indices)),
            );
        }

        let mut globals = GlobalSection::new();
        for global in &module.globals {
            let val_type = global.ty.val_type().ok_or(EmitError::VoidValue)?;
            globals.global(
                GlobalType {
                    val_type,
                    mutable: global.mutable,
                    shared: false,
                },
                &const_expr(global.init),
            );
        }

        let mut exports = ExportSection::new();
        for (export_name, internal) in &module.function_exports {
            exports.export(export_name, ExportKind::Func, self.function_index(internal)?);
        }
        for (export_name, internal) in &module.global_exports {
            let index = *self
                .global_indices
                .get(internal.as_str())
                .ok_or_else(|| EmitError::UnknownGlobal(internal.clone()))?;
            exports.export(export_name, ExportKind::Global, index);
        }
        if let Some(config) = &module.memory {
            if let Some(name) = &config.export_as {
                exports.export(name, ExportKind::Memory, 0);
            }
        }

        let mut data = DataSection::new();
        for segment in &module.segments {
            let offset = if memory64 {
                ConstExpr::i64_const(segment.offset as i64)
            } else {
                ConstExpr::i32_const(segment.offset as i32)
            };
            data.active(0, &offset, segment.data.iter().copied());
        }

        // Assemble in standard section order.
        let mut encoded = EncodedModule::new();
        encoded.section(&self.types);
        encoded.section(&imports);
        encoded.section(&functions);
        if !module.table.is_empty() {
            encoded.section(&tables);
        }
        if !memories.is_empty() {
            encoded.section(&memories);
        }
        encoded.section(&globals);
        encoded.section(&exports);
        if let Some(start) = &module.start {
            let function_index = self
                .function_indices
                .get(start.as_str())
                .copied()
                .ok_or_else(|| EmitError::UnknownStart(start.clone()))?;
            encoded.section(&StartSection { function_index });
        }
        if !module.table.is_empty() {
            encoded.section(&elements);
        }
        encoded.section(&code);
        encoded.section(&data);

        if module.debug_names {
            let mut names = NameSection::new();
            let mut function_names = NameMap::new();
            let mut indexed: Vec<(u32, &str)> = self
                .function_indices
                .iter()
                .map(|(name, index)| (*index, *name))
                .collect();
            indexed.sort_by_key(|(index, _)| *index);
            for (index, name) in indexed {
                function_names.append(index, name);
            }
            names.functions(&function_names);
            encoded.section(&names);
        }

        Ok(encoded.finish())
    }

    fn type_index(&mut self, params: Vec<NativeType>, result: NativeType) -> u32 {
        if let Some(&index) = self.type_indices.get(&(params.clone(), result)) {
            return index;
        }
        let param_vals: Vec<ValType> = params.iter().filter_map(|t| t.val_type()).collect();
        let result_vals: Vec<ValType> = result.val_type().into_iter().collect();
        let index = self.type_count;
        self.types.ty().function(param_vals, result_vals);
        self.type_count += 1;
        self.type_indices.insert((params, result), index);
        index
    }

    fn function_index(&self, name: &str) -> Result<u32, EmitError> {
        self.function_indices
            .get(name)
            .copied()
            .ok_or_else(|| EmitError::UnknownFunction(name.to_string()))
    }

    fn global_index(&self, name: &str) -> Result<u32, EmitError> {
        self.global_indices
            .get(name)
            .copied()
            .ok_or_else(|| EmitError::UnknownGlobal(name.to_string()))
    }

    fn emit_expr(
        &mut self,
        body: &mut Function,
        expr: &Expr,
        labels: &mut Vec<Option<String>>,
    ) -> Result<(), EmitError> {
        match expr {
            Expr::I32(v) => {
                body.instruction(&Instruction::I32Const(*v));
            }
            Expr::I64(v) => {
                body.instruction(&Instruction::I64Const(*v));
            }
            Expr::F32(v) => {
                body.instruction(&Instruction::F32Const((*v).into()));
            }
            Expr::F64(v) => {
                body.instruction(&Instruction::F64Const((*v).into()));
            }
            Expr::GetLocal { index, .. } => {
                body.instruction(&Instruction::LocalGet(*index));
            }
            Expr::SetLocal { index, value } => {
                self.emit_expr(body, value, labels)?;
                body.instruction(&Instruction::LocalSet(*index));
            }
            Expr::TeeLocal { index, value, .. } => {
                self.emit_expr(body, value, labels)?;
                body.instruction(&Instruction::LocalTee(*index));
            }
            Expr::GetGlobal { name, .. } => {
                let index = self.global_index(name)?;
                body.instruction(&Instruction::GlobalGet(index));
            }
            Expr::SetGlobal { name, value } => {
                let index = self.global_index(name)?;
                self.emit_expr(body, value, labels)?;
                body.instruction(&Instruction::GlobalSet(index));
            }
            Expr::Load {
                bytes,
                signed,
                offset,
                ptr,
                ty,
            } => {
                self.emit_expr(body, ptr, labels)?;
                body.instruction(&load_instruction(*bytes, *signed, *offset, *ty)?);
            }
            Expr::Store {
                bytes,
                offset,
                ptr,
                value,
            } => {
                self.emit_expr(body, ptr, labels)?;
                let value_ty = value.ty();
                self.emit_expr(body, value, labels)?;
                body.instruction(&store_instruction(*bytes, *offset, value_ty)?);
            }
            Expr::Unary { op, value, ty } => {
                let operand_ty = value.ty();
                self.emit_expr(body, value, labels)?;
                body.instruction(&unary_instruction(*op, operand_ty, *ty));
            }
            Expr::Binary { op, left, right, .. } => {
                let operand_ty = left.ty();
                self.emit_expr(body, left, labels)?;
                self.emit_expr(body, right, labels)?;
                body.instruction(&binary_instruction(*op, operand_ty));
            }
            Expr::Block { label, children, ty } => {
                body.instruction(&Instruction::Block(ty.block_type()));
                labels.push(label.clone());
                for child in children {
                    self.emit_expr(body, child, labels)?;
                }
                labels.pop();
                body.instruction(&Instruction::End);
            }
            Expr::Loop { label, body: inner } => {
                body.instruction(&Instruction::Loop(BlockType::Empty));
                labels.push(Some(label.clone()));
                self.emit_expr(body, inner, labels)?;
                labels.pop();
                body.instruction(&Instruction::End);
            }
            Expr::If {
                condition,
                if_true,
                if_false,
                ty,
            } => {
                self.emit_expr(body, condition, labels)?;
                body.instruction(&Instruction::If(ty.block_type()));
                labels.push(None);
                self.emit_expr(body, if_true, labels)?;
                if let Some(if_false) = if_false {
                    body.instruction(&Instruction::Else);
                    self.emit_expr(body, if_false, labels)?;
                }
                labels.pop();
                body.instruction(&Instruction::End);
            }
            Expr::Break { label, condition } => {
                let depth = labels
                    .iter()
                    .rev()
                    .position(|l| l.as_deref() == Some(label.as_str()))
                    .ok_or_else(|| EmitError::UnknownLabel(label.clone()))?
                    as u32;
                match condition {
                    Some(condition) => {
                        self.emit_expr(body, condition, labels)?;
                        body.instruction(&Instruction::BrIf(depth));
                    }
                    None => {
                        body.instruction(&Instruction::Br(depth));
                    }
                }
            }
            Expr::Return { value } => {
                if let Some(value) = value {
                    self.emit_expr(body, value, labels)?;
                }
                body.instruction(&Instruction::Return);
            }
            Expr::Call { target, operands, .. } => {
                for operand in operands {
                    self.emit_expr(body, operand, labels)?;
                }
                let index = self.function_index(target)?;
                body.instruction(&Instruction::Call(index));
            }
            Expr::CallIndirect {
                params,
                result,
                index,
                operands,
            } => {
                for operand in operands {
                    self.emit_expr(body, operand, labels)?;
                }
                self.emit_expr(body, index, labels)?;
                let type_index = self.type_index(params.clone(), *result);
                body.instruction(&Instruction::CallIndirect {
                    type_index,
                    table_index: 0,
                });
            }
            Expr::Drop { value } => {
                self.emit_expr(body, value, labels)?;
                body.instruction(&Instruction::Drop);
            }
            Expr::Unreachable => {
                body.instruction(&Instruction::Unreachable);
            }
            Expr::Nop => {
                body.instruction(&Instruction::Nop);
            }
        }
        Ok(())
    }
}

fn const_expr(value: ConstValue) -> ConstExpr {
    match value {
        ConstValue::I32(v) => ConstExpr::i32_const(v),
        ConstValue::I64(v) => ConstExpr::i64_const(v),
        ConstValue::F32(v) => ConstExpr::f32_const(v.into()),
        ConstValue::F64(v) => ConstExpr::f64_const(v.into()),
    }
}

fn mem_arg(offset: u32, bytes: u8) -> MemArg {
    MemArg {
        offset: offset as u64,
        align: (bytes as u32).trailing_zeros(),
        memory_index: 0,
    }
}

fn load_instruction(
    bytes: u8,
    signed: bool,
    offset: u32,
    ty: NativeType,
) -> Result<Instruction<'static>, EmitError> {
    let arg = mem_arg(offset, bytes);
    Ok(match (ty, bytes, signed) {
        (NativeType::I32, 1, true) => Instruction::I32Load8S(arg),
        (NativeType::I32, 1, false) => Instruction::I32Load8U(arg),
        (NativeType::I32, 2, true) => Instruction::I32Load16S(arg),
        (NativeType::I32, 2, false) => Instruction::I32Load16U(arg),
        (NativeType::I32, 4, _) => Instruction::I32Load(arg),
        (NativeType::I64, 1, true) => Instruction::I64Load8S(arg),
        (NativeType::I64, 1, false) => Instruction::I64Load8U(arg),
        (NativeType::I64, 2, true) => Instruction::I64Load16S(arg),
        (NativeType::I64, 2, false) => Instruction::I64Load16U(arg),
        (NativeType::I64, 4, true) => Instruction::I64Load32S(arg),
        (NativeType::I64, 4, false) => Instruction::I64Load32U(arg),
        (NativeType::I64, 8, _) => Instruction::I64Load(arg),
        (NativeType::F32, 4, _) => Instruction::F32Load(arg),
        (NativeType::F64, 8, _) => Instruction::F64Load(arg),
        _ => return Err(EmitError::VoidValue),
    })
}

fn store_instruction(
    bytes: u8,
    offset: u32,
    value_ty: NativeType,
) -> Result<Instruction<'static>, EmitError> {
    let arg = mem_arg(offset, bytes);
    Ok(match (value_ty, bytes) {
        (NativeType::I32, 1) => Instruction::I32Store8(arg),
        (NativeType::I32, 2) => Instruction::I32Store16(arg),
        (NativeType::I32, 4) => Instruction::I32Store(arg),
        (NativeType::I64, 1) => Instruction::I64Store8(arg),
        (NativeType::I64, 2) => Instruction::I64Store16(arg),
        (NativeType::I64, 4) => Instruction::I64Store32(arg),
        (NativeType::I64, 8) => Instruction::I64Store(arg),
        (NativeType::F32, 4) => Instruction::F32Store(arg),
        (NativeType::F64, 8) => Instruction::F64Store(arg),
        _ => return Err(EmitError::VoidValue),
    })
}

fn unary_instruction(op: UnOp, operand: NativeType, result: NativeType) -> Instruction<'static> {
    match op {
        UnOp::Eqz => match operand {
            NativeType::I64 => Instruction::I64Eqz,
            _ => Instruction::I32Eqz,
        },
        UnOp::Neg => match operand {
            NativeType::F32 => Instruction::F32Neg,
            _ => Instruction::F64Neg,
        },
        UnOp::WrapI64 => Instruction::I32WrapI64,
        UnOp::ExtendI32S => Instruction::I64ExtendI32S,
        UnOp::ExtendI32U => Instruction::I64ExtendI32U,
        UnOp::TruncF32S => match result {
            NativeType::I64 => Instruction::I64TruncF32S,
            _ => Instruction::I32TruncF32S,
        },
        UnOp::TruncF32U => match result {
            NativeType::I64 => Instruction::I64TruncF32U,
            _ => Instruction::I32TruncF32U,
        },
        UnOp::TruncF64S => match result {
            NativeType::I64 => Instruction::I64TruncF64S,
            _ => Instruction::I32TruncF64S,
        },
        UnOp::TruncF64U => match result {
            NativeType::I64 => Instruction::I64TruncF64U,
            _ => Instruction::I32TruncF64U,
        },
        UnOp::ConvertI32S => match result {
            NativeType::F32 => Instruction::F32ConvertI32S,
            _ => Instruction::F64ConvertI32S,
        },
        UnOp::ConvertI32U => match result {
            NativeType::F32 => Instruction::F32ConvertI32U,
            _ => Instruction::F64ConvertI32U,
        },
        UnOp::ConvertI64S => match result {
            NativeType::F32 => Instruction::F32ConvertI64S,
            _ => Instruction::F64ConvertI64S,
        },
        UnOp::ConvertI64U => match result {
            NativeType::F32 => Instruction::F32ConvertI64U,
            _ => Instruction::F64ConvertI64U,
        },
        UnOp::PromoteF32 => Instruction::F64PromoteF32,
        UnOp::DemoteF64 => Instruction::F32DemoteF64,
    }
}

fn binary_instruction(op: BinOp, operand: NativeType) -> Instruction<'static> {
    use Instruction as I;
    match operand {
        NativeType::I64 => match op {
            BinOp::Add => I::I64Add,
            BinOp::Sub => I::I64Sub,
            BinOp::Mul => I::I64Mul,
            BinOp::DivS => I::I64DivS,
            BinOp::DivU => I::I64DivU,
            BinOp::RemS => I::I64RemS,
            BinOp::RemU => I::I64RemU,
            BinOp::And => I::I64And,
            BinOp::Or => I::I64Or,
            BinOp::Xor => I::I64Xor,
            BinOp::Shl => I::I64Shl,
            BinOp::ShrS => I::I64ShrS,
            BinOp::ShrU => I::I64ShrU,
            BinOp::Eq => I::I64Eq,
            BinOp::Ne => I::I64Ne,
            BinOp::LtS => I::I64LtS,
            BinOp::LtU => I::I64LtU,
            BinOp::GtS => I::I64GtS,
            BinOp::GtU => I::I64GtU,
            BinOp::LeS => I::I64LeS,
            BinOp::LeU => I::I64LeU,
            BinOp::GeS => I::I64GeS,
            BinOp::GeU => I::I64GeU,
            BinOp::DivF | BinOp::LtF | BinOp::GtF | BinOp::LeF | BinOp::GeF => {
                unreachable!("float operator on i64 operands")
            }
        },
        NativeType::F32 => match op {
            BinOp::Add => I::F32Add,
            BinOp::Sub => I::F32Sub,
            BinOp::Mul => I::F32Mul,
            BinOp::DivF => I::F32Div,
            BinOp::Eq => I::F32Eq,
            BinOp::Ne => I::F32Ne,
            BinOp::LtF => I::F32Lt,
            BinOp::GtF => I::F32Gt,
            BinOp::LeF => I::F32Le,
            BinOp::GeF => I::F32Ge,
            _ => unreachable!("integer operator on f32 operands"),
        },
        NativeType::F64 => match op {
            BinOp::Add => I::F64Add,
            BinOp::Sub => I::F64Sub,
            BinOp::Mul => I::F64Mul,
            BinOp::DivF => I::F64Div,
            BinOp::Eq => I::F64Eq,
            BinOp::Ne => I::F64Ne,
            BinOp::LtF => I::F64Lt,
            BinOp::GtF => I::F64Gt,
            BinOp::LeF => I::F64Le,
            BinOp::GeF => I::F64Ge,
            _ => unreachable!("integer operator on f64 operands"),
        },
        _ => match op {
            BinOp::Add => I::I32Add,
            BinOp::Sub => I::I32Sub,
            BinOp::Mul => I::I32Mul,
            BinOp::DivS => I::I32DivS,
            BinOp::DivU => I::I32DivU,
            BinOp::RemS => I::I32RemS,
            BinOp::RemU => I::I32RemU,
            BinOp::And => I::I32And,
            BinOp::Or => I::I32Or,
            BinOp::Xor => I::I32Xor,
            BinOp::Shl => I::I32Shl,
            BinOp::ShrS => I::I32ShrS,
            BinOp::ShrU => I::I32ShrU,
            BinOp::Eq => I::I32Eq,
            BinOp::Ne => I::I32Ne,
            BinOp::LtS => I::I32LtS,
            BinOp::LtU => I::I32LtU,
            BinOp::GtS => I::I32GtS,
            BinOp::GtU => I::I32GtU,
            BinOp::LeS => I::I32LeS,
            BinOp::LeU => I::I32LeU,
            BinOp::GeS => I::I32GeS,
            BinOp::GeU => I::I32GeU,
            BinOp::DivF | BinOp::LtF | BinOp::GtF | BinOp::LeF | BinOp::GeF => {
                unreachable!("float operator on i32 operands")
            }
        },
    }
}
