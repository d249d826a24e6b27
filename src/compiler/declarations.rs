//! Declaration lowering: sources, globals, enums, functions, classes, and
//! namespaces, including the import/export surface.
//!
//! A source compiles at most once; imports compile their target source
//! before continuing. In reachable mode only exported declarations of the
//! visited sources are lowered eagerly; everything else compiles on first
//! reference. Generic prototypes never compile without a type-argument
//! application.

use crate::ast::{Modifiers, Statement};
use crate::compiler::flow::ScopedLocal;
use crate::compiler::{element_state, Compiler, Conversion, FunctionState};
use crate::element::{Element, ElementFlags, FunctionPrototype};
use crate::module::{BinOp, ConstValue, Expr, NativeType};
use crate::types::{ClassId, Type};

impl Compiler {
    /// Run `f` with the start function's lowering state active, so that
    /// top-level statements and global initializers share one slot space.
    /// Reentrant: while already in start context the state stays in place.
    pub(crate) fn compile_in_start<R>(&mut self, f: impl FnOnce(&mut Compiler) -> R) -> R {
        let start = match self.start_state.take() {
            Some(start) => start,
            None => return f(self),
        };
        let saved = std::mem::replace(&mut self.current, Some(start));
        let result = f(self);
        self.start_state = std::mem::replace(&mut self.current, saved);
        result
    }

    pub(crate) fn compile_source(&mut self, path: &str) {
        if !self.files_compiled.insert(path.to_string()) {
            return;
        }
        let statements = match self
            .program
            .sources
            .iter()
            .find(|s| s.normalized_path == path)
        {
            Some(source) => source.statements.clone(),
            None => {
                self.diagnostics
                    .error(format!("cannot find source `{path}`"), None);
                return;
            }
        };
        log::debug!("compiling source {path}");
        for statement in &statements {
            self.compile_top_level_statement(statement, path);
        }
    }

    fn compile_top_level_statement(&mut self, statement: &Statement, source_path: &str) {
        let eager_all = self.options.no_tree_shaking;
        let namespace = self.current_namespace.clone();
        let qualified = |name: &str| match &namespace {
            Some(ns) => format!("{ns}.{name}"),
            None => name.to_string(),
        };
        match statement {
            Statement::Function(declaration) => {
                if !declaration.type_parameters.is_empty() {
                    return;
                }
                if eager_all || declaration.modifiers.has(Modifiers::EXPORT) {
                    if let Some(Element::FunctionPrototype(prototype)) =
                        self.program.elements.get(&qualified(&declaration.name)).cloned()
                    {
                        self.resolve_function(&prototype, &[], None);
                    }
                }
            }
            Statement::Variable(variable) => {
                for declaration in &variable.declarations {
                    if eager_all || variable.modifiers.has(Modifiers::EXPORT) {
                        self.compile_global(&qualified(&declaration.name));
                    }
                }
            }
            Statement::Enum(declaration) => {
                if eager_all || declaration.modifiers.has(Modifiers::EXPORT) {
                    self.compile_enum(&qualified(&declaration.name));
                }
            }
            Statement::Class(declaration) => {
                // Classes materialize as type placeholders; methods and
                // constructors compile on demand.
                if declaration.type_parameters.is_empty()
                    && (eager_all || declaration.modifiers.has(Modifiers::EXPORT))
                {
                    if let Err(message) = self.program.ensure_class(&qualified(&declaration.name), &[])
                    {
                        self.diagnostics.error(message, Some(source_path));
                    }
                }
            }
            Statement::Namespace(declaration) => {
                let saved = self
                    .current_namespace
                    .replace(qualified(&declaration.name));
                for member in &declaration.members {
                    self.compile_top_level_statement(member, source_path);
                }
                self.current_namespace = saved;
            }
            Statement::Import { path } => {
                let path = path.clone();
                self.compile_source(&path);
            }
            Statement::Export { members, path } => {
                if let Some(path) = path {
                    let path = path.clone();
                    self.compile_source(&path);
                }
                for member in members {
                    self.compile_reexport(&member.name, member.as_name.as_deref(), source_path);
                }
            }
            _ => {
                // Everything else becomes part of the start function, in
                // source order.
                let expr = self.compile_in_start(|c| c.compile_statement(statement));
                if expr != Expr::Nop {
                    self.start_body.push(expr);
                }
            }
        }
    }

    fn compile_reexport(&mut self, name: &str, as_name: Option<&str>, source_path: &str) {
        let export_name = as_name.unwrap_or(name).to_string();
        match self.program.elements.get(name).cloned() {
            Some(Element::FunctionPrototype(prototype)) => {
                if prototype.is_generic() {
                    self.diagnostics.error(
                        format!("cannot re-export generic function `{name}`"),
                        Some(source_path),
                    );
                    return;
                }
                if let Some(instance_name) = self.resolve_function(&prototype, &[], None) {
                    self.module.add_function_export(&export_name, &instance_name);
                }
            }
            Some(Element::Global(global)) => {
                self.compile_global(&global.name);
                let (inlined, constant, value_type) = {
                    let state = self.state(&global.name);
                    (
                        state.has(element_state::INLINED),
                        state.constant,
                        state.value_type.clone(),
                    )
                };
                if inlined && global.flags.has(ElementFlags::TOP_LEVEL) {
                    if !self.module.has_global(&global.name) {
                        let native = value_type
                            .map(|t| t.native(self.target()))
                            .unwrap_or(NativeType::I32);
                        let value = constant.expect("inlined globals carry their constant");
                        self.module.add_global(&global.name, native, false, value);
                    }
                    self.module.add_global_export(&export_name, &global.name);
                } else {
                    self.diagnostics.warning(
                        format!("mutable global `{name}` cannot be re-exported"),
                        Some(source_path),
                    );
                }
            }
            _ => {
                self.diagnostics.error(
                    format!("cannot re-export unknown element `{name}`"),
                    Some(source_path),
                );
            }
        }
    }

    /// Lower one global variable. Imported constants become global imports;
    /// foldable initializers inline into the element; everything else emits
    /// a mutable global initialized in the start function.
    pub(crate) fn compile_global(&mut self, name: &str) {
        if self.state(name).has(element_state::COMPILED) {
            return;
        }
        self.state(name).set(element_state::COMPILED);
        let global = match self.program.elements.get(name).cloned() {
            Some(Element::Global(global)) => global,
            _ => {
                self.diagnostics
                    .error(format!("`{name}` is not a global"), None);
                return;
            }
        };
        log::debug!("compiling global {name}");

        let declared_type = match &global.type_node {
            Some(node) => match self.program.resolve_type(node, None) {
                Ok(ty) => Some(ty),
                Err(message) => {
                    self.diagnostics.error(message, Some(name));
                    return;
                }
            },
            None => None,
        };

        // Imported (declared) globals carry no initializer to lower.
        if global.flags.has(ElementFlags::DECLARED) {
            let ty = match declared_type {
                Some(ty) => ty,
                None => {
                    self.diagnostics
                        .error(format!("imported global `{name}` needs a type"), Some(name));
                    return;
                }
            };
            if !global.flags.has(ElementFlags::CONSTANT) {
                self.diagnostics.error(
                    format!("mutable imported global `{name}` is not supported"),
                    Some(name),
                );
                return;
            }
            let native = ty.native(self.target());
            self.state(name).value_type = Some(ty);
            self.state(name).set(element_state::IMPORTED);
            self.module
                .add_global_import(name, "env", simple_name(name), native);
            return;
        }

        // Infer or check against the initializer, lowered in the start
        // function's context under no conversion first when inferring.
        let (ty, init) = self.compile_in_start(|c| match (&declared_type, &global.initializer) {
            (Some(ty), Some(initializer)) => {
                let compiled = c.compile_expression(initializer, ty, Conversion::Implicit);
                (Some(ty.clone()), Some(compiled))
            }
            (Some(ty), None) => (Some(ty.clone()), None),
            (None, Some(initializer)) => {
                let compiled = c.compile_expression(initializer, &Type::void(), Conversion::None);
                let inferred = c.current_type.clone();
                if inferred.is_void() {
                    c.diagnostics.error(
                        format!("cannot infer a type for `{name}` from a void initializer"),
                        Some(name),
                    );
                    (None, None)
                } else {
                    (Some(inferred), Some(compiled))
                }
            }
            (None, None) => {
                c.diagnostics.error(
                    format!("global `{name}` needs a type annotation or an initializer"),
                    Some(name),
                );
                (None, None)
            }
        });
        let ty = match ty {
            Some(ty) => ty,
            None => return,
        };
        let native = ty.native(self.target());
        self.state(name).value_type = Some(ty.clone());
        let zero = zero_of(native);
        let exported = global.flags.has(ElementFlags::EXPORTED) && global.flags.has(ElementFlags::TOP_LEVEL);

        match init {
            Some(init) => match self.precompute_constant(init) {
                Ok(value) if global.flags.has(ElementFlags::CONSTANT) => {
                    let state = self.state(name);
                    state.set(element_state::INLINED);
                    state.constant = Some(value);
                    // Reads inline everywhere; the immutable IR global only
                    // materializes when the export surface needs it.
                    if exported {
                        self.module.add_global(name, native, false, value);
                        self.module.add_global_export(simple_name(name), name);
                    }
                }
                Ok(value) => {
                    // Mutable, but its initial value is known statically.
                    self.module.add_global(name, native, true, value);
                    if exported {
                        self.diagnostics.warning(
                            format!("mutable global `{name}` cannot be exported"),
                            Some(name),
                        );
                    }
                }
                Err(init) => {
                    if global.flags.has(ElementFlags::CONSTANT) {
                        self.diagnostics.warning(
                            format!("compiling constant `{name}` as mutable: its initializer does not fold"),
                            Some(name),
                        );
                    }
                    self.module.add_global(name, native, true, zero);
                    self.start_body.push(Expr::SetGlobal {
                        name: name.to_string(),
                        value: Box::new(init),
                    });
                    if exported {
                        self.diagnostics.warning(
                            format!("mutable global `{name}` cannot be exported"),
                            Some(name),
                        );
                    }
                }
            },
            None => {
                self.module.add_global(name, native, true, zero);
                if exported {
                    self.diagnostics.warning(
                        format!("mutable global `{name}` cannot be exported"),
                        Some(name),
                    );
                }
            }
        }
    }

    /// Lower an enum: values compile in declaration order, each either a
    /// precomputed i32 constant (cached and inlined on reference) or a
    /// runtime-initialized i32 global assigned in the start function.
    pub(crate) fn compile_enum(&mut self, name: &str) {
        if self.state(name).has(element_state::COMPILED) {
            return;
        }
        self.state(name).set(element_state::COMPILED);
        let e = match self.program.elements.get(name).cloned() {
            Some(Element::Enum(e)) => e,
            _ => {
                self.diagnostics
                    .error(format!("`{name}` is not an enum"), None);
                return;
            }
        };
        log::debug!("compiling enum {name}");
        let saved_enum = self.current_enum.replace(name.to_string());

        let mut previous: Option<(String, Option<i32>)> = None;
        for value in &e.values {
            let internal = e.value_name(&value.name);
            let constant = match &value.value {
                Some(expression) => {
                    let compiled = self.compile_in_start(|c| {
                        c.compile_expression(expression, &Type::i32(), Conversion::Implicit)
                    });
                    match self.precompute_constant(compiled) {
                        Ok(ConstValue::I32(v)) => Some(v),
                        Ok(_) => {
                            self.diagnostics.error(
                                format!("enum value `{internal}` must be an i32 constant"),
                                Some(name),
                            );
                            Some(0)
                        }
                        Err(init) => {
                            self.module
                                .add_global(&internal, NativeType::I32, true, ConstValue::I32(0));
                            self.start_body.push(Expr::SetGlobal {
                                name: internal.clone(),
                                value: Box::new(init),
                            });
                            None
                        }
                    }
                }
                None => match &previous {
                    None => Some(0),
                    Some((_, Some(previous_value))) => Some(previous_value.wrapping_add(1)),
                    Some((previous_name, None)) => {
                        // The previous value is only known at module start.
                        self.module
                            .add_global(&internal, NativeType::I32, true, ConstValue::I32(0));
                        self.start_body.push(Expr::SetGlobal {
                            name: internal.clone(),
                            value: Box::new(Expr::Binary {
                                op: BinOp::Add,
                                left: Box::new(Expr::GetGlobal {
                                    name: previous_name.clone(),
                                    ty: NativeType::I32,
                                }),
                                right: Box::new(Expr::I32(1)),
                                ty: NativeType::I32,
                            }),
                        });
                        None
                    }
                },
            };
            let state = self.state(&internal);
            state.set(element_state::COMPILED);
            state.value_type = Some(Type::i32());
            state.constant = constant.map(ConstValue::I32);
            previous = Some((internal, constant));
        }
        self.current_enum = saved_enum;
    }

    /// Resolve a prototype with type arguments to a concrete instance and
    /// compile it. Returns the instance's internal name.
    pub(crate) fn resolve_function(
        &mut self,
        prototype: &FunctionPrototype,
        type_arguments: &[Type],
        this_class: Option<ClassId>,
    ) -> Option<String> {
        match self
            .program
            .resolve_prototype(prototype, type_arguments, this_class, None)
        {
            Ok(instance) => {
                let name = instance.name.clone();
                self.instances.entry(name.clone()).or_insert(instance);
                self.compile_function_instance(&name);
                Some(name)
            }
            Err(message) => {
                let context = self.func_name();
                self.diagnostics.error(message, Some(&context));
                None
            }
        }
    }

    /// Compile one concrete function. A second entry short-circuits: the
    /// COMPILED flag is carried exactly once per element.
    pub(crate) fn compile_function_instance(&mut self, name: &str) {
        if self.state(name).has(element_state::COMPILED) {
            return;
        }
        self.state(name).set(element_state::COMPILED);
        let instance = self.instances[name].clone();
        let signature = instance.signature.clone();
        let target = self.target();
        let natives = signature.native_parameters(target);
        let result = signature.return_type.native(target);

        let body_statements = match &instance.declaration.body {
            Some(body) => body.clone(),
            None => {
                if !instance.flags.has(ElementFlags::DECLARED) {
                    self.diagnostics.error(
                        format!("function `{name}` has no body and is not declared"),
                        Some(name),
                    );
                }
                self.state(name).set(element_state::IMPORTED);
                self.module.add_function_import(
                    name,
                    "env",
                    simple_name(&instance.prototype),
                    natives,
                    result,
                );
                return;
            }
        };
        log::debug!("compiling function {name}");

        let mut state = FunctionState::new(
            name.to_string(),
            signature.clone(),
            instance.this_class,
            instance.type_arguments.clone(),
        );
        let this_offset = u32::from(signature.this_type.is_some());
        let mut duplicates = Vec::new();
        for (i, parameter) in instance.declaration.parameters.iter().enumerate() {
            let ty = signature.parameter_types[i].clone();
            let local = ScopedLocal {
                index: Some(this_offset + i as u32),
                ty,
                constant: None,
                is_const: false,
            };
            if state.flow.add_scoped_local(&parameter.name, local).is_err() {
                duplicates.push(parameter.name.clone());
            }
        }
        for duplicate in duplicates {
            self.diagnostics.error(
                format!("duplicate parameter name `{duplicate}`"),
                Some(name),
            );
        }

        let saved = self.current.replace(state);
        let saved_namespace = std::mem::replace(
            &mut self.current_namespace,
            namespace_of(&instance.prototype),
        );
        let saved_enum = self.current_enum.take();
        let mut body = self.compile_statements(&body_statements);
        let state = self.current.take().expect("function state was just set");
        self.current = saved;
        self.current_namespace = saved_namespace;
        self.current_enum = saved_enum;

        if !signature.return_type.is_void() {
            if state.flow.is_set(crate::compiler::flow::FlowFlags::RETURNS) {
                // All paths proved to return: hint the validator past the
                // structured end of the body.
                body.push(Expr::Unreachable);
            } else {
                self.diagnostics.error(
                    format!("not all code paths of `{name}` return a value"),
                    Some(name),
                );
            }
        }
        self.module.add_function(
            name,
            natives,
            result,
            state.locals,
            Expr::Block {
                label: None,
                children: body,
                ty: NativeType::None,
            },
        );
        if instance.flags.has(ElementFlags::EXPORTED) && instance.flags.has(ElementFlags::TOP_LEVEL)
        {
            self.module
                .add_function_export(simple_name(&instance.prototype), name);
        }
    }
}

/// The unqualified tail of a dotted internal name.
fn simple_name(internal: &str) -> &str {
    internal.rsplit('.').next().unwrap_or(internal)
}

fn namespace_of(internal: &str) -> Option<String> {
    internal.rfind('.').map(|dot| internal[..dot].to_string())
}

fn zero_of(native: NativeType) -> ConstValue {
    match native {
        NativeType::I64 => ConstValue::I64(0),
        NativeType::F32 => ConstValue::F32(0.0),
        NativeType::F64 => ConstValue::F64(0.0),
        _ => ConstValue::I32(0),
    }
}
