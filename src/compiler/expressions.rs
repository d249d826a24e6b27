//! Expression lowering.
//!
//! `compile_expression` is the single entry point: it dispatches on the
//! node, leaves the value on the conceptual stack, and records the static
//! type of the result in `current_type`. Conversions to the contextual
//! type are inserted on the way out unless the caller asked to retain.

use crate::ast::{AssignOp, Expression, FunctionDeclaration, TypeNode};
use crate::compiler::{element_state, Compiler, Conversion};
use crate::element::{Element, ElementFlags};
use crate::module::{ConstValue, Expr, NativeType};
use crate::types::{common_compatible, ClassId, Signature, Type};

/// What a property-access chain resolves to when no instance is involved.
enum StaticBase {
    Namespace(String),
    Enum(String),
    Class(String),
}

impl Compiler {
    pub(crate) fn compile_expression(
        &mut self,
        expression: &Expression,
        contextual: &Type,
        conversion: Conversion,
    ) -> Expr {
        self.compile_expression_full(expression, contextual, conversion, true)
    }

    pub(crate) fn compile_expression_full(
        &mut self,
        expression: &Expression,
        contextual: &Type,
        conversion: Conversion,
        wrap: bool,
    ) -> Expr {
        let compiled = match expression {
            Expression::Null => {
                self.current_type = Type::usize();
                self.pointer_const(0)
            }
            Expression::True => {
                self.current_type = Type::bool();
                Expr::I32(1)
            }
            Expression::False => {
                self.current_type = Type::bool();
                Expr::I32(0)
            }
            Expression::This => self.compile_this(),
            Expression::Super => self.compile_super(),
            Expression::Integer(value) => self.compile_integer_literal(*value, false, contextual),
            Expression::Float(value) => self.compile_float_literal(*value, contextual),
            Expression::Str(value) => self.compile_string_literal(value),
            Expression::Array(elements) => self.compile_array_literal(elements, contextual),
            Expression::Identifier(name) => self.compile_identifier(name, contextual),
            Expression::PropertyAccess { target, property } => {
                self.compile_property_access(target, property, contextual)
            }
            Expression::ElementAccess { target, index } => {
                self.compile_element_access(target, index)
            }
            Expression::Call {
                callee,
                type_arguments,
                arguments,
            } => self.compile_call_expression(callee, type_arguments, arguments, contextual),
            Expression::New {
                class,
                type_arguments,
                arguments,
            } => self.compile_new_expression(class, type_arguments, arguments),
            Expression::Unary { op, operand } => {
                self.compile_unary_expression(*op, operand, contextual, wrap)
            }
            Expression::Postfix { op, operand } => {
                self.compile_postfix_expression(*op, operand, contextual)
            }
            Expression::Binary { op, left, right } => {
                self.compile_binary_expression(*op, left, right, contextual, wrap)
            }
            Expression::Ternary {
                condition,
                if_true,
                if_false,
            } => self.compile_ternary_expression(condition, if_true, if_false, contextual),
            Expression::Assignment { op, target, value } => {
                self.compile_assignment_expression(*op, target, value, !contextual.is_void())
            }
        };
        match conversion {
            Conversion::None => compiled,
            _ => {
                let from = self.current_type.clone();
                let converted =
                    self.convert_expression(compiled, &from, contextual, conversion == Conversion::Explicit);
                self.current_type = contextual.clone();
                converted
            }
        }
    }

    fn compile_this(&mut self) -> Expr {
        match self.current.as_ref().and_then(|f| f.this_class) {
            Some(class) => {
                self.current_type = Type::class_reference(class);
                Expr::GetLocal {
                    index: 0,
                    ty: self.target().pointer_native(),
                }
            }
            None => {
                let context = self.func_name();
                self.diagnostics
                    .error("`this` is only valid inside an instance method", Some(&context));
                self.current_type = Type::usize();
                Expr::Unreachable
            }
        }
    }

    fn compile_super(&mut self) -> Expr {
        let base = self
            .current
            .as_ref()
            .and_then(|f| f.this_class)
            .and_then(|id| self.program.class(id).base);
        match base {
            Some(base) => {
                self.current_type = Type::class_reference(base);
                Expr::GetLocal {
                    index: 0,
                    ty: self.target().pointer_native(),
                }
            }
            None => {
                let context = self.func_name();
                self.diagnostics.error(
                    "`super` is only valid inside a method of a derived class",
                    Some(&context),
                );
                self.current_type = Type::usize();
                Expr::Unreachable
            }
        }
    }

    fn compile_string_literal(&mut self, value: &str) -> Expr {
        let offset = self.memory.intern_string(value);
        self.current_type = self.string_type();
        self.pointer_const(u64::from(offset))
    }

    fn compile_array_literal(&mut self, elements: &[Expression], contextual: &Type) -> Expr {
        let context = self.func_name();
        let element_type = contextual
            .class
            .and_then(|id| self.program.class(id).type_arguments.first().cloned());
        let element_type = match element_type {
            Some(ty) => ty,
            None => {
                self.diagnostics.error(
                    "an array literal requires a contextual array class",
                    Some(&context),
                );
                self.current_type = contextual.clone();
                return Expr::Unreachable;
            }
        };
        let size = element_type.byte_size(self.target()).max(1);
        let mut bytes = Vec::with_capacity(elements.len() * size as usize);
        for element in elements {
            let compiled = self.compile_expression(element, &element_type, Conversion::Implicit);
            match self.precompute_constant(compiled) {
                Ok(value) => write_const(&mut bytes, value, size),
                Err(_) => {
                    // Runtime-initialized array literals are a later revision.
                    self.diagnostics.warning(
                        "array literals with non-constant elements are not supported",
                        Some(&context),
                    );
                    self.current_type = contextual.clone();
                    return Expr::Unreachable;
                }
            }
        }
        let offset = self.memory.add_segment(bytes, size);
        self.current_type = contextual.clone();
        self.pointer_const(u64::from(offset))
    }

    fn compile_identifier(&mut self, name: &str, contextual: &Type) -> Expr {
        // Innermost scope first: function locals, including virtual ones.
        if let Some(local) = self.func().flow.lookup_local(name).cloned() {
            self.current_type = local.ty.clone();
            return match (local.index, local.constant) {
                (_, Some(value)) => self.make_constant(&local.ty, value),
                (Some(index), None) => Expr::GetLocal {
                    index,
                    ty: local.ty.native(self.target()),
                },
                (None, None) => unreachable!("virtual local without a constant"),
            };
        }
        // Sibling values of the enum currently being compiled.
        if let Some(enum_name) = self.current_enum.clone() {
            if let Some(Element::Enum(e)) = self.program.elements.get(&enum_name) {
                if e.values.iter().any(|v| v.name == name) {
                    let enum_name = e.name.clone();
                    return self.compile_enum_value_reference(&enum_name, name);
                }
            }
        }
        let namespace = self.current_namespace.clone();
        match self
            .program
            .resolve_identifier(name, namespace.as_deref())
            .cloned()
        {
            Some(Element::Global(global)) => self.compile_global_reference(&global.name),
            Some(Element::FunctionPrototype(prototype)) => {
                self.compile_function_reference(&prototype.name, contextual)
            }
            Some(Element::Enum(_)) | Some(Element::ClassPrototype(_)) | Some(Element::Namespace(_)) => {
                let context = self.func_name();
                self.diagnostics.error(
                    format!("`{name}` is not a value"),
                    Some(&context),
                );
                self.current_type = contextual.clone();
                Expr::Unreachable
            }
            None => {
                let context = self.func_name();
                self.diagnostics
                    .error(format!("cannot find name `{name}`"), Some(&context));
                self.current_type = contextual.clone();
                Expr::Unreachable
            }
        }
    }

    /// A read of a global: inlined constants expand inline, everything else
    /// becomes a get-global. Compiles the global first if necessary.
    pub(crate) fn compile_global_reference(&mut self, name: &str) -> Expr {
        if !self.state(name).has(element_state::COMPILED) {
            self.compile_global(name);
        }
        let (constant, value_type, inlined) = {
            let state = self.state(name);
            (
                state.constant,
                state.value_type.clone().unwrap_or(Type::i32()),
                state.has(element_state::INLINED),
            )
        };
        self.current_type = value_type.clone();
        if inlined {
            let value = constant.expect("inlined globals carry their constant");
            return self.make_constant(&value_type, value);
        }
        Expr::GetGlobal {
            name: name.to_string(),
            ty: value_type.native(self.target()),
        }
    }

    pub(crate) fn compile_enum_value_reference(&mut self, enum_name: &str, value: &str) -> Expr {
        let internal = format!("{enum_name}.{value}");
        if !self.state(enum_name).has(element_state::COMPILED) {
            self.compile_enum(enum_name);
        }
        self.current_type = Type::i32();
        let state = self.state(&internal);
        if !state.has(element_state::COMPILED) {
            // Still inside this enum's own compilation: a later value is
            // being referenced before it exists.
            let context = self.func_name();
            self.diagnostics.error(
                format!("enum value `{internal}` is referenced before its initialization"),
                Some(&context),
            );
            return Expr::Unreachable;
        }
        match state.constant {
            Some(value) => Expr::constant(value),
            None => Expr::GetGlobal {
                name: internal,
                ty: NativeType::I32,
            },
        }
    }

    /// Taking a function's address: compile it, put it in the table, and
    /// yield the table index typed with the function's signature.
    fn compile_function_reference(&mut self, prototype_name: &str, contextual: &Type) -> Expr {
        let prototype = match self.program.elements.get(prototype_name).cloned() {
            Some(Element::FunctionPrototype(p)) => p,
            _ => unreachable!("caller resolved a function prototype"),
        };
        if prototype.is_generic() {
            let context = self.func_name();
            self.diagnostics.error(
                format!("generic function `{prototype_name}` cannot be used as a value"),
                Some(&context),
            );
            self.current_type = contextual.clone();
            return Expr::Unreachable;
        }
        match self.resolve_function(&prototype, &[], None) {
            Some(instance_name) => {
                let signature = self.instances[&instance_name].signature.clone();
                let id = self.program.intern_signature(signature);
                let index = self.ensure_table_index(&instance_name);
                self.current_type = Type::function_reference(id);
                Expr::I32(index as i32)
            }
            None => {
                self.current_type = contextual.clone();
                Expr::Unreachable
            }
        }
    }

    /// Resolve the non-instance part of a property chain, if any.
    fn resolve_static_base(&mut self, expression: &Expression) -> Option<StaticBase> {
        match expression {
            Expression::Identifier(name) => {
                if self.func().flow.lookup_local(name).is_some() {
                    return None;
                }
                let namespace = self.current_namespace.clone();
                match self.program.resolve_identifier(name, namespace.as_deref()) {
                    Some(Element::Namespace(n)) => Some(StaticBase::Namespace(n.name.clone())),
                    Some(Element::Enum(e)) => Some(StaticBase::Enum(e.name.clone())),
                    Some(Element::ClassPrototype(c)) => Some(StaticBase::Class(c.name.clone())),
                    _ => None,
                }
            }
            Expression::PropertyAccess { target, property } => {
                match self.resolve_static_base(target)? {
                    StaticBase::Namespace(ns) => {
                        let qualified = format!("{ns}.{property}");
                        match self.program.elements.get(&qualified) {
                            Some(Element::Namespace(_)) => Some(StaticBase::Namespace(qualified)),
                            Some(Element::Enum(_)) => Some(StaticBase::Enum(qualified)),
                            Some(Element::ClassPrototype(_)) => Some(StaticBase::Class(qualified)),
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn compile_property_access(
        &mut self,
        target: &Expression,
        property: &str,
        contextual: &Type,
    ) -> Expr {
        let context = self.func_name();
        match self.resolve_static_base(target) {
            Some(StaticBase::Enum(enum_name)) => {
                let exists = matches!(
                    self.program.elements.get(&enum_name),
                    Some(Element::Enum(e)) if e.values.iter().any(|v| v.name == property)
                );
                if !exists {
                    self.diagnostics.error(
                        format!("enum `{enum_name}` has no value `{property}`"),
                        Some(&context),
                    );
                    self.current_type = Type::i32();
                    return Expr::Unreachable;
                }
                self.compile_enum_value_reference(&enum_name, property)
            }
            Some(StaticBase::Namespace(ns)) | Some(StaticBase::Class(ns)) => {
                let qualified = format!("{ns}.{property}");
                match self.program.elements.get(&qualified).cloned() {
                    Some(Element::Global(global)) => self.compile_global_reference(&global.name),
                    Some(Element::FunctionPrototype(prototype)) => {
                        self.compile_function_reference(&prototype.name, contextual)
                    }
                    _ => {
                        self.diagnostics.error(
                            format!("cannot find name `{qualified}`"),
                            Some(&context),
                        );
                        self.current_type = contextual.clone();
                        Expr::Unreachable
                    }
                }
            }
            None => {
                // Instance side: field load or getter call.
                let this_expr = self.compile_expression(target, &Type::void(), Conversion::None);
                let this_type = self.current_type.clone();
                let class = match this_type.class {
                    Some(class) => class,
                    None => {
                        self.diagnostics.error(
                            format!(
                                "property `{property}` does not exist on type `{}`",
                                self.program.type_name(&this_type)
                            ),
                            Some(&context),
                        );
                        self.current_type = contextual.clone();
                        return Expr::Unreachable;
                    }
                };
                if let Some(field) = self.program.lookup_field(class, property).cloned() {
                    self.current_type = field.ty.clone();
                    return Expr::Load {
                        bytes: field.ty.byte_size(self.target()).max(1) as u8,
                        signed: field.ty.kind.is_signed(),
                        offset: field.offset,
                        ptr: Box::new(this_expr),
                        ty: field.ty.native(self.target()),
                    };
                }
                if let Some((owner, declaration)) = self
                    .program
                    .lookup_getter(class, property)
                    .map(|(c, d)| (c, d.clone()))
                {
                    let canonical = format!("get:{property}");
                    if let Some(instance_name) =
                        self.resolve_method(owner, &declaration, &canonical, &[])
                    {
                        return self.compile_direct_call(&instance_name, Some(this_expr), &[]);
                    }
                    self.current_type = contextual.clone();
                    return Expr::Unreachable;
                }
                self.diagnostics.error(
                    format!(
                        "property `{property}` does not exist on `{}`",
                        self.program.class(class).name
                    ),
                    Some(&context),
                );
                self.current_type = contextual.clone();
                Expr::Unreachable
            }
        }
    }

    fn compile_element_access(&mut self, target: &Expression, index: &Expression) -> Expr {
        let context = self.func_name();
        let this_expr = self.compile_expression(target, &Type::void(), Conversion::None);
        let this_type = self.current_type.clone();
        let class = match this_type.class {
            Some(class) => class,
            None => {
                self.diagnostics.error(
                    format!(
                        "type `{}` has no indexed access operator",
                        self.program.type_name(&this_type)
                    ),
                    Some(&context),
                );
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        match self.program.lookup_index_get(class).map(|(c, d)| (c, d.clone())) {
            Some((owner, declaration)) => {
                match self.resolve_method(owner, &declaration, "[]", &[]) {
                    Some(instance_name) => {
                        self.compile_direct_call(&instance_name, Some(this_expr), &[index.clone()])
                    }
                    None => {
                        self.current_type = Type::void();
                        Expr::Unreachable
                    }
                }
            }
            None => {
                self.diagnostics.error(
                    format!(
                        "class `{}` has no `[]` operator",
                        self.program.class(class).name
                    ),
                    Some(&context),
                );
                self.current_type = Type::void();
                Expr::Unreachable
            }
        }
    }

    fn compile_ternary_expression(
        &mut self,
        condition: &Expression,
        if_true: &Expression,
        if_false: &Expression,
        contextual: &Type,
    ) -> Expr {
        let condition = self.compile_expression(condition, &Type::bool(), Conversion::None);
        let condition_type = self.current_type.clone();
        let condition = self.make_is_truthy(condition, &condition_type);

        let true_expr = self.compile_expression(if_true, contextual, Conversion::None);
        let true_type = self.current_type.clone();
        let false_expr = self.compile_expression(if_false, &true_type, Conversion::None);
        let false_type = self.current_type.clone();
        let common = match common_compatible(&true_type, &false_type, self.target()) {
            Some(common) => common,
            None => {
                let context = self.func_name();
                self.diagnostics.error(
                    format!(
                        "ternary arms have incompatible types `{}` and `{}`",
                        self.program.type_name(&true_type),
                        self.program.type_name(&false_type)
                    ),
                    Some(&context),
                );
                self.current_type = contextual.clone();
                return Expr::Unreachable;
            }
        };
        let true_expr = self.convert_expression(true_expr, &true_type, &common, true);
        let false_expr = self.convert_expression(false_expr, &false_type, &common, true);
        self.current_type = common.clone();
        Expr::If {
            condition: Box::new(condition),
            if_true: Box::new(true_expr),
            if_false: Some(Box::new(false_expr)),
            ty: common.native(self.target()),
        }
    }

    // ---- calls ------------------------------------------------------------

    fn compile_call_expression(
        &mut self,
        callee: &Expression,
        type_arguments: &[TypeNode],
        arguments: &[Expression],
        contextual: &Type,
    ) -> Expr {
        let context = self.func_name();
        match callee {
            Expression::Identifier(name) => {
                // A local or global holding a function reference wins over
                // a prototype of the same name.
                let local_signature = self
                    .func()
                    .flow
                    .lookup_local(name)
                    .and_then(|local| local.ty.signature);
                if let Some(signature_id) = local_signature {
                    let index = self.compile_identifier(name, &Type::void());
                    return self.compile_indirect_call(index, signature_id, arguments);
                }
                let namespace = self.current_namespace.clone();
                match self
                    .program
                    .resolve_identifier(name, namespace.as_deref())
                    .cloned()
                {
                    Some(Element::FunctionPrototype(prototype)) => self.compile_prototype_call(
                        &prototype.name,
                        type_arguments,
                        None,
                        arguments,
                        contextual,
                    ),
                    Some(Element::Global(global)) => {
                        let index = self.compile_global_reference(&global.name);
                        match self.current_type.signature {
                            Some(signature_id) => {
                                self.compile_indirect_call(index, signature_id, arguments)
                            }
                            None => {
                                self.diagnostics.error(
                                    format!("`{name}` is not callable"),
                                    Some(&context),
                                );
                                self.current_type = contextual.clone();
                                Expr::Unreachable
                            }
                        }
                    }
                    _ => {
                        self.diagnostics
                            .error(format!("cannot find function `{name}`"), Some(&context));
                        self.current_type = contextual.clone();
                        Expr::Unreachable
                    }
                }
            }
            Expression::PropertyAccess { target, property } => {
                match self.resolve_static_base(target) {
                    Some(StaticBase::Namespace(ns)) | Some(StaticBase::Class(ns)) => {
                        let qualified = format!("{ns}.{property}");
                        match self.program.elements.get(&qualified).cloned() {
                            Some(Element::FunctionPrototype(prototype)) => self
                                .compile_prototype_call(
                                    &prototype.name,
                                    type_arguments,
                                    None,
                                    arguments,
                                    contextual,
                                ),
                            Some(Element::Global(global)) => {
                                let index = self.compile_global_reference(&global.name);
                                match self.current_type.signature {
                                    Some(signature_id) => {
                                        self.compile_indirect_call(index, signature_id, arguments)
                                    }
                                    None => {
                                        self.diagnostics.error(
                                            format!("`{qualified}` is not callable"),
                                            Some(&context),
                                        );
                                        self.current_type = contextual.clone();
                                        Expr::Unreachable
                                    }
                                }
                            }
                            _ => {
                                self.diagnostics.error(
                                    format!("cannot find function `{qualified}`"),
                                    Some(&context),
                                );
                                self.current_type = contextual.clone();
                                Expr::Unreachable
                            }
                        }
                    }
                    Some(StaticBase::Enum(_)) => {
                        self.diagnostics
                            .error("enum values are not callable", Some(&context));
                        self.current_type = contextual.clone();
                        Expr::Unreachable
                    }
                    None => self.compile_method_call(
                        target,
                        property,
                        type_arguments,
                        arguments,
                        contextual,
                    ),
                }
            }
            _ => {
                // Anything else must evaluate to a function reference.
                let index = self.compile_expression(callee, &Type::void(), Conversion::None);
                match self.current_type.signature {
                    Some(signature_id) => self.compile_indirect_call(index, signature_id, arguments),
                    None => {
                        self.diagnostics.error(
                            "the callee does not evaluate to a function",
                            Some(&context),
                        );
                        self.current_type = contextual.clone();
                        Expr::Unreachable
                    }
                }
            }
        }
    }

    /// A call through a named prototype: builtins divert to the builtin
    /// bridge, everything else resolves to a concrete instance and emits a
    /// direct call.
    fn compile_prototype_call(
        &mut self,
        prototype_name: &str,
        type_arguments: &[TypeNode],
        this_expr: Option<Expr>,
        arguments: &[Expression],
        contextual: &Type,
    ) -> Expr {
        let prototype = match self.program.elements.get(prototype_name).cloned() {
            Some(Element::FunctionPrototype(p)) => p,
            _ => unreachable!("caller resolved a function prototype"),
        };
        if prototype.flags.has(ElementFlags::BUILTIN) {
            return self.compile_builtin_call(&prototype.name, type_arguments, arguments, contextual);
        }
        let resolved_arguments = match self.resolve_type_arguments(type_arguments) {
            Some(resolved) => resolved,
            None => {
                self.current_type = contextual.clone();
                return Expr::Unreachable;
            }
        };
        match self.resolve_function(&prototype, &resolved_arguments, None) {
            Some(instance_name) => self.compile_direct_call(&instance_name, this_expr, arguments),
            None => {
                self.current_type = contextual.clone();
                Expr::Unreachable
            }
        }
    }

    fn compile_method_call(
        &mut self,
        target: &Expression,
        property: &str,
        type_arguments: &[TypeNode],
        arguments: &[Expression],
        contextual: &Type,
    ) -> Expr {
        let context = self.func_name();
        let this_expr = self.compile_expression(target, &Type::void(), Conversion::None);
        let this_type = self.current_type.clone();
        let class = match this_type.class {
            Some(class) => class,
            None => {
                self.diagnostics.error(
                    format!(
                        "method `{property}` does not exist on type `{}`",
                        self.program.type_name(&this_type)
                    ),
                    Some(&context),
                );
                self.current_type = contextual.clone();
                return Expr::Unreachable;
            }
        };
        if let Some((owner, declaration)) = self
            .program
            .lookup_method(class, property)
            .map(|(c, d)| (c, d.clone()))
        {
            let resolved_arguments = match self.resolve_type_arguments(type_arguments) {
                Some(resolved) => resolved,
                None => {
                    self.current_type = contextual.clone();
                    return Expr::Unreachable;
                }
            };
            let canonical = declaration.name.clone();
            match self.resolve_method(owner, &declaration, &canonical, &resolved_arguments) {
                Some(instance_name) => {
                    return self.compile_direct_call(&instance_name, Some(this_expr), arguments)
                }
                None => {
                    self.current_type = contextual.clone();
                    return Expr::Unreachable;
                }
            }
        }
        // A field holding a function reference lowers to an indirect call.
        if let Some(field) = self.program.lookup_field(class, property).cloned() {
            if let Some(signature_id) = field.ty.signature {
                let index = Expr::Load {
                    bytes: field.ty.byte_size(self.target()).max(1) as u8,
                    signed: false,
                    offset: field.offset,
                    ptr: Box::new(this_expr),
                    ty: field.ty.native(self.target()),
                };
                return self.compile_indirect_call(index, signature_id, arguments);
            }
        }
        self.diagnostics.error(
            format!(
                "method `{property}` does not exist on `{}`",
                self.program.class(class).name
            ),
            Some(&context),
        );
        self.current_type = contextual.clone();
        Expr::Unreachable
    }

    pub(crate) fn resolve_type_arguments(&mut self, nodes: &[TypeNode]) -> Option<Vec<Type>> {
        let mut resolved = Vec::with_capacity(nodes.len());
        for node in nodes {
            let type_arguments = self.current.as_ref().map(|f| f.type_arguments.clone());
            match self.program.resolve_type(node, type_arguments.as_ref()) {
                Ok(ty) => resolved.push(ty),
                Err(message) => {
                    let context = self.func_name();
                    self.diagnostics.error(message, Some(&context));
                    return None;
                }
            }
        }
        Some(resolved)
    }

    /// Instantiate and compile a method of a concrete class, returning the
    /// instance's internal name. `canonical` distinguishes accessors and
    /// operators from plain methods of the same source name.
    pub(crate) fn resolve_method(
        &mut self,
        class: ClassId,
        declaration: &FunctionDeclaration,
        canonical: &str,
        type_arguments: &[Type],
    ) -> Option<String> {
        let mut declaration = declaration.clone();
        declaration.name = canonical.to_string();
        let prototype = crate::element::FunctionPrototype {
            name: format!("{}#{}", self.program.class(class).name, canonical),
            flags: ElementFlags::NONE,
            declaration,
            class_prototype: Some(self.program.class(class).prototype.clone()),
        };
        self.resolve_function(&prototype, type_arguments, Some(class))
    }

    /// Enforce the callable shape at a call site: `this` expectations, rest
    /// parameters, and operand counts.
    fn check_call(
        &mut self,
        signature: &Signature,
        has_this: bool,
        argument_count: usize,
        callee: &str,
    ) -> bool {
        let context = self.func_name();
        if signature.this_type.is_some() != has_this {
            self.diagnostics.error(
                format!("`{callee}` called with a mismatched `this`"),
                Some(&context),
            );
            return false;
        }
        if signature.has_rest {
            self.diagnostics.error(
                format!("`{callee}` uses rest parameters, which are not supported"),
                Some(&context),
            );
            return false;
        }
        if argument_count < signature.required_parameters {
            self.diagnostics.error(
                format!(
                    "`{callee}` expects at least {} argument(s), got {argument_count}",
                    signature.required_parameters
                ),
                Some(&context),
            );
            return false;
        }
        if argument_count > signature.parameter_types.len() {
            self.diagnostics.error(
                format!(
                    "`{callee}` expects at most {} argument(s), got {argument_count}",
                    signature.parameter_types.len()
                ),
                Some(&context),
            );
            return false;
        }
        true
    }

    /// A direct call. When fewer arguments than parameters are supplied,
    /// the missing slots are filled with zeroes and the call is routed
    /// through the callee's trampoline with a trailing provided-count.
    pub(crate) fn compile_direct_call(
        &mut self,
        instance_name: &str,
        this_expr: Option<Expr>,
        arguments: &[Expression],
    ) -> Expr {
        let instance = self.instances[instance_name].clone();
        let signature = instance.signature.clone();
        if !self.check_call(&signature, this_expr.is_some(), arguments.len(), instance_name) {
            self.current_type = signature.return_type.clone();
            return Expr::Unreachable;
        }
        let mut operands = Vec::with_capacity(signature.parameter_count_incl_this());
        if let Some(this_expr) = this_expr {
            operands.push(this_expr);
        }
        for (argument, parameter_type) in arguments.iter().zip(&signature.parameter_types) {
            let operand = self.compile_expression(argument, &parameter_type.clone(), Conversion::Implicit);
            operands.push(operand);
        }
        let return_native = signature.return_type.native(self.target());
        let target_name = if arguments.len() < signature.parameter_types.len() {
            for parameter_type in &signature.parameter_types[arguments.len()..] {
                operands.push(self.make_zero(parameter_type));
            }
            operands.push(Expr::I32(
                (arguments.len() - signature.required_parameters) as i32,
            ));
            self.ensure_trampoline(instance_name)
        } else {
            instance_name.to_string()
        };
        self.current_type = signature.return_type;
        Expr::Call {
            target: target_name,
            operands,
            ty: return_native,
        }
    }

    fn compile_indirect_call(
        &mut self,
        index: Expr,
        signature_id: crate::types::SignatureId,
        arguments: &[Expression],
    ) -> Expr {
        let signature = self.program.signature(signature_id).clone();
        if !self.check_call(&signature, false, arguments.len(), "function reference") {
            self.current_type = signature.return_type.clone();
            return Expr::Unreachable;
        }
        if arguments.len() < signature.parameter_types.len() {
            let context = self.func_name();
            self.diagnostics.error(
                format!(
                    "an indirect call must supply all {} argument(s)",
                    signature.parameter_types.len()
                ),
                Some(&context),
            );
            self.current_type = signature.return_type.clone();
            return Expr::Unreachable;
        }
        let mut operands = Vec::with_capacity(arguments.len());
        for (argument, parameter_type) in arguments.iter().zip(&signature.parameter_types) {
            let operand = self.compile_expression(argument, &parameter_type.clone(), Conversion::Implicit);
            operands.push(operand);
        }
        let params = signature.native_parameters(self.target());
        let result = signature.return_type.native(self.target());
        self.current_type = signature.return_type;
        Expr::CallIndirect {
            params,
            result,
            index: Box::new(index),
            operands,
        }
    }

    fn compile_new_expression(
        &mut self,
        class_name: &str,
        type_arguments: &[TypeNode],
        arguments: &[Expression],
    ) -> Expr {
        let context = self.func_name();
        let resolved_arguments = match self.resolve_type_arguments(type_arguments) {
            Some(resolved) => resolved,
            None => {
                self.current_type = Type::usize();
                return Expr::Unreachable;
            }
        };
        let class = match self.program.ensure_class(class_name, &resolved_arguments) {
            Ok(id) => id,
            Err(message) => {
                self.diagnostics.error(message, Some(&context));
                self.current_type = Type::usize();
                return Expr::Unreachable;
            }
        };
        let class_type = Type::class_reference(class);
        let size = self.program.class(class).size.max(1);

        let allocator_name = self.options.allocate_impl.clone();
        let allocator = match self.program.elements.get(&allocator_name).cloned() {
            Some(Element::FunctionPrototype(prototype)) => {
                self.resolve_function(&prototype, &[], None)
            }
            _ => None,
        };
        let allocator = match allocator {
            Some(name) => name,
            None => {
                self.diagnostics.error(
                    format!("allocator builtin `{allocator_name}` is not declared"),
                    Some(&context),
                );
                self.current_type = class_type;
                return Expr::Unreachable;
            }
        };

        let pointer_native = self.target().pointer_native();
        let temp = self.func().get_temp_local(pointer_native);
        let size_const = self.pointer_const(u64::from(size));
        let mut children = vec![Expr::SetLocal {
            index: temp,
            value: Box::new(Expr::Call {
                target: allocator,
                operands: vec![size_const],
                ty: pointer_native,
            }),
        }];
        let fields: Vec<_> = self.program.class(class).fields.clone();
        for field in fields {
            if let Some(initializer) = &field.initializer {
                let value = self.compile_expression(initializer, &field.ty, Conversion::Implicit);
                children.push(Expr::Store {
                    bytes: field.ty.byte_size(self.target()).max(1) as u8,
                    offset: field.offset,
                    ptr: Box::new(Expr::GetLocal {
                        index: temp,
                        ty: pointer_native,
                    }),
                    value: Box::new(value),
                });
            }
        }
        let constructor = self.program.class(class).constructor.clone();
        match constructor {
            Some(declaration) => {
                if let Some(instance_name) =
                    self.resolve_method(class, &declaration, "constructor", &[])
                {
                    let this_expr = Expr::GetLocal {
                        index: temp,
                        ty: pointer_native,
                    };
                    let call = self.compile_direct_call(&instance_name, Some(this_expr), arguments);
                    let call = if call.ty() == NativeType::None {
                        call
                    } else {
                        Expr::Drop { value: Box::new(call) }
                    };
                    children.push(call);
                }
            }
            None => {
                if !arguments.is_empty() {
                    self.diagnostics.error(
                        format!("class `{}` has no constructor", self.program.class(class).name),
                        Some(&context),
                    );
                }
            }
        }
        children.push(Expr::GetLocal {
            index: temp,
            ty: pointer_native,
        });
        self.func().free_temp_local(pointer_native, temp);
        self.current_type = class_type;
        Expr::Block {
            label: None,
            children,
            ty: pointer_native,
        }
    }

    // ---- assignment -------------------------------------------------------

    /// Best-effort static type of an assignment target, used to give the
    /// value expression its contextual type before the target is lowered.
    fn infer_type(&mut self, expression: &Expression) -> Option<Type> {
        match expression {
            Expression::This => self
                .current
                .as_ref()
                .and_then(|f| f.this_class)
                .map(Type::class_reference),
            Expression::Identifier(name) => {
                if let Some(local) = self.func().flow.lookup_local(name) {
                    return Some(local.ty.clone());
                }
                let namespace = self.current_namespace.clone();
                if let Some(Element::Global(global)) = self
                    .program
                    .resolve_identifier(name, namespace.as_deref())
                    .cloned()
                {
                    if !self.state(&global.name).has(element_state::COMPILED) {
                        self.compile_global(&global.name);
                    }
                    return self.state(&global.name).value_type.clone();
                }
                None
            }
            Expression::PropertyAccess { target, property } => {
                let class = self.infer_type(target)?.class?;
                if let Some(field) = self.program.lookup_field(class, property) {
                    return Some(field.ty.clone());
                }
                None
            }
            _ => None,
        }
    }

    fn compile_assignment_expression(
        &mut self,
        op: AssignOp,
        target: &Expression,
        value: &Expression,
        tee: bool,
    ) -> Expr {
        if let Some(binary_op) = op.binary_op() {
            // Compound assignment lowers as if plain, then assigns.
            let combined = Expression::Binary {
                op: binary_op,
                left: Box::new(target.clone()),
                right: Box::new(value.clone()),
            };
            let target_type = self.infer_type(target).unwrap_or(Type::void());
            let value_expr =
                self.compile_expression_full(&combined, &target_type, Conversion::None, true);
            let value_type = self.current_type.clone();
            return self.compile_assignment_with_value(target, value_expr, &value_type, tee);
        }
        match self.infer_type(target) {
            Some(target_type) => {
                let value_expr = self.compile_expression(value, &target_type, Conversion::Implicit);
                self.compile_assignment_with_value(target, value_expr, &target_type, tee)
            }
            None => {
                let value_expr = self.compile_expression(value, &Type::void(), Conversion::None);
                let value_type = self.current_type.clone();
                self.compile_assignment_with_value(target, value_expr, &value_type, tee)
            }
        }
    }

    /// Assignment lowering proper: targets are classified and the value is
    /// stored with set/tee semantics depending on whether the surrounding
    /// context consumes the result.
    pub(crate) fn compile_assignment_with_value(
        &mut self,
        target: &Expression,
        value: Expr,
        value_type: &Type,
        tee: bool,
    ) -> Expr {
        let context = self.func_name();
        match target {
            Expression::Identifier(name) => {
                if let Some(local) = self.func().flow.lookup_local(name).cloned() {
                    if local.is_const || local.index.is_none() {
                        self.diagnostics.error(
                            format!("cannot assign to constant `{name}`"),
                            Some(&context),
                        );
                        self.current_type = local.ty.clone();
                        return Expr::Unreachable;
                    }
                    let index = local.index.expect("checked above");
                    let converted = self.convert_expression(value, value_type, &local.ty, true);
                    let native = local.ty.native(self.target());
                    return if tee {
                        self.current_type = local.ty.clone();
                        Expr::TeeLocal {
                            index,
                            value: Box::new(converted),
                            ty: native,
                        }
                    } else {
                        self.current_type = Type::void();
                        Expr::SetLocal {
                            index,
                            value: Box::new(converted),
                        }
                    };
                }
                let namespace = self.current_namespace.clone();
                match self
                    .program
                    .resolve_identifier(name, namespace.as_deref())
                    .cloned()
                {
                    Some(Element::Global(global)) => {
                        self.compile_global_assignment(&global.name, value, value_type, tee)
                    }
                    _ => {
                        self.diagnostics
                            .error(format!("cannot assign to `{name}`"), Some(&context));
                        self.current_type = Type::void();
                        Expr::Unreachable
                    }
                }
            }
            Expression::PropertyAccess {
                target: object,
                property,
            } => {
                match self.resolve_static_base(object) {
                    Some(StaticBase::Namespace(ns)) | Some(StaticBase::Class(ns)) => {
                        let qualified = format!("{ns}.{property}");
                        match self.program.elements.get(&qualified).cloned() {
                            Some(Element::Global(global)) => {
                                return self.compile_global_assignment(
                                    &global.name,
                                    value,
                                    value_type,
                                    tee,
                                )
                            }
                            _ => {
                                self.diagnostics.error(
                                    format!("cannot assign to `{qualified}`"),
                                    Some(&context),
                                );
                                self.current_type = Type::void();
                                return Expr::Unreachable;
                            }
                        }
                    }
                    Some(StaticBase::Enum(enum_name)) => {
                        self.diagnostics.error(
                            format!("cannot assign to a value of enum `{enum_name}`"),
                            Some(&context),
                        );
                        self.current_type = Type::void();
                        return Expr::Unreachable;
                    }
                    None => {}
                }
                let this_expr = self.compile_expression(object, &Type::void(), Conversion::None);
                let this_type = self.current_type.clone();
                let class = match this_type.class {
                    Some(class) => class,
                    None => {
                        self.diagnostics.error(
                            format!(
                                "property `{property}` does not exist on type `{}`",
                                self.program.type_name(&this_type)
                            ),
                            Some(&context),
                        );
                        self.current_type = Type::void();
                        return Expr::Unreachable;
                    }
                };
                if let Some(field) = self.program.lookup_field(class, property).cloned() {
                    if field.readonly {
                        self.diagnostics.error(
                            format!("cannot assign to readonly field `{property}`"),
                            Some(&context),
                        );
                        self.current_type = field.ty.clone();
                        return Expr::Unreachable;
                    }
                    let converted = self.convert_expression(value, value_type, &field.ty, true);
                    let bytes = field.ty.byte_size(self.target()).max(1) as u8;
                    let native = field.ty.native(self.target());
                    return if tee {
                        let temp = self.func().get_and_free_temp_local(native);
                        let store = Expr::Store {
                            bytes,
                            offset: field.offset,
                            ptr: Box::new(this_expr),
                            value: Box::new(Expr::TeeLocal {
                                index: temp,
                                value: Box::new(converted),
                                ty: native,
                            }),
                        };
                        self.current_type = field.ty.clone();
                        Expr::Block {
                            label: None,
                            children: vec![store, Expr::GetLocal { index: temp, ty: native }],
                            ty: native,
                        }
                    } else {
                        self.current_type = Type::void();
                        Expr::Store {
                            bytes,
                            offset: field.offset,
                            ptr: Box::new(this_expr),
                            value: Box::new(converted),
                        }
                    };
                }
                self.compile_property_assignment(class, this_expr, property, value, value_type, tee)
            }
            Expression::ElementAccess {
                target: object,
                index,
            } => self.compile_indexed_assignment(object, index, value, value_type, tee),
            _ => {
                self.diagnostics
                    .error("expression is not assignable", Some(&context));
                self.current_type = Type::void();
                Expr::Unreachable
            }
        }
    }

    fn compile_global_assignment(
        &mut self,
        name: &str,
        value: Expr,
        value_type: &Type,
        tee: bool,
    ) -> Expr {
        let context = self.func_name();
        if !self.state(name).has(element_state::COMPILED) {
            self.compile_global(name);
        }
        let (inlined, global_type) = {
            let state = self.state(name);
            (
                state.has(element_state::INLINED),
                state.value_type.clone().unwrap_or(Type::i32()),
            )
        };
        if inlined {
            self.diagnostics.error(
                format!("cannot assign to constant `{name}`"),
                Some(&context),
            );
            self.current_type = Type::void();
            return Expr::Unreachable;
        }
        let element = self.program.elements.get(name).cloned();
        if let Some(Element::Global(global)) = element {
            if global.flags.has(ElementFlags::CONSTANT) {
                self.diagnostics.error(
                    format!("cannot assign to constant `{name}`"),
                    Some(&context),
                );
                self.current_type = global_type;
                return Expr::Unreachable;
            }
        }
        let converted = self.convert_expression(value, value_type, &global_type, true);
        let native = global_type.native(self.target());
        if tee {
            self.current_type = global_type.clone();
            Expr::Block {
                label: None,
                children: vec![
                    Expr::SetGlobal {
                        name: name.to_string(),
                        value: Box::new(converted),
                    },
                    Expr::GetGlobal {
                        name: name.to_string(),
                        ty: native,
                    },
                ],
                ty: native,
            }
        } else {
            self.current_type = Type::void();
            Expr::SetGlobal {
                name: name.to_string(),
                value: Box::new(converted),
            }
        }
    }

    fn compile_property_assignment(
        &mut self,
        class: ClassId,
        this_expr: Expr,
        property: &str,
        value: Expr,
        value_type: &Type,
        tee: bool,
    ) -> Expr {
        let context = self.func_name();
        let setter = self
            .program
            .lookup_setter(class, property)
            .map(|(c, d)| (c, d.clone()));
        let (owner, setter_declaration) = match setter {
            Some(found) => found,
            None => {
                self.diagnostics.error(
                    format!("property `{property}` has no setter"),
                    Some(&context),
                );
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let setter_name = match self.resolve_method(
            owner,
            &setter_declaration,
            &format!("set:{property}"),
            &[],
        ) {
            Some(name) => name,
            None => {
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let property_type = self.instances[&setter_name]
            .signature
            .parameter_types
            .first()
            .cloned()
            .unwrap_or(Type::void());
        let converted = self.convert_expression(value, value_type, &property_type, true);

        if !tee {
            self.current_type = Type::void();
            return Expr::Call {
                target: setter_name,
                operands: vec![this_expr, converted],
                ty: NativeType::None,
            };
        }
        // For tee semantics the getter re-reads through the same object.
        let getter = self
            .program
            .lookup_getter(class, property)
            .map(|(c, d)| (c, d.clone()));
        let (getter_owner, getter_declaration) = match getter {
            Some(found) => found,
            None => {
                self.diagnostics.error(
                    format!("property `{property}` has no getter for its value"),
                    Some(&context),
                );
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let getter_name = match self.resolve_method(
            getter_owner,
            &getter_declaration,
            &format!("get:{property}"),
            &[],
        ) {
            Some(name) => name,
            None => {
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let pointer_native = self.target().pointer_native();
        let native = property_type.native(self.target());
        let (set_this, get_this, freed) = if this_expr.is_pure() {
            (this_expr.clone(), this_expr, None)
        } else {
            let temp = self.func().get_temp_local(pointer_native);
            (
                Expr::TeeLocal {
                    index: temp,
                    value: Box::new(this_expr),
                    ty: pointer_native,
                },
                Expr::GetLocal {
                    index: temp,
                    ty: pointer_native,
                },
                Some(temp),
            )
        };
        let result = Expr::Block {
            label: None,
            children: vec![
                Expr::Call {
                    target: setter_name,
                    operands: vec![set_this, converted],
                    ty: NativeType::None,
                },
                Expr::Call {
                    target: getter_name,
                    operands: vec![get_this],
                    ty: native,
                },
            ],
            ty: native,
        };
        if let Some(temp) = freed {
            self.func().free_temp_local(pointer_native, temp);
        }
        self.current_type = property_type;
        result
    }

    fn compile_indexed_assignment(
        &mut self,
        object: &Expression,
        index: &Expression,
        value: Expr,
        value_type: &Type,
        tee: bool,
    ) -> Expr {
        let context = self.func_name();
        let this_expr = self.compile_expression(object, &Type::void(), Conversion::None);
        let this_type = self.current_type.clone();
        let class = match this_type.class {
            Some(class) => class,
            None => {
                self.diagnostics.error(
                    format!(
                        "type `{}` has no indexed assignment operator",
                        self.program.type_name(&this_type)
                    ),
                    Some(&context),
                );
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let index_set = self
            .program
            .lookup_index_set(class)
            .map(|(c, d)| (c, d.clone()));
        let (owner, declaration) = match index_set {
            Some(found) => found,
            None => {
                self.diagnostics.error(
                    format!(
                        "class `{}` has no `[]=` operator",
                        self.program.class(class).name
                    ),
                    Some(&context),
                );
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let setter_name = match self.resolve_method(owner, &declaration, "[]=", &[]) {
            Some(name) => name,
            None => {
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let signature = self.instances[&setter_name].signature.clone();
        let index_type = signature.parameter_types.first().cloned().unwrap_or(Type::i32());
        let element_type = signature.parameter_types.get(1).cloned().unwrap_or(Type::void());
        let index_expr = self.compile_expression(index, &index_type, Conversion::Implicit);
        let converted = self.convert_expression(value, value_type, &element_type, true);

        if !tee {
            self.current_type = Type::void();
            return Expr::Call {
                target: setter_name,
                operands: vec![this_expr, index_expr, converted],
                ty: NativeType::None,
            };
        }
        let index_get = self
            .program
            .lookup_index_get(class)
            .map(|(c, d)| (c, d.clone()));
        let (get_owner, get_declaration) = match index_get {
            Some(found) => found,
            None => {
                self.diagnostics.error(
                    format!(
                        "class `{}` has no `[]` operator to read the stored value back",
                        self.program.class(class).name
                    ),
                    Some(&context),
                );
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let getter_name = match self.resolve_method(get_owner, &get_declaration, "[]", &[]) {
            Some(name) => name,
            None => {
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        // Both the target and the index are tee'd so the subsequent get
        // sees identical operands.
        let pointer_native = self.target().pointer_native();
        let index_native = index_type.native(self.target());
        let native = element_type.native(self.target());
        let this_temp = self.func().get_temp_local(pointer_native);
        let index_temp = self.func().get_temp_local(index_native);
        let result = Expr::Block {
            label: None,
            children: vec![
                Expr::Call {
                    target: setter_name,
                    operands: vec![
                        Expr::TeeLocal {
                            index: this_temp,
                            value: Box::new(this_expr),
                            ty: pointer_native,
                        },
                        Expr::TeeLocal {
                            index: index_temp,
                            value: Box::new(index_expr),
                            ty: index_native,
                        },
                        converted,
                    ],
                    ty: NativeType::None,
                },
                Expr::Call {
                    target: getter_name,
                    operands: vec![
                        Expr::GetLocal {
                            index: this_temp,
                            ty: pointer_native,
                        },
                        Expr::GetLocal {
                            index: index_temp,
                            ty: index_native,
                        },
                    ],
                    ty: native,
                },
            ],
            ty: native,
        };
        self.func().free_temp_local(pointer_native, this_temp);
        self.func().free_temp_local(index_native, index_temp);
        self.current_type = element_type;
        result
    }
}

fn write_const(bytes: &mut Vec<u8>, value: ConstValue, size: u32) {
    match value {
        ConstValue::I32(v) => bytes.extend_from_slice(&v.to_le_bytes()[..size as usize]),
        ConstValue::I64(v) => bytes.extend_from_slice(&v.to_le_bytes()[..size as usize]),
        ConstValue::F32(v) => bytes.extend_from_slice(&v.to_le_bytes()),
        ConstValue::F64(v) => bytes.extend_from_slice(&v.to_le_bytes()),
    }
}
