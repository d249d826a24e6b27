//! The builtin call bridge.
//!
//! `Program::new` registers a prototype per builtin; call sites divert
//! here before any instantiation happens, since builtins dispatch on their
//! resolved type arguments rather than compiling to concrete functions.

use crate::ast::{Expression, TypeNode};
use crate::compiler::{Compiler, Conversion};
use crate::module::{Expr, NativeType, UnOp};
use crate::types::Type;

impl Compiler {
    pub(crate) fn compile_builtin_call(
        &mut self,
        name: &str,
        type_arguments: &[TypeNode],
        arguments: &[Expression],
        contextual: &Type,
    ) -> Expr {
        let context = self.func_name();
        match name {
            "assert" => {
                if arguments.len() != 1 {
                    self.diagnostics
                        .error("`assert` expects exactly one argument", Some(&context));
                    self.current_type = Type::void();
                    return Expr::Unreachable;
                }
                self.current_type = Type::void();
                if self.options.no_assert {
                    return Expr::Nop;
                }
                let condition = self.compile_expression(&arguments[0], &Type::bool(), Conversion::None);
                let condition_type = self.current_type.clone();
                let truthy = self.make_is_truthy(condition, &condition_type);
                self.current_type = Type::void();
                Expr::If {
                    condition: Box::new(Expr::Unary {
                        op: UnOp::Eqz,
                        value: Box::new(truthy),
                        ty: NativeType::I32,
                    }),
                    if_true: Box::new(Expr::Unreachable),
                    if_false: None,
                    ty: NativeType::None,
                }
            }
            "unreachable" => {
                self.current_type = contextual.clone();
                Expr::Unreachable
            }
            "sizeof" => {
                let resolved = match self.resolve_type_arguments(type_arguments) {
                    Some(resolved) if resolved.len() == 1 => resolved,
                    _ => {
                        self.diagnostics
                            .error("`sizeof` expects exactly one type argument", Some(&context));
                        self.current_type = Type::usize();
                        return Expr::Unreachable;
                    }
                };
                self.current_type = Type::usize();
                self.pointer_const(u64::from(resolved[0].byte_size(self.target())))
            }
            "load" => {
                let resolved = match self.resolve_type_arguments(type_arguments) {
                    Some(resolved) if resolved.len() == 1 => resolved,
                    _ => {
                        self.diagnostics
                            .error("`load` expects exactly one type argument", Some(&context));
                        self.current_type = contextual.clone();
                        return Expr::Unreachable;
                    }
                };
                if arguments.len() != 1 {
                    self.diagnostics
                        .error("`load` expects exactly one argument", Some(&context));
                    self.current_type = resolved[0].clone();
                    return Expr::Unreachable;
                }
                let value_type = resolved.into_iter().next().expect("checked above");
                let ptr = self.compile_expression(&arguments[0], &Type::usize(), Conversion::Implicit);
                self.current_type = value_type.clone();
                Expr::Load {
                    bytes: value_type.byte_size(self.target()).max(1) as u8,
                    signed: value_type.kind.is_signed(),
                    offset: 0,
                    ptr: Box::new(ptr),
                    ty: value_type.native(self.target()),
                }
            }
            "store" => {
                let resolved = match self.resolve_type_arguments(type_arguments) {
                    Some(resolved) if resolved.len() == 1 => resolved,
                    _ => {
                        self.diagnostics
                            .error("`store` expects exactly one type argument", Some(&context));
                        self.current_type = Type::void();
                        return Expr::Unreachable;
                    }
                };
                if arguments.len() != 2 {
                    self.diagnostics
                        .error("`store` expects exactly two arguments", Some(&context));
                    self.current_type = Type::void();
                    return Expr::Unreachable;
                }
                let value_type = resolved.into_iter().next().expect("checked above");
                let ptr = self.compile_expression(&arguments[0], &Type::usize(), Conversion::Implicit);
                let value = self.compile_expression(&arguments[1], &value_type, Conversion::Implicit);
                self.current_type = Type::void();
                Expr::Store {
                    bytes: value_type.byte_size(self.target()).max(1) as u8,
                    offset: 0,
                    ptr: Box::new(ptr),
                    value: Box::new(value),
                }
            }
            _ => {
                self.diagnostics
                    .error(format!("unknown builtin `{name}`"), Some(&context));
                self.current_type = contextual.clone();
                Expr::Unreachable
            }
        }
    }
}
