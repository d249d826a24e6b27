//! Trampoline synthesis for calls that omit optional arguments.
//!
//! A trampoline's parameter list is the original's plus one trailing i32
//! that says how many optional arguments the caller actually provided.
//! Its body is a nested block structure equivalent to a jump table:
//! landing at label `N=<i>` executes the default initializers for the
//! parameters from `required + i` on, then tail-calls the original with
//! the fully filled argument vector.

use crate::compiler::flow::ScopedLocal;
use crate::compiler::{element_state, Compiler, Conversion, FunctionState};
use crate::element::ElementFlags;
use crate::module::{BinOp, Expr, NativeType};
use crate::program::FunctionInstance;
use crate::types::{Signature, Type};

impl Compiler {
    /// Lazily synthesize the argument-count dispatcher for a callee,
    /// returning its internal name (`<original>|trampoline`). Synthesis
    /// happens once per callee.
    pub(crate) fn ensure_trampoline(&mut self, original: &str) -> String {
        let name = format!("{original}|trampoline");
        if self.instances.contains_key(&name) {
            return name;
        }
        let original_instance = self.instances[original].clone();
        let original_signature = original_instance.signature.clone();
        let optional =
            original_signature.parameter_types.len() - original_signature.required_parameters;
        debug_assert!(optional > 0, "a trampoline needs optional parameters");
        log::debug!("synthesizing trampoline for {original}");

        let mut parameter_types = original_signature.parameter_types.clone();
        parameter_types.push(Type::i32());
        let required_parameters = parameter_types.len();
        let signature = Signature {
            parameter_types,
            this_type: original_signature.this_type.clone(),
            return_type: original_signature.return_type.clone(),
            required_parameters,
            has_rest: false,
        };
        self.instances.insert(
            name.clone(),
            FunctionInstance {
                name: name.clone(),
                prototype: original_instance.prototype.clone(),
                signature: signature.clone(),
                declaration: original_instance.declaration.clone(),
                flags: ElementFlags::NONE,
                this_class: original_instance.this_class,
                type_arguments: original_instance.type_arguments.clone(),
            },
        );
        self.state(&name).set(element_state::COMPILED);

        let target = self.target();
        let natives = signature.native_parameters(target);
        let result = signature.return_type.native(target);
        let this_offset = u32::from(original_signature.this_type.is_some());
        let original_param_count = original_signature.parameter_count_incl_this() as u32;
        let count_index = original_param_count;
        let required = original_signature.required_parameters;

        // Default initializers compile in the trampoline's own scope so
        // they see `this` and the named parameters, and may take locals.
        let mut state = FunctionState::new(
            name.clone(),
            signature.clone(),
            original_instance.this_class,
            original_instance.type_arguments.clone(),
        );
        for (i, parameter) in original_instance.declaration.parameters.iter().enumerate() {
            let local = ScopedLocal {
                index: Some(this_offset + i as u32),
                ty: original_signature.parameter_types[i].clone(),
                constant: None,
                is_const: false,
            };
            let _ = state.flow.add_scoped_local(&parameter.name, local);
        }
        let saved = self.current.replace(state);

        let mut dispatch: Vec<Expr> = Vec::with_capacity(optional + 1);
        for i in 0..optional {
            dispatch.push(Expr::Break {
                label: format!("N={i}"),
                condition: Some(Box::new(Expr::Binary {
                    op: BinOp::Eq,
                    left: Box::new(Expr::GetLocal {
                        index: count_index,
                        ty: NativeType::I32,
                    }),
                    right: Box::new(Expr::I32(i as i32)),
                    ty: NativeType::I32,
                })),
            });
        }
        dispatch.push(Expr::Break {
            label: format!("N={optional}"),
            condition: None,
        });

        let mut block = Expr::Block {
            label: Some("N=0".to_string()),
            children: dispatch,
            ty: NativeType::None,
        };
        for i in 0..optional {
            let parameter_index = required + i;
            let parameter_type = original_signature.parameter_types[parameter_index].clone();
            let initializer = original_instance.declaration.parameters[parameter_index]
                .initializer
                .clone();
            let value = match initializer {
                Some(initializer) => {
                    self.compile_expression(&initializer, &parameter_type, Conversion::Implicit)
                }
                None => {
                    self.diagnostics.error(
                        format!(
                            "optional parameter {parameter_index} of `{original}` has no default"
                        ),
                        Some(&name),
                    );
                    self.make_zero(&parameter_type)
                }
            };
            block = Expr::Block {
                label: Some(format!("N={}", i + 1)),
                children: vec![
                    block,
                    Expr::SetLocal {
                        index: this_offset + parameter_index as u32,
                        value: Box::new(value),
                    },
                ],
                ty: NativeType::None,
            };
        }

        let operands: Vec<Expr> = (0..original_param_count)
            .map(|i| Expr::GetLocal {
                index: i,
                ty: natives[i as usize],
            })
            .collect();
        let call = Expr::Call {
            target: original.to_string(),
            operands,
            ty: signature.return_type.native(target),
        };
        let tail = if signature.return_type.is_void() {
            call
        } else {
            Expr::Return {
                value: Some(Box::new(call)),
            }
        };

        let state = self.current.take().expect("trampoline state was just set");
        self.current = saved;
        self.module.add_function(
            &name,
            natives,
            result,
            state.locals,
            Expr::Block {
                label: None,
                children: vec![block, tail],
                ty: NativeType::None,
            },
        );
        name
    }
}
