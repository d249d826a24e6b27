//! Statement lowering.
//!
//! Every statement lowers to one IR expression (possibly a block). Flow
//! frames are pushed per block, per `if` arm, per loop body, and per
//! `switch` case; `do` propagates directly because its body always runs.
//! Loop labels are `break|<ctx>` / `continue|<ctx>` (with a `repeat|<ctx>`
//! back edge where `continue` must first reach the incrementor or the
//! condition check), switch case labels `case<i>|<ctx>`, with a
//! per-function monotonic context counter.

use crate::ast::{Expression, Statement, VariableStatement};
use crate::compiler::flow::{FlowFlags, ScopedLocal};
use crate::compiler::{Compiler, Conversion};
use crate::module::{BinOp, Expr, NativeType, UnOp};
use crate::types::Type;

impl Compiler {
    pub(crate) fn compile_statements(&mut self, statements: &[Statement]) -> Vec<Expr> {
        let mut compiled = Vec::with_capacity(statements.len());
        for statement in statements {
            let expr = self.compile_statement(statement);
            if expr != Expr::Nop {
                compiled.push(expr);
            }
        }
        compiled
    }

    pub(crate) fn compile_statement(&mut self, statement: &Statement) -> Expr {
        match statement {
            Statement::Block(statements) => self.compile_block(statements),
            Statement::If {
                condition,
                if_true,
                if_false,
            } => self.compile_if(condition, if_true, if_false.as_deref()),
            Statement::While { condition, body } => self.compile_while(condition, body),
            Statement::Do { body, condition } => self.compile_do(body, condition),
            Statement::For {
                initializer,
                condition,
                incrementor,
                body,
            } => self.compile_for(initializer.as_deref(), condition.as_ref(), incrementor.as_ref(), body),
            Statement::Switch { condition, cases } => self.compile_switch(condition, cases),
            Statement::Return(value) => self.compile_return(value.as_ref()),
            Statement::Throw(_) => {
                // Exception semantics are unspecified: a throw traps, and is
                // treated as terminating the current path.
                self.func()
                    .flow
                    .set(FlowFlags::RETURNS.with(FlowFlags::POSSIBLY_THROWS));
                Expr::Unreachable
            }
            Statement::Break { label } => self.compile_break(label.as_deref()),
            Statement::Continue { label } => self.compile_continue(label.as_deref()),
            Statement::Variable(variable) => self.compile_local_variable(variable),
            Statement::Expression(expression) => {
                self.compile_expression(expression, &Type::void(), Conversion::Implicit)
            }
            Statement::Empty => Expr::Nop,
            Statement::Interface { name } => {
                let context = self.func_name();
                self.diagnostics.error(
                    format!("interface `{name}` is not supported"),
                    Some(&context),
                );
                Expr::Nop
            }
            Statement::Try { .. } => {
                let context = self.func_name();
                self.diagnostics
                    .error("try/catch/finally is not supported", Some(&context));
                Expr::Unreachable
            }
            Statement::Function(_)
            | Statement::Enum(_)
            | Statement::Class(_)
            | Statement::Namespace(_)
            | Statement::Import { .. }
            | Statement::Export { .. } => {
                let context = self.func_name();
                self.diagnostics.error(
                    "declarations are not supported in statement position",
                    Some(&context),
                );
                Expr::Nop
            }
        }
    }

    /// Compile a condition and make it an i32 truthiness value.
    fn make_condition(&mut self, condition: &Expression) -> Expr {
        let compiled = self.compile_expression(condition, &Type::bool(), Conversion::None);
        let condition_type = self.current_type.clone();
        self.make_is_truthy(compiled, &condition_type)
    }

    fn compile_block(&mut self, statements: &[Statement]) -> Expr {
        self.func().flow.enter_branch_or_scope();
        let children = self.compile_statements(statements);
        let frame = self.func().flow.leave_branch_or_scope();
        self.func().flow.set(frame.flags);
        if children.is_empty() {
            return Expr::Nop;
        }
        Expr::Block {
            label: None,
            children,
            ty: NativeType::None,
        }
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        if_true: &Statement,
        if_false: Option<&Statement>,
    ) -> Expr {
        let condition = self.make_condition(condition);

        self.func().flow.enter_branch_or_scope();
        let true_expr = self.compile_statement(if_true);
        let true_frame = self.func().flow.leave_branch_or_scope();
        self.func().flow.set(true_frame.flags.possibly());

        let false_expr = match if_false {
            Some(statement) => {
                self.func().flow.enter_branch_or_scope();
                let compiled = self.compile_statement(statement);
                let false_frame = self.func().flow.leave_branch_or_scope();
                self.func().flow.set(false_frame.flags.possibly());
                // Only an `if` whose arms both return proves a return.
                if true_frame.flags.has(FlowFlags::RETURNS)
                    && false_frame.flags.has(FlowFlags::RETURNS)
                {
                    self.func().flow.set(FlowFlags::RETURNS);
                }
                Some(Box::new(compiled))
            }
            None => None,
        };
        Expr::If {
            condition: Box::new(condition),
            if_true: Box::new(true_expr),
            if_false: false_expr,
            ty: NativeType::None,
        }
    }

    fn compile_while(&mut self, condition: &Expression, body: &Statement) -> Expr {
        let context = self.func().next_break_context();
        let break_label = format!("break|{context}");
        let continue_label = format!("continue|{context}");
        self.func()
            .flow
            .enter_loop(break_label.clone(), continue_label.clone());
        let condition = self.make_condition(condition);
        let body_expr = self.compile_statement(body);
        // A while body possibly never runs: nothing propagates.
        let _ = self.func().flow.leave_branch_or_scope();
        Expr::Block {
            label: Some(break_label.clone()),
            children: vec![Expr::Loop {
                label: continue_label.clone(),
                body: Box::new(Expr::Block {
                    label: None,
                    children: vec![
                        Expr::Break {
                            label: break_label,
                            condition: Some(Box::new(Expr::Unary {
                                op: UnOp::Eqz,
                                value: Box::new(condition),
                                ty: NativeType::I32,
                            })),
                        },
                        body_expr,
                        Expr::Break {
                            label: continue_label,
                            condition: None,
                        },
                    ],
                    ty: NativeType::None,
                }),
            }],
            ty: NativeType::None,
        }
    }

    fn compile_do(&mut self, body: &Statement, condition: &Expression) -> Expr {
        let context = self.func().next_break_context();
        let break_label = format!("break|{context}");
        let continue_label = format!("continue|{context}");
        let repeat_label = format!("repeat|{context}");
        self.func()
            .flow
            .enter_loop(break_label.clone(), continue_label.clone());
        let body_expr = self.compile_statement(body);
        let condition = self.make_condition(condition);
        let frame = self.func().flow.leave_branch_or_scope();
        // The body runs at least once, so its outcome propagates, unless a
        // break or continue may have left the straight path early.
        if frame.flags.has(FlowFlags::RETURNS)
            && !frame.flags.has(FlowFlags::POSSIBLY_BREAKS)
            && !frame.flags.has(FlowFlags::POSSIBLY_CONTINUES)
        {
            self.func().flow.set(FlowFlags::RETURNS);
        }
        if frame.flags.has(FlowFlags::POSSIBLY_THROWS) {
            self.func().flow.set(FlowFlags::POSSIBLY_THROWS);
        }
        // The body sits in its own labeled block: `continue` lands on the
        // condition check, never on the loop head directly.
        Expr::Block {
            label: Some(break_label),
            children: vec![Expr::Loop {
                label: repeat_label.clone(),
                body: Box::new(Expr::Block {
                    label: None,
                    children: vec![
                        Expr::Block {
                            label: Some(continue_label),
                            children: vec![body_expr],
                            ty: NativeType::None,
                        },
                        Expr::Break {
                            label: repeat_label,
                            condition: Some(Box::new(condition)),
                        },
                    ],
                    ty: NativeType::None,
                }),
            }],
            ty: NativeType::None,
        }
    }

    fn compile_for(
        &mut self,
        initializer: Option<&Statement>,
        condition: Option<&Expression>,
        incrementor: Option<&Expression>,
        body: &Statement,
    ) -> Expr {
        let context = self.func().next_break_context();
        let break_label = format!("break|{context}");
        let continue_label = format!("continue|{context}");
        let repeat_label = format!("repeat|{context}");
        // The loop frame doubles as the initializer scope.
        self.func()
            .flow
            .enter_loop(break_label.clone(), continue_label.clone());

        let mut outer = Vec::new();
        if let Some(initializer) = initializer {
            let compiled = self.compile_statement(initializer);
            if compiled != Expr::Nop {
                outer.push(compiled);
            }
        }
        let mut inner = Vec::new();
        if let Some(condition) = condition {
            let compiled = self.make_condition(condition);
            inner.push(Expr::Break {
                label: break_label.clone(),
                condition: Some(Box::new(Expr::Unary {
                    op: UnOp::Eqz,
                    value: Box::new(compiled),
                    ty: NativeType::I32,
                })),
            });
        }
        // The continue block closes before the incrementor, so `continue`
        // runs the incrementor and re-tests the condition.
        let body_expr = self.compile_statement(body);
        inner.push(Expr::Block {
            label: Some(continue_label),
            children: vec![body_expr],
            ty: NativeType::None,
        });
        if let Some(incrementor) = incrementor {
            inner.push(self.compile_expression(incrementor, &Type::void(), Conversion::Implicit));
        }
        inner.push(Expr::Break {
            label: repeat_label.clone(),
            condition: None,
        });

        let frame = self.func().flow.leave_branch_or_scope();
        // An omitted condition is always-true: a returning body proves the
        // function returns, unless a break or continue may leave the
        // straight path through it.
        if condition.is_none()
            && frame.flags.has(FlowFlags::RETURNS)
            && !frame.flags.has(FlowFlags::POSSIBLY_BREAKS)
            && !frame.flags.has(FlowFlags::POSSIBLY_CONTINUES)
        {
            self.func().flow.set(FlowFlags::RETURNS);
        }

        outer.push(Expr::Loop {
            label: repeat_label,
            body: Box::new(Expr::Block {
                label: None,
                children: inner,
                ty: NativeType::None,
            }),
        });
        Expr::Block {
            label: Some(break_label),
            children: outer,
            ty: NativeType::None,
        }
    }

    /// A switch holds the tested value in a temp and compares it against
    /// each case with a `br_if` chain, producing a structure amenable to
    /// br-table optimization. Case bodies fall through in source order.
    fn compile_switch(&mut self, condition: &Expression, cases: &[crate::ast::SwitchCase]) -> Expr {
        let context = self.func().next_break_context();
        let break_label = format!("break|{context}");

        let tested = self.compile_expression(condition, &Type::i32(), Conversion::Implicit);
        let temp = self.func().get_temp_local(NativeType::I32);

        let default_index = cases.iter().position(|c| c.label.is_none());
        let mut dispatch = vec![Expr::SetLocal {
            index: temp,
            value: Box::new(tested),
        }];
        for (i, case) in cases.iter().enumerate() {
            if let Some(label_expression) = &case.label {
                let compared = self.compile_expression(label_expression, &Type::i32(), Conversion::Implicit);
                dispatch.push(Expr::Break {
                    label: format!("case{i}|{context}"),
                    condition: Some(Box::new(Expr::Binary {
                        op: BinOp::Eq,
                        left: Box::new(Expr::GetLocal {
                            index: temp,
                            ty: NativeType::I32,
                        }),
                        right: Box::new(compared),
                        ty: NativeType::I32,
                    })),
                });
            }
        }
        dispatch.push(Expr::Break {
            label: match default_index {
                Some(i) => format!("case{i}|{context}"),
                None => break_label.clone(),
            },
            condition: None,
        });

        // Wrap case blocks inside out: each case body follows the close of
        // its own labeled block and falls through into the next body.
        let mut terminates = vec![false; cases.len()];
        let mut children = dispatch;
        let mut frames = Vec::with_capacity(cases.len());
        for (i, case) in cases.iter().enumerate() {
            let block = Expr::Block {
                label: Some(format!("case{i}|{context}")),
                children,
                ty: NativeType::None,
            };
            self.func().flow.enter_breakable(break_label.clone());
            let body = self.compile_statements(&case.statements);
            let frame = self.func().flow.leave_branch_or_scope();
            frames.push(frame);
            children = vec![block];
            children.extend(body);
        }
        for i in (0..cases.len()).rev() {
            let returns = frames[i].flags.has(FlowFlags::RETURNS);
            let breaks = frames[i].flags.has(FlowFlags::POSSIBLY_BREAKS);
            let continues = frames[i].flags.has(FlowFlags::POSSIBLY_CONTINUES);
            // A case only falls into its successor when nothing can leave
            // it sideways first.
            let falls_into_terminating = i + 1 < cases.len() && terminates[i + 1];
            terminates[i] = returns || (!breaks && !continues && falls_into_terminating);
        }
        if default_index.is_some() && !cases.is_empty() && terminates.iter().all(|t| *t) {
            self.func().flow.set(FlowFlags::RETURNS);
        }
        // Breaks are consumed by the switch itself; continues and throws
        // target enclosing constructs and stay visible there.
        for frame in &frames {
            if frame.flags.has(FlowFlags::POSSIBLY_CONTINUES) {
                self.func().flow.set(FlowFlags::POSSIBLY_CONTINUES);
            }
            if frame.flags.has(FlowFlags::POSSIBLY_THROWS) {
                self.func().flow.set(FlowFlags::POSSIBLY_THROWS);
            }
        }
        self.func().free_temp_local(NativeType::I32, temp);

        Expr::Block {
            label: Some(break_label),
            children,
            ty: NativeType::None,
        }
    }

    fn compile_return(&mut self, value: Option<&Expression>) -> Expr {
        let context = self.func_name();
        let return_type = self.func().signature.return_type.clone();
        self.func().flow.set(FlowFlags::RETURNS);
        match (value, return_type.is_void()) {
            (Some(expression), false) => {
                let compiled = self.compile_expression(expression, &return_type, Conversion::Implicit);
                Expr::Return {
                    value: Some(Box::new(compiled)),
                }
            }
            (Some(_), true) => {
                self.diagnostics
                    .error("a void function cannot return a value", Some(&context));
                Expr::Return { value: None }
            }
            (None, false) => {
                self.diagnostics.error(
                    format!(
                        "a function returning `{}` must return a value",
                        self.program.type_name(&return_type)
                    ),
                    Some(&context),
                );
                Expr::Unreachable
            }
            (None, true) => Expr::Return { value: None },
        }
    }

    fn compile_break(&mut self, label: Option<&str>) -> Expr {
        let context = self.func_name();
        if label.is_some() {
            self.diagnostics
                .error("labeled break is not supported", Some(&context));
            return Expr::Unreachable;
        }
        match self.func().flow.break_label().map(str::to_string) {
            Some(label) => {
                self.func().flow.set(FlowFlags::POSSIBLY_BREAKS);
                Expr::Break { label, condition: None }
            }
            None => {
                self.diagnostics
                    .error("break outside of a loop or switch", Some(&context));
                Expr::Unreachable
            }
        }
    }

    fn compile_continue(&mut self, label: Option<&str>) -> Expr {
        let context = self.func_name();
        if label.is_some() {
            self.diagnostics
                .error("labeled continue is not supported", Some(&context));
            return Expr::Unreachable;
        }
        match self.func().flow.continue_label().map(str::to_string) {
            Some(label) => {
                self.func().flow.set(FlowFlags::POSSIBLY_CONTINUES);
                Expr::Break { label, condition: None }
            }
            None => {
                self.diagnostics
                    .error("continue outside of a loop", Some(&context));
                Expr::Unreachable
            }
        }
    }

    /// Local variable declarations. A `const` with a foldable initializer
    /// becomes a virtual local with no slot; everything else gets a fresh
    /// scoped slot.
    fn compile_local_variable(&mut self, variable: &VariableStatement) -> Expr {
        use crate::ast::Modifiers;
        let context = self.func_name();
        let is_const = variable.modifiers.has(Modifiers::CONST);
        let mut initializers = Vec::new();
        for declaration in &variable.declarations {
            let annotated = match &declaration.type_node {
                Some(node) => {
                    let type_arguments = self.current.as_ref().map(|f| f.type_arguments.clone());
                    match self.program.resolve_type(node, type_arguments.as_ref()) {
                        Ok(ty) => Some(ty),
                        Err(message) => {
                            self.diagnostics.error(message, Some(&context));
                            continue;
                        }
                    }
                }
                None => None,
            };
            let (ty, init) = match (&annotated, &declaration.initializer) {
                (Some(ty), Some(initializer)) => {
                    let compiled = self.compile_expression(initializer, ty, Conversion::Implicit);
                    (ty.clone(), Some(compiled))
                }
                (Some(ty), None) => (ty.clone(), None),
                (None, Some(initializer)) => {
                    let compiled =
                        self.compile_expression(initializer, &Type::void(), Conversion::None);
                    let inferred = self.current_type.clone();
                    if inferred.is_void() {
                        self.diagnostics.error(
                            format!(
                                "cannot infer a type for `{}` from a void initializer",
                                declaration.name
                            ),
                            Some(&context),
                        );
                        continue;
                    }
                    (inferred, Some(compiled))
                }
                (None, None) => {
                    self.diagnostics.error(
                        format!("`{}` needs a type annotation or an initializer", declaration.name),
                        Some(&context),
                    );
                    continue;
                }
            };
            if is_const {
                let init = match init {
                    Some(init) => init,
                    None => {
                        self.diagnostics.error(
                            format!("constant `{}` must be initialized", declaration.name),
                            Some(&context),
                        );
                        continue;
                    }
                };
                match self.precompute_constant(init) {
                    Ok(value) => {
                        // Virtual: no slot, reads expand to the literal.
                        self.declare_local(
                            &declaration.name,
                            ScopedLocal {
                                index: None,
                                ty,
                                constant: Some(value),
                                is_const: true,
                            },
                        );
                    }
                    Err(init) => {
                        let native = ty.native(self.target());
                        let index = self.func().add_local(native);
                        self.declare_local(
                            &declaration.name,
                            ScopedLocal {
                                index: Some(index),
                                ty,
                                constant: None,
                                is_const: true,
                            },
                        );
                        initializers.push(Expr::SetLocal {
                            index,
                            value: Box::new(init),
                        });
                    }
                }
            } else {
                let native = ty.native(self.target());
                let index = self.func().add_local(native);
                self.declare_local(
                    &declaration.name,
                    ScopedLocal {
                        index: Some(index),
                        ty,
                        constant: None,
                        is_const: false,
                    },
                );
                if let Some(init) = init {
                    initializers.push(Expr::SetLocal {
                        index,
                        value: Box::new(init),
                    });
                }
            }
        }
        match initializers.len() {
            0 => Expr::Nop,
            1 => initializers.pop().expect("one initializer"),
            _ => Expr::Block {
                label: None,
                children: initializers,
                ty: NativeType::None,
            },
        }
    }
}
