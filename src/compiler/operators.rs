//! The numeric bridge: small-integer wrapping, truthiness, the conversion
//! matrix, and unary/binary operator lowering.
//!
//! Operands of operators that re-wrap their result are compiled with the
//! wrap flag cleared so masks are not emitted twice; operators whose
//! correctness depends on clean operands (division, right shifts,
//! comparisons) compile them wrapped.

use crate::ast::{BinaryOp, Expression, PostfixOp, UnaryOp};
use crate::compiler::{Compiler, Conversion};
use crate::module::{BinOp, ConstValue, Expr, NativeType, UnOp};
use crate::types::{common_compatible, Target, Type, TypeKind};

impl Compiler {
    /// A literal constant of the given semantic type.
    pub(crate) fn make_constant(&self, ty: &Type, value: ConstValue) -> Expr {
        match (ty.native(self.target()), value) {
            (NativeType::I32, ConstValue::I32(v)) => Expr::I32(v),
            (NativeType::I32, ConstValue::I64(v)) => Expr::I32(v as i32),
            (NativeType::I64, ConstValue::I64(v)) => Expr::I64(v),
            (NativeType::I64, ConstValue::I32(v)) => Expr::I64(v as i64),
            (NativeType::F32, ConstValue::F32(v)) => Expr::F32(v),
            (NativeType::F32, ConstValue::F64(v)) => Expr::F32(v as f32),
            (NativeType::F64, ConstValue::F64(v)) => Expr::F64(v),
            (NativeType::F64, ConstValue::F32(v)) => Expr::F64(v as f64),
            (_, value) => Expr::constant(value),
        }
    }

    /// A zero of the given semantic type.
    pub(crate) fn make_zero(&self, ty: &Type) -> Expr {
        match ty.native(self.target()) {
            NativeType::I64 => Expr::I64(0),
            NativeType::F32 => Expr::F32(0.0),
            NativeType::F64 => Expr::F64(0.0),
            _ => Expr::I32(0),
        }
    }

    /// Normalize a small-integer result: i8/i16 by shift pairs, u8/u16 by
    /// masks, bool by masking to one bit.
    pub(crate) fn make_small_integer_wrap(&self, expr: Expr, ty: &Type) -> Expr {
        let shift_pair = |expr: Expr, bits: i32| {
            let shifted = Expr::Binary {
                op: BinOp::Shl,
                left: Box::new(expr),
                right: Box::new(Expr::I32(bits)),
                ty: NativeType::I32,
            };
            Expr::Binary {
                op: BinOp::ShrS,
                left: Box::new(shifted),
                right: Box::new(Expr::I32(bits)),
                ty: NativeType::I32,
            }
        };
        let mask = |expr: Expr, bits: i32| Expr::Binary {
            op: BinOp::And,
            left: Box::new(expr),
            right: Box::new(Expr::I32(bits)),
            ty: NativeType::I32,
        };
        match ty.kind {
            TypeKind::I8 => shift_pair(expr, 24),
            TypeKind::I16 => shift_pair(expr, 16),
            TypeKind::U8 => mask(expr, 0xff),
            TypeKind::U16 => mask(expr, 0xffff),
            TypeKind::Bool => mask(expr, 0x1),
            _ => expr,
        }
    }

    /// An i32 truthiness test of a value of the given type.
    pub(crate) fn make_is_truthy(&self, expr: Expr, ty: &Type) -> Expr {
        match ty.native(self.target()) {
            NativeType::I64 => Expr::Binary {
                op: BinOp::Ne,
                left: Box::new(expr),
                right: Box::new(Expr::I64(0)),
                ty: NativeType::I32,
            },
            NativeType::F32 => Expr::Binary {
                op: BinOp::Ne,
                left: Box::new(expr),
                right: Box::new(Expr::F32(0.0)),
                ty: NativeType::I32,
            },
            NativeType::F64 => Expr::Binary {
                op: BinOp::Ne,
                left: Box::new(expr),
                right: Box::new(Expr::F64(0.0)),
                ty: NativeType::I32,
            },
            _ => expr,
        }
    }

    /// Insert the conversion from `from` to `to`, per the conversion
    /// matrix. Implicit conversions additionally check assignability and
    /// diagnose, but the conversion is still emitted so analysis continues.
    pub(crate) fn convert_expression(
        &mut self,
        expr: Expr,
        from: &Type,
        to: &Type,
        explicit: bool,
    ) -> Expr {
        let target = self.target();
        if to.is_void() {
            return if expr.ty() == NativeType::None {
                expr
            } else {
                Expr::Drop {
                    value: Box::new(expr),
                }
            };
        }
        if from.is_void() {
            let context = self.func_name();
            self.diagnostics.error(
                format!(
                    "a void expression cannot be converted to `{}`",
                    self.program.type_name(to)
                ),
                Some(&context),
            );
            return Expr::Unreachable;
        }
        if from.kind == to.kind && from.class == to.class {
            return expr;
        }
        if !explicit && !from.is_assignable_to(to, target) {
            let context = self.func_name();
            self.diagnostics.error(
                format!(
                    "type `{}` is not assignable to type `{}`",
                    self.program.type_name(from),
                    self.program.type_name(to)
                ),
                Some(&context),
            );
        }

        let (fk, tk) = (from.kind, to.kind);
        if fk.is_float() {
            if tk.is_float() {
                let op = if tk == TypeKind::F64 {
                    UnOp::PromoteF32
                } else {
                    UnOp::DemoteF64
                };
                return Expr::Unary {
                    op,
                    value: Box::new(expr),
                    ty: tk.native(target),
                };
            }
            // Float to integer: truncate with the target's signedness and
            // width, then re-wrap small targets.
            let op = match (fk, tk.is_signed()) {
                (TypeKind::F32, true) => UnOp::TruncF32S,
                (TypeKind::F32, false) => UnOp::TruncF32U,
                (_, true) => UnOp::TruncF64S,
                (_, false) => UnOp::TruncF64U,
            };
            let truncated = Expr::Unary {
                op,
                value: Box::new(expr),
                ty: tk.native(target),
            };
            return if tk.is_small() {
                self.make_small_integer_wrap(truncated, to)
            } else {
                truncated
            };
        }
        if tk.is_float() {
            let op = match (fk.is_long(target), fk.is_signed()) {
                (false, true) => UnOp::ConvertI32S,
                (false, false) => UnOp::ConvertI32U,
                (true, true) => UnOp::ConvertI64S,
                (true, false) => UnOp::ConvertI64U,
            };
            return Expr::Unary {
                op,
                value: Box::new(expr),
                ty: tk.native(target),
            };
        }

        // Integer to integer.
        let (from_long, to_long) = (fk.is_long(target), tk.is_long(target));
        if from_long && !to_long {
            let wrapped = Expr::Unary {
                op: UnOp::WrapI64,
                value: Box::new(expr),
                ty: NativeType::I32,
            };
            return if tk.is_small() {
                self.make_small_integer_wrap(wrapped, to)
            } else {
                wrapped
            };
        }
        if !from_long && to_long {
            let op = if tk.is_signed() {
                UnOp::ExtendI32S
            } else {
                UnOp::ExtendI32U
            };
            return Expr::Unary {
                op,
                value: Box::new(expr),
                ty: NativeType::I64,
            };
        }
        // Same native width: re-wrap only when the target is small and the
        // value could carry foreign bits.
        if tk.is_small() && (tk.size(target) < fk.size(target) || tk.is_signed() != fk.is_signed())
        {
            return self.make_small_integer_wrap(expr, to);
        }
        expr
    }

    /// An integer literal, emitted directly in the contextual integer type
    /// when its bit width can hold the value (wrapping into the type's
    /// representation), the narrowest of i32/i64 otherwise. Negation is
    /// handled here so the minimum signed values are representable.
    pub(crate) fn compile_integer_literal(
        &mut self,
        value: u64,
        negative: bool,
        contextual: &Type,
    ) -> Expr {
        let target = self.target();
        if contextual.kind.is_float() {
            return self.compile_float_literal(
                if negative { -(value as f64) } else { value as f64 },
                contextual,
            );
        }
        let ty = if contextual.kind.is_integer()
            && !contextual.is_reference()
            && contextual.signature.is_none()
            && integer_fits(value, negative, contextual.kind, target)
        {
            contextual.clone()
        } else if negative && value <= 1 << 31 || !negative && value <= i32::MAX as u64 {
            Type::i32()
        } else {
            Type::i64()
        };
        self.current_type = ty.clone();
        let signed = if negative {
            (value as i64).wrapping_neg()
        } else {
            value as i64
        };
        let signed = wrap_to_kind(signed, ty.kind, target);
        match ty.native(target) {
            NativeType::I64 => Expr::I64(signed),
            _ => Expr::I32(signed as i32),
        }
    }

    pub(crate) fn compile_float_literal(&mut self, value: f64, contextual: &Type) -> Expr {
        if contextual.kind == TypeKind::F32 {
            self.current_type = Type::f32();
            Expr::F32(value as f32)
        } else {
            self.current_type = Type::f64();
            Expr::F64(value)
        }
    }

    pub(crate) fn compile_unary_expression(
        &mut self,
        op: UnaryOp,
        operand: &Expression,
        contextual: &Type,
        wrap: bool,
    ) -> Expr {
        let target = self.target();
        match op {
            UnaryOp::Plus => self.compile_expression_full(operand, contextual, Conversion::None, wrap),
            UnaryOp::Minus => {
                // Negating a literal directly admits the minimum signed value.
                if let Expression::Integer(value) = operand {
                    return self.compile_integer_literal(*value, true, contextual);
                }
                let value = self.compile_expression_full(operand, contextual, Conversion::None, false);
                let ty = self.current_type.clone();
                if ty.kind.is_float() {
                    return Expr::Unary {
                        op: UnOp::Neg,
                        value: Box::new(value),
                        ty: ty.native(target),
                    };
                }
                let negated = Expr::Binary {
                    op: BinOp::Sub,
                    left: Box::new(self.make_zero(&ty)),
                    right: Box::new(value),
                    ty: ty.native(target),
                };
                self.wrap_if_small(negated, &ty, wrap)
            }
            UnaryOp::Not => {
                let value = self.compile_expression_full(operand, &Type::bool(), Conversion::None, true);
                let ty = self.current_type.clone();
                let truthy = self.make_is_truthy(value, &ty);
                self.current_type = Type::bool();
                Expr::Unary {
                    op: UnOp::Eqz,
                    value: Box::new(truthy),
                    ty: NativeType::I32,
                }
            }
            UnaryOp::BitNot => {
                let value = self.compile_expression_full(operand, contextual, Conversion::None, false);
                let ty = self.current_type.clone();
                if ty.kind.is_float() || ty.is_reference() {
                    let context = self.func_name();
                    self.diagnostics.error(
                        format!("operator `~` cannot be applied to `{}`", self.program.type_name(&ty)),
                        Some(&context),
                    );
                    return Expr::Unreachable;
                }
                let ones = if ty.kind.is_long(target) {
                    Expr::I64(-1)
                } else {
                    Expr::I32(-1)
                };
                let inverted = Expr::Binary {
                    op: BinOp::Xor,
                    left: Box::new(value),
                    right: Box::new(ones),
                    ty: ty.native(target),
                };
                self.wrap_if_small(inverted, &ty, wrap)
            }
            UnaryOp::PreIncrement | UnaryOp::PreDecrement => {
                let value = self.compile_expression_full(operand, contextual, Conversion::None, false);
                let ty = self.current_type.clone();
                let one = self.make_one(&ty);
                let bin_op = if op == UnaryOp::PreIncrement {
                    BinOp::Add
                } else {
                    BinOp::Sub
                };
                let stepped = Expr::Binary {
                    op: bin_op,
                    left: Box::new(value),
                    right: Box::new(one),
                    ty: ty.native(target),
                };
                let stepped = self.make_small_integer_wrap(stepped, &ty);
                let tee = !contextual.is_void();
                self.compile_assignment_with_value(operand, stepped, &ty, tee)
            }
        }
    }

    pub(crate) fn compile_postfix_expression(
        &mut self,
        op: PostfixOp,
        operand: &Expression,
        contextual: &Type,
    ) -> Expr {
        let target = self.target();
        let value = self.compile_expression_full(operand, contextual, Conversion::None, true);
        let ty = self.current_type.clone();
        let one = self.make_one(&ty);
        let bin_op = if op == PostfixOp::Increment {
            BinOp::Add
        } else {
            BinOp::Sub
        };
        if contextual.is_void() {
            let stepped = Expr::Binary {
                op: bin_op,
                left: Box::new(value),
                right: Box::new(one),
                ty: ty.native(target),
            };
            let stepped = self.make_small_integer_wrap(stepped, &ty);
            return self.compile_assignment_with_value(operand, stepped, &ty, false);
        }
        // The value before the step is the result: hold it in a temp.
        let native = ty.native(target);
        let temp = self.func().get_temp_local(native);
        let stepped = Expr::Binary {
            op: bin_op,
            left: Box::new(Expr::GetLocal { index: temp, ty: native }),
            right: Box::new(one),
            ty: native,
        };
        let stepped = self.make_small_integer_wrap(stepped, &ty);
        let assignment = self.compile_assignment_with_value(operand, stepped, &ty, false);
        self.func().free_temp_local(native, temp);
        self.current_type = ty.clone();
        Expr::Block {
            label: None,
            children: vec![
                Expr::SetLocal {
                    index: temp,
                    value: Box::new(value),
                },
                assignment,
                Expr::GetLocal { index: temp, ty: native },
            ],
            ty: native,
        }
    }

    fn make_one(&self, ty: &Type) -> Expr {
        match ty.native(self.target()) {
            NativeType::I64 => Expr::I64(1),
            NativeType::F32 => Expr::F32(1.0),
            NativeType::F64 => Expr::F64(1.0),
            _ => Expr::I32(1),
        }
    }

    pub(crate) fn wrap_if_small(&self, expr: Expr, ty: &Type, wrap: bool) -> Expr {
        if wrap && ty.kind.is_small() {
            self.make_small_integer_wrap(expr, ty)
        } else {
            expr
        }
    }

    pub(crate) fn compile_binary_expression(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        contextual: &Type,
        wrap: bool,
    ) -> Expr {
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                return self.compile_logical_expression(op, left, right)
            }
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrU => {
                return self.compile_shift_expression(op, left, right, contextual, wrap)
            }
            _ => {}
        }
        let target = self.target();
        // Operands of self-wrapping operators may stay dirty.
        let operands_wrapped = !matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul
            | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor);
        let left_expr = self.compile_expression_full(left, contextual, Conversion::None, operands_wrapped);
        let left_type = self.current_type.clone();
        let right_expr =
            self.compile_expression_full(right, &left_type, Conversion::None, operands_wrapped);
        let right_type = self.current_type.clone();

        let common = match common_compatible(&left_type, &right_type, target) {
            Some(common) => common,
            None => {
                let context = self.func_name();
                self.diagnostics.error(
                    format!(
                        "operator `{}` cannot be applied to types `{}` and `{}`",
                        binary_op_token(op),
                        self.program.type_name(&left_type),
                        self.program.type_name(&right_type)
                    ),
                    Some(&context),
                );
                self.current_type = contextual.clone();
                return Expr::Unreachable;
            }
        };
        let left_expr = self.convert_expression(left_expr, &left_type, &common, true);
        let right_expr = self.convert_expression(right_expr, &right_type, &common, true);
        let kind = common.kind;
        let is_float = kind.is_float();
        let is_signed = kind.is_signed();

        let ir_op = match op {
            BinaryOp::Add => BinOp::Add,
            BinaryOp::Sub => BinOp::Sub,
            BinaryOp::Mul => BinOp::Mul,
            BinaryOp::Div => {
                if is_float {
                    BinOp::DivF
                } else if is_signed {
                    BinOp::DivS
                } else {
                    BinOp::DivU
                }
            }
            BinaryOp::Rem => {
                if is_float {
                    let context = self.func_name();
                    self.diagnostics.error(
                        "operator `%` cannot be applied to floating-point operands",
                        Some(&context),
                    );
                    self.current_type = contextual.clone();
                    return Expr::Unreachable;
                } else if is_signed {
                    BinOp::RemS
                } else {
                    BinOp::RemU
                }
            }
            BinaryOp::BitAnd => BinOp::And,
            BinaryOp::BitOr => BinOp::Or,
            BinaryOp::BitXor => BinOp::Xor,
            BinaryOp::Eq => BinOp::Eq,
            BinaryOp::Ne => BinOp::Ne,
            BinaryOp::Lt => {
                if is_float {
                    BinOp::LtF
                } else if is_signed {
                    BinOp::LtS
                } else {
                    BinOp::LtU
                }
            }
            BinaryOp::Gt => {
                if is_float {
                    BinOp::GtF
                } else if is_signed {
                    BinOp::GtS
                } else {
                    BinOp::GtU
                }
            }
            BinaryOp::Le => {
                if is_float {
                    BinOp::LeF
                } else if is_signed {
                    BinOp::LeS
                } else {
                    BinOp::LeU
                }
            }
            BinaryOp::Ge => {
                if is_float {
                    BinOp::GeF
                } else if is_signed {
                    BinOp::GeS
                } else {
                    BinOp::GeU
                }
            }
            BinaryOp::Shl | BinaryOp::ShrU | BinaryOp::Shr | BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                unreachable!("handled above")
            }
        };

        let comparison = matches!(
            op,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        );
        let result_ty = if comparison {
            NativeType::I32
        } else {
            common.native(target)
        };
        let result = Expr::Binary {
            op: ir_op,
            left: Box::new(left_expr),
            right: Box::new(right_expr),
            ty: result_ty,
        };
        if comparison {
            self.current_type = Type::bool();
            return result;
        }
        self.current_type = common.clone();
        let rewraps = matches!(
            op,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul
                | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        );
        if rewraps {
            self.wrap_if_small(result, &common, wrap)
        } else {
            result
        }
    }

    /// Shift operators evaluate in the left operand's type.
    fn compile_shift_expression(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        contextual: &Type,
        wrap: bool,
    ) -> Expr {
        let target = self.target();
        // A left shift dirties high bits itself; right shifts need a clean
        // left operand for correct sign/zero propagation.
        let left_wrapped = op != BinaryOp::Shl;
        let left_expr = self.compile_expression_full(left, contextual, Conversion::None, left_wrapped);
        let left_type = self.current_type.clone();
        if left_type.kind.is_float() || left_type.is_reference() {
            let context = self.func_name();
            self.diagnostics.error(
                format!(
                    "operator `{}` cannot be applied to `{}`",
                    binary_op_token(op),
                    self.program.type_name(&left_type)
                ),
                Some(&context),
            );
            self.current_type = contextual.clone();
            return Expr::Unreachable;
        }
        let right_expr = self.compile_expression_full(right, &left_type, Conversion::Explicit, true);
        let ir_op = match op {
            BinaryOp::Shl => BinOp::Shl,
            BinaryOp::ShrU => BinOp::ShrU,
            _ => {
                if left_type.kind.is_signed() {
                    BinOp::ShrS
                } else {
                    BinOp::ShrU
                }
            }
        };
        let result = Expr::Binary {
            op: ir_op,
            left: Box::new(left_expr),
            right: Box::new(right_expr),
            ty: left_type.native(target),
        };
        self.current_type = left_type.clone();
        if op == BinaryOp::Shl {
            self.wrap_if_small(result, &left_type, wrap)
        } else {
            result
        }
    }

    /// `&&`/`||` read the left operand twice: clone when side-effect free,
    /// tee through a temp otherwise.
    fn compile_logical_expression(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Expr {
        let target = self.target();
        let left_expr = self.compile_expression_full(left, &Type::void(), Conversion::None, true);
        let left_type = self.current_type.clone();
        let right_expr = self.compile_expression_full(right, &left_type, Conversion::None, true);
        let right_type = self.current_type.clone();
        let common = match common_compatible(&left_type, &right_type, target) {
            Some(common) => common,
            None => {
                let context = self.func_name();
                self.diagnostics.error(
                    format!(
                        "operator `{}` cannot be applied to types `{}` and `{}`",
                        binary_op_token(op),
                        self.program.type_name(&left_type),
                        self.program.type_name(&right_type)
                    ),
                    Some(&context),
                );
                self.current_type = Type::void();
                return Expr::Unreachable;
            }
        };
        let left_expr = self.convert_expression(left_expr, &left_type, &common, true);
        let right_expr = self.convert_expression(right_expr, &right_type, &common, true);
        let native = common.native(target);

        let (first_use, reuse) = if left_expr.is_pure() {
            (left_expr.clone(), left_expr)
        } else {
            // The slot is only needed within this one expression, so it may
            // be reclaimed by the very next one.
            let temp = self.func().get_and_free_temp_local(native);
            (
                Expr::TeeLocal {
                    index: temp,
                    value: Box::new(left_expr),
                    ty: native,
                },
                Expr::GetLocal { index: temp, ty: native },
            )
        };
        let condition = self.make_is_truthy(first_use, &common);
        let result = if op == BinaryOp::LogicalAnd {
            Expr::If {
                condition: Box::new(condition),
                if_true: Box::new(right_expr),
                if_false: Some(Box::new(reuse)),
                ty: native,
            }
        } else {
            Expr::If {
                condition: Box::new(condition),
                if_true: Box::new(reuse),
                if_false: Some(Box::new(right_expr)),
                ty: native,
            }
        };
        self.current_type = common;
        result
    }
}

/// A literal fits a kind when its bit width can represent the magnitude;
/// positive literals may wrap into a signed kind's value range (200 fits
/// i8 as its sign-extended representation -56).
fn integer_fits(value: u64, negative: bool, kind: TypeKind, target: Target) -> bool {
    if !kind.is_integer() {
        return false;
    }
    let bits = kind.size(target);
    if negative {
        if !kind.is_signed() {
            return value == 0;
        }
        value <= 1u64 << (bits - 1)
    } else if bits == 64 {
        true
    } else {
        value <= (1u64 << bits) - 1
    }
}

/// Wrap a literal into the stored representation of its kind: masked for
/// unsigned, sign-extended for signed sub-word kinds.
fn wrap_to_kind(value: i64, kind: TypeKind, target: Target) -> i64 {
    let bits = kind.size(target);
    if bits >= 64 {
        return value;
    }
    if kind.is_signed() {
        (value << (64 - bits)) >> (64 - bits)
    } else {
        value & ((1i64 << bits) - 1)
    }
}

fn binary_op_token(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
        BinaryOp::ShrU => ">>>",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::Lt => "<",
        BinaryOp::Gt => ">",
        BinaryOp::Le => "<=",
        BinaryOp::Ge => ">=",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::LogicalAnd => "&&",
        BinaryOp::LogicalOr => "||",
    }
}
