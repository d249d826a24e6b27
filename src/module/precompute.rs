//! Constant folding over the IR tree ("precompute").
//!
//! Evaluates side-effect-free expressions with exact WebAssembly semantics:
//! integer arithmetic wraps, shift counts are masked, and anything that
//! would trap at runtime (division by zero, truncation out of range) is
//! left unfolded.

use super::{BinOp, ConstValue, Expr, NativeType, UnOp};

/// Fold a function body to a literal constant expression when possible,
/// returning the original body otherwise.
pub(crate) fn precompute(body: Expr) -> Expr {
    match fold(&body) {
        Some(value) => Expr::constant(value),
        None => body,
    }
}

/// Evaluate a pure expression to a constant. `None` means "not foldable":
/// impure, non-constant, or would trap.
pub(crate) fn fold(expr: &Expr) -> Option<ConstValue> {
    match expr {
        Expr::I32(v) => Some(ConstValue::I32(*v)),
        Expr::I64(v) => Some(ConstValue::I64(*v)),
        Expr::F32(v) => Some(ConstValue::F32(*v)),
        Expr::F64(v) => Some(ConstValue::F64(*v)),
        Expr::Block { label: None, children, .. } if children.len() == 1 => fold(&children[0]),
        Expr::If {
            condition,
            if_true,
            if_false,
            ..
        } => {
            let cond = fold(condition)?;
            if cond.is_nonzero() {
                fold(if_true)
            } else {
                fold(if_false.as_deref()?)
            }
        }
        Expr::Unary { op, value, ty } => fold_unary(*op, fold(value)?, *ty),
        Expr::Binary { op, left, right, .. } => fold_binary(*op, fold(left)?, fold(right)?),
        _ => None,
    }
}

fn fold_unary(op: UnOp, value: ConstValue, ty: NativeType) -> Option<ConstValue> {
    use ConstValue::*;
    Some(match (op, value) {
        (UnOp::Eqz, I32(v)) => I32((v == 0) as i32),
        (UnOp::Eqz, I64(v)) => I32((v == 0) as i32),
        (UnOp::Neg, F32(v)) => F32(-v),
        (UnOp::Neg, F64(v)) => F64(-v),
        (UnOp::WrapI64, I64(v)) => I32(v as i32),
        (UnOp::ExtendI32S, I32(v)) => I64(v as i64),
        (UnOp::ExtendI32U, I32(v)) => I64(v as u32 as i64),
        (UnOp::TruncF32S, F32(v)) => return trunc_signed(v as f64, ty),
        (UnOp::TruncF64S, F64(v)) => return trunc_signed(v, ty),
        (UnOp::TruncF32U, F32(v)) => return trunc_unsigned(v as f64, ty),
        (UnOp::TruncF64U, F64(v)) => return trunc_unsigned(v, ty),
        (UnOp::ConvertI32S, I32(v)) => float_of(v as f64, ty),
        (UnOp::ConvertI32U, I32(v)) => float_of(v as u32 as f64, ty),
        (UnOp::ConvertI64S, I64(v)) => float_of(v as f64, ty),
        (UnOp::ConvertI64U, I64(v)) => float_of(v as u64 as f64, ty),
        (UnOp::PromoteF32, F32(v)) => F64(v as f64),
        (UnOp::DemoteF64, F64(v)) => F32(v as f32),
        _ => return None,
    })
}

fn float_of(v: f64, ty: NativeType) -> ConstValue {
    match ty {
        NativeType::F32 => ConstValue::F32(v as f32),
        _ => ConstValue::F64(v),
    }
}

/// Signed float-to-int truncation; traps (bails) when out of range or NaN.
fn trunc_signed(v: f64, ty: NativeType) -> Option<ConstValue> {
    if v.is_nan() {
        return None;
    }
    let t = v.trunc();
    match ty {
        NativeType::I32 => {
            if t < i32::MIN as f64 || t > i32::MAX as f64 {
                return None;
            }
            Some(ConstValue::I32(t as i32))
        }
        NativeType::I64 => {
            if t < i64::MIN as f64 || t >= i64::MAX as f64 {
                return None;
            }
            Some(ConstValue::I64(t as i64))
        }
        _ => None,
    }
}

fn trunc_unsigned(v: f64, ty: NativeType) -> Option<ConstValue> {
    if v.is_nan() {
        return None;
    }
    let t = v.trunc();
    match ty {
        NativeType::I32 => {
            if t < 0.0 || t > u32::MAX as f64 {
                return None;
            }
            Some(ConstValue::I32(t as u32 as i32))
        }
        NativeType::I64 => {
            if t < 0.0 || t >= u64::MAX as f64 {
                return None;
            }
            Some(ConstValue::I64(t as u64 as i64))
        }
        _ => None,
    }
}

fn fold_binary(op: BinOp, left: ConstValue, right: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    match (left, right) {
        (I32(a), I32(b)) => fold_i32(op, a, b),
        (I64(a), I64(b)) => fold_i64(op, a, b),
        (F32(a), F32(b)) => fold_f32(op, a, b),
        (F64(a), F64(b)) => fold_f64(op, a, b),
        _ => None,
    }
}

fn fold_i32(op: BinOp, a: i32, b: i32) -> Option<ConstValue> {
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::DivS => {
            if b == 0 || (a == i32::MIN && b == -1) {
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::DivU => {
            if b == 0 {
                return None;
            }
            ((a as u32) / (b as u32)) as i32
        }
        BinOp::RemS => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinOp::RemU => {
            if b == 0 {
                return None;
            }
            ((a as u32) % (b as u32)) as i32
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::ShrS => a.wrapping_shr(b as u32),
        BinOp::ShrU => ((a as u32).wrapping_shr(b as u32)) as i32,
        BinOp::Eq => (a == b) as i32,
        BinOp::Ne => (a != b) as i32,
        BinOp::LtS => (a < b) as i32,
        BinOp::LtU => ((a as u32) < (b as u32)) as i32,
        BinOp::GtS => (a > b) as i32,
        BinOp::GtU => ((a as u32) > (b as u32)) as i32,
        BinOp::LeS => (a <= b) as i32,
        BinOp::LeU => ((a as u32) <= (b as u32)) as i32,
        BinOp::GeS => (a >= b) as i32,
        BinOp::GeU => ((a as u32) >= (b as u32)) as i32,
        BinOp::DivF | BinOp::LtF | BinOp::GtF | BinOp::LeF | BinOp::GeF => return None,
    };
    Some(ConstValue::I32(v))
}

fn fold_i64(op: BinOp, a: i64, b: i64) -> Option<ConstValue> {
    let comparison = |v: bool| Some(ConstValue::I32(v as i32));
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::DivS => {
            if b == 0 || (a == i64::MIN && b == -1) {
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::DivU => {
            if b == 0 {
                return None;
            }
            ((a as u64) / (b as u64)) as i64
        }
        BinOp::RemS => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinOp::RemU => {
            if b == 0 {
                return None;
            }
            ((a as u64) % (b as u64)) as i64
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::ShrS => a.wrapping_shr(b as u32),
        BinOp::ShrU => ((a as u64).wrapping_shr(b as u32)) as i64,
        BinOp::Eq => return comparison(a == b),
        BinOp::Ne => return comparison(a != b),
        BinOp::LtS => return comparison(a < b),
        BinOp::LtU => return comparison((a as u64) < (b as u64)),
        BinOp::GtS => return comparison(a > b),
        BinOp::GtU => return comparison((a as u64) > (b as u64)),
        BinOp::LeS => return comparison(a <= b),
        BinOp::LeU => return comparison((a as u64) <= (b as u64)),
        BinOp::GeS => return comparison(a >= b),
        BinOp::GeU => return comparison((a as u64) >= (b as u64)),
        BinOp::DivF | BinOp::LtF | BinOp::GtF | BinOp::LeF | BinOp::GeF => return None,
    };
    Some(ConstValue::I64(v))
}

fn fold_f32(op: BinOp, a: f32, b: f32) -> Option<ConstValue> {
    let comparison = |v: bool| Some(ConstValue::I32(v as i32));
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::DivF => a / b,
        BinOp::Eq => return comparison(a == b),
        BinOp::Ne => return comparison(a != b),
        BinOp::LtF => return comparison(a < b),
        BinOp::GtF => return comparison(a > b),
        BinOp::LeF => return comparison(a <= b),
        BinOp::GeF => return comparison(a >= b),
        _ => return None,
    };
    Some(ConstValue::F32(v))
}

fn fold_f64(op: BinOp, a: f64, b: f64) -> Option<ConstValue> {
    let comparison = |v: bool| Some(ConstValue::I32(v as i32));
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::DivF => a / b,
        BinOp::Eq => return comparison(a == b),
        BinOp::Ne => return comparison(a != b),
        BinOp::LtF => return comparison(a < b),
        BinOp::GtF => return comparison(a > b),
        BinOp::LeF => return comparison(a <= b),
        BinOp::GeF => return comparison(a >= b),
        _ => return None,
    };
    Some(ConstValue::F64(v))
}
