//! Semantic types shared across all lowering phases.
//!
//! Every concrete type projects to one of the four WebAssembly value types;
//! "small" integers (i8, i16, u8, u16, bool) share the i32 projection and
//! require a wrap after any arithmetic that can dirty their high bits.

use crate::module::NativeType;

/// Pointer/memory model of the output module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Wasm32,
    Wasm64,
}

impl Target {
    /// Pointer size in bytes.
    pub fn pointer_size(self) -> u32 {
        match self {
            Target::Wasm32 => 4,
            Target::Wasm64 => 8,
        }
    }

    pub fn pointer_native(self) -> NativeType {
        match self {
            Target::Wasm32 => NativeType::I32,
            Target::Wasm64 => NativeType::I64,
        }
    }
}

/// Index of a resolved class in the program's class arena. Signatures and
/// types reference classes by index, never by owning handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub usize);

/// Index of a signature in the program's signature arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    Bool,
    F32,
    F64,
    Void,
}

impl TypeKind {
    pub fn is_integer(self) -> bool {
        !matches!(self, TypeKind::F32 | TypeKind::F64 | TypeKind::Void)
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::F32 | TypeKind::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            TypeKind::I8 | TypeKind::I16 | TypeKind::I32 | TypeKind::I64 | TypeKind::Isize
        )
    }

    /// Small integers project to i32 but occupy fewer value bits.
    pub fn is_small(self) -> bool {
        matches!(
            self,
            TypeKind::I8 | TypeKind::I16 | TypeKind::U8 | TypeKind::U16 | TypeKind::Bool
        )
    }

    /// 64-bit on the given target. isize/usize flip with the pointer width.
    pub fn is_long(self, target: Target) -> bool {
        match self {
            TypeKind::I64 | TypeKind::U64 => true,
            TypeKind::Isize | TypeKind::Usize => target == Target::Wasm64,
            _ => false,
        }
    }

    /// Value size in bits.
    pub fn size(self, target: Target) -> u32 {
        match self {
            TypeKind::Bool => 1,
            TypeKind::I8 | TypeKind::U8 => 8,
            TypeKind::I16 | TypeKind::U16 => 16,
            TypeKind::I32 | TypeKind::U32 | TypeKind::F32 => 32,
            TypeKind::I64 | TypeKind::U64 | TypeKind::F64 => 64,
            TypeKind::Isize | TypeKind::Usize => target.pointer_size() * 8,
            TypeKind::Void => 0,
        }
    }

    pub fn native(self, target: Target) -> NativeType {
        match self {
            TypeKind::F32 => NativeType::F32,
            TypeKind::F64 => NativeType::F64,
            TypeKind::I64 | TypeKind::U64 => NativeType::I64,
            TypeKind::Isize | TypeKind::Usize => target.pointer_native(),
            TypeKind::Void => NativeType::None,
            _ => NativeType::I32,
        }
    }
}

/// A semantic type: a kind plus an optional class payload (reference types)
/// or function-signature payload (function references).
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub class: Option<ClassId>,
    pub signature: Option<SignatureId>,
}

impl Type {
    pub const fn new(kind: TypeKind) -> Type {
        Type {
            kind,
            class: None,
            signature: None,
        }
    }

    pub const fn i8() -> Type {
        Type::new(TypeKind::I8)
    }
    pub const fn i16() -> Type {
        Type::new(TypeKind::I16)
    }
    pub const fn i32() -> Type {
        Type::new(TypeKind::I32)
    }
    pub const fn i64() -> Type {
        Type::new(TypeKind::I64)
    }
    pub const fn isize() -> Type {
        Type::new(TypeKind::Isize)
    }
    pub const fn u8() -> Type {
        Type::new(TypeKind::U8)
    }
    pub const fn u16() -> Type {
        Type::new(TypeKind::U16)
    }
    pub const fn u32() -> Type {
        Type::new(TypeKind::U32)
    }
    pub const fn u64() -> Type {
        Type::new(TypeKind::U64)
    }
    pub const fn usize() -> Type {
        Type::new(TypeKind::Usize)
    }
    pub const fn bool() -> Type {
        Type::new(TypeKind::Bool)
    }
    pub const fn f32() -> Type {
        Type::new(TypeKind::F32)
    }
    pub const fn f64() -> Type {
        Type::new(TypeKind::F64)
    }
    pub const fn void() -> Type {
        Type::new(TypeKind::Void)
    }

    /// A reference to a class instance. References are pointer-width.
    pub fn class_reference(id: ClassId) -> Type {
        Type {
            kind: TypeKind::Usize,
            class: Some(id),
            signature: None,
        }
    }

    /// A first-class function reference: an index into the function table.
    pub fn function_reference(id: SignatureId) -> Type {
        Type {
            kind: TypeKind::U32,
            class: None,
            signature: Some(id),
        }
    }

    pub fn is_reference(&self) -> bool {
        self.class.is_some()
    }

    pub fn is_void(&self) -> bool {
        self.kind == TypeKind::Void
    }

    pub fn native(&self, target: Target) -> NativeType {
        self.kind.native(target)
    }

    /// Byte size as stored in linear memory.
    pub fn byte_size(&self, target: Target) -> u32 {
        match self.kind {
            TypeKind::Bool => 1,
            _ => self.kind.size(target) / 8,
        }
    }

    /// Whether a value of this type can be implicitly assigned to `other`.
    /// The conversion is still emitted on failure; this only gates the
    /// diagnostic.
    pub fn is_assignable_to(&self, other: &Type, target: Target) -> bool {
        if self == other {
            return true;
        }
        if self.is_reference() || other.is_reference() {
            if self.class == other.class {
                return true;
            }
            // A reference is a pointer: it interconverts with the bare
            // pointer-width integer (null assignment, address-taking).
            // Distinct classes never unify implicitly; subtyping is checked
            // by the resolver before we get here.
            return self.kind == other.kind && (self.class.is_none() || other.class.is_none());
        }
        let (from, to) = (self.kind, other.kind);
        if from == TypeKind::Void || to == TypeKind::Void {
            return false;
        }
        if to.is_float() {
            return from.is_float() && from.size(target) <= to.size(target)
                || from.is_integer() && from.size(target) < to.size(target);
        }
        if from.is_float() {
            return false;
        }
        // Integer to integer: widening, with signedness compatible.
        let (fs, ts) = (from.size(target), to.size(target));
        if fs > ts {
            return false;
        }
        if from.is_signed() == to.is_signed() {
            return true;
        }
        // An unsigned source fits a strictly larger signed target.
        !from.is_signed() && to.is_signed() && fs < ts
    }
}

/// The callable shape of a function: parameter types, an optional `this`
/// type for methods, the return type, and the count of parameters that
/// must be supplied at every call site.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub parameter_types: Vec<Type>,
    pub this_type: Option<Type>,
    pub return_type: Type,
    pub required_parameters: usize,
    pub has_rest: bool,
}

impl Signature {
    /// Parameter count including `this`.
    pub fn parameter_count_incl_this(&self) -> usize {
        self.parameter_types.len() + usize::from(self.this_type.is_some())
    }

    pub fn native_parameters(&self, target: Target) -> Vec<NativeType> {
        let mut natives = Vec::with_capacity(self.parameter_count_incl_this());
        if let Some(this_type) = &self.this_type {
            natives.push(this_type.native(target));
        }
        natives.extend(self.parameter_types.iter().map(|t| t.native(target)));
        natives
    }
}

/// Unify two operand types to the common type binary operators evaluate in.
/// Floats absorb integers, wider absorbs narrower, and equal-width integers
/// of differing signedness unify to the unsigned kind. Reference and
/// function types never unify with anything but themselves.
pub fn common_compatible(left: &Type, right: &Type, target: Target) -> Option<Type> {
    if left == right {
        return Some(left.clone());
    }
    if left.is_reference()
        || right.is_reference()
        || left.signature.is_some()
        || right.signature.is_some()
    {
        return None;
    }
    let (a, b) = (left.kind, right.kind);
    if a == TypeKind::Void || b == TypeKind::Void {
        return None;
    }
    if a.is_float() || b.is_float() {
        if a == TypeKind::F64 || b == TypeKind::F64 {
            return Some(Type::f64());
        }
        return Some(Type::f32());
    }
    let (sa, sb) = (a.size(target), b.size(target));
    let wider = if sa >= sb { a } else { b };
    let size = sa.max(sb);
    if a.is_signed() == b.is_signed() {
        return Some(Type::new(wider));
    }
    // Differing signedness: the unsigned kind of the wider width wins.
    let kind = match size {
        1 => TypeKind::Bool,
        8 => TypeKind::U8,
        16 => TypeKind::U16,
        32 => TypeKind::U32,
        _ => TypeKind::U64,
    };
    Some(Type::new(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integers_project_to_i32() {
        for kind in [TypeKind::I8, TypeKind::I16, TypeKind::U8, TypeKind::U16, TypeKind::Bool] {
            assert!(kind.is_small());
            assert_eq!(kind.native(Target::Wasm32), NativeType::I32);
            assert_eq!(kind.native(Target::Wasm64), NativeType::I32);
        }
    }

    #[test]
    fn pointer_width_follows_target() {
        assert_eq!(TypeKind::Usize.native(Target::Wasm32), NativeType::I32);
        assert_eq!(TypeKind::Usize.native(Target::Wasm64), NativeType::I64);
        assert!(TypeKind::Isize.is_long(Target::Wasm64));
        assert!(!TypeKind::Isize.is_long(Target::Wasm32));
    }

    #[test]
    fn assignability_widens_but_never_narrows() {
        let t = Target::Wasm32;
        assert!(Type::u8().is_assignable_to(&Type::i32(), t));
        assert!(Type::i8().is_assignable_to(&Type::i16(), t));
        assert!(!Type::i32().is_assignable_to(&Type::i8(), t));
        assert!(!Type::u32().is_assignable_to(&Type::i32(), t));
        assert!(Type::i32().is_assignable_to(&Type::f64(), t));
        assert!(!Type::f32().is_assignable_to(&Type::i32(), t));
    }

    #[test]
    fn common_type_prefers_floats_and_unsigned() {
        let t = Target::Wasm32;
        assert_eq!(common_compatible(&Type::i32(), &Type::f64(), t), Some(Type::f64()));
        assert_eq!(common_compatible(&Type::i32(), &Type::u32(), t), Some(Type::u32()));
        assert_eq!(common_compatible(&Type::i8(), &Type::i32(), t), Some(Type::i32()));
        assert_eq!(common_compatible(&Type::u8(), &Type::u16(), t), Some(Type::u16()));
    }
}
