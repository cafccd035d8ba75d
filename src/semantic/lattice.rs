//! Static types and the rules relating them: assignability, numeric
//! promotion, constant range checks, narrowing and joins.

use crate::types::{Prim, TypeDescr};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuncId(pub usize);

/// Builtin classes are registered first, in this order, by every symbol table.
pub mod builtin {
    use super::ClassId;

    pub const OBJECT: ClassId = ClassId(0);
    pub const TYPE: ClassId = ClassId(1);
    pub const INT: ClassId = ClassId(2);
    pub const FLOAT: ClassId = ClassId(3);
    pub const STR: ClassId = ClassId(4);
    pub const BOOL: ClassId = ClassId(5);
    pub const LIST: ClassId = ClassId(6);
    pub const DICT: ClassId = ClassId(7);
    pub const TUPLE: ClassId = ClassId(8);

    pub const NAMES: [&str; 9] = [
        "object", "type", "int", "float", "str", "bool", "list", "dict", "tuple",
    ];
}

/// What the lattice needs to know about the class graph.
pub trait ClassHierarchy {
    fn base_of(&self, class: ClassId) -> Option<ClassId>;
    fn class_name(&self, class: ClassId) -> &str;
    /// Module-qualified name used in runtime type descriptions.
    fn class_qualname(&self, class: ClassId) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Dynamic,
    NoneType,
    Prim(Prim),
    Instance(ClassId),
    /// The class object itself.
    Class(ClassId),
    Module(String),
    Optional(Box<Type>),
    Array(Prim),
    /// `list[int]`, `dict[str, C]`; arguments are erased for assignability.
    Generic { class: ClassId, args: Vec<Type> },
    Function(FuncId),
}

/// Runtime checks that refine a type inside a branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    IsNone,
    IsNotNone,
    /// `isinstance(x, C)`; `None` when the class is not statically known.
    IsInstance(Option<ClassId>),
    Truthy,
}

impl Type {
    /// `Optional[inner]` with nesting collapsed. Primitives cannot be optional.
    pub fn optional(inner: Type) -> Option<Type> {
        match inner {
            Type::Prim(_) => None,
            Type::Optional(_) | Type::NoneType | Type::Dynamic => Some(inner),
            other => Some(Type::Optional(Box::new(other))),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Type::Dynamic)
    }

    pub fn prim(&self) -> Option<Prim> {
        match self {
            Type::Prim(p) => Some(*p),
            _ => None,
        }
    }

    /// Class of the instances described by this type, seeing through generics.
    pub fn instance_class(&self) -> Option<ClassId> {
        match self {
            Type::Instance(c) => Some(*c),
            Type::Generic { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// The boxed counterpart a primitive value turns into when it enters
    /// dynamic code.
    pub fn boxed(prim: Prim) -> Type {
        if prim.is_float() {
            Type::Instance(builtin::FLOAT)
        } else if prim == Prim::CBool {
            Type::Instance(builtin::BOOL)
        } else {
            Type::Instance(builtin::INT)
        }
    }

    pub fn name(&self, h: &dyn ClassHierarchy) -> String {
        match self {
            Type::Dynamic => "dynamic".to_string(),
            Type::NoneType => "None".to_string(),
            Type::Prim(p) => p.to_string(),
            Type::Instance(c) => h.class_name(*c).to_string(),
            Type::Class(c) => format!("type[{}]", h.class_name(*c)),
            Type::Module(m) => format!("module '{}'", m),
            Type::Optional(inner) => format!("Optional[{}]", inner.name(h)),
            Type::Array(p) => format!("Array[{}]", p),
            Type::Generic { class, args } => {
                let args: Vec<String> = args.iter().map(|a| a.name(h)).collect();
                format!("{}[{}]", h.class_name(*class), args.join(", "))
            }
            Type::Function(_) => "function".to_string(),
        }
    }

    /// The runtime-checkable description of this type; `Dynamic` when the
    /// runtime cannot check it.
    pub fn to_descr(&self, h: &dyn ClassHierarchy) -> TypeDescr {
        match self {
            Type::NoneType => TypeDescr::NoneType,
            Type::Prim(p) => TypeDescr::Prim(*p),
            Type::Instance(c) | Type::Generic { class: c, .. } => class_descr(*c, h),
            Type::Optional(inner) => match inner.to_descr(h) {
                TypeDescr::Dynamic | TypeDescr::Object => TypeDescr::Dynamic,
                d => TypeDescr::Optional(Box::new(d)),
            },
            _ => TypeDescr::Dynamic,
        }
    }
}

fn class_descr(class: ClassId, h: &dyn ClassHierarchy) -> TypeDescr {
    match class {
        builtin::OBJECT => TypeDescr::Object,
        builtin::INT => TypeDescr::Int,
        builtin::FLOAT => TypeDescr::Float,
        builtin::STR => TypeDescr::Str,
        builtin::BOOL => TypeDescr::Bool,
        builtin::LIST => TypeDescr::List,
        builtin::DICT => TypeDescr::Dict,
        builtin::TUPLE => TypeDescr::Tuple,
        builtin::TYPE => TypeDescr::Dynamic,
        other => TypeDescr::Class(h.class_qualname(other)),
    }
}

pub fn is_subclass(h: &dyn ClassHierarchy, class: ClassId, base: ClassId) -> bool {
    let mut cur = Some(class);
    while let Some(c) = cur {
        if c == base {
            return true;
        }
        cur = h.base_of(c);
    }
    base == builtin::OBJECT
}

/// Can a value of static type `from` be stored where `to` is expected?
pub fn is_assignable(h: &dyn ClassHierarchy, from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Dynamic, _) | (_, Type::Dynamic) => true,
        (Type::Prim(_), _) | (_, Type::Prim(_)) => false,
        (Type::NoneType, Type::Optional(_)) => true,
        (_, Type::Instance(builtin::OBJECT)) => true,
        (Type::Optional(a), Type::Optional(b)) => is_assignable(h, a, b),
        (Type::Optional(_), _) | (Type::NoneType, _) => false,
        (_, Type::Optional(b)) => is_assignable(h, from, b),
        (Type::Class(_), Type::Instance(builtin::TYPE)) => true,
        (Type::Class(a), Type::Class(b)) => is_subclass(h, *a, *b),
        (Type::Array(a), Type::Array(b)) => a == b,
        _ => match (from.instance_class(), to.instance_class()) {
            (Some(a), Some(b)) => is_subclass(h, a, b),
            _ => false,
        },
    }
}

/// The type both operands are promoted to before an arithmetic or comparison
/// operation, or `None` when no lossless common type exists.
pub fn common_numeric_type(a: Prim, b: Prim) -> Option<Prim> {
    if a == b {
        return Some(a);
    }
    if a.is_float() && b.is_float() {
        return Some(Prim::Double);
    }
    if !a.is_int() || !b.is_int() {
        return None;
    }
    if a.is_signed() == b.is_signed() {
        return Some(if a.bits() >= b.bits() { a } else { b });
    }
    let (unsigned, signed) = if a.is_signed() { (b, a) } else { (a, b) };
    let width = (unsigned.bits() * 2).max(signed.bits());
    Prim::signed_of_width(width)
}

/// Verifies that an integer constant fits `prim`.
pub fn check_constant_range(value: i128, prim: Prim) -> Result<(), String> {
    if prim.contains(value) {
        Ok(())
    } else {
        Err(format!(
            "constant {} is outside of the range {} to {} for {}",
            value,
            prim.min(),
            prim.max(),
            prim
        ))
    }
}

/// Refines `ty` for the branch where `predicate` holds (first) and the
/// branch where it does not (second).
pub fn narrow(h: &dyn ClassHierarchy, ty: &Type, predicate: &Predicate) -> (Type, Type) {
    match predicate {
        Predicate::IsNotNone => match ty {
            Type::Optional(inner) => ((**inner).clone(), Type::NoneType),
            _ => (ty.clone(), ty.clone()),
        },
        Predicate::IsNone => {
            let (not_none, none) = narrow(h, ty, &Predicate::IsNotNone);
            (none, not_none)
        }
        Predicate::Truthy => match ty {
            Type::Optional(inner) => ((**inner).clone(), ty.clone()),
            _ => (ty.clone(), ty.clone()),
        },
        Predicate::IsInstance(None) => (ty.clone(), ty.clone()),
        Predicate::IsInstance(Some(class)) => {
            let base = match ty {
                Type::Optional(inner) => (**inner).clone(),
                other => other.clone(),
            };
            let refined = match &base {
                Type::Dynamic => Type::Instance(*class),
                t => match t.instance_class() {
                    Some(c) if is_subclass(h, *class, c) => Type::Instance(*class),
                    Some(c) if is_subclass(h, c, *class) => base.clone(),
                    _ => ty.clone(),
                },
            };
            (refined, ty.clone())
        }
    }
}

/// Narrowest common supertype of two types flowing into a merge point.
pub fn join(h: &dyn ClassHierarchy, a: &Type, b: &Type) -> Type {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (Type::Dynamic, _) | (_, Type::Dynamic) => Type::Dynamic,
        (Type::Prim(_), _) | (_, Type::Prim(_)) => Type::Dynamic,
        (Type::NoneType, other) | (other, Type::NoneType) => {
            Type::optional(other.clone()).unwrap_or(Type::Dynamic)
        }
        (Type::Optional(x), Type::Optional(y)) => {
            Type::optional(join(h, x, y)).unwrap_or(Type::Dynamic)
        }
        (Type::Optional(x), other) | (other, Type::Optional(x)) => {
            Type::optional(join(h, x, other)).unwrap_or(Type::Dynamic)
        }
        _ => {
            if is_assignable(h, a, b) {
                return b.clone();
            }
            if is_assignable(h, b, a) {
                return a.clone();
            }
            match (a.instance_class(), b.instance_class()) {
                (Some(x), Some(y)) => {
                    let mut cur = Some(x);
                    while let Some(c) = cur {
                        if is_subclass(h, y, c) {
                            return Type::Instance(c);
                        }
                        cur = h.base_of(c);
                    }
                    Type::Instance(builtin::OBJECT)
                }
                _ => Type::Dynamic,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strum::IntoEnumIterator;

    /// object <- A <- B, object <- C, plus the builtins.
    struct Graph;

    const A: ClassId = ClassId(9);
    const B: ClassId = ClassId(10);
    const C: ClassId = ClassId(11);

    impl ClassHierarchy for Graph {
        fn base_of(&self, class: ClassId) -> Option<ClassId> {
            match class {
                builtin::OBJECT => None,
                builtin::BOOL => Some(builtin::INT),
                B => Some(A),
                _ => Some(builtin::OBJECT),
            }
        }

        fn class_name(&self, class: ClassId) -> &str {
            match class {
                A => "A",
                B => "B",
                C => "C",
                other => builtin::NAMES.get(other.0).copied().unwrap_or("?"),
            }
        }

        fn class_qualname(&self, class: ClassId) -> String {
            format!("m.{}", self.class_name(class))
        }
    }

    #[test]
    fn optional_collapses_and_rejects_primitives() {
        let opt = Type::optional(Type::Instance(A)).unwrap();
        assert_eq!(Type::optional(opt.clone()), Some(opt));
        assert_eq!(Type::optional(Type::NoneType), Some(Type::NoneType));
        assert_eq!(Type::optional(Type::Prim(Prim::Int8)), None);
    }

    #[test]
    fn nominal_assignability() {
        let h = Graph;
        assert!(is_assignable(&h, &Type::Instance(B), &Type::Instance(A)));
        assert!(!is_assignable(&h, &Type::Instance(A), &Type::Instance(B)));
        assert!(!is_assignable(&h, &Type::Instance(C), &Type::Instance(A)));
        assert!(is_assignable(&h, &Type::Instance(builtin::BOOL), &Type::Instance(builtin::INT)));
        let opt_a = Type::Optional(Box::new(Type::Instance(A)));
        assert!(is_assignable(&h, &Type::NoneType, &opt_a));
        assert!(is_assignable(&h, &Type::Instance(B), &opt_a));
        assert!(!is_assignable(&h, &opt_a, &Type::Instance(A)));
        let list_int = Type::Generic {
            class: builtin::LIST,
            args: vec![Type::Instance(builtin::INT)],
        };
        assert!(is_assignable(&h, &list_int, &Type::Instance(builtin::LIST)));
    }

    #[test]
    fn primitives_only_assign_to_themselves_or_dynamic() {
        let h = Graph;
        let i16 = Type::Prim(Prim::Int16);
        assert!(is_assignable(&h, &i16, &i16));
        assert!(is_assignable(&h, &i16, &Type::Dynamic));
        assert!(!is_assignable(&h, &i16, &Type::Prim(Prim::Int32)));
        assert!(!is_assignable(&h, &i16, &Type::Instance(builtin::INT)));
        assert!(!is_assignable(&h, &Type::Instance(builtin::INT), &i16));
        assert!(!is_assignable(&h, &i16, &Type::Instance(builtin::OBJECT)));
    }

    #[test]
    fn none_never_assigns_to_a_primitive() {
        let h = Graph;
        for p in Prim::iter() {
            assert!(!is_assignable(&h, &Type::NoneType, &Type::Prim(p)));
        }
    }

    #[test]
    fn mixed_signedness_promotion() {
        assert_eq!(common_numeric_type(Prim::UInt8, Prim::Int8), Some(Prim::Int16));
        assert_eq!(common_numeric_type(Prim::UInt16, Prim::Int16), Some(Prim::Int32));
        assert_eq!(common_numeric_type(Prim::UInt32, Prim::Int32), Some(Prim::Int64));
        assert_eq!(common_numeric_type(Prim::UInt8, Prim::Int32), Some(Prim::Int32));
        assert_eq!(common_numeric_type(Prim::UInt32, Prim::Int8), Some(Prim::Int64));
        assert_eq!(common_numeric_type(Prim::UInt64, Prim::Int64), None);
        assert_eq!(common_numeric_type(Prim::UInt64, Prim::Int8), None);
        assert_eq!(common_numeric_type(Prim::Int8, Prim::Int64), Some(Prim::Int64));
        assert_eq!(common_numeric_type(Prim::Single, Prim::Double), Some(Prim::Double));
        assert_eq!(common_numeric_type(Prim::Int32, Prim::Double), None);
        assert_eq!(common_numeric_type(Prim::CBool, Prim::Int8), None);
    }

    #[test]
    fn range_message() {
        let msg = check_constant_range(128, Prim::Int8).unwrap_err();
        assert_eq!(msg, "constant 128 is outside of the range -128 to 127 for int8");
        assert!(check_constant_range(255, Prim::UInt8).is_ok());
        assert!(check_constant_range(256, Prim::UInt8).is_err());
        assert!(check_constant_range(-1, Prim::UInt8).is_err());
    }

    #[test]
    fn narrowing() {
        let h = Graph;
        let opt_a = Type::Optional(Box::new(Type::Instance(A)));
        assert_eq!(
            narrow(&h, &opt_a, &Predicate::IsNotNone),
            (Type::Instance(A), Type::NoneType)
        );
        assert_eq!(
            narrow(&h, &opt_a, &Predicate::IsNone),
            (Type::NoneType, Type::Instance(A))
        );
        assert_eq!(
            narrow(&h, &Type::Instance(A), &Predicate::IsInstance(Some(B))).0,
            Type::Instance(B)
        );
        assert_eq!(
            narrow(&h, &Type::Dynamic, &Predicate::IsInstance(None)).0,
            Type::Dynamic
        );
        assert_eq!(
            narrow(&h, &Type::Dynamic, &Predicate::IsInstance(Some(C))).0,
            Type::Instance(C)
        );
    }

    #[test]
    fn joins() {
        let h = Graph;
        assert_eq!(
            join(&h, &Type::Instance(B), &Type::Instance(A)),
            Type::Instance(A)
        );
        assert_eq!(
            join(&h, &Type::Instance(B), &Type::Instance(C)),
            Type::Instance(builtin::OBJECT)
        );
        assert_eq!(
            join(&h, &Type::Instance(A), &Type::NoneType),
            Type::Optional(Box::new(Type::Instance(A)))
        );
        assert_eq!(
            join(&h, &Type::Prim(Prim::Int8), &Type::Prim(Prim::Int16)),
            Type::Dynamic
        );
    }

    #[test]
    fn narrow_then_widen_round_trips() {
        let h = Graph;
        let opt_a = Type::Optional(Box::new(Type::Instance(A)));
        let (inside, _) = narrow(&h, &opt_a, &Predicate::IsNotNone);
        // reassigned to the original type inside the branch, joined with the
        // path that skipped it
        let merged = join(&h, &join(&h, &inside, &opt_a), &opt_a);
        assert_eq!(merged, opt_a);
    }

    #[test]
    fn descriptions() {
        let h = Graph;
        assert_eq!(Type::Instance(A).to_descr(&h), TypeDescr::Class("m.A".into()));
        assert_eq!(Type::Instance(builtin::STR).to_descr(&h), TypeDescr::Str);
        assert_eq!(
            Type::Optional(Box::new(Type::Instance(builtin::STR))).to_descr(&h),
            TypeDescr::Optional(Box::new(TypeDescr::Str))
        );
        assert_eq!(Type::Class(A).to_descr(&h), TypeDescr::Dynamic);
    }

    proptest! {
        #[test]
        fn range_check_accepts_exactly_the_range(value in -70_000i128..70_000) {
            for p in Prim::iter().filter(|p| p.is_int()) {
                let ok = check_constant_range(value, p).is_ok();
                prop_assert_eq!(ok, p.min() <= value && value <= p.max());
            }
        }

        #[test]
        fn promotion_is_symmetric_and_wide_enough(a in 0usize..8, b in 0usize..8) {
            let ints: Vec<Prim> = Prim::iter().filter(|p| p.is_int()).collect();
            let (a, b) = (ints[a], ints[b]);
            let ab = common_numeric_type(a, b);
            prop_assert_eq!(ab, common_numeric_type(b, a));
            if let Some(c) = ab {
                prop_assert!(c.min() <= a.min() && c.max() >= a.max());
                prop_assert!(c.min() <= b.min() && c.max() >= b.max());
            }
        }
    }
}
