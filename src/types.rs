use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

pub type Span = std::ops::Range<usize>;

/// Fixed-width unboxed scalar types provided by the `__static__` pseudo-module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Prim {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Single,
    Double,
    CBool,
}

impl Prim {
    /// Resolves a name imported from `__static__`, including the C-style aliases.
    pub fn from_static_name(name: &str) -> Option<Prim> {
        match name {
            "ssize_t" => Some(Prim::Int64),
            "size_t" => Some(Prim::UInt64),
            _ => name.parse().ok(),
        }
    }

    pub fn is_int(self) -> bool {
        !matches!(self, Prim::Single | Prim::Double | Prim::CBool)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Prim::Single | Prim::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Prim::Int8 | Prim::Int16 | Prim::Int32 | Prim::Int64 | Prim::Single | Prim::Double
        )
    }

    pub fn bits(self) -> u32 {
        match self {
            Prim::Int8 | Prim::UInt8 | Prim::CBool => 8,
            Prim::Int16 | Prim::UInt16 => 16,
            Prim::Int32 | Prim::UInt32 | Prim::Single => 32,
            Prim::Int64 | Prim::UInt64 | Prim::Double => 64,
        }
    }

    pub fn signed_of_width(bits: u32) -> Option<Prim> {
        match bits {
            8 => Some(Prim::Int8),
            16 => Some(Prim::Int16),
            32 => Some(Prim::Int32),
            64 => Some(Prim::Int64),
            _ => None,
        }
    }

    pub fn min(self) -> i128 {
        if self.is_signed() {
            -(1i128 << (self.bits() - 1))
        } else {
            0
        }
    }

    pub fn max(self) -> i128 {
        if self.is_signed() {
            (1i128 << (self.bits() - 1)) - 1
        } else {
            (1i128 << self.bits()) - 1
        }
    }

    pub fn contains(self, value: i128) -> bool {
        self.is_int() && value >= self.min() && value <= self.max()
    }

    /// Truncates `value` to this width with two's-complement wraparound.
    ///
    /// The result is the storage form used by the VM: every integer primitive
    /// lives in an `i64`, and `uint64` keeps its bit pattern.
    pub fn wrap(self, value: i128) -> i64 {
        let bits = self.bits();
        let mask = (1u128 << bits) - 1;
        let raw = (value as u128) & mask;
        if self.is_signed() && raw >> (bits - 1) == 1 {
            (raw as i128 - (1i128 << bits)) as i64
        } else {
            raw as u64 as i64
        }
    }

    /// Widens a stored value back to its mathematical value.
    pub fn widen(self, stored: i64) -> i128 {
        match self {
            Prim::UInt64 => stored as u64 as i128,
            _ => stored as i128,
        }
    }
}

/// Runtime-checkable type description carried by checking instructions
/// (`CheckArgs`, `Cast`, return checks and typed fields).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDescr {
    #[default]
    Dynamic,
    Object,
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    Tuple,
    NoneType,
    Prim(Prim),
    /// A user class, by module-qualified name (`module.Class`).
    Class(String),
    Optional(Box<TypeDescr>),
}

impl TypeDescr {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, TypeDescr::Dynamic | TypeDescr::Object)
    }
}

impl fmt::Display for TypeDescr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescr::Dynamic => write!(f, "dynamic"),
            TypeDescr::Object => write!(f, "object"),
            TypeDescr::Int => write!(f, "int"),
            TypeDescr::Float => write!(f, "float"),
            TypeDescr::Str => write!(f, "str"),
            TypeDescr::Bool => write!(f, "bool"),
            TypeDescr::List => write!(f, "list"),
            TypeDescr::Dict => write!(f, "dict"),
            TypeDescr::Tuple => write!(f, "tuple"),
            TypeDescr::NoneType => write!(f, "None"),
            TypeDescr::Prim(p) => write!(f, "{}", p),
            TypeDescr::Class(qualname) => {
                let short = qualname.rsplit('.').next().unwrap_or(qualname);
                write!(f, "{}", short)
            }
            TypeDescr::Optional(inner) => write!(f, "Optional[{}]", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn prim_names_round_trip() {
        for p in Prim::iter() {
            assert_eq!(Prim::from_static_name(&p.to_string()), Some(p));
        }
        assert_eq!(Prim::from_static_name("ssize_t"), Some(Prim::Int64));
        assert_eq!(Prim::from_static_name("size_t"), Some(Prim::UInt64));
        assert_eq!(Prim::from_static_name("int128"), None);
    }

    #[test]
    fn ranges() {
        assert_eq!(Prim::Int8.min(), -128);
        assert_eq!(Prim::Int8.max(), 127);
        assert_eq!(Prim::UInt8.max(), 255);
        assert_eq!(Prim::UInt64.max(), u64::MAX as i128);
        assert_eq!(Prim::Int64.min(), i64::MIN as i128);
    }

    #[test]
    fn wraparound() {
        assert_eq!(Prim::UInt8.wrap(-1), 255);
        assert_eq!(Prim::Int8.wrap(128), -128);
        assert_eq!(Prim::UInt16.wrap(65536 + 7), 7);
        assert_eq!(Prim::UInt64.widen(Prim::UInt64.wrap(-1)), u64::MAX as i128);
    }

    #[test]
    fn descr_display() {
        assert_eq!(TypeDescr::Class("m.B".into()).to_string(), "B");
        assert_eq!(
            TypeDescr::Optional(Box::new(TypeDescr::Str)).to_string(),
            "Optional[str]"
        );
        assert_eq!(TypeDescr::Prim(Prim::UInt8).to_string(), "uint8");
    }
}
