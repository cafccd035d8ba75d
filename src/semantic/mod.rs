pub mod binder;
pub mod declare;
pub mod lattice;
pub mod scope;
pub mod symbols;
pub mod type_map;

use crate::types::Span;
use strum::Display;
use thiserror::Error;

pub use binder::bind_module;
pub use lattice::{ClassId, FuncId, Type};
pub use symbols::SymbolTable;
pub use type_map::TypeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StaticErrorKind {
    /// Malformed class hierarchies and structurally misused annotations.
    #[strum(serialize = "declaration error")]
    Declaration,
    #[strum(serialize = "type error")]
    Type,
}

/// A compile-time static error. Distinct from syntax errors so tooling can
/// single out type mismatches.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct StaticError {
    pub kind: StaticErrorKind,
    pub message: String,
    pub span: Span,
    pub module: String,
}

impl StaticError {
    pub fn declaration(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: StaticErrorKind::Declaration,
            message: message.into(),
            span,
            module: String::new(),
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: StaticErrorKind::Type,
            message: message.into(),
            span,
            module: String::new(),
        }
    }

    pub fn in_module(mut self, module: &str) -> Self {
        if self.module.is_empty() {
            self.module = module.to_string();
        }
        self
    }
}

pub type StaticResult<T> = Result<T, StaticError>;
