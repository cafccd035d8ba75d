//! Side tables produced by the binder and consumed by the code generator,
//! all keyed by `NodeId`. Every table is write-once per node.

use std::collections::hash_map::Entry;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use super::lattice::{FuncId, Type};
use super::symbols::ConstValue;
use crate::parser::ast::NodeId;
use crate::types::{Prim, TypeDescr};

/// Key of the module body in [`TypeMap::function`].
pub const MODULE_BODY: NodeId = NodeId(0);

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// A module-level function; the callee expression is still evaluated.
    Function { func: FuncId, qualname: String },
    /// A vtable method of the receiver's static class.
    Method { name: String, slot: usize },
}

/// Where the value for one declared parameter comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgSource {
    /// Index into the call's argument list.
    Positional(usize),
    Keyword(usize),
    Default(ConstValue),
    /// Element `index` of the `*` argument at `arg`, which must hold exactly
    /// `total` elements.
    IterableElem {
        arg: usize,
        index: usize,
        total: usize,
    },
    /// Entry `name` of the `**` argument at `arg`, falling back to `default`.
    Mapping {
        arg: usize,
        name: String,
        default: Option<ConstValue>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedArg {
    pub source: ArgSource,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    pub target: CallTarget,
    /// One entry per declared parameter (excluding the receiver).
    pub args: Vec<PlannedArg>,
    pub ret: Type,
    /// Runtime check on the returned value, for callees replaced at runtime.
    pub ret_check: Option<TypeDescr>,
    /// Names of the `**` mapping's admissible keys.
    pub mapping_names: Vec<String>,
}

impl CallPlan {
    /// Arguments map one-to-one onto parameters in source order, so they can
    /// be pushed directly.
    pub fn is_direct(&self) -> bool {
        self.args
            .iter()
            .enumerate()
            .all(|(i, a)| a.source == ArgSource::Positional(i))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub offset: usize,
    pub name: String,
    pub prim: Option<Prim>,
}

/// Conversion applied to a value after it is computed.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    Box(Prim),
    Unbox(Prim),
    Convert { from: Prim, to: Prim },
    Cast(TypeDescr),
}

/// Pseudo-calls the binder recognised.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialCall {
    Cast(TypeDescr),
    Box(Prim),
    Unbox(Prim),
    /// `int8(x)`; `from` is `None` when `x` is boxed.
    PrimConvert { to: Prim, from: Option<Prim> },
    ArrayNew(Prim),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionSig {
    pub qualname: String,
    /// Parameter slot and expected type for the argument-checking prologue.
    pub checks: Vec<(u16, TypeDescr)>,
    /// Locals (parameters included) stored unboxed.
    pub prim_locals: Vec<(String, Prim)>,
    pub ret: TypeDescr,
}

impl FunctionSig {
    pub fn prim_local(&self, name: &str) -> Option<Prim> {
        self.prim_locals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| *p)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassLayout {
    pub qualname: String,
    pub fields: Vec<(String, TypeDescr)>,
    pub vtable: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TypeMap {
    exprs: FxHashMap<NodeId, Type>,
    calls: FxHashMap<NodeId, CallPlan>,
    fields: FxHashMap<NodeId, FieldRef>,
    null_checks: FxHashSet<NodeId>,
    prim_ops: FxHashMap<NodeId, Prim>,
    coercions: FxHashMap<NodeId, Coercion>,
    target_coercions: FxHashMap<NodeId, Coercion>,
    specials: FxHashMap<NodeId, SpecialCall>,
    array_ops: FxHashMap<NodeId, Prim>,
    functions: FxHashMap<NodeId, FunctionSig>,
    classes: FxHashMap<NodeId, ClassLayout>,
}

/// The first record for a node wins.
fn insert_once<V>(table: &mut FxHashMap<NodeId, V>, node: NodeId, value: V) {
    match table.entry(node) {
        Entry::Occupied(_) => trace!(?node, "node already recorded, keeping the first entry"),
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
    }
}

impl TypeMap {
    pub fn record_expr(&mut self, node: NodeId, ty: Type) {
        insert_once(&mut self.exprs, node, ty);
    }

    pub fn record_call(&mut self, node: NodeId, plan: CallPlan) {
        insert_once(&mut self.calls, node, plan);
    }

    pub fn record_field(&mut self, node: NodeId, field: FieldRef) {
        insert_once(&mut self.fields, node, field);
    }

    pub fn record_null_check(&mut self, node: NodeId) {
        self.null_checks.insert(node);
    }

    pub fn record_prim_op(&mut self, node: NodeId, prim: Prim) {
        insert_once(&mut self.prim_ops, node, prim);
    }

    pub fn record_coercion(&mut self, node: NodeId, coercion: Coercion) {
        insert_once(&mut self.coercions, node, coercion);
    }

    pub fn record_target_coercion(&mut self, node: NodeId, coercion: Coercion) {
        insert_once(&mut self.target_coercions, node, coercion);
    }

    pub fn record_special(&mut self, node: NodeId, special: SpecialCall) {
        insert_once(&mut self.specials, node, special);
    }

    pub fn record_array_op(&mut self, node: NodeId, prim: Prim) {
        insert_once(&mut self.array_ops, node, prim);
    }

    pub fn record_function(&mut self, node: NodeId, sig: FunctionSig) {
        insert_once(&mut self.functions, node, sig);
    }

    pub fn record_class(&mut self, node: NodeId, layout: ClassLayout) {
        insert_once(&mut self.classes, node, layout);
    }

    pub fn expr_type(&self, node: NodeId) -> Option<&Type> {
        self.exprs.get(&node)
    }

    /// The primitive type of an expression, if it evaluates unboxed.
    pub fn prim_of(&self, node: NodeId) -> Option<Prim> {
        self.exprs.get(&node).and_then(Type::prim)
    }

    pub fn call(&self, node: NodeId) -> Option<&CallPlan> {
        self.calls.get(&node)
    }

    pub fn field(&self, node: NodeId) -> Option<&FieldRef> {
        self.fields.get(&node)
    }

    pub fn needs_null_check(&self, node: NodeId) -> bool {
        self.null_checks.contains(&node)
    }

    pub fn prim_op(&self, node: NodeId) -> Option<Prim> {
        self.prim_ops.get(&node).copied()
    }

    pub fn coercion(&self, node: NodeId) -> Option<&Coercion> {
        self.coercions.get(&node)
    }

    pub fn target_coercion(&self, node: NodeId) -> Option<&Coercion> {
        self.target_coercions.get(&node)
    }

    pub fn special(&self, node: NodeId) -> Option<&SpecialCall> {
        self.specials.get(&node)
    }

    pub fn array_op(&self, node: NodeId) -> Option<Prim> {
        self.array_ops.get(&node).copied()
    }

    pub fn function(&self, node: NodeId) -> Option<&FunctionSig> {
        self.functions.get(&node)
    }

    pub fn class(&self, node: NodeId) -> Option<&ClassLayout> {
        self.classes.get(&node)
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_wins() {
        let mut map = TypeMap::default();
        map.record_expr(NodeId(3), Type::Dynamic);
        map.record_expr(NodeId(3), Type::NoneType);
        assert_eq!(map.expr_type(NodeId(3)), Some(&Type::Dynamic));

        map.record_coercion(NodeId(4), Coercion::Box(Prim::Int8));
        map.record_coercion(NodeId(4), Coercion::Box(Prim::Int16));
        assert_eq!(map.coercion(NodeId(4)), Some(&Coercion::Box(Prim::Int8)));
    }
}
