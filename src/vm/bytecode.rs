use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::parser::ast::{BinaryOp, CompareOp, UnaryOp};
use crate::types::{Prim, TypeDescr};

/// Immediate operand of [`Instruction::LoadPrimConst`], already in the
/// storage form of its primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PrimConst {
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
pub enum Instruction {
    // constants
    ConstI64(i64),
    ConstF64(f64),
    ConstStr(u32),
    True,
    False,
    None,

    // stack operations
    Pop,
    /// Stack: value → value, value
    Dup,
    /// Stack: a, b → b, a
    Swap,

    // locals/globals/cells
    LoadLocal(u16),
    StoreLocal(u16),
    DeleteLocal(u16),
    LoadGlobal(u16),
    StoreGlobal(u16),
    DeleteGlobal(u16),
    LoadDeref(u16),
    StoreDeref(u16),
    /// Pushes the cell object itself, for capture by a nested function.
    LoadClosure(u16),

    // operators
    Binary(BinaryOp),
    Unary(UnaryOp),
    Compare(CompareOp),

    // control flow
    Jump(i32),
    JumpIfFalse(i32),
    JumpIfTrue(i32),
    /// Jumps keeping the value when it is falsy, otherwise pops it (`and`).
    JumpIfFalseOrPop(i32),
    /// Jumps keeping the value when it is truthy, otherwise pops it (`or`).
    JumpIfTrueOrPop(i32),
    /// Stack: iterable → iterator
    GetIter,
    /// Stack: iterator → iterator, next; pops the iterator and jumps when exhausted.
    ForIter(i32),

    // calls
    /// Stack: callable, arg1, ..., argN → result
    Call(u8),
    /// Like `Call`; the last `names.len()` arguments are keyword arguments.
    CallKw(u8, Vec<u16>),
    /// Stack: callable, args list, kwargs dict → result
    CallEx,
    Return,
    /// Stack: default1, ..., defaultN, cell1, ..., cellM → function
    MakeFunction {
        func_id: u16,
        defaults: u8,
        captures: u8,
    },
    /// Stack: base (or None) → class
    BuildClass(u16),

    // attributes and items
    LoadAttr(u16),
    /// Stack: object, value →
    StoreAttr(u16),
    DeleteAttr(u16),
    /// Stack: object, index → value
    LoadIndex,
    /// Stack: object, index, value →
    StoreIndex,
    DeleteIndex,

    // displays
    BuildList(u16),
    BuildTuple(u16),
    /// Stack: key1, val1, ..., keyN, valN → dict
    BuildDict(u16),
    /// Stack: sequence → itemN, ..., item1
    UnpackSequence(u16),
    /// Stack: list, value → list
    ListAppend,
    /// Stack: list, iterable → list
    ListExtend,
    /// Stack: dict, value → dict
    DictInsert(u16),
    /// Stack: dict, mapping → dict
    DictMerge,

    // modules
    /// Stack: → module
    ImportName(u16),
    /// Stack: module → module, value
    ImportFrom(u16),
    /// Stack: module →
    ImportStar,

    // exceptions
    /// Installs a handler at the relative target for the current frame.
    SetupExcept(i32),
    PopExcept,
    /// `raise` with 0 or 1 operand.
    Raise(u8),
    /// Stack: exception, class → bool
    ExceptionMatches,
    /// Stack: [message] → raises AssertionError
    AssertFail(u8),

    // static: primitives
    LoadPrimConst(Prim, PrimConst),
    PrimBinary(BinaryOp, Prim),
    PrimUnary(UnaryOp, Prim),
    /// Leaves a `cbool`.
    PrimCompare(CompareOp, Prim),
    PrimConvert {
        from: Prim,
        to: Prim,
    },
    PrimBox(Prim),
    PrimUnbox(Prim),
    LoadLocalTyped(u16, Prim),
    StoreLocalTyped(u16, Prim),

    // static: de-virtualized fields and calls
    /// Stack: object → value
    LoadField {
        offset: u16,
        name: u16,
    },
    /// Stack: object, value →
    StoreField {
        offset: u16,
        name: u16,
    },
    /// Raises AttributeError naming the attribute when the top of stack is None.
    RaiseIfNone(u16),
    /// Stack: receiver, arg1, ..., argN → result
    InvokeMethod {
        name: u16,
        slot: u16,
        argc: u8,
        ret: Option<TypeDescr>,
    },
    /// Stack: callee, arg1, ..., argN → result
    InvokeFunction {
        name: u16,
        argc: u8,
        ret: Option<TypeDescr>,
    },
    /// Function prologue: (parameter slot, expected type) pairs.
    CheckArgs(Vec<(u16, TypeDescr)>),
    Cast(TypeDescr),
    /// Stack: iterable → element `index`; the iterable must hold exactly `total` items.
    LoadIterableArg {
        index: u16,
        total: u16,
    },
    /// Stack: mapping → mapping; checks the keys against the admissible names.
    CheckMapping(Vec<u16>),
    /// Stack: mapping → value; skips `skip` instructions when the key is present.
    LoadMappingArg {
        name: u16,
        skip: u16,
    },
    /// Stack: length → array
    ArrayNew(Prim),
    /// Stack: array, index → value
    ArrayLoad(Prim),
    /// Stack: array, index, value →
    ArrayStore(Prim),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct FunctionFlags: u8 {
        /// Takes `*args` after its positional parameters.
        const VARARGS = 1 << 0;
        /// Takes `**kwargs` last.
        const KWARGS = 1 << 1;
        /// Compiled with static specialization; starts with a `CheckArgs` prologue.
        const STATIC = 1 << 2;
        /// The module body.
        const MODULE = 1 << 3;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCode {
    pub name_sym: u16,
    pub qualname: String,
    /// Number of ordinary positional parameters.
    pub arity: u8,
    /// Parameter names: positional ones, then `*args`, then `**kwargs`.
    pub params: Vec<String>,
    pub flags: FunctionFlags,
    pub num_locals: u16,
    /// Name of each local slot.
    pub varnames: Vec<String>,
    /// Locals captured by nested functions; their cells come before the free
    /// variables' cells.
    pub cells: Vec<String>,
    pub freevars: Vec<String>,
    pub ret_type: TypeDescr,
    pub code: Vec<Instruction>,
}

impl FunctionCode {
    pub fn new(name_sym: u16, qualname: impl Into<String>) -> Self {
        Self {
            name_sym,
            qualname: qualname.into(),
            arity: 0,
            params: Vec::new(),
            flags: FunctionFlags::empty(),
            num_locals: 0,
            varnames: Vec::new(),
            cells: Vec::new(),
            freevars: Vec::new(),
            ret_type: TypeDescr::Dynamic,
            code: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub qualname: String,
    /// Typed slots, inherited ones first.
    pub fields: Vec<(String, TypeDescr)>,
    /// Method names by vtable index.
    pub vtable: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,

    /// String literals.
    pub string_pool: Vec<String>,

    /// Names used by the code: variables, attributes, modules.
    pub symbols: Vec<String>,

    /// Function 0 is the module body.
    pub functions: Vec<FunctionCode>,

    pub classes: Vec<ClassDef>,

    /// Compiled with a type map.
    pub is_static: bool,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn symbol(&self, sym: u16) -> &str {
        self.symbols
            .get(sym as usize)
            .map(String::as_str)
            .unwrap_or("<?>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_round_trips_through_bincode() {
        let mut module = Module::new("m");
        module.symbols.push("f".to_string());
        module.is_static = true;
        let mut f = FunctionCode::new(0, "f");
        f.flags = FunctionFlags::STATIC;
        f.code = vec![
            Instruction::CheckArgs(vec![(0, TypeDescr::Str)]),
            Instruction::LoadPrimConst(Prim::UInt8, PrimConst::Int(255)),
            Instruction::InvokeMethod {
                name: 0,
                slot: 1,
                argc: 0,
                ret: Some(TypeDescr::Class("m.B".into())),
            },
            Instruction::Return,
        ];
        module.functions.push(f);

        let cfg = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&module, cfg).unwrap();
        let (decoded, _): (Module, usize) = bincode::serde::decode_from_slice(&bytes, cfg).unwrap();
        assert_eq!(decoded.name, "m");
        assert!(decoded.is_static);
        assert_eq!(decoded.functions[0].flags, FunctionFlags::STATIC);
        assert_eq!(decoded.functions[0].code, module.functions[0].code);
    }

    #[test]
    fn instruction_names() {
        assert_eq!(Instruction::Return.to_string(), "Return");
        assert_eq!(
            Instruction::LoadIterableArg { index: 0, total: 3 }.to_string(),
            "LoadIterableArg"
        );
    }
}
