//! The symbol table: an arena of classes and functions plus a per-module
//! scope of top-level names. Built by the declaration pass, read by the
//! binder, shared across every module compiled together.

use std::collections::HashMap;
use std::rc::Rc;

use strum::{Display, EnumString};
use tracing::{debug, trace};

use super::declare;
use super::lattice::{ClassHierarchy, ClassId, FuncId, Type, builtin};
use super::{StaticError, StaticResult};
use crate::parser::ast::{NodeId, ParamKind, Stmt, StmtS};
use crate::types::{Prim, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
    pub defining: ClassId,
}

#[derive(Debug, Clone)]
pub struct MethodSlot {
    pub name: String,
    pub func: FuncId,
    pub defining: ClassId,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub module: String,
    pub qualname: String,
    pub base: Option<ClassId>,
    /// Derives from a class with no static layout (an exception class, a
    /// class from an undeclared module, ...). Such classes are dynamic.
    pub dynamic_base: bool,
    pub builtin: bool,
    /// Slot table, inherited slots first.
    pub fields: Vec<Field>,
    /// Method table, inherited entries keep their index.
    pub vtable: Vec<MethodSlot>,
    /// Set once the class body has been declared.
    pub declared: bool,
    pub node: Option<NodeId>,
    pub span: Span,
}

impl ClassInfo {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<(usize, &MethodSlot)> {
        self.vtable.iter().enumerate().find(|(_, m)| m.name == name)
    }

    /// Instances have a fixed static layout the compiler can rely on.
    pub fn is_static(&self) -> bool {
        !self.builtin && !self.dynamic_base
    }
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: Type,
    pub has_default: bool,
    /// Constant default usable to fill a gap at a planned call site.
    pub default: Option<ConstValue>,
    pub kind: ParamKind,
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub qualname: String,
    pub module: String,
    pub params: Vec<ParamInfo>,
    pub ret: Type,
    pub class: Option<ClassId>,
    /// Calls to this function cannot be planned statically.
    pub dynamic: bool,
    pub node: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticName {
    Prim(Prim),
    Cast,
    Box,
    Unbox,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingName {
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinFn {
    Print,
    Len,
    Isinstance,
    Issubclass,
    Range,
    Abs,
    Repr,
}

pub const EXCEPTION_NAMES: [&str; 17] = [
    "BaseException",
    "Exception",
    "TypeError",
    "ValueError",
    "AttributeError",
    "IndexError",
    "KeyError",
    "NameError",
    "UnboundLocalError",
    "OverflowError",
    "ZeroDivisionError",
    "RuntimeError",
    "RecursionError",
    "AssertionError",
    "StopIteration",
    "NotImplementedError",
    "ImportError",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Class(ClassId),
    Function(FuncId),
    Global(Type),
    Module(String),
    Imported { module: String, name: String },
    Static(StaticName),
    Typing(TypingName),
    Builtin(BuiltinFn),
}

#[derive(Debug, Clone, Default)]
pub struct ModuleScope {
    pub symbols: HashMap<String, Symbol>,
    pub star_imports: Vec<String>,
}

impl ModuleScope {
    pub fn has_star_import(&self) -> bool {
        !self.star_imports.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleState {
    Registered,
    InProgress,
    Declared,
    Failed(StaticError),
}

#[derive(Debug)]
pub struct ModuleEntry {
    pub path: String,
    pub ast: Rc<Vec<StmtS>>,
    pub state: ModuleState,
    pub scope: ModuleScope,
}

#[derive(Debug)]
pub struct SymbolTable {
    classes: Vec<ClassInfo>,
    functions: Vec<FunctionInfo>,
    modules: HashMap<String, ModuleEntry>,
    builtins: HashMap<String, Symbol>,
    func_by_node: HashMap<(String, NodeId), FuncId>,
    class_by_node: HashMap<(String, NodeId), ClassId>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self {
            classes: Vec::new(),
            functions: Vec::new(),
            modules: HashMap::new(),
            builtins: HashMap::new(),
            func_by_node: HashMap::new(),
            class_by_node: HashMap::new(),
        };
        for (idx, name) in builtin::NAMES.iter().enumerate() {
            let base = match ClassId(idx) {
                builtin::OBJECT => None,
                builtin::BOOL => Some(builtin::INT),
                _ => Some(builtin::OBJECT),
            };
            table.classes.push(ClassInfo {
                name: name.to_string(),
                module: "builtins".to_string(),
                qualname: format!("builtins.{}", name),
                base,
                dynamic_base: false,
                builtin: true,
                fields: Vec::new(),
                vtable: Vec::new(),
                declared: true,
                node: None,
                span: 0..0,
            });
            table
                .builtins
                .insert(name.to_string(), Symbol::Class(ClassId(idx)));
        }
        for f in [
            BuiltinFn::Print,
            BuiltinFn::Len,
            BuiltinFn::Isinstance,
            BuiltinFn::Issubclass,
            BuiltinFn::Range,
            BuiltinFn::Abs,
            BuiltinFn::Repr,
        ] {
            table.builtins.insert(f.to_string(), Symbol::Builtin(f));
        }
        for exc in EXCEPTION_NAMES {
            table
                .builtins
                .insert(exc.to_string(), Symbol::Global(Type::Dynamic));
        }
        table
    }

    /// Registers (or re-registers) a module for declaration. A previous
    /// registration and its scope are discarded.
    pub fn add_module(&mut self, name: &str, path: &str, ast: Rc<Vec<StmtS>>) {
        debug!(module = name, path, "registering module");
        self.modules.insert(
            name.to_string(),
            ModuleEntry {
                path: path.to_string(),
                ast,
                state: ModuleState::Registered,
                scope: ModuleScope::default(),
            },
        );
    }

    pub fn module(&self, name: &str) -> Option<&ModuleEntry> {
        self.modules.get(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        matches!(
            self.modules.get(name).map(|m| &m.state),
            Some(ModuleState::Declared)
        )
    }

    /// Runs the declaration pass for `name`, first declaring every registered
    /// module it imports from. Modules already in progress are left alone, so
    /// their names resolve to `dynamic` from here on.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn declare_module(&mut self, name: &str) -> StaticResult<()> {
        let Some(entry) = self.modules.get_mut(name) else {
            return Ok(());
        };
        match &entry.state {
            ModuleState::Declared | ModuleState::InProgress => return Ok(()),
            ModuleState::Failed(err) => return Err(err.clone()),
            ModuleState::Registered => {}
        }
        entry.state = ModuleState::InProgress;
        let ast = Rc::clone(&entry.ast);

        for dep in imported_modules(&ast) {
            if dep != name && self.modules.contains_key(&dep) {
                trace!(module = name, dependency = %dep, "declaring dependency");
                // a failed dependency only degrades lookups into it
                let _ = self.declare_module(&dep);
            }
        }

        let class_mark = self.classes.len();
        let func_mark = self.functions.len();
        match declare::declare_module(self, name, &ast) {
            Ok(()) => {
                if let Some(entry) = self.modules.get_mut(name) {
                    entry.state = ModuleState::Declared;
                }
                debug!(module = name, "declared");
                Ok(())
            }
            Err(err) => {
                let err = err.in_module(name);
                self.rollback(name, class_mark, func_mark);
                if let Some(entry) = self.modules.get_mut(name) {
                    entry.state = ModuleState::Failed(err.clone());
                    entry.scope = ModuleScope::default();
                }
                Err(err)
            }
        }
    }

    fn rollback(&mut self, module: &str, class_mark: usize, func_mark: usize) {
        trace!(module, class_mark, func_mark, "rolling back declarations");
        self.classes.truncate(class_mark);
        self.functions.truncate(func_mark);
        self.func_by_node.retain(|_, f| f.0 < func_mark);
        self.class_by_node.retain(|_, c| c.0 < class_mark);
    }

    pub fn scope(&self, module: &str) -> Option<&ModuleScope> {
        self.modules.get(module).map(|m| &m.scope)
    }

    pub(crate) fn scope_mut(&mut self, module: &str) -> Option<&mut ModuleScope> {
        self.modules.get_mut(module).map(|m| &mut m.scope)
    }

    pub(crate) fn define(&mut self, module: &str, name: &str, symbol: Symbol) {
        if let Some(scope) = self.scope_mut(module) {
            scope.symbols.insert(name.to_string(), symbol);
        }
    }

    /// Resolves a name as seen from inside `module`: its own top-level names,
    /// then names pulled in by star imports, then builtins. Imported names are
    /// followed into their declaring module.
    pub fn resolve(&self, module: &str, name: &str) -> Option<Symbol> {
        let scope = self.scope(module)?;
        if let Some(sym) = scope.symbols.get(name) {
            return self.follow(sym.clone(), 0);
        }
        for star in &scope.star_imports {
            if let Some(sym) = self.export(star, name) {
                return Some(sym);
            }
        }
        self.builtins.get(name).cloned()
    }

    /// A name exported by another, fully declared module.
    pub fn export(&self, module: &str, name: &str) -> Option<Symbol> {
        if !self.is_declared(module) {
            return None;
        }
        let sym = self.scope(module)?.symbols.get(name)?.clone();
        self.follow(sym, 0)
    }

    fn follow(&self, sym: Symbol, depth: usize) -> Option<Symbol> {
        match sym {
            Symbol::Imported { module, name } if depth < 16 => {
                if !self.is_declared(&module) {
                    return None;
                }
                let next = self.scope(&module)?.symbols.get(&name)?.clone();
                self.follow(next, depth + 1)
            }
            Symbol::Imported { .. } => None,
            other => Some(other),
        }
    }

    /// Cross-module query: the declared type of `name` in `module`, or
    /// `dynamic` when the module is unknown or not declared yet.
    pub fn lookup(&self, module: &str, name: &str) -> Type {
        match self.export(module, name) {
            Some(sym) => self.symbol_type(&sym),
            None => Type::Dynamic,
        }
    }

    pub fn symbol_type(&self, sym: &Symbol) -> Type {
        match sym {
            Symbol::Class(c) => Type::Class(*c),
            Symbol::Function(f) => Type::Function(*f),
            Symbol::Global(t) => t.clone(),
            Symbol::Module(m) => Type::Module(m.clone()),
            _ => Type::Dynamic,
        }
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0]
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> &mut ClassInfo {
        &mut self.classes[id.0]
    }

    pub fn function(&self, id: FuncId) -> &FunctionInfo {
        &self.functions[id.0]
    }

    pub(crate) fn function_mut(&mut self, id: FuncId) -> &mut FunctionInfo {
        &mut self.functions[id.0]
    }

    pub(crate) fn add_class(&mut self, info: ClassInfo) -> ClassId {
        let id = ClassId(self.classes.len());
        if let Some(node) = info.node {
            self.class_by_node.insert((info.module.clone(), node), id);
        }
        self.classes.push(info);
        id
    }

    pub(crate) fn add_function(&mut self, info: FunctionInfo) -> FuncId {
        let id = FuncId(self.functions.len());
        self.func_by_node
            .insert((info.module.clone(), info.node), id);
        self.functions.push(info);
        id
    }

    pub fn function_for_node(&self, module: &str, node: NodeId) -> Option<FuncId> {
        self.func_by_node.get(&(module.to_string(), node)).copied()
    }

    pub fn class_for_node(&self, module: &str, node: NodeId) -> Option<ClassId> {
        self.class_by_node.get(&(module.to_string(), node)).copied()
    }

    /// Field lookup through the slot table, which already holds inherited
    /// slots.
    pub fn find_field(&self, class: ClassId, name: &str) -> Option<&Field> {
        self.class(class).field(name)
    }

    pub fn find_method(&self, class: ClassId, name: &str) -> Option<(usize, &MethodSlot)> {
        self.class(class).method(name)
    }

    pub fn type_name(&self, ty: &Type) -> String {
        ty.name(self)
    }
}

impl ClassHierarchy for SymbolTable {
    fn base_of(&self, class: ClassId) -> Option<ClassId> {
        self.classes.get(class.0).and_then(|c| c.base)
    }

    fn class_name(&self, class: ClassId) -> &str {
        self.classes
            .get(class.0)
            .map(|c| c.name.as_str())
            .unwrap_or("<unknown>")
    }

    fn class_qualname(&self, class: ClassId) -> String {
        self.classes
            .get(class.0)
            .map(|c| c.qualname.clone())
            .unwrap_or_default()
    }
}

/// Modules named by top-level import statements, in source order.
pub fn imported_modules(program: &[StmtS]) -> Vec<String> {
    let mut out = Vec::new();
    for stmt in program {
        match &stmt.node {
            Stmt::Import(aliases) => {
                for a in aliases {
                    out.push(a.name.clone());
                }
            }
            Stmt::ImportFrom { module, .. } => out.push(module.clone()),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_source;
    use crate::semantic::StaticErrorKind;

    fn table_with(mods: &[(&str, &str)]) -> SymbolTable {
        let mut table = SymbolTable::new();
        for (name, src) in mods {
            let ast = parse_source(src).unwrap();
            table.add_module(name, &format!("{}.py", name), Rc::new(ast));
        }
        table
    }

    #[test]
    fn builtins_are_preregistered() {
        let table = SymbolTable::new();
        assert_eq!(table.class(builtin::BOOL).base, Some(builtin::INT));
        assert_eq!(table.class_name(builtin::STR), "str");
    }

    #[test]
    fn cross_module_lookup_declares_lazily() {
        let mut table = table_with(&[
            ("a", "class A:\n    pass\n"),
            ("b", "from a import A\nclass B(A):\n    pass\n"),
        ]);
        table.declare_module("b").unwrap();
        assert!(table.is_declared("a"));
        let Type::Class(a) = table.lookup("a", "A") else {
            panic!("A should be a class");
        };
        let Type::Class(b) = table.lookup("b", "B") else {
            panic!("B should be a class");
        };
        assert_eq!(table.class(b).base, Some(a));
        assert_eq!(table.lookup("b", "A"), Type::Class(a));
        assert_eq!(table.lookup("nowhere", "X"), Type::Dynamic);
    }

    #[test]
    fn mutual_imports_terminate() {
        let mut table = table_with(&[
            ("a", "from b import B\nclass A:\n    def f(self) -> B:\n        return B()\n"),
            ("b", "from a import A\nclass B(A):\n    pass\n"),
        ]);
        table.declare_module("a").unwrap();
        table.declare_module("b").unwrap();
        // b was declared while a was still in progress: its base degrades
        let Type::Class(b) = table.lookup("b", "B") else {
            panic!("B should be a class");
        };
        assert!(table.class(b).dynamic_base);
    }

    #[test]
    fn failed_declarations_are_rolled_back() {
        let mut table = table_with(&[
            ("bad", "def f():\n    pass\nclass C(f):\n    pass\n"),
            ("good", "from bad import C\nx: C\n"),
        ]);
        let before = table.classes.len();
        let err = table.declare_module("bad").unwrap_err();
        assert_eq!(err.kind, StaticErrorKind::Declaration);
        assert_eq!(err.module, "bad");
        assert_eq!(table.classes.len(), before);
        assert_eq!(table.lookup("bad", "C"), Type::Dynamic);
        table.declare_module("good").unwrap();
        assert_eq!(table.resolve("good", "x"), Some(Symbol::Global(Type::Dynamic)));
    }

    #[test]
    fn re_adding_replaces_the_module() {
        let mut table = table_with(&[("m", "class A:\n    pass\n")]);
        table.declare_module("m").unwrap();
        assert!(matches!(table.lookup("m", "A"), Type::Class(_)));
        let ast = parse_source("A = 1\n").unwrap();
        table.add_module("m", "m.py", Rc::new(ast));
        table.declare_module("m").unwrap();
        assert_eq!(table.lookup("m", "A"), Type::Dynamic);
    }
}
