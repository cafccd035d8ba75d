//! Multi-module compilation: parse, declare, bind and generate code for a
//! set of source modules sharing one symbol table.

use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info};

use crate::config::CompilerConfig;
use crate::parser::ast::StmtS;
use crate::semantic::scope::analyze_scopes;
use crate::semantic::{SymbolTable, bind_module};
use crate::vm::{Compiler, Module};
use crate::{CompileError, Diagnostic, parse_source};

#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub path: String,
    pub text: String,
    pub ast: Rc<Vec<StmtS>>,
}

pub struct CompileSession {
    config: CompilerConfig,
    symbols: SymbolTable,
    sources: Vec<SourceFile>,
}

impl CompileSession {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            symbols: SymbolTable::new(),
            sources: Vec::new(),
        }
    }

    /// Parses `text` as module `name`. Re-adding a name replaces the previous
    /// source and discards its declarations.
    pub fn add_source(&mut self, name: &str, path: &str, text: String) -> Result<(), CompileError> {
        let ast = Rc::new(parse_source(&text).map_err(CompileError::Syntax)?);
        if self.config.is_dynamic(name) {
            debug!(module = name, "compiled dynamically by configuration");
        } else {
            self.symbols.add_module(name, path, Rc::clone(&ast));
        }
        let file = SourceFile {
            name: name.to_string(),
            path: path.to_string(),
            text,
            ast,
        };
        match self.sources.iter_mut().find(|s| s.name == name) {
            Some(existing) => *existing = file,
            None => self.sources.push(file),
        }
        Ok(())
    }

    /// Reads and parses a file; the module is named after the file stem.
    pub fn add_file(&mut self, path: &Path) -> Result<String, CompileError> {
        let text = std::fs::read_to_string(path)?;
        let name = module_name(path);
        self.add_source(&name, &path.display().to_string(), text)?;
        Ok(name)
    }

    pub fn source(&self, name: &str) -> Option<&SourceFile> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.name.as_str())
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn ast(&self, name: &str) -> Result<Rc<Vec<StmtS>>, CompileError> {
        self.source(name)
            .map(|s| Rc::clone(&s.ast))
            .ok_or_else(|| CompileError::UnknownModule(name.to_string()))
    }

    /// Compiles `name` with static specialization unless it is configured as
    /// dynamic.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn compile(&mut self, name: &str) -> Result<Module, CompileError> {
        if self.config.is_dynamic(name) {
            return self.compile_dynamic(name);
        }
        let ast = self.ast(name)?;
        self.symbols.declare_module(name)?;
        let scopes = analyze_scopes(&ast);
        let types = bind_module(&self.symbols, name, &ast, &scopes)?;
        let module = Compiler::with_types(name, &scopes, &types).compile(&ast)?;
        info!(module = name, functions = module.functions.len(), "compiled statically");
        Ok(module)
    }

    /// Compiles `name` with no type information at all.
    pub fn compile_dynamic(&self, name: &str) -> Result<Module, CompileError> {
        let ast = self.ast(name)?;
        let scopes = analyze_scopes(&ast);
        let module = Compiler::new(name, &scopes).compile(&ast)?;
        info!(module = name, functions = module.functions.len(), "compiled dynamically");
        Ok(module)
    }

    /// Declares and binds `name` without generating code.
    pub fn check(&mut self, name: &str) -> Result<(), CompileError> {
        if self.config.is_dynamic(name) {
            return self.ast(name).map(|_| ());
        }
        let ast = self.ast(name)?;
        self.symbols.declare_module(name)?;
        let scopes = analyze_scopes(&ast);
        bind_module(&self.symbols, name, &ast, &scopes)?;
        Ok(())
    }

    /// Compiles every added module in the order added. Stops at the first
    /// module with a static error.
    pub fn compile_all(&mut self, force_dynamic: bool) -> Result<Vec<Module>, CompileError> {
        let names: Vec<String> = self.module_names().map(str::to_string).collect();
        names
            .iter()
            .map(|name| {
                if force_dynamic {
                    self.compile_dynamic(name)
                } else {
                    self.compile(name)
                }
            })
            .collect()
    }

    /// Renders a compile error against the sources of this session.
    pub fn render(&self, err: &CompileError, module: &str) -> String {
        match err {
            CompileError::Syntax(diags) => {
                let Some(src) = self.source(module) else {
                    return err.to_string();
                };
                diags
                    .iter()
                    .map(|d| d.format(&src.path, &src.text, "Parsing failed", 3))
                    .collect()
            }
            CompileError::Static(e) => {
                let owner = if e.module.is_empty() { module } else { &e.module };
                match self.source(owner) {
                    Some(src) => {
                        Diagnostic::from(e).format(&src.path, &src.text, &e.kind.to_string(), 4)
                    }
                    None => err.to_string(),
                }
            }
            _ => err.to_string(),
        }
    }
}

/// `pkg/util.py` is module `util`.
pub fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::StaticErrorKind;

    fn session(config: CompilerConfig, mods: &[(&str, &str)]) -> CompileSession {
        let mut s = CompileSession::new(config);
        for (name, src) in mods {
            s.add_source(name, &format!("{}.py", name), src.to_string())
                .unwrap();
        }
        s
    }

    #[test]
    fn static_compile_marks_module() {
        let mut s = session(CompilerConfig::default(), &[("m", "x: int = 1\n")]);
        assert!(s.compile("m").unwrap().is_static);
        assert!(!s.compile_dynamic("m").unwrap().is_static);
    }

    #[test]
    fn configured_dynamic_modules_skip_binding() {
        let config = CompilerConfig {
            dynamic_modules: vec!["loose".into()],
        };
        let mut s = session(
            config,
            &[("loose", "from __static__ import int8\n\ndef f():\n    x: int8 = 128\n")],
        );
        let module = s.compile("loose").unwrap();
        assert!(!module.is_static);
    }

    #[test]
    fn static_errors_stop_compilation() {
        let mut s = session(
            CompilerConfig::default(),
            &[(
                "m",
                "from __static__ import int8\n\ndef f() -> None:\n    x: int8 = 128\n",
            )],
        );
        let e = s.compile_all(false).unwrap_err();
        let CompileError::Static(ref inner) = e else {
            panic!("expected a static error, got {}", e);
        };
        assert_eq!(inner.kind, StaticErrorKind::Type);
        assert_eq!(inner.module, "m");
        assert!(s.render(&e, "m").contains("-128 to 127"));
        assert!(s.compile_all(true).is_ok());
    }

    #[test]
    fn syntax_errors_are_reported_on_add() {
        let mut s = CompileSession::new(CompilerConfig::default());
        let e = s.add_source("m", "m.py", "def (:\n".into()).unwrap_err();
        assert!(matches!(e, CompileError::Syntax(_)));
    }

    #[test]
    fn unknown_module() {
        let mut s = CompileSession::new(CompilerConfig::default());
        assert!(matches!(s.compile("nope"), Err(CompileError::UnknownModule(_))));
    }

    #[test]
    fn module_names_come_from_file_stems() {
        assert_eq!(module_name(Path::new("a/b/util.py")), "util");
    }
}
