pub mod config;
pub mod lexer;
pub mod parser;
pub mod runtime_io;
pub mod semantic;
pub mod session;
pub mod types;
pub mod vm;

use std::path::Path;

use ariadne::{Color, Label, Report, ReportKind, Source};
use chumsky::Parser;
use chumsky::input::{Input, Stream};
use chumsky::span::SimpleSpan;
use thiserror::Error;

pub use config::{Config, ConfigError};
pub use semantic::{StaticError, StaticErrorKind};
pub use session::CompileSession;

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub span: std::ops::Range<usize>,
}

impl Diagnostic {
    pub fn format(&self, path: &str, src: &str, kind: &str, code: usize) -> String {
        let mut buffer = Vec::new();
        Report::build(ReportKind::Error, (path, self.span.clone()))
            .with_config(ariadne::Config::new().with_index_type(ariadne::IndexType::Byte))
            .with_code(code)
            .with_message(kind)
            .with_label(
                Label::new((path, self.span.clone()))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((path, Source::from(src)), &mut buffer)
            .ok();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

impl From<&StaticError> for Diagnostic {
    fn from(e: &StaticError) -> Self {
        Self {
            message: e.message.clone(),
            span: e.span.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{} syntax error(s)", .0.len())]
    Syntax(Vec<Diagnostic>),
    #[error(transparent)]
    Static(#[from] StaticError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no module named '{0}'")]
    UnknownModule(String),
}

/// Parses a module and numbers its nodes. A missing final newline is
/// supplied.
pub fn parse_source(src: &str) -> Result<Vec<parser::ast::StmtS>, Vec<Diagnostic>> {
    let owned;
    let src = if src.ends_with('\n') || src.is_empty() {
        src
    } else {
        owned = format!("{}\n", src);
        owned.as_str()
    };
    let mut lexer = lexer::Lexer::new(src);
    let mut reached_eof = false;
    let token_iter = std::iter::from_fn(move || {
        if reached_eof {
            return None;
        }
        let (t, span) = lexer.next_token_with_span();
        if t == lexer::token::Token::Eof {
            reached_eof = true;
            return None;
        }
        Some((t, SimpleSpan::new(span.start, span.end)))
    });
    let eoi_span = parser::SimpleSpan::new(src.len(), src.len());
    let token_stream = Stream::from_iter(token_iter).map(eoi_span, |(t, s)| (t, s));
    match parser::program_parser().parse(token_stream).into_result() {
        Ok(mut program) => {
            let nodes = parser::ast::assign_node_ids(&mut program);
            tracing::trace!(nodes, "parsed");
            Ok(program)
        }
        Err(errors) => {
            let mut errors = errors;
            errors.sort_by(|x1, x2| {
                let x1 = (x1.span().start, x1.span().end);
                let x2 = (x2.span().start, x2.span().end);
                x1.cmp(&x2)
            });
            let diagnostics = errors
                .into_iter()
                .map(|e| Diagnostic {
                    message: e.reason().to_string(),
                    span: e.span().into_range(),
                })
                .collect();
            Err(diagnostics)
        }
    }
}

pub fn save_module(module: &vm::Module, path: &Path) -> Result<(), CompileError> {
    let cfg = bincode::config::standard();
    let bytes = bincode::serde::encode_to_vec(module, cfg).map_err(std::io::Error::other)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_module(path: &Path) -> Result<vm::Module, CompileError> {
    let bytes = std::fs::read(path)?;
    let cfg = bincode::config::standard();
    let (module, _consumed): (vm::Module, usize) = bincode::serde::decode_from_slice(&bytes, cfg)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_assigns_node_ids_from_one() {
        let program = parse_source("x = 1").unwrap();
        assert_eq!(program[0].id, parser::ast::NodeId(1));
    }

    #[test]
    fn syntax_errors_are_diagnostics() {
        let diags = parse_source("def (:\n").unwrap_err();
        assert!(!diags.is_empty());
        let text = diags[0].format("bad.py", "def (:\n", "Parsing failed", 3);
        assert!(text.contains("bad.py"));
    }

    #[test]
    fn module_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.pyc");
        let mut module = vm::Module::new("m");
        module.symbols.push("x".into());
        save_module(&module, &path).unwrap();
        let loaded = load_module(&path).unwrap();
        assert_eq!(loaded.name, "m");
        assert_eq!(loaded.symbols, vec!["x".to_string()]);
    }

    #[test]
    fn garbage_bytecode_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.pyc");
        std::fs::write(&path, [0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(load_module(&path), Err(CompileError::Io(_))));
    }
}
