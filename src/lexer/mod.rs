mod raw_token;
pub mod token;

use logos::{Lexer as LogosLexer, Logos};
use raw_token::RawToken;
use std::collections::VecDeque;
use std::ops::Range;
pub use token::Token;

pub struct Lexer<'source> {
    inner: LogosLexer<'source, RawToken>,
    token_queue: VecDeque<(Token, Range<usize>)>,
    indent_stack: Vec<usize>,
    at_start_of_line: bool,
    /// Open `(`, `[` and `{` count; newlines inside brackets are not significant.
    bracket_depth: usize,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Lexer {
            inner: RawToken::lexer(source),
            token_queue: VecDeque::new(),
            indent_stack: vec![0],
            at_start_of_line: true,
            bracket_depth: 0,
        }
    }

    pub fn next_token(&mut self) -> Token {
        let (tok, _) = self.next_token_with_span();
        tok
    }

    pub fn next_token_with_span(&mut self) -> (Token, Range<usize>) {
        loop {
            if let Some((token, span)) = self.token_queue.pop_front() {
                return (token, span);
            }

            if self.at_start_of_line && self.bracket_depth == 0 {
                self.handle_indentation();
                if let Some((token, span)) = self.token_queue.pop_front() {
                    return (token, span);
                }
            }

            match self.inner.next() {
                Some(Ok(raw_token)) => {
                    let span = self.inner.span();
                    match raw_token {
                        RawToken::LParen | RawToken::LBracket | RawToken::LBrace => {
                            self.bracket_depth += 1;
                        }
                        RawToken::RParen | RawToken::RBracket | RawToken::RBrace => {
                            self.bracket_depth = self.bracket_depth.saturating_sub(1);
                        }
                        RawToken::Newline if self.bracket_depth > 0 => continue,
                        _ => {}
                    }
                    let token = Self::convert_token(raw_token);
                    if token == Token::Newline {
                        self.at_start_of_line = true;
                    }
                    return (token, span);
                }
                Some(Err(_)) => {
                    let span = self.inner.span();
                    let error_msg = self
                        .inner
                        .extras
                        .error_message
                        .take()
                        .unwrap_or_else(|| format!("Invalid token '{}'", self.inner.slice()));
                    return (Token::Error(error_msg, span.clone()), span);
                }
                None => {
                    let pos = self.inner.span().end;
                    while self.indent_stack.len() > 1 {
                        self.indent_stack.pop();
                        self.token_queue.push_back((Token::Dedent, pos..pos));
                    }
                    return self.token_queue.pop_front().unwrap_or((Token::Eof, pos..pos));
                }
            }
        }
    }

    fn handle_indentation(&mut self) {
        let line_start = self.inner.span().end;
        let remainder = self.inner.remainder();

        let mut current_indent = 0;
        for ch in remainder.chars() {
            match ch {
                ' ' => current_indent += 1,
                '\t' => {
                    let tab_span = (line_start + current_indent)..(line_start + current_indent + 1);
                    self.token_queue.push_back((
                        Token::Error(
                            "Tabs are not allowed for indentation.".to_string(),
                            tab_span.clone(),
                        ),
                        tab_span,
                    ));
                    self.at_start_of_line = false;
                    return;
                }
                _ => break,
            }
        }

        self.inner.bump(current_indent);
        let indent_span = line_start..(line_start + current_indent);
        let next_char = remainder.chars().nth(current_indent);

        // Blank and comment-only lines do not change the indentation level.
        if let Some('\n' | '\r' | '#') = next_char {
            self.at_start_of_line = true;
            return;
        }

        self.at_start_of_line = false;

        let last_indent = *self.indent_stack.last().unwrap_or(&0);
        if current_indent > last_indent {
            self.indent_stack.push(current_indent);
            self.token_queue.push_back((Token::Indent, indent_span));
        } else if current_indent < last_indent {
            while current_indent < *self.indent_stack.last().unwrap_or(&0) {
                self.indent_stack.pop();
                self.token_queue.push_back((Token::Dedent, indent_span.clone()));
            }
            if current_indent != *self.indent_stack.last().unwrap_or(&0) {
                self.token_queue.push_back((
                    Token::Error("Invalid dedentation.".to_string(), indent_span.clone()),
                    indent_span,
                ));
            }
        }
    }

    fn convert_token(raw: RawToken) -> Token {
        match raw {
            RawToken::None => Token::None,
            RawToken::If => Token::If,
            RawToken::Elif => Token::Elif,
            RawToken::Else => Token::Else,
            RawToken::While => Token::While,
            RawToken::For => Token::For,
            RawToken::In => Token::In,
            RawToken::Def => Token::Def,
            RawToken::Return => Token::Return,
            RawToken::And => Token::And,
            RawToken::Or => Token::Or,
            RawToken::Not => Token::Not,
            RawToken::Class => Token::Class,
            RawToken::Break => Token::Break,
            RawToken::Continue => Token::Continue,
            RawToken::Pass => Token::Pass,
            RawToken::Is => Token::Is,
            RawToken::From => Token::From,
            RawToken::Import => Token::Import,
            RawToken::As => Token::As,
            RawToken::Lambda => Token::Lambda,
            RawToken::Global => Token::Global,
            RawToken::Nonlocal => Token::Nonlocal,
            RawToken::Try => Token::Try,
            RawToken::Except => Token::Except,
            RawToken::Finally => Token::Finally,
            RawToken::Raise => Token::Raise,
            RawToken::Del => Token::Del,
            RawToken::Assert => Token::Assert,

            RawToken::Bool(b) => Token::Bool(b),
            RawToken::Int(i) => Token::Int(i),
            RawToken::String(s) => Token::String(s),
            RawToken::Identifier(name) => Token::Identifier(name),
            RawToken::Float(f) => Token::Float(f),
            RawToken::Plus => Token::Plus,
            RawToken::Minus => Token::Minus,
            RawToken::Star => Token::Star,
            RawToken::StarStar => Token::StarStar,
            RawToken::Slash => Token::Slash,
            RawToken::SlashSlash => Token::SlashSlash,
            RawToken::Percent => Token::Percent,
            RawToken::Amp => Token::Amp,
            RawToken::Pipe => Token::Pipe,
            RawToken::Caret => Token::Caret,
            RawToken::Tilde => Token::Tilde,
            RawToken::LShift => Token::LShift,
            RawToken::RShift => Token::RShift,
            RawToken::EqualEqual => Token::EqualEqual,
            RawToken::NotEqual => Token::NotEqual,
            RawToken::Less => Token::Less,
            RawToken::LessEqual => Token::LessEqual,
            RawToken::Greater => Token::Greater,
            RawToken::GreaterEqual => Token::GreaterEqual,
            RawToken::Equal => Token::Equal,
            RawToken::PlusEqual => Token::PlusEqual,
            RawToken::MinusEqual => Token::MinusEqual,
            RawToken::StarEqual => Token::StarEqual,
            RawToken::SlashEqual => Token::SlashEqual,
            RawToken::SlashSlashEqual => Token::SlashSlashEqual,
            RawToken::PercentEqual => Token::PercentEqual,
            RawToken::AmpEqual => Token::AmpEqual,
            RawToken::PipeEqual => Token::PipeEqual,
            RawToken::CaretEqual => Token::CaretEqual,
            RawToken::LShiftEqual => Token::LShiftEqual,
            RawToken::RShiftEqual => Token::RShiftEqual,
            RawToken::StarStarEqual => Token::StarStarEqual,
            RawToken::Arrow => Token::Arrow,
            RawToken::At => Token::At,
            RawToken::LParen => Token::LParen,
            RawToken::RParen => Token::RParen,
            RawToken::LBracket => Token::LBracket,
            RawToken::RBracket => Token::RBracket,
            RawToken::LBrace => Token::LBrace,
            RawToken::RBrace => Token::RBrace,
            RawToken::Colon => Token::Colon,
            RawToken::Comma => Token::Comma,
            RawToken::Semicolon => Token::Semicolon,
            RawToken::Dot => Token::Dot,

            RawToken::Newline => Token::Newline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            if token == Token::Eof {
                break;
            }
            out.push(token);
        }
        out
    }

    fn ident(s: &str) -> Token {
        Token::Identifier(s.to_string())
    }

    #[test]
    fn test_typed_function() {
        let source = "\
def f(x: int8) -> int8:
    return x + 1
";
        let expected = vec![
            Token::Def,
            ident("f"),
            Token::LParen,
            ident("x"),
            Token::Colon,
            ident("int8"),
            Token::RParen,
            Token::Arrow,
            ident("int8"),
            Token::Colon,
            Token::Newline,
            Token::Indent,
            Token::Return,
            ident("x"),
            Token::Plus,
            Token::Int(1),
            Token::Newline,
            Token::Dedent,
        ];
        assert_eq!(collect(source), expected);
    }

    #[test]
    fn test_four_space_nested_indent() {
        let source = "\
class C:
    def m(self):
        pass
x = 1
";
        let tokens = collect(source);
        let indents = tokens.iter().filter(|t| **t == Token::Indent).count();
        let dedents = tokens.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
        assert!(!tokens.iter().any(|t| matches!(t, Token::Error(..))));
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let source = "f(1,\n  2)\n";
        let expected = vec![
            ident("f"),
            Token::LParen,
            Token::Int(1),
            Token::Comma,
            Token::Int(2),
            Token::RParen,
            Token::Newline,
        ];
        assert_eq!(collect(source), expected);
    }

    #[test]
    fn test_dunder_identifier_and_keywords() {
        let tokens = collect("from __static__ import int8 as i\n");
        assert_eq!(
            tokens,
            vec![
                Token::From,
                ident("__static__"),
                Token::Import,
                ident("int8"),
                Token::As,
                ident("i"),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = collect("a //= b ** 2 << 1 is not None\n");
        assert_eq!(
            tokens,
            vec![
                ident("a"),
                Token::SlashSlashEqual,
                ident("b"),
                Token::StarStar,
                Token::Int(2),
                Token::LShift,
                Token::Int(1),
                Token::Is,
                Token::Not,
                Token::None,
                Token::Newline,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = collect("'a\\n' \"b\\\"c\"\n");
        assert_eq!(
            tokens[..2],
            [Token::String("a\n".into()), Token::String("b\"c".into())]
        );
    }

    #[test]
    fn test_invalid_dedent() {
        let source = "\
if x:
    y = 1
  z = 2
";
        let tokens = collect(source);
        assert!(tokens.iter().any(
            |t| matches!(t, Token::Error(msg, _) if msg.contains("Invalid dedentation"))
        ));
    }

    #[test]
    fn test_tab_indentation_rejected() {
        let tokens = collect("if x:\n\ty = 1\n");
        assert!(tokens.iter().any(
            |t| matches!(t, Token::Error(msg, _) if msg.contains("Tabs are not allowed"))
        ));
    }

    #[test]
    fn test_integer_overflow() {
        let mut lexer = Lexer::new("99999999999999999999");
        match lexer.next_token() {
            Token::Error(msg, _) => {
                assert!(msg.contains("out of range"), "Expected overflow error, got: {}", msg);
                assert!(msg.contains("99999999999999999999"));
            }
            other => panic!("Expected error token for integer overflow, got: {:?}", other),
        }
    }

    #[test]
    fn test_integer_just_below_max() {
        let mut lexer = Lexer::new("9223372036854775807");
        assert_eq!(lexer.next_token(), Token::Int(9223372036854775807));
    }

    #[test]
    fn test_hex_and_float() {
        let tokens = collect("0xff 1.5e3 .5\n");
        assert_eq!(tokens[0], Token::Int(255));
        assert_eq!(tokens[1], Token::Float(1500.0));
        assert_eq!(tokens[2], Token::Float(0.5));
    }

    #[test]
    fn test_float_overflow() {
        let mut lexer = Lexer::new("9.9e999");
        match lexer.next_token() {
            Token::Error(msg, _) => assert!(msg.contains("out of range")),
            other => panic!("Expected error token for float overflow, got: {:?}", other),
        }
    }
}
