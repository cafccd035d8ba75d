use logos::Logos;

#[derive(Default, Debug, Clone, PartialEq)]
pub struct LexerExtras {
    pub error_message: Option<String>,
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(extras = LexerExtras)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub enum RawToken {
    // Keywords
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("class")]
    Class,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("pass")]
    Pass,
    #[token("None")]
    None,
    #[token("is")]
    Is,
    #[token("from")]
    From,
    #[token("import")]
    Import,
    #[token("as")]
    As,
    #[token("lambda")]
    Lambda,
    #[token("global")]
    Global,
    #[token("nonlocal")]
    Nonlocal,
    #[token("try")]
    Try,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("raise")]
    Raise,
    #[token("del")]
    Del,
    #[token("assert")]
    Assert,

    // Identifiers and literals
    #[token("True", |_| true)]
    #[token("False", |_| false)]
    Bool(bool),
    #[regex(r"[0-9][0-9_]*", lex_integer)]
    #[regex(r"0[xX][0-9a-fA-F_]+", lex_hex_integer)]
    Int(i64),
    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?", lex_float)]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", lex_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", lex_float)]
    Float(f64),
    #[regex(r#""([^"\\\n]|\\.)*""#, lex_string)]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, lex_string)]
    String(String),
    #[regex(r"[\p{XID_Start}_]\p{XID_Continue}*", lex_identifier)]
    Identifier(String),

    // Operators and punctuation
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("//")]
    SlashSlash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    LShift,
    #[token(">>")]
    RShift,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("=")]
    Equal,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("//=")]
    SlashSlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("&=")]
    AmpEqual,
    #[token("|=")]
    PipeEqual,
    #[token("^=")]
    CaretEqual,
    #[token("<<=")]
    LShiftEqual,
    #[token(">>=")]
    RShiftEqual,
    #[token("**=")]
    StarStarEqual,
    #[token("->")]
    Arrow,
    #[token("@")]
    At,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,

    #[token("\n")]
    Newline,
}

fn lex_integer(lexer: &mut logos::Lexer<RawToken>) -> Option<i64> {
    let slice = lexer.slice().replace('_', "");
    match slice.parse::<i64>() {
        Ok(i) => Some(i),
        Err(_) => {
            lexer.extras.error_message = Some(format!(
                "Integer literal '{}' is out of range for a 64-bit integer",
                lexer.slice()
            ));
            None
        }
    }
}

fn lex_hex_integer(lexer: &mut logos::Lexer<RawToken>) -> Option<i64> {
    let digits = lexer.slice()[2..].replace('_', "");
    match i64::from_str_radix(&digits, 16) {
        Ok(i) => Some(i),
        Err(_) => {
            lexer.extras.error_message = Some(format!(
                "Integer literal '{}' is out of range for a 64-bit integer",
                lexer.slice()
            ));
            None
        }
    }
}

fn lex_float(lexer: &mut logos::Lexer<RawToken>) -> Option<f64> {
    let slice = lexer.slice().replace('_', "");
    match slice.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(f),
        _ => {
            lexer.extras.error_message = Some(format!(
                "Float literal '{}' is out of range",
                lexer.slice()
            ));
            None
        }
    }
}

fn lex_string(lexer: &mut logos::Lexer<RawToken>) -> Option<String> {
    let slice = lexer.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                lexer.extras.error_message = Some(format!("Unknown escape sequence '\\{}'", other));
                return None;
            }
            None => return None,
        }
    }
    Some(out)
}

fn lex_identifier(lexer: &mut logos::Lexer<RawToken>) -> Option<String> {
    Some(lexer.slice().to_string())
}
