pub mod ast;

use crate::lexer::Token;
use crate::types::Span;
use ast::*;
use chumsky::Parser;
use chumsky::input::ValueInput;
use chumsky::prelude::*;

pub use chumsky::span::SimpleSpan;

pub type RichTokenError<'a> = Rich<'a, Token>;

#[derive(Debug, Clone)]
enum PostfixOp {
    Attr(String, Span),
    Call(Vec<Arg>, Span),
    Index(ExprS, Span),
}

fn binary(left: ExprS, (op, right): (BinaryOp, ExprS)) -> ExprS {
    let span = left.span.start..right.span.end;
    Spanned::new(
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn bool_op(left: ExprS, (op, right): (BoolOp, ExprS)) -> ExprS {
    let span = left.span.start..right.span.end;
    Spanned::new(
        Expr::BoolOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

/// `a, b, c` (or `a,`) becomes a tuple; a lone item is passed through.
fn tuple_or_single<'tokens, I, P>(
    item: P,
) -> impl Parser<'tokens, I, ExprS, extra::Err<RichTokenError<'tokens>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
    P: Parser<'tokens, I, ExprS, extra::Err<RichTokenError<'tokens>>> + Clone,
{
    item.clone()
        .then(
            just(Token::Comma)
                .ignore_then(item)
                .repeated()
                .collect::<Vec<ExprS>>(),
        )
        .then(just(Token::Comma).or_not())
        .map_with(
            |((first, rest), trailing): ((ExprS, Vec<ExprS>), Option<Token>), e| {
                if rest.is_empty() && trailing.is_none() {
                    return first;
                }
                let s: I::Span = e.span();
                let mut items = vec![first];
                items.extend(rest);
                Spanned::new(Expr::Tuple(items), s.into_range())
            },
        )
}

pub fn expr_parser<'tokens, I>()
-> impl Parser<'tokens, I, ExprS, extra::Err<RichTokenError<'tokens>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    recursive(|expr| {
        let ident = select! { Token::Identifier(s) => s }.labelled("identifier");

        let parenthesized = tuple_or_single(expr.clone())
            .or_not()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(|inner: Option<ExprS>| match inner {
                Some(e) => e.node,
                None => Expr::Tuple(vec![]),
            });

        let list = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<ExprS>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(Expr::List);

        let dict = expr
            .clone()
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<(ExprS, ExprS)>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(Expr::Dict);

        let primary = choice((
            select! {
                Token::Int(i) => Expr::Literal(Literal::Int(i)),
                Token::Float(f) => Expr::Literal(Literal::Float(f)),
                Token::Bool(b) => Expr::Literal(Literal::Bool(b)),
                Token::String(s) => Expr::Literal(Literal::String(s)),
                Token::None => Expr::Literal(Literal::None),
            }
            .labelled("literal"),
            ident.map(Expr::Name),
            parenthesized,
            list,
            dict,
        ))
        .map_with(|node: Expr, e| {
            let s: I::Span = e.span();
            Spanned::new(node, s.into_range())
        });

        let arg = choice((
            just(Token::StarStar)
                .ignore_then(expr.clone())
                .map(Arg::DoubleStar),
            just(Token::Star).ignore_then(expr.clone()).map(Arg::Star),
            ident
                .then_ignore(just(Token::Equal))
                .then(expr.clone())
                .map(|(name, value)| Arg::Keyword(name, value)),
            expr.clone().map(Arg::Positional),
        ));

        let postfix_op = choice((
            just(Token::Dot)
                .ignore_then(ident)
                .map_with(|attr, e| {
                    let s: I::Span = e.span();
                    PostfixOp::Attr(attr, s.into_range())
                }),
            arg.separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<Arg>>()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map_with(|args, e| {
                    let s: I::Span = e.span();
                    PostfixOp::Call(args, s.into_range())
                }),
            tuple_or_single(expr.clone())
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .map_with(|index, e| {
                    let s: I::Span = e.span();
                    PostfixOp::Index(index, s.into_range())
                }),
        ));

        let postfix = primary
            .foldl(postfix_op.repeated(), |base: ExprS, op: PostfixOp| {
                let start = base.span.start;
                match op {
                    PostfixOp::Attr(attr, s) => Spanned::new(
                        Expr::Attribute {
                            object: Box::new(base),
                            attr,
                        },
                        start..s.end,
                    ),
                    PostfixOp::Call(args, s) => Spanned::new(
                        Expr::Call {
                            func: Box::new(base),
                            args,
                        },
                        start..s.end,
                    ),
                    PostfixOp::Index(index, s) => Spanned::new(
                        Expr::Subscript {
                            object: Box::new(base),
                            index: Box::new(index),
                        },
                        start..s.end,
                    ),
                }
            })
            .boxed();

        // `**` binds tighter than unary minus on its left and is right-associative.
        let power = postfix
            .clone()
            .then_ignore(just(Token::StarStar))
            .repeated()
            .foldr(postfix, |left: ExprS, right: ExprS| {
                binary(left, (BinaryOp::Power, right))
            });

        let unary_op = choice((
            just(Token::Minus).to(UnaryOp::Negate),
            just(Token::Plus).to(UnaryOp::Pos),
            just(Token::Tilde).to(UnaryOp::Invert),
        ))
        .map_with(|op, e| {
            let s: I::Span = e.span();
            (op, s.into_range())
        });

        let factor = unary_op
            .repeated()
            .foldr(power, |(op, op_span): (UnaryOp, Span), operand: ExprS| {
                let span = op_span.start..operand.span.end;
                Spanned::new(
                    Expr::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                )
            })
            .boxed();

        let op = |t| just(t).ignored();
        let term = factor
            .clone()
            .foldl(
                choice((
                    op(Token::Star).to(BinaryOp::Multiply),
                    op(Token::SlashSlash).to(BinaryOp::FloorDivide),
                    op(Token::Slash).to(BinaryOp::Divide),
                    op(Token::Percent).to(BinaryOp::Modulo),
                ))
                .then(factor)
                .repeated(),
                binary,
            )
            .boxed();
        let arith = term
            .clone()
            .foldl(
                choice((
                    op(Token::Plus).to(BinaryOp::Add),
                    op(Token::Minus).to(BinaryOp::Subtract),
                ))
                .then(term)
                .repeated(),
                binary,
            )
            .boxed();
        let shift = arith
            .clone()
            .foldl(
                choice((
                    op(Token::LShift).to(BinaryOp::LShift),
                    op(Token::RShift).to(BinaryOp::RShift),
                ))
                .then(arith)
                .repeated(),
                binary,
            )
            .boxed();
        let bit_and = shift
            .clone()
            .foldl(
                op(Token::Amp).to(BinaryOp::BitAnd).then(shift).repeated(),
                binary,
            )
            .boxed();
        let bit_xor = bit_and
            .clone()
            .foldl(
                op(Token::Caret).to(BinaryOp::BitXor).then(bit_and).repeated(),
                binary,
            )
            .boxed();
        let bit_or = bit_xor
            .clone()
            .foldl(
                op(Token::Pipe).to(BinaryOp::BitOr).then(bit_xor).repeated(),
                binary,
            )
            .boxed();

        // Comparisons do not chain: `a < b < c` is rejected.
        let compare_op = choice((
            op(Token::EqualEqual).to(CompareOp::Equal),
            op(Token::NotEqual).to(CompareOp::NotEqual),
            op(Token::LessEqual).to(CompareOp::LessEqual),
            op(Token::Less).to(CompareOp::Less),
            op(Token::GreaterEqual).to(CompareOp::GreaterEqual),
            op(Token::Greater).to(CompareOp::Greater),
            op(Token::Is)
                .then(op(Token::Not))
                .to(CompareOp::IsNot),
            op(Token::Is).to(CompareOp::Is),
            op(Token::Not).then(op(Token::In)).to(CompareOp::NotIn),
            op(Token::In).to(CompareOp::In),
        ));
        let comparison = bit_or
            .clone()
            .then(compare_op.then(bit_or).or_not())
            .map(|(left, rest): (ExprS, Option<(CompareOp, ExprS)>)| match rest {
                None => left,
                Some((op, right)) => {
                    let span = left.span.start..right.span.end;
                    Spanned::new(
                        Expr::Compare {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    )
                }
            });

        let not_test = just(Token::Not)
            .map_with(|_, e| {
                let s: I::Span = e.span();
                s.into_range()
            })
            .repeated()
            .foldr(comparison, |op_span: Span, operand: ExprS| {
                let span = op_span.start..operand.span.end;
                Spanned::new(
                    Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                )
            })
            .boxed();

        let and_test = not_test
            .clone()
            .foldl(
                op(Token::And).to(BoolOp::And).then(not_test).repeated(),
                bool_op,
            )
            .boxed();
        let or_test = and_test
            .clone()
            .foldl(
                op(Token::Or).to(BoolOp::Or).then(and_test).repeated(),
                bool_op,
            )
            .boxed();

        let conditional = or_test
            .clone()
            .then(
                just(Token::If)
                    .ignore_then(or_test)
                    .then_ignore(just(Token::Else))
                    .then(expr.clone())
                    .or_not(),
            )
            .map(|(body, rest): (ExprS, Option<(ExprS, ExprS)>)| match rest {
                None => body,
                Some((test, orelse)) => {
                    let span = body.span.start..orelse.span.end;
                    Spanned::new(
                        Expr::IfExp {
                            test: Box::new(test),
                            body: Box::new(body),
                            orelse: Box::new(orelse),
                        },
                        span,
                    )
                }
            });

        let lambda_param = ident
            .then(just(Token::Equal).ignore_then(expr.clone()).or_not())
            .map_with(|(name, default), e| {
                let s: I::Span = e.span();
                Param {
                    name,
                    annotation: None,
                    default,
                    kind: ParamKind::Normal,
                    span: s.into_range(),
                }
            });

        let lambda = just(Token::Lambda)
            .ignore_then(
                lambda_param
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<Param>>(),
            )
            .then_ignore(just(Token::Colon))
            .then(expr.clone())
            .map_with(|(params, body), e| {
                let s: I::Span = e.span();
                Spanned::new(
                    Expr::Lambda {
                        params,
                        body: Box::new(body),
                    },
                    s.into_range(),
                )
            });

        choice((lambda, conditional)).labelled("expression")
    })
    .boxed()
}

pub fn stmt_parser<'tokens, I>()
-> impl Parser<'tokens, I, Vec<StmtS>, extra::Err<RichTokenError<'tokens>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    let expr = expr_parser().boxed();
    let exprlist = tuple_or_single(expr.clone()).boxed();

    recursive(|stmt| {
        let ident = select! { Token::Identifier(s) => s }.labelled("identifier");

        // A statement line ends at a newline, at end of input, or right before
        // the dedent that closes an unterminated last line.
        let line_end = choice((
            just(Token::Newline).ignored(),
            end().ignored(),
            just(Token::Dedent).rewind().ignored(),
        ));
        let blank_lines = just(Token::Newline).ignored().repeated();

        let dotted_name = ident
            .separated_by(just(Token::Dot))
            .at_least(1)
            .collect::<Vec<String>>()
            .map(|parts| parts.join("."));

        let alias = dotted_name
            .clone()
            .then(just(Token::As).ignore_then(ident).or_not())
            .map(|(name, asname)| Alias { name, asname });
        let alias_list = alias
            .clone()
            .separated_by(just(Token::Comma))
            .at_least(1)
            .allow_trailing()
            .collect::<Vec<Alias>>();

        let import_stmt = just(Token::Import)
            .ignore_then(alias_list.clone())
            .map(Stmt::Import)
            .labelled("import statement");

        let from_import_stmt = just(Token::From)
            .ignore_then(dotted_name.clone())
            .then_ignore(just(Token::Import))
            .then(choice((
                just(Token::Star).to(vec![Alias {
                    name: "*".to_string(),
                    asname: None,
                }]),
                alias_list
                    .clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
                alias_list,
            )))
            .map(|(module, names)| Stmt::ImportFrom { module, names })
            .labelled("from-import statement");

        let name_list = ident
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<String>>();

        let return_stmt = just(Token::Return)
            .ignore_then(exprlist.clone().or_not())
            .map(Stmt::Return)
            .labelled("return statement");

        let raise_stmt = just(Token::Raise)
            .ignore_then(expr.clone().or_not())
            .map(Stmt::Raise);

        let del_stmt = just(Token::Del)
            .ignore_then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .allow_trailing()
                    .collect::<Vec<ExprS>>(),
            )
            .map(Stmt::Del);

        let assert_stmt = just(Token::Assert)
            .ignore_then(expr.clone())
            .then(just(Token::Comma).ignore_then(expr.clone()).or_not())
            .map(|(test, msg)| Stmt::Assert { test, msg });

        let aug_op = choice((
            just(Token::PlusEqual).to(BinaryOp::Add),
            just(Token::MinusEqual).to(BinaryOp::Subtract),
            just(Token::StarEqual).to(BinaryOp::Multiply),
            just(Token::SlashEqual).to(BinaryOp::Divide),
            just(Token::SlashSlashEqual).to(BinaryOp::FloorDivide),
            just(Token::PercentEqual).to(BinaryOp::Modulo),
            just(Token::StarStarEqual).to(BinaryOp::Power),
            just(Token::AmpEqual).to(BinaryOp::BitAnd),
            just(Token::PipeEqual).to(BinaryOp::BitOr),
            just(Token::CaretEqual).to(BinaryOp::BitXor),
            just(Token::LShiftEqual).to(BinaryOp::LShift),
            just(Token::RShiftEqual).to(BinaryOp::RShift),
        ));

        #[derive(Clone)]
        enum Tail {
            Annotated(ExprS, Option<ExprS>),
            Augmented(BinaryOp, ExprS),
            Assigned(Vec<ExprS>),
        }

        let tail = choice((
            just(Token::Colon)
                .ignore_then(expr.clone())
                .then(just(Token::Equal).ignore_then(exprlist.clone()).or_not())
                .map(|(annotation, value)| Tail::Annotated(annotation, value)),
            aug_op
                .then(exprlist.clone())
                .map(|(op, value)| Tail::Augmented(op, value)),
            just(Token::Equal)
                .ignore_then(exprlist.clone())
                .repeated()
                .at_least(1)
                .collect::<Vec<ExprS>>()
                .map(Tail::Assigned),
        ));

        let expr_or_assign = exprlist
            .clone()
            .then(tail.or_not())
            .map(|(first, tail)| match tail {
                None => Stmt::Expr(first),
                Some(Tail::Annotated(annotation, value)) => Stmt::AnnAssign {
                    target: first,
                    annotation,
                    value,
                },
                Some(Tail::Augmented(op, value)) => Stmt::AugAssign {
                    target: first,
                    op,
                    value,
                },
                Some(Tail::Assigned(mut rest)) => {
                    let mut targets = vec![first];
                    let value = rest.pop().unwrap_or_else(|| targets[0].clone());
                    targets.extend(rest);
                    Stmt::Assign { targets, value }
                }
            })
            .labelled("expression statement");

        let simple_stmt = choice((
            just(Token::Pass).to(Stmt::Pass),
            just(Token::Break).to(Stmt::Break),
            just(Token::Continue).to(Stmt::Continue),
            just(Token::Global)
                .ignore_then(name_list.clone())
                .map(Stmt::Global),
            just(Token::Nonlocal)
                .ignore_then(name_list)
                .map(Stmt::Nonlocal),
            return_stmt,
            raise_stmt,
            del_stmt,
            assert_stmt,
            import_stmt,
            from_import_stmt,
            expr_or_assign,
        ))
        .map_with(|node: Stmt, e| {
            let s: I::Span = e.span();
            Spanned::new(node, s.into_range())
        });

        let simple_stmts_line = simple_stmt
            .separated_by(just(Token::Semicolon))
            .allow_trailing()
            .at_least(1)
            .collect::<Vec<StmtS>>()
            .then_ignore(line_end.clone())
            .labelled("simple statements");

        // A block after ':' is either an indented suite or simple statements
        // on the same line.
        let indented_block = stmt
            .clone()
            .repeated()
            .collect::<Vec<Vec<StmtS>>>()
            .map(|lines| lines.into_iter().flatten().collect::<Vec<StmtS>>())
            .delimited_by(
                just(Token::Newline)
                    .ignore_then(blank_lines.clone())
                    .ignore_then(just(Token::Indent)),
                just(Token::Dedent),
            );

        let block = just(Token::Colon)
            .ignore_then(choice((indented_block, simple_stmts_line.clone())))
            .boxed();

        let param_kind = choice((
            just(Token::StarStar).to(ParamKind::KwArgs),
            just(Token::Star).to(ParamKind::VarArgs),
        ))
        .or_not()
        .map(|k| k.unwrap_or(ParamKind::Normal));

        let param = param_kind
            .then(ident)
            .then(just(Token::Colon).ignore_then(expr.clone()).or_not())
            .then(just(Token::Equal).ignore_then(expr.clone()).or_not())
            .map_with(|(((kind, name), annotation), default), e| {
                let s: I::Span = e.span();
                Param {
                    name,
                    annotation,
                    default,
                    kind,
                    span: s.into_range(),
                }
            });

        let def_core = just(Token::Def)
            .ignore_then(ident)
            .then(
                param
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<Param>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(just(Token::Arrow).ignore_then(expr.clone()).or_not())
            .then(block.clone())
            .map(|(((name, params), returns), body)| {
                Stmt::Def(FunctionDef {
                    name,
                    params,
                    returns,
                    body,
                    decorators: vec![],
                })
            })
            .labelled("def statement");

        let class_core = just(Token::Class)
            .ignore_then(ident)
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<ExprS>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .or_not(),
            )
            .then(block.clone())
            .map(|((name, bases), body)| {
                Stmt::Class(ClassDef {
                    name,
                    bases: bases.unwrap_or_default(),
                    body,
                    decorators: vec![],
                })
            })
            .labelled("class statement");

        let decorators = just(Token::At)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Newline))
            .then_ignore(blank_lines.clone())
            .repeated()
            .collect::<Vec<ExprS>>();

        let definition = decorators
            .then(choice((def_core, class_core)))
            .map(|(decos, mut node)| {
                match &mut node {
                    Stmt::Def(def) => def.decorators = decos,
                    Stmt::Class(class) => class.decorators = decos,
                    _ => {}
                }
                node
            });

        let if_stmt = just(Token::If)
            .ignore_then(expr.clone())
            .then(block.clone())
            .then(
                just(Token::Elif)
                    .ignore_then(expr.clone())
                    .then(block.clone())
                    .repeated()
                    .collect::<Vec<(ExprS, Vec<StmtS>)>>(),
            )
            .then(just(Token::Else).ignore_then(block.clone()).or_not())
            .map(
                |(((condition, then_block), elif_blocks), else_block)| Stmt::If {
                    condition,
                    then_block,
                    elif_blocks,
                    else_block,
                },
            )
            .labelled("if statement");

        let while_stmt = just(Token::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(condition, body)| Stmt::While { condition, body })
            .labelled("while statement");

        let name_target = ident.map_with(|name, e| {
            let s: I::Span = e.span();
            Spanned::new(Expr::Name(name), s.into_range())
        });

        let for_stmt = just(Token::For)
            .ignore_then(tuple_or_single(name_target))
            .then_ignore(just(Token::In))
            .then(exprlist.clone())
            .then(block.clone())
            .map(|((target, iterable), body)| Stmt::For {
                target,
                iterable,
                body,
            })
            .labelled("for statement");

        let handler = just(Token::Except)
            .ignore_then(
                expr.clone()
                    .then(just(Token::As).ignore_then(ident).or_not())
                    .or_not(),
            )
            .then(block.clone())
            .map_with(|(clause, body), e| {
                let s: I::Span = e.span();
                let (exc_type, name) = match clause {
                    Some((t, n)) => (Some(t), n),
                    None => (None, None),
                };
                ExceptHandler {
                    exc_type,
                    name,
                    body,
                    span: s.into_range(),
                }
            });

        let try_stmt = just(Token::Try)
            .ignore_then(block.clone())
            .then(handler.repeated().collect::<Vec<ExceptHandler>>())
            .then(just(Token::Finally).ignore_then(block.clone()).or_not())
            .map(|((body, handlers), finally)| Stmt::Try {
                body,
                handlers,
                finally,
            })
            .labelled("try statement");

        // Compound statements occupy the whole logical line
        let compound_stmt_line = choice((definition, if_stmt, while_stmt, for_stmt, try_stmt))
            .map_with(|node: Stmt, e| {
                let s: I::Span = e.span();
                Spanned::new(node, s.into_range())
            })
            .map(|s| vec![s]);

        choice((compound_stmt_line, simple_stmts_line))
            .padded_by(blank_lines)
            .recover_with(skip_then_retry_until(
                any().ignored(),
                just(Token::Newline)
                    .ignored()
                    .or(just(Token::Dedent).ignored())
                    .or(end().ignored()),
            ))
    })
    .boxed()
}

pub fn program_parser<'tokens, I>()
-> impl Parser<'tokens, I, Vec<StmtS>, extra::Err<RichTokenError<'tokens>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    let line = stmt_parser().boxed();
    let blanks = just(Token::Newline).ignored().repeated();

    blanks
        .clone()
        .ignore_then(line.repeated().collect::<Vec<Vec<StmtS>>>())
        .map(|lines| lines.into_iter().flatten().collect::<Vec<StmtS>>())
        .then_ignore(blanks)
        .then_ignore(end())
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn tokenize(source: &str) -> Vec<(Token, SimpleSpan)> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let (token, span) = lexer.next_token_with_span();
            if token == Token::Eof {
                break;
            }
            tokens.push((token, SimpleSpan::from(span)));
        }
        tokens
    }

    fn parse_expr(source: &str) -> Result<ExprS, Vec<RichTokenError<'_>>> {
        let tokens = tokenize(source);
        let eoi_span = SimpleSpan::new(source.len(), source.len());
        let stream =
            chumsky::input::Stream::from_iter(tokens.into_iter()).map(eoi_span, |(t, s)| (t, s));
        expr_parser().parse(stream).into_result()
    }

    fn parse_program(source: &str) -> Vec<StmtS> {
        let tokens = tokenize(source);
        let eoi_span = SimpleSpan::new(source.len(), source.len());
        let stream =
            chumsky::input::Stream::from_iter(tokens.into_iter()).map(eoi_span, |(t, s)| (t, s));
        match program_parser().parse(stream).into_result() {
            Ok(stmts) => stmts,
            Err(errs) => panic!("failed to parse {:?}: {:?}", source, errs),
        }
    }

    fn parse_fails(source: &str) -> bool {
        let tokens = tokenize(source);
        let eoi_span = SimpleSpan::new(source.len(), source.len());
        let stream =
            chumsky::input::Stream::from_iter(tokens.into_iter()).map(eoi_span, |(t, s)| (t, s));
        program_parser().parse(stream).into_result().is_err()
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expr("1 + 2 * 3").unwrap();
        let Expr::Binary {
            op: BinaryOp::Add,
            right,
            ..
        } = expr.node
        else {
            panic!("expected addition at top level");
        };
        assert!(matches!(
            right.node,
            Expr::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_spans_cover_operands() {
        let expr = parse_expr("a + bb").unwrap();
        assert_eq!(expr.span, 0..6);
        let expr = parse_expr("obj.method(1)").unwrap();
        assert_eq!(expr.span, 0..13);
    }

    #[test]
    fn test_parse_true_division_and_shift() {
        let expr = parse_expr("a / b << 2").unwrap();
        let Expr::Binary {
            op: BinaryOp::LShift,
            left,
            ..
        } = expr.node
        else {
            panic!("expected shift");
        };
        assert!(matches!(
            left.node,
            Expr::Binary {
                op: BinaryOp::Divide,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_power_is_right_associative() {
        let expr = parse_expr("2 ** 3 ** 2").unwrap();
        let Expr::Binary {
            op: BinaryOp::Power,
            left,
            right,
        } = expr.node
        else {
            panic!("expected power");
        };
        assert!(matches!(left.node, Expr::Literal(Literal::Int(2))));
        assert!(matches!(
            right.node,
            Expr::Binary {
                op: BinaryOp::Power,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_compare_ops() {
        for (src, expected) in [
            ("a is not None", CompareOp::IsNot),
            ("a is None", CompareOp::Is),
            ("a not in b", CompareOp::NotIn),
            ("a in b", CompareOp::In),
            ("a <= b", CompareOp::LessEqual),
        ] {
            let expr = parse_expr(src).unwrap();
            match expr.node {
                Expr::Compare { op, .. } => assert_eq!(op, expected, "{}", src),
                other => panic!("{}: expected comparison, got {:?}", src, other),
            }
        }
    }

    #[test]
    fn test_parse_chained_comparison_rejected() {
        assert!(parse_expr("a < b < c").is_err());
    }

    #[test]
    fn test_parse_not_and_or() {
        let expr = parse_expr("not a and b or c").unwrap();
        let Expr::BoolOp {
            op: BoolOp::Or,
            left,
            ..
        } = expr.node
        else {
            panic!("expected or");
        };
        let Expr::BoolOp {
            op: BoolOp::And,
            left: inner,
            ..
        } = left.node
        else {
            panic!("expected and");
        };
        assert!(matches!(
            inner.node,
            Expr::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_call_arguments() {
        let expr = parse_expr("f(1, *p, key=2, **kw)").unwrap();
        let Expr::Call { args, .. } = expr.node else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Arg::Positional(_)));
        assert!(matches!(args[1], Arg::Star(_)));
        assert!(matches!(&args[2], Arg::Keyword(name, _) if name == "key"));
        assert!(matches!(args[3], Arg::DoubleStar(_)));
    }

    #[test]
    fn test_parse_tuples() {
        assert!(matches!(parse_expr("()").unwrap().node, Expr::Tuple(ref v) if v.is_empty()));
        assert!(matches!(parse_expr("(1,)").unwrap().node, Expr::Tuple(ref v) if v.len() == 1));
        assert!(matches!(
            parse_expr("(1)").unwrap().node,
            Expr::Literal(Literal::Int(1))
        ));
    }

    #[test]
    fn test_parse_conditional_and_lambda() {
        assert!(matches!(
            parse_expr("a if c else b").unwrap().node,
            Expr::IfExp { .. }
        ));
        let expr = parse_expr("lambda x, y=1: x + y").unwrap();
        let Expr::Lambda { params, .. } = expr.node else {
            panic!("expected lambda");
        };
        assert_eq!(params.len(), 2);
        assert!(params[1].default.is_some());
    }

    #[test]
    fn test_parse_containers_and_subscript() {
        assert!(matches!(parse_expr("[1, 2]").unwrap().node, Expr::List(ref v) if v.len() == 2));
        assert!(matches!(parse_expr("{1: 2}").unwrap().node, Expr::Dict(ref v) if v.len() == 1));
        assert!(matches!(
            parse_expr("xs[0]").unwrap().node,
            Expr::Subscript { .. }
        ));
    }

    #[test]
    fn test_parse_typed_def() {
        let stmts = parse_program("def f(x: int8, y: str = 'a') -> int8:\n    return x\n");
        let Stmt::Def(def) = &stmts[0].node else {
            panic!("expected def");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert!(matches!(&def.params[0].annotation, Some(a) if a.node == Expr::Name("int8".into())));
        assert!(def.params[1].default.is_some());
        assert!(def.returns.is_some());
        assert_eq!(def.body.len(), 1);
    }

    #[test]
    fn test_parse_star_params() {
        let stmts = parse_program("def f(a, *args, **kwargs):\n    pass\n");
        let Stmt::Def(def) = &stmts[0].node else {
            panic!("expected def");
        };
        let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![ParamKind::Normal, ParamKind::VarArgs, ParamKind::KwArgs]
        );
    }

    #[test]
    fn test_parse_class_with_fields_and_methods() {
        let source = "\
class B(A):
    x: int
    y: str = 'a'

    def __init__(self) -> None:
        self.z: int8 = 1

    @staticmethod
    def s() -> int:
        return 1
";
        let stmts = parse_program(source);
        let Stmt::Class(class) = &stmts[0].node else {
            panic!("expected class");
        };
        assert_eq!(class.bases.len(), 1);
        assert_eq!(class.body.len(), 4);
        assert!(matches!(class.body[0].node, Stmt::AnnAssign { value: None, .. }));
        assert!(matches!(
            class.body[1].node,
            Stmt::AnnAssign { value: Some(_), .. }
        ));
        let Stmt::Def(init) = &class.body[2].node else {
            panic!("expected __init__");
        };
        assert!(matches!(
            &init.body[0].node,
            Stmt::AnnAssign { target, .. } if matches!(target.node, Expr::Attribute { .. })
        ));
        let Stmt::Def(s) = &class.body[3].node else {
            panic!("expected decorated def");
        };
        assert_eq!(s.decorators.len(), 1);
    }

    #[test]
    fn test_parse_imports() {
        let stmts = parse_program(
            "from __static__ import int8, cast as c\nimport a.b\nfrom m import *\n",
        );
        let Stmt::ImportFrom { module, names } = &stmts[0].node else {
            panic!("expected from-import");
        };
        assert_eq!(module, "__static__");
        assert_eq!(names[1].bound_name(), "c");
        let Stmt::Import(aliases) = &stmts[1].node else {
            panic!("expected import");
        };
        assert_eq!(aliases[0].name, "a.b");
        assert_eq!(aliases[0].bound_name(), "a");
        assert!(matches!(&stmts[2].node, Stmt::ImportFrom { names, .. } if names[0].name == "*"));
    }

    #[test]
    fn test_parse_assignments() {
        let stmts = parse_program("a = b = 1\nx += 2\ny: int8 = 3\np = 1, 2\n");
        assert!(matches!(&stmts[0].node, Stmt::Assign { targets, .. } if targets.len() == 2));
        assert!(matches!(
            stmts[1].node,
            Stmt::AugAssign {
                op: BinaryOp::Add,
                ..
            }
        ));
        assert!(matches!(stmts[2].node, Stmt::AnnAssign { .. }));
        assert!(matches!(
            &stmts[3].node,
            Stmt::Assign { value, .. } if matches!(value.node, Expr::Tuple(_))
        ));
    }

    #[test]
    fn test_parse_control_flow() {
        let source = "\
for i in range(3):
    if i == 1:
        continue
    elif i == 2:
        break
    else:
        pass
while x:
    x -= 1
try:
    raise ValueError('bad')
except ValueError as e:
    print(e)
except:
    pass
finally:
    done = True
";
        let stmts = parse_program(source);
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[0].node, Stmt::For { .. }));
        assert!(matches!(stmts[1].node, Stmt::While { .. }));
        let Stmt::Try {
            handlers, finally, ..
        } = &stmts[2].node
        else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert!(handlers[1].exc_type.is_none());
        assert!(finally.is_some());
    }

    #[test]
    fn test_parse_for_tuple_target() {
        let stmts = parse_program("for k, v in items:\n    pass\n");
        let Stmt::For { target, .. } = &stmts[0].node else {
            panic!("expected for");
        };
        assert!(matches!(&target.node, Expr::Tuple(v) if v.len() == 2));
    }

    #[test]
    fn test_parse_simple_statements_line() {
        let stmts = parse_program("global g; del a, b; assert x, 'msg'\n");
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[1].node, Stmt::Del(ref t) if t.len() == 2));
        assert!(matches!(stmts[2].node, Stmt::Assert { msg: Some(_), .. }));
    }

    #[test]
    fn test_parse_missing_trailing_newline() {
        let stmts = parse_program("def f():\n    return 1");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn test_parse_invalid_syntax() {
        assert!(parse_fails("def (:\n"));
        assert!(parse_fails("x = = 1\n"));
    }

    #[test]
    fn test_node_ids_are_preorder_and_unique() {
        let mut stmts = parse_program("x = 1 + 2\nprint(x)\n");
        let count = assign_node_ids(&mut stmts);
        assert_eq!(stmts[0].id, NodeId(1));
        let Stmt::Assign { targets, value } = &stmts[0].node else {
            panic!("expected assignment");
        };
        assert_eq!(targets[0].id, NodeId(2));
        assert_eq!(value.id, NodeId(3));
        assert_eq!(stmts[1].id, NodeId(6));
        assert_eq!(count, 9);
    }
}
