use chumsky::{input::ValueInput, pratt::*, prelude::*};
use std::borrow::Cow;
use std::fmt;

mod lexer;
pub use lexer::{Token, lexer};

pub use chumsky::prelude::{Input, Parser};

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

type ParserExtra<'code> = extra::Err<ParseError<'code, Token<'code>>>;

/// Parses a whole script: statements separated by newlines or `;`.
pub fn parser<'code, I>()
-> impl Parser<'code, I, Vec<Spanned<Expression<'code>>>, ParserExtra<'code>>
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    statements(expression()).then_ignore(end())
}

/// Statements with optional trailing modifiers (`x if y`, `x unless y`, `x while y`).
fn statements<'code, I>(
    expression: impl Parser<'code, I, Spanned<Expression<'code>>, ParserExtra<'code>> + Clone,
) -> impl Parser<'code, I, Vec<Spanned<Expression<'code>>>, ParserExtra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    let newlines = just(Token::Newline).repeated();

    let modifier = choice((
        just(Token::If).to(Modifier::If),
        just(Token::Unless).to(Modifier::Unless),
        just(Token::While).to(Modifier::While),
    ));

    let statement = expression
        .clone()
        .then(modifier.then(expression).or_not())
        .map_with(|(statement, modifier), extra| match modifier {
            None => statement,
            Some((modifier, condition)) => Spanned {
                span: extra.span(),
                node: modifier.apply(statement, condition),
            },
        });

    newlines
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(newlines)
}

fn expression<'code, I>()
-> impl Parser<'code, I, Spanned<Expression<'code>>, ParserExtra<'code>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    recursive(|expression| {
        let newlines = just(Token::Newline).repeated();
        let comma = just(Token::Comma).then(newlines);
        let bracket_round_open = just(Token::BracketRoundOpen);
        let bracket_round_close = just(Token::BracketRoundClose);
        let bracket_curly_open = just(Token::BracketCurlyOpen);
        let bracket_curly_close = just(Token::BracketCurlyClose);
        let bracket_square_open = just(Token::BracketSquareOpen);
        let bracket_square_close = just(Token::BracketSquareClose);

        let body = statements(expression.clone()).boxed();

        let identifier = select! { Token::Identifier(identifier) => identifier };
        let label = select! { Token::Label(label) => label };

        let block_parameters = identifier
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::Pipe), just(Token::Pipe))
            .or_not()
            .map(Option::unwrap_or_default);

        let do_block = just(Token::Do)
            .ignore_then(block_parameters.clone())
            .then(body.clone())
            .then_ignore(just(Token::End))
            .map(|(parameters, body)| Block { parameters, body });

        let brace_block = block_parameters
            .then(body.clone())
            .delimited_by(bracket_curly_open, bracket_curly_close)
            .map(|(parameters, body)| Block { parameters, body });

        let block = do_block.clone().or(brace_block);

        let argument = choice((
            label
                .then_ignore(newlines)
                .then(expression.clone())
                .map(|(name, value)| Argument::Keyword { name, value }),
            just(Token::DoubleAsterisk)
                .ignore_then(expression.clone())
                .map(Argument::DoubleSplat),
            expression.clone().map(Argument::Positional),
        ))
        .map_with(|argument, extra| Spanned {
            node: argument,
            span: extra.span(),
        });

        let parenthesized_arguments = argument
            .clone()
            .separated_by(comma.clone())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(
                bracket_round_open.then(newlines),
                newlines.then(bracket_round_close),
            );

        // `method_1 'hello'`: arguments without parentheses must start with one of these,
        // otherwise `x - 1` or `x[0]` would turn into calls
        let command_argument_start = select! {
            Token::ArgumentMinus => (),
            Token::ArgumentBracketSquareOpen => (),
            Token::Integer(_) => (),
            Token::Float(_) => (),
            Token::SingleQuoted(_) => (),
            Token::DoubleQuoted(_) => (),
            Token::Symbol(_) => (),
            Token::Label(_) => (),
            Token::Identifier(_) => (),
            Token::Constant(_) => (),
            Token::InstanceVariable(_) => (),
            Token::SelfKeyword => (),
            Token::Nil => (),
            Token::True => (),
            Token::False => (),
        };

        let command_arguments = command_argument_start
            .rewind()
            .ignore_then(
                argument
                    .separated_by(comma.clone())
                    .at_least(1)
                    .collect::<Vec<_>>(),
            );

        let call_suffix = choice((
            parenthesized_arguments.then(block.clone().or_not()),
            block.clone().map(|block| (Vec::new(), Some(block))),
            command_arguments.then(do_block.or_not()),
        ));

        let call = identifier
            .then(call_suffix.clone().or_not())
            .map(|(name, call)| match call {
                None => Expression::Identifier(name),
                Some((arguments, block)) => Expression::Call {
                    receiver: None,
                    name,
                    arguments,
                    block,
                },
            });

        let literal = select! {
            Token::Integer(integer) => Literal::Integer(integer),
            Token::Float(float) => Literal::Float(float),
            Token::SingleQuoted(text) => Literal::String(unescape_single_quoted(text)),
            Token::DoubleQuoted(text) => Literal::String(unescape_double_quoted(text)),
            Token::Symbol(name) => Literal::Symbol(name),
            Token::Nil => Literal::Nil,
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
        };

        let array = expression
            .clone()
            .separated_by(comma.clone())
            .allow_trailing()
            .collect()
            .delimited_by(
                bracket_square_open
                    .or(just(Token::ArgumentBracketSquareOpen))
                    .then(newlines),
                newlines.then(bracket_square_close),
            )
            .map(|items| Expression::Array { items });

        let hash_entry = choice((
            label
                .map_with(|name, extra| Spanned {
                    node: Expression::Literal(Literal::Symbol(name)),
                    span: extra.span(),
                })
                .then_ignore(newlines)
                .then(expression.clone()),
            expression
                .clone()
                .then_ignore(just(Token::HashRocket))
                .then_ignore(newlines)
                .then(expression.clone()),
        ));

        let hash = hash_entry
            .separated_by(comma)
            .allow_trailing()
            .collect()
            .delimited_by(
                bracket_curly_open.then(newlines),
                newlines.then(bracket_curly_close),
            )
            .map(|entries| Expression::Hash { entries });

        let condition_line = expression.clone().then_ignore(just(Token::Newline));

        let if_ = just(Token::If)
            .ignore_then(condition_line.clone())
            .then(body.clone())
            .then(
                just(Token::Elsif)
                    .ignore_then(condition_line.clone())
                    .then(body.clone())
                    .map_with(|(condition, body), extra| (condition, body, extra.span()))
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then(just(Token::Else).ignore_then(body.clone()).or_not())
            .then_ignore(just(Token::End))
            .map(|(((condition, then_branch), elsif_branches), else_branch)| {
                // `elsif` is an `if` nested in the previous `else`
                let else_branch = elsif_branches.into_iter().rev().fold(
                    else_branch,
                    |else_branch, (condition, then_branch, span)| {
                        Some(vec![Spanned {
                            span,
                            node: Expression::If {
                                condition: Box::new(condition),
                                then_branch,
                                else_branch,
                            },
                        }])
                    },
                );
                Expression::If {
                    condition: Box::new(condition),
                    then_branch,
                    else_branch,
                }
            });

        let unless = just(Token::Unless)
            .ignore_then(condition_line.clone())
            .then(body.clone())
            .then(just(Token::Else).ignore_then(body.clone()).or_not())
            .then_ignore(just(Token::End))
            .map(|((condition, then_branch), else_branch)| Expression::If {
                condition: Box::new(negate(condition)),
                then_branch,
                else_branch,
            });

        let while_ = just(Token::While)
            .ignore_then(condition_line)
            .then(body.clone())
            .then_ignore(just(Token::End))
            .map(|(condition, body)| Expression::While {
                condition: Box::new(condition),
                body,
            });

        // Parameters are only skipped to find the body; definitions never run
        let balanced_parentheses = recursive(|balanced| {
            choice((
                balanced.delimited_by(bracket_round_open, bracket_round_close),
                any()
                    .filter(|token| {
                        !matches!(token, Token::BracketRoundOpen | Token::BracketRoundClose)
                    })
                    .ignored(),
            ))
            .repeated()
        });
        let parameters = choice((
            balanced_parentheses.delimited_by(bracket_round_open, bracket_round_close),
            any().filter(|token| *token != Token::Newline).repeated(),
        ));

        let def = just(Token::Def)
            .ignore_then(just(Token::SelfKeyword).then(just(Token::Dot)).or_not())
            .ignore_then(identifier)
            // `def name=(value)` defines a setter
            .then_ignore(just(Token::Assign).or_not())
            .then_ignore(parameters)
            .then_ignore(body)
            .then_ignore(just(Token::End))
            .map(|name| Expression::Def { name });

        let self_reference = just(Token::SelfKeyword).to(Expression::SelfReference);
        let instance_variable =
            select! { Token::InstanceVariable(name) => Expression::InstanceVariable(name) };
        let constant = select! { Token::Constant(name) => Expression::Constant(name) };

        let nested = expression
            .clone()
            .delimited_by(
                bracket_round_open.then(newlines),
                newlines.then(bracket_round_close),
            );

        let atom = choice((
            literal.map(Expression::Literal),
            array,
            hash,
            if_,
            unless,
            while_,
            def,
            self_reference,
            instance_variable,
            constant,
            call,
        ))
        .map_with(|expression, extra| Spanned {
            node: expression,
            span: extra.span(),
        })
        .or(nested)
        .boxed();

        let method_suffix = just(Token::Dot)
            .ignore_then(newlines)
            .ignore_then(identifier)
            .then(call_suffix.or_not())
            .map(|(name, call)| {
                let (arguments, block) = call.unwrap_or_default();
                Suffix::Method {
                    name,
                    arguments,
                    block,
                }
            });

        let index_suffix = expression
            .clone()
            .delimited_by(bracket_square_open, bracket_square_close)
            .map(Suffix::Index);

        let operator_expression = atom.pratt((
            postfix(10, method_suffix.or(index_suffix), |target, suffix, extra| {
                let node = match suffix {
                    Suffix::Method {
                        name,
                        arguments,
                        block,
                    } => Expression::Call {
                        receiver: Some(Box::new(target)),
                        name,
                        arguments,
                        block,
                    },
                    Suffix::Index(index) => Expression::Index {
                        target: Box::new(target),
                        index: Box::new(index),
                    },
                };
                Spanned {
                    node,
                    span: extra.span(),
                }
            }),
            infix(
                right(9),
                just(Token::DoubleAsterisk).then_ignore(newlines),
                |l, _, r, extra| binary(BinaryOperator::Power, l, r, extra.span()),
            ),
            prefix(
                8,
                select! {
                    Token::Not => UnaryOperator::Not,
                    Token::Minus => UnaryOperator::Negate,
                    Token::ArgumentMinus => UnaryOperator::Negate,
                },
                |operator, operand, extra| Spanned {
                    node: Expression::Unary {
                        operator,
                        operand: Box::new(operand),
                    },
                    span: extra.span(),
                },
            ),
            infix(
                left(7),
                select! {
                    Token::Asterisk => BinaryOperator::Multiply,
                    Token::Slash => BinaryOperator::Divide,
                    Token::Percent => BinaryOperator::Remainder,
                }
                .then_ignore(newlines),
                |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            infix(
                left(6),
                select! {
                    Token::Plus => BinaryOperator::Add,
                    Token::Minus => BinaryOperator::Subtract,
                }
                .then_ignore(newlines),
                |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            infix(
                left(5),
                select! {
                    Token::Less => BinaryOperator::Less,
                    Token::LessOrEqual => BinaryOperator::LessOrEqual,
                    Token::Greater => BinaryOperator::Greater,
                    Token::GreaterOrEqual => BinaryOperator::GreaterOrEqual,
                }
                .then_ignore(newlines),
                |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            infix(
                left(4),
                select! {
                    Token::Equal => BinaryOperator::Equal,
                    Token::NotEqual => BinaryOperator::NotEqual,
                }
                .then_ignore(newlines),
                |l, operator, r, extra| binary(operator, l, r, extra.span()),
            ),
            infix(
                left(3),
                just(Token::And).then_ignore(newlines),
                |l, _, r, extra| binary(BinaryOperator::And, l, r, extra.span()),
            ),
            infix(
                left(2),
                just(Token::Or).then_ignore(newlines),
                |l, _, r, extra| binary(BinaryOperator::Or, l, r, extra.span()),
            ),
        ));

        let assignment = identifier
            .then(select! {
                Token::Assign => None,
                Token::PlusAssign => Some(BinaryOperator::Add),
                Token::MinusAssign => Some(BinaryOperator::Subtract),
            })
            .then_ignore(newlines)
            .then(expression)
            .map_with(|((name, operator), value), extra| Spanned {
                node: Expression::Assign {
                    name,
                    operator,
                    value: Box::new(value),
                },
                span: extra.span(),
            });

        assignment.or(operator_expression)
    })
}

fn binary<'code>(
    operator: BinaryOperator,
    operand_a: Spanned<Expression<'code>>,
    operand_b: Spanned<Expression<'code>>,
    span: Span,
) -> Spanned<Expression<'code>> {
    Spanned {
        node: Expression::Binary {
            operator,
            operand_a: Box::new(operand_a),
            operand_b: Box::new(operand_b),
        },
        span,
    }
}

fn negate(condition: Spanned<Expression<'_>>) -> Spanned<Expression<'_>> {
    Spanned {
        span: condition.span,
        node: Expression::Unary {
            operator: UnaryOperator::Not,
            operand: Box::new(condition),
        },
    }
}

fn unescape_single_quoted(text: &str) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }
    let mut unescaped = String::with_capacity(text.len());
    let mut characters = text.chars();
    while let Some(character) = characters.next() {
        match character {
            '\\' => match characters.next() {
                Some(escaped @ ('\\' | '\'')) => unescaped.push(escaped),
                Some(other) => {
                    unescaped.push('\\');
                    unescaped.push(other);
                }
                None => unescaped.push('\\'),
            },
            _ => unescaped.push(character),
        }
    }
    Cow::Owned(unescaped)
}

fn unescape_double_quoted(text: &str) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }
    let mut unescaped = String::with_capacity(text.len());
    let mut characters = text.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            unescaped.push(character);
            continue;
        }
        match characters.next() {
            Some('n') => unescaped.push('\n'),
            Some('t') => unescaped.push('\t'),
            Some('r') => unescaped.push('\r'),
            Some('0') => unescaped.push('\0'),
            Some(other) => unescaped.push(other),
            None => unescaped.push('\\'),
        }
    }
    Cow::Owned(unescaped)
}

#[derive(Debug, Clone, Copy)]
enum Modifier {
    If,
    Unless,
    While,
}

impl Modifier {
    fn apply<'code>(
        self,
        statement: Spanned<Expression<'code>>,
        condition: Spanned<Expression<'code>>,
    ) -> Expression<'code> {
        match self {
            Self::If => Expression::If {
                condition: Box::new(condition),
                then_branch: vec![statement],
                else_branch: None,
            },
            Self::Unless => Expression::If {
                condition: Box::new(negate(condition)),
                then_branch: vec![statement],
                else_branch: None,
            },
            Self::While => Expression::While {
                condition: Box::new(condition),
                body: vec![statement],
            },
        }
    }
}

enum Suffix<'code> {
    Method {
        name: &'code str,
        arguments: Vec<Spanned<Argument<'code>>>,
        block: Option<Block<'code>>,
    },
    Index(Spanned<Expression<'code>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression<'code> {
    Literal(Literal<'code>),
    Array {
        items: Vec<Spanned<Self>>,
    },
    Hash {
        entries: Vec<(Spanned<Self>, Spanned<Self>)>,
    },
    // A local variable if one is assigned, otherwise a call without arguments
    Identifier(&'code str),
    SelfReference,
    InstanceVariable(&'code str),
    Constant(&'code str),
    Assign {
        name: &'code str,
        operator: Option<BinaryOperator>,
        value: Box<Spanned<Self>>,
    },
    Call {
        receiver: Option<Box<Spanned<Self>>>,
        name: &'code str,
        arguments: Vec<Spanned<Argument<'code>>>,
        block: Option<Block<'code>>,
    },
    Index {
        target: Box<Spanned<Self>>,
        index: Box<Spanned<Self>>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Spanned<Self>>,
    },
    Binary {
        operator: BinaryOperator,
        operand_a: Box<Spanned<Self>>,
        operand_b: Box<Spanned<Self>>,
    },
    If {
        condition: Box<Spanned<Self>>,
        then_branch: Vec<Spanned<Self>>,
        else_branch: Option<Vec<Spanned<Self>>>,
    },
    While {
        condition: Box<Spanned<Self>>,
        body: Vec<Spanned<Self>>,
    },
    Def {
        name: &'code str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal<'code> {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(Cow<'code, str>),
    Symbol(&'code str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument<'code> {
    Positional(Spanned<Expression<'code>>),
    Keyword {
        name: &'code str,
        value: Spanned<Expression<'code>>,
    },
    DoubleSplat(Spanned<Expression<'code>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block<'code> {
    pub parameters: Vec<&'code str>,
    pub body: Vec<Spanned<Expression<'code>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Power,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operator = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
            Self::Power => "**",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::And => "&&",
            Self::Or => "||",
        };
        write!(f, "{operator}")
    }
}
