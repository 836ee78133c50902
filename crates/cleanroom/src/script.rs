use crate::error::{EvalError, SyntaxError};
use crate::interpreter::{Interpreter, Receiver};
use crate::parser::{Expression, Input, Parser, Span, Spanned, Token, lexer, parser};
use crate::value::Value;

/// Checks syntax without evaluating anything.
pub fn parse(source: &str) -> Result<(), SyntaxError> {
    let tokens = lex(source)?;
    parse_tokens(&tokens, source.len()).map(|_| ())
}

pub(crate) fn run(source: &str, receiver: &mut dyn Receiver) -> Result<Value, EvalError> {
    let tokens = lex(source)?;
    let program = parse_tokens(&tokens, source.len())?;
    log::trace!("Running {} statements", program.len());
    Interpreter::new(receiver).run(&program)
}

fn lex(source: &str) -> Result<Vec<Spanned<Token<'_>>>, SyntaxError> {
    let (tokens, errors) = lexer().parse(source).into_output_errors();
    if !errors.is_empty() {
        return Err(SyntaxError::from_errors(errors));
    }
    let mut tokens = tokens.unwrap_or_default();
    tokens.retain(|token| !matches!(token.node, Token::Comment(_)));
    Ok(tokens)
}

fn parse_tokens<'code>(
    tokens: &'code [Spanned<Token<'code>>],
    source_len: usize,
) -> Result<Vec<Spanned<Expression<'code>>>, SyntaxError> {
    let input = tokens.map(
        Span::from(source_len..source_len),
        |Spanned { node, span }| (node, span),
    );
    let (program, errors) = parser().parse(input).into_output_errors();
    if !errors.is_empty() {
        return Err(SyntaxError::from_errors(errors));
    }
    Ok(program.unwrap_or_default())
}
