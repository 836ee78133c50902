use super::{ParseError, Spanned};
use chumsky::prelude::*;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'code> {
    BracketRoundOpen,
    BracketRoundClose,
    BracketCurlyOpen,
    BracketCurlyClose,
    BracketSquareOpen,
    // `tag [1, 2]`: opens an array that is the first argument of a command call
    ArgumentBracketSquareOpen,
    BracketSquareClose,
    Comment(&'code str),
    Integer(i64),
    Float(f64),
    // Raw content between the quotes, escapes are resolved by the parser
    SingleQuoted(&'code str),
    DoubleQuoted(&'code str),
    Symbol(&'code str),
    Label(&'code str),
    Identifier(&'code str),
    Constant(&'code str),
    InstanceVariable(&'code str),
    Comma,
    Dot,
    Pipe,
    HashRocket,
    Newline,
    Assign,
    PlusAssign,
    MinusAssign,
    Equal,
    NotEqual,
    GreaterOrEqual,
    Greater,
    LessOrEqual,
    Less,
    And,
    Or,
    Not,
    Plus,
    Minus,
    // `method_1 -1`: negates the first argument of a command call
    ArgumentMinus,
    Asterisk,
    DoubleAsterisk,
    Slash,
    Percent,
    If,
    Elsif,
    Else,
    Unless,
    While,
    Do,
    Def,
    End,
    SelfKeyword,
    Nil,
    True,
    False,
}

impl<'code> Token<'code> {
    pub fn into_cow_str(self) -> Cow<'code, str> {
        match self {
            Self::BracketRoundOpen => "(".into(),
            Self::BracketRoundClose => ")".into(),
            Self::BracketCurlyOpen => "{".into(),
            Self::BracketCurlyClose => "}".into(),
            Self::BracketSquareOpen | Self::ArgumentBracketSquareOpen => "[".into(),
            Self::BracketSquareClose => "]".into(),
            Self::Comment(comment) => comment.into(),
            Self::Integer(integer) => integer.to_string().into(),
            Self::Float(float) => float.to_string().into(),
            Self::SingleQuoted(text) => format!("'{text}'").into(),
            Self::DoubleQuoted(text) => format!("\"{text}\"").into(),
            Self::Symbol(name) => format!(":{name}").into(),
            Self::Label(name) => format!("{name}:").into(),
            Self::Identifier(identifier) => identifier.into(),
            Self::Constant(constant) => constant.into(),
            Self::InstanceVariable(name) => name.into(),
            Self::Comma => ",".into(),
            Self::Dot => ".".into(),
            Self::Pipe => "|".into(),
            Self::HashRocket => "=>".into(),
            Self::Newline => "\n".into(),
            Self::Assign => "=".into(),
            Self::PlusAssign => "+=".into(),
            Self::MinusAssign => "-=".into(),
            Self::Equal => "==".into(),
            Self::NotEqual => "!=".into(),
            Self::GreaterOrEqual => ">=".into(),
            Self::Greater => ">".into(),
            Self::LessOrEqual => "<=".into(),
            Self::Less => "<".into(),
            Self::And => "&&".into(),
            Self::Or => "||".into(),
            Self::Not => "!".into(),
            Self::Plus => "+".into(),
            Self::Minus | Self::ArgumentMinus => "-".into(),
            Self::Asterisk => "*".into(),
            Self::DoubleAsterisk => "**".into(),
            Self::Slash => "/".into(),
            Self::Percent => "%".into(),
            Self::If => "if".into(),
            Self::Elsif => "elsif".into(),
            Self::Else => "else".into(),
            Self::Unless => "unless".into(),
            Self::While => "while".into(),
            Self::Do => "do".into(),
            Self::Def => "def".into(),
            Self::End => "end".into(),
            Self::SelfKeyword => "self".into(),
            Self::Nil => "nil".into(),
            Self::True => "true".into(),
            Self::False => "false".into(),
        }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.into_cow_str())
    }
}

pub fn lexer<'code>()
-> impl Parser<'code, &'code str, Vec<Spanned<Token<'code>>>, extra::Err<ParseError<'code, char>>> {
    let bracket = choice((
        just('(').to(Token::BracketRoundOpen),
        just(')').to(Token::BracketRoundClose),
        just('{').to(Token::BracketCurlyOpen),
        just('}').to(Token::BracketCurlyClose),
        just('[').to(Token::BracketSquareOpen),
        just(']').to(Token::BracketSquareClose),
    ));

    // Longest operators first, `**` must not lex as two `*`
    let operator = choice((
        just("**").to(Token::DoubleAsterisk),
        just("==").to(Token::Equal),
        just("!=").to(Token::NotEqual),
        just(">=").to(Token::GreaterOrEqual),
        just("<=").to(Token::LessOrEqual),
        just("&&").to(Token::And),
        just("||").to(Token::Or),
        just("=>").to(Token::HashRocket),
        just("+=").to(Token::PlusAssign),
        just("-=").to(Token::MinusAssign),
        just('>').to(Token::Greater),
        just('<').to(Token::Less),
        just('=').to(Token::Assign),
        just('!').to(Token::Not),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Asterisk),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('|').to(Token::Pipe),
    ));

    let comment = just('#')
        .then(any().and_is(text::newline().not()).repeated())
        .to_slice()
        .map(Token::Comment);

    // @TODO support number format like 1_000?
    let number = text::int(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .try_map(|number: &str, span| {
            if number.contains('.') {
                number.parse().map(Token::Float).map_err(|error| {
                    ParseError::custom(span, format!("Invalid float literal '{number}': {error}"))
                })
            } else {
                number.parse().map(Token::Integer).map_err(|error| {
                    ParseError::custom(span, format!("Invalid integer literal '{number}': {error}"))
                })
            }
        });

    let escape = just('\\').then(any()).ignored();

    let single_quoted = none_of("\\'")
        .ignored()
        .or(escape.clone())
        .repeated()
        .to_slice()
        .delimited_by(just('\''), just('\''))
        .map(Token::SingleQuoted);

    let double_quoted = none_of("\\\"")
        .ignored()
        .or(escape)
        .repeated()
        .to_slice()
        .delimited_by(just('"'), just('"'))
        .map(Token::DoubleQuoted);

    let word_tail = any()
        .filter(|character: &char| character.is_ascii_alphanumeric() || *character == '_')
        .repeated();

    // `empty?` and `save!` are method names, `a!= b` is not
    let predicate_suffix = one_of("?!").then(just('=').not()).or_not();

    let identifier = any()
        .filter(|character: &char| character.is_ascii_lowercase() || *character == '_')
        .then(word_tail.clone())
        .then(predicate_suffix.clone())
        .to_slice();

    let label = identifier
        .clone()
        .then_ignore(just(':').then(just(':').not()))
        .map(Token::Label);

    // `:@name` names an instance variable, as in `instance_variable_get(:@name)`
    let symbol = just(':')
        .ignore_then(
            just('@')
                .repeated()
                .at_most(2)
                .then(any().filter(|character: &char| {
                    character.is_ascii_alphabetic() || *character == '_'
                }))
                .then(word_tail.clone())
                .then(predicate_suffix)
                .to_slice(),
        )
        .map(Token::Symbol);

    let instance_variable = just('@')
        .repeated()
        .at_least(1)
        .at_most(2)
        .then(identifier.clone())
        .to_slice()
        .map(Token::InstanceVariable);

    let keyword_or_identifier = identifier.map(|word| match word {
        "if" => Token::If,
        "elsif" => Token::Elsif,
        "else" => Token::Else,
        "unless" => Token::Unless,
        "while" => Token::While,
        "do" => Token::Do,
        "def" => Token::Def,
        "end" => Token::End,
        "self" => Token::SelfKeyword,
        "nil" => Token::Nil,
        "true" => Token::True,
        "false" => Token::False,
        _ => Token::Identifier(word),
    });

    let constant = any()
        .filter(char::is_ascii_uppercase)
        .then(word_tail)
        .to_slice()
        .map(Token::Constant);

    let token = choice((
        comment,
        text::newline().to(Token::Newline),
        just(';').to(Token::Newline),
        number,
        single_quoted,
        double_quoted,
        instance_variable,
        symbol,
        label,
        keyword_or_identifier,
        constant,
        operator,
        bracket,
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
    ));

    token
        .map_with(|token, extra| Spanned {
            node: token,
            span: extra.span(),
        })
        .padded_by(text::inline_whitespace())
        .recover_with(skip_then_retry_until(any().ignored(), end()))
        .repeated()
        .collect::<Vec<_>>()
        .map(disambiguate)
}

/// Retags tokens whose meaning depends on spacing and on known local variables.
///
/// After a name that is not a local variable, ` -1` and ` [1]` start command
/// arguments (`method_1 -1`), while `x - 1`, `x -1` for a local `x` and `x[1]`
/// stay operators. The `do` of `while condition do` becomes a statement break.
fn disambiguate(mut tokens: Vec<Spanned<Token<'_>>>) -> Vec<Spanned<Token<'_>>> {
    let locals = local_names(&tokens);
    for index in 1..tokens.len() {
        let Token::Identifier(name) = tokens[index - 1].node else {
            continue;
        };
        let previous_end = tokens[index - 1].span.into_range().end;
        let current_range = tokens[index].span.into_range();
        if locals.contains(name) || previous_end == current_range.start {
            continue;
        }
        let attached = tokens
            .get(index + 1)
            .is_some_and(|next| next.span.into_range().start == current_range.end);
        tokens[index].node = match tokens[index].node {
            Token::Minus if attached => Token::ArgumentMinus,
            Token::BracketSquareOpen => Token::ArgumentBracketSquareOpen,
            _ => continue,
        };
    }

    for index in 0..tokens.len() {
        let loop_header = tokens[index].node == Token::While
            && index.checked_sub(1).is_none_or(|previous| {
                matches!(
                    tokens[previous].node,
                    Token::Newline
                        | Token::Do
                        | Token::BracketCurlyOpen
                        | Token::Pipe
                        | Token::Else
                        | Token::Assign
                )
            });
        if !loop_header {
            continue;
        }
        let mut depth = 0_usize;
        for token in &mut tokens[index + 1..] {
            match token.node {
                Token::BracketRoundOpen
                | Token::BracketSquareOpen
                | Token::ArgumentBracketSquareOpen
                | Token::BracketCurlyOpen => depth += 1,
                Token::BracketRoundClose | Token::BracketSquareClose | Token::BracketCurlyClose => {
                    depth = depth.saturating_sub(1)
                }
                Token::Newline => break,
                Token::Do if depth == 0 => {
                    token.node = Token::Newline;
                    break;
                }
                _ => {}
            }
        }
    }
    tokens
}

/// Names assigned anywhere in the source or bound as block parameters.
fn local_names<'code>(tokens: &[Spanned<Token<'code>>]) -> HashSet<&'code str> {
    let mut locals = HashSet::new();
    let mut in_block_parameters = false;
    for (index, token) in tokens.iter().enumerate() {
        let before = |offset: usize| index.checked_sub(offset).map(|index| tokens[index].node);
        match (token.node, before(1)) {
            (Token::Pipe, Some(Token::BracketCurlyOpen | Token::Do)) => in_block_parameters = true,
            (Token::Pipe, _) => in_block_parameters = false,
            (Token::Identifier(name), _) if in_block_parameters => {
                locals.insert(name);
            }
            // `self.name = x` and `def name=(x)` are not local assignments
            (
                Token::Assign | Token::PlusAssign | Token::MinusAssign,
                Some(Token::Identifier(name)),
            ) if !matches!(before(2), Some(Token::Dot | Token::Def)) => {
                locals.insert(name);
            }
            _ => {}
        }
    }
    locals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::prelude::Parser;

    fn tokens(code: &str) -> Vec<Token<'_>> {
        let result = lexer().parse(code);
        assert!(!result.has_errors(), "{:?}", result.errors().collect::<Vec<_>>());
        result
            .into_output()
            .unwrap()
            .into_iter()
            .map(|token| token.node)
            .collect()
    }

    #[test]
    fn test_command_call() {
        assert_eq!(
            tokens("method_1 'hello'\nmethod_2 false"),
            vec![
                Token::Identifier("method_1"),
                Token::SingleQuoted("hello"),
                Token::Newline,
                Token::Identifier("method_2"),
                Token::False,
            ]
        );
    }

    #[test]
    fn test_label_and_symbol() {
        assert_eq!(
            tokens("call(kwarg_1: :value)"),
            vec![
                Token::Identifier("call"),
                Token::BracketRoundOpen,
                Token::Label("kwarg_1"),
                Token::Symbol("value"),
                Token::BracketRoundClose,
            ]
        );
    }

    #[test]
    fn test_sentinel_is_plain_identifier() {
        assert_eq!(
            tokens("send(:__instance__)"),
            vec![
                Token::Identifier("send"),
                Token::BracketRoundOpen,
                Token::Symbol("__instance__"),
                Token::BracketRoundClose,
            ]
        );
        assert_eq!(tokens("__instance__"), vec![Token::Identifier("__instance__")]);
    }

    #[test]
    fn test_instance_variable_symbol() {
        assert_eq!(
            tokens("instance_variable_get(:@secret)"),
            vec![
                Token::Identifier("instance_variable_get"),
                Token::BracketRoundOpen,
                Token::Symbol("@secret"),
                Token::BracketRoundClose,
            ]
        );
    }

    #[test]
    fn test_predicate_suffix() {
        assert_eq!(
            tokens("x.empty? a!= b"),
            vec![
                Token::Identifier("x"),
                Token::Dot,
                Token::Identifier("empty?"),
                Token::Identifier("a"),
                Token::NotEqual,
                Token::Identifier("b"),
            ]
        );
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            tokens("2 ** 10 >= 1.5"),
            vec![
                Token::Integer(2),
                Token::DoubleAsterisk,
                Token::Integer(10),
                Token::GreaterOrEqual,
                Token::Float(1.5),
            ]
        );
    }

    #[test]
    fn test_keywords_constants_and_instance_variables() {
        assert_eq!(
            tokens("def x; @secret; File end"),
            vec![
                Token::Def,
                Token::Identifier("x"),
                Token::Newline,
                Token::InstanceVariable("@secret"),
                Token::Newline,
                Token::Constant("File"),
                Token::End,
            ]
        );
    }

    #[test]
    fn test_strings_keep_raw_escapes() {
        assert_eq!(
            tokens(r#"'it\'s' "a\"b""#),
            vec![Token::SingleQuoted(r"it\'s"), Token::DoubleQuoted(r#"a\"b"#)]
        );
    }

    #[test]
    fn test_spacing_decides_command_arguments() {
        assert_eq!(
            tokens("method_1 -1\nx = 2\nx -1\ny - 1"),
            vec![
                Token::Identifier("method_1"),
                Token::ArgumentMinus,
                Token::Integer(1),
                Token::Newline,
                Token::Identifier("x"),
                Token::Assign,
                Token::Integer(2),
                Token::Newline,
                Token::Identifier("x"),
                Token::Minus,
                Token::Integer(1),
                Token::Newline,
                Token::Identifier("y"),
                Token::Minus,
                Token::Integer(1),
            ]
        );
        assert_eq!(
            tokens("tag [1]\nitems[0]"),
            vec![
                Token::Identifier("tag"),
                Token::ArgumentBracketSquareOpen,
                Token::Integer(1),
                Token::BracketSquareClose,
                Token::Newline,
                Token::Identifier("items"),
                Token::BracketSquareOpen,
                Token::Integer(0),
                Token::BracketSquareClose,
            ]
        );
    }

    #[test]
    fn test_block_parameters_are_locals() {
        assert_eq!(
            tokens("each { |n| n -1 }"),
            vec![
                Token::Identifier("each"),
                Token::BracketCurlyOpen,
                Token::Pipe,
                Token::Identifier("n"),
                Token::Pipe,
                Token::Identifier("n"),
                Token::Minus,
                Token::Integer(1),
                Token::BracketCurlyClose,
            ]
        );
    }

    #[test]
    fn test_while_do_becomes_newline() {
        assert_eq!(
            tokens("while ready do\nend\nx += 1 while ready"),
            vec![
                Token::While,
                Token::Identifier("ready"),
                Token::Newline,
                Token::Newline,
                Token::End,
                Token::Newline,
                Token::Identifier("x"),
                Token::PlusAssign,
                Token::Integer(1),
                Token::While,
                Token::Identifier("ready"),
            ]
        );
    }

    #[test]
    fn test_comment_runs_to_end_of_line() {
        assert_eq!(
            tokens("x # trailing\ny"),
            vec![
                Token::Identifier("x"),
                Token::Comment("# trailing"),
                Token::Newline,
                Token::Identifier("y"),
            ]
        );
    }
}
