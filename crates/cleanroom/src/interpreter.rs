use crate::error::EvalError;
use crate::parser::{Argument, BinaryOperator, Block, Expression, Literal, Span, Spanned};
use crate::sandbox::Denial;
use crate::signature::{ArgumentError, CallArguments, Signature};
use crate::value::{HashKey, Value};
use indexmap::IndexMap;
use std::collections::HashMap;

mod builtins;
mod operators;

/// Dynamic dispatch by name, `send(:name, ...)`.
const SEND_METHODS: [&str; 3] = ["send", "public_send", "__send__"];

/// What the interpreter hands over when code reaches past plain values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reach<'code> {
    InstanceVariable(&'code str),
    Constant(&'code str),
    Definition(&'code str),
}

pub(crate) enum CallError {
    Denied(Denial),
    Argument(ArgumentError),
    Method(anyhow::Error),
}

/// The only way out of the interpreter: calls without a receiver (or on `self`)
/// and everything that would touch state the language itself does not own.
pub(crate) trait Receiver {
    fn invoke(&mut self, name: &str, arguments: CallArguments) -> Result<Value, CallError>;

    /// Checked before a method runs on a plain value.
    fn screen(&self, name: &str) -> Result<(), CallError>;

    fn reach(&mut self, reach: Reach<'_>) -> Result<Value, CallError>;
}

pub(crate) struct Interpreter<'r> {
    receiver: &'r mut dyn Receiver,
    frames: Vec<HashMap<String, Value>>,
}

impl<'r> Interpreter<'r> {
    pub(crate) fn new(receiver: &'r mut dyn Receiver) -> Self {
        Self {
            receiver,
            frames: vec![HashMap::new()],
        }
    }

    /// Runs statements in order and returns the value of the last one.
    pub(crate) fn run(&mut self, program: &[Spanned<Expression<'_>>]) -> Result<Value, EvalError> {
        let mut result = Value::Nil;
        for statement in program {
            result = self.evaluate(statement)?;
        }
        Ok(result)
    }

    fn evaluate(&mut self, expression: &Spanned<Expression<'_>>) -> Result<Value, EvalError> {
        let span = expression.span;
        match &expression.node {
            Expression::Literal(literal) => Ok(match literal {
                Literal::Nil => Value::Nil,
                Literal::Bool(boolean) => Value::Bool(*boolean),
                Literal::Integer(integer) => Value::Integer(*integer),
                Literal::Float(float) => Value::Float(*float),
                Literal::String(text) => Value::String(text.to_string()),
                Literal::Symbol(name) => Value::symbol(*name),
            }),
            Expression::Array { items } => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expression::Hash { entries } => {
                let mut hash = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = hash_key(self.evaluate(key)?, key.span)?;
                    hash.insert(key, self.evaluate(value)?);
                }
                Ok(Value::Hash(hash))
            }
            Expression::Identifier(name) => match self.variable(name).cloned() {
                Some(value) => Ok(value),
                None => self.call(None, name, &[], None, span),
            },
            Expression::SelfReference => Ok(Value::Scope),
            Expression::InstanceVariable(name) => {
                self.reach(Reach::InstanceVariable(name), span)
            }
            Expression::Constant(name) => self.reach(Reach::Constant(name), span),
            Expression::Def { name } => self.reach(Reach::Definition(name), span),
            Expression::Assign {
                name,
                operator,
                value,
            } => {
                let mut value = self.evaluate(value)?;
                if let Some(operator) = operator {
                    let current = self.variable(name).cloned().unwrap_or_default();
                    value = operators::binary(*operator, current, value)
                        .map_err(|message| script_error(message, span))?;
                }
                self.assign(name, value.clone());
                Ok(value)
            }
            Expression::Call {
                receiver,
                name,
                arguments,
                block,
            } => self.call(receiver.as_deref(), name, arguments, block.as_ref(), span),
            Expression::Index { target, index } => {
                let target = self.evaluate(target)?;
                let index = self.evaluate(index)?;
                builtins::index(target, index).map_err(|message| script_error(message, span))
            }
            Expression::Unary { operator, operand } => {
                let operand = self.evaluate(operand)?;
                operators::unary(*operator, operand).map_err(|message| script_error(message, span))
            }
            Expression::Binary {
                operator: operator @ (BinaryOperator::And | BinaryOperator::Or),
                operand_a,
                operand_b,
            } => {
                let a = self.evaluate(operand_a)?;
                let short_circuit = match operator {
                    BinaryOperator::And => !a.is_truthy(),
                    _ => a.is_truthy(),
                };
                if short_circuit {
                    Ok(a)
                } else {
                    self.evaluate(operand_b)
                }
            }
            Expression::Binary {
                operator,
                operand_a,
                operand_b,
            } => {
                let a = self.evaluate(operand_a)?;
                let b = self.evaluate(operand_b)?;
                operators::binary(*operator, a, b).map_err(|message| script_error(message, span))
            }
            Expression::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.run(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.run(else_branch)
                } else {
                    Ok(Value::Nil)
                }
            }
            Expression::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    self.run(body)?;
                }
                Ok(Value::Nil)
            }
        }
    }

    fn call(
        &mut self,
        receiver: Option<&Spanned<Expression<'_>>>,
        name: &str,
        arguments: &[Spanned<Argument<'_>>],
        block: Option<&Block<'_>>,
        span: Span,
    ) -> Result<Value, EvalError> {
        let target = match receiver {
            Some(receiver) => self.evaluate(receiver)?,
            None => Value::Scope,
        };
        let mut call = self.call_arguments(arguments)?;
        call.has_block = block.is_some();

        // `raise` is a language primitive, but `self.raise` would be a method
        if receiver.is_none() && name == "raise" {
            let message = call
                .positional
                .first()
                .map(Value::to_string)
                .unwrap_or_else(|| "unhandled exception".to_string());
            return Err(script_error(message, span));
        }

        self.dispatch(target, name, call, block, span)
    }

    fn dispatch(
        &mut self,
        target: Value,
        name: &str,
        mut call: CallArguments,
        block: Option<&Block<'_>>,
        span: Span,
    ) -> Result<Value, EvalError> {
        if SEND_METHODS.contains(&name) {
            if call.positional.is_empty() {
                return Err(script_error("no method name given", span));
            }
            let method = call.positional.remove(0);
            let Some(method) = method.as_str() else {
                return Err(script_error(
                    format!("{} is not a symbol nor a string", method.inspect()),
                    span,
                ));
            };
            return self.dispatch(target, method, call, block, span);
        }

        if let Value::Scope = target {
            log::trace!("Dispatching '{name}' to the receiver");
            return self
                .receiver
                .invoke(name, call)
                .map_err(|error| call_error(error, name, span));
        }

        self.receiver
            .screen(name)
            .map_err(|error| call_error(error, name, span))?;

        match block {
            Some(block) => self.call_with_block(target, name, call, block, span),
            None => {
                let positional = positional_only(name, call, span)?;
                builtins::call(target, name, positional)
                    .map_err(|message| script_error(message, span))
            }
        }
    }

    fn call_with_block(
        &mut self,
        target: Value,
        name: &str,
        call: CallArguments,
        block: &Block<'_>,
        span: Span,
    ) -> Result<Value, EvalError> {
        let arguments = positional_only(name, call, span)?;
        if !arguments.is_empty() {
            return Err(script_error(
                format!(
                    "wrong number of arguments for '{name}' (given {}, expected 0)",
                    arguments.len()
                ),
                span,
            ));
        }
        match (name, target) {
            ("times", Value::Integer(count)) => {
                for index in 0..count.max(0) {
                    self.yield_to(block, vec![Value::Integer(index)])?;
                }
                Ok(Value::Integer(count))
            }
            ("each", Value::Array(items)) => {
                for item in &items {
                    self.yield_to(block, vec![item.clone()])?;
                }
                Ok(Value::Array(items))
            }
            ("each", Value::Hash(entries)) => {
                for (key, value) in &entries {
                    self.yield_to(block, vec![pair(key, value)])?;
                }
                Ok(Value::Hash(entries))
            }
            ("each_with_index", Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    self.yield_to(block, vec![item.clone(), Value::Integer(index as i64)])?;
                }
                Ok(Value::Array(items))
            }
            ("each_with_index", Value::Hash(entries)) => {
                for (index, (key, value)) in entries.iter().enumerate() {
                    self.yield_to(block, vec![pair(key, value), Value::Integer(index as i64)])?;
                }
                Ok(Value::Hash(entries))
            }
            ("map", target @ (Value::Array(_) | Value::Hash(_))) => elements(target)
                .into_iter()
                .map(|element| self.yield_to(block, vec![element]))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            ("select" | "reject", Value::Array(items)) => {
                let keep = name == "select";
                let mut selected = Vec::new();
                for item in items {
                    if self.yield_to(block, vec![item.clone()])?.is_truthy() == keep {
                        selected.push(item);
                    }
                }
                Ok(Value::Array(selected))
            }
            ("select" | "reject", Value::Hash(entries)) => {
                let keep = name == "select";
                let mut selected = IndexMap::new();
                for (key, value) in entries {
                    if self.yield_to(block, vec![pair(&key, &value)])?.is_truthy() == keep {
                        selected.insert(key, value);
                    }
                }
                Ok(Value::Hash(selected))
            }
            (name, target) => Err(script_error(
                format!(
                    "undefined method '{name}' with a block for an instance of {}",
                    target.type_name()
                ),
                span,
            )),
        }
    }

    /// Runs a block body in a new frame. Blocks see and update outer variables,
    /// variables first assigned inside stay inside.
    fn yield_to(&mut self, block: &Block<'_>, arguments: Vec<Value>) -> Result<Value, EvalError> {
        let arguments = match (block.parameters.len(), arguments.as_slice()) {
            (parameters, [Value::Array(items)]) if parameters > 1 => items.clone(),
            _ => arguments,
        };
        let mut frame = HashMap::new();
        for (index, parameter) in block.parameters.iter().enumerate() {
            frame.insert(
                parameter.to_string(),
                arguments.get(index).cloned().unwrap_or_default(),
            );
        }
        self.frames.push(frame);
        let result = self.run(&block.body);
        self.frames.pop();
        result
    }

    fn call_arguments(
        &mut self,
        arguments: &[Spanned<Argument<'_>>],
    ) -> Result<CallArguments, EvalError> {
        let mut call = CallArguments::default();
        for argument in arguments {
            match &argument.node {
                Argument::Positional(value) => call.positional.push(self.evaluate(value)?),
                Argument::Keyword { name, value } => {
                    let value = self.evaluate(value)?;
                    call.keywords.insert(name.to_string(), value);
                }
                Argument::DoubleSplat(hash) => match self.evaluate(hash)? {
                    Value::Hash(entries) => {
                        for (key, value) in entries {
                            let key = match key {
                                HashKey::Symbol(name) | HashKey::String(name) => name,
                                key => {
                                    return Err(script_error(
                                        format!("wrong argument type {} (expected Symbol)", Value::from(key).type_name()),
                                        argument.span,
                                    ));
                                }
                            };
                            call.keywords.insert(key, value);
                        }
                    }
                    Value::Nil => {}
                    other => {
                        return Err(script_error(
                            format!("no implicit conversion of {} into Hash", other.type_name()),
                            argument.span,
                        ));
                    }
                },
            }
        }
        Ok(call)
    }

    fn reach(&mut self, reach: Reach<'_>, span: Span) -> Result<Value, EvalError> {
        let name = match reach {
            Reach::InstanceVariable(name) | Reach::Constant(name) | Reach::Definition(name) => {
                name
            }
        };
        self.receiver
            .reach(reach)
            .map_err(|error| call_error(error, name, span))
    }

    fn variable(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    fn assign(&mut self, name: &str, value: Value) {
        if let Some(slot) = self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(name))
        {
            *slot = value;
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }
}

/// Value methods take positional arguments only, keywords arrive as a trailing hash.
fn positional_only(name: &str, call: CallArguments, span: Span) -> Result<Vec<Value>, EvalError> {
    let call = CallArguments {
        has_block: false,
        ..call
    };
    Signature::positional(0)
        .rest()
        .bind(call)
        .map(|arguments| arguments.into_parts().0)
        .map_err(|source| EvalError::Argument {
            method: name.to_string(),
            source,
            span: span.into_range(),
        })
}

fn elements(target: Value) -> Vec<Value> {
    match target {
        Value::Array(items) => items,
        Value::Hash(entries) => entries
            .into_iter()
            .map(|(key, value)| Value::Array(vec![key.into(), value]))
            .collect(),
        other => vec![other],
    }
}

fn pair(key: &HashKey, value: &Value) -> Value {
    Value::Array(vec![key.clone().into(), value.clone()])
}

fn hash_key(value: Value, span: Span) -> Result<HashKey, EvalError> {
    HashKey::try_from(value).map_err(|value| {
        script_error(
            format!("{} can't be used as a hash key", value.type_name()),
            span,
        )
    })
}

fn script_error(message: impl Into<String>, span: Span) -> EvalError {
    EvalError::Script {
        message: message.into(),
        span: span.into_range(),
    }
}

fn call_error(error: CallError, name: &str, span: Span) -> EvalError {
    match error {
        CallError::Denied(denial) => {
            log::debug!("Denied '{}' ({})", denial.identifier(), denial.kind());
            EvalError::Denied {
                denial,
                span: span.into_range(),
            }
        }
        CallError::Argument(source) => EvalError::Argument {
            method: name.to_string(),
            source,
            span: span.into_range(),
        },
        CallError::Method(error) => EvalError::Method(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Input, Parser, lexer, parser};
    use crate::sandbox::DenialKind;

    /// Receives every call and denies every reach, records what it saw.
    #[derive(Default)]
    struct Echo {
        calls: Vec<(String, CallArguments)>,
    }

    impl Receiver for Echo {
        fn invoke(&mut self, name: &str, arguments: CallArguments) -> Result<Value, CallError> {
            if name == "secret" {
                return Err(CallError::Denied(Denial::new(name, DenialKind::NotExposed)));
            }
            self.calls.push((name.to_string(), arguments));
            Ok(Value::symbol(name))
        }

        fn screen(&self, name: &str) -> Result<(), CallError> {
            match name {
                "instance_eval" => Err(CallError::Denied(Denial::new(
                    name,
                    DenialKind::MethodDefinition,
                ))),
                _ => Ok(()),
            }
        }

        fn reach(&mut self, reach: Reach<'_>) -> Result<Value, CallError> {
            let denial = match reach {
                Reach::InstanceVariable(name) => Denial::new(name, DenialKind::InstanceAccess),
                Reach::Constant(name) => Denial::new(name, DenialKind::ConstantAccess),
                Reach::Definition(name) => Denial::new(name, DenialKind::MethodDefinition),
            };
            Err(CallError::Denied(denial))
        }
    }

    fn run(code: &str, echo: &mut Echo) -> Result<Value, EvalError> {
        let tokens = lexer().parse(code).unwrap();
        let tokens = tokens
            .into_iter()
            .filter(|token| !matches!(token.node, crate::parser::Token::Comment(_)))
            .collect::<Vec<_>>();
        let end = code.len();
        let input = tokens.map(Span::from(end..end), |Spanned { node, span }| (node, span));
        let program = parser().parse(input).unwrap();
        Interpreter::new(echo).run(&program)
    }

    fn evaluate(code: &str) -> Value {
        run(code, &mut Echo::default()).unwrap()
    }

    #[test]
    fn test_arithmetic_and_variables() {
        assert_eq!(evaluate("x = 2\nx += 3\nx * 10 - 1"), Value::Integer(49));
        assert_eq!(evaluate("2 ** 3 ** 2"), Value::Integer(512));
        assert_eq!(evaluate("-2 + 5"), Value::Integer(3));
        assert_eq!(evaluate("'a' + \"b\""), Value::from("ab"));
    }

    #[test]
    fn test_control_flow() {
        assert_eq!(evaluate("if 1 > 2\n  :a\nelsif nil\n  :b\nelse\n  :c\nend"), Value::symbol("c"));
        assert_eq!(evaluate("x = 0\nx += 1 while x < 5\nx"), Value::Integer(5));
        assert_eq!(evaluate("i = 0\nwhile i < 3 do\n  i += 1\nend\ni"), Value::Integer(3));
        assert_eq!(evaluate(":skipped unless true"), Value::Nil);
        assert_eq!(evaluate("nil || false || 3"), Value::Integer(3));
    }

    #[test]
    fn test_blocks() {
        assert_eq!(
            evaluate("[1, 2, 3].map { |n| n * 2 }.sum"),
            Value::Integer(12)
        );
        assert_eq!(
            evaluate("total = 0\n{ a: 1, b: 2 }.each do |key, value|\n  total += value\nend\ntotal"),
            Value::Integer(3)
        );
        assert_eq!(
            evaluate("[1, 2, 3, 4].select { |n| n.even? }"),
            Value::from(vec![2_i64, 4])
        );
        assert_eq!(evaluate("n = 0\n3.times { |i| n += i }\nn"), Value::Integer(3));
    }

    #[test]
    fn test_block_locals_stay_inside() {
        let mut echo = Echo::default();
        let result = run("[1].each { |n| inner = n }\ninner", &mut echo).unwrap();
        assert_eq!(result, Value::symbol("inner"));
        assert_eq!(echo.calls.len(), 1);
    }

    #[test]
    fn test_receiverless_calls_go_to_receiver() {
        let mut echo = Echo::default();
        let result = run("method_1 'hello', kwarg: 1\nself.method_2\nsend(:method_3, 4)", &mut echo);
        assert_eq!(result.unwrap(), Value::symbol("method_3"));
        let names = echo.calls.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["method_1", "method_2", "method_3"]);
        assert_eq!(echo.calls[0].1.positional, vec![Value::from("hello")]);
        assert_eq!(echo.calls[0].1.keywords.get("kwarg"), Some(&Value::Integer(1)));
        assert_eq!(echo.calls[2].1.positional, vec![Value::Integer(4)]);
    }

    #[test]
    fn test_spaced_command_arguments() {
        let mut echo = Echo::default();
        run("method_1 -1\ntag [1, 2]\nx = 5\nx -1", &mut echo).unwrap();
        assert_eq!(echo.calls[0].1.positional, vec![Value::Integer(-1)]);
        assert_eq!(echo.calls[1].1.positional, vec![Value::from(vec![1_i64, 2])]);
        assert_eq!(echo.calls.len(), 2);
    }

    #[test]
    fn test_denials_carry_spans() {
        let mut echo = Echo::default();
        let error = run("x = 1\n@secret", &mut echo).unwrap_err();
        let EvalError::Denied { denial, span } = error else {
            panic!("Expected Denied, got {error:?}");
        };
        assert_eq!(denial.kind(), DenialKind::InstanceAccess);
        assert_eq!(span, 6..13);

        let error = run("'x'.instance_eval { 1 }", &mut echo).unwrap_err();
        assert_eq!(error.denial().map(Denial::kind), Some(DenialKind::MethodDefinition));

        let error = run("1.send(:instance_eval)", &mut echo).unwrap_err();
        assert_eq!(error.denial().map(Denial::kind), Some(DenialKind::MethodDefinition));
    }

    #[test]
    fn test_runtime_errors() {
        let error = run("1 / 0", &mut Echo::default()).unwrap_err();
        assert!(matches!(error, EvalError::Script { ref message, .. } if message == "divided by 0"));

        let error = run("raise 'boom'", &mut Echo::default()).unwrap_err();
        assert!(matches!(error, EvalError::Script { ref message, .. } if message == "boom"));

        let error = run("5.upcase", &mut Echo::default()).unwrap_err();
        assert!(matches!(error, EvalError::Script { .. }));
    }
}
