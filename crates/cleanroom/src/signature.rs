use crate::value::{HashKey, Value};
use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

/// Parameter kinds of an exposed method.
///
/// Argument binding looks only at these, never at the shape of the values
/// written in the script: a hash passed positionally stays positional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    required: usize,
    optional: usize,
    rest: bool,
    keywords: Vec<KeywordParameter>,
    keyword_rest: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordParameter {
    pub name: String,
    /// `None` marks a required keyword.
    pub default: Option<Value>,
}

impl Signature {
    pub fn positional(required: usize) -> Self {
        Self {
            required,
            ..Self::default()
        }
    }

    pub fn optional(mut self, optional: usize) -> Self {
        self.optional = optional;
        self
    }

    pub fn rest(mut self) -> Self {
        self.rest = true;
        self
    }

    pub fn keyword(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.keywords.push(KeywordParameter {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn required_keyword(mut self, name: impl Into<String>) -> Self {
        self.keywords.push(KeywordParameter {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn keyword_rest(mut self) -> Self {
        self.keyword_rest = true;
        self
    }

    pub fn accepts_keywords(&self) -> bool {
        !self.keywords.is_empty() || self.keyword_rest
    }

    pub fn keywords(&self) -> &[KeywordParameter] {
        &self.keywords
    }

    fn expected(&self) -> String {
        match (self.optional, self.rest) {
            (_, true) => format!("{}+", self.required),
            (0, false) => self.required.to_string(),
            (optional, false) => format!("{}..{}", self.required, self.required + optional),
        }
    }

    /// Binds the written arguments of a call onto this signature.
    pub fn bind(&self, call: CallArguments) -> Result<Arguments, ArgumentError> {
        let CallArguments {
            mut positional,
            keywords,
            has_block,
        } = call;

        // Adapters receive values only, a block has nowhere to go
        if has_block {
            return Err(ArgumentError::UnexpectedBlock);
        }

        let keywords = if self.accepts_keywords() {
            self.bind_keywords(keywords)?
        } else {
            if !keywords.is_empty() {
                let hash = keywords
                    .into_iter()
                    .map(|(name, value)| (HashKey::Symbol(name), value))
                    .collect::<IndexMap<_, _>>();
                positional.push(Value::Hash(hash));
            }
            IndexMap::new()
        };

        let given = positional.len();
        if given < self.required || (!self.rest && given > self.required + self.optional) {
            return Err(ArgumentError::Arity {
                given,
                expected: self.expected(),
            });
        }

        log::trace!("bound {given} positional and {} keyword arguments", keywords.len());
        Ok(Arguments {
            positional,
            keywords,
        })
    }

    fn bind_keywords(
        &self,
        mut written: IndexMap<String, Value>,
    ) -> Result<IndexMap<String, Value>, ArgumentError> {
        let mut bound = IndexMap::new();
        let mut missing = Vec::new();
        for parameter in &self.keywords {
            match (written.shift_remove(&parameter.name), &parameter.default) {
                (Some(value), _) => {
                    bound.insert(parameter.name.clone(), value);
                }
                (None, Some(default)) => {
                    bound.insert(parameter.name.clone(), default.clone());
                }
                (None, None) => missing.push(parameter.name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(ArgumentError::MissingKeywords(missing));
        }
        if !written.is_empty() {
            if !self.keyword_rest {
                return Err(ArgumentError::UnknownKeywords(written.into_keys().collect()));
            }
            bound.extend(written);
        }
        Ok(bound)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parameters = Vec::new();
        parameters.extend((1..=self.required).map(|index| format!("arg_{index}")));
        parameters.extend(
            (1..=self.optional).map(|index| format!("arg_{} = nil", self.required + index)),
        );
        if self.rest {
            parameters.push("*rest".to_string());
        }
        for parameter in &self.keywords {
            match &parameter.default {
                Some(default) => parameters.push(format!("{}: {}", parameter.name, default.inspect())),
                None => parameters.push(format!("{}:", parameter.name)),
            }
        }
        if self.keyword_rest {
            parameters.push("**options".to_string());
        }
        write!(f, "({})", parameters.join(", "))
    }
}

/// Arguments as written at a call site, after `**hash` expansion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArguments {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
    pub has_block: bool,
}

impl CallArguments {
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Arguments bound to a [`Signature`], handed to a method adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    positional: Vec<Value>,
    keywords: IndexMap<String, Value>,
}

impl Arguments {
    /// Positional argument at `index`, `nil` when an optional one was not written.
    pub fn get(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or_default()
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Keyword argument, `nil` when the method has no such keyword.
    pub fn keyword(&self, name: &str) -> Value {
        self.keywords.get(name).cloned().unwrap_or_default()
    }

    pub fn keywords(&self) -> &IndexMap<String, Value> {
        &self.keywords
    }

    pub fn into_parts(self) -> (Vec<Value>, IndexMap<String, Value>) {
        (self.positional, self.keywords)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArgumentError {
    #[error("wrong number of arguments (given {given}, expected {expected})")]
    Arity { given: usize, expected: String },
    #[error("missing keyword{}: {}", plural(.0), join_keywords(.0))]
    MissingKeywords(Vec<String>),
    #[error("unknown keyword{}: {}", plural(.0), join_keywords(.0))]
    UnknownKeywords(Vec<String>),
    #[error("no block accepted")]
    UnexpectedBlock,
}

fn plural(names: &[String]) -> &'static str {
    if names.len() == 1 { "" } else { "s" }
}

fn join_keywords(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!(":{name}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(entries: &[(&str, Value)]) -> IndexMap<String, Value> {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_keywords_fill_defaults() {
        let signature = Signature::positional(1).keyword("kwarg_1", "kwarg_value_1");
        let arguments = signature
            .bind(CallArguments::positional([Value::from("v")]))
            .unwrap();
        assert_eq!(arguments.get(0), Value::from("v"));
        assert_eq!(arguments.keyword("kwarg_1"), Value::from("kwarg_value_1"));
    }

    #[test]
    fn test_keywords_become_trailing_hash_without_keyword_parameters() {
        let signature = Signature::positional(1);
        let call = CallArguments {
            positional: Vec::new(),
            keywords: keywords(&[("a", Value::Integer(1))]),
            has_block: false,
        };
        let arguments = signature.bind(call).unwrap();
        let Value::Hash(hash) = arguments.get(0) else {
            panic!("Expected Hash, got {:?}", arguments.get(0));
        };
        assert_eq!(hash.get(&HashKey::Symbol("a".into())), Some(&Value::Integer(1)));
        assert!(arguments.keywords().is_empty());
    }

    #[test]
    fn test_positional_hash_is_never_expanded() {
        let signature = Signature::positional(1).keyword("kwarg_1", Value::Nil);
        let mut hash = IndexMap::new();
        hash.insert(HashKey::Symbol("kwarg_1".into()), Value::from("x"));
        let arguments = signature
            .bind(CallArguments::positional([Value::Hash(hash.clone())]))
            .unwrap();
        assert_eq!(arguments.get(0), Value::Hash(hash));
        assert_eq!(arguments.keyword("kwarg_1"), Value::Nil);
    }

    #[test]
    fn test_arity_errors() {
        let signature = Signature::positional(0).optional(1);
        let error = signature
            .bind(CallArguments::positional([Value::Nil, Value::Nil]))
            .unwrap_err();
        assert_eq!(error.to_string(), "wrong number of arguments (given 2, expected 0..1)");

        let error = Signature::positional(1)
            .rest()
            .bind(CallArguments::default())
            .unwrap_err();
        assert_eq!(error.to_string(), "wrong number of arguments (given 0, expected 1+)");
    }

    #[test]
    fn test_keyword_errors() {
        let signature = Signature::positional(0).required_keyword("name");
        assert_eq!(
            signature.bind(CallArguments::default()).unwrap_err(),
            ArgumentError::MissingKeywords(vec!["name".into()])
        );

        let call = CallArguments {
            keywords: keywords(&[("name", Value::Nil), ("other", Value::Nil)]),
            ..CallArguments::default()
        };
        let error = signature.bind(call).unwrap_err();
        assert_eq!(error.to_string(), "unknown keyword: :other");
    }

    #[test]
    fn test_keyword_rest_collects_unknown() {
        let signature = Signature::positional(0).keyword_rest();
        let call = CallArguments {
            keywords: keywords(&[("x", Value::Integer(1))]),
            ..CallArguments::default()
        };
        let arguments = signature.bind(call).unwrap();
        assert_eq!(arguments.keyword("x"), Value::Integer(1));
    }

    #[test]
    fn test_block_is_rejected() {
        let call = CallArguments {
            has_block: true,
            ..CallArguments::default()
        };
        assert_eq!(
            Signature::positional(0).bind(call).unwrap_err(),
            ArgumentError::UnexpectedBlock
        );
    }

    #[test]
    fn test_display() {
        let signature = Signature::positional(1).keyword("version", Value::Nil);
        assert_eq!(signature.to_string(), "(arg_1, version: nil)");
        assert_eq!(Signature::positional(0).rest().to_string(), "(*rest)");
    }
}
