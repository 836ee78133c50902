use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt;

/// A script value.
///
/// `Scope` is what `self` evaluates to: an opaque token for the evaluation scope.
/// It never refers to the target instance, calls on it go back through the scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),
    Array(Vec<Value>),
    Hash(IndexMap<HashKey, Value>),
    Scope,
}

/// Values usable as hash keys. Floats, arrays and hashes are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Nil,
    Bool(bool),
    Integer(i64),
    String(String),
    Symbol(String),
}

impl Value {
    pub fn symbol(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "NilClass",
            Self::Bool(true) => "TrueClass",
            Self::Bool(false) => "FalseClass",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Symbol(_) => "Symbol",
            Self::Array(_) => "Array",
            Self::Hash(_) => "Hash",
            Self::Scope => "Cleanroom",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) | Self::Symbol(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(integer) => Some(*integer),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(boolean) => Some(*boolean),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&IndexMap<HashKey, Value>> {
        match self {
            Self::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    /// Script-facing representation, as `p` would print it.
    pub fn inspect(&self) -> String {
        match self {
            Self::Nil => "nil".to_string(),
            Self::String(text) => format!("{text:?}"),
            Self::Symbol(name) => format!(":{name}"),
            Self::Array(items) => {
                let items = items.iter().map(Value::inspect).collect::<Vec<_>>();
                format!("[{}]", items.join(", "))
            }
            Self::Hash(entries) => {
                if entries.is_empty() {
                    return "{}".to_string();
                }
                let entries = entries
                    .iter()
                    .map(|(key, value)| match key {
                        HashKey::Symbol(name) => format!("{name}: {}", value.inspect()),
                        key => format!("{} => {}", key.inspect(), value.inspect()),
                    })
                    .collect::<Vec<_>>();
                format!("{{ {} }}", entries.join(", "))
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => Ok(()),
            Self::Bool(boolean) => write!(f, "{boolean}"),
            Self::Integer(integer) => write!(f, "{integer}"),
            Self::Float(float) if float.fract() == 0.0 && float.is_finite() => {
                write!(f, "{float:.1}")
            }
            Self::Float(float) => write!(f, "{float}"),
            Self::String(text) | Self::Symbol(text) => write!(f, "{text}"),
            Self::Array(_) | Self::Hash(_) => write!(f, "{}", self.inspect()),
            Self::Scope => write!(f, "main"),
        }
    }
}

impl HashKey {
    pub fn inspect(&self) -> String {
        Value::from(self.clone()).inspect()
    }
}

impl TryFrom<Value> for HashKey {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Nil => Ok(Self::Nil),
            Value::Bool(boolean) => Ok(Self::Bool(boolean)),
            Value::Integer(integer) => Ok(Self::Integer(integer)),
            Value::String(text) => Ok(Self::String(text)),
            Value::Symbol(name) => Ok(Self::Symbol(name)),
            other => Err(other),
        }
    }
}

impl From<HashKey> for Value {
    fn from(key: HashKey) -> Self {
        match key {
            HashKey::Nil => Self::Nil,
            HashKey::Bool(boolean) => Self::Bool(boolean),
            HashKey::Integer(integer) => Self::Integer(integer),
            HashKey::String(text) => Self::String(text),
            HashKey::Symbol(name) => Self::Symbol(name),
        }
    }
}

impl From<bool> for Value {
    fn from(boolean: bool) -> Self {
        Self::Bool(boolean)
    }
}

impl From<i64> for Value {
    fn from(integer: i64) -> Self {
        Self::Integer(integer)
    }
}

impl From<f64> for Value {
    fn from(float: f64) -> Self {
        Self::Float(float)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::String(text)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<HashKey, Value>> for Value {
    fn from(hash: IndexMap<HashKey, Value>) -> Self {
        Self::Hash(hash)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nil => serializer.serialize_unit(),
            Self::Bool(boolean) => serializer.serialize_bool(*boolean),
            Self::Integer(integer) => serializer.serialize_i64(*integer),
            Self::Float(float) => serializer.serialize_f64(*float),
            Self::String(text) | Self::Symbol(text) => serializer.serialize_str(text),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Hash(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    let key = match key {
                        HashKey::String(text) | HashKey::Symbol(text) => text.clone(),
                        other => Value::from(other.clone()).to_string(),
                    };
                    map.serialize_entry(&key, value)?;
                }
                map.end()
            }
            Self::Scope => serializer.serialize_str("self"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn test_inspect_and_to_s() {
        let mut hash = IndexMap::new();
        hash.insert(HashKey::Symbol("name".into()), Value::from("x"));
        hash.insert(HashKey::Integer(1), Value::Array(vec![Value::Nil, Value::symbol("a")]));
        let value = Value::Hash(hash);
        assert_eq!(value.inspect(), r#"{ name: "x", 1 => [nil, :a] }"#);
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Nil.to_string(), "");
        assert_eq!(Value::symbol("ok").to_string(), "ok");
    }

    #[test]
    fn test_hash_key_rejects_floats() {
        assert!(HashKey::try_from(Value::Float(1.0)).is_err());
        assert_eq!(HashKey::try_from(Value::from("k")), Ok(HashKey::String("k".into())));
    }

    #[test]
    fn test_serialize() {
        let mut hash = IndexMap::new();
        hash.insert(HashKey::Symbol("tags".into()), Value::from(vec!["a", "b"]));
        hash.insert(HashKey::Integer(2), Value::Nil);
        let json = serde_json::to_string(&Value::Hash(hash)).unwrap();
        assert_eq!(json, r#"{"tags":["a","b"],"2":null}"#);
    }
}
