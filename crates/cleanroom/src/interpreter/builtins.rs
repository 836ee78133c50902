use super::operators::{binary, compare, equals};
use crate::parser::BinaryOperator;
use crate::value::{HashKey, Value};
use std::cmp::Ordering;

/// Methods every value answers without a block.
///
/// There are no in-place mutators, `freeze` and `dup` return the value itself.
pub(super) fn call(value: Value, name: &str, arguments: Vec<Value>) -> Result<Value, String> {
    let arity = |expected: usize| check_arity(name, &arguments, expected..=expected);
    match (name, value) {
        ("to_s", value) => {
            arity(0)?;
            Ok(Value::String(value.to_string()))
        }
        ("inspect", value) => {
            arity(0)?;
            Ok(Value::String(value.inspect()))
        }
        ("nil?", value) => {
            arity(0)?;
            Ok(Value::Bool(value.is_nil()))
        }
        ("frozen?", _) => {
            arity(0)?;
            Ok(Value::Bool(true))
        }
        ("freeze" | "dup", value) => {
            arity(0)?;
            Ok(value)
        }
        ("==", value) => {
            arity(1)?;
            Ok(Value::Bool(equals(&value, &arguments[0])))
        }
        ("!=", value) => {
            arity(1)?;
            Ok(Value::Bool(!equals(&value, &arguments[0])))
        }
        (name, Value::Nil) => nil_method(name, &arguments),
        (name, Value::Integer(integer)) => integer_method(name, integer, &arguments),
        (name, Value::Float(float)) => float_method(name, float, &arguments),
        (name, Value::String(text)) => string_method(name, text, &arguments),
        (name, Value::Symbol(symbol)) => symbol_method(name, symbol, &arguments),
        (name, Value::Array(items)) => array_method(name, items, arguments),
        (name, Value::Hash(entries)) => hash_method(name, entries, arguments),
        (name, value) => Err(undefined(name, &value)),
    }
}

/// `value[index]`.
pub(super) fn index(target: Value, index: Value) -> Result<Value, String> {
    match (target, index) {
        (Value::Array(items), Value::Integer(index)) => Ok(at(&items, index).unwrap_or_default()),
        (Value::String(text), Value::Integer(index)) => {
            let characters = text.chars().map(|c| Value::String(c.to_string())).collect::<Vec<_>>();
            Ok(at(&characters, index).unwrap_or_default())
        }
        (Value::Hash(entries), key) => Ok(HashKey::try_from(key)
            .ok()
            .and_then(|key| entries.get(&key).cloned())
            .unwrap_or_default()),
        (target, index) => Err(format!(
            "no implicit conversion of {} into Integer for {}",
            index.type_name(),
            target.type_name()
        )),
    }
}

fn nil_method(name: &str, arguments: &[Value]) -> Result<Value, String> {
    check_arity(name, arguments, 0..=0)?;
    match name {
        "to_i" => Ok(Value::Integer(0)),
        "to_f" => Ok(Value::Float(0.0)),
        "to_a" => Ok(Value::Array(Vec::new())),
        _ => Err(undefined(name, &Value::Nil)),
    }
}

fn integer_method(name: &str, integer: i64, arguments: &[Value]) -> Result<Value, String> {
    check_arity(name, arguments, 0..=0)?;
    match name {
        "to_i" => Ok(Value::Integer(integer)),
        "to_f" => Ok(Value::Float(integer as f64)),
        "abs" => integer
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| "integer overflow in 'abs'".to_string()),
        "zero?" => Ok(Value::Bool(integer == 0)),
        "even?" => Ok(Value::Bool(integer % 2 == 0)),
        "odd?" => Ok(Value::Bool(integer % 2 != 0)),
        _ => Err(undefined(name, &Value::Integer(integer))),
    }
}

fn float_method(name: &str, float: f64, arguments: &[Value]) -> Result<Value, String> {
    check_arity(name, arguments, 0..=0)?;
    match name {
        "to_i" if float.is_finite() => Ok(Value::Integer(float.trunc() as i64)),
        "to_i" => Err(format!("{float} can't be converted to Integer")),
        "to_f" => Ok(Value::Float(float)),
        "abs" => Ok(Value::Float(float.abs())),
        "zero?" => Ok(Value::Bool(float == 0.0)),
        _ => Err(undefined(name, &Value::Float(float))),
    }
}

fn string_method(name: &str, text: String, arguments: &[Value]) -> Result<Value, String> {
    let arity = |range| check_arity(name, arguments, range);
    match name {
        "to_i" => {
            arity(0..=0)?;
            Ok(Value::Integer(leading_integer(&text)))
        }
        "to_f" => {
            arity(0..=0)?;
            Ok(Value::Float(text.trim().parse().unwrap_or(0.0)))
        }
        "to_sym" => {
            arity(0..=0)?;
            Ok(Value::Symbol(text))
        }
        "upcase" => {
            arity(0..=0)?;
            Ok(Value::String(text.to_uppercase()))
        }
        "downcase" => {
            arity(0..=0)?;
            Ok(Value::String(text.to_lowercase()))
        }
        "capitalize" => {
            arity(0..=0)?;
            let mut characters = text.chars();
            Ok(Value::String(match characters.next() {
                Some(first) => first.to_uppercase().chain(characters.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            }))
        }
        "strip" => {
            arity(0..=0)?;
            Ok(Value::String(text.trim().to_string()))
        }
        "reverse" => {
            arity(0..=0)?;
            Ok(Value::String(text.chars().rev().collect()))
        }
        "length" | "size" => {
            arity(0..=0)?;
            Ok(Value::Integer(text.chars().count() as i64))
        }
        "empty?" => {
            arity(0..=0)?;
            Ok(Value::Bool(text.is_empty()))
        }
        "split" => {
            arity(0..=1)?;
            let parts: Vec<&str> = match arguments.first() {
                None | Some(Value::Nil) => text.split_whitespace().collect(),
                Some(Value::String(separator)) if separator == " " => {
                    text.split_whitespace().collect()
                }
                Some(Value::String(separator)) => text.split(separator.as_str()).collect(),
                Some(other) => return Err(wrong_type(other, "String")),
            };
            Ok(Value::from(parts))
        }
        "include?" | "start_with?" | "end_with?" => {
            arity(1..=1)?;
            let Value::String(pattern) = &arguments[0] else {
                return Err(wrong_type(&arguments[0], "String"));
            };
            Ok(Value::Bool(match name {
                "include?" => text.contains(pattern.as_str()),
                "start_with?" => text.starts_with(pattern.as_str()),
                _ => text.ends_with(pattern.as_str()),
            }))
        }
        _ => Err(undefined(name, &Value::String(text))),
    }
}

fn symbol_method(name: &str, symbol: String, arguments: &[Value]) -> Result<Value, String> {
    check_arity(name, arguments, 0..=0)?;
    match name {
        "to_sym" => Ok(Value::Symbol(symbol)),
        "length" | "size" => Ok(Value::Integer(symbol.chars().count() as i64)),
        "upcase" => Ok(Value::Symbol(symbol.to_uppercase())),
        "downcase" => Ok(Value::Symbol(symbol.to_lowercase())),
        "empty?" => Ok(Value::Bool(symbol.is_empty())),
        _ => Err(undefined(name, &Value::Symbol(symbol))),
    }
}

fn array_method(name: &str, items: Vec<Value>, arguments: Vec<Value>) -> Result<Value, String> {
    let arity = |range| check_arity(name, &arguments, range);
    match name {
        "to_a" | "entries" => {
            arity(0..=0)?;
            Ok(Value::Array(items))
        }
        "length" | "size" | "count" => {
            arity(0..=0)?;
            Ok(Value::Integer(items.len() as i64))
        }
        "empty?" => {
            arity(0..=0)?;
            Ok(Value::Bool(items.is_empty()))
        }
        "first" | "last" => {
            arity(0..=1)?;
            let from_end = name == "last";
            match arguments.first() {
                None => {
                    let item = if from_end { items.last() } else { items.first() };
                    Ok(item.cloned().unwrap_or_default())
                }
                Some(Value::Integer(count)) => {
                    let count = usize::try_from(*count)
                        .map_err(|_| "negative array size".to_string())?
                        .min(items.len());
                    Ok(Value::Array(if from_end {
                        items[items.len() - count..].to_vec()
                    } else {
                        items[..count].to_vec()
                    }))
                }
                Some(other) => Err(wrong_type(other, "Integer")),
            }
        }
        "include?" => {
            arity(1..=1)?;
            Ok(Value::Bool(items.iter().any(|item| equals(item, &arguments[0]))))
        }
        "reverse" => {
            arity(0..=0)?;
            Ok(Value::Array(items.into_iter().rev().collect()))
        }
        "join" => {
            arity(0..=1)?;
            let separator = match arguments.first() {
                None | Some(Value::Nil) => String::new(),
                Some(Value::String(separator)) => separator.clone(),
                Some(other) => return Err(wrong_type(other, "String")),
            };
            let parts = items.iter().map(Value::to_string).collect::<Vec<_>>();
            Ok(Value::String(parts.join(&separator)))
        }
        "sum" => {
            arity(0..=0)?;
            items
                .into_iter()
                .try_fold(Value::Integer(0), |sum, item| binary(BinaryOperator::Add, sum, item))
        }
        "min" | "max" => {
            arity(0..=0)?;
            let wanted = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<Value> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let ordering = compare(&item, &current).ok_or_else(|| {
                            format!("comparison of {} with {} failed", item.type_name(), current.inspect())
                        })?;
                        if ordering == wanted { item } else { current }
                    }
                });
            }
            Ok(best.unwrap_or_default())
        }
        "sort" => {
            arity(0..=0)?;
            sorted(items).map(Value::Array)
        }
        "uniq" => {
            arity(0..=0)?;
            let mut unique: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            Ok(Value::Array(unique))
        }
        "compact" => {
            arity(0..=0)?;
            Ok(Value::Array(items.into_iter().filter(|item| !item.is_nil()).collect()))
        }
        "fetch" => {
            arity(1..=2)?;
            let Value::Integer(index) = arguments[0] else {
                return Err(wrong_type(&arguments[0], "Integer"));
            };
            at(&items, index)
                .or_else(|| arguments.get(1).cloned())
                .ok_or_else(|| format!("index {index} outside of array bounds"))
        }
        _ => Err(undefined(name, &Value::Array(items))),
    }
}

fn hash_method(
    name: &str,
    entries: indexmap::IndexMap<HashKey, Value>,
    arguments: Vec<Value>,
) -> Result<Value, String> {
    let arity = |range| check_arity(name, &arguments, range);
    match name {
        "to_h" => {
            arity(0..=0)?;
            Ok(Value::Hash(entries))
        }
        "to_a" => {
            arity(0..=0)?;
            Ok(Value::Array(
                entries
                    .into_iter()
                    .map(|(key, value)| Value::Array(vec![key.into(), value]))
                    .collect(),
            ))
        }
        "length" | "size" | "count" => {
            arity(0..=0)?;
            Ok(Value::Integer(entries.len() as i64))
        }
        "empty?" => {
            arity(0..=0)?;
            Ok(Value::Bool(entries.is_empty()))
        }
        "keys" => {
            arity(0..=0)?;
            Ok(Value::Array(entries.into_keys().map(Value::from).collect()))
        }
        "values" => {
            arity(0..=0)?;
            Ok(Value::Array(entries.into_values().collect()))
        }
        "key?" | "has_key?" | "include?" => {
            arity(1..=1)?;
            Ok(Value::Bool(
                HashKey::try_from(arguments[0].clone()).is_ok_and(|key| entries.contains_key(&key)),
            ))
        }
        "fetch" => {
            arity(1..=2)?;
            let key = arguments[0].clone();
            HashKey::try_from(key.clone())
                .ok()
                .and_then(|key| entries.get(&key).cloned())
                .or_else(|| arguments.get(1).cloned())
                .ok_or_else(|| format!("key not found: {}", key.inspect()))
        }
        "merge" => {
            arity(1..=1)?;
            let Value::Hash(other) = &arguments[0] else {
                return Err(wrong_type(&arguments[0], "Hash"));
            };
            let mut merged = entries;
            merged.extend(other.clone());
            Ok(Value::Hash(merged))
        }
        _ => Err(undefined(name, &Value::Hash(entries))),
    }
}

fn sorted(mut items: Vec<Value>) -> Result<Vec<Value>, String> {
    let mut failure = None;
    items.sort_by(|a, b| {
        compare(a, b).unwrap_or_else(|| {
            failure.get_or_insert_with(|| {
                format!("comparison of {} with {} failed", a.type_name(), b.inspect())
            });
            Ordering::Equal
        })
    });
    match failure {
        Some(message) => Err(message),
        None => Ok(items),
    }
}

/// Ruby-style index, negative counts from the end.
fn at(items: &[Value], index: i64) -> Option<Value> {
    let index = if index < 0 {
        items.len().checked_sub(usize::try_from(index.unsigned_abs()).ok()?)?
    } else {
        usize::try_from(index).ok()?
    };
    items.get(index).cloned()
}

fn leading_integer(text: &str) -> i64 {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .take_while(|(index, character)| {
            character.is_ascii_digit() || (*index == 0 && matches!(character, '-' | '+'))
        })
        .map(|(index, character)| index + character.len_utf8())
        .last()
        .unwrap_or(0);
    text[..end].parse().unwrap_or(0)
}

fn check_arity(
    name: &str,
    arguments: &[Value],
    expected: std::ops::RangeInclusive<usize>,
) -> Result<(), String> {
    if expected.contains(&arguments.len()) {
        return Ok(());
    }
    let expected = if expected.start() == expected.end() {
        expected.start().to_string()
    } else {
        format!("{}..{}", expected.start(), expected.end())
    };
    Err(format!(
        "wrong number of arguments for '{name}' (given {}, expected {expected})",
        arguments.len()
    ))
}

fn undefined(name: &str, value: &Value) -> String {
    format!("undefined method '{name}' for an instance of {}", value.type_name())
}

fn wrong_type(value: &Value, expected: &str) -> String {
    format!("no implicit conversion of {} into {expected}", value.type_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_on(value: impl Into<Value>, name: &str, arguments: Vec<Value>) -> Value {
        call(value.into(), name, arguments).unwrap()
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(call_on("hello", "capitalize", vec![]), Value::from("Hello"));
        assert_eq!(call_on(" 42abc", "to_i", vec![]), Value::Integer(42));
        assert_eq!(call_on("-7", "to_i", vec![]), Value::Integer(-7));
        assert_eq!(
            call_on("a,b", "split", vec![Value::from(",")]),
            Value::from(vec!["a", "b"])
        );
        assert_eq!(call_on("héllo", "length", vec![]), Value::Integer(5));
        assert_eq!(call_on("name", "to_sym", vec![]), Value::symbol("name"));
    }

    #[test]
    fn test_array_methods() {
        let items = vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)];
        assert_eq!(call_on(items.clone(), "sum", vec![]), Value::Integer(6));
        assert_eq!(call_on(items.clone(), "max", vec![]), Value::Integer(3));
        assert_eq!(
            call_on(items.clone(), "sort", vec![]),
            Value::from(vec![1_i64, 2, 3])
        );
        assert_eq!(call_on(items.clone(), "last", vec![Value::Integer(2)]), Value::from(vec![1_i64, 2]));
        assert_eq!(call_on(items.clone(), "join", vec![Value::from("-")]), Value::from("3-1-2"));
        assert_eq!(index(Value::from(items), Value::Integer(-1)), Ok(Value::Integer(2)));
    }

    #[test]
    fn test_sort_of_mixed_types_fails() {
        let items = vec![Value::Integer(1), Value::from("a")];
        assert!(call(Value::Array(items), "sort", vec![]).is_err());
    }

    #[test]
    fn test_hash_methods() {
        let mut entries = indexmap::IndexMap::new();
        entries.insert(HashKey::Symbol("a".into()), Value::Integer(1));
        let hash = Value::Hash(entries);
        assert_eq!(call_on(hash.clone(), "key?", vec![Value::symbol("a")]), Value::Bool(true));
        assert_eq!(call_on(hash.clone(), "keys", vec![]), Value::Array(vec![Value::symbol("a")]));
        assert_eq!(
            call_on(hash.clone(), "fetch", vec![Value::symbol("b"), Value::Nil]),
            Value::Nil
        );
        assert_eq!(
            call(hash, "fetch", vec![Value::symbol("b")]),
            Err("key not found: :b".to_string())
        );
    }

    #[test]
    fn test_unknown_method_and_arity() {
        assert_eq!(
            call(Value::Integer(1), "upcase", vec![]),
            Err("undefined method 'upcase' for an instance of Integer".to_string())
        );
        assert_eq!(
            call(Value::Nil, "to_s", vec![Value::Nil]),
            Err("wrong number of arguments for 'to_s' (given 1, expected 0)".to_string())
        );
    }
}
