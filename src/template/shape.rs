//! Shape assertions over raw template nodes
//!
//! Each helper checks one structural expectation and reports a
//! [`CompileError::Shape`] quoting the offending node otherwise.

use serde_json::{Map, Value as Json};

use crate::error::{CompileError, Result};

fn show(x: &Json) -> String {
    serde_json::to_string(x).unwrap_or_else(|_| "<unprintable>".to_string())
}

/// A string; numbers are accepted and rendered in decimal
pub fn string(x: &Json) -> Result<String> {
    match x {
        Json::String(s) => Ok(s.clone()),
        Json::Number(n) => Ok(n.to_string()),
        other => Err(CompileError::shape(format!(
            "Expected string, got: {}",
            show(other)
        ))),
    }
}

/// A number; integer strings are accepted
pub fn number(x: &Json) -> Result<f64> {
    match x {
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| CompileError::shape(format!("Not a number: {}", n))),
        Json::String(s) => match s.parse::<i64>() {
            Ok(n) if n.to_string() == *s => Ok(n as f64),
            _ => Err(CompileError::shape(format!("Not a number: {}", s))),
        },
        other => Err(CompileError::shape(format!(
            "Expected number, got: {}",
            show(other)
        ))),
    }
}

/// A boolean; `"true"` and `"false"` are accepted
pub fn boolean(x: &Json) -> Result<bool> {
    match x {
        Json::Bool(b) => Ok(*b),
        Json::String(s) if s == "true" => Ok(true),
        Json::String(s) if s == "false" => Ok(false),
        other => Err(CompileError::shape(format!(
            "Expected boolean, got: {}",
            show(other)
        ))),
    }
}

pub fn object(x: &Json) -> Result<&Map<String, Json>> {
    match x {
        Json::Object(fields) => Ok(fields),
        other => Err(CompileError::shape(format!(
            "Expected object, got: {}",
            show(other)
        ))),
    }
}

/// A list, optionally restricted to the given lengths
pub fn list<'a>(x: &'a Json, lengths: &[usize]) -> Result<&'a [Json]> {
    match x {
        Json::Array(items) => {
            if !lengths.is_empty() && !lengths.contains(&items.len()) {
                let allowed: Vec<String> = lengths.iter().map(|l| l.to_string()).collect();
                return Err(CompileError::shape(format!(
                    "Expected list of length {}, got {}",
                    allowed.join(","),
                    items.len()
                )));
            }
            Ok(items)
        }
        other => Err(CompileError::shape(format!(
            "Expected list, got: {}",
            show(other)
        ))),
    }
}

/// A list whose elements all satisfy `assert`; failures report `form`
pub fn list_of_form<T>(
    x: &Json,
    form: &str,
    assert: impl Fn(&Json) -> Result<T>,
) -> Result<Vec<T>> {
    let items = list(x, &[])
        .and_then(|items| items.iter().map(&assert).collect::<Result<Vec<T>>>());
    items.map_err(|_| {
        CompileError::shape(format!("Expected list of form {}, got: {}", form, show(x)))
    })
}

pub fn field<'a>(xs: &'a Map<String, Json>, name: &str) -> Result<&'a Json> {
    xs.get(name)
        .ok_or_else(|| CompileError::shape(format!("Expected field named '{}'", name)))
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Exactly one of `names` is present; returns it
pub fn exactly_one_of_fields<'n>(xs: &Map<String, Json>, names: &[&'n str]) -> Result<&'n str> {
    let found: Vec<&str> = names.iter().copied().filter(|n| xs.contains_key(*n)).collect();
    if found.len() != 1 {
        return Err(CompileError::shape(format!(
            "Expected exactly one of the fields {}, got: {}",
            quoted(names),
            show(&Json::Object(xs.clone()))
        )));
    }
    Ok(found[0])
}

/// At most one of `names` is present
pub fn at_most_one_of_fields<'n>(
    xs: &Map<String, Json>,
    names: &[&'n str],
) -> Result<Option<&'n str>> {
    let found: Vec<&str> = names.iter().copied().filter(|n| xs.contains_key(*n)).collect();
    if found.len() > 1 {
        return Err(CompileError::shape(format!(
            "Expected at most one of the fields {}, got: {}",
            quoted(names),
            show(&Json::Object(xs.clone()))
        )));
    }
    Ok(found.first().copied())
}

/// A single-key object; returns its key and value
pub fn one_field(x: &Json) -> Result<(&str, &Json)> {
    let fields = object(x)?;
    match fields.iter().next() {
        Some((key, value)) if fields.len() == 1 => Ok((key.as_str(), value)),
        _ => Err(CompileError::shape(format!(
            "Expected exactly one field, got: {}",
            show(x)
        ))),
    }
}

/// Every key of `xs` is one of `allowed`
pub fn known_fields(xs: &Map<String, Json>, allowed: &[&str], context: &str) -> Result<()> {
    match xs.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(unknown) => Err(CompileError::shape(format!(
            "{}: unknown field '{}', expected one of {}",
            context,
            unknown,
            quoted(allowed)
        ))),
        None => Ok(()),
    }
}

/// A string or a list of strings, normalized to a list
pub fn string_or_list(x: &Json) -> Result<Vec<String>> {
    match x {
        Json::String(s) => Ok(vec![s.clone()]),
        Json::Array(items) => {
            let non_strings: Vec<String> = items
                .iter()
                .filter(|i| !i.is_string())
                .map(show)
                .collect();
            if !non_strings.is_empty() {
                return Err(CompileError::shape(format!(
                    "Expected all strings in array, found: {}",
                    non_strings.join(", ")
                )));
            }
            Ok(items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect())
        }
        other => Err(CompileError::shape(format!(
            "Expected string or list of strings, got: {}",
            show(other)
        ))),
    }
}

/// One of a fixed set of string choices
pub fn one_of<'a>(x: &'a Json, allowed: &[&str]) -> Result<&'a str> {
    match x.as_str() {
        Some(s) if allowed.contains(&s) => Ok(s),
        _ => Err(CompileError::shape(format!(
            "Expected one of {}, got: {}",
            allowed.join("|"),
            show(x)
        ))),
    }
}
