//! Target runtime: the object-construction library the evaluator drives
//!
//! The evaluator never builds infrastructure objects itself. It hands
//! fully evaluated arguments to a [`TargetRuntime`] and stores whatever
//! comes back. [`MemoryRuntime`] is an in-memory implementation that
//! records the produced object graph.

mod memory;

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::template::{RetentionPolicy, TemplateParameter};

pub use memory::{CallKey, Handler, MemoryRuntime, ObjectKind, ObjectRecord};

/// Failure surfaced by the target runtime
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Opaque handle to a live object owned by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub usize);

/// A value produced or consumed by the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value: result of a void call or an omitted optional argument
    Void,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    /// A live object
    Instance(InstanceId),
    /// Placeholder only materializable at a later synthesis stage,
    /// carried in its rendered form
    Token(serde_json::Value),
}

impl Value {
    /// Convert a literal JSON value
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as JSON; instances render as `{"$instance": n}`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Void | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) | Value::Date(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Instance(id) => serde_json::json!({ "$instance": id.0 }),
            Value::Token(token) => token.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Short description used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Void => "no value",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Instance(_) => "instance",
            Value::Token(_) => "unresolved token",
        }
    }
}

/// Integral numbers render without a fractional part
pub(crate) fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// How the runtime classifies a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Plain value or value object without identity
    Value,
    /// Object with identity; `logical_ref` names its primary platform resource
    Object { logical_ref: Option<String> },
    /// Raw platform resource
    RawResource { logical_ref: String },
}

impl Identity {
    pub fn is_identifiable(&self) -> bool {
        !matches!(self, Identity::Value)
    }
}

/// A structural override with its value evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Path of the child object to patch, relative to the overridden object
    pub child_path: Option<String>,
    pub action: OverrideAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverrideAction {
    RemoveResource,
    Update { path: String, value: Value },
    Delete { path: String },
}

/// Platform options carried by raw resources
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceOptions {
    pub condition: Option<String>,
    pub deletion_policy: RetentionPolicy,
    pub update_replace_policy: RetentionPolicy,
    pub metadata: IndexMap<String, serde_json::Value>,
}

/// An evaluated template output
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    pub value: Value,
    pub description: Option<String>,
    pub export_name: Option<Value>,
    pub condition: Option<String>,
}

/// The object-construction library driven by the evaluator
///
/// Every producer may return [`Value::Token`] when its result is only
/// known at a later synthesis stage.
pub trait TargetRuntime {
    /// Construct an instance of a class
    fn instantiate(&mut self, fqn: &str, args: Vec<Value>) -> Result<Value, RuntimeError>;

    /// Invoke a static method
    fn invoke_static(
        &mut self,
        fqn: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError>;

    /// Invoke a method on a live object; [`Value::Void`] for void methods
    fn invoke_instance(
        &mut self,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError>;

    /// Read an enum member or static property
    fn static_member(&mut self, fqn: &str, name: &str) -> Result<Value, RuntimeError>;

    /// Classify a value
    fn identity(&self, value: &Value) -> Identity;

    /// Read a live property of an object
    fn get_property(&self, target: &Value, name: &str) -> Option<Value>;

    /// Whether an object exposes a platform-level attribute
    fn has_attribute(&self, target: &Value, attribute: &str) -> bool;

    fn add_tag(&mut self, target: &Value, key: &str, value: &str) -> Result<(), RuntimeError>;

    /// Make `from` depend on `to`
    fn add_dependency(&mut self, from: &Value, to: &Value) -> Result<(), RuntimeError>;

    fn apply_override(&mut self, target: &Value, over: &Override) -> Result<(), RuntimeError>;

    fn apply_resource_options(
        &mut self,
        _target: &Value,
        _options: &ResourceOptions,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn declare_parameter(
        &mut self,
        _scope: &Value,
        _logical_id: &str,
        _parameter: &TemplateParameter,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn declare_output(
        &mut self,
        _scope: &Value,
        _logical_id: &str,
        _output: &OutputValue,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Whether a value is an unresolved token
    fn is_unresolved(&self, value: &Value) -> bool {
        matches!(value, Value::Token(_))
    }

    fn fn_ref(&mut self, logical_ref: &str) -> Result<Value, RuntimeError>;

    fn fn_get_att(&mut self, logical_ref: &str, attribute: &str) -> Result<Value, RuntimeError>;

    fn fn_base64(&mut self, value: Value) -> Result<Value, RuntimeError>;

    fn fn_cidr(
        &mut self,
        ip_block: Value,
        count: Value,
        net_mask: Option<Value>,
    ) -> Result<Value, RuntimeError>;

    /// Mapping lookup whose keys are only known at a later stage
    fn fn_find_in_map(
        &mut self,
        mapping: &str,
        key1: Value,
        key2: Value,
    ) -> Result<Value, RuntimeError>;

    fn fn_get_azs(&mut self, region: Value) -> Result<Value, RuntimeError>;

    fn fn_import_value(&mut self, export_name: Value) -> Result<Value, RuntimeError>;

    fn fn_join(&mut self, separator: &str, list: Value) -> Result<Value, RuntimeError>;

    fn fn_select(&mut self, index: Value, list: Value) -> Result<Value, RuntimeError>;

    fn fn_split(&mut self, separator: &str, value: Value) -> Result<Value, RuntimeError>;

    /// `context` is `None` when the template gave no extra context
    fn fn_sub(
        &mut self,
        body: &str,
        context: Option<IndexMap<String, Value>>,
    ) -> Result<Value, RuntimeError>;

    fn fn_transform(
        &mut self,
        name: &str,
        parameters: IndexMap<String, Value>,
    ) -> Result<Value, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        let json = json!({"a": [1, "two", true, null]});
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_instance_rendering() {
        assert_eq!(
            Value::Instance(InstanceId(3)).to_json(),
            json!({"$instance": 3})
        );
        assert_eq!(Value::Number(2.5).to_json(), json!(2.5));
        assert_eq!(Value::Void.to_json(), json!(null));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::Token(json!({"Ref": "X"})).kind_name(), "unresolved token");
        assert_eq!(Value::Bool(true).kind_name(), "boolean");
    }
}
