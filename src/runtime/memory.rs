//! In-memory target runtime
//!
//! Records every object the evaluator asks for, together with the
//! construct tree, tags, dependencies and overrides applied to it.
//! Intrinsic producers return literal results when every input is
//! literal, and platform-level tokens otherwise.

use std::collections::HashMap;

use base64::Engine;
use indexmap::IndexMap;
use serde_json::json;

use super::{
    number_to_json, Identity, InstanceId, OutputValue, Override, OverrideAction, ResourceOptions,
    RuntimeError, TargetRuntime, Value,
};
use crate::config::CompilerConfig;
use crate::template::TemplateParameter;

/// Identifies a call a [`Handler`] can intercept
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallKey {
    Initializer { fqn: String },
    Static { fqn: String, method: String },
    Instance { fqn: String, method: String },
}

impl CallKey {
    pub fn initializer(fqn: impl Into<String>) -> Self {
        CallKey::Initializer { fqn: fqn.into() }
    }

    pub fn static_method(fqn: impl Into<String>, method: impl Into<String>) -> Self {
        CallKey::Static {
            fqn: fqn.into(),
            method: method.into(),
        }
    }

    pub fn instance_method(fqn: impl Into<String>, method: impl Into<String>) -> Self {
        CallKey::Instance {
            fqn: fqn.into(),
            method: method.into(),
        }
    }
}

/// Intercepts a call; `Ok(None)` falls through to the default behavior
pub type Handler = Box<dyn Fn(&[Value]) -> Result<Option<Value>, RuntimeError>>;

/// What a recorded object is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    /// The root scope
    Scope,
    /// A node of the construct tree
    Construct,
    /// A raw platform resource; `resource_type` is its platform type name
    RawResource { resource_type: String },
    /// Value object without identity
    Value,
}

/// A recorded object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub fqn: String,
    pub kind: ObjectKind,
    pub parent: Option<InstanceId>,
    /// Construct id within the parent
    pub node_id: Option<String>,
    pub args: Vec<Value>,
    pub properties: IndexMap<String, Value>,
    pub tags: IndexMap<String, String>,
    pub dependencies: Vec<InstanceId>,
    pub overrides: Vec<Override>,
    pub options: Option<ResourceOptions>,
    pub children: IndexMap<String, InstanceId>,
    pub removed: bool,
}

impl ObjectRecord {
    fn new(fqn: impl Into<String>, kind: ObjectKind, args: Vec<Value>) -> Self {
        Self {
            fqn: fqn.into(),
            kind,
            parent: None,
            node_id: None,
            args,
            properties: IndexMap::new(),
            tags: IndexMap::new(),
            dependencies: Vec::new(),
            overrides: Vec::new(),
            options: None,
            children: IndexMap::new(),
            removed: false,
        }
    }

    /// The initializer's property bag, if one was passed
    fn props(&self) -> Option<&IndexMap<String, Value>> {
        let bag = match self.kind {
            ObjectKind::Construct | ObjectKind::RawResource { .. } => self.args.get(2),
            ObjectKind::Value => self.args.first(),
            ObjectKind::Scope => None,
        };
        match bag {
            Some(Value::Object(fields)) => Some(fields),
            _ => None,
        }
    }
}

/// Object-construction runtime that keeps everything in memory
pub struct MemoryRuntime {
    raw_resource_type: String,
    objects: Vec<ObjectRecord>,
    handlers: HashMap<CallKey, Handler>,
    attributes: HashMap<String, Vec<String>>,
    known_attributes: HashMap<(String, String), Value>,
    parameters: IndexMap<String, TemplateParameter>,
    outputs: IndexMap<String, OutputValue>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    /// Create a runtime holding only the root scope
    pub fn new() -> Self {
        Self::from_config(&CompilerConfig::default())
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            raw_resource_type: config.raw_resource_type.clone(),
            objects: vec![ObjectRecord::new("Stack", ObjectKind::Scope, Vec::new())],
            handlers: HashMap::new(),
            attributes: HashMap::new(),
            known_attributes: HashMap::new(),
            parameters: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// The root scope every template is compiled into
    pub fn scope(&self) -> Value {
        Value::Instance(InstanceId(0))
    }

    /// Intercept a call
    pub fn on_call(&mut self, key: CallKey, handler: Handler) {
        self.handlers.insert(key, handler);
    }

    /// Builder-style [`MemoryRuntime::on_call`]
    pub fn with_handler(mut self, key: CallKey, handler: Handler) -> Self {
        self.on_call(key, handler);
        self
    }

    /// Declare platform attributes exposed by instances of a class
    pub fn with_attributes<I, S>(mut self, fqn: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(fqn.into(), names.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve `Fn::GetAtt` of `logical_ref.attribute` to a literal
    pub fn with_known_attribute(
        mut self,
        logical_ref: impl Into<String>,
        attribute: impl Into<String>,
        value: Value,
    ) -> Self {
        self.known_attributes
            .insert((logical_ref.into(), attribute.into()), value);
        self
    }

    /// Set a live property on a recorded object
    pub fn set_property(
        &mut self,
        target: &Value,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let id = self.instance_id(target)?;
        self.objects[id.0].properties.insert(name.into(), value);
        Ok(())
    }

    pub fn object(&self, id: InstanceId) -> Option<&ObjectRecord> {
        self.objects.get(id.0)
    }

    pub fn objects(&self) -> impl Iterator<Item = (InstanceId, &ObjectRecord)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(i, record)| (InstanceId(i), record))
    }

    /// Find a construct by its path below the root scope, e.g. `Bucket/Resource`
    pub fn find_by_path(&self, path: &str) -> Option<InstanceId> {
        self.find_child(InstanceId(0), path)
    }

    pub fn parameters(&self) -> &IndexMap<String, TemplateParameter> {
        &self.parameters
    }

    pub fn outputs(&self) -> &IndexMap<String, OutputValue> {
        &self.outputs
    }

    /// Slash-separated construct path below the root scope
    pub fn path_of(&self, id: InstanceId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = self.objects.get(id.0)?;
        while let (Some(parent), Some(node_id)) = (current.parent, current.node_id.as_ref()) {
            segments.push(node_id.clone());
            current = self.objects.get(parent.0)?;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Platform name of a construct, derived from its path
    pub fn logical_ref_of(&self, id: InstanceId) -> Option<String> {
        let record = self.objects.get(id.0)?;
        match record.kind {
            ObjectKind::RawResource { .. } | ObjectKind::Construct => {
                let path = self.path_of(id)?;
                Some(path.chars().filter(|c| c.is_ascii_alphanumeric()).collect())
            }
            ObjectKind::Scope | ObjectKind::Value => None,
        }
    }

    /// Render the recorded construct tree as a platform template
    pub fn render(&self) -> serde_json::Value {
        let mut resources = serde_json::Map::new();
        for (id, record) in self.objects() {
            if record.removed || self.has_removed_ancestor(id) {
                continue;
            }
            let Some(logical_ref) = self.logical_ref_of(id) else {
                continue;
            };
            let mut body = serde_json::Map::new();
            match &record.kind {
                ObjectKind::RawResource { resource_type } => {
                    body.insert("Type".to_string(), json!(resource_type));
                    if let Some(Value::Object(bag)) = record.args.get(2) {
                        if let Some(props) = bag.get("properties") {
                            body.insert("Properties".to_string(), props.to_json());
                        }
                    }
                }
                _ => {
                    body.insert("Type".to_string(), json!(record.fqn));
                    if let Some(props) = record.args.get(2).filter(|p| !p.is_void()) {
                        body.insert("Properties".to_string(), props.to_json());
                    }
                }
            }
            if !record.tags.is_empty() {
                let tags: Vec<serde_json::Value> = record
                    .tags
                    .iter()
                    .map(|(k, v)| json!({"Key": k, "Value": v}))
                    .collect();
                body.insert("Tags".to_string(), serde_json::Value::Array(tags));
            }
            if !record.dependencies.is_empty() {
                let deps: Vec<serde_json::Value> = record
                    .dependencies
                    .iter()
                    .filter_map(|d| self.logical_ref_of(*d))
                    .map(serde_json::Value::String)
                    .collect();
                body.insert("DependsOn".to_string(), serde_json::Value::Array(deps));
            }
            if let Some(options) = &record.options {
                if let Some(condition) = &options.condition {
                    body.insert("Condition".to_string(), json!(condition));
                }
                body.insert(
                    "DeletionPolicy".to_string(),
                    json!(options.deletion_policy.to_string()),
                );
                body.insert(
                    "UpdateReplacePolicy".to_string(),
                    json!(options.update_replace_policy.to_string()),
                );
                if !options.metadata.is_empty() {
                    body.insert(
                        "Metadata".to_string(),
                        serde_json::Value::Object(options.metadata.clone().into_iter().collect()),
                    );
                }
            }
            resources.insert(logical_ref, serde_json::Value::Object(body));
        }

        let parameters: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|(name, p)| (name.clone(), p.to_json()))
            .collect();
        let outputs: serde_json::Map<String, serde_json::Value> = self
            .outputs
            .iter()
            .map(|(name, o)| {
                let mut body = serde_json::Map::new();
                body.insert("Value".to_string(), o.value.to_json());
                if let Some(description) = &o.description {
                    body.insert("Description".to_string(), json!(description));
                }
                if let Some(export) = &o.export_name {
                    body.insert("Export".to_string(), json!({"Name": export.to_json()}));
                }
                if let Some(condition) = &o.condition {
                    body.insert("Condition".to_string(), json!(condition));
                }
                (name.clone(), serde_json::Value::Object(body))
            })
            .collect();

        json!({
            "Parameters": parameters,
            "Resources": resources,
            "Outputs": outputs,
        })
    }

    fn has_removed_ancestor(&self, id: InstanceId) -> bool {
        let mut current = self.objects.get(id.0).and_then(|r| r.parent);
        while let Some(parent) = current {
            match self.objects.get(parent.0) {
                Some(record) if record.removed => return true,
                Some(record) => current = record.parent,
                None => return false,
            }
        }
        false
    }

    fn find_child(&self, root: InstanceId, path: &str) -> Option<InstanceId> {
        let mut current = root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = *self.objects.get(current.0)?.children.get(segment)?;
        }
        Some(current)
    }

    fn instance_id(&self, value: &Value) -> Result<InstanceId, RuntimeError> {
        match value {
            Value::Instance(id) if id.0 < self.objects.len() => Ok(*id),
            other => Err(RuntimeError::new(format!(
                "expected an object, got {}",
                other.kind_name()
            ))),
        }
    }

    fn handle(&self, key: &CallKey, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
        match self.handlers.get(key) {
            Some(handler) => handler(args),
            None => Ok(None),
        }
    }

    /// Whether `value` can act as the scope of a new construct
    fn is_scope(&self, value: &Value) -> bool {
        match value {
            Value::Instance(id) => self
                .objects
                .get(id.0)
                .map(|r| !matches!(r.kind, ObjectKind::Value))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Record a new object, attaching it to its scope when built as `(scope, id, ...)`
    fn record(&mut self, fqn: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let attach = match (args.first(), args.get(1)) {
            (Some(scope), Some(Value::String(node_id))) if self.is_scope(scope) => {
                Some((self.instance_id(scope)?, node_id.clone()))
            }
            _ => None,
        };

        let kind = if fqn == self.raw_resource_type {
            let resource_type = match args.get(2) {
                Some(Value::Object(bag)) => bag.get("type").and_then(|t| t.as_str()),
                _ => None,
            };
            match resource_type {
                Some(t) => ObjectKind::RawResource {
                    resource_type: t.to_string(),
                },
                None => {
                    return Err(RuntimeError::new(format!(
                        "{} requires a 'type' property",
                        fqn
                    )))
                }
            }
        } else if attach.is_some() {
            ObjectKind::Construct
        } else {
            ObjectKind::Value
        };

        let id = InstanceId(self.objects.len());
        let mut record = ObjectRecord::new(fqn, kind, args);

        if let Some((parent, node_id)) = attach {
            if self.objects[parent.0].children.contains_key(&node_id) {
                let parent_path = self.path_of(parent).unwrap_or_default();
                let parent_name = if parent_path.is_empty() {
                    "Stack".to_string()
                } else {
                    parent_path
                };
                return Err(RuntimeError::new(format!(
                    "There is already a Construct with name '{}' in {}",
                    node_id, parent_name
                )));
            }
            self.objects[parent.0].children.insert(node_id.clone(), id);
            record.parent = Some(parent);
            record.node_id = Some(node_id);
        }

        tracing::debug!(fqn, id = id.0, "recorded object");
        self.objects.push(record);
        Ok(Value::Instance(id))
    }
}

fn token(json: serde_json::Value) -> Value {
    Value::Token(json)
}

fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_to_json(*n).to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl TargetRuntime for MemoryRuntime {
    fn instantiate(&mut self, fqn: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        if let Some(value) = self.handle(&CallKey::initializer(fqn), &args)? {
            return Ok(value);
        }
        self.record(fqn, args)
    }

    fn invoke_static(
        &mut self,
        fqn: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if let Some(value) = self.handle(&CallKey::static_method(fqn, method), &args)? {
            return Ok(value);
        }
        self.record(&format!("{}.{}", fqn, method), args)
    }

    fn invoke_instance(
        &mut self,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let id = self.instance_id(target)?;
        let fqn = self.objects[id.0].fqn.clone();
        if let Some(value) = self.handle(&CallKey::instance_method(&fqn, method), &args)? {
            return Ok(value);
        }
        self.record(&format!("{}#{}", fqn, method), args)
    }

    fn static_member(&mut self, fqn: &str, name: &str) -> Result<Value, RuntimeError> {
        Ok(Value::String(format!("{}.{}", fqn, name)))
    }

    fn identity(&self, value: &Value) -> Identity {
        let Value::Instance(id) = value else {
            return Identity::Value;
        };
        match self.objects.get(id.0).map(|r| &r.kind) {
            Some(ObjectKind::Scope) => Identity::Object { logical_ref: None },
            Some(ObjectKind::Construct) => Identity::Object {
                logical_ref: self.logical_ref_of(*id),
            },
            Some(ObjectKind::RawResource { .. }) => match self.logical_ref_of(*id) {
                Some(logical_ref) => Identity::RawResource { logical_ref },
                None => Identity::Value,
            },
            Some(ObjectKind::Value) | None => Identity::Value,
        }
    }

    fn get_property(&self, target: &Value, name: &str) -> Option<Value> {
        match target {
            Value::Instance(id) => {
                let record = self.objects.get(id.0)?;
                record
                    .properties
                    .get(name)
                    .or_else(|| record.props().and_then(|p| p.get(name)))
                    .cloned()
            }
            Value::Object(fields) => fields.get(name).cloned(),
            _ => None,
        }
    }

    fn has_attribute(&self, target: &Value, attribute: &str) -> bool {
        let Value::Instance(id) = target else {
            return false;
        };
        match self.objects.get(id.0) {
            Some(record) => match record.kind {
                ObjectKind::RawResource { .. } => true,
                _ => self
                    .attributes
                    .get(&record.fqn)
                    .map(|names| names.iter().any(|n| n == attribute))
                    .unwrap_or(false),
            },
            None => false,
        }
    }

    fn add_tag(&mut self, target: &Value, key: &str, value: &str) -> Result<(), RuntimeError> {
        let id = self.instance_id(target)?;
        self.objects[id.0]
            .tags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn add_dependency(&mut self, from: &Value, to: &Value) -> Result<(), RuntimeError> {
        let from = self.instance_id(from)?;
        let to = self.instance_id(to)?;
        let deps = &mut self.objects[from.0].dependencies;
        if !deps.contains(&to) {
            deps.push(to);
        }
        Ok(())
    }

    fn apply_override(&mut self, target: &Value, over: &Override) -> Result<(), RuntimeError> {
        let root = self.instance_id(target)?;
        let id = match &over.child_path {
            Some(path) => self.find_child(root, path).ok_or_else(|| {
                RuntimeError::new(format!("no child construct at path '{}'", path))
            })?,
            None => root,
        };
        let record = &mut self.objects[id.0];
        if matches!(over.action, OverrideAction::RemoveResource) {
            record.removed = true;
        }
        record.overrides.push(over.clone());
        Ok(())
    }

    fn apply_resource_options(
        &mut self,
        target: &Value,
        options: &ResourceOptions,
    ) -> Result<(), RuntimeError> {
        let id = self.instance_id(target)?;
        self.objects[id.0].options = Some(options.clone());
        Ok(())
    }

    fn declare_parameter(
        &mut self,
        _scope: &Value,
        logical_id: &str,
        parameter: &TemplateParameter,
    ) -> Result<(), RuntimeError> {
        self.parameters
            .insert(logical_id.to_string(), parameter.clone());
        Ok(())
    }

    fn declare_output(
        &mut self,
        _scope: &Value,
        logical_id: &str,
        output: &OutputValue,
    ) -> Result<(), RuntimeError> {
        self.outputs.insert(logical_id.to_string(), output.clone());
        Ok(())
    }

    fn fn_ref(&mut self, logical_ref: &str) -> Result<Value, RuntimeError> {
        Ok(token(json!({ "Ref": logical_ref })))
    }

    fn fn_get_att(&mut self, logical_ref: &str, attribute: &str) -> Result<Value, RuntimeError> {
        let key = (logical_ref.to_string(), attribute.to_string());
        if let Some(value) = self.known_attributes.get(&key) {
            return Ok(value.clone());
        }
        Ok(token(json!({ "Fn::GetAtt": [logical_ref, attribute] })))
    }

    fn fn_base64(&mut self, value: Value) -> Result<Value, RuntimeError> {
        match value {
            Value::String(s) => Ok(Value::String(
                base64::engine::general_purpose::STANDARD.encode(s.as_bytes()),
            )),
            other => Ok(token(json!({ "Fn::Base64": other.to_json() }))),
        }
    }

    fn fn_cidr(
        &mut self,
        ip_block: Value,
        count: Value,
        net_mask: Option<Value>,
    ) -> Result<Value, RuntimeError> {
        let mut args = vec![ip_block.to_json(), count.to_json()];
        if let Some(mask) = net_mask {
            args.push(mask.to_json());
        }
        Ok(token(json!({ "Fn::Cidr": args })))
    }

    fn fn_find_in_map(
        &mut self,
        mapping: &str,
        key1: Value,
        key2: Value,
    ) -> Result<Value, RuntimeError> {
        Ok(token(
            json!({ "Fn::FindInMap": [mapping, key1.to_json(), key2.to_json()] }),
        ))
    }

    fn fn_get_azs(&mut self, region: Value) -> Result<Value, RuntimeError> {
        Ok(token(json!({ "Fn::GetAZs": region.to_json() })))
    }

    fn fn_import_value(&mut self, export_name: Value) -> Result<Value, RuntimeError> {
        Ok(token(json!({ "Fn::ImportValue": export_name.to_json() })))
    }

    fn fn_join(&mut self, separator: &str, list: Value) -> Result<Value, RuntimeError> {
        if let Value::Array(items) = &list {
            let parts: Option<Vec<String>> = items.iter().map(literal_text).collect();
            if let Some(parts) = parts {
                return Ok(Value::String(parts.join(separator)));
            }
        }
        Ok(token(json!({ "Fn::Join": [separator, list.to_json()] })))
    }

    fn fn_select(&mut self, index: Value, list: Value) -> Result<Value, RuntimeError> {
        if let (Value::Number(n), Value::Array(items)) = (&index, &list) {
            if n.fract() != 0.0 || *n < 0.0 || (*n as usize) >= items.len() {
                return Err(RuntimeError::new(format!(
                    "Fn::Select index {} is out of range for a list of {} elements",
                    number_to_json(*n),
                    items.len()
                )));
            }
            return Ok(items[*n as usize].clone());
        }
        Ok(token(json!({ "Fn::Select": [index.to_json(), list.to_json()] })))
    }

    fn fn_split(&mut self, separator: &str, value: Value) -> Result<Value, RuntimeError> {
        match value {
            Value::String(s) => Ok(Value::Array(
                s.split(separator)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )),
            other => Ok(token(json!({ "Fn::Split": [separator, other.to_json()] }))),
        }
    }

    fn fn_sub(
        &mut self,
        body: &str,
        context: Option<IndexMap<String, Value>>,
    ) -> Result<Value, RuntimeError> {
        match context {
            Some(context) => {
                let context: serde_json::Map<String, serde_json::Value> = context
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                Ok(token(json!({ "Fn::Sub": [body, context] })))
            }
            None if !body.contains("${") => Ok(Value::String(body.to_string())),
            None => Ok(token(json!({ "Fn::Sub": body }))),
        }
    }

    fn fn_transform(
        &mut self,
        name: &str,
        parameters: IndexMap<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let parameters: serde_json::Map<String, serde_json::Value> = parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Ok(token(
            json!({ "Fn::Transform": { "Name": name, "Parameters": parameters } }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn construct(runtime: &mut MemoryRuntime, fqn: &str, id: &str) -> Value {
        let scope = runtime.scope();
        runtime
            .instantiate(fqn, vec![scope, Value::String(id.to_string())])
            .expect("Should instantiate")
    }

    #[test]
    fn test_construct_tree_and_identity() {
        let mut runtime = MemoryRuntime::new();
        let bucket = construct(&mut runtime, "pkg.Bucket", "My.Bucket");
        let Value::Instance(id) = bucket else {
            panic!("Expected an instance");
        };

        assert_eq!(runtime.path_of(id).as_deref(), Some("My.Bucket"));
        assert_eq!(
            runtime.identity(&bucket),
            Identity::Object {
                logical_ref: Some("MyBucket".to_string())
            }
        );
        assert_eq!(runtime.find_by_path("My.Bucket"), Some(id));
    }

    #[test]
    fn test_duplicate_construct_id() {
        let mut runtime = MemoryRuntime::new();
        construct(&mut runtime, "pkg.Bucket", "Bucket");
        let scope = runtime.scope();
        let err = runtime
            .instantiate("pkg.Bucket", vec![scope, Value::String("Bucket".into())])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "There is already a Construct with name 'Bucket' in Stack"
        );
    }

    #[test]
    fn test_raw_resource_identity() {
        let mut runtime = MemoryRuntime::new();
        let scope = runtime.scope();
        let mut bag = IndexMap::new();
        bag.insert("type".to_string(), Value::String("AWS::SQS::Queue".into()));
        let queue = runtime
            .instantiate(
                "aws-cdk-lib.CfnResource",
                vec![scope, Value::String("Queue".into()), Value::Object(bag)],
            )
            .unwrap();
        assert_eq!(
            runtime.identity(&queue),
            Identity::RawResource {
                logical_ref: "Queue".to_string()
            }
        );
        assert!(runtime.has_attribute(&queue, "Arn"));
    }

    #[test]
    fn test_plain_values_have_no_identity() {
        let mut runtime = MemoryRuntime::new();
        let value = runtime
            .invoke_static("pkg.Duration", "minutes", vec![Value::Number(5.0)])
            .unwrap();
        assert_eq!(runtime.identity(&value), Identity::Value);
        assert!(runtime.add_tag(&Value::Number(1.0), "k", "v").is_err());
    }

    #[test]
    fn test_handler_can_fail() {
        let mut runtime = MemoryRuntime::new().with_handler(
            CallKey::initializer("pkg.Broken"),
            Box::new(|_| Err(RuntimeError::new("boom"))),
        );
        let scope = runtime.scope();
        let err = runtime
            .instantiate("pkg.Broken", vec![scope, Value::String("X".into())])
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(runtime.find_by_path("X").is_none());
    }

    #[test]
    fn test_literal_producers() {
        let mut runtime = MemoryRuntime::new();
        assert_eq!(
            runtime.fn_base64(Value::String("hello".into())).unwrap(),
            Value::String("aGVsbG8=".into())
        );
        assert_eq!(
            runtime
                .fn_join(
                    "-",
                    Value::Array(vec![Value::String("a".into()), Value::Number(1.0)])
                )
                .unwrap(),
            Value::String("a-1".into())
        );
        assert_eq!(
            runtime
                .fn_split(",", Value::String("a,b".into()))
                .unwrap(),
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())])
        );
        assert!(runtime
            .fn_select(Value::Number(3.0), Value::Array(vec![Value::Null]))
            .is_err());
    }

    #[test]
    fn test_token_producers() {
        let mut runtime = MemoryRuntime::new();
        let reference = runtime.fn_ref("Bucket").unwrap();
        assert!(runtime.is_unresolved(&reference));

        let joined = runtime
            .fn_join("", Value::Array(vec![reference.clone()]))
            .unwrap();
        assert_eq!(
            joined.to_json(),
            json!({"Fn::Join": ["", [{"Ref": "Bucket"}]]})
        );
        assert_eq!(
            runtime.fn_sub("${Bucket}", None).unwrap().to_json(),
            json!({"Fn::Sub": "${Bucket}"})
        );
    }

    #[test]
    fn test_override_remove_child() {
        let mut runtime = MemoryRuntime::new();
        let parent = construct(&mut runtime, "pkg.Function", "Function");
        runtime
            .instantiate("pkg.Role", vec![parent.clone(), Value::String("Role".into())])
            .unwrap();
        runtime
            .apply_override(
                &parent,
                &Override {
                    child_path: Some("Role".to_string()),
                    action: OverrideAction::RemoveResource,
                },
            )
            .unwrap();

        let rendered = runtime.render();
        assert!(rendered["Resources"].get("Function").is_some());
        assert!(rendered["Resources"].get("FunctionRole").is_none());

        let err = runtime
            .apply_override(
                &parent,
                &Override {
                    child_path: Some("Missing".to_string()),
                    action: OverrideAction::RemoveResource,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("Missing"));
    }
}
