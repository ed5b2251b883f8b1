//! Resource declarations

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value as Json};

use super::expression::{Intrinsic, TemplateExpression};
use super::shape;
use crate::error::{CompileError, Result};

const RESOURCE_FIELDS: &[&str] = &[
    "Type",
    "Properties",
    "Call",
    "On",
    "DependsOn",
    "Condition",
    "DeletionPolicy",
    "UpdateReplacePolicy",
    "Metadata",
    "Tags",
    "Overrides",
];

/// What happens to a platform resource when it is removed or replaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    #[default]
    Delete,
    Retain,
    Snapshot,
}

impl RetentionPolicy {
    fn parse(x: &Json) -> Result<Self> {
        Ok(match shape::one_of(x, &["Delete", "Retain", "Snapshot"])? {
            "Retain" => RetentionPolicy::Retain,
            "Snapshot" => RetentionPolicy::Snapshot,
            _ => RetentionPolicy::Delete,
        })
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetentionPolicy::Delete => "Delete",
            RetentionPolicy::Retain => "Retain",
            RetentionPolicy::Snapshot => "Snapshot",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTag {
    pub key: String,
    pub value: String,
}

fn parse_tags(x: Option<&Json>) -> Result<Vec<ResourceTag>> {
    let Some(x) = x else {
        return Ok(Vec::new());
    };
    shape::list_of_form(x, "{Key: string, Value: string}", |tag| {
        let fields = shape::object(tag)?;
        Ok(ResourceTag {
            key: shape::string(shape::field(fields, "Key")?)?,
            value: shape::string(shape::field(fields, "Value")?)?,
        })
    })
}

/// A structural patch applied to a produced object
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceOverride {
    pub child_path: Option<String>,
    pub operation: OverrideOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverrideOperation {
    RemoveResource,
    Update {
        path: String,
        value: TemplateExpression,
    },
    Delete {
        path: String,
    },
}

fn parse_override(x: &Json) -> Result<ResourceOverride> {
    let fields = shape::object(x)?;
    shape::known_fields(
        fields,
        &["ChildConstructPath", "RemoveResource", "Update", "Delete"],
        "In override",
    )?;
    let child_path = fields.get("ChildConstructPath").map(shape::string).transpose()?;

    let operation = match shape::exactly_one_of_fields(fields, &["RemoveResource", "Update", "Delete"])? {
        "RemoveResource" => {
            shape::field(fields, "ChildConstructPath")?;
            if !shape::boolean(&fields["RemoveResource"])? {
                return Err(CompileError::shape(format!(
                    "Expected 'true', got: {}",
                    fields["RemoveResource"]
                )));
            }
            OverrideOperation::RemoveResource
        }
        "Update" => {
            let update = shape::object(&fields["Update"])?;
            OverrideOperation::Update {
                path: shape::string(shape::field(update, "Path")?)?,
                value: TemplateExpression::parse(shape::field(update, "Value")?)?,
            }
        }
        _ => {
            let delete = shape::object(&fields["Delete"])?;
            OverrideOperation::Delete {
                path: shape::string(shape::field(delete, "Path")?)?,
            }
        }
    };

    Ok(ResourceOverride {
        child_path,
        operation,
    })
}

fn parse_overrides(x: Option<&Json>) -> Result<Vec<ResourceOverride>> {
    match x {
        None => Ok(Vec::new()),
        Some(x) => shape::list(x, &[])?.iter().map(parse_override).collect(),
    }
}

/// Arguments of a deferred call
#[derive(Debug, Clone, PartialEq)]
pub enum CallArguments {
    /// Positional arguments; scope and id may be injected
    Positional(Vec<TemplateExpression>),
    /// A `CDK::Args` list, passed exactly as written
    Explicit(Vec<TemplateExpression>),
}

impl CallArguments {
    fn parse(x: &Json) -> Result<Self> {
        Ok(Self::from_expression(&TemplateExpression::parse(x)?))
    }

    /// Interpret the value under a call key as an argument list
    pub fn from_expression(x: &TemplateExpression) -> Self {
        match x {
            TemplateExpression::Intrinsic(Intrinsic::Args(args)) => {
                CallArguments::Explicit(args.clone())
            }
            TemplateExpression::Array(args) => CallArguments::Positional(args.clone()),
            TemplateExpression::Null => CallArguments::Positional(Vec::new()),
            single => CallArguments::Positional(vec![single.clone()]),
        }
    }

    pub fn expressions(&self) -> &[TemplateExpression] {
        match self {
            CallArguments::Positional(args) | CallArguments::Explicit(args) => args,
        }
    }
}

/// A method invocation whose result is the resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCall {
    /// Target object path (`id` or `id.prop.prop`); `None` for static calls
    pub target: Option<String>,
    /// Method name; for static calls the fully qualified `Class.method`
    pub method: String,
    pub arguments: CallArguments,
}

impl ResourceCall {
    fn parse(logical_id: &str, call: &Json, on: Option<&Json>) -> Result<Self> {
        let (method, args) = shape::one_field(call)?;
        let arguments = CallArguments::parse(args)?;
        match on {
            None => Ok(ResourceCall {
                target: None,
                method: method.to_string(),
                arguments,
            }),
            Some(on) => {
                let on = shape::string(on)?;
                // `logGroup.grantWrite` on `Function` calls `grantWrite` on `Function.logGroup`
                let (target, method) = match method.rsplit_once('.') {
                    Some((path, name)) => (format!("{}.{}", on, path), name.to_string()),
                    None => (on, method.to_string()),
                };
                if target.is_empty() || method.is_empty() {
                    return Err(CompileError::shape(format!(
                        "In resource '{}': invalid call target",
                        logical_id
                    )));
                }
                Ok(ResourceCall {
                    target: Some(target),
                    method,
                    arguments,
                })
            }
        }
    }

    /// Logical id of the call target, for instance calls
    pub fn target_logical_id(&self) -> Option<&str> {
        self.target
            .as_deref()
            .map(|t| t.split('.').next().unwrap_or(t))
    }
}

/// A declared resource
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateResource {
    /// Type name; optional when inferable from `call`
    pub type_name: Option<String>,
    pub properties: IndexMap<String, TemplateExpression>,
    pub call: Option<ResourceCall>,
    pub condition: Option<String>,
    /// Explicit dependencies plus every id the resource refers to
    pub dependencies: IndexSet<String>,
    /// Explicit dependencies only
    pub depends_on: IndexSet<String>,
    /// The resource's own condition plus every condition its expressions evaluate
    pub conditions: IndexSet<String>,
    pub deletion_policy: RetentionPolicy,
    pub update_replace_policy: RetentionPolicy,
    pub metadata: IndexMap<String, Json>,
    pub tags: Vec<ResourceTag>,
    pub overrides: Vec<ResourceOverride>,
}

impl TemplateResource {
    pub fn parse(logical_id: &str, x: &Json) -> Result<Self> {
        let fields: &Map<String, Json> = shape::object(x)?;
        shape::known_fields(fields, RESOURCE_FIELDS, &format!("In resource '{}'", logical_id))?;
        shape::at_most_one_of_fields(fields, &["Properties", "Call"])?;

        let type_name = fields.get("Type").map(shape::string).transpose()?;
        let call = match (fields.get("Call"), fields.get("On")) {
            (Some(call), on) => Some(ResourceCall::parse(logical_id, call, on)?),
            (None, Some(on)) => {
                return Err(CompileError::shape(format!(
                    "In resource '{}': expected to find a 'Call' property, to a method of '{}'.",
                    logical_id,
                    shape::string(on)?
                )))
            }
            (None, None) => None,
        };
        if type_name.is_none() && call.is_none() {
            return Err(CompileError::shape(format!(
                "In resource '{}': missing 'Type' property.",
                logical_id
            )));
        }

        let properties = TemplateExpression::parse_object(fields.get("Properties"))?;
        let depends_on: IndexSet<String> = match fields.get("DependsOn") {
            Some(x) => shape::string_or_list(x)?.into_iter().collect(),
            None => IndexSet::new(),
        };
        let overrides = parse_overrides(fields.get("Overrides"))?;

        let condition = fields.get("Condition").map(shape::string).transpose()?;
        let mut dependencies = depends_on.clone();
        let mut conditions: IndexSet<String> = condition.iter().cloned().collect();
        let mut expressions: Vec<&TemplateExpression> = properties.values().collect();
        if let Some(call) = &call {
            if let Some(target) = call.target_logical_id() {
                dependencies.insert(target.to_string());
            }
            expressions.extend(call.arguments.expressions());
        }
        for over in &overrides {
            if let OverrideOperation::Update { value, .. } = &over.operation {
                expressions.push(value);
            }
        }
        for x in expressions {
            x.referenced_logical_ids(&mut dependencies);
            x.referenced_conditions(&mut conditions);
        }

        let metadata = match fields.get("Metadata") {
            Some(m) => shape::object(m)?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => IndexMap::new(),
        };

        Ok(TemplateResource {
            type_name,
            properties,
            call,
            condition,
            dependencies,
            depends_on,
            conditions,
            deletion_policy: fields
                .get("DeletionPolicy")
                .map(RetentionPolicy::parse)
                .transpose()?
                .unwrap_or_default(),
            update_replace_policy: fields
                .get("UpdateReplacePolicy")
                .map(RetentionPolicy::parse)
                .transpose()?
                .unwrap_or_default(),
            metadata,
            tags: parse_tags(fields.get("Tags"))?,
            overrides,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(x: Json) -> Result<TemplateResource> {
        TemplateResource::parse("Res", &x)
    }

    #[test]
    fn test_defaults() {
        let r = parse(json!({"Type": "pkg.Queue"})).unwrap();
        assert_eq!(r.type_name.as_deref(), Some("pkg.Queue"));
        assert_eq!(r.deletion_policy, RetentionPolicy::Delete);
        assert_eq!(r.update_replace_policy, RetentionPolicy::Delete);
        assert!(r.properties.is_empty() && r.tags.is_empty() && r.overrides.is_empty());
    }

    #[test]
    fn test_dependencies_and_depends_on_are_distinct() {
        let r = parse(json!({
            "Type": "pkg.Queue",
            "DependsOn": "Explicit",
            "Properties": {"topic": {"Ref": "Topic"}}
        }))
        .unwrap();
        assert_eq!(r.depends_on.iter().collect::<Vec<_>>(), vec!["Explicit"]);
        assert_eq!(
            r.dependencies.iter().collect::<Vec<_>>(),
            vec!["Explicit", "Topic"]
        );
    }

    #[test]
    fn test_properties_and_call_are_exclusive() {
        let err = parse(json!({
            "Type": "pkg.Queue",
            "Properties": {},
            "Call": {"pkg.Queue.fromArn": "arn"}
        }))
        .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Expected at most one of the fields 'Properties', 'Call'"));
    }

    #[test]
    fn test_on_requires_call() {
        let err = TemplateResource::parse("Alias", &json!({"On": "MyFunction"})).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"In resource 'Alias': expected to find a 'Call' property, to a method of 'MyFunction'.");
    }

    #[test]
    fn test_missing_type() {
        let err = TemplateResource::parse("Bucket", &json!({"Properties": {}})).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"In resource 'Bucket': missing 'Type' property.");
    }

    #[test]
    fn test_instance_call_with_dotted_method() {
        let r = parse(json!({
            "On": "Function",
            "Call": {"logGroup.grantWrite": {"Ref": "Role"}}
        }))
        .unwrap();
        let call = r.call.unwrap();
        assert_eq!(call.target.as_deref(), Some("Function.logGroup"));
        assert_eq!(call.method, "grantWrite");
        assert_eq!(call.target_logical_id(), Some("Function"));
        assert!(matches!(call.arguments, CallArguments::Positional(ref a) if a.len() == 1));
        assert_eq!(
            r.dependencies.iter().collect::<Vec<_>>(),
            vec!["Function", "Role"]
        );
    }

    #[test]
    fn test_explicit_call_arguments() {
        let r = parse(json!({
            "Call": {"pkg.Code.fromAsset": {"CDK::Args": ["./src"]}}
        }))
        .unwrap();
        assert!(matches!(
            r.call.unwrap().arguments,
            CallArguments::Explicit(ref a) if a.len() == 1
        ));
    }

    #[test]
    fn test_invalid_tags() {
        let err = parse(json!({"Type": "pkg.Queue", "Tags": [{}]})).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Expected list of form {Key: string, Value: string}"));
    }

    #[test]
    fn test_remove_resource_requires_child_path() {
        let err = parse(json!({
            "Type": "pkg.Queue",
            "Overrides": [{"RemoveResource": true}]
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Expected field named 'ChildConstructPath'");
    }

    #[test]
    fn test_override_needs_exactly_one_operation() {
        let err = parse(json!({
            "Type": "pkg.Queue",
            "Overrides": [{
                "Update": {"Path": "encryption", "Value": "KMS"},
                "Delete": {"Path": "encryption"}
            }]
        }))
        .unwrap_err();
        assert!(err.to_string().starts_with("Expected exactly one of the fields"));
    }

    #[test]
    fn test_retention_policy() {
        let r = parse(json!({"Type": "AWS::S3::Bucket", "DeletionPolicy": "Retain"})).unwrap();
        assert_eq!(r.deletion_policy, RetentionPolicy::Retain);
        assert!(parse(json!({"Type": "AWS::S3::Bucket", "DeletionPolicy": "Keep"})).is_err());
    }

    #[test]
    fn test_unknown_field() {
        let err = parse(json!({"Type": "pkg.Queue", "Propertys": {}})).unwrap_err();
        assert!(err.to_string().contains("unknown field 'Propertys'"));
    }
}
