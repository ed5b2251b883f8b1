//! Template parser
//!
//! Turns a raw template document into a [`Template`]: typed collections of
//! declarations whose values are untyped [`TemplateExpression`] trees. The
//! parser knows nothing about the type catalog; single-key objects that are
//! not intrinsics stay ambiguous until resolution.
//!
//! # Example
//!
//! ```text
//! Resources:
//!   Topic:
//!     Type: aws-cdk-lib.aws_sns.Topic
//!   Queue:
//!     Type: aws-cdk-lib.aws_sqs.Queue
//!     Properties:
//!       deadLetterQueue:
//!         queue: { Ref: Dlq }
//! ```

mod expression;
mod resource;
mod sections;
pub mod shape;
mod sub;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::{CompileError, Result};

pub use expression::{Intrinsic, TemplateExpression};
pub use resource::{
    CallArguments, OverrideOperation, ResourceCall, ResourceOverride, ResourceTag,
    RetentionPolicy, TemplateResource,
};
pub use sections::{Mapping, TemplateOutput, TemplateParameter};
pub use sub::{parse_sub, SubFragment};

const SECTIONS: &[&str] = &[
    "Resources",
    "Parameters",
    "Conditions",
    "Mappings",
    "Outputs",
    "Transform",
    "Metadata",
    "AWSTemplateFormatVersion",
    "Description",
    "$schema",
];

/// A parsed template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub description: Option<String>,
    pub resources: IndexMap<String, TemplateResource>,
    pub parameters: IndexMap<String, TemplateParameter>,
    pub conditions: IndexMap<String, TemplateExpression>,
    pub mappings: IndexMap<String, Mapping>,
    pub outputs: IndexMap<String, TemplateOutput>,
    pub transform: Vec<String>,
    pub metadata: IndexMap<String, Json>,
}

/// Parse each entry of an optional section
fn section<T>(
    doc: &serde_json::Map<String, Json>,
    name: &str,
    parse: impl Fn(&str, &Json) -> Result<T>,
) -> Result<IndexMap<String, T>> {
    match doc.get(name) {
        None | Some(Json::Null) => Ok(IndexMap::new()),
        Some(x) => shape::object(x)
            .map_err(|_| CompileError::shape(format!("Section '{}' must be an object", name)))?
            .iter()
            .map(|(id, v)| Ok((id.clone(), parse(id, v)?)))
            .collect(),
    }
}

impl Template {
    /// Parse a template document
    pub fn from_json(doc: &Json) -> Result<Self> {
        let fields = shape::object(doc)?;
        if let Some(unknown) = fields.keys().find(|k| !SECTIONS.contains(&k.as_str())) {
            return Err(CompileError::shape(format!(
                "Unknown template section '{}'",
                unknown
            )));
        }

        let template = Template {
            description: fields.get("Description").map(shape::string).transpose()?,
            resources: section(fields, "Resources", TemplateResource::parse)?,
            parameters: section(fields, "Parameters", TemplateParameter::parse)?,
            conditions: section(fields, "Conditions", |_, x| TemplateExpression::parse(x))?,
            mappings: section(fields, "Mappings", sections::parse_mapping)?,
            outputs: section(fields, "Outputs", TemplateOutput::parse)?,
            transform: match fields.get("Transform") {
                Some(x) => shape::string_or_list(x)?,
                None => Vec::new(),
            },
            metadata: section(fields, "Metadata", |_, x| Ok(x.clone()))?,
        };

        tracing::debug!(
            resources = template.resources.len(),
            parameters = template.parameters.len(),
            outputs = template.outputs.len(),
            "parsed template"
        );
        Ok(template)
    }

    /// Parse a template from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let doc: Json = serde_json::from_str(text)
            .map_err(|e| CompileError::shape(format!("Invalid template JSON: {}", e)))?;
        Self::from_json(&doc)
    }

    /// Parse a template from YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let doc: Json = serde_yaml::from_str(text)
            .map_err(|e| CompileError::shape(format!("Invalid template YAML: {}", e)))?;
        Self::from_json(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sections_parse() {
        let template = Template::from_json(&json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Description": "demo",
            "Parameters": {"Env": {"Type": "String"}},
            "Conditions": {"IsProd": {"Fn::Equals": [{"Ref": "Env"}, "prod"]}},
            "Mappings": {"M": {"K1": {"K2": "v"}}},
            "Resources": {"Topic": {"Type": "pkg.Topic"}},
            "Outputs": {"TopicRef": {"Value": {"Ref": "Topic"}}},
            "Transform": "AWS::Serverless-2016-10-31"
        }))
        .expect("Should parse");

        assert_eq!(template.description.as_deref(), Some("demo"));
        assert_eq!(template.resources.len(), 1);
        assert!(template.conditions.contains_key("IsProd"));
        assert_eq!(template.mappings["M"]["K1"]["K2"], json!("v"));
        assert_eq!(template.transform, vec!["AWS::Serverless-2016-10-31"]);
    }

    #[test]
    fn test_unknown_section() {
        let err = Template::from_json(&json!({"Resource": {}})).unwrap_err();
        assert_eq!(err.to_string(), "Unknown template section 'Resource'");
    }

    #[test]
    fn test_yaml_keeps_declaration_order() {
        let template = Template::from_yaml_str(
            "Resources:\n  Zeta:\n    Type: pkg.A\n  Alpha:\n    Type: pkg.B\n",
        )
        .unwrap();
        let ids: Vec<&str> = template.resources.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn test_resource_errors_propagate() {
        let err = Template::from_json(&json!({
            "Resources": {"Bucket": {"Properties": {}}}
        }))
        .unwrap_err();
        assert!(matches!(err, CompileError::Shape { .. }));
    }
}
