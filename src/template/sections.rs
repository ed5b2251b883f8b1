//! Parameters, mappings and outputs

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use super::expression::TemplateExpression;
use super::shape;
use crate::error::{CompileError, Result};

const PARAMETER_FIELDS: &[&str] = &[
    "Type",
    "Default",
    "Description",
    "AllowedValues",
    "AllowedPattern",
    "ConstraintDescription",
    "MinLength",
    "MaxLength",
    "MinValue",
    "MaxValue",
    "NoEcho",
];

const OUTPUT_FIELDS: &[&str] = &["Value", "Description", "Export", "Condition"];

/// A declared template parameter
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParameter {
    pub parameter_type: String,
    pub default: Option<Json>,
    pub description: Option<String>,
    pub allowed_values: Vec<Json>,
    pub allowed_pattern: Option<String>,
    pub constraint_description: Option<String>,
    pub min_length: Option<f64>,
    pub max_length: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub no_echo: bool,
}

impl Default for TemplateParameter {
    fn default() -> Self {
        Self {
            parameter_type: "String".to_string(),
            default: None,
            description: None,
            allowed_values: Vec::new(),
            allowed_pattern: None,
            constraint_description: None,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            no_echo: false,
        }
    }
}

impl TemplateParameter {
    pub fn parse(name: &str, x: &Json) -> Result<Self> {
        let fields = shape::object(x)?;
        shape::known_fields(fields, PARAMETER_FIELDS, &format!("In parameter '{}'", name))?;

        let string = |key: &str| fields.get(key).map(shape::string).transpose();
        let number = |key: &str| fields.get(key).map(shape::number).transpose();

        Ok(TemplateParameter {
            parameter_type: string("Type")?.unwrap_or_else(|| "String".to_string()),
            default: fields.get("Default").cloned(),
            description: string("Description")?,
            allowed_values: match fields.get("AllowedValues") {
                Some(values) => shape::list(values, &[])?.to_vec(),
                None => Vec::new(),
            },
            allowed_pattern: string("AllowedPattern")?,
            constraint_description: string("ConstraintDescription")?,
            min_length: number("MinLength")?,
            max_length: number("MaxLength")?,
            min_value: number("MinValue")?,
            max_value: number("MaxValue")?,
            no_echo: fields
                .get("NoEcho")
                .map(shape::boolean)
                .transpose()?
                .unwrap_or(false),
        })
    }

    /// Render in template form
    pub fn to_json(&self) -> Json {
        let mut out = Map::new();
        out.insert("Type".to_string(), Json::String(self.parameter_type.clone()));
        if let Some(default) = &self.default {
            out.insert("Default".to_string(), default.clone());
        }
        if let Some(description) = &self.description {
            out.insert("Description".to_string(), Json::String(description.clone()));
        }
        if !self.allowed_values.is_empty() {
            out.insert(
                "AllowedValues".to_string(),
                Json::Array(self.allowed_values.clone()),
            );
        }
        if let Some(pattern) = &self.allowed_pattern {
            out.insert("AllowedPattern".to_string(), Json::String(pattern.clone()));
        }
        if let Some(text) = &self.constraint_description {
            out.insert(
                "ConstraintDescription".to_string(),
                Json::String(text.clone()),
            );
        }
        for (key, value) in [
            ("MinLength", self.min_length),
            ("MaxLength", self.max_length),
            ("MinValue", self.min_value),
            ("MaxValue", self.max_value),
        ] {
            if let Some(n) = value {
                out.insert(key.to_string(), crate::runtime::number_to_json(n));
            }
        }
        if self.no_echo {
            out.insert("NoEcho".to_string(), Json::Bool(true));
        }
        Json::Object(out)
    }
}

/// Two-level lookup table used by `Fn::FindInMap`
pub type Mapping = IndexMap<String, IndexMap<String, Json>>;

pub fn parse_mapping(name: &str, x: &Json) -> Result<Mapping> {
    shape::object(x)?
        .iter()
        .map(|(key1, level)| {
            let level = shape::object(level).map_err(|_| {
                CompileError::shape(format!(
                    "In mapping '{}': expected an object under '{}'",
                    name, key1
                ))
            })?;
            Ok((
                key1.clone(),
                level.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ))
        })
        .collect()
}

/// A declared template output
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOutput {
    pub value: TemplateExpression,
    pub description: Option<String>,
    pub export_name: Option<TemplateExpression>,
    pub condition: Option<String>,
}

impl TemplateOutput {
    pub fn parse(name: &str, x: &Json) -> Result<Self> {
        let fields = shape::object(x)?;
        shape::known_fields(fields, OUTPUT_FIELDS, &format!("In output '{}'", name))?;

        let export_name = match fields.get("Export") {
            Some(export) => {
                let export = shape::object(export)?;
                Some(TemplateExpression::parse(shape::field(export, "Name")?)?)
            }
            None => None,
        };

        Ok(TemplateOutput {
            value: TemplateExpression::parse(shape::field(fields, "Value")?)?,
            description: fields.get("Description").map(shape::string).transpose()?,
            export_name,
            condition: fields.get("Condition").map(shape::string).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_defaults_to_string() {
        let p = TemplateParameter::parse("Env", &json!({"Default": "dev"})).unwrap();
        assert_eq!(p.parameter_type, "String");
        assert_eq!(p.default, Some(json!("dev")));
        assert_eq!(p.to_json(), json!({"Type": "String", "Default": "dev"}));
    }

    #[test]
    fn test_parameter_constraints() {
        let p = TemplateParameter::parse(
            "Size",
            &json!({"Type": "Number", "MinValue": 1, "MaxValue": "10", "NoEcho": "true"}),
        )
        .unwrap();
        assert_eq!(p.min_value, Some(1.0));
        assert_eq!(p.max_value, Some(10.0));
        assert!(p.no_echo);
    }

    #[test]
    fn test_parameter_unknown_field() {
        assert!(TemplateParameter::parse("X", &json!({"Typo": 1})).is_err());
    }

    #[test]
    fn test_mapping_levels() {
        let m = parse_mapping("Regions", &json!({"us-east-1": {"ami": "ami-1"}})).unwrap();
        assert_eq!(m["us-east-1"]["ami"], json!("ami-1"));
        assert!(parse_mapping("Bad", &json!({"k": "flat"})).is_err());
    }

    #[test]
    fn test_output_requires_value() {
        let err = TemplateOutput::parse("Out", &json!({"Description": "d"})).unwrap_err();
        assert_eq!(err.to_string(), "Expected field named 'Value'");

        let out = TemplateOutput::parse(
            "Out",
            &json!({"Value": {"Ref": "Bucket"}, "Export": {"Name": "shared"}}),
        )
        .unwrap();
        assert_eq!(
            out.export_name,
            Some(TemplateExpression::String("shared".to_string()))
        );
    }
}
