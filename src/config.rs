//! Configuration for template compilation

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Pseudo parameters that can be referenced without being declared
const DEFAULT_PSEUDO_PARAMETERS: &[&str] = &[
    "AWS::AccountId",
    "AWS::NotificationARNs",
    "AWS::NoValue",
    "AWS::Partition",
    "AWS::Region",
    "AWS::StackId",
    "AWS::StackName",
    "AWS::URLSuffix",
];

/// Configuration options for the compiler
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    /// Base type of objects with identity and a child hierarchy
    pub construct_type: String,

    /// Class instantiated for raw platform resources
    pub raw_resource_type: String,

    /// Logical name that denotes the ambient scope in `Ref`
    pub scope_reference: String,

    /// Names that resolve to platform references without a declaration
    pub pseudo_parameters: Vec<String>,

    /// Separator that marks a type name as a raw platform resource
    pub raw_type_separator: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            construct_type: "constructs.Construct".to_string(),
            raw_resource_type: "aws-cdk-lib.CfnResource".to_string(),
            scope_reference: "CDK::Scope".to_string(),
            pseudo_parameters: DEFAULT_PSEUDO_PARAMETERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            raw_type_separator: "::".to_string(),
        }
    }
}

/// TOML structure for deserializing a configuration; every key is optional
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TomlConfig {
    construct_type: Option<String>,
    raw_resource_type: Option<String>,
    scope_reference: Option<String>,
    pseudo_parameters: Option<Vec<String>>,
    raw_type_separator: Option<String>,
}

impl CompilerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load a configuration from a TOML string, defaulting missing keys
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let parsed: TomlConfig = toml::from_str(content)?;
        let defaults = Self::default();

        Ok(Self {
            construct_type: parsed.construct_type.unwrap_or(defaults.construct_type),
            raw_resource_type: parsed
                .raw_resource_type
                .unwrap_or(defaults.raw_resource_type),
            scope_reference: parsed.scope_reference.unwrap_or(defaults.scope_reference),
            pseudo_parameters: parsed
                .pseudo_parameters
                .unwrap_or(defaults.pseudo_parameters),
            raw_type_separator: parsed
                .raw_type_separator
                .unwrap_or(defaults.raw_type_separator),
        })
    }

    /// Set the construct base type
    pub fn with_construct_type(mut self, fqn: impl Into<String>) -> Self {
        self.construct_type = fqn.into();
        self
    }

    /// Set the raw resource class
    pub fn with_raw_resource_type(mut self, fqn: impl Into<String>) -> Self {
        self.raw_resource_type = fqn.into();
        self
    }

    /// Set the logical name of the ambient scope
    pub fn with_scope_reference(mut self, name: impl Into<String>) -> Self {
        self.scope_reference = name.into();
        self
    }

    /// Replace the pseudo parameter list
    pub fn with_pseudo_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pseudo_parameters = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a type name denotes a raw platform resource
    pub fn is_raw_resource_type(&self, type_name: &str) -> bool {
        type_name.contains(self.raw_type_separator.as_str())
    }

    /// Whether a name is a pseudo parameter
    pub fn is_pseudo_parameter(&self, name: &str) -> bool {
        self.pseudo_parameters.iter().any(|p| p == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert_eq!(config.construct_type, "constructs.Construct");
        assert_eq!(config.raw_resource_type, "aws-cdk-lib.CfnResource");
        assert_eq!(config.scope_reference, "CDK::Scope");
        assert!(config.is_pseudo_parameter("AWS::Region"));
        assert!(config.is_raw_resource_type("AWS::S3::Bucket"));
        assert!(!config.is_raw_resource_type("aws-cdk-lib.aws_s3.Bucket"));
    }

    #[test]
    fn test_builder_pattern() {
        let config = CompilerConfig::new()
            .with_construct_type("core.Node")
            .with_scope_reference("Self::Scope")
            .with_pseudo_parameters(["Env::Name"]);

        assert_eq!(config.construct_type, "core.Node");
        assert_eq!(config.scope_reference, "Self::Scope");
        assert_eq!(config.pseudo_parameters, vec!["Env::Name".to_string()]);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = CompilerConfig::from_toml_str(
            r#"
construct-type = "core.Node"
pseudo-parameters = ["Env::Name"]
"#,
        )
        .expect("Should parse");

        assert_eq!(config.construct_type, "core.Node");
        assert_eq!(config.raw_resource_type, "aws-cdk-lib.CfnResource");
        assert!(config.is_pseudo_parameter("Env::Name"));
        assert!(!config.is_pseudo_parameter("AWS::Region"));
    }

    #[test]
    fn test_unknown_toml_key_error() {
        let result = CompilerConfig::from_toml_str("colour = \"blue\"");
        assert!(result.is_err());
    }
}
