//! Untyped expression tree built from raw template nodes

use indexmap::{IndexMap, IndexSet};
use serde_json::Value as Json;

use super::shape;
use super::sub::{parse_sub, SubFragment};
use crate::error::{CompileError, Result};

/// An untyped template expression
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateExpression {
    Null,
    String(String),
    Number(f64),
    Boolean(bool),
    Array(Vec<TemplateExpression>),
    Object(IndexMap<String, TemplateExpression>),
    /// Single-key object with a non-intrinsic key: an implementor or
    /// factory call, or a one-field struct. Disambiguated by type.
    Named {
        key: String,
        value: Box<TemplateExpression>,
    },
    Intrinsic(Intrinsic),
}

/// A built-in function
#[derive(Debug, Clone, PartialEq)]
pub enum Intrinsic {
    Ref(String),
    GetAtt {
        logical_id: String,
        attribute: String,
    },
    /// `property` is a dotted path of live properties
    GetProp {
        logical_id: String,
        property: String,
    },
    FindInMap {
        mapping: Box<TemplateExpression>,
        key1: Box<TemplateExpression>,
        key2: Box<TemplateExpression>,
    },
    If {
        condition: String,
        then: Box<TemplateExpression>,
        otherwise: Box<TemplateExpression>,
    },
    Sub {
        fragments: Vec<SubFragment>,
        context: IndexMap<String, TemplateExpression>,
    },
    Join {
        separator: String,
        list: Box<TemplateExpression>,
    },
    Select {
        index: Box<TemplateExpression>,
        list: Box<TemplateExpression>,
    },
    Split {
        separator: String,
        value: Box<TemplateExpression>,
    },
    ImportValue(Box<TemplateExpression>),
    Transform {
        name: String,
        parameters: IndexMap<String, TemplateExpression>,
    },
    Base64(Box<TemplateExpression>),
    Cidr {
        ip_block: Box<TemplateExpression>,
        count: Box<TemplateExpression>,
        net_mask: Option<Box<TemplateExpression>>,
    },
    GetAzs(Box<TemplateExpression>),
    And(Vec<TemplateExpression>),
    Or(Vec<TemplateExpression>),
    Not(Box<TemplateExpression>),
    Equals(Box<TemplateExpression>, Box<TemplateExpression>),
    /// Reference to a named condition
    Condition(String),
    /// Explicit argument list, bypassing scope/id injection
    Args(Vec<TemplateExpression>),
}

impl Intrinsic {
    /// The template key this intrinsic is written as
    pub fn name(&self) -> &'static str {
        match self {
            Intrinsic::Ref(_) => "Ref",
            Intrinsic::GetAtt { .. } => "Fn::GetAtt",
            Intrinsic::GetProp { .. } => "CDK::GetProp",
            Intrinsic::FindInMap { .. } => "Fn::FindInMap",
            Intrinsic::If { .. } => "Fn::If",
            Intrinsic::Sub { .. } => "Fn::Sub",
            Intrinsic::Join { .. } => "Fn::Join",
            Intrinsic::Select { .. } => "Fn::Select",
            Intrinsic::Split { .. } => "Fn::Split",
            Intrinsic::ImportValue(_) => "Fn::ImportValue",
            Intrinsic::Transform { .. } => "Fn::Transform",
            Intrinsic::Base64(_) => "Fn::Base64",
            Intrinsic::Cidr { .. } => "Fn::Cidr",
            Intrinsic::GetAzs(_) => "Fn::GetAZs",
            Intrinsic::And(_) => "Fn::And",
            Intrinsic::Or(_) => "Fn::Or",
            Intrinsic::Not(_) => "Fn::Not",
            Intrinsic::Equals(..) => "Fn::Equals",
            Intrinsic::Condition(_) => "Condition",
            Intrinsic::Args(_) => "CDK::Args",
        }
    }

    /// Whether this intrinsic names another declaration
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Intrinsic::Ref(_) | Intrinsic::GetAtt { .. } | Intrinsic::GetProp { .. }
        )
    }
}

fn is_intrinsic_key(key: &str) -> bool {
    key == "Ref" || key == "Condition" || key.starts_with("Fn::") || key.starts_with("CDK::")
}

fn boxed(x: &Json) -> Result<Box<TemplateExpression>> {
    Ok(Box::new(TemplateExpression::parse(x)?))
}

fn parse_map(x: &Json) -> Result<IndexMap<String, TemplateExpression>> {
    shape::object(x)?
        .iter()
        .map(|(k, v)| Ok((k.clone(), TemplateExpression::parse(v)?)))
        .collect()
}

fn parse_list(items: &[Json]) -> Result<Vec<TemplateExpression>> {
    items.iter().map(TemplateExpression::parse).collect()
}

/// `Id.Rest` split at the first dot
fn split_dotted(s: &str, what: &str) -> Result<(String, String)> {
    match s.split_once('.') {
        Some((id, rest)) if !id.is_empty() && !rest.is_empty() => {
            Ok((id.to_string(), rest.to_string()))
        }
        _ => Err(CompileError::shape(format!(
            "Expected '<logical id>.<{}>', got: {:?}",
            what, s
        ))),
    }
}

fn parse_intrinsic(key: &str, arg: &Json) -> Result<Intrinsic> {
    let intrinsic = match key {
        "Ref" => Intrinsic::Ref(shape::string(arg)?),
        "Fn::GetAtt" => {
            let (logical_id, attribute) = match arg {
                Json::String(s) => split_dotted(s, "attribute")?,
                _ => {
                    let xs = shape::list(arg, &[2])?;
                    (shape::string(&xs[0])?, shape::string(&xs[1])?)
                }
            };
            Intrinsic::GetAtt {
                logical_id,
                attribute,
            }
        }
        "CDK::GetProp" => {
            let (logical_id, property) = match arg {
                Json::String(s) => split_dotted(s, "property")?,
                _ => {
                    let xs = shape::list(arg, &[2])?;
                    (shape::string(&xs[0])?, shape::string(&xs[1])?)
                }
            };
            Intrinsic::GetProp {
                logical_id,
                property,
            }
        }
        "Fn::FindInMap" => {
            let xs = shape::list(arg, &[3])?;
            Intrinsic::FindInMap {
                mapping: boxed(&xs[0])?,
                key1: boxed(&xs[1])?,
                key2: boxed(&xs[2])?,
            }
        }
        "Fn::If" => {
            let xs = shape::list(arg, &[3])?;
            Intrinsic::If {
                condition: shape::string(&xs[0])?,
                then: boxed(&xs[1])?,
                otherwise: boxed(&xs[2])?,
            }
        }
        "Fn::Sub" => {
            let (body, context) = match arg {
                Json::String(s) => (s.as_str(), IndexMap::new()),
                _ => {
                    let xs = shape::list(arg, &[2])?;
                    let body = xs[0].as_str().ok_or_else(|| {
                        CompileError::shape(format!(
                            "Expected string, got: {}",
                            xs[0]
                        ))
                    })?;
                    (body, parse_map(&xs[1])?)
                }
            };
            Intrinsic::Sub {
                fragments: parse_sub(body)?,
                context,
            }
        }
        "Fn::Join" => {
            let xs = shape::list(arg, &[2])?;
            Intrinsic::Join {
                separator: shape::string(&xs[0])?,
                list: boxed(&xs[1])?,
            }
        }
        "Fn::Select" => {
            let xs = shape::list(arg, &[2])?;
            Intrinsic::Select {
                index: boxed(&xs[0])?,
                list: boxed(&xs[1])?,
            }
        }
        "Fn::Split" => {
            let xs = shape::list(arg, &[2])?;
            Intrinsic::Split {
                separator: shape::string(&xs[0])?,
                value: boxed(&xs[1])?,
            }
        }
        "Fn::ImportValue" => Intrinsic::ImportValue(boxed(arg)?),
        "Fn::Transform" => {
            let fields = shape::object(arg)?;
            shape::known_fields(fields, &["Name", "Parameters"], "Fn::Transform")?;
            Intrinsic::Transform {
                name: shape::string(shape::field(fields, "Name")?)?,
                parameters: match fields.get("Parameters") {
                    Some(p) => parse_map(p)?,
                    None => IndexMap::new(),
                },
            }
        }
        "Fn::Base64" => Intrinsic::Base64(boxed(arg)?),
        "Fn::Cidr" => {
            let xs = shape::list(arg, &[2, 3])?;
            Intrinsic::Cidr {
                ip_block: boxed(&xs[0])?,
                count: boxed(&xs[1])?,
                net_mask: xs.get(2).map(boxed).transpose()?,
            }
        }
        "Fn::GetAZs" => Intrinsic::GetAzs(boxed(arg)?),
        "Fn::And" | "Fn::Or" => {
            let xs = shape::list(arg, &[])?;
            if xs.is_empty() {
                return Err(CompileError::shape(format!(
                    "{} expects at least one condition",
                    key
                )));
            }
            let operands = parse_list(xs)?;
            if key == "Fn::And" {
                Intrinsic::And(operands)
            } else {
                Intrinsic::Or(operands)
            }
        }
        "Fn::Not" => {
            let xs = shape::list(arg, &[1])?;
            Intrinsic::Not(boxed(&xs[0])?)
        }
        "Fn::Equals" => {
            let xs = shape::list(arg, &[2])?;
            Intrinsic::Equals(boxed(&xs[0])?, boxed(&xs[1])?)
        }
        "Condition" => Intrinsic::Condition(shape::string(arg)?),
        "CDK::Args" => Intrinsic::Args(parse_list(shape::list(arg, &[])?)?),
        other => {
            return Err(CompileError::shape(format!(
                "Unrecognized intrinsic function: '{}'",
                other
            )))
        }
    };
    Ok(intrinsic)
}

impl TemplateExpression {
    /// Build an expression from a raw template node
    pub fn parse(x: &Json) -> Result<Self> {
        Ok(match x {
            Json::Null => TemplateExpression::Null,
            Json::Bool(b) => TemplateExpression::Boolean(*b),
            Json::Number(_) => TemplateExpression::Number(shape::number(x)?),
            Json::String(s) => TemplateExpression::String(s.clone()),
            Json::Array(items) => TemplateExpression::Array(parse_list(items)?),
            Json::Object(fields) if fields.len() == 1 => {
                let (key, value) = shape::one_field(x)?;
                if is_intrinsic_key(key) {
                    TemplateExpression::Intrinsic(parse_intrinsic(key, value)?)
                } else {
                    TemplateExpression::Named {
                        key: key.to_string(),
                        value: boxed(value)?,
                    }
                }
            }
            Json::Object(_) => TemplateExpression::Object(parse_map(x)?),
        })
    }

    /// Parse an optional property bag
    pub fn parse_object(x: Option<&Json>) -> Result<IndexMap<String, TemplateExpression>> {
        match x {
            None | Some(Json::Null) => Ok(IndexMap::new()),
            Some(x) => parse_map(x),
        }
    }

    /// Named fields of an object-shaped expression
    pub fn fields(&self) -> Option<IndexMap<String, TemplateExpression>> {
        match self {
            TemplateExpression::Object(fields) => Some(fields.clone()),
            TemplateExpression::Named { key, value } => {
                let mut fields = IndexMap::new();
                fields.insert(key.clone(), (**value).clone());
                Some(fields)
            }
            _ => None,
        }
    }

    /// Visit the direct sub-expressions
    fn for_each_child<'a>(&'a self, f: &mut dyn FnMut(&'a TemplateExpression)) {
        let intrinsic = match self {
            TemplateExpression::Null
            | TemplateExpression::String(_)
            | TemplateExpression::Number(_)
            | TemplateExpression::Boolean(_) => return,
            TemplateExpression::Array(items) => return items.iter().for_each(f),
            TemplateExpression::Object(fields) => return fields.values().for_each(f),
            TemplateExpression::Named { value, .. } => return f(&**value),
            TemplateExpression::Intrinsic(intrinsic) => intrinsic,
        };
        match intrinsic {
            Intrinsic::Ref(_)
            | Intrinsic::GetAtt { .. }
            | Intrinsic::GetProp { .. }
            | Intrinsic::Condition(_) => {}
            Intrinsic::Base64(x)
            | Intrinsic::ImportValue(x)
            | Intrinsic::GetAzs(x)
            | Intrinsic::Not(x)
            | Intrinsic::Join { list: x, .. }
            | Intrinsic::Split { value: x, .. } => f(&**x),
            Intrinsic::Cidr {
                ip_block,
                count,
                net_mask,
            } => {
                f(&**ip_block);
                f(&**count);
                if let Some(mask) = net_mask {
                    f(&**mask);
                }
            }
            Intrinsic::FindInMap {
                mapping,
                key1,
                key2,
            } => {
                f(&**mapping);
                f(&**key1);
                f(&**key2);
            }
            Intrinsic::If {
                then, otherwise, ..
            } => {
                f(&**then);
                f(&**otherwise);
            }
            Intrinsic::Sub { context, .. } => context.values().for_each(f),
            Intrinsic::Select { index, list } => {
                f(&**index);
                f(&**list);
            }
            Intrinsic::Transform { parameters, .. } => parameters.values().for_each(f),
            Intrinsic::And(xs) | Intrinsic::Or(xs) | Intrinsic::Args(xs) => xs.iter().for_each(f),
            Intrinsic::Equals(a, b) => {
                f(&**a);
                f(&**b);
            }
        }
    }

    /// Collect the logical ids this expression refers to
    pub fn referenced_logical_ids(&self, into: &mut IndexSet<String>) {
        if let TemplateExpression::Intrinsic(intrinsic) = self {
            match intrinsic {
                Intrinsic::Ref(id) => {
                    into.insert(id.clone());
                }
                Intrinsic::GetAtt { logical_id, .. } | Intrinsic::GetProp { logical_id, .. } => {
                    into.insert(logical_id.clone());
                }
                Intrinsic::Sub { fragments, context } => {
                    for fragment in fragments {
                        let id = match fragment {
                            SubFragment::Literal(_) => continue,
                            SubFragment::Ref(id) => id,
                            SubFragment::GetAtt { logical_id, .. } => logical_id,
                        };
                        if !context.contains_key(id) {
                            into.insert(id.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        self.for_each_child(&mut |x| x.referenced_logical_ids(into));
    }

    /// Collect the names of the conditions this expression evaluates
    pub fn referenced_conditions(&self, into: &mut IndexSet<String>) {
        if let TemplateExpression::Intrinsic(
            Intrinsic::If { condition: name, .. } | Intrinsic::Condition(name),
        ) = self
        {
            into.insert(name.clone());
        }
        self.for_each_child(&mut |x| x.referenced_conditions(into));
    }

    /// Short rendering used in error messages
    pub fn describe(&self) -> String {
        match self {
            TemplateExpression::Null => "null".to_string(),
            TemplateExpression::String(s) => format!("{:?}", s),
            TemplateExpression::Number(n) => crate::runtime::number_to_json(*n).to_string(),
            TemplateExpression::Boolean(b) => b.to_string(),
            TemplateExpression::Array(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.describe()).collect();
                format!("[{}]", parts.join(","))
            }
            TemplateExpression::Object(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{:?}:{}", k, v.describe()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
            TemplateExpression::Named { key, value } => {
                format!("{{{:?}:{}}}", key, value.describe())
            }
            TemplateExpression::Intrinsic(i) => format!("{{{:?}:...}}", i.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ids(x: Json) -> Vec<String> {
        let mut into = IndexSet::new();
        TemplateExpression::parse(&x)
            .expect("Should parse")
            .referenced_logical_ids(&mut into);
        into.into_iter().collect()
    }

    #[test]
    fn test_literals_pass_through() {
        assert_eq!(
            TemplateExpression::parse(&json!([1, "a", true, null])).unwrap(),
            TemplateExpression::Array(vec![
                TemplateExpression::Number(1.0),
                TemplateExpression::String("a".into()),
                TemplateExpression::Boolean(true),
                TemplateExpression::Null,
            ])
        );
    }

    #[test]
    fn test_single_key_object_is_named() {
        let x = TemplateExpression::parse(&json!({"pkg.Queue": {"fifo": true}})).unwrap();
        assert!(matches!(x, TemplateExpression::Named { ref key, .. } if key == "pkg.Queue"));
    }

    #[test]
    fn test_get_att_forms() {
        let a = TemplateExpression::parse(&json!({"Fn::GetAtt": "Bucket.Arn"})).unwrap();
        let b = TemplateExpression::parse(&json!({"Fn::GetAtt": ["Bucket", "Arn"]})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_intrinsic_fails_fast() {
        let err = TemplateExpression::parse(&json!({"Fn::Frobnicate": [1]})).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Unrecognized intrinsic function: 'Fn::Frobnicate'");
        assert!(TemplateExpression::parse(&json!({"CDK::Nope": 1})).is_err());
    }

    #[test]
    fn test_arity_checked() {
        let err = TemplateExpression::parse(&json!({"Fn::If": ["C", 1]})).unwrap_err();
        assert_eq!(err.to_string(), "Expected list of length 3, got 2");
    }

    #[test]
    fn test_reference_discovery() {
        let found = ids(json!({
            "a": {"Ref": "A"},
            "b": [{"Fn::GetAtt": ["B", "Arn"]}],
            "c": {"Fn::If": ["Cond", {"Ref": "C1"}, {"CDK::GetProp": "C2.prop"}]},
            "d": {"Fn::FindInMap": ["Map", {"Ref": "D1"}, "k"]},
            "e": {"pkg.Thing": {"Fn::Base64": {"Ref": "E"}}},
        }));
        assert_eq!(found, vec!["A", "B", "C1", "C2", "D1", "E"]);
    }

    #[test]
    fn test_sub_discovery_skips_context_keys() {
        let found = ids(json!({
            "Fn::Sub": ["${Local}-${Bucket.Arn}-${AWS::Region}", {"Local": {"Ref": "Param"}}]
        }));
        assert_eq!(found, vec!["Bucket", "AWS::Region", "Param"]);
    }

    #[test]
    fn test_condition_discovery() {
        let x = TemplateExpression::parse(&json!({
            "Fn::And": [
                {"Condition": "IsProd"},
                {"Fn::Not": [{"Fn::If": ["HasBucket", {"Condition": "IsEu"}, false]}]}
            ]
        }))
        .unwrap();
        let mut found = IndexSet::new();
        x.referenced_conditions(&mut found);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["IsProd", "HasBucket", "IsEu"]);
    }

    #[test]
    fn test_fields_of_named() {
        let x = TemplateExpression::parse(&json!({"fifo": true})).unwrap();
        let fields = x.fields().unwrap();
        assert_eq!(fields.get("fifo"), Some(&TemplateExpression::Boolean(true)));
    }
}
