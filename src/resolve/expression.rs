//! Type-directed resolution of untyped expressions

use indexmap::IndexMap;

use super::typed::{TypedExpression, TypedIntrinsic};
use crate::catalog::{Primitive, TypeCatalog, TypeDef, TypeKind, TypeRef};
use crate::config::CompilerConfig;
use crate::error::{CompileError, Result};
use crate::template::{CallArguments, Intrinsic, TemplateExpression};

/// The untyped position type
pub const ANY: TypeRef = TypeRef::Primitive(Primitive::Any);

/// Extend a resolution path by one segment
pub(crate) fn child(path: &[String], segment: impl Into<String>) -> Vec<String> {
    let mut next = path.to_vec();
    next.push(segment.into());
    next
}

/// Resolves untyped expressions against types from a [`TypeCatalog`]
///
/// `path` threads the location of the expression below its resource
/// (logical id, then property names, array indices and parameter names)
/// and becomes the id of any construct created at that position.
pub struct TypeResolver<'a> {
    pub(crate) catalog: &'a dyn TypeCatalog,
    pub(crate) config: &'a CompilerConfig,
}

impl<'a> TypeResolver<'a> {
    pub fn new(catalog: &'a dyn TypeCatalog, config: &'a CompilerConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &'a dyn TypeCatalog {
        self.catalog
    }

    pub fn config(&self) -> &'a CompilerConfig {
        self.config
    }

    /// Look up a type, failing with a reference error
    pub fn find_type(&self, fqn: &str) -> Result<&'a TypeDef> {
        self.catalog
            .find_type(fqn)
            .ok_or_else(|| CompileError::reference(format!("Unknown type '{}'", fqn)))
    }

    /// Resolve `x` against `expected`
    pub fn resolve(
        &self,
        x: &TemplateExpression,
        expected: &TypeRef,
        path: &[String],
    ) -> Result<TypedExpression> {
        if let TemplateExpression::Intrinsic(intrinsic) = x {
            return self.resolve_intrinsic(intrinsic, expected, path);
        }

        match expected {
            TypeRef::Primitive(Primitive::Any | Primitive::Json) => self.resolve_untyped(x, path),
            _ if matches!(x, TemplateExpression::Null) => Ok(TypedExpression::Void),
            TypeRef::Primitive(p) => resolve_primitive(x, *p),
            TypeRef::List { list } => match x {
                TemplateExpression::Array(items) => Ok(TypedExpression::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| self.resolve(item, list, &child(path, i.to_string())))
                        .collect::<Result<_>>()?,
                )),
                other => Err(mismatch("list", other)),
            },
            TypeRef::Map { map } => match x.fields() {
                Some(fields) => Ok(TypedExpression::Object(
                    fields
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), self.resolve(v, map, &child(path, k))?)))
                        .collect::<Result<_>>()?,
                )),
                None => Err(mismatch("map", x)),
            },
            TypeRef::Union { union } => {
                let mut rejected = Vec::with_capacity(union.len());
                for variant in union {
                    match self.resolve(x, variant, path) {
                        Ok(resolved) => return Ok(resolved),
                        Err(e) => rejected.push(format!("{}: {}", variant, e)),
                    }
                }
                Err(CompileError::type_mismatch(format!(
                    "expected {}, got {} ({})",
                    expected,
                    x.describe(),
                    rejected.join("; ")
                )))
            }
            TypeRef::Named { fqn } => {
                let def = self.find_type(fqn)?;
                match &def.kind {
                    TypeKind::Enum { members } => resolve_enum(x, def, members),
                    TypeKind::Interface { datatype: true, .. } => self.resolve_struct(x, def, path),
                    _ => self.resolve_object_type(x, def, path),
                }
            }
        }
    }

    /// Resolve without an expected type: literals and containers pass through
    pub fn resolve_untyped(&self, x: &TemplateExpression, path: &[String]) -> Result<TypedExpression> {
        Ok(match x {
            TemplateExpression::Null => TypedExpression::Null,
            TemplateExpression::String(s) => TypedExpression::String(s.clone()),
            TemplateExpression::Number(n) => TypedExpression::Number(*n),
            TemplateExpression::Boolean(b) => TypedExpression::Boolean(*b),
            TemplateExpression::Array(items) => TypedExpression::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.resolve_untyped(item, &child(path, i.to_string())))
                    .collect::<Result<_>>()?,
            ),
            TemplateExpression::Object(_) | TemplateExpression::Named { .. } => {
                let fields = x.fields().unwrap_or_default();
                TypedExpression::Object(
                    fields
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), self.resolve_untyped(v, &child(path, k))?)))
                        .collect::<Result<_>>()?,
                )
            }
            TemplateExpression::Intrinsic(intrinsic) => {
                self.resolve_intrinsic(intrinsic, &ANY, path)?
            }
        })
    }

    /// Whether a reference at this position denotes the live object
    fn expects_object(&self, expected: &TypeRef) -> bool {
        match expected {
            TypeRef::Named { fqn } => self
                .catalog
                .find_type(fqn)
                .map(|t| t.is_object_type())
                .unwrap_or(false),
            TypeRef::Union { union } => union.iter().any(|t| self.expects_object(t)),
            _ => false,
        }
    }

    fn resolve_intrinsic(
        &self,
        intrinsic: &Intrinsic,
        expected: &TypeRef,
        path: &[String],
    ) -> Result<TypedExpression> {
        let any = |x: &TemplateExpression| self.resolve_untyped(x, path);
        let boxed_any = |x: &TemplateExpression| Ok::<_, CompileError>(any(x)?.boxed());

        let typed = match intrinsic {
            Intrinsic::Ref(id) if *id == self.config.scope_reference => {
                return Ok(TypedExpression::Scope)
            }
            Intrinsic::Ref(id) if self.expects_object(expected) => {
                return Ok(TypedExpression::ResolveReference {
                    logical_id: id.clone(),
                    path: Vec::new(),
                })
            }
            Intrinsic::Ref(id) => TypedIntrinsic::Ref(id.clone()),
            Intrinsic::GetAtt {
                logical_id,
                attribute,
            } => TypedIntrinsic::GetAtt {
                logical_id: logical_id.clone(),
                attribute: attribute.clone(),
            },
            Intrinsic::GetProp {
                logical_id,
                property,
            } => {
                return Ok(TypedExpression::ResolveReference {
                    logical_id: logical_id.clone(),
                    path: property.split('.').map(str::to_string).collect(),
                })
            }
            Intrinsic::FindInMap {
                mapping,
                key1,
                key2,
            } => TypedIntrinsic::FindInMap {
                mapping: boxed_any(mapping)?,
                key1: boxed_any(key1)?,
                key2: boxed_any(key2)?,
            },
            Intrinsic::If {
                condition,
                then,
                otherwise,
            } => TypedIntrinsic::If {
                condition: condition.clone(),
                then: self.resolve(then, expected, path)?.boxed(),
                otherwise: self.resolve(otherwise, expected, path)?.boxed(),
            },
            Intrinsic::Sub { fragments, context } => TypedIntrinsic::Sub {
                fragments: fragments.clone(),
                context: resolve_fields(context, any)?,
            },
            Intrinsic::Join { separator, list } => TypedIntrinsic::Join {
                separator: separator.clone(),
                list: boxed_any(list)?,
            },
            Intrinsic::Select { index, list } => TypedIntrinsic::Select {
                index: boxed_any(index)?,
                list: boxed_any(list)?,
            },
            Intrinsic::Split { separator, value } => TypedIntrinsic::Split {
                separator: separator.clone(),
                value: boxed_any(value)?,
            },
            Intrinsic::ImportValue(x) => TypedIntrinsic::ImportValue(boxed_any(x)?),
            Intrinsic::Transform { name, parameters } => TypedIntrinsic::Transform {
                name: name.clone(),
                parameters: resolve_fields(parameters, any)?,
            },
            Intrinsic::Base64(x) => TypedIntrinsic::Base64(boxed_any(x)?),
            Intrinsic::Cidr {
                ip_block,
                count,
                net_mask,
            } => TypedIntrinsic::Cidr {
                ip_block: boxed_any(ip_block)?,
                count: boxed_any(count)?,
                net_mask: net_mask.as_deref().map(boxed_any).transpose()?,
            },
            Intrinsic::GetAzs(x) => TypedIntrinsic::GetAzs(boxed_any(x)?),
            Intrinsic::And(xs) => TypedIntrinsic::And(xs.iter().map(any).collect::<Result<_>>()?),
            Intrinsic::Or(xs) => TypedIntrinsic::Or(xs.iter().map(any).collect::<Result<_>>()?),
            Intrinsic::Not(x) => TypedIntrinsic::Not(boxed_any(x)?),
            Intrinsic::Equals(a, b) => TypedIntrinsic::Equals(boxed_any(a)?, boxed_any(b)?),
            Intrinsic::Condition(name) => TypedIntrinsic::Condition(name.clone()),
            Intrinsic::Args(_) => {
                return Err(CompileError::shape(
                    "CDK::Args is only valid as the argument list of a call",
                ))
            }
        };
        Ok(TypedExpression::Intrinsic(typed))
    }

    /// Resolve a data-only interface field by field
    fn resolve_struct(
        &self,
        x: &TemplateExpression,
        def: &TypeDef,
        path: &[String],
    ) -> Result<TypedExpression> {
        let fields = x.fields().ok_or_else(|| {
            CompileError::type_mismatch(format!(
                "Expected object for struct {}, got {}",
                def.fqn,
                x.describe()
            ))
        })?;
        let properties: Vec<_> = self
            .catalog
            .all_properties(def)
            .into_iter()
            .filter(|p| !p.is_static)
            .collect();

        let mut resolved = IndexMap::new();
        for (name, value) in &fields {
            let property = properties.iter().find(|p| p.name == *name).ok_or_else(|| {
                let names: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
                CompileError::type_mismatch(format!(
                    "Unknown field '{}' for struct {}, expected one of: {}",
                    name,
                    def.fqn,
                    names.join(", ")
                ))
            })?;
            let typed = self.resolve(value, &property.type_ref, &child(path, name))?;
            if !matches!(typed, TypedExpression::Void) {
                resolved.insert(name.clone(), typed);
            }
        }

        if let Some(missing) = properties
            .iter()
            .find(|p| !p.optional && !resolved.contains_key(&p.name))
        {
            return Err(CompileError::type_mismatch(format!(
                "Missing required field '{}' for struct {}",
                missing.name, def.fqn
            )));
        }

        Ok(TypedExpression::Struct {
            fqn: def.fqn.clone(),
            fields: resolved,
        })
    }

    /// Resolve against a class or behavioral interface
    fn resolve_object_type(
        &self,
        x: &TemplateExpression,
        def: &TypeDef,
        path: &[String],
    ) -> Result<TypedExpression> {
        match x {
            TemplateExpression::Named { key, value } => {
                let arguments = CallArguments::from_expression(value);
                match self.catalog.find_type(key) {
                    Some(class) => self.resolve_initializer(class, def, &arguments, path),
                    None if matches!(
                        self.find_static_method(key, &arguments),
                        Err(CompileError::Reference { .. })
                    ) =>
                    {
                        Err(CompileError::overload(
                            format!("'{}' matches no implementation of {}", key, def.fqn),
                            self.catalog
                                .implementors(&def.fqn)
                                .iter()
                                .map(|t| t.fqn.clone())
                                .collect(),
                        ))
                    }
                    None => self.resolve_static_call(
                        key,
                        &arguments,
                        Some(&TypeRef::named(def.fqn.clone())),
                        path,
                    ),
                }
            }
            TemplateExpression::String(name)
                if def.is_class()
                    && self
                        .catalog
                        .all_properties(def)
                        .iter()
                        .any(|p| p.is_static && p.name == *name) =>
            {
                Ok(TypedExpression::StaticProperty {
                    fqn: def.fqn.clone(),
                    property: name.clone(),
                })
            }
            other => Err(CompileError::type_mismatch(format!(
                "Expected {}, got {}",
                def,
                other.describe()
            ))),
        }
    }

    /// `class` must be a concrete implementation of `expected`
    fn resolve_initializer(
        &self,
        class: &TypeDef,
        expected: &TypeDef,
        arguments: &CallArguments,
        path: &[String],
    ) -> Result<TypedExpression> {
        let implementors = self.catalog.implementors(&expected.fqn);
        if !implementors.iter().any(|t| t.fqn == class.fqn) {
            return Err(CompileError::overload(
                format!(
                    "'{}' is not a concrete implementation of {}",
                    class.fqn, expected.fqn
                ),
                implementors.iter().map(|t| t.fqn.clone()).collect(),
            ));
        }
        let initializer = class.initializer().ok_or_else(|| {
            CompileError::type_mismatch(format!("Expected class initializer, got {}", class))
        })?;
        let args = self.resolve_arguments(
            arguments,
            &initializer.parameters,
            &format!("{} initializer", class.fqn),
            path,
        )?;
        Ok(TypedExpression::Initializer {
            fqn: class.fqn.clone(),
            args,
        })
    }
}

fn resolve_fields(
    fields: &IndexMap<String, TemplateExpression>,
    resolve: impl Fn(&TemplateExpression) -> Result<TypedExpression>,
) -> Result<IndexMap<String, TypedExpression>> {
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve(v)?)))
        .collect()
}

fn mismatch(kind: &str, x: &TemplateExpression) -> CompileError {
    CompileError::type_mismatch(format!("expected {}, got {}", kind, x.describe()))
}

fn resolve_primitive(x: &TemplateExpression, primitive: Primitive) -> Result<TypedExpression> {
    let kind = primitive.to_string();
    match (primitive, x) {
        (Primitive::String, TemplateExpression::String(s)) => Ok(TypedExpression::String(s.clone())),
        (Primitive::Number, TemplateExpression::Number(n)) => Ok(TypedExpression::Number(*n)),
        (Primitive::Number, TemplateExpression::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(TypedExpression::Number)
            .ok_or_else(|| mismatch(&kind, x)),
        (Primitive::Boolean, TemplateExpression::Boolean(b)) => Ok(TypedExpression::Boolean(*b)),
        (Primitive::Boolean, TemplateExpression::String(s)) if s == "true" => {
            Ok(TypedExpression::Boolean(true))
        }
        (Primitive::Boolean, TemplateExpression::String(s)) if s == "false" => {
            Ok(TypedExpression::Boolean(false))
        }
        (Primitive::Date, TemplateExpression::String(s)) => Ok(TypedExpression::Date(s.clone())),
        _ => Err(mismatch(&kind, x)),
    }
}

fn resolve_enum(x: &TemplateExpression, def: &TypeDef, members: &[String]) -> Result<TypedExpression> {
    match x {
        TemplateExpression::String(choice) if members.contains(choice) => {
            Ok(TypedExpression::EnumMember {
                fqn: def.fqn.clone(),
                member: choice.clone(),
            })
        }
        other => {
            let got = match other {
                TemplateExpression::String(s) => s.clone(),
                _ => other.describe(),
            };
            Err(CompileError::type_mismatch(format!(
                "Expected choice for enum type {} to be one of {}, got: {}",
                def.fqn,
                members.join("|"),
                got
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TypeRegistry;
    use crate::template::SubFragment;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TABLE: &str = r#"{"types": [
        {"fqn": "constructs.Construct", "kind": "class"},
        {"fqn": "pkg.Encryption", "kind": "enum", "members": ["NONE", "KMS_MANAGED", "KMS"]},
        {"fqn": "pkg.IQueue", "kind": "interface"},
        {"fqn": "pkg.Queue", "kind": "class", "base": "constructs.Construct",
         "interfaces": ["pkg.IQueue"],
         "initializer": {"parameters": [
            {"name": "scope", "type": {"fqn": "constructs.Construct"}},
            {"name": "id", "type": "string"},
            {"name": "props", "type": {"fqn": "pkg.QueueProps"}, "optional": true}]},
         "methods": [
            {"name": "fromQueueArn", "static": true, "returns": {"fqn": "pkg.IQueue"},
             "parameters": [
                {"name": "scope", "type": {"fqn": "constructs.Construct"}},
                {"name": "id", "type": "string"},
                {"name": "queueArn", "type": "string"}]}]},
        {"fqn": "pkg.FifoQueue", "kind": "class", "base": "pkg.Queue",
         "initializer": {"parameters": [
            {"name": "scope", "type": {"fqn": "constructs.Construct"}},
            {"name": "id", "type": "string"}]}},
        {"fqn": "pkg.QueueProps", "kind": "interface", "datatype": true,
         "properties": [
            {"name": "encryption", "type": {"fqn": "pkg.Encryption"}, "optional": true},
            {"name": "retention", "type": "number", "optional": true},
            {"name": "deadLetterQueue", "type": {"fqn": "pkg.IQueue"}, "optional": true}]},
        {"fqn": "pkg.RedrivePolicy", "kind": "interface", "datatype": true,
         "properties": [{"name": "maxReceiveCount", "type": "number"}]},
        {"fqn": "pkg.Runtime", "kind": "class",
         "properties": [{"name": "PYTHON_3_9", "type": {"fqn": "pkg.Runtime"}, "static": true}]}
    ]}"#;

    fn resolve(x: serde_json::Value, ty: TypeRef) -> Result<TypedExpression> {
        let registry = TypeRegistry::from_json_str(TABLE).expect("Should load");
        let config = CompilerConfig::default();
        let resolver = TypeResolver::new(&registry, &config);
        let expr = TemplateExpression::parse(&x).expect("Should parse");
        resolver.resolve(&expr, &ty, &["Res".to_string()])
    }

    #[test]
    fn test_primitive_leniency() {
        assert_eq!(
            resolve(json!("42"), TypeRef::Primitive(Primitive::Number)).unwrap(),
            TypedExpression::Number(42.0)
        );
        assert_eq!(
            resolve(json!("true"), TypeRef::Primitive(Primitive::Boolean)).unwrap(),
            TypedExpression::Boolean(true)
        );
        let err = resolve(json!(5), TypeRef::Primitive(Primitive::String)).unwrap_err();
        assert_eq!(err.to_string(), "expected string, got 5");
    }

    #[test]
    fn test_non_finite_numeric_strings_rejected() {
        for text in ["inf", "-infinity", "NaN"] {
            let err = resolve(json!(text), TypeRef::Primitive(Primitive::Number)).unwrap_err();
            assert_eq!(err.to_string(), format!("expected number, got {:?}", text));
        }
    }

    #[test]
    fn test_enum_choices() {
        let ty = TypeRef::named("pkg.Encryption");
        assert_eq!(
            resolve(json!("KMS"), ty.clone()).unwrap(),
            TypedExpression::EnumMember {
                fqn: "pkg.Encryption".into(),
                member: "KMS".into()
            }
        );
        let err = resolve(json!("boom"), ty).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"Expected choice for enum type pkg.Encryption to be one of NONE|KMS_MANAGED|KMS, got: boom");
    }

    #[test]
    fn test_struct_rejects_unknown_fields() {
        let err = resolve(json!({"colour": "red"}), TypeRef::named("pkg.QueueProps")).unwrap_err();
        assert!(err.to_string().starts_with("Unknown field 'colour' for struct pkg.QueueProps"));
    }

    #[test]
    fn test_struct_single_field_is_not_a_call() {
        let typed = resolve(json!({"retention": "60"}), TypeRef::named("pkg.QueueProps")).unwrap();
        match typed {
            TypedExpression::Struct { fields, .. } => {
                assert_eq!(fields["retention"], TypedExpression::Number(60.0));
            }
            other => panic!("Expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_implementor_selected_by_key() {
        let typed = resolve(json!({"pkg.FifoQueue": []}), TypeRef::named("pkg.IQueue")).unwrap();
        assert!(matches!(typed, TypedExpression::Initializer { ref fqn, .. } if fqn == "pkg.FifoQueue"));
    }

    #[test]
    fn test_implementor_mismatch_lists_candidates() {
        let err = resolve(json!({"pkg.QueueProps": {}}), TypeRef::named("pkg.IQueue")).unwrap_err();
        assert_eq!(
            err.candidates().unwrap(),
            &["pkg.Queue".to_string(), "pkg.FifoQueue".to_string()][..]
        );
    }

    #[test]
    fn test_static_factory_injects_path_id() {
        let typed = resolve(
            json!({"deadLetterQueue": {"pkg.Queue.fromQueueArn": "arn:aws:sqs:queue1"}}),
            TypeRef::named("pkg.QueueProps"),
        )
        .unwrap();
        let TypedExpression::Struct { fields, .. } = typed else {
            panic!("Expected struct");
        };
        assert_eq!(
            fields["deadLetterQueue"],
            TypedExpression::StaticCall {
                fqn: "pkg.Queue".into(),
                method: "fromQueueArn".into(),
                args: vec![
                    TypedExpression::Scope,
                    TypedExpression::LogicalId("Res.deadLetterQueue".into()),
                    TypedExpression::String("arn:aws:sqs:queue1".into()),
                ],
            }
        );
    }

    #[test]
    fn test_ref_depends_on_expected_type() {
        assert_eq!(
            resolve(json!({"Ref": "Dlq"}), TypeRef::named("pkg.IQueue")).unwrap(),
            TypedExpression::ResolveReference {
                logical_id: "Dlq".into(),
                path: vec![]
            }
        );
        assert_eq!(
            resolve(json!({"Ref": "Dlq"}), TypeRef::Primitive(Primitive::String)).unwrap(),
            TypedExpression::Intrinsic(TypedIntrinsic::Ref("Dlq".into()))
        );
        assert_eq!(
            resolve(json!({"Ref": "CDK::Scope"}), TypeRef::named("constructs.Construct")).unwrap(),
            TypedExpression::Scope
        );
    }

    #[test]
    fn test_static_property() {
        assert_eq!(
            resolve(json!("PYTHON_3_9"), TypeRef::named("pkg.Runtime")).unwrap(),
            TypedExpression::StaticProperty {
                fqn: "pkg.Runtime".into(),
                property: "PYTHON_3_9".into()
            }
        );
    }

    #[test]
    fn test_union_first_match_wins() {
        let ty = TypeRef::Union {
            union: vec![
                TypeRef::Primitive(Primitive::Number),
                TypeRef::Primitive(Primitive::String),
            ],
        };
        assert_eq!(resolve(json!("abc"), ty.clone()).unwrap(), TypedExpression::String("abc".into()));
        assert_eq!(resolve(json!("12"), ty).unwrap(), TypedExpression::Number(12.0));
    }

    #[test]
    fn test_union_reports_each_rejection() {
        let ty = TypeRef::Union {
            union: vec![
                TypeRef::Primitive(Primitive::String),
                TypeRef::named("pkg.Encryption"),
            ],
        };
        let err = resolve(json!(7), ty).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"expected string | pkg.Encryption, got 7 (string: expected string, got 7; pkg.Encryption: Expected choice for enum type pkg.Encryption to be one of NONE|KMS_MANAGED|KMS, got: 7)");
    }

    #[test]
    fn test_union_keeps_struct_field_error() {
        let ty = TypeRef::Union {
            union: vec![
                TypeRef::Primitive(Primitive::Number),
                TypeRef::named("pkg.RedrivePolicy"),
            ],
        };
        let err = resolve(json!({}), ty).unwrap_err();
        assert!(
            err.to_string()
                .contains("Missing required field 'maxReceiveCount' for struct pkg.RedrivePolicy"),
            "{}",
            err
        );
    }

    #[test]
    fn test_sub_context_is_untyped() {
        let typed = resolve(
            json!({"Fn::Sub": ["${A}", {"A": {"x": 1}}]}),
            TypeRef::Primitive(Primitive::String),
        )
        .unwrap();
        let TypedExpression::Intrinsic(TypedIntrinsic::Sub { fragments, context }) = typed else {
            panic!("Expected Fn::Sub");
        };
        assert_eq!(fragments, vec![SubFragment::Ref("A".into())]);
        assert!(matches!(context["A"], TypedExpression::Object(_)));
    }
}
