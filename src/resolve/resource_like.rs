//! Classify each declared resource and resolve it against the catalog

use std::collections::HashMap;

use indexmap::IndexMap;

use super::expression::{child, TypeResolver, ANY};
use super::typed::{TypedExpression, TypedOverride, TypedOverrideOperation};
use crate::catalog::{Method, TypeCatalog, TypeDef, TypeRef};
use crate::config::CompilerConfig;
use crate::error::{CompileError, Result};
use crate::runtime::ResourceOptions;
use crate::template::{
    OverrideOperation, ResourceCall, ResourceTag, TemplateExpression, TemplateResource,
};

/// What a declared resource turns into
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKind {
    /// Raw platform resource with a generic `{type, properties}` shape
    LowLevel {
        resource_type: String,
        props: TypedExpression,
        options: ResourceOptions,
    },
    /// Construct with identity and a child hierarchy
    HighLevel { fqn: String, props: TypedExpression },
    /// Value object without identity
    PlainObject {
        fqn: String,
        props: Option<TypedExpression>,
    },
    /// Result of a method call; `returns` is `None` for void methods
    DeferredCall {
        call: TypedExpression,
        returns: Option<TypeRef>,
    },
}

impl ResourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::LowLevel { .. } => "low-level",
            ResourceKind::HighLevel { .. } => "high-level",
            ResourceKind::PlainObject { .. } => "plain-object",
            ResourceKind::DeferredCall { .. } => "deferred-call",
        }
    }
}

/// A resolved resource declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLike {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub condition: Option<String>,
    pub tags: Vec<ResourceTag>,
    /// Explicit dependencies only
    pub depends_on: Vec<String>,
    pub overrides: Vec<TypedOverride>,
}

/// A bound deferred call, before its arguments are resolved
enum CallSite<'a> {
    Static {
        class: &'a TypeDef,
        method: &'a Method,
    },
    Instance {
        root: String,
        path: Vec<String>,
        owner: TypeRef,
        method: &'a Method,
    },
}

impl CallSite<'_> {
    fn method(&self) -> &Method {
        match self {
            CallSite::Static { method, .. } | CallSite::Instance { method, .. } => method,
        }
    }
}

/// Resolves resources one at a time, inferring the types of deferred calls
///
/// Inferred types are memoized per logical id; a declaration whose type
/// depends on itself through call targets is an inference cycle.
pub struct ResourceResolver<'a> {
    types: TypeResolver<'a>,
    resources: &'a IndexMap<String, TemplateResource>,
    inferred: HashMap<String, Option<TypeRef>>,
    in_progress: Vec<String>,
}

impl<'a> ResourceResolver<'a> {
    pub fn new(
        catalog: &'a dyn TypeCatalog,
        config: &'a CompilerConfig,
        resources: &'a IndexMap<String, TemplateResource>,
    ) -> Self {
        Self {
            types: TypeResolver::new(catalog, config),
            resources,
            inferred: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    pub fn types(&self) -> &TypeResolver<'a> {
        &self.types
    }

    fn declaration(&self, logical_id: &str) -> Result<&'a TemplateResource> {
        self.resources
            .get(logical_id)
            .ok_or_else(|| CompileError::reference(format!("unknown logical id '{}'", logical_id)))
    }

    fn is_raw(&self, resource: &TemplateResource) -> bool {
        resource
            .type_name
            .as_deref()
            .map(|t| self.types.config.is_raw_resource_type(t))
            .unwrap_or(false)
    }

    /// Resolve the declaration of `logical_id`
    pub fn resolve(&mut self, logical_id: &str) -> Result<ResourceLike> {
        let resource = self.declaration(logical_id)?;
        let path = vec![logical_id.to_string()];

        let kind = if self.is_raw(resource) && resource.call.is_none() {
            self.resolve_low_level(resource, &path)?
        } else if let Some(call) = &resource.call {
            self.resolve_deferred_call(logical_id, resource, call)?
        } else {
            let fqn = resource.type_name.as_deref().unwrap_or_default();
            self.resolve_object(fqn, resource, &path)?
        };

        let overrides = resource
            .overrides
            .iter()
            .map(|o| {
                Ok(TypedOverride {
                    child_path: o.child_path.clone(),
                    operation: match &o.operation {
                        OverrideOperation::RemoveResource => TypedOverrideOperation::RemoveResource,
                        OverrideOperation::Update { path: at, value } => {
                            TypedOverrideOperation::Update {
                                path: at.clone(),
                                value: self.types.resolve_untyped(value, &path)?,
                            }
                        }
                        OverrideOperation::Delete { path: at } => {
                            TypedOverrideOperation::Delete { path: at.clone() }
                        }
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(logical_id, strategy = kind.name(), "resolved resource");
        Ok(ResourceLike {
            logical_id: logical_id.to_string(),
            kind,
            condition: resource.condition.clone(),
            tags: resource.tags.clone(),
            depends_on: resource.depends_on.iter().cloned().collect(),
            overrides,
        })
    }

    fn resolve_low_level(&self, resource: &TemplateResource, path: &[String]) -> Result<ResourceKind> {
        let resource_type = resource.type_name.clone().unwrap_or_default();
        let properties = resource
            .properties
            .iter()
            .map(|(k, v)| {
                Ok((k.clone(), self.types.resolve(v, &ANY, &child(path, k))?))
            })
            .collect::<Result<IndexMap<_, _>>>()?;

        let mut props = IndexMap::new();
        props.insert("type".to_string(), TypedExpression::String(resource_type.clone()));
        if !properties.is_empty() {
            props.insert("properties".to_string(), TypedExpression::Object(properties));
        }

        Ok(ResourceKind::LowLevel {
            resource_type,
            props: TypedExpression::Object(props),
            options: ResourceOptions {
                condition: resource.condition.clone(),
                deletion_policy: resource.deletion_policy,
                update_replace_policy: resource.update_replace_policy,
                metadata: resource.metadata.clone(),
            },
        })
    }

    fn resolve_object(
        &self,
        fqn: &str,
        resource: &TemplateResource,
        path: &[String],
    ) -> Result<ResourceKind> {
        let config = self.types.config;
        let def = self.types.find_type(fqn)?;
        let props = TemplateExpression::Object(resource.properties.clone());
        let parameters = def
            .initializer()
            .map(|i| i.parameters.as_slice())
            .unwrap_or_default();

        if def.is_class() && !def.is_abstract() && self.types.catalog.extends(def, &config.construct_type) {
            let props = match parameters.get(2) {
                Some(param) if resource.properties.is_empty() && param.optional => {
                    TypedExpression::Void
                }
                Some(param) => self.types.resolve(&props, &param.type_ref, path)?,
                None if resource.properties.is_empty() => TypedExpression::Void,
                None => {
                    return Err(CompileError::type_mismatch(format!(
                        "In resource '{}': {} does not accept properties",
                        path.join("."),
                        def
                    )))
                }
            };
            return Ok(ResourceKind::HighLevel {
                fqn: def.fqn.clone(),
                props,
            });
        }

        let plain = def.is_class()
            && !def.is_abstract()
            && def.initializer().is_some()
            && parameters.len() <= 1
            && !parameters.first().map(|p| p.variadic).unwrap_or(false);
        if plain {
            let props = match parameters.first() {
                Some(param) if resource.properties.is_empty() && param.optional => None,
                Some(param) => Some(self.types.resolve(&props, &param.type_ref, path)?),
                None if resource.properties.is_empty() => None,
                None => {
                    return Err(CompileError::type_mismatch(format!(
                        "In resource '{}': {} does not accept properties",
                        path.join("."),
                        def
                    )))
                }
            };
            return Ok(ResourceKind::PlainObject {
                fqn: def.fqn.clone(),
                props,
            });
        }

        Err(CompileError::type_mismatch(format!(
            "Expected a platform resource or object type, got {}",
            def
        )))
    }

    fn resolve_deferred_call(
        &mut self,
        logical_id: &str,
        resource: &TemplateResource,
        call: &ResourceCall,
    ) -> Result<ResourceKind> {
        let site = self.call_site(logical_id, call)?;
        let returns = site.method().returns.clone();
        if let Some(declared) = &resource.type_name {
            self.types
                .assert_implements(returns.as_ref(), &TypeRef::named(declared.clone()))?;
        }

        let path = vec![logical_id.to_string()];
        let call = match site {
            CallSite::Static { class, method } => TypedExpression::StaticCall {
                fqn: class.fqn.clone(),
                method: method.name.clone(),
                args: self.types.resolve_arguments(
                    &call.arguments,
                    &method.parameters,
                    &format!("{}.{}", class.fqn, method.name),
                    &path,
                )?,
            },
            CallSite::Instance {
                root,
                path: properties,
                owner,
                method,
            } => TypedExpression::InstanceCall {
                target: TypedExpression::ResolveReference {
                    logical_id: root,
                    path: properties,
                }
                .boxed(),
                method: method.name.clone(),
                args: self.types.resolve_arguments(
                    &call.arguments,
                    &method.parameters,
                    &format!("{}.{}", owner, method.name),
                    &path,
                )?,
            },
        };
        Ok(ResourceKind::DeferredCall { call, returns })
    }

    /// Bind the method a deferred call invokes
    fn call_site(&mut self, logical_id: &str, call: &ResourceCall) -> Result<CallSite<'a>> {
        let Some(target) = &call.target else {
            let (class, method) = self.types.find_static_method(&call.method, &call.arguments)?;
            return Ok(CallSite::Static { class, method });
        };

        let mut segments = target.split('.');
        let root = segments.next().unwrap_or_default().to_string();
        let properties: Vec<String> = segments.map(str::to_string).collect();

        let declaration = self.declaration(&root)?;
        if self.is_raw(declaration) {
            return Err(CompileError::type_mismatch(format!(
                "In resource '{}': '{}' is a raw platform resource; method calls are not allowed on raw platform resources",
                logical_id, root
            )));
        }

        let mut owner = self.infer_type(&root)?.ok_or_else(|| {
            CompileError::type_mismatch(format!(
                "In resource '{}': '{}' has no value to call '{}' on",
                logical_id, root, call.method
            ))
        })?;
        for segment in &properties {
            owner = self.types.property_type(&owner, segment)?;
        }
        let method = self.types.infer_method(&owner, &call.method, &call.arguments)?;
        Ok(CallSite::Instance {
            root,
            path: properties,
            owner,
            method,
        })
    }

    /// The type a declaration produces, inferred through deferred calls
    pub fn infer_type(&mut self, logical_id: &str) -> Result<Option<TypeRef>> {
        if let Some(known) = self.inferred.get(logical_id) {
            return Ok(known.clone());
        }
        if let Some(start) = self.in_progress.iter().position(|id| id == logical_id) {
            let mut cycle = self.in_progress[start..].to_vec();
            cycle.push(logical_id.to_string());
            return Err(CompileError::inference_cycle(cycle));
        }

        let resource = self.declaration(logical_id)?;
        let inferred = match (&resource.type_name, &resource.call) {
            (Some(t), None) if self.types.config.is_raw_resource_type(t) => {
                Some(TypeRef::named(self.types.config.raw_resource_type.clone()))
            }
            (Some(t), _) => Some(TypeRef::named(t.clone())),
            (None, Some(call)) => {
                self.in_progress.push(logical_id.to_string());
                let site = self.call_site(logical_id, call);
                self.in_progress.pop();
                site?.method().returns.clone()
            }
            (None, None) => None,
        };

        self.inferred.insert(logical_id.to_string(), inferred.clone());
        Ok(inferred)
    }
}
