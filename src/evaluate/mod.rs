//! Evaluator
//!
//! Walks a [`TypedTemplate`] in dependency order and drives a
//! [`TargetRuntime`] to build each declaration. Every resource registers
//! exactly one [`Reference`]; later expressions read the registry, never
//! the runtime's object graph.

mod references;

use indexmap::{IndexMap, IndexSet};

use crate::config::CompilerConfig;
use crate::error::{CompileError, Result};
use crate::resolve::{
    ResourceKind, ResourceLike, TypedExpression, TypedIntrinsic, TypedOverrideOperation,
    TypedTemplate,
};
use crate::runtime::{Override, OverrideAction, OutputValue, TargetRuntime, Value};
use crate::template::SubFragment;

pub use references::{Reference, ReferenceKind, ReferenceRegistry};

/// Everything a successful evaluation produced
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub references: ReferenceRegistry,
    pub outputs: IndexMap<String, OutputValue>,
}

/// Evaluates typed templates against a runtime, within one scope
pub struct Evaluator<'a> {
    runtime: &'a mut dyn TargetRuntime,
    config: &'a CompilerConfig,
    template: &'a TypedTemplate,
    scope: Value,
    references: ReferenceRegistry,
    conditions: IndexMap<String, bool>,
    /// Conditions currently being evaluated, outermost first
    evaluating: IndexSet<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        runtime: &'a mut dyn TargetRuntime,
        config: &'a CompilerConfig,
        template: &'a TypedTemplate,
        scope: Value,
    ) -> Self {
        Self {
            runtime,
            config,
            template,
            scope,
            references: ReferenceRegistry::new(),
            conditions: IndexMap::new(),
            evaluating: IndexSet::new(),
        }
    }

    pub fn references(&self) -> &ReferenceRegistry {
        &self.references
    }

    /// Evaluate the whole template; the first failure aborts the run
    pub fn run(mut self) -> Result<Synthesis> {
        let template = self.template;

        for (id, parameter) in &template.parameters {
            self.runtime.declare_parameter(&self.scope, id, parameter)?;
            self.references.register(Reference::simple(id.clone()))?;
        }
        for name in &self.config.pseudo_parameters {
            if !self.references.contains(name) {
                self.references.register(Reference::simple(name.clone()))?;
            }
        }

        template
            .resources
            .for_each(|_, resource| self.evaluate_resource(resource))?;

        let mut outputs = IndexMap::new();
        for (id, output) in &template.outputs {
            let value = OutputValue {
                value: self.evaluate(&output.value)?,
                description: output.description.clone(),
                export_name: output
                    .export_name
                    .as_ref()
                    .map(|x| self.evaluate(x))
                    .transpose()?,
                condition: output.condition.clone(),
            };
            self.runtime.declare_output(&self.scope, id, &value)?;
            outputs.insert(id.clone(), value);
        }

        tracing::debug!(
            references = self.references.len(),
            outputs = outputs.len(),
            "evaluated template"
        );
        Ok(Synthesis {
            references: self.references,
            outputs,
        })
    }

    fn evaluate_resource(&mut self, resource: &ResourceLike) -> Result<()> {
        let id = Value::String(resource.logical_id.clone());
        let value = match &resource.kind {
            ResourceKind::LowLevel { props, options, .. } => {
                let props = self.evaluate(props)?;
                let value = self.runtime.instantiate(
                    &self.config.raw_resource_type,
                    vec![self.scope.clone(), id, props],
                )?;
                self.runtime.apply_resource_options(&value, options)?;
                value
            }
            ResourceKind::HighLevel { fqn, props } => {
                let props = self.evaluate(props)?;
                self.runtime
                    .instantiate(fqn, vec![self.scope.clone(), id, props])?
            }
            ResourceKind::PlainObject { fqn, props } => {
                let args = match props {
                    Some(props) => vec![self.evaluate(props)?],
                    None => Vec::new(),
                };
                self.runtime.instantiate(fqn, args)?
            }
            ResourceKind::DeferredCall { call, .. } => self.evaluate(call)?,
        };

        let identity = self.runtime.identity(&value);
        if identity.is_identifiable() {
            self.decorate(resource, &value)?;
        } else if !(resource.tags.is_empty()
            && resource.depends_on.is_empty()
            && resource.overrides.is_empty())
        {
            tracing::warn!(
                logical_id = %resource.logical_id,
                "tags, dependencies and overrides ignored on a value without identity"
            );
        }

        tracing::debug!(logical_id = %resource.logical_id, "evaluated resource");
        self.references.register(Reference::evaluated(
            resource.logical_id.clone(),
            value,
            identity,
        ))
    }

    /// Tags, explicit dependencies and overrides of an identifiable object
    fn decorate(&mut self, resource: &ResourceLike, value: &Value) -> Result<()> {
        for tag in &resource.tags {
            self.runtime.add_tag(value, &tag.key, &tag.value)?;
        }

        for dep in &resource.depends_on {
            let target = self.references.get(dep)?;
            let instance = match target.instance() {
                Some(instance) if target.is_identifiable() => instance.clone(),
                _ => {
                    return Err(CompileError::reference(format!(
                        "In resource '{}': DependsOn '{}' does not name an object with identity",
                        resource.logical_id, dep
                    )))
                }
            };
            self.runtime.add_dependency(value, &instance)?;
        }

        for over in &resource.overrides {
            let action = match &over.operation {
                TypedOverrideOperation::RemoveResource => OverrideAction::RemoveResource,
                TypedOverrideOperation::Update { path, value } => OverrideAction::Update {
                    path: path.clone(),
                    value: self.evaluate(value)?,
                },
                TypedOverrideOperation::Delete { path } => {
                    OverrideAction::Delete { path: path.clone() }
                }
            };
            self.runtime.apply_override(
                value,
                &Override {
                    child_path: over.child_path.clone(),
                    action,
                },
            )?;
        }
        Ok(())
    }

    fn evaluate_all(&mut self, xs: &[TypedExpression]) -> Result<Vec<Value>> {
        xs.iter().map(|x| self.evaluate(x)).collect()
    }

    fn evaluate_fields(
        &mut self,
        fields: &IndexMap<String, TypedExpression>,
    ) -> Result<IndexMap<String, Value>> {
        let mut values = IndexMap::new();
        for (k, x) in fields {
            let value = self.evaluate(x)?;
            if !value.is_void() {
                values.insert(k.clone(), value);
            }
        }
        Ok(values)
    }

    /// Evaluate one typed expression
    pub fn evaluate(&mut self, x: &TypedExpression) -> Result<Value> {
        Ok(match x {
            TypedExpression::Void => Value::Void,
            TypedExpression::Null => Value::Null,
            TypedExpression::String(s) => Value::String(s.clone()),
            TypedExpression::Number(n) => Value::Number(*n),
            TypedExpression::Boolean(b) => Value::Bool(*b),
            TypedExpression::Date(d) => Value::Date(d.clone()),
            TypedExpression::Array(items) => Value::Array(self.evaluate_all(items)?),
            TypedExpression::Object(fields) | TypedExpression::Struct { fields, .. } => {
                Value::Object(self.evaluate_fields(fields)?)
            }
            TypedExpression::EnumMember { fqn, member } => {
                self.runtime.static_member(fqn, member)?
            }
            TypedExpression::StaticProperty { fqn, property } => {
                self.runtime.static_member(fqn, property)?
            }
            TypedExpression::Initializer { fqn, args } => {
                let args = self.evaluate_all(args)?;
                self.runtime.instantiate(fqn, args)?
            }
            TypedExpression::StaticCall { fqn, method, args } => {
                let args = self.evaluate_all(args)?;
                self.runtime.invoke_static(fqn, method, args)?
            }
            TypedExpression::InstanceCall {
                target,
                method,
                args,
            } => {
                let target = self.evaluate(target)?;
                let args = self.evaluate_all(args)?;
                self.runtime.invoke_instance(&target, method, args)?
            }
            TypedExpression::ResolveReference { logical_id, path } => {
                self.resolve_reference(logical_id, path)?
            }
            TypedExpression::Scope => self.scope.clone(),
            TypedExpression::LogicalId(id) => Value::String(id.clone()),
            TypedExpression::Intrinsic(intrinsic) => self.evaluate_intrinsic(intrinsic)?,
        })
    }

    /// The live value behind a logical id, optionally walking live properties
    fn resolve_reference(&mut self, logical_id: &str, path: &[String]) -> Result<Value> {
        let reference = self.references.get(logical_id)?;
        let Some(instance) = reference.instance().cloned() else {
            if path.is_empty() {
                let name = reference.ref_name()?.to_string();
                return Ok(self.runtime.fn_ref(&name)?);
            }
            return Err(property_error(logical_id, path));
        };

        let mut current = instance;
        for segment in path {
            current = self
                .runtime
                .get_property(&current, segment)
                .ok_or_else(|| property_error(logical_id, path))?;
        }
        Ok(current)
    }

    /// Evaluate a named condition once; later lookups reuse the result
    fn condition(&mut self, name: &str) -> Result<bool> {
        if let Some(b) = self.conditions.get(name) {
            return Ok(*b);
        }
        if let Some(start) = self.evaluating.get_index_of(name) {
            let mut cycle: Vec<String> = self.evaluating.iter().skip(start).cloned().collect();
            cycle.push(name.to_string());
            return Err(CompileError::dependency_cycle(cycle));
        }
        let template = self.template;
        let x = template.conditions.get(name).ok_or_else(|| {
            CompileError::reference(format!("Condition '{}' is not defined", name))
        })?;

        self.evaluating.insert(name.to_string());
        let value = self.evaluate(x);
        self.evaluating.shift_remove(name);

        let value = value?;
        let b = value.as_bool().ok_or_else(|| {
            CompileError::type_mismatch(format!(
                "Condition does not evaluate to boolean: {}",
                value
            ))
        })?;
        self.conditions.insert(name.to_string(), b);
        Ok(b)
    }

    fn booleans(&mut self, name: &str, xs: &[TypedExpression]) -> Result<Vec<bool>> {
        self.evaluate_all(xs)?
            .into_iter()
            .map(|v| {
                v.as_bool().ok_or_else(|| {
                    CompileError::type_mismatch(format!(
                        "{}: expected boolean operands, got {}",
                        name, v
                    ))
                })
            })
            .collect()
    }

    fn evaluate_intrinsic(&mut self, intrinsic: &TypedIntrinsic) -> Result<Value> {
        Ok(match intrinsic {
            TypedIntrinsic::Ref(id) => {
                let name = self.references.get(id)?.ref_name()?.to_string();
                self.runtime.fn_ref(&name)?
            }
            TypedIntrinsic::GetAtt {
                logical_id,
                attribute,
            } => {
                let reference = self.references.get(logical_id)?;
                if !reference.has_attribute(&*self.runtime, attribute) {
                    return Err(CompileError::reference(format!(
                        "Fn::GetAtt: Expected platform attribute, got: {}.{}",
                        logical_id, attribute
                    )));
                }
                let name = reference.ref_name()?.to_string();
                self.runtime.fn_get_att(&name, attribute)?
            }
            TypedIntrinsic::FindInMap {
                mapping,
                key1,
                key2,
            } => {
                let mapping = self.evaluate(mapping)?;
                let key1 = self.evaluate(key1)?;
                let key2 = self.evaluate(key2)?;
                self.find_in_map(mapping, key1, key2)?
            }
            TypedIntrinsic::If {
                condition,
                then,
                otherwise,
            } => {
                if self.condition(condition)? {
                    self.evaluate(then)?
                } else {
                    self.evaluate(otherwise)?
                }
            }
            TypedIntrinsic::Sub { fragments, context } => {
                let context = self.evaluate_fields(context)?;
                let body = self.substitution_body(fragments, &context)?;
                let context = (!context.is_empty()).then_some(context);
                self.runtime.fn_sub(&body, context)?
            }
            TypedIntrinsic::Join { separator, list } => {
                let list = self.evaluate(list)?;
                self.runtime.fn_join(separator, list)?
            }
            TypedIntrinsic::Select { index, list } => {
                let index = self.evaluate(index)?;
                let list = self.evaluate(list)?;
                self.runtime.fn_select(index, list)?
            }
            TypedIntrinsic::Split { separator, value } => {
                let value = self.evaluate(value)?;
                self.runtime.fn_split(separator, value)?
            }
            TypedIntrinsic::ImportValue(x) => {
                let name = self.evaluate(x)?;
                self.runtime.fn_import_value(name)?
            }
            TypedIntrinsic::Transform { name, parameters } => {
                let parameters = self.evaluate_fields(parameters)?;
                self.runtime.fn_transform(name, parameters)?
            }
            TypedIntrinsic::Base64(x) => {
                let value = self.evaluate(x)?;
                self.runtime.fn_base64(value)?
            }
            TypedIntrinsic::Cidr {
                ip_block,
                count,
                net_mask,
            } => {
                let ip_block = self.evaluate(ip_block)?;
                let count = self.evaluate(count)?;
                let net_mask = match net_mask {
                    Some(x) => Some(self.evaluate(x)?),
                    None => None,
                };
                self.runtime.fn_cidr(ip_block, count, net_mask)?
            }
            TypedIntrinsic::GetAzs(x) => {
                let region = self.evaluate(x)?;
                self.runtime.fn_get_azs(region)?
            }
            TypedIntrinsic::And(xs) => Value::Bool(self.booleans("Fn::And", xs)?.iter().all(|b| *b)),
            TypedIntrinsic::Or(xs) => Value::Bool(self.booleans("Fn::Or", xs)?.iter().any(|b| *b)),
            TypedIntrinsic::Not(x) => {
                let operand = self.booleans("Fn::Not", std::slice::from_ref(&**x))?;
                Value::Bool(!operand.iter().all(|b| *b))
            }
            TypedIntrinsic::Equals(a, b) => {
                let a = self.evaluate(a)?;
                let b = self.evaluate(b)?;
                Value::Bool(a == b)
            }
            TypedIntrinsic::Condition(name) => Value::Bool(self.condition(name)?),
        })
    }

    /// Two-level mapping lookup; unknown keys at each level are distinct errors
    fn find_in_map(&mut self, mapping: Value, key1: Value, key2: Value) -> Result<Value> {
        let template = self.template;
        let name = match &mapping {
            Value::String(s) => s.clone(),
            other => {
                return Err(CompileError::type_mismatch(format!(
                    "Fn::FindInMap: expected a mapping name, got {}",
                    other
                )))
            }
        };
        let table = template.mappings.get(&name).ok_or_else(|| {
            let available: Vec<&str> = template.mappings.keys().map(|k| k.as_str()).collect();
            CompileError::reference(format!(
                "Mapping '{}' is not defined (available: {})",
                name,
                available.join(", ")
            ))
        })?;

        let (Some(k1), Some(k2)) = (map_key(&key1), map_key(&key2)) else {
            return Ok(self.runtime.fn_find_in_map(&name, key1, key2)?);
        };
        let level = table.get(&k1).ok_or_else(|| {
            let available: Vec<&str> = table.keys().map(|k| k.as_str()).collect();
            CompileError::reference(format!(
                "Mapping {} has no key '{}' (available: {})",
                name,
                k1,
                available.join(", ")
            ))
        })?;
        let value = level.get(&k2).ok_or_else(|| {
            let available: Vec<&str> = level.keys().map(|k| k.as_str()).collect();
            CompileError::reference(format!(
                "Mapping {}[{}] has no key '{}' (available: {})",
                name,
                k1,
                k2,
                available.join(", ")
            ))
        })?;
        Ok(Value::from_json(value))
    }

    /// Rewrite placeholders so the runtime sees platform names
    ///
    /// Context keys stay verbatim. `${Id}` becomes the reference's platform
    /// name. `${Id.Attr}` becomes the attribute's value once the runtime
    /// knows it as a literal, stays a marker while it is unresolved, and
    /// otherwise reads a live property.
    fn substitution_body(
        &mut self,
        fragments: &[SubFragment],
        context: &IndexMap<String, Value>,
    ) -> Result<String> {
        let mut body = String::new();
        for fragment in fragments {
            match fragment {
                SubFragment::Literal(text) => body.push_str(&escape_placeholders(text)),
                SubFragment::Ref(name) if context.contains_key(name) => {
                    body.push_str(&format!("${{{}}}", name))
                }
                SubFragment::Ref(name) => {
                    let reference = self.references.get(name)?;
                    match (&reference.kind, reference.instance()) {
                        (ReferenceKind::ValueOnly, Some(Value::String(s))) => body.push_str(s),
                        _ => body.push_str(&format!("${{{}}}", reference.ref_name()?)),
                    }
                }
                SubFragment::GetAtt {
                    logical_id,
                    attribute,
                } => {
                    let key = format!("{}.{}", logical_id, attribute);
                    if context.contains_key(&key) {
                        body.push_str(&format!("${{{}}}", key));
                        continue;
                    }
                    let reference = self.references.get(logical_id)?;
                    let value = if reference.has_attribute(&*self.runtime, attribute) {
                        let name = reference.ref_name()?.to_string();
                        Some(self.runtime.fn_get_att(&name, attribute)?)
                    } else {
                        reference
                            .instance()
                            .and_then(|i| self.runtime.get_property(i, attribute))
                    };
                    let Some(value) = value else {
                        return Err(CompileError::reference(format!(
                            "Fn::Sub: Expected platform attribute or property, got: {}",
                            key
                        )));
                    };
                    match literal_text(&value).filter(|_| !self.runtime.is_unresolved(&value)) {
                        Some(text) => body.push_str(&text),
                        None => body.push_str(&format!("${{{}}}", key)),
                    }
                }
            }
        }
        Ok(body)
    }
}

/// Scalars inlined into a substitution body
fn literal_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(crate::runtime::number_to_json(*n).to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Escape `${...}` placeholders in literal text; an unclosed `${` stays as is
fn escape_placeholders(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find("${") {
        let (before, after) = rest.split_at(at);
        out.push_str(before);
        if after[2..].contains('}') {
            out.push_str("${!");
        } else {
            out.push_str("${");
        }
        rest = &after[2..];
    }
    out.push_str(rest);
    out
}

fn property_error(logical_id: &str, path: &[String]) -> CompileError {
    CompileError::reference(format!(
        "CDK::GetProp: Expected Construct Property, got: {}.{}",
        logical_id,
        path.join(".")
    ))
}

fn map_key(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(crate::runtime::number_to_json(*n).to_string()),
        _ => None,
    }
}
