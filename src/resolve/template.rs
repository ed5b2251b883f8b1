//! Whole-template resolution

use indexmap::{IndexMap, IndexSet};
use serde_json::Value as Json;

use super::resource_like::{ResourceLike, ResourceResolver};
use super::typed::{TypedExpression, TypedOutput};
use crate::catalog::TypeCatalog;
use crate::config::CompilerConfig;
use crate::error::{CompileError, Result};
use crate::graph::DependencyGraph;
use crate::template::{Mapping, Template, TemplateExpression, TemplateParameter, TemplateResource};

/// A template with every resource classified and every expression typed
#[derive(Debug, Clone)]
pub struct TypedTemplate {
    pub resources: DependencyGraph<ResourceLike>,
    pub parameters: IndexMap<String, TemplateParameter>,
    pub conditions: IndexMap<String, TypedExpression>,
    pub mappings: IndexMap<String, Mapping>,
    pub outputs: IndexMap<String, TypedOutput>,
    pub transform: Vec<String>,
    pub metadata: IndexMap<String, Json>,
}

/// Build the condition graph and check it for cycles
///
/// Edges run from a condition to the conditions it evaluates.
pub fn condition_graph(template: &Template) -> Result<DependencyGraph<&TemplateExpression>> {
    let mut graph = DependencyGraph::new();
    for (name, x) in &template.conditions {
        let mut uses = IndexSet::new();
        x.referenced_conditions(&mut uses);
        if let Some(missing) = uses.iter().find(|c| !template.conditions.contains_key(*c)) {
            return Err(CompileError::reference(format!(
                "Condition '{}' uses undefined condition '{}'",
                name, missing
            )));
        }
        graph.insert(name.clone(), x, uses)?;
    }
    graph.toposort()?;
    Ok(graph)
}

/// Build the resource dependency graph and check it for cycles
///
/// Only edges between resources are kept. Names of parameters, pseudo
/// parameters and the scope are not resources; any other name is an
/// unknown logical id. Resources referenced by a condition the resource
/// uses, directly or through other conditions, are dependencies too.
pub fn resource_graph<'t>(
    template: &'t Template,
    config: &CompilerConfig,
) -> Result<DependencyGraph<&'t TemplateResource>> {
    let conditions = condition_graph(template)?;

    let mut graph = DependencyGraph::new();
    for (id, resource) in &template.resources {
        let mut dependencies = resource.dependencies.clone();
        for name in &resource.conditions {
            let x = conditions.get(name).map_err(|_| {
                CompileError::reference(format!(
                    "Resource '{}' uses undefined condition '{}'",
                    id, name
                ))
            })?;
            x.referenced_logical_ids(&mut dependencies);
            for used in conditions.transitive_dependencies(name)? {
                conditions.get(&used)?.referenced_logical_ids(&mut dependencies);
            }
        }

        let mut edges = Vec::new();
        for dep in dependencies {
            if template.resources.contains_key(&dep) {
                edges.push(dep);
            } else if !(template.parameters.contains_key(&dep)
                || config.is_pseudo_parameter(&dep)
                || dep == config.scope_reference)
            {
                return Err(CompileError::reference(format!(
                    "Resource '{}' references unknown logical id '{}'",
                    id, dep
                )));
            }
        }
        graph.insert(id.clone(), resource, edges)?;
    }

    let order = graph.toposort()?;
    tracing::debug!(?order, "ordered resources");
    Ok(graph)
}

impl TypedTemplate {
    /// Resolve every declaration of `template` against `catalog`
    pub fn resolve(
        template: &Template,
        catalog: &dyn TypeCatalog,
        config: &CompilerConfig,
    ) -> Result<Self> {
        let graph = resource_graph(template, config)?;
        let mut resolver = ResourceResolver::new(catalog, config, &template.resources);
        let resources = graph.try_map(|id, _| resolver.resolve(id))?;

        let types = resolver.types();
        let conditions: IndexMap<String, TypedExpression> = template
            .conditions
            .iter()
            .map(|(name, x)| Ok((name.clone(), types.resolve_untyped(x, &[])?)))
            .collect::<Result<_>>()?;
        let outputs: IndexMap<String, TypedOutput> = template
            .outputs
            .iter()
            .map(|(name, output)| {
                Ok((
                    name.clone(),
                    TypedOutput {
                        value: types.resolve_untyped(&output.value, &[])?,
                        description: output.description.clone(),
                        export_name: output
                            .export_name
                            .as_ref()
                            .map(|x| types.resolve_untyped(x, &[]))
                            .transpose()?,
                        condition: output.condition.clone(),
                    },
                ))
            })
            .collect::<Result<_>>()?;

        Ok(TypedTemplate {
            resources,
            parameters: template.parameters.clone(),
            conditions,
            mappings: template.mappings.clone(),
            outputs,
            transform: template.transform.clone(),
            metadata: template.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_of(doc: Json) -> Result<Vec<String>> {
        let template = Template::from_json(&doc)?;
        let config = CompilerConfig::default();
        let graph = resource_graph(&template, &config)?;
        Ok(graph.toposort()?.into_iter().map(str::to_string).collect())
    }

    #[test]
    fn test_parameters_and_pseudo_parameters_are_not_edges() {
        let order = graph_of(json!({
            "Parameters": {"Env": {"Type": "String"}},
            "Resources": {
                "B": {"Type": "AWS::S3::Bucket", "Properties": {
                    "Name": {"Fn::Sub": "${Env}-${AWS::Region}-${A}"}
                }},
                "A": {"Type": "AWS::SNS::Topic"}
            }
        }))
        .unwrap();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn test_unknown_reference() {
        let err = graph_of(json!({
            "Resources": {"B": {"Type": "AWS::S3::Bucket", "DependsOn": "Ghost"}}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Resource 'B' references unknown logical id 'Ghost'");
    }

    #[test]
    fn test_cycle_detected_before_resolution() {
        let err = graph_of(json!({
            "Resources": {
                "A": {"Type": "pkg.Unknown", "Properties": {"x": {"Ref": "B"}}},
                "B": {"Type": "pkg.Unknown", "Properties": {"x": {"Ref": "A"}}}
            }
        }))
        .unwrap_err();
        assert_eq!(err.cycle().unwrap(), &["A".to_string(), "B".to_string(), "A".to_string()][..]);
    }

    #[test]
    fn test_condition_cycle() {
        let err = graph_of(json!({
            "Conditions": {
                "A": {"Condition": "B"},
                "B": {"Fn::Not": [{"Condition": "A"}]}
            },
            "Resources": {}
        }))
        .unwrap_err();
        assert_eq!(
            err.cycle().unwrap(),
            &["A".to_string(), "B".to_string(), "A".to_string()][..]
        );
    }

    #[test]
    fn test_conditions_add_resource_edges() {
        let order = graph_of(json!({
            "Conditions": {
                "Outer": {"Fn::Not": [{"Condition": "Inner"}]},
                "Inner": {"Fn::Equals": [{"Ref": "Bucket"}, "b"]}
            },
            "Resources": {
                "Topic": {"Type": "AWS::SNS::Topic", "Properties": {
                    "Name": {"Fn::If": ["Outer", "x", "y"]}
                }},
                "Bucket": {"Type": "AWS::S3::Bucket"}
            }
        }))
        .unwrap();
        assert_eq!(order, vec!["Bucket", "Topic"]);
    }

    #[test]
    fn test_undefined_condition() {
        let err = graph_of(json!({
            "Resources": {"Topic": {"Type": "AWS::SNS::Topic", "Condition": "Missing"}}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Resource 'Topic' uses undefined condition 'Missing'");

        let err = graph_of(json!({
            "Conditions": {"A": {"Condition": "Ghost"}},
            "Resources": {}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Condition 'A' uses undefined condition 'Ghost'");
    }
}
