//! decl-synth - A compiler from declarative templates to live object graphs
//!
//! This library parses a declarative infrastructure template, binds every
//! declaration to a type catalog of an object-construction library, and
//! evaluates the result against a target runtime.
//!
//! # Example
//!
//! ```rust
//! use decl_synth::{compile, MemoryRuntime, TypeRegistry};
//! use serde_json::json;
//!
//! let catalog = TypeRegistry::new();
//! let mut runtime = MemoryRuntime::new();
//! let scope = runtime.scope();
//! let doc = json!({"Resources": {"Bucket": {"Type": "AWS::S3::Bucket"}}});
//!
//! compile(&doc, &catalog, &mut runtime, scope).unwrap();
//! assert_eq!(runtime.render()["Resources"]["Bucket"]["Type"], "AWS::S3::Bucket");
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod graph;
pub mod resolve;
pub mod runtime;
pub mod template;

pub use catalog::{TypeCatalog, TypeRegistry};
pub use config::CompilerConfig;
pub use error::{CompileError, Result};
pub use evaluate::{Evaluator, Reference, ReferenceRegistry, Synthesis};
pub use graph::DependencyGraph;
pub use resolve::TypedTemplate;
pub use runtime::{MemoryRuntime, TargetRuntime, Value};
pub use template::Template;

/// Compile a template document with default configuration
pub fn compile(
    document: &serde_json::Value,
    catalog: &dyn TypeCatalog,
    runtime: &mut dyn TargetRuntime,
    scope: Value,
) -> Result<Synthesis> {
    compile_with_config(document, catalog, runtime, scope, &CompilerConfig::default())
}

/// Compile a template document with custom configuration
///
/// Parsing, resolution and evaluation run in that order. The whole template
/// is one unit: the first error aborts the run.
///
/// # Example
///
/// ```rust
/// use decl_synth::{compile_with_config, CompilerConfig, MemoryRuntime, TypeRegistry};
/// use serde_json::json;
///
/// let config = CompilerConfig::new().with_scope_reference("Self::Scope");
/// let mut runtime = MemoryRuntime::from_config(&config);
/// let scope = runtime.scope();
/// let doc = json!({"Resources": {"Topic": {"Type": "AWS::SNS::Topic"}}});
///
/// let synthesis =
///     compile_with_config(&doc, &TypeRegistry::new(), &mut runtime, scope, &config).unwrap();
/// assert!(synthesis.references.contains("Topic"));
/// ```
pub fn compile_with_config(
    document: &serde_json::Value,
    catalog: &dyn TypeCatalog,
    runtime: &mut dyn TargetRuntime,
    scope: Value,
    config: &CompilerConfig,
) -> Result<Synthesis> {
    let template = Template::from_json(document)?;
    let typed = TypedTemplate::resolve(&template, catalog, config)?;
    Evaluator::new(runtime, config, &typed, scope).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_empty_template() {
        let mut runtime = MemoryRuntime::new();
        let scope = runtime.scope();
        let synthesis = compile(&json!({}), &TypeRegistry::new(), &mut runtime, scope).unwrap();
        assert!(synthesis.outputs.is_empty());
        assert_eq!(runtime.objects().count(), 1);
    }

    #[test]
    fn test_errors_abort_the_whole_template() {
        let mut runtime = MemoryRuntime::new();
        let scope = runtime.scope();
        let err = compile(
            &json!({"Resources": {
                "Bucket": {"Type": "AWS::S3::Bucket"},
                "Queue": {"Type": "pkg.Missing"}
            }}),
            &TypeRegistry::new(),
            &mut runtime,
            scope,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Unknown type 'pkg.Missing'");
        assert_eq!(runtime.objects().count(), 1);
    }
}
