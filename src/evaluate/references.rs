//! Reference registry: what each logical id evaluated to

use indexmap::IndexMap;

use crate::error::{CompileError, Result};
use crate::runtime::{Identity, TargetRuntime, Value};

/// How a logical id can be named at the platform level
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceKind {
    /// Parameters and pseudo parameters; `Ref` uses the logical id itself
    Simple,
    /// A value without identity, or no value at all
    ValueOnly,
    RawResource { logical_ref: String },
    /// Object with identity; `logical_ref` names its primary platform resource
    Object { logical_ref: Option<String> },
}

/// Registry entry for one logical id
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub logical_id: String,
    pub kind: ReferenceKind,
    instance: Option<Value>,
}

impl Reference {
    /// A reference named directly by its logical id
    pub fn simple(logical_id: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind: ReferenceKind::Simple,
            instance: None,
        }
    }

    /// A reference to whatever a resource evaluated to
    pub fn evaluated(logical_id: impl Into<String>, value: Value, identity: Identity) -> Self {
        let kind = match identity {
            Identity::Value => ReferenceKind::ValueOnly,
            Identity::RawResource { logical_ref } => ReferenceKind::RawResource { logical_ref },
            Identity::Object { logical_ref } => ReferenceKind::Object { logical_ref },
        };
        Self {
            logical_id: logical_id.into(),
            kind,
            instance: (!value.is_void()).then_some(value),
        }
    }

    /// The live value, if the declaration produced one
    pub fn instance(&self) -> Option<&Value> {
        self.instance.as_ref()
    }

    /// Whether the reference wraps an object with identity
    pub fn is_identifiable(&self) -> bool {
        matches!(
            self.kind,
            ReferenceKind::RawResource { .. } | ReferenceKind::Object { .. }
        ) && self.instance.is_some()
    }

    /// Name used by `Ref`-style lookups
    pub fn ref_name(&self) -> Result<&str> {
        match &self.kind {
            ReferenceKind::Simple => Ok(self.logical_id.as_str()),
            ReferenceKind::RawResource { logical_ref }
            | ReferenceKind::Object {
                logical_ref: Some(logical_ref),
            } => Ok(logical_ref.as_str()),
            _ => Err(CompileError::reference(format!(
                "Ref: {} cannot be referenced",
                self.logical_id
            ))),
        }
    }

    /// Whether `attribute` is a platform-level attribute of the referenced object
    pub fn has_attribute(&self, runtime: &dyn TargetRuntime, attribute: &str) -> bool {
        match (&self.kind, &self.instance) {
            (ReferenceKind::RawResource { .. } | ReferenceKind::Object { .. }, Some(instance)) => {
                runtime.has_attribute(instance, attribute)
            }
            _ => false,
        }
    }
}

/// Every registered reference, in registration order
///
/// Each logical id is written exactly once.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRegistry {
    references: IndexMap<String, Reference>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reference: Reference) -> Result<()> {
        if self.references.contains_key(&reference.logical_id) {
            return Err(CompileError::reference(format!(
                "A reference for '{}' is already registered",
                reference.logical_id
            )));
        }
        tracing::trace!(logical_id = %reference.logical_id, kind = ?reference.kind, "registered reference");
        self.references
            .insert(reference.logical_id.clone(), reference);
        Ok(())
    }

    pub fn get(&self, logical_id: &str) -> Result<&Reference> {
        self.references.get(logical_id).ok_or_else(|| {
            CompileError::reference(format!("No reference registered for '{}'", logical_id))
        })
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.references.contains_key(logical_id)
    }

    /// Logical ids in registration order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.references.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.references.values()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{InstanceId, MemoryRuntime};

    #[test]
    fn test_written_once() {
        let mut registry = ReferenceRegistry::new();
        registry.register(Reference::simple("Env")).unwrap();
        let err = registry.register(Reference::simple("Env")).unwrap_err();
        assert_eq!(err.to_string(), "A reference for 'Env' is already registered");
        assert_eq!(
            registry.get("Nope").unwrap_err().to_string(),
            "No reference registered for 'Nope'"
        );
    }

    #[test]
    fn test_ref_names() {
        assert_eq!(Reference::simple("Env").ref_name().unwrap(), "Env");

        let raw = Reference::evaluated(
            "Queue",
            Value::Instance(InstanceId(1)),
            Identity::RawResource {
                logical_ref: "QueueResource".into(),
            },
        );
        assert_eq!(raw.ref_name().unwrap(), "QueueResource");
        assert!(raw.is_identifiable());

        let void = Reference::evaluated("Env", Value::Void, Identity::Value);
        assert!(void.instance().is_none());
        assert_eq!(
            void.ref_name().unwrap_err().to_string(),
            "Ref: Env cannot be referenced"
        );
    }

    #[test]
    fn test_attribute_predicate() {
        let mut runtime = MemoryRuntime::new().with_attributes("pkg.Topic", ["TopicName"]);
        let scope = runtime.scope();
        let topic = runtime
            .instantiate("pkg.Topic", vec![scope, Value::String("Topic".into())])
            .unwrap();
        let identity = runtime.identity(&topic);
        let reference = Reference::evaluated("Topic", topic, identity);

        assert!(reference.has_attribute(&runtime, "TopicName"));
        assert!(!reference.has_attribute(&runtime, "Arn"));
        assert!(!Reference::simple("Env").has_attribute(&runtime, "Arn"));
    }
}
