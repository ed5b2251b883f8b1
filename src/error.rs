//! Error types for template compilation
//!
//! A template is one atomic compilation unit: every stage returns
//! [`CompileError`] and the first error aborts the whole run.

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Errors that can occur while parsing, resolving or evaluating a template
#[derive(Debug, Error)]
pub enum CompileError {
    /// Malformed template node: wrong arity, wrong type, missing or extra field
    #[error("{message}")]
    Shape { message: String },

    /// Unknown logical id, invalid construct path or non-referenceable value
    #[error("{message}")]
    Reference { message: String },

    /// Zero or several callables/implementors match a declaration
    #[error("{message} (candidates: {})", candidates.join(", "))]
    Overload {
        message: String,
        candidates: Vec<String>,
    },

    /// A value does not fit the type expected at its position
    #[error("{message}")]
    TypeMismatch { message: String },

    /// Failure surfaced by the target runtime, propagated unchanged
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Cycle between resource dependencies
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// Cycle while inferring the type of deferred calls
    #[error("type inference cycle detected: {}", cycle.join(" -> "))]
    InferenceCycle { cycle: Vec<String> },
}

impl CompileError {
    /// Create a shape error
    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape {
            message: message.into(),
        }
    }

    /// Create a reference error
    pub fn reference(message: impl Into<String>) -> Self {
        Self::Reference {
            message: message.into(),
        }
    }

    /// Create an overload error listing every candidate
    pub fn overload(message: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::Overload {
            message: message.into(),
            candidates,
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    /// Create a dependency cycle error
    pub fn dependency_cycle(cycle: Vec<String>) -> Self {
        Self::DependencyCycle { cycle }
    }

    /// Create a type inference cycle error
    pub fn inference_cycle(cycle: Vec<String>) -> Self {
        Self::InferenceCycle { cycle }
    }

    /// Candidates listed by an overload error
    pub fn candidates(&self) -> Option<&[String]> {
        match self {
            Self::Overload { candidates, .. } => Some(candidates),
            _ => None,
        }
    }

    /// Ids named by a cycle error
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            Self::DependencyCycle { cycle } | Self::InferenceCycle { cycle } => Some(cycle),
            _ => None,
        }
    }
}

/// Result type used throughout the crate
pub type Result<T, E = CompileError> = std::result::Result<T, E>;
