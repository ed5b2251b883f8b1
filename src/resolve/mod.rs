//! Type resolution
//!
//! Binds the untyped template to the type catalog: every declared resource
//! is classified as a [`ResourceLike`], every expression becomes a
//! [`TypedExpression`] and every call is bound to one concrete callable.
//! Nothing is constructed here; the result is pure data for the evaluator.

mod callables;
mod expression;
mod resource_like;
mod template;
mod typed;

pub use expression::{TypeResolver, ANY};
pub use resource_like::{ResourceKind, ResourceLike, ResourceResolver};
pub use template::{resource_graph, TypedTemplate};
pub use typed::{TypedExpression, TypedIntrinsic, TypedOutput, TypedOverride, TypedOverrideOperation};
