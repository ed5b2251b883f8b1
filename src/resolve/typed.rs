//! Typed expression tree
//!
//! Same shape as the untyped tree, with every call bound to a concrete
//! class, method or enum member, and every injected scope/id made explicit.

use indexmap::IndexMap;

use crate::template::SubFragment;

/// An executable expression
#[derive(Debug, Clone, PartialEq)]
pub enum TypedExpression {
    /// Omitted optional value
    Void,
    Null,
    String(String),
    Number(f64),
    Boolean(bool),
    Date(String),
    Array(Vec<TypedExpression>),
    /// Map or untyped object
    Object(IndexMap<String, TypedExpression>),
    /// Data-only interface instance
    Struct {
        fqn: String,
        fields: IndexMap<String, TypedExpression>,
    },
    EnumMember {
        fqn: String,
        member: String,
    },
    StaticProperty {
        fqn: String,
        property: String,
    },
    Initializer {
        fqn: String,
        args: Vec<TypedExpression>,
    },
    StaticCall {
        fqn: String,
        method: String,
        args: Vec<TypedExpression>,
    },
    InstanceCall {
        target: Box<TypedExpression>,
        method: String,
        args: Vec<TypedExpression>,
    },
    /// Live value of a declaration, optionally followed by a property path
    ResolveReference {
        logical_id: String,
        path: Vec<String>,
    },
    /// The ambient scope
    Scope,
    /// Construct id derived from the resolution path
    LogicalId(String),
    Intrinsic(TypedIntrinsic),
}

/// A built-in function with typed operands
#[derive(Debug, Clone, PartialEq)]
pub enum TypedIntrinsic {
    Ref(String),
    GetAtt {
        logical_id: String,
        attribute: String,
    },
    FindInMap {
        mapping: Box<TypedExpression>,
        key1: Box<TypedExpression>,
        key2: Box<TypedExpression>,
    },
    If {
        condition: String,
        then: Box<TypedExpression>,
        otherwise: Box<TypedExpression>,
    },
    Sub {
        fragments: Vec<SubFragment>,
        context: IndexMap<String, TypedExpression>,
    },
    Join {
        separator: String,
        list: Box<TypedExpression>,
    },
    Select {
        index: Box<TypedExpression>,
        list: Box<TypedExpression>,
    },
    Split {
        separator: String,
        value: Box<TypedExpression>,
    },
    ImportValue(Box<TypedExpression>),
    Transform {
        name: String,
        parameters: IndexMap<String, TypedExpression>,
    },
    Base64(Box<TypedExpression>),
    Cidr {
        ip_block: Box<TypedExpression>,
        count: Box<TypedExpression>,
        net_mask: Option<Box<TypedExpression>>,
    },
    GetAzs(Box<TypedExpression>),
    And(Vec<TypedExpression>),
    Or(Vec<TypedExpression>),
    Not(Box<TypedExpression>),
    Equals(Box<TypedExpression>, Box<TypedExpression>),
    Condition(String),
}

/// A structural override with its value resolved
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOverride {
    pub child_path: Option<String>,
    pub operation: TypedOverrideOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedOverrideOperation {
    RemoveResource,
    Update {
        path: String,
        value: TypedExpression,
    },
    Delete {
        path: String,
    },
}

/// A resolved template output
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOutput {
    pub value: TypedExpression,
    pub description: Option<String>,
    pub export_name: Option<TypedExpression>,
    pub condition: Option<String>,
}

impl TypedExpression {
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    /// Every call node in this tree, outermost first
    pub fn calls(&self) -> Vec<&TypedExpression> {
        let mut found = Vec::new();
        self.collect_calls(&mut found);
        found
    }

    fn collect_calls<'a>(&'a self, found: &mut Vec<&'a TypedExpression>) {
        match self {
            TypedExpression::Initializer { args, .. } | TypedExpression::StaticCall { args, .. } => {
                found.push(self);
                args.iter().for_each(|a| a.collect_calls(found));
            }
            TypedExpression::InstanceCall { target, args, .. } => {
                found.push(self);
                target.collect_calls(found);
                args.iter().for_each(|a| a.collect_calls(found));
            }
            TypedExpression::Array(items) => items.iter().for_each(|a| a.collect_calls(found)),
            TypedExpression::Object(fields) | TypedExpression::Struct { fields, .. } => {
                fields.values().for_each(|a| a.collect_calls(found))
            }
            TypedExpression::Intrinsic(TypedIntrinsic::If {
                then, otherwise, ..
            }) => {
                then.collect_calls(found);
                otherwise.collect_calls(found);
            }
            _ => {}
        }
    }
}
