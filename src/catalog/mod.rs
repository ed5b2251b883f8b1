//! Type catalog: the reflected, statically-typed object API
//!
//! The compiler never discovers types itself. It consults a
//! [`TypeCatalog`], which may be backed by a generated table, a
//! deserialized registry ([`TypeRegistry`]) or an external service.

mod registry;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use registry::{RegistryError, TypeRegistry};

/// Primitive value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    String,
    Number,
    Boolean,
    Date,
    Json,
    Any,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Primitive::String => "string",
            Primitive::Number => "number",
            Primitive::Boolean => "boolean",
            Primitive::Date => "date",
            Primitive::Json => "json",
            Primitive::Any => "any",
        };
        f.write_str(name)
    }
}

/// A reference to a type at a parameter, property or return position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeRef {
    Primitive(Primitive),
    Named { fqn: String },
    List { list: Box<TypeRef> },
    Map { map: Box<TypeRef> },
    Union { union: Vec<TypeRef> },
}

impl TypeRef {
    pub fn named(fqn: impl Into<String>) -> Self {
        TypeRef::Named { fqn: fqn.into() }
    }

    pub fn list(element: TypeRef) -> Self {
        TypeRef::List {
            list: Box::new(element),
        }
    }

    pub fn map(element: TypeRef) -> Self {
        TypeRef::Map {
            map: Box::new(element),
        }
    }

    /// The fully qualified name, for named types
    pub fn fqn(&self) -> Option<&str> {
        match self {
            TypeRef::Named { fqn } => Some(fqn),
            _ => None,
        }
    }

    pub fn is_primitive(&self, primitive: Primitive) -> bool {
        matches!(self, TypeRef::Primitive(p) if *p == primitive)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Primitive(p) => write!(f, "{}", p),
            TypeRef::Named { fqn } => f.write_str(fqn),
            TypeRef::List { list } => write!(f, "Array<{}>", list),
            TypeRef::Map { map } => write!(f, "Map<string, {}>", map),
            TypeRef::Union { union } => {
                let parts: Vec<String> = union.iter().map(|t| t.to_string()).collect();
                f.write_str(&parts.join(" | "))
            }
        }
    }
}

/// A declared callable parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub variadic: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            optional: false,
            variadic: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dots = if self.variadic { "..." } else { "" };
        let mark = if self.optional { "?" } else { "" };
        write!(f, "{}{}{}: {}", dots, self.name, mark, self.type_ref)
    }
}

/// A class initializer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initializer {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// A declared method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    #[serde(rename = "static", default)]
    pub is_static: bool,
    /// `None` for methods that return no value
    #[serde(default)]
    pub returns: Option<TypeRef>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl Method {
    /// Human-readable signature, used in overload errors
    pub fn signature(&self, owner: &str) -> String {
        let params: Vec<String> = self.parameters.iter().map(|p| p.to_string()).collect();
        let returns = self
            .returns
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "void".to_string());
        format!("{}.{}({}): {}", owner, self.name, params.join(", "), returns)
    }

    /// Whether `count` positional arguments can be bound to this method
    pub fn accepts_arity(&self, count: usize) -> bool {
        accepts_arity(&self.parameters, count)
    }
}

/// Whether `count` positional arguments can be bound to `parameters`
pub fn accepts_arity(parameters: &[Parameter], count: usize) -> bool {
    let required = parameters
        .iter()
        .take_while(|p| !p.optional && !p.variadic)
        .count();
    let variadic = parameters.last().map(|p| p.variadic).unwrap_or(false);
    count >= required && (variadic || count <= parameters.len())
}

/// A declared property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
    #[serde(default)]
    pub optional: bool,
    #[serde(rename = "static", default)]
    pub is_static: bool,
}

/// The shape of a declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeKind {
    Class {
        #[serde(rename = "abstract", default)]
        is_abstract: bool,
        #[serde(default)]
        base: Option<String>,
        #[serde(default)]
        interfaces: Vec<String>,
        #[serde(default)]
        initializer: Option<Initializer>,
    },
    Interface {
        #[serde(default)]
        interfaces: Vec<String>,
        /// Data-only interfaces are resolved field by field
        #[serde(default)]
        datatype: bool,
    },
    Enum {
        members: Vec<String>,
    },
}

/// A type declared in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub fqn: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub kind: TypeKind,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl TypeDef {
    pub fn is_class(&self) -> bool {
        matches!(self.kind, TypeKind::Class { .. })
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.kind, TypeKind::Interface { .. })
    }

    /// Classes and interfaces are object types
    pub fn is_object_type(&self) -> bool {
        self.is_class() || self.is_interface()
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Class { is_abstract: true, .. })
    }

    pub fn is_datatype(&self) -> bool {
        matches!(self.kind, TypeKind::Interface { datatype: true, .. })
    }

    pub fn initializer(&self) -> Option<&Initializer> {
        match &self.kind {
            TypeKind::Class { initializer, .. } => initializer.as_ref(),
            _ => None,
        }
    }

    pub fn enum_members(&self) -> Option<&[String]> {
        match &self.kind {
            TypeKind::Enum { members } => Some(members),
            _ => None,
        }
    }

    /// Direct supertypes: base class first, then interfaces
    pub fn supertypes(&self) -> Vec<&str> {
        match &self.kind {
            TypeKind::Class {
                base, interfaces, ..
            } => base
                .iter()
                .chain(interfaces.iter())
                .map(|s| s.as_str())
                .collect(),
            TypeKind::Interface { interfaces, .. } => {
                interfaces.iter().map(|s| s.as_str()).collect()
            }
            TypeKind::Enum { .. } => Vec::new(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            TypeKind::Class { .. } => "class",
            TypeKind::Interface { .. } => "interface",
            TypeKind::Enum { .. } => "enum",
        }
    }
}

impl fmt::Display for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind_name(), self.fqn)
    }
}

/// Read access to a fully materialized set of types
pub trait TypeCatalog {
    /// Look up a type by fully qualified name
    fn find_type(&self, fqn: &str) -> Option<&TypeDef>;

    /// Every type, in a stable order
    fn types(&self) -> Box<dyn Iterator<Item = &TypeDef> + '_>;

    /// Whether `ty` is `base` or transitively extends/implements it
    fn extends(&self, ty: &TypeDef, base: &str) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![ty.fqn.as_str()];
        while let Some(fqn) = pending.pop() {
            if fqn == base {
                return true;
            }
            if !seen.insert(fqn.to_string()) {
                continue;
            }
            if let Some(def) = self.find_type(fqn) {
                pending.extend(def.supertypes());
            }
        }
        false
    }

    /// Concrete classes that extend or implement `base`
    fn implementors(&self, base: &str) -> Vec<&TypeDef> {
        self.types()
            .filter(|t| t.is_class() && !t.is_abstract() && self.extends(t, base))
            .collect()
    }

    /// Declared and inherited methods; a method hides same-named ones further up
    fn all_methods<'a>(&'a self, ty: &'a TypeDef) -> Vec<(&'a TypeDef, &'a Method)> {
        let mut result: Vec<(&TypeDef, &Method)> = Vec::new();
        let mut hidden: HashSet<&str> = HashSet::new();
        for owner in self.ancestry(ty) {
            let own: Vec<&Method> = owner
                .methods
                .iter()
                .filter(|m| !hidden.contains(m.name.as_str()))
                .collect();
            for m in &own {
                result.push((owner, m));
            }
            hidden.extend(own.iter().map(|m| m.name.as_str()));
        }
        result
    }

    /// Declared and inherited properties, nearest declaration wins
    fn all_properties<'a>(&'a self, ty: &'a TypeDef) -> Vec<&'a Property> {
        let mut result: Vec<&Property> = Vec::new();
        for owner in self.ancestry(ty) {
            for p in &owner.properties {
                if !result.iter().any(|q| q.name == p.name) {
                    result.push(p);
                }
            }
        }
        result
    }

    /// `ty` followed by its supertypes, breadth first, each once
    fn ancestry<'a>(&'a self, ty: &'a TypeDef) -> Vec<&'a TypeDef> {
        let mut result: Vec<&TypeDef> = vec![ty];
        let mut seen: HashSet<&str> = HashSet::from([ty.fqn.as_str()]);
        let mut i = 0;
        while i < result.len() {
            let current: &'a TypeDef = result[i];
            for sup in current.supertypes() {
                if seen.insert(sup) {
                    if let Some(def) = self.find_type(sup) {
                        result.push(def);
                    }
                }
            }
            i += 1;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ref_display() {
        let t = TypeRef::list(TypeRef::named("pkg.Thing"));
        assert_eq!(t.to_string(), "Array<pkg.Thing>");
        let u = TypeRef::Union {
            union: vec![TypeRef::Primitive(Primitive::String), TypeRef::named("pkg.A")],
        };
        assert_eq!(u.to_string(), "string | pkg.A");
    }

    #[test]
    fn test_type_ref_deserialize() {
        let t: TypeRef = serde_json::from_str(r#"{"list": {"fqn": "pkg.A"}}"#).unwrap();
        assert_eq!(t, TypeRef::list(TypeRef::named("pkg.A")));
        let p: TypeRef = serde_json::from_str(r#""number""#).unwrap();
        assert!(p.is_primitive(Primitive::Number));
    }

    #[test]
    fn test_method_signature() {
        let m = Method {
            name: "fromAsset".to_string(),
            is_static: true,
            returns: Some(TypeRef::named("pkg.Code")),
            parameters: vec![
                Parameter::new("path", TypeRef::Primitive(Primitive::String)),
                Parameter::new("options", TypeRef::named("pkg.AssetOptions")).optional(),
            ],
        };
        assert_eq!(
            m.signature("pkg.Code"),
            "pkg.Code.fromAsset(path: string, options?: pkg.AssetOptions): pkg.Code"
        );
    }

    #[test]
    fn test_accepts_arity() {
        let params = vec![
            Parameter::new("a", TypeRef::Primitive(Primitive::String)),
            Parameter::new("b", TypeRef::Primitive(Primitive::String)).optional(),
        ];
        assert!(!accepts_arity(&params, 0));
        assert!(accepts_arity(&params, 1));
        assert!(accepts_arity(&params, 2));
        assert!(!accepts_arity(&params, 3));

        let variadic = vec![Parameter::new("xs", TypeRef::Primitive(Primitive::Any)).variadic()];
        assert!(accepts_arity(&variadic, 0));
        assert!(accepts_arity(&variadic, 7));
    }
}
