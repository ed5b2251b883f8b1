//! Callable lookup: overloads, argument binding and scope/id injection

use super::expression::{child, TypeResolver};
use super::typed::TypedExpression;
use crate::catalog::{accepts_arity, Method, Parameter, Primitive, TypeDef, TypeRef};
use crate::error::{CompileError, Result};
use crate::template::{CallArguments, Intrinsic, TemplateExpression};

impl<'a> TypeResolver<'a> {
    /// Find the static, value-returning method named by `Class.method`
    pub fn find_static_method(
        &self,
        key: &str,
        arguments: &CallArguments,
    ) -> Result<(&'a TypeDef, &'a Method)> {
        let (class_fqn, name) = key.rsplit_once('.').ok_or_else(|| {
            CompileError::reference(format!("'{}' is not a type or a static method", key))
        })?;
        let class = self.catalog.find_type(class_fqn).ok_or_else(|| {
            CompileError::reference(format!("Unknown type '{}' in '{}'", class_fqn, key))
        })?;

        let statics: Vec<(&TypeDef, &Method)> = self
            .catalog
            .all_methods(class)
            .into_iter()
            .filter(|(_, m)| m.is_static && m.returns.is_some())
            .collect();
        let named: Vec<(&TypeDef, &Method)> =
            statics.iter().copied().filter(|(_, m)| m.name == name).collect();
        if named.is_empty() {
            return Err(CompileError::overload(
                format!("'{}' has no static method called '{}'", class.fqn, name),
                statics.iter().map(|(o, m)| m.signature(&o.fqn)).collect(),
            ));
        }
        Ok((class, self.select_overload(&named, arguments, &class.fqn)?))
    }

    /// Resolve `Class.method` as a static factory call
    pub fn resolve_static_call(
        &self,
        key: &str,
        arguments: &CallArguments,
        expected: Option<&TypeRef>,
        path: &[String],
    ) -> Result<TypedExpression> {
        let (class, method) = self.find_static_method(key, arguments)?;
        if let Some(expected) = expected {
            self.assert_implements(method.returns.as_ref(), expected)?;
        }
        let args = self.resolve_arguments(
            arguments,
            &method.parameters,
            &format!("{}.{}", class.fqn, method.name),
            path,
        )?;
        Ok(TypedExpression::StaticCall {
            fqn: class.fqn.clone(),
            method: method.name.clone(),
            args,
        })
    }

    /// Pick the single overload whose arity fits the supplied arguments
    pub fn select_overload(
        &self,
        candidates: &[(&'a TypeDef, &'a Method)],
        arguments: &CallArguments,
        owner: &str,
    ) -> Result<&'a Method> {
        if let [(_, only)] = candidates {
            return Ok(*only);
        }
        let fitting: Vec<&'a Method> = candidates
            .iter()
            .filter(|(_, m)| self.arity_fits(&m.parameters, arguments))
            .map(|(_, m)| *m)
            .collect();
        match fitting.as_slice() {
            [only] => Ok(*only),
            _ => {
                let name = candidates.first().map(|(_, m)| m.name.as_str()).unwrap_or("");
                Err(CompileError::overload(
                    format!(
                        "Cannot choose an overload of '{}.{}' for {} argument(s)",
                        owner,
                        name,
                        arguments.expressions().len()
                    ),
                    candidates.iter().map(|(o, m)| m.signature(&o.fqn)).collect(),
                ))
            }
        }
    }

    fn arity_fits(&self, parameters: &[Parameter], arguments: &CallArguments) -> bool {
        let count = arguments.expressions().len();
        if self.injects(parameters, arguments) {
            accepts_arity(parameters, count + 2)
        } else {
            accepts_arity(parameters, count)
        }
    }

    /// Whether `param` is typed as the platform's construct base class
    fn is_scope_parameter(&self, param: &Parameter) -> bool {
        let construct = &self.config.construct_type;
        match param.type_ref.fqn() {
            Some(fqn) if fqn == construct => true,
            Some(fqn) => self
                .catalog
                .find_type(fqn)
                .map(|t| t.is_class() && self.catalog.extends(t, construct))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Callables shaped `(scope, id, ...)` get both filled in implicitly
    pub fn is_injectable(&self, parameters: &[Parameter]) -> bool {
        match parameters {
            [scope, id, ..] => {
                self.is_scope_parameter(scope) && id.type_ref.is_primitive(Primitive::String)
            }
            _ => false,
        }
    }

    fn injects(&self, parameters: &[Parameter], arguments: &CallArguments) -> bool {
        let CallArguments::Positional(supplied) = arguments else {
            return false;
        };
        let explicit_scope = matches!(
            supplied.first(),
            Some(TemplateExpression::Intrinsic(Intrinsic::Ref(id)))
                if *id == self.config.scope_reference
        );
        !explicit_scope && self.is_injectable(parameters)
    }

    /// Bind supplied arguments to declared parameters
    pub fn resolve_arguments(
        &self,
        arguments: &CallArguments,
        parameters: &[Parameter],
        callable: &str,
        path: &[String],
    ) -> Result<Vec<TypedExpression>> {
        let supplied = arguments.expressions();
        let mut values = Vec::with_capacity(parameters.len());
        let mut remaining = parameters;

        if self.injects(parameters, arguments) {
            if path.is_empty() {
                return Err(CompileError::reference(format!(
                    "{} needs a scope and id, but no id can be derived at this position; \
                     pass them with CDK::Args",
                    callable
                )));
            }
            values.push(TypedExpression::Scope);
            values.push(TypedExpression::LogicalId(path.join(".")));
            remaining = &parameters[2..];
        }

        let (fixed, variadic) = match remaining.split_last() {
            Some((last, init)) if last.variadic => (init, Some(last)),
            _ => (remaining, None),
        };
        if variadic.is_none() && supplied.len() > fixed.len() {
            return Err(CompileError::shape(format!(
                "{} expects at most {} argument(s), got {}",
                callable,
                fixed.len(),
                supplied.len()
            )));
        }

        for (i, param) in fixed.iter().enumerate() {
            match supplied.get(i) {
                None | Some(TemplateExpression::Null) if param.optional => {
                    values.push(TypedExpression::Void)
                }
                None | Some(TemplateExpression::Null) => {
                    return Err(CompileError::type_mismatch(format!(
                        "Expected required parameter '{}' for {}",
                        param.name, callable
                    )))
                }
                Some(x) => {
                    values.push(self.resolve(x, &param.type_ref, &child(path, &param.name))?)
                }
            }
        }
        if let Some(param) = variadic {
            for x in supplied.iter().skip(fixed.len()) {
                values.push(self.resolve(x, &param.type_ref, &child(path, &param.name))?);
            }
        }
        Ok(values)
    }

    /// A value of type `actual` must be usable where `expected` is required
    pub fn assert_implements(&self, actual: Option<&TypeRef>, expected: &TypeRef) -> Result<()> {
        let Some(actual) = actual else {
            return Err(CompileError::type_mismatch(format!(
                "Expected a value of type {}, got void",
                expected
            )));
        };
        let describe = |t: &TypeRef| match t.fqn().and_then(|f| self.catalog.find_type(f)) {
            Some(def) => def.to_string(),
            None => t.to_string(),
        };
        let fits = match (actual, expected) {
            (_, TypeRef::Primitive(Primitive::Any | Primitive::Json)) => true,
            (TypeRef::Named { fqn }, TypeRef::Named { fqn: base }) => self
                .catalog
                .find_type(fqn)
                .map(|t| self.catalog.extends(t, base))
                .unwrap_or(fqn == base),
            (TypeRef::Union { union }, _) => union
                .iter()
                .all(|t| self.assert_implements(Some(t), expected).is_ok()),
            (_, TypeRef::Union { union }) => union
                .iter()
                .any(|t| self.assert_implements(Some(actual), t).is_ok()),
            (a, e) => a == e,
        };
        if fits {
            Ok(())
        } else {
            Err(CompileError::type_mismatch(format!(
                "Expected {} to implement {}",
                describe(actual),
                describe(expected)
            )))
        }
    }

    /// The class or interface behind a type reference
    pub fn object_type(&self, type_ref: &TypeRef) -> Result<&'a TypeDef> {
        type_ref
            .fqn()
            .and_then(|fqn| self.catalog.find_type(fqn))
            .filter(|t| t.is_object_type())
            .ok_or_else(|| {
                CompileError::reference(format!(
                    "Expected a class or interface, got {}",
                    type_ref
                ))
            })
    }

    /// Find the instance method `name` on `type_ref`
    pub fn infer_method(
        &self,
        type_ref: &TypeRef,
        name: &str,
        arguments: &CallArguments,
    ) -> Result<&'a Method> {
        let def = self.object_type(type_ref)?;
        let methods: Vec<(&TypeDef, &Method)> = self
            .catalog
            .all_methods(def)
            .into_iter()
            .filter(|(_, m)| !m.is_static && m.name == name)
            .collect();
        if methods.is_empty() {
            return Err(CompileError::reference(format!(
                "'{}' has no method called '{}'",
                def.fqn, name
            )));
        }
        self.select_overload(&methods, arguments, &def.fqn)
    }

    /// Type of the instance property `segment` on `type_ref`
    pub fn property_type(&self, type_ref: &TypeRef, segment: &str) -> Result<TypeRef> {
        let def = self.object_type(type_ref)?;
        self.catalog
            .all_properties(def)
            .into_iter()
            .find(|p| !p.is_static && p.name == segment)
            .map(|p| p.type_ref.clone())
            .ok_or_else(|| {
                CompileError::reference(format!("Invalid construct path '{}'", segment))
            })
    }
}
