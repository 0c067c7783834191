//! Expression compilation
//!
//! Lowers the parser-delivered `RawExpr` into `weft_runtime::CompiledExpr`,
//! resolving every identifier at build time. Resolution order for a bare
//! identifier: lambda parameter, sibling attribute, parent entity, endpoint
//! parameter — anything left over is an `UnresolvedReference` here, never a
//! runtime surprise. Builtin arity is validated against the registry
//! signatures; the lambda-taking collection forms are lowered into dedicated
//! `Collect` nodes so the evaluator never sees a lambda value.

use indexmap::IndexSet;
use tracing::trace;

use weft_model::{Entity, Metamodel, RawExpr};
use weft_runtime::builtins::BuiltinRegistry;
use weft_runtime::program::{CollectOp, CompiledAttribute, CompiledEntity, CompiledExpr};
use weft_runtime::Value;

use crate::error::{BuildError, BuildErrorKind, BuildResult};

/// Compiles all of one metamodel's expressions against a shared registry
pub struct ExprCompiler<'a> {
    model: &'a Metamodel,
    registry: &'a BuiltinRegistry,
    /// Union of every endpoint's declared parameter names
    params: IndexSet<String>,
}

impl<'a> ExprCompiler<'a> {
    pub fn new(model: &'a Metamodel, registry: &'a BuiltinRegistry) -> Self {
        let params = model
            .endpoints()
            .iter()
            .flat_map(|e| e.params().iter().map(|p| p.name.clone()))
            .collect();
        Self {
            model,
            registry,
            params,
        }
    }

    /// Compile every attribute of an entity, collecting all errors
    pub fn compile_entity(&self, entity: &Entity) -> Result<CompiledEntity, Vec<BuildError>> {
        let mut errors = Vec::new();
        let mut attrs = Vec::with_capacity(entity.attributes.len());

        for (index, attr) in entity.attributes.iter().enumerate() {
            let compiled = match &attr.expr {
                None => None,
                Some(raw) => {
                    let siblings: Vec<&str> = entity.attributes[..index]
                        .iter()
                        .map(|a| a.name.as_str())
                        .collect();
                    let mut scope = Scope {
                        entity,
                        siblings,
                        locals: Vec::new(),
                        path: format!("{}.{}", entity.name, attr.name),
                    };
                    match self.compile(raw, &mut scope) {
                        Ok(expr) => Some(expr),
                        Err(e) => {
                            errors.push(e);
                            None
                        }
                    }
                }
            };
            attrs.push(CompiledAttribute {
                name: attr.name.to_string(),
                ty: attr.ty,
                expr: compiled,
            });
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        trace!(entity = %entity.name, attrs = attrs.len(), "entity compiled");
        Ok(CompiledEntity {
            name: entity.name.to_string(),
            attrs,
            wrapper: entity.is_wrapper(),
            many: entity.many,
        })
    }

    fn compile(&self, raw: &RawExpr, scope: &mut Scope<'_>) -> BuildResult<CompiledExpr> {
        match raw {
            RawExpr::IntLit(i) => Ok(CompiledExpr::Const(Value::Int(*i))),
            RawExpr::FloatLit(f) => Ok(CompiledExpr::Const(Value::Float(*f))),
            RawExpr::StrLit(s) => Ok(CompiledExpr::Const(Value::Str(s.clone()))),
            RawExpr::BoolLit(b) => Ok(CompiledExpr::Const(Value::Bool(*b))),

            RawExpr::ListLit(items) => Ok(CompiledExpr::ListLit(
                items
                    .iter()
                    .map(|e| self.compile(e, scope))
                    .collect::<BuildResult<_>>()?,
            )),

            RawExpr::RecordLit(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, expr) in fields {
                    out.push((name.clone(), self.compile(expr, scope)?));
                }
                Ok(CompiledExpr::RecordLit(out))
            }

            RawExpr::Ident(name) => self.resolve_ident(name, scope),

            RawExpr::Member { base, name } => self.compile_member(base, name, scope),

            RawExpr::Index { base, key, default } => Ok(CompiledExpr::Index {
                base: Box::new(self.compile(base, scope)?),
                key: Box::new(self.compile(key, scope)?),
                default: match default {
                    Some(d) => Some(Box::new(self.compile(d, scope)?)),
                    None => None,
                },
            }),

            RawExpr::Unary { op, expr } => Ok(CompiledExpr::Unary {
                op: *op,
                expr: Box::new(self.compile(expr, scope)?),
            }),

            RawExpr::Binary { op, lhs, rhs } => Ok(CompiledExpr::Binary {
                op: *op,
                lhs: Box::new(self.compile(lhs, scope)?),
                rhs: Box::new(self.compile(rhs, scope)?),
            }),

            RawExpr::Ternary {
                cond,
                then,
                otherwise,
            } => Ok(CompiledExpr::If {
                cond: Box::new(self.compile(cond, scope)?),
                then: Box::new(self.compile(then, scope)?),
                otherwise: Box::new(self.compile(otherwise, scope)?),
            }),

            RawExpr::Call { name, args } => self.compile_call(name, args, scope),

            RawExpr::Lambda { .. } => Err(BuildError::new(
                BuildErrorKind::UnresolvedReference,
                format!(
                    "lambda literal outside a collection builtin argument at {}",
                    scope.path
                ),
            )),
        }
    }

    fn resolve_ident(&self, name: &str, scope: &Scope<'_>) -> BuildResult<CompiledExpr> {
        if scope.locals.iter().rev().any(|l| l == name) {
            return Ok(CompiledExpr::Local(name.to_string()));
        }
        if scope.siblings.contains(&name) {
            return Ok(CompiledExpr::Sibling(name.to_string()));
        }
        if scope.is_parent(name) {
            return Ok(CompiledExpr::EntityRef(name.to_string()));
        }
        if self.params.contains(name) {
            return Ok(CompiledExpr::Param(name.to_string()));
        }

        let mut err = BuildError::new(
            BuildErrorKind::UnresolvedReference,
            format!("unresolved identifier '{name}' at {}", scope.path),
        );
        // Forward sibling references are the common author mistake here
        if scope.entity.attribute(name).is_some() {
            err = err.with_note(format!(
                "attribute '{name}' is declared later; attributes may reference only earlier-declared siblings"
            ));
        }
        Err(err)
    }

    fn compile_member(
        &self,
        base: &RawExpr,
        name: &str,
        scope: &mut Scope<'_>,
    ) -> BuildResult<CompiledExpr> {
        // `Parent.field` resolves statically against the parent's declared
        // attributes; locals shadow parent entity names
        if let RawExpr::Ident(base_name) = base {
            let is_local = scope.locals.iter().any(|l| l == base_name);
            if !is_local && scope.is_parent(base_name) {
                let parent = self
                    .model
                    .get_entity(&base_name.as_str().into())
                    .ok_or_else(|| {
                        BuildError::new(
                            BuildErrorKind::UnknownEntity,
                            format!("unknown parent entity '{base_name}' at {}", scope.path),
                        )
                    })?;
                let attr = parent.attribute(name).ok_or_else(|| {
                    BuildError::new(
                        BuildErrorKind::UnresolvedReference,
                        format!(
                            "parent '{base_name}' has no attribute '{name}' at {}",
                            scope.path
                        ),
                    )
                })?;
                return Ok(CompiledExpr::EntityField {
                    entity: base_name.clone(),
                    field: name.to_string(),
                    nullable: attr.ty.nullable,
                });
            }
        }
        Ok(CompiledExpr::Member {
            base: Box::new(self.compile(base, scope)?),
            name: name.to_string(),
        })
    }

    fn compile_call(
        &self,
        name: &str,
        args: &[RawExpr],
        scope: &mut Scope<'_>,
    ) -> BuildResult<CompiledExpr> {
        let signature = self.registry.lookup(name).ok_or_else(|| {
            BuildError::new(
                BuildErrorKind::UnknownBuiltin,
                format!("unknown builtin '{name}' at {}", scope.path),
            )
        })?;
        if !signature.arity.accepts(args.len()) {
            return Err(BuildError::new(
                BuildErrorKind::WrongArgCount,
                format!(
                    "builtin '{name}' expects {} argument(s), got {} at {}",
                    signature.arity.describe(),
                    args.len(),
                    scope.path
                ),
            ));
        }

        match signature.lambda_slot {
            Some(slot) => self.compile_collect(name, args, slot, scope),
            None => {
                let mut compiled = Vec::with_capacity(args.len());
                for arg in args {
                    if matches!(arg, RawExpr::Lambda { .. }) {
                        return Err(BuildError::new(
                            BuildErrorKind::WrongArgCount,
                            format!("builtin '{name}' does not take a lambda at {}", scope.path),
                        ));
                    }
                    compiled.push(self.compile(arg, scope)?);
                }
                Ok(CompiledExpr::Call {
                    name: name.to_string(),
                    args: compiled,
                })
            }
        }
    }

    fn compile_collect(
        &self,
        name: &str,
        args: &[RawExpr],
        slot: usize,
        scope: &mut Scope<'_>,
    ) -> BuildResult<CompiledExpr> {
        let op = match name {
            "map" => CollectOp::Map,
            "filter" => CollectOp::Filter,
            "find" => CollectOp::Find,
            "all" => CollectOp::All,
            "any" => CollectOp::Any,
            other => {
                return Err(BuildError::new(
                    BuildErrorKind::UnknownBuiltin,
                    format!("'{other}' has a lambda slot but no collection form"),
                ))
            }
        };
        let RawExpr::Lambda { params, body } = &args[slot] else {
            return Err(BuildError::new(
                BuildErrorKind::WrongArgCount,
                format!(
                    "builtin '{name}' requires a lambda as argument {} at {}",
                    slot + 1,
                    scope.path
                ),
            ));
        };
        if params.is_empty() || params.len() > 2 {
            return Err(BuildError::new(
                BuildErrorKind::WrongArgCount,
                format!(
                    "lambda for '{name}' takes one parameter or a two-element tuple at {}",
                    scope.path
                ),
            ));
        }

        let seq = self.compile(&args[0], scope)?;

        let depth = scope.locals.len();
        scope.locals.extend(params.iter().cloned());
        let compiled_body = self.compile(body, scope);
        scope.locals.truncate(depth);

        Ok(CompiledExpr::Collect {
            op,
            seq: Box::new(seq),
            params: params.clone(),
            body: Box::new(compiled_body?),
        })
    }
}

/// Per-attribute resolution scope
struct Scope<'e> {
    entity: &'e Entity,
    /// Names of attributes declared before the current one
    siblings: Vec<&'e str>,
    /// Lambda parameters currently in scope, innermost last
    locals: Vec<String>,
    path: String,
}

impl Scope<'_> {
    fn is_parent(&self, name: &str) -> bool {
        self.entity.parents.iter().any(|p| p.entity.as_str() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::{Attribute, BinOp, Endpoint, FieldType, Param, ParentRef, TypeKind};

    fn registry() -> BuiltinRegistry {
        BuiltinRegistry::standard()
    }

    fn model_with(entity: Entity) -> Metamodel {
        Metamodel::new()
            .entity(
                Entity::new("Raw")
                    .attr(Attribute::schema("x", FieldType::scalar(TypeKind::Int)))
                    .attr(Attribute::schema(
                        "note",
                        FieldType::scalar(TypeKind::Text).nullable(),
                    )),
            )
            .entity(entity)
            .endpoint(Endpoint::Rest {
                name: "get".to_string(),
                entity: "Raw".into(),
                params: vec![Param::new("limit", FieldType::scalar(TypeKind::Int))],
            })
    }

    fn compile_single(entity: Entity) -> Result<CompiledEntity, Vec<BuildError>> {
        let model = model_with(entity.clone());
        let reg = registry();
        let compiler = ExprCompiler::new(&model, &reg);
        compiler.compile_entity(&entity)
    }

    #[test]
    fn resolves_parent_field_with_nullability() {
        let entity = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "a",
                FieldType::scalar(TypeKind::Text).nullable(),
                RawExpr::field("Raw", "note"),
            ));
        let compiled = compile_single(entity).unwrap();
        assert_eq!(
            compiled.attrs[0].expr,
            Some(CompiledExpr::EntityField {
                entity: "Raw".to_string(),
                field: "note".to_string(),
                nullable: true,
            })
        );
    }

    #[test]
    fn sibling_resolution_only_looks_backward() {
        let entity = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "early",
                FieldType::scalar(TypeKind::Int),
                RawExpr::ident("late"),
            ))
            .attr(Attribute::computed(
                "late",
                FieldType::scalar(TypeKind::Int),
                RawExpr::ident("early"),
            ));
        let errors = compile_single(entity).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, BuildErrorKind::UnresolvedReference);
        assert!(errors[0].notes[0].contains("earlier-declared"));
    }

    #[test]
    fn endpoint_params_resolve_last() {
        let entity = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "a",
                FieldType::scalar(TypeKind::Int),
                RawExpr::ident("limit"),
            ));
        let compiled = compile_single(entity).unwrap();
        assert_eq!(
            compiled.attrs[0].expr,
            Some(CompiledExpr::Param("limit".to_string()))
        );
    }

    #[test]
    fn unknown_builtin_and_arity_are_build_errors() {
        let bad_name = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "a",
                FieldType::scalar(TypeKind::Int),
                RawExpr::call("frobnicate", vec![RawExpr::IntLit(1)]),
            ));
        let errors = compile_single(bad_name).unwrap_err();
        assert_eq!(errors[0].kind, BuildErrorKind::UnknownBuiltin);

        let bad_arity = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "a",
                FieldType::scalar(TypeKind::Text),
                RawExpr::call("upper", vec![RawExpr::StrLit("a".into()), RawExpr::IntLit(2)]),
            ));
        let errors = compile_single(bad_arity).unwrap_err();
        assert_eq!(errors[0].kind, BuildErrorKind::WrongArgCount);
    }

    #[test]
    fn collection_call_lowers_to_collect_node() {
        let entity = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "big",
                FieldType::list(TypeKind::Record),
                RawExpr::call(
                    "filter",
                    vec![
                        RawExpr::ListLit(vec![]),
                        RawExpr::lambda(
                            &["x"],
                            RawExpr::binary(
                                BinOp::Gt,
                                RawExpr::Index {
                                    base: Box::new(RawExpr::ident("x")),
                                    key: Box::new(RawExpr::StrLit("p".into())),
                                    default: None,
                                },
                                RawExpr::IntLit(50),
                            ),
                        ),
                    ],
                ),
            ));
        let compiled = compile_single(entity).unwrap();
        let Some(CompiledExpr::Collect { op, params, .. }) = &compiled.attrs[0].expr else {
            panic!("expected a Collect node");
        };
        assert_eq!(*op, CollectOp::Filter);
        assert_eq!(params, &["x".to_string()]);
    }

    #[test]
    fn lambda_parameter_shadows_parent_name() {
        // `map(xs, Raw -> Raw.anything)` binds `Raw` locally, so member
        // access compiles dynamically instead of against the entity schema
        let entity = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "a",
                FieldType::list(TypeKind::Int),
                RawExpr::call(
                    "map",
                    vec![
                        RawExpr::ListLit(vec![]),
                        RawExpr::lambda(&["Raw"], RawExpr::field("Raw", "anything")),
                    ],
                ),
            ));
        let compiled = compile_single(entity).unwrap();
        let Some(CompiledExpr::Collect { body, .. }) = &compiled.attrs[0].expr else {
            panic!("expected a Collect node");
        };
        assert!(matches!(**body, CompiledExpr::Member { .. }));
    }

    #[test]
    fn missing_parent_attribute_is_a_build_error() {
        let entity = Entity::new("D")
            .parent(ParentRef::new("Raw"))
            .attr(Attribute::computed(
                "a",
                FieldType::scalar(TypeKind::Int),
                RawExpr::field("Raw", "ghost"),
            ));
        let errors = compile_single(entity).unwrap_err();
        assert_eq!(errors[0].kind, BuildErrorKind::UnresolvedReference);
        assert!(errors[0].message.contains("ghost"));
    }
}
