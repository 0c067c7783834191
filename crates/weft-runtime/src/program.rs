//! Compiled entity programs
//!
//! [`CompiledExpr`] is the evaluable form the engine's expression compiler
//! produces: every identifier already resolved, every builtin arity already
//! validated. Evaluation needs no string parsing, is pure, and is re-entrant
//! across concurrent requests — the compiled form is immutable and all
//! per-request state lives in the [`Context`]/[`EvalScope`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use weft_model::{BinOp, FieldType, UnaryOp};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::{coerce, Value};

/// Lambda-taking collection combinators, lowered from `Call` at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectOp {
    Map,
    Filter,
    Find,
    All,
    Any,
}

/// A compiled, evaluable expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompiledExpr {
    Const(Value),
    /// Whole value of a parent entity from the context
    EntityRef(String),
    /// Field of a parent entity: `Raw.x`
    EntityField {
        entity: String,
        field: String,
        /// Missing fields evaluate to null instead of erroring
        nullable: bool,
    },
    /// Sibling attribute already assembled in the record under construction
    Sibling(String),
    /// Endpoint parameter seeded into the context
    Param(String),
    /// Lambda parameter, innermost binding wins
    Local(String),
    ListLit(Vec<CompiledExpr>),
    RecordLit(Vec<(String, CompiledExpr)>),
    Unary {
        op: UnaryOp,
        expr: Box<CompiledExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<CompiledExpr>,
        rhs: Box<CompiledExpr>,
    },
    If {
        cond: Box<CompiledExpr>,
        then: Box<CompiledExpr>,
        otherwise: Box<CompiledExpr>,
    },
    /// Member access on a non-entity base (lambda parameters, nested records)
    Member {
        base: Box<CompiledExpr>,
        name: String,
    },
    /// Safe keyed access with optional default: `x["p"]`, `x["p", 0]`
    Index {
        base: Box<CompiledExpr>,
        key: Box<CompiledExpr>,
        default: Option<Box<CompiledExpr>>,
    },
    /// Plain registry builtin call
    Call {
        name: String,
        args: Vec<CompiledExpr>,
    },
    /// Collection combinator with a compiled lambda body
    Collect {
        op: CollectOp,
        seq: Box<CompiledExpr>,
        params: Vec<String>,
        body: Box<CompiledExpr>,
    },
}

/// Evaluation scope: the context plus whatever local state the current
/// expression position needs (partial record, fan-out overlay, lambda
/// bindings).
pub struct EvalScope<'a> {
    ctx: &'a Context,
    /// Record under construction, for sibling references
    current: Option<&'a IndexMap<String, Value>>,
    /// Fan-out substitution: this entity name resolves to the current item
    overlay: Option<(&'a str, &'a Value)>,
    locals: Vec<(String, Value)>,
    path: String,
}

impl<'a> EvalScope<'a> {
    pub fn new(ctx: &'a Context, path: impl Into<String>) -> Self {
        Self {
            ctx,
            current: None,
            overlay: None,
            locals: Vec::new(),
            path: path.into(),
        }
    }

    pub fn with_current(mut self, current: &'a IndexMap<String, Value>) -> Self {
        self.current = Some(current);
        self
    }

    pub fn with_overlay(mut self, entity: &'a str, item: &'a Value) -> Self {
        self.overlay = Some((entity, item));
        self
    }

    /// Child scope with additional lambda bindings
    fn bind(&self, bindings: &[(String, Value)]) -> EvalScope<'a> {
        let mut locals = self.locals.clone();
        locals.extend(bindings.iter().cloned());
        EvalScope {
            ctx: self.ctx,
            current: self.current,
            overlay: self.overlay,
            locals,
            path: self.path.clone(),
        }
    }

    fn entity_value(&self, name: &str) -> Option<&Value> {
        if let Some((overlaid, item)) = self.overlay {
            if overlaid == name {
                return Some(item);
            }
        }
        self.ctx.get(name)
    }

    fn local(&self, name: &str) -> Option<&Value> {
        self.locals.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl CompiledExpr {
    /// Evaluate against a scope. Pure: same scope, same value, no side
    /// effects.
    pub fn evaluate(&self, scope: &EvalScope<'_>) -> Result<Value> {
        match self {
            CompiledExpr::Const(v) => Ok(v.clone()),

            CompiledExpr::EntityRef(name) => {
                scope.entity_value(name).cloned().ok_or_else(|| Error::Unresolved {
                    name: name.clone(),
                    path: scope.path.clone(),
                })
            }

            CompiledExpr::EntityField {
                entity,
                field,
                nullable,
            } => {
                let value = scope.entity_value(entity).ok_or_else(|| Error::Unresolved {
                    name: entity.clone(),
                    path: scope.path.clone(),
                })?;
                match value.get(field) {
                    Some(v) => Ok(v.clone()),
                    None if *nullable => Ok(Value::Null),
                    None => Err(Error::MissingField {
                        field: format!("{entity}.{field}"),
                        path: scope.path.clone(),
                    }),
                }
            }

            CompiledExpr::Sibling(name) => scope
                .current
                .and_then(|rec| rec.get(name))
                .cloned()
                .ok_or_else(|| Error::Unresolved {
                    name: name.clone(),
                    path: scope.path.clone(),
                }),

            CompiledExpr::Param(name) => {
                scope.ctx.param(name).cloned().ok_or_else(|| Error::Unresolved {
                    name: name.clone(),
                    path: scope.path.clone(),
                })
            }

            CompiledExpr::Local(name) => scope.local(name).cloned().ok_or_else(|| Error::Unresolved {
                name: name.clone(),
                path: scope.path.clone(),
            }),

            CompiledExpr::ListLit(items) => Ok(Value::List(
                items.iter().map(|e| e.evaluate(scope)).collect::<Result<_>>()?,
            )),

            CompiledExpr::RecordLit(fields) => {
                let mut rec = IndexMap::new();
                for (name, expr) in fields {
                    rec.insert(name.clone(), expr.evaluate(scope)?);
                }
                Ok(Value::Record(rec))
            }

            CompiledExpr::Unary { op, expr } => eval_unary(*op, expr.evaluate(scope)?, scope),

            CompiledExpr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, scope),

            CompiledExpr::If {
                cond,
                then,
                otherwise,
            } => {
                let c = expect_bool(cond.evaluate(scope)?, scope)?;
                if c {
                    then.evaluate(scope)
                } else {
                    otherwise.evaluate(scope)
                }
            }

            CompiledExpr::Member { base, name } => {
                let value = base.evaluate(scope)?;
                value.get(name).cloned().ok_or_else(|| Error::MissingField {
                    field: name.clone(),
                    path: scope.path.clone(),
                })
            }

            CompiledExpr::Index { base, key, default } => {
                let value = base.evaluate(scope)?;
                let key = key.evaluate(scope)?;
                let found = match (&value, &key) {
                    (Value::Record(rec), Value::Str(k)) => rec.get(k).cloned(),
                    (Value::List(items), Value::Int(i)) => {
                        usize::try_from(*i).ok().and_then(|i| items.get(i)).cloned()
                    }
                    _ => {
                        return Err(Error::TypeMismatch {
                            path: scope.path.clone(),
                            expected: "record[string] or list[int]".to_string(),
                            actual: format!("{}[{}]", value.type_name(), key.type_name()),
                        })
                    }
                };
                match found {
                    Some(v) => Ok(v),
                    None => match default {
                        Some(d) => d.evaluate(scope),
                        None => Err(Error::MissingField {
                            field: key.to_string(),
                            path: scope.path.clone(),
                        }),
                    },
                }
            }

            CompiledExpr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(scope))
                    .collect::<Result<Vec<_>>>()?;
                scope.ctx.builtins().call(name, &values, &scope.path)
            }

            CompiledExpr::Collect {
                op,
                seq,
                params,
                body,
            } => eval_collect(*op, seq, params, body, scope),
        }
    }
}

fn expect_bool(v: Value, scope: &EvalScope<'_>) -> Result<bool> {
    v.as_bool().ok_or_else(|| Error::TypeMismatch {
        path: scope.path().to_string(),
        expected: "bool".to_string(),
        actual: v.type_name().to_string(),
    })
}

fn eval_unary(op: UnaryOp, value: Value, scope: &EvalScope<'_>) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, value) => Err(Error::TypeMismatch {
            path: scope.path().to_string(),
            expected: match op {
                UnaryOp::Neg => "number",
                UnaryOp::Not => "bool",
            }
            .to_string(),
            actual: value.type_name().to_string(),
        }),
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &CompiledExpr,
    rhs: &CompiledExpr,
    scope: &EvalScope<'_>,
) -> Result<Value> {
    // Short-circuit logical operators before evaluating the right side
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = expect_bool(lhs.evaluate(scope)?, scope)?;
        return match (op, l) {
            (BinOp::And, false) => Ok(Value::Bool(false)),
            (BinOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(expect_bool(rhs.evaluate(scope)?, scope)?)),
        };
    }

    let l = lhs.evaluate(scope)?;
    let r = rhs.evaluate(scope)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &l, &r, scope),
        BinOp::Add => match (&l, &r) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => arithmetic(op, &l, &r, scope),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, &l, &r, scope),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

/// Structural equality with int/float numeric coercion.
/// Int/Int stays in `i64` so values beyond f64's 2^53 mantissa compare
/// exactly.
fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a == b,
        _ => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => l == r,
        },
    }
}

fn compare(op: BinOp, l: &Value, r: &Value, scope: &EvalScope<'_>) -> Result<Value> {
    let ordering = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        return Err(Error::TypeMismatch {
            path: scope.path().to_string(),
            expected: "comparable values".to_string(),
            actual: format!("{} vs {}", l.type_name(), r.type_name()),
        });
    };
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinOp, l: &Value, r: &Value, scope: &EvalScope<'_>) -> Result<Value> {
    // Int/Int stays in checked i64 arithmetic; routing through f64 would
    // silently lose precision past the 2^53 mantissa
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        return int_arithmetic(op, *a, *b, scope);
    }

    let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
        return Err(Error::TypeMismatch {
            path: scope.path().to_string(),
            expected: "numbers".to_string(),
            actual: format!("{} and {}", l.type_name(), r.type_name()),
        });
    };

    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div | BinOp::Mod => {
            if b == 0.0 {
                return Err(Error::DivisionByZero {
                    path: scope.path().to_string(),
                });
            }
            Ok(Value::Float(if op == BinOp::Div { a / b } else { a % b }))
        }
        _ => unreachable!(),
    }
}

fn int_arithmetic(op: BinOp, a: i64, b: i64, scope: &EvalScope<'_>) -> Result<Value> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(Error::DivisionByZero {
                    path: scope.path().to_string(),
                });
            }
            // Division always widens to float; declared-type coercion
            // narrows back at record assembly when exact
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(Error::DivisionByZero {
                    path: scope.path().to_string(),
                });
            }
            a.checked_rem(b)
        }
        _ => unreachable!(),
    };
    result.map(Value::Int).ok_or_else(|| Error::Overflow {
        path: scope.path().to_string(),
    })
}

fn eval_collect(
    op: CollectOp,
    seq: &CompiledExpr,
    params: &[String],
    body: &CompiledExpr,
    scope: &EvalScope<'_>,
) -> Result<Value> {
    let seq = seq.evaluate(scope)?;
    let Value::List(items) = seq else {
        return Err(Error::TypeMismatch {
            path: scope.path().to_string(),
            expected: "list".to_string(),
            actual: seq.type_name().to_string(),
        });
    };

    let bind_item = |item: &Value| -> Result<Vec<(String, Value)>> {
        if params.len() == 1 {
            return Ok(vec![(params[0].clone(), item.clone())]);
        }
        // Tuple parameters destructure pair-shaped items (zip, enumerate)
        let Value::List(parts) = item else {
            return Err(Error::TypeMismatch {
                path: scope.path().to_string(),
                expected: format!("{}-element tuple", params.len()),
                actual: item.type_name().to_string(),
            });
        };
        if parts.len() != params.len() {
            return Err(Error::TypeMismatch {
                path: scope.path().to_string(),
                expected: format!("{}-element tuple", params.len()),
                actual: format!("{}-element list", parts.len()),
            });
        }
        Ok(params.iter().cloned().zip(parts.iter().cloned()).collect())
    };

    match op {
        CollectOp::Map => {
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                let child = scope.bind(&bind_item(item)?);
                out.push(body.evaluate(&child)?);
            }
            Ok(Value::List(out))
        }
        CollectOp::Filter => {
            let mut out = Vec::new();
            for item in &items {
                let child = scope.bind(&bind_item(item)?);
                if expect_bool(body.evaluate(&child)?, scope)? {
                    out.push(item.clone());
                }
            }
            Ok(Value::List(out))
        }
        CollectOp::Find => {
            for item in &items {
                let child = scope.bind(&bind_item(item)?);
                if expect_bool(body.evaluate(&child)?, scope)? {
                    return Ok(item.clone());
                }
            }
            Ok(Value::Null)
        }
        CollectOp::All => {
            for item in &items {
                let child = scope.bind(&bind_item(item)?);
                if !expect_bool(body.evaluate(&child)?, scope)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        CollectOp::Any => {
            for item in &items {
                let child = scope.bind(&bind_item(item)?);
                if expect_bool(body.evaluate(&child)?, scope)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

/// One compiled attribute of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledAttribute {
    pub name: String,
    pub ty: FieldType,
    /// Schema fields carry no program; composite entities have one per
    /// attribute (enforced at graph build)
    pub expr: Option<CompiledExpr>,
}

/// A fully compiled entity: attribute programs plus static markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledEntity {
    pub name: String,
    pub attrs: Vec<CompiledAttribute>,
    /// Exactly one unexpressed attribute; auto-wrap/unwrap applies
    pub wrapper: bool,
    /// Declared list-shaped
    pub many: bool,
}

impl CompiledEntity {
    /// Evaluate every attribute in declaration order and assemble the
    /// record. Earlier attributes are visible to later ones as siblings.
    pub fn assemble(&self, ctx: &Context, overlay: Option<(&str, &Value)>) -> Result<Value> {
        let mut rec: IndexMap<String, Value> = IndexMap::new();
        for attr in &self.attrs {
            let path = format!("{}.{}", self.name, attr.name);
            let expr = attr.expr.as_ref().ok_or_else(|| Error::MissingField {
                field: attr.name.clone(),
                path: path.clone(),
            })?;
            let value = {
                let mut scope = EvalScope::new(ctx, path.clone()).with_current(&rec);
                if let Some((entity, item)) = overlay {
                    scope = scope.with_overlay(entity, item);
                }
                expr.evaluate(&scope)?
            };
            let value = coerce(value, &attr.ty, &path)?;
            rec.insert(attr.name.clone(), value);
        }
        Ok(Value::Record(rec))
    }

    /// Auto-wrap a raw inbound value into the wrapper record shape.
    /// Records pass through untouched; only the static wrapper marker
    /// drives this, never runtime sniffing of non-wrapper entities.
    pub fn wrap(&self, raw: Value) -> Result<Value> {
        if !self.wrapper {
            return Ok(raw);
        }
        if raw.as_record().is_some() {
            return Ok(raw);
        }
        let attr = &self.attrs[0];
        let path = format!("{}.{}", self.name, attr.name);
        let value = coerce(raw, &attr.ty, &path)?;
        Ok(Value::record([(attr.name.clone(), value)]))
    }

    /// Auto-unwrap a wrapper record back to its raw value
    pub fn unwrap(&self, value: Value) -> Result<Value> {
        if !self.wrapper {
            return Ok(value);
        }
        let attr = &self.attrs[0];
        match value {
            Value::Record(mut rec) => rec.shift_remove(&attr.name).ok_or_else(|| {
                Error::WrapperContract {
                    entity: self.name.clone(),
                    message: format!("record missing wrapped attribute '{}'", attr.name),
                }
            }),
            other => Err(Error::WrapperContract {
                entity: self.name.clone(),
                message: format!("expected a record, got {}", other.type_name()),
            }),
        }
    }
}

/// Immutable table of compiled entities, shared across all requests
#[derive(Debug, Default, Clone)]
pub struct EntityPrograms {
    map: IndexMap<String, CompiledEntity>,
}

impl EntityPrograms {
    pub fn insert(&mut self, entity: CompiledEntity) {
        self.map.insert(entity.name.clone(), entity);
    }

    pub fn get(&self, name: &str) -> Option<&CompiledEntity> {
        self.map.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
