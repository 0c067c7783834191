//! Raw expression AST
//!
//! Expressions as the external parser delivers them: tokenized, precedence
//! already resolved into tree shape, identifiers still unresolved. The engine
//! lowers this into `weft_runtime::CompiledExpr`; nothing here is evaluable.

use serde::{Deserialize, Serialize};

/// Binary operators with parser-resolved precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Untyped expression tree
///
/// An `Ident` may turn out to be a lambda parameter, a sibling attribute, a
/// parent entity, or an endpoint parameter; the compiler decides, in that
/// order. A `Call` may be a registry builtin or one of the lambda-taking
/// collection forms (`map`, `filter`, `find`, `all`, `any`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawExpr {
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    BoolLit(bool),
    /// List literal: `[a, b, c]`
    ListLit(Vec<RawExpr>),
    /// Record literal with explicit keys: `{price: p, qty: 1}`
    RecordLit(Vec<(String, RawExpr)>),
    /// Unresolved identifier
    Ident(String),
    /// Member access: `Order.total`, `item.price`
    Member {
        base: Box<RawExpr>,
        name: String,
    },
    /// Safe keyed access with optional default: `x["p"]`, `x["p", 0]`
    Index {
        base: Box<RawExpr>,
        key: Box<RawExpr>,
        default: Option<Box<RawExpr>>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<RawExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<RawExpr>,
        rhs: Box<RawExpr>,
    },
    /// `then if cond else otherwise`
    Ternary {
        cond: Box<RawExpr>,
        then: Box<RawExpr>,
        otherwise: Box<RawExpr>,
    },
    /// Builtin or collection call: `upper(x)`, `map(items, i -> i.price)`
    Call {
        name: String,
        args: Vec<RawExpr>,
    },
    /// Lambda literal: `x -> x * 2` or `(k, v) -> v`
    Lambda {
        params: Vec<String>,
        body: Box<RawExpr>,
    },
}

impl RawExpr {
    pub fn ident(name: &str) -> Self {
        RawExpr::Ident(name.to_string())
    }

    pub fn member(base: RawExpr, name: &str) -> Self {
        RawExpr::Member {
            base: Box::new(base),
            name: name.to_string(),
        }
    }

    /// Shorthand for `Entity.attr` references, the most common shape
    pub fn field(entity: &str, attr: &str) -> Self {
        Self::member(Self::ident(entity), attr)
    }

    pub fn binary(op: BinOp, lhs: RawExpr, rhs: RawExpr) -> Self {
        RawExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(name: &str, args: Vec<RawExpr>) -> Self {
        RawExpr::Call {
            name: name.to_string(),
            args,
        }
    }

    pub fn lambda(params: &[&str], body: RawExpr) -> Self {
        RawExpr::Lambda {
            params: params.iter().map(|p| p.to_string()).collect(),
            body: Box::new(body),
        }
    }
}
