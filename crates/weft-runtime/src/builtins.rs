//! Builtin function registry
//!
//! A process-wide immutable table constructed once at startup and handed by
//! reference into every context. Signatures (name + arity + lambda slot) are
//! what the expression compiler validates against; the evaluator only calls
//! the plain functions — the lambda-taking collection forms (`map`, `filter`,
//! `find`, `all`, `any`) are compiled into dedicated program nodes instead.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Declared argument count of a builtin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Inclusive range, for optional trailing arguments
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == *k,
            Arity::Range(lo, hi) => n >= *lo && n <= *hi,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Arity::Exact(k) => k.to_string(),
            Arity::Range(lo, hi) => format!("{lo}..={hi}"),
        }
    }
}

/// Static signature of a builtin, checked at expression-compile time
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub arity: Arity,
    /// Argument position that must be a lambda literal, if any
    pub lambda_slot: Option<usize>,
}

type BuiltinFn = fn(&[Value]) -> std::result::Result<Value, String>;

/// Immutable registry of builtin functions
#[derive(Debug)]
pub struct BuiltinRegistry {
    signatures: IndexMap<&'static str, Signature>,
    functions: IndexMap<&'static str, BuiltinFn>,
}

impl BuiltinRegistry {
    /// The standard library: string, math, collection, and date builtins
    /// plus signatures for the compiler-handled collection forms.
    pub fn standard() -> Self {
        let mut reg = Self {
            signatures: IndexMap::new(),
            functions: IndexMap::new(),
        };

        // Collection forms lowered by the compiler; signature only.
        reg.signature("map", Arity::Exact(2), Some(1));
        reg.signature("filter", Arity::Exact(2), Some(1));
        reg.signature("find", Arity::Exact(2), Some(1));
        reg.signature("all", Arity::Exact(2), Some(1));
        reg.signature("any", Arity::Exact(2), Some(1));

        // String
        reg.plain("upper", Arity::Exact(1), builtin_upper);
        reg.plain("lower", Arity::Exact(1), builtin_lower);
        reg.plain("trim", Arity::Exact(1), builtin_trim);
        reg.plain("concat", Arity::Range(2, 8), builtin_concat);
        reg.plain("contains", Arity::Exact(2), builtin_contains);
        reg.plain("starts_with", Arity::Exact(2), builtin_starts_with);
        reg.plain("split", Arity::Exact(2), builtin_split);

        // Math
        reg.plain("abs", Arity::Exact(1), builtin_abs);
        reg.plain("min", Arity::Exact(2), builtin_min);
        reg.plain("max", Arity::Exact(2), builtin_max);
        reg.plain("round", Arity::Exact(1), builtin_round);
        reg.plain("floor", Arity::Exact(1), builtin_floor);
        reg.plain("ceil", Arity::Exact(1), builtin_ceil);
        reg.plain("sqrt", Arity::Exact(1), builtin_sqrt);
        reg.plain("pow", Arity::Exact(2), builtin_pow);

        // Collections (no lambda)
        reg.plain("sum", Arity::Exact(1), builtin_sum);
        reg.plain("len", Arity::Exact(1), builtin_len);
        reg.plain("zip", Arity::Exact(2), builtin_zip);
        reg.plain("enumerate", Arity::Exact(1), builtin_enumerate);
        reg.plain("first", Arity::Exact(1), builtin_first);
        reg.plain("last", Arity::Exact(1), builtin_last);

        // Date
        reg.plain("now_iso", Arity::Exact(0), builtin_now_iso);
        reg.plain("year_of", Arity::Exact(1), builtin_year_of);
        reg.plain("month_of", Arity::Exact(1), builtin_month_of);
        reg.plain("date_add_days", Arity::Exact(2), builtin_date_add_days);

        reg
    }

    fn signature(&mut self, name: &'static str, arity: Arity, lambda_slot: Option<usize>) {
        self.signatures.insert(name, Signature { arity, lambda_slot });
    }

    fn plain(&mut self, name: &'static str, arity: Arity, func: BuiltinFn) {
        self.signature(name, arity, None);
        self.functions.insert(name, func);
    }

    pub fn lookup(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name)
    }

    /// Invoke a plain builtin. Arity has been validated at compile time.
    pub fn call(&self, name: &str, args: &[Value], path: &str) -> Result<Value> {
        let func = self.functions.get(name).ok_or_else(|| Error::UnknownBuiltin {
            name: name.to_string(),
            path: path.to_string(),
        })?;
        func(args).map_err(|message| Error::BuiltinArgument {
            name: name.to_string(),
            path: path.to_string(),
            message,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.signatures.keys().copied()
    }
}

fn want_str(v: &Value, what: &str) -> std::result::Result<String, String> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("{what} must be a string, got {}", v.type_name()))
}

fn want_number(v: &Value, what: &str) -> std::result::Result<f64, String> {
    v.as_number()
        .ok_or_else(|| format!("{what} must be numeric, got {}", v.type_name()))
}

fn want_list<'a>(v: &'a Value, what: &str) -> std::result::Result<&'a [Value], String> {
    v.as_list()
        .ok_or_else(|| format!("{what} must be a list, got {}", v.type_name()))
}

fn builtin_upper(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Str(want_str(&args[0], "argument")?.to_uppercase()))
}

fn builtin_lower(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Str(want_str(&args[0], "argument")?.to_lowercase()))
}

fn builtin_trim(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Str(want_str(&args[0], "argument")?.trim().to_string()))
}

fn builtin_concat(args: &[Value]) -> std::result::Result<Value, String> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Str(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
    }
    Ok(Value::Str(out))
}

fn builtin_contains(args: &[Value]) -> std::result::Result<Value, String> {
    let hay = want_str(&args[0], "haystack")?;
    let needle = want_str(&args[1], "needle")?;
    Ok(Value::Bool(hay.contains(&needle)))
}

fn builtin_starts_with(args: &[Value]) -> std::result::Result<Value, String> {
    let hay = want_str(&args[0], "haystack")?;
    let prefix = want_str(&args[1], "prefix")?;
    Ok(Value::Bool(hay.starts_with(&prefix)))
}

fn builtin_split(args: &[Value]) -> std::result::Result<Value, String> {
    let s = want_str(&args[0], "string")?;
    let sep = want_str(&args[1], "separator")?;
    Ok(Value::List(
        s.split(&sep).map(|part| Value::Str(part.to_string())).collect(),
    ))
}

fn builtin_abs(args: &[Value]) -> std::result::Result<Value, String> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(format!("argument must be numeric, got {}", other.type_name())),
    }
}

fn builtin_min(args: &[Value]) -> std::result::Result<Value, String> {
    if let (Value::Int(a), Value::Int(b)) = (&args[0], &args[1]) {
        return Ok(Value::Int(*a.min(b)));
    }
    let a = want_number(&args[0], "first argument")?;
    let b = want_number(&args[1], "second argument")?;
    Ok(Value::Float(a.min(b)))
}

fn builtin_max(args: &[Value]) -> std::result::Result<Value, String> {
    if let (Value::Int(a), Value::Int(b)) = (&args[0], &args[1]) {
        return Ok(Value::Int(*a.max(b)));
    }
    let a = want_number(&args[0], "first argument")?;
    let b = want_number(&args[1], "second argument")?;
    Ok(Value::Float(a.max(b)))
}

fn builtin_round(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Int(want_number(&args[0], "argument")?.round() as i64))
}

fn builtin_floor(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Int(want_number(&args[0], "argument")?.floor() as i64))
}

fn builtin_ceil(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Int(want_number(&args[0], "argument")?.ceil() as i64))
}

fn builtin_sqrt(args: &[Value]) -> std::result::Result<Value, String> {
    let v = want_number(&args[0], "argument")?;
    if v < 0.0 {
        return Err("sqrt of negative number".to_string());
    }
    Ok(Value::Float(v.sqrt()))
}

fn builtin_pow(args: &[Value]) -> std::result::Result<Value, String> {
    if let (Value::Int(a), Value::Int(b)) = (&args[0], &args[1]) {
        // Negative exponents widen to float below
        if let Ok(exp) = u32::try_from(*b) {
            return a
                .checked_pow(exp)
                .map(Value::Int)
                .ok_or_else(|| "integer pow overflows".to_string());
        }
    }
    let base = want_number(&args[0], "base")?;
    let exp = want_number(&args[1], "exponent")?;
    Ok(Value::Float(base.powf(exp)))
}

/// Sum over a list. The empty list sums to `0`, not an error. All-int
/// lists are summed in checked `i64`, never through f64.
fn builtin_sum(args: &[Value]) -> std::result::Result<Value, String> {
    let items = want_list(&args[0], "argument")?;
    let mut all_int = true;
    let mut int_total = 0_i64;
    let mut total = 0.0;
    for item in items {
        total += want_number(item, "list element")?;
        if all_int {
            match item {
                Value::Int(i) => {
                    int_total = int_total
                        .checked_add(*i)
                        .ok_or_else(|| "integer sum overflows".to_string())?;
                }
                _ => all_int = false,
            }
        }
    }
    Ok(if all_int {
        Value::Int(int_total)
    } else {
        Value::Float(total)
    })
}

fn builtin_len(args: &[Value]) -> std::result::Result<Value, String> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Record(fields) => Ok(Value::Int(fields.len() as i64)),
        other => Err(format!("len of {}", other.type_name())),
    }
}

/// Pairs of `[a[i], b[i]]`, truncating at the shorter list
fn builtin_zip(args: &[Value]) -> std::result::Result<Value, String> {
    let a = want_list(&args[0], "first argument")?;
    let b = want_list(&args[1], "second argument")?;
    Ok(Value::List(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| Value::List(vec![x.clone(), y.clone()]))
            .collect(),
    ))
}

/// Pairs of `[index, item]`
fn builtin_enumerate(args: &[Value]) -> std::result::Result<Value, String> {
    let items = want_list(&args[0], "argument")?;
    Ok(Value::List(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| Value::List(vec![Value::Int(i as i64), item.clone()]))
            .collect(),
    ))
}

fn builtin_first(args: &[Value]) -> std::result::Result<Value, String> {
    let items = want_list(&args[0], "argument")?;
    Ok(items.first().cloned().unwrap_or(Value::Null))
}

fn builtin_last(args: &[Value]) -> std::result::Result<Value, String> {
    let items = want_list(&args[0], "argument")?;
    Ok(items.last().cloned().unwrap_or(Value::Null))
}

fn builtin_now_iso(_args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Str(Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()))
}

fn parse_date(v: &Value) -> std::result::Result<NaiveDate, String> {
    let s = want_str(v, "date")?;
    // Accept a bare date or the date part of an ISO timestamp
    let date_part = s.split('T').next().unwrap_or(&s);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| format!("invalid ISO date '{s}': {e}"))
}

fn builtin_year_of(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Int(parse_date(&args[0])?.year() as i64))
}

fn builtin_month_of(args: &[Value]) -> std::result::Result<Value, String> {
    Ok(Value::Int(parse_date(&args[0])?.month() as i64))
}

fn builtin_date_add_days(args: &[Value]) -> std::result::Result<Value, String> {
    let date = parse_date(&args[0])?;
    let days = args[1]
        .as_int()
        .ok_or_else(|| format!("day count must be an int, got {}", args[1].type_name()))?;
    let shifted = date + Duration::days(days);
    Ok(Value::Str(shifted.format("%Y-%m-%d").to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> BuiltinRegistry {
        BuiltinRegistry::standard()
    }

    #[test]
    fn arity_acceptance() {
        assert!(Arity::Exact(2).accepts(2));
        assert!(!Arity::Exact(2).accepts(3));
        assert!(Arity::Range(2, 8).accepts(5));
        assert!(!Arity::Range(2, 8).accepts(1));
    }

    #[test]
    fn collection_forms_have_lambda_slots() {
        let reg = reg();
        assert_eq!(reg.lookup("map").unwrap().lambda_slot, Some(1));
        assert_eq!(reg.lookup("upper").unwrap().lambda_slot, None);
        assert!(reg.lookup("nope").is_none());
    }

    #[test]
    fn string_builtins() {
        let reg = reg();
        assert_eq!(
            reg.call("upper", &[Value::from("hi")], "t").unwrap(),
            Value::from("HI")
        );
        assert_eq!(
            reg.call("concat", &[Value::from("a"), Value::from("b"), Value::Int(3)], "t")
                .unwrap(),
            Value::from("ab3")
        );
        assert_eq!(
            reg.call("split", &[Value::from("a,b"), Value::from(",")], "t").unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[test]
    fn sum_of_empty_list_is_zero() {
        let reg = reg();
        assert_eq!(reg.call("sum", &[Value::List(vec![])], "t").unwrap(), Value::Int(0));
    }

    #[test]
    fn sum_preserves_intness() {
        let reg = reg();
        assert_eq!(
            reg.call("sum", &[Value::List(vec![Value::Int(1), Value::Int(2)])], "t").unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            reg.call("sum", &[Value::List(vec![Value::Int(1), Value::Float(0.5)])], "t")
                .unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn sum_of_large_ints_is_exact() {
        // Past f64's 2^53 mantissa; must not round
        let big = 9_007_199_254_740_993_i64;
        let reg = reg();
        assert_eq!(
            reg.call("sum", &[Value::List(vec![Value::Int(big), Value::Int(0)])], "t")
                .unwrap(),
            Value::Int(big)
        );
    }

    #[test]
    fn min_max_pow_preserve_intness() {
        let reg = reg();
        assert_eq!(
            reg.call("min", &[Value::Int(2), Value::Int(5)], "t").unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            reg.call("max", &[Value::Int(2), Value::Float(5.0)], "t").unwrap(),
            Value::Float(5.0)
        );
        assert_eq!(
            reg.call("pow", &[Value::Int(2), Value::Int(10)], "t").unwrap(),
            Value::Int(1024)
        );
        // Negative exponents widen to float
        assert_eq!(
            reg.call("pow", &[Value::Int(2), Value::Int(-1)], "t").unwrap(),
            Value::Float(0.5)
        );
    }

    #[test]
    fn zip_and_enumerate() {
        let reg = reg();
        let a = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::List(vec![Value::from("x")]);
        assert_eq!(
            reg.call("zip", &[a.clone(), b], "t").unwrap(),
            Value::List(vec![Value::List(vec![Value::Int(1), Value::from("x")])])
        );
        assert_eq!(
            reg.call("enumerate", &[a], "t").unwrap(),
            Value::List(vec![
                Value::List(vec![Value::Int(0), Value::Int(1)]),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            ])
        );
    }

    #[test]
    fn date_builtins() {
        let reg = reg();
        assert_eq!(
            reg.call("year_of", &[Value::from("2026-08-25T10:00:00Z")], "t").unwrap(),
            Value::Int(2026)
        );
        assert_eq!(
            reg.call("date_add_days", &[Value::from("2026-02-27"), Value::Int(2)], "t")
                .unwrap(),
            Value::from("2026-03-01")
        );
    }

    #[test]
    fn builtin_errors_carry_path() {
        let reg = reg();
        let err = reg.call("upper", &[Value::Int(1)], "Order.name").unwrap_err();
        assert!(err.to_string().contains("Order.name"));
    }
}
