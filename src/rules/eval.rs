//! In-process interpreter for rule expressions.
//!
//! The in-memory table store applies [`TierRule`]s by evaluating the same
//! expression tree the SQL renderer would hand to an external engine, so
//! both paths share one definition of each tier's semantics.

use serde_json::{Number, Value};

use super::{Expr, Predicate, TierRule};
use crate::domain::Row;

/// Evaluates an expression against a row. Missing columns and failed
/// numeric coercions evaluate to null, never an error.
pub fn eval_expr(expr: &Expr, row: &Row) -> Value {
    match expr {
        Expr::Column(name) => row.get(name).cloned().unwrap_or(Value::Null),
        Expr::Number(v) => number(*v),
        Expr::Text(v) => Value::String(v.clone()),
        Expr::Null => Value::Null,
        Expr::Add(a, b) => binary(a, b, row, |x, y| Some(x + y)),
        Expr::Sub(a, b) => binary(a, b, row, |x, y| Some(x - y)),
        Expr::Mul(a, b) => binary(a, b, row, |x, y| Some(x * y)),
        Expr::Div(a, b) => binary(a, b, row, |x, y| if y == 0.0 { None } else { Some(x / y) }),
        Expr::Coalesce(exprs) => exprs
            .iter()
            .map(|e| eval_expr(e, row))
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        Expr::Clamp { expr, min, max } => match as_f64(&eval_expr(expr, row)) {
            Some(v) => number(v.clamp(*min, *max)),
            None => Value::Null,
        },
        Expr::Round { expr, digits } => match as_f64(&eval_expr(expr, row)) {
            Some(v) => {
                let factor = 10f64.powi(*digits);
                number((v * factor).round() / factor)
            }
            None => Value::Null,
        },
        Expr::Case { arms, default } => {
            for (pred, result) in arms {
                if eval_predicate(pred, row) {
                    return eval_expr(result, row);
                }
            }
            eval_expr(default, row)
        }
        Expr::HaversineKm {
            lat,
            lon,
            ref_lat,
            ref_lon,
        } => {
            let lat = as_f64(&eval_expr(lat, row));
            let lon = as_f64(&eval_expr(lon, row));
            match (lat, lon) {
                (Some(lat), Some(lon)) => number(haversine_km(lat, lon, *ref_lat, *ref_lon)),
                _ => Value::Null,
            }
        }
        Expr::Lower(e) => match eval_expr(e, row) {
            Value::String(s) => Value::String(s.to_lowercase()),
            _ => Value::Null,
        },
        Expr::Trim(e) => match eval_expr(e, row) {
            Value::String(s) => Value::String(s.trim().to_string()),
            _ => Value::Null,
        },
    }
}

/// Evaluates a predicate against a row. Comparisons involving null are
/// false, matching SQL three-valued logic collapsed at the filter.
pub fn eval_predicate(pred: &Predicate, row: &Row) -> bool {
    match pred {
        Predicate::Gt(a, b) => compare(a, b, row, |o| o == std::cmp::Ordering::Greater),
        Predicate::Ge(a, b) => compare(a, b, row, |o| o != std::cmp::Ordering::Less),
        Predicate::Lt(a, b) => compare(a, b, row, |o| o == std::cmp::Ordering::Less),
        Predicate::Le(a, b) => compare(a, b, row, |o| o != std::cmp::Ordering::Greater),
        Predicate::Eq(a, b) => {
            let (va, vb) = (eval_expr(a, row), eval_expr(b, row));
            !va.is_null() && va == vb
        }
        Predicate::Between { expr, low, high } => match as_f64(&eval_expr(expr, row)) {
            Some(v) => v >= *low && v <= *high,
            None => false,
        },
        Predicate::IsNotNull(e) => !eval_expr(e, row).is_null(),
        Predicate::And(preds) => preds.iter().all(|p| eval_predicate(p, row)),
        Predicate::Or(preds) => preds.iter().any(|p| eval_predicate(p, row)),
        Predicate::Not(p) => !eval_predicate(p, row),
    }
}

/// Applies a rule to a batch of rows: filter on the source predicate,
/// then extend each surviving row with the derived fields in order.
/// Derived fields see the fields derived before them.
pub fn apply_rule(rule: &TierRule, rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .filter(|row| match &rule.source_filter {
            Some(pred) => eval_predicate(pred, row),
            None => true,
        })
        .map(|row| {
            let mut out = row.clone();
            for field in &rule.derived {
                let value = eval_expr(&field.expr, &out);
                out.insert(field.name.clone(), value);
            }
            out
        })
        .collect()
}

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

fn binary(a: &Expr, b: &Expr, row: &Row, op: impl Fn(f64, f64) -> Option<f64>) -> Value {
    match (as_f64(&eval_expr(a, row)), as_f64(&eval_expr(b, row))) {
        (Some(x), Some(y)) => op(x, y).map(number).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn compare(a: &Expr, b: &Expr, row: &Row, check: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    match (as_f64(&eval_expr(a, row)), as_f64(&eval_expr(b, row))) {
        (Some(x), Some(y)) => x.partial_cmp(&y).map(&check).unwrap_or(false),
        _ => false,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn number(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}
