//! Renders tier rules into the analytic engine's SQL dialect.
//!
//! The pipeline itself runs rules through the in-process interpreter; this
//! renderer produces the `CREATE TABLE … AS SELECT` statement an external
//! DuckDB-style engine would execute for the same rule, and is what a
//! SQL-backed [`TableStore`](crate::store::TableStore) implementation
//! submits over its connection.

use super::{DerivedField, Expr, Predicate, TierRule};

/// Renders `CREATE TABLE {target} AS SELECT … FROM {source} [WHERE …]`.
///
/// Derived fields that shadow a source column are emitted through a
/// `SELECT * REPLACE (…)` clause; genuinely new columns are appended to
/// the select list. `source_columns` tells the renderer which is which.
pub fn render_create_table(
    rule: &TierRule,
    source: &str,
    target: &str,
    source_columns: &[String],
) -> String {
    let (replaced, appended): (Vec<&DerivedField>, Vec<&DerivedField>) = rule
        .derived
        .iter()
        .partition(|f| source_columns.iter().any(|c| c == &f.name));

    let mut select = String::from("*");
    if !replaced.is_empty() {
        let clauses: Vec<String> = replaced
            .iter()
            .map(|f| format!("{} AS {}", render_expr(&f.expr), f.name))
            .collect();
        select = format!("* REPLACE ({})", clauses.join(", "));
    }
    for field in appended {
        select.push_str(&format!(", {} AS {}", render_expr(&field.expr), field.name));
    }

    let mut sql = format!("CREATE TABLE {} AS SELECT {} FROM {}", target, select, source);
    if let Some(pred) = &rule.source_filter {
        sql.push_str(&format!(" WHERE {}", render_predicate(pred)));
    }
    sql
}

pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        Expr::Number(v) => format_number(*v),
        Expr::Text(v) => format!("'{}'", v.replace('\'', "''")),
        Expr::Null => "NULL".to_string(),
        Expr::Add(a, b) => format!("({} + {})", render_expr(a), render_expr(b)),
        Expr::Sub(a, b) => format!("({} - {})", render_expr(a), render_expr(b)),
        Expr::Mul(a, b) => format!("({} * {})", render_expr(a), render_expr(b)),
        Expr::Div(a, b) => {
            // NULLIF keeps divide-by-zero null instead of erroring.
            format!("({} / NULLIF({}, 0))", render_expr(a), render_expr(b))
        }
        Expr::Coalesce(exprs) => {
            let parts: Vec<String> = exprs.iter().map(render_expr).collect();
            format!("COALESCE({})", parts.join(", "))
        }
        Expr::Clamp { expr, min, max } => format!(
            "LEAST(GREATEST({}, {}), {})",
            render_expr(expr),
            format_number(*min),
            format_number(*max)
        ),
        Expr::Round { expr, digits } => format!("ROUND({}, {})", render_expr(expr), digits),
        Expr::Case { arms, default } => {
            let mut out = String::from("CASE");
            for (pred, result) in arms {
                out.push_str(&format!(
                    " WHEN {} THEN {}",
                    render_predicate(pred),
                    render_expr(result)
                ));
            }
            out.push_str(&format!(" ELSE {} END", render_expr(default)));
            out
        }
        Expr::HaversineKm {
            lat,
            lon,
            ref_lat,
            ref_lon,
        } => {
            let lat = render_expr(lat);
            let lon = render_expr(lon);
            format!(
                "(2 * 6371 * ASIN(SQRT(POW(SIN(RADIANS(({lat} - {ref_lat})) / 2), 2) \
                 + COS(RADIANS({ref_lat})) * COS(RADIANS({lat})) \
                 * POW(SIN(RADIANS(({lon} - {ref_lon})) / 2), 2))))"
            )
        }
        Expr::Lower(e) => format!("LOWER({})", render_expr(e)),
        Expr::Trim(e) => format!("TRIM({})", render_expr(e)),
    }
}

pub fn render_predicate(pred: &Predicate) -> String {
    match pred {
        Predicate::Gt(a, b) => format!("{} > {}", render_expr(a), render_expr(b)),
        Predicate::Ge(a, b) => format!("{} >= {}", render_expr(a), render_expr(b)),
        Predicate::Lt(a, b) => format!("{} < {}", render_expr(a), render_expr(b)),
        Predicate::Le(a, b) => format!("{} <= {}", render_expr(a), render_expr(b)),
        Predicate::Eq(a, b) => format!("{} = {}", render_expr(a), render_expr(b)),
        Predicate::Between { expr, low, high } => format!(
            "{} BETWEEN {} AND {}",
            render_expr(expr),
            format_number(*low),
            format_number(*high)
        ),
        Predicate::IsNotNull(e) => format!("{} IS NOT NULL", render_expr(e)),
        Predicate::And(preds) => join_logical(preds, " AND "),
        Predicate::Or(preds) => join_logical(preds, " OR "),
        Predicate::Not(p) => format!("NOT ({})", render_predicate(p)),
    }
}

fn join_logical(preds: &[Predicate], sep: &str) -> String {
    let parts: Vec<String> = preds
        .iter()
        .map(|p| format!("({})", render_predicate(p)))
        .collect();
    parts.join(sep)
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DerivedField, TierRule};

    #[test]
    fn test_render_clamp_and_division() {
        let expr = Expr::col("listing_price")
            .div(Expr::col("square_feet"))
            .clamp(0.0, 100.0);
        assert_eq!(
            render_expr(&expr),
            "LEAST(GREATEST((listing_price / NULLIF(square_feet, 0)), 0), 100)"
        );
    }

    #[test]
    fn test_render_case() {
        let expr = Expr::Case {
            arms: vec![(
                Predicate::Lt(Expr::col("square_feet"), Expr::num(1000.0)),
                Expr::text("compact"),
            )],
            default: Box::new(Expr::text("large")),
        };
        assert_eq!(
            render_expr(&expr),
            "CASE WHEN square_feet < 1000 THEN 'compact' ELSE 'large' END"
        );
    }

    #[test]
    fn test_render_create_table_with_replace_and_filter() {
        let rule = TierRule {
            name: "silver_property".into(),
            source_filter: Some(Predicate::Gt(Expr::col("listing_price"), Expr::num(0.0))),
            derived: vec![
                DerivedField::new("city", Expr::col("city").trim()),
                DerivedField::new(
                    "price_per_sqft",
                    Expr::col("listing_price").div(Expr::col("square_feet")),
                ),
            ],
        };
        let source_columns = vec!["id".to_string(), "city".to_string(), "listing_price".to_string()];
        let sql = render_create_table(&rule, "property_bronze_1", "property_silver_2", &source_columns);
        assert!(sql.starts_with("CREATE TABLE property_silver_2 AS SELECT * REPLACE (TRIM(city) AS city)"));
        assert!(sql.contains("(listing_price / NULLIF(square_feet, 0)) AS price_per_sqft"));
        assert!(sql.ends_with("FROM property_bronze_1 WHERE listing_price > 0"));
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(render_expr(&Expr::text("o'brien")), "'o''brien'");
    }
}
