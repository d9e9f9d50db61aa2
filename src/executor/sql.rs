//! Governed SQL execution against the warehouse
//!
//! Runs the limit-injected query under the acting role's restricted
//! session context and converts rows into JSON for masking and auditing.

use crate::classifier::ActionDescriptor;
use crate::error::AppError;
use crate::models::RequestContext;
use deadpool_postgres::Pool;
use serde_json::{Map, Number, Value};
use tokio_postgres::types::Type;
use tokio_postgres::Row;

/// Inject a row limit unless the query already has an explicit LIMIT or is
/// an aggregate (aggregates are treated as implicitly bounded).
pub fn inject_limit(query: &str, descriptor: &ActionDescriptor, max_rows: i64) -> String {
    if descriptor.has_row_limit || descriptor.is_aggregate {
        return query.to_string();
    }
    format!(
        "{} LIMIT {}",
        query.trim_end().trim_end_matches(';'),
        max_rows
    )
}

/// Replace the values of the masked columns with the mask token, applied
/// uniformly to every returned row. Distinct from PII redaction: this is a
/// policy-constraint transform on the caller-visible data only.
pub fn mask_rows(rows: &mut [Value], masked_columns: &[String]) {
    if masked_columns.is_empty() {
        return;
    }
    for row in rows.iter_mut() {
        if let Value::Object(map) = row {
            for column in masked_columns {
                if let Some(cell) = map.get_mut(column) {
                    *cell = Value::String("[MASKED]".to_string());
                }
            }
        }
    }
}

/// Execute a query with the role/region session context applied, returning
/// rows as JSON objects plus the column names.
pub async fn execute(
    pool: &Pool,
    ctx: &RequestContext,
    query: &str,
) -> Result<(Vec<Value>, Vec<String>), AppError> {
    let client = pool.get().await?;

    // Restricted execution context for row-level security policies.
    client
        .execute(
            "SELECT internal.set_user_context($1, $2)",
            &[&ctx.role, &ctx.region],
        )
        .await?;

    let rows = client.query(query, &[]).await?;

    let columns: Vec<String> = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let data = rows.iter().map(row_to_json).collect();
    Ok((data, columns))
}

/// Convert one row into a JSON object, best-effort per column type.
/// Types without a JSON mapping become null rather than failing the call.
fn row_to_json(row: &Row) -> Value {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), cell_to_json(row, idx));
    }
    Value::Object(map)
}

fn cell_to_json(row: &Row, idx: usize) -> Value {
    let ty = row.columns()[idx].type_();

    if *ty == Type::BOOL {
        opt(row.try_get::<_, Option<bool>>(idx), Value::Bool)
    } else if *ty == Type::INT2 {
        opt(row.try_get::<_, Option<i16>>(idx), |v| {
            Value::Number(Number::from(v))
        })
    } else if *ty == Type::INT4 {
        opt(row.try_get::<_, Option<i32>>(idx), |v| {
            Value::Number(Number::from(v))
        })
    } else if *ty == Type::INT8 {
        opt(row.try_get::<_, Option<i64>>(idx), |v| {
            Value::Number(Number::from(v))
        })
    } else if *ty == Type::FLOAT4 {
        opt(row.try_get::<_, Option<f32>>(idx), |v| float(v as f64))
    } else if *ty == Type::FLOAT8 {
        opt(row.try_get::<_, Option<f64>>(idx), float)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        opt(row.try_get::<_, Option<Value>>(idx), |v| v)
    } else if *ty == Type::UUID {
        opt(row.try_get::<_, Option<uuid::Uuid>>(idx), |v| {
            Value::String(v.to_string())
        })
    } else if *ty == Type::TIMESTAMPTZ {
        opt(
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx),
            |v| Value::String(v.to_rfc3339()),
        )
    } else if *ty == Type::TIMESTAMP {
        opt(row.try_get::<_, Option<chrono::NaiveDateTime>>(idx), |v| {
            Value::String(v.to_string())
        })
    } else if *ty == Type::DATE {
        opt(row.try_get::<_, Option<chrono::NaiveDate>>(idx), |v| {
            Value::String(v.to_string())
        })
    } else {
        // Text-like types, or anything else that decodes as text.
        match row.try_get::<_, Option<String>>(idx) {
            Ok(Some(v)) => Value::String(v),
            _ => Value::Null,
        }
    }
}

fn opt<T>(cell: Result<Option<T>, tokio_postgres::Error>, f: impl FnOnce(T) -> Value) -> Value {
    match cell {
        Ok(Some(v)) => f(v),
        _ => Value::Null,
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_inject_limit_plain_select() {
        let query = "SELECT id FROM orders";
        let descriptor = classifier::analyze(query);
        assert_eq!(
            inject_limit(query, &descriptor, 100),
            "SELECT id FROM orders LIMIT 100"
        );
    }

    #[test]
    fn test_inject_limit_strips_trailing_semicolon() {
        let query = "SELECT id FROM orders ;";
        let descriptor = classifier::analyze(query);
        assert_eq!(
            inject_limit(query, &descriptor, 50),
            "SELECT id FROM orders LIMIT 50"
        );
    }

    #[test]
    fn test_inject_limit_skips_explicit_limit() {
        let query = "SELECT id FROM orders LIMIT 5";
        let descriptor = classifier::analyze(query);
        assert_eq!(inject_limit(query, &descriptor, 100), query);
    }

    #[test]
    fn test_inject_limit_skips_aggregates() {
        let query = "SELECT COUNT(*) FROM orders";
        let descriptor = classifier::analyze(query);
        assert_eq!(inject_limit(query, &descriptor, 100), query);
    }

    #[test]
    fn test_mask_rows_masks_every_row() {
        let mut rows = vec![
            json!({"email": "a@b.com", "region": "emea"}),
            json!({"email": "c@d.com", "region": "apac"}),
            json!({"email": "e@f.com", "region": "amer"}),
        ];

        mask_rows(&mut rows, &["email".to_string()]);

        for row in &rows {
            assert_eq!(row["email"], "[MASKED]");
        }
        assert_eq!(rows[0]["region"], "emea");
        assert_eq!(rows[2]["region"], "amer");
    }

    #[test]
    fn test_mask_rows_ignores_missing_columns() {
        let mut rows = vec![json!({"region": "emea"})];
        mask_rows(&mut rows, &["email".to_string()]);
        assert_eq!(rows, vec![json!({"region": "emea"})]);
    }

    #[test]
    fn test_mask_rows_no_constraints_is_noop() {
        let mut rows = vec![json!({"email": "a@b.com"})];
        mask_rows(&mut rows, &[]);
        assert_eq!(rows[0]["email"], "a@b.com");
    }
}
