//! Metric registry lookup.

use crate::error::AppError;
use crate::models::MetricDefinition;
use deadpool_postgres::Pool;

/// Look up a metric by exact name or display-name substring.
pub async fn lookup(pool: &Pool, metric_name: &str) -> Result<Option<MetricDefinition>, AppError> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            "SELECT name, display_name, description, owner, formula,
                    sql_template, dimensions, tags
             FROM internal.metrics
             WHERE LOWER(name) = LOWER($1)
                OR LOWER(display_name) ILIKE '%' || LOWER($1) || '%'
             LIMIT 1",
            &[&metric_name],
        )
        .await?;

    Ok(row.map(|row| {
        let dimensions: Option<Vec<String>> = row.get("dimensions");
        let tags: Option<Vec<String>> = row.get("tags");
        MetricDefinition {
            name: row.get("name"),
            display_name: row.get("display_name"),
            description: row.get("description"),
            owner: row.get("owner"),
            formula: row.get("formula"),
            sql_template: row.get("sql_template"),
            dimensions: dimensions.unwrap_or_default(),
            tags: tags.unwrap_or_default(),
        }
    }))
}
