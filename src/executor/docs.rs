//! Document search with role-based ACL filtering.

use crate::error::AppError;
use crate::models::DocResult;
use deadpool_postgres::Pool;
use serde_json::Value;

/// ACL tags a role may read. Unknown roles see public documents only.
pub fn acl_tags_for_role(role: &str) -> Vec<String> {
    let tags: &[&str] = match role {
        "data_analyst" | "admin" => &["public", "finance_only", "internal"],
        "marketing" => &["public", "marketing_only"],
        _ => &["public"],
    };
    tags.iter().map(|t| t.to_string()).collect()
}

/// Text search over document chunks, filtered by the role's ACL tags.
pub async fn search(
    pool: &Pool,
    role: &str,
    query: &str,
    top_k: i64,
) -> Result<Vec<DocResult>, AppError> {
    let acl_tags = acl_tags_for_role(role);
    let client = pool.get().await?;

    let rows = client
        .query(
            "SELECT
                d.doc_id::text AS doc_id,
                d.title,
                dc.content AS snippet,
                similarity(dc.content, $1) AS score,
                d.doc_type AS section,
                d.metadata
             FROM internal.doc_chunks dc
             JOIN internal.documents d ON dc.doc_id = d.doc_id
             WHERE dc.content ILIKE '%' || $1 || '%'
               AND d.acl_tags && $2::text[]
             ORDER BY similarity(dc.content, $1) DESC
             LIMIT $3",
            &[&query, &acl_tags, &top_k],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let snippet: String = row.get("snippet");
            let score: Option<f32> = row.get("score");
            let metadata: Option<Value> = row.get("metadata");
            DocResult {
                doc_id: row.get("doc_id"),
                title: row.get("title"),
                snippet: snippet.chars().take(500).collect(),
                score: score.map(f64::from).unwrap_or(0.5),
                section: row.get("section"),
                metadata: metadata.unwrap_or(Value::Null),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_privileged_roles_see_internal_docs() {
        for role in ["data_analyst", "admin"] {
            assert_eq!(
                acl_tags_for_role(role),
                vec!["public", "finance_only", "internal"]
            );
        }
    }

    #[test]
    fn test_marketing_sees_marketing_docs() {
        assert_eq!(acl_tags_for_role("marketing"), vec!["public", "marketing_only"]);
    }

    #[test]
    fn test_unknown_roles_see_public_only() {
        assert_eq!(acl_tags_for_role("intern"), vec!["public"]);
        assert_eq!(acl_tags_for_role(""), vec!["public"]);
    }
}
