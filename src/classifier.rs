//! SQL action classifier
//!
//! Derives structural facts about a requested query for policy input and
//! execution safety. Deliberately regex-based and best-effort: it is a
//! lightweight structural classifier, not a SQL parser, and it must
//! tolerate arbitrary surrounding SQL without failing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DDL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(CREATE|ALTER|DROP|TRUNCATE|RENAME)\b").unwrap());

static DML_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|MERGE)\b").unwrap());

static TABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bFROM\s+([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)|\bJOIN\s+([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)",
    )
    .unwrap()
});

static SELECT_STAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+\*").unwrap());

static LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").unwrap());

static AGGREGATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX|GROUP\s+BY)\b").unwrap());

/// SELECT/DDL/DML classification of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Select,
    Ddl,
    Dml,
}

/// A `{schema, table}` pair referenced by a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

/// Structural facts about one requested action.
///
/// Derived deterministically from the raw request; never mutated after
/// creation. Tools that are not query-shaped carry [`ActionDescriptor::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub targets: Vec<TableRef>,
    pub action_kind: ActionKind,
    pub has_row_limit: bool,
    pub is_aggregate: bool,
    pub has_select_star: bool,
}

impl Default for ActionDescriptor {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            action_kind: ActionKind::Select,
            has_row_limit: false,
            is_aggregate: false,
            has_select_star: false,
        }
    }
}

/// Analyze a SQL query and extract governance metadata.
///
/// Pure and total: identical input always yields an identical descriptor,
/// and no input can make it fail.
pub fn analyze(query: &str) -> ActionDescriptor {
    let is_ddl = DDL_PATTERN.is_match(query);
    let is_dml = DML_PATTERN.is_match(query);

    // DDL takes precedence over DML when both keywords appear.
    let action_kind = if is_ddl {
        ActionKind::Ddl
    } else if is_dml {
        ActionKind::Dml
    } else {
        ActionKind::Select
    };

    let mut targets = Vec::new();
    for cap in TABLE_PATTERN.captures_iter(query) {
        let raw = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str());
        if let Some(raw) = raw {
            let table_ref = match raw.split_once('.') {
                Some((schema, table)) => TableRef {
                    schema: schema.to_string(),
                    table: table.to_string(),
                },
                // Bare identifier: assume the default schema.
                None => TableRef {
                    schema: "public".to_string(),
                    table: raw.to_string(),
                },
            };
            if !targets.contains(&table_ref) {
                targets.push(table_ref);
            }
        }
    }

    ActionDescriptor {
        targets,
        action_kind,
        has_row_limit: LIMIT_PATTERN.is_match(query),
        is_aggregate: AGGREGATE_PATTERN.is_match(query),
        has_select_star: SELECT_STAR_PATTERN.is_match(query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_analyze_select_simple() {
        let descriptor = analyze("SELECT * FROM reporting.daily_kpis");

        assert_eq!(descriptor.action_kind, ActionKind::Select);
        assert!(descriptor.has_select_star);
        assert!(!descriptor.has_row_limit);
        assert!(descriptor.targets.contains(&TableRef {
            schema: "reporting".to_string(),
            table: "daily_kpis".to_string(),
        }));
    }

    #[test]
    fn test_analyze_select_with_limit() {
        let descriptor = analyze("SELECT region, revenue FROM reporting.daily_kpis LIMIT 10");
        assert!(descriptor.has_row_limit);
    }

    #[test]
    fn test_analyze_ddl() {
        let descriptor = analyze("DROP TABLE reporting.daily_kpis");
        assert_eq!(descriptor.action_kind, ActionKind::Ddl);
    }

    #[test]
    fn test_analyze_dml() {
        let descriptor = analyze("DELETE FROM reporting.customers WHERE status = 'churned'");
        assert_eq!(descriptor.action_kind, ActionKind::Dml);
    }

    #[test]
    fn test_ddl_takes_precedence_over_dml() {
        let descriptor = analyze("ALTER TABLE t ADD COLUMN x int; UPDATE t SET x = 1");
        assert_eq!(descriptor.action_kind, ActionKind::Ddl);
    }

    #[test]
    fn test_bare_table_gets_public_schema() {
        let descriptor = analyze("SELECT id FROM orders JOIN customers ON true");

        assert_eq!(
            descriptor.targets,
            vec![
                TableRef {
                    schema: "public".to_string(),
                    table: "orders".to_string()
                },
                TableRef {
                    schema: "public".to_string(),
                    table: "customers".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_aggregate_detection() {
        assert!(analyze("SELECT COUNT(*) FROM orders").is_aggregate);
        assert!(analyze("SELECT region, SUM(revenue) FROM kpis GROUP BY region").is_aggregate);
        assert!(!analyze("SELECT id FROM orders").is_aggregate);
    }

    #[test]
    fn test_keyword_matching_is_whole_word() {
        // "created_at" must not trip the CREATE keyword.
        let descriptor = analyze("SELECT created_at FROM orders");
        assert_eq!(descriptor.action_kind, ActionKind::Select);
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let query = "SELECT * FROM sales.orders o JOIN sales.items i ON o.id = i.order_id LIMIT 5";
        assert_eq!(analyze(query), analyze(query));
    }

    #[test]
    fn test_garbage_input_does_not_panic() {
        let descriptor = analyze(")))FROM ;;; SELECT ??? ..");
        assert_eq!(descriptor.action_kind, ActionKind::Select);
    }
}
