//! Vega-Lite chart specification builder.
//!
//! Builds a Vega-Lite v5 spec from tabular data plus a content hash for
//! replay and caching. Rasterization lives outside this service.

use crate::models::ChartSpec;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use validator::Validate;

/// Request to generate a chart.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct ChartRequest {
    /// bar, line, point, or area.
    #[validate(length(min = 1, max = 32))]
    pub chart_type: String,
    pub data: Vec<Value>,
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[validate(length(min = 1, max = 128))]
    pub x_field: String,
    #[validate(length(min = 1, max = 128))]
    pub y_field: String,
    pub color_field: Option<String>,
}

/// Build the Vega-Lite spec and data hash for a chart request.
pub fn build_spec(request: &ChartRequest) -> ChartSpec {
    let x_type = infer_x_type(&request.data, &request.x_field);

    let mut encoding = json!({
        "x": {
            "field": request.x_field,
            "type": x_type,
            "axis": {"labelAngle": -45}
        },
        "y": {
            "field": request.y_field,
            "type": "quantitative",
            "axis": {"format": "~s"}
        }
    });

    if let Some(color_field) = &request.color_field {
        encoding["color"] = json!({"field": color_field, "type": "nominal"});
    }

    let spec = json!({
        "$schema": "https://vega.github.io/schema/vega-lite/v5.json",
        "title": {
            "text": request.title,
            "fontSize": 16,
            "fontWeight": "bold"
        },
        "width": 600,
        "height": 400,
        "data": {"values": request.data},
        "mark": {
            "type": request.chart_type,
            "tooltip": true
        },
        "encoding": encoding,
        "config": {
            "background": "#ffffff",
            "view": {"stroke": "transparent"}
        }
    });

    ChartSpec {
        chart_type: request.chart_type.clone(),
        title: request.title.clone(),
        vega_lite_spec: spec,
        data_hash: data_hash(&request.data),
    }
}

/// Temporal for date-looking string values, nominal otherwise.
fn infer_x_type(data: &[Value], x_field: &str) -> &'static str {
    if let Some(Value::String(sample)) = data.first().and_then(|row| row.get(x_field)) {
        if sample.contains('-') || sample.contains('/') {
            return "temporal";
        }
    }
    "nominal"
}

/// Stable content hash of the chart data: first 16 hex chars of the
/// sha256 of the key-sorted serialization.
fn data_hash(data: &[Value]) -> String {
    let canonical = canonicalize(&Value::Array(data.to_vec()));
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// Recursively sort object keys so the hash is independent of key order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request(data: Vec<Value>) -> ChartRequest {
        ChartRequest {
            chart_type: "bar".to_string(),
            data,
            title: "Revenue by region".to_string(),
            x_field: "region".to_string(),
            y_field: "revenue".to_string(),
            color_field: None,
        }
    }

    #[test]
    fn test_build_spec_basic_shape() {
        let spec = build_spec(&request(vec![json!({"region": "emea", "revenue": 100})]));

        assert_eq!(spec.chart_type, "bar");
        assert_eq!(spec.vega_lite_spec["mark"]["type"], "bar");
        assert_eq!(spec.vega_lite_spec["encoding"]["x"]["field"], "region");
        assert_eq!(spec.vega_lite_spec["encoding"]["x"]["type"], "nominal");
        assert!(spec.vega_lite_spec["encoding"].get("color").is_none());
        assert_eq!(spec.data_hash.len(), 16);
    }

    #[test]
    fn test_temporal_axis_inference() {
        let mut req = request(vec![json!({"region": "2024-01-01", "revenue": 1})]);
        req.x_field = "region".to_string();
        let spec = build_spec(&req);
        assert_eq!(spec.vega_lite_spec["encoding"]["x"]["type"], "temporal");
    }

    #[test]
    fn test_color_field_encoding() {
        let mut req = request(vec![json!({"region": "emea", "revenue": 1})]);
        req.color_field = Some("region".to_string());
        let spec = build_spec(&req);
        assert_eq!(
            spec.vega_lite_spec["encoding"]["color"],
            json!({"field": "region", "type": "nominal"})
        );
    }

    #[test]
    fn test_data_hash_ignores_key_order() {
        let a = build_spec(&request(vec![json!({"region": "emea", "revenue": 1})]));
        let b = build_spec(&request(vec![json!({"revenue": 1, "region": "emea"})]));
        assert_eq!(a.data_hash, b.data_hash);
    }

    #[test]
    fn test_data_hash_changes_with_data() {
        let a = build_spec(&request(vec![json!({"revenue": 1})]));
        let b = build_spec(&request(vec![json!({"revenue": 2})]));
        assert_ne!(a.data_hash, b.data_hash);
    }
}
