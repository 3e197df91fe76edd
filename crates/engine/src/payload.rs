//! Payload field extraction and mapping shared by webhook and event
//! triggers: dot-separated paths into a JSON payload, mapped onto
//! schedule input names.

use std::collections::HashMap;

/// Resolve a dot-separated path (e.g. "bot.name") into a payload.
pub fn lookup_path<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Map payload fields onto schedule input names. Missing payload fields
/// are silently skipped; an empty mapping produces no inputs.
pub fn map_fields(
    payload: &serde_json::Value,
    mapping: &HashMap<String, String>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut inputs = serde_json::Map::new();
    for (payload_path, input_name) in mapping {
        if let Some(value) = lookup_path(payload, payload_path) {
            inputs.insert(input_name.clone(), value.clone());
        }
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_path_lookup() {
        let payload = json!({"bot": {"name": "invoicer", "tags": [1, 2]}});
        assert_eq!(lookup_path(&payload, "bot.name"), Some(&json!("invoicer")));
        assert_eq!(lookup_path(&payload, "bot.missing"), None);
        assert_eq!(lookup_path(&payload, "nope"), None);
    }

    #[test]
    fn mapping_skips_missing_fields() {
        let payload = json!({"order": {"id": 42}});
        let mapping = HashMap::from([
            ("order.id".to_string(), "order_id".to_string()),
            ("order.total".to_string(), "total".to_string()),
        ]);
        let inputs = map_fields(&payload, &mapping);
        assert_eq!(inputs.get("order_id"), Some(&json!(42)));
        assert!(!inputs.contains_key("total"));
    }
}
