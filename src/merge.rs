//! Deep merge algorithm for merge datasources.
//!
//! A `merge:` datasource lists its sub-sources in priority order: earlier
//! entries win over later ones on scalar conflicts, while nested maps are
//! merged key-wise rather than replaced wholesale.
//!
//! # Merge Rules
//!
//! - Maps are merged recursively
//! - Arrays and scalars from the higher-priority side replace the other
//! - A map colliding with a non-map resolves to the higher-priority side

use serde_json::{Map, Value};

/// Deep merge two values. The overlay wins at the point of conflict;
/// maps on both sides merge recursively.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut result = base_map.clone();

            for (key, overlay_value) in overlay_map {
                if let Some(base_value) = base_map.get(key) {
                    result.insert(key.clone(), deep_merge(base_value, overlay_value));
                } else {
                    result.insert(key.clone(), overlay_value.clone());
                }
            }

            Value::Object(result)
        }

        (_, overlay) => overlay.clone(),
    }
}

/// Merge maps in priority order: the first map's values win over later
/// ones on key collision, nested maps merge recursively.
pub fn merge_maps(maps: &[Map<String, Value>]) -> Map<String, Value> {
    let mut result = Value::Object(Map::new());

    // fold right-to-left so earlier (higher-priority) maps overlay later ones
    for map in maps.iter().rev() {
        result = deep_merge(&result, &Value::Object(map.clone()));
    }

    match result {
        Value::Object(m) => m,
        _ => unreachable!("merging objects yields an object"),
    }
}
