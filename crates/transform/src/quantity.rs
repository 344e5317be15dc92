//! Numeric resource quantities.
//!
//! YAML reads `cpu: 1` or `storage: 10` as numbers, while `Quantity` only
//! decodes from a string. The API server takes both, so a failed decode is
//! retried after numbers at quantity positions are rewritten as their text.

use kform_core::Json;

/// Keys whose value is a map of quantities (or, for `capacity`, a single one).
const QUANTITY_MAPS: &[&str] = &["limits", "requests", "capacity", "allocatable", "hard", "used", "overhead"];

/// Quantity maps on a LimitRange item (`spec.limits[]`).
const LIMIT_RANGE_MAPS: &[&str] = &["max", "min", "default", "defaultRequest", "maxLimitRequestRatio"];

/// Keys holding exactly one quantity wherever they appear.
const QUANTITY_FIELDS: &[&str] = &["sizeLimit", "averageValue", "maximumVolumeSize"];

/// Rewrite numeric quantities as strings. Returns whether anything changed.
pub(crate) fn stringify_numbers(value: &mut Json) -> bool {
    let mut changed = false;
    walk(value, &mut changed);
    changed
}

fn walk(value: &mut Json, changed: &mut bool) {
    match value {
        Json::Object(map) => {
            for (key, child) in map.iter_mut() {
                let key = key.as_str();
                if QUANTITY_MAPS.contains(&key) {
                    quantities_in(child, changed);
                    if key == "limits" {
                        limit_range_items(child, changed);
                    }
                } else if QUANTITY_FIELDS.contains(&key) {
                    to_text(child, changed);
                } else if key == "target" || key == "current" {
                    // HPA MetricTarget / MetricValueStatus
                    if let Json::Object(metric) = child {
                        if let Some(v) = metric.get_mut("value") {
                            to_text(v, changed);
                        }
                    }
                }
                walk(child, changed);
            }
        }
        Json::Array(items) => {
            for item in items.iter_mut() {
                walk(item, changed);
            }
        }
        _ => {}
    }
}

fn quantities_in(value: &mut Json, changed: &mut bool) {
    match value {
        Json::Object(map) => {
            for v in map.values_mut() {
                to_text(v, changed);
            }
        }
        other => to_text(other, changed),
    }
}

fn limit_range_items(value: &mut Json, changed: &mut bool) {
    let Json::Array(items) = value else { return };
    for item in items.iter_mut() {
        let Json::Object(fields) = item else { continue };
        for key in LIMIT_RANGE_MAPS {
            if let Some(map) = fields.get_mut(*key) {
                quantities_in(map, changed);
            }
        }
    }
}

fn to_text(value: &mut Json, changed: &mut bool) {
    if let Json::Number(n) = value {
        let text = n.to_string();
        *value = Json::String(text);
        *changed = true;
    }
}
