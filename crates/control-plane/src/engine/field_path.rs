//! Dot-path navigation over analyzer reports.
//!
//! Paths look like `pe_info.sections[0].entropy`. A leading `report.` is
//! accepted (schema paths carry it) and dropped unless the report really has
//! a top-level `report` key. Some analyzers use dotted key names such as
//! `IOC.json`; when the split path does not resolve, adjacent segments are
//! joined and tried as one key.

use serde_json::Value;

#[derive(Debug, PartialEq)]
struct Segment<'a> {
    key: String,
    indices: Vec<&'a str>,
}

fn split_segment(raw: &str) -> Segment<'_> {
    match raw.find('[') {
        Some(open) => {
            let indices = raw[open..]
                .split('[')
                .filter_map(|part| part.strip_suffix(']'))
                .collect();
            Segment {
                key: raw[..open].to_string(),
                indices,
            }
        }
        None => Segment {
            key: raw.to_string(),
            indices: Vec::new(),
        },
    }
}

fn step<'v>(current: &'v Value, segment: &Segment<'_>) -> Option<&'v Value> {
    let mut value = if segment.key.is_empty() {
        current
    } else {
        current.as_object()?.get(&segment.key)?
    };
    for index in &segment.indices {
        let i: usize = index.trim().parse().ok()?;
        value = value.as_array()?.get(i)?;
    }
    Some(value)
}

fn resolve<'v>(current: &'v Value, parts: &[&str]) -> Option<&'v Value> {
    if parts.is_empty() {
        return Some(current);
    }
    for take in 1..=parts.len() {
        let joined = parts[..take].join(".");
        let segment = split_segment(&joined);
        if let Some(next) = step(current, &segment) {
            if let Some(found) = resolve(next, &parts[take..]) {
                return Some(found);
            }
        }
    }
    None
}

/// Resolve `path` inside `data`. Empty paths return `data` itself.
pub fn navigate<'v>(data: &'v Value, path: &str) -> Option<&'v Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(data);
    }
    let path = match path.strip_prefix("report.") {
        Some(rest) if data.get("report").is_none() => rest,
        _ => path,
    };
    let parts: Vec<&str> = path.split('.').collect();
    resolve(data, &parts).filter(|v| !v.is_null())
}

/// Strip the schema's `report.` prefix.
pub fn relative(path: &str) -> &str {
    path.strip_prefix("report.").unwrap_or(path)
}

/// String form used for substring checks (no quotes around strings).
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric view of a value; numeric strings count.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Equality with numeric normalisation (`1 == 1.0`).
pub fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

/// `value` contains `expected`: substring for strings, membership or
/// item substring for arrays, key presence for objects.
pub fn contains(value: &Value, expected: &Value) -> bool {
    let needle = as_text(expected);
    match value {
        Value::String(s) => s.contains(&needle),
        Value::Array(items) => items
            .iter()
            .any(|item| loosely_equal(item, expected) || as_text(item).contains(&needle)),
        Value::Object(map) => map.contains_key(&needle),
        _ => false,
    }
}

/// Non-empty in the report sense: populated collections and strings,
/// `true`, non-zero numbers.
pub fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_navigate_nested_with_index() {
        let report = json!({"pe_info": {"sections": [{"entropy": 6.1}, {"entropy": 7.4}]}});
        assert_eq!(
            navigate(&report, "pe_info.sections[1].entropy"),
            Some(&json!(7.4))
        );
        assert_eq!(
            navigate(&report, "report.pe_info.sections[0].entropy"),
            Some(&json!(6.1))
        );
        assert_eq!(navigate(&report, "pe_info.sections[5].entropy"), None);
        assert_eq!(navigate(&report, "pe_info.sections[x]"), None);
    }

    #[test]
    fn test_navigate_dotted_key() {
        let report = json!({"IOC.json": ["evil.example"], "rtfobj": {"ole_objects": [1]}});
        assert_eq!(navigate(&report, "IOC.json"), Some(&json!(["evil.example"])));
        assert_eq!(navigate(&report, "rtfobj.ole_objects"), Some(&json!([1])));
    }

    #[test]
    fn test_report_prefix_kept_when_report_key_exists() {
        let data = json!({"report": {"x": 1}});
        assert_eq!(navigate(&data, "report.x"), Some(&json!(1)));
    }

    #[test]
    fn test_null_is_missing() {
        let report = json!({"verdict": null});
        assert_eq!(navigate(&report, "verdict"), None);
    }

    #[test]
    fn test_contains() {
        assert!(contains(&json!("Eicar-Signature FOUND"), &json!("Eicar")));
        assert!(contains(
            &json!(["android.permission.READ_SMS"]),
            &json!("READ_SMS")
        ));
        assert!(contains(&json!([1, 2, 3]), &json!(2)));
        assert!(!contains(&json!(42), &json!("4")));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(as_number(&json!("7.5")), Some(7.5));
        assert_eq!(as_number(&json!(true)), None);
        assert!(loosely_equal(&json!(1), &json!(1.0)));
        assert!(!loosely_equal(&json!("1"), &json!(1)));
    }
}
