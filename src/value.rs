use serde_json::Value;

/// Identifiers that are never resolvable, no matter where they appear in a
/// path. Rust has no prototype chain to pollute, but the grammar stays
/// reject-by-default so hostile templates are refused rather than silently
/// resolved to nothing different.
pub(crate) const UNSAFE_IDENTIFIERS: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "eval",
    "window",
    "document",
    "globalThis",
    "Function",
];

/// One step of a parsed access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathSegment {
    Field(String),
    Index(usize),
}

/// Parse a dotted access path with literal numeric brackets, e.g.
/// `user.profile.address[0].city`.
///
/// Only identifier segments (`\w+`) and literal numeric indices are part of
/// the grammar; computed keys, quoted keys, and unsafe identifiers are
/// rejected by construction.
pub(crate) fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    if path.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (ident, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if ident.is_empty()
            || !ident
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return None;
        }
        if UNSAFE_IDENTIFIERS.contains(&ident) {
            return None;
        }
        segments.push(PathSegment::Field(ident.to_string()));
        while !rest.is_empty() {
            if !rest.starts_with('[') {
                return None;
            }
            let close = rest.find(']')?;
            let digits = &rest[1..close];
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            segments.push(PathSegment::Index(digits.parse().ok()?));
            rest = &rest[close + 1..];
        }
    }
    Some(segments)
}

/// Safe nested lookup: walks `path` into `root`, short-circuiting to `None`
/// on any missing or non-traversable step. Never panics.
pub fn get_nested_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path)?;
    let mut current = root;
    for segment in &segments {
        current = match segment {
            PathSegment::Field(name) => current.as_object()?.get(name)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

/// Render a value the way the substitution layer prints it.
///
/// Arrays join their elements with commas (null elements print empty) and
/// objects print as `[object Object]`; existing dashboards pin these exact
/// strings.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(array_element)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn array_element(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => display_value(other),
    }
}

/// A value counts as present when it is neither null nor an empty string;
/// `0` and `false` are present and used as-is.
pub(crate) fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "user": {
                "profile": {
                    "address": { "city": "NYC", "country": "USA" },
                    "preferences": ["dark", "compact"]
                },
                "name": "John"
            },
            "items": [
                { "id": 1, "name": "Item 1" },
                { "id": 2, "name": "Item 2" }
            ]
        })
    }

    #[test]
    fn test_nested_object_access() {
        let data = sample();
        assert_eq!(get_nested_value(&data, "user.name"), Some(&json!("John")));
        assert_eq!(
            get_nested_value(&data, "user.profile.address.city"),
            Some(&json!("NYC"))
        );
    }

    #[test]
    fn test_array_access() {
        let data = sample();
        assert_eq!(
            get_nested_value(&data, "items[0].name"),
            Some(&json!("Item 1"))
        );
        assert_eq!(get_nested_value(&data, "items[1].id"), Some(&json!(2)));
        assert_eq!(
            get_nested_value(&data, "user.profile.preferences[0]"),
            Some(&json!("dark"))
        );
    }

    #[test]
    fn test_missing_paths() {
        let data = sample();
        assert_eq!(get_nested_value(&data, "user.nonexistent"), None);
        assert_eq!(get_nested_value(&data, "user.profile.nope.deep"), None);
        assert_eq!(get_nested_value(&data, "items[99].name"), None);
        assert_eq!(get_nested_value(&json!(null), "user.name"), None);
        assert_eq!(get_nested_value(&json!({}), "user.name"), None);
    }

    #[test]
    fn test_single_property_access() {
        let data = sample();
        assert_eq!(get_nested_value(&data, "user"), data.get("user"));
    }

    #[test]
    fn test_unsafe_segments_rejected() {
        let data = sample();
        assert_eq!(get_nested_value(&data, "user.__proto__"), None);
        assert_eq!(get_nested_value(&data, "constructor.prototype"), None);
        assert!(parse_path("a.b-c").is_none());
        assert!(parse_path("a[\"b\"]").is_none());
        assert!(parse_path("a[x]").is_none());
        assert!(parse_path("").is_none());
        assert!(parse_path("a..b").is_none());
    }

    #[test]
    fn test_display_rules() {
        assert_eq!(display_value(&json!("hi")), "hi");
        assert_eq!(display_value(&json!(30)), "30");
        assert_eq!(display_value(&json!(4.8)), "4.8");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(null)), "null");
        assert_eq!(display_value(&json!(["array", "values"])), "array,values");
        assert_eq!(display_value(&json!([1, null, 2])), "1,,2");
        assert_eq!(display_value(&json!({"a": 1})), "[object Object]");
    }

    #[test]
    fn test_presence() {
        assert!(is_present(&json!(0)));
        assert!(is_present(&json!(false)));
        assert!(is_present(&json!("x")));
        assert!(!is_present(&json!("")));
        assert!(!is_present(&json!(null)));
    }
}
