// ── Bounded lookups into loosely-typed payloads ──
//
// Router responses are nested JSON trees whose shape varies by firmware.
// Consumers read them through `safe_get`, which never fails: a missing
// key, an index out of range, a `null`, or a value of the wrong type all
// collapse into the caller's default.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// One step of a path: an object key or an array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment<'a> {
    Key(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for PathSegment<'a> {
    fn from(key: &'a str) -> Self {
        Self::Key(key)
    }
}

impl<'a> From<&'a String> for PathSegment<'a> {
    fn from(key: &'a String) -> Self {
        Self::Key(key.as_str())
    }
}

impl From<usize> for PathSegment<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Walk `root` along `path`. `None` if any step does not resolve or
/// lands on `null`.
pub fn lookup<'v, 'p, P>(root: &'v Value, path: impl IntoIterator<Item = P>) -> Option<&'v Value>
where
    P: Into<PathSegment<'p>>,
{
    let mut current = root;
    for segment in path {
        current = match (segment.into(), current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(i), Value::Array(items)) => items.get(i)?,
            // A numeric key addresses an array element, as in dotted paths.
            (PathSegment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// Read a typed value at `path`, or `default` if the path does not
/// fully resolve or the value has the wrong shape for `T`.
///
/// ```
/// # use boxpoll_core::access::safe_get;
/// # use serde_json::json;
/// let root = json!({"a": {"b": 1}});
/// assert_eq!(safe_get(&root, ["a", "b"], -1), 1);
/// assert_eq!(safe_get(&root, ["a", "c"], -1), -1);
/// ```
pub fn safe_get<'p, T, P>(root: &Value, path: impl IntoIterator<Item = P>, default: T) -> T
where
    T: DeserializeOwned,
    P: Into<PathSegment<'p>>,
{
    lookup(root, path)
        .and_then(|value| T::deserialize(value).ok())
        .unwrap_or(default)
}

/// Split a dotted path such as `"l2ident.id"` or `"sensors.0.value"`.
///
/// Empty segments are dropped, so `""` addresses the root.
pub fn split_path(dotted: &str) -> Vec<&str> {
    dotted.split('.').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host() -> Value {
        json!({
            "primary_name": "laptop",
            "l2ident": { "id": "aa:bb:cc:dd:ee:ff", "type": "mac_address" },
            "active": true,
            "names": [ { "name": "laptop.lan" }, { "name": "laptop" } ],
            "last_activity": null,
            "access_point": { "rx_rate": 1200 }
        })
    }

    #[test]
    fn resolves_nested_keys() {
        let root = host();
        assert_eq!(
            safe_get(&root, ["l2ident", "id"], String::new()),
            "aa:bb:cc:dd:ee:ff"
        );
        assert!(safe_get(&root, ["active"], false));
    }

    #[test]
    fn missing_key_returns_default() {
        let root = json!({"a": {"b": 1}});
        assert_eq!(safe_get(&root, ["a", "c"], -1), -1);
        assert_eq!(safe_get(&root, ["x", "y", "z"], -1), -1);
    }

    #[test]
    fn traversing_a_scalar_returns_default() {
        let root = host();
        assert_eq!(
            safe_get(&root, ["primary_name", "first"], "none".to_string()),
            "none"
        );
    }

    #[test]
    fn null_mid_path_or_at_end_returns_default() {
        let root = host();
        assert_eq!(safe_get(&root, ["last_activity", "ts"], 0_u64), 0);
        assert_eq!(safe_get(&root, ["last_activity"], 42_u64), 42);
    }

    #[test]
    fn wrong_final_type_returns_default() {
        let root = host();
        assert_eq!(safe_get(&root, ["primary_name"], 7_i64), 7);
        assert_eq!(safe_get(&root, ["access_point", "rx_rate"], 0_u32), 1200);
        assert_eq!(safe_get(&root, ["access_point", "rx_rate"], 0_u8), 0);
    }

    #[test]
    fn indexes_into_arrays() {
        let root = host();
        let first: String = safe_get(
            &root,
            [PathSegment::Key("names"), PathSegment::Index(0), PathSegment::Key("name")],
            String::new(),
        );
        assert_eq!(first, "laptop.lan");
        assert_eq!(
            safe_get(&root, split_path("names.1.name"), String::new()),
            "laptop"
        );
        assert_eq!(
            safe_get(&root, split_path("names.9.name"), "?".to_string()),
            "?"
        );
    }

    #[test]
    fn empty_path_reads_root() {
        let root = json!(5);
        assert_eq!(safe_get(&root, split_path(""), 0), 5);
        assert_eq!(lookup(&root, Vec::<&str>::new()), Some(&json!(5)));
    }

    #[test]
    fn lookup_returns_raw_subtree() {
        let root = host();
        assert_eq!(
            lookup(&root, ["l2ident"]),
            Some(&json!({ "id": "aa:bb:cc:dd:ee:ff", "type": "mac_address" }))
        );
        assert_eq!(lookup(&root, ["nope"]), None);
    }
}
