//! JSON tree addressing shared by the store backends
//!
//! Paths are `/`-separated keys. Like the realtime database, the tree never
//! holds `null` or empty objects: writing either removes the location, and
//! parents left empty disappear with it.

use serde_json::{Map, Value};

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn join(base: &str, key: &str) -> String {
    let base = base.trim_end_matches('/');
    let key = key.trim_start_matches('/');
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", base, key)
    }
}

/// Whether a change at `a` can be observed at `b` (one contains the other)
pub fn overlaps(a: &str, b: &str) -> bool {
    let a = segments(a);
    let b = segments(b);
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for key in segments(path) {
        node = node.as_object()?.get(key)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Drop nulls and empty objects, recursively. An empty result is `Null`.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

/// Write `value` at `path` (`Null` removes), pruning emptied parents
pub fn set(root: &mut Value, path: &str, value: Value) {
    let keys = segments(path);
    let value = normalize(value);
    set_in(root, &keys, value);
    if root.as_object().map(Map::is_empty).unwrap_or(false) {
        *root = Value::Null;
    }
}

fn set_in(node: &mut Value, keys: &[&str], value: Value) {
    let Some((first, rest)) = keys.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(*first);
        } else {
            map.insert(first.to_string(), value);
        }
        return;
    }

    if value.is_null() && !map.contains_key(*first) {
        return;
    }
    let child = map.entry(first.to_string()).or_insert(Value::Null);
    set_in(child, rest, value);
    let emptied = match child {
        Value::Object(inner) => inner.is_empty(),
        Value::Null => true,
        _ => false,
    };
    if emptied {
        map.remove(*first);
    }
}

/// Apply a multi-location patch: each key is a path relative to `path`
pub fn patch(root: &mut Value, path: &str, patch: &Map<String, Value>) {
    for (key, value) in patch {
        set(root, &join(path, key), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_nested() {
        let mut root = Value::Null;
        set(&mut root, "rooms/r1/playback/currentTime", json!(12.5));
        assert_eq!(get(&root, "rooms/r1/playback"), Some(&json!({ "currentTime": 12.5 })));
        assert_eq!(get(&root, "/rooms/r1/playback/currentTime/"), Some(&json!(12.5)));
        assert_eq!(get(&root, "rooms/r2"), None);
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let mut root = json!({ "rooms": { "r1": { "members": { "a": { "name": "Ann" } } }, "r2": { "x": 1 } } });
        set(&mut root, "rooms/r1/members/a", Value::Null);
        assert_eq!(root, json!({ "rooms": { "r2": { "x": 1 } } }));

        set(&mut root, "rooms/r2", Value::Null);
        assert_eq!(root, Value::Null);
    }

    #[test]
    fn test_removing_missing_path_is_noop() {
        let mut root = json!({ "a": 1 });
        set(&mut root, "b/c", Value::Null);
        assert_eq!(root, json!({ "a": 1 }));
    }

    #[test]
    fn test_patch_multi_path_keys() {
        let mut root = json!({ "r": { "hostId": "a", "members": { "a": { "isHost": true }, "b": { "isHost": false } } } });
        let update = json!({ "hostId": "b", "members/b/isHost": true, "members/a": null });
        patch(&mut root, "r", update.as_object().unwrap());
        assert_eq!(root, json!({ "r": { "hostId": "b", "members": { "b": { "isHost": true } } } }));
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps("rooms/r1", "rooms/r1/playback"));
        assert!(overlaps("rooms/r1/playback", "rooms"));
        assert!(overlaps("", "rooms"));
        assert!(!overlaps("rooms/r1", "rooms/r2"));
        assert!(!overlaps("messages/r1", "rooms/r1"));
    }

    #[test]
    fn test_normalize_strips_nulls() {
        let value = normalize(json!({ "a": null, "b": { "c": null }, "d": 1 }));
        assert_eq!(value, json!({ "d": 1 }));
    }
}
