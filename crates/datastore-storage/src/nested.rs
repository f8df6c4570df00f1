//! Dot-path nesting of flat entries.

use serde_json::{Map, Value};

use crate::normalize::SEPARATOR;

/// A nested view of dot-keyed entries.
pub type Tree = Map<String, Value>;

/// Build a tree from `(key, value)` pairs.
///
/// Keys starting with `strip_prefix` lose the prefix and any leading
/// separators. The rest is split on `.`; each segment but the last names an
/// object level, the last receives the value.
///
/// Collisions resolve by iteration order: the later write to a path wins,
/// and a scalar standing where an object level is needed is replaced by an
/// empty object. Arrays are never descended into.
#[must_use]
pub fn build_tree<I, K>(entries: I, strip_prefix: Option<&str>) -> Tree
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let mut tree = Tree::new();
    for (key, value) in entries {
        let mut path = key.as_ref();
        if let Some(prefix) = strip_prefix.filter(|p| !p.is_empty())
            && let Some(rest) = path.strip_prefix(prefix)
        {
            path = rest.trim_start_matches(SEPARATOR);
        }
        insert_path(&mut tree, path, value);
    }
    tree
}

fn insert_path(tree: &mut Tree, path: &str, value: Value) {
    let mut segments = path.split(SEPARATOR).peekable();
    let mut level = tree;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            level.insert(segment.to_owned(), value);
            return;
        }
        let slot = level
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        level = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> Tree {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_single_path() {
        let built = build_tree([("x.y.z", json!(1))], None);
        assert_eq!(built, tree(json!({"x": {"y": {"z": 1}}})));
    }

    #[test]
    fn test_siblings_merge() {
        let built = build_tree(
            [
                ("app.name", json!("demo")),
                ("app.debug", json!(true)),
                ("db.host", json!("localhost")),
            ],
            None,
        );
        assert_eq!(
            built,
            tree(json!({
                "app": {"name": "demo", "debug": true},
                "db": {"host": "localhost"}
            }))
        );
    }

    #[test]
    fn test_strip_prefix() {
        let built = build_tree(
            [("settings.theme", json!("dark")), ("settings.lang", json!("en"))],
            Some("settings"),
        );
        assert_eq!(built, tree(json!({"theme": "dark", "lang": "en"})));

        let with_dot = build_tree([("settings.theme", json!("dark"))], Some("settings."));
        assert_eq!(with_dot, tree(json!({"theme": "dark"})));
    }

    #[test]
    fn test_prefix_only_applies_to_matching_keys() {
        let built = build_tree([("other.k", json!(1))], Some("settings"));
        assert_eq!(built, tree(json!({"other": {"k": 1}})));
    }

    #[test]
    fn test_later_leaf_replaces_subtree() {
        let built = build_tree([("a.b", json!(1)), ("a", json!(2))], None);
        assert_eq!(built, tree(json!({"a": 2})));
    }

    #[test]
    fn test_later_subtree_replaces_leaf() {
        let built = build_tree([("a", json!(2)), ("a.b", json!(1))], None);
        assert_eq!(built, tree(json!({"a": {"b": 1}})));
    }

    #[test]
    fn test_exact_prefix_key_lands_on_empty_segment() {
        let built = build_tree([("settings", json!(1))], Some("settings"));
        assert_eq!(built, tree(json!({"": 1})));
    }
}
