// Lookups into loosely-shaped JSON payloads.
//
// Both Coze events and the inbound webhooks name the same field differently
// depending on the sender, so callers pass an explicit priority list and take
// the first match.

use serde_json::Value;

/// String at a nested object path, e.g. `["message", "user", "email"]`.
/// `None` if any step is missing, not an object, or the leaf is not a string.
pub(crate) fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |node, key| node.as_object()?.get(*key))?
        .as_str()
}

/// First path (in priority order) that holds a string.
pub(crate) fn first_string_at<'a>(value: &'a Value, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| string_at(value, path))
}

/// First top-level key (in priority order) holding a non-blank string.
pub(crate) fn first_non_blank<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}
