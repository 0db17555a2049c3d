//! Path helpers over untyped JSON object trees

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

/// Walk `keys` through nested objects.
///
/// Returns `None` as soon as a key is missing or an intermediate node is not
/// an object.
pub fn get_path<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .try_fold(root, |node, key| node.as_object()?.get(*key))
}

/// Mutable variant of [`get_path`]
pub fn get_path_mut<'a>(root: &'a mut Value, keys: &[&str]) -> Option<&'a mut Value> {
    keys.iter()
        .try_fold(root, |node, key| node.as_object_mut()?.get_mut(*key))
}

/// Convenience accessor for string leaves
pub fn get_str<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a str> {
    get_path(root, keys).and_then(Value::as_str)
}

/// Set the value at `keys`.
///
/// Every intermediate node must already exist and be an object; anything else
/// is reported as an error naming the offending path.
pub fn set_path(root: &mut Value, keys: &[&str], value: Value) -> Result<()> {
    let (last, parents) = keys
        .split_last()
        .ok_or_else(|| anyhow!("Cannot set a value at an empty path"))?;

    let parent = get_path_mut(root, parents)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| anyhow!("No object at path {:?} to set {:?} on", parents.join("."), last))?;

    parent.insert((*last).to_string(), value);
    Ok(())
}

/// Map every element of an array node through `visit`.
///
/// Elements for which `visit` returns `None` are left out of the result, which
/// is how callers filter arrays. Returns `None` when `node` is not an array.
pub fn visit_array<F>(node: &Value, mut visit: F) -> Option<Value>
where
    F: FnMut(&Value) -> Option<Value>,
{
    let elements = node.as_array()?;
    Some(Value::Array(elements.iter().filter_map(|e| visit(e)).collect()))
}

/// Set `metadata.labels[key] = value`, creating the labels map when absent
pub fn set_label(object: &mut Value, key: &str, value: &str) -> Result<()> {
    let metadata = get_path_mut(object, &["metadata"])
        .and_then(Value::as_object_mut)
        .ok_or_else(|| anyhow!("Object has no metadata to label"))?;

    let labels = metadata
        .entry("labels")
        .or_insert_with(|| Value::Object(Map::new()));
    if !labels.is_object() {
        *labels = Value::Object(Map::new());
    }
    if let Some(labels) = labels.as_object_mut() {
        labels.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path() {
        let doc = json!({"spec": {"template": {"spec": {"containers": []}}}, "kind": "Pod"});

        assert_eq!(get_path(&doc, &["spec", "template", "spec", "containers"]), Some(&json!([])));
        assert_eq!(get_str(&doc, &["kind"]), Some("Pod"));
        assert_eq!(get_path(&doc, &[]), Some(&doc));
        assert!(get_path(&doc, &["spec", "missing", "deeper"]).is_none());
    }

    #[test]
    fn test_get_path_shape_mismatch_is_not_found() {
        let doc = json!({"kind": "Pod", "items": [1, 2]});

        assert!(get_path(&doc, &["kind", "name"]).is_none());
        assert!(get_path(&doc, &["items", "0"]).is_none());
    }

    #[test]
    fn test_set_path() {
        let mut doc = json!({"metadata": {"name": "app"}});

        set_path(&mut doc, &["metadata", "name"], json!("prefix-app")).unwrap();
        set_path(&mut doc, &["kind"], json!("Service")).unwrap();

        assert_eq!(doc, json!({"metadata": {"name": "prefix-app"}, "kind": "Service"}));
    }

    #[test]
    fn test_set_path_through_missing_node_fails() {
        let mut doc = json!({"metadata": "not-an-object"});

        assert!(set_path(&mut doc, &["metadata", "name"], json!("x")).is_err());
        assert!(set_path(&mut doc, &["spec", "replicas"], json!(1)).is_err());
        assert!(set_path(&mut doc, &[], json!(1)).is_err());
        assert_eq!(doc, json!({"metadata": "not-an-object"}));
    }

    #[test]
    fn test_visit_array_filters_by_substitution() {
        let triggers = json!([{"type": "ImageChange"}, {"type": "ConfigChange"}]);

        let kept = visit_array(&triggers, |t| {
            (get_str(t, &["type"]) != Some("ImageChange")).then(|| t.clone())
        });

        assert_eq!(kept, Some(json!([{"type": "ConfigChange"}])));
        assert_eq!(visit_array(&json!({}), |t| Some(t.clone())), None);
    }

    #[test]
    fn test_set_label_merges() {
        let mut with_labels = json!({"metadata": {"labels": {"app": "web"}}});
        let mut without_labels = json!({"metadata": {"name": "web"}});

        set_label(&mut with_labels, "tier", "front").unwrap();
        set_label(&mut without_labels, "tier", "front").unwrap();

        assert_eq!(with_labels["metadata"]["labels"], json!({"app": "web", "tier": "front"}));
        assert_eq!(without_labels["metadata"]["labels"], json!({"tier": "front"}));
        assert!(set_label(&mut json!({"kind": "Pod"}), "a", "b").is_err());
    }
}
