//! Cluster source and sink

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::error::XrError;
use crate::exec;

/// Object queries and replacement against the current cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Namespace (project) the client currently points at
    async fn current_namespace(&self) -> Result<String>;

    /// `kind/name` of every object matching a `key=value,...` label selector
    async fn select_names(&self, label_selector: &str) -> Result<Vec<String>>;

    /// Object definitions for a `kind` or `kind/name` token
    async fn list_objects(&self, token: &str) -> Result<Vec<Value>>;

    /// Force replace the object defined in `file` within `namespace`
    async fn replace(&self, namespace: &str, file: &Path) -> Result<()>;

    /// Delete every object in `namespace` matching `label_selector`
    async fn delete_by_label(&self, namespace: &str, label_selector: &str) -> Result<()>;
}

/// [`Cluster`] backed by the `oc` command line client
#[derive(Debug, Clone, Default)]
pub struct OcClient;

impl OcClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Cluster for OcClient {
    async fn current_namespace(&self) -> Result<String> {
        let output = exec::run("oc", &["project", "-q"], None)
            .await
            .context("Unable to obtain current project name")?;
        Ok(output.stdout)
    }

    async fn select_names(&self, label_selector: &str) -> Result<Vec<String>> {
        let output = exec::run("oc", &["get", "all", "-o=name", "-l", label_selector], None)
            .await
            .context("Error gathering selection")?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn list_objects(&self, token: &str) -> Result<Vec<Value>> {
        let output = exec::run("oc", &["get", token, "-o=json"], None)
            .await
            .with_context(|| format!("Unable to export object definitions {}", token))?;
        let document: Value = serde_json::from_str(&output.stdout).map_err(|e| {
            XrError::malformed(format!("oc returned invalid JSON for {}: {}", token, e))
        })?;
        Ok(objects_from_document(document)
            .into_iter()
            .map(sanitize_exported)
            .collect())
    }

    async fn replace(&self, namespace: &str, file: &Path) -> Result<()> {
        let namespace = format!("--namespace={}", namespace);
        let file = file.to_string_lossy();
        exec::run(
            "oc",
            &["replace", &namespace, "--cascade=true", "--force", "-f", &file],
            None,
        )
        .await?;
        Ok(())
    }

    async fn delete_by_label(&self, namespace: &str, label_selector: &str) -> Result<()> {
        let namespace = format!("--namespace={}", namespace);
        exec::run("oc", &["delete", "all", &namespace, "-l", label_selector], None).await?;
        Ok(())
    }
}

/// Flatten a `List`, `Template` or single object document into objects
pub fn objects_from_document(document: Value) -> Vec<Value> {
    match document {
        Value::Object(mut map) => {
            for key in ["items", "objects"] {
                if let Some(Value::Array(objects)) = map.remove(key) {
                    return objects;
                }
            }
            if map.contains_key("kind") {
                vec![Value::Object(map)]
            } else {
                Vec::new()
            }
        }
        Value::Array(objects) => objects,
        _ => Vec::new(),
    }
}

const SERVER_METADATA: [&str; 7] = [
    "namespace",
    "uid",
    "resourceVersion",
    "selfLink",
    "creationTimestamp",
    "generation",
    "managedFields",
];

/// Remove server-populated state and the source namespace so the definition
/// can be replayed into any project
pub fn sanitize_exported(mut object: Value) -> Value {
    if let Some(map) = object.as_object_mut() {
        map.remove("status");
        if let Some(metadata) = map.get_mut("metadata").and_then(Value::as_object_mut) {
            for key in SERVER_METADATA {
                metadata.remove(key);
            }
        }
    }
    object
}
