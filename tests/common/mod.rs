//! Common test utilities and helpers for xrutil tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use xrutil::cluster::{sanitize_exported, Cluster};
use xrutil::git::GitCli;
use xrutil::kinds;
use xrutil::patch::PatchFilter;
use xrutil::registry::RegistryClient;
use xrutil::{Collaborators, RepositoryConfig};

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git and return trimmed stdout, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to execute git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Commit identity for git, restored on drop
pub struct GitIdentity {
    original_env: Vec<(String, Option<String>)>,
}

impl GitIdentity {
    pub fn set() -> Self {
        let vars = [
            ("GIT_AUTHOR_NAME", "xrutil tests"),
            ("GIT_AUTHOR_EMAIL", "xrutil@example.com"),
            ("GIT_COMMITTER_NAME", "xrutil tests"),
            ("GIT_COMMITTER_EMAIL", "xrutil@example.com"),
        ];
        let original_env = vars
            .iter()
            .map(|(key, _)| (key.to_string(), env::var(key).ok()))
            .collect();
        for (key, value) in vars {
            env::set_var(key, value);
        }
        Self { original_env }
    }
}

impl Drop for GitIdentity {
    fn drop(&mut self) {
        for (key, value) in &self.original_env {
            match value {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

/// A bare remote whose `master` holds only a README
pub struct GitFixture {
    pub temp_dir: TempDir,
    pub remote: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let remote = temp_dir.path().join("remote.git");
        let seed = temp_dir.path().join("seed");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::create_dir_all(&seed).unwrap();

        git(&remote, &["init", "--bare", "--quiet"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/master"]);

        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        std::fs::write(seed.join("README.md"), "Object repository\n").unwrap();
        git(&seed, &["add", "."]);
        git(
            &seed,
            &[
                "-c",
                "user.name=xrutil tests",
                "-c",
                "user.email=xrutil@example.com",
                "commit",
                "--quiet",
                "-m",
                "Initial layout",
            ],
        );
        git(&seed, &["push", "--quiet", &remote.to_string_lossy(), "master"]);

        Self { temp_dir, remote }
    }

    pub fn uri(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Run git against the bare remote
    pub fn remote_git(&self, args: &[&str]) -> String {
        git(&self.remote, args)
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)])
            .current_dir(&self.remote)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Parse `<branch>:<path>` from the remote
    pub fn show_object(&self, branch: &str, path: &str) -> Value {
        let content = self.remote_git(&["show", &format!("{}:{}", branch, path)]);
        serde_json::from_str(&content).expect("Stored object is not valid JSON")
    }

    pub fn list_files(&self, branch: &str) -> Vec<String> {
        self.remote_git(&["ls-tree", "-r", "--name-only", branch])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// XR document pointing at this fixture
    pub fn config(&self, spec_extra: Value) -> RepositoryConfig {
        let mut doc = json!({
            "kind": "ObjectRepository",
            "metadata": {"name": "shop"},
            "spec": {
                "type": "git",
                "git": {"uri": self.uri(), "format": "json"}
            }
        });
        if let Value::Object(extra) = spec_extra {
            for (key, value) in extra {
                doc["spec"][key.as_str()] = value;
            }
        }
        let config: RepositoryConfig = serde_json::from_value(doc).expect("Invalid test XR");
        config.validate().expect("Test XR does not validate");
        config
    }
}

/// In-memory cluster.
///
/// Listed objects carry the project namespace the way the server reports
/// them, and replace refuses an object recorded in another namespace.
#[derive(Default)]
pub struct FakeCluster {
    pub namespace: String,
    pub objects: Mutex<Vec<Value>>,
    pub selections: Vec<(String, Vec<String>)>,
    /// (namespace, object) for every replace, read at call time
    pub replaced: Mutex<Vec<(String, Value)>>,
    pub deleted: Mutex<Vec<(String, String)>>,
}

impl FakeCluster {
    pub fn new(namespace: &str, objects: Vec<Value>) -> Self {
        Self {
            namespace: namespace.to_string(),
            objects: Mutex::new(objects),
            ..Default::default()
        }
    }

    pub fn set_objects(&self, objects: Vec<Value>) {
        *self.objects.lock().unwrap() = objects;
    }

    pub fn replaced(&self) -> Vec<(String, Value)> {
        self.replaced.lock().unwrap().clone()
    }
}

fn object_full_name(object: &Value) -> String {
    let kind = object["kind"].as_str().unwrap_or_default();
    let name = object["metadata"]["name"].as_str().unwrap_or_default();
    kinds::full_name(kind, name)
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn current_namespace(&self) -> Result<String> {
        Ok(self.namespace.clone())
    }

    async fn select_names(&self, label_selector: &str) -> Result<Vec<String>> {
        Ok(self
            .selections
            .iter()
            .find(|(selector, _)| selector == label_selector)
            .map(|(_, names)| names.clone())
            .unwrap_or_default())
    }

    async fn list_objects(&self, token: &str) -> Result<Vec<Value>> {
        let list = kinds::KindNameList::parse(token);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|object| list.matches(&object_full_name(object)))
            .map(|object| {
                let mut object = object.clone();
                object["metadata"]["namespace"] = json!(self.namespace);
                sanitize_exported(object)
            })
            .collect())
    }

    async fn replace(&self, namespace: &str, file: &Path) -> Result<()> {
        let object: Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
        if let Some(recorded) = object["metadata"]["namespace"].as_str() {
            anyhow::ensure!(
                recorded == namespace,
                "the namespace from the provided object \"{}\" does not match the namespace \"{}\"",
                recorded,
                namespace
            );
        }
        self.replaced
            .lock()
            .unwrap()
            .push((namespace.to_string(), object));
        Ok(())
    }

    async fn delete_by_label(&self, namespace: &str, label_selector: &str) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((namespace.to_string(), label_selector.to_string()));
        Ok(())
    }
}

/// Patch filter that understands a single expression, `.spec.replicas = N`
#[derive(Default)]
pub struct ReplicasFilter {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl PatchFilter for ReplicasFilter {
    async fn run(&self, expression: &str, file: &Path) -> Result<String> {
        let replicas: u64 = expression
            .strip_prefix(".spec.replicas = ")
            .ok_or_else(|| anyhow::anyhow!("unsupported expression {}", expression))?
            .trim()
            .parse()?;

        let mut object: Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
        object["spec"]["replicas"] = json!(replicas);
        self.calls
            .lock()
            .unwrap()
            .push(file.file_name().unwrap().to_string_lossy().into_owned());
        Ok(serde_json::to_string_pretty(&object)?)
    }
}

#[derive(Default)]
pub struct RecordingRegistry {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingRegistry {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryClient for RecordingRegistry {
    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("tag {} {}", source, target));
        Ok(())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("push {}", reference));
        Ok(())
    }
}

pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub filter: Arc<ReplicasFilter>,
    pub registry: Arc<RecordingRegistry>,
    pub collaborators: Collaborators,
}

impl Harness {
    pub fn new(cluster: FakeCluster) -> Self {
        let cluster = Arc::new(cluster);
        let filter = Arc::new(ReplicasFilter::default());
        let registry = Arc::new(RecordingRegistry::default());
        let collaborators = Collaborators {
            cluster: cluster.clone(),
            git: Arc::new(GitCli::new()),
            patch_filter: filter.clone(),
            registry: registry.clone(),
        };
        Self {
            cluster,
            filter,
            registry,
            collaborators,
        }
    }
}

pub fn deployment(name: &str, image: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "DeploymentConfig",
        "metadata": {"name": name, "labels": {"app": name}},
        "spec": {
            "replicas": 3,
            "triggers": [
                {"type": "ConfigChange"},
                {"type": "ImageChange", "imageChangeParams": {"containerNames": ["main"]}}
            ],
            "template": {"spec": {"containers": [{"name": "main", "image": image}]}}
        }
    })
}

pub fn service(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name},
        "spec": {"ports": [{"port": 8080}]}
    })
}
