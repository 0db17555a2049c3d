//! Replace: replay a version branch onto a namespace
//!
//! The branch is checked out read-only and patched in the clone. Every
//! selected file is parsed and transformed before the first object is
//! replaced, so malformed data never leaves a namespace half-imported.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::collaborators::Collaborators;
use crate::config::{parse_labels, RepositoryConfig, DEFAULT_INTERNAL_REGISTRY, LABEL_REPOSITORY};
use crate::error::XrError;
use crate::export::to_object_file;
use crate::image::{generated_tag_now, MatchContext};
use crate::kinds;
use crate::patch::{find_object_files, run_patches};
use crate::sync::{VersionedRepoSync, Workspace};
use crate::transform::{ImportPipeline, RunContext};

#[derive(Debug, Clone)]
pub struct ReplaceOptions {
    /// Version to import; the XR default version when unset
    pub version: Option<String>,
    /// Overrides `importRules.namespace` and the current project
    pub target_namespace: Option<String>,
    /// Overrides `importRules.transforms.namePrefix`
    pub name_prefix: Option<String>,
    /// Extra `key=value,...` labels for every imported object
    pub labels: Option<String>,
    /// Delete objects previously imported from this XR first
    pub clean: bool,
    pub preserve_workspace: bool,
    pub internal_registry: String,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            version: None,
            target_namespace: None,
            name_prefix: None,
            labels: None,
            clean: false,
            preserve_workspace: false,
            internal_registry: DEFAULT_INTERNAL_REGISTRY.to_string(),
        }
    }
}

/// Outcome of a completed replace
#[derive(Debug, Clone)]
pub struct ReplaceSummary {
    pub version: String,
    pub branch: String,
    pub namespace: String,
    /// Full names of the replaced objects, in replace order
    pub replaced: Vec<String>,
    /// Object files not selected by the import rules
    pub skipped: usize,
    pub patches_applied: usize,
    pub workspace: Option<PathBuf>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Namespace objects are imported into: command line, then XR, then the current project
pub fn resolve_target_namespace(cli: Option<&str>, config: &RepositoryConfig, current: &str) -> String {
    non_empty(cli)
        .or_else(|| non_empty(config.spec.import_rules.namespace.as_deref()))
        .unwrap_or(current)
        .to_string()
}

struct ImportFile {
    path: PathBuf,
    full_name: String,
    object: Value,
}

async fn read_object(path: &Path) -> Result<Value> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Error reading imported file ({})", path.display()))?;
    let object = serde_json::from_slice(&data)
        .map_err(|e| XrError::malformed(format!("Error parsing imported file ({}): {}", path.display(), e)))?;
    Ok(object)
}

/// Import the requested version into the target namespace
pub async fn run_replace(
    config: &RepositoryConfig,
    collaborators: &Collaborators,
    options: &ReplaceOptions,
) -> Result<ReplaceSummary> {
    let extra_labels = parse_labels(options.labels.as_deref().unwrap_or_default())?;

    let version = options
        .version
        .clone()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.default_version());
    let branch = config.branch_name(&version);

    let cluster = collaborators.cluster.as_ref();
    let project = cluster
        .current_namespace()
        .await
        .context("Unable to find current project name")?;

    let workspace = Workspace::create(options.preserve_workspace)?;
    let mut repo = VersionedRepoSync::new(collaborators.git.clone(), config, workspace)?;
    repo.prepare()
        .await
        .context("Error initializing git repository")?;
    repo.checkout_version(&branch).await?;

    let namespace = resolve_target_namespace(options.target_namespace.as_deref(), config, &project);
    info!("Importing version {} from branch {} into {}", version, branch, namespace);

    if options.clean {
        let selector = format!("{}={}", LABEL_REPOSITORY, config.metadata.name);
        if let Err(e) = cluster.delete_by_label(&namespace, &selector).await {
            warn!("Unable to clean prior objects ({}): {:#}", selector, e);
        }
    }

    let object_dir = repo.object_dir();
    let patches_applied = run_patches(
        collaborators.patch_filter.as_ref(),
        &config.spec.import_rules.transforms.patches,
        &object_dir,
    )
    .await
    .context("Error executing import patches")?;

    let ctx = RunContext {
        repository: config.metadata.name.clone(),
        version: version.clone(),
        generated_tag: generated_tag_now(&version),
        images: MatchContext {
            internal_registry: options.internal_registry.clone(),
            namespace: namespace.clone(),
        },
    };
    let pipeline = ImportPipeline::new(config, options.name_prefix.clone(), extra_labels, ctx)?;

    let mut files = Vec::new();
    let mut skipped = 0;
    for path in find_object_files(&object_dir) {
        let full_name = kinds::normalize(&kinds::full_name_from_path(&path));
        if !pipeline.selects(&full_name) {
            skipped += 1;
            continue;
        }

        let object = read_object(&path).await?;
        let object = pipeline
            .process(object)
            .with_context(|| format!("Error transforming imported object ({})", full_name))?;
        files.push(ImportFile {
            path,
            full_name,
            object,
        });
    }

    for file in &files {
        tokio::fs::write(&file.path, to_object_file(&file.object)?)
            .await
            .with_context(|| format!("Error writing object data to file ({})", file.path.display()))?;
    }

    let mut replaced = Vec::new();
    for file in &files {
        info!("Replacing {}", file.full_name);
        cluster
            .replace(&namespace, &file.path)
            .await
            .with_context(|| format!("Error while replacing object definition ({})", file.full_name))?;
        replaced.push(file.full_name.clone());
    }

    info!("Replace complete.");
    Ok(ReplaceSummary {
        version,
        branch,
        namespace,
        replaced,
        skipped,
        patches_applied,
        workspace: options
            .preserve_workspace
            .then(|| repo.repo_dir().to_path_buf()),
    })
}
