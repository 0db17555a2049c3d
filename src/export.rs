//! Export: snapshot the selected objects of the current project onto a version branch
//!
//! Every object is selected and transformed in memory before anything is
//! written, so a policy violation aborts the run with the repository and
//! registries untouched. Only then is the branch staged, images published,
//! files written and patched, and the result committed and pushed.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::collaborators::Collaborators;
use crate::config::{RepositoryConfig, DEFAULT_INTERNAL_REGISTRY};
use crate::image::{generated_tag_now, ImagePush, MatchContext};
use crate::kinds;
use crate::patch::run_patches;
use crate::registry::publish_images;
use crate::sync::{VersionedRepoSync, Workspace};
use crate::transform::{ExportPipeline, ExportedObject, RunContext};

/// Run options supplied on the command line
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Version to export; the XR default version when unset
    pub version: Option<String>,
    /// Commit message; generated when unset
    pub message: Option<String>,
    /// Permit replacing the content of an existing version branch
    pub overwrite: bool,
    /// Keep the temporary clone after the run
    pub preserve_workspace: bool,
    pub internal_registry: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            version: None,
            message: None,
            overwrite: false,
            preserve_workspace: false,
            internal_registry: DEFAULT_INTERNAL_REGISTRY.to_string(),
        }
    }
}

/// Outcome of a completed export
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub version: String,
    pub branch: String,
    pub generated_tag: String,
    /// Full names of the objects written, in export order
    pub exported: Vec<String>,
    /// Objects returned by the cluster but not selected
    pub skipped: usize,
    pub images_pushed: usize,
    pub patches_applied: usize,
    /// Location of the clone when it was preserved
    pub workspace: Option<PathBuf>,
}

/// Commit message used when none is given
pub fn default_commit_message<Tz: TimeZone>(version: &str, generated_tag: &str, now: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "Version: {} (tag={}) (date={})",
        version,
        generated_tag,
        now.format("%a %b %e %H:%M:%S %Z %Y")
    )
}

/// Canonical full name of an `oc get -o=name` line.
///
/// Newer clients qualify the kind with its API group
/// (`deploymentconfig.apps.openshift.io/app`); the group is dropped.
fn selected_full_name(line: &str) -> Option<String> {
    let (kind, name) = line.trim().split_once('/')?;
    let kind = kind.split('.').next().unwrap_or(kind);
    if kind.is_empty() || name.is_empty() {
        return None;
    }
    Some(kinds::full_name(kind, name))
}

/// Union of the objects matched by every configured label selector.
///
/// `None` when no selectors are configured, meaning every object is eligible.
pub async fn select_by_labels(cluster: &dyn Cluster, config: &RepositoryConfig) -> Result<Option<HashSet<String>>> {
    let selectors = &config.spec.export_rules.selectors;
    if selectors.is_empty() {
        return Ok(None);
    }

    let mut selected = HashSet::new();
    for selector in selectors {
        let query = selector.label_query();
        let names = cluster
            .select_names(&query)
            .await
            .with_context(|| format!("Error gathering selection for labels ({})", query))?;
        selected.extend(names.iter().filter_map(|line| selected_full_name(line)));
    }

    info!("Label selectors matched {} objects", selected.len());
    Ok(Some(selected))
}

/// Query every include token and run the results through the pipeline
async fn collect_objects(cluster: &dyn Cluster, pipeline: &ExportPipeline) -> Result<(Vec<ExportedObject>, usize)> {
    let mut exported: Vec<ExportedObject> = Vec::new();
    let mut seen = HashSet::new();
    let mut skipped = 0;

    for token in pipeline.include().entries() {
        let objects = cluster
            .list_objects(token)
            .await
            .with_context(|| format!("Unable to export object definitions {}", token))?;

        for object in objects {
            match pipeline.process(object)? {
                Some(accepted) => {
                    let full_name = accepted.identity.full_name();
                    if seen.insert(full_name.clone()) {
                        info!("Exporting: {}", full_name);
                        exported.push(accepted);
                    }
                }
                None => skipped += 1,
            }
        }
    }

    Ok((exported, skipped))
}

/// Serialize an object the way it is stored on a version branch
pub fn to_object_file(object: &Value) -> Result<Vec<u8>> {
    use serde::Serialize;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    object
        .serialize(&mut serializer)
        .context("Error marshalling object data")?;
    Ok(buf)
}

/// Write `<object_dir>/<kind>/<name>.json`
async fn write_object(object_dir: &Path, exported: &ExportedObject) -> Result<PathBuf> {
    let kind_dir = object_dir.join(&exported.identity.kind);
    tokio::fs::create_dir_all(&kind_dir)
        .await
        .with_context(|| format!("Error creating object directory ({})", kind_dir.display()))?;

    let path = kind_dir.join(format!("{}.json", exported.identity.name));
    let data = to_object_file(&exported.object)?;
    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("Error writing object data to file ({})", path.display()))?;
    Ok(path)
}

/// Export the objects selected by `config` to the branch for the requested version
pub async fn run_export(
    config: &RepositoryConfig,
    collaborators: &Collaborators,
    options: &ExportOptions,
) -> Result<ExportSummary> {
    let version = options
        .version
        .clone()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.default_version());
    let branch = config.branch_name(&version);
    let generated_tag = generated_tag_now(&version);

    let cluster = collaborators.cluster.as_ref();
    let namespace = cluster.current_namespace().await?;
    info!("Exporting version {} of project {} to branch {}", version, namespace, branch);

    let selected = select_by_labels(cluster, config).await?;
    let ctx = RunContext {
        repository: config.metadata.name.clone(),
        version: version.clone(),
        generated_tag: generated_tag.clone(),
        images: MatchContext {
            internal_registry: options.internal_registry.clone(),
            namespace,
        },
    };
    let pipeline = ExportPipeline::new(config, selected, ctx)?;

    let (exported, skipped) = collect_objects(cluster, &pipeline).await?;
    if exported.is_empty() {
        warn!("No objects were selected for export");
    }

    let workspace = Workspace::create(options.preserve_workspace)?;
    let mut repo = VersionedRepoSync::new(collaborators.git.clone(), config, workspace)?;
    repo.prepare().await?;
    repo.create_version_branch(&branch, options.overwrite).await?;
    repo.stage_version_branch().await?;

    let pushes: Vec<ImagePush> = exported
        .iter()
        .flat_map(|object| object.pushes.iter().cloned())
        .collect();
    let images_pushed = publish_images(collaborators.registry.as_ref(), &pushes).await?;

    let object_dir = repo.object_dir();
    for object in &exported {
        write_object(&object_dir, object).await?;
    }

    let patches_applied = run_patches(
        collaborators.patch_filter.as_ref(),
        &config.spec.export_rules.transforms.patches,
        &object_dir,
    )
    .await
    .context("Error executing export patches")?;

    repo.mark_written()?;
    let message = options
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default_commit_message(&version, &generated_tag, Local::now()));
    repo.commit(&message).await?;
    repo.push().await?;

    info!("Export complete.");
    Ok(ExportSummary {
        version,
        branch,
        generated_tag,
        exported: exported.iter().map(|o| o.identity.full_name()).collect(),
        skipped,
        images_pushed,
        patches_applied,
        workspace: options
            .preserve_workspace
            .then(|| repo.repo_dir().to_path_buf()),
    })
}
