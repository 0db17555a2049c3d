//! External patch filters applied to object files in the working tree

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{PatchRule, PATCH_TYPE_JQ};
use crate::error::XrError;
use crate::exec;
use crate::kinds::KindNameList;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PatchFilter: Send + Sync {
    /// Run `expression` over `file` and return the transformed document
    async fn run(&self, expression: &str, file: &Path) -> Result<String>;
}

/// [`PatchFilter`] backed by `jq`
#[derive(Debug, Clone, Default)]
pub struct JqFilter;

impl JqFilter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PatchFilter for JqFilter {
    async fn run(&self, expression: &str, file: &Path) -> Result<String> {
        let file = file.to_string_lossy();
        let output = exec::run("jq", &[expression, &file], None).await?;
        Ok(output.stdout)
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Every object file (`*.json`) below `dir`, skipping dot-directories such as `.git`
pub fn find_object_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Unable to walk path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.dedup();
    files
}

/// Resolve a kind/name list to the object files it covers.
///
/// `all` covers every object file, a kind covers its directory, and
/// `kind/name` covers `<kind>/<name>.json` when it exists.
pub fn find_kind_name_files(dir: &Path, list: &KindNameList) -> Vec<PathBuf> {
    if list.contains_all() {
        return find_object_files(dir);
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in list.entries() {
        let resolved = match entry.split_once('/') {
            Some((kind, name)) => {
                let path = dir.join(kind).join(format!("{}.json", name));
                if path.is_file() {
                    vec![path]
                } else {
                    Vec::new()
                }
            }
            None => find_object_files(&dir.join(entry)),
        };

        for path in resolved {
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }
    files
}

/// Apply `patches` in declared order, overwriting each matched file with the filter output
pub async fn run_patches(filter: &dyn PatchFilter, patches: &[PatchRule], dir: &Path) -> Result<usize> {
    let mut applied = 0;

    for patch in patches {
        if patch.patch_type != PATCH_TYPE_JQ {
            return Err(XrError::policy(format!("Patch type is not supported: {}", patch.patch_type)).into());
        }

        for file in find_kind_name_files(dir, &patch.matches) {
            let patched = filter
                .run(&patch.patch, &file)
                .await
                .with_context(|| format!("Error running jq patch operation on {}", file.display()))?;

            info!("Applying patch [{}]: {}", patch.patch, file.display());
            tokio::fs::write(&file, patched)
                .await
                .with_context(|| format!("Error writing patch result on {}", file.display()))?;
            applied += 1;
        }
    }

    Ok(applied)
}
