//! Per-object selection and mutation
//!
//! [`ExportPipeline`] and [`ImportPipeline`] decide whether an object crosses
//! the repository boundary and rewrite it on the way. Both are pure: registry
//! side effects are returned as [`ImagePush`] requests and carried out by the
//! caller once every object has passed the policy gates.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

use crate::config::{compile_mappings, RepositoryConfig, LABEL_REPOSITORY, LABEL_REPOSITORY_VERSION};
use crate::error::XrError;
use crate::image::{find_rule, ImageMappingRule, ImagePush, ImageRef, MatchContext};
use crate::kinds::{self, KindNameList, KIND_BC, KIND_DC, KIND_IS, KIND_RC};
use crate::tree;

/// Canonical identity of a managed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectIdentity {
    /// Pluralized, lowercase kind
    pub kind: String,
    pub name: String,
}

impl ObjectIdentity {
    /// Read `.kind` and `.metadata.name`; either missing is malformed data
    pub fn of(object: &Value) -> Result<Self, XrError> {
        let kind = tree::get_str(object, &["kind"])
            .map(kinds::pluralize_kind)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| XrError::malformed(format!("Selected object does not specify kind: {}", object)))?;

        let name = tree::get_str(object, &["metadata", "name"])
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                XrError::malformed(format!("Selected object does not specify metadata.name: {}", object))
            })?
            .to_string();

        Ok(Self { kind, name })
    }

    pub fn full_name(&self) -> String {
        kinds::full_name(&self.kind, &self.name)
    }
}

/// Values shared by every object handled in one run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Repository identity label value
    pub repository: String,
    pub version: String,
    /// Tag used by rules with a generated tag type
    pub generated_tag: String,
    pub images: MatchContext,
}

/// An object accepted for export
#[derive(Debug, Clone)]
pub struct ExportedObject {
    pub identity: ObjectIdentity,
    pub object: Value,
    pub pushes: Vec<ImagePush>,
}

/// Drop `ImageChange` entries from `spec.triggers`
pub fn strip_image_change_triggers(object: &mut Value) -> Result<()> {
    let Some(triggers) = tree::get_path(object, &["spec", "triggers"]) else {
        return Ok(());
    };

    if let Some(kept) = tree::visit_array(triggers, |trigger| {
        (tree::get_str(trigger, &["type"]) != Some("ImageChange")).then(|| trigger.clone())
    }) {
        tree::set_path(object, &["spec", "triggers"], kept)?;
    }
    Ok(())
}

/// Rewrite `spec.template.spec.containers[*].image` using the first matching rule.
///
/// Returns the registry pushes requested by rules with `push` enabled.
pub fn rewrite_container_images(
    object: &mut Value,
    full_name: &str,
    rules: &[ImageMappingRule],
    ctx: &RunContext,
) -> Result<Vec<ImagePush>> {
    let mut pushes = Vec::new();
    if rules.is_empty() {
        return Ok(pushes);
    }

    let Some(containers) = tree::get_path_mut(object, &["spec", "template", "spec", "containers"])
        .and_then(Value::as_array_mut)
    else {
        return Ok(pushes);
    };

    for container in containers.iter_mut() {
        let Some(image) = tree::get_str(container, &["image"]).map(str::to_string) else {
            continue;
        };

        let parsed = ImageRef::parse(&image)
            .with_context(|| format!("Invalid docker image reference in {}", full_name))?;

        let Some(rule) = find_rule(rules, &parsed, &ctx.images) else {
            continue;
        };

        let rewritten = rule.rewrite(&parsed, &ctx.generated_tag).to_string();
        info!("Mapping image reference in {}: {:?} -> {:?}", full_name, image, rewritten);
        tree::set_path(container, &["image"], Value::String(rewritten.clone()))?;

        if rule.push {
            pushes.push(ImagePush {
                source: image,
                target: rewritten,
            });
        }
    }

    Ok(pushes)
}

/// Stamp the repository identity and version labels
pub fn stamp_labels(object: &mut Value, ctx: &RunContext) -> Result<()> {
    tree::set_label(object, LABEL_REPOSITORY, &ctx.repository)?;
    tree::set_label(object, LABEL_REPOSITORY_VERSION, &ctx.version)
}

fn rewrites_images(kind: &str) -> bool {
    kind == KIND_DC || kind == KIND_RC
}

/// Selection and mutation rules for objects leaving the cluster
pub struct ExportPipeline {
    include: KindNameList,
    exclude: KindNameList,
    preserve_mutators: KindNameList,
    selected: Option<HashSet<String>>,
    mappings: Vec<ImageMappingRule>,
    ctx: RunContext,
}

impl ExportPipeline {
    /// Build the pipeline; `selected` is the label-selector allow-set, if selectors are configured
    pub fn new(config: &RepositoryConfig, selected: Option<HashSet<String>>, ctx: RunContext) -> Result<Self> {
        let rules = &config.spec.export_rules;
        let include = if rules.include.is_empty() {
            KindNameList::all()
        } else {
            rules.include.clone()
        };

        Ok(Self {
            include,
            exclude: rules.exclude.clone(),
            preserve_mutators: rules.transforms.preserve_mutators.clone(),
            selected,
            mappings: compile_mappings(&rules.transforms.image_mappings)?,
            ctx,
        })
    }

    /// Tokens to query the cluster with
    pub fn include(&self) -> &KindNameList {
        &self.include
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Select and transform one object.
    ///
    /// `Ok(None)` means the object is not selected. Malformed objects and
    /// unpreserved mutators are errors that must abort the run.
    pub fn process(&self, mut object: Value) -> Result<Option<ExportedObject>> {
        let identity = ObjectIdentity::of(&object)?;
        let full_name = identity.full_name();

        if let Some(selected) = &self.selected {
            if !selected.contains(&full_name) {
                info!("Selectors did not match: {}", full_name);
                return Ok(None);
            }
        }

        if !self.include.matches(&full_name) {
            info!("Not selected by include: {}", full_name);
            return Ok(None);
        }

        if self.exclude.matches(&full_name) {
            info!("Excluding: {}", full_name);
            return Ok(None);
        }

        if !self.preserve_mutators.matches(&full_name) {
            if identity.kind == KIND_IS || identity.kind == KIND_BC {
                return Err(XrError::policy(format!(
                    "Selected object contains or is a mutator which is not specified in preserveMutators field: {}",
                    full_name
                ))
                .into());
            }

            if identity.kind == KIND_DC {
                strip_image_change_triggers(&mut object)
                    .with_context(|| format!("Unable to strip triggers from {}", full_name))?;
            }
        }

        let pushes = if rewrites_images(&identity.kind) {
            rewrite_container_images(&mut object, &full_name, &self.mappings, &self.ctx)?
        } else {
            Vec::new()
        };

        stamp_labels(&mut object, &self.ctx)?;

        Ok(Some(ExportedObject {
            identity,
            object,
            pushes,
        }))
    }
}

/// Selection and mutation rules for objects replayed onto a cluster
pub struct ImportPipeline {
    include: KindNameList,
    exclude: KindNameList,
    name_prefix: Option<String>,
    extra_labels: Vec<(String, String)>,
    mappings: Vec<ImageMappingRule>,
    ctx: RunContext,
}

impl ImportPipeline {
    pub fn new(
        config: &RepositoryConfig,
        name_prefix: Option<String>,
        extra_labels: Vec<(String, String)>,
        ctx: RunContext,
    ) -> Result<Self> {
        let rules = &config.spec.import_rules;
        let name_prefix = name_prefix
            .or_else(|| rules.transforms.name_prefix.clone())
            .filter(|p| !p.is_empty());

        Ok(Self {
            include: rules.include.clone(),
            exclude: rules.exclude.clone(),
            name_prefix,
            extra_labels,
            mappings: compile_mappings(&rules.transforms.image_mappings)?,
            ctx,
        })
    }

    /// Whether an object file named `full_name` should be imported
    pub fn selects(&self, full_name: &str) -> bool {
        if !self.include.is_empty() && !self.include.matches(full_name) {
            info!("Imported resource is not selected by include: {}", full_name);
            return false;
        }
        if self.exclude.matches(full_name) {
            info!("Imported resource is excluded by exclude: {}", full_name);
            return false;
        }
        true
    }

    /// Transform one object read from the version branch
    pub fn process(&self, mut object: Value) -> Result<Value> {
        let identity = ObjectIdentity::of(&object)?;
        let full_name = identity.full_name();

        // The object lands in whatever namespace the replace targets
        if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("namespace");
        }

        if let Some(prefix) = &self.name_prefix {
            let renamed = format!("{}{}", prefix, identity.name);
            tree::set_path(&mut object, &["metadata", "name"], Value::String(renamed))?;
        }

        stamp_labels(&mut object, &self.ctx)?;
        for (key, value) in &self.extra_labels {
            tree::set_label(&mut object, key, value)?;
        }

        if rewrites_images(&identity.kind) {
            // Imported images are only rewritten; nothing is pushed
            rewrite_container_images(&mut object, &full_name, &self.mappings, &self.ctx)?;
        }

        Ok(object)
    }
}
