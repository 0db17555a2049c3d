use anyhow::{Context, Result};
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::XrError;
use crate::image::{ImageMappingRule, Override, TagType};
use crate::kinds::KindNameList;

/// Label carrying the repository identity on every managed object
pub const LABEL_REPOSITORY: &str = "openshift.io/repository";

/// Label carrying the exported version on every managed object
pub const LABEL_REPOSITORY_VERSION: &str = "openshift.io/repository/version";

/// Version used when neither the command line nor the config names one
pub const DEFAULT_VERSION: &str = "master";

/// Address prefix identifying images served by the cluster's internal registry
pub const DEFAULT_INTERNAL_REGISTRY: &str = "172.";

/// Only supported patch filter
pub const PATCH_TYPE_JQ: &str = "jq";

/// An ObjectRepository ("XR") definition
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    #[serde(default)]
    pub kind: String,

    pub metadata: Metadata,

    pub spec: RepositorySpec,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Metadata {
    /// Repository identity, stamped on every object as a label
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    /// Sync mode; only "git" is supported
    #[serde(rename = "type")]
    pub sync_type: String,

    /// Version used when none is requested
    #[serde(default)]
    pub default_version: Option<String>,

    pub git: GitConfig,

    #[serde(default)]
    pub export_rules: ExportRules,

    #[serde(default)]
    pub import_rules: ImportRules,
}

/// Location and layout of the backing git repository
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[serde(default)]
    pub uri: String,

    /// Object file format; only "json" is supported
    #[serde(default)]
    pub format: String,

    #[serde(default)]
    pub branch: BranchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BranchConfig {
    /// Subdirectory of the repository holding object files
    #[serde(default)]
    pub context_dir: Option<String>,

    /// Prefix prepended to the version to form the branch name
    #[serde(default)]
    pub prefix: String,

    /// Ref that every version branch is staged from
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExportRules {
    #[serde(default)]
    pub selectors: Vec<Selector>,

    #[serde(default)]
    pub include: KindNameList,

    #[serde(default)]
    pub exclude: KindNameList,

    #[serde(default)]
    pub transforms: ExportTransforms,
}

/// Label selector; only `matchLabels` entries of the form `key=value` are supported
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub match_labels: Vec<String>,

    #[serde(default)]
    pub match_expressions: Vec<serde_json::Value>,
}

impl Selector {
    /// The selector in `oc -l` syntax
    pub fn label_query(&self) -> String {
        self.match_labels.join(",")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExportTransforms {
    /// Mutator objects that may be exported untouched
    #[serde(default)]
    pub preserve_mutators: KindNameList,

    #[serde(default)]
    pub patches: Vec<PatchRule>,

    #[serde(default)]
    pub image_mappings: Vec<ImageMappingConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportRules {
    #[serde(default)]
    pub include: KindNameList,

    #[serde(default)]
    pub exclude: KindNameList,

    /// Namespace to import into instead of the current one
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub transforms: ImportTransforms,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportTransforms {
    #[serde(default)]
    pub name_prefix: Option<String>,

    #[serde(default)]
    pub patches: Vec<PatchRule>,

    #[serde(default)]
    pub image_mappings: Vec<ImageMappingConfig>,
}

/// Filter expression applied to every object file matched by `match`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PatchRule {
    #[serde(rename = "match")]
    pub matches: KindNameList,

    #[serde(rename = "type", default = "default_patch_type")]
    pub patch_type: String,

    pub patch: String,
}

/// Image mapping rule as written in the config file
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImageMappingConfig {
    pub pattern: String,

    #[serde(default, alias = "setRegistryHost")]
    pub new_registry_host: Override,

    #[serde(default, alias = "setNamespace")]
    pub new_namespace: Override,

    #[serde(default, alias = "setRepository")]
    pub new_repository: Override,

    #[serde(default, alias = "setTag")]
    pub new_tag: Override,

    /// `user` or `generated`; checked when the rule is compiled
    #[serde(default)]
    pub tag_type: Option<String>,

    #[serde(default = "default_true")]
    pub push: bool,

    /// Registry credentials; not supported
    #[serde(default)]
    pub secret: Option<String>,
}

impl ImageMappingConfig {
    /// Validate and compile into a rule the mapping engine can evaluate
    pub fn compile(&self) -> Result<ImageMappingRule, XrError> {
        if self.secret.as_deref().is_some_and(|s| !s.is_empty()) {
            return Err(XrError::policy(format!(
                "Image mapping secrets are not supported ({}); log into the necessary registries before running",
                self.pattern
            )));
        }

        let tag_type = self.tag_type.as_deref().unwrap_or_default();
        let tag_type = TagType::from_name(tag_type).ok_or_else(|| {
            XrError::policy(format!(
                "Unsupported image mapping tagType {:?} ({})",
                tag_type, self.pattern
            ))
        })?;

        let mut rule = ImageMappingRule::new(&self.pattern)?;
        rule.registry = self.new_registry_host.clone();
        rule.namespace = self.new_namespace.clone();
        rule.repository = self.new_repository.clone();
        rule.tag = self.new_tag.clone();
        rule.tag_type = tag_type;
        rule.push = self.push;
        Ok(rule)
    }
}

/// Compile a list of mapping rules, keeping their declared order
pub fn compile_mappings(mappings: &[ImageMappingConfig]) -> Result<Vec<ImageMappingRule>, XrError> {
    mappings.iter().map(ImageMappingConfig::compile).collect()
}

// Default value functions
fn default_base_ref() -> String {
    "master".to_string()
}
fn default_patch_type() -> String {
    PATCH_TYPE_JQ.to_string()
}
fn default_true() -> bool {
    true
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            format: "json".to_string(),
            branch: BranchConfig {
                base_ref: default_base_ref(),
                ..Default::default()
            },
        }
    }
}

impl RepositoryConfig {
    /// Load and validate an XR file (JSON, or YAML by extension)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| XrError::config(format!("Unable to read XR file ({}): {}", path.display(), e)))?;

        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");

        let mut config = if is_yaml {
            serde_yaml::from_str::<Self>(&content)
                .map_err(|e| XrError::config(format!("Error parsing XR file ({}): {}", path.display(), e)))?
        } else {
            Self::from_json(&content)
                .with_context(|| format!("Failed to load XR file: {}", path.display()))?
        };

        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse an XR document without validating it
    pub fn from_json(content: &str) -> Result<Self> {
        let config = serde_json::from_str(content)
            .map_err(|e| XrError::config(format!("Error parsing XR document: {}", e)))?;
        Ok(config)
    }

    /// Expand `~` and environment variables in the repository URI
    pub fn expand_paths(&mut self) -> Result<()> {
        self.spec.git.uri = shellexpand::full(&self.spec.git.uri)
            .map_err(|e| XrError::config(format!("Failed to expand git uri: {}", e)))?
            .into_owned();
        Ok(())
    }

    /// Reject configurations that cannot be executed, before any side effect
    pub fn validate(&self) -> Result<(), XrError> {
        let spec = &self.spec;

        if spec.sync_type != "git" || spec.git.format != "json" {
            return Err(XrError::config(
                "Only git/json ObjectRepositories are presently supported",
            ));
        }

        if spec.git.uri.trim().is_empty() {
            return Err(XrError::config("No Git URI specified"));
        }

        if self.metadata.name.trim().is_empty() {
            return Err(XrError::config("ObjectRepository metadata.name is required"));
        }

        self.context_dir()?;

        for selector in &spec.export_rules.selectors {
            if !selector.match_expressions.is_empty() {
                return Err(XrError::policy("Selectors/MatchExpressions are not currently supported"));
            }
            if selector.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
                return Err(XrError::policy("Selectors/Namespace is not currently supported"));
            }
            if let Some(label) = selector
                .match_labels
                .iter()
                .find(|label| !is_key_value(label))
            {
                return Err(XrError::policy(format!(
                    "Selector matchLabels entries must be key=value: {:?}",
                    label
                )));
            }
        }

        for patch in spec
            .export_rules
            .transforms
            .patches
            .iter()
            .chain(&spec.import_rules.transforms.patches)
        {
            if patch.patch_type != PATCH_TYPE_JQ {
                return Err(XrError::policy(format!(
                    "Patch type is not supported: {}",
                    patch.patch_type
                )));
            }
        }

        compile_mappings(&spec.export_rules.transforms.image_mappings)?;
        compile_mappings(&spec.import_rules.transforms.image_mappings)?;

        Ok(())
    }

    /// Version to use when the caller did not request one
    pub fn default_version(&self) -> String {
        self.spec
            .default_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VERSION)
            .to_string()
    }

    /// Branch holding `version`
    pub fn branch_name(&self, version: &str) -> String {
        format!("{}{}", self.spec.git.branch.prefix, version)
    }

    /// Base ref, falling back to `master` when configured as empty
    pub fn base_ref(&self) -> &str {
        let base = self.spec.git.branch.base_ref.as_str();
        if base.is_empty() {
            "master"
        } else {
            base
        }
    }

    /// Context directory relative to the repository root, cleaned
    pub fn context_dir(&self) -> Result<PathBuf, XrError> {
        let raw = match self.spec.git.branch.context_dir.as_deref() {
            Some(dir) if !dir.trim().is_empty() => dir.trim(),
            _ => return Ok(PathBuf::new()),
        };

        let cleaned = PathBuf::from(raw).clean();
        let escapes = cleaned
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(XrError::config(format!(
                "contextDir must stay inside the repository: {}",
                raw
            )));
        }

        Ok(cleaned)
    }
}

/// Plain `key=value` equality; `!=` and `==` expressions are rejected
fn is_key_value(label: &str) -> bool {
    matches!(
        label.split_once('='),
        Some((key, value)) if !key.trim().is_empty() && !key.ends_with('!') && !value.starts_with('=')
    )
}

/// Parse a `key=value,key=value` list of extra labels
pub fn parse_labels(list: &str) -> Result<Vec<(String, String)>, XrError> {
    list.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(|label| {
            let parts: Vec<&str> = label.split('=').collect();
            match parts.as_slice() {
                [key, value] if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(XrError::config(format!(
                    "Invalid label specified (must be <key>=<value>): {:?}",
                    label
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"{
        "kind": "ObjectRepository",
        "metadata": {"name": "shop"},
        "spec": {
            "type": "git",
            "git": {"uri": "https://example.com/shop.git", "format": "json"}
        }
    }"#;

    fn minimal() -> RepositoryConfig {
        RepositoryConfig::from_json(MINIMAL).expect("Failed to parse minimal XR")
    }

    #[test]
    fn test_config_default_values() {
        let config = minimal();

        assert!(config.validate().is_ok());
        assert_eq!(config.base_ref(), "master");
        assert_eq!(config.default_version(), "master");
        assert_eq!(config.branch_name("v1"), "v1");
        assert_eq!(config.context_dir().unwrap(), PathBuf::new());
        assert!(config.spec.export_rules.include.is_empty());
        assert!(config.spec.import_rules.transforms.name_prefix.is_none());
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "kind": "ObjectRepository",
            "metadata": {"name": "shop"},
            "spec": {
                "type": "git",
                "defaultVersion": "v1",
                "git": {
                    "uri": "https://example.com/shop.git",
                    "format": "json",
                    "branch": {"contextDir": "objects/./", "prefix": "release-", "baseRef": "main"}
                },
                "exportRules": {
                    "selectors": [{"matchLabels": ["app=shop", "tier=web"]}],
                    "include": "dc,svc",
                    "exclude": "svc/internal",
                    "transforms": {
                        "preserveMutators": "is/builder",
                        "patches": [{"match": "dc", "type": "jq", "patch": ".spec.replicas = 1"}],
                        "imageMappings": [{
                            "pattern": "*/*/app:*",
                            "setRegistryHost": "internal.registry:5000",
                            "newNamespace": "prod",
                            "newTag": "",
                            "tagType": "generated",
                            "push": false
                        }]
                    }
                },
                "importRules": {
                    "include": "all",
                    "namespace": "staging",
                    "transforms": {"namePrefix": "stg-"}
                }
            }
        }"#;

        let config = RepositoryConfig::from_json(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.default_version(), "v1");
        assert_eq!(config.branch_name("v1"), "release-v1");
        assert_eq!(config.base_ref(), "main");
        assert_eq!(config.context_dir().unwrap(), PathBuf::from("objects"));
        assert_eq!(config.spec.export_rules.selectors[0].label_query(), "app=shop,tier=web");
        assert!(config.spec.export_rules.include.matches("services/web"));
        assert!(config.spec.export_rules.transforms.preserve_mutators.matches("imagestreams/builder"));

        let rules = compile_mappings(&config.spec.export_rules.transforms.image_mappings).unwrap();
        assert_eq!(rules[0].registry, Override::Set("internal.registry:5000".to_string()));
        assert_eq!(rules[0].namespace, Override::Set("prod".to_string()));
        assert_eq!(rules[0].repository, Override::Keep);
        assert_eq!(rules[0].tag, Override::Drop);
        assert_eq!(rules[0].tag_type, TagType::Generated);
        assert!(!rules[0].push);
    }

    #[test]
    fn test_unsupported_sync_type() {
        let mut config = minimal();
        config.spec.sync_type = "s3".to_string();
        assert_matches!(config.validate(), Err(XrError::Config(_)));

        let mut config = minimal();
        config.spec.git.format = "yaml".to_string();
        assert_matches!(config.validate(), Err(XrError::Config(_)));
    }

    #[test]
    fn test_missing_uri() {
        let mut config = minimal();
        config.spec.git.uri = "  ".to_string();
        assert_matches!(config.validate(), Err(XrError::Config(msg)) if msg.contains("URI"));
    }

    #[test]
    fn test_context_dir_escape() {
        let mut config = minimal();
        config.spec.git.branch.context_dir = Some("objects/../../etc".to_string());
        assert_matches!(config.validate(), Err(XrError::Config(_)));

        config.spec.git.branch.context_dir = Some("/abs".to_string());
        assert_matches!(config.validate(), Err(XrError::Config(_)));
    }

    #[test]
    fn test_selector_policy() {
        let mut config = minimal();
        config.spec.export_rules.selectors = vec![Selector {
            match_expressions: vec![serde_json::json!({"key": "app"})],
            ..Default::default()
        }];
        assert_matches!(config.validate(), Err(XrError::Policy(_)));

        config.spec.export_rules.selectors = vec![Selector {
            namespace: Some("other".to_string()),
            ..Default::default()
        }];
        assert_matches!(config.validate(), Err(XrError::Policy(_)));

        config.spec.export_rules.selectors = vec![Selector {
            match_labels: vec!["app in (a,b)".to_string()],
            ..Default::default()
        }];
        assert_matches!(config.validate(), Err(XrError::Policy(_)));

        for expression in ["app!=x", "app==x"] {
            config.spec.export_rules.selectors = vec![Selector {
                match_labels: vec![expression.to_string()],
                ..Default::default()
            }];
            assert_matches!(config.validate(), Err(XrError::Policy(_)), "{} was accepted", expression);
        }

        config.spec.export_rules.selectors = vec![Selector {
            match_labels: vec!["app=shop".to_string()],
            ..Default::default()
        }];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_patch_type_policy() {
        let mut config = minimal();
        config.spec.import_rules.transforms.patches = vec![PatchRule {
            matches: KindNameList::all(),
            patch_type: "json-patch".to_string(),
            patch: "[]".to_string(),
        }];
        assert_matches!(config.validate(), Err(XrError::Policy(msg)) if msg.contains("json-patch"));
    }

    #[test]
    fn test_mapping_secret_and_tag_type() {
        let mut config = minimal();
        config.spec.export_rules.transforms.image_mappings =
            serde_json::from_str(r#"[{"pattern": "*/*/*:*", "secret": "pull-secret"}]"#).unwrap();
        assert_matches!(config.validate(), Err(XrError::Policy(_)));

        config.spec.export_rules.transforms.image_mappings =
            serde_json::from_str(r#"[{"pattern": "*/*/*:*", "tagType": "semver"}]"#).unwrap();
        assert_matches!(config.validate(), Err(XrError::Policy(msg)) if msg.contains("semver"));

        config.spec.export_rules.transforms.image_mappings =
            serde_json::from_str(r#"[{"pattern": "*/*/*:*", "tagType": "user"}]"#).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_pattern() {
        let mut config = minimal();
        config.spec.export_rules.transforms.image_mappings =
            serde_json::from_str(r#"[{"pattern": "a//b"}]"#).unwrap();
        assert_matches!(config.validate(), Err(XrError::Config(_)));
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(
            parse_labels("env=prod, team=shop,").unwrap(),
            vec![
                ("env".to_string(), "prod".to_string()),
                ("team".to_string(), "shop".to_string())
            ]
        );
        assert!(parse_labels("").unwrap().is_empty());
        assert_matches!(parse_labels("env"), Err(XrError::Config(_)));
        assert_matches!(parse_labels("a=b=c"), Err(XrError::Config(_)));
    }

    #[test]
    fn test_load_json_and_yaml() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let json_path = temp_dir.path().join("xr.json");
        std::fs::write(&json_path, MINIMAL).unwrap();
        let loaded = RepositoryConfig::load(&json_path).expect("Failed to load JSON XR");
        assert_eq!(loaded.metadata.name, "shop");

        let yaml_path = temp_dir.path().join("xr.yaml");
        std::fs::write(
            &yaml_path,
            "metadata:\n  name: shop\nspec:\n  type: git\n  git:\n    uri: https://example.com/shop.git\n    format: json\n",
        )
        .unwrap();
        let loaded = RepositoryConfig::load(&yaml_path).expect("Failed to load YAML XR");
        assert_eq!(loaded.spec.git.uri, "https://example.com/shop.git");
    }

    #[test]
    fn test_load_rejects_before_side_effects() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("xr.json");
        std::fs::write(&path, MINIMAL.replace("\"git\",", "\"svn\",")).unwrap();

        let err = RepositoryConfig::load(&path).unwrap_err();
        assert_matches!(XrError::find(&err), Some(XrError::Config(_)));

        let missing = RepositoryConfig::load(&temp_dir.path().join("nope.json")).unwrap_err();
        assert_matches!(XrError::find(&missing), Some(XrError::Config(_)));
    }
}
