use super::reference::ImageRef;
use crate::error::XrError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a mapping rule does with one component of a matched reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Override {
    /// Keep the component of the original reference
    #[default]
    Keep,
    /// Remove the component
    Drop,
    /// Replace the component
    Set(String),
}

impl From<Option<String>> for Override {
    fn from(value: Option<String>) -> Self {
        match value {
            None => Override::Keep,
            Some(v) if v.is_empty() => Override::Drop,
            Some(v) => Override::Set(v),
        }
    }
}

impl From<Override> for Option<String> {
    fn from(value: Override) -> Self {
        match value {
            Override::Keep => None,
            Override::Drop => Some(String::new()),
            Override::Set(v) => Some(v),
        }
    }
}

impl Override {
    fn apply(&self, existing: Option<&str>) -> Option<String> {
        match self {
            Override::Keep => existing.map(str::to_string),
            Override::Drop => None,
            Override::Set(v) if v.is_empty() => None,
            Override::Set(v) => Some(v.clone()),
        }
    }

    fn apply_with_suffix(&self, existing: Option<&str>, suffix: &str) -> Option<String> {
        self.apply(existing).map(|v| {
            if v.ends_with(suffix) {
                v
            } else {
                v + suffix
            }
        })
    }

    fn apply_tag(&self, existing: Option<&str>) -> Option<String> {
        self.apply(existing).map(|v| {
            if v.starts_with(':') || v.starts_with('@') {
                v
            } else {
                format!(":{}", v)
            }
        })
    }
}

/// How a rule chooses the tag of the rewritten reference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    /// Tag comes from the rule's tag override
    #[default]
    User,
    /// Tag is generated from the version and a timestamp
    Generated,
}

impl TagType {
    /// Tag type named by a config value; an absent or empty value means [`TagType::User`]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "user" => Some(TagType::User),
            "generated" => Some(TagType::Generated),
            _ => None,
        }
    }
}

/// Environment against which `~` pattern components are resolved
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Address prefix of the cluster's internal registry
    pub internal_registry: String,
    /// Namespace the objects are exported from or imported into
    pub namespace: String,
}

/// A compiled image mapping rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMappingRule {
    pub pattern: ImageRef,
    pub registry: Override,
    pub namespace: Override,
    pub repository: Override,
    pub tag: Override,
    pub tag_type: TagType,
    pub push: bool,
}

impl ImageMappingRule {
    /// Rule matching `pattern` that leaves every component untouched
    pub fn new(pattern: &str) -> Result<Self, XrError> {
        let pattern = ImageRef::parse(pattern)
            .map_err(|e| XrError::config(format!("Invalid image mapping pattern {:?}: {}", pattern, e)))?;
        Ok(Self {
            pattern,
            registry: Override::Keep,
            namespace: Override::Keep,
            repository: Override::Keep,
            tag: Override::Keep,
            tag_type: TagType::User,
            push: true,
        })
    }

    /// Whether every component of `image` satisfies the pattern
    pub fn matches(&self, image: &ImageRef, ctx: &MatchContext) -> bool {
        let pattern = &self.pattern;

        let registry_ok = match pattern.registry.as_deref() {
            Some("*/") => true,
            Some("~/") => image
                .registry
                .as_deref()
                .is_some_and(|r| r.starts_with(&ctx.internal_registry)),
            p => p == image.registry.as_deref(),
        };
        if !registry_ok {
            debug!("ImageMapping pattern ({}) does not match registry host of reference: {}", pattern, image);
            return false;
        }

        let namespace_ok = match pattern.namespace.as_deref() {
            Some("*/") => true,
            Some("~/") => image.namespace.as_deref() == Some(format!("{}/", ctx.namespace).as_str()),
            p => p == image.namespace.as_deref(),
        };
        if !namespace_ok {
            debug!("ImageMapping pattern ({}) does not match namespace of reference: {}", pattern, image);
            return false;
        }

        if pattern.repository != "*" && pattern.repository != image.repository {
            debug!("ImageMapping pattern ({}) does not match repository of reference: {}", pattern, image);
            return false;
        }

        let tag_ok = match pattern.tag.as_deref() {
            Some(":*") => true,
            p => p == image.tag.as_deref(),
        };
        if !tag_ok {
            debug!("ImageMapping pattern ({}) does not match tag of reference: {}", pattern, image);
            return false;
        }

        true
    }

    /// Apply the rule's overrides to a matched reference.
    ///
    /// `generated_tag` is used in place of the tag override when the rule's
    /// tag type is [`TagType::Generated`].
    pub fn rewrite(&self, image: &ImageRef, generated_tag: &str) -> ImageRef {
        let tag = match self.tag_type {
            TagType::User => self.tag.apply_tag(image.tag.as_deref()),
            TagType::Generated => Override::Set(generated_tag.to_string()).apply_tag(None),
        };

        ImageRef {
            registry: self.registry.apply_with_suffix(image.registry.as_deref(), "/"),
            namespace: self.namespace.apply_with_suffix(image.namespace.as_deref(), "/"),
            repository: self
                .repository
                .apply(Some(&image.repository))
                .unwrap_or_default(),
            tag,
        }
    }
}

/// Find the first rule, in declared order, whose pattern matches `image`
pub fn find_rule<'a>(
    rules: &'a [ImageMappingRule],
    image: &ImageRef,
    ctx: &MatchContext,
) -> Option<&'a ImageMappingRule> {
    rules.iter().find(|rule| rule.matches(image, ctx))
}

/// Tag that embeds the version and a millisecond timestamp
pub fn generated_tag(version: &str, timestamp_millis: i64) -> String {
    format!(":{}_{}", version, timestamp_millis)
}

/// Generated tag for `version` at the current time
pub fn generated_tag_now(version: &str) -> String {
    generated_tag(version, chrono::Utc::now().timestamp_millis())
}

/// A registry side effect requested by a rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePush {
    pub source: String,
    pub target: String,
}
