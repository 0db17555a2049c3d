use crate::error::XrError;
use std::fmt;
use std::str::FromStr;

/// A container image reference split into its components.
///
/// Registry and namespace keep their trailing `/`, the tag keeps its leading
/// `:` (or `@` for a digest), so formatting is plain concatenation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
}

impl ImageRef {
    /// Parse `[registry/][namespace/]repository[:tag|@digest]`
    pub fn parse(reference: &str) -> Result<Self, XrError> {
        let invalid = || XrError::malformed(format!("Invalid docker image reference: {:?}", reference));

        let segments: Vec<&str> = reference.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid());
        }

        let (registry, namespace, repository) = match segments.as_slice() {
            [registry, namespace, repository] => (
                Some(format!("{}/", registry)),
                Some(format!("{}/", namespace)),
                *repository,
            ),
            [first, repository] if first.contains(['.', ':']) => {
                (Some(format!("{}/", first)), None, *repository)
            }
            [namespace, repository] => (None, Some(format!("{}/", namespace)), *repository),
            [repository] => (None, None, *repository),
            _ => return Err(invalid()),
        };

        let (repository, tag) = if let Some((repo, digest)) = repository.split_once('@') {
            (repo, Some(format!("@{}", digest)))
        } else if let Some((repo, tag)) = repository.split_once(':') {
            (repo, Some(format!(":{}", tag)))
        } else {
            (repository, None)
        };

        if repository.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            registry,
            namespace,
            repository: repository.to_string(),
            tag,
        })
    }

    pub fn registry(&self) -> &str {
        self.registry.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.registry(),
            self.namespace(),
            self.repository,
            self.tag()
        )
    }
}

impl FromStr for ImageRef {
    type Err = XrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
