//! Registry client used to publish remapped images

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::exec;
use crate::image::ImagePush;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Tag the local image `source` as `target`
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// Push `reference` to its registry
    async fn push(&self, reference: &str) -> Result<()>;
}

/// [`RegistryClient`] backed by the `docker` command line client
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RegistryClient for DockerCli {
    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        exec::run("docker", &["tag", source, target], None).await?;
        Ok(())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        exec::run("docker", &["push", reference], None).await?;
        Ok(())
    }
}

/// Tag and push every requested image, skipping exact duplicates
pub async fn publish_images(registry: &dyn RegistryClient, pushes: &[ImagePush]) -> Result<usize> {
    let mut published: Vec<&ImagePush> = Vec::new();

    for push in pushes {
        if published.contains(&push) {
            continue;
        }

        info!("Pushing image {} as {}", push.source, push.target);
        registry
            .tag(&push.source, &push.target)
            .await
            .with_context(|| format!("Error tagging docker image ({}) as ({})", push.source, push.target))?;
        registry.push(&push.target).await.with_context(|| {
            format!(
                "Error pushing docker image ({}) as newly tagged ({}); make sure you are logged into the destination registry",
                push.source, push.target
            )
        })?;

        published.push(push);
    }

    Ok(published.len())
}
