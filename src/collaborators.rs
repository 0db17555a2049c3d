use std::sync::Arc;

use crate::cluster::{Cluster, OcClient};
use crate::git::{GitCli, VersionControl};
use crate::patch::{JqFilter, PatchFilter};
use crate::registry::{DockerCli, RegistryClient};

/// External tools a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub cluster: Arc<dyn Cluster>,
    pub git: Arc<dyn VersionControl>,
    pub patch_filter: Arc<dyn PatchFilter>,
    pub registry: Arc<dyn RegistryClient>,
}

impl Collaborators {
    /// The command line clients found on `PATH` (`oc`, `git`, `jq`, `docker`)
    pub fn system() -> Self {
        Self {
            cluster: Arc::new(OcClient::new()),
            git: Arc::new(GitCli::new()),
            patch_filter: Arc::new(JqFilter::new()),
            registry: Arc::new(DockerCli::new()),
        }
    }
}
