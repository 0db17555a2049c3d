use thiserror::Error;

/// Fatal conditions that abort an export or replace run.
///
/// Library code returns `anyhow::Result` and attaches context on the way up;
/// one of these variants is always the root cause so callers can tell a bad
/// configuration from a failing collaborator.
#[derive(Error, Debug)]
pub enum XrError {
    /// Invalid or unsupported repository configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A selection or transform rule forbids the requested operation
    #[error("Policy violation: {0}")]
    Policy(String),

    /// An external command (oc, git, jq, docker) failed
    #[error("{operation} failed: {stderr}")]
    Collaborator { operation: String, stderr: String },

    /// Object or image data that cannot be processed
    #[error("Malformed data: {0}")]
    Malformed(String),
}

impl XrError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Find the taxonomy root cause inside an `anyhow` chain
    pub fn find(err: &anyhow::Error) -> Option<&XrError> {
        err.chain().find_map(|cause| cause.downcast_ref::<XrError>())
    }
}
