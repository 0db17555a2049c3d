//! xrutil - Versioned export and import of OpenShift objects through git
//!
//! An ObjectRepository ("XR") document describes which objects of a project
//! belong to an application, how they are rewritten on the way out and in,
//! and which git repository holds their snapshots. `export` publishes the
//! selected objects as a version branch; `replace` replays a version branch
//! onto a namespace.
//!
//! ## Core Features
//!
//! - **Selection**: label selectors plus `kind[/name]` include and exclude lists
//! - **Safety gates**: build mutators are refused unless explicitly preserved
//! - **Image remapping**: wildcard rules rewrite container image references
//!   and optionally retag and push the images
//! - **Patches**: `jq` expressions applied to the stored object files
//! - **History**: re-exporting a version commits on top of its previous
//!   snapshot, so `git log` shows what changed between exports
//!
//! ## Modules
//!
//! - [`config`]: XR document parsing and validation
//! - [`kinds`], [`image`], [`tree`]: matching and rewriting primitives
//! - [`transform`]: per-object selection and mutation
//! - [`patch`]: patch filters over the working tree
//! - [`sync`]: the version branch state machine
//! - [`export`], [`replace`]: the two commands

pub mod cluster;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod exec;
pub mod export;
pub mod git;
pub mod image;
pub mod kinds;
pub mod patch;
pub mod registry;
pub mod replace;
pub mod sync;
pub mod transform;
pub mod tree;

pub use collaborators::Collaborators;
pub use config::RepositoryConfig;
pub use error::XrError;
pub use export::{run_export, ExportOptions, ExportSummary};
pub use replace::{run_replace, ReplaceOptions, ReplaceSummary};
pub use sync::{SyncState, VersionedRepoSync, Workspace};
