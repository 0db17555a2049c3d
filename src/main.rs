use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xrutil::config::DEFAULT_INTERNAL_REGISTRY;
use xrutil::{
    run_export, run_replace, Collaborators, ExportOptions, ExportSummary, ReplaceOptions, ReplaceSummary,
    RepositoryConfig,
};

#[derive(Parser)]
#[command(name = "xrutil")]
#[command(about = "Export and import OpenShift objects through versioned git branches")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep the temporary git working directory for inspection
    #[arg(long, global = true)]
    preserve_git: bool,

    /// Address prefix of the cluster's internal image registry
    #[arg(long, global = true, default_value = DEFAULT_INTERNAL_REGISTRY)]
    internal_registry: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Export objects from the current project to a version branch
    Export {
        /// Path to the ObjectRepository file
        xr_file: String,

        /// Version to export
        #[arg(long = "to")]
        version: Option<String>,

        /// Message for the commit
        #[arg(long)]
        message: Option<String>,

        /// Permit overwriting an existing version branch
        #[arg(long)]
        overwrite: bool,
    },

    /// Import a version branch into a namespace
    Replace {
        /// Path to the ObjectRepository file
        #[arg(long = "config")]
        xr_file: String,

        /// Version to import
        #[arg(long = "from")]
        version: Option<String>,

        /// Target namespace if not the current project
        #[arg(long)]
        target_namespace: Option<String>,

        /// Name prefix for the objects being created
        #[arg(long)]
        name_prefix: Option<String>,

        /// Extra labels for the objects being created (key=value,...)
        #[arg(long)]
        labels: Option<String>,

        /// Remove objects previously imported from this repository first
        #[arg(long)]
        clean: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting xrutil v{}", env!("CARGO_PKG_VERSION"));

    let collaborators = Collaborators::system();

    match cli.command {
        Commands::Export {
            xr_file,
            version,
            message,
            overwrite,
        } => {
            let config = load_config(&xr_file)?;
            let options = ExportOptions {
                version,
                message,
                overwrite,
                preserve_workspace: cli.preserve_git,
                internal_registry: cli.internal_registry,
            };
            let summary = run_export(&config, &collaborators, &options).await?;
            print_export_summary(&summary);
        }
        Commands::Replace {
            xr_file,
            version,
            target_namespace,
            name_prefix,
            labels,
            clean,
        } => {
            let config = load_config(&xr_file)?;
            let options = ReplaceOptions {
                version,
                target_namespace,
                name_prefix,
                labels,
                clean,
                preserve_workspace: cli.preserve_git,
                internal_registry: cli.internal_registry,
            };
            let summary = run_replace(&config, &collaborators, &options).await?;
            print_replace_summary(&summary);
        }
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load the XR file, expanding `~` and environment variables in its path
fn load_config(xr_file: &str) -> Result<RepositoryConfig> {
    let expanded = shellexpand::full(xr_file)
        .with_context(|| format!("Failed to expand XR file path: {}", xr_file))?;
    RepositoryConfig::load(&PathBuf::from(expanded.as_ref()))
        .context("Unable to load configuration")
}

fn print_export_summary(summary: &ExportSummary) {
    println!("🎉 Export complete!");
    println!("   🌿 Branch: {} (version {})", summary.branch, summary.version);
    println!("   🏷️  Generated tag: {}", summary.generated_tag);
    println!("   📦 Objects exported: {}", summary.exported.len());
    println!("   ⏭️  Objects skipped: {}", summary.skipped);
    println!("   🐳 Images pushed: {}", summary.images_pushed);
    println!("   🩹 Patches applied: {}", summary.patches_applied);
    if let Some(workspace) = &summary.workspace {
        println!("   📁 Working directory: {}", workspace.display());
    }
}

fn print_replace_summary(summary: &ReplaceSummary) {
    println!("🎉 Replace complete!");
    println!("   🌿 Branch: {} (version {})", summary.branch, summary.version);
    println!("   🎯 Namespace: {}", summary.namespace);
    println!("   📦 Objects replaced: {}", summary.replaced.len());
    println!("   ⏭️  Objects skipped: {}", summary.skipped);
    println!("   🩹 Patches applied: {}", summary.patches_applied);
    if let Some(workspace) = &summary.workspace {
        println!("   📁 Working directory: {}", workspace.display());
    }
}
