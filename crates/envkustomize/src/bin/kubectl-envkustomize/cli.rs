//! kubectl-envkustomize cli interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Kustomize with env support", long_about = None)]
pub struct Cli {
    /// Run in <directory> instead of the current directory
    ///
    /// Repeated values are applied in order, each one relative to the
    /// previous, so `-C deploy -C prod` renders in deploy/prod.
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render kustomize manifests
    ///
    /// Renders the kustomization in the work directory, or every
    /// kustomization below it, into a single file. Placeholders are
    /// replaced with the variables of the env file.
    ///
    /// Set ENV_KUBECTL_PREFIX to limit the variables that are listed
    /// and used for env-expand:// placeholders.
    Render(RenderCommand),
}

#[derive(Parser, Debug)]
pub struct RenderCommand {
    /// Path to the environment file
    #[clap(short = 'e', long = "env-file", default_value = envkustomize::render::DEFAULT_ENV_FILE)]
    pub env_file: PathBuf,

    /// Path of the rendered output
    #[clap(short = 'o', long = "output", default_value = envkustomize::render::DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Keep gcp-secret:// references as they are instead of fetching them
    #[clap(long = "no-secrets")]
    pub no_secrets: bool,
}
