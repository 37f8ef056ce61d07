mod cli;

use anyhow::Context;
use envkustomize::compose::ResourceListComposer;
use envkustomize::render::{RenderOptions, Renderer};
use envkustomize::secrets::GcpSecretManager;
use envkustomize::store::VariableStore;
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log filter, defaults to `warn`
const LOG_ENV: &str = "ENVKUSTOMIZE_LOG";

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var(LOG_ENV)
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let command_result = enter_directories(&cli.directory).and_then(|()| match cli.command {
        cli::Command::Render(render_cli) => render(render_cli),
    });

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

/// Apply every `-C` in order, each relative to the previous one
fn enter_directories(directories: &[PathBuf]) -> anyhow::Result<()> {
    for directory in directories {
        let workdir = directory
            .canonicalize()
            .with_context(|| format!("Failed to resolve -C/--directory {}", directory.display()))?;
        std::env::set_current_dir(&workdir)
            .with_context(|| format!("Failed to enter {}", workdir.display()))?;

        tracing::debug!(directory=%workdir.display(), "entered work directory");
    }
    Ok(())
}

pub fn render(cli: cli::RenderCommand) -> anyhow::Result<()> {
    let options = RenderOptions {
        env_file: cli.env_file,
        output: cli.output,
        scope: RenderOptions::scope_from_env(),
    };

    println!(
        "kubectl-envkustomize {} loading env file {}\n",
        env!("CARGO_PKG_VERSION"),
        options.env_file.display()
    );

    let composer = ResourceListComposer;
    let secret_manager = GcpSecretManager;
    let mut renderer = Renderer::new(&composer);
    if !cli.no_secrets {
        renderer = renderer.with_secrets(&secret_manager);
    }

    let workdir = std::env::current_dir()?;
    let output = renderer.render(
        &workdir,
        &options,
        VariableStore::from_env(),
        &mut std::io::stdout(),
    )?;

    println!("Rendered manifests written to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn directories_are_entered_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("deploy/prod")).unwrap();

        enter_directories(&[dir.path().join("deploy"), PathBuf::from("prod")]).unwrap();

        assert_eq!(
            std::env::current_dir().unwrap(),
            dir.path().join("deploy/prod").canonicalize().unwrap()
        );
    }

    #[test]
    fn missing_directory_is_an_error() {
        let err = enter_directories(&[PathBuf::from("/does/not/exist")]).unwrap_err();

        assert!(err.to_string().contains("-C/--directory"), "{err:#}");
    }
}
