//! the render pipeline
//!
//! 1. load the variable definition file into the [VariableStore] (failure is only a warning)
//! 2. report the variables in scope, sensitive values masked
//! 3. find the composition roots
//! 4. compose each root through a [SubstitutingFileSystem] and concatenate the results
//! 5. write the output file
//!
//! Any error after step 1 aborts the run before anything is written.
use crate::compose::{find_descriptor, ComposeError, Composer};
use crate::definitions::DefinitionLoader;
use crate::expand::Expander;
use crate::filesys::{DiskFileSystem, FileSystem, FsError, SubstitutingFileSystem};
use crate::secrets::SecretBackend;
use crate::store::VariableStore;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_OUTPUT: &str = "rendered.yaml";

/// Variable holding the name prefix of the variables that belong to the rendered environment
pub const SCOPE_ENV: &str = "ENV_KUBECTL_PREFIX";

const DOCUMENT_SEPARATOR: &str = "---\n";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// definition file, relative to the work directory
    pub env_file: PathBuf,
    /// output file, relative to the work directory
    pub output: PathBuf,
    pub scope: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            env_file: DEFAULT_ENV_FILE.into(),
            output: DEFAULT_OUTPUT.into(),
            scope: None,
        }
    }
}

impl RenderOptions {
    /// Read the scope from [SCOPE_ENV], an empty value counts as unset
    pub fn scope_from_env() -> Option<String> {
        std::env::var(SCOPE_ENV).ok().filter(|scope| !scope.is_empty())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Unable to write report")]
    Report(#[source] std::io::Error),
    #[error("Error iterating through directories")]
    Discover(#[source] FsError),
    #[error("No kustomization found in {} or any directory below", workdir.display())]
    NoRoots { workdir: PathBuf },
    #[error("Error building kustomize manifests in {}", root.display())]
    Compose {
        root: PathBuf,
        #[source]
        source: ComposeError,
    },
    #[error("Error writing {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: FsError,
    },
}

#[derive(derive_new::new)]
pub struct Renderer<'a> {
    composer: &'a dyn Composer,
    #[new(default)]
    secrets: Option<&'a dyn SecretBackend>,
}

impl<'a> Renderer<'a> {
    /// Resolve secret references while loading variables
    pub fn with_secrets(mut self, backend: &'a dyn SecretBackend) -> Self {
        self.secrets = Some(backend);
        self
    }

    /// Run the whole pipeline in `workdir`, returns the path of the written output
    ///
    /// `store` is the starting point (usually [VariableStore::from_env]), the variable listing is written
    /// to `report`.
    pub fn render(
        &self,
        workdir: &Path,
        options: &RenderOptions,
        mut store: VariableStore,
        report: &mut dyn Write,
    ) -> Result<PathBuf, RenderError> {
        load_variables(&mut store, &workdir.join(&options.env_file), self.secrets);
        write_listing(report, &store, options.scope.as_deref()).map_err(RenderError::Report)?;

        let expander = Expander::new(&store).with_scope(options.scope.as_deref());
        let fs = SubstitutingFileSystem::new(DiskFileSystem, expander);

        let roots = discover_roots(&fs, workdir)?;
        if roots.is_empty() {
            return Err(RenderError::NoRoots {
                workdir: workdir.to_path_buf(),
            });
        }

        let rendered = build(&fs, self.composer, &roots)?;

        let output = workdir.join(&options.output);
        fs.write_file(&output, rendered.as_bytes())
            .map_err(|source| RenderError::Write {
                path: output.clone(),
                source,
            })?;

        Ok(output)
    }
}

/// Load a definition file into `store`
///
/// A failure is logged and otherwise ignored, the run goes on with whatever was loaded so far.
pub fn load_variables(
    store: &mut VariableStore,
    path: &Path,
    secrets: Option<&dyn SecretBackend>,
) -> bool {
    let mut loader = DefinitionLoader::new(store);
    if let Some(backend) = secrets {
        loader = loader.with_secrets(backend);
    }

    match loader.load(path) {
        Ok(()) => true,
        Err(err) => {
            let err = anyhow::Error::new(err);
            tracing::warn!("unable to load env file {}: {err:#}", path.display());
            false
        }
    }
}

fn write_listing(
    report: &mut dyn Write,
    store: &VariableStore,
    scope: Option<&str>,
) -> std::io::Result<()> {
    if scope.is_none() {
        tracing::warn!(
            "{SCOPE_ENV} is not set, all environment variables are in scope. Set it to avoid conflicts with unrelated variables."
        );
    }

    writeln!(
        report,
        "Environment variables with prefix '{}'",
        scope.unwrap_or_default()
    )?;
    for line in store.listing(scope) {
        writeln!(report, "  - {line}")?;
    }
    writeln!(report)
}

/// Composition roots below `workdir`
///
/// `workdir` itself when it holds a root descriptor, otherwise every directory below it that does.
pub fn discover_roots(fs: &dyn FileSystem, workdir: &Path) -> Result<Vec<PathBuf>, RenderError> {
    if find_descriptor(fs, workdir).is_some() {
        return Ok(vec![workdir.to_path_buf()]);
    }

    let mut roots = vec![];
    fs.walk(workdir, &mut |path, is_dir| {
        if is_dir && path != workdir && find_descriptor(fs, path).is_some() {
            roots.push(path.to_path_buf());
        }
        Ok(())
    })
    .map_err(RenderError::Discover)?;

    Ok(roots)
}

/// Compose every root and concatenate the results, each followed by a `---` line
pub fn build(
    fs: &dyn FileSystem,
    composer: &dyn Composer,
    roots: &[PathBuf],
) -> Result<String, RenderError> {
    let mut rendered = String::new();

    for root in roots {
        tracing::info!(root=%root.display(), "building kustomize manifests");
        let compose_error = |source| RenderError::Compose {
            root: root.clone(),
            source,
        };

        let yaml = composer
            .compose(fs, root)
            .and_then(|resources| resources.as_yaml())
            .map_err(compose_error)?;

        rendered.push_str(&yaml);
        if !yaml.is_empty() && !yaml.ends_with('\n') {
            rendered.push('\n');
        }
        rendered.push_str(DOCUMENT_SEPARATOR);
    }

    Ok(rendered)
}
