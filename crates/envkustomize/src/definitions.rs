//! loading of variable definition files (`.env`)
//!
//! A definition file is a restricted shell script:
//! ```text
//! # comments, also trailing ones
//! source ../common.env      # relative to this file
//! export APP_NAME=shop
//! APP_URL="https://${APP_NAME}.example.org"
//! APP_DB_PASS=gcp-secret://projects/p/secrets/db-pass
//! ```
//!
//! Lines are processed top to bottom and assigned to a [VariableStore] right away, so later lines (and
//! included files) can refer to earlier ones with `$NAME` or `${NAME}`.
use crate::secrets::{self, SecretBackend};
use crate::store::VariableStore;
use indexmap::IndexSet;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const SOURCE_DIRECTIVE: &str = "source ";
const EXPORT_KEYWORD: &str = "export ";

/// `$NAME` or `${NAME}`
static SHELL_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("shell variable pattern must compile")
});

/// A single meaningful line of a definition file
#[derive(Debug, PartialEq)]
pub enum Definition<'l> {
    Source(&'l str),
    Assignment { name: &'l str, value: &'l str },
}

impl<'l> Definition<'l> {
    /// Parse an already comment-stripped and trimmed line
    ///
    /// Returns `None` when the line lacks a `=` or the name is empty.
    pub fn parse(line: &'l str) -> Option<Self> {
        if let Some(path) = line.strip_prefix(SOURCE_DIRECTIVE) {
            return Some(Definition::Source(path.trim()));
        }

        let assignment = match line.strip_prefix(EXPORT_KEYWORD) {
            Some(rest) => rest.trim(),
            None => line,
        };

        let (name, value) = assignment.split_once('=')?;
        if name.is_empty() {
            return None;
        }
        Some(Definition::Assignment { name, value })
    }
}

#[derive(derive_new::new)]
pub struct DefinitionLoader<'s> {
    store: &'s mut VariableStore,
    #[new(default)]
    secrets: Option<&'s dyn SecretBackend>,
    /// files currently being loaded, outermost first
    #[new(default)]
    include_stack: IndexSet<PathBuf>,
}

impl<'s> DefinitionLoader<'s> {
    /// Resolve secret references of each value through `backend`
    pub fn with_secrets(mut self, backend: &'s dyn SecretBackend) -> Self {
        self.secrets = Some(backend);
        self
    }

    pub fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        tracing::info!(path=%path.display(), "sourcing environment variables");

        let key = path.canonicalize().map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if self.include_stack.contains(&key) {
            return Err(LoadError::IncludeCycle {
                path: path.to_path_buf(),
                chain: self.include_stack.iter().cloned().collect(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.include_stack.insert(key);
        let result = self.load_lines(path, &contents);
        self.include_stack.pop();

        result
    }

    fn load_lines(&mut self, path: &Path, contents: &str) -> Result<(), LoadError> {
        for (index, raw_line) in contents.lines().enumerate() {
            let line = strip_comment(raw_line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let definition = Definition::parse(line).ok_or_else(|| LoadError::InvalidLine {
                path: path.to_path_buf(),
                line_number: index + 1,
                line: line.to_string(),
            })?;

            match definition {
                Definition::Source(included) => {
                    let base = path.parent().unwrap_or_else(|| Path::new(""));
                    self.load(&base.join(included))?;
                }
                Definition::Assignment { name, value } => {
                    let value = self.resolve_value(value).map_err(|source| LoadError::Secret {
                        path: path.to_path_buf(),
                        line_number: index + 1,
                        source,
                    })?;
                    self.store.set(name, value);
                }
            }
        }

        Ok(())
    }

    fn resolve_value(&self, raw: &str) -> Result<String, secrets::SecretError> {
        let value = expand_variables(strip_quotes(raw), &*self.store);

        match self.secrets {
            Some(backend) => secrets::resolve_all(backend, &value),
            None => Ok(value),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Unable to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid line {line_number} in {}: {line}", path.display())]
    InvalidLine {
        path: PathBuf,
        line_number: usize,
        line: String,
    },
    #[error("{} sources itself (via {chain:?})", path.display())]
    IncludeCycle { path: PathBuf, chain: Vec<PathBuf> },
    #[error("Unable to resolve secret on line {line_number} in {}", path.display())]
    Secret {
        path: PathBuf,
        line_number: usize,
        #[source]
        source: secrets::SecretError,
    },
}

/// Cut a line at the first `#` that is not escaped as `\#`
fn strip_comment(line: &str) -> String {
    let mut stripped = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'#') => {
                stripped.push('#');
                chars.next();
            }
            '#' => break,
            c => stripped.push(c),
        }
    }

    stripped
}

/// Remove one pair of matching surrounding quotes
fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Shell style expansion of `$NAME` and `${NAME}`, unknown names expand to nothing
pub fn expand_variables(value: &str, store: &VariableStore) -> String {
    SHELL_VARIABLE
        .replace_all(value, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            store.get(name).unwrap_or_default().to_string()
        })
        .into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::secrets::test::FakeBackend;
    use pretty_assertions::assert_eq;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn load(path: &Path) -> Result<VariableStore, LoadError> {
        let mut store = VariableStore::default();
        DefinitionLoader::new(&mut store).load(path)?;
        Ok(store)
    }

    #[test]
    fn parse_lines() {
        assert_eq!(
            Definition::parse("export A=b=c"),
            Some(Definition::Assignment {
                name: "A",
                value: "b=c"
            })
        );
        assert_eq!(
            Definition::parse("source  ./x.env"),
            Some(Definition::Source("./x.env"))
        );
        assert_eq!(Definition::parse("not an assignment"), None);
        assert_eq!(Definition::parse("=nameless"), None);
    }

    #[test]
    fn comments_and_quotes() {
        assert_eq!(strip_comment("A=1 # trailing"), "A=1 ");
        assert_eq!(strip_comment(r"COLOR=\#fff # white"), "COLOR=#fff ");
        assert_eq!(strip_quotes("'single'"), "single");
        assert_eq!(strip_quotes("\"double\""), "double");
        assert_eq!(strip_quotes("'mismatched\""), "'mismatched\"");
        assert_eq!(strip_quotes("\"\"inner\"\""), "\"inner\"");
    }

    #[test]
    fn assignments() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            ".env",
            "# header\n\nFOO=bar\nexport DB_PASS='s3cr3t'\nURL=\"http://${FOO}:$PORT/x\"\nFOO=baz # override\n",
        );

        let store = load(&path).unwrap();
        assert_eq!(store.get("FOO"), Some("baz"));
        assert_eq!(store.get("DB_PASS"), Some("s3cr3t"));
        assert_eq!(store.get("URL"), Some("http://bar:/x"));
    }

    #[test]
    fn source_is_relative_and_transitive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/.env", "source ../b/b.env\nA=1\nFROM_C=$C\n");
        write(dir.path(), "b/b.env", "source nested/c.env\nB=2\n");
        write(dir.path(), "b/nested/c.env", "C=3\n");

        let store = load(&dir.path().join("a/.env")).unwrap();
        assert_eq!(store.get("A"), Some("1"));
        assert_eq!(store.get("B"), Some("2"));
        assert_eq!(store.get("C"), Some("3"));
        assert_eq!(store.get("FROM_C"), Some("3"));
    }

    #[test]
    fn sourcing_twice_is_not_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "common.env", "N=${N}x\n");
        let path = write(dir.path(), ".env", "source common.env\nsource common.env\n");

        let store = load(&path).unwrap();
        assert_eq!(store.get("N"), Some("xx"));
    }

    #[test]
    fn include_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.env", "source b.env\n");
        let path = write(dir.path(), "b.env", "source a.env\n");

        let err = load(&path).unwrap_err();
        assert!(matches!(err, LoadError::IncludeCycle { .. }), "{err:?}");
    }

    #[test]
    fn invalid_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), ".env", "A=1\njust words\n");

        let err = load(&path).unwrap_err();
        let LoadError::InvalidLine {
            line_number, line, ..
        } = err
        else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(line_number, 2);
        assert_eq!(line, "just words");
    }

    #[test]
    fn missing_file() {
        let err = load(Path::new("/definitely/not/here.env")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn secrets_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), ".env", "TOKEN=gcp-secret://projects/p/secrets/token\n");
        let backend = FakeBackend::with("projects/p/secrets/token/versions/latest", b"t0k3n");

        let store = load(&path).unwrap();
        assert_eq!(store.get("TOKEN"), Some("gcp-secret://projects/p/secrets/token"));

        let mut store = VariableStore::default();
        DefinitionLoader::new(&mut store)
            .with_secrets(&backend)
            .load(&path)
            .unwrap();
        assert_eq!(store.get("TOKEN"), Some("t0k3n"));
    }

    #[test]
    fn secret_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), ".env", "A=1\nTOKEN=gcp-secret://missing\nB=2\n");
        let backend = FakeBackend::default();

        let mut store = VariableStore::default();
        let err = DefinitionLoader::new(&mut store)
            .with_secrets(&backend)
            .load(&path)
            .unwrap_err();

        assert!(matches!(err, LoadError::Secret { line_number: 2, .. }));
        assert_eq!(store.get("A"), Some("1"));
        assert!(!store.contains("B"));
    }
}
