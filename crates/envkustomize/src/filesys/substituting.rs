use super::{FileSystem, FsError, WalkFn};
use crate::expand::Substitution;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Decorates a [FileSystem] so that [FileSystem::read_file] returns substituted content
///
/// Every other operation (including [FileSystem::open]) is forwarded untouched.
#[derive(derive_new::new, Debug, Clone)]
pub struct SubstitutingFileSystem<F, S> {
    wrapped: F,
    substitution: S,
}

impl<F: FileSystem, S: Substitution> FileSystem for SubstitutingFileSystem<F, S> {
    fn create(&self, path: &Path) -> Result<Box<dyn Write>, FsError> {
        self.wrapped.create(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read>, FsError> {
        self.wrapped.open(path)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        let data = self.wrapped.read_file(path)?;
        tracing::trace!(path=%path.display(), "substituting");

        self.substitution
            .substitute(&data)
            .map_err(|source| FsError::Expand {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        self.wrapped.write_file(path, data)
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        self.wrapped.mkdir(path)
    }

    fn mkdir_all(&self, path: &Path) -> Result<(), FsError> {
        self.wrapped.mkdir_all(path)
    }

    fn remove_all(&self, path: &Path) -> Result<(), FsError> {
        self.wrapped.remove_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.wrapped.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.wrapped.is_dir(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        self.wrapped.read_dir(path)
    }

    fn cleaned_abs(&self, path: &Path) -> Result<PathBuf, FsError> {
        self.wrapped.cleaned_abs(path)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>, FsError> {
        self.wrapped.glob(pattern)
    }

    fn walk(&self, root: &Path, visit: &mut WalkFn) -> Result<(), FsError> {
        self.wrapped.walk(root, visit)
    }
}
