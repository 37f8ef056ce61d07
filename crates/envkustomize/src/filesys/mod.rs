//! filesystem capability used during composition
//!
//! The composer never touches `std::fs` directly. It is handed a [FileSystem] so the read path can be
//! decorated, see [SubstitutingFileSystem].
mod disk;
mod substituting;

pub use disk::DiskFileSystem;
pub use substituting::SubstitutingFileSystem;

use crate::expand::ExpandError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Callback for [FileSystem::walk], receives each path and whether it is a directory
pub type WalkFn<'a> = dyn FnMut(&Path, bool) -> Result<(), FsError> + 'a;

pub trait FileSystem {
    fn create(&self, path: &Path) -> Result<Box<dyn Write>, FsError>;
    fn open(&self, path: &Path) -> Result<Box<dyn Read>, FsError>;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError>;
    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError>;

    fn mkdir(&self, path: &Path) -> Result<(), FsError>;
    fn mkdir_all(&self, path: &Path) -> Result<(), FsError>;
    fn remove_all(&self, path: &Path) -> Result<(), FsError>;

    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    /// Names of the entries in a directory, sorted
    fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError>;
    /// Absolute and normalized form of a path
    fn cleaned_abs(&self, path: &Path) -> Result<PathBuf, FsError>;
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>, FsError>;
    /// Visit `root` and everything below it in lexical order, parents before children
    fn walk(&self, root: &Path, visit: &mut WalkFn) -> Result<(), FsError>;
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("IO error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid glob pattern {pattern}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("Unable to walk {}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Unable to expand placeholders in {}", path.display())]
    Expand {
        path: PathBuf,
        #[source]
        source: ExpandError,
    },
}

impl FsError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> FsError + '_ {
        move |source| FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
