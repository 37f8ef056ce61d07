use super::{FileSystem, FsError, WalkFn};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The local disk
#[derive(Default, Debug, Clone, Copy)]
pub struct DiskFileSystem;

impl FileSystem for DiskFileSystem {
    fn create(&self, path: &Path) -> Result<Box<dyn Write>, FsError> {
        let file = std::fs::File::create(path).map_err(FsError::io(path))?;
        Ok(Box::new(file))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read>, FsError> {
        let file = std::fs::File::open(path).map_err(FsError::io(path))?;
        Ok(Box::new(file))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        std::fs::read(path).map_err(FsError::io(path))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FsError> {
        std::fs::write(path, data).map_err(FsError::io(path))
    }

    fn mkdir(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir(path).map_err(FsError::io(path))
    }

    fn mkdir_all(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir_all(path).map_err(FsError::io(path))
    }

    fn remove_all(&self, path: &Path) -> Result<(), FsError> {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };

        match result {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other.map_err(FsError::io(path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
        let mut names = vec![];
        for entry in std::fs::read_dir(path).map_err(FsError::io(path))? {
            let entry = entry.map_err(FsError::io(path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn cleaned_abs(&self, path: &Path) -> Result<PathBuf, FsError> {
        path.canonicalize().map_err(FsError::io(path))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>, FsError> {
        let paths = glob::glob(pattern).map_err(|source| FsError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        paths
            .map(|entry| {
                entry.map_err(|e| FsError::Io {
                    path: e.path().to_path_buf(),
                    source: e.into_error(),
                })
            })
            .collect()
    }

    fn walk(&self, root: &Path, visit: &mut WalkFn) -> Result<(), FsError> {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| FsError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            visit(entry.path(), entry.file_type().is_dir())?;
        }
        Ok(())
    }
}
