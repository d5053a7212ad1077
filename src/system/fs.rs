//! File system utilities

use filetime::FileTime;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::system::{self, Error};

/// Convenience wrapper for std::fs::create_dir_all
pub fn ensure_directory<P>(path: P) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if path.exists() {
        return Ok(());
    }
    system::verboseln!("Creating", "{}", path.display());
    std::fs::create_dir_all(path).map_err(|e| Error::CreateDirectory(path.display().to_string(), e))
}

/// Convenience wrapper for std::fs::remove_file
pub fn remove_file<P>(path: P) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Ok(());
    }
    std::fs::remove_file(path).map_err(|e| Error::RemoveFile(path.display().to_string(), e))
}

/// Convenience wrapper for std::fs::read_to_string
pub fn read_file<P>(path: P) -> Result<String, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|e| Error::ReadFile(path.display().to_string(), e))
}

/// Wrapper for File::open
pub fn open<P>(path: P) -> Result<File, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    File::open(path).map_err(|e| Error::ReadFile(path.display().to_string(), e))
}

/// Convenience wrapper for std::fs::write
pub fn write_file<P, S>(path: P, content: S) -> Result<(), Error>
where
    P: AsRef<Path>,
    S: AsRef<[u8]>,
{
    let path = path.as_ref();
    std::fs::write(path, content).map_err(|e| Error::WriteFile(path.display().to_string(), e))
}

pub fn create<P>(path: P) -> Result<File, Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    File::create(path).map_err(|e| Error::WriteFile(path.display().to_string(), e))
}

/// Create a file exclusively, failing if it already exists.
///
/// Used for the `<output>.lock` sentinel: only one process may win the create.
pub fn create_new<P>(path: P) -> std::io::Result<File>
where
    P: AsRef<Path>,
{
    std::fs::OpenOptions::new().write(true).create_new(true).open(path)
}

/// Get the modified time for a file, or `None` if it doesn't exist.
pub fn modified_time<P>(path: P) -> Option<FileTime>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    path.metadata().ok().map(|m| FileTime::from_last_modification_time(&m))
}

pub trait PathExt {
    /// Resolve symlinks and return an absolute path, mapping errors to our own.
    fn canonicalize2(&self) -> Result<PathBuf, Error>;

    /// Canonical key used to index the compile database: symlink-resolved, case-folded.
    fn canonical_key(&self) -> Result<String, Error>;

    /// Get the relative path from base to self. Base must be an absolute path.
    fn from_base<P>(&self, base: P) -> PathBuf
    where
        P: AsRef<Path>;
}

impl<P> PathExt for P
where
    P: AsRef<Path>,
{
    fn canonicalize2(&self) -> Result<PathBuf, Error> {
        dunce::canonicalize(self).map_err(|e| Error::InvalidPath(self.as_ref().display().to_string(), e))
    }

    fn canonical_key(&self) -> Result<String, Error> {
        let canonical = self.canonicalize2()?;
        Ok(canonical.display().to_string().to_lowercase())
    }

    fn from_base<PBase>(&self, base: PBase) -> PathBuf
    where
        PBase: AsRef<Path>,
    {
        let path = self.as_ref();
        let base = base.as_ref();
        pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
    }
}
