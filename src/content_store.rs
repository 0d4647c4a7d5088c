//! Uniform read-only interface over the two iWork container shapes: a ZIP
//! archive (modern zipped package) or a filesystem directory (modern
//! bundle).

use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use zip::ZipArchive;

use crate::error::{Error, Result};

/// Capability contract both backends satisfy. Ordering of `list` is
/// unspecified in general but must be stable within one process run and
/// sorted lexicographically by path, since the two-pass IWA merge protocol
/// depends on a deterministic file order.
pub trait ContentStore: Send + Sync {
    /// Reads one entry verbatim. Fails with [`Error::EntryNotFound`] if no
    /// entry exists at `path`, or [`Error::EntryReadFailed`] if the entry
    /// exists but could not be read in full.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Uncompressed size of the entry, in bytes. Same error contract as
    /// [`ContentStore::read`].
    fn size(&self, path: &str) -> Result<u64>;

    /// Whether an entry exists at `path`.
    fn contains(&self, path: &str) -> bool;

    /// Every entry path ending with `suffix`, sorted lexicographically.
    fn list(&self, suffix: &str) -> Vec<String>;
}

/// ZIP-backed store over an in-memory archive.
///
/// `zip::ZipArchive` requires `&mut self` to read an entry, so the archive
/// is kept behind a mutex rather than re-opened per call; this also
/// satisfies the "guarded by a mutual-exclusion primitive" requirement for
/// concurrent `read`/`size`/`contains` calls.
pub struct ZipBackend {
    archive: Mutex<ZipArchive<Cursor<Vec<u8>>>>,
    names: Vec<String>,
}

impl ZipBackend {
    /// Opens a ZIP-backed store over the given archive bytes.
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(data))
            .map_err(|e| Error::InvalidArchiveStructure { reason: e.to_string() })?;
        let mut names: Vec<String> = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
            .collect();
        names.sort();
        Ok(ZipBackend { archive: Mutex::new(archive), names })
    }
}

/// Maps a `by_name` lookup failure to `EntryNotFound` and any other zip
/// error to `EntryReadFailed`, so callers can tell "doesn't exist" apart
/// from "exists but couldn't be read".
fn zip_lookup_error(path: &str, err: zip::result::ZipError) -> Error {
    match err {
        zip::result::ZipError::FileNotFound => Error::EntryNotFound { path: path.to_string() },
        _ => Error::EntryReadFailed { path: path.to_string() },
    }
}

impl ContentStore for ZipBackend {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock();
        let mut entry = archive.by_name(path).map_err(|e| zip_lookup_error(path, e))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .map_err(|_| Error::EntryReadFailed { path: path.to_string() })?;
        Ok(buf)
    }

    fn size(&self, path: &str) -> Result<u64> {
        let mut archive = self.archive.lock();
        let entry = archive.by_name(path).map_err(|e| zip_lookup_error(path, e))?;
        Ok(entry.size())
    }

    fn contains(&self, path: &str) -> bool {
        let mut archive = self.archive.lock();
        archive.by_name(path).is_ok()
    }

    fn list(&self, suffix: &str) -> Vec<String> {
        self.names.iter().filter(|n| n.ends_with(suffix)).cloned().collect()
    }
}

/// Directory-backed store walking a root directory recursively.
pub struct DirectoryBackend {
    root: PathBuf,
    handle: Mutex<()>,
    entries: Vec<String>,
}

impl DirectoryBackend {
    /// Opens a directory-backed store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        walk(&root, &root, &mut entries, &mut seen)?;
        entries.sort();
        Ok(DirectoryBackend { root, handle: Mutex::new(()), entries })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn walk(
    root: &Path,
    dir: &Path,
    out: &mut Vec<String>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return Ok(()),
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out, seen)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if seen.insert(rel_str.clone()) {
                out.push(rel_str);
            }
        }
    }
    Ok(())
}

/// Maps a filesystem error to `EntryNotFound` when the underlying I/O error
/// is `NotFound`, and `EntryReadFailed` for any other failure (permissions,
/// I/O errors on an entry that does exist).
fn fs_lookup_error(path: &str, err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::EntryNotFound { path: path.to_string() },
        _ => Error::EntryReadFailed { path: path.to_string() },
    }
}

impl ContentStore for DirectoryBackend {
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let _guard = self.handle.lock();
        fs::read(self.resolve(path)).map_err(|e| fs_lookup_error(path, e))
    }

    fn size(&self, path: &str) -> Result<u64> {
        let _guard = self.handle.lock();
        fs::metadata(self.resolve(path)).map(|m| m.len()).map_err(|e| fs_lookup_error(path, e))
    }

    fn contains(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn list(&self, suffix: &str) -> Vec<String> {
        self.entries.iter().filter(|n| n.ends_with(suffix)).cloned().collect()
    }
}
