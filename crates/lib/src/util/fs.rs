//! Filesystem helpers shared by the cache and the executor.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use walkdir::WalkDir;

/// Write `contents` to `path` atomically.
///
/// The data goes to a uniquely named temp file in the same directory and is
/// then renamed over `path`, so readers observe either the old file or the
/// complete new one, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
  let dir = path
    .parent()
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;
  fs::create_dir_all(dir)?;

  let mut temp = tempfile::NamedTempFile::new_in(dir)?;
  temp.write_all(contents)?;
  temp.as_file().sync_all()?;
  temp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Recursively copy `src` into `dest`, skipping entries named in `exclude`.
///
/// Symlinks are recreated rather than followed on Unix and copied as files elsewhere.
pub fn copy_tree(src: &Path, dest: &Path, exclude: &[&str]) -> io::Result<()> {
  fs::create_dir_all(dest)?;

  let walker = WalkDir::new(src).into_iter().filter_entry(|e| {
    e.depth() == 0
      || e
        .file_name()
        .to_str()
        .map(|name| !exclude.contains(&name))
        .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      #[cfg(unix)]
      {
        let link = fs::read_link(entry.path())?;
        std::os::unix::fs::symlink(link, &target)?;
      }
      #[cfg(not(unix))]
      {
        fs::copy(entry.path(), &target)?;
      }
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}
