use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

use crate::executor::ExecutorError;

/// Upper bound on the bytes an archive may expand to.
pub(crate) const MAX_UNPACKED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Extract `archive` into `dest`. When every entry sits under one top-level
/// folder that folder is flattened away, so `project/src/main.rs` lands at
/// `dest/src/main.rs`. Returns the number of files written.
///
/// Any `.git` directory in the archive is dropped: the workspace repository
/// is always initialised fresh. Extraction stops with an error once more
/// than `limit` bytes would be written.
///
/// Blocking; call from `spawn_blocking`.
pub(crate) fn unpack_archive(
    archive: &Path,
    dest: &Path,
    limit: u64,
) -> Result<usize, ExecutorError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(zip_err)?;

    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i).map_err(zip_err)?;
        let Some(name) = entry.enclosed_name() else {
            return Err(ExecutorError::Workspace(format!(
                "archive entry escapes the workspace: {}",
                entry.name()
            )));
        };
        if name.starts_with("__MACOSX") || is_git_metadata(&name) {
            continue;
        }
        entries.push((i, name, entry.is_dir()));
    }

    let root = single_root(entries.iter().map(|(_, name, is_dir)| (name.as_path(), *is_dir)));

    std::fs::create_dir_all(dest)?;
    let mut written = 0;
    let mut total: u64 = 0;
    for (i, name, is_dir) in entries {
        let rel = match &root {
            Some(root) => match name.strip_prefix(root) {
                Ok(rel) if rel.as_os_str().is_empty() => continue,
                Ok(rel) => rel.to_path_buf(),
                Err(_) => name,
            },
            None => name,
        };
        let out_path = dest.join(&rel);
        if is_dir {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entry = zip.by_index(i).map_err(zip_err)?;
        let remaining = limit.saturating_sub(total);
        let mut out = File::create(&out_path)?;
        let copied = io::copy(&mut entry.take(remaining.saturating_add(1)), &mut out)?;
        if copied > remaining {
            drop(out);
            let _ = std::fs::remove_file(&out_path);
            return Err(ExecutorError::Workspace(format!(
                "archive expands beyond {limit} bytes"
            )));
        }
        total += copied;
        written += 1;
    }
    Ok(written)
}

/// Entries under a `.git` directory at any depth.
fn is_git_metadata(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == ".git"))
}

/// The shared top-level directory, if every file lives below the same one.
fn single_root<'a>(entries: impl Iterator<Item = (&'a Path, bool)>) -> Option<PathBuf> {
    let mut root: Option<&std::ffi::OsStr> = None;
    let mut saw_file = false;
    for (path, is_dir) in entries {
        let mut comps = path.components();
        let Some(Component::Normal(first)) = comps.next() else {
            return None;
        };
        // a file directly at the top level rules flattening out
        if !is_dir && comps.next().is_none() {
            return None;
        }
        saw_file |= !is_dir;
        match root {
            None => root = Some(first),
            Some(r) if r == first => {}
            Some(_) => return None,
        }
    }
    if !saw_file {
        return None;
    }
    root.map(PathBuf::from)
}

fn zip_err(e: zip::result::ZipError) -> ExecutorError {
    ExecutorError::Workspace(format!("invalid zip archive: {e}"))
}
