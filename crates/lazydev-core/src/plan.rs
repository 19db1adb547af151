//! Submission-time validation. Nothing here touches storage: a plan that fails
//! these checks never becomes a job.

use std::path::{Component, Path};

use crate::error::{LazydevError, Result};
use crate::types::CommitPlan;

/// Leading bytes of a ZIP local file header.
const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

impl CommitPlan {
    /// Parse a plan from the JSON form field sent alongside the archive.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| LazydevError::validation(format!("invalid commit plan: {e}")))
    }

    /// Reject empty plans, entries without files or message, unsafe paths and
    /// malformed repository identifiers.
    pub fn validate(&self) -> Result<()> {
        validate_repo(&self.repo)?;

        if self.commits.is_empty() {
            return Err(LazydevError::validation("commit plan is empty"));
        }

        for (i, entry) in self.commits.iter().enumerate() {
            if entry.files.is_empty() {
                return Err(LazydevError::validation(format!(
                    "commit {i} lists no files"
                )));
            }
            if entry.message.trim().is_empty() {
                return Err(LazydevError::validation(format!(
                    "commit {i} has an empty message"
                )));
            }
            for file in &entry.files {
                validate_relative_path(file)
                    .map_err(|reason| LazydevError::validation(format!("commit {i}: {reason}")))?;
            }
        }
        Ok(())
    }
}

/// `owner/name`, each segment non-empty and made of `[A-Za-z0-9._-]`.
pub fn validate_repo(repo: &str) -> Result<()> {
    let mut parts = repo.split('/');
    let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(LazydevError::validation(format!(
            "repository must be owner/name, got {repo:?}"
        )));
    };

    for segment in [owner, name] {
        let ok = !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !ok {
            return Err(LazydevError::validation(format!(
                "invalid repository identifier: {repo:?}"
            )));
        }
    }
    Ok(())
}

fn validate_relative_path(file: &str) -> std::result::Result<(), String> {
    if file.trim().is_empty() {
        return Err("empty file path".to_string());
    }
    let path = Path::new(file);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(format!("path escapes the archive: {file}")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path must be relative: {file}"))
            }
        }
    }
    Ok(())
}

/// Cheap structural check of an uploaded archive before anything is stored.
pub fn validate_archive(filename: &str, bytes: &[u8]) -> Result<()> {
    if !filename.to_ascii_lowercase().ends_with(".zip") {
        return Err(LazydevError::validation("file must be a .zip archive"));
    }
    if bytes.is_empty() {
        return Err(LazydevError::validation("archive is empty"));
    }
    if !bytes.starts_with(ZIP_SIGNATURE) {
        return Err(LazydevError::validation("archive is not a zip file"));
    }
    Ok(())
}
