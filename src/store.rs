//! Local artifact storage and the `latest` pointer.
//!
//! Artifacts are immutable files named after their acquisition timestamp
//! (UTC), with an extension derived from the response content type. The
//! `latest` pointer is a symlink in the same directory that always resolves
//! to the most recent fully-written artifact. It is swapped via
//! symlink-at-temp-name + rename, so an external reader never observes a
//! missing or half-written pointer.

use crate::error::{PullError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the latest pointer inside the artifact root.
const LATEST_NAME: &str = "latest";

/// Temp name used during the pointer swap.
const LATEST_SWAP_NAME: &str = ".latest.swap";

/// Filesystem home of pulled artifacts.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the artifact directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| PullError::Storage(format!("cannot create artifact dir {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Artifact directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Well-known path of the latest pointer.
    pub fn latest_path(&self) -> PathBuf {
        self.root.join(LATEST_NAME)
    }

    /// Extensionless candidate path for a cycle that started at `when`.
    pub fn candidate_path(&self, when: DateTime<Utc>) -> PathBuf {
        self.root.join(when.format("%Y-%m-%d_%H-%M-%S").to_string())
    }

    /// Atomically re-point `latest` at `artifact`.
    ///
    /// Must only be called with a fully-written artifact. The swap is a
    /// rename, so concurrent readers see either the old or the new target,
    /// never an absent pointer.
    pub fn publish_latest(&self, artifact: &Path) -> Result<()> {
        let artifact = artifact
            .canonicalize()
            .map_err(|e| PullError::Storage(format!("cannot resolve artifact path: {e}")))?;
        let swap = self.root.join(LATEST_SWAP_NAME);

        // Leftover swap entry from an interrupted earlier publish.
        remove_entry_if_present(&swap)?;
        create_pointer(&artifact, &swap)?;

        std::fs::rename(&swap, self.latest_path())
            .map_err(|e| PullError::Storage(format!("cannot swap latest pointer: {e}")))?;

        debug!("latest pointer now resolves to {}", artifact.display());
        Ok(())
    }

    /// Rename `artifact` over the pointer path, absorbing it.
    ///
    /// Used by post-upload cleanup: afterwards `latest` is the image file
    /// itself and no separate artifact remains. The rename is atomic, so the
    /// pointer path stays continuously readable.
    pub fn absorb_into_latest(&self, artifact: &Path) -> Result<()> {
        std::fs::rename(artifact, self.latest_path())
            .map_err(|e| PullError::Storage(format!("cannot absorb artifact into latest: {e}")))?;
        Ok(())
    }

    /// Best-effort removal of a (possibly partial) candidate file.
    pub fn discard(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("discarded partial file {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("cannot discard {}: {e}", path.display()),
        }
    }
}

/// Remove a file or symlink at `path`, tolerating absence.
fn remove_entry_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PullError::Storage(format!(
            "cannot remove {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(unix)]
fn create_pointer(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| PullError::Storage(format!("cannot create pointer: {e}")))
}

/// Without symlinks the pointer is a copy of the artifact; the rename swap
/// discipline is the same.
#[cfg(not(unix))]
fn create_pointer(target: &Path, link: &Path) -> Result<()> {
    std::fs::copy(target, link)
        .map(|_| ())
        .map_err(|e| PullError::Storage(format!("cannot create pointer: {e}")))
}

/// Map a `content-type` header value to an artifact file extension.
///
/// Common image types get their conventional extension; other image subtypes
/// fall back to the subtype token, and anything unrecognisable to `bin` so
/// an odd header never fails the attempt.
pub fn extension_for_content_type(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/jpeg" | "image/jpg" => "jpg".to_owned(),
        "image/png" => "png".to_owned(),
        "image/gif" => "gif".to_owned(),
        "image/webp" => "webp".to_owned(),
        "image/bmp" => "bmp".to_owned(),
        "image/tiff" => "tif".to_owned(),
        "image/svg+xml" => "svg".to_owned(),
        "image/avif" => "avif".to_owned(),
        _ => match essence.split_once('/') {
            Some((_, subtype))
                if !subtype.is_empty()
                    && subtype.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                subtype.to_owned()
            }
            _ => "bin".to_owned(),
        },
    }
}
