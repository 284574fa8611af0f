//! Sandboxed preview/apply of whole-file patches.
//!
//! Client paths are resolved against the project root and must land strictly
//! inside the sandbox root. Every path of a batch is checked before any file
//! is read or written, so a single bad entry rejects the whole batch.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs as afs;
use tracing::{info, warn};

use crate::config::normalize_inside;
use crate::error::RelayError;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PatchEntry {
    pub file: String,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct PreviewEntry {
    pub file: String,
    pub before: String,
    pub after: String,
}

pub(crate) struct Sandbox {
    base: PathBuf,
    root: PathBuf,
    max_bytes: usize,
}

impl Sandbox {
    pub(crate) fn new(base: PathBuf, root: PathBuf, max_bytes: usize) -> Self {
        Self {
            base,
            root,
            max_bytes,
        }
    }

    /// Maps a client path to an absolute path inside the sandbox, or fails
    /// with [`RelayError::PathEscape`].
    pub(crate) async fn resolve(&self, rel: &str) -> Result<PathBuf, RelayError> {
        let escape = || RelayError::PathEscape(rel.to_string());
        if rel.trim().is_empty() || rel.contains('\0') {
            return Err(escape());
        }
        let normalized = normalize_inside(Path::new(rel)).ok_or_else(escape)?;
        let abs = self.base.join(normalized);
        if !abs.starts_with(&self.root) || abs == self.root {
            return Err(escape());
        }
        if !self.stays_inside_after_links(&abs).await {
            return Err(escape());
        }
        Ok(abs)
    }

    /// Symlinks inside the tree may point elsewhere; compare the canonical
    /// form of the nearest existing ancestor against the canonical root.
    async fn stays_inside_after_links(&self, abs: &Path) -> bool {
        let Ok(root) = afs::canonicalize(&self.root).await else {
            // Nothing exists yet, so nothing can link out.
            return true;
        };
        let mut probe = abs.to_path_buf();
        loop {
            match afs::canonicalize(&probe).await {
                Ok(real) => return real.starts_with(&root),
                Err(_) => {
                    if let Ok(meta) = afs::symlink_metadata(&probe).await {
                        if meta.file_type().is_symlink() {
                            // Dangling link: refuse rather than guess its target.
                            return false;
                        }
                    }
                    if !probe.pop() || !probe.starts_with(&self.root) {
                        return true;
                    }
                }
            }
        }
    }

    async fn resolve_all<'a>(
        &self,
        patches: &'a [PatchEntry],
    ) -> Result<Vec<(PathBuf, &'a PatchEntry)>, RelayError> {
        if patches.is_empty() {
            return Err(RelayError::BadRequest("patches must not be empty".into()));
        }
        let mut resolved = Vec::with_capacity(patches.len());
        for patch in patches {
            let abs = match self.resolve(&patch.file).await {
                Ok(abs) => abs,
                Err(err) => {
                    warn!(
                        target: "vibe::workspace",
                        file = %patch.file,
                        "rejecting batch: path escapes sandbox"
                    );
                    return Err(err);
                }
            };
            if let Some(after) = &patch.after {
                if after.len() > self.max_bytes {
                    return Err(RelayError::BadRequest(format!(
                        "{} exceeds {} bytes",
                        patch.file, self.max_bytes
                    )));
                }
            }
            resolved.push((abs, patch));
        }
        Ok(resolved)
    }

    pub(crate) async fn preview(
        &self,
        patches: &[PatchEntry],
    ) -> Result<Vec<PreviewEntry>, RelayError> {
        let resolved = self.resolve_all(patches).await?;
        let mut results = Vec::with_capacity(resolved.len());
        for (abs, patch) in resolved {
            if afs::metadata(&abs).await.is_ok_and(|meta| meta.is_dir()) {
                return Err(RelayError::BadRequest(format!(
                    "{} is a directory",
                    patch.file
                )));
            }
            let before = match afs::read(&abs).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
                Err(err) => {
                    return Err(RelayError::Internal(format!(
                        "failed to read {}: {err}",
                        patch.file
                    )))
                }
            };
            results.push(PreviewEntry {
                file: patch.file.clone(),
                before,
                after: patch.after.clone().unwrap_or_default(),
            });
        }
        Ok(results)
    }

    /// Writes every patch. Writes are independent: one failing file does not
    /// stop the others, but the first failure is reported.
    pub(crate) async fn apply(&self, patches: &[PatchEntry]) -> Result<Vec<String>, RelayError> {
        let resolved = self.resolve_all(patches).await?;
        if let Some((_, missing)) = resolved.iter().find(|(_, p)| p.after.is_none()) {
            return Err(RelayError::BadRequest(format!(
                "patch for {} has no content",
                missing.file
            )));
        }

        let mut applied = Vec::with_capacity(resolved.len());
        let mut first_failure: Option<RelayError> = None;
        for (abs, patch) in resolved {
            let content = patch.after.as_deref().unwrap_or_default();
            let target = write_target(abs).await;
            match save_bytes_atomic(&target, content.as_bytes()).await {
                Ok(()) => {
                    info!(
                        target: "vibe::workspace",
                        file = %patch.file,
                        bytes = content.len(),
                        "patch applied"
                    );
                    applied.push(patch.file.clone());
                }
                Err(err) => {
                    warn!(
                        target: "vibe::workspace",
                        file = %patch.file,
                        error = %err,
                        "patch write failed"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(RelayError::WriteFailed {
                            file: patch.file.clone(),
                            detail: err.to_string(),
                        });
                    }
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }
}

/// A symlink is written through: `resolve` already checked that its target
/// stays inside the sandbox, and replacing the link would orphan that file.
async fn write_target(abs: PathBuf) -> PathBuf {
    match afs::symlink_metadata(&abs).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            afs::canonicalize(&abs).await.unwrap_or(abs)
        }
        _ => abs,
    }
}

/// Writes to a sibling temp file and renames it over `path`. An existing
/// file keeps its permission bits.
async fn save_bytes_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        afs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".vibe-tmp");
    let tmp = path.with_file_name(tmp_name);
    afs::write(&tmp, bytes).await?;
    if let Ok(meta) = afs::metadata(path).await {
        if meta.is_file() {
            if let Err(err) = afs::set_permissions(&tmp, meta.permissions()).await {
                let _ = afs::remove_file(&tmp).await;
                return Err(err);
            }
        }
    }
    let result = replace(&tmp, path).await;
    if result.is_err() {
        let _ = afs::remove_file(&tmp).await;
    }
    result
}

#[cfg(not(windows))]
async fn replace(tmp: &Path, path: &Path) -> std::io::Result<()> {
    afs::rename(tmp, path).await
}

// Older Windows targets refuse to rename over an existing file.
#[cfg(windows)]
async fn replace(tmp: &Path, path: &Path) -> std::io::Result<()> {
    match afs::rename(tmp, path).await {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = afs::remove_file(path).await;
            afs::rename(tmp, path).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn patch(file: &str, after: &str) -> PatchEntry {
        PatchEntry {
            file: file.to_string(),
            after: Some(after.to_string()),
        }
    }

    fn sandbox(base: &Path) -> Sandbox {
        Sandbox::new(base.to_path_buf(), base.to_path_buf(), 1024)
    }

    #[tokio::test]
    async fn escaping_entry_rejects_whole_batch() {
        let dir = tempdir().expect("tempdir");
        let sb = sandbox(dir.path());
        std::fs::write(dir.path().join("keep.txt"), "original").expect("seed");

        let err = sb
            .apply(&[patch("keep.txt", "changed"), patch("../outside.txt", "x")])
            .await
            .expect_err("escape");
        assert!(matches!(err, RelayError::PathEscape(ref p) if p == "../outside.txt"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("keep.txt")).expect("read"),
            "original"
        );
        assert!(!dir.path().join("../outside.txt").exists());

        let err = sb
            .preview(&[patch("/etc/passwd", "")])
            .await
            .expect_err("absolute");
        assert!(matches!(err, RelayError::PathEscape(_)));
    }

    #[tokio::test]
    async fn inner_parent_segments_are_fine() {
        let dir = tempdir().expect("tempdir");
        let sb = sandbox(dir.path());
        let abs = sb.resolve("lib/../src/./main.ts").await.expect("resolve");
        assert_eq!(abs, dir.path().join("src/main.ts"));
        assert!(sb.resolve("").await.is_err());
        assert!(sb.resolve(".").await.is_err());
        assert!(sb.resolve("a/../..").await.is_err());
    }

    #[tokio::test]
    async fn missing_file_previews_as_empty() {
        let dir = tempdir().expect("tempdir");
        let results = sandbox(dir.path())
            .preview(&[patch("new/module.ts", "export {}")])
            .await
            .expect("preview");
        assert_eq!(
            results,
            vec![PreviewEntry {
                file: "new/module.ts".into(),
                before: String::new(),
                after: "export {}".into(),
            }]
        );
    }

    #[tokio::test]
    async fn apply_then_preview_reads_back() {
        let dir = tempdir().expect("tempdir");
        let sb = sandbox(dir.path());
        let applied = sb.apply(&[patch("a.txt", "X")]).await.expect("apply");
        assert_eq!(applied, vec!["a.txt".to_string()]);
        let results = sb.preview(&[patch("a.txt", "Y")]).await.expect("preview");
        assert_eq!(results[0].before, "X");
        assert_eq!(results[0].after, "Y");
        assert!(!dir.path().join("a.txt.vibe-tmp").exists());
    }

    #[tokio::test]
    async fn apply_creates_parent_directories() {
        let dir = tempdir().expect("tempdir");
        sandbox(dir.path())
            .apply(&[patch("src/components/Box.tsx", "export const Box = 1")])
            .await
            .expect("apply");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/components/Box.tsx")).expect("read"),
            "export const Box = 1"
        );
    }

    #[tokio::test]
    async fn narrower_sandbox_limits_project_paths() {
        let dir = tempdir().expect("tempdir");
        let sb = Sandbox::new(dir.path().to_path_buf(), dir.path().join("src"), 1024);
        assert!(sb.resolve("src/App.tsx").await.is_ok());
        assert!(matches!(
            sb.resolve("package.json").await,
            Err(RelayError::PathEscape(_))
        ));
        assert!(matches!(sb.resolve("src").await, Err(RelayError::PathEscape(_))));
        assert!(matches!(
            sb.resolve("srcfoo/x.ts").await,
            Err(RelayError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn bad_batches_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let sb = sandbox(dir.path());
        assert!(matches!(sb.apply(&[]).await, Err(RelayError::BadRequest(_))));
        let no_content = PatchEntry {
            file: "a.txt".into(),
            after: None,
        };
        assert!(matches!(
            sb.apply(&[patch("b.txt", "ok"), no_content]).await,
            Err(RelayError::BadRequest(_))
        ));
        assert!(!dir.path().join("b.txt").exists());
        let big = "x".repeat(2048);
        assert!(matches!(
            sb.apply(&[patch("big.txt", &big)]).await,
            Err(RelayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn write_failure_names_the_file() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("taken")).expect("dir");
        let sb = sandbox(dir.path());
        let err = sb
            .apply(&[patch("taken", "not a dir"), patch("ok.txt", "fine")])
            .await
            .expect_err("directory in the way");
        assert!(matches!(err, RelayError::WriteFailed { ref file, .. } if file == "taken"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ok.txt")).expect("unrelated write"),
            "fine"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_sandbox_is_an_escape() {
        let outside = tempdir().expect("outside");
        let dir = tempdir().expect("tempdir");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");
        let sb = sandbox(dir.path());
        assert!(matches!(
            sb.apply(&[patch("link/pwned.txt", "x")]).await,
            Err(RelayError::PathEscape(_))
        ));
        assert!(!outside.path().join("pwned.txt").exists());
    }

    #[tokio::test]
    async fn previewing_a_directory_is_bad_request() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("src")).expect("dir");
        let err = sandbox(dir.path())
            .preview(&[patch("src", "")])
            .await
            .expect_err("directory");
        assert!(matches!(err, RelayError::BadRequest(ref msg) if msg == "src is a directory"));
    }

    #[tokio::test]
    async fn failed_replace_leaves_existing_entry_alone() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("taken")).expect("dir");
        std::fs::write(dir.path().join("taken/inner.txt"), "keep").expect("seed");
        let err = sandbox(dir.path())
            .apply(&[patch("taken", "x")])
            .await
            .expect_err("directory in the way");
        assert!(matches!(err, RelayError::WriteFailed { .. }));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("taken/inner.txt")).expect("read"),
            "keep"
        );
        assert!(!dir.path().join("taken.vibe-tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn overwrite_keeps_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let script = dir.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\necho old\n").expect("seed");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        sandbox(dir.path())
            .apply(&[patch("run.sh", "#!/bin/sh\necho new\n")])
            .await
            .expect("apply");
        let mode = std::fs::metadata(&script).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            std::fs::read_to_string(&script).expect("read"),
            "#!/bin/sh\necho new\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inner_symlink_is_written_through() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("real.txt"), "old").expect("seed");
        std::os::unix::fs::symlink("real.txt", dir.path().join("alias.txt")).expect("symlink");
        sandbox(dir.path())
            .apply(&[patch("alias.txt", "new")])
            .await
            .expect("apply");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("real.txt")).expect("read"),
            "new"
        );
        let meta = std::fs::symlink_metadata(dir.path().join("alias.txt")).expect("meta");
        assert!(meta.file_type().is_symlink());
    }
}
