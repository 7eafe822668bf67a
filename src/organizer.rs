//! File organization on local storage
//!
//! Maps an [`ArtifactRef`] to its deterministic location under the output base directory
//! and writes files so that a destination path only ever holds complete content:
//!
//! ```text
//! <base>/<technician>/<client>/STS Reports/STS_Report_<client>_<date>_<id>.pdf
//! <base>/<technician>/<client>/Foto/ReportImage_<id>.<ext>
//! ```
//!
//! Bytes go to a hidden sibling staging file first, are flushed with `sync_all`, and only
//! then renamed onto the destination. A crash at any point leaves either the old state or
//! the complete new file, plus at worst a stray staging file.

use crate::error::{Error, Result};
use crate::types::{ArtifactKind, ArtifactRef};
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Directory holding rendered reports inside a client folder
pub const REPORTS_DIR: &str = "STS Reports";

/// Directory holding images inside a client folder
pub const IMAGES_DIR: &str = "Foto";

/// Extension used when an image URL has none
const DEFAULT_IMAGE_EXTENSION: &str = ".jpg";

/// Marker that identifies staging files left behind by an interrupted write
pub const STAGING_MARKER: &str = ".part";

/// Reduce a display name to a safe single path component
///
/// Keeps alphanumerics, spaces and underscores, drops everything else (including path
/// separators), trims trailing whitespace. An empty result becomes `Unknown`.
pub fn sanitize_component(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let trimmed = kept.trim_end();
    if trimmed.trim_start().is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Make a fragment safe inside a file name while keeping it readable
fn file_name_fragment(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extension (with leading dot) taken from the path of an image URL
fn image_extension(source_url: &str) -> String {
    let path = url::Url::parse(source_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| {
            source_url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        });

    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => DEFAULT_IMAGE_EXTENSION.to_string(),
    }
}

/// File name of an artifact, without directories
pub fn file_name(artifact: &ArtifactRef) -> String {
    let id = file_name_fragment(&artifact.remote_id);
    match artifact.kind {
        ArtifactKind::Report => format!(
            "STS_Report_{}_{}_{}.pdf",
            file_name_fragment(&artifact.client_name),
            artifact.created_at.format("%Y-%m-%d"),
            id
        ),
        ArtifactKind::Image => {
            format!("ReportImage_{}{}", id, image_extension(&artifact.source_url))
        }
    }
}

/// Deterministic destination of an artifact under `base_dir`
///
/// Pure function of the artifact's kind, identity, names, date and URL.
pub fn resolve_path(artifact: &ArtifactRef, base_dir: &Path) -> PathBuf {
    let kind_dir = match artifact.kind {
        ArtifactKind::Report => REPORTS_DIR,
        ArtifactKind::Image => IMAGES_DIR,
    };
    base_dir
        .join(sanitize_component(&artifact.technician_name))
        .join(sanitize_component(&artifact.client_name))
        .join(kind_dir)
        .join(file_name(artifact))
}

/// Hidden sibling of `destination` to write into before the final rename
///
/// Each call yields a fresh name so concurrent writers never share a staging file.
pub fn staging_path(destination: &Path) -> PathBuf {
    staging_name(destination, "")
}

/// Like [`staging_path`], ending in `.<extension>` for tools that look at file extensions
pub fn staging_path_with_extension(destination: &Path, extension: &str) -> PathBuf {
    staging_name(destination, &format!(".{}", extension))
}

fn staging_name(destination: &Path, tail: &str) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let suffix: u32 = rand::thread_rng().r#gen();
    destination.with_file_name(format!(
        ".{}.{:08x}{}{}",
        name, suffix, STAGING_MARKER, tail
    ))
}

/// Whether a file name looks like one of our staging files
pub fn is_staging_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.contains(STAGING_MARKER))
}

/// Create the parent directory of `path`
pub async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

/// Move a complete staging file onto its destination
///
/// The rename replaces any existing file at `destination` (for example one left by a run
/// that crashed before recording it). The parent directory is synced afterwards so the
/// rename itself is durable.
pub async fn commit_staged(staging: &Path, destination: &Path) -> std::io::Result<()> {
    tokio::fs::rename(staging, destination).await?;
    sync_parent_dir(destination).await
}

/// Remove a staging file, ignoring a file that is already gone
pub async fn discard_staged(staging: &Path) {
    match tokio::fs::remove_file(staging).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(
                path = %staging.display(),
                error = %e,
                "Failed to remove staging file"
            );
        }
    }
}

/// Write `bytes` to `destination` atomically
///
/// Creates parent directories, writes a staging sibling, flushes it to stable storage and
/// renames it into place. On failure the staging file is removed and `destination` is
/// untouched.
pub async fn write_atomic(bytes: &[u8], destination: &Path) -> std::io::Result<()> {
    ensure_parent(destination).await?;
    let staging = staging_path(destination);

    let result = async {
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        commit_staged(&staging, destination).await
    }
    .await;

    if result.is_err() {
        discard_staged(&staging).await;
    }
    result
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let dir = tokio::fs::File::open(parent).await?;
        dir.sync_all().await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Verify that `base_dir` exists (creating it if needed) and accepts new files
///
/// Checks with a real write so read-only mounts and permission problems surface before
/// any work is dispatched.
pub async fn ensure_writable(base_dir: &Path) -> Result<()> {
    let not_writable = |source: std::io::Error| Error::OutputNotWritable {
        path: base_dir.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(base_dir)
        .await
        .map_err(not_writable)?;

    let scratch = staging_path(&base_dir.join("write-check"));
    tokio::fs::write(&scratch, b"ok")
        .await
        .map_err(not_writable)?;
    discard_staged(&scratch).await;

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn report(client: &str) -> ArtifactRef {
        ArtifactRef {
            kind: ArtifactKind::Report,
            remote_id: "4711".to_string(),
            technician_name: "Budi Santoso".to_string(),
            client_name: client.to_string(),
            created_at: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            source_url: "https://catalog.example.com/report/4711".to_string(),
            details: None,
        }
    }

    fn image(url: &str) -> ArtifactRef {
        ArtifactRef {
            kind: ArtifactKind::Image,
            remote_id: "4711_88".to_string(),
            source_url: url.to_string(),
            ..report("PT. Maju / Jaya")
        }
    }

    #[test]
    fn sanitize_keeps_alphanumerics_space_and_underscore() {
        assert_eq!(sanitize_component("PT. Maju / Jaya"), "PT Maju  Jaya");
        assert_eq!(sanitize_component("Budi_Santoso  "), "Budi_Santoso");
        assert_eq!(sanitize_component("Café Ñandú"), "Café Ñandú");
    }

    #[test]
    fn sanitize_never_returns_empty_or_traversal() {
        assert_eq!(sanitize_component(""), "Unknown");
        assert_eq!(sanitize_component("   "), "Unknown");
        assert_eq!(sanitize_component("../.."), "Unknown");
        assert_eq!(sanitize_component("/etc/passwd"), "etcpasswd");
    }

    #[test]
    fn report_path_layout() {
        let path = resolve_path(&report("PT. Maju / Jaya"), Path::new("/out"));
        assert_eq!(
            path,
            PathBuf::from("/out/Budi Santoso/PT Maju  Jaya/STS Reports/STS_Report_PT. Maju _ Jaya_2024-03-09_4711.pdf")
        );
    }

    #[test]
    fn image_path_uses_url_extension() {
        let path = resolve_path(
            &image("https://cdn.example.com/uploads/IMG_0001.PNG?token=abc"),
            Path::new("/out"),
        );
        assert_eq!(
            path,
            PathBuf::from("/out/Budi Santoso/PT Maju  Jaya/Foto/ReportImage_4711_88.png")
        );
    }

    #[test]
    fn image_without_extension_defaults_to_jpg() {
        assert_eq!(
            file_name(&image("https://cdn.example.com/uploads/blob")),
            "ReportImage_4711_88.jpg"
        );
        assert_eq!(
            file_name(&image("https://cdn.example.com/")),
            "ReportImage_4711_88.jpg"
        );
    }

    #[test]
    fn resolve_path_is_deterministic() {
        let a = resolve_path(&report("Hotel Mawar"), Path::new("base"));
        let b = resolve_path(&report("Hotel Mawar"), Path::new("base"));
        assert_eq!(a, b);
    }

    #[test]
    fn staging_paths_are_hidden_siblings_and_unique() {
        let dest = Path::new("/out/a/b/Foto/ReportImage_1_2.jpg");
        let s1 = staging_path(dest);
        let s2 = staging_path(dest);
        assert_eq!(s1.parent(), dest.parent());
        assert_ne!(s1, s2);
        assert!(is_staging_file(&s1));
        assert!(!is_staging_file(dest));

        let html = staging_path_with_extension(dest, "html");
        assert!(html.to_string_lossy().ends_with(".part.html"));
        assert!(is_staging_file(&html));
    }

    #[tokio::test]
    async fn write_atomic_creates_parents_and_leaves_no_staging() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Tech").join("Client").join("Foto").join("x.jpg");

        write_atomic(b"\xFF\xD8\xFFjpeg", &dest).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"\xFF\xD8\xFFjpeg");
        let leftovers: Vec<_> = walkdir::WalkDir::new(dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| is_staging_file(e.path()))
            .collect();
        assert!(leftovers.is_empty(), "staging files left: {:?}", leftovers);
    }

    #[tokio::test]
    async fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.jpg");
        tokio::fs::write(&dest, b"partial").await.unwrap();

        write_atomic(b"complete", &dest).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"complete");
    }

    #[tokio::test]
    async fn ensure_writable_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("downloads");

        ensure_writable(&base).await.unwrap();

        assert!(base.is_dir());
        assert_eq!(std::fs::read_dir(&base).unwrap().count(), 0, "scratch file removed");
    }

    #[tokio::test]
    async fn ensure_writable_rejects_a_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = ensure_writable(&file).await.unwrap_err();
        assert!(matches!(err, Error::OutputNotWritable { .. }));
    }
}
