//! The release repository abstraction and the artifact/deletion helpers built on it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::engine::Reporter;
use crate::types::{Asset, NewRelease, Release, ReleaseUpdate};

/// Release storage of one repository on the hosting platform.
///
/// Implementations are bound to a single repository when constructed and are expected to
/// retry transient failures themselves.
pub trait ReleaseRepository {
    fn list_releases(&self) -> Result<Vec<Release>>;
    fn create_release(&self, release: &NewRelease) -> Result<Release>;
    fn update_release(&self, release: &Release, update: &ReleaseUpdate) -> Result<Release>;
    fn delete_release(&self, release: &Release) -> Result<()>;
    /// Delete the git tag `tag_name` (not the release).
    fn delete_tag(&self, tag_name: &str) -> Result<()>;
    fn upload_asset(&self, release: &Release, path: &Path) -> Result<Asset>;
    fn list_assets(&self, release: &Release) -> Result<Vec<Asset>>;
    /// Download `asset` into `dest_dir`, returning the path of the written file.
    fn download_asset(&self, asset: &Asset, dest_dir: &Path) -> Result<PathBuf>;
}

/// Outcome of a best-effort deletion pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    /// Tag names of deleted releases, in deletion order.
    pub deleted: Vec<String>,
    /// Tag names that could not be deleted, with the error message.
    pub failed: Vec<(String, String)>,
}

impl DeletionReport {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.failed.is_empty()
    }
}

/// Delete a release and, for published releases, the git tag GitHub created for it.
///
/// Drafts never get a git tag, so only the release is deleted for them.
pub fn delete_release_with_tag(
    repo: &dyn ReleaseRepository,
    release: &Release,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    reporter.info(&format!(
        "Deleting a release with the tag name \"{}\".",
        release.tag_name
    ));
    repo.delete_release(release)?;
    if !release.draft {
        reporter.info(&format!("Deleting \"{}\" tag.", release.tag_name));
        repo.delete_tag(&release.tag_name)?;
    }
    Ok(())
}

/// Delete every release in order, logging failures and carrying on.
pub fn delete_best_effort<'a, I>(
    repo: &dyn ReleaseRepository,
    releases: I,
    reporter: &mut dyn Reporter,
) -> DeletionReport
where
    I: IntoIterator<Item = &'a Release>,
{
    let mut report = DeletionReport::default();
    for release in releases {
        match delete_release_with_tag(repo, release, reporter) {
            Ok(()) => report.deleted.push(release.tag_name.clone()),
            Err(e) => {
                let msg = format!("{e:#}");
                reporter.warn(&format!(
                    "failed to delete release \"{}\": {msg}",
                    release.tag_name
                ));
                report.failed.push((release.tag_name.clone(), msg));
            }
        }
    }
    report
}

/// Regular files directly inside `dir`, sorted by file name.
pub fn artifact_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read artifact directory {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read artifact directory {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Upload every regular file of `dir` to `release`.
pub fn upload_artifacts(
    repo: &dyn ReleaseRepository,
    dir: &Path,
    release: &Release,
    reporter: &mut dyn Reporter,
) -> Result<()> {
    reporter.info(&format!(
        "Uploading artifacts to \"{}\" release.",
        release.tag_name
    ));
    let files = artifact_files(dir)?;
    reporter.info(&format!(
        "Found {} artifact(s) in \"{}\" directory.",
        files.len(),
        dir.display()
    ));
    for path in &files {
        let size = std::fs::metadata(path)
            .with_context(|| format!("failed to stat artifact {}", path.display()))?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter.info(&format!(
            "\tStoring \"{name}\" ({size} bytes) artifact in the release."
        ));
        repo.upload_asset(release, path)
            .with_context(|| format!("failed to upload artifact {name}"))?;
    }
    reporter.info(&format!(
        "All artifacts for \"{}\" release are uploaded.",
        release.tag_name
    ));
    Ok(())
}

/// Download every asset of `release` into `dir`.
pub fn download_artifacts(
    repo: &dyn ReleaseRepository,
    release: &Release,
    dir: &Path,
    reporter: &mut dyn Reporter,
) -> Result<Vec<PathBuf>> {
    reporter.info(&format!(
        "Downloading artifacts from \"{}\" release.",
        release.tag_name
    ));
    let assets = repo.list_assets(release)?;
    reporter.info(&format!(
        "Found {} artifact(s) in the release.",
        assets.len()
    ));
    let mut paths = Vec::with_capacity(assets.len());
    for asset in &assets {
        reporter.info(&format!(
            "\tDownloading artifact \"{}\" ({} bytes).",
            asset.name, asset.size
        ));
        let path = repo
            .download_asset(asset, dir)
            .with_context(|| format!("failed to download artifact {}", asset.name))?;
        paths.push(path);
    }
    reporter.info(&format!(
        "All artifacts from \"{}\" release are downloaded.",
        release.tag_name
    ));
    Ok(paths)
}
