use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::build_status::BuildStatus;
use crate::config::{CleanupStoreOptions, FinalReleaseOptions, PublishOptions, StoreOptions, TagConfig};
use crate::environment::BuildIdentity;
use crate::error::PublisherError;
use crate::latest;
use crate::numbered;
use crate::repository::{self, DeletionReport, ReleaseRepository};
use crate::store;
use crate::tag_release;
use crate::types::{EventType, NewRelease, Release, ReleaseUpdate};

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Everything a command needs to talk about the current build.
pub struct Session<'a> {
    pub repo: &'a dyn ReleaseRepository,
    pub status: &'a dyn BuildStatus,
    pub tags: &'a TagConfig,
    pub identity: &'a BuildIdentity,
    /// Web UI root of the Travis instance, linked from generated release bodies.
    pub travis_web_url: String,
}

impl Session<'_> {
    /// Markdown link to the current build on the Travis web UI.
    pub(crate) fn build_link(&self) -> Result<String, PublisherError> {
        let build_id = self.identity.build_id()?;
        Ok(format!(
            "[Travis-CI build #{build_id}]({}/{}/builds/{build_id})",
            self.travis_web_url,
            self.identity.ci_repo_slug()?
        ))
    }

    /// Markdown link to the current job on the Travis web UI.
    pub(crate) fn job_link(&self) -> Result<String, PublisherError> {
        let job_id = self.identity.job_id()?;
        Ok(format!(
            "[Travis-CI job #{job_id}]({}/{}/jobs/{job_id})",
            self.travis_web_url,
            self.identity.ci_repo_slug()?
        ))
    }

    /// Whether the current build is the most recent one for `branch_or_tag`.
    pub(crate) fn is_latest_build(
        &self,
        branch_or_tag: &str,
        event_types: &[EventType],
    ) -> Result<bool> {
        let last = self.status.last_build_number(
            self.identity.ci_repo_slug()?,
            branch_or_tag,
            event_types,
        )?;
        Ok(last == self.identity.build_number)
    }

    pub(crate) fn target_commitish(
        &self,
        opts: &FinalReleaseOptions,
    ) -> Result<Option<String>, PublisherError> {
        match &opts.target_commitish {
            Some(target) => Ok(Some(target.clone())),
            None => self.identity.default_target_commitish(),
        }
    }

    /// First phase of a publish: a draft under the temporary tag.
    pub(crate) fn create_draft(
        &self,
        release: NewRelease,
        reporter: &mut dyn Reporter,
    ) -> Result<Release> {
        reporter.info(&format!(
            "Creating a draft release with the tag name \"{}\".",
            release.tag_name
        ));
        self.repo
            .create_release(&release)
            .with_context(|| format!("failed to create release \"{}\"", release.tag_name))
    }

    /// Second phase of a publish: move the draft to its final tag.
    pub(crate) fn finalize(
        &self,
        release: &Release,
        tag_name: &str,
        draft: bool,
        reporter: &mut dyn Reporter,
    ) -> Result<Release> {
        reporter.info(&format!(
            "Changing the tag name from \"{}\" to \"{tag_name}\"{}.",
            release.tag_name,
            if draft { "" } else { " and removing the draft flag" }
        ));
        self.repo
            .update_release(release, &ReleaseUpdate::finalize(tag_name, draft))
            .with_context(|| format!("failed to rename release \"{}\"", release.tag_name))
    }
}

/// Check the artifact directory before any network call.
///
/// `require_artifacts` additionally demands at least one regular file in it.
pub fn ensure_artifact_dir(dir: &Path, require_artifacts: bool) -> Result<()> {
    if !dir.is_dir() {
        return Err(PublisherError::precondition(format!(
            "Directory \"{}\" doesn't exist.",
            dir.display()
        ))
        .into());
    }
    if require_artifacts && repository::artifact_files(dir)?.is_empty() {
        return Err(PublisherError::precondition(format!(
            "No artifacts found in \"{}\" directory.",
            dir.display()
        ))
        .into());
    }
    Ok(())
}

/// `store`: upload the artifacts of the current job to a temporary store release.
pub fn run_store(
    session: &Session<'_>,
    artifact_dir: &Path,
    opts: &StoreOptions,
    reporter: &mut dyn Reporter,
) -> Result<Release> {
    ensure_artifact_dir(artifact_dir, true)?;
    store::store(session, artifact_dir, opts, reporter)
}

/// `cleanup_store`: delete temporary store releases selected by scope and completeness.
pub fn run_cleanup_store(
    session: &Session<'_>,
    opts: &CleanupStoreOptions,
    reporter: &mut dyn Reporter,
) -> Result<DeletionReport> {
    opts.validate()?;
    store::cleanup(session, opts, reporter)
}

/// `collect`: download every temporary store release of the current build.
pub fn run_collect(
    session: &Session<'_>,
    artifact_dir: &Path,
    reporter: &mut dyn Reporter,
) -> Result<Vec<PathBuf>> {
    ensure_artifact_dir(artifact_dir, false)?;
    store::collect(session, artifact_dir, reporter)
}

/// `publish`: create the requested latest, numbered and tag releases, in that order.
///
/// Returns the releases that were finalized. Kinds that do not apply to the current
/// build (or lost a liveness check) publish nothing.
pub fn run_publish(
    session: &Session<'_>,
    artifact_dir: &Path,
    opts: &PublishOptions,
    reporter: &mut dyn Reporter,
) -> Result<Vec<Release>> {
    opts.validate()?;
    ensure_artifact_dir(artifact_dir, true)?;

    let releases = session.repo.list_releases()?;
    let mut published = Vec::new();
    if let Some(latest) = &opts.latest {
        published.extend(latest::publish(session, &releases, artifact_dir, latest, reporter)?);
    }
    if let Some(numbered) = &opts.numbered {
        published.extend(numbered::publish(
            session,
            &releases,
            artifact_dir,
            numbered,
            reporter,
        )?);
    }
    if let Some(tag) = &opts.tag {
        published.extend(tag_release::publish(session, &releases, artifact_dir, tag, reporter)?);
    }
    Ok(published)
}

/// `cleanup_publish`: delete incomplete latest, numbered and tag releases left behind by
/// failed or cancelled jobs.
pub fn run_cleanup_publish(
    session: &Session<'_>,
    reporter: &mut dyn Reporter,
) -> Result<DeletionReport> {
    let releases = session.repo.list_releases()?;
    let unfinished = session
        .status
        .unfinished_build_numbers(session.identity.ci_repo_slug()?, &session.identity.branch)?;

    let mut report = latest::cleanup(session, &releases, &unfinished, reporter);
    for part in [
        numbered::cleanup(session, &releases, &unfinished, reporter),
        tag_release::cleanup(session, &releases, &unfinished, reporter),
    ] {
        report.deleted.extend(part.deleted);
        report.failed.extend(part.failed);
    }
    Ok(report)
}
