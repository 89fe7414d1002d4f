//! Temporary store releases: per-job draft releases that carry artifacts between the jobs
//! of one build until they are collected and published.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::{CleanupStoreOptions, StoreOptions};
use crate::engine::{Reporter, Session};
use crate::repository::{DeletionReport, delete_best_effort, download_artifacts, upload_artifacts};
use crate::tags::{StoreKey, StoreTag, TagCodec};
use crate::types::{CleanupCompleteness, CleanupScope, NewRelease, Release};

/// Upload `artifact_dir` as the store release of the current job.
///
/// The release stays a draft after the rename, so it is never publicly visible.
pub fn store(
    session: &Session<'_>,
    artifact_dir: &Path,
    opts: &StoreOptions,
    reporter: &mut dyn Reporter,
) -> Result<Release> {
    let identity = session.identity;
    let key = StoreKey {
        branch: identity.branch.clone(),
        build_number: identity.build_number,
        job_number: identity.job_number()?,
    };
    let codec = StoreTag::new(session.tags);
    let tag_name = codec.encode(&key);
    reporter.info(&format!(
        "* Creating a temporary store release with the tag name \"{tag_name}\"."
    ));

    let new = NewRelease {
        tag_name: codec.encode_tmp(&key),
        name: opts
            .text
            .name_or_else(|| format!("Temporary store release {tag_name}")),
        body: opts.text.body_or_try_else(|| {
            session.job_link().map(|link| {
                format!(
                    "Auto-generated temporary release containing build artifacts of {link}.\n\n\
                     This release was created by the CI Release Publisher script, which will automatically delete it in the current or following builds.\n\n\
                     You should not manually delete this release, unless you don't use the CI Release Publisher script anymore."
                )
            })
        })?,
        draft: true,
        prerelease: true,
        target_commitish: identity.default_target_commitish()?,
    };
    let draft = session.create_draft(new, reporter)?;
    upload_artifacts(session.repo, artifact_dir, &draft, reporter)?;
    session.finalize(&draft, &tag_name, true, reporter)
}

/// Download the artifacts of every store release of the current build into `artifact_dir`,
/// in job order.
pub fn collect(
    session: &Session<'_>,
    artifact_dir: &Path,
    reporter: &mut dyn Reporter,
) -> Result<Vec<PathBuf>> {
    reporter.info("* Downloading temporary store releases created during this build.");
    let identity = session.identity;
    let codec = StoreTag::new(session.tags);
    let releases = session.repo.list_releases()?;
    let mut stored: Vec<(u64, &Release)> = releases
        .iter()
        .filter(|r| r.draft)
        .filter_map(|r| {
            let key = codec.decode(&r.tag_name)?;
            (key.branch == identity.branch && key.build_number == identity.build_number)
                .then_some((key.job_number, r))
        })
        .collect();
    stored.sort_by_key(|(job, _)| *job);

    if stored.is_empty() {
        reporter.info("Couldn't find any temporary store releases for this build.");
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for (_, release) in stored {
        paths.extend(download_artifacts(session.repo, release, artifact_dir, reporter)?);
    }
    Ok(paths)
}

/// Delete the store releases selected by `opts`, best-effort.
pub fn cleanup(
    session: &Session<'_>,
    opts: &CleanupStoreOptions,
    reporter: &mut dyn Reporter,
) -> Result<DeletionReport> {
    reporter.info("* Deleting temporary store releases.");
    let identity = session.identity;

    if opts.on_nonallowed_failure {
        // The API reports a job as failed only once it has finished, so the running job
        // has to look at its own environment first.
        let failed = identity.has_nonallowed_failure()
            || session
                .status
                .build_has_nonallowed_failure(identity.build_id()?)?;
        if !failed {
            reporter.info(
                "No job of this build has failed without being allowed to, not deleting anything.",
            );
            return Ok(DeletionReport::default());
        }
    }

    let unfinished = if opts.scopes.contains(&CleanupScope::PreviousFinishedBuilds) {
        session
            .status
            .unfinished_build_numbers(identity.ci_repo_slug()?, &identity.branch)?
    } else {
        Vec::new()
    };
    let current_job = if opts.scopes.contains(&CleanupScope::CurrentJob) {
        Some(identity.job_number()?)
    } else {
        None
    };

    let codec = StoreTag::new(session.tags);
    let releases = session.repo.list_releases()?;
    let mut doomed: Vec<(StoreKey, bool, &Release)> = releases
        .iter()
        .filter(|r| r.draft)
        .filter_map(|r| {
            let (key, complete) = decode_store_tag(&codec, &r.tag_name, &opts.completeness)?;
            if key.branch != identity.branch {
                return None;
            }
            let current = identity.build_number;
            let selected = opts.scopes.iter().any(|scope| match scope {
                CleanupScope::CurrentJob => {
                    key.build_number == current && Some(key.job_number) == current_job
                }
                CleanupScope::CurrentBuild => key.build_number == current,
                CleanupScope::PreviousFinishedBuilds => {
                    key.build_number < current && !unfinished.contains(&key.build_number)
                }
            });
            selected.then_some((key, complete, r))
        })
        .collect();
    doomed.sort_by_key(|(key, complete, _)| (key.build_number, key.job_number, *complete));

    Ok(delete_best_effort(
        session.repo,
        doomed.into_iter().map(|(_, _, r)| r),
        reporter,
    ))
}

/// Decode `tag` as a complete and then as an incomplete store release, as far as
/// `completeness` asks for. Returns the key and whether the release is complete.
fn decode_store_tag(
    codec: &StoreTag<'_>,
    tag: &str,
    completeness: &[CleanupCompleteness],
) -> Option<(StoreKey, bool)> {
    let complete = completeness
        .contains(&CleanupCompleteness::Complete)
        .then(|| codec.decode(tag))
        .flatten()
        .map(|key| (key, true));
    complete.or_else(|| {
        completeness
            .contains(&CleanupCompleteness::Incomplete)
            .then(|| codec.decode_tmp(tag))
            .flatten()
            .map(|key| (key, false))
    })
}
