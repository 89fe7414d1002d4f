//! Latest release: one `<prefix>-<branch>-latest` release per branch, replaced by every
//! build that is still the newest build of its branch once its artifacts are uploaded.

use std::path::Path;

use anyhow::Result;

use crate::config::LatestOptions;
use crate::engine::{Reporter, Session};
use crate::error::PublisherError;
use crate::repository::{DeletionReport, delete_best_effort, delete_release_with_tag, upload_artifacts};
use crate::tags::{LatestTag, TagCodec};
use crate::types::{EventType, NewRelease, Release};

pub fn publish(
    session: &Session<'_>,
    releases: &[Release],
    artifact_dir: &Path,
    opts: &LatestOptions,
    reporter: &mut dyn Reporter,
) -> Result<Option<Release>> {
    let identity = session.identity;
    if identity.tag.is_some() {
        return Ok(None);
    }
    let branch = &identity.branch;
    let codec = LatestTag::new(session.tags);
    let tag_name = codec.encode(branch);
    reporter.info(&format!(
        "* Creating a latest release with the tag name \"{tag_name}\"."
    ));

    let event_types = if opts.check_event_types.is_empty() {
        vec![EventType::Any]
    } else {
        opts.check_event_types.clone()
    };
    if !still_latest(session, &tag_name, &event_types, reporter)? {
        return Ok(None);
    }

    let release = &opts.release;
    let new = NewRelease {
        tag_name: codec.encode_tmp(branch),
        name: release
            .text
            .name_or_else(|| format!("Latest CI build of {branch} branch")),
        body: release.text.body_or_try_else(|| {
            Ok::<_, PublisherError>(format!(
                "This is an auto-generated release based on [Travis-CI build #{}]({})",
                identity.build_id()?,
                identity.build_web_url()?
            ))
        })?,
        draft: true,
        prerelease: release.prerelease,
        target_commitish: session.target_commitish(release)?,
    };
    let draft = session.create_draft(new, reporter)?;
    upload_artifacts(session.repo, artifact_dir, &draft, reporter)?;

    if !still_latest(session, &tag_name, &event_types, reporter)? {
        delete_release_with_tag(session.repo, &draft, reporter)?;
        return Ok(None);
    }
    if let Some(previous) = releases.iter().find(|r| r.tag_name == tag_name) {
        delete_release_with_tag(session.repo, previous, reporter)?;
    }
    session
        .finalize(&draft, &tag_name, release.draft, reporter)
        .map(Some)
}

fn still_latest(
    session: &Session<'_>,
    tag_name: &str,
    event_types: &[EventType],
    reporter: &mut dyn Reporter,
) -> Result<bool> {
    let branch = &session.identity.branch;
    if session.is_latest_build(branch, event_types)? {
        return Ok(true);
    }
    let events: Vec<_> = event_types.iter().map(EventType::as_str).collect();
    reporter.info(&format!(
        "Not creating the \"{tag_name}\" release because this is not the latest build for \"{branch}\" branch with event type(s): {}.",
        events.join(",")
    ));
    Ok(false)
}

/// Delete incomplete latest releases of the current branch, but only when no other build
/// of the branch is still running and could be uploading one of them.
pub fn cleanup(
    session: &Session<'_>,
    releases: &[Release],
    unfinished: &[u64],
    reporter: &mut dyn Reporter,
) -> DeletionReport {
    let identity = session.identity;
    if identity.tag.is_some() {
        return DeletionReport::default();
    }
    reporter.info(
        "* Deleting incomplete latest releases left over due to jobs failing or being cancelled.",
    );
    let codec = LatestTag::new(session.tags);
    let incomplete: Vec<_> = releases
        .iter()
        .filter(|r| r.draft && codec.decode_tmp(&r.tag_name).as_ref() == Some(&identity.branch))
        .collect();
    if incomplete.is_empty() || unfinished.iter().any(|&n| n != identity.build_number) {
        return DeletionReport::default();
    }
    delete_best_effort(session.repo, incomplete, reporter)
}
