//! Tag releases: the release of a user-pushed git tag. The tag belongs to the user, so
//! replacing the release never deletes it.

use std::path::Path;

use anyhow::Result;

use crate::config::TagOptions;
use crate::engine::{Reporter, Session};
use crate::error::PublisherError;
use crate::repository::{DeletionReport, delete_best_effort, delete_release_with_tag, upload_artifacts};
use crate::tags::{TagCodec, TagReleaseTag};
use crate::types::{NewRelease, Release};

pub fn publish(
    session: &Session<'_>,
    releases: &[Release],
    artifact_dir: &Path,
    opts: &TagOptions,
    reporter: &mut dyn Reporter,
) -> Result<Option<Release>> {
    let Some(tag) = &session.identity.tag else {
        return Ok(None);
    };
    let codec = TagReleaseTag::new(session.tags);
    let tag_name = codec.encode(tag);
    reporter.info(&format!(
        "* Creating a tag release with the tag name \"{tag_name}\"."
    ));

    if !still_latest(session, &tag_name, tag, reporter)? {
        return Ok(None);
    }

    let release = &opts.release;
    let new = NewRelease {
        tag_name: codec.encode_tmp(tag),
        name: release.text.name_or_else(|| tag_name.clone()),
        body: release.text.body_or_try_else(|| {
            session
                .build_link()
                .map(|link| format!("This is an auto-generated release based on {link}"))
        })?,
        draft: true,
        prerelease: release.prerelease,
        target_commitish: session.target_commitish(release)?,
    };
    let draft = session.create_draft(new, reporter)?;
    upload_artifacts(session.repo, artifact_dir, &draft, reporter)?;

    if !still_latest(session, &tag_name, tag, reporter)? {
        delete_release_with_tag(session.repo, &draft, reporter)?;
        return Ok(None);
    }
    if let Some(previous) = releases.iter().find(|r| r.tag_name == tag_name) {
        if !opts.force_recreate {
            delete_release_with_tag(session.repo, &draft, reporter)?;
            return Err(PublisherError::TagReleaseExists(tag_name).into());
        }
        reporter.info(&format!(
            "Deleting a release with the tag name \"{tag_name}\"."
        ));
        session.repo.delete_release(previous)?;
    }
    session
        .finalize(&draft, &tag_name, release.draft, reporter)
        .map(Some)
}

fn still_latest(
    session: &Session<'_>,
    tag_name: &str,
    tag: &str,
    reporter: &mut dyn Reporter,
) -> Result<bool> {
    if session.is_latest_build(tag, &[])? {
        return Ok(true);
    }
    reporter.info(&format!(
        "Not creating the \"{tag_name}\" release because this is not the latest build for the \"{tag}\" tag."
    ));
    Ok(false)
}

/// Delete incomplete releases of the current tag once no other build of it is running.
pub fn cleanup(
    session: &Session<'_>,
    releases: &[Release],
    unfinished: &[u64],
    reporter: &mut dyn Reporter,
) -> DeletionReport {
    let identity = session.identity;
    let Some(tag) = &identity.tag else {
        return DeletionReport::default();
    };
    reporter.info(
        "* Deleting incomplete tag releases left over due to jobs failing or being cancelled.",
    );
    let codec = TagReleaseTag::new(session.tags);
    let incomplete: Vec<_> = releases
        .iter()
        .filter(|r| r.draft && codec.decode_tmp(&r.tag_name).as_ref() == Some(tag))
        .collect();
    if incomplete.is_empty() || unfinished.iter().any(|&n| n != identity.build_number) {
        return DeletionReport::default();
    }
    delete_best_effort(session.repo, incomplete, reporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeBuildStatus, Fixture, artifact_dir, identity_with};

    fn tag_build(status: FakeBuildStatus) -> Fixture {
        Fixture::new(status).with_identity(identity_with(&[
            ("TRAVIS_TAG", "v1.2.0"),
            ("TRAVIS_BRANCH", "v1.2.0"),
        ]))
    }

    fn publish_in(fx: &mut Fixture, opts: &TagOptions) -> Result<Option<Release>> {
        let dir = artifact_dir(&["app.zip"]);
        let releases = fx.repo.releases();
        let (session, reporter) = fx.parts();
        publish(&session, &releases, dir.path(), opts, reporter)
    }

    #[test]
    fn publishes_under_the_pushed_tag() {
        let mut fx = tag_build(FakeBuildStatus::latest(10));

        let release = publish_in(&mut fx, &TagOptions::default()).unwrap().unwrap();

        assert_eq!(release.tag_name, "v1.2.0");
        assert_eq!(release.name.as_deref(), Some("v1.2.0"));
        assert_eq!(
            fx.repo.mutations()[0],
            Call::Create {
                tag: "_ci-v1.2.0-tag".into(),
                draft: true,
                prerelease: false
            }
        );
        assert_eq!(
            fx.status.calls(),
            vec![
                "last_build_number(owner/project, v1.2.0, [])",
                "last_build_number(owner/project, v1.2.0, [])"
            ]
        );
    }

    #[test]
    fn skips_branch_builds() {
        let mut fx = Fixture::new(FakeBuildStatus::latest(10));

        assert!(publish_in(&mut fx, &TagOptions::default()).unwrap().is_none());
        assert!(fx.repo.calls().is_empty());
    }

    #[test]
    fn existing_release_without_force_is_a_conflict() {
        let mut fx = tag_build(FakeBuildStatus::latest(10));
        let original = fx.repo.add_release("v1.2.0", false);

        let err = publish_in(&mut fx, &TagOptions::default()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PublisherError>(),
            Some(PublisherError::TagReleaseExists(tag)) if tag == "v1.2.0"
        ));
        assert_eq!(fx.repo.release_by_tag("v1.2.0"), Some(original));
        assert_eq!(fx.repo.tags(), vec!["v1.2.0"]);
        assert!(
            fx.repo
                .mutations()
                .contains(&Call::DeleteRelease("_ci-v1.2.0-tag".into()))
        );
    }

    #[test]
    fn force_recreate_keeps_the_git_tag() {
        let mut fx = tag_build(FakeBuildStatus::latest(10));
        let original = fx.repo.add_release("v1.2.0", false);
        let opts = TagOptions {
            force_recreate: true,
            ..TagOptions::default()
        };

        let release = publish_in(&mut fx, &opts).unwrap().unwrap();

        assert_ne!(release.id, original.id);
        let mutations = fx.repo.mutations();
        assert!(mutations.contains(&Call::DeleteRelease("v1.2.0".into())));
        assert!(!mutations.iter().any(|c| matches!(c, Call::DeleteTag(_))));
        assert_eq!(fx.repo.tags(), vec!["v1.2.0"]);
    }

    #[test]
    fn superseded_tag_build_backs_out() {
        let mut fx = tag_build(FakeBuildStatus::with_latest_sequence(&[10, 12]));

        assert!(publish_in(&mut fx, &TagOptions::default()).unwrap().is_none());
        assert!(fx.repo.tags().is_empty());
    }

    #[test]
    fn cleanup_matches_the_current_tag_only() {
        let mut fx = tag_build(FakeBuildStatus::latest(10));
        fx.repo.add_release("_ci-v1.2.0-tag", true);
        fx.repo.add_release("_ci-v1.1.0-tag", true);
        let releases = fx.repo.releases();
        let (session, reporter) = fx.parts();

        let report = cleanup(&session, &releases, &[], reporter);

        assert_eq!(report.deleted, vec!["_ci-v1.2.0-tag"]);
    }
}
