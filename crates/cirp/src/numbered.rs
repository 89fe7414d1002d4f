//! Numbered releases: a `<prefix>-<branch>-<build_number>` release per build, pruned by
//! the retention policy.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use crate::config::NumberedOptions;
use crate::engine::{Reporter, Session};
use crate::repository::{DeletionReport, delete_best_effort, delete_release_with_tag, upload_artifacts};
use crate::retention;
use crate::tags::{NumberedKey, NumberedTag, TagCodec};
use crate::types::{NewRelease, Release};

pub fn publish(
    session: &Session<'_>,
    releases: &[Release],
    artifact_dir: &Path,
    opts: &NumberedOptions,
    reporter: &mut dyn Reporter,
) -> Result<Option<Release>> {
    let identity = session.identity;
    if identity.tag.is_some() {
        return Ok(None);
    }
    let key = NumberedKey {
        branch: identity.branch.clone(),
        build_number: identity.build_number,
    };
    let codec = NumberedTag::new(session.tags);
    let tag_name = codec.encode(&key);
    reporter.info(&format!(
        "* Creating a numbered release with the tag name \"{tag_name}\"."
    ));

    retention::enforce(
        session.repo,
        session.tags,
        releases,
        &key.branch,
        key.build_number,
        &opts.retention,
        Utc::now(),
        reporter,
    );

    let release = &opts.release;
    let new = NewRelease {
        tag_name: codec.encode_tmp(&key),
        name: release.text.name_or_else(|| {
            format!("CI build of {} branch #{}", key.branch, key.build_number)
        }),
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

    if let Some(previous) = releases.iter().find(|r| r.tag_name == tag_name) {
        reporter.info(&format!(
            "This job appears to have been restarted as \"{tag_name}\" release already exists."
        ));
        delete_release_with_tag(session.repo, previous, reporter)?;
    }
    session
        .finalize(&draft, &tag_name, release.draft, reporter)
        .map(Some)
}

/// Delete incomplete numbered releases of the current branch: the current build's own, and
/// those of older builds that are no longer running.
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
        "* Deleting incomplete numbered releases left over due to jobs failing or being cancelled.",
    );
    let codec = NumberedTag::new(session.tags);
    let current = identity.build_number;
    let mut incomplete: Vec<(u64, &Release)> = releases
        .iter()
        .filter(|r| r.draft)
        .filter_map(|r| {
            let key = codec.decode_tmp(&r.tag_name)?;
            let n = key.build_number;
            let abandoned = n == current || (n < current && !unfinished.contains(&n));
            (key.branch == identity.branch && abandoned).then_some((n, r))
        })
        .collect();
    incomplete.sort_by_key(|(n, _)| *n);
    delete_best_effort(session.repo, incomplete.into_iter().map(|(_, r)| r), reporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FinalReleaseOptions, RetentionPolicy};
    use crate::testing::{Call, FakeBuildStatus, Fixture, artifact_dir, identity_with};

    fn opts(keep_count: i64) -> NumberedOptions {
        NumberedOptions {
            release: FinalReleaseOptions::default(),
            retention: RetentionPolicy::new(keep_count, 0).unwrap(),
        }
    }

    fn publish_in(fx: &mut Fixture, opts: &NumberedOptions) -> Option<Release> {
        let dir = artifact_dir(&["app.zip"]);
        let releases = fx.repo.releases();
        let (session, reporter) = fx.parts();
        publish(&session, &releases, dir.path(), opts, reporter).unwrap()
    }

    #[test]
    fn publishes_a_release_named_after_the_build() {
        let mut fx = Fixture::new(FakeBuildStatus::latest(10));

        let release = publish_in(&mut fx, &opts(5)).unwrap();

        assert_eq!(release.tag_name, "ci-master-10");
        assert_eq!(release.name.as_deref(), Some("CI build of master branch #10"));
        assert_eq!(
            release.body.as_deref(),
            Some(
                "This is an auto-generated release based on [Travis-CI build #5000](https://travis-ci.com/owner/project/builds/5000)"
            )
        );
        assert!(fx.status.calls().is_empty());
    }

    #[test]
    fn keep_count_two_deletes_the_two_oldest() {
        let mut fx = Fixture::new(FakeBuildStatus::latest(10));
        fx.repo.add_release("ci-master-7", false);
        fx.repo.add_release("ci-master-5", false);
        fx.repo.add_release("ci-master-8", false);
        fx.repo.add_release("ci-other-1", false);

        publish_in(&mut fx, &opts(2)).unwrap();

        let deleted: Vec<_> = fx
            .repo
            .mutations()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteRelease(tag) => Some(tag),
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec!["ci-master-5", "ci-master-7"]);
        assert_eq!(fx.repo.tags(), vec!["ci-master-10", "ci-master-8", "ci-other-1"]);
    }

    #[test]
    fn restarted_job_replaces_its_own_release() {
        let mut fx = Fixture::new(FakeBuildStatus::latest(10));
        fx.repo.add_release("ci-master-10", false);

        publish_in(&mut fx, &opts(50)).unwrap();

        assert!(fx.reporter.infos().contains(
            &"This job appears to have been restarted as \"ci-master-10\" release already exists."
                .to_string()
        ));
        assert_eq!(fx.repo.tags(), vec!["ci-master-10"]);
        assert!(fx.repo.mutations().contains(&Call::DeleteTag("ci-master-10".into())));
    }

    #[test]
    fn retention_never_touches_newer_builds() {
        let mut fx = Fixture::new(FakeBuildStatus::latest(10));
        fx.repo.add_release("ci-master-11", false);
        fx.repo.add_release("ci-master-12", false);

        publish_in(&mut fx, &opts(1)).unwrap();

        assert_eq!(
            fx.repo.tags(),
            vec!["ci-master-10", "ci-master-11", "ci-master-12"]
        );
    }

    #[test]
    fn skips_tag_builds() {
        let mut fx = Fixture::new(FakeBuildStatus::latest(10))
            .with_identity(identity_with(&[("TRAVIS_TAG", "v2")]));

        assert!(publish_in(&mut fx, &opts(1)).is_none());
        assert!(fx.repo.calls().is_empty());
    }

    #[test]
    fn cleanup_spares_drafts_of_running_builds() {
        let mut fx = Fixture::new(FakeBuildStatus::latest(10));
        fx.repo.add_release("_ci-master-10", true);
        fx.repo.add_release("_ci-master-9", true);
        fx.repo.add_release("_ci-master-8", true);
        fx.repo.add_release("_ci-master-11", true);
        fx.repo.add_release("_ci-feature-3", true);
        fx.repo.add_release("_ci-master-7", false);
        let releases = fx.repo.releases();
        let (session, reporter) = fx.parts();

        let report = cleanup(&session, &releases, &[9, 10, 11], reporter);

        assert_eq!(report.deleted, vec!["_ci-master-8", "_ci-master-10"]);
        assert_eq!(
            fx.repo.tags(),
            vec!["_ci-feature-3", "_ci-master-11", "_ci-master-7", "_ci-master-9"]
        );
    }
}
