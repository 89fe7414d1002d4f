//! Retention rules for numbered releases.
//!
//! Only releases with a lower build number than the current build are considered, so a
//! restarted old build never deletes releases of builds newer than itself.

use chrono::{DateTime, Utc};

use crate::config::{RetentionPolicy, TagConfig};
use crate::engine::Reporter;
use crate::repository::{DeletionReport, ReleaseRepository, delete_best_effort};
use crate::tags::{NumberedTag, TagCodec};
use crate::types::Release;

/// Releases selected for deletion by each rule.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetentionPlan<'a> {
    pub by_count: Vec<&'a Release>,
    pub by_time: Vec<&'a Release>,
}

/// Numbered releases of `branch` older than `build_number`, ascending by build number.
pub fn previous_numbered<'a>(
    tags: &TagConfig,
    releases: &'a [Release],
    branch: &str,
    build_number: u64,
) -> Vec<&'a Release> {
    let codec = NumberedTag::new(tags);
    let mut previous: Vec<(u64, &Release)> = releases
        .iter()
        .filter_map(|r| {
            let key = codec.decode(&r.tag_name)?;
            (key.branch == branch && key.build_number < build_number)
                .then_some((key.build_number, r))
        })
        .collect();
    previous.sort_by_key(|(n, _)| *n);
    previous.into_iter().map(|(_, r)| r).collect()
}

/// Decide what to delete from `previous` (oldest first).
///
/// The count rule accounts for the release about to be published and removes the oldest
/// surplus. The time rule then applies to whatever the count rule kept.
pub fn plan<'a>(
    previous: &[&'a Release],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionPlan<'a> {
    let mut remaining = previous;
    let mut plan = RetentionPlan::default();

    if policy.keep_count() > 0 {
        let extra = excess_count(previous.len(), policy.keep_count());
        plan.by_count = previous[..extra].to_vec();
        remaining = &previous[extra..];
    }

    if policy.keep_time() > 0 {
        let max_age_ms = policy.keep_time().saturating_mul(1000);
        plan.by_time = remaining
            .iter()
            .copied()
            .filter(|r| {
                let age_ms = (now - r.created_at).num_milliseconds();
                age_ms > 0 && age_ms.unsigned_abs() > max_age_ms
            })
            .collect();
    }

    plan
}

/// Releases to drop so that, with one more release added, at most `keep_count` remain.
fn excess_count(previous: usize, keep_count: u64) -> usize {
    let keep = usize::try_from(keep_count).unwrap_or(usize::MAX);
    (previous + 1).saturating_sub(keep).min(previous)
}

/// Apply `policy` to the numbered releases of the current branch. Deletions are
/// best-effort: failures are reported and skipped.
#[allow(clippy::too_many_arguments)]
pub fn enforce(
    repo: &dyn ReleaseRepository,
    tags: &TagConfig,
    releases: &[Release],
    branch: &str,
    build_number: u64,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    reporter: &mut dyn Reporter,
) -> DeletionReport {
    reporter.info("Executing retention policy rules.");
    let previous = previous_numbered(tags, releases, branch, build_number);
    let plan = plan(&previous, policy, now);
    let mut report = DeletionReport::default();

    if policy.keep_count() > 0 {
        reporter.info(&format!(
            "Keeping only {} numbered releases for \"{branch}\" branch.",
            policy.keep_count()
        ));
        reporter.info(&format!(
            "Found {} previous numbered release(s) for \"{branch}\" branch. Accounting for the one we are about to create, {} of existing numbered releases must be deleted.",
            previous.len(),
            plan.by_count.len()
        ));
        report = delete_best_effort(repo, plan.by_count.iter().copied(), reporter);
    }

    if policy.keep_time() > 0 {
        reporter.info(&format!(
            "Keeping numbered releases that are not older than {} seconds for \"{branch}\" branch.",
            policy.keep_time()
        ));
        reporter.info(&format!(
            "Found {} numbered release(s) for \"{branch}\" branch. {} of them will be deleted due to being too old.",
            previous.len() - plan.by_count.len(),
            plan.by_time.len()
        ));
        let by_time = delete_best_effort(repo, plan.by_time.iter().copied(), reporter);
        report.deleted.extend(by_time.deleted);
        report.failed.extend(by_time.failed);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRepository, RecordingReporter, release_at};
    use chrono::Duration;

    fn tags() -> TagConfig {
        TagConfig::default()
    }

    #[test]
    fn previous_releases_are_filtered_and_sorted() {
        let now = Utc::now();
        let releases = vec![
            release_at(1, "ci-master-12", false, now),
            release_at(2, "ci-master-3", false, now),
            release_at(3, "ci-master-20", false, now),
            release_at(4, "ci-feature-5", false, now),
            release_at(5, "ci-master-latest", false, now),
            release_at(6, "_ci-master-4", true, now),
            release_at(7, "ci-master-7", true, now),
        ];

        let previous = previous_numbered(&tags(), &releases, "master", 20);

        let names: Vec<_> = previous.iter().map(|r| r.tag_name.as_str()).collect();
        assert_eq!(names, vec!["ci-master-3", "ci-master-7", "ci-master-12"]);
    }

    #[test]
    fn count_rule_makes_room_for_the_new_release() {
        let now = Utc::now();
        let releases: Vec<_> = (1..=3)
            .map(|n| release_at(n, &format!("ci-master-{n}"), false, now))
            .collect();
        let previous: Vec<_> = releases.iter().collect();

        let plan = plan(&previous, &RetentionPolicy::new(2, 0).unwrap(), now);

        let names: Vec<_> = plan.by_count.iter().map(|r| r.tag_name.as_str()).collect();
        assert_eq!(names, vec!["ci-master-1", "ci-master-2"]);
        assert!(plan.by_time.is_empty());
    }

    #[test]
    fn count_rule_deletes_nothing_below_the_limit() {
        let now = Utc::now();
        let releases = vec![release_at(1, "ci-master-1", false, now)];
        let previous: Vec<_> = releases.iter().collect();

        let plan = plan(&previous, &RetentionPolicy::new(5, 0).unwrap(), now);

        assert!(plan.by_count.is_empty());
    }

    #[test]
    fn time_rule_only_sees_releases_kept_by_count() {
        let now = Utc::now();
        let releases = vec![
            release_at(1, "ci-master-1", false, now - Duration::hours(5)),
            release_at(2, "ci-master-2", false, now - Duration::hours(4)),
            release_at(3, "ci-master-3", false, now - Duration::minutes(1)),
        ];
        let previous: Vec<_> = releases.iter().collect();

        let plan = plan(&previous, &RetentionPolicy::new(3, 3600).unwrap(), now);

        let by_count: Vec<_> = plan.by_count.iter().map(|r| r.tag_name.as_str()).collect();
        let by_time: Vec<_> = plan.by_time.iter().map(|r| r.tag_name.as_str()).collect();
        assert_eq!(by_count, vec!["ci-master-1"]);
        assert_eq!(by_time, vec!["ci-master-2"]);
    }

    #[test]
    fn enforce_deletes_and_reports() {
        let repo = FakeRepository::new();
        repo.add_release_aged("ci-master-1", false, Duration::days(3));
        repo.add_release_aged("ci-master-2", false, Duration::days(2));
        repo.add_release_aged("ci-master-3", false, Duration::minutes(5));
        repo.fail_deletion_of("ci-master-2");
        let releases = repo.releases();
        let mut reporter = RecordingReporter::default();

        let report = enforce(
            &repo,
            &tags(),
            &releases,
            "master",
            4,
            &RetentionPolicy::new(0, 86_400).unwrap(),
            Utc::now(),
            &mut reporter,
        );

        assert_eq!(report.deleted, vec!["ci-master-1"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(repo.tags(), vec!["ci-master-2", "ci-master-3"]);
        assert!(reporter.infos().contains(
            &"Found 3 numbered release(s) for \"master\" branch. 2 of them will be deleted due to being too old."
                .to_string()
        ));
    }
}
