use anyhow::Result;

use crate::types::EventType;

/// Liveness and failure information from the CI provider.
pub trait BuildStatus {
    /// Number of the most recent build of `branch_or_tag`, considering only builds
    /// triggered by one of `event_types` (`[]` or [`EventType::Any`] means all non-PR
    /// builds). Returns 0 when there is no such build.
    fn last_build_number(
        &self,
        repo_slug: &str,
        branch_or_tag: &str,
        event_types: &[EventType],
    ) -> Result<u64>;

    /// Numbers of builds of `branch` that are queued or running.
    fn unfinished_build_numbers(&self, repo_slug: &str, branch: &str) -> Result<Vec<u64>>;

    /// Whether the build has a finished job that failed without being allowed to fail.
    fn build_has_nonallowed_failure(&self, build_id: &str) -> Result<bool>;
}
