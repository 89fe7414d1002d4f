//! # cirp
//!
//! Publishes CI build artifacts as GitHub releases and garbage-collects the releases it
//! leaves behind. Builds are coordinated through the Travis CI API.
//!
//! ## Release kinds
//!
//! - **Latest**: `ci-<branch>-latest`, recreated by the newest build of a branch.
//! - **Numbered**: `ci-<branch>-<build_number>`, one per build, pruned by a retention
//!   policy.
//! - **Tag**: the release of a pushed git tag.
//! - **Temporary store**: `ci-<branch>-<build>-<job>-tmp`, per-job drafts that carry
//!   artifacts to the job that publishes them.
//!
//! ## Publishing protocol
//!
//! Every release is created as a draft under a temporary tag name (`_` + the final tag,
//! by default), filled with artifacts, and only then renamed to its final tag. Latest and
//! tag releases check twice that the running build is still the newest one, so a slower
//! older build never replaces the release of a newer build. Leftovers of failed or
//! cancelled jobs are removed by the cleanup commands once no build that could still be
//! writing them is running.
//!
//! ## Modules
//!
//! - [`engine`]: The five commands: store, cleanup store, collect, publish, cleanup publish
//! - [`tags`]: Tag-name codecs of every release kind
//! - [`retention`]: Keep-count and keep-time rules for numbered releases
//! - [`repository`]: `ReleaseRepository` trait, artifact transfer and deletion helpers
//! - [`build_status`]: `BuildStatus` trait answering questions about CI builds
//! - [`github`] / [`travis`]: HTTP implementations of the two traits
//! - [`config`]: `.ci-release-publisher.toml` loading and per-command options
//! - [`environment`]: Build identity and credentials read from the environment

/// Release kinds publishable by the `publish` command and their cleanups.
pub mod latest;
pub mod numbered;
pub mod tag_release;

/// Temporary store releases: store, collect and cleanup.
pub mod store;

/// The five commands and the `Reporter` progress trait.
pub mod engine;

/// `BuildStatus` trait.
pub mod build_status;

/// Configuration file and per-command options.
pub mod config;

/// Build identity and credentials from the CI environment.
pub mod environment;

/// `PublisherError` and the top-level error summary.
pub mod error;

/// GitHub REST API implementation of `ReleaseRepository`.
pub mod github;

/// Blocking HTTP client with retries.
pub mod http;

/// `ReleaseRepository` trait and helpers built on it.
pub mod repository;

/// Retention rules for numbered releases.
pub mod retention;

/// Tag-name codecs.
pub mod tags;

/// Travis CI API implementation of `BuildStatus`.
pub mod travis;

/// Release and asset types, and the CLI token enums.
pub mod types;

/// Retry strategies with backoff and jitter.
/// Re-exported from cirp-retry microcrate.
pub use cirp_retry as retry;

/// Redaction of secrets in printed text.
/// Re-exported from cirp-output-sanitizer microcrate.
pub use cirp_output_sanitizer as sanitizer;

/// In-memory fakes used by the unit tests.
#[cfg(test)]
pub(crate) mod testing;
