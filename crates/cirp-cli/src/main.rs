use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::{Args, Parser, Subcommand};

use cirp::config::{
    CleanupStoreOptions, CliOverrides, FinalReleaseOptions, LatestOptions, NumberedOptions,
    PublishOptions, PublisherConfig, ReleaseText, RetentionPolicy, StoreOptions, TagOptions,
    TravisInstance,
};
use cirp::engine::{self, Reporter, Session};
use cirp::environment::{BuildIdentity, Credentials};
use cirp::error::{PublisherError, summarize};
use cirp::github::GithubRepository;
use cirp::http::HttpClient;
use cirp::sanitizer::sanitize_line;
use cirp::travis::TravisClient;
use cirp::types::{CleanupCompleteness, CleanupScope, EventType};

#[derive(Parser, Debug)]
#[command(name = "ci-release-publisher", version)]
#[command(about = "Publish Travis CI build artifacts as GitHub releases")]
struct Cli {
    #[command(flatten)]
    travis: TravisInstanceArgs,

    /// GitHub API URL, for GitHub Enterprise (default: https://api.github.com)
    #[arg(long, value_name = "URL")]
    github_api_url: Option<String>,

    /// Prefix of every tag created (default: ci)
    #[arg(long, value_name = "PREFIX")]
    tag_prefix: Option<String>,

    /// Extra prefix of releases that are still being assembled (default: _)
    #[arg(long = "tag-prefix-incomplete-releases", value_name = "PREFIX")]
    tag_prefix_incomplete: Option<String>,

    /// Configuration file (default: .ci-release-publisher.toml in the working directory, if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Timeout of a single HTTP request (e.g. 15s, 1m)
    #[arg(long, value_parser = parse_duration)]
    http_timeout: Option<Duration>,

    /// Max attempts per HTTP request, counting the first one.
    #[arg(long)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    cmd: Commands,
}

/// Travis CI instance the build runs on (default: travis-ci.com).
#[derive(Args, Debug)]
#[group(required = false, multiple = false)]
struct TravisInstanceArgs {
    /// Use travis-ci.org.
    #[arg(long)]
    travis_instance_org: bool,

    /// Use travis-ci.com.
    #[arg(long)]
    travis_instance_com: bool,

    /// Use a self-hosted Travis CI instance, given by its web URL.
    #[arg(long, value_name = "URL")]
    travis_instance_custom: Option<String>,
}

impl TravisInstanceArgs {
    fn selected(&self) -> Result<Option<TravisInstance>> {
        if self.travis_instance_org {
            return Ok(Some(TravisInstance::Org));
        }
        if self.travis_instance_com {
            return Ok(Some(TravisInstance::Com));
        }
        match &self.travis_instance_custom {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(Some(TravisInstance::Custom(url.clone())))
            }
            Some(url) => Err(PublisherError::config(format!(
                "--travis-instance-custom must be an http(s) URL, got \"{url}\"."
            ))
            .into()),
            None => Ok(None),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store the artifacts of the current job in a temporary draft release.
    Store(StoreArgs),
    /// Delete temporary store releases.
    #[command(name = "cleanup_store")]
    CleanupStore(CleanupStoreArgs),
    /// Download the artifacts stored by every job of the current build.
    Collect {
        /// Directory to download the artifacts into. Must exist.
        artifact_dir: PathBuf,
    },
    /// Publish the artifacts as latest, numbered and/or tag releases.
    Publish(PublishArgs),
    /// Delete incomplete releases left over by failed or cancelled jobs.
    #[command(name = "cleanup_publish")]
    CleanupPublish,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Directory containing the artifacts to store.
    artifact_dir: PathBuf,

    /// Release name text. If not specified a predefined text is used.
    #[arg(long)]
    release_name: Option<String>,

    /// Release body text. If not specified a predefined text is used.
    #[arg(long)]
    release_body: Option<String>,
}

#[derive(Args, Debug)]
struct CleanupStoreArgs {
    /// Scope to clean up: current-job, current-build, previous-finished-builds.
    #[arg(long, num_args = 1.., required = true)]
    scope: Vec<CleanupScope>,

    /// Releases to clean up: complete, incomplete.
    #[arg(long, num_args = 1.., required = true)]
    release: Vec<CleanupCompleteness>,

    /// Clean up only if a job of the current build has failed without being allowed to.
    #[arg(long)]
    on_nonallowed_failure: bool,
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// Directory containing the artifacts to publish.
    artifact_dir: PathBuf,

    #[command(flatten)]
    latest: LatestArgs,

    #[command(flatten)]
    numbered: NumberedArgs,

    #[command(flatten)]
    tag: TagArgs,
}

#[derive(Args, Debug)]
struct LatestArgs {
    /// Publish a latest release. The same "<prefix>-<branch>-latest" release is recreated by each build.
    #[arg(long)]
    latest_release: bool,

    /// Release name text. If not specified a predefined text is used.
    #[arg(long)]
    latest_release_name: Option<String>,

    /// Release body text. If not specified a predefined text is used.
    #[arg(long)]
    latest_release_body: Option<String>,

    /// Publish as a draft.
    #[arg(long)]
    latest_release_draft: bool,

    /// Publish as a prerelease.
    #[arg(long)]
    latest_release_prerelease: bool,

    /// Commit the release points to. Defaults to $TRAVIS_COMMIT when publishing to the built repository.
    #[arg(long)]
    latest_release_target_commitish: Option<String>,

    /// Consider only builds of these event types when checking if the current build is the latest.
    #[arg(long, num_args = 1.., default_values_t = [EventType::Any])]
    latest_release_check_event_type: Vec<EventType>,
}

#[derive(Args, Debug)]
struct NumberedArgs {
    /// Publish a numbered release. A separate "<prefix>-<branch>-<build_number>" release is made for each build.
    #[arg(long)]
    numbered_release: bool,

    /// Number of numbered releases to keep. 0 disables the check.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    numbered_release_keep_count: i64,

    /// How long to keep numbered releases for, in seconds. 0 disables the check.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    numbered_release_keep_time: i64,

    /// Release name text. If not specified a predefined text is used.
    #[arg(long)]
    numbered_release_name: Option<String>,

    /// Release body text. If not specified a predefined text is used.
    #[arg(long)]
    numbered_release_body: Option<String>,

    /// Publish as a draft.
    #[arg(long)]
    numbered_release_draft: bool,

    /// Publish as a prerelease.
    #[arg(long)]
    numbered_release_prerelease: bool,

    /// Commit the release points to. Defaults to $TRAVIS_COMMIT when publishing to the built repository.
    #[arg(long)]
    numbered_release_target_commitish: Option<String>,
}

#[derive(Args, Debug)]
struct TagArgs {
    /// Publish a release for the pushed tag. Tag builds only.
    #[arg(long)]
    tag_release: bool,

    /// Release name text. If not specified the tag name is used.
    #[arg(long)]
    tag_release_name: Option<String>,

    /// Release body text. If not specified a predefined text is used.
    #[arg(long)]
    tag_release_body: Option<String>,

    /// Publish as a draft.
    #[arg(long)]
    tag_release_draft: bool,

    /// Publish as a prerelease.
    #[arg(long)]
    tag_release_prerelease: bool,

    /// Commit the release points to. Defaults to $TRAVIS_COMMIT when publishing to the built repository.
    #[arg(long)]
    tag_release_target_commitish: Option<String>,

    /// Replace an existing release of the tag instead of failing. The git tag is kept.
    #[arg(long)]
    tag_release_force_recreate: bool,
}

/// A command with its options validated, ready to run.
enum Action {
    Store(PathBuf, StoreOptions),
    CleanupStore(CleanupStoreOptions),
    Collect(PathBuf),
    Publish(PathBuf, PublishOptions),
    CleanupPublish,
}

impl Commands {
    fn into_action(self) -> Result<Action> {
        let action = match self {
            Commands::Store(args) => Action::Store(
                args.artifact_dir,
                StoreOptions {
                    text: ReleaseText {
                        name: args.release_name,
                        body: args.release_body,
                    },
                },
            ),
            Commands::CleanupStore(args) => {
                let opts = CleanupStoreOptions {
                    scopes: args.scope,
                    completeness: args.release,
                    on_nonallowed_failure: args.on_nonallowed_failure,
                };
                opts.validate()?;
                Action::CleanupStore(opts)
            }
            Commands::Collect { artifact_dir } => Action::Collect(artifact_dir),
            Commands::Publish(args) => {
                let opts = publish_options(args.latest, args.numbered, args.tag)?;
                opts.validate()?;
                Action::Publish(args.artifact_dir, opts)
            }
            Commands::CleanupPublish => Action::CleanupPublish,
        };
        Ok(action)
    }
}

fn publish_options(latest: LatestArgs, numbered: NumberedArgs, tag: TagArgs) -> Result<PublishOptions> {
    let latest = latest.latest_release.then(|| LatestOptions {
        release: FinalReleaseOptions {
            text: ReleaseText {
                name: latest.latest_release_name,
                body: latest.latest_release_body,
            },
            draft: latest.latest_release_draft,
            prerelease: latest.latest_release_prerelease,
            target_commitish: latest.latest_release_target_commitish,
        },
        check_event_types: latest.latest_release_check_event_type,
    });

    let numbered = if numbered.numbered_release {
        Some(NumberedOptions {
            release: FinalReleaseOptions {
                text: ReleaseText {
                    name: numbered.numbered_release_name,
                    body: numbered.numbered_release_body,
                },
                draft: numbered.numbered_release_draft,
                prerelease: numbered.numbered_release_prerelease,
                target_commitish: numbered.numbered_release_target_commitish,
            },
            retention: RetentionPolicy::new(
                numbered.numbered_release_keep_count,
                numbered.numbered_release_keep_time,
            )?,
        })
    } else {
        None
    };

    let tag = tag.tag_release.then(|| TagOptions {
        release: FinalReleaseOptions {
            text: ReleaseText {
                name: tag.tag_release_name,
                body: tag.tag_release_body,
            },
            draft: tag.tag_release_draft,
            prerelease: tag.tag_release_prerelease,
            target_commitish: tag.tag_release_target_commitish,
        },
        force_recreate: tag.tag_release_force_recreate,
    });

    Ok(PublishOptions {
        latest,
        numbered,
        tag,
    })
}

/// Writes `HH:MM:SS [level] message` lines to stderr with known secrets redacted.
struct CliReporter {
    secrets: Vec<String>,
}

impl CliReporter {
    fn emit(&self, level: &str, msg: &str) {
        let secrets: Vec<&str> = self.secrets.iter().map(String::as_str).collect();
        eprintln!(
            "{} [{level}] {}",
            Local::now().format("%H:%M:%S"),
            sanitize_line(msg, &secrets)
        );
    }
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        self.emit("info", msg);
    }

    fn warn(&mut self, msg: &str) {
        self.emit("warn", msg);
    }

    fn error(&mut self, msg: &str) {
        self.emit("error", msg);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let credentials = Credentials::from_env();
    let secrets: Vec<String> = credentials
        .as_ref()
        .map(|c| c.secrets().into_iter().map(str::to_string).collect())
        .unwrap_or_default();
    let mut reporter = CliReporter { secrets };

    match run(cli, credentials, &mut reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let secrets: Vec<&str> = reporter.secrets.iter().map(String::as_str).collect();
            let summary = summarize(&err, &secrets);
            reporter.error(&summary);
            ExitCode::FAILURE
        }
    }
}

fn run(
    cli: Cli,
    credentials: Result<Credentials, PublisherError>,
    reporter: &mut CliReporter,
) -> Result<()> {
    let file_config = match &cli.config {
        Some(path) => PublisherConfig::load_from_file(path)?,
        None => PublisherConfig::load_from_dir(Path::new("."))?.unwrap_or_default(),
    };
    file_config.validate()?;
    let runtime = file_config.build_runtime_options(CliOverrides {
        travis_instance: cli.travis.selected()?,
        github_api_url: cli.github_api_url,
        tag_prefix: cli.tag_prefix,
        incomplete_prefix: cli.tag_prefix_incomplete,
        http_timeout: cli.http_timeout,
        max_attempts: cli.max_attempts,
    })?;
    let action = cli.cmd.into_action()?;

    let credentials = credentials?;
    let identity = BuildIdentity::from_env()?;
    let http = HttpClient::new(runtime.http_timeout, runtime.retry.clone())?;
    let repo = GithubRepository::new(
        http.clone(),
        &runtime.github_api_url,
        &identity.artifact_repo_slug,
        &credentials.github_token,
    )?;
    let status = TravisClient::new(
        http,
        &runtime.travis.api_url(),
        credentials.travis_token.clone(),
        &credentials.github_token,
    )?;
    let session = Session {
        repo: &repo,
        status: &status,
        tags: &runtime.tags,
        identity: &identity,
        travis_web_url: runtime.travis.web_url(),
    };

    match action {
        Action::Store(dir, opts) => {
            let release = engine::run_store(&session, &dir, &opts, reporter)?;
            reporter.info(&format!("Stored artifacts in \"{}\".", release.tag_name));
        }
        Action::CleanupStore(opts) => {
            let report = engine::run_cleanup_store(&session, &opts, reporter)?;
            report_deletions(reporter, &report);
        }
        Action::Collect(dir) => {
            let paths = engine::run_collect(&session, &dir, reporter)?;
            reporter.info(&format!(
                "Collected {} artifact(s) into \"{}\".",
                paths.len(),
                dir.display()
            ));
        }
        Action::Publish(dir, opts) => {
            for release in engine::run_publish(&session, &dir, &opts, reporter)? {
                reporter.info(&format!("Published \"{}\".", release.tag_name));
            }
        }
        Action::CleanupPublish => {
            let report = engine::run_cleanup_publish(&session, reporter)?;
            report_deletions(reporter, &report);
        }
    }

    Ok(())
}

fn report_deletions(reporter: &mut dyn Reporter, report: &cirp::repository::DeletionReport) {
    reporter.info(&format!(
        "Deleted {} release(s), {} failed.",
        report.deleted.len(),
        report.failed.len()
    ));
}

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}
