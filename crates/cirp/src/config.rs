//! Configuration: the optional `.ci-release-publisher.toml` file, CLI overrides, and the
//! immutable per-run values threaded through every release kind.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cirp_retry::{RetryPolicy, RetryStrategyConfig, RetryStrategyType};
use serde::{Deserialize, Serialize};

use crate::error::PublisherError;
use crate::types::{CleanupCompleteness, CleanupScope, EventType};

pub const CONFIG_FILE_NAME: &str = ".ci-release-publisher.toml";
pub const DEFAULT_TAG_PREFIX: &str = "ci";
pub const DEFAULT_INCOMPLETE_PREFIX: &str = "_";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Tag prefixes shared by every tag codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagConfig {
    prefix: String,
    incomplete_prefix: String,
}

impl TagConfig {
    pub fn new(
        prefix: impl Into<String>,
        incomplete_prefix: impl Into<String>,
    ) -> Result<Self, PublisherError> {
        let prefix = prefix.into();
        let incomplete_prefix = incomplete_prefix.into();
        if prefix.is_empty() {
            return Err(PublisherError::config("--tag-prefix can't be empty."));
        }
        if incomplete_prefix.is_empty() {
            return Err(PublisherError::config(
                "--tag-prefix-incomplete-releases can't be empty.",
            ));
        }
        Ok(Self {
            prefix,
            incomplete_prefix,
        })
    }

    /// Prefix of every tag this tool creates, e.g. `ci`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Extra prefix marking releases that are still being assembled, e.g. `_`.
    pub fn incomplete_prefix(&self) -> &str {
        &self.incomplete_prefix
    }
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TAG_PREFIX.to_string(),
            incomplete_prefix: DEFAULT_INCOMPLETE_PREFIX.to_string(),
        }
    }
}

/// Travis CI deployment to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TravisInstance {
    Org,
    #[default]
    Com,
    /// Self-hosted instance, given by its web URL (not the API URL).
    Custom(String),
}

impl TravisInstance {
    pub fn web_url(&self) -> String {
        match self {
            TravisInstance::Org => "https://travis-ci.org".to_string(),
            TravisInstance::Com => "https://travis-ci.com".to_string(),
            TravisInstance::Custom(url) => url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> String {
        match self {
            TravisInstance::Org => "https://api.travis-ci.org".to_string(),
            TravisInstance::Com => "https://api.travis-ci.com".to_string(),
            TravisInstance::Custom(url) => format!("{}/api", url.trim_end_matches('/')),
        }
    }
}

impl FromStr for TravisInstance {
    type Err = PublisherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "org" => Ok(TravisInstance::Org),
            "com" => Ok(TravisInstance::Com),
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(TravisInstance::Custom(url.to_string()))
            }
            other => Err(PublisherError::config(format!(
                "travis.instance must be \"org\", \"com\" or an http(s) URL, got \"{other}\""
            ))),
        }
    }
}

impl fmt::Display for TravisInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TravisInstance::Org => f.write_str("org"),
            TravisInstance::Com => f.write_str("com"),
            TravisInstance::Custom(url) => f.write_str(url),
        }
    }
}

/// User-supplied release name/body; `None` means "use the generated text".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseText {
    pub name: Option<String>,
    pub body: Option<String>,
}

impl ReleaseText {
    pub fn name_or_else(&self, default: impl FnOnce() -> String) -> String {
        self.name.clone().unwrap_or_else(default)
    }

    /// The generated body usually needs build variables that may be missing.
    pub fn body_or_try_else<E>(
        &self,
        default: impl FnOnce() -> Result<String, E>,
    ) -> Result<String, E> {
        match &self.body {
            Some(body) => Ok(body.clone()),
            None => default(),
        }
    }
}

/// Options shared by the three publish kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalReleaseOptions {
    pub text: ReleaseText,
    /// Keep the release a draft after it is finalized.
    pub draft: bool,
    pub prerelease: bool,
    /// Commit the release points to. Defaults to the build commit when publishing to the
    /// CI repository and is left unset otherwise.
    pub target_commitish: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestOptions {
    pub release: FinalReleaseOptions,
    /// Only builds with these trigger events count when deciding whether this build is the
    /// latest one. Empty means [`EventType::Any`].
    pub check_event_types: Vec<EventType>,
}

impl Default for LatestOptions {
    fn default() -> Self {
        Self {
            release: FinalReleaseOptions::default(),
            check_event_types: vec![EventType::Any],
        }
    }
}

/// Validated retention rules for numbered releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep_count: u64,
    keep_time: u64,
}

impl RetentionPolicy {
    /// Both values come straight from the command line, where negative numbers are
    /// representable and must be rejected. Zero disables a rule; at least one rule
    /// must be enabled.
    pub fn new(keep_count: i64, keep_time: i64) -> Result<Self, PublisherError> {
        if keep_count < 0 {
            return Err(PublisherError::config(
                "--numbered-release-keep-count can't be set to a negative number.",
            ));
        }
        if keep_time < 0 {
            return Err(PublisherError::config(
                "--numbered-release-keep-time can't be set to a negative number.",
            ));
        }
        if keep_count == 0 && keep_time == 0 {
            return Err(PublisherError::config(
                "You must specify at least one of --numbered-release-keep-* options specifying the strategy for keeping numbered releases.",
            ));
        }
        Ok(Self {
            keep_count: keep_count.unsigned_abs(),
            keep_time: keep_time.unsigned_abs(),
        })
    }

    /// Number of numbered releases to keep, counting the one being published. 0 disables.
    pub fn keep_count(&self) -> u64 {
        self.keep_count
    }

    /// Maximum age in seconds of a previous numbered release. 0 disables.
    pub fn keep_time(&self) -> u64 {
        self.keep_time
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedOptions {
    pub release: FinalReleaseOptions,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagOptions {
    pub release: FinalReleaseOptions,
    /// Replace an existing release for the tag instead of failing. The git tag is kept.
    pub force_recreate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    pub text: ReleaseText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupStoreOptions {
    pub scopes: Vec<CleanupScope>,
    pub completeness: Vec<CleanupCompleteness>,
    /// Only clean up when the build is already known to fail.
    pub on_nonallowed_failure: bool,
}

impl CleanupStoreOptions {
    pub fn validate(&self) -> Result<(), PublisherError> {
        if self.scopes.is_empty() {
            return Err(PublisherError::config("--scope requires at least one value."));
        }
        if self.completeness.is_empty() {
            return Err(PublisherError::config(
                "--release requires at least one value.",
            ));
        }
        Ok(())
    }
}

/// Release kinds requested by a `publish` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub latest: Option<LatestOptions>,
    pub numbered: Option<NumberedOptions>,
    pub tag: Option<TagOptions>,
}

impl PublishOptions {
    pub fn validate(&self) -> Result<(), PublisherError> {
        if self.latest.is_none() && self.numbered.is_none() && self.tag.is_none() {
            return Err(PublisherError::config(
                "You must specify what kind of release you would like to publish.",
            ));
        }
        Ok(())
    }
}

/// `[tags]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagsConfig {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub incomplete_prefix: Option<String>,
}

/// `[github]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GithubConfig {
    #[serde(default)]
    pub api_url: Option<String>,
}

/// `[travis]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TravisConfig {
    /// `org`, `com`, or the URL of a self-hosted instance.
    #[serde(default)]
    pub instance: Option<String>,
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

/// `[retry]` section. Explicit values only take effect with `policy = "custom"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub policy: RetryPolicy,
    #[serde(default)]
    pub strategy: RetryStrategyType,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    RetryStrategyConfig::default().max_attempts
}

fn default_base_delay() -> Duration {
    RetryStrategyConfig::default().base_delay
}

fn default_max_delay() -> Duration {
    RetryStrategyConfig::default().max_delay
}

fn default_jitter() -> f64 {
    RetryStrategyConfig::default().jitter
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = RetryStrategyConfig::default();
        Self {
            policy: RetryPolicy::Default,
            strategy: defaults.strategy,
            max_attempts: defaults.max_attempts,
            base_delay: defaults.base_delay,
            max_delay: defaults.max_delay,
            jitter: defaults.jitter,
        }
    }
}

impl RetryConfig {
    fn effective(&self) -> RetryStrategyConfig {
        if self.policy == RetryPolicy::Custom {
            RetryStrategyConfig {
                strategy: self.strategy,
                max_attempts: self.max_attempts,
                base_delay: self.base_delay,
                max_delay: self.max_delay,
                jitter: self.jitter,
            }
        } else {
            self.policy.to_config()
        }
    }
}

/// Contents of `.ci-release-publisher.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    #[serde(default)]
    pub tags: TagsConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub travis: TravisConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Flags given on the command line. `None` means the flag was not passed.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub travis_instance: Option<TravisInstance>,
    pub github_api_url: Option<String>,
    pub tag_prefix: Option<String>,
    pub incomplete_prefix: Option<String>,
    pub http_timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub tags: TagConfig,
    pub github_api_url: String,
    pub travis: TravisInstance,
    pub http_timeout: Duration,
    pub retry: RetryStrategyConfig,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tags: TagConfig::default(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            travis: TravisInstance::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            retry: RetryStrategyConfig::default(),
        }
    }
}

impl PublisherConfig {
    /// Load `.ci-release-publisher.toml` from `dir`, if present.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&path).map(Some)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: PublisherConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(self.tags.prefix.as_deref(), Some("")) {
            bail!("tags.prefix cannot be empty");
        }
        if matches!(self.tags.incomplete_prefix.as_deref(), Some("")) {
            bail!("tags.incomplete_prefix cannot be empty");
        }
        if matches!(self.github.api_url.as_deref(), Some("")) {
            bail!("github.api_url cannot be empty");
        }
        if let Some(instance) = &self.travis.instance {
            instance.parse::<TravisInstance>()?;
        }
        if self.http.timeout.is_zero() {
            bail!("http.timeout must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be greater than 0");
        }
        if self.retry.max_delay < self.retry.base_delay {
            bail!("retry.max_delay must be greater than or equal to retry.base_delay");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            bail!("retry.jitter must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// Merge file values with CLI flags; flags win.
    pub fn build_runtime_options(&self, cli: CliOverrides) -> Result<RuntimeOptions> {
        let tags = TagConfig::new(
            cli.tag_prefix
                .or_else(|| self.tags.prefix.clone())
                .unwrap_or_else(|| DEFAULT_TAG_PREFIX.to_string()),
            cli.incomplete_prefix
                .or_else(|| self.tags.incomplete_prefix.clone())
                .unwrap_or_else(|| DEFAULT_INCOMPLETE_PREFIX.to_string()),
        )?;

        let travis = match cli.travis_instance {
            Some(instance) => instance,
            None => match &self.travis.instance {
                Some(instance) => instance.parse()?,
                None => TravisInstance::default(),
            },
        };

        let github_api_url = cli
            .github_api_url
            .filter(|url| !url.is_empty())
            .or_else(|| self.github.api_url.clone())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());

        let http_timeout = cli.http_timeout.unwrap_or(self.http.timeout);
        if http_timeout.is_zero() {
            return Err(PublisherError::config("--http-timeout must be greater than 0.").into());
        }

        let mut retry = self.retry.effective();
        if let Some(max_attempts) = cli.max_attempts {
            if max_attempts == 0 {
                return Err(
                    PublisherError::config("--max-attempts must be greater than 0.").into(),
                );
            }
            retry.max_attempts = max_attempts;
        }

        Ok(RuntimeOptions {
            tags,
            github_api_url,
            travis,
            http_timeout,
            retry,
        })
    }
}
