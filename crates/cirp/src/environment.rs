//! Build identity and credentials, read once per run from the CI environment.

use crate::error::PublisherError;

pub const GITHUB_TOKEN_VAR: &str = "CIRP_GITHUB_ACCESS_TOKEN";
pub const GITHUB_TOKEN_FALLBACK_VAR: &str = "GITHUB_ACCESS_TOKEN";
pub const GITHUB_REPO_SLUG_VAR: &str = "CIRP_GITHUB_REPO_SLUG";
pub const TRAVIS_TOKEN_VAR: &str = "CIRP_TRAVIS_ACCESS_TOKEN";

/// Tokens used to talk to GitHub and Travis CI.
#[derive(Clone)]
pub struct Credentials {
    pub github_token: String,
    /// When absent the GitHub token is exchanged for a Travis token on first use.
    pub travis_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("github_token", &"***")
            .field("travis_token", &self.travis_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PublisherError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_token = non_empty(&lookup, GITHUB_TOKEN_VAR)
            .or_else(|| lookup(GITHUB_TOKEN_FALLBACK_VAR))
            .ok_or_else(|| PublisherError::MissingEnv(GITHUB_TOKEN_FALLBACK_VAR.to_string()))?;
        let travis_token = non_empty(&lookup, TRAVIS_TOKEN_VAR);
        Ok(Self {
            github_token,
            travis_token,
        })
    }

    pub fn from_env() -> Result<Self, PublisherError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Values that must never appear in printed output.
    pub fn secrets(&self) -> Vec<&str> {
        let mut secrets = vec![self.github_token.as_str()];
        if let Some(token) = &self.travis_token {
            secrets.push(token.as_str());
        }
        secrets
    }
}

/// Identity of the running CI job.
///
/// Only the fields every command needs are validated up front; the rest are checked
/// by their accessors so that a command fails only on the variables it actually uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    /// Repository the release artifacts are published to.
    pub artifact_repo_slug: String,
    /// True when `CIRP_GITHUB_REPO_SLUG` points the artifacts at a repository other than
    /// the one being built.
    pub publishing_to_other_repo: bool,
    pub branch: String,
    pub build_number: u64,
    /// Set only for builds triggered by a pushed tag.
    pub tag: Option<String>,
    ci_repo_slug: Option<String>,
    commit: Option<String>,
    build_id: Option<String>,
    build_web_url: Option<String>,
    job_number: Option<String>,
    job_id: Option<String>,
    test_result: Option<String>,
    allow_failure: Option<String>,
}

impl BuildIdentity {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PublisherError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ci_repo_slug = lookup("TRAVIS_REPO_SLUG");
        let override_slug = non_empty(&lookup, GITHUB_REPO_SLUG_VAR);
        let publishing_to_other_repo = override_slug.is_some();
        let artifact_repo_slug = override_slug
            .or_else(|| ci_repo_slug.clone())
            .ok_or_else(|| PublisherError::MissingEnv("TRAVIS_REPO_SLUG".to_string()))?;

        let branch = required(&lookup, "TRAVIS_BRANCH")?;
        let build_number = parse_number("TRAVIS_BUILD_NUMBER", &required(&lookup, "TRAVIS_BUILD_NUMBER")?)?;

        Ok(Self {
            artifact_repo_slug,
            publishing_to_other_repo,
            branch,
            build_number,
            tag: non_empty(&lookup, "TRAVIS_TAG"),
            ci_repo_slug,
            commit: lookup("TRAVIS_COMMIT"),
            build_id: lookup("TRAVIS_BUILD_ID"),
            build_web_url: lookup("TRAVIS_BUILD_WEB_URL"),
            job_number: lookup("TRAVIS_JOB_NUMBER"),
            job_id: lookup("TRAVIS_JOB_ID"),
            test_result: lookup("TRAVIS_TEST_RESULT"),
            allow_failure: lookup("TRAVIS_ALLOW_FAILURE"),
        })
    }

    pub fn from_env() -> Result<Self, PublisherError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Repository being built (`TRAVIS_REPO_SLUG`).
    pub fn ci_repo_slug(&self) -> Result<&str, PublisherError> {
        field(&self.ci_repo_slug, "TRAVIS_REPO_SLUG")
    }

    pub fn commit(&self) -> Result<&str, PublisherError> {
        field(&self.commit, "TRAVIS_COMMIT")
    }

    pub fn build_id(&self) -> Result<&str, PublisherError> {
        field(&self.build_id, "TRAVIS_BUILD_ID")
    }

    pub fn build_web_url(&self) -> Result<&str, PublisherError> {
        field(&self.build_web_url, "TRAVIS_BUILD_WEB_URL")
    }

    pub fn job_id(&self) -> Result<&str, PublisherError> {
        field(&self.job_id, "TRAVIS_JOB_ID")
    }

    /// Job number within the build: the part after the `.` of `TRAVIS_JOB_NUMBER`
    /// (`"42.3"` is job 3 of build 42).
    pub fn job_number(&self) -> Result<u64, PublisherError> {
        let raw = field(&self.job_number, "TRAVIS_JOB_NUMBER")?;
        let job = raw.split_once('.').map(|(_, job)| job).ok_or_else(|| {
            PublisherError::config(format!(
                "Environment variable \"TRAVIS_JOB_NUMBER\" must look like \"<build>.<job>\", got \"{raw}\"."
            ))
        })?;
        parse_number("TRAVIS_JOB_NUMBER", job)
    }

    /// The current job has failed its script and is not allowed to fail.
    ///
    /// Jobs are reported as failed by the API only once they finish, so the running job
    /// can only learn about its own failure from the environment.
    pub fn has_nonallowed_failure(&self) -> bool {
        self.test_result.as_deref() == Some("1") && self.allow_failure.as_deref() == Some("false")
    }

    /// Commit a release points to unless the user overrides it.
    pub fn default_target_commitish(&self) -> Result<Option<String>, PublisherError> {
        if self.publishing_to_other_repo {
            return Ok(None);
        }
        self.commit().map(|c| Some(c.to_string()))
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, name: &str) -> Result<String, PublisherError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or_else(|| PublisherError::MissingEnv(name.to_string()))
}

fn field<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, PublisherError> {
    value
        .as_deref()
        .ok_or_else(|| PublisherError::MissingEnv(name.to_string()))
}

fn parse_number(name: &str, raw: &str) -> Result<u64, PublisherError> {
    raw.trim().parse().map_err(|_| {
        PublisherError::config(format!(
            "Environment variable \"{name}\" must be a non-negative integer, got \"{raw}\"."
        ))
    })
}
