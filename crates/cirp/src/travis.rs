//! Travis CI API v3 adapter for [`BuildStatus`].

use std::cell::OnceCell;

use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use reqwest::blocking::RequestBuilder;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;

use crate::build_status::BuildStatus;
use crate::http::HttpClient;
use crate::types::EventType;

/// Travis caps page sizes at 100.
const PAGE_LIMIT: u64 = 100;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct BranchResponse {
    last_build: Option<BuildRef>,
}

#[derive(Deserialize)]
struct BuildRef {
    number: String,
}

#[derive(Deserialize)]
struct Pagination {
    limit: u64,
    count: u64,
}

#[derive(Deserialize)]
struct BuildsResponse {
    #[serde(rename = "@pagination")]
    pagination: Pagination,
    builds: Vec<BuildSummary>,
}

#[derive(Deserialize)]
struct BuildSummary {
    number: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    finished_at: Option<String>,
}

#[derive(Deserialize)]
struct BuildResponse {
    jobs: Vec<JobSummary>,
}

#[derive(Deserialize)]
struct JobSummary {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    allow_failure: bool,
}

/// Client for one Travis CI instance.
///
/// Without an explicit Travis token, the GitHub token is exchanged for one on the first
/// request that needs it.
pub struct TravisClient {
    http: HttpClient,
    api_url: Url,
    github_token: String,
    token: OnceCell<String>,
}

impl TravisClient {
    pub fn new(
        http: HttpClient,
        api_url: &str,
        travis_token: Option<String>,
        github_token: &str,
    ) -> Result<Self> {
        let api_url =
            Url::parse(api_url).with_context(|| format!("invalid Travis API URL \"{api_url}\""))?;
        let token = match travis_token {
            Some(token) => OnceCell::from(token),
            None => OnceCell::new(),
        };
        Ok(Self {
            http,
            api_url,
            github_token: github_token.to_string(),
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Travis API URL cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn token(&self) -> Result<&str> {
        if let Some(token) = self.token.get() {
            return Ok(token);
        }
        let exchanged = self.exchange_github_token()?;
        Ok(self.token.get_or_init(|| exchanged))
    }

    /// Trade the GitHub token for a Travis token. Only API 2.1 offers this endpoint.
    fn exchange_github_token(&self) -> Result<String> {
        let mut url = self.url(&["auth", "github"])?;
        url.query_pairs_mut()
            .append_pair("github_token", &self.github_token);
        let resp: TokenResponse = self
            .http
            .send("exchanging GitHub token for a Travis token", |c| {
                c.post(url.clone())
                    .header(ACCEPT, "application/vnd.travis-ci.2.1+json")
            })?
            .json()
            .context("failed to parse Travis token response")?;
        Ok(resp.access_token)
    }

    fn v3(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .header("Travis-API-Version", "3")
            .header(AUTHORIZATION, format!("token {token}"))
    }

    fn get_json<T>(&self, url: Url, what: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.token()?;
        self.http
            .send(what, |c| self.v3(c.get(url.clone()), token))?
            .json()
            .with_context(|| format!("failed to parse response of {what}"))
    }
}

fn parse_build_number(raw: &str) -> Result<u64> {
    raw.parse()
        .with_context(|| format!("Travis reported a non-numeric build number \"{raw}\""))
}

impl BuildStatus for TravisClient {
    fn last_build_number(
        &self,
        repo_slug: &str,
        branch_or_tag: &str,
        event_types: &[EventType],
    ) -> Result<u64> {
        if event_types.is_empty() || event_types.contains(&EventType::Any) {
            // The branch resource reports the last non-PR build directly.
            let url = self.url(&["repo", repo_slug, "branch", branch_or_tag])?;
            let branch: BranchResponse =
                self.get_json(url, &format!("fetching branch \"{branch_or_tag}\""))?;
            return match branch.last_build {
                Some(build) => parse_build_number(&build.number),
                None => Ok(0),
            };
        }

        let event_filter = event_types
            .iter()
            .map(EventType::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut url = self.url(&["repo", repo_slug, "builds"])?;
        url.query_pairs_mut()
            .append_pair("sort_by", "created_at:desc,id:desc")
            .append_pair("event_type", &event_filter)
            .append_pair("limit", "1")
            .append_pair("branch.name", branch_or_tag);
        let builds: BuildsResponse =
            self.get_json(url, &format!("fetching last build of \"{branch_or_tag}\""))?;
        match builds.builds.first() {
            Some(build) if builds.pagination.count > 0 => parse_build_number(&build.number),
            _ => Ok(0),
        }
    }

    fn unfinished_build_numbers(&self, repo_slug: &str, branch: &str) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();
        let mut offset = 0;
        let mut count = 1;

        while offset < count {
            let mut url = self.url(&["repo", repo_slug, "builds"])?;
            // Unfinished builds have no `finished_at` and sort first.
            url.query_pairs_mut()
                .append_pair("sort_by", "finished_at:desc")
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &PAGE_LIMIT.to_string())
                .append_pair("branch.name", branch);
            let page: BuildsResponse =
                self.get_json(url, &format!("listing builds of \"{branch}\""))?;

            let branch_builds: Vec<_> = page
                .builds
                .iter()
                .filter(|b| b.event_type.as_deref() != Some("pull_request"))
                .collect();
            for build in &branch_builds {
                if build.finished_at.is_none() {
                    numbers.push(parse_build_number(&build.number)?);
                }
            }
            if branch_builds.iter().any(|b| b.finished_at.is_some()) {
                break;
            }
            if page.pagination.limit == 0 {
                break;
            }
            offset += page.pagination.limit;
            count = page.pagination.count;
        }

        Ok(numbers)
    }

    fn build_has_nonallowed_failure(&self, build_id: &str) -> Result<bool> {
        let mut url = self.url(&["build", build_id])?;
        url.query_pairs_mut()
            .append_pair("include", "job.allow_failure,job.state");
        let build: BuildResponse = self.get_json(url, &format!("fetching build {build_id}"))?;
        Ok(build
            .jobs
            .iter()
            .any(|j| j.state.as_deref() == Some("failed") && !j.allow_failure))
    }
}
