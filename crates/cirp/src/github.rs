//! GitHub REST API adapter for [`ReleaseRepository`].

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use reqwest::Url;
use reqwest::blocking::RequestBuilder;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};

use crate::error::PublisherError;
use crate::http::HttpClient;
use crate::repository::ReleaseRepository;
use crate::types::{Asset, NewRelease, Release, ReleaseUpdate};

/// GitHub caps page sizes at 100.
const PER_PAGE: usize = 100;
const API_MEDIA_TYPE: &str = "application/vnd.github+json";
const BINARY_MEDIA_TYPE: &str = "application/octet-stream";

/// Releases of one GitHub repository.
#[derive(Clone)]
pub struct GithubRepository {
    http: HttpClient,
    api_url: Url,
    owner: String,
    repo: String,
    token: String,
}

impl GithubRepository {
    pub fn new(http: HttpClient, api_url: &str, repo_slug: &str, token: &str) -> Result<Self> {
        let api_url = Url::parse(api_url)
            .map_err(|e| PublisherError::config(format!("invalid GitHub API URL \"{api_url}\": {e}")))?;
        let (owner, repo) = repo_slug
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
            .ok_or_else(|| {
                PublisherError::config(format!(
                    "repository slug must look like \"owner/name\", got \"{repo_slug}\""
                ))
            })?;
        Ok(Self {
            http,
            api_url,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        })
    }

    /// `{api}/repos/{owner}/{repo}/{segments...}` with every segment percent-encoded.
    fn repo_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("GitHub API URL cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .push("repos")
            .push(&self.owner)
            .push(&self.repo)
            .extend(segments);
        Ok(url)
    }

    fn page_url(&self, segments: &[&str], page: usize) -> Result<Url> {
        let mut url = self.repo_url(segments)?;
        url.query_pairs_mut()
            .append_pair("per_page", &PER_PAGE.to_string())
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(AUTHORIZATION, format!("token {}", self.token))
    }

    fn api(&self, builder: RequestBuilder) -> RequestBuilder {
        self.authorized(builder).header(ACCEPT, API_MEDIA_TYPE)
    }

    fn get_all_pages<T>(&self, segments: &[&str], what: &str) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        for page in 1.. {
            let url = self.page_url(segments, page)?;
            let batch: Vec<T> = self
                .http
                .send(what, |c| self.api(c.get(url.clone())))?
                .json()
                .with_context(|| format!("failed to parse response of {what}"))?;
            let len = batch.len();
            items.extend(batch);
            if len < PER_PAGE {
                break;
            }
        }
        Ok(items)
    }
}

impl ReleaseRepository for GithubRepository {
    fn list_releases(&self) -> Result<Vec<Release>> {
        self.get_all_pages(&["releases"], "listing releases")
    }

    fn create_release(&self, release: &NewRelease) -> Result<Release> {
        let url = self.repo_url(&["releases"])?;
        let what = format!("creating release \"{}\"", release.tag_name);
        self.http
            .send(&what, |c| self.api(c.post(url.clone())).json(release))?
            .json()
            .with_context(|| format!("failed to parse response of {what}"))
    }

    fn update_release(&self, release: &Release, update: &ReleaseUpdate) -> Result<Release> {
        let id = release.id.to_string();
        let url = self.repo_url(&["releases", &id])?;
        let what = format!("updating release \"{}\"", release.tag_name);
        self.http
            .send(&what, |c| self.api(c.patch(url.clone())).json(update))?
            .json()
            .with_context(|| format!("failed to parse response of {what}"))
    }

    fn delete_release(&self, release: &Release) -> Result<()> {
        let id = release.id.to_string();
        let url = self.repo_url(&["releases", &id])?;
        let what = format!("deleting release \"{}\"", release.tag_name);
        self.http.send(&what, |c| self.api(c.delete(url.clone())))?;
        Ok(())
    }

    fn delete_tag(&self, tag_name: &str) -> Result<()> {
        // Tag names may contain '/', which the refs API expects as path separators.
        let mut segments = vec!["git", "refs", "tags"];
        segments.extend(tag_name.split('/'));
        let url = self.repo_url(&segments)?;
        let what = format!("deleting tag \"{tag_name}\"");
        self.http.send(&what, |c| self.api(c.delete(url.clone())))?;
        Ok(())
    }

    fn upload_asset(&self, release: &Release, path: &Path) -> Result<Asset> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("artifact path has no file name: {}", path.display()))?;
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read artifact {}", path.display()))?;

        // The upload URL is an RFC 6570 template: ".../assets{?name,label}".
        let template = release.upload_url.split('{').next().unwrap_or_default();
        let url = Url::parse_with_params(template, &[("name", name.as_str())])
            .with_context(|| format!("invalid upload URL \"{}\"", release.upload_url))?;

        let what = format!("uploading \"{name}\" to release \"{}\"", release.tag_name);
        self.http
            .send(&what, |c| {
                self.api(c.post(url.clone()))
                    .header(CONTENT_TYPE, BINARY_MEDIA_TYPE)
                    .body(data.clone())
            })?
            .json()
            .with_context(|| format!("failed to parse response of {what}"))
    }

    fn list_assets(&self, release: &Release) -> Result<Vec<Asset>> {
        let id = release.id.to_string();
        self.get_all_pages(
            &["releases", &id, "assets"],
            &format!("listing assets of release \"{}\"", release.tag_name),
        )
    }

    fn download_asset(&self, asset: &Asset, dest_dir: &Path) -> Result<PathBuf> {
        let url = Url::parse(&asset.url)
            .with_context(|| format!("invalid asset URL \"{}\"", asset.url))?;
        let what = format!("downloading \"{}\"", asset.name);
        // Assets of drafts are private: the token is required and the octet-stream media
        // type makes GitHub redirect to the file itself.
        let mut resp = self.http.send(&what, |c| {
            self.authorized(c.get(url.clone()))
                .header(ACCEPT, BINARY_MEDIA_TYPE)
        })?;

        let filename = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(content_disposition_filename)
            .unwrap_or_else(|| asset.name.clone());
        let filename = Path::new(&filename)
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| anyhow!("refusing to write asset with file name \"{filename}\""))?;

        let path = dest_dir.join(filename);
        let mut file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        resp.copy_to(&mut file)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Extract the `filename` parameter of a `Content-Disposition` header value.
fn content_disposition_filename(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (key, val) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let val = val.trim();
        let val = val
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(val);
        (!val.is_empty()).then(|| val.to_string())
    })
}
