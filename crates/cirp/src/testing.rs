//! In-memory fakes for the collaborator traits, a recording reporter, and a tiny HTTP
//! server for adapter tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use tiny_http::{Header, Response, Server, StatusCode};

use crate::build_status::BuildStatus;
use crate::config::TagConfig;
use crate::engine::{Reporter, Session};
use crate::environment::BuildIdentity;
use crate::repository::ReleaseRepository;
use crate::types::{Asset, EventType, NewRelease, Release, ReleaseUpdate};

/// Repository-side effects observed by [`FakeRepository`], keyed by tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListReleases,
    Create {
        tag: String,
        draft: bool,
        prerelease: bool,
    },
    Update {
        tag: String,
        new_tag: Option<String>,
        draft: Option<bool>,
    },
    DeleteRelease(String),
    DeleteTag(String),
    Upload {
        tag: String,
        name: String,
    },
    ListAssets(String),
    Download(String),
}

impl Call {
    fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::ListReleases | Call::ListAssets(_) | Call::Download(_)
        )
    }
}

#[derive(Default)]
struct RepoState {
    releases: Vec<Release>,
    assets: HashMap<u64, Vec<(Asset, Vec<u8>)>>,
    next_id: u64,
    calls: Vec<Call>,
    failing_deletes: HashSet<String>,
}

#[derive(Default)]
pub struct FakeRepository {
    state: RefCell<RepoState>,
}

pub fn release_at(id: u64, tag: &str, draft: bool, created_at: DateTime<Utc>) -> Release {
    Release {
        id,
        tag_name: tag.to_string(),
        name: Some(tag.to_string()),
        body: Some(String::new()),
        draft,
        prerelease: false,
        created_at,
        target_commitish: None,
        upload_url: String::new(),
    }
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an existing release created a minute ago.
    pub fn add_release(&self, tag: &str, draft: bool) -> Release {
        self.add_release_aged(tag, draft, Duration::minutes(1))
    }

    pub fn add_release_aged(&self, tag: &str, draft: bool, age: Duration) -> Release {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let release = release_at(state.next_id, tag, draft, Utc::now() - age);
        state.releases.push(release.clone());
        release
    }

    pub fn add_asset(&self, release: &Release, name: &str, contents: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let asset = Asset {
            id: state.next_id,
            name: name.to_string(),
            size: contents.len() as u64,
            url: format!("fake://assets/{}", state.next_id),
        };
        state
            .assets
            .entry(release.id)
            .or_default()
            .push((asset, contents.to_vec()));
    }

    pub fn fail_deletion_of(&self, tag: &str) {
        self.state
            .borrow_mut()
            .failing_deletes
            .insert(tag.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Calls that change repository state, in order.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn releases(&self) -> Vec<Release> {
        self.state.borrow().releases.clone()
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<_> = self.releases().into_iter().map(|r| r.tag_name).collect();
        tags.sort();
        tags
    }

    pub fn release_by_tag(&self, tag: &str) -> Option<Release> {
        self.releases().into_iter().find(|r| r.tag_name == tag)
    }

    pub fn asset_names(&self, release: &Release) -> Vec<String> {
        self.state
            .borrow()
            .assets
            .get(&release.id)
            .map(|assets| assets.iter().map(|(a, _)| a.name.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl ReleaseRepository for FakeRepository {
    fn list_releases(&self) -> Result<Vec<Release>> {
        self.record(Call::ListReleases);
        Ok(self.releases())
    }

    fn create_release(&self, new: &NewRelease) -> Result<Release> {
        self.record(Call::Create {
            tag: new.tag_name.clone(),
            draft: new.draft,
            prerelease: new.prerelease,
        });
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let release = Release {
            id: state.next_id,
            tag_name: new.tag_name.clone(),
            name: Some(new.name.clone()),
            body: Some(new.body.clone()),
            draft: new.draft,
            prerelease: new.prerelease,
            created_at: Utc::now(),
            target_commitish: new.target_commitish.clone(),
            upload_url: String::new(),
        };
        state.releases.push(release.clone());
        Ok(release)
    }

    fn update_release(&self, release: &Release, update: &ReleaseUpdate) -> Result<Release> {
        self.record(Call::Update {
            tag: release.tag_name.clone(),
            new_tag: update.tag_name.clone(),
            draft: update.draft,
        });
        let mut state = self.state.borrow_mut();
        let stored = state
            .releases
            .iter_mut()
            .find(|r| r.id == release.id)
            .ok_or_else(|| anyhow!("release {} not found", release.id))?;
        if let Some(tag) = &update.tag_name {
            stored.tag_name = tag.clone();
        }
        if let Some(draft) = update.draft {
            stored.draft = draft;
        }
        if let Some(prerelease) = update.prerelease {
            stored.prerelease = prerelease;
        }
        Ok(stored.clone())
    }

    fn delete_release(&self, release: &Release) -> Result<()> {
        self.record(Call::DeleteRelease(release.tag_name.clone()));
        let mut state = self.state.borrow_mut();
        if state.failing_deletes.contains(&release.tag_name) {
            bail!("deleting release \"{}\" failed with status 500", release.tag_name);
        }
        let before = state.releases.len();
        state.releases.retain(|r| r.id != release.id);
        if state.releases.len() == before {
            bail!("release {} not found", release.id);
        }
        Ok(())
    }

    fn delete_tag(&self, tag_name: &str) -> Result<()> {
        self.record(Call::DeleteTag(tag_name.to_string()));
        Ok(())
    }

    fn upload_asset(&self, release: &Release, path: &Path) -> Result<Asset> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("no file name"))?;
        self.record(Call::Upload {
            tag: release.tag_name.clone(),
            name: name.clone(),
        });
        let contents = std::fs::read(path)?;
        self.add_asset(release, &name, &contents);
        let state = self.state.borrow();
        let asset = state
            .assets
            .get(&release.id)
            .and_then(|assets| assets.last())
            .map(|(a, _)| a.clone())
            .ok_or_else(|| anyhow!("asset not stored"))?;
        Ok(asset)
    }

    fn list_assets(&self, release: &Release) -> Result<Vec<Asset>> {
        self.record(Call::ListAssets(release.tag_name.clone()));
        Ok(self
            .state
            .borrow()
            .assets
            .get(&release.id)
            .map(|assets| assets.iter().map(|(a, _)| a.clone()).collect())
            .unwrap_or_default())
    }

    fn download_asset(&self, asset: &Asset, dest_dir: &Path) -> Result<PathBuf> {
        self.record(Call::Download(asset.name.clone()));
        let state = self.state.borrow();
        let contents = state
            .assets
            .values()
            .flatten()
            .find(|(a, _)| a.id == asset.id)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| anyhow!("asset {} not found", asset.id))?;
        let path = dest_dir.join(&asset.name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Scripted build status. `last_build_number` answers are consumed in order; the last
/// one repeats.
#[derive(Default)]
pub struct FakeBuildStatus {
    last_builds: RefCell<VecDeque<u64>>,
    unfinished: Vec<u64>,
    nonallowed_failure: bool,
    calls: RefCell<Vec<String>>,
}

impl FakeBuildStatus {
    pub fn latest(build_number: u64) -> Self {
        Self::with_latest_sequence(&[build_number])
    }

    pub fn with_latest_sequence(answers: &[u64]) -> Self {
        Self {
            last_builds: RefCell::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn unfinished(mut self, numbers: &[u64]) -> Self {
        self.unfinished = numbers.to_vec();
        self
    }

    pub fn nonallowed_failure(mut self, failed: bool) -> Self {
        self.nonallowed_failure = failed;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl BuildStatus for FakeBuildStatus {
    fn last_build_number(
        &self,
        repo_slug: &str,
        branch_or_tag: &str,
        event_types: &[EventType],
    ) -> Result<u64> {
        let events: Vec<_> = event_types.iter().map(EventType::as_str).collect();
        self.calls.borrow_mut().push(format!(
            "last_build_number({repo_slug}, {branch_or_tag}, [{}])",
            events.join(",")
        ));
        let mut answers = self.last_builds.borrow_mut();
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().copied()
        };
        answer.ok_or_else(|| anyhow!("no scripted last build number"))
    }

    fn unfinished_build_numbers(&self, repo_slug: &str, branch: &str) -> Result<Vec<u64>> {
        self.calls
            .borrow_mut()
            .push(format!("unfinished_build_numbers({repo_slug}, {branch})"));
        Ok(self.unfinished.clone())
    }

    fn build_has_nonallowed_failure(&self, build_id: &str) -> Result<bool> {
        self.calls
            .borrow_mut()
            .push(format!("build_has_nonallowed_failure({build_id})"));
        Ok(self.nonallowed_failure)
    }
}

/// Reporter that keeps every line, prefixed with its level.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: Vec<String>,
}

impl RecordingReporter {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn joined(&self) -> String {
        self.lines.join("\n")
    }

    fn with_level(&self, level: &str) -> Vec<String> {
        let prefix = format!("[{level}] ");
        self.lines
            .iter()
            .filter_map(|l| l.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn infos(&self) -> Vec<String> {
        self.with_level("info")
    }

    pub fn warns(&self) -> Vec<String> {
        self.with_level("warn")
    }
}

impl Reporter for RecordingReporter {
    fn info(&mut self, msg: &str) {
        self.lines.push(format!("[info] {msg}"));
    }

    fn warn(&mut self, msg: &str) {
        self.lines.push(format!("[warn] {msg}"));
    }

    fn error(&mut self, msg: &str) {
        self.lines.push(format!("[error] {msg}"));
    }
}

/// Identity of job 2 of build 10 on `master`, in repository `owner/project`.
pub fn identity() -> BuildIdentity {
    identity_with(&[])
}

/// [`identity`] with some variables replaced or added.
pub fn identity_with(overrides: &[(&str, &str)]) -> BuildIdentity {
    let mut vars: HashMap<String, String> = [
        ("TRAVIS_REPO_SLUG", "owner/project"),
        ("TRAVIS_BRANCH", "master"),
        ("TRAVIS_BUILD_NUMBER", "10"),
        ("TRAVIS_COMMIT", "0123abcd"),
        ("TRAVIS_BUILD_ID", "5000"),
        ("TRAVIS_BUILD_WEB_URL", "https://travis-ci.com/owner/project/builds/5000"),
        ("TRAVIS_JOB_NUMBER", "10.2"),
        ("TRAVIS_JOB_ID", "5002"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    match BuildIdentity::from_lookup(|name| vars.get(name).cloned()) {
        Ok(identity) => identity,
        Err(e) => panic!("test identity is invalid: {e}"),
    }
}

/// Bundles the collaborators of a [`Session`] for tests.
pub struct Fixture {
    pub repo: FakeRepository,
    pub status: FakeBuildStatus,
    pub tags: TagConfig,
    pub identity: BuildIdentity,
    pub reporter: RecordingReporter,
}

impl Fixture {
    pub fn new(status: FakeBuildStatus) -> Self {
        Self {
            repo: FakeRepository::new(),
            status,
            tags: TagConfig::default(),
            identity: identity(),
            reporter: RecordingReporter::default(),
        }
    }

    pub fn with_identity(mut self, identity: BuildIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Split borrow: the session and the reporter are used side by side.
    pub fn parts(&mut self) -> (Session<'_>, &mut RecordingReporter) {
        let session = Session {
            repo: &self.repo,
            status: &self.status,
            tags: &self.tags,
            identity: &self.identity,
            travis_web_url: "https://travis-ci.com".to_string(),
        };
        (session, &mut self.reporter)
    }
}

/// Temporary directory holding one artifact per name.
pub fn artifact_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in names {
        std::fs::write(dir.path().join(name), name.as_bytes()).expect("write artifact");
    }
    dir
}

/// A request received by [`FakeServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Raw (still percent-encoded) path without the query string.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let url = reqwest::Url::parse(&format!("http://fake{}", self.url)).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

pub struct FakeResponse {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

impl FakeResponse {
    pub fn status(status: u16) -> Self {
        Self::bytes(status, Vec::new())
    }

    pub fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
        }
    }

    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self::bytes(status, value.to_string().into_bytes())
            .with_header("Content-Type", "application/json")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// HTTP server on an ephemeral port that records requests and answers them with a handler.
pub struct FakeServer {
    server: Arc<Server>,
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start<H>(handler: H) -> Self
    where
        H: Fn(&RecordedRequest) -> FakeResponse + Send + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("server"));
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let server = Arc::clone(&server);
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                for mut req in server.incoming_requests() {
                    let mut body = Vec::new();
                    req.as_reader().read_to_end(&mut body).expect("request body");
                    let recorded = RecordedRequest {
                        method: req.method().to_string(),
                        url: req.url().to_string(),
                        headers: req
                            .headers()
                            .iter()
                            .map(|h| (h.field.to_string(), h.value.to_string()))
                            .collect(),
                        body,
                    };
                    let reply = handler(&recorded);
                    requests.lock().expect("requests lock").push(recorded);

                    let mut resp = Response::from_data(reply.body)
                        .with_status_code(StatusCode(reply.status));
                    for (name, value) in &reply.headers {
                        resp.add_header(
                            Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("header"),
                        );
                    }
                    let _ = req.respond(resp);
                }
            })
        };

        Self {
            server,
            base_url,
            requests,
            handle: Some(handle),
        }
    }

    /// Answer the n-th request with `statuses[n]`, repeating the last status.
    pub fn with_statuses(statuses: Vec<u16>) -> Self {
        let counter = AtomicUsize::new(0);
        Self::start(move |_| {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            let status = statuses
                .get(idx)
                .or_else(|| statuses.last())
                .copied()
                .unwrap_or(200);
            FakeResponse::json(status, serde_json::json!({}))
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
