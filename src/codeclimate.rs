// Code Climate API client: a small blocking session over the v1 REST API.
// It resolves organization and repository ids, registers repositories and
// removes registrations. All calls go through `do_request`, which attaches
// the JSON:API headers and the token and keeps the raw response body around
// for error reporting.

use crate::error::{Error, Result};
use crate::slug::RepoSlug;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Production API root. Relative paths are appended to it.
pub const DEFAULT_API_URL: &str = "https://api.codeclimate.com/v1/";

/// Media type Code Climate uses for both requests and responses.
pub const MEDIA_TYPE: &str = "application/vnd.api+json";

/// Authenticated session on Code Climate. The token is captured once at
/// construction; cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct CodeClimate {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

/// A repository registration as Code Climate reports it. Fields the service
/// left out come back as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub test_reporter_id: String,
    pub badge_token: String,
}

#[derive(Deserialize, Debug)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Deserialize, Debug)]
struct SingleResponse<T> {
    data: T,
}

#[derive(Deserialize, Debug)]
struct OrgEntry {
    id: String,
    attributes: OrgAttributes,
}

#[derive(Deserialize, Debug)]
struct OrgAttributes {
    name: String,
}

#[derive(Deserialize, Debug)]
struct RepoEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    attributes: RepoAttributes,
}

#[derive(Deserialize, Debug, Default)]
struct RepoAttributes {
    #[serde(default)]
    test_reporter_id: Option<String>,
    #[serde(default)]
    badge_token: Option<String>,
}

impl From<RepoEntry> for Repository {
    fn from(entry: RepoEntry) -> Self {
        Repository {
            id: entry.id,
            test_reporter_id: entry.attributes.test_reporter_id.unwrap_or_default(),
            badge_token: entry.attributes.badge_token.unwrap_or_default(),
        }
    }
}

/// Body of a repository creation request, shared by the organization
/// endpoint and the legacy `github/repos` endpoint.
#[derive(Serialize, Debug)]
pub(crate) struct CreateRepoRequest {
    data: CreateRepoData,
}

#[derive(Serialize, Debug)]
struct CreateRepoData {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: CreateRepoAttributes,
}

#[derive(Serialize, Debug)]
struct CreateRepoAttributes {
    url: String,
}

impl CreateRepoRequest {
    pub(crate) fn for_slug(slug: &RepoSlug) -> Self {
        CreateRepoRequest {
            data: CreateRepoData {
                kind: "repos",
                attributes: CreateRepoAttributes { url: slug.github_url() },
            },
        }
    }
}

/// Extract the test reporter id from a repository creation response.
pub fn parse_reporter_id(body: &str) -> Result<String> {
    let res: SingleResponse<RepoEntry> = serde_json::from_str(body).map_err(|source| Error::Decode {
        endpoint: "repository response".into(),
        source,
        body: body.to_string(),
    })?;
    res.data
        .attributes
        .test_reporter_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::not_found("test reporter id", "repository response", body))
}

impl CodeClimate {
    /// Create a session for the given API token against the production API.
    pub fn new(token: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| Error::Transport {
                endpoint: "http client setup".into(),
                source,
            })?;

        let mut auth = HeaderValue::from_str(&format!("Token token={}", token)).map_err(|_| Error::InvalidToken)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MEDIA_TYPE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(MEDIA_TYPE));
        headers.insert(AUTHORIZATION, auth);

        Ok(CodeClimate {
            client,
            base_url: DEFAULT_API_URL.to_string(),
            headers,
        })
    }

    /// Point the session at another API root (a proxy or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    /// Send a request to `path` (relative to the API root) and return the
    /// raw response body. Non-2xx answers become `Error::Api`.
    fn do_request(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<String> {
        let endpoint = format!("{} {}", method, path);
        let url = format!("{}{}", self.base_url, path);
        let req = build(self.client.request(method, &url).headers(self.headers.clone()));

        let res = req.send().map_err(|source| Error::Transport {
            endpoint: endpoint.clone(),
            source,
        })?;
        let status = res.status();
        let body = res.text().map_err(|source| Error::Transport {
            endpoint: endpoint.clone(),
            source,
        })?;
        debug!(%endpoint, %status, "code climate response");

        if !status.is_success() {
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(body)
    }

    /// Like `do_request`, decoding the body into `T`. The raw body is
    /// returned too so lookups can attach it to not-found errors.
    fn do_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<(T, String)> {
        let endpoint = format!("{} {}", method, path);
        let body = self.do_request(method, path, build)?;
        match serde_json::from_str(&body) {
            Ok(parsed) => Ok((parsed, body)),
            Err(source) => Err(Error::Decode { endpoint, source, body }),
        }
    }

    /// Return the id of the organization named exactly `name`.
    ///
    /// The API has no lookup by name, so this scans the organizations the
    /// token can see and returns the first exact (case-sensitive) match.
    pub fn organization_id(&self, name: &str) -> Result<String> {
        let (res, body): (ListResponse<OrgEntry>, _) = self.do_json(Method::GET, "orgs", |r| r)?;
        res.data
            .into_iter()
            .find(|org| org.attributes.name == name)
            .map(|org| org.id)
            .ok_or_else(|| Error::not_found("organization", name, body))
    }

    /// Look up the registration of `slug` (`owner/name`).
    pub fn repository(&self, slug: &str) -> Result<Repository> {
        let slug: RepoSlug = slug.parse()?;
        let query = slug.to_string();
        let (res, body): (ListResponse<RepoEntry>, _) =
            self.do_json(Method::GET, "repos", |r| r.query(&[("github_slug", query.as_str())]))?;
        res.data
            .into_iter()
            .next()
            .map(Repository::from)
            .ok_or_else(|| Error::not_found("repository", slug.to_string(), body))
    }

    /// Return the Code Climate id of `slug`.
    pub fn repository_id(&self, slug: &str) -> Result<String> {
        self.repository(slug).map(|repo| repo.id)
    }

    /// Register `slug` under the organization named after its owner.
    ///
    /// The returned record carries the generated test reporter id, which is
    /// what coverage uploads authenticate with.
    pub fn register_repository(&self, slug: &str) -> Result<Repository> {
        let slug: RepoSlug = slug.parse()?;
        let org_id = self.organization_id(&slug.owner)?;

        let request = CreateRepoRequest::for_slug(&slug);
        let path = format!("orgs/{}/repos", org_id);
        let (res, body): (SingleResponse<RepoEntry>, _) = self.do_json(Method::POST, &path, |r| r.json(&request))?;

        let repo = Repository::from(res.data);
        if repo.test_reporter_id.is_empty() {
            return Err(Error::not_found("test reporter id", slug.to_string(), body));
        }
        info!(%slug, id = %repo.id, "repository registered on code climate");
        Ok(repo)
    }

    /// Remove the registration with the given id. A registration that is
    /// already gone counts as removed.
    pub fn delete_repository(&self, id: &str) -> Result<()> {
        let path = format!("repos/{}", id);
        match self.do_request(Method::DELETE, &path, |r| r) {
            Ok(_) => {
                info!(%id, "repository removed from code climate");
                Ok(())
            }
            Err(Error::Api { status, .. }) if status == StatusCode::NOT_FOUND => {
                debug!(%id, "repository already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Submit a creation request to the legacy `github/repos` endpoint,
    /// which registers asynchronously. Used by the polling flow.
    pub(crate) fn submit_github_repo(&self, slug: &RepoSlug) -> Result<Repository> {
        let request = CreateRepoRequest::for_slug(slug);
        let (res, _): (SingleResponse<RepoEntry>, _) =
            self.do_json(Method::POST, "github/repos", |r| r.json(&request))?;
        Ok(Repository::from(res.data))
    }
}
