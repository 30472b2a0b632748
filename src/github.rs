// GitHub Actions secrets: fetch a repository's public key, seal each value
// against it and store the result with create-or-update semantics.

use crate::codeclimate::Repository;
use crate::error::{Error, Result};
use crate::seal::seal_secret;
use crate::slug::RepoSlug;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.github.com/";

pub const REPO_ID_SECRET: &str = "CC_REPO_ID";
pub const TEST_REPORTER_ID_SECRET: &str = "CC_TEST_REPORTER_ID";
pub const BADGE_SECRET: &str = "CC_BADGE";

const API_VERSION: &str = "2022-11-28";

/// Public key GitHub uses to receive secrets for one repository.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RepoPublicKey {
    pub key_id: String,
    pub key: String,
}

/// A sealed secret ready for upload. `key_id` names the key `encrypted_value`
/// was sealed with.
#[derive(Serialize, Debug, Clone)]
pub struct EncryptedSecret {
    #[serde(skip)]
    pub name: String,
    pub key_id: String,
    pub encrypted_value: String,
}

/// Everything needed to write a batch of secrets into one repository.
#[derive(Debug, Clone)]
pub struct SecretsOptions {
    pub repo_slug: String,
    pub token: String,
    pub api_url: String,
    pub secrets: Vec<(String, String)>,
}

impl SecretsOptions {
    pub fn new(repo_slug: impl Into<String>, token: impl Into<String>) -> Self {
        SecretsOptions {
            repo_slug: repo_slug.into(),
            token: token.into(),
            api_url: DEFAULT_API_URL.to_string(),
            secrets: Vec::new(),
        }
    }

    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.push((name.into(), value.into()));
        self
    }

    /// Add the three Code Climate secrets a coverage workflow reads.
    pub fn with_code_climate(self, repo: &Repository) -> Self {
        self.secret(REPO_ID_SECRET, &repo.id)
            .secret(TEST_REPORTER_ID_SECRET, &repo.test_reporter_id)
            .secret(BADGE_SECRET, &repo.badge_token)
    }
}

/// Authenticated GitHub REST client, scoped to the calls secrets need.
pub struct GitHub {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

impl GitHub {
    pub fn new(token: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| Error::Transport {
                endpoint: "http client setup".into(),
                source,
            })?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| Error::InvalidToken)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            HeaderName::from_static("x-github-api-version"),
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(AUTHORIZATION, auth);

        Ok(GitHub {
            client,
            base_url: DEFAULT_API_URL.to_string(),
            headers,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    fn send(&self, req: RequestBuilder, endpoint: String) -> Result<String> {
        let res = req
            .headers(self.headers.clone())
            .send()
            .map_err(|source| Error::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        let status = res.status();
        let body = res.text().map_err(|source| Error::Transport {
            endpoint: endpoint.clone(),
            source,
        })?;
        debug!(%endpoint, %status, "github response");
        if !status.is_success() {
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(body)
    }

    /// Fetch the key secrets for `slug` must currently be sealed with.
    pub fn public_key(&self, slug: &RepoSlug) -> Result<RepoPublicKey> {
        let path = format!("repos/{}/{}/actions/secrets/public-key", slug.owner, slug.name);
        let endpoint = format!("GET {}", path);
        let req = self.client.request(Method::GET, format!("{}{}", self.base_url, path));
        let body = self.send(req, endpoint.clone())?;
        serde_json::from_str(&body).map_err(|source| Error::Decode { endpoint, source, body })
    }

    /// Create or replace the secret `secret.name` in `slug`.
    pub fn put_secret(&self, slug: &RepoSlug, secret: &EncryptedSecret) -> Result<()> {
        let path = format!("repos/{}/{}/actions/secrets/{}", slug.owner, slug.name, secret.name);
        let endpoint = format!("PUT {}", path);
        let req = self
            .client
            .request(Method::PUT, format!("{}{}", self.base_url, path))
            .json(secret);
        self.send(req, endpoint)?;
        Ok(())
    }

    /// Seal `value` with the repository's current key and store it as `name`.
    /// The key is fetched for every secret so the stored key id always
    /// matches the key used for sealing.
    pub fn add_repo_secret(&self, slug: &RepoSlug, name: &str, value: &str) -> Result<()> {
        let key = self.public_key(slug)?;
        let secret = encrypt_secret(&key, name, value)?;
        self.put_secret(slug, &secret)?;
        info!(%slug, secret = name, "secret stored");
        Ok(())
    }
}

/// Seal `value` against `key` and wrap it with the key id for upload.
pub fn encrypt_secret(key: &RepoPublicKey, name: &str, value: &str) -> Result<EncryptedSecret> {
    Ok(EncryptedSecret {
        name: name.to_string(),
        key_id: key.key_id.clone(),
        encrypted_value: seal_secret(&key.key, value)?,
    })
}

/// Write every secret in `options` to its repository, in order. Stops at the
/// first failure; secrets already written stay written.
pub fn upload_secrets(options: &SecretsOptions) -> Result<()> {
    let slug: RepoSlug = options.repo_slug.parse()?;
    let github = GitHub::new(&options.token)?.with_base_url(options.api_url.as_str());
    for (name, value) in &options.secrets {
        github.add_repo_secret(&slug, name, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use crypto_box::aead::OsRng;
    use crypto_box::SecretKey;
    use mockito::{Matcher, Server};
    use serde_json::json;

    const KEY_PATH: &str = "/repos/parrogo/ccaddrepo/actions/secrets/public-key";

    fn key_body(secret: &SecretKey) -> String {
        json!({
            "key_id": "568250167242549743",
            "key": STANDARD.encode(secret.public_key().as_bytes()),
        })
        .to_string()
    }

    fn options(server: &Server) -> SecretsOptions {
        SecretsOptions::new("parrogo/ccaddrepo", "gh-token")
            .api_url(server.url())
            .with_code_climate(&Repository {
                id: "60700c3b".into(),
                test_reporter_id: "fakefakefake".into(),
                badge_token: "b4dg3".into(),
            })
    }

    #[test]
    fn uploads_each_secret_with_a_fresh_key() {
        let secret_key = SecretKey::generate(&mut OsRng);
        let mut server = Server::new();
        let key = server
            .mock("GET", KEY_PATH)
            .match_header("authorization", "Bearer gh-token")
            .match_header("accept", "application/vnd.github+json")
            .with_status(200)
            .with_body(key_body(&secret_key))
            .expect(3)
            .create();
        let puts: Vec<_> = [REPO_ID_SECRET, TEST_REPORTER_ID_SECRET, BADGE_SECRET]
            .iter()
            .map(|name| {
                server
                    .mock("PUT", format!("/repos/parrogo/ccaddrepo/actions/secrets/{}", name).as_str())
                    .match_body(Matcher::PartialJson(json!({"key_id": "568250167242549743"})))
                    .with_status(201)
                    .expect(1)
                    .create()
            })
            .collect();

        upload_secrets(&options(&server)).unwrap();
        key.assert();
        for put in puts {
            put.assert();
        }
    }

    #[test]
    fn key_fetch_failure_stops_the_batch() {
        let mut server = Server::new();
        let key = server
            .mock("GET", KEY_PATH)
            .with_status(403)
            .with_body(r#"{"message":"Resource not accessible"}"#)
            .expect(1)
            .create();
        let put = server
            .mock("PUT", Matcher::Regex("^/repos/parrogo/ccaddrepo/actions/secrets/".into()))
            .expect(0)
            .create();

        match upload_secrets(&options(&server)).unwrap_err() {
            Error::Api { endpoint, body, .. } => {
                assert!(endpoint.contains("public-key"));
                assert!(body.contains("Resource not accessible"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        key.assert();
        put.assert();
    }

    #[test]
    fn upload_failure_leaves_earlier_secrets_and_skips_later_ones() {
        let secret_key = SecretKey::generate(&mut OsRng);
        let mut server = Server::new();
        let key = server
            .mock("GET", KEY_PATH)
            .with_status(200)
            .with_body(key_body(&secret_key))
            .expect(2)
            .create();
        let first = server
            .mock("PUT", "/repos/parrogo/ccaddrepo/actions/secrets/CC_REPO_ID")
            .with_status(204)
            .expect(1)
            .create();
        let second = server
            .mock("PUT", "/repos/parrogo/ccaddrepo/actions/secrets/CC_TEST_REPORTER_ID")
            .with_status(422)
            .expect(1)
            .create();
        let third = server
            .mock("PUT", "/repos/parrogo/ccaddrepo/actions/secrets/CC_BADGE")
            .expect(0)
            .create();

        let err = upload_secrets(&options(&server)).unwrap_err();
        assert!(matches!(err, Error::Api { ref endpoint, .. } if endpoint.contains("CC_TEST_REPORTER_ID")));
        key.assert();
        first.assert();
        second.assert();
        third.assert();
    }

    #[test]
    fn bad_public_key_is_a_decode_error() {
        let mut server = Server::new();
        server
            .mock("GET", KEY_PATH)
            .with_status(200)
            .with_body(r#"{"key_id":"1","key":"%%%"}"#)
            .create();
        let put = server.mock("PUT", Matcher::Any).expect(0).create();

        let err = upload_secrets(&options(&server)).unwrap_err();
        assert!(matches!(err, Error::PublicKey(_)));
        put.assert();
    }

    #[test]
    fn encrypted_secret_opens_with_repository_key() {
        let secret_key = SecretKey::generate(&mut OsRng);
        let key = RepoPublicKey {
            key_id: "42".into(),
            key: STANDARD.encode(secret_key.public_key().as_bytes()),
        };

        let secret = encrypt_secret(&key, "CC_TEST_REPORTER_ID", "fakefakefake").unwrap();
        assert_eq!(secret.key_id, "42");
        assert_ne!(secret.encrypted_value, "fakefakefake");

        let body = serde_json::to_value(&secret).unwrap();
        assert_eq!(body.as_object().unwrap().len(), 2);

        let raw = STANDARD.decode(&secret.encrypted_value).unwrap();
        assert_eq!(secret_key.unseal(&raw).unwrap(), b"fakefakefake");
    }

    #[test]
    fn malformed_slug_fails_before_any_request() {
        let opts = SecretsOptions::new("no-slash", "t")
            .api_url("http://127.0.0.1:9/")
            .secret("A", "b");
        assert!(matches!(upload_secrets(&opts), Err(Error::MalformedSlug(_))));
    }
}
