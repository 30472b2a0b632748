// Legacy registration flow. The `github/repos` endpoint registers a
// repository asynchronously: the creation response may not carry a test
// reporter id yet, so the registration is re-read until one shows up or the
// attempt budget runs out.

use crate::codeclimate::{CodeClimate, Repository};
use crate::error::{Error, Result};
use crate::slug::RepoSlug;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// How often and how many times to re-read a pending registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

impl CodeClimate {
    /// Register `slug` through the legacy endpoint and wait until Code
    /// Climate has generated its test reporter id.
    ///
    /// Fails with `Error::Timeout` once `policy.max_attempts` lookups came
    /// back without an id. A lookup that does not find the repository yet
    /// counts as a pending attempt.
    pub fn register_and_wait(&self, slug: &str, policy: PollPolicy) -> Result<Repository> {
        let parsed: RepoSlug = slug.parse()?;
        let submitted = self.submit_github_repo(&parsed)?;
        if !submitted.test_reporter_id.is_empty() {
            info!(%parsed, "test reporter id available immediately");
            return Ok(submitted);
        }

        for attempt in 1..=policy.max_attempts {
            thread::sleep(policy.interval);
            match self.repository(slug) {
                Ok(repo) if !repo.test_reporter_id.is_empty() => {
                    info!(%parsed, attempt, "test reporter id available");
                    return Ok(repo);
                }
                Ok(_) => debug!(%parsed, attempt, "registration still pending"),
                Err(e) if e.is_not_found() => debug!(%parsed, attempt, "repository not listed yet"),
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout {
            slug: parsed.to_string(),
            attempts: policy.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts,
        }
    }

    fn client(server: &Server) -> CodeClimate {
        CodeClimate::new("secret").unwrap().with_base_url(server.url())
    }

    #[test]
    fn returns_immediately_when_creation_has_reporter_id() {
        let mut server = Server::new();
        server
            .mock("POST", "/github/repos")
            .with_status(201)
            .with_body(r#"{"data":{"id":"r1","attributes":{"test_reporter_id":"tr1","badge_token":"b1"}}}"#)
            .create();
        let lookup = server.mock("GET", "/repos").match_query(Matcher::Any).expect(0).create();

        let repo = client(&server).register_and_wait("parrogo/ccaddrepo", fast(3)).unwrap();
        assert_eq!(repo.test_reporter_id, "tr1");
        lookup.assert();
    }

    #[test]
    fn polls_until_reporter_id_appears() {
        let mut server = Server::new();
        server
            .mock("POST", "/github/repos")
            .with_status(202)
            .with_body(r#"{"data":{"id":"r1","attributes":{"test_reporter_id":null}}}"#)
            .create();
        // mockito serves the first matching mock still short of its
        // expected hits, so the pending answer is given twice.
        let pending = server
            .mock("GET", "/repos")
            .match_query(Matcher::UrlEncoded("github_slug".into(), "parrogo/ccaddrepo".into()))
            .with_status(200)
            .with_body(r#"{"data":[{"id":"r1","attributes":{}}]}"#)
            .expect(2)
            .create();
        let ready = server
            .mock("GET", "/repos")
            .match_query(Matcher::UrlEncoded("github_slug".into(), "parrogo/ccaddrepo".into()))
            .with_status(200)
            .with_body(r#"{"data":[{"id":"r1","attributes":{"test_reporter_id":"tr1","badge_token":"b1"}}]}"#)
            .expect(1)
            .create();

        let repo = client(&server).register_and_wait("parrogo/ccaddrepo", fast(5)).unwrap();
        assert_eq!(repo.id, "r1");
        assert_eq!(repo.test_reporter_id, "tr1");
        pending.assert();
        ready.assert();
    }

    #[test]
    fn gives_up_after_attempt_budget() {
        let mut server = Server::new();
        server
            .mock("POST", "/github/repos")
            .with_status(202)
            .with_body(r#"{"data":{"attributes":{}}}"#)
            .create();
        let lookup = server
            .mock("GET", "/repos")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .expect(3)
            .create();

        match client(&server).register_and_wait("parrogo/ccaddrepo", fast(3)).unwrap_err() {
            Error::Timeout { slug, attempts } => {
                assert_eq!(slug, "parrogo/ccaddrepo");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        lookup.assert();
    }

    #[test]
    fn lookup_failure_aborts_polling() {
        let mut server = Server::new();
        server
            .mock("POST", "/github/repos")
            .with_status(202)
            .with_body(r#"{"data":{"attributes":{}}}"#)
            .create();
        let lookup = server
            .mock("GET", "/repos")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .expect(1)
            .create();

        let err = client(&server).register_and_wait("parrogo/ccaddrepo", fast(5)).unwrap_err();
        assert!(matches!(err, Error::Api { .. }));
        lookup.assert();
    }
}
