// UI layer: the flows behind each subcommand. Resolves tokens, shows a
// spinner on stderr while a request is in flight and prints results on
// stdout so `add-repo` output can be piped straight into `set-secret`.

use crate::codeclimate::{CodeClimate, Repository};
use crate::github::{upload_secrets, SecretsOptions};
use crate::poll::PollPolicy;
use anyhow::{bail, Context, Result};
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Which service a token belongs to. Decides the file it is persisted in
/// and the prompt shown when it has to be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    CodeClimate,
    GitHub,
}

impl TokenKind {
    fn file_name(self) -> &'static str {
        match self {
            TokenKind::CodeClimate => "cc_token",
            TokenKind::GitHub => "gh_token",
        }
    }

    fn prompt(self) -> &'static str {
        match self {
            TokenKind::CodeClimate => "Code Climate API token",
            TokenKind::GitHub => "GitHub API token",
        }
    }
}

/// How `add_repo` obtains the registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddRepoMode {
    /// Return an existing registration instead of creating a new one.
    pub reuse_existing: bool,
    /// Use the asynchronous endpoint and poll with this policy.
    pub wait: Option<PollPolicy>,
}

/// Pick the token to use: the one given on the command line (or through
/// its environment variable), else the persisted one, else ask for it when
/// running interactively.
pub fn resolve_token(given: Option<String>, kind: TokenKind) -> Result<String> {
    if let Some(token) = given.filter(|t| !t.trim().is_empty()) {
        return Ok(token.trim().to_string());
    }
    if let Ok(token) = load_token(kind) {
        return Ok(token);
    }
    if std::io::stdin().is_terminal() {
        let token: String = Password::new().with_prompt(kind.prompt()).interact()?;
        return Ok(token.trim().to_string());
    }
    bail!("no {} given: pass --token or set its environment variable", kind.prompt())
}

/// Persist a token into the user's config directory for later runs.
pub fn persist_token(kind: TokenKind, token: &str) -> Result<()> {
    let path = token_path(kind);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    std::fs::write(&path, token).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn load_token(kind: TokenKind) -> Result<String> {
    let data = std::fs::read_to_string(token_path(kind))?;
    let token = data.trim();
    if token.is_empty() {
        bail!("empty token file");
    }
    Ok(token.to_string())
}

fn token_path(kind: TokenKind) -> PathBuf {
    let dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.join("ccaddrepo").join(kind.file_name())
}

fn spinner(msg: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message(msg);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Register `slug` on Code Climate and print its id, test reporter id and
/// badge token, one per line.
pub fn add_repo(cc: &CodeClimate, slug: &str, mode: AddRepoMode, out: &mut impl Write) -> Result<Repository> {
    let spinner = spinner("Registering on Code Climate...")?;
    let repo = obtain_repository(cc, slug, mode);
    spinner.finish_and_clear();

    let repo = repo.with_context(|| format!("adding {} to Code Climate", slug))?;
    write_ids(out, &repo)?;
    Ok(repo)
}

fn obtain_repository(cc: &CodeClimate, slug: &str, mode: AddRepoMode) -> crate::Result<Repository> {
    if mode.reuse_existing {
        match cc.repository(slug) {
            Ok(repo) if !repo.test_reporter_id.is_empty() => return Ok(repo),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    match mode.wait {
        Some(policy) => cc.register_and_wait(slug, policy),
        None => cc.register_repository(slug),
    }
}

/// Look up `slug` and remove its Code Climate registration.
pub fn remove_repo(cc: &CodeClimate, slug: &str) -> Result<()> {
    let id = cc
        .repository_id(slug)
        .with_context(|| format!("looking up {} on Code Climate", slug))?;
    cc.delete_repository(&id)
        .with_context(|| format!("removing {} from Code Climate", slug))?;
    eprintln!("Removed {} ({}) from Code Climate", slug, id);
    Ok(())
}

/// Store every secret in `options`, then confirm each on stderr.
pub fn set_secrets(options: &SecretsOptions) -> Result<()> {
    let spinner = spinner("Storing secrets on GitHub...")?;
    let res = upload_secrets(options);
    spinner.finish_and_clear();
    res.with_context(|| format!("storing secrets in {}", options.repo_slug))?;

    for (name, _) in &options.secrets {
        eprintln!("Stored secrets.{}", name);
    }
    Ok(())
}

pub fn write_ids(out: &mut impl Write, repo: &Repository) -> Result<()> {
    writeln!(out, "{}", repo.id)?;
    writeln!(out, "{}", repo.test_reporter_id)?;
    writeln!(out, "{}", repo.badge_token)?;
    Ok(())
}

/// Read the three lines `add-repo` prints: repository id, test reporter id
/// and badge token.
pub fn read_ids(reader: impl BufRead) -> Result<Repository> {
    let mut lines = reader.lines();
    let mut next = |what: &str| -> Result<String> {
        let line = lines
            .next()
            .with_context(|| format!("missing {} on stdin", what))?
            .context("reading stdin")?;
        let value = line.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));
        if value.is_empty() {
            bail!("empty {} on stdin", what);
        }
        Ok(value.to_string())
    };
    Ok(Repository {
        id: next("repository id")?,
        test_reporter_id: next("test reporter id")?,
        badge_token: next("badge token")?,
    })
}
