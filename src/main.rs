// Entrypoint for the CLI.
// - Parses arguments (flags fall back to the environment variables GitHub
//   Actions provides), installs logging and hands off to `ui`.
// - Returns `anyhow::Result` so any failure ends the process with a
//   non-zero exit code and the error chain on stderr.

use anyhow::{bail, Result};
use ccaddrepo::codeclimate::{self, CodeClimate, Repository};
use ccaddrepo::github::{self, SecretsOptions};
use ccaddrepo::poll::PollPolicy;
use ccaddrepo::ui::{self, AddRepoMode, TokenKind};
use clap::Parser;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ccaddrepo")]
#[command(about = "Register a GitHub repository on Code Climate and store its ids as Actions secrets")]
#[command(version = env!("CARGO_PKG_VERSION"))]
enum Cli {
    /// Add a repository to Code Climate and print its id, test reporter id and badge token
    AddRepo {
        /// GitHub owner/repo of the repository to add
        #[arg(short, long, env = "GITHUB_REPOSITORY")]
        repo: String,
        /// Code Climate API token
        #[arg(short, long, env = "CC_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Print the existing registration if the repository is already on Code Climate
        #[arg(long)]
        reuse_existing: bool,
        /// Register through the asynchronous endpoint and wait for the test reporter id
        #[arg(long)]
        wait: bool,
        /// Lookups to attempt while waiting
        #[arg(long, default_value_t = 60, requires = "wait")]
        max_attempts: u32,
        /// Pause between lookups while waiting, in milliseconds
        #[arg(long, default_value_t = 1000, requires = "wait")]
        interval_ms: u64,
        #[arg(long, env = "CC_API_URL", default_value = codeclimate::DEFAULT_API_URL)]
        api_url: String,
        /// Remember the token for later runs
        #[arg(long)]
        save_token: bool,
    },
    /// Store CC_REPO_ID, CC_TEST_REPORTER_ID and CC_BADGE as secrets of a repository.
    /// Without --testrepid the three values are read from stdin, one per line.
    SetSecret {
        /// GitHub owner/repo that receives the secrets
        #[arg(short, long, env = "GITHUB_REPOSITORY")]
        repo: String,
        /// GitHub API token
        #[arg(short, long, env = "GH_WORKFLOW", hide_env_values = true)]
        token: Option<String>,
        /// Code Climate repository id
        #[arg(long)]
        id: Option<String>,
        /// Code Climate test reporter id
        #[arg(long)]
        testrepid: Option<String>,
        /// Code Climate badge id
        #[arg(long)]
        badgeid: Option<String>,
        #[arg(long, env = "GITHUB_API_URL", default_value = github::DEFAULT_API_URL)]
        api_url: String,
        #[arg(long)]
        save_token: bool,
    },
    /// Remove a repository from Code Climate
    RemoveRepo {
        #[arg(short, long, env = "GITHUB_REPOSITORY")]
        repo: String,
        #[arg(short, long, env = "CC_TOKEN", hide_env_values = true)]
        token: Option<String>,
        #[arg(long, env = "CC_API_URL", default_value = codeclimate::DEFAULT_API_URL)]
        api_url: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ccaddrepo=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse() {
        Cli::AddRepo {
            repo,
            token,
            reuse_existing,
            wait,
            max_attempts,
            interval_ms,
            api_url,
            save_token,
        } => {
            let token = ui::resolve_token(token, TokenKind::CodeClimate)?;
            if save_token {
                ui::persist_token(TokenKind::CodeClimate, &token)?;
            }
            let cc = CodeClimate::new(&token)?.with_base_url(api_url);
            let mode = AddRepoMode {
                reuse_existing,
                wait: wait.then(|| PollPolicy {
                    interval: Duration::from_millis(interval_ms),
                    max_attempts,
                }),
            };
            ui::add_repo(&cc, &repo, mode, &mut std::io::stdout().lock())?;
        }
        Cli::SetSecret {
            repo,
            token,
            id,
            testrepid,
            badgeid,
            api_url,
            save_token,
        } => {
            let ids = match (id, testrepid, badgeid) {
                (Some(id), Some(test_reporter_id), Some(badge_token)) => Repository {
                    id,
                    test_reporter_id,
                    badge_token,
                },
                (_, None, _) => ui::read_ids(std::io::stdin().lock())?,
                (None, Some(_), _) => bail!("--id not specified"),
                (Some(_), Some(_), None) => bail!("--badgeid not specified"),
            };
            let token = ui::resolve_token(token, TokenKind::GitHub)?;
            if save_token {
                ui::persist_token(TokenKind::GitHub, &token)?;
            }
            let options = SecretsOptions::new(repo, token).api_url(api_url).with_code_climate(&ids);
            ui::set_secrets(&options)?;
        }
        Cli::RemoveRepo { repo, token, api_url } => {
            let token = ui::resolve_token(token, TokenKind::CodeClimate)?;
            let cc = CodeClimate::new(&token)?.with_base_url(api_url);
            ui::remove_repo(&cc, &repo)?;
        }
    }
    Ok(())
}
