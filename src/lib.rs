// Library root
// -----------
// Automates the two steps needed before a GitHub Actions workflow can
// publish coverage to Code Climate: registering the repository on Code
// Climate, and storing the resulting ids as encrypted repository secrets.
//
// Module responsibilities:
// - `codeclimate`: blocking Code Climate API session (org/repo lookup,
//   registration, removal).
// - `poll`: legacy asynchronous registration with a bounded wait.
// - `github`: GitHub Actions secret upload.
// - `seal`: sealed-box encryption of secret values.
// - `slug`: `owner/name` parsing.
// - `ui`: command flows used by the binary (token resolution, progress,
//   output).
//
// Nothing below `ui` reads the environment; tokens and URLs are passed in.
pub mod codeclimate;
pub mod error;
pub mod github;
pub mod poll;
pub mod seal;
pub mod slug;
pub mod ui;

pub use error::{Error, Result};
