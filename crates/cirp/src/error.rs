//! Error types and the top-level error summary printed by the CLI.

use cirp_output_sanitizer::sanitize_line;
use thiserror::Error;

/// Errors meant to be shown to the user as-is.
///
/// Anything else reaching the top level is reduced to `<Kind>: <message>` by
/// [`summarize`].
#[derive(Debug, Error)]
pub enum PublisherError {
    /// Invalid flags or configuration, detected before any network call.
    #[error("{0}")]
    Config(String),

    /// The command cannot run in the current state (e.g. a missing artifact directory).
    #[error("{0}")]
    Precondition(String),

    #[error("Required environment variable \"{0}\" is not set.")]
    MissingEnv(String),

    #[error(
        "Tag release with the tag name \"{0}\" already exists. Are you sure you meant to recreate the tag release? \
         Recreating a publicly visible tag release might be disastrous, as all the changes you have done to the release \
         (changed text, extra artifacts and so on) will be lost, and hashes of the files created as part of the build might change. \
         Please manually delete the \"{0}\" release and restart the build if you really meant to recreate the release."
    )]
    TagReleaseExists(String),
}

impl PublisherError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }
}

/// Reduce an error to the single line printed at the top level.
///
/// [`PublisherError`]s become `Error: <message>`. Everything else becomes
/// `<Kind>: <message chain>`. Known secrets, token query parameters and
/// authorization headers are redacted, and no backtrace is ever included.
pub fn summarize(err: &anyhow::Error, secrets: &[&str]) -> String {
    if let Some(user_facing) = err.chain().find_map(|e| e.downcast_ref::<PublisherError>()) {
        return sanitize_line(&format!("Error: {user_facing}"), secrets);
    }

    sanitize_line(&format!("{}: {err:#}", error_kind(err)), secrets)
}

fn error_kind(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if cause.is::<reqwest::Error>() || cause.is::<crate::http::HttpStatusError>() {
            return "HttpError";
        }
        if cause.is::<std::io::Error>() {
            return "IoError";
        }
        if cause.is::<serde_json::Error>() {
            return "JsonError";
        }
        if cause.is::<toml::de::Error>() {
            return "ConfigError";
        }
    }
    "RuntimeError"
}
