use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of a release as reported by the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub target_commitish: Option<String>,
    #[serde(default)]
    pub upload_url: String,
}

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub name: String,
    pub size: u64,
    /// API locator of the asset; fetching it with `Accept: application/octet-stream`
    /// yields the file contents.
    pub url: String,
}

/// Parameters of a release to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRelease {
    pub tag_name: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_commitish: Option<String>,
}

/// Partial update of a release. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_commitish: Option<String>,
}

impl ReleaseUpdate {
    /// The finalizing update of the two-phase publish: rename to the final tag and set
    /// the final draft flag in one call.
    pub fn finalize(tag_name: impl Into<String>, draft: bool) -> Self {
        Self {
            tag_name: Some(tag_name.into()),
            draft: Some(draft),
            ..Self::default()
        }
    }
}

/// Error returned when a CLI token does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value \"{value}\", expected one of: {expected}")]
pub struct ParseTokenError {
    value: String,
    expected: &'static str,
}

macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $token:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseTokenError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($token => Ok($name::$variant),)+
                    _ => Err(ParseTokenError {
                        value: s.to_string(),
                        expected: concat!($($token, " "),+).trim_ascii_end(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

token_enum! {
    /// Trigger event of a CI build, used to filter the "is this the latest build" check.
    EventType {
        Any => "any",
        Api => "api",
        Cron => "cron",
        Push => "push",
    }
}

token_enum! {
    /// Which store releases a `cleanup_store` pass may delete, by build/job relation.
    CleanupScope {
        CurrentJob => "current-job",
        CurrentBuild => "current-build",
        /// Lower build numbers whose builds are no longer running.
        PreviousFinishedBuilds => "previous-finished-builds",
    }
}

token_enum! {
    /// Whether `cleanup_store` targets finalized store releases, interrupted ones, or both.
    CleanupCompleteness {
        Complete => "complete",
        Incomplete => "incomplete",
    }
}
