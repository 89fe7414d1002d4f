//! Tag-name codecs for every release kind.
//!
//! Each kind encodes its key into a *final* tag (a complete release) and a *temporary*
//! tag (a release still being assembled). Branch and tag names are arbitrary strings, so
//! decoding never searches for substrings: it strips the known prefix, strips the known
//! suffix, and splits numeric fields off the end at the last `-`. A decoder accepts exactly
//! the strings its encoder can produce.
//!
//! | kind     | final tag                               | temporary tag                     |
//! |----------|-----------------------------------------|-----------------------------------|
//! | latest   | `<prefix>-<branch>-latest`              | `<tmp><final>`                    |
//! | numbered | `<prefix>-<branch>-<build>`             | `<tmp><final>`                    |
//! | tag      | `<tag>`                                 | `<tmp><prefix>-<tag>-tag`         |
//! | store    | `<prefix>-<branch>-<build>-<job>-tmp`   | `<tmp><final>`                    |

use crate::config::TagConfig;

const LATEST_SUFFIX: &str = "latest";
const TAG_TMP_SUFFIX: &str = "tag";
const STORE_SUFFIX: &str = "tmp";

/// Encoding and decoding of one release kind's tag names.
pub trait TagCodec {
    type Key;

    fn encode(&self, key: &Self::Key) -> String;
    fn encode_tmp(&self, key: &Self::Key) -> String;
    fn decode(&self, tag: &str) -> Option<Self::Key>;
    fn decode_tmp(&self, tag: &str) -> Option<Self::Key>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumberedKey {
    pub branch: String,
    pub build_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub branch: String,
    pub build_number: u64,
    pub job_number: u64,
}

/// `<prefix>-<branch>-latest`, keyed by branch.
#[derive(Debug, Clone, Copy)]
pub struct LatestTag<'a> {
    tags: &'a TagConfig,
}

/// `<prefix>-<branch>-<build_number>`.
#[derive(Debug, Clone, Copy)]
pub struct NumberedTag<'a> {
    tags: &'a TagConfig,
}

/// The pushed tag itself, keyed by tag name.
#[derive(Debug, Clone, Copy)]
pub struct TagReleaseTag<'a> {
    tags: &'a TagConfig,
}

/// `<prefix>-<branch>-<build_number>-<job_number>-tmp`.
#[derive(Debug, Clone, Copy)]
pub struct StoreTag<'a> {
    tags: &'a TagConfig,
}

impl<'a> LatestTag<'a> {
    pub fn new(tags: &'a TagConfig) -> Self {
        Self { tags }
    }
}

impl<'a> NumberedTag<'a> {
    pub fn new(tags: &'a TagConfig) -> Self {
        Self { tags }
    }
}

impl<'a> TagReleaseTag<'a> {
    pub fn new(tags: &'a TagConfig) -> Self {
        Self { tags }
    }
}

impl<'a> StoreTag<'a> {
    pub fn new(tags: &'a TagConfig) -> Self {
        Self { tags }
    }
}

impl TagCodec for LatestTag<'_> {
    type Key = String;

    fn encode(&self, branch: &String) -> String {
        format!("{}-{}-{}", self.tags.prefix(), branch, LATEST_SUFFIX)
    }

    fn encode_tmp(&self, branch: &String) -> String {
        format!("{}{}", self.tags.incomplete_prefix(), self.encode(branch))
    }

    fn decode(&self, tag: &str) -> Option<String> {
        let rest = tag
            .strip_prefix(self.tags.prefix())?
            .strip_suffix(LATEST_SUFFIX)?;
        dashed(rest).map(str::to_string)
    }

    fn decode_tmp(&self, tag: &str) -> Option<String> {
        self.decode(tag.strip_prefix(self.tags.incomplete_prefix())?)
    }
}

impl TagCodec for NumberedTag<'_> {
    type Key = NumberedKey;

    fn encode(&self, key: &NumberedKey) -> String {
        format!("{}-{}-{}", self.tags.prefix(), key.branch, key.build_number)
    }

    fn encode_tmp(&self, key: &NumberedKey) -> String {
        format!("{}{}", self.tags.incomplete_prefix(), self.encode(key))
    }

    fn decode(&self, tag: &str) -> Option<NumberedKey> {
        let rest = tag.strip_prefix(self.tags.prefix())?;
        let (head, build_number) = split_number(rest)?;
        let branch = head.strip_prefix('-')?;
        Some(NumberedKey {
            branch: branch.to_string(),
            build_number,
        })
    }

    fn decode_tmp(&self, tag: &str) -> Option<NumberedKey> {
        self.decode(tag.strip_prefix(self.tags.incomplete_prefix())?)
    }
}

impl TagCodec for TagReleaseTag<'_> {
    type Key = String;

    fn encode(&self, tag: &String) -> String {
        tag.clone()
    }

    fn encode_tmp(&self, tag: &String) -> String {
        format!(
            "{}{}-{}-{}",
            self.tags.incomplete_prefix(),
            self.tags.prefix(),
            tag,
            TAG_TMP_SUFFIX
        )
    }

    fn decode(&self, tag: &str) -> Option<String> {
        Some(tag.to_string())
    }

    fn decode_tmp(&self, tag: &str) -> Option<String> {
        let rest = tag
            .strip_prefix(self.tags.incomplete_prefix())?
            .strip_prefix(self.tags.prefix())?
            .strip_suffix(TAG_TMP_SUFFIX)?;
        dashed(rest).map(str::to_string)
    }
}

impl TagCodec for StoreTag<'_> {
    type Key = StoreKey;

    fn encode(&self, key: &StoreKey) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.tags.prefix(),
            key.branch,
            key.build_number,
            key.job_number,
            STORE_SUFFIX
        )
    }

    fn encode_tmp(&self, key: &StoreKey) -> String {
        format!("{}{}", self.tags.incomplete_prefix(), self.encode(key))
    }

    fn decode(&self, tag: &str) -> Option<StoreKey> {
        let rest = tag
            .strip_prefix(self.tags.prefix())?
            .strip_suffix(STORE_SUFFIX)?
            .strip_suffix('-')?;
        let (head, job_number) = split_number(rest)?;
        let (head, build_number) = split_number(head)?;
        let branch = head.strip_prefix('-')?;
        Some(StoreKey {
            branch: branch.to_string(),
            build_number,
            job_number,
        })
    }

    fn decode_tmp(&self, tag: &str) -> Option<StoreKey> {
        self.decode(tag.strip_prefix(self.tags.incomplete_prefix())?)
    }
}

/// `-<inner>-` → `<inner>`. The two dashes must be distinct characters.
fn dashed(s: &str) -> Option<&str> {
    s.strip_prefix('-')?.strip_suffix('-')
}

/// `<head>-<digits>` → (`<head>`, number), splitting at the last dash.
fn split_number(s: &str) -> Option<(&str, u64)> {
    let (head, digits) = s.rsplit_once('-')?;
    Some((head, parse_decimal(digits)?))
}

/// Canonical decimal: ASCII digits only, no sign, no leading zeros (except `0` itself).
pub(crate) fn parse_decimal(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}
