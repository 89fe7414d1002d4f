//! Redaction of secrets in text that ends up in CI logs.
//!
//! CI logs of open-source projects are public. Errors bubbling up from the HTTP layer
//! may carry request URLs (the Travis token exchange passes the GitHub token as a query
//! parameter) or header dumps, so every error line is passed through [`sanitize_line`]
//! before it is printed.
//!
//! # Example
//!
//! ```
//! use cirp_output_sanitizer::sanitize_line;
//!
//! let raw = "POST https://api.travis-ci.com/auth/github?github_token=abc123: timed out";
//! assert_eq!(
//!     sanitize_line(raw, &[]),
//!     "POST https://api.travis-ci.com/auth/github?github_token=***: timed out"
//! );
//! ```

/// Replacement text for redacted values.
pub const REDACTED: &str = "***";

/// Query parameter names whose values are always redacted.
pub const SENSITIVE_PARAMS: [&str; 4] = ["github_token", "access_token", "client_secret", "token"];

/// Secrets shorter than this are not redacted verbatim; they would mangle ordinary words.
const MIN_SECRET_LEN: usize = 4;

/// Replace every occurrence of each known secret with [`REDACTED`].
pub fn redact_secrets(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        let secret = secret.trim();
        if secret.len() >= MIN_SECRET_LEN {
            out = out.replace(secret, REDACTED);
        }
    }
    out
}

/// Redact values of sensitive query parameters such as `?github_token=...`.
pub fn redact_query_params(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    'scan: while !rest.is_empty() {
        for (idx, _) in rest.char_indices() {
            let at_boundary = idx == 0
                || matches!(rest[..idx].chars().last(), Some('?' | '&' | ' ' | ';'));
            if !at_boundary {
                continue;
            }
            for param in SENSITIVE_PARAMS {
                let tail = &rest[idx..];
                let Some(after_key) = tail.strip_prefix(param) else {
                    continue;
                };
                let Some(value) = after_key.strip_prefix('=') else {
                    continue;
                };
                let value_len = value
                    .find(|c: char| c == '&' || c == '"' || c == '\'' || c == ')' || c.is_whitespace() || c == ':')
                    .unwrap_or(value.len());
                let value_start = idx + param.len() + 1;
                out.push_str(&rest[..value_start]);
                if value_len > 0 {
                    out.push_str(REDACTED);
                }
                rest = &rest[value_start + value_len..];
                continue 'scan;
            }
        }
        out.push_str(rest);
        break;
    }

    out
}

/// Redact credentials following an `Authorization:` header name.
pub fn redact_authorization(text: &str) -> String {
    const HEADER: &str = "authorization:";

    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(HEADER) {
        let header_end = cursor + found + HEADER.len();
        out.push_str(&text[cursor..header_end]);

        let after = &text[header_end..];
        let spaces = after.len() - after.trim_start().len();
        let mut value_start = header_end + spaces;
        let value = &text[value_start..];

        // Keep the scheme ("token", "Bearer", ...) so the log still says what was sent.
        for scheme in ["token ", "bearer ", "basic "] {
            if value.to_ascii_lowercase().starts_with(scheme) {
                value_start += scheme.len();
                break;
            }
        }

        let value = &text[value_start..];
        let value_len = value
            .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == ',')
            .unwrap_or(value.len());

        out.push_str(&text[header_end..value_start]);
        if value_len > 0 {
            out.push_str(REDACTED);
        }
        cursor = value_start + value_len;
    }

    out.push_str(&text[cursor..]);
    out
}

/// Collapse multi-line text into a single line.
pub fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Apply every redaction and collapse the result to one line.
pub fn sanitize_line(text: &str, secrets: &[&str]) -> String {
    let text = redact_secrets(text, secrets);
    let text = redact_query_params(&text);
    let text = redact_authorization(&text);
    single_line(&text)
}
