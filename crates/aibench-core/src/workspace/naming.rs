//! Run directory naming.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::config::RunConfig;

/// Longest sanitized name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Name used when sanitizing leaves nothing behind.
pub const PLACEHOLDER_NAME: &str = "run";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Reduce `raw` to `[A-Za-z0-9._-]`.
///
/// Leading non-alphanumerics are stripped and each run of whitespace or
/// other unsafe characters collapses to a single `-`. The result is capped
/// at [`MAX_NAME_LEN`].
pub fn sanitize_name(raw: &str) -> String {
    let trimmed = raw.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());

    let mut out = String::with_capacity(trimmed.len().min(MAX_NAME_LEN));
    let mut last_was_sep = false;
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }

    out.truncate(MAX_NAME_LEN);
    let out = out.trim_end_matches(&['-', '.'][..]).to_string();
    if out.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        out
    }
}

/// Human-readable base name: the configured name, else the repository name.
pub fn base_name(config: &RunConfig) -> String {
    let raw = match &config.name {
        Some(name) => name.as_str(),
        None => config
            .repo_url
            .trim_end_matches('/')
            .rsplit(&['/', ':'][..])
            .next()
            .unwrap_or_default(),
    };
    sanitize_name(raw.trim_end_matches(".git"))
}

/// `<name>-<YYYYMMDD-HHMMSS>-<seq>-<nonce>`.
///
/// The sequence is process-wide; the random nonce keeps ids from separate
/// processes apart when they start in the same second.
pub fn generate_run_id(name: &str, now: DateTime<Utc>) -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{:03}-{}",
        name,
        now.format("%Y%m%d-%H%M%S"),
        seq % 1000,
        &nonce[..6]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_leading_and_collapses_whitespace() {
        assert_eq!(sanitize_name("  --My   Fancy run!"), "My-Fancy-run");
        assert_eq!(sanitize_name("fix/bug #12"), "fix-bug-12");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(200);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn sanitize_empty_falls_back_to_placeholder() {
        assert_eq!(sanitize_name(""), PLACEHOLDER_NAME);
        assert_eq!(sanitize_name("!!! ///"), PLACEHOLDER_NAME);
    }

    #[test]
    fn base_name_prefers_config_name() {
        let mut config = RunConfig::new("https://github.com/acme/widget.git", "command");
        assert_eq!(base_name(&config), "widget");

        config.name = Some("nightly smoke".to_string());
        assert_eq!(base_name(&config), "nightly-smoke");

        let ssh = RunConfig::new("git@github.com:acme/gadget.git", "command");
        assert_eq!(base_name(&ssh), "gadget");
    }

    #[test]
    fn generated_ids_are_unique_within_a_second() {
        let now = Utc::now();
        let a = generate_run_id("widget", now);
        let b = generate_run_id("widget", now);
        assert_ne!(a, b);
        assert!(a.starts_with("widget-"));
        assert_eq!(a, sanitize_name(&a));
    }
}
