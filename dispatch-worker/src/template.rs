//! Placeholder substitution for subjects, bodies and document templates.
//!
//! Tags are matched case-insensitively. Unknown `#...#` sequences are left
//! untouched.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

/// A supported placeholder, as listed by the tag reference endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Tag {
    pub tag: &'static str,
    pub description: &'static str,
}

/// Every tag [`render`] understands.
pub const TAGS: &[Tag] = &[
    Tag {
        tag: "#email#",
        description: "Recipient address",
    },
    Tag {
        tag: "#num#",
        description: "Random 8-digit reference number, fresh on every render",
    },
    Tag {
        tag: "#date#",
        description: "Current UTC date (YYYY-MM-DD)",
    },
    Tag {
        tag: "#time#",
        description: "Current UTC time (HH:MM:SS)",
    },
];

/// Render `template` for `recipient_email` at the current time.
pub fn render(template: &str, recipient_email: &str) -> String {
    render_at(template, recipient_email, Utc::now())
}

/// Render `template` for `recipient_email`, taking `#date#`/`#time#` from `now`.
pub fn render_at(template: &str, recipient_email: &str, now: DateTime<Utc>) -> String {
    if template.is_empty() {
        return String::new();
    }

    let reference = rand::thread_rng().gen_range(10_000_000u32..=99_999_999).to_string();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M:%S").to_string();

    let mut out = replace_ignore_case(template, "#email#", recipient_email);
    out = replace_ignore_case(&out, "#num#", &reference);
    out = replace_ignore_case(&out, "#date#", &date);
    replace_ignore_case(&out, "#time#", &time)
}

/// Replace every ASCII-case-insensitive occurrence of `tag` in `haystack`.
fn replace_ignore_case(haystack: &str, tag: &str, with: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;

    // ASCII lowercasing keeps byte offsets aligned with `haystack`.
    for (idx, _) in lower.match_indices(tag) {
        out.push_str(&haystack[last..idx]);
        out.push_str(with);
        last = idx + tag.len();
    }
    out.push_str(&haystack[last..]);
    out
}
