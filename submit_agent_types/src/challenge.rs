//! Challenge widget markers found in page HTML.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::sync::LazyLock;

/// Markers of embedded challenge widgets.
static CHALLENGE_MARKERS: &[&str] = &[
    "g-recaptcha",
    "hcaptcha",
    "cf-turnstile",
    "data-sitekey",
    "captcha",
];

static MARKERS_AC: LazyLock<Option<AhoCorasick>> = LazyLock::new(|| {
    AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostFirst)
        .build(CHALLENGE_MARKERS)
        .ok()
});

/// The first challenge marker present in `html`, if any.
pub fn detect_challenge_marker(html: &str) -> Option<&'static str> {
    match MARKERS_AC.as_ref() {
        Some(ac) => ac
            .find(html)
            .map(|m| CHALLENGE_MARKERS[m.pattern().as_usize()]),
        None => {
            let lower = html.to_ascii_lowercase();
            CHALLENGE_MARKERS.iter().copied().find(|m| lower.contains(m))
        }
    }
}

/// Whether `html` embeds a known challenge widget.
pub fn has_challenge_marker(html: &str) -> bool {
    detect_challenge_marker(html).is_some()
}
