// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Rewrites absolute links in sidecar responses so they resolve under the
//! `/profiles/<id>/ui/` prefix.

use std::borrow::Cow;
use std::sync::LazyLock;

use axum::http::{header, HeaderMap};
use regex::bytes::{Captures, Regex};

#[allow(clippy::expect_used)]
static ABSOLUTE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    // The sidecar's own mount is folded into the same match so `/ui/x` is
    // not prefixed twice.
    Regex::new(r#"(href="|new URL\(")/(?:ui/)?"#).expect("static regex is valid")
});

/// Path prefix the UI of profile `id` is served under.
pub fn ui_prefix(id: &str) -> String {
    format!("/profiles/{id}/ui/")
}

/// HTML and JavaScript responses are rewritten, as are responses without a
/// content type.
pub fn is_rewritable(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return true;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    let mime = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    mime == "text/html" || mime.contains("javascript")
}

/// Replaces `href="/` and `new URL("/` with the same text pointing at
/// `prefix`.
pub fn rewrite_links<'a>(body: &'a [u8], prefix: &str) -> Cow<'a, [u8]> {
    ABSOLUTE_LINK.replace_all(body, |caps: &Captures<'_>| {
        let mut out = caps[1].to_vec();
        out.extend_from_slice(prefix.as_bytes());
        out
    })
}
