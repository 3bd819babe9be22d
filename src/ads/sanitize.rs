use std::sync::OnceLock;

use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::allowlist::script_src_allowed;

/// Attributes forwarded onto re-created script elements. `data-*` attributes
/// are forwarded as well; everything else is stripped.
const FORWARDED_SCRIPT_ATTRS: &[&str] = &["type", "async", "defer", "charset"];

fn script_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").expect("script regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)([a-z_][a-z0-9_:.-]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
            .expect("attr regex")
    })
}

/// Inline scripts are only kept when they are a bare ad-config assignment,
/// e.g. `atOptions = { 'key': ..., 'format': 'iframe', ... };`.
fn ad_config_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^(?:var\s+|let\s+|window\.)?atOptions\s*=\s*\{.*\}\s*;?\s*$")
            .expect("ad config regex")
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptAttr {
    pub name: String,
    /// None for boolean attributes like `async`/`defer`.
    pub value: Option<String>,
}

/// A script element that survived sanitization. Exactly one of `src` and
/// `text` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSpec {
    pub src: Option<String>,
    pub text: Option<String>,
    pub attrs: Vec<ScriptAttr>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedMarkup {
    /// Non-script markup, rendered into the ad container as-is.
    pub html: String,
    pub scripts: Vec<ScriptSpec>,
}

impl SanitizedMarkup {
    pub fn is_empty(&self) -> bool {
        self.html.trim().is_empty() && self.scripts.is_empty()
    }

    /// Copy with a `cb=<now_ms>` query parameter appended to every external
    /// script src, so each injection fetches a fresh tag instead of a cached
    /// response. Called once per injection, not once per session.
    pub fn with_cache_buster(&self, now_ms: i64) -> SanitizedMarkup {
        let scripts = self
            .scripts
            .iter()
            .map(|spec| ScriptSpec {
                src: spec.src.as_deref().map(|s| append_cache_buster(s, now_ms)),
                text: spec.text.clone(),
                attrs: spec.attrs.clone(),
            })
            .collect();

        SanitizedMarkup {
            html: self.html.clone(),
            scripts,
        }
    }
}

/// Splits raw third-party ad markup into inert HTML and the subset of script
/// elements that pass the allow-list; scripts that fail the allow-list or the
/// inline ad-config shape are dropped without error. Srcs are kept verbatim
/// here; cache-busting happens per injection via [`SanitizedMarkup::with_cache_buster`].
pub fn sanitize_markup(raw: &str) -> SanitizedMarkup {
    let mut scripts = Vec::new();
    let mut dropped = 0usize;

    for captures in script_block_re().captures_iter(raw) {
        let attr_text = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = captures.get(2).map(|m| m.as_str()).unwrap_or("");

        match build_script_spec(attr_text, body) {
            Some(spec) => scripts.push(spec),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        info!("dropped {dropped} script(s) failing the ad allow-list");
    }

    let html = script_block_re().replace_all(raw, "").trim().to_string();

    SanitizedMarkup { html, scripts }
}

fn build_script_spec(attr_text: &str, body: &str) -> Option<ScriptSpec> {
    let mut src: Option<String> = None;
    let mut attrs = Vec::new();

    for captures in attr_re().captures_iter(attr_text) {
        let name = captures.get(1)?.as_str().to_ascii_lowercase();
        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .or_else(|| captures.get(4))
            .map(|m| m.as_str().to_string());

        if name == "src" {
            src = value;
        } else if FORWARDED_SCRIPT_ATTRS.contains(&name.as_str()) || name.starts_with("data-") {
            attrs.push(ScriptAttr { name, value });
        }
    }

    match src {
        Some(src) => {
            if !script_src_allowed(&src) {
                return None;
            }
            Some(ScriptSpec {
                src: Some(src),
                text: None,
                attrs,
            })
        }
        None => {
            let trimmed = body.trim();
            if trimmed.is_empty() || !ad_config_re().is_match(trimmed) {
                return None;
            }
            Some(ScriptSpec {
                src: None,
                text: Some(trimmed.to_string()),
                attrs,
            })
        }
    }
}

fn append_cache_buster(src: &str, now_ms: i64) -> String {
    let separator = if src.contains('?') { '&' } else { '?' };
    format!("{src}{separator}cb={now_ms}")
}
