use url::Url;

/// Ad-network hostnames permitted to have scripts injected into the page.
/// Matching is exact or subdomain-suffix; nothing else ever gets a script tag.
pub const AD_HOST_ALLOWLIST: &[&str] = &[
    "highperformanceformat.com",
    "topcreativeformat.com",
    "effectiveratecpm.com",
    "profitablecpmrate.com",
];

pub fn host_allowed(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    AD_HOST_ALLOWLIST.iter().any(|allowed| {
        host == *allowed || host.ends_with(&format!(".{allowed}"))
    })
}

/// Checks a script `src` attribute against the allow-list.
///
/// Ad tags commonly ship scheme-relative URLs (`//host/path`), so those are
/// normalized before parsing. Anything that fails to parse is rejected.
pub fn script_src_allowed(src: &str) -> bool {
    let src = src.trim();
    let normalized = if src.starts_with("//") {
        format!("https:{src}")
    } else {
        src.to_string()
    };

    match Url::parse(&normalized) {
        Ok(url) => matches!(url.scheme(), "http" | "https")
            && url.host_str().map(host_allowed).unwrap_or(false),
        Err(_) => false,
    }
}
