//! Endpoint URL Normalization
//!
//! The backend address arrives in many shapes: a bare host, a host:port,
//! a base URL with or without a trailing slash, or a full URL already
//! pointing at the generate path. Both helpers here are idempotent, so
//! any of those forms canonicalizes to the same result no matter how
//! often it is re-normalized.
//!
//! Suffixes are stripped right-to-left so URLs with path prefixes
//! (e.g. behind a reverse proxy at `/api/ollama`) survive intact.

/// Strip the API suffix from a URL, yielding the server base.
///
/// `http://localhost:11434/api/generate` -> `http://localhost:11434`
/// `https://example.com/api/ollama/api/generate` -> `https://example.com/api/ollama`
pub fn base_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    let stripped = url.trim_end_matches('/');

    if let Some(prefix) = stripped.strip_suffix("/api/generate") {
        return prefix.to_string();
    }
    if let Some(prefix) = stripped.strip_suffix("/api") {
        return prefix.to_string();
    }

    stripped.to_string()
}

/// Canonicalize any address form into the full generate-endpoint URL.
///
/// Adds an `http://` scheme when none is present and appends the
/// `/api/generate` path unless the input already carries it.
pub fn generate_url(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut url = input.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{url}");
    }

    let url = url.trim_end_matches('/');

    if url.ends_with("/api/generate") {
        return url.to_string();
    }
    if url.ends_with("/api") {
        return format!("{url}/generate");
    }

    format!("{url}/api/generate")
}

/// Derive the version/identity endpoint from a server base URL.
pub fn version_url(base: &str) -> String {
    format!("{}/api/version", base.trim_end_matches('/'))
}

/// Derive the model catalog endpoint from a server base URL.
pub fn tags_url(base: &str) -> String {
    format!("{}/api/tags", base.trim_end_matches('/'))
}
