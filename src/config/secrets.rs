//! Secret handling utilities.
//!
//! Re-exports secrecy types and keeps API keys out of anything that gets logged.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Render a URL for logs with the values of credential query parameters masked.
pub fn redact_url(url: &url::Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let masked = matches!(k.as_ref(), "apikey" | "access_token");
            (k.into_owned(), if masked { "***".to_string() } else { v.into_owned() })
        })
        .collect();
    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
