//! Content fingerprinting and the dedup guard.
//!
//! The fingerprint is a pure function of the normalized title, artist and
//! canonical source URL, so re-crawling a feed produces the same hash and
//! never a second item.

use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::models::NewItem;
use crate::store::ItemStore;

/// Lower-case and collapse runs of whitespace to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical form of a source URL.
///
/// Lower-cases scheme and host, drops the fragment and any trailing
/// slash on the path. Path and query keep their case.
pub fn canonical_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);

    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, url),
    };

    let host_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (host, tail) = rest.split_at(host_end);
    let (path, query) = match tail.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (tail, None),
    };

    let mut out = String::with_capacity(url.len());
    if let Some(scheme) = scheme {
        out.push_str(&scheme);
        out.push_str("://");
    }
    out.push_str(&host.to_ascii_lowercase());
    out.push_str(path.trim_end_matches('/'));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// SHA-256 hex fingerprint of normalized title, artist and source URL.
pub fn fingerprint(title: &str, artist: Option<&str>, source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_text(artist.unwrap_or("")).as_bytes());
    hasher.update([0x1f]);
    hasher.update(canonical_url(source_url).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collection-time duplicate check backed by the item store.
pub struct DedupGuard<'a> {
    store: &'a dyn ItemStore,
}

impl<'a> DedupGuard<'a> {
    pub fn new(store: &'a dyn ItemStore) -> Self {
        Self { store }
    }

    pub fn fingerprint(&self, candidate: &NewItem) -> String {
        candidate.fingerprint()
    }

    pub async fn is_duplicate(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self.store.find_by_fingerprint(hash).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Águas   de\tMarço "), "águas de março");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_canonical_url() {
        assert_eq!(
            canonical_url("HTTPS://Example.ORG/Track/1/#listen"),
            "https://example.org/Track/1"
        );
        assert_eq!(
            canonical_url(" https://example.org/a?id=7 "),
            "https://example.org/a?id=7"
        );
        assert_eq!(canonical_url("https://example.org/"), "https://example.org");
        assert_eq!(canonical_url("https://example.org/a?"), "https://example.org/a");
    }

    #[test]
    fn test_fingerprint_is_normalized() {
        let a = fingerprint("Águas de Março", Some("Tom Jobim"), "https://example.org/a");
        let b = fingerprint(
            "  águas DE   março",
            Some("TOM  JOBIM"),
            "https://EXAMPLE.org/a/",
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_distinguishes_fields() {
        let base = fingerprint("Song", Some("Artist"), "https://example.org/a");
        assert_ne!(base, fingerprint("Song", Some("Other"), "https://example.org/a"));
        assert_ne!(base, fingerprint("Song", Some("Artist"), "https://example.org/b"));
        assert_ne!(base, fingerprint("Song", None, "https://example.org/a"));
        // field separator keeps "ab"+"c" distinct from "a"+"bc"
        assert_ne!(
            fingerprint("ab", Some("c"), "u"),
            fingerprint("a", Some("bc"), "u")
        );
    }
}
