//! License kinds and a best-effort parser for raw license strings.
//!
//! Sources describe licenses inconsistently: `"CC BY-SA 4.0"`,
//! `"Attribution-NonCommercial"`, a `creativecommons.org` URL, or free
//! text in a description. [`parse_license`] maps any of these to a
//! [`LicenseKind`]; anything unrecognized is [`LicenseKind::Unknown`],
//! which never passes compliance.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// Parsed license category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseKind {
    Cc0,
    CcBy,
    CcBySa,
    CcByNc,
    CcByNcSa,
    CcByNd,
    CcByNcNd,
    PublicDomain,
    #[default]
    Unknown,
}

/// Usage terms attached to a license kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LicenseTerms {
    pub allows_commercial: bool,
    pub allows_derivatives: bool,
    pub requires_attribution: bool,
    pub requires_share_alike: bool,
}

impl LicenseKind {
    pub const ALL: [LicenseKind; 9] = [
        LicenseKind::Cc0,
        LicenseKind::CcBy,
        LicenseKind::CcBySa,
        LicenseKind::CcByNc,
        LicenseKind::CcByNcSa,
        LicenseKind::CcByNd,
        LicenseKind::CcByNcNd,
        LicenseKind::PublicDomain,
        LicenseKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseKind::Cc0 => "cc0",
            LicenseKind::CcBy => "cc_by",
            LicenseKind::CcBySa => "cc_by_sa",
            LicenseKind::CcByNc => "cc_by_nc",
            LicenseKind::CcByNcSa => "cc_by_nc_sa",
            LicenseKind::CcByNd => "cc_by_nd",
            LicenseKind::CcByNcNd => "cc_by_nc_nd",
            LicenseKind::PublicDomain => "public_domain",
            LicenseKind::Unknown => "unknown",
        }
    }

    /// Terms for the kind. `Unknown` is treated as all-rights-reserved.
    pub fn terms(&self) -> LicenseTerms {
        let (commercial, derivatives, attribution, share_alike) = match self {
            LicenseKind::Cc0 | LicenseKind::PublicDomain => (true, true, false, false),
            LicenseKind::CcBy => (true, true, true, false),
            LicenseKind::CcBySa => (true, true, true, true),
            LicenseKind::CcByNc => (false, true, true, false),
            LicenseKind::CcByNcSa => (false, true, true, true),
            LicenseKind::CcByNd => (true, false, true, false),
            LicenseKind::CcByNcNd => (false, false, true, false),
            LicenseKind::Unknown => (false, false, true, false),
        };
        LicenseTerms {
            allows_commercial: commercial,
            allows_derivatives: derivatives,
            requires_attribution: attribution,
            requires_share_alike: share_alike,
        }
    }
}

impl fmt::Display for LicenseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LicenseKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "license kind",
                value: s.to_string(),
            })
    }
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)creativecommons\.org/(?:licenses|publicdomain)/([a-z-]+)")
            .expect("static regex")
    })
}

// Order matters: the more specific variants must be tried first.
fn text_patterns() -> &'static [(Regex, LicenseKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, LicenseKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table = [
            (
                r"(?i)\bcc0\b|public\s*domain\s*dedication",
                LicenseKind::Cc0,
            ),
            (
                r"(?i)\bcc[\s_-]*by[\s_-]*nc[\s_-]*nd\b|attribution[\s-]*non[\s-]?commercial[\s-]*no[\s-]?deriv",
                LicenseKind::CcByNcNd,
            ),
            (
                r"(?i)\bcc[\s_-]*by[\s_-]*nc[\s_-]*sa\b|attribution[\s-]*non[\s-]?commercial[\s-]*share[\s-]?alike",
                LicenseKind::CcByNcSa,
            ),
            (
                r"(?i)\bcc[\s_-]*by[\s_-]*nc\b|attribution[\s-]*non[\s-]?commercial",
                LicenseKind::CcByNc,
            ),
            (
                r"(?i)\bcc[\s_-]*by[\s_-]*nd\b|attribution[\s-]*no[\s-]?deriv",
                LicenseKind::CcByNd,
            ),
            (
                r"(?i)\bcc[\s_-]*by[\s_-]*sa\b|attribution[\s-]*share[\s-]?alike",
                LicenseKind::CcBySa,
            ),
            (
                r"(?i)\bcc[\s_-]*by\b|creative\s*commons\s*attribution",
                LicenseKind::CcBy,
            ),
            (r"(?i)public\s*domain", LicenseKind::PublicDomain),
        ];
        table
            .into_iter()
            .map(|(pattern, kind)| (Regex::new(pattern).expect("static regex"), kind))
            .collect()
    })
}

/// Map a `creativecommons.org` license URL to a kind.
pub fn parse_license_url(url: &str) -> Option<LicenseKind> {
    let caps = url_pattern().captures(url)?;
    let code = caps.get(1)?.as_str().to_ascii_lowercase();
    let kind = match code.as_str() {
        "zero" => LicenseKind::Cc0,
        "mark" => LicenseKind::PublicDomain,
        "by" => LicenseKind::CcBy,
        "by-sa" => LicenseKind::CcBySa,
        "by-nc" => LicenseKind::CcByNc,
        "by-nc-sa" => LicenseKind::CcByNcSa,
        "by-nd" => LicenseKind::CcByNd,
        "by-nc-nd" => LicenseKind::CcByNcNd,
        _ => return None,
    };
    Some(kind)
}

/// Parse a raw license string (label, URL, or free text).
pub fn parse_license(raw: &str) -> LicenseKind {
    if let Some(kind) = parse_license_url(raw) {
        return kind;
    }
    text_patterns()
        .iter()
        .find(|(re, _)| re.is_match(raw))
        .map(|(_, kind)| *kind)
        .unwrap_or(LicenseKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!(parse_license("CC0 1.0"), LicenseKind::Cc0);
        assert_eq!(parse_license("CC-BY"), LicenseKind::CcBy);
        assert_eq!(parse_license("cc by 4.0"), LicenseKind::CcBy);
        assert_eq!(parse_license("CC BY-SA 3.0"), LicenseKind::CcBySa);
        assert_eq!(parse_license("CC-BY-NC-SA"), LicenseKind::CcByNcSa);
        assert_eq!(parse_license("cc_by_nc"), LicenseKind::CcByNc);
        assert_eq!(parse_license("CC BY-NC-ND 4.0"), LicenseKind::CcByNcNd);
        assert_eq!(parse_license("Public Domain"), LicenseKind::PublicDomain);
    }

    #[test]
    fn test_parse_long_form() {
        assert_eq!(
            parse_license("Attribution-NonCommercial-ShareAlike 4.0 International"),
            LicenseKind::CcByNcSa
        );
        assert_eq!(
            parse_license("Creative Commons Attribution 4.0"),
            LicenseKind::CcBy
        );
        assert_eq!(
            parse_license("Released under a public domain dedication"),
            LicenseKind::Cc0
        );
    }

    #[test]
    fn test_parse_urls() {
        assert_eq!(
            parse_license("https://creativecommons.org/licenses/by-sa/4.0/"),
            LicenseKind::CcBySa
        );
        assert_eq!(
            parse_license("http://creativecommons.org/publicdomain/zero/1.0/"),
            LicenseKind::Cc0
        );
        assert_eq!(
            parse_license_url("https://creativecommons.org/publicdomain/mark/1.0/"),
            Some(LicenseKind::PublicDomain)
        );
        assert_eq!(parse_license_url("https://example.org/by/4.0"), None);
    }

    #[test]
    fn test_unrecognized_is_unknown() {
        assert_eq!(parse_license("All rights reserved"), LicenseKind::Unknown);
        assert_eq!(parse_license(""), LicenseKind::Unknown);
        assert_eq!(LicenseKind::default(), LicenseKind::Unknown);
    }

    #[test]
    fn test_terms() {
        assert!(LicenseKind::CcBy.terms().allows_commercial);
        assert!(!LicenseKind::CcByNc.terms().allows_commercial);
        assert!(LicenseKind::CcBySa.terms().requires_share_alike);
        assert!(!LicenseKind::CcByNd.terms().allows_derivatives);
        assert!(!LicenseKind::Unknown.terms().allows_commercial);
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in LicenseKind::ALL {
            assert_eq!(kind.as_str().parse::<LicenseKind>().unwrap(), kind);
        }
    }
}
