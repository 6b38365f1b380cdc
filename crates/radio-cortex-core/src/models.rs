//! Core data models used throughout Radio Cortex.
//!
//! An [`Item`] is one discovered media unit. Its [`Status`] is the only
//! hand-off signal between agents; its lease fields record which agent
//! instance currently owns it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dedup::fingerprint;
use crate::error::ParseEnumError;
use crate::license::LicenseKind;

/// Lifecycle status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Discovered,
    PendingEnrichment,
    PendingCompliance,
    Approved,
    Rejected,
    DiscoveredFailed,
    PendingEnrichmentFailed,
    PendingComplianceFailed,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Discovered,
        Status::PendingEnrichment,
        Status::PendingCompliance,
        Status::Approved,
        Status::Rejected,
        Status::DiscoveredFailed,
        Status::PendingEnrichmentFailed,
        Status::PendingComplianceFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Discovered => "discovered",
            Status::PendingEnrichment => "pending_enrichment",
            Status::PendingCompliance => "pending_compliance",
            Status::Approved => "approved",
            Status::Rejected => "rejected",
            Status::DiscoveredFailed => "discovered_failed",
            Status::PendingEnrichmentFailed => "pending_enrichment_failed",
            Status::PendingComplianceFailed => "pending_compliance_failed",
        }
    }

    /// No agent-driven transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Approved
                | Status::Rejected
                | Status::DiscoveredFailed
                | Status::PendingEnrichmentFailed
                | Status::PendingComplianceFailed
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Status::DiscoveredFailed
                | Status::PendingEnrichmentFailed
                | Status::PendingComplianceFailed
        )
    }

    /// Only vetted items may surface in similarity results.
    pub fn is_searchable(&self) -> bool {
        matches!(self, Status::Approved)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// The role an agent runner plays. Each capability owns one input status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Collect,
    Enrich,
    Validate,
}

impl Capability {
    pub const ALL: [Capability; 3] =
        [Capability::Collect, Capability::Enrich, Capability::Validate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Collect => "collect",
            Capability::Enrich => "enrich",
            Capability::Validate => "validate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "capability",
                value: s.to_string(),
            })
    }
}

/// Candidate produced at the collection boundary, before it has an id.
///
/// Heterogeneous source payloads are normalized into this shape; fields a
/// source does not provide stay `None` and the license defaults to
/// [`LicenseKind::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: Option<i64>,
    pub license_raw: Option<String>,
    pub license_kind: LicenseKind,
    pub source_url: String,
    pub media_url: Option<String>,
    pub collected_by: String,
}

impl NewItem {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, self.artist.as_deref(), &self.source_url)
    }
}

/// A persisted item with its derived and lifecycle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub fingerprint: String,

    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: Option<i64>,
    pub license_raw: Option<String>,
    pub license_kind: LicenseKind,
    pub source_url: String,
    pub media_url: Option<String>,
    pub collected_by: String,

    pub category: Option<String>,
    pub secondary_categories: Vec<String>,
    pub mood_tags: BTreeSet<String>,
    pub cultural_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub status: Status,
    pub lease_owner: Option<String>,
    pub lease_acquired_at: Option<i64>,
    pub lease_expires_at: Option<i64>,
    pub not_before: Option<i64>,
    pub attempts: BTreeMap<Capability, u32>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Item {
    /// Build a freshly discovered item from a candidate.
    pub fn from_new(id: String, new: NewItem, now: i64) -> Self {
        let fingerprint = new.fingerprint();
        Self {
            id,
            source: new.source,
            source_id: new.source_id,
            fingerprint,
            title: new.title,
            artist: new.artist,
            album: new.album,
            duration_secs: new.duration_secs,
            license_raw: new.license_raw,
            license_kind: new.license_kind,
            source_url: new.source_url,
            media_url: new.media_url,
            collected_by: new.collected_by,
            category: None,
            secondary_categories: Vec::new(),
            mood_tags: BTreeSet::new(),
            cultural_context: None,
            embedding: None,
            status: Status::Discovered,
            lease_owner: None,
            lease_acquired_at: None,
            lease_expires_at: None,
            not_before: None,
            attempts: BTreeMap::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A lease is active while it has an owner and has not expired.
    pub fn has_active_lease(&self, now: i64) -> bool {
        match (&self.lease_owner, self.lease_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// True when the item's backoff window (if any) has passed.
    pub fn is_eligible(&self, now: i64) -> bool {
        self.not_before.map(|nb| nb <= now).unwrap_or(true)
    }

    pub fn attempts_for(&self, capability: Capability) -> u32 {
        self.attempts.get(&capability).copied().unwrap_or(0)
    }
}

/// Replacement vector carried by an enrichment commit.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingPatch {
    pub vector: Vec<f32>,
    pub model: String,
}

/// Field changes applied together with a status transition.
///
/// `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub media_url: Option<String>,
    pub duration_secs: Option<i64>,
    pub license_kind: Option<LicenseKind>,
    pub category: Option<String>,
    pub secondary_categories: Option<Vec<String>>,
    pub mood_tags: Option<BTreeSet<String>>,
    pub cultural_context: Option<String>,
    pub embedding: Option<EmbeddingPatch>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == ItemPatch::default()
    }

    pub fn apply_to(&self, item: &mut Item) {
        if let Some(v) = &self.media_url {
            item.media_url = Some(v.clone());
        }
        if let Some(v) = self.duration_secs {
            item.duration_secs = Some(v);
        }
        if let Some(v) = self.license_kind {
            item.license_kind = v;
        }
        if let Some(v) = &self.category {
            item.category = Some(v.clone());
        }
        if let Some(v) = &self.secondary_categories {
            item.secondary_categories = v.clone();
        }
        if let Some(v) = &self.mood_tags {
            item.mood_tags = v.clone();
        }
        if let Some(v) = &self.cultural_context {
            item.cultural_context = Some(v.clone());
        }
        if let Some(e) = &self.embedding {
            item.embedding = Some(e.vector.clone());
        }
    }
}

/// A time-bounded exclusive claim on an item held by one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lease {
    pub item: Item,
    pub owner: String,
    pub acquired_at: i64,
    pub expires_at: i64,
}

impl Lease {
    pub fn item_id(&self) -> &str {
        &self.item.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewItem {
        NewItem {
            source: "archive".into(),
            source_id: "a-1".into(),
            title: "Águas de Março".into(),
            artist: Some("Tom Jobim".into()),
            album: None,
            duration_secs: Some(212),
            license_raw: Some("CC BY 4.0".into()),
            license_kind: LicenseKind::CcBy,
            source_url: "https://example.org/a".into(),
            media_url: Some("https://example.org/a.mp3".into()),
            collected_by: "collector".into(),
        }
    }

    #[test]
    fn test_status_roundtrip_names() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("pending".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&Status::PendingEnrichmentFailed).unwrap();
        assert_eq!(json, "\"pending_enrichment_failed\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(Status::Approved.is_terminal());
        assert!(Status::Rejected.is_terminal());
        assert!(Status::DiscoveredFailed.is_terminal());
        assert!(!Status::PendingCompliance.is_terminal());
        assert!(Status::Approved.is_searchable());
        assert!(!Status::Rejected.is_searchable());
    }

    #[test]
    fn test_from_new_starts_discovered() {
        let item = Item::from_new("id-1".into(), sample(), 1_000);
        assert_eq!(item.status, Status::Discovered);
        assert_eq!(item.created_at, 1_000);
        assert_eq!(item.fingerprint, sample().fingerprint());
        assert!(!item.has_active_lease(1_000));
        assert!(item.is_eligible(0));
    }

    #[test]
    fn test_active_lease_expiry() {
        let mut item = Item::from_new("id-1".into(), sample(), 0);
        item.lease_owner = Some("w1".into());
        item.lease_expires_at = Some(500);
        assert!(item.has_active_lease(499));
        assert!(!item.has_active_lease(500));
    }

    #[test]
    fn test_attempts_serialize_as_named_keys() {
        let mut item = Item::from_new("id-1".into(), sample(), 0);
        item.attempts.insert(Capability::Enrich, 2);
        let json = serde_json::to_value(&item.attempts).unwrap();
        assert_eq!(json["enrich"], 2);
    }

    #[test]
    fn test_patch_apply_leaves_unset_fields() {
        let mut item = Item::from_new("id-1".into(), sample(), 0);
        let patch = ItemPatch {
            category: Some("Bossa Nova".into()),
            mood_tags: Some(["calm".to_string()].into_iter().collect()),
            ..Default::default()
        };
        patch.apply_to(&mut item);
        assert_eq!(item.category.as_deref(), Some("Bossa Nova"));
        assert!(item.mood_tags.contains("calm"));
        assert_eq!(item.media_url.as_deref(), Some("https://example.org/a.mp3"));
        assert!(ItemPatch::default().is_empty());
        assert!(!patch.is_empty());
    }
}
