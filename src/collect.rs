//! Collection boundary: pull candidates from a source, normalize them into
//! [`NewItem`]s, drop duplicates, and insert the rest as `discovered`.
//!
//! Sources are heterogeneous. A [`RawCandidate`] accepts the common field
//! spellings (`link`/`url`, `author`/`creator`, `rights`, `audio_url`, ...)
//! and [`normalize`] settles them into one shape. A candidate without a
//! recognizable license is still inserted, with `license_kind = unknown`,
//! so compliance can reject it visibly instead of it vanishing here.
//!
//! Per-candidate problems (unparseable line, missing title) are counted
//! and logged; they never abort the pass.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use radio_cortex_core::clock::Clock;
use radio_cortex_core::dedup::DedupGuard;
use radio_cortex_core::error::StoreError;
use radio_cortex_core::license::{parse_license, parse_license_url, LicenseKind};
use radio_cortex_core::models::NewItem;
use radio_cortex_core::store::ItemStore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::config::{Config, SourceConfig};

/// A candidate as a source describes it, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCandidate {
    #[serde(default, alias = "identifier", alias = "guid", alias = "source_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "author", alias = "creator")]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default, alias = "duration_seconds", alias = "duration")]
    pub duration_secs: Option<i64>,
    #[serde(default, alias = "rights")]
    pub license: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,
    #[serde(default, alias = "summary")]
    pub description: Option<String>,
    #[serde(default, alias = "link", alias = "url")]
    pub source_url: Option<String>,
    #[serde(default, alias = "audio_url", alias = "enclosure")]
    pub media_url: Option<String>,
}

/// Candidates in source order. Each entry is either a candidate or the
/// reason that one entry could not be read.
pub type CandidateStream = BoxStream<'static, Result<RawCandidate, String>>;

/// A pull-based candidate source.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Open a fresh pass over the source from its first candidate.
    ///
    /// Fails only when the source as a whole is unreachable. Entries are
    /// read as the stream is polled, so a consumer that stops early never
    /// pays for the rest of the feed.
    async fn fetch(&self) -> Result<CandidateStream>;
}

/// Newline-delimited JSON file, one candidate object per line.
pub struct JsonlSource {
    name: String,
    path: PathBuf,
}

impl JsonlSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Source for JsonlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<CandidateStream> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("Failed to read source file: {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let stream = async_stream::stream! {
            let mut line_no = 0usize;
            loop {
                line_no += 1;
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        yield serde_json::from_str::<RawCandidate>(&line)
                            .map_err(|e| format!("line {}: {}", line_no, e));
                    }
                    Ok(None) => break,
                    // The reader cannot resync after an I/O error.
                    Err(e) => {
                        yield Err(format!("line {}: {}", line_no, e));
                        break;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

pub fn create_source(name: &str, config: &SourceConfig) -> Result<Box<dyn Source>> {
    match config.kind.as_str() {
        "jsonl" => Ok(Box::new(JsonlSource::new(name, &config.path))),
        other => anyhow::bail!("Unknown source kind: {}", other),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the license: a Creative Commons URL wins, then the license
/// label, then anything the description mentions.
fn resolve_license(raw: &RawCandidate) -> (Option<String>, LicenseKind) {
    if let Some(url) = non_empty(raw.license_url.clone()) {
        if let Some(kind) = parse_license_url(&url) {
            return (Some(url), kind);
        }
    }
    if let Some(label) = non_empty(raw.license.clone()) {
        let kind = parse_license(&label);
        if kind != LicenseKind::Unknown {
            return (Some(label), kind);
        }
    }
    if let Some(desc) = non_empty(raw.description.clone()) {
        let kind = parse_license(&desc);
        if kind != LicenseKind::Unknown {
            return (Some(desc), kind);
        }
    }
    // Keep whatever was offered so a later parser can try again.
    let offered = non_empty(raw.license.clone()).or_else(|| non_empty(raw.license_url.clone()));
    (offered, LicenseKind::Unknown)
}

/// Normalize a raw candidate. Title and source URL are required.
pub fn normalize(source: &str, collected_by: &str, raw: RawCandidate) -> Result<NewItem, String> {
    let title = non_empty(raw.title.clone()).ok_or("missing title")?;
    let source_url = non_empty(raw.source_url.clone())
        .or_else(|| non_empty(raw.media_url.clone()))
        .ok_or("missing source_url")?;
    let mut artist = non_empty(raw.artist.clone());

    // "Artist - Title" is common in feed titles without an author field.
    let title = match (&artist, title.split_once(" - ")) {
        (None, Some((a, t))) if !a.trim().is_empty() && !t.trim().is_empty() => {
            artist = Some(a.trim().to_string());
            t.trim().to_string()
        }
        _ => title,
    };

    if let Some(d) = raw.duration_secs {
        if d < 0 {
            return Err(format!("negative duration: {}", d));
        }
    }

    let (license_raw, license_kind) = resolve_license(&raw);
    let source_id = non_empty(raw.id).unwrap_or_else(|| source_url.clone());

    Ok(NewItem {
        source: source.to_string(),
        source_id,
        title,
        artist,
        album: non_empty(raw.album),
        duration_secs: raw.duration_secs,
        license_raw,
        license_kind,
        source_url,
        media_url: non_empty(raw.media_url),
        collected_by: collected_by.to_string(),
    })
}

/// Outcome of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectReport {
    pub source: String,
    pub dry_run: bool,
    pub fetched: u64,
    pub invalid: u64,
    pub duplicates: u64,
    pub inserted: u64,
}

/// Run one collection pass from `source` into `store`.
///
/// With `dry_run`, candidates are normalized and dedup-checked but nothing
/// is written; `inserted` then counts what would have been inserted.
pub async fn collect_from_source(
    store: &dyn ItemStore,
    source: &dyn Source,
    clock: Arc<dyn Clock>,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<CollectReport> {
    let mut entries = source.fetch().await?.take(limit.unwrap_or(usize::MAX));
    let guard = DedupGuard::new(store);
    let collected_by = format!("collector:{}", source.name());
    let mut seen = HashSet::new();
    let mut report = CollectReport {
        source: source.name().to_string(),
        dry_run,
        ..CollectReport::default()
    };

    while let Some(entry) = entries.next().await {
        report.fetched += 1;
        let candidate = match entry.and_then(|raw| normalize(source.name(), &collected_by, raw)) {
            Ok(c) => c,
            Err(reason) => {
                warn!(source = %source.name(), %reason, "skipping invalid candidate");
                report.invalid += 1;
                continue;
            }
        };

        let fingerprint = guard.fingerprint(&candidate);
        if !seen.insert(fingerprint.clone()) || guard.is_duplicate(&fingerprint).await? {
            debug!(title = %candidate.title, "duplicate candidate");
            report.duplicates += 1;
            continue;
        }
        if dry_run {
            report.inserted += 1;
            continue;
        }

        match store.insert(candidate, clock.now_millis()).await {
            Ok(item) => {
                debug!(item_id = %item.id, title = %item.title, "discovered");
                report.inserted += 1;
            }
            // Another collector won the race between check and insert.
            Err(StoreError::Duplicate(_)) => report.duplicates += 1,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(report)
}

/// `cortex collect <source>`
pub async fn run_collect(
    config: &Config,
    store: &dyn ItemStore,
    clock: Arc<dyn Clock>,
    source_name: &str,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let source_config = config.sources.get(source_name).with_context(|| {
        let known: Vec<_> = config.sources.keys().map(String::as_str).collect();
        format!(
            "Unknown source: '{}'. Configured: {}",
            source_name,
            if known.is_empty() { "(none)".to_string() } else { known.join(", ") }
        )
    })?;
    let source = create_source(source_name, source_config)?;
    let report = collect_from_source(store, source.as_ref(), clock, limit, dry_run).await?;

    if dry_run {
        println!("collect {} (dry-run)", report.source);
    } else {
        println!("collect {}", report.source);
    }
    println!("  fetched: {}", report.fetched);
    println!("  invalid: {}", report.invalid);
    println!("  duplicates: {}", report.duplicates);
    if dry_run {
        println!("  would insert: {}", report.inserted);
    } else {
        println!("  inserted: {}", report.inserted);
    }
    println!("ok");
    Ok(())
}
