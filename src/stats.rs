//! Catalog statistics: item counts per status, vector coverage, and
//! active leases. Used by `cortex stats` and `GET /stats`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use radio_cortex_core::clock::format_ts_iso;
use radio_cortex_core::error::StoreError;
use radio_cortex_core::models::Status;
use radio_cortex_core::store::CatalogStore;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub total: u64,
    /// Every status, zero counts included.
    pub by_status: BTreeMap<String, u64>,
    pub vectors: u64,
    pub vector_dims: usize,
    pub active_leases: u64,
}

pub async fn gather_stats(store: &dyn CatalogStore, now: i64) -> Result<StatsResponse, StoreError> {
    let counts = store.count_by_status().await?;
    let by_status: BTreeMap<String, u64> = Status::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), counts.get(s).copied().unwrap_or(0)))
        .collect();

    Ok(StatsResponse {
        total: by_status.values().sum(),
        by_status,
        vectors: store.vector_count().await?,
        vector_dims: store.dims(),
        active_leases: store.count_active_leases(now).await?,
    })
}

/// `cortex stats`
pub async fn run_stats(store: &dyn CatalogStore, db_path: &Path, now: i64) -> Result<()> {
    let stats = gather_stats(store, now).await?;
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("Radio Cortex: Catalog Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Items:       {}", stats.total);
    for status in Status::ALL {
        let count = stats.by_status.get(status.as_str()).copied().unwrap_or(0);
        println!("    {:<27} {:>6}", status.as_str(), count);
    }
    println!();
    println!("  Vectors:     {} ({} dims)", stats.vectors, stats.vector_dims);
    println!("  Leased now:  {}", stats.active_leases);
    if let Some(item) = store.list_recent(1).await?.into_iter().next() {
        println!(
            "  Last change: {} ({})",
            format_ts_iso(item.updated_at),
            format_ago(now - item.updated_at)
        );
    }
    println!();
    Ok(())
}

/// Rough "N units ago" rendering of an elapsed span in milliseconds.
fn format_ago(elapsed_ms: i64) -> String {
    let elapsed = chrono::Duration::milliseconds(elapsed_ms.max(0));
    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_cortex_core::license::LicenseKind;
    use radio_cortex_core::models::NewItem;
    use radio_cortex_core::store::memory::InMemoryStore;
    use radio_cortex_core::store::{ItemStore, LeaseGuard, Transition, VectorIndex};

    #[tokio::test]
    async fn test_gather_stats_counts_everything() {
        let store = InMemoryStore::new(3);
        let mut ids = Vec::new();
        for n in 0..3 {
            let item = store
                .insert(
                    NewItem {
                        source: "test".into(),
                        source_id: n.to_string(),
                        title: format!("track {n}"),
                        artist: None,
                        album: None,
                        duration_secs: None,
                        license_raw: None,
                        license_kind: LicenseKind::Unknown,
                        source_url: format!("https://example.org/{n}"),
                        media_url: None,
                        collected_by: "test".into(),
                    },
                    0,
                )
                .await
                .unwrap();
            ids.push(item.id);
        }
        store.upsert_vector(&ids[0], &[1.0, 0.0, 0.0], "m", 0).await.unwrap();
        let claim = Transition::claim(Status::Discovered, "w1", 0, 60_000);
        store
            .compare_and_transition(&ids[1], Status::Discovered, &LeaseGuard::Claimable, &claim, 0)
            .await
            .unwrap();

        let stats = gather_stats(&store, 1_000).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status["discovered"], 3);
        assert_eq!(stats.by_status["approved"], 0);
        assert_eq!(stats.by_status.len(), Status::ALL.len());
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.vector_dims, 3);
        assert_eq!(stats.active_leases, 1);

        let later = gather_stats(&store, 61_000).await.unwrap();
        assert_eq!(later.active_leases, 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ago() {
        assert_eq!(format_ago(-5), "just now");
        assert_eq!(format_ago(30_000), "just now");
        assert_eq!(format_ago(5 * 60_000), "5m ago");
        assert_eq!(format_ago(3 * 3_600_000), "3h ago");
        assert_eq!(format_ago(2 * 86_400_000), "2d ago");
    }
}
