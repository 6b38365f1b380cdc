//! Similarity search over approved items.
//!
//! The query text goes through the same [`Embedder`] the enrich agent uses,
//! then the vector index returns the top-`k` approved items by cosine
//! similarity (ties: most recently updated first, then id).

use anyhow::{bail, Result};
use radio_cortex_core::clock::format_ts_iso;
use radio_cortex_core::store::CatalogStore;
use serde::Serialize;

use crate::embedding::Embedder;

/// One search hit, enriched with the item fields worth showing.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub score: f32,
    pub title: String,
    pub artist: Option<String>,
    pub category: Option<String>,
    pub mood_tags: Vec<String>,
    pub license: String,
    pub source_url: String,
    pub updated_at: String,
}

/// Core search function returning structured data (used by CLI and server).
pub async fn search_items(
    store: &dyn CatalogStore,
    embedder: &dyn Embedder,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchResultItem>> {
    let query = query.trim();
    if query.is_empty() {
        bail!("search query must not be empty");
    }
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut vectors = embedder.embed(&[query.to_string()]).await?;
    let Some(vector) = vectors.pop() else {
        bail!("embedder returned no vector for the query");
    };
    let hits = store.query(&vector, limit).await?;

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        // An item can change status between the query and this lookup.
        let item = match store.get(&hit.item_id).await {
            Ok(item) if item.status.is_searchable() => item,
            Ok(_) => continue,
            Err(e) if e.is_lost_item() => continue,
            Err(e) => return Err(e.into()),
        };
        results.push(SearchResultItem {
            id: item.id,
            score: hit.score,
            title: item.title,
            artist: item.artist,
            category: item.category,
            mood_tags: item.mood_tags.into_iter().collect(),
            license: item.license_kind.as_str().to_string(),
            source_url: item.source_url,
            updated_at: format_ts_iso(item.updated_at),
        });
    }
    Ok(results)
}

/// `cortex search "<text>"`
pub async fn run_search(
    store: &dyn CatalogStore,
    embedder: &dyn Embedder,
    query: &str,
    limit: usize,
) -> Result<()> {
    let results = search_items(store, embedder, query, limit).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let by = result
            .artist
            .as_deref()
            .map(|a| format!(" / {}", a))
            .unwrap_or_default();
        println!("{}. [{:.2}] {}{}", i + 1, result.score, result.title, by);
        if let Some(ref category) = result.category {
            println!("    category: {}", category);
        }
        if !result.mood_tags.is_empty() {
            println!("    moods: {}", result.mood_tags.join(", "));
        }
        println!("    license: {}", result.license);
        println!("    url: {}", result.source_url);
        println!("    id: {}", result.id);
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use radio_cortex_core::license::LicenseKind;
    use radio_cortex_core::models::{ItemPatch, NewItem, Status};
    use radio_cortex_core::pipeline;
    use radio_cortex_core::store::memory::InMemoryStore;
    use radio_cortex_core::store::{ItemStore, LeaseGuard, Transition, VectorIndex};

    async fn add(
        store: &InMemoryStore,
        embedder: &HashEmbedder,
        title: &str,
        approved: bool,
    ) -> String {
        let item = store
            .insert(
                NewItem {
                    source: "test".into(),
                    source_id: title.into(),
                    title: title.into(),
                    artist: None,
                    album: None,
                    duration_secs: None,
                    license_raw: None,
                    license_kind: LicenseKind::Cc0,
                    source_url: format!("https://example.org/{}", title.replace(' ', "-")),
                    media_url: None,
                    collected_by: "test".into(),
                },
                0,
            )
            .await
            .unwrap();
        let vector = embedder.embed(&[title.to_string()]).await.unwrap().remove(0);
        store.upsert_vector(&item.id, &vector, "hash-64", 0).await.unwrap();

        if approved {
            let path = [
                (Status::Discovered, Status::PendingEnrichment),
                (Status::PendingEnrichment, Status::PendingCompliance),
                (Status::PendingCompliance, Status::Approved),
            ];
            for (from, to) in path {
                let cap = pipeline::owning_capability(from).unwrap();
                let advance = Transition::advance(to, cap, ItemPatch::default());
                store
                    .compare_and_transition(&item.id, from, &LeaseGuard::Unleased, &advance, 1)
                    .await
                    .unwrap();
            }
        }
        item.id
    }

    #[tokio::test]
    async fn test_search_returns_only_approved_best_first() {
        let store = InMemoryStore::new(64);
        let embedder = HashEmbedder::new(64);
        let jazz = add(&store, &embedder, "late night jazz piano", true).await;
        let techno = add(&store, &embedder, "warehouse techno", true).await;
        let hidden = add(&store, &embedder, "late night jazz piano trio", false).await;

        let results = search_items(&store, &embedder, "jazz piano", 10).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], jazz);
        assert_eq!(ids[1], techno);
        assert!(!ids.contains(&hidden));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let store = InMemoryStore::new(64);
        let embedder = HashEmbedder::new(64);
        assert!(search_items(&store, &embedder, "   ", 5).await.is_err());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_surfaces() {
        let store = InMemoryStore::new(64);
        let embedder = HashEmbedder::new(32);
        let err = search_items(&store, &embedder, "jazz", 5).await.unwrap_err();
        assert!(err.to_string().contains("schema"));
    }
}
